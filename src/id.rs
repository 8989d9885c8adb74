/*!
State identifiers and the hierarchical name-resolution rules used when a
transition target is written relative to a composite or region context.

Generalizes the teacher's `core::id::ID`: the teacher's identifier was an
opaque, flat, randomly-generated token (`blob-uuid`/integer based). The
specification's states are named by the client, hierarchically, and must
support dot-qualified absolute paths and `../`-relative ancestor references
(spec.md §4.1), so `StateId` is a thin, cheaply-cloned wrapper over a
user-supplied string rather than a generated one.
*/

use std::fmt;
use std::sync::Arc;

/// A stable state identifier, simple (`"idle"`) or dot-qualified
/// (`"outer.inner"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StateId(Arc<str>);

impl StateId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(Arc::from(s.into().into_boxed_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` if this id is dot-qualified (contains a `.`).
    pub fn is_qualified(&self) -> bool {
        self.0.contains('.')
    }

    /// Split a dot-qualified id into its path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Build the dot-qualified id of `self` nested under `prefix`.
    pub fn qualify(prefix: &StateId, simple_name: &str) -> Self {
        Self::new(format!("{}.{}", prefix.as_str(), simple_name))
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Resolve a name written in the scope of `context_prefix` (the dot-qualified
/// id of the enclosing composite or region, if any) against the set of
/// top-level (unqualified) state ids known to the builder.
///
/// Mirrors spec.md §4.1:
/// 1. A dotted name is absolute.
/// 2. A `../`-prefixed name strips the prefix and is absolute (an ancestor
///    reference).
/// 3. Otherwise: if a top-level state of that simple name exists, it wins;
///    else the name is qualified with `context_prefix`.
pub fn resolve_name(
    name: &str,
    context_prefix: Option<&StateId>,
    top_level_names: &std::collections::HashSet<String>,
) -> StateId {
    if let Some(rest) = name.strip_prefix("../") {
        return StateId::new(rest);
    }
    if name.contains('.') {
        return StateId::new(name);
    }
    if top_level_names.contains(name) {
        return StateId::new(name);
    }
    match context_prefix {
        Some(prefix) => StateId::qualify(prefix, name),
        None => StateId::new(name),
    }
}
