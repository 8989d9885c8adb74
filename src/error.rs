/*!
Error types for construction-time validation and instance-operation failures.

Per-event soft failures (no matching transition, a guard that rejected the
only candidate) are not represented here — they are carried in
[`crate::event::EventResult`] as data, per the propagation policy in the
specification's error-handling design.
*/

use crate::id::StateId;
use thiserror::Error;

/// Failures detected while building a [`crate::definition::Definition`].
///
/// Build errors are fatal: a `StateMachineBuilder::build` that returns one of
/// these never produces a `Definition`, and none of these variants can occur
/// again once a definition exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("no initial state was designated")]
    MissingInitialState,

    #[error("initial state `{0}` does not exist")]
    UnknownInitialState(StateId),

    #[error("transition from `{0}` references unknown source state")]
    UnknownTransitionSource(StateId),

    #[error("transition from `{source}` to `{target}` references unknown target state")]
    UnknownTransitionTarget { source: StateId, target: StateId },

    #[error("composite state `{0}` has no substates")]
    EmptyComposite(StateId),

    #[error(
        "composite state `{0}` designates an initial substate that does not exist or is not a child"
    )]
    InvalidCompositeInitial(StateId),

    #[error("parallel state `{0}` has no regions")]
    EmptyParallel(StateId),

    #[error("region `{0}` has no member states")]
    EmptyRegion(StateId),

    #[error(
        "region `{0}` designates an initial member that does not exist or is not a member"
    )]
    InvalidRegionInitial(StateId),

    #[error("choice pseudostate `{0}` has neither guarded branches nor a default target")]
    ChoiceHasNoBranches(StateId),

    #[error("junction pseudostate `{0}` has neither a default target nor guarded transitions")]
    JunctionHasNoTarget(StateId),

    #[error("fork pseudostate `{0}` has no target states")]
    EmptyFork(StateId),

    #[error("join pseudostate `{0}` has no configured source combinations")]
    EmptyJoin(StateId),

    #[error("join pseudostate `{0}` source combination references unknown state `{1}`")]
    UnknownJoinSource(StateId, StateId),

    #[error("`{0}` is referenced as a parent but was never declared as a state")]
    UnknownParent(StateId),

    #[error("state id `{0}` is used by more than one state")]
    DuplicateStateId(StateId),

    #[error(
        "event `{event}` from `{state}` matches more than one transition at the same priority \
         tier; the dispatcher requires an unambiguous winner"
    )]
    AmbiguousTransition { state: StateId, event: String },
}

/// Failures returned directly from an [`crate::instance::Instance`] operation.
///
/// These are distinct from the soft, data-carried failures of event dispatch:
/// every variant here means the requested operation could not be attempted
/// at all, and the instance is left exactly as it was before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstanceError {
    #[error("operation requires the instance to be in the Started phase, but it is {0:?}")]
    NotStarted(crate::instance::Phase),

    #[error("operation requires the instance to be in the Stopped phase, but it is {0:?}")]
    NotStopped(crate::instance::Phase),

    #[error("state `{0}` does not exist in the instance's definition")]
    UnknownState(StateId),

    #[error("region `{0}` does not exist")]
    UnknownRegion(StateId),

    #[error("event name may not be empty")]
    EmptyEventName,

    #[error("transition action failed: {0}")]
    ActionFailed(String),

    #[error("a guard or action panicked: {0}")]
    Panicked(String),

    #[error("snapshot is malformed: {0}")]
    InvalidSnapshot(String),
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
pub type InstanceResult<T> = std::result::Result<T, InstanceError>;
