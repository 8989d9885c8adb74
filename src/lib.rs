/*!
A hierarchical state-machine engine implementing the UML statechart
vocabulary: composite and orthogonal (parallel) states, choice, junction,
fork, and join pseudostates, and shallow/deep history.

The crate is organized as a builder/definition/instance triad: a
[`builder::StateMachineBuilder`] accumulates state and transition
declarations and produces an immutable [`definition::Definition`]; an
[`instance::Instance`] borrows an `Arc<Definition>` and carries the mutable
active configuration, posting events through it one at a time.

# Example

```
use statechart_engine::builder::{StateBuilder, StateMachineBuilder, TransitionBuilder};
use statechart_engine::instance::Instance;

let definition = StateMachineBuilder::new()
    .label("traffic_light")
    .initial("red")
    .state(StateBuilder::atomic("red").transition(TransitionBuilder::new().on_event("next").to("green")))
    .state(StateBuilder::atomic("green").transition(TransitionBuilder::new().on_event("next").to("yellow")))
    .state(StateBuilder::atomic("yellow").transition(TransitionBuilder::new().on_event("next").to("red")))
    .build()
    .expect("valid machine");

let instance = Instance::new(definition);
instance.start().unwrap();
instance.post("next").unwrap();
assert!(instance.is_active(&"green".into()));
```

# See Also

* [OMG Unified Modeling Language, Version 2.5.1](https://www.omg.org/spec/UML/2.5.1/PDF) §14.2 (State Machines)
* [State Chart XML (SCXML): State Machine Notation for Control Abstraction](https://www.w3.org/TR/scxml/)
*/

#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_code,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
)]

pub mod builder;
pub mod context;
pub mod definition;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod id;
pub mod instance;
pub mod model;
pub mod observer;
pub mod snapshot;

pub use definition::Definition;
pub use event::{Event, EventResult};
pub use id::StateId;
pub use instance::{Instance, Phase};
pub use observer::Observer;
