//! Scenario 6 (spec.md §8): composite `active` toggles between `w` and `p`;
//! `sleep` exits to `idle` recording shallow history; `wake` re-enters
//! through the history pseudostate and restores the last active child.

use statechart_engine::builder::{StateBuilder, StateMachineBuilder, TransitionBuilder};
use statechart_engine::instance::Instance;
use statechart_engine::StateId;

fn build() -> Instance {
    let definition = StateMachineBuilder::new()
        .label("shallow_history_restore")
        .initial("active")
        .state(
            StateBuilder::composite("active")
                .initial("w")
                .child(StateBuilder::atomic("w").transition(TransitionBuilder::new().on_event("toggle").to("p")))
                .child(StateBuilder::atomic("p").transition(TransitionBuilder::new().on_event("toggle").to("w")))
                .child(&mut StateBuilder::shallow_history("h"))
                .transition(TransitionBuilder::new().on_event("sleep").to("idle")),
        )
        .state(StateBuilder::atomic("idle").transition(TransitionBuilder::new().on_event("wake").to("active.h")))
        .build()
        .expect("valid machine");
    Instance::new(definition)
}

#[test]
fn waking_with_no_prior_history_defaults_to_w() {
    let instance = build();
    instance.start().unwrap();
    instance.post("sleep").unwrap();
    assert_eq!(instance.current_state(), Some(StateId::new("idle")));

    instance.post("wake").unwrap();
    assert!(instance.is_active(&StateId::new("active.w")));
}

#[test]
fn sleeping_while_in_p_and_waking_restores_p() {
    let instance = build();
    instance.start().unwrap();

    instance.post("toggle").unwrap();
    assert!(instance.is_active(&StateId::new("active.p")));

    instance.post("sleep").unwrap();
    assert!(!instance.is_active(&StateId::new("active")));

    instance.post("wake").unwrap();
    assert!(instance.is_active(&StateId::new("active.p")));
    assert!(instance.is_active(&StateId::new("active")));
}
