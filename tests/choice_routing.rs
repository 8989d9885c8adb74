//! Scenario 5 (spec.md §8): Start→C on "decide"; C branches on `ctx["path"]`
//! to A or B, resolved the instant the choice pseudostate is entered.

use statechart_engine::builder::{StateBuilder, StateMachineBuilder, TransitionBuilder};
use statechart_engine::context::Context;
use statechart_engine::instance::Instance;
use statechart_engine::StateId;
use std::sync::Arc;

fn wants_a(ctx: &Context) -> bool {
    ctx.get("path").and_then(|v| v.as_str().map(String::from)) == Some("a".to_string())
}

fn build() -> Instance {
    let definition = StateMachineBuilder::new()
        .label("choice_routing")
        .initial("start")
        .state(StateBuilder::atomic("start").transition(TransitionBuilder::new().on_event("decide").to("c")))
        .state(StateBuilder::choice("c").branch(Arc::new(wants_a), "a_state", None).default_target("b_state"))
        .state(&mut StateBuilder::atomic("a_state"))
        .state(&mut StateBuilder::atomic("b_state"))
        .build()
        .expect("valid machine");
    Instance::new(definition)
}

#[test]
fn routes_to_a_when_the_branch_guard_matches() {
    let instance = build();
    instance.start().unwrap();
    instance.context().set("path", "a");

    let result = instance.post("decide").unwrap();
    assert!(result.matched);
    assert_eq!(instance.current_state(), Some(StateId::new("a_state")));
}

#[test]
fn falls_through_to_the_default_branch_otherwise() {
    let instance = build();
    instance.start().unwrap();
    instance.context().set("path", "anything_else");

    instance.post("decide").unwrap();
    assert_eq!(instance.current_state(), Some(StateId::new("b_state")));
}
