//! Scenario 2 (spec.md §8): idle→running on "go" guarded by `ctx["ok"] == true`.

use statechart_engine::builder::{StateBuilder, StateMachineBuilder, TransitionBuilder};
use statechart_engine::context::Context;
use statechart_engine::instance::Instance;
use statechart_engine::StateId;
use std::sync::Arc;

fn is_ok(ctx: &Context) -> bool {
    ctx.get("ok").and_then(|v| v.as_bool()).unwrap_or(false)
}

fn build() -> Instance {
    let definition = StateMachineBuilder::new()
        .label("guarded_branch")
        .initial("idle")
        .state(
            StateBuilder::atomic("idle")
                .transition(TransitionBuilder::new().on_event("go").guarded_by(Arc::new(is_ok)).to("running")),
        )
        .state(&mut StateBuilder::atomic("running"))
        .build()
        .expect("valid machine");
    Instance::new(definition)
}

#[test]
fn unguarded_attempt_is_rejected_and_state_is_unchanged() {
    let instance = build();
    instance.start().unwrap();

    let result = instance.post("go").unwrap();
    assert!(!result.matched);
    assert!(result.rejection_reason.is_some());
    assert_eq!(instance.current_state(), Some(StateId::new("idle")));
}

#[test]
fn guarded_attempt_fires_once_context_flag_is_set() {
    let instance = build();
    instance.start().unwrap();
    instance.context().set("ok", true);

    let result = instance.post("go").unwrap();
    assert!(result.matched);
    assert_eq!(instance.current_state(), Some(StateId::new("running")));
}
