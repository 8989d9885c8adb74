//! Scenario 4 (spec.md §8): Fork F→{X,Y}; a Join J waiting for both legs
//! before advancing to `end`.

use statechart_engine::builder::{StateBuilder, StateMachineBuilder, TransitionBuilder};
use statechart_engine::instance::Instance;
use statechart_engine::StateId;

fn build() -> Instance {
    let definition = StateMachineBuilder::new()
        .label("fork_join")
        .initial("f")
        .state(StateBuilder::fork("f").fork_target("x").fork_target("y"))
        .state(StateBuilder::atomic("x").transition(TransitionBuilder::new().on_event("x_ok").to("j")))
        .state(StateBuilder::atomic("y").transition(TransitionBuilder::new().on_event("y_ok").to("j")))
        .state(StateBuilder::join("j").join_combination(&["x", "y"]).join_target("end"))
        .state(&mut StateBuilder::final_state("end"))
        .build()
        .expect("valid machine");
    Instance::new(definition)
}

#[test]
fn starting_enters_both_fork_legs_concurrently() {
    let instance = build();
    instance.start().unwrap();
    assert!(instance.is_active(&StateId::new("x")));
    assert!(instance.is_active(&StateId::new("y")));
}

#[test]
fn join_waits_for_the_second_leg_before_advancing() {
    let instance = build();
    instance.start().unwrap();

    let after_x = instance.post("x_ok").unwrap();
    assert!(after_x.matched);
    assert!(!instance.is_active(&StateId::new("end")));
    assert!(instance.is_active(&StateId::new("y")));

    let after_y = instance.post("y_ok").unwrap();
    assert!(after_y.matched);
    assert!(instance.is_active(&StateId::new("end")));
}

#[test]
fn join_fires_regardless_of_arrival_order() {
    let instance = build();
    instance.start().unwrap();

    instance.post("y_ok").unwrap();
    assert!(!instance.is_active(&StateId::new("end")));
    instance.post("x_ok").unwrap();
    assert!(instance.is_active(&StateId::new("end")));
}
