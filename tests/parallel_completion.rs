//! Scenario 3 (spec.md §8): parallel region completion fires within the same
//! step the last region reaches its final state.

use statechart_engine::builder::{RegionBuilder, StateBuilder, StateMachineBuilder, TransitionBuilder};
use statechart_engine::instance::Instance;
use statechart_engine::StateId;

fn build() -> Instance {
    let definition = StateMachineBuilder::new()
        .label("parallel_completion")
        .initial("p")
        .state(
            StateBuilder::parallel("p")
                .region(
                    RegionBuilder::new("r1")
                        .initial("a")
                        .member(StateBuilder::atomic("a").transition(TransitionBuilder::new().on_event("a_done").to("a_final")))
                        .member(&mut StateBuilder::final_state("a_final")),
                )
                .region(
                    RegionBuilder::new("r2")
                        .initial("b")
                        .member(StateBuilder::atomic("b").transition(TransitionBuilder::new().on_event("b_done").to("b_final")))
                        .member(&mut StateBuilder::final_state("b_final")),
                )
                .transition(TransitionBuilder::new().on_event("").to("done")),
        )
        .state(&mut StateBuilder::final_state("done"))
        .build()
        .expect("valid machine");
    Instance::new(definition)
}

#[test]
fn completing_one_region_does_not_fire_the_parallel_completion() {
    let instance = build();
    instance.start().unwrap();

    let result = instance.post("a_done").unwrap();
    assert!(result.matched);
    assert!(!result.completed);
    assert!(instance.is_active(&StateId::new("p")));
    assert!(!instance.is_active(&StateId::new("done")));
}

#[test]
fn completing_both_regions_fires_the_completion_transition_on_the_second_event() {
    let instance = build();
    instance.start().unwrap();

    instance.post("a_done").unwrap();
    let result = instance.post("b_done").unwrap();

    assert!(result.completed);
    assert!(instance.is_active(&StateId::new("done")));
    assert!(!instance.is_active(&StateId::new("p")));
}
