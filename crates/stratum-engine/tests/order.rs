mod common;

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::json;

use common::{simple, terraform};
use stratum_core::{ActionType, Spec, State};
use stratum_engine::{EngineError, build_change_order, build_destroy_order};

fn state_of(resources: Vec<stratum_core::Resource>) -> State {
    let mut state = State::new("dev");
    for resource in resources {
        state.upsert(resource);
    }
    state
}

#[test]
fn creates_every_resource_against_empty_state() {
    let spec = Spec::new(vec![simple("b").depends_on("a"), simple("a")]);
    let order = build_change_order(&spec, &State::new("dev")).unwrap();

    assert_eq!(order.len(), 2);
    assert_eq!(order.get("a").unwrap().action, ActionType::Create);
    assert_eq!(order.get("b").unwrap().action, ActionType::Create);
    assert_eq!(order.step_keys, vec!["a", "b"]);
}

#[test]
fn changed_attributes_plan_an_update() {
    let spec = Spec::new(vec![terraform("a", json!({"size": 2}))]);
    let prior = state_of(vec![terraform("a", json!({"size": 1}))]);

    let order = build_change_order(&spec, &prior).unwrap();
    let step = order.get("a").unwrap();
    assert_eq!(step.action, ActionType::Update);
    assert_eq!(step.from.as_ref().unwrap().attributes["size"], json!(1));
    assert_eq!(step.to.as_ref().unwrap().attributes["size"], json!(2));
}

#[test]
fn resources_missing_from_spec_are_deleted() {
    let spec = Spec::new(vec![simple("a")]);
    let prior = state_of(vec![simple("a"), simple("gone")]);

    let order = build_change_order(&spec, &prior).unwrap();
    assert_eq!(order.get("a").unwrap().action, ActionType::UnChange);
    assert_eq!(order.get("gone").unwrap().action, ActionType::Delete);
    assert!(order.has_changes());
}

#[test]
fn destroy_order_deletes_everything() {
    let prior = state_of(vec![simple("a"), simple("b").depends_on("a")]);
    let order = build_destroy_order(&prior).unwrap();

    assert_eq!(order.len(), 2);
    assert!(order.steps().all(|s| s.action == ActionType::Delete));
    assert_eq!(order.count(ActionType::Delete), 2);
}

#[test]
fn cycle_is_rejected() {
    let spec = Spec::new(vec![
        simple("a").depends_on("c"),
        simple("b").depends_on("a"),
        simple("c").depends_on("b"),
    ]);
    let err = build_change_order(&spec, &State::new("dev")).unwrap_err();
    match &err {
        EngineError::CyclicDependency { cycle } => {
            assert_eq!(cycle.first(), cycle.last());
            assert_eq!(cycle.len(), 4);
        }
        other => panic!("expected cycle, got {other}"),
    }
    assert!(err.is_config_error());
}

#[test]
fn self_dependency_is_a_cycle() {
    let spec = Spec::new(vec![simple("a").depends_on("a")]);
    let err = build_change_order(&spec, &State::new("dev")).unwrap_err();
    assert!(matches!(err, EngineError::CyclicDependency { ref cycle } if cycle == &["a", "a"]));
}

#[test]
fn dangling_dependency_is_rejected() {
    let spec = Spec::new(vec![simple("a").depends_on("ghost")]);
    let err = build_change_order(&spec, &State::new("dev")).unwrap_err();
    match err {
        EngineError::DanglingDependency { id, dependency } => {
            assert_eq!(id, "a");
            assert_eq!(dependency, "ghost");
        }
        other => panic!("expected dangling dependency, got {other}"),
    }
}

#[test]
fn dependency_on_prior_state_is_tolerated() {
    let spec = Spec::new(vec![simple("a").depends_on("legacy")]);
    let prior = state_of(vec![simple("legacy")]);
    let order = build_change_order(&spec, &prior).unwrap();
    assert_eq!(order.get("legacy").unwrap().action, ActionType::Delete);
    assert_eq!(order.get("a").unwrap().action, ActionType::Create);
}

#[test]
fn duplicate_ids_are_rejected() {
    let spec = Spec::new(vec![simple("a"), simple("a")]);
    let err = build_change_order(&spec, &State::new("dev")).unwrap_err();
    assert!(matches!(err, EngineError::Spec(_)));
}

#[test]
fn display_order_breaks_ties_by_id() {
    let spec = Spec::new(vec![
        simple("z"),
        simple("m").depends_on("z"),
        simple("b"),
        simple("a").depends_on("m"),
    ]);
    let order = build_change_order(&spec, &State::new("dev")).unwrap();
    assert_eq!(order.step_keys, vec!["b", "z", "m", "a"]);
}

/// Resources `r0..rn` where `ri` may depend on any `rj` with `j < i`.
fn arb_dag() -> impl Strategy<Value = Vec<stratum_core::Resource>> {
    (1usize..10).prop_flat_map(|n| {
        proptest::collection::vec(any::<bool>(), n * n).prop_map(move |bits| {
            (0..n)
                .map(|i| {
                    (0..i).filter(|j| bits[i * n + j]).fold(simple(&format!("r{i}")), |r, j| {
                        r.depends_on(format!("r{j}"))
                    })
                })
                .collect()
        })
    })
}

proptest! {
    #[test]
    fn one_step_per_id_in_prior_or_spec(
        planned in arb_dag(),
        prior_ids in proptest::collection::btree_set("r[0-9]|old[0-3]", 0..6),
    ) {
        let prior = state_of(prior_ids.iter().map(|id| simple(id)).collect());
        let spec = Spec::new(planned.clone());
        let order = build_change_order(&spec, &prior).unwrap();

        let expected: BTreeSet<String> = planned
            .iter()
            .map(|r| r.id.clone())
            .chain(prior_ids.iter().cloned())
            .collect();
        let actual: BTreeSet<String> = order.change_steps.keys().cloned().collect();
        prop_assert_eq!(&actual, &expected);
        prop_assert_eq!(order.step_keys.len(), expected.len());

        // Display order lists dependencies first.
        for (i, id) in order.step_keys.iter().enumerate() {
            for dep in order.get(id).unwrap().dependencies() {
                let at = order.step_keys.iter().position(|k| k == dep).unwrap();
                prop_assert!(at < i, "{dep} should precede {id}");
            }
        }
    }
}
