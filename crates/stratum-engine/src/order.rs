use std::collections::{BTreeMap, BTreeSet};

use stratum_core::{ActionType, ChangeOrder, ChangeStep, Resource, Spec, State};

use crate::diff::classify;
use crate::error::EngineError;
use crate::graph::DependencyGraph;

/// Pair every resource of `spec` and `prior` by id, classify each pair, and
/// validate the resulting dependency graph.
///
/// Fails before anything executes if an id is invalid or duplicated, if a
/// dependency names a resource found in neither the spec nor the prior state,
/// or if the dependencies form a cycle.
pub fn build_change_order(spec: &Spec, prior: &State) -> Result<ChangeOrder, EngineError> {
    spec.validate()?;

    let mut pairs: BTreeMap<&str, (Option<&Resource>, Option<&Resource>)> = BTreeMap::new();
    for (id, resource) in &prior.resources {
        pairs.entry(id.as_str()).or_default().0 = Some(resource);
    }
    for resource in &spec.resources {
        pairs.entry(resource.id.as_str()).or_default().1 = Some(resource);
    }

    let steps = pairs
        .into_iter()
        .map(|(id, (from, to))| {
            let action = classify(from, to);
            if action == ActionType::Undefined {
                return Err(EngineError::Internal(format!(
                    "resource {id} has neither a prior nor a planned state"
                )));
            }
            Ok(ChangeStep::new(id, action, from.cloned(), to.cloned()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    assemble(steps)
}

/// Plan deletion of everything recorded in `prior`.
pub fn build_destroy_order(prior: &State) -> Result<ChangeOrder, EngineError> {
    let steps = prior
        .resources
        .iter()
        .map(|(id, resource)| ChangeStep::new(id, ActionType::Delete, Some(resource.clone()), None))
        .collect();
    assemble(steps)
}

fn assemble(steps: Vec<ChangeStep>) -> Result<ChangeOrder, EngineError> {
    let edges: BTreeMap<String, BTreeSet<String>> = steps
        .iter()
        .map(|step| (step.id.clone(), step.dependencies().iter().cloned().collect()))
        .collect();
    let graph = DependencyGraph::new(edges)?;

    let order = ChangeOrder {
        step_keys: graph.topological_order(),
        change_steps: steps.into_iter().map(|s| (s.id.clone(), s)).collect(),
    };
    tracing::debug!(
        steps = order.len(),
        create = order.count(ActionType::Create),
        update = order.count(ActionType::Update),
        delete = order.count(ActionType::Delete),
        "change order built"
    );
    Ok(order)
}
