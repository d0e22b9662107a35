use std::collections::{BTreeMap, BTreeSet};

use stratum_core::ChangeOrder;

use crate::error::EngineError;

/// Dependency relation over the resources of one run.
///
/// An edge `a -> b` means `a` depends on `b`. Nodes and dependency lists are
/// kept sorted so every traversal is deterministic.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build and validate the graph. Every dependency must itself be a node,
    /// and the relation must be acyclic.
    pub fn new(edges: BTreeMap<String, BTreeSet<String>>) -> Result<Self, EngineError> {
        let mut dependents: BTreeMap<String, BTreeSet<String>> =
            edges.keys().map(|id| (id.clone(), BTreeSet::new())).collect();

        for (id, deps) in &edges {
            for dep in deps {
                match dependents.get_mut(dep) {
                    Some(set) => {
                        set.insert(id.clone());
                    }
                    None => {
                        return Err(EngineError::DanglingDependency {
                            id: id.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        let graph = Self {
            dependencies: edges,
            dependents,
        };
        if let Some(cycle) = graph.find_cycle() {
            return Err(EngineError::CyclicDependency { cycle });
        }
        Ok(graph)
    }

    pub fn from_order(order: &ChangeOrder) -> Result<Self, EngineError> {
        let edges = order
            .change_steps
            .iter()
            .map(|(id, step)| (id.clone(), step.dependencies().iter().cloned().collect()))
            .collect();
        Self::new(edges)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dependencies.contains_key(id)
    }

    pub fn dependencies<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a String> + use<'a> {
        self.dependencies.get(id).into_iter().flatten()
    }

    pub fn dependents<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a String> + use<'a> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Dependencies before dependents; ties broken by id.
    pub fn topological_order(&self) -> Vec<String> {
        let mut remaining: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in self.dependents(id) {
                if let Some(n) = remaining.get_mut(dependent.as_str()) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }
        order
    }

    /// Depth-first search for a back edge. Returns the cycle as a path that
    /// starts and ends on the same id.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

        for root in self.dependencies.keys() {
            if marks.contains_key(root.as_str()) {
                continue;
            }
            // `path[i]` is the node whose remaining deps are `stack[i]`.
            let mut path: Vec<&str> = vec![root.as_str()];
            let mut stack = vec![self.dependencies(root)];
            marks.insert(root.as_str(), Mark::Visiting);

            while let Some(iter) = stack.last_mut() {
                match iter.next() {
                    Some(dep) => match marks.get(dep.as_str()) {
                        Some(Mark::Visiting) => {
                            let start = path.iter().position(|id| *id == dep.as_str()).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[start..].iter().map(|id| id.to_string()).collect();
                            cycle.push(dep.clone());
                            return Some(cycle);
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(dep.as_str(), Mark::Visiting);
                            path.push(dep.as_str());
                            stack.push(self.dependencies(dep));
                        }
                    },
                    None => {
                        stack.pop();
                        if let Some(done) = path.pop() {
                            marks.insert(done, Mark::Done);
                        }
                    }
                }
            }
        }
        None
    }
}
