//! Typed dependency graph over a blueprint.
//!
//! Edges are derived from reference expressions: a resource depends on every
//! resource it references, so creation places referents first and
//! destruction reverses the order. The graph must be acyclic; ordering is
//! deterministic (lexicographic Kahn) so re-planning the same blueprint
//! always yields the same sequence.

use std::collections::{BTreeMap, BTreeSet};

use plinth_stack::{Blueprint, LogicalId};

use crate::EngineError;

#[derive(Debug, Clone)]
pub struct DepGraph {
    deps: BTreeMap<LogicalId, BTreeSet<LogicalId>>,
    dependents: BTreeMap<LogicalId, BTreeSet<LogicalId>>,
    creation_order: Vec<LogicalId>,
}

impl DepGraph {
    /// Builds the graph and computes the creation order, failing on cycles.
    pub fn build(blueprint: &Blueprint) -> Result<Self, EngineError> {
        let mut deps: BTreeMap<LogicalId, BTreeSet<LogicalId>> = BTreeMap::new();
        let mut dependents: BTreeMap<LogicalId, BTreeSet<LogicalId>> = BTreeMap::new();

        for resource in blueprint.resources() {
            deps.entry(resource.id.clone()).or_default();
            dependents.entry(resource.id.clone()).or_default();
        }
        for resource in blueprint.resources() {
            for target in resource.spec.references() {
                deps.get_mut(&resource.id)
                    .expect("node registered above")
                    .insert(target.clone());
                dependents
                    .entry(target)
                    .or_default()
                    .insert(resource.id.clone());
            }
        }

        let creation_order = topological_order(&deps, &dependents)?;
        Ok(Self {
            deps,
            dependents,
            creation_order,
        })
    }

    /// Creation order: every resource appears after everything it references.
    pub fn creation_order(&self) -> &[LogicalId] {
        &self.creation_order
    }

    /// Destruction order: exact reverse of creation.
    pub fn destruction_order(&self) -> Vec<LogicalId> {
        self.creation_order.iter().rev().cloned().collect()
    }

    pub fn dependencies_of(&self, id: &LogicalId) -> impl Iterator<Item = &LogicalId> {
        self.deps.get(id).into_iter().flatten()
    }

    pub fn dependents_of(&self, id: &LogicalId) -> impl Iterator<Item = &LogicalId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Everything that transitively references `id`.
    pub fn transitive_dependents(&self, id: &LogicalId) -> BTreeSet<LogicalId> {
        let mut out = BTreeSet::new();
        let mut stack: Vec<&LogicalId> = self.dependents_of(id).collect();
        while let Some(current) = stack.pop() {
            if out.insert(current.clone()) {
                stack.extend(self.dependents_of(current));
            }
        }
        out
    }
}

fn topological_order(
    deps: &BTreeMap<LogicalId, BTreeSet<LogicalId>>,
    dependents: &BTreeMap<LogicalId, BTreeSet<LogicalId>>,
) -> Result<Vec<LogicalId>, EngineError> {
    let mut outstanding: BTreeMap<&LogicalId, usize> = deps
        .iter()
        .map(|(id, targets)| (id, targets.len()))
        .collect();
    // BTreeSet keeps the ready pool sorted, which makes the order stable.
    let mut ready: BTreeSet<&LogicalId> = outstanding
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(deps.len());
    while let Some(next) = ready.iter().next().copied() {
        ready.remove(next);
        order.push(next.clone());
        for dependent in dependents.get(next).into_iter().flatten() {
            let count = outstanding
                .get_mut(dependent)
                .expect("dependent registered as node");
            *count -= 1;
            if *count == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != deps.len() {
        let offender = outstanding
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| (*id).clone())
            .next()
            .expect("at least one node remains on a cycle");
        return Err(EngineError::DependencyCycle(offender));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_stack::{
        ids, Artifact, IngestStack, Parameters, PolicyDocument, Resource, ResourceSpec,
        RolePolicySpec, StackDocuments,
    };

    fn demo_blueprint() -> Blueprint {
        let ctx = Parameters {
            region: Some("eu-west-1".into()),
            access_key: Some("AKIAEXAMPLE".into()),
            secret_key: Some("hunter2".into()),
            bucket_name: Some("demo-bucket".into()),
            table_name: Some("demo-table".into()),
            table_key: Some("id".into()),
            api_name: Some("demo-api".into()),
            api_stage: Some("prod".into()),
            ..Parameters::default()
        }
        .resolve()
        .unwrap();
        let doc =
            |name: &str| PolicyDocument::from_bytes(name, b"{\"ok\":true}".to_vec()).unwrap();
        let documents = StackDocuments {
            compute_policy: doc("compute"),
            gateway_policy: doc("gateway"),
            request_template: doc("template"),
        };
        let artifact = Artifact {
            source_dir: "lambda".into(),
            content_hash: "hash".into(),
        };
        IngestStack::compose(&ctx, &documents, &artifact).unwrap()
    }

    fn position(order: &[LogicalId], id: &str) -> usize {
        order
            .iter()
            .position(|candidate| candidate.as_str() == id)
            .unwrap_or_else(|| panic!("{id} missing from order"))
    }

    #[test]
    fn every_reference_is_created_first() {
        let blueprint = demo_blueprint();
        let graph = DepGraph::build(&blueprint).unwrap();
        let order = graph.creation_order();

        for resource in blueprint.resources() {
            let own = position(order, resource.id.as_str());
            for target in resource.spec.references() {
                let dep = position(order, target.as_str());
                assert!(
                    dep < own,
                    "{} must be created before {}",
                    target,
                    resource.id
                );
            }
        }
    }

    #[test]
    fn destruction_reverses_creation() {
        let graph = DepGraph::build(&demo_blueprint()).unwrap();
        let mut reversed = graph.destruction_order();
        reversed.reverse();
        assert_eq!(reversed, graph.creation_order());
    }

    #[test]
    fn order_is_deterministic() {
        let blueprint = demo_blueprint();
        let first = DepGraph::build(&blueprint).unwrap();
        let second = DepGraph::build(&blueprint).unwrap();
        assert_eq!(first.creation_order(), second.creation_order());
    }

    #[test]
    fn integration_response_ordered_after_integration() {
        let graph = DepGraph::build(&demo_blueprint()).unwrap();
        let order = graph.creation_order();
        assert!(
            position(order, ids::INTEGRATION) < position(order, ids::INTEGRATION_RESPONSE)
        );
        assert!(position(order, ids::DEPLOYMENT) < position(order, ids::STAGE));
    }

    #[test]
    fn cycle_is_rejected_at_build_time() {
        let doc = PolicyDocument::from_bytes("doc", b"{}".to_vec()).unwrap();
        let mut blueprint = Blueprint::new();
        blueprint
            .insert(Resource::new(
                "a",
                ResourceSpec::RolePolicy(RolePolicySpec {
                    role: "b".into(),
                    document: doc.clone(),
                }),
            ))
            .unwrap();
        blueprint
            .insert(Resource::new(
                "b",
                ResourceSpec::RolePolicy(RolePolicySpec {
                    role: "a".into(),
                    document: doc,
                }),
            ))
            .unwrap();

        let err = DepGraph::build(&blueprint).unwrap_err();
        assert!(matches!(err, EngineError::DependencyCycle(_)));
    }

    #[test]
    fn transitive_dependents_cover_the_gateway_chain() {
        let graph = DepGraph::build(&demo_blueprint()).unwrap();
        let downstream = graph.transitive_dependents(&ids::METHOD.into());
        assert!(downstream.contains(&ids::INTEGRATION.into()));
        assert!(downstream.contains(&ids::DEPLOYMENT.into()));
        assert!(downstream.contains(&ids::STAGE.into()));
        assert!(!downstream.contains(&ids::BUCKET.into()));
    }
}
