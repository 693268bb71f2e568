//! Planning and application of a declaration graph.
//!
//! [`Engine::plan`] diffs the blueprint against recorded state and assigns
//! each resource one action. Deployments replace when their chain hash
//! drifts, functions replace when their artifact hash drifts, stages update
//! when their deployment moves; everything else is created once and then
//! left alone. [`Engine::apply`] executes the plan concurrently, dependency
//! counts gating each task, and a failure aborts only the transitive
//! dependents of the failed resource so independent branches still finish.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::bail;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use plinth_stack::{Attr, Blueprint, DeploymentSpec, LogicalId, Resource, ResourceSpec, Value};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::graph::DepGraph;
use crate::provider::{PhysicalResource, Provider, ResolvedAttrs};
use crate::redeploy::trigger_hash;
use crate::{validate, EngineError};

/// Durable record of what has been provisioned, keyed by logical id.
/// Feeding the same state back into [`Engine::apply`] makes a rerun resume
/// from wherever the previous run stopped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackState {
    records: BTreeMap<LogicalId, PhysicalResource>,
}

impl StackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &LogicalId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &LogicalId) -> Option<&PhysicalResource> {
        self.records.get(id)
    }

    /// Records a physical resource, replacing any previous record for the
    /// same logical id.
    pub fn insert(&mut self, physical: PhysicalResource) {
        self.records.insert(physical.logical.clone(), physical);
    }

    pub fn remove(&mut self, id: &LogicalId) -> Option<PhysicalResource> {
        self.records.remove(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Replace,
    Update,
    Noop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: LogicalId,
    pub kind: String,
    pub action: PlanAction,
}

/// Ordered list of planned actions, one per declared resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn action_of(&self, id: &LogicalId) -> Option<PlanAction> {
        self.steps
            .iter()
            .find(|step| step.id == *id)
            .map(|step| step.action)
    }

    pub fn changes(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.action != PlanAction::Noop)
            .count()
    }

    pub fn is_noop(&self) -> bool {
        self.changes() == 0
    }
}

/// Values the stack promises to its callers once applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outputs {
    pub invoke_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub created: Vec<LogicalId>,
    pub replaced: Vec<LogicalId>,
    pub updated: Vec<LogicalId>,
    pub unchanged: Vec<LogicalId>,
    pub outputs: Outputs,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

struct Applied {
    physical: PhysicalResource,
    retired: Option<PhysicalResource>,
}

/// The provisioning engine: a validated blueprint plus its dependency graph.
#[derive(Debug, Clone)]
pub struct Engine {
    blueprint: Blueprint,
    graph: DepGraph,
}

impl Engine {
    /// Validates the blueprint, checks the permission pairings and derives
    /// the dependency graph. A blueprint that fails here is rejected before
    /// anything is provisioned.
    pub fn new(blueprint: Blueprint) -> Result<Self, EngineError> {
        blueprint.validate()?;
        validate::check_bindings(&blueprint)?;
        let graph = DepGraph::build(&blueprint)?;
        info!(resources = blueprint.len(), "engine ready");
        Ok(Self { blueprint, graph })
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    pub fn graph(&self) -> &DepGraph {
        &self.graph
    }

    /// Diffs the blueprint against recorded state, in creation order.
    pub fn plan(&self, state: &StackState) -> Plan {
        let mut actions: BTreeMap<LogicalId, PlanAction> = BTreeMap::new();
        let mut steps = Vec::new();

        for id in self.graph.creation_order() {
            let Some(resource) = self.blueprint.get(id) else {
                continue;
            };
            let action = match state.get(id) {
                None => PlanAction::Create,
                Some(physical) => match &resource.spec {
                    ResourceSpec::Function(spec)
                        if physical.attribute("content_hash")
                            != Some(spec.content_hash.as_str()) =>
                    {
                        PlanAction::Replace
                    }
                    ResourceSpec::Deployment(spec) => {
                        let member_changing = spec.chain.iter().any(|member| {
                            matches!(
                                actions.get(member),
                                Some(PlanAction::Create | PlanAction::Replace)
                            )
                        });
                        let hash_drifted = match chain_hash(spec, state) {
                            Some(hash) => {
                                physical.attribute("trigger_hash") != Some(hash.as_str())
                            }
                            None => true,
                        };
                        if member_changing || hash_drifted {
                            PlanAction::Replace
                        } else {
                            PlanAction::Noop
                        }
                    }
                    ResourceSpec::Stage(spec) => {
                        if matches!(
                            actions.get(&spec.deployment),
                            Some(PlanAction::Create | PlanAction::Replace)
                        ) {
                            PlanAction::Update
                        } else {
                            PlanAction::Noop
                        }
                    }
                    _ => PlanAction::Noop,
                },
            };
            actions.insert(id.clone(), action);
            steps.push(PlanStep {
                id: id.clone(),
                kind: resource.spec.kind().to_owned(),
                action,
            });
        }

        Plan { steps }
    }

    /// Read-only staleness check: every stage must point at its current
    /// deployment and that deployment's hash must match the live chain.
    /// [`Engine::apply`] repairs what this reports.
    pub fn verify_stage(&self, state: &StackState) -> Result<(), EngineError> {
        for resource in self.blueprint.resources() {
            let ResourceSpec::Stage(spec) = &resource.spec else {
                continue;
            };
            let stale = || EngineError::RedeploymentHashStale {
                stage: resource.id.clone(),
            };
            let Some(stage) = state.get(&resource.id) else {
                return Err(stale());
            };
            let Some(deployment) = state.get(&spec.deployment) else {
                return Err(stale());
            };
            if stage.attribute("deployment_id") != Some(deployment.physical_id.as_str()) {
                return Err(stale());
            }
            if let Some(declared) = self.blueprint.get(&spec.deployment) {
                if let ResourceSpec::Deployment(dep_spec) = &declared.spec {
                    match chain_hash(dep_spec, state) {
                        Some(hash) if deployment.attribute("trigger_hash")
                            == Some(hash.as_str()) => {}
                        _ => return Err(stale()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies the plan for the current state. Independent resources run
    /// concurrently; a rejection aborts the failed resource's transitive
    /// dependents and the first rejection is returned once in-flight work
    /// settles. State is updated as resources land, so rerunning after a
    /// partial failure resumes instead of starting over.
    #[instrument(skip_all)]
    pub async fn apply<P: Provider>(
        &self,
        provider: &P,
        state: &mut StackState,
    ) -> Result<ApplyReport, EngineError> {
        let started_at = Utc::now();
        let plan = self.plan(state);

        let mut outstanding: BTreeMap<LogicalId, usize> = self
            .graph
            .creation_order()
            .iter()
            .map(|id| (id.clone(), self.graph.dependencies_of(id).count()))
            .collect();
        let mut ready: VecDeque<LogicalId> = self
            .graph
            .creation_order()
            .iter()
            .filter(|id| outstanding[*id] == 0)
            .cloned()
            .collect();
        let mut aborted: BTreeMap<LogicalId, LogicalId> = BTreeMap::new();
        let mut first_failure: Option<EngineError> = None;
        let mut retired: Vec<PhysicalResource> = Vec::new();
        let mut in_flight: FuturesUnordered<
            BoxFuture<'_, (LogicalId, PlanAction, anyhow::Result<Applied>)>,
        > = FuturesUnordered::new();

        let mut created = Vec::new();
        let mut replaced = Vec::new();
        let mut updated = Vec::new();
        let mut unchanged = Vec::new();

        loop {
            while let Some(id) = ready.pop_front() {
                if aborted.contains_key(&id) {
                    continue;
                }
                let action = plan.action_of(&id).unwrap_or(PlanAction::Noop);
                if action == PlanAction::Noop {
                    unchanged.push(id.clone());
                    release(&self.graph, &id, &mut outstanding, &aborted, &mut ready);
                    continue;
                }
                let Some(resource) = self.blueprint.get(&id) else {
                    continue;
                };
                match self.resolved_attrs(resource, state) {
                    Ok(attrs) => {
                        let current = state.get(&id).cloned();
                        in_flight.push(Box::pin(run_action(
                            provider,
                            resource.clone(),
                            action,
                            current,
                            attrs,
                        )));
                    }
                    Err(err) => {
                        abort_dependents(&self.graph, &id, &mut aborted);
                        if first_failure.is_none() {
                            first_failure = Some(err);
                        }
                    }
                }
            }

            let Some((id, action, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(applied) => {
                    state.insert(applied.physical);
                    if let Some(old) = applied.retired {
                        retired.push(old);
                    }
                    match action {
                        PlanAction::Create => created.push(id.clone()),
                        PlanAction::Replace => replaced.push(id.clone()),
                        PlanAction::Update => updated.push(id.clone()),
                        PlanAction::Noop => unchanged.push(id.clone()),
                    }
                    release(&self.graph, &id, &mut outstanding, &aborted, &mut ready);
                }
                Err(source) => {
                    warn!(%id, error = %source, "provider rejected resource");
                    abort_dependents(&self.graph, &id, &mut aborted);
                    if first_failure.is_none() {
                        first_failure = Some(EngineError::ProviderRejection {
                            id: id.clone(),
                            source,
                        });
                    }
                }
            }
        }

        if let Some(err) = first_failure {
            for (id, failed) in aborted {
                let reason = EngineError::Aborted { id, failed };
                warn!(%reason, "resource skipped");
            }
            return Err(err);
        }

        // Replaced predecessors are retired only after every successor is
        // live, so a deployment never disappears while a stage points at it.
        for old in retired {
            let logical = old.logical.clone();
            provider
                .destroy(&old)
                .await
                .map_err(|source| EngineError::ProviderRejection { id: logical, source })?;
        }

        let report = ApplyReport {
            created,
            replaced,
            updated,
            unchanged,
            outputs: self.outputs(state),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            created = report.created.len(),
            replaced = report.replaced.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            "apply complete"
        );
        Ok(report)
    }

    /// Destroys every recorded resource, dependents before dependencies.
    #[instrument(skip_all)]
    pub async fn destroy<P: Provider>(
        &self,
        provider: &P,
        state: &mut StackState,
    ) -> Result<(), EngineError> {
        for id in self.graph.destruction_order() {
            if let Some(physical) = state.get(&id).cloned() {
                provider
                    .destroy(&physical)
                    .await
                    .map_err(|source| EngineError::ProviderRejection {
                        id: id.clone(),
                        source,
                    })?;
                state.remove(&id);
            }
        }
        info!("stack destroyed");
        Ok(())
    }

    pub fn outputs(&self, state: &StackState) -> Outputs {
        let invoke_url = self.blueprint.resources().find_map(|resource| {
            match &resource.spec {
                ResourceSpec::Stage(_) => state
                    .get(&resource.id)
                    .and_then(|physical| physical.attribute("invoke_url"))
                    .map(str::to_owned),
                _ => None,
            }
        });
        Outputs { invoke_url }
    }

    /// Renders a resource's attribute values against the physical records of
    /// its dependencies, plus the engine-supplied identity attributes.
    fn resolved_attrs(
        &self,
        resource: &Resource,
        state: &StackState,
    ) -> Result<ResolvedAttrs, EngineError> {
        let unresolved = |missing: &LogicalId| EngineError::UnresolvedReference {
            id: resource.id.clone(),
            missing: missing.clone(),
        };

        let mut attrs = ResolvedAttrs::new();
        for (key, value) in resource.spec.values() {
            let rendered = match value {
                Value::Literal(text) => text.clone(),
                Value::Ref { resource: target, attr } => {
                    let physical = state.get(target).ok_or_else(|| unresolved(target))?;
                    let looked_up = match attr {
                        Attr::Name => physical.name.clone(),
                        Attr::Arn => physical.arn.clone(),
                        Attr::Id => Some(physical.physical_id.clone()),
                    };
                    looked_up.ok_or_else(|| unresolved(target))?
                }
            };
            attrs.insert(key, rendered);
        }

        match &resource.spec {
            ResourceSpec::Function(spec) => {
                attrs.insert("content_hash", spec.content_hash.clone());
            }
            ResourceSpec::Deployment(spec) => match chain_hash(spec, state) {
                Some(hash) => attrs.insert("trigger_hash", hash),
                None => {
                    let missing = spec
                        .chain
                        .iter()
                        .find(|member| state.get(member).is_none())
                        .unwrap_or(&resource.id);
                    return Err(unresolved(missing));
                }
            },
            ResourceSpec::Stage(spec) => {
                let deployment = state
                    .get(&spec.deployment)
                    .ok_or_else(|| unresolved(&spec.deployment))?;
                attrs.insert("deployment_id", deployment.physical_id.clone());
            }
            _ => {}
        }
        Ok(attrs)
    }
}

/// Hash over the chain members' physical identities, or `None` while any
/// member is still unprovisioned.
fn chain_hash(spec: &DeploymentSpec, state: &StackState) -> Option<String> {
    let ids: Vec<&str> = spec
        .chain
        .iter()
        .map(|member| state.get(member).map(|p| p.physical_id.as_str()))
        .collect::<Option<_>>()?;
    Some(trigger_hash(&ids))
}

fn release(
    graph: &DepGraph,
    id: &LogicalId,
    outstanding: &mut BTreeMap<LogicalId, usize>,
    aborted: &BTreeMap<LogicalId, LogicalId>,
    ready: &mut VecDeque<LogicalId>,
) {
    for dependent in graph.dependents_of(id) {
        if let Some(count) = outstanding.get_mut(dependent) {
            *count = count.saturating_sub(1);
            if *count == 0 && !aborted.contains_key(dependent) {
                ready.push_back(dependent.clone());
            }
        }
    }
}

fn abort_dependents(
    graph: &DepGraph,
    failed: &LogicalId,
    aborted: &mut BTreeMap<LogicalId, LogicalId>,
) {
    let dependents: BTreeSet<LogicalId> = graph.transitive_dependents(failed);
    for id in dependents {
        aborted.entry(id).or_insert_with(|| failed.clone());
    }
}

async fn run_action<P: Provider>(
    provider: &P,
    resource: Resource,
    action: PlanAction,
    current: Option<PhysicalResource>,
    attrs: ResolvedAttrs,
) -> (LogicalId, PlanAction, anyhow::Result<Applied>) {
    let id = resource.id.clone();
    let result = async {
        match action {
            PlanAction::Create => Ok(Applied {
                physical: provider.create(&resource, &attrs).await?,
                retired: None,
            }),
            PlanAction::Replace => match current {
                Some(old) if resource.lifecycle.create_before_destroy => {
                    let fresh = provider.create(&resource, &attrs).await?;
                    Ok(Applied {
                        physical: fresh,
                        retired: Some(old),
                    })
                }
                Some(old) => {
                    provider.destroy(&old).await?;
                    Ok(Applied {
                        physical: provider.create(&resource, &attrs).await?,
                        retired: None,
                    })
                }
                None => Ok(Applied {
                    physical: provider.create(&resource, &attrs).await?,
                    retired: None,
                }),
            },
            PlanAction::Update => {
                let Some(old) = current else {
                    bail!("resource '{}' has no live record to update", resource.id);
                };
                Ok(Applied {
                    physical: provider.update(&resource, &old, &attrs).await?,
                    retired: None,
                })
            }
            PlanAction::Noop => bail!("noop scheduled for resource '{}'", resource.id),
        }
    }
    .await;
    (id, action, result)
}
