//! Provisioning engine for plinth declaration graphs.
//!
//! Responsibilities, in pipeline order: derive a typed dependency graph
//! from a [`plinth_stack::Blueprint`], verify the cross-service permission
//! pairings, compute a deterministic creation/destruction order, and apply
//! the graph through a [`Provider`] with create-before-destroy handling for
//! hash-triggered gateway redeployments. An in-memory provider models the
//! upstream trigger and downstream HTTP contracts for rehearsal runs and
//! tests.

mod apply;
mod graph;
mod provider;
mod redeploy;
mod validate;

use plinth_stack::{LogicalId, StackError};
use thiserror::Error;

pub use apply::{ApplyReport, Engine, Outputs, Plan, PlanAction, PlanStep, StackState};
pub use graph::DepGraph;
pub use provider::{
    CloudEvent, InMemoryProvider, Invocation, PhysicalResource, Provider, ResolvedAttrs,
};
pub use redeploy::trigger_hash;

/// Errors surfaced by graph construction, validation and application. Every
/// variant names the offending resource.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dependency cycle detected involving resource '{0}'")]
    DependencyCycle(LogicalId),
    #[error("notification '{notification}' has no matching invocation grant for bucket '{bucket}'")]
    PermissionBindingMissing {
        notification: LogicalId,
        bucket: LogicalId,
    },
    #[error("notification '{notification}' is matched by {count} invocation grants; exactly one is required")]
    AmbiguousGrant {
        notification: LogicalId,
        count: usize,
    },
    #[error("integration '{integration}' uses role '{role}' without an attached permission policy")]
    RolePolicyMissing {
        integration: LogicalId,
        role: LogicalId,
    },
    #[error("integration '{integration}' credentials must reference a role")]
    InvalidCredentials { integration: LogicalId },
    #[error("provider rejected resource '{id}': {source}")]
    ProviderRejection {
        id: LogicalId,
        #[source]
        source: anyhow::Error,
    },
    #[error("resource '{id}' aborted: dependency '{failed}' failed")]
    Aborted { id: LogicalId, failed: LogicalId },
    #[error("stage '{stage}' points at a deployment with a stale trigger hash")]
    RedeploymentHashStale { stage: LogicalId },
    #[error("cannot resolve attribute for '{id}': dependency '{missing}' has no physical record")]
    UnresolvedReference { id: LogicalId, missing: LogicalId },
    #[error(transparent)]
    Stack(#[from] StackError),
}
