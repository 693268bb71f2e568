//! Permission-binding validation.
//!
//! For every cross-service action the paired grant must exist before
//! anything is created: bucket→function invocations need an invocation
//! grant, and the gateway integration needs a role with an attached
//! permission policy. Violations fail fast; a dependent pair is never
//! partially created.

use plinth_stack::{Blueprint, LogicalId, NotificationSpec, ResourceSpec};

use crate::EngineError;

/// Checks both binding rules across the whole blueprint.
pub fn check_bindings(blueprint: &Blueprint) -> Result<(), EngineError> {
    for resource in blueprint.resources() {
        match &resource.spec {
            ResourceSpec::Notification(spec) => {
                check_invocation_grant(blueprint, &resource.id, spec)?;
            }
            ResourceSpec::Integration(spec) => {
                let role = spec.credentials.reference().ok_or_else(|| {
                    EngineError::InvalidCredentials {
                        integration: resource.id.clone(),
                    }
                })?;
                check_role_policy(blueprint, &resource.id, role)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Rule 1: a notification from bucket S to function F is valid only with
/// exactly one grant (principal = storage service, source = S, function = F).
fn check_invocation_grant(
    blueprint: &Blueprint,
    notification: &LogicalId,
    spec: &NotificationSpec,
) -> Result<(), EngineError> {
    let function = spec.function_arn.reference();
    let matching = blueprint
        .resources()
        .filter_map(|resource| match &resource.spec {
            ResourceSpec::InvocationGrant(grant) => Some(grant),
            _ => None,
        })
        .filter(|grant| {
            grant.principal == plinth_stack::STORAGE_SERVICE
                && grant.source_arn.reference() == Some(&spec.bucket)
                && Some(&grant.function) == function
        })
        .count();

    match matching {
        1 => Ok(()),
        0 => Err(EngineError::PermissionBindingMissing {
            notification: notification.clone(),
            bucket: spec.bucket.clone(),
        }),
        count => Err(EngineError::AmbiguousGrant {
            notification: notification.clone(),
            count,
        }),
    }
}

/// Rule 2: integration credentials must name a role owning exactly one
/// attached, non-empty permission policy. Documents stay opaque; presence
/// is the verifiable contract.
fn check_role_policy(
    blueprint: &Blueprint,
    integration: &LogicalId,
    role: &LogicalId,
) -> Result<(), EngineError> {
    let attached = blueprint
        .resources()
        .filter(|resource| match &resource.spec {
            ResourceSpec::RolePolicy(policy) => &policy.role == role,
            _ => false,
        })
        .count();

    if attached == 1 {
        Ok(())
    } else {
        Err(EngineError::RolePolicyMissing {
            integration: integration.clone(),
            role: role.clone(),
        })
    }
}
