//! Resource descriptor model for the plinth ingest stack.
//!
//! This crate describes WHAT gets provisioned: a private object bucket, a
//! pay-per-request key-value table, a packaged function triggered by object
//! uploads, and a public gateway chain proxying reads into a table scan,
//! with the identity and policy wiring between them. Descriptors are plain
//! data; ordering, validation and application live in `plinth-engine`.
//!
//! Relationships between resources are read-only references to identifiers
//! or ARNs ([`Value::Ref`]); no descriptor is ever mutated by another.

mod artifact;
mod identity;
mod params;
mod policy;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use artifact::Artifact;
pub use identity::CallerIdentity;
pub use params::{
    Credentials, Parameters, ResolveError, ResolvedContext, DEFAULT_HANDLER_FILE,
    DEFAULT_HANDLER_NAME, DEFAULT_RUNTIME,
};
pub use policy::{DocumentError, PolicyDocument, StackDocuments};

/// Upper bound on function timeouts accepted by the provider.
pub const MAX_FUNCTION_TIMEOUT_SECONDS: u32 = 900;

/// Timeout applied to the ingest function.
pub const FUNCTION_TIMEOUT_SECONDS: u32 = 300;

/// Suffix filter on the storage→compute trigger.
pub const TRIGGER_SUFFIX: &str = ".json";

/// Path part served by the gateway resource.
pub const GET_DATA_PATH: &str = "get-data";

/// Environment key carrying the table name into the function.
pub const DB_NAME_ENV: &str = "DB_NAME";

pub const LAMBDA_SERVICE: &str = "lambda.amazonaws.com";
pub const GATEWAY_SERVICE: &str = "apigateway.amazonaws.com";
pub const STORAGE_SERVICE: &str = "s3.amazonaws.com";
pub const INVOKE_ACTION: &str = "lambda:InvokeFunction";

/// Well-known logical identifiers for the ingest stack members.
pub mod ids {
    pub const BUCKET: &str = "storage.bucket";
    pub const TABLE: &str = "ingest.table";
    pub const COMPUTE_ROLE: &str = "iam.compute_role";
    pub const COMPUTE_POLICY: &str = "iam.compute_policy";
    pub const GATEWAY_ROLE: &str = "iam.gateway_role";
    pub const GATEWAY_POLICY: &str = "iam.gateway_policy";
    pub const FUNCTION: &str = "ingest.function";
    pub const NOTIFICATION: &str = "events.notification";
    pub const INVOKE_GRANT: &str = "events.invoke_grant";
    pub const REST_API: &str = "api.rest";
    pub const API_RESOURCE: &str = "api.resource";
    pub const METHOD: &str = "api.method";
    pub const INTEGRATION: &str = "api.integration";
    pub const METHOD_RESPONSE: &str = "api.method_response";
    pub const INTEGRATION_RESPONSE: &str = "api.integration_response";
    pub const DEPLOYMENT: &str = "api.deployment";
    pub const STAGE: &str = "api.stage";
}

/// Errors raised while assembling or checking a blueprint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("resource '{0}' is declared twice")]
    DuplicateResource(LogicalId),
    #[error("resource '{from}' references unknown resource '{to}'")]
    UnknownReference { from: LogicalId, to: LogicalId },
    #[error(
        "function '{id}' timeout {timeout_seconds}s exceeds the {MAX_FUNCTION_TIMEOUT_SECONDS}s limit"
    )]
    FunctionTimeoutTooLarge { id: LogicalId, timeout_seconds: u32 },
    #[error("table '{0}' declares an empty partition key")]
    EmptyPartitionKey(LogicalId),
}

/// Stable logical name of one declared resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Attribute of a resource another descriptor may look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attr {
    Name,
    Arn,
    Id,
}

/// A descriptor attribute value: either a literal or a read-only lookup of
/// another resource's attribute, resolved once that resource exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Literal(String),
    Ref { resource: LogicalId, attr: Attr },
}

impl Value {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn name_of(resource: impl Into<LogicalId>) -> Self {
        Self::Ref {
            resource: resource.into(),
            attr: Attr::Name,
        }
    }

    pub fn arn_of(resource: impl Into<LogicalId>) -> Self {
        Self::Ref {
            resource: resource.into(),
            attr: Attr::Arn,
        }
    }

    pub fn id_of(resource: impl Into<LogicalId>) -> Self {
        Self::Ref {
            resource: resource.into(),
            attr: Attr::Id,
        }
    }

    /// The resource this value depends on, if any.
    pub fn reference(&self) -> Option<&LogicalId> {
        match self {
            Self::Literal(_) => None,
            Self::Ref { resource, .. } => Some(resource),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketAcl {
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingMode {
    #[serde(rename = "PAY_PER_REQUEST")]
    PayPerRequest,
}

/// Scalar type of a key attribute; only `S` keys are used by this stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAttributeType {
    S,
    N,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "s3:ObjectCreated:Put")]
    ObjectCreatedPut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationType {
    #[serde(rename = "NONE")]
    None,
}

/// Trust document granting service principals the right to assume a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPolicy {
    pub services: Vec<String>,
}

impl TrustPolicy {
    pub fn for_service(service: &str) -> Self {
        Self {
            services: vec![service.to_owned()],
        }
    }

    /// Renders the assume-role document in provider JSON form.
    pub fn render(&self) -> String {
        let statements: Vec<_> = self
            .services
            .iter()
            .map(|service| {
                serde_json::json!({
                    "Effect": "Allow",
                    "Principal": { "Service": service },
                    "Action": "sts:AssumeRole",
                })
            })
            .collect();
        serde_json::json!({ "Version": "2012-10-17", "Statement": statements }).to_string()
    }
}

/// Private, force-destroyable object bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    pub acl: BucketAcl,
    pub force_destroy: bool,
}

/// Pay-per-request key-value table with a single string partition key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub partition_key: String,
    pub key_type: KeyAttributeType,
    pub billing_mode: BillingMode,
}

/// Role bound to a trust document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub trust: TrustPolicy,
}

/// Permission policy owned by exactly one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicySpec {
    pub role: LogicalId,
    pub document: PolicyDocument,
}

/// Packaged compute function bound to a role and a table-name environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub role: LogicalId,
    pub handler: String,
    pub runtime: String,
    pub timeout_seconds: u32,
    pub content_hash: String,
    pub environment: BTreeMap<String, Value>,
}

/// Notification rule connecting a bucket to a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSpec {
    pub bucket: LogicalId,
    pub function_arn: Value,
    pub event: EventType,
    pub suffix: String,
}

/// Invocation permission paired with a notification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationGrantSpec {
    pub function: LogicalId,
    pub principal: String,
    pub source_arn: Value,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestApiSpec {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResourceSpec {
    pub rest_api: LogicalId,
    pub path_part: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub rest_api: LogicalId,
    pub resource: LogicalId,
    pub http_method: String,
    pub authorization: AuthorizationType,
}

/// Integration proxying the method into a table scan via a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationSpec {
    pub rest_api: LogicalId,
    pub resource: LogicalId,
    pub method: LogicalId,
    pub integration_http_method: String,
    pub table_name: Value,
    pub credentials: Value,
    pub request_template: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodResponseSpec {
    pub rest_api: LogicalId,
    pub resource: LogicalId,
    pub method: LogicalId,
    pub status_code: u16,
}

/// Created strictly after its integration; the reference enforces the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationResponseSpec {
    pub rest_api: LogicalId,
    pub resource: LogicalId,
    pub method: LogicalId,
    pub integration: LogicalId,
    pub status_code: u16,
}

/// Deployment whose identity is a hash over the chain members it snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub rest_api: LogicalId,
    /// Chain members, in hash order.
    pub chain: Vec<LogicalId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub rest_api: LogicalId,
    pub deployment: LogicalId,
    pub stage_name: String,
}

/// One declared resource variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Bucket(BucketSpec),
    Table(TableSpec),
    Role(RoleSpec),
    RolePolicy(RolePolicySpec),
    Function(FunctionSpec),
    Notification(NotificationSpec),
    InvocationGrant(InvocationGrantSpec),
    RestApi(RestApiSpec),
    ApiResource(ApiResourceSpec),
    Method(MethodSpec),
    Integration(IntegrationSpec),
    MethodResponse(MethodResponseSpec),
    IntegrationResponse(IntegrationResponseSpec),
    Deployment(DeploymentSpec),
    Stage(StageSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bucket(_) => "bucket",
            Self::Table(_) => "table",
            Self::Role(_) => "role",
            Self::RolePolicy(_) => "role_policy",
            Self::Function(_) => "function",
            Self::Notification(_) => "notification",
            Self::InvocationGrant(_) => "invocation_grant",
            Self::RestApi(_) => "rest_api",
            Self::ApiResource(_) => "api_resource",
            Self::Method(_) => "method",
            Self::Integration(_) => "integration",
            Self::MethodResponse(_) => "method_response",
            Self::IntegrationResponse(_) => "integration_response",
            Self::Deployment(_) => "deployment",
            Self::Stage(_) => "stage",
        }
    }

    /// Attribute-carrying values, keyed for resolution at apply time.
    pub fn values(&self) -> Vec<(String, &Value)> {
        match self {
            Self::Function(spec) => spec
                .environment
                .iter()
                .map(|(key, value)| (format!("env.{key}"), value))
                .collect(),
            Self::Notification(spec) => vec![("function_arn".to_owned(), &spec.function_arn)],
            Self::InvocationGrant(spec) => vec![("source_arn".to_owned(), &spec.source_arn)],
            Self::Integration(spec) => vec![
                ("table_name".to_owned(), &spec.table_name),
                ("credentials".to_owned(), &spec.credentials),
            ],
            _ => Vec::new(),
        }
    }

    /// Every resource this spec references, structurally or through values.
    /// These references are the single source of truth for ordering edges.
    pub fn references(&self) -> Vec<LogicalId> {
        let mut refs: Vec<LogicalId> = match self {
            Self::Bucket(_) | Self::Table(_) | Self::Role(_) | Self::RestApi(_) => Vec::new(),
            Self::RolePolicy(spec) => vec![spec.role.clone()],
            Self::Function(spec) => vec![spec.role.clone()],
            Self::Notification(spec) => vec![spec.bucket.clone()],
            Self::InvocationGrant(spec) => vec![spec.function.clone()],
            Self::ApiResource(spec) => vec![spec.rest_api.clone()],
            Self::Method(spec) => vec![spec.rest_api.clone(), spec.resource.clone()],
            Self::Integration(spec) => vec![
                spec.rest_api.clone(),
                spec.resource.clone(),
                spec.method.clone(),
            ],
            Self::MethodResponse(spec) => vec![
                spec.rest_api.clone(),
                spec.resource.clone(),
                spec.method.clone(),
            ],
            Self::IntegrationResponse(spec) => vec![
                spec.rest_api.clone(),
                spec.resource.clone(),
                spec.method.clone(),
                spec.integration.clone(),
            ],
            Self::Deployment(spec) => {
                let mut refs = vec![spec.rest_api.clone()];
                refs.extend(spec.chain.iter().cloned());
                refs
            }
            Self::Stage(spec) => vec![spec.rest_api.clone(), spec.deployment.clone()],
        };

        for (_, value) in self.values() {
            if let Some(target) = value.reference() {
                refs.push(target.clone());
            }
        }
        refs.sort();
        refs.dedup();
        refs
    }
}

/// Replacement policy for one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// The replacement must exist before the predecessor is destroyed.
    pub create_before_destroy: bool,
}

/// A declared resource: logical name, desired attributes, lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: LogicalId,
    pub spec: ResourceSpec,
    pub lifecycle: Lifecycle,
}

impl Resource {
    pub fn new(id: impl Into<LogicalId>, spec: ResourceSpec) -> Self {
        Self {
            id: id.into(),
            spec,
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn create_before_destroy(mut self) -> Self {
        self.lifecycle.create_before_destroy = true;
        self
    }
}

/// The declaration graph: every resource, owned exactly once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    resources: BTreeMap<LogicalId, Resource>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource; each logical id may only be declared once.
    pub fn insert(&mut self, resource: Resource) -> Result<(), StackError> {
        if self.resources.contains_key(&resource.id) {
            return Err(StackError::DuplicateResource(resource.id));
        }
        self.resources.insert(resource.id.clone(), resource);
        Ok(())
    }

    pub fn get(&self, id: &LogicalId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Structural checks: every reference points at a declared resource,
    /// function timeouts stay within the provider limit, and tables carry a
    /// usable partition key.
    pub fn validate(&self) -> Result<(), StackError> {
        for resource in self.resources.values() {
            for target in resource.spec.references() {
                if !self.resources.contains_key(&target) {
                    return Err(StackError::UnknownReference {
                        from: resource.id.clone(),
                        to: target,
                    });
                }
            }

            match &resource.spec {
                ResourceSpec::Function(spec) => {
                    if spec.timeout_seconds > MAX_FUNCTION_TIMEOUT_SECONDS {
                        return Err(StackError::FunctionTimeoutTooLarge {
                            id: resource.id.clone(),
                            timeout_seconds: spec.timeout_seconds,
                        });
                    }
                }
                ResourceSpec::Table(spec) => {
                    if spec.partition_key.is_empty() {
                        return Err(StackError::EmptyPartitionKey(resource.id.clone()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Composer for the fixed ingest-stack declaration graph.
pub struct IngestStack;

impl IngestStack {
    /// Wires the full graph: bucket and table leaves, the two roles and
    /// their policies, the triggered function, the notification/grant pair,
    /// and the gateway chain ending in a create-before-destroy deployment.
    pub fn compose(
        ctx: &ResolvedContext,
        documents: &StackDocuments,
        artifact: &Artifact,
    ) -> Result<Blueprint, StackError> {
        let mut blueprint = Blueprint::new();

        blueprint.insert(Resource::new(
            ids::BUCKET,
            ResourceSpec::Bucket(BucketSpec {
                name: ctx.bucket_name.clone(),
                acl: BucketAcl::Private,
                force_destroy: true,
            }),
        ))?;

        blueprint.insert(Resource::new(
            ids::TABLE,
            ResourceSpec::Table(TableSpec {
                name: ctx.table_name.clone(),
                partition_key: ctx.table_key.clone(),
                key_type: KeyAttributeType::S,
                billing_mode: BillingMode::PayPerRequest,
            }),
        ))?;

        blueprint.insert(Resource::new(
            ids::COMPUTE_ROLE,
            ResourceSpec::Role(RoleSpec {
                name: format!("{}-compute", ctx.api_name),
                trust: TrustPolicy::for_service(LAMBDA_SERVICE),
            }),
        ))?;
        blueprint.insert(Resource::new(
            ids::COMPUTE_POLICY,
            ResourceSpec::RolePolicy(RolePolicySpec {
                role: ids::COMPUTE_ROLE.into(),
                document: documents.compute_policy.clone(),
            }),
        ))?;

        blueprint.insert(Resource::new(
            ids::GATEWAY_ROLE,
            ResourceSpec::Role(RoleSpec {
                name: format!("{}-gateway", ctx.api_name),
                trust: TrustPolicy::for_service(GATEWAY_SERVICE),
            }),
        ))?;
        blueprint.insert(Resource::new(
            ids::GATEWAY_POLICY,
            ResourceSpec::RolePolicy(RolePolicySpec {
                role: ids::GATEWAY_ROLE.into(),
                document: documents.gateway_policy.clone(),
            }),
        ))?;

        let mut environment = BTreeMap::new();
        environment.insert(DB_NAME_ENV.to_owned(), Value::name_of(ids::TABLE));
        blueprint.insert(Resource::new(
            ids::FUNCTION,
            ResourceSpec::Function(FunctionSpec {
                name: format!("{}-ingest", ctx.api_name),
                role: ids::COMPUTE_ROLE.into(),
                handler: ctx.handler(),
                runtime: ctx.runtime.clone(),
                timeout_seconds: FUNCTION_TIMEOUT_SECONDS,
                content_hash: artifact.content_hash.clone(),
                environment,
            }),
        ))?;

        blueprint.insert(Resource::new(
            ids::NOTIFICATION,
            ResourceSpec::Notification(NotificationSpec {
                bucket: ids::BUCKET.into(),
                function_arn: Value::arn_of(ids::FUNCTION),
                event: EventType::ObjectCreatedPut,
                suffix: TRIGGER_SUFFIX.to_owned(),
            }),
        ))?;
        blueprint.insert(Resource::new(
            ids::INVOKE_GRANT,
            ResourceSpec::InvocationGrant(InvocationGrantSpec {
                function: ids::FUNCTION.into(),
                principal: STORAGE_SERVICE.to_owned(),
                source_arn: Value::arn_of(ids::BUCKET),
                action: INVOKE_ACTION.to_owned(),
            }),
        ))?;

        blueprint.insert(Resource::new(
            ids::REST_API,
            ResourceSpec::RestApi(RestApiSpec {
                name: ctx.api_name.clone(),
            }),
        ))?;
        blueprint.insert(Resource::new(
            ids::API_RESOURCE,
            ResourceSpec::ApiResource(ApiResourceSpec {
                rest_api: ids::REST_API.into(),
                path_part: GET_DATA_PATH.to_owned(),
            }),
        ))?;
        blueprint.insert(Resource::new(
            ids::METHOD,
            ResourceSpec::Method(MethodSpec {
                rest_api: ids::REST_API.into(),
                resource: ids::API_RESOURCE.into(),
                http_method: "GET".to_owned(),
                authorization: AuthorizationType::None,
            }),
        ))?;
        blueprint.insert(Resource::new(
            ids::INTEGRATION,
            ResourceSpec::Integration(IntegrationSpec {
                rest_api: ids::REST_API.into(),
                resource: ids::API_RESOURCE.into(),
                method: ids::METHOD.into(),
                integration_http_method: "POST".to_owned(),
                table_name: Value::name_of(ids::TABLE),
                credentials: Value::arn_of(ids::GATEWAY_ROLE),
                request_template: documents.request_template.clone(),
            }),
        ))?;
        blueprint.insert(Resource::new(
            ids::METHOD_RESPONSE,
            ResourceSpec::MethodResponse(MethodResponseSpec {
                rest_api: ids::REST_API.into(),
                resource: ids::API_RESOURCE.into(),
                method: ids::METHOD.into(),
                status_code: 200,
            }),
        ))?;
        blueprint.insert(Resource::new(
            ids::INTEGRATION_RESPONSE,
            ResourceSpec::IntegrationResponse(IntegrationResponseSpec {
                rest_api: ids::REST_API.into(),
                resource: ids::API_RESOURCE.into(),
                method: ids::METHOD.into(),
                integration: ids::INTEGRATION.into(),
                status_code: 200,
            }),
        ))?;

        blueprint.insert(
            Resource::new(
                ids::DEPLOYMENT,
                ResourceSpec::Deployment(DeploymentSpec {
                    rest_api: ids::REST_API.into(),
                    chain: vec![
                        ids::API_RESOURCE.into(),
                        ids::METHOD.into(),
                        ids::INTEGRATION.into(),
                        ids::METHOD_RESPONSE.into(),
                        ids::INTEGRATION_RESPONSE.into(),
                    ],
                }),
            )
            .create_before_destroy(),
        )?;
        blueprint.insert(Resource::new(
            ids::STAGE,
            ResourceSpec::Stage(StageSpec {
                rest_api: ids::REST_API.into(),
                deployment: ids::DEPLOYMENT.into(),
                stage_name: ctx.api_stage.clone(),
            }),
        ))?;

        blueprint.validate()?;
        Ok(blueprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn demo_context() -> ResolvedContext {
        Parameters {
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
        .unwrap()
    }

    pub(crate) fn demo_documents() -> StackDocuments {
        let doc = |name: &str| {
            PolicyDocument::from_bytes(name, format!("{{\"doc\":\"{name}\"}}").into_bytes())
                .unwrap()
        };
        StackDocuments {
            compute_policy: doc("compute"),
            gateway_policy: doc("gateway"),
            request_template: doc("template"),
        }
    }

    fn demo_artifact() -> Artifact {
        Artifact {
            source_dir: "lambda".into(),
            content_hash: "abc123".into(),
        }
    }

    fn compose() -> Blueprint {
        IngestStack::compose(&demo_context(), &demo_documents(), &demo_artifact()).unwrap()
    }

    #[test]
    fn compose_declares_the_full_graph() {
        let blueprint = compose();
        assert_eq!(blueprint.len(), 17);
        blueprint.validate().unwrap();
    }

    #[test]
    fn function_environment_references_the_table_name() {
        let blueprint = compose();
        let function = blueprint.get(&ids::FUNCTION.into()).unwrap();
        match &function.spec {
            ResourceSpec::Function(spec) => {
                assert_eq!(
                    spec.environment.get(DB_NAME_ENV),
                    Some(&Value::name_of(ids::TABLE))
                );
                assert_eq!(spec.handler, "lambda_function.lambda_handler");
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn notification_filters_on_json_suffix() {
        let blueprint = compose();
        match &blueprint.get(&ids::NOTIFICATION.into()).unwrap().spec {
            ResourceSpec::Notification(spec) => {
                assert_eq!(spec.suffix, TRIGGER_SUFFIX);
                assert_eq!(spec.event, EventType::ObjectCreatedPut);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn deployment_is_create_before_destroy_and_snapshots_the_chain() {
        let blueprint = compose();
        let deployment = blueprint.get(&ids::DEPLOYMENT.into()).unwrap();
        assert!(deployment.lifecycle.create_before_destroy);
        for resource in blueprint.resources() {
            if resource.id != deployment.id {
                assert!(!resource.lifecycle.create_before_destroy, "{}", resource.id);
            }
        }
        match &deployment.spec {
            ResourceSpec::Deployment(spec) => assert_eq!(spec.chain.len(), 5),
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn integration_response_references_its_integration() {
        let blueprint = compose();
        let response = blueprint.get(&ids::INTEGRATION_RESPONSE.into()).unwrap();
        assert!(response
            .spec
            .references()
            .contains(&ids::INTEGRATION.into()));
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let mut blueprint = compose();
        let err = blueprint
            .insert(Resource::new(
                ids::BUCKET,
                ResourceSpec::Bucket(BucketSpec {
                    name: "other".into(),
                    acl: BucketAcl::Private,
                    force_destroy: true,
                }),
            ))
            .unwrap_err();
        assert_eq!(err, StackError::DuplicateResource(ids::BUCKET.into()));
    }

    #[test]
    fn dangling_reference_fails_validation() {
        let mut blueprint = Blueprint::new();
        blueprint
            .insert(Resource::new(
                "iam.policy",
                ResourceSpec::RolePolicy(RolePolicySpec {
                    role: "iam.ghost".into(),
                    document: demo_documents().compute_policy,
                }),
            ))
            .unwrap();
        let err = blueprint.validate().unwrap_err();
        assert_eq!(
            err,
            StackError::UnknownReference {
                from: "iam.policy".into(),
                to: "iam.ghost".into(),
            }
        );
    }

    #[test]
    fn oversized_function_timeout_fails_validation() {
        let mut blueprint = Blueprint::new();
        blueprint
            .insert(Resource::new(
                "iam.role",
                ResourceSpec::Role(RoleSpec {
                    name: "role".into(),
                    trust: TrustPolicy::for_service(LAMBDA_SERVICE),
                }),
            ))
            .unwrap();
        blueprint
            .insert(Resource::new(
                "ingest.function",
                ResourceSpec::Function(FunctionSpec {
                    name: "fn".into(),
                    role: "iam.role".into(),
                    handler: "f.h".into(),
                    runtime: DEFAULT_RUNTIME.into(),
                    timeout_seconds: MAX_FUNCTION_TIMEOUT_SECONDS + 1,
                    content_hash: "hash".into(),
                    environment: BTreeMap::new(),
                }),
            ))
            .unwrap();
        assert!(matches!(
            blueprint.validate().unwrap_err(),
            StackError::FunctionTimeoutTooLarge { .. }
        ));
    }

    #[test]
    fn trust_policy_renders_assume_role_document() {
        let rendered = TrustPolicy::for_service(LAMBDA_SERVICE).render();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["Statement"][0]["Action"], "sts:AssumeRole");
        assert_eq!(
            parsed["Statement"][0]["Principal"]["Service"],
            LAMBDA_SERVICE
        );
    }
}
