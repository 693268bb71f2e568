//! Provider seam and the in-memory provider.
//!
//! The engine applies resources through the [`Provider`] trait; rejections
//! surface verbatim and are never retried. [`InMemoryProvider`] is the
//! rehearsal implementation: it assigns physical identifiers, renders
//! AWS-shaped names/ARNs, and models the two runtime contracts the stack
//! promises — object uploads invoking the bound function through the
//! notification/grant pair, and gateway GETs scanning the table.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use plinth_stack::{LogicalId, Resource, ResourceSpec, STORAGE_SERVICE};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Attribute values resolved against already-created dependencies, keyed by
/// the names from [`ResourceSpec::values`] plus engine-supplied extras
/// (`content_hash`, `trigger_hash`, `deployment_id`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAttrs(BTreeMap<String, String>);

impl ResolvedAttrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Provider-side record of one created resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalResource {
    pub logical: LogicalId,
    pub physical_id: String,
    pub name: Option<String>,
    pub arn: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl PhysicalResource {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Seam towards the provisioning backend.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    async fn create(&self, resource: &Resource, attrs: &ResolvedAttrs)
        -> Result<PhysicalResource>;
    async fn update(
        &self,
        resource: &Resource,
        current: &PhysicalResource,
        attrs: &ResolvedAttrs,
    ) -> Result<PhysicalResource>;
    async fn destroy(&self, physical: &PhysicalResource) -> Result<()>;
}

/// One function invocation triggered through the notification binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub function: String,
    pub key: String,
    pub environment: BTreeMap<String, String>,
}

/// Provider-side audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloudEvent {
    Created {
        logical: LogicalId,
        physical_id: String,
    },
    Updated {
        logical: LogicalId,
        physical_id: String,
    },
    Destroyed {
        logical: LogicalId,
        physical_id: String,
    },
}

#[derive(Debug, Clone)]
struct StoredResource {
    resource: Resource,
    attrs: ResolvedAttrs,
    physical: PhysicalResource,
}

#[derive(Debug, Default)]
struct CloudState {
    records: BTreeMap<LogicalId, StoredResource>,
    tables: BTreeMap<String, Vec<serde_json::Value>>,
    invocations: Vec<Invocation>,
    events: Vec<CloudEvent>,
    fail_on: BTreeSet<LogicalId>,
}

/// In-memory provider used for rehearsal applies and tests.
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    region: String,
    account_id: String,
    inner: Arc<RwLock<CloudState>>,
}

impl InMemoryProvider {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            inner: Arc::new(RwLock::new(CloudState::default())),
        }
    }

    /// Makes the next operation on the given resource fail.
    pub fn fail_on(&self, id: impl Into<LogicalId>) {
        self.inner.write().fail_on.insert(id.into());
    }

    pub fn clear_failures(&self) {
        self.inner.write().fail_on.clear();
    }

    /// Latest physical record for a logical resource, if it exists.
    pub fn physical(&self, id: &LogicalId) -> Option<PhysicalResource> {
        self.inner
            .read()
            .records
            .get(id)
            .map(|stored| stored.physical.clone())
    }

    pub fn exists(&self, id: &LogicalId) -> bool {
        self.inner.read().records.contains_key(id)
    }

    pub fn events(&self) -> Vec<CloudEvent> {
        self.inner.read().events.clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.inner.read().invocations.clone()
    }

    /// Stores an item directly in a table, bypassing the trigger path.
    pub fn seed_item(&self, table: &str, item: serde_json::Value) {
        self.inner
            .write()
            .tables
            .entry(table.to_owned())
            .or_default()
            .push(item);
    }

    /// Models the upstream trigger contract: an object created in a bucket
    /// invokes the bound function iff the key matches the notification
    /// suffix and the paired invocation grant exists. Returns the
    /// invocations this upload produced.
    pub fn put_object(&self, bucket_name: &str, key: &str) -> Vec<Invocation> {
        let mut guard = self.inner.write();
        let state = &mut *guard;

        let mut produced = Vec::new();
        for stored in state.records.values() {
            let ResourceSpec::Notification(notification) = &stored.resource.spec else {
                continue;
            };
            let Some(bucket) = state.records.get(&notification.bucket) else {
                continue;
            };
            if bucket.physical.name.as_deref() != Some(bucket_name) {
                continue;
            }
            if !key.ends_with(&notification.suffix) {
                continue;
            }
            let Some(function_id) = notification.function_arn.reference() else {
                continue;
            };

            let granted = state.records.values().any(|candidate| {
                matches!(&candidate.resource.spec, ResourceSpec::InvocationGrant(grant)
                    if grant.principal == STORAGE_SERVICE
                        && grant.function == *function_id
                        && grant.source_arn.reference() == Some(&notification.bucket))
            });
            if !granted {
                warn!(bucket = bucket_name, %function_id, "invocation denied: no grant");
                continue;
            }

            let Some(function) = state.records.get(function_id) else {
                continue;
            };
            let environment = function
                .attrs
                .iter()
                .filter_map(|(attr, value)| {
                    attr.strip_prefix("env.")
                        .map(|name| (name.to_owned(), value.to_owned()))
                })
                .collect();
            produced.push(Invocation {
                function: function
                    .physical
                    .name
                    .clone()
                    .unwrap_or_else(|| function.physical.physical_id.clone()),
                key: key.to_owned(),
                environment,
            });
        }

        state.invocations.extend(produced.iter().cloned());
        produced
    }

    /// Models the downstream HTTP contract: `GET /{stage}/{path}` proxies
    /// into a full table scan, returning every stored item untransformed.
    pub fn http_get(&self, path: &str) -> Result<serde_json::Value> {
        let guard = self.inner.read();
        let trimmed = path.trim_start_matches('/');
        let Some((stage_name, resource_path)) = trimmed.split_once('/') else {
            bail!("no route for GET {path}");
        };

        for stored in guard.records.values() {
            let ResourceSpec::Stage(stage) = &stored.resource.spec else {
                continue;
            };
            if stage.stage_name != stage_name {
                continue;
            }
            let path_matches = guard.records.values().any(|candidate| {
                matches!(&candidate.resource.spec, ResourceSpec::ApiResource(spec)
                    if spec.rest_api == stage.rest_api && spec.path_part == resource_path)
            });
            if !path_matches {
                continue;
            }

            let integration = guard.records.values().find(|candidate| {
                matches!(&candidate.resource.spec, ResourceSpec::Integration(spec)
                    if spec.rest_api == stage.rest_api)
            });
            let Some(integration) = integration else {
                bail!("stage '{stage_name}' has no integration");
            };
            let Some(table) = integration.attrs.get("table_name") else {
                bail!("integration is missing its table binding");
            };
            let items = guard.tables.get(table).cloned().unwrap_or_default();
            return Ok(serde_json::Value::Array(items));
        }

        bail!("no route for GET {path}");
    }

    fn render_physical(
        &self,
        state: &CloudState,
        resource: &Resource,
        attrs: &ResolvedAttrs,
        physical_id: String,
    ) -> PhysicalResource {
        let region = &self.region;
        let account = &self.account_id;
        let mut attributes: BTreeMap<String, String> = attrs
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();

        let (name, arn) = match &resource.spec {
            ResourceSpec::Bucket(spec) => (
                Some(spec.name.clone()),
                Some(format!("arn:aws:s3:::{}", spec.name)),
            ),
            ResourceSpec::Table(spec) => (
                Some(spec.name.clone()),
                Some(format!(
                    "arn:aws:dynamodb:{region}:{account}:table/{}",
                    spec.name
                )),
            ),
            ResourceSpec::Role(spec) => (
                Some(spec.name.clone()),
                Some(format!("arn:aws:iam::{account}:role/{}", spec.name)),
            ),
            ResourceSpec::Function(spec) => (
                Some(spec.name.clone()),
                Some(format!(
                    "arn:aws:lambda:{region}:{account}:function:{}",
                    spec.name
                )),
            ),
            ResourceSpec::RestApi(spec) => (
                Some(spec.name.clone()),
                Some(format!(
                    "arn:aws:execute-api:{region}:{account}:{physical_id}"
                )),
            ),
            ResourceSpec::ApiResource(spec) => {
                attributes.insert("path_part".to_owned(), spec.path_part.clone());
                (None, None)
            }
            ResourceSpec::Stage(spec) => {
                if let Some(url) = self.invoke_url(state, spec) {
                    attributes.insert("invoke_url".to_owned(), url);
                }
                (Some(spec.stage_name.clone()), None)
            }
            _ => (None, None),
        };

        PhysicalResource {
            logical: resource.id.clone(),
            physical_id,
            name,
            arn,
            attributes,
        }
    }

    fn invoke_url(&self, state: &CloudState, stage: &plinth_stack::StageSpec) -> Option<String> {
        let api = state.records.get(&stage.rest_api)?;
        let path_part = state.records.values().find_map(|stored| {
            match &stored.resource.spec {
                ResourceSpec::ApiResource(spec) if spec.rest_api == stage.rest_api => {
                    Some(spec.path_part.clone())
                }
                _ => None,
            }
        })?;
        Some(format!(
            "https://{}.execute-api.{}.amazonaws.com/{}/{}",
            api.physical.physical_id, self.region, stage.stage_name, path_part
        ))
    }
}

fn short_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &uuid[..10])
}

fn id_prefix(spec: &ResourceSpec) -> &'static str {
    match spec {
        ResourceSpec::Bucket(_) => "bkt",
        ResourceSpec::Table(_) => "tbl",
        ResourceSpec::Role(_) => "rol",
        ResourceSpec::RolePolicy(_) => "pol",
        ResourceSpec::Function(_) => "fun",
        ResourceSpec::Notification(_) => "ntf",
        ResourceSpec::InvocationGrant(_) => "gnt",
        ResourceSpec::RestApi(_) => "api",
        ResourceSpec::ApiResource(_) => "res",
        ResourceSpec::Method(_) => "met",
        ResourceSpec::Integration(_) => "int",
        ResourceSpec::MethodResponse(_) => "mrs",
        ResourceSpec::IntegrationResponse(_) => "irs",
        ResourceSpec::Deployment(_) => "dep",
        ResourceSpec::Stage(_) => "stg",
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn create(
        &self,
        resource: &Resource,
        attrs: &ResolvedAttrs,
    ) -> Result<PhysicalResource> {
        let mut guard = self.inner.write();
        if guard.fail_on.contains(&resource.id) {
            bail!("injected fault for resource '{}'", resource.id);
        }

        let physical_id = short_id(id_prefix(&resource.spec));
        let physical = self.render_physical(&guard, resource, attrs, physical_id);

        if let ResourceSpec::Table(spec) = &resource.spec {
            guard.tables.entry(spec.name.clone()).or_default();
        }

        guard.events.push(CloudEvent::Created {
            logical: resource.id.clone(),
            physical_id: physical.physical_id.clone(),
        });
        guard.records.insert(
            resource.id.clone(),
            StoredResource {
                resource: resource.clone(),
                attrs: attrs.clone(),
                physical: physical.clone(),
            },
        );
        Ok(physical)
    }

    async fn update(
        &self,
        resource: &Resource,
        current: &PhysicalResource,
        attrs: &ResolvedAttrs,
    ) -> Result<PhysicalResource> {
        let mut guard = self.inner.write();
        if guard.fail_on.contains(&resource.id) {
            bail!("injected fault for resource '{}'", resource.id);
        }

        let physical =
            self.render_physical(&guard, resource, attrs, current.physical_id.clone());
        guard.events.push(CloudEvent::Updated {
            logical: resource.id.clone(),
            physical_id: physical.physical_id.clone(),
        });
        guard.records.insert(
            resource.id.clone(),
            StoredResource {
                resource: resource.clone(),
                attrs: attrs.clone(),
                physical: physical.clone(),
            },
        );
        Ok(physical)
    }

    async fn destroy(&self, physical: &PhysicalResource) -> Result<()> {
        let mut guard = self.inner.write();
        guard.events.push(CloudEvent::Destroyed {
            logical: physical.logical.clone(),
            physical_id: physical.physical_id.clone(),
        });

        // A replaced predecessor is gone from the live records already;
        // only drop the record when the identity still matches.
        let live = guard
            .records
            .get(&physical.logical)
            .map(|stored| stored.physical.physical_id == physical.physical_id)
            .unwrap_or(false);
        if live {
            if let Some(stored) = guard.records.remove(&physical.logical) {
                if let ResourceSpec::Table(spec) = &stored.resource.spec {
                    guard.tables.remove(&spec.name);
                }
            }
        }
        Ok(())
    }
}
