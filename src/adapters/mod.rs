//! Backend adapters
//!
//! Each adapter converges one kind of backend entity (a platform REST object,
//! an Azure resource, a Power BI report) behind the uniform
//! [`BackendAdapter`] contract. The reconciler only ever talks to this trait.

mod adx;
mod arm;
mod credentials;
mod event_hub;
mod http;
mod platform;
mod power_bi;

pub use adx::*;
pub use arm::{AzureTarget, ARM_ENDPOINT};
pub use credentials::*;
pub use event_hub::*;
pub use platform::*;
pub use power_bi::*;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::reconcilers::PollState;
use crate::resource::{ManagedResource, ResolvedParent, ResourceKind, ResourceSpec};

/// What a backend entity should look like, built once per reconcile
///
/// The selector never makes it in here: it is stripped when the desired
/// state is built and replaced by the resolved parent ids.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    pub kind: ResourceKind,
    /// Cluster name of the resource
    pub name: String,
    /// Resource uid, stamped on backend entities as an idempotency key
    pub uid: String,
    pub parents: BTreeMap<ResourceKind, ResolvedParent>,
    pub spec: ResourceSpec,
}

impl DesiredState {
    pub fn new(resource: &ManagedResource, parents: Vec<ResolvedParent>) -> Self {
        let mut spec = resource.spec.clone();
        spec.selector = None;
        for parent in &parents {
            spec.set_parent_id(parent.kind, parent.external_id.clone());
        }

        Self {
            kind: resource.kind,
            name: resource.name.clone(),
            uid: resource.uid.clone(),
            parents: parents.into_iter().map(|p| (p.kind, p)).collect(),
            spec,
        }
    }

    pub fn parent(&self, kind: ResourceKind) -> Option<&ResolvedParent> {
        self.parents.get(&kind)
    }

    /// Parent id, from the fresh resolution or else from the spec
    pub fn parent_id(&self, kind: ResourceKind) -> Option<&str> {
        self.parent(kind)
            .map(|p| p.external_id.as_str())
            .or_else(|| self.spec.parent_id(kind))
    }

    /// Like [`DesiredState::parent_id`] but a missing id is a permanent failure
    pub fn require_parent_id(&self, kind: ResourceKind) -> Result<&str> {
        self.parent_id(kind).ok_or_else(|| {
            Error::permanent(format!("{} '{}' has no {} id", self.kind, self.name, kind))
        })
    }

    /// Spec as a JSON object, ready to be sent to a backend
    pub fn payload(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(&self.spec)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

/// Address of an existing backend entity
#[derive(Clone, Copy, Debug)]
pub struct EntityRef<'a> {
    pub external_id: &'a str,
    /// Spec carrying the parent ids the entity lives under
    pub spec: &'a ResourceSpec,
}

impl<'a> EntityRef<'a> {
    pub fn new(external_id: &'a str, spec: &'a ResourceSpec) -> Self {
        Self { external_id, spec }
    }

    /// Parent id recorded on the spec, required to address the entity
    pub fn require_parent_id(&self, kind: ResourceKind) -> Result<&'a str> {
        self.spec.parent_id(kind).ok_or_else(|| {
            Error::permanent(format!("entity '{}' has no recorded {} id", self.external_id, kind))
        })
    }
}

/// A backend entity as read back from the backend
#[derive(Clone, Debug, PartialEq)]
pub struct BackendEntity {
    pub external_id: String,
    pub display_name: Option<String>,
}

/// Result of a completed create
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Created {
    pub external_id: String,
    /// Backend-assigned display name
    pub display_name: Option<String>,
    /// Extra spec fields to write back (dataset id, links, ...)
    pub derived: Map<String, Value>,
}

impl Created {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }

    pub fn with_derived(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.derived.insert(key.to_string(), value.into());
        self
    }
}

/// Handle on an asynchronous backend operation
#[derive(Clone, Debug, PartialEq)]
pub struct PendingOperation {
    /// Entity id when the backend already knows it
    pub external_id: Option<String>,
    /// URL polled to learn the outcome
    pub status_url: String,
}

/// Outcome of [`BackendAdapter::create`]
#[derive(Clone, Debug, PartialEq)]
pub enum CreateOutcome {
    /// Entity exists and is usable
    Ready(Created),
    /// Entity is being provisioned; poll with [`BackendAdapter::check_operation`]
    Pending(PendingOperation),
}

/// Uniform contract every backend implements
///
/// Errors are classified: [`Error::NotFound`] means the entity is gone,
/// [`Error::Transient`] is safe to retry, [`Error::Permanent`] must be
/// surfaced to the operator.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Look for an entity already created for this resource
    ///
    /// Guards against duplicate creation when a crash lands between the
    /// backend create and the write-back patch.
    async fn find(&self, desired: &DesiredState) -> Result<Option<BackendEntity>>;

    /// Create the backend entity
    async fn create(&self, desired: &DesiredState) -> Result<CreateOutcome>;

    /// Read an entity by id; `None` when it does not exist
    async fn read(&self, entity: EntityRef<'_>) -> Result<Option<BackendEntity>>;

    /// Push the latest spec to an existing entity
    async fn update(&self, entity: EntityRef<'_>, desired: &DesiredState) -> Result<()>;

    /// Delete an entity
    async fn delete(&self, entity: EntityRef<'_>) -> Result<()>;

    /// Check an operation returned by [`BackendAdapter::create`]
    async fn check_operation(
        &self,
        operation: &PendingOperation,
        _desired: &DesiredState,
    ) -> Result<PollState<Created>> {
        Err(Error::permanent(format!(
            "backend has no asynchronous operations, cannot poll {}",
            operation.status_url
        )))
    }

    /// Finish an entity returned by [`BackendAdapter::find`]
    ///
    /// An earlier attempt may have stopped between the create and its
    /// follow-up steps (a crash, or a timed-out operation). Implementations
    /// re-run those steps idempotently and return the derived fields the
    /// create would have produced. A still-provisioning entity is a
    /// [`Error::Transient`].
    async fn complete(&self, entity: &BackendEntity, _desired: &DesiredState) -> Result<Created> {
        Ok(Created::new(entity.external_id.clone()).with_display_name(entity.display_name.clone()))
    }

    /// Interval between two operation checks
    fn poll_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// Time after which a pending operation is considered lost
    fn operation_timeout(&self) -> Duration {
        Duration::from_secs(600)
    }
}
