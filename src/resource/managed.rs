//! Managed resources, watch events and resolved parents

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;

use super::{ResourceKind, ResourceSpec};
use crate::crd::ManagedStatus;
use crate::error::{Error, Result};

/// A cluster-declared object reconciled by this operator
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    /// Immutable identity, also used as the backend idempotency key
    pub uid: String,
    pub resource_version: String,
    pub generation: Option<i64>,
    pub owner_refs: Vec<OwnerReference>,
    pub spec: ResourceSpec,
    pub status: Option<ManagedStatus>,
}

impl ManagedResource {
    /// Decode a watched or fetched object of the given kind
    pub fn from_dynamic(kind: ResourceKind, obj: DynamicObject) -> Result<Self> {
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        let uid = obj
            .uid()
            .ok_or_else(|| Error::validation(format!("{kind} '{name}' has no uid")))?;
        let resource_version = obj.resource_version().unwrap_or_default();
        let generation = obj.metadata.generation;
        let owner_refs = obj.metadata.owner_references.clone().unwrap_or_default();

        let spec = match obj.data.get("spec") {
            Some(Value::Null) | None => ResourceSpec::default(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                Error::validation(format!("{kind} '{name}' has a malformed spec: {e}"))
            })?,
        };

        // A status we cannot read is rewritten on the next successful reconcile
        let status = obj
            .data
            .get("status")
            .and_then(|raw| serde_json::from_value(raw.clone()).ok());

        Ok(Self {
            kind,
            name,
            namespace,
            uid,
            resource_version,
            generation,
            owner_refs,
            spec,
            status,
        })
    }

    /// Backend identifier, if the resource has been reconciled
    pub fn external_id(&self) -> Option<&str> {
        self.spec.external_id()
    }

    /// Generation recorded by the last successful reconcile
    pub fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_generation)
    }

    /// True when the status already reflects the current spec generation
    pub fn is_up_to_date(&self) -> bool {
        self.generation.is_some() && self.generation == self.observed_generation()
    }
}

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
        }
    }
}

/// One lifecycle event for a managed resource
///
/// For `Deleted` the resource is the last known state; it is already gone
/// from the cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceEvent {
    pub event_type: EventType,
    pub resource: ManagedResource,
}

impl ResourceEvent {
    pub fn new(event_type: EventType, resource: ManagedResource) -> Self {
        Self {
            event_type,
            resource,
        }
    }
}

/// A parent resolved through its sibling custom resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedParent {
    pub kind: ResourceKind,
    pub name: String,
    pub uid: String,
    pub external_id: String,
    /// `spec.key` of the parent, used to derive Azure resource names
    pub key: Option<String>,
}
