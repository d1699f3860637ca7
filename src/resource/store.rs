//! Read and patch access to the managed resources of one namespace

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::{json, Map, Value};

use super::{ManagedResource, ResourceKind};
use crate::crd::ManagedStatus;
use crate::error::Result;

/// Everything the reconciler writes back onto a resource after converging it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBack {
    pub external_id: String,
    /// Backend-assigned display name
    pub display_name: Option<String>,
    pub parent_ids: BTreeMap<ResourceKind, String>,
    /// Adapter-derived spec fields
    pub derived: Map<String, Value>,
    /// Complete owner reference list, already merged with the existing one
    pub owner_refs: Vec<OwnerReference>,
}

impl WriteBack {
    /// JSON merge patch applying this write-back
    pub fn to_patch(&self) -> Value {
        let mut spec = self.derived.clone();
        spec.insert("id".into(), Value::String(self.external_id.clone()));
        if let Some(name) = &self.display_name {
            spec.insert("name".into(), Value::String(name.clone()));
        }
        for (kind, id) in &self.parent_ids {
            if let Some(field) = kind.id_field() {
                spec.insert(field.into(), Value::String(id.clone()));
            }
        }

        let mut patch = json!({ "spec": spec });
        if !self.owner_refs.is_empty() {
            patch["metadata"] = json!({ "ownerReferences": self.owner_refs });
        }
        patch
    }

    /// True when applying the patch would not change the resource
    pub fn is_applied_to(&self, resource: &ManagedResource) -> bool {
        let spec = &resource.spec;
        spec.external_id() == Some(self.external_id.as_str())
            && self
                .display_name
                .as_ref()
                .map_or(true, |name| spec.name.as_ref() == Some(name))
            && self
                .parent_ids
                .iter()
                .all(|(kind, id)| spec.parent_id(*kind) == Some(id.as_str()))
            && self
                .derived
                .iter()
                .all(|(key, value)| spec.fields.get(key) == Some(value))
            && (self.owner_refs.is_empty() || self.owner_refs == resource.owner_refs)
    }
}

/// Sibling resources as seen through the API server
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a resource by name; `None` when it does not exist
    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<ManagedResource>>;

    /// Merge-patch spec and metadata, returning the patched resource
    async fn patch(
        &self,
        kind: ResourceKind,
        name: &str,
        write_back: &WriteBack,
    ) -> Result<ManagedResource>;

    /// Merge-patch the status subresource
    async fn patch_status(&self, kind: ResourceKind, name: &str, status: &ManagedStatus)
        -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "api.cosmotech.com/v1".into(),
            kind: "Organization".into(),
            name: "acme".into(),
            uid: uid.into(),
            block_owner_deletion: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn patch_sets_id_parents_and_owners() {
        let write_back = WriteBack {
            external_id: "w-1".into(),
            display_name: Some("Workspace 1".into()),
            parent_ids: BTreeMap::from([
                (ResourceKind::Organization, "org-1".to_string()),
                (ResourceKind::Solution, "sol-7".to_string()),
            ]),
            derived: Map::new(),
            owner_refs: vec![owner("uid-o")],
        };

        let patch = write_back.to_patch();
        assert_eq!(patch["spec"]["id"], "w-1");
        assert_eq!(patch["spec"]["name"], "Workspace 1");
        assert_eq!(patch["spec"]["organizationId"], "org-1");
        assert_eq!(patch["spec"]["solutionId"], "sol-7");
        assert_eq!(patch["metadata"]["ownerReferences"][0]["uid"], "uid-o");
        assert_eq!(patch["metadata"]["ownerReferences"][0]["blockOwnerDeletion"], true);
        assert!(patch["spec"].get("selector").is_none());
    }

    #[test]
    fn patch_without_owners_leaves_metadata_alone() {
        let write_back = WriteBack {
            external_id: "o-1".into(),
            ..Default::default()
        };
        assert!(write_back.to_patch().get("metadata").is_none());
    }
}
