//! Kind-agnostic view of a resource spec

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ResourceKind;
use crate::crd::Selector;

/// Spec fields the reconciler understands, plus the backend payload
///
/// Everything not named here is kind-specific and carried opaquely in
/// `fields`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// External id assigned by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Parents named by cluster name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<String>,

    /// Backend payload
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ResourceSpec {
    /// External id, treating an empty string as unset
    pub fn external_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Resolved id of a parent recorded in the spec
    pub fn parent_id(&self, kind: ResourceKind) -> Option<&str> {
        let slot = match kind {
            ResourceKind::Organization => &self.organization_id,
            ResourceKind::Workspace => &self.workspace_id,
            ResourceKind::Solution => &self.solution_id,
            ResourceKind::Runner => &self.runner_id,
            _ => return None,
        };
        slot.as_deref().filter(|id| !id.is_empty())
    }

    /// Record the resolved id of a parent
    pub fn set_parent_id(&mut self, kind: ResourceKind, id: impl Into<String>) {
        let slot = match kind {
            ResourceKind::Organization => &mut self.organization_id,
            ResourceKind::Workspace => &mut self.workspace_id,
            ResourceKind::Solution => &mut self.solution_id,
            ResourceKind::Runner => &mut self.runner_id,
            _ => return,
        };
        *slot = Some(id.into());
    }

    /// String-valued payload field
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

impl Selector {
    /// Name given for a parent kind
    pub fn get(&self, kind: ResourceKind) -> Option<&str> {
        let name = match kind {
            ResourceKind::Organization => &self.organization,
            ResourceKind::Workspace => &self.workspace,
            ResourceKind::Solution => &self.solution,
            ResourceKind::Runner => &self.runner,
            _ => return None,
        };
        name.as_deref().filter(|n| !n.is_empty())
    }

    /// Every named parent, in dependency order
    pub fn named_parents(&self) -> Vec<(ResourceKind, &str)> {
        ResourceKind::ALL
            .iter()
            .filter_map(|kind| self.get(*kind).map(|name| (*kind, name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_known_fields_from_payload() {
        let spec: ResourceSpec = serde_json::from_value(json!({
            "id": "w-1",
            "key": "sim",
            "selector": {"organization": "acme", "solution": "sim1"},
            "organizationId": "org-1",
            "security": {"default": "none"}
        }))
        .unwrap();

        assert_eq!(spec.external_id(), Some("w-1"));
        assert_eq!(spec.parent_id(ResourceKind::Organization), Some("org-1"));
        assert_eq!(spec.field_str("key"), Some("sim"));
        assert!(spec.fields.contains_key("security"));
        assert!(!spec.fields.contains_key("selector"));

        let selector = spec.selector.unwrap();
        assert_eq!(
            selector.named_parents(),
            vec![(ResourceKind::Organization, "acme"), (ResourceKind::Solution, "sim1")]
        );
    }

    #[test]
    fn empty_id_counts_as_unset() {
        let spec = ResourceSpec {
            id: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(spec.external_id(), None);
    }

    #[test]
    fn unknown_selector_key_is_rejected() {
        let result: Result<ResourceSpec, _> =
            serde_json::from_value(json!({"selector": {"organisation": "acme"}}));
        assert!(result.is_err());
    }
}
