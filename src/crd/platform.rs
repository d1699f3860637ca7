//! Custom resources mirrored onto the Cosmo Tech platform API

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{FreeForm, ManagedStatus, Selector};

/// Organization resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "api.cosmotech.com",
    version = "v1",
    kind = "Organization",
    plural = "organizations",
    singular = "organization",
    shortname = "corg",
    namespaced,
    status = "ManagedStatus",
    printcolumn = r#"{"name": "Id", "type": "string", "jsonPath": ".spec.id"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSpec {
    /// Platform identifier, assigned on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Access control list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<FreeForm>,
}

/// Solution resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "api.cosmotech.com",
    version = "v1",
    kind = "Solution",
    plural = "solutions",
    singular = "solution",
    shortname = "csol",
    namespaced,
    status = "ManagedStatus",
    printcolumn = r#"{"name": "Id", "type": "string", "jsonPath": ".spec.id"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SolutionSpec {
    /// Parent organization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Technical key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Container image repository of the simulator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<FreeForm>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_groups: Vec<FreeForm>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_templates: Vec<FreeForm>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<FreeForm>,
}

/// Workspace resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "api.cosmotech.com",
    version = "v1",
    kind = "Workspace",
    plural = "workspaces",
    singular = "workspace",
    shortname = "cws",
    namespaced,
    status = "ManagedStatus",
    printcolumn = r#"{"name": "Id", "type": "string", "jsonPath": ".spec.id"}"#,
    printcolumn = r#"{"name": "Organization", "type": "string", "jsonPath": ".spec.organizationId"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Parent organization and solution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_id: Option<String>,

    /// Technical key, also used to name the Azure resources of the workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Solution binding; `solutionId` is filled in by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<FreeForm>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_app: Option<FreeForm>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<FreeForm>,
}

/// Runner resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "api.cosmotech.com",
    version = "v1",
    kind = "Runner",
    plural = "runners",
    singular = "runner",
    shortname = "crun",
    namespaced,
    status = "ManagedStatus",
    printcolumn = r#"{"name": "Id", "type": "string", "jsonPath": ".spec.id"}"#,
    printcolumn = r#"{"name": "Workspace", "type": "string", "jsonPath": ".spec.workspaceId"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSpec {
    /// Parent organization, workspace and optionally solution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_template_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dataset_list: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters_values: Vec<FreeForm>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<FreeForm>,

    /// Start the runner right after it is created
    #[serde(default = "default_true")]
    pub start_on_create: bool,
}

fn default_true() -> bool {
    true
}

/// Run resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "api.cosmotech.com",
    version = "v1",
    kind = "Run",
    plural = "runs",
    singular = "run",
    shortname = "crn",
    namespaced,
    status = "ManagedStatus",
    printcolumn = r#"{"name": "Id", "type": "string", "jsonPath": ".spec.id"}"#,
    printcolumn = r#"{"name": "Runner", "type": "string", "jsonPath": ".spec.runnerId"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    /// Parent organization, workspace and runner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Run parameters forwarded as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<FreeForm>,
}
