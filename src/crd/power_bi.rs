//! Power BI report custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ManagedStatus;

/// Report resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "powerbi.cosmotech.com",
    version = "v1",
    kind = "Report",
    plural = "reports",
    singular = "report",
    shortname = "pbir",
    namespaced,
    status = "ManagedStatus",
    printcolumn = r#"{"name": "Report", "type": "string", "jsonPath": ".spec.id"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Link", "type": "string", "jsonPath": ".spec.link", "priority": 1}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReportSpec {
    /// Report id, assigned once the import succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Power BI workspace (group) id
    pub workspace_id: String,

    /// Dataset display name
    pub name: String,

    /// Path of the .pbix file inside the controller container
    pub path: String,

    /// Dataset parameters applied after import
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ReportParameter>,

    /// Dataset created by the import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,

    /// Browser link to the report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Dataset parameter override
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportParameter {
    /// Parameter name
    pub id: String,
    pub value: String,
}
