//! Custom resources provisioned through Azure Resource Manager

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ManagedStatus, Selector};

/// Azure Data Explorer database specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "azure.cosmotech.com",
    version = "v1",
    kind = "AdxDatabase",
    plural = "adxdatabases",
    singular = "adxdatabase",
    shortname = "adxdb",
    namespaced,
    status = "ManagedStatus",
    printcolumn = r#"{"name": "Database", "type": "string", "jsonPath": ".spec.id"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AdxDatabaseSpec {
    /// Parent organization and workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,

    /// Database name, `{organizationId}-{workspaceKey}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    /// Cluster query URI used to run management scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Soft-delete retention in days
    #[serde(default = "default_retention")]
    pub retention: u32,

    /// Database principal assignments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<DatabasePermission>,

    /// Management scripts run after provisioning
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<DatabaseScript>,

    /// Event Hub data connections
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<DataConnector>,
}

fn default_retention() -> u32 {
    365
}

/// Principal granted a role on the database
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabasePermission {
    /// Azure AD object or application id
    pub principal_id: String,
    /// App, Group or User
    pub principal_type: String,
    /// Admin, Ingestor, Monitor, User, UnrestrictedViewer or Viewer
    pub role: String,
}

/// Kusto management script
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseScript {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

/// Event Hub to table ingestion
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataConnector {
    /// Event hub name in the workspace namespace
    pub connection_name: String,
    pub consumer_group: String,
    pub table_name: String,
    /// Data format (JSON, CSV, ...)
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<String>,
}

/// Event Hub namespace specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "azure.cosmotech.com",
    version = "v1",
    kind = "EventHub",
    plural = "eventhubs",
    singular = "eventhub",
    shortname = "ceh",
    namespaced,
    status = "ManagedStatus",
    printcolumn = r#"{"name": "Namespace", "type": "string", "jsonPath": ".spec.id"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EventHubSpec {
    /// Parent organization and workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,

    /// Namespace name, `{organizationId}-{workspaceKey}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    /// Event hubs to create, each with its consumer group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumers: Vec<EventHubConsumer>,
}

/// An event hub and its consumer group
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventHubConsumer {
    /// Event hub name
    pub entity: String,
    /// Consumer group name
    pub display_name: String,
}
