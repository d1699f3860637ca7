//! Azure Data Explorer database adapter
//!
//! Creating a database is asynchronous on the ARM side. Once the database
//! is provisioned the adapter grants principals, wires the workspace Event
//! Hub namespace roles, runs the management scripts and creates the data
//! connections. Every follow-up step is an idempotent PUT or script, so
//! repeating it after a redelivery is harmless.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::arm::{workspace_scoped_name, ArmClient, AzureTarget};
use super::http;
use super::{
    BackendAdapter, BackendEntity, CreateOutcome, Created, DesiredState, EntityRef,
    PendingOperation, TokenSource,
};
use crate::crd::AdxDatabaseSpec;
use crate::error::{Error, Result};
use crate::reconcilers::PollState;

const KUSTO_API_VERSION: &str = "2023-08-15";
const AUTHORIZATION_API_VERSION: &str = "2022-04-01";

/// Hot cache period applied to every database
const HOT_CACHE_PERIOD: &str = "P31D";

/// Built-in "Azure Event Hubs Data Receiver" role
pub const EVENTHUB_DATA_RECEIVER_ROLE: &str = "a638d3c7-ab3a-418d-83e6-5f17a39d4fde";

/// Built-in "Azure Event Hubs Data Sender" role
pub const EVENTHUB_DATA_SENDER_ROLE: &str = "2b629674-e913-4c01-ae53-ef4638d8f975";

/// Cluster-level settings for the ADX adapter
#[derive(Clone, Debug)]
pub struct AdxSettings {
    pub cluster_name: String,
    /// Managed identity of the cluster, receives events from the workspace namespace
    pub cluster_principal_id: Option<String>,
    /// Platform identity, sends events to the workspace namespace
    pub platform_principal_id: String,
    pub receiver_role_id: String,
    pub sender_role_id: String,
}

pub struct AdxAdapter {
    arm: ArmClient,
    http: reqwest::Client,
    credential: Arc<dyn TokenSource>,
    settings: AdxSettings,
}

impl AdxAdapter {
    pub fn new(
        http: reqwest::Client,
        arm_endpoint: impl Into<String>,
        credential: Arc<dyn TokenSource>,
        target: AzureTarget,
        settings: AdxSettings,
    ) -> Self {
        Self {
            arm: ArmClient::new(http.clone(), arm_endpoint, credential.clone(), target),
            http,
            credential,
            settings,
        }
    }

    fn cluster_path(&self) -> String {
        format!(
            "{}/providers/Microsoft.Kusto/clusters/{}",
            self.arm.resource_group_path(),
            self.settings.cluster_name
        )
    }

    fn database_path(&self, database: &str) -> String {
        format!("{}/databases/{}", self.cluster_path(), database)
    }

    fn namespace_path(&self, namespace: &str) -> String {
        format!(
            "{}/providers/Microsoft.EventHub/namespaces/{}",
            self.arm.resource_group_path(),
            namespace
        )
    }

    fn typed_spec(desired: &DesiredState) -> Result<AdxDatabaseSpec> {
        Ok(serde_json::from_value(Value::Object(desired.payload()?))?)
    }

    /// Everything that happens once the database exists
    async fn provision(&self, database: &str, desired: &DesiredState) -> Result<()> {
        let spec = Self::typed_spec(desired)?;

        for permission in &spec.permissions {
            let name = principal_assignment_name(&permission.principal_id);
            let body = json!({
                "properties": {
                    "principalId": permission.principal_id,
                    "principalType": permission.principal_type,
                    "role": permission.role,
                    "tenantId": self.arm.target.tenant_id,
                }
            });
            let path = format!("{}/principalAssignments/{}", self.database_path(database), name);
            self.arm.put(&path, KUSTO_API_VERSION, &body).await?;
            info!(database = %database, principal = %permission.principal_id, "Granted database role");
        }

        let scope = self.namespace_path(database);
        if let Some(cluster_principal) = &self.settings.cluster_principal_id {
            self.assign_role(&scope, cluster_principal, &self.settings.receiver_role_id)
                .await?;
        }
        self.assign_role(&scope, &self.settings.platform_principal_id, &self.settings.sender_role_id)
            .await?;

        if let Some(uri) = &spec.uri {
            self.run_script(uri, database, &policy_script(database, spec.retention))
                .await?;
            for script in &spec.scripts {
                // One broken user script should not block the data connections
                if let Err(e) = self.run_script(uri, database, &script.content).await {
                    warn!(database = %database, script = ?script.name, error = %e, "Database script failed");
                }
            }
        }

        let cluster_path = self.cluster_path();
        for connector in &spec.connectors {
            let name = format!("{}-{}", database, connector.connection_name).to_lowercase();
            let body = json!({
                "location": self.arm.target.location,
                "kind": "EventHub",
                "properties": {
                    "eventHubResourceId": format!(
                        "{}/eventhubs/{}",
                        scope,
                        connector.connection_name.to_lowercase()
                    ),
                    "consumerGroup": connector.consumer_group,
                    "tableName": connector.table_name,
                    "dataFormat": connector.format,
                    "compression": connector.compression.clone().unwrap_or_else(|| "None".into()),
                    "mappingRuleName": connector.mapping,
                    "managedIdentityResourceId": cluster_path,
                }
            });
            let path = format!("{}/dataConnections/{}", self.database_path(database), name);
            self.arm.put(&path, KUSTO_API_VERSION, &body).await?;
        }

        Ok(())
    }

    async fn assign_role(&self, scope: &str, principal_id: &str, role_id: &str) -> Result<()> {
        let role_definition = format!(
            "{}/providers/Microsoft.Authorization/roleDefinitions/{}",
            self.arm.subscription_path(),
            role_id
        );
        let name = role_assignment_name(scope, principal_id, role_id);
        let body = json!({
            "properties": {
                "roleDefinitionId": role_definition,
                "principalId": principal_id,
                "principalType": "ServicePrincipal",
            }
        });
        let path = format!("{scope}/providers/Microsoft.Authorization/roleAssignments/{name}");
        match self.arm.put(&path, AUTHORIZATION_API_VERSION, &body).await {
            Ok(_) => Ok(()),
            // RoleAssignmentExists
            Err(Error::Transient(msg)) if msg.contains("HTTP 409") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn run_script(&self, cluster_uri: &str, database: &str, script: &str) -> Result<()> {
        let cluster_uri = cluster_uri.trim_end_matches('/');
        let token = self.credential.token(&format!("{cluster_uri}/.default")).await?;
        let response = self
            .http
            .post(format!("{cluster_uri}/v1/rest/mgmt"))
            .bearer_auth(token)
            .json(&json!({ "db": database, "csl": script }))
            .send()
            .await?;
        http::check(response, "kusto_mgmt").await?;
        Ok(())
    }
}

/// One assignment per principal, so a role change replaces the previous grant
fn principal_assignment_name(principal_id: &str) -> String {
    format!("principal-{}", principal_id.to_lowercase())
}

/// Deterministic assignment name so a repeated PUT targets the same assignment
fn role_assignment_name(scope: &str, principal_id: &str, role_id: &str) -> Uuid {
    let seed = format!("{scope}|{principal_id}|{role_id}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes())
}

fn policy_script(database: &str, retention_days: u32) -> String {
    let batching = json!({ "MaximumBatchingTimeSpan": "00:00:10" });
    format!(
        ".execute database script <|\n\
         .alter database ['{database}'] policy streamingingestion disable\n\
         .alter-merge database ['{database}'] policy retention softdelete = {retention_days}d\n\
         .alter database ['{database}'] policy ingestionbatching '{batching}'"
    )
}

#[async_trait]
impl BackendAdapter for AdxAdapter {
    async fn find(&self, desired: &DesiredState) -> Result<Option<BackendEntity>> {
        let database = workspace_scoped_name(desired)?;
        let found = self
            .arm
            .get_optional(&self.database_path(&database), KUSTO_API_VERSION)
            .await?;
        Ok(found.map(|_| BackendEntity {
            external_id: database.clone(),
            display_name: Some(database),
        }))
    }

    async fn create(&self, desired: &DesiredState) -> Result<CreateOutcome> {
        let spec = Self::typed_spec(desired)?;
        let database = workspace_scoped_name(desired)?;
        let body = json!({
            "location": self.arm.target.location,
            "kind": "ReadWrite",
            "properties": {
                "softDeletePeriod": format!("P{}D", spec.retention),
                "hotCachePeriod": HOT_CACHE_PERIOD,
            }
        });
        let response = self
            .arm
            .put(&self.database_path(&database), KUSTO_API_VERSION, &body)
            .await?;
        info!(database = %database, "Database creation accepted");

        match response.async_operation {
            Some(status_url) => Ok(CreateOutcome::Pending(PendingOperation {
                external_id: Some(database),
                status_url,
            })),
            None => {
                self.provision(&database, desired).await?;
                Ok(CreateOutcome::Ready(
                    Created::new(database.clone()).with_display_name(Some(database)),
                ))
            }
        }
    }

    async fn check_operation(
        &self,
        operation: &PendingOperation,
        desired: &DesiredState,
    ) -> Result<PollState<Created>> {
        let database = match &operation.external_id {
            Some(id) => id.clone(),
            None => workspace_scoped_name(desired)?,
        };
        match self.arm.operation_status(&operation.status_url).await? {
            PollState::Pending => Ok(PollState::Pending),
            PollState::Failed(reason) => Ok(PollState::Failed(reason)),
            PollState::Done(()) => {
                self.provision(&database, desired).await?;
                Ok(PollState::Done(
                    Created::new(database.clone()).with_display_name(Some(database)),
                ))
            }
        }
    }

    async fn complete(&self, entity: &BackendEntity, desired: &DesiredState) -> Result<Created> {
        let database = &entity.external_id;
        self.arm
            .ensure_provisioned(&self.database_path(database), KUSTO_API_VERSION)
            .await?;
        self.provision(database, desired).await?;
        Ok(Created::new(database.clone()).with_display_name(Some(database.clone())))
    }

    async fn read(&self, entity: EntityRef<'_>) -> Result<Option<BackendEntity>> {
        let found = self
            .arm
            .get_optional(&self.database_path(entity.external_id), KUSTO_API_VERSION)
            .await?;
        Ok(found.map(|_| BackendEntity {
            external_id: entity.external_id.to_string(),
            display_name: Some(entity.external_id.to_string()),
        }))
    }

    async fn update(&self, entity: EntityRef<'_>, desired: &DesiredState) -> Result<()> {
        let spec = Self::typed_spec(desired)?;
        let body = json!({
            "location": self.arm.target.location,
            "kind": "ReadWrite",
            "properties": {
                "softDeletePeriod": format!("P{}D", spec.retention),
                "hotCachePeriod": HOT_CACHE_PERIOD,
            }
        });
        self.arm
            .put(&self.database_path(entity.external_id), KUSTO_API_VERSION, &body)
            .await?;
        self.provision(entity.external_id, desired).await
    }

    async fn delete(&self, entity: EntityRef<'_>) -> Result<()> {
        self.arm
            .delete(&self.database_path(entity.external_id), KUSTO_API_VERSION)
            .await
    }
}
