//! Event Hub namespace adapter

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::arm::{workspace_scoped_name, ArmClient, AzureTarget};
use super::{
    BackendAdapter, BackendEntity, CreateOutcome, Created, DesiredState, EntityRef,
    PendingOperation, TokenSource,
};
use crate::crd::EventHubSpec;
use crate::error::Result;
use crate::reconcilers::PollState;

const EVENTHUB_API_VERSION: &str = "2024-01-01";

const PARTITION_COUNT: u32 = 4;
const RETENTION_DAYS: u32 = 4;

pub struct EventHubAdapter {
    arm: ArmClient,
}

impl EventHubAdapter {
    pub fn new(
        http: reqwest::Client,
        arm_endpoint: impl Into<String>,
        credential: Arc<dyn TokenSource>,
        target: AzureTarget,
    ) -> Self {
        Self {
            arm: ArmClient::new(http, arm_endpoint, credential, target),
        }
    }

    fn namespace_path(&self, namespace: &str) -> String {
        format!(
            "{}/providers/Microsoft.EventHub/namespaces/{}",
            self.arm.resource_group_path(),
            namespace
        )
    }

    fn namespace_body(&self) -> Value {
        json!({
            "location": self.arm.target.location,
            "sku": {"name": "Standard", "tier": "Standard"},
        })
    }

    /// Create every event hub and its consumer group inside the namespace
    async fn create_consumers(&self, namespace: &str, desired: &DesiredState) -> Result<()> {
        let spec: EventHubSpec = serde_json::from_value(Value::Object(desired.payload()?))?;
        let namespace_path = self.namespace_path(namespace);

        for consumer in &spec.consumers {
            let hub_path = format!("{}/eventhubs/{}", namespace_path, consumer.entity);
            let hub = json!({
                "properties": {
                    "messageRetentionInDays": RETENTION_DAYS,
                    "partitionCount": PARTITION_COUNT,
                    "status": "Active",
                }
            });
            self.arm.put(&hub_path, EVENTHUB_API_VERSION, &hub).await?;

            let group_path = format!("{}/consumergroups/{}", hub_path, consumer.display_name);
            let group = json!({ "properties": { "userMetadata": desired.name } });
            self.arm.put(&group_path, EVENTHUB_API_VERSION, &group).await?;
            info!(
                namespace = %namespace,
                entity = %consumer.entity,
                consumer_group = %consumer.display_name,
                "Created event hub"
            );
        }
        Ok(())
    }

    fn created(namespace: String) -> Created {
        Created::new(namespace.clone()).with_display_name(Some(namespace))
    }
}

#[async_trait]
impl BackendAdapter for EventHubAdapter {
    async fn find(&self, desired: &DesiredState) -> Result<Option<BackendEntity>> {
        let namespace = workspace_scoped_name(desired)?;
        self.read(EntityRef::new(&namespace, &desired.spec)).await
    }

    async fn create(&self, desired: &DesiredState) -> Result<CreateOutcome> {
        let namespace = workspace_scoped_name(desired)?;
        let response = self
            .arm
            .put(&self.namespace_path(&namespace), EVENTHUB_API_VERSION, &self.namespace_body())
            .await?;
        info!(namespace = %namespace, "Namespace creation accepted");

        match response.async_operation {
            Some(status_url) => Ok(CreateOutcome::Pending(PendingOperation {
                external_id: Some(namespace),
                status_url,
            })),
            None => {
                self.create_consumers(&namespace, desired).await?;
                Ok(CreateOutcome::Ready(Self::created(namespace)))
            }
        }
    }

    async fn check_operation(
        &self,
        operation: &PendingOperation,
        desired: &DesiredState,
    ) -> Result<PollState<Created>> {
        let namespace = match &operation.external_id {
            Some(id) => id.clone(),
            None => workspace_scoped_name(desired)?,
        };
        match self.arm.operation_status(&operation.status_url).await? {
            PollState::Pending => Ok(PollState::Pending),
            PollState::Failed(reason) => Ok(PollState::Failed(reason)),
            PollState::Done(()) => {
                self.create_consumers(&namespace, desired).await?;
                Ok(PollState::Done(Self::created(namespace)))
            }
        }
    }

    async fn complete(&self, entity: &BackendEntity, desired: &DesiredState) -> Result<Created> {
        let namespace = &entity.external_id;
        self.arm
            .ensure_provisioned(&self.namespace_path(namespace), EVENTHUB_API_VERSION)
            .await?;
        self.create_consumers(namespace, desired).await?;
        Ok(Self::created(namespace.clone()))
    }

    async fn read(&self, entity: EntityRef<'_>) -> Result<Option<BackendEntity>> {
        let found = self
            .arm
            .get_optional(&self.namespace_path(entity.external_id), EVENTHUB_API_VERSION)
            .await?;
        Ok(found.map(|ns| BackendEntity {
            external_id: entity.external_id.to_string(),
            display_name: ns.get("name").and_then(Value::as_str).map(str::to_string),
        }))
    }

    /// The namespace itself is immutable; new consumers are added in place
    async fn update(&self, entity: EntityRef<'_>, desired: &DesiredState) -> Result<()> {
        self.create_consumers(entity.external_id, desired).await
    }

    async fn delete(&self, entity: EntityRef<'_>) -> Result<()> {
        self.arm
            .delete(&self.namespace_path(entity.external_id), EVENTHUB_API_VERSION)
            .await
    }

    fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticToken;
    use crate::resource::{ManagedResource, ResolvedParent, ResourceKind, ResourceSpec};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NS_PATH: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.EventHub/namespaces/org-1-sim";

    fn adapter(server: &MockServer) -> EventHubAdapter {
        EventHubAdapter::new(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(StaticToken::new("t")),
            AzureTarget {
                subscription_id: "sub".into(),
                resource_group: "rg".into(),
                location: "westeurope".into(),
                tenant_id: "tenant".into(),
            },
        )
    }

    fn desired() -> DesiredState {
        let resource = ManagedResource {
            kind: ResourceKind::EventHub,
            name: "events".into(),
            namespace: "cosmotech".into(),
            uid: "uid-eh".into(),
            resource_version: "1".into(),
            generation: Some(1),
            owner_refs: vec![],
            spec: serde_json::from_value::<ResourceSpec>(json!({
                "consumers": [{"entity": "probesmeasures", "displayName": "adx"}]
            }))
            .unwrap(),
            status: None,
        };
        DesiredState::new(
            &resource,
            vec![
                ResolvedParent {
                    kind: ResourceKind::Organization,
                    name: "acme".into(),
                    uid: "uid-o".into(),
                    external_id: "org-1".into(),
                    key: None,
                },
                ResolvedParent {
                    kind: ResourceKind::Workspace,
                    name: "ws".into(),
                    uid: "uid-w".into(),
                    external_id: "w-1".into(),
                    key: Some("sim".into()),
                },
            ],
        )
    }

    #[tokio::test]
    async fn synchronous_create_adds_hubs_and_consumer_groups() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(NS_PATH))
            .and(body_partial_json(json!({"sku": {"name": "Standard"}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("{NS_PATH}/eventhubs/probesmeasures")))
            .and(body_partial_json(json!({"properties": {"partitionCount": 4}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("{NS_PATH}/eventhubs/probesmeasures/consumergroups/adx")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = adapter(&server).create(&desired()).await.unwrap();
        assert_eq!(
            outcome,
            CreateOutcome::Ready(
                Created::new("org-1-sim").with_display_name(Some("org-1-sim".into()))
            )
        );
    }

    #[tokio::test]
    async fn find_reports_absent_namespace() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NS_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(adapter(&server).find(&desired()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn adopted_namespace_gets_its_consumers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "org-1-sim",
                "properties": {"provisioningState": "Succeeded"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("{NS_PATH}/eventhubs/probesmeasures")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("{NS_PATH}/eventhubs/probesmeasures/consumergroups/adx")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let event_hub = adapter(&server);
        let existing = event_hub.find(&desired()).await.unwrap().unwrap();
        let created = event_hub.complete(&existing, &desired()).await.unwrap();
        assert_eq!(
            created,
            Created::new("org-1-sim").with_display_name(Some("org-1-sim".into()))
        );
    }
}
