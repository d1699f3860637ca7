//! Minimal Azure Resource Manager client used by the Azure adapters

use std::sync::Arc;

use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;

use super::http;
use super::{DesiredState, TokenSource};
use crate::error::{Error, Result};
use crate::reconcilers::PollState;
use crate::resource::ResourceKind;

/// Public Azure Resource Manager endpoint
pub const ARM_ENDPOINT: &str = "https://management.azure.com";

const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Subscription and resource group the operator provisions into
#[derive(Clone, Debug)]
pub struct AzureTarget {
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
    pub tenant_id: String,
}

/// Response of a PUT, with the operation to poll when provisioning is asynchronous
#[derive(Debug)]
pub(crate) struct ArmResponse {
    pub async_operation: Option<String>,
}

/// Name of a per-workspace Azure resource: `{organizationId}-{workspaceKey}`
pub(crate) fn workspace_scoped_name(desired: &DesiredState) -> Result<String> {
    let organization = desired.require_parent_id(ResourceKind::Organization)?;
    let workspace_key = desired
        .parent(ResourceKind::Workspace)
        .and_then(|w| w.key.as_deref())
        .ok_or_else(|| Error::permanent(format!("workspace of '{}' has no key", desired.name)))?;
    Ok(format!("{organization}-{workspace_key}"))
}

#[derive(Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<Value>,
}

pub(crate) struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    credential: Arc<dyn TokenSource>,
    pub target: AzureTarget,
}

impl ArmClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        credential: Arc<dyn TokenSource>,
        target: AzureTarget,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
            target,
        }
    }

    /// `/subscriptions/{sub}`
    pub fn subscription_path(&self) -> String {
        format!("/subscriptions/{}", self.target.subscription_id)
    }

    /// `/subscriptions/{sub}/resourceGroups/{rg}`
    pub fn resource_group_path(&self) -> String {
        format!("{}/resourceGroups/{}", self.subscription_path(), self.target.resource_group)
    }

    async fn request(&self, method: Method, path: &str, api_version: &str) -> Result<RequestBuilder> {
        let url = format!("{}{}?api-version={}", self.endpoint, path, api_version);
        let token = self.credential.token(ARM_SCOPE).await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    pub async fn get_optional(&self, path: &str, api_version: &str) -> Result<Option<Value>> {
        let request = self.request(Method::GET, path, api_version).await?;
        match http::check_optional(request.send().await?, "arm_get").await? {
            Some(response) => Ok(Some(http::json(response).await?)),
            None => Ok(None),
        }
    }

    /// Succeeds once the resource at `path` finished provisioning
    ///
    /// Used when adopting a resource whose creating operation was never
    /// seen to completion.
    pub async fn ensure_provisioned(&self, path: &str, api_version: &str) -> Result<()> {
        let resource = self
            .get_optional(path, api_version)
            .await?
            .ok_or_else(|| Error::transient(format!("{path} disappeared while being adopted")))?;
        match resource
            .pointer("/properties/provisioningState")
            .and_then(Value::as_str)
        {
            None | Some("Succeeded") => Ok(()),
            Some(state @ ("Failed" | "Canceled")) => {
                Err(Error::permanent(format!("{path} provisioning {state}")))
            }
            Some(state) => Err(Error::transient(format!("{path} is still provisioning ({state})"))),
        }
    }

    pub async fn put(&self, path: &str, api_version: &str, body: &Value) -> Result<ArmResponse> {
        let request = self.request(Method::PUT, path, api_version).await?;
        let response = http::check(request.json(body).send().await?, "arm_put").await?;
        let async_operation = response
            .headers()
            .get("Azure-AsyncOperation")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(ArmResponse { async_operation })
    }

    pub async fn delete(&self, path: &str, api_version: &str) -> Result<()> {
        let request = self.request(Method::DELETE, path, api_version).await?;
        http::check(request.send().await?, "arm_delete").await?;
        Ok(())
    }

    /// Poll an `Azure-AsyncOperation` URL once
    pub async fn operation_status(&self, status_url: &str) -> Result<PollState<()>> {
        let token = self.credential.token(ARM_SCOPE).await?;
        let request = self.http.get(status_url).bearer_auth(token);
        let response = http::check(request.send().await?, "arm_operation").await?;
        let status: OperationStatus = http::json(response).await?;

        Ok(match status.status.as_str() {
            "Succeeded" => PollState::Done(()),
            "Failed" | "Canceled" => PollState::Failed(format!(
                "operation {}: {}",
                status.status,
                status.error.map(|e| e.to_string()).unwrap_or_default()
            )),
            _ => PollState::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticToken;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ArmClient {
        ArmClient::new(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(StaticToken::new("arm-token")),
            AzureTarget {
                subscription_id: "sub".into(),
                resource_group: "rg".into(),
                location: "westeurope".into(),
                tenant_id: "tenant".into(),
            },
        )
    }

    #[tokio::test]
    async fn put_surfaces_async_operation() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/subscriptions/sub/resourceGroups/rg/thing"))
            .and(query_param("api-version", "2023-08-15"))
            .and(header("authorization", "Bearer arm-token"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", "https://ops/1"),
            )
            .mount(&server)
            .await;

        let arm = client(&server);
        let path = format!("{}/thing", arm.resource_group_path());
        let response = arm.put(&path, "2023-08-15", &json!({})).await.unwrap();
        assert_eq!(response.async_operation.as_deref(), Some("https://ops/1"));
    }

    #[tokio::test]
    async fn provisioning_state_decides_adoption() {
        let server = MockServer::start().await;
        for (name, state) in [("ready", "Succeeded"), ("busy", "Creating"), ("broken", "Failed")] {
            Mock::given(method("GET"))
                .and(path(format!("/subscriptions/sub/resourceGroups/rg/{name}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(
                    json!({"properties": {"provisioningState": state}}),
                ))
                .mount(&server)
                .await;
        }

        let arm = client(&server);
        let at = |name: &str| format!("{}/{name}", arm.resource_group_path());
        assert!(arm.ensure_provisioned(&at("ready"), "v").await.is_ok());
        let busy = arm.ensure_provisioned(&at("busy"), "v").await.unwrap_err();
        assert!(matches!(busy, Error::Transient(msg) if msg.contains("Creating")));
        let broken = arm.ensure_provisioned(&at("broken"), "v").await.unwrap_err();
        assert!(matches!(broken, Error::Permanent(_)));
        // Gone between the lookup and the adoption
        let gone = arm.ensure_provisioned(&at("missing"), "v").await.unwrap_err();
        assert!(matches!(gone, Error::Transient(_)));
    }

    #[tokio::test]
    async fn operation_status_maps_terminal_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ops/running"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ops/failed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"status": "Failed", "error": {"code": "QuotaExceeded"}}),
            ))
            .mount(&server)
            .await;

        let arm = client(&server);
        let running = arm.operation_status(&format!("{}/ops/running", server.uri())).await.unwrap();
        assert_eq!(running, PollState::Pending);

        let failed = arm.operation_status(&format!("{}/ops/failed", server.uri())).await.unwrap();
        assert!(matches!(failed, PollState::Failed(reason) if reason.contains("QuotaExceeded")));
    }
}
