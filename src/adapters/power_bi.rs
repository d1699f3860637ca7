//! Power BI report adapter
//!
//! A report is created by importing a `.pbix` file. The import is
//! asynchronous; once it succeeds the dataset parameters and datasource
//! credentials are set and the report id becomes the external id.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::http;
use super::{
    BackendAdapter, BackendEntity, CreateOutcome, Created, DesiredState, EntityRef,
    PendingOperation, TokenSource,
};
use crate::crd::{ReportParameter, ReportSpec};
use crate::error::{Error, Result};
use crate::reconcilers::PollState;
use crate::resource::ResourceKind;

/// Power BI REST API root
pub const POWER_BI_API: &str = "https://api.powerbi.com/v1.0/myorg";

/// Power BI web application, used to build report links
pub const POWER_BI_APP: &str = "https://app.powerbi.com";

const POWER_BI_SCOPE: &str = "https://analysis.windows.net/powerbi/api/.default";

#[derive(Deserialize)]
struct ImportAccepted {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Import {
    import_state: String,
    #[serde(default)]
    reports: Vec<Item>,
    #[serde(default)]
    datasets: Vec<Item>,
}

#[derive(Deserialize)]
struct Item {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct Collection<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Datasource {
    datasource_type: String,
    #[serde(default)]
    gateway_id: Option<String>,
    #[serde(default)]
    datasource_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    id: String,
    name: String,
    #[serde(default)]
    dataset_id: Option<String>,
}

pub struct PowerBiAdapter {
    http: reqwest::Client,
    base_url: String,
    app_url: String,
    token: Arc<dyn TokenSource>,
}

impl PowerBiAdapter {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        app_url: impl Into<String>,
        token: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_url: app_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn bearer(&self) -> Result<String> {
        self.token.token(POWER_BI_SCOPE).await
    }

    fn group_url(&self, workspace_id: &str) -> String {
        format!("{}/groups/{}", self.base_url, workspace_id)
    }

    fn typed_spec(desired: &DesiredState) -> Result<ReportSpec> {
        serde_json::from_value(Value::Object(desired.payload()?))
            .map_err(|e| Error::validation(format!("report '{}': {e}", desired.name)))
    }

    fn report_link(&self, workspace_id: &str, report_id: &str) -> String {
        format!(
            "{}/groups/{}/reports/{}/ReportSection?experience=power-bi",
            self.app_url, workspace_id, report_id
        )
    }

    async fn update_parameters(
        &self,
        workspace_id: &str,
        dataset_id: &str,
        parameters: &[ReportParameter],
    ) -> Result<()> {
        if parameters.is_empty() {
            return Ok(());
        }
        let details: Vec<Value> = parameters
            .iter()
            .map(|p| json!({ "name": p.id, "newValue": p.value }))
            .collect();
        let response = self
            .http
            .post(format!(
                "{}/datasets/{}/Default.UpdateParameters",
                self.group_url(workspace_id),
                dataset_id
            ))
            .bearer_auth(self.bearer().await?)
            .json(&json!({ "updateDetails": details }))
            .send()
            .await?;
        http::check(response, "powerbi_parameters").await?;
        info!(dataset = %dataset_id, count = parameters.len(), "Updated dataset parameters");
        Ok(())
    }

    /// Let extension datasources authenticate as the calling identity
    async fn update_credentials(&self, workspace_id: &str, dataset_id: &str) -> Result<()> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!(
                "{}/datasets/{}/datasources",
                self.group_url(workspace_id),
                dataset_id
            ))
            .bearer_auth(&token)
            .send()
            .await?;
        let response = http::check(response, "powerbi_datasources").await?;
        let datasources: Collection<Datasource> = http::json(response).await?;

        let body = json!({
            "credentialDetails": {
                "credentialType": "OAuth2",
                "useCallerAADIdentity": true,
                "encryptedConnection": "Encrypted",
                "encryptionAlgorithm": "None",
                "privacyLevel": "Organizational",
            }
        });
        for datasource in datasources.value {
            if datasource.datasource_type != "Extension" {
                continue;
            }
            let (Some(gateway), Some(id)) = (datasource.gateway_id, datasource.datasource_id) else {
                continue;
            };
            let response = self
                .http
                .patch(format!("{}/gateways/{}/datasources/{}", self.base_url, gateway, id))
                .bearer_auth(&token)
                .json(&body)
                .send()
                .await?;
            http::check(response, "powerbi_credentials").await?;
            debug!(datasource = %id, "Updated datasource credentials");
        }
        Ok(())
    }

    async fn configure_dataset(&self, spec: &ReportSpec, dataset_id: &str) -> Result<()> {
        self.update_parameters(&spec.workspace_id, dataset_id, &spec.parameters)
            .await?;
        self.update_credentials(&spec.workspace_id, dataset_id).await
    }
}

#[async_trait]
impl BackendAdapter for PowerBiAdapter {
    async fn find(&self, desired: &DesiredState) -> Result<Option<BackendEntity>> {
        let spec = Self::typed_spec(desired)?;
        let response = self
            .http
            .get(format!("{}/reports", self.group_url(&spec.workspace_id)))
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        let Some(response) = http::check_optional(response, "powerbi_list").await? else {
            return Ok(None);
        };
        let reports: Collection<Report> = http::json(response).await?;

        Ok(reports
            .value
            .into_iter()
            .find(|r| r.name == spec.name)
            .map(|r| BackendEntity {
                external_id: r.id,
                display_name: Some(r.name),
            }))
    }

    async fn create(&self, desired: &DesiredState) -> Result<CreateOutcome> {
        let spec = Self::typed_spec(desired)?;
        let path = Path::new(&spec.path);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::permanent(format!("cannot read report file {}: {e}", spec.path)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.pbix", spec.name));

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        let response = self
            .http
            .post(format!("{}/imports", self.group_url(&spec.workspace_id)))
            .query(&[
                ("datasetDisplayName", spec.name.as_str()),
                ("nameConflict", "CreateOrOverwrite"),
            ])
            .bearer_auth(self.bearer().await?)
            .multipart(form)
            .send()
            .await?;
        let response = http::check(response, "powerbi_import").await?;
        let accepted: ImportAccepted = http::json(response).await?;
        info!(import = %accepted.id, report = %spec.name, "Report import started");

        Ok(CreateOutcome::Pending(PendingOperation {
            external_id: None,
            status_url: format!("{}/imports/{}", self.group_url(&spec.workspace_id), accepted.id),
        }))
    }

    async fn check_operation(
        &self,
        operation: &PendingOperation,
        desired: &DesiredState,
    ) -> Result<PollState<Created>> {
        let response = self
            .http
            .get(&operation.status_url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        let response = http::check(response, "powerbi_import_status").await?;
        let import: Import = http::json(response).await?;

        match import.import_state.as_str() {
            "Succeeded" => {}
            "Failed" => return Ok(PollState::Failed("import failed".to_string())),
            _ => return Ok(PollState::Pending),
        }

        let spec = Self::typed_spec(desired)?;
        let report = import
            .reports
            .first()
            .ok_or_else(|| Error::permanent("import succeeded without a report"))?;

        let mut created = Created::new(report.id.clone())
            .with_display_name(report.name.clone())
            .with_derived("link", self.report_link(&spec.workspace_id, &report.id));
        for dataset in &import.datasets {
            self.configure_dataset(&spec, &dataset.id).await?;
            created = created.with_derived("datasetId", dataset.id.clone());
        }
        Ok(PollState::Done(created))
    }

    /// Configure the dataset of a report whose import was not seen to succeed
    async fn complete(&self, entity: &BackendEntity, desired: &DesiredState) -> Result<Created> {
        let spec = Self::typed_spec(desired)?;
        let dataset_id = self
            .read_dataset_id(&spec.workspace_id, &entity.external_id)
            .await?
            .ok_or_else(|| {
                Error::transient(format!("report {} has no dataset yet", entity.external_id))
            })?;
        self.configure_dataset(&spec, &dataset_id).await?;

        Ok(Created::new(entity.external_id.clone())
            .with_display_name(entity.display_name.clone())
            .with_derived("link", self.report_link(&spec.workspace_id, &entity.external_id))
            .with_derived("datasetId", dataset_id))
    }

    async fn read(&self, entity: EntityRef<'_>) -> Result<Option<BackendEntity>> {
        let workspace_id = entity.require_parent_id(ResourceKind::Workspace)?;
        let response = self
            .http
            .get(format!("{}/reports/{}", self.group_url(workspace_id), entity.external_id))
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        match http::check_optional(response, "powerbi_read").await? {
            Some(response) => {
                let report: Report = http::json(response).await?;
                Ok(Some(BackendEntity {
                    external_id: report.id,
                    display_name: Some(report.name),
                }))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, entity: EntityRef<'_>, desired: &DesiredState) -> Result<()> {
        let spec = Self::typed_spec(desired)?;
        let dataset_id = match spec.dataset_id.clone() {
            Some(id) => id,
            None => self
                .read_dataset_id(&spec.workspace_id, entity.external_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("report {}", entity.external_id)))?,
        };
        self.configure_dataset(&spec, &dataset_id).await
    }

    /// Removing the dataset removes the reports built on it
    async fn delete(&self, entity: EntityRef<'_>) -> Result<()> {
        let workspace_id = entity.require_parent_id(ResourceKind::Workspace)?;
        let url = match entity.spec.field_str("datasetId") {
            Some(dataset) => format!("{}/datasets/{}", self.group_url(workspace_id), dataset),
            None => format!("{}/reports/{}", self.group_url(workspace_id), entity.external_id),
        };
        let response = self
            .http
            .delete(url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        http::check(response, "powerbi_delete").await?;
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn operation_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }
}

impl PowerBiAdapter {
    async fn read_dataset_id(&self, workspace_id: &str, report_id: &str) -> Result<Option<String>> {
        let response = self
            .http
            .get(format!("{}/reports/{}", self.group_url(workspace_id), report_id))
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;
        match http::check_optional(response, "powerbi_read").await? {
            Some(response) => Ok(http::json::<Report>(response).await?.dataset_id),
            None => Ok(None),
        }
    }
}
