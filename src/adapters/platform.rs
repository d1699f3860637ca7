//! Cosmo Tech platform REST adapter (organizations, solutions, workspaces,
//! runners, runs)

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::http;
use super::{BackendAdapter, BackendEntity, CreateOutcome, Created, DesiredState, EntityRef, TokenSource};
use crate::error::{Error, Result};
use crate::resource::ResourceKind;

/// Header carrying a platform API key
const API_KEY_HEADER: &str = "X-CSM-API-KEY";

/// Tag prefix marking entities with the uid of the resource that owns them
const UID_TAG_PREFIX: &str = "k8s-uid:";

/// Spec fields consumed by the controller and never sent to the API
const CONTROLLER_FIELDS: &[&str] = &["id", "startOnCreate"];

/// How requests to the platform are authenticated
pub enum PlatformAuth {
    ApiKey(String),
    Bearer {
        source: Arc<dyn TokenSource>,
        scope: String,
    },
}

#[derive(Debug, Deserialize)]
struct PlatformEntity {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl From<PlatformEntity> for BackendEntity {
    fn from(entity: PlatformEntity) -> Self {
        BackendEntity {
            external_id: entity.id,
            display_name: entity.name,
        }
    }
}

/// Adapter for one platform resource kind
pub struct PlatformAdapter {
    http: reqwest::Client,
    base_url: String,
    kind: ResourceKind,
    auth: PlatformAuth,
}

impl PlatformAdapter {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        kind: ResourceKind,
        auth: PlatformAuth,
    ) -> Result<Self> {
        if path_parents(kind).is_none() {
            return Err(Error::config(format!("{kind} is not a platform resource")));
        }
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            kind,
            auth,
        })
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match &self.auth {
            PlatformAuth::ApiKey(key) => request.header(API_KEY_HEADER, key),
            PlatformAuth::Bearer { source, scope } => request.bearer_auth(source.token(scope).await?),
        })
    }

    /// URL of the collection the entity lives in
    fn collection_url<'a>(&self, parent_id: impl Fn(ResourceKind) -> Option<&'a str>) -> Result<String> {
        let mut url = self.base_url.clone();
        for parent in path_parents(self.kind).unwrap_or_default() {
            let id = parent_id(*parent).ok_or_else(|| {
                Error::permanent(format!("{} has no {} id to address", self.kind, parent))
            })?;
            url.push_str(&format!("/{}/{}", parent.api_resource().plural, id));
        }
        url.push_str(&format!("/{}", self.kind.api_resource().plural));
        Ok(url)
    }

    fn entity_url(&self, entity: EntityRef<'_>) -> Result<String> {
        let collection = self.collection_url(|kind| entity.spec.parent_id(kind))?;
        Ok(format!("{}/{}", collection, entity.external_id))
    }

    /// Request body: spec without controller fields, tagged with the resource uid
    fn body(&self, desired: &DesiredState) -> Result<Map<String, Value>> {
        let mut body = desired.payload()?;
        for field in CONTROLLER_FIELDS {
            body.remove(*field);
        }

        if self.kind == ResourceKind::Workspace {
            if let Some(solution_id) = desired.parent_id(ResourceKind::Solution) {
                let solution = body
                    .entry("solution")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(solution) = solution {
                    solution.insert("solutionId".into(), Value::String(solution_id.to_string()));
                }
            }
        }

        let marker = uid_tag(&desired.uid);
        let tags = body.entry("tags").or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(tags) = tags {
            if !tags.iter().any(|t| t.as_str() == Some(marker.as_str())) {
                tags.push(Value::String(marker));
            }
        }
        Ok(body)
    }

    async fn start_runner(&self, collection: &str, runner_id: &str) -> Result<()> {
        let url = format!("{collection}/{runner_id}/start");
        let request = self.authorize(self.http.post(&url)).await?;
        http::check(request.send().await?, "start").await?;
        Ok(())
    }
}

/// Parents appearing in the URL of a platform kind, outermost first
fn path_parents(kind: ResourceKind) -> Option<&'static [ResourceKind]> {
    use ResourceKind::*;
    match kind {
        Organization => Some(&[]),
        Solution | Workspace => Some(&[Organization]),
        Runner => Some(&[Organization, Workspace]),
        Run => Some(&[Organization, Workspace, Runner]),
        AdxDatabase | EventHub | Report => None,
    }
}

fn uid_tag(uid: &str) -> String {
    format!("{UID_TAG_PREFIX}{uid}")
}

#[async_trait]
impl BackendAdapter for PlatformAdapter {
    async fn find(&self, desired: &DesiredState) -> Result<Option<BackendEntity>> {
        let url = self.collection_url(|kind| desired.parent_id(kind))?;
        let request = self.authorize(self.http.get(&url)).await?;
        let Some(response) = http::check_optional(request.send().await?, "list").await? else {
            return Ok(None);
        };
        let entities: Vec<PlatformEntity> = http::json(response).await?;

        let marker = uid_tag(&desired.uid);
        Ok(entities
            .into_iter()
            .find(|e| e.tags.as_ref().is_some_and(|tags| tags.contains(&marker)))
            .map(BackendEntity::from))
    }

    async fn create(&self, desired: &DesiredState) -> Result<CreateOutcome> {
        let url = self.collection_url(|kind| desired.parent_id(kind))?;
        let body = self.body(desired)?;
        let request = self.authorize(self.http.post(&url).json(&body)).await?;
        let created: PlatformEntity = http::json(http::check(request.send().await?, "create").await?).await?;
        info!(kind = %self.kind, id = %created.id, "Created platform entity");

        let start = desired
            .spec
            .fields
            .get("startOnCreate")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if self.kind == ResourceKind::Runner && start {
            // The runner exists either way; a failed start is not worth a redelivery
            if let Err(e) = self.start_runner(&url, &created.id).await {
                warn!(id = %created.id, error = %e, "Failed to start runner");
            }
        }

        Ok(CreateOutcome::Ready(
            Created::new(created.id).with_display_name(created.name),
        ))
    }

    async fn read(&self, entity: EntityRef<'_>) -> Result<Option<BackendEntity>> {
        let url = self.entity_url(entity)?;
        let request = self.authorize(self.http.get(&url)).await?;
        match http::check_optional(request.send().await?, "read").await? {
            Some(response) => Ok(Some(http::json::<PlatformEntity>(response).await?.into())),
            None => Ok(None),
        }
    }

    async fn update(&self, entity: EntityRef<'_>, desired: &DesiredState) -> Result<()> {
        let url = self.entity_url(entity)?;
        let body = self.body(desired)?;
        let request = self.authorize(self.http.patch(&url).json(&body)).await?;
        http::check(request.send().await?, "update").await?;
        Ok(())
    }

    async fn delete(&self, entity: EntityRef<'_>) -> Result<()> {
        let url = self.entity_url(entity)?;
        let request = self.authorize(self.http.delete(&url)).await?;
        http::check(request.send().await?, "delete").await?;
        Ok(())
    }
}
