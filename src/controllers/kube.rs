//! Kubernetes-backed watch source and resource store

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::api::{DynamicObject, Patch, PatchParams, WatchEvent, WatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use super::{WatchItem, WatchSource, WatchStream};
use crate::crd::ManagedStatus;
use crate::error::{Error, Result};
use crate::reconcilers::status;
use crate::resource::{
    EventType, ManagedResource, ResourceEvent, ResourceKind, ResourceStore, WriteBack,
};

/// Field manager recorded on every patch
const FIELD_MANAGER: &str = "cosmotech-operator";

/// Server-side watch timeout; the stream then ends cleanly and is reopened
const WATCH_TIMEOUT_SECS: u32 = 290;

fn api_for(client: &Client, namespace: &str, kind: ResourceKind) -> Api<DynamicObject> {
    Api::namespaced_with(client.clone(), namespace, &kind.api_resource())
}

/// Watches one kind in one namespace
pub struct KubeWatchSource {
    api: Api<DynamicObject>,
    kind: ResourceKind,
}

impl KubeWatchSource {
    pub fn new(client: &Client, namespace: &str, kind: ResourceKind) -> Self {
        Self {
            api: api_for(client, namespace, kind),
            kind,
        }
    }
}

fn to_item(kind: ResourceKind, event: WatchEvent<DynamicObject>) -> Result<WatchItem> {
    let (event_type, obj) = match event {
        WatchEvent::Added(obj) => (EventType::Added, obj),
        WatchEvent::Modified(obj) => (EventType::Modified, obj),
        WatchEvent::Deleted(obj) => (EventType::Deleted, obj),
        WatchEvent::Bookmark(bookmark) => {
            return Ok(WatchItem::Bookmark(bookmark.metadata.resource_version))
        }
        WatchEvent::Error(e) if e.code == 410 => return Err(Error::Gone(e.message)),
        WatchEvent::Error(e) => {
            return Err(Error::Watch(format!("{} ({}): {}", e.reason, e.code, e.message)))
        }
    };

    let resource_version = obj.resource_version().unwrap_or_default();
    Ok(match ManagedResource::from_dynamic(kind, obj) {
        Ok(resource) => WatchItem::Event(ResourceEvent::new(event_type, resource)),
        Err(error) => WatchItem::Invalid {
            resource_version,
            error,
        },
    })
}

#[async_trait]
impl WatchSource for KubeWatchSource {
    async fn watch(&self, resource_version: &str) -> Result<WatchStream> {
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let version = if resource_version.is_empty() { "0" } else { resource_version };
        debug!(kind = %self.kind, resource_version = %version, "Opening watch");

        let kind = self.kind;
        let stream = self.api.watch(&params, version).await?;
        Ok(stream
            .map_err(Error::from)
            .map(move |event| event.and_then(|e| to_item(kind, e)))
            .boxed())
    }
}

/// Reads and patches resources in one namespace
pub struct KubeResourceStore {
    client: Client,
    namespace: String,
}

impl KubeResourceStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self, kind: ResourceKind) -> Api<DynamicObject> {
        api_for(&self.client, &self.namespace, kind)
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<ManagedResource>> {
        match self.api(kind).get_opt(name).await? {
            Some(obj) => Ok(Some(ManagedResource::from_dynamic(kind, obj)?)),
            None => Ok(None),
        }
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        name: &str,
        write_back: &WriteBack,
    ) -> Result<ManagedResource> {
        let patched = self
            .api(kind)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(write_back.to_patch()),
            )
            .await?;
        ManagedResource::from_dynamic(kind, patched)
    }

    async fn patch_status(
        &self,
        kind: ResourceKind,
        name: &str,
        status: &ManagedStatus,
    ) -> Result<()> {
        self.api(kind)
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(status::to_patch(status)),
            )
            .await?;
        Ok(())
    }
}
