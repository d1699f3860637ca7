//! Per-event reconciliation state machine

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::{ownership, poll_until, status, DependencyResolver};
use crate::adapters::{BackendAdapter, CreateOutcome, Created, DesiredState, EntityRef};
use crate::crd::{ManagedStatus, Phase};
use crate::error::{Error, Result};
use crate::metrics;
use crate::resource::{
    EventType, ManagedResource, ResolvedParent, ResourceEvent, ResourceKind, ResourceStore,
    WriteBack,
};

/// What a reconcile did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A new backend entity was created
    Created { external_id: String },
    /// An entity created by an earlier attempt was found and recorded
    Adopted { external_id: String },
    /// The entity was updated to the latest spec
    Updated,
    /// The entity already exists and nothing had to change
    Unchanged,
    /// The entity was deleted, or was already gone
    Deleted,
    /// The event needed no backend call
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created { .. } => "created",
            Outcome::Adopted { .. } => "adopted",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
            Outcome::Deleted => "deleted",
            Outcome::Skipped => "skipped",
        }
    }
}

/// A backend 404 left over after the update and delete fallbacks
///
/// The entity or one of its parents was removed behind the operator's back,
/// so a redelivery cannot succeed. Kubernetes 404s keep their class: they mean
/// the resource itself is gone.
fn backend_missing_is_permanent(error: Error) -> Error {
    match error {
        Error::NotFound(what) => Error::permanent(format!("backend entity not found: {what}")),
        other => other,
    }
}

/// Turns lifecycle events for one kind into idempotent backend calls
pub struct Reconciler {
    kind: ResourceKind,
    store: Arc<dyn ResourceStore>,
    adapter: Arc<dyn BackendAdapter>,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(
        kind: ResourceKind,
        store: Arc<dyn ResourceStore>,
        adapter: Arc<dyn BackendAdapter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            kind,
            store,
            adapter,
            cancel,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Reconcile one event
    #[instrument(skip(self, event), fields(
        kind = %self.kind,
        name = %event.resource.name,
        event = event.event_type.as_str(),
        resource_version = %event.resource.resource_version,
    ))]
    pub async fn reconcile(&self, event: &ResourceEvent) -> Result<Outcome> {
        let _timer = metrics::RECONCILE_DURATION
            .with_label_values(&[self.kind.as_str()])
            .start_timer();

        let result = match event.event_type {
            EventType::Deleted => self.delete(&event.resource).await,
            EventType::Added | EventType::Modified => self.apply(event).await,
        }
        .map_err(backend_missing_is_permanent);

        match &result {
            Ok(outcome) => {
                metrics::RECONCILIATIONS
                    .with_label_values(&[self.kind.as_str(), outcome.as_str()])
                    .inc();
            }
            Err(e) => {
                metrics::RECONCILIATION_ERRORS
                    .with_label_values(&[self.kind.as_str(), e.class().as_str()])
                    .inc();
            }
        }
        result
    }

    /// ADDED and MODIFIED, decided on the latest stored state
    ///
    /// Events can be stale (the write-back patch produces its own MODIFIED
    /// events, and a reconnect replays everything), so the decision is made
    /// on a fresh read rather than on the event snapshot.
    async fn apply(&self, event: &ResourceEvent) -> Result<Outcome> {
        let Some(resource) = self.store.get(self.kind, &event.resource.name).await? else {
            info!("Resource no longer exists, waiting for its deletion event");
            return Ok(Outcome::Skipped);
        };
        if resource.uid != event.resource.uid {
            info!(uid = %resource.uid, "Resource was recreated, waiting for its own events");
            return Ok(Outcome::Skipped);
        }

        let Some(external_id) = resource.external_id() else {
            return self.create(&resource).await;
        };

        match event.event_type {
            EventType::Added => self.ensure_exists(&resource, external_id).await,
            _ if resource.is_up_to_date() => Ok(Outcome::Skipped),
            _ => self.update(&resource, external_id).await,
        }
    }

    /// ADDED for a resource that already has a backend entity
    async fn ensure_exists(&self, resource: &ManagedResource, external_id: &str) -> Result<Outcome> {
        let entity = EntityRef::new(external_id, &resource.spec);
        match self.adapter.read(entity).await? {
            Some(_) => {
                if !resource.is_up_to_date() {
                    self.mark_ready(resource, external_id, resource.generation)
                        .await?;
                }
                Ok(Outcome::Unchanged)
            }
            None => {
                warn!(external_id = %external_id, "Backend entity is gone, creating it again");
                self.create(resource).await
            }
        }
    }

    async fn create(&self, resource: &ManagedResource) -> Result<Outcome> {
        let resolver = DependencyResolver::new(self.store.as_ref());
        let parents = resolver.resolve_all(resource).await?;
        let desired = DesiredState::new(resource, parents.clone());

        let (created, adopted) = match self.adapter.find(&desired).await? {
            Some(existing) => {
                info!(external_id = %existing.external_id, "Found entity from an earlier attempt");
                (self.adapter.complete(&existing, &desired).await?, true)
            }
            None => (self.create_entity(resource, &desired).await?, false),
        };

        let patched = self.write_back(resource, &created, &parents).await?;
        self.mark_ready(&patched, &created.external_id, patched.generation)
            .await?;

        let external_id = created.external_id;
        if adopted {
            Ok(Outcome::Adopted { external_id })
        } else {
            info!(external_id = %external_id, "Created backend entity");
            Ok(Outcome::Created { external_id })
        }
    }

    async fn create_entity(
        &self,
        resource: &ManagedResource,
        desired: &DesiredState,
    ) -> Result<Created> {
        match self.adapter.create(desired).await? {
            CreateOutcome::Ready(created) => Ok(created),
            CreateOutcome::Pending(operation) => {
                let provisioning = status::provisioning(
                    resource.status.as_ref(),
                    operation.external_id.as_deref(),
                    Utc::now(),
                );
                self.store
                    .patch_status(self.kind, &resource.name, &provisioning)
                    .await?;

                poll_until(
                    || self.adapter.check_operation(&operation, desired),
                    self.adapter.poll_interval(),
                    self.adapter.operation_timeout(),
                    &self.cancel,
                )
                .await
            }
        }
    }

    async fn update(&self, resource: &ManagedResource, external_id: &str) -> Result<Outcome> {
        let resolver = DependencyResolver::new(self.store.as_ref());
        let parents = resolver.resolve_all(resource).await?;
        let desired = DesiredState::new(resource, parents.clone());

        let entity = EntityRef::new(external_id, &resource.spec);
        match self.adapter.update(entity, &desired).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(external_id = %external_id, "Backend entity is gone, creating it again");
                return self.create(resource).await;
            }
            Err(e) => return Err(e),
        }

        let write_back = self.build_write_back(resource, &Created::new(external_id), &parents);
        let patched = if write_back.is_applied_to(resource) {
            resource.clone()
        } else {
            self.store
                .patch(self.kind, &resource.name, &write_back)
                .await?
        };
        self.mark_ready(&patched, external_id, patched.generation)
            .await?;
        info!(external_id = %external_id, "Updated backend entity");
        Ok(Outcome::Updated)
    }

    async fn delete(&self, resource: &ManagedResource) -> Result<Outcome> {
        let Some(external_id) = resource.external_id() else {
            return Ok(Outcome::Skipped);
        };

        match self
            .adapter
            .delete(EntityRef::new(external_id, &resource.spec))
            .await
        {
            Ok(()) => info!(external_id = %external_id, "Deleted backend entity"),
            Err(e) if e.is_not_found() => {
                info!(external_id = %external_id, "Backend entity already deleted")
            }
            Err(e) => return Err(e),
        }
        Ok(Outcome::Deleted)
    }

    fn build_write_back(
        &self,
        resource: &ManagedResource,
        created: &Created,
        parents: &[ResolvedParent],
    ) -> WriteBack {
        let computed = ownership::owners_of(self.kind, parents);
        let owner_refs = if computed.is_empty() {
            Vec::new()
        } else {
            ownership::merge(&resource.owner_refs, computed)
        };

        WriteBack {
            external_id: created.external_id.clone(),
            display_name: created.display_name.clone(),
            parent_ids: parents
                .iter()
                .map(|p| (p.kind, p.external_id.clone()))
                .collect::<BTreeMap<_, _>>(),
            derived: created.derived.clone(),
            owner_refs,
        }
    }

    async fn write_back(
        &self,
        resource: &ManagedResource,
        created: &Created,
        parents: &[ResolvedParent],
    ) -> Result<ManagedResource> {
        let write_back = self.build_write_back(resource, created, parents);
        self.store
            .patch(self.kind, &resource.name, &write_back)
            .await
    }

    async fn mark_ready(
        &self,
        resource: &ManagedResource,
        external_id: &str,
        generation: Option<i64>,
    ) -> Result<()> {
        let ready = status::ready(resource.status.as_ref(), external_id, generation, Utc::now());
        self.patch_status(resource, ready).await
    }

    async fn patch_status(&self, resource: &ManagedResource, new: ManagedStatus) -> Result<()> {
        if resource.status.as_ref() == Some(&new) {
            return Ok(());
        }
        self.store
            .patch_status(self.kind, &resource.name, &new)
            .await
    }

    /// Record a failed event on the resource status
    ///
    /// `exhausted` marks a resource the watch loop gave up retrying. Deletion
    /// events are never recorded and a resource that disappeared in the
    /// meantime is ignored.
    pub async fn record_failure(
        &self,
        event: &ResourceEvent,
        error: &Error,
        exhausted: bool,
    ) -> Result<()> {
        if event.event_type == EventType::Deleted {
            return Ok(());
        }
        let Some(current) = self.store.get(self.kind, &event.resource.name).await? else {
            return Ok(());
        };

        let failed = status::failed(current.status.as_ref(), error, exhausted, Utc::now());
        if failed.phase == Some(Phase::Failed) {
            warn!(name = %current.name, error = %error, "Recording failure on resource");
        }
        match self.patch_status(&current, failed).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}
