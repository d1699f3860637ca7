//! In-memory fakes for the watch source, the resource store and a backend

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use cosmotech_operator::adapters::{
    BackendAdapter, BackendEntity, CreateOutcome, Created, DesiredState, EntityRef,
    PendingOperation,
};
use cosmotech_operator::controllers::{WatchItem, WatchSource, WatchStream};
use cosmotech_operator::crd::ManagedStatus;
use cosmotech_operator::error::{Error, ErrorClass, Result};
use cosmotech_operator::reconcilers::PollState;
use cosmotech_operator::resource::{
    EventType, ManagedResource, ResourceEvent, ResourceKind, ResourceSpec, ResourceStore,
    WriteBack,
};

// ============================================================================
// Builders
// ============================================================================

pub fn spec(value: Value) -> ResourceSpec {
    serde_json::from_value(value).expect("valid spec")
}

pub fn resource(kind: ResourceKind, name: &str, value: Value) -> ManagedResource {
    ManagedResource {
        kind,
        name: name.to_string(),
        namespace: "cosmotech".to_string(),
        uid: format!("uid-{name}"),
        resource_version: "1".to_string(),
        generation: Some(1),
        owner_refs: vec![],
        spec: spec(value),
        status: None,
    }
}

pub fn error_of(class: ErrorClass) -> Error {
    match class {
        ErrorClass::NotFound => Error::not_found("injected"),
        ErrorClass::Transient => Error::transient("injected"),
        ErrorClass::Permanent => Error::permanent("injected"),
        ErrorClass::DependencyUnresolved => Error::unresolved(
            ResourceKind::Organization,
            "injected",
            cosmotech_operator::error::UnresolvedReason::Missing,
        ),
    }
}

/// What the Kubernetes API answers for a resource that no longer exists
pub fn kube_not_found(what: String) -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".into(),
        message: format!("{what} not found"),
        reason: "NotFound".into(),
        code: 404,
    }))
}

// ============================================================================
// Resource store
// ============================================================================

#[derive(Default)]
pub struct InMemoryStore {
    resources: Mutex<HashMap<(ResourceKind, String), ManagedResource>>,
    patches: AtomicUsize,
    status_patches: AtomicUsize,
    fail_next_patch: AtomicBool,
    next_rv: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_rv: AtomicU64::new(1000),
            ..Default::default()
        })
    }

    pub fn insert(&self, resource: ManagedResource) {
        self.resources
            .lock()
            .unwrap()
            .insert((resource.kind, resource.name.clone()), resource);
    }

    pub fn resource(&self, kind: ResourceKind, name: &str) -> ManagedResource {
        self.resources
            .lock()
            .unwrap()
            .get(&(kind, name.to_string()))
            .cloned()
            .expect("resource in store")
    }

    pub fn remove(&self, kind: ResourceKind, name: &str) -> Option<ManagedResource> {
        self.resources
            .lock()
            .unwrap()
            .remove(&(kind, name.to_string()))
    }

    /// Make a parent look reconciled
    pub fn set_external_id(&self, kind: ResourceKind, name: &str, id: &str) {
        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&(kind, name.to_string()))
            .expect("resource in store");
        resource.spec.id = Some(id.to_string());
    }

    pub fn fail_next_patch(&self) {
        self.fail_next_patch.store(true, Ordering::SeqCst);
    }

    pub fn patches(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn status_patches(&self) -> usize {
        self.status_patches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, kind: ResourceKind, name: &str) -> Result<Option<ManagedResource>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .get(&(kind, name.to_string()))
            .cloned())
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        name: &str,
        write_back: &WriteBack,
    ) -> Result<ManagedResource> {
        if self.fail_next_patch.swap(false, Ordering::SeqCst) {
            return Err(Error::transient("API server unavailable"));
        }
        self.patches.fetch_add(1, Ordering::SeqCst);

        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&(kind, name.to_string()))
            .ok_or_else(|| kube_not_found(format!("{kind} {name}")))?;

        let before = resource.spec.clone();
        resource.spec.id = Some(write_back.external_id.clone());
        if let Some(display_name) = &write_back.display_name {
            resource.spec.name = Some(display_name.clone());
        }
        for (parent, id) in &write_back.parent_ids {
            resource.spec.set_parent_id(*parent, id.clone());
        }
        for (key, value) in &write_back.derived {
            resource.spec.fields.insert(key.clone(), value.clone());
        }
        if !write_back.owner_refs.is_empty() {
            resource.owner_refs = write_back.owner_refs.clone();
        }
        if resource.spec != before {
            resource.generation = Some(resource.generation.unwrap_or(0) + 1);
        }
        resource.resource_version = self.next_rv.fetch_add(1, Ordering::SeqCst).to_string();
        Ok(resource.clone())
    }

    async fn patch_status(
        &self,
        kind: ResourceKind,
        name: &str,
        status: &ManagedStatus,
    ) -> Result<()> {
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        let mut resources = self.resources.lock().unwrap();
        let resource = resources
            .get_mut(&(kind, name.to_string()))
            .ok_or_else(|| kube_not_found(format!("{kind} {name}")))?;
        resource.status = Some(status.clone());
        Ok(())
    }
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Find,
    Create(DesiredState),
    CheckOperation,
    Complete(String),
    Read(String),
    Update(String, DesiredState),
    Delete(String),
}

/// Backend keeping entities in memory, keyed by external id, tagged by uid
#[derive(Default)]
pub struct FakeAdapter {
    calls: Mutex<Vec<Call>>,
    entities: Mutex<HashMap<String, String>>,
    next_id: AtomicUsize,
    create_failure: Mutex<Option<ErrorClass>>,
    update_failure: Mutex<Option<ErrorClass>>,
    delete_failure: Mutex<Option<ErrorClass>>,
    async_create: AtomicBool,
    pending_checks: AtomicU32,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates return an operation reported pending `checks` times
    pub fn with_async_create(checks: u32) -> Arc<Self> {
        let adapter = Self::default();
        adapter.async_create.store(true, Ordering::SeqCst);
        adapter.pending_checks.store(checks, Ordering::SeqCst);
        Arc::new(adapter)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, Call::Create(_)))
    }

    pub fn updates(&self) -> usize {
        self.count(|c| matches!(c, Call::Update(..)))
    }

    pub fn completions(&self) -> usize {
        self.count(|c| matches!(c, Call::Complete(_)))
    }

    pub fn checks(&self) -> usize {
        self.count(|c| matches!(c, Call::CheckOperation))
    }

    fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| f(c)).count()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    pub fn has_entity(&self, external_id: &str) -> bool {
        self.entities.lock().unwrap().contains_key(external_id)
    }

    pub fn remove_entity(&self, external_id: &str) {
        self.entities.lock().unwrap().remove(external_id);
    }

    pub fn fail_create_with(&self, class: ErrorClass) {
        *self.create_failure.lock().unwrap() = Some(class);
    }

    pub fn fail_update_with(&self, class: ErrorClass) {
        *self.update_failure.lock().unwrap() = Some(class);
    }

    pub fn fail_delete_with(&self, class: ErrorClass) {
        *self.delete_failure.lock().unwrap() = Some(class);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BackendAdapter for FakeAdapter {
    async fn find(&self, desired: &DesiredState) -> Result<Option<BackendEntity>> {
        self.record(Call::Find);
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .find(|(_, uid)| **uid == desired.uid)
            .map(|(id, _)| BackendEntity {
                external_id: id.clone(),
                display_name: None,
            }))
    }

    async fn create(&self, desired: &DesiredState) -> Result<CreateOutcome> {
        self.record(Call::Create(desired.clone()));
        if let Some(class) = *self.create_failure.lock().unwrap() {
            return Err(error_of(class));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let external_id = format!("{}-{n}", desired.kind.as_str().to_lowercase());
        self.entities
            .lock()
            .unwrap()
            .insert(external_id.clone(), desired.uid.clone());

        if self.async_create.load(Ordering::SeqCst) {
            return Ok(CreateOutcome::Pending(PendingOperation {
                external_id: Some(external_id.clone()),
                status_url: format!("fake://operations/{external_id}"),
            }));
        }
        Ok(CreateOutcome::Ready(
            Created::new(external_id.clone()).with_display_name(desired.spec.name.clone()),
        ))
    }

    async fn check_operation(
        &self,
        operation: &PendingOperation,
        _desired: &DesiredState,
    ) -> Result<PollState<Created>> {
        self.record(Call::CheckOperation);
        let left = self.pending_checks.load(Ordering::SeqCst);
        if left > 0 {
            self.pending_checks.store(left - 1, Ordering::SeqCst);
            return Ok(PollState::Pending);
        }
        let id = operation.external_id.clone().unwrap_or_default();
        Ok(PollState::Done(Created::new(id).with_derived("link", "fake://link")))
    }

    /// Asynchronous entities stay unusable until their pending checks run out
    async fn complete(&self, entity: &BackendEntity, _desired: &DesiredState) -> Result<Created> {
        self.record(Call::Complete(entity.external_id.clone()));
        let created =
            Created::new(entity.external_id.clone()).with_display_name(entity.display_name.clone());
        if !self.async_create.load(Ordering::SeqCst) {
            return Ok(created);
        }
        let left = self.pending_checks.load(Ordering::SeqCst);
        if left > 0 {
            self.pending_checks.store(left - 1, Ordering::SeqCst);
            return Err(Error::transient(format!("{} is still provisioning", entity.external_id)));
        }
        Ok(created.with_derived("link", "fake://link"))
    }

    async fn read(&self, entity: EntityRef<'_>) -> Result<Option<BackendEntity>> {
        self.record(Call::Read(entity.external_id.to_string()));
        Ok(self.has_entity(entity.external_id).then(|| BackendEntity {
            external_id: entity.external_id.to_string(),
            display_name: None,
        }))
    }

    async fn update(&self, entity: EntityRef<'_>, desired: &DesiredState) -> Result<()> {
        self.record(Call::Update(entity.external_id.to_string(), desired.clone()));
        if let Some(class) = *self.update_failure.lock().unwrap() {
            return Err(error_of(class));
        }
        if !self.has_entity(entity.external_id) {
            return Err(Error::not_found(entity.external_id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, entity: EntityRef<'_>) -> Result<()> {
        self.record(Call::Delete(entity.external_id.to_string()));
        if let Some(class) = *self.delete_failure.lock().unwrap() {
            return Err(error_of(class));
        }
        match self.entities.lock().unwrap().remove(entity.external_id) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(entity.external_id.to_string())),
        }
    }

    fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(1)
    }

    fn operation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(10)
    }
}

// ============================================================================
// Watch source
// ============================================================================

enum Entry {
    Event(ResourceEvent),
    Bookmark,
    /// 410 Gone, delivered once
    Expired,
    /// Stream error, delivered once
    Broken,
}

type OpenHook = Box<dyn Fn(usize) + Send + Sync>;

/// Replays a recorded event log from the requested resource version
pub struct FakeWatchSource {
    log: Mutex<Vec<(u64, Entry)>>,
    fired: Mutex<HashSet<u64>>,
    opened_with: Mutex<Vec<String>>,
    open_failures: AtomicU32,
    max_opens: usize,
    hang: AtomicBool,
    on_open: Mutex<Option<OpenHook>>,
    cancel: CancellationToken,
}

impl FakeWatchSource {
    /// The source cancels `cancel` once opened more than `max_opens` times
    pub fn new(cancel: CancellationToken, max_opens: usize) -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            fired: Mutex::new(HashSet::new()),
            opened_with: Mutex::new(Vec::new()),
            open_failures: AtomicU32::new(0),
            max_opens,
            hang: AtomicBool::new(false),
            on_open: Mutex::new(None),
            cancel,
        })
    }

    fn next_rv(&self) -> u64 {
        self.log.lock().unwrap().len() as u64 + 1
    }

    /// Append an event; its resource version is its position in the log
    pub fn push(&self, event_type: EventType, mut resource: ManagedResource) -> String {
        let rv = self.next_rv();
        resource.resource_version = rv.to_string();
        self.log
            .lock()
            .unwrap()
            .push((rv, Entry::Event(ResourceEvent::new(event_type, resource))));
        rv.to_string()
    }

    pub fn push_bookmark(&self) -> String {
        let rv = self.next_rv();
        self.log.lock().unwrap().push((rv, Entry::Bookmark));
        rv.to_string()
    }

    pub fn push_expired(&self) {
        let rv = self.next_rv();
        self.log.lock().unwrap().push((rv, Entry::Expired));
    }

    pub fn push_broken(&self) {
        let rv = self.next_rv();
        self.log.lock().unwrap().push((rv, Entry::Broken));
    }

    pub fn fail_opens(&self, count: u32) {
        self.open_failures.store(count, Ordering::SeqCst);
    }

    /// Keep streams open after the log is exhausted
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    /// Run `hook` with the 1-based open count on every open
    pub fn on_open(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_open.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn opened_with(&self) -> Vec<String> {
        self.opened_with.lock().unwrap().clone()
    }
}

#[async_trait]
impl WatchSource for FakeWatchSource {
    async fn watch(&self, resource_version: &str) -> Result<WatchStream> {
        let opens = {
            let mut opened = self.opened_with.lock().unwrap();
            opened.push(resource_version.to_string());
            opened.len()
        };
        if let Some(hook) = self.on_open.lock().unwrap().as_ref() {
            hook(opens);
        }
        if opens > self.max_opens {
            self.cancel.cancel();
            return Ok(futures::stream::empty().boxed());
        }
        if self.open_failures.load(Ordering::SeqCst) > 0 {
            self.open_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Watch("connection refused".into()));
        }

        let from = resource_version.parse::<u64>().unwrap_or(0);
        let mut items = Vec::new();
        let log = self.log.lock().unwrap();
        let mut fired = self.fired.lock().unwrap();
        for (rv, entry) in log.iter().filter(|(rv, _)| *rv > from) {
            match entry {
                Entry::Event(event) => items.push(Ok(WatchItem::Event(event.clone()))),
                Entry::Bookmark => items.push(Ok(WatchItem::Bookmark(rv.to_string()))),
                Entry::Expired | Entry::Broken if fired.contains(rv) => {}
                Entry::Expired => {
                    fired.insert(*rv);
                    items.push(Err(Error::Gone("too old resource version".into())));
                    break;
                }
                Entry::Broken => {
                    fired.insert(*rv);
                    items.push(Err(Error::Watch("stream reset".into())));
                    break;
                }
            }
        }

        let stream = futures::stream::iter(items);
        if self.hang.load(Ordering::SeqCst) {
            Ok(stream.chain(futures::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }
}
