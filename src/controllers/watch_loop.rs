//! Resumable watch loop driving one reconciler
//!
//! Events are processed one at a time, in stream order. The cursor moves
//! past an event only once its reconcile finished with an outcome that does
//! not need a retry; retryable failures leave the cursor in place so the
//! event is delivered again after a reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ResourceCursor;
use crate::error::{Error, ErrorClass, Result};
use crate::metrics;
use crate::reconcilers::Reconciler;
use crate::resource::ResourceEvent;

/// One item read from a watch stream
#[derive(Debug)]
pub enum WatchItem {
    /// A lifecycle event to reconcile
    Event(ResourceEvent),
    /// Progress marker carrying only a resource version
    Bookmark(String),
    /// An object that could not be decoded; skipped
    Invalid { resource_version: String, error: Error },
}

/// Stream of watch items
pub type WatchStream = BoxStream<'static, Result<WatchItem>>;

/// Source of lifecycle events for one kind
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Open a stream of events newer than `resource_version`
    ///
    /// An empty resource version replays the current state of every
    /// resource before delivering live events.
    async fn watch(&self, resource_version: &str) -> Result<WatchStream>;
}

/// Watch loop tuning
#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Stream failures tolerated in a row before `run` gives up
    pub max_consecutive_failures: u32,
    /// Deferrals of one resource before it is recorded as failed
    ///
    /// Events are processed in order, so a deferred resource also holds back
    /// every later event of its kind, for up to about
    /// `max_deferrals * max_backoff`.
    pub max_deferrals: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            max_consecutive_failures: 10,
            max_deferrals: 30,
        }
    }
}

/// Exponential backoff with jitter
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt, between half and one and a half times the base
    fn next_delay(&mut self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = Duration::from_secs_f64(self.current.as_secs_f64() * jitter).min(self.max);
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// How a stream session ended
enum StreamEnd {
    /// The server closed the stream cleanly
    Closed,
    /// The stream failed
    Failed(Error),
    /// An event must be retried later
    Deferred,
    /// Shutdown requested
    Cancelled,
}

/// What to do with the cursor after dispatching an event
enum Disposition {
    Advance,
    Retry,
}

/// Drives a [`Reconciler`] from a [`WatchSource`]
pub struct WatchLoop {
    source: Arc<dyn WatchSource>,
    reconciler: Reconciler,
    cursor: ResourceCursor,
    config: WatchConfig,
    cancel: CancellationToken,
    backoff: Backoff,
    /// Consecutive deferrals per resource uid
    deferrals: HashMap<String, u32>,
}

impl WatchLoop {
    pub fn new(
        source: Arc<dyn WatchSource>,
        reconciler: Reconciler,
        config: WatchConfig,
        cancel: CancellationToken,
    ) -> Self {
        let cursor = ResourceCursor::new(reconciler.kind());
        let backoff = Backoff::new(config.initial_backoff, config.max_backoff);
        Self {
            source,
            reconciler,
            cursor,
            config,
            cancel,
            backoff,
            deferrals: HashMap::new(),
        }
    }

    pub fn cursor(&self) -> &ResourceCursor {
        &self.cursor
    }

    /// Watch until cancelled
    ///
    /// Returns an error only when the stream failed more than
    /// `max_consecutive_failures` times in a row.
    pub async fn run(&mut self) -> Result<()> {
        let kind = self.reconciler.kind();
        let mut failures = 0u32;

        info!(kind = %kind, "Starting watch loop");
        while !self.cancel.is_cancelled() {
            let opened = self.source.watch(self.cursor.resource_version()).await;
            let end = match opened {
                Ok(stream) => {
                    metrics::set_ready(true);
                    debug!(kind = %kind, from = %self.cursor.resource_version(), "Watch opened");
                    self.drain(stream, &mut failures).await
                }
                Err(e) => StreamEnd::Failed(e),
            };

            let reason = match end {
                StreamEnd::Cancelled => break,
                StreamEnd::Closed => {
                    debug!(kind = %kind, "Watch stream ended, reconnecting");
                    metrics::WATCH_RESTARTS
                        .with_label_values(&[kind.as_str(), "closed"])
                        .inc();
                    self.backoff.reset();
                    continue;
                }
                StreamEnd::Deferred => "deferred",
                StreamEnd::Failed(e) => {
                    failures += 1;
                    if e.is_gone() {
                        warn!(kind = %kind, "Watch cursor expired, replaying from scratch");
                        self.cursor.reset();
                    } else {
                        warn!(kind = %kind, error = %e, failures, "Watch stream failed");
                    }
                    if failures > self.config.max_consecutive_failures {
                        error!(kind = %kind, failures, "Watch keeps failing, giving up");
                        metrics::OPERATOR_HEALTH.set(0.0);
                        metrics::set_ready(false);
                        return Err(Error::Watch(format!(
                            "{failures} consecutive watch failures, last: {e}"
                        )));
                    }
                    "failed"
                }
            };

            metrics::WATCH_RESTARTS
                .with_label_values(&[kind.as_str(), reason])
                .inc();
            let delay = self.backoff.next_delay();
            debug!(kind = %kind, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(kind = %kind, "Watch loop stopped");
        Ok(())
    }

    /// Process one stream until it ends or an event must be retried
    async fn drain(&mut self, mut stream: WatchStream, failures: &mut u32) -> StreamEnd {
        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => return StreamEnd::Cancelled,
                item = stream.next() => item,
            };

            match item {
                None => return StreamEnd::Closed,
                Some(Err(e)) => return StreamEnd::Failed(e),
                Some(Ok(WatchItem::Bookmark(resource_version))) => {
                    self.cursor.advance(&resource_version);
                }
                Some(Ok(WatchItem::Invalid {
                    resource_version,
                    error,
                })) => {
                    error!(
                        kind = %self.reconciler.kind(),
                        resource_version = %resource_version,
                        error = %error,
                        "Skipping undecodable object"
                    );
                    self.cursor.advance(&resource_version);
                }
                Some(Ok(WatchItem::Event(event))) => match self.dispatch(&event).await {
                    Disposition::Advance => {
                        *failures = 0;
                        self.backoff.reset();
                        self.cursor.advance(&event.resource.resource_version);
                    }
                    Disposition::Retry => return StreamEnd::Deferred,
                },
            }
        }
    }

    async fn dispatch(&mut self, event: &ResourceEvent) -> Disposition {
        let uid = &event.resource.uid;
        let error = match self.reconciler.reconcile(event).await {
            Ok(outcome) => {
                debug!(name = %event.resource.name, outcome = outcome.as_str(), "Event reconciled");
                self.deferrals.remove(uid);
                return Disposition::Advance;
            }
            Err(e) => e,
        };

        let name = &event.resource.name;
        match error.class() {
            // Backend 404s are reported as permanent by the reconciler, so
            // this is the Kubernetes resource being deleted mid-reconcile
            ErrorClass::NotFound => {
                info!(name = %name, error = %error, "Resource vanished, skipping event");
                self.deferrals.remove(uid);
                Disposition::Advance
            }
            ErrorClass::Permanent => {
                error!(name = %name, error = %error, "Reconcile failed permanently");
                self.deferrals.remove(uid);
                self.record(event, &error, false).await;
                Disposition::Advance
            }
            ErrorClass::Transient | ErrorClass::DependencyUnresolved => {
                if matches!(error, Error::Cancelled) {
                    return Disposition::Retry;
                }
                let count = self.deferrals.entry(uid.clone()).or_insert(0);
                *count += 1;
                let count = *count;
                metrics::DEFERRALS
                    .with_label_values(&[self.reconciler.kind().as_str()])
                    .inc();

                if count > self.config.max_deferrals {
                    error!(name = %name, deferrals = count, error = %error, "Giving up on resource");
                    self.deferrals.remove(uid);
                    self.record(event, &error, true).await;
                    return Disposition::Advance;
                }

                warn!(name = %name, deferrals = count, error = %error, "Deferring event");
                self.record(event, &error, false).await;
                Disposition::Retry
            }
        }
    }

    async fn record(&self, event: &ResourceEvent, error: &Error, exhausted: bool) {
        if let Err(e) = self.reconciler.record_failure(event, error, exhausted).await {
            warn!(name = %event.resource.name, error = %e, "Could not record failure on status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(60));
        let mut previous_base = Duration::from_millis(500);
        for _ in 0..12 {
            let delay = backoff.next_delay();
            assert!(delay >= previous_base / 2);
            assert!(delay <= Duration::from_secs(60));
            previous_base = (previous_base * 2).min(Duration::from_secs(60));
        }
        assert_eq!(backoff.current, Duration::from_secs(60));

        backoff.reset();
        assert_eq!(backoff.current, Duration::from_millis(500));
    }
}
