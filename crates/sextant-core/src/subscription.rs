//! Change-notification engine shared by every backend.
//!
//! The engine turns a backend's point-in-time listing into a stream of
//! add/remove batches. Each subscribed service gets one polling task that
//! lives exactly as long as the service has at least one listener:
//!
//! - the first [`subscribe`](SubscriptionEngine::subscribe) for a name
//!   spawns the task,
//! - the last [`unsubscribe`](SubscriptionEngine::unsubscribe) cancels it
//!   before the subscription record is dropped.
//!
//! Each tick waits for the poll interval (cancellation always wins the
//! wait), fetches the instance list and diffs it against the previous
//! snapshot. The first successful fetch only seeds the snapshot, so
//! instances that already existed are not reported as new.
//!
//! A failed fetch skips the tick. Subscribers only learn about it through
//! [`NotifyListener::on_lookup_error`]; from the `on_notify` feed alone a
//! failing backend is indistinguishable from an unchanged one.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{deserialize_duration, PluginConfig};
use crate::error::{RegistryError, Result};
use crate::instance::{RegistrationStatus, ServerInstance, STATUS_DEREGISTER};
use crate::registry::Listener;

/// Point-in-time instance listing the engine polls.
#[async_trait]
pub trait InstanceSource: Send + Sync + 'static {
    /// Fetches every current instance of `service`.
    async fn fetch(&self, service: &str) -> Result<Vec<ServerInstance>>;
}

/// Polling cadence for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Wait between two successful polls.
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    /// Upper bound for the wait after consecutive failed polls.
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_backoff: Duration,
}

impl PollConfig {
    /// Polls every `interval` with no backoff on failure.
    #[must_use]
    pub const fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_backoff: interval,
        }
    }

    /// Sets the backoff ceiling.
    #[must_use]
    pub const fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Reads `poll` and `max_backoff` from a connection string, falling back
    /// to `defaults` for each. A zero `poll` is rejected.
    pub fn from_options(config: &PluginConfig, defaults: Self) -> Result<Self> {
        let interval = config.get_duration("poll", defaults.interval)?;
        if interval.is_zero() {
            return Err(RegistryError::InvalidConnectionString {
                input: config.as_str().to_owned(),
                reason: "poll must be greater than zero".to_owned(),
            });
        }

        Ok(Self {
            interval,
            max_backoff: config.get_duration("max_backoff", defaults.max_backoff)?,
        })
    }

    /// Wait before the next poll after `failures` consecutive failed polls.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.interval;
        }
        let ceiling = self.max_backoff.max(self.interval);
        self.interval
            .saturating_mul(1 << failures.min(16))
            .min(ceiling)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::every(Duration::from_secs(5)).with_max_backoff(Duration::from_secs(60))
    }
}

/// Instances of one service keyed by id.
pub type Snapshot = HashMap<String, ServerInstance>;

/// Difference between two consecutive snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    /// New instances and instances whose status changed.
    pub registered: Vec<ServerInstance>,
    /// Instances that disappeared, with status set to [`STATUS_DEREGISTER`].
    pub unregistered: Vec<ServerInstance>,
}

impl Changes {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.unregistered.is_empty()
    }
}

/// Computes the change batches between `previous` and `current`.
///
/// Batches are ordered by instance id.
#[must_use]
pub fn diff_snapshots(previous: &Snapshot, current: &Snapshot) -> Changes {
    let mut registered: Vec<ServerInstance> = current
        .iter()
        .filter(|(id, instance)| {
            previous
                .get(*id)
                .map_or(true, |old| old.status != instance.status)
        })
        .map(|(_, instance)| instance.clone())
        .collect();

    let mut unregistered: Vec<ServerInstance> = previous
        .iter()
        .filter(|(id, _)| !current.contains_key(*id))
        .map(|(_, instance)| {
            let mut gone = instance.clone();
            gone.status = STATUS_DEREGISTER.to_owned();
            gone
        })
        .collect();

    registered.sort_by(|a, b| a.id.cmp(&b.id));
    unregistered.sort_by(|a, b| a.id.cmp(&b.id));

    Changes {
        registered,
        unregistered,
    }
}

/// Listener set that callers mutate while a dispatch iterates a copy.
#[derive(Default)]
struct ListenerSet {
    listeners: Mutex<Vec<Listener>>,
}

impl ListenerSet {
    fn insert(&self, listener: Listener) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    fn remove(&self, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Listener> {
        self.listeners.lock().clone()
    }
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

struct Subscription {
    listeners: Arc<ListenerSet>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Per-service subscription table plus the polling tasks it owns.
pub struct SubscriptionEngine<S> {
    source: Arc<S>,
    config: PollConfig,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    root: CancellationToken,
}

impl<S: InstanceSource> SubscriptionEngine<S> {
    /// Creates an engine polling `source` with `config`.
    pub fn new(source: Arc<S>, config: PollConfig) -> Self {
        Self {
            source,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Returns the polling cadence.
    pub const fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Adds `listener` to `service`, starting its polling task if this is
    /// the first listener. Re-adding a listener is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, service: &str, listener: Listener) -> Result<()> {
        if self.root.is_cancelled() {
            return Err(RegistryError::ShutDown);
        }

        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.entry(service.to_owned()) {
            Entry::Occupied(entry) => {
                if !entry.get().listeners.insert(listener) {
                    debug!(service = %service, "listener already subscribed");
                }
            }
            Entry::Vacant(entry) => {
                let listeners = Arc::new(ListenerSet::default());
                listeners.insert(listener);

                let cancel = self.root.child_token();
                let task = PollTask {
                    service: service.to_owned(),
                    source: Arc::clone(&self.source),
                    listeners: Arc::clone(&listeners),
                    cancel: cancel.clone(),
                    config: self.config,
                };
                let task = tokio::spawn(task.run());

                info!(
                    service = %service,
                    interval_ms = self.config.interval.as_millis(),
                    "subscription started"
                );
                entry.insert(Subscription {
                    listeners,
                    cancel,
                    task,
                });
            }
        }

        Ok(())
    }

    /// Removes `listener` from `service`. Removing the last listener stops
    /// the polling task; no callbacks are made for this service afterwards.
    pub fn unsubscribe(&self, service: &str, listener: &Listener) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();

        let Some(subscription) = subscriptions.get(service) else {
            debug!(service = %service, "unsubscribe for unknown service");
            return Ok(());
        };

        if !subscription.listeners.remove(listener) {
            debug!(service = %service, "listener was not subscribed");
        }

        if subscription.listeners.is_empty() {
            subscription.cancel.cancel();
            subscriptions.remove(service);
            info!(service = %service, "subscription stopped");
        }

        Ok(())
    }

    /// Cancels every subscription.
    ///
    /// With `interrupt` the polling tasks are aborted where they stand;
    /// otherwise each finishes its current fetch and exits.
    pub async fn shutdown(&self, interrupt: bool) {
        self.root.cancel();

        let drained: Vec<(String, Subscription)> = self.subscriptions.lock().drain().collect();
        let mut tasks = Vec::with_capacity(drained.len());

        for (service, subscription) in drained {
            subscription.cancel.cancel();
            if interrupt {
                subscription.task.abort();
            }
            debug!(service = %service, interrupt, "subscription cancelled");
            tasks.push(subscription.task);
        }

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!(error = %e, "polling task ended abnormally");
                }
            }
        }
    }

    /// Names of every subscribed service, sorted.
    pub fn subscribed_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of listeners subscribed to `service`.
    pub fn listener_count(&self, service: &str) -> usize {
        self.subscriptions
            .lock()
            .get(service)
            .map_or(0, |s| s.listeners.len())
    }

    /// Returns true while a polling task for `service` is running.
    pub fn is_polling(&self, service: &str) -> bool {
        self.subscriptions
            .lock()
            .get(service)
            .is_some_and(|s| !s.task.is_finished())
    }
}

impl<S> Drop for SubscriptionEngine<S> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl<S> std::fmt::Debug for SubscriptionEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEngine")
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions.lock().len())
            .field("shut_down", &self.root.is_cancelled())
            .finish()
    }
}

/// Polling loop for one service.
struct PollTask<S> {
    service: String,
    source: Arc<S>,
    listeners: Arc<ListenerSet>,
    cancel: CancellationToken,
    config: PollConfig,
}

impl<S: InstanceSource> PollTask<S> {
    async fn run(self) {
        debug!(service = %self.service, "polling started");

        let mut snapshot: Option<Snapshot> = None;
        let mut failures: u32 = 0;

        loop {
            let delay = self.config.delay(failures);
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            let result = self.source.fetch(&self.service).await;
            if self.cancel.is_cancelled() {
                break;
            }

            let instances = match result {
                Ok(instances) => instances,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(
                        service = %self.service,
                        failures,
                        error = %e,
                        "lookup failed, skipping poll"
                    );
                    self.report_error(&e);
                    continue;
                }
            };
            failures = 0;

            let current: Snapshot = instances
                .into_iter()
                .map(|instance| (instance.id.clone(), instance))
                .collect();

            let Some(previous) = snapshot.take() else {
                debug!(service = %self.service, "initial snapshot taken");
                snapshot = Some(current);
                continue;
            };

            let changes = diff_snapshots(&previous, &current);
            snapshot = Some(current);

            if changes.is_empty() {
                continue;
            }

            debug!(
                service = %self.service,
                registered = changes.registered.len(),
                unregistered = changes.unregistered.len(),
                "instances changed"
            );
            self.dispatch(&changes);
        }

        debug!(service = %self.service, "polling stopped");
    }

    fn dispatch(&self, changes: &Changes) {
        for listener in self.listeners.snapshot() {
            if self.cancel.is_cancelled() {
                return;
            }
            if !changes.registered.is_empty() {
                self.notify(&listener, RegistrationStatus::Register, &changes.registered);
            }
            if !changes.unregistered.is_empty() {
                self.notify(
                    &listener,
                    RegistrationStatus::Unregister,
                    &changes.unregistered,
                );
            }
        }
    }

    fn notify(&self, listener: &Listener, status: RegistrationStatus, batch: &[ServerInstance]) {
        match std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_notify(status, batch))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(service = %self.service, %status, error = %e, "listener failed");
            }
            Err(panic) => {
                warn!(
                    service = %self.service,
                    %status,
                    panic = panic_message(panic.as_ref()),
                    "listener panicked"
                );
            }
        }
    }

    fn report_error(&self, error: &RegistryError) {
        for listener in self.listeners.snapshot() {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                listener.on_lookup_error(&self.service, error);
            }));
            if outcome.is_err() {
                warn!(service = %self.service, "listener panicked in error hook");
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
