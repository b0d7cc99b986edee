//! Background status polling.
//!
//! A [`Poller`] repeatedly queries one physical backend through a [`StatusSource`] and publishes
//! the result into a [`SnapshotCache`]. Pollers are shared between all queues that use the same
//! backend, see [`registry::PollerRegistry`].
pub mod aggregate;
pub mod condor;
pub mod panda;
pub mod pbs;
pub mod registry;
pub mod slurm;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::utils::time::now_monotonic;
use crate::poller::aggregate::StateMapping;
use crate::status::BackendIdentity;
use crate::status::cache::SnapshotCache;
use crate::status::snapshot::Snapshot;

pub type PollResult<T> = anyhow::Result<T>;

/// Backend specific part of a poller.
pub trait StatusSource<S: Snapshot>: Send + Sync {
    /// Issues the backend request (runs a status command, calls a remote API) and returns the
    /// raw response.
    fn query(&self) -> Pin<Box<dyn Future<Output = PollResult<Vec<u8>>> + Send + '_>>;

    /// Parses the raw response and aggregates its records.
    /// Malformed responses are reported as errors.
    fn parse(&self, raw: &[u8]) -> PollResult<S::Aggregate>;

    /// Table used to translate raw status codes into canonical states.
    fn state_mapping(&self) -> &StateMapping;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    /// How long to sleep between two queries.
    pub interval: Duration,
    /// Upper bound of a single query.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Querying,
    Parsing,
    Publishing,
    Sleeping,
    Stopped,
}

impl PollerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PollerState::Idle,
            1 => PollerState::Querying,
            2 => PollerState::Parsing,
            3 => PollerState::Publishing,
            4 => PollerState::Sleeping,
            _ => PollerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PollerState::Idle => 0,
            PollerState::Querying => 1,
            PollerState::Parsing => 2,
            PollerState::Publishing => 3,
            PollerState::Sleeping => 4,
            PollerState::Stopped => 5,
        }
    }
}

impl Display for PollerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PollerState::Idle => "idle",
            PollerState::Querying => "querying",
            PollerState::Parsing => "parsing",
            PollerState::Publishing => "publishing",
            PollerState::Sleeping => "sleeping",
            PollerState::Stopped => "stopped",
        })
    }
}

/// Counters shared between a poller handle and its task.
#[derive(Default)]
struct PollerCounters {
    state: AtomicU8,
    queries: AtomicU64,
    failures: AtomicU64,
    publishes: AtomicU64,
}

impl PollerCounters {
    fn set_state(&self, state: PollerState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerStats {
    pub state: PollerState,
    pub queries: u64,
    pub failures: u64,
    pub publishes: u64,
}

type PollTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handle of a background polling task.
///
/// The task is prepared on construction and spawned by [`Poller::start`]. Starting and
/// stopping are idempotent: the prepared task can be taken out only once and the
/// cancellation token ignores repeated cancellations.
pub struct Poller {
    identity: BackendIdentity,
    settings: PollerSettings,
    counters: Arc<PollerCounters>,
    token: CancellationToken,
    task: Mutex<Option<PollTask>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new<S: Snapshot>(
        identity: BackendIdentity,
        source: Box<dyn StatusSource<S>>,
        cache: Arc<SnapshotCache<S>>,
        settings: PollerSettings,
    ) -> Self {
        let counters = Arc::new(PollerCounters::default());
        let token = CancellationToken::new();
        let task = poll_loop(
            identity.clone(),
            source,
            cache,
            settings,
            counters.clone(),
            token.clone(),
        );
        Self {
            identity,
            settings,
            counters,
            token,
            task: Mutex::new(Some(Box::pin(task))),
            handle: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &BackendIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Spawns the polling task. Returns `false` if the poller was already started.
    /// Has to be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            return false;
        };
        log::debug!("Starting poller of {}", self.identity);
        *self.handle.lock() = Some(tokio::spawn(task));
        true
    }

    /// Signals the task to finish its current wait and exit.
    pub fn stop(&self) {
        self.token.cancel();
        // A poller that was never started has nothing to run anymore
        self.task.lock().take();
    }

    /// Waits until the task finishes, aborting it if it does not finish within `timeout`.
    pub async fn join(&self, timeout: Duration) {
        let handle = self.handle.lock().take();
        let Some(mut handle) = handle else {
            if self.token.is_cancelled() {
                self.counters.set_state(PollerState::Stopped);
            }
            return;
        };
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => log::debug!("Poller of {} has finished", self.identity),
            Ok(Err(error)) => log::error!("Poller of {} has crashed: {error:?}", self.identity),
            Err(_) => {
                log::warn!(
                    "Poller of {} did not stop within {}, aborting it",
                    self.identity,
                    humantime::format_duration(timeout)
                );
                handle.abort();
            }
        }
        self.counters.set_state(PollerState::Stopped);
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            state: PollerState::from_u8(self.counters.state.load(Ordering::Relaxed)),
            queries: self.counters.queries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            publishes: self.counters.publishes.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Main loop of a poller: query, parse, publish, sleep, until cancelled.
async fn poll_loop<S: Snapshot>(
    identity: BackendIdentity,
    source: Box<dyn StatusSource<S>>,
    cache: Arc<SnapshotCache<S>>,
    settings: PollerSettings,
    counters: Arc<PollerCounters>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = poll_once(&identity, source.as_ref(), &cache, &settings, &counters) => {}
        }

        counters.set_state(PollerState::Sleeping);
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(settings.interval) => {}
        }
        counters.set_state(PollerState::Idle);
    }
    counters.set_state(PollerState::Stopped);
    log::debug!("Poller of {identity} has been stopped");
}

/// One pass of the poller. Failures are logged and leave the previously published snapshot
/// in place.
async fn poll_once<S: Snapshot>(
    identity: &BackendIdentity,
    source: &dyn StatusSource<S>,
    cache: &SnapshotCache<S>,
    settings: &PollerSettings,
    counters: &PollerCounters,
) {
    counters.set_state(PollerState::Querying);
    counters.queries.fetch_add(1, Ordering::Relaxed);

    let raw = match tokio::time::timeout(settings.timeout, source.query()).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(error)) => {
            log::error!("Status query of {identity} failed: {error:?}");
            counters.failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
        Err(_) => {
            log::error!(
                "Status query of {identity} timed out after {}",
                humantime::format_duration(settings.timeout)
            );
            counters.failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    counters.set_state(PollerState::Parsing);
    let aggregate = match source.parse(&raw) {
        Ok(aggregate) => aggregate,
        Err(error) => {
            log::error!("Cannot parse status of {identity}: {error:?}");
            counters.failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    counters.set_state(PollerState::Publishing);
    let snapshot = S::publish(aggregate, source.state_mapping(), now_monotonic());
    cache.put(identity, snapshot);
    counters.publishes.fetch_add(1, Ordering::Relaxed);
    log::debug!("Published status snapshot of {identity}");
}
