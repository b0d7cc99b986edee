use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::poller::{PollResult, Poller, PollerSettings, StatusSource};
use crate::status::BackendIdentity;
use crate::status::cache::SnapshotCache;
use crate::status::snapshot::Snapshot;
use crate::{Map, Set};

/// Resolves backend identities to running pollers.
///
/// Every distinct identity gets exactly one poller, no matter how many queues refer to it.
/// The registry lock is held only while looking up or constructing a poller; the first query
/// of a new poller runs in its own task.
pub struct PollerRegistry<S: Snapshot> {
    cache: Arc<SnapshotCache<S>>,
    pollers: Mutex<Map<BackendIdentity, Arc<Poller>>>,
}

impl<S: Snapshot> Default for PollerRegistry<S> {
    fn default() -> Self {
        Self::new(Arc::new(SnapshotCache::new()))
    }
}

impl<S: Snapshot> PollerRegistry<S> {
    pub fn new(cache: Arc<SnapshotCache<S>>) -> Self {
        Self {
            cache,
            pollers: Default::default(),
        }
    }

    pub fn cache(&self) -> &Arc<SnapshotCache<S>> {
        &self.cache
    }

    /// Returns the poller of `identity`, creating and starting it if it does not exist yet.
    ///
    /// `factory` is invoked only when a new poller has to be created. It must not perform any
    /// I/O, as it runs under the registry lock.
    pub fn get_or_create<F>(
        &self,
        identity: &BackendIdentity,
        settings: PollerSettings,
        factory: F,
    ) -> PollResult<Arc<Poller>>
    where
        F: FnOnce() -> PollResult<Box<dyn StatusSource<S>>>,
    {
        let mut pollers = self.pollers.lock();
        if let Some(poller) = pollers.get(identity) {
            if poller.settings() != &settings {
                log::warn!(
                    "Poller of {identity} is shared, keeping its settings {:?}",
                    poller.settings()
                );
            }
            return Ok(poller.clone());
        }

        let source = factory()?;
        let poller = Arc::new(Poller::new(
            identity.clone(),
            source,
            self.cache.clone(),
            settings,
        ));
        poller.start();
        log::info!(
            "Started poller of {identity} (interval {}, timeout {})",
            humantime::format_duration(settings.interval),
            humantime::format_duration(settings.timeout)
        );
        pollers.insert(identity.clone(), poller.clone());
        Ok(poller)
    }

    pub fn get(&self, identity: &BackendIdentity) -> Option<Arc<Poller>> {
        self.pollers.lock().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.pollers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pollers.lock().is_empty()
    }

    pub fn pollers(&self) -> Vec<Arc<Poller>> {
        self.pollers.lock().values().cloned().collect()
    }

    /// Stops pollers whose identity is not in `used` and forgets their snapshots.
    pub async fn retain(&self, used: &Set<BackendIdentity>, timeout: Duration) {
        let removed: Vec<Arc<Poller>> = {
            let mut pollers = self.pollers.lock();
            let unused: Vec<BackendIdentity> = pollers
                .keys()
                .filter(|identity| !used.contains(*identity))
                .cloned()
                .collect();
            unused
                .iter()
                .filter_map(|identity| pollers.remove(identity))
                .collect()
        };
        for poller in &removed {
            log::info!("Stopping unused poller of {}", poller.identity());
        }
        stop_pollers(&removed, timeout).await;
        for poller in &removed {
            self.cache.remove(poller.identity());
        }
    }

    /// Stops pollers that are wanted with other settings than they run with, so that the next
    /// [`PollerRegistry::get_or_create`] starts a replacement. Their snapshots stay in the cache.
    pub async fn stop_changed(
        &self,
        wanted: &Map<BackendIdentity, PollerSettings>,
        timeout: Duration,
    ) {
        let changed: Vec<Arc<Poller>> = {
            let mut pollers = self.pollers.lock();
            let changed: Vec<BackendIdentity> = pollers
                .iter()
                .filter(|(identity, poller)| {
                    wanted
                        .get(*identity)
                        .is_some_and(|settings| settings != poller.settings())
                })
                .map(|(identity, _)| identity.clone())
                .collect();
            changed
                .iter()
                .filter_map(|identity| pollers.remove(identity))
                .collect()
        };
        for poller in &changed {
            log::info!(
                "Settings of poller of {} have changed, restarting it",
                poller.identity()
            );
        }
        stop_pollers(&changed, timeout).await;
    }

    /// Stops every poller and waits (at most `timeout` for each) until they finish.
    pub async fn stop_all(&self, timeout: Duration) {
        let pollers: Vec<Arc<Poller>> = {
            let mut pollers = self.pollers.lock();
            pollers.drain().map(|(_, poller)| poller).collect()
        };
        stop_pollers(&pollers, timeout).await;
    }
}

async fn stop_pollers(pollers: &[Arc<Poller>], timeout: Duration) {
    // Signal everything first so that the waits overlap
    for poller in pollers {
        poller.stop();
    }
    futures::future::join_all(pollers.iter().map(|poller| poller.join(timeout))).await;
}
