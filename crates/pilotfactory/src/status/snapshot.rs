use std::time::Instant;

use crate::Map;
use crate::poller::aggregate::{BatchAggregate, StateMapping, WmsAggregate};
use crate::status::{ServiceStatus, StateCounts};

/// Immutable, timestamped status reading published by a poller.
pub trait Snapshot: Send + Sync + 'static {
    /// Intermediate form produced by parsing a backend response.
    type Aggregate: Send + 'static;

    /// Maps raw status codes of the aggregate into canonical states.
    fn publish(aggregate: Self::Aggregate, mapping: &StateMapping, captured_at: Instant) -> Self;

    fn captured_at(&self) -> Instant;
}

/// Pilots known to one batch backend, grouped by the queue they were submitted for.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    captured_at: Instant,
    queues: Map<String, StateCounts>,
}

impl BatchSnapshot {
    pub fn new(captured_at: Instant, queues: Map<String, StateCounts>) -> Self {
        Self {
            captured_at,
            queues,
        }
    }

    /// Pilot counts of a single queue.
    /// A queue without any pilot on the backend is simply missing from the snapshot.
    pub fn queue(&self, queue: &str) -> StateCounts {
        self.queues.get(queue).copied().unwrap_or_default()
    }

    /// Pilot counts summed over every queue served by the backend.
    pub fn total(&self) -> StateCounts {
        let mut total = StateCounts::default();
        for counts in self.queues.values() {
            total.merge(counts);
        }
        total
    }

    pub fn queues(&self) -> impl Iterator<Item = (&str, &StateCounts)> {
        self.queues.iter().map(|(name, counts)| (name.as_str(), counts))
    }
}

impl Snapshot for BatchSnapshot {
    type Aggregate = BatchAggregate;

    fn publish(aggregate: BatchAggregate, mapping: &StateMapping, captured_at: Instant) -> Self {
        let queues = aggregate
            .into_iter()
            .map(|(queue, histogram)| {
                let counts = mapping.apply(&histogram);
                (queue, counts)
            })
            .collect();
        BatchSnapshot::new(captured_at, queues)
    }

    fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

#[derive(Debug, Clone)]
pub struct SiteRecord {
    pub cloud: Option<String>,
    pub status: ServiceStatus,
    pub jobs: StateCounts,
}

/// Work waiting in the WMS, per site, together with site and cloud operational status.
#[derive(Debug, Clone)]
pub struct WmsSnapshot {
    captured_at: Instant,
    sites: Map<String, SiteRecord>,
    clouds: Map<String, ServiceStatus>,
}

impl WmsSnapshot {
    pub fn new(
        captured_at: Instant,
        sites: Map<String, SiteRecord>,
        clouds: Map<String, ServiceStatus>,
    ) -> Self {
        Self {
            captured_at,
            sites,
            clouds,
        }
    }

    pub fn site(&self, site: &str) -> Option<&SiteRecord> {
        self.sites.get(site)
    }

    pub fn cloud_status(&self, cloud: &str) -> Option<ServiceStatus> {
        self.clouds.get(cloud).copied()
    }

    /// Jobs of the site in each canonical state; empty if the WMS does not know the site.
    pub fn site_jobs(&self, site: &str) -> StateCounts {
        self.sites
            .get(site)
            .map(|record| record.jobs)
            .unwrap_or_default()
    }

    /// Combined status of a site and its cloud, the worse of the two wins.
    ///
    /// `cloud` overrides the cloud recorded for the site by the WMS.
    /// Returns `None` when the site is unknown.
    pub fn operational_status(&self, site: &str, cloud: Option<&str>) -> Option<ServiceStatus> {
        let record = self.sites.get(site)?;
        let cloud = cloud.or(record.cloud.as_deref());
        let cloud_status = cloud.and_then(|cloud| self.cloud_status(cloud));
        Some(match cloud_status {
            Some(cloud_status) => record.status.worst(cloud_status),
            None => record.status,
        })
    }
}

impl Snapshot for WmsSnapshot {
    type Aggregate = WmsAggregate;

    fn publish(aggregate: WmsAggregate, mapping: &StateMapping, captured_at: Instant) -> Self {
        let WmsAggregate { sites, clouds } = aggregate;
        let sites = sites
            .into_iter()
            .map(|(name, site)| {
                let status = site
                    .status
                    .as_deref()
                    .map(ServiceStatus::from_raw)
                    .unwrap_or(ServiceStatus::Online);
                let record = SiteRecord {
                    cloud: site.cloud,
                    status,
                    jobs: mapping.apply(&site.jobs),
                };
                (name, record)
            })
            .collect();
        let clouds = clouds
            .into_iter()
            .map(|(name, status)| (name, ServiceStatus::from_raw(&status)))
            .collect();
        WmsSnapshot::new(captured_at, sites, clouds)
    }

    fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{BatchSnapshot, SiteRecord, WmsSnapshot};
    use crate::Map;
    use crate::status::{CanonicalState, ServiceStatus, StateCounts};
    use std::time::Instant;

    pub fn batch_snapshot(queues: &[(&str, u64, u64)]) -> BatchSnapshot {
        let queues: Map<String, StateCounts> = queues
            .iter()
            .map(|&(name, pending, running)| {
                let counts = [
                    (CanonicalState::Pending, pending),
                    (CanonicalState::Running, running),
                ]
                .into_iter()
                .collect();
                (name.to_string(), counts)
            })
            .collect();
        BatchSnapshot::new(Instant::now(), queues)
    }

    pub fn wms_snapshot(
        sites: &[(&str, &str, ServiceStatus, u64)],
        clouds: &[(&str, ServiceStatus)],
    ) -> WmsSnapshot {
        let sites: Map<String, SiteRecord> = sites
            .iter()
            .map(|&(name, cloud, status, ready)| {
                let record = SiteRecord {
                    cloud: Some(cloud.to_string()),
                    status,
                    jobs: [(CanonicalState::Ready, ready)].into_iter().collect(),
                };
                (name.to_string(), record)
            })
            .collect();
        let clouds: Map<String, ServiceStatus> = clouds
            .iter()
            .map(|&(name, status)| (name.to_string(), status))
            .collect();
        WmsSnapshot::new(Instant::now(), sites, clouds)
    }

    #[test]
    fn batch_total_sums_queues() {
        let snapshot = batch_snapshot(&[("a", 1, 2), ("b", 3, 4)]);
        assert_eq!(snapshot.total().in_flight(), 10);
        assert_eq!(snapshot.queue("a").get(CanonicalState::Running), 2);
        assert!(snapshot.queue("missing").is_empty());
    }

    #[test]
    fn operational_status_combines_cloud() {
        let snapshot = wms_snapshot(
            &[
                ("SITE_A", "US", ServiceStatus::Online, 5),
                ("SITE_B", "DE", ServiceStatus::Test, 0),
            ],
            &[("US", ServiceStatus::Offline), ("DE", ServiceStatus::Online)],
        );
        assert_eq!(
            snapshot.operational_status("SITE_A", None),
            Some(ServiceStatus::Offline)
        );
        assert_eq!(
            snapshot.operational_status("SITE_B", None),
            Some(ServiceStatus::Test)
        );
        assert_eq!(
            snapshot.operational_status("SITE_A", Some("DE")),
            Some(ServiceStatus::Online)
        );
        assert_eq!(snapshot.operational_status("SITE_C", None), None);
    }
}
