use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::common::utils::time::format_duration;
use crate::config::QueueConfig;
use crate::poller::Poller;
use crate::schedule::pipeline::SchedulingPipeline;
use crate::schedule::{Decision, SchedulingContext};
use crate::status::BackendIdentity;
use crate::status::cache::SnapshotCache;
use crate::status::snapshot::{BatchSnapshot, Snapshot, WmsSnapshot};
use crate::submit::{SubmissionReceipt, Submitter};

/// Connection of a queue to the shared poller and cache of one backend.
pub struct BackendBinding<S: Snapshot> {
    poller: Arc<Poller>,
    cache: Arc<SnapshotCache<S>>,
    max_age: Duration,
}

impl<S: Snapshot> BackendBinding<S> {
    pub fn new(poller: Arc<Poller>, cache: Arc<SnapshotCache<S>>, max_age: Duration) -> Self {
        Self {
            poller,
            cache,
            max_age,
        }
    }

    pub fn identity(&self) -> &BackendIdentity {
        self.poller.identity()
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    /// Latest snapshot that is not older than the configured max age.
    pub fn latest(&self) -> Option<Arc<S>> {
        self.cache.get(self.poller.identity(), self.max_age)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing had to be submitted.
    Idle,
    Submitted(SubmissionReceipt),
    Failed(String),
}

impl Display for CycleOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::Idle => f.write_str("idle"),
            CycleOutcome::Submitted(receipt) => write!(f, "submitted {receipt}"),
            CycleOutcome::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}

/// Runtime statistics of a queue. They survive configuration reloads.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub last_cycle: Option<u64>,
    pub last_decision: Option<Decision>,
    pub last_outcome: Option<CycleOutcome>,
    pub consecutive_failures: u64,
    pub total_submitted: u64,
}

impl QueueStats {
    fn record(&mut self, cycle: u64, decision: Decision, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Idle => {}
            CycleOutcome::Submitted(receipt) => {
                self.consecutive_failures = 0;
                self.total_submitted += receipt.submitted;
            }
            CycleOutcome::Failed(_) => self.consecutive_failures += 1,
        }
        self.last_cycle = Some(cycle);
        self.last_decision = Some(decision);
        self.last_outcome = Some(outcome.clone());
    }
}

/// Per-cycle orchestration of a single queue.
pub struct QueueController {
    config: QueueConfig,
    pipeline: SchedulingPipeline,
    submitter: Arc<dyn Submitter>,
    wms: BackendBinding<WmsSnapshot>,
    batch: BackendBinding<BatchSnapshot>,
    stats: QueueStats,
}

impl QueueController {
    pub fn new(
        config: QueueConfig,
        submitter: Arc<dyn Submitter>,
        wms: BackendBinding<WmsSnapshot>,
        batch: BackendBinding<BatchSnapshot>,
        stats: QueueStats,
    ) -> Self {
        let pipeline = SchedulingPipeline::from_kinds(&config.policies);
        Self {
            config,
            pipeline,
            submitter,
            wms,
            batch,
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &SchedulingPipeline {
        &self.pipeline
    }

    pub fn wms_identity(&self) -> &BackendIdentity {
        self.wms.identity()
    }

    pub fn batch_identity(&self) -> &BackendIdentity {
        self.batch.identity()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn into_stats(self) -> QueueStats {
        self.stats
    }

    /// Computes the number of pilots for `cycle` from the latest usable snapshots.
    pub fn decide(&self, cycle: u64) -> Decision {
        let wms = self.wms.latest();
        let batch = self.batch.latest();
        if wms.is_none() {
            log::debug!(
                "queue {}: no usable status of {}",
                self.config.name,
                self.wms.identity()
            );
        }
        if batch.is_none() {
            log::debug!(
                "queue {}: no usable status of {}",
                self.config.name,
                self.batch.identity()
            );
        }

        let ctx = SchedulingContext::new(&self.config, wms.as_deref(), batch.as_deref(), cycle);
        if let Some(status) = ctx.site_status().filter(|status| status.is_down()) {
            return Decision::short_circuit(
                self.config.policy.offline_quota,
                format!(
                    "site {} is {status}, using offline quota {}",
                    self.config.site, self.config.policy.offline_quota
                ),
            );
        }
        self.pipeline.run(&ctx)
    }

    /// Decides and submits. Submission failures are recorded and not retried in this cycle.
    pub async fn run_cycle(&mut self, cycle: u64, submit_timeout: Duration) -> CycleOutcome {
        let decision = self.decide(cycle);
        let name = &self.config.name;
        log::debug!("queue {name}: cycle {cycle}, decision {decision}");

        let outcome = if decision.count == 0 {
            log::info!(
                "queue {name}: nothing to submit ({})",
                decision.trace.last().map(|t| t.as_str()).unwrap_or("no stages")
            );
            CycleOutcome::Idle
        } else {
            log::info!("queue {name}: submitting {} pilot(s)", decision.count);
            let submission = self.submitter.submit(&self.config, decision.count);
            match tokio::time::timeout(submit_timeout, submission).await {
                Ok(Ok(receipt)) => {
                    log::info!("queue {name}: submitted {receipt}");
                    CycleOutcome::Submitted(receipt)
                }
                Ok(Err(error)) => {
                    log::error!("queue {name}: submission failed: {error:?}");
                    CycleOutcome::Failed(format!("{error:#}"))
                }
                Err(_) => {
                    let message = format!(
                        "submission timed out after {}",
                        format_duration(submit_timeout)
                    );
                    log::error!("queue {name}: {message}");
                    CycleOutcome::Failed(message)
                }
            }
        };
        self.stats.record(cycle, decision, &outcome);
        outcome
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::{BackendBinding, CycleOutcome, QueueController, QueueStats};
    use crate::Map;
    use crate::common::utils::time::mock_time::MockTime;
    use crate::config::QueueConfig;
    use crate::config::tests::TestQueueBuilder;
    use crate::poller::aggregate::{PANDA_STATES, StateMapping, WmsAggregate};
    use crate::poller::tests::{ScriptedSource, settings};
    use crate::poller::{PollResult, Poller, StatusSource};
    use crate::schedule::policy::PolicyKind;
    use crate::status::ServiceStatus;
    use crate::status::cache::SnapshotCache;
    use crate::status::snapshot::tests::{batch_snapshot, wms_snapshot};
    use crate::status::snapshot::{BatchSnapshot, WmsSnapshot};
    use crate::submit::{SubmissionReceipt, SubmitResult, Submitter};

    /// Records every submission; fails when `fail` is set, hangs when `hang` is set.
    #[derive(Default)]
    pub struct RecordingSubmitter {
        pub calls: Mutex<Vec<(String, u64)>>,
        pub fail: bool,
        pub hang: bool,
    }

    impl Submitter for RecordingSubmitter {
        fn submit(
            &self,
            queue: &QueueConfig,
            count: u64,
        ) -> Pin<Box<dyn Future<Output = SubmitResult<SubmissionReceipt>> + Send>> {
            self.calls.lock().push((queue.name.clone(), count));
            let (fail, hang) = (self.fail, self.hang);
            Box::pin(async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                if fail {
                    anyhow::bail!("batch system refused the submission");
                }
                Ok(SubmissionReceipt {
                    submitted: count,
                    detail: None,
                })
            })
        }
    }

    struct Fixture {
        wms_cache: Arc<SnapshotCache<WmsSnapshot>>,
        batch_cache: Arc<SnapshotCache<BatchSnapshot>>,
        submitter: Arc<RecordingSubmitter>,
        controller: QueueController,
    }

    /// Controller whose pollers are never started; snapshots are put into the caches directly.
    fn fixture(queue: QueueConfig, submitter: RecordingSubmitter) -> Fixture {
        let wms_cache: Arc<SnapshotCache<WmsSnapshot>> = Arc::new(SnapshotCache::new());
        let batch_cache: Arc<SnapshotCache<BatchSnapshot>> = Arc::new(SnapshotCache::new());
        let wms_poller = Arc::new(Poller::new::<WmsSnapshot>(
            queue.wms.identity(),
            Box::new(IdleWmsSource),
            wms_cache.clone(),
            settings(1),
        ));
        let batch_poller = Arc::new(Poller::new::<BatchSnapshot>(
            queue.batch.identity(),
            Box::new(ScriptedSource::new(vec![Some("")])),
            batch_cache.clone(),
            settings(1),
        ));
        let wms = BackendBinding::new(wms_poller, wms_cache.clone(), queue.wms_poll.max_age);
        let batch = BackendBinding::new(
            batch_poller,
            batch_cache.clone(),
            queue.batch_poll.max_age,
        );
        let submitter = Arc::new(submitter);
        let controller = QueueController::new(
            queue,
            submitter.clone(),
            wms,
            batch,
            QueueStats::default(),
        );
        Fixture {
            wms_cache,
            batch_cache,
            submitter,
            controller,
        }
    }

    struct IdleWmsSource;

    impl StatusSource<WmsSnapshot> for IdleWmsSource {
        fn query(&self) -> Pin<Box<dyn Future<Output = PollResult<Vec<u8>>> + Send + '_>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn parse(&self, _raw: &[u8]) -> PollResult<WmsAggregate> {
            Ok(Default::default())
        }

        fn state_mapping(&self) -> &StateMapping {
            &PANDA_STATES
        }
    }

    impl Fixture {
        fn publish(&self, wms: Option<WmsSnapshot>, batch: Option<BatchSnapshot>) {
            let config = self.controller.config();
            if let Some(wms) = wms {
                self.wms_cache.put(&config.wms.identity(), wms);
            }
            if let Some(batch) = batch {
                self.batch_cache.put(&config.batch.identity(), batch);
            }
        }
    }

    #[tokio::test]
    async fn submits_demand() {
        let mut fixture = fixture(TestQueueBuilder::default().build(), Default::default());
        fixture.publish(
            Some(wms_snapshot(&[("SITE_A", "US", ServiceStatus::Online, 50)], &[])),
            Some(batch_snapshot(&[("SITE_A", 10, 5)])),
        );
        let outcome = fixture
            .controller
            .run_cycle(1, Duration::from_secs(1))
            .await;
        assert!(matches!(outcome, CycleOutcome::Submitted(ref r) if r.submitted == 40));
        assert_eq!(
            *fixture.submitter.calls.lock(),
            vec![("SITE_A".to_string(), 40)]
        );
        let stats = fixture.controller.stats();
        assert_eq!(stats.total_submitted, 40);
        assert_eq!(stats.last_cycle, Some(1));
    }

    #[tokio::test]
    async fn zero_is_not_submitted() {
        let mut fixture = fixture(TestQueueBuilder::default().build(), Default::default());
        fixture.publish(
            Some(wms_snapshot(&[("SITE_A", "US", ServiceStatus::Online, 5)], &[])),
            Some(batch_snapshot(&[("SITE_A", 10, 5)])),
        );
        let outcome = fixture
            .controller
            .run_cycle(1, Duration::from_secs(1))
            .await;
        assert_eq!(outcome, CycleOutcome::Idle);
        assert!(fixture.submitter.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_snapshots_use_default() {
        let queue = TestQueueBuilder::default().default_count(3).build();
        let mut fixture = fixture(queue, Default::default());
        let outcome = fixture
            .controller
            .run_cycle(1, Duration::from_secs(1))
            .await;
        assert!(matches!(outcome, CycleOutcome::Submitted(ref r) if r.submitted == 3));
    }

    #[test]
    fn stale_snapshot_is_ignored() {
        let queue = TestQueueBuilder::default()
            .default_count(3)
            .max_age(Duration::from_secs(60))
            .build();
        let fixture = fixture(queue, Default::default());
        let captured = Instant::now();
        fixture.publish(
            Some(WmsSnapshot::new(captured, Map::default(), Map::default())),
            Some(BatchSnapshot::new(captured, Map::default())),
        );
        {
            let _mock = MockTime::mock(captured + Duration::from_secs(120));
            assert_eq!(fixture.controller.decide(1).count, 3);
        }

        let sites = wms_snapshot(&[("SITE_A", "US", ServiceStatus::Online, 50)], &[]);
        fixture.publish(Some(sites), Some(batch_snapshot(&[])));
        assert_eq!(fixture.controller.decide(1).count, 50);
    }

    #[tokio::test]
    async fn offline_site_short_circuits() {
        for offline_quota in [0, 2] {
            let queue = TestQueueBuilder::default()
                .policies(vec![PolicyKind::Fixed, PolicyKind::PerCycleBounds])
                .default_count(10)
                .min_per_cycle(Some(5))
                .offline_quota(offline_quota)
                .build();
            let mut fixture = fixture(queue, Default::default());
            fixture.publish(
                Some(wms_snapshot(
                    &[("SITE_A", "US", ServiceStatus::Online, 50)],
                    &[("US", ServiceStatus::Offline)],
                )),
                Some(batch_snapshot(&[])),
            );
            let decision = fixture.controller.decide(1);
            assert_eq!(decision.count, offline_quota);
            assert_eq!(decision.trace.len(), 1);

            let outcome = fixture
                .controller
                .run_cycle(1, Duration::from_secs(1))
                .await;
            assert_eq!(outcome == CycleOutcome::Idle, offline_quota == 0);
        }
    }

    #[tokio::test]
    async fn failed_submission_is_recorded() {
        let queue = TestQueueBuilder::default().default_count(3).build();
        let submitter = RecordingSubmitter {
            fail: true,
            ..Default::default()
        };
        let mut fixture = fixture(queue, submitter);
        for cycle in 0..2 {
            let outcome = fixture
                .controller
                .run_cycle(cycle, Duration::from_secs(1))
                .await;
            assert!(matches!(outcome, CycleOutcome::Failed(ref e) if e.contains("refused")));
        }
        // One attempt per cycle, no retries
        assert_eq!(fixture.submitter.calls.lock().len(), 2);
        assert_eq!(fixture.controller.stats().consecutive_failures, 2);
        assert_eq!(fixture.controller.stats().total_submitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_timeout_is_failure() {
        let queue = TestQueueBuilder::default().default_count(3).build();
        let submitter = RecordingSubmitter {
            hang: true,
            ..Default::default()
        };
        let mut fixture = fixture(queue, submitter);
        let outcome = fixture
            .controller
            .run_cycle(0, Duration::from_secs(30))
            .await;
        assert!(matches!(outcome, CycleOutcome::Failed(ref e) if e.contains("timed out")));
        assert_eq!(fixture.controller.stats().consecutive_failures, 1);
    }
}
