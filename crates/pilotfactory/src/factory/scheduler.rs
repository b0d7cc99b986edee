use std::sync::Arc;

use anyhow::Context;

use crate::config::{FactoryConfig, FactorySettings, InvalidQueue, QueueConfig};
use crate::factory::controller::{BackendBinding, CycleOutcome, QueueController, QueueStats};
use crate::plugins::PluginRegistry;
use crate::poller::registry::PollerRegistry;
use crate::poller::{PollResult, PollerSettings, PollerStats};
use crate::status::BackendIdentity;
use crate::status::snapshot::{BatchSnapshot, WmsSnapshot};
use crate::{Map, Set};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Active,
    Disabled,
    Invalid(String),
}

/// Externally visible state of a queue.
#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub name: String,
    pub state: QueueState,
    pub wms: Option<BackendIdentity>,
    pub batch: Option<BackendIdentity>,
    pub policies: Vec<&'static str>,
    pub stats: QueueStats,
}

#[derive(Debug, Clone)]
pub struct PollerInfo {
    pub identity: BackendIdentity,
    pub stats: PollerStats,
}

#[derive(Debug, Clone)]
pub struct FactoryStatus {
    pub cycle: u64,
    pub queues: Vec<QueueInfo>,
    pub pollers: Vec<PollerInfo>,
}

/// Settings of the pollers a queue is bound to.
#[derive(Clone, Copy)]
struct PollerSettingsPair {
    wms: PollerSettings,
    batch: PollerSettings,
}

/// Drives all queue controllers in lock-step cycles.
///
/// A new configuration is only stored by [`Scheduler::reload`]; it is applied at the start of
/// the next [`Scheduler::tick`], so a cycle never sees two configurations.
pub struct Scheduler {
    plugins: Arc<PluginRegistry>,
    wms_pollers: PollerRegistry<WmsSnapshot>,
    batch_pollers: PollerRegistry<BatchSnapshot>,
    settings: FactorySettings,
    controllers: Vec<QueueController>,
    disabled: Vec<String>,
    invalid: Vec<InvalidQueue>,
    /// Statistics of queues that are currently not scheduled
    retired_stats: Map<String, QueueStats>,
    cycle: u64,
    pending: Option<FactoryConfig>,
}

impl Scheduler {
    pub fn new(plugins: Arc<PluginRegistry>, config: FactoryConfig) -> Self {
        Self {
            plugins,
            wms_pollers: Default::default(),
            batch_pollers: Default::default(),
            settings: config.settings.clone(),
            controllers: Default::default(),
            disabled: Default::default(),
            invalid: Default::default(),
            retired_stats: Default::default(),
            cycle: 0,
            pending: Some(config),
        }
    }

    pub fn settings(&self) -> &FactorySettings {
        &self.settings
    }

    /// Number of the next cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Schedules `config` to be applied at the next cycle boundary.
    pub fn reload(&mut self, config: FactoryConfig) {
        if self.pending.replace(config).is_some() {
            log::debug!("Pending configuration was replaced before it was applied");
        }
    }

    /// Runs a single cycle of every active queue. Queues are processed concurrently, so that a
    /// slow submission does not delay other queues.
    pub async fn tick(&mut self) -> Vec<(String, CycleOutcome)> {
        if let Some(config) = self.pending.take() {
            self.apply(config).await;
        }

        let cycle = self.cycle;
        self.cycle += 1;
        let submit_timeout = self.settings.submit_timeout;
        log::debug!(
            "Starting cycle {cycle} with {} queue(s)",
            self.controllers.len()
        );

        let outcomes = futures::future::join_all(
            self.controllers
                .iter_mut()
                .map(|controller| controller.run_cycle(cycle, submit_timeout)),
        )
        .await;
        self.controllers
            .iter()
            .map(|controller| controller.name().to_string())
            .zip(outcomes)
            .collect()
    }

    async fn apply(&mut self, config: FactoryConfig) {
        let FactoryConfig {
            settings,
            queues,
            mut invalid,
        } = config;
        log::info!(
            "Applying configuration with {} queue(s), {} invalid",
            queues.len() + invalid.len(),
            invalid.len()
        );
        for queue in &invalid {
            log::error!("Excluding {queue}");
        }

        let mut stats = std::mem::take(&mut self.retired_stats);
        for controller in std::mem::take(&mut self.controllers) {
            let name = controller.name().to_string();
            stats.insert(name, controller.into_stats());
        }

        // Queues sharing a backend share its poller, the first queue decides its settings
        let mut wms_settings: Map<BackendIdentity, PollerSettings> = Map::default();
        let mut batch_settings: Map<BackendIdentity, PollerSettings> = Map::default();
        for queue in queues.iter().filter(|queue| queue.enabled) {
            wms_settings
                .entry(queue.wms.identity())
                .or_insert_with(|| queue.wms_poll.poller());
            batch_settings
                .entry(queue.batch.identity())
                .or_insert_with(|| queue.batch_poll.poller());
        }
        self.wms_pollers
            .stop_changed(&wms_settings, settings.shutdown_timeout)
            .await;
        self.batch_pollers
            .stop_changed(&batch_settings, settings.shutdown_timeout)
            .await;

        let mut disabled = vec![];
        for queue in queues {
            let name = queue.name.clone();
            if !queue.enabled {
                log::info!("queue {name} is disabled");
                disabled.push(name);
                continue;
            }
            let queue_stats = stats.remove(&name).unwrap_or_default();
            let pollers = PollerSettingsPair {
                wms: wms_settings
                    .get(&queue.wms.identity())
                    .copied()
                    .unwrap_or_else(|| queue.wms_poll.poller()),
                batch: batch_settings
                    .get(&queue.batch.identity())
                    .copied()
                    .unwrap_or_else(|| queue.batch_poll.poller()),
            };
            match self.create_controller(queue, pollers, queue_stats) {
                Ok(controller) => self.controllers.push(controller),
                Err(error) => {
                    log::error!("Excluding queue {name}: {error:?}");
                    invalid.push(InvalidQueue {
                        name,
                        reason: format!("{error:#}"),
                    });
                }
            }
        }

        let used_wms: Set<BackendIdentity> = self
            .controllers
            .iter()
            .map(|controller| controller.wms_identity().clone())
            .collect();
        let used_batch: Set<BackendIdentity> = self
            .controllers
            .iter()
            .map(|controller| controller.batch_identity().clone())
            .collect();
        self.wms_pollers
            .retain(&used_wms, settings.shutdown_timeout)
            .await;
        self.batch_pollers
            .retain(&used_batch, settings.shutdown_timeout)
            .await;

        self.retired_stats = stats;
        self.disabled = disabled;
        self.invalid = invalid;
        self.settings = settings;
    }

    fn create_controller(
        &self,
        queue: QueueConfig,
        pollers: PollerSettingsPair,
        stats: QueueStats,
    ) -> PollResult<QueueController> {
        let submitter = self
            .plugins
            .create_submitter(&queue.submitter)
            .context("Cannot create submitter")?;

        let wms_poller = self
            .wms_pollers
            .get_or_create(&queue.wms.identity(), pollers.wms, || {
                self.plugins.create_wms_source(&queue.wms)
            })
            .context("Cannot create WMS poller")?;
        let wms = BackendBinding::new(
            wms_poller,
            self.wms_pollers.cache().clone(),
            queue.wms_poll.max_age,
        );

        let batch_poller = self
            .batch_pollers
            .get_or_create(&queue.batch.identity(), pollers.batch, || {
                self.plugins.create_batch_source(&queue.batch)
            })
            .context("Cannot create batch system poller")?;
        let batch = BackendBinding::new(
            batch_poller,
            self.batch_pollers.cache().clone(),
            queue.batch_poll.max_age,
        );

        Ok(QueueController::new(queue, submitter, wms, batch, stats))
    }

    pub fn status(&self) -> FactoryStatus {
        let mut queues: Vec<QueueInfo> = self
            .controllers
            .iter()
            .map(|controller| QueueInfo {
                name: controller.name().to_string(),
                state: QueueState::Active,
                wms: Some(controller.wms_identity().clone()),
                batch: Some(controller.batch_identity().clone()),
                policies: controller.pipeline().stage_names(),
                stats: controller.stats().clone(),
            })
            .collect();
        let inactive = self
            .disabled
            .iter()
            .map(|name| (name, QueueState::Disabled))
            .chain(
                self.invalid
                    .iter()
                    .map(|queue| (&queue.name, QueueState::Invalid(queue.reason.clone()))),
            );
        for (name, state) in inactive {
            queues.push(QueueInfo {
                name: name.clone(),
                state,
                wms: None,
                batch: None,
                policies: vec![],
                stats: self.retired_stats.get(name).cloned().unwrap_or_default(),
            });
        }

        let pollers = self
            .wms_pollers
            .pollers()
            .into_iter()
            .chain(self.batch_pollers.pollers())
            .map(|poller| PollerInfo {
                identity: poller.identity().clone(),
                stats: poller.stats(),
            })
            .collect();

        FactoryStatus {
            cycle: self.cycle,
            queues,
            pollers,
        }
    }

    /// Stops every poller.
    pub async fn shutdown(&mut self) {
        let timeout = self.settings.shutdown_timeout;
        log::info!("Stopping pollers");
        self.controllers.clear();
        self.wms_pollers.stop_all(timeout).await;
        self.batch_pollers.stop_all(timeout).await;
    }
}
