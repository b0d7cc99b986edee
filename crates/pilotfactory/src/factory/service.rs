use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::common::rpc::{ResponseToken, RpcReceiver, RpcSender, initiate_request, make_rpc_queue};
use crate::common::utils::time::format_duration;
use crate::config::FactoryConfig;
use crate::factory::scheduler::{FactoryStatus, Scheduler};

#[derive(Debug)]
pub enum FactoryMessage {
    /// Replace the configuration at the next cycle boundary.
    Reload(Box<FactoryConfig>),
    GetStatus(ResponseToken<FactoryStatus>),
    Quit,
}

/// Handle used to communicate with the factory process.
#[derive(Clone)]
pub struct FactoryService {
    sender: RpcSender<FactoryMessage>,
}

impl FactoryService {
    pub fn reload(&self, config: FactoryConfig) {
        self.send(FactoryMessage::Reload(Box::new(config)));
    }

    pub fn get_status(&self) -> impl Future<Output = anyhow::Result<FactoryStatus>> {
        let fut = initiate_request(|token| self.sender.send(FactoryMessage::GetStatus(token)));
        async move {
            fut.await
                .map_err(|_| anyhow::anyhow!("Factory process has already finished"))
        }
    }

    pub fn quit(&self) {
        self.send(FactoryMessage::Quit);
    }

    fn send(&self, message: FactoryMessage) {
        if self.sender.send(message).is_err() {
            log::debug!("Factory process has already finished, message dropped");
        }
    }
}

/// Creates the service handle and the future that drives the factory.
/// The future finishes after [`FactoryService::quit`] or once every handle is dropped.
pub fn create_factory_service(
    scheduler: Scheduler,
) -> (FactoryService, impl Future<Output = ()> + Send) {
    let (tx, rx) = make_rpc_queue();
    let process = factory_process(scheduler, rx);
    (FactoryService { sender: tx }, process)
}

fn cycle_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn factory_process(mut scheduler: Scheduler, mut receiver: RpcReceiver<FactoryMessage>) {
    let mut period = scheduler.settings().cycle_interval;
    let mut interval = cycle_interval(period);
    log::info!("Factory started, cycle interval {}", format_duration(period));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                scheduler.tick().await;
                // The cycle interval may have changed by a reload applied in this tick
                let current = scheduler.settings().cycle_interval;
                if current != period {
                    log::info!("Cycle interval changed to {}", format_duration(current));
                    period = current;
                    interval = cycle_interval(period);
                    interval.reset();
                }
            }
            message = receiver.recv() => {
                match message {
                    None | Some(FactoryMessage::Quit) => break,
                    Some(message) => handle_message(&mut scheduler, message),
                }
            }
        }
    }
    log::info!("Factory is shutting down");
    scheduler.shutdown().await;
}

fn handle_message(scheduler: &mut Scheduler, message: FactoryMessage) {
    match message {
        FactoryMessage::Reload(config) => {
            log::info!("Configuration will be reloaded at the next cycle");
            scheduler.reload(*config);
        }
        FactoryMessage::GetStatus(response) => response.respond(scheduler.status()),
        FactoryMessage::Quit => {}
    }
}
