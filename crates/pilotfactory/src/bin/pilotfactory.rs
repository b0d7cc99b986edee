use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, FromArgMatches, Parser};
use cli_table::format::{Justify, Separator};
use cli_table::{Cell, CellStruct, Color, ColorChoice, Style, Table, TableStruct, print_stdout};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;

use pilotfactory::common::setup::setup_logging;
use pilotfactory::common::utils::time::format_duration;
use pilotfactory::config::{CONFIG_ENV, FactoryConfig};
use pilotfactory::factory::scheduler::{FactoryStatus, QueueState, Scheduler};
use pilotfactory::factory::service::{FactoryService, create_factory_service};
use pilotfactory::plugins::PluginRegistry;

#[derive(Parser)]
#[command(author, about, version(pilotfactory::PF_VERSION))]
struct RootOptions {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Start the factory and keep submitting pilots until interrupted
    Run(RunOpts),
    /// Validate a configuration file and print its queues
    Check(CheckOpts),
}

#[derive(Parser)]
struct RunOpts {
    /// Path to the factory configuration file
    #[arg(long, env = CONFIG_ENV)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Parser)]
struct CheckOpts {
    /// Path to the factory configuration file
    #[arg(long, env = CONFIG_ENV)]
    config: PathBuf,
}

fn print_table(table: TableStruct) {
    let table = table.color_choice(ColorChoice::Auto);
    if let Err(e) = print_stdout(table) {
        log::error!("Cannot print table to stdout: {e:?}");
    }
}

fn horizontal_table(rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) -> TableStruct {
    rows.table()
        .separator(
            Separator::builder()
                .title(Some(Default::default()))
                .column(Some(Default::default()))
                .build(),
        )
        .title(header)
}

fn header(names: &[&str]) -> Vec<CellStruct> {
    names.iter().map(|name| name.cell().bold(true)).collect()
}

fn load_config(path: &Path, plugins: &PluginRegistry) -> anyhow::Result<FactoryConfig> {
    FactoryConfig::load(path, plugins)
        .with_context(|| format!("Cannot load configuration from {}", path.display()))
}

fn command_check(opts: CheckOpts) -> anyhow::Result<()> {
    let plugins = PluginRegistry::with_defaults();
    let config = load_config(&opts.config, &plugins)?;

    let rows: Vec<Vec<CellStruct>> = config
        .queues
        .iter()
        .map(|queue| {
            let state = if queue.enabled {
                "enabled".cell().foreground_color(Some(Color::Green))
            } else {
                "disabled".cell().foreground_color(Some(Color::Yellow))
            };
            let policies: Vec<&str> = queue.policies.iter().map(|p| p.name()).collect();
            vec![
                queue.name.as_str().cell(),
                state,
                queue.wms.identity().to_string().cell(),
                queue.batch.identity().to_string().cell(),
                queue.submitter.kind.as_str().cell(),
                policies.join(" > ").cell(),
            ]
        })
        .collect();
    print_table(horizontal_table(
        rows,
        header(&["Queue", "State", "WMS", "Batch system", "Submitter", "Policies"]),
    ));
    println!(
        "Cycle interval: {}",
        format_duration(config.settings.cycle_interval)
    );

    if config.invalid.is_empty() {
        return Ok(());
    }
    let rows: Vec<Vec<CellStruct>> = config
        .invalid
        .iter()
        .map(|queue| {
            vec![
                queue.name.as_str().cell(),
                queue
                    .reason
                    .as_str()
                    .cell()
                    .foreground_color(Some(Color::Red)),
            ]
        })
        .collect();
    print_table(horizontal_table(rows, header(&["Invalid queue", "Reason"])));
    Err(anyhow::anyhow!(
        "{} queue(s) failed validation",
        config.invalid.len()
    ))
}

fn print_status(status: &FactoryStatus) {
    let rows: Vec<Vec<CellStruct>> = status
        .queues
        .iter()
        .map(|queue| {
            let state = match &queue.state {
                QueueState::Active => "active".cell().foreground_color(Some(Color::Green)),
                QueueState::Disabled => "disabled".cell().foreground_color(Some(Color::Yellow)),
                QueueState::Invalid(reason) => format!("invalid: {reason}")
                    .cell()
                    .foreground_color(Some(Color::Red)),
            };
            let stats = &queue.stats;
            vec![
                queue.name.as_str().cell(),
                state,
                stats
                    .last_decision
                    .as_ref()
                    .map(|d| d.count.to_string())
                    .unwrap_or_default()
                    .cell()
                    .justify(Justify::Right),
                stats
                    .last_outcome
                    .as_ref()
                    .map(|o| o.to_string())
                    .unwrap_or_default()
                    .cell(),
                stats.consecutive_failures.cell().justify(Justify::Right),
                stats.total_submitted.cell().justify(Justify::Right),
            ]
        })
        .collect();
    print_table(horizontal_table(
        rows,
        header(&[
            "Queue",
            "State",
            "Decision",
            "Last outcome",
            "Failures",
            "Submitted",
        ]),
    ));

    let rows: Vec<Vec<CellStruct>> = status
        .pollers
        .iter()
        .map(|poller| {
            vec![
                poller.identity.to_string().cell(),
                poller.stats.state.to_string().cell(),
                poller.stats.queries.cell().justify(Justify::Right),
                poller.stats.failures.cell().justify(Justify::Right),
                poller.stats.publishes.cell().justify(Justify::Right),
            ]
        })
        .collect();
    print_table(horizontal_table(
        rows,
        header(&["Backend", "State", "Queries", "Failures", "Publishes"]),
    ));
    println!("Cycle: {}", status.cycle);
}

fn reload(service: &FactoryService, path: &Path, plugins: &PluginRegistry) {
    match load_config(path, plugins) {
        Ok(config) => service.reload(config),
        Err(error) => log::error!("Reload failed, keeping the previous configuration: {error:?}"),
    }
}

/// Prints the status once the factory answers. A running cycle delays the answer, so the
/// request is not awaited by the caller.
fn spawn_status_print(service: &FactoryService) -> JoinHandle<()> {
    let service = service.clone();
    tokio::spawn(async move {
        match service.get_status().await {
            Ok(status) => print_status(&status),
            Err(error) => log::error!("Cannot get factory status: {error:?}"),
        }
    })
}

async fn reload_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}

async fn command_run(opts: RunOpts) -> anyhow::Result<()> {
    let plugins = Arc::new(PluginRegistry::with_defaults());
    let config = load_config(&opts.config, &plugins)?;
    for queue in &config.invalid {
        log::error!("Skipping {queue}");
    }

    let mut reload_interval = config.settings.reload_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.reset();
        interval
    });
    let scheduler = Scheduler::new(plugins.clone(), config);
    let (service, process) = create_factory_service(scheduler);
    let mut process = tokio::spawn(process);

    let mut hangup = signal(SignalKind::hangup()).context("Cannot register SIGHUP handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("Cannot register SIGTERM handler")?;
    let mut user = signal(SignalKind::user_defined1()).context("Cannot register SIGUSR1 handler")?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                log::info!("SIGHUP received, reloading {}", opts.config.display());
                reload(&service, &opts.config, &plugins);
            }
            _ = reload_tick(&mut reload_interval) => {
                log::debug!("Periodic reload of {}", opts.config.display());
                reload(&service, &opts.config, &plugins);
            }
            _ = user.recv() => {
                spawn_status_print(&service);
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("SIGINT received, shutting down");
                break;
            }
            _ = terminate.recv() => {
                log::info!("SIGTERM received, shutting down");
                break;
            }
            result = &mut process => {
                result.context("Factory process has crashed")?;
                return Ok(());
            }
        }
    }

    service.quit();
    process.await.context("Factory process has crashed")?;
    log::info!("Factory has stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> pilotfactory::Result<()> {
    let matches = RootOptions::command().get_matches();
    let opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    let result = match opts.subcmd {
        SubCommand::Run(opts) => {
            setup_logging(opts.verbose);
            command_run(opts).await
        }
        SubCommand::Check(opts) => {
            setup_logging(false);
            command_check(opts)
        }
    };

    if let Err(error) = result {
        log::error!("{error:?}");
        std::process::exit(1);
    }

    Ok(())
}
