// SPDX-License-Identifier: Apache-2.0

//! Process entry point: loads configuration, bootstraps a [`CoreState`],
//! and drives its six-phase control loop to completion on a dedicated
//! OS thread until asked to shut down.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use otap_df_rm_config::{ProviderMode, RmConfig};
use otap_df_rm_core::{CoreState, LoggingCatalogHook, NullResourceBroker};
use tokio::runtime::Builder as RtBuilder;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;

/// How often the control loop ticks while idle, in whole seconds; the
/// sweep phases inside [`CoreState::tick`] self-gate to their own slower
/// cadence, so ticking faster than that only costs a wasted dispatch pass.
const TICK_INTERVAL_SECONDS: u64 = 1;

#[derive(Parser, Debug)]
#[command(name = "rm_core", about = "Cluster resource manager control loop")]
struct Args {
    /// Path to the resource manager's configuration file (JSON, YAML, or TOML).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Tracing filter level, e.g. "info", "debug", "rm_core=debug,warn".
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Overrides `tunables.rm_provider_mode` from the config file.
    #[arg(long, value_enum)]
    provider_mode: Option<CliProviderMode>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliProviderMode {
    None,
    YarnLibyarn,
}

impl From<CliProviderMode> for ProviderMode {
    fn from(mode: CliProviderMode) -> Self {
        match mode {
            CliProviderMode::None => ProviderMode::None,
            CliProviderMode::YarnLibyarn => ProviderMode::YarnLibyarn,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    otap_df_rm_telemetry::init_tracing(&args.log_level).context("failed to install tracing subscriber")?;

    let mut config = match &args.config {
        Some(path) => RmConfig::from_file(path).with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            tracing::warn!("no --config given, starting with built-in defaults");
            RmConfig::default()
        }
    };
    if let Some(mode) = args.provider_mode {
        config.tunables.rm_provider_mode = mode.into();
    }

    let handle = spawn_control_loop(config)?;
    wait_for_shutdown_signal()?;

    tracing::info!("shutdown signal received, stopping control loop");
    handle.shutdown_and_join()
}

/// Handle to the control loop thread: cancelling its token lets the
/// current tick finish and the loop exit instead of being torn down
/// mid-phase.
struct ControlLoopHandle {
    cancel_token: CancellationToken,
    join_handle: thread::JoinHandle<anyhow::Result<()>>,
}

impl ControlLoopHandle {
    fn shutdown_and_join(self) -> anyhow::Result<()> {
        self.cancel_token.cancel();
        match self.join_handle.join() {
            Ok(result) => result,
            Err(panic) => anyhow::bail!("control loop thread panicked: {panic:?}"),
        }
    }
}

/// Runs [`CoreState::bootstrap`] and then the tick loop on a dedicated
/// thread with a single-threaded Tokio runtime and a [`LocalSet`], the
/// way a long-lived non-`'static` task is kept off the caller's own
/// executor: the caller gets a plain join handle back and the loop's
/// internals never need to be `Send` across an arbitrary runtime.
fn spawn_control_loop(config: RmConfig) -> anyhow::Result<ControlLoopHandle> {
    let cancel_token = CancellationToken::new();
    let token_for_loop = cancel_token.clone();

    let join_handle = thread::Builder::new()
        .name("rm-control-loop".to_string())
        .spawn(move || -> anyhow::Result<()> {
            let rt = RtBuilder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to build the control loop's tokio runtime")?;
            let local = LocalSet::new();
            rt.block_on(local.run_until(run_control_loop(config, token_for_loop)))
        })
        .context("failed to spawn the control loop thread")?;

    Ok(ControlLoopHandle { cancel_token, join_handle })
}

async fn run_control_loop(config: RmConfig, cancel_token: CancellationToken) -> anyhow::Result<()> {
    let mut state = CoreState::new(
        config,
        Box::new(LoggingCatalogHook::new(1)),
        Box::new(NullResourceBroker),
    );
    state.bootstrap().await.context("bootstrapping configured resource queues")?;
    tracing::info!(queues = state.trackers.len(), "control loop bootstrapped");

    let mut ticker = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECONDS));
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                tracing::info!("control loop exiting");
                return Ok(());
            }
            _ = ticker.tick() => {
                if !state.keep_running {
                    tracing::error!("control loop stopped itself after a fatal catalog failure");
                    return Ok(());
                }
                let responses = state.tick(TICK_INTERVAL_SECONDS).await;
                if !responses.is_empty() {
                    tracing::debug!(count = responses.len(), "dispatch pass produced responses");
                }
            }
        }
    }
}

/// Blocks the calling (main) thread until Ctrl-C is received, driven by
/// its own throwaway single-threaded runtime so `main` itself stays
/// synchronous.
fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let rt = RtBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the shutdown-signal runtime")?;
    rt.block_on(async {
        tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")
    })
}
