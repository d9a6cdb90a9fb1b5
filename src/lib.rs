pub mod capture;
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod enrichment;
pub mod error;
pub mod scheduler;
pub mod session;

use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use capture::{CaptureEngine, CaptureFilter};
use cli::{Cli, DebugLevel, Settings};
use commands::SignalSender;
use crate::core::registry::FlowRegistry;
use enrichment::HttpSessionLookup;
use error::CaptureError;
use scheduler::EmissionScheduler;
use session::daemon::{self, ControlSocket, StreamSession};

/// The scheduler wired to the live daemon session and lookup service.
pub type LiveScheduler = EmissionScheduler<ControlSocket, StreamSession, HttpSessionLookup>;

/// Install the stderr subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_tracing(level: DebugLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in nsf-monitor: {info}");
        default_hook(info);
    }));

    let settings = Settings::from(cli);
    init_tracing(settings.debug_level);

    // The binary has no in-process signal producers; the console alone feeds the loop.
    let (scheduler, _signals) = initialize(&settings).await?;
    tracing::info!("nsf-monitor running on {}", settings.interface);
    scheduler.run().await.context("event loop terminated")?;
    Ok(())
}

/// Register with the daemon, start live capture and the stdin console.
/// Any failure here is fatal.
pub async fn initialize(settings: &Settings) -> anyhow::Result<(LiveScheduler, SignalSender)> {
    initialize_with(
        settings,
        |registry, filter| CaptureEngine::start_live(&settings.interface, registry, filter),
        io::BufReader::new(io::stdin()),
    )
    .await
}

/// [`initialize`] with the frame capture and the console input supplied by
/// the caller. Returns the scheduler and a handle for forwarding external
/// events through it.
pub async fn initialize_with<F, R>(
    settings: &Settings,
    start_capture: F,
    console: R,
) -> anyhow::Result<(LiveScheduler, SignalSender)>
where
    F: FnOnce(Arc<FlowRegistry>, CaptureFilter) -> Result<CaptureEngine, CaptureError>,
    R: BufRead + Send + 'static,
{
    let (control, session) = daemon::establish(
        &settings.daemon_addr,
        config::DAEMON_NAME,
        &settings.stream,
    )
    .await
    .with_context(|| format!("failed to register with daemon at {}", settings.daemon_addr))?;

    let lookup = HttpSessionLookup::new(settings.lookup_url.clone(), settings.lookup_timeout)
        .context("failed to build session lookup client")?;

    let registry = Arc::new(FlowRegistry::new());
    let engine = start_capture(Arc::clone(&registry), settings.capture_filter())
        .with_context(|| format!("failed to start capture on {}", settings.interface))?;

    let (tx, rx) = mpsc::channel(config::CONTROL_INPUT_CAPACITY);
    commands::spawn_console(console, tx.clone()).context("failed to start operator console")?;

    let scheduler = EmissionScheduler::new(
        registry,
        control,
        session,
        lookup,
        rx,
        settings.scheduler_settings(),
    )
    .with_capture(engine);
    Ok((scheduler, SignalSender::new(tx)))
}
