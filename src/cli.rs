//! Command-line surface and the runtime settings derived from it.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::capture::CaptureFilter;
use crate::config;
use crate::enrichment::url_port;
use crate::scheduler::SchedulerSettings;
use crate::session::InterfaceDirection;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum DebugLevel {
    #[value(alias = "s")]
    Silent,
    #[value(alias = "d")]
    Debug,
    #[value(alias = "t")]
    Trace,
    /// Trace plus every framed daemon message.
    #[value(alias = "p")]
    ProtocolTrace,
}

impl DebugLevel {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub fn filter_directive(self) -> &'static str {
        match self {
            DebugLevel::Silent => "warn",
            DebugLevel::Debug => "debug",
            DebugLevel::Trace => "trace,protocol=off",
            DebugLevel::ProtocolTrace => "trace,protocol=trace",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "nsf-monitor")]
#[command(about = "Tracks HTTP-like flows and streams traffic notifications to the management daemon", long_about = None)]
pub struct Cli {
    /// Log verbosity
    #[arg(short = 'd', long = "debuglevel", value_enum, default_value_t = DebugLevel::Trace)]
    pub debug_level: DebugLevel,
    /// Interface to capture on and report in notifications
    #[arg(long, value_name = "IFACE", default_value = config::DEFAULT_INTERFACE)]
    pub interface: String,
    /// Management daemon address
    #[arg(long, value_name = "HOST:PORT", default_value = config::DEFAULT_DAEMON_ADDR)]
    pub daemon_addr: String,
    /// Notification stream to register
    #[arg(long, value_name = "NAME", default_value = config::DEFAULT_STREAM_NAME)]
    pub stream: String,
    /// Session lookup endpoint used to enrich flow sources
    #[arg(long, value_name = "URL", default_value = config::DEFAULT_LOOKUP_URL)]
    pub lookup_url: String,
    /// Upper bound for one session lookup
    #[arg(long, value_name = "MILLIS", default_value_t = config::LOOKUP_TIMEOUT_MS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub lookup_timeout_ms: u64,
    /// Seconds between periodic flow emissions
    #[arg(long, value_name = "SECS", default_value_t = config::EMISSION_INTERVAL_SECS,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub emit_interval_secs: u64,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub debug_level: DebugLevel,
    pub interface: String,
    pub daemon_addr: String,
    pub stream: String,
    pub lookup_url: String,
    pub lookup_timeout: Duration,
    pub emission_interval: Duration,
}

impl From<Cli> for Settings {
    fn from(cli: Cli) -> Self {
        Self {
            debug_level: cli.debug_level,
            interface: cli.interface,
            daemon_addr: cli.daemon_addr,
            stream: cli.stream,
            lookup_url: cli.lookup_url,
            lookup_timeout: Duration::from_millis(cli.lookup_timeout_ms),
            emission_interval: Duration::from_secs(cli.emit_interval_secs),
        }
    }
}

impl Settings {
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            interface: self.interface.clone(),
            direction: InterfaceDirection::Ingress,
            emission_interval: self.emission_interval,
            lookup_timeout: self.lookup_timeout,
            ..SchedulerSettings::default()
        }
    }

    /// Keep the lookup service's own traffic out of the flow table.
    pub fn capture_filter(&self) -> CaptureFilter {
        match url_port(&self.lookup_url) {
            Some(port) => CaptureFilter::excluding_port(port),
            None => CaptureFilter::default(),
        }
    }
}
