//! The event loop: control-plane readiness, operator input, and the emission
//! and housekeeping timers multiplexed in one `tokio::select!`.
//!
//! Loop actions never overlap. A periodic emission and an operator-forced one
//! run one after the other, each over its own registry snapshot. Enrichment
//! lookups inside one emission run concurrently and share a batch deadline, so
//! an unreachable lookup service delays the loop by at most that deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout_at, MissedTickBehavior};

use crate::capture::CaptureEngine;
use crate::commands::{ControlInput, OperatorCommand};
use crate::config;
use crate::core::flow::FlowRecord;
use crate::core::registry::FlowRegistry;
use crate::enrichment::SessionLookup;
use crate::error::ProtocolError;
use crate::session::{ControlChannel, InterfaceDirection, Notification, NotificationSink, TrafficFlowEvent};

/// Lifecycle of the scheduler once the daemon session is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Registered,
    Running,
    ShuttingDown,
    Stopped,
}

/// Outcome of one emission pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmissionReport {
    pub sent: usize,
    /// Notifications dropped because the send failed.
    pub failed: usize,
    /// Flows reported with their observed port after a failed lookup.
    pub fallbacks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Interface name reported in traffic notifications.
    pub interface: String,
    pub direction: InterfaceDirection,
    pub emission_interval: Duration,
    pub housekeeping_interval: Duration,
    /// Bound for a single lookup.
    pub lookup_timeout: Duration,
    /// Bound for all lookups of one emission pass.
    pub lookup_budget: Duration,
    pub lookup_concurrency: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interface: config::DEFAULT_INTERFACE.to_string(),
            direction: InterfaceDirection::Ingress,
            emission_interval: Duration::from_secs(config::EMISSION_INTERVAL_SECS),
            housekeeping_interval: Duration::from_millis(config::HOUSEKEEPING_INTERVAL_MS),
            lookup_timeout: Duration::from_millis(config::LOOKUP_TIMEOUT_MS),
            lookup_budget: Duration::from_millis(config::LOOKUP_BATCH_BUDGET_MS),
            lookup_concurrency: config::LOOKUP_CONCURRENCY,
        }
    }
}

pub struct EmissionScheduler<C, S, L> {
    registry: Arc<FlowRegistry>,
    control: C,
    sink: S,
    lookup: L,
    capture: Option<CaptureEngine>,
    inputs: mpsc::Receiver<ControlInput>,
    settings: SchedulerSettings,
    state: watch::Sender<SchedulerState>,
}

impl<C, S, L> EmissionScheduler<C, S, L>
where
    C: ControlChannel,
    S: NotificationSink,
    L: SessionLookup,
{
    /// A scheduler over an established daemon session.
    pub fn new(
        registry: Arc<FlowRegistry>,
        control: C,
        sink: S,
        lookup: L,
        inputs: mpsc::Receiver<ControlInput>,
        settings: SchedulerSettings,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Registered);
        Self {
            registry,
            control,
            sink,
            lookup,
            capture: None,
            inputs,
            settings,
            state,
        }
    }

    /// Hand over the capture thread so shutdown can stop it.
    pub fn with_capture(mut self, engine: CaptureEngine) -> Self {
        self.capture = Some(engine);
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Follow state changes, including those made after `run` took `self`.
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn transition(&self, to: SchedulerState) {
        let from = self.state.send_replace(to);
        tracing::debug!("scheduler {from:?} -> {to:?}");
    }

    /// Run until `exit` or a fatal protocol error, then shut down.
    pub async fn run(mut self) -> Result<(), ProtocolError> {
        self.transition(SchedulerState::Running);
        let outcome = self.event_loop().await;
        self.shutdown().await;
        outcome
    }

    async fn event_loop(&mut self) -> Result<(), ProtocolError> {
        let start = tokio::time::Instant::now();
        let mut emission = interval_at(
            start + self.settings.emission_interval,
            self.settings.emission_interval,
        );
        emission.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping = interval_at(
            start + self.settings.housekeeping_interval,
            self.settings.housekeeping_interval,
        );
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut inputs_open = true;

        loop {
            tokio::select! {
                event = self.control.dispatch_ready() => match event {
                    Ok(event) => tracing::trace!(?event, "control event handled"),
                    Err(e) if e.is_recoverable() => tracing::debug!("control> {e}"),
                    Err(e) => {
                        tracing::error!(kind = e.kind(), "control connection failed: {e}");
                        return Err(e);
                    }
                },
                input = self.inputs.recv(), if inputs_open => match input {
                    Some(ControlInput::Command(OperatorCommand::Exit)) => {
                        tracing::info!("Bye!");
                        return Ok(());
                    }
                    Some(ControlInput::Command(OperatorCommand::Up)) => {
                        let [flags, extra] = config::LINK_UP_FLAGS;
                        self.forward(Notification::link_up(config::LINK_UP_IF_INDEX, flags, Some(extra)))
                            .await;
                    }
                    Some(ControlInput::Command(OperatorCommand::Down)) => {
                        let report = self.emit_flows().await;
                        tracing::info!(?report, "operator-requested flow emission");
                    }
                    Some(ControlInput::Signal(notification)) => self.forward(notification).await,
                    None => {
                        tracing::debug!("control input closed");
                        inputs_open = false;
                    }
                },
                _ = emission.tick() => {
                    let report = self.emit_flows().await;
                    tracing::debug!(?report, "periodic flow emission");
                }
                _ = housekeeping.tick() => {
                    let evicted = self.registry.sweep(Instant::now());
                    if evicted > 0 {
                        tracing::trace!(evicted, remaining = self.registry.len(), "expired idle flows");
                    }
                }
            }
        }
    }

    async fn forward(&mut self, notification: Notification) {
        match self.sink.send(&notification).await {
            Ok(()) => tracing::debug!("{} notification sent", notification.kind()),
            Err(e) => tracing::warn!("dropping {} notification: {e}", notification.kind()),
        }
    }

    /// Send one traffic-flow notification per live flow.
    pub async fn emit_flows(&mut self) -> EmissionReport {
        let records = self.registry.snapshot(Instant::now());
        let resolved = self.resolve_source_ports(&records).await;
        let mut report = EmissionReport::default();

        for (record, port) in records.iter().zip(resolved) {
            let source_port = port.unwrap_or_else(|| {
                report.fallbacks += 1;
                record.source_port
            });
            let event = TrafficFlowEvent::from_record(
                record,
                &self.settings.interface,
                self.settings.direction,
                source_port,
            );
            match self.sink.send(&Notification::TrafficFlows(event)).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    tracing::warn!(flow = %record.key(), "dropping traffic notification: {e}");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Session port per record, in record order. `None` where the lookup
    /// failed or ran past its own timeout or the batch deadline.
    async fn resolve_source_ports(&self, records: &[FlowRecord]) -> Vec<Option<u16>> {
        let per_lookup = self.settings.lookup_timeout;
        let batch_deadline = tokio::time::Instant::now() + self.settings.lookup_budget;
        let lookup = &self.lookup;

        stream::iter(records)
            .map(move |record| async move {
                let deadline = (tokio::time::Instant::now() + per_lookup).min(batch_deadline);
                match timeout_at(deadline, lookup.session_port(record.source_address)).await {
                    Ok(Ok(port)) => Some(port),
                    Ok(Err(e)) => {
                        tracing::warn!(flow = %record.key(), kind = e.kind(), "session lookup failed: {e}");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(flow = %record.key(), "session lookup got no answer in time");
                        None
                    }
                }
            })
            .buffered(self.settings.lookup_concurrency.max(1))
            .collect()
            .await
    }

    async fn shutdown(mut self) {
        self.transition(SchedulerState::ShuttingDown);

        if let Some(engine) = self.capture.take() {
            if tokio::task::spawn_blocking(move || engine.stop()).await.is_err() {
                tracing::error!("failed to join capture shutdown task");
            }
        }

        let Self {
            control,
            sink,
            state,
            ..
        } = self;
        if let Err(e) = sink.close().await {
            tracing::warn!("failed to release stream session: {e}");
        }
        if let Err(e) = control.release().await {
            tracing::warn!("failed to release daemon connection: {e}");
        }
        let from = state.send_replace(SchedulerState::Stopped);
        tracing::debug!("scheduler {from:?} -> {:?}", SchedulerState::Stopped);
    }
}
