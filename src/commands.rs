//! Operator command surface and the control-input channel.
//!
//! Operator lines are read on a dedicated blocking thread and forwarded to the
//! event loop. In-process signal producers share the same channel.

use std::io::{self, BufRead};

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::session::{AttackType, Notification};

/// A command typed by the operator on standard input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Send a link-up notification.
    Up,
    /// Emit the current flow snapshot immediately.
    Down,
    Exit,
}

impl OperatorCommand {
    /// Parse one input line. Unknown input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "up" | "u" => Some(OperatorCommand::Up),
            "down" | "d" => Some(OperatorCommand::Down),
            "exit" => Some(OperatorCommand::Exit),
            _ => None,
        }
    }
}

/// Input consumed by the event loop besides the daemon socket and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlInput {
    Command(OperatorCommand),
    /// An externally-sourced event forwarded to the stream unchanged.
    Signal(Notification),
}

/// Cloneable handle for in-process producers of externally-sourced events.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::Sender<ControlInput>,
}

impl SignalSender {
    pub fn new(tx: mpsc::Sender<ControlInput>) -> Self {
        Self { tx }
    }

    /// Queue `notification` for the event loop, which forwards it unchanged.
    /// Fails once the loop has stopped.
    pub async fn signal(&self, notification: Notification) -> Result<(), SendError> {
        self.tx
            .send(ControlInput::Signal(notification))
            .await
            .map_err(|_| SendError::Closed)
    }

    pub async fn link_down(&self, if_index: u32) -> Result<(), SendError> {
        self.signal(Notification::link_down(if_index)).await
    }

    pub async fn ddos_detected(&self, attack_type: AttackType) -> Result<(), SendError> {
        self.signal(Notification::ddos_detection(attack_type)).await
    }
}

/// Forward commands parsed from `reader` (standard input in the binary) until
/// EOF, `exit`, or the receiver going away.
pub fn spawn_console<R>(reader: R, tx: mpsc::Sender<ControlInput>) -> io::Result<std::thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("operator-console".into())
        .spawn(move || forward_commands(reader, &tx))
}

fn forward_commands<R: BufRead>(reader: R, tx: &mpsc::Sender<ControlInput>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("operator console read failed: {e}");
                break;
            }
        };
        let Some(command) = OperatorCommand::parse(&line) else {
            if !line.trim().is_empty() {
                tracing::debug!("ignoring operator input {line:?}");
            }
            continue;
        };
        if tx.blocking_send(ControlInput::Command(command)).is_err() {
            break;
        }
        if command == OperatorCommand::Exit {
            break;
        }
    }
    tracing::debug!("operator console closed");
}
