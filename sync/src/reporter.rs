//! Status reporting for sync runs
//!
//! The coordinator never logs progress to a process-wide sink of its own; it
//! pushes [`StatusEvent`]s into whatever [`StatusReporter`] the caller hands it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::diff::PlanAction;
use crate::error::{Result, SyncError};
use crate::summary::{Outcome, RunSummary};

/// Lifecycle of one target within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPhase {
    Idle,
    BuildingCatalogs,
    Planning,
    Executing,
    Reporting,
    Done,
}

impl std::fmt::Display for TargetPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetPhase::Idle => write!(f, "idle"),
            TargetPhase::BuildingCatalogs => write!(f, "building catalogs"),
            TargetPhase::Planning => write!(f, "planning"),
            TargetPhase::Executing => write!(f, "executing"),
            TargetPhase::Reporting => write!(f, "reporting"),
            TargetPhase::Done => write!(f, "done"),
        }
    }
}

/// Event emitted while a run progresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatusEvent {
    /// A target's state machine advanced
    PhaseChanged { target: String, phase: TargetPhase },
    /// A transfer failed transiently and will be tried again
    RetryScheduled {
        target: String,
        path: String,
        attempt: u32,
        delay: Duration,
    },
    /// A plan item reached its terminal state
    ItemCompleted {
        target: String,
        path: String,
        action: PlanAction,
        outcome: Outcome,
        attempts: u32,
    },
    /// A target finished, successfully or not
    TargetCompleted { summary: RunSummary },
}

impl StatusEvent {
    /// Events only delivered when the run is verbose
    pub fn is_verbose_only(&self) -> bool {
        match self {
            StatusEvent::PhaseChanged { .. } | StatusEvent::RetryScheduled { .. } => true,
            StatusEvent::ItemCompleted { outcome, .. } => *outcome == Outcome::Skipped,
            StatusEvent::TargetCompleted { .. } => false,
        }
    }
}

/// Receiver of status events; implementations must tolerate concurrent calls
pub trait StatusReporter: Send + Sync {
    fn report(&self, event: StatusEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl StatusReporter for NoopReporter {
    fn report(&self, _event: StatusEvent) {}
}

/// Writes every event to the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report(&self, event: StatusEvent) {
        match event {
            StatusEvent::PhaseChanged { target, phase } => {
                debug!(dest = %target, %phase, "phase changed");
            }
            StatusEvent::RetryScheduled {
                target,
                path,
                attempt,
                delay,
            } => {
                info!(dest = %target, %path, attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
            }
            StatusEvent::ItemCompleted {
                target,
                path,
                action,
                outcome,
                attempts,
            } => {
                if outcome.is_failure() {
                    warn!(dest = %target, %path, %action, %outcome, attempts, "item failed");
                } else {
                    info!(dest = %target, %path, %action, %outcome, "item completed");
                }
            }
            StatusEvent::TargetCompleted { summary } => {
                if summary.is_success() {
                    info!(dest = %summary.target, run_id = %summary.run_id, "{}", summary.line());
                } else {
                    warn!(dest = %summary.target, run_id = %summary.run_id, "{}", summary.line());
                }
            }
        }
    }
}

/// Reporter half of a [`ProgressChannel`]
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusReporter for ChannelReporter {
    fn report(&self, event: StatusEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.sender.send(event);
    }
}

/// Progress channel for receiving status events
pub struct ProgressChannel {
    receiver: mpsc::UnboundedReceiver<StatusEvent>,
}

impl ProgressChannel {
    /// Create a new progress channel
    pub fn new() -> (ChannelReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelReporter { sender }, Self { receiver })
    }

    /// Receive the next event
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.receiver.recv().await
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<StatusEvent> {
        self.receiver.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => SyncError::Progress("No status events available".to_string()),
            mpsc::error::TryRecvError::Disconnected => SyncError::Progress("Status channel disconnected".to_string()),
        })
    }

    /// Every event currently buffered
    pub fn drain(&mut self) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Close the channel
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
