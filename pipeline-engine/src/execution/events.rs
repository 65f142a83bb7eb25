// Execution Events
// Progress reporting and event types for a pipeline run

use crate::artifacts::ArtifactRef;
use crate::execution::report::RunOutcome;
use crate::parser::models::{RunStatus, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        pipeline: String,
        total_units: usize,
    },

    RunCompleted {
        pipeline: String,
        outcome: RunOutcome,
        duration: Duration,
    },

    StageStarted {
        stage: String,
        display_name: Option<String>,
        total_units: usize,
    },

    /// Condition false, upstream failure, or not targeted
    StageSkipped { stage: String, reason: String },

    StageCompleted {
        stage: String,
        status: RunStatus,
        duration: Duration,
    },

    UnitStarted {
        unit: String,
        stage: String,
        job: String,
        matrix: Vec<(String, String)>,
        total_steps: usize,
    },

    UnitSkipped { unit: String, reason: String },

    UnitCompleted {
        unit: String,
        status: RunStatus,
        duration: Duration,
    },

    UnitCanceled { unit: String },

    StepStarted {
        unit: String,
        step_index: usize,
        label: String,
    },

    /// One line of stdout/stderr
    StepOutput {
        unit: String,
        step_index: usize,
        line: String,
        is_error: bool,
    },

    StepCompleted {
        unit: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    StepSkipped {
        unit: String,
        step_index: usize,
        reason: String,
    },

    /// A variable write applied by the coordinator
    VariableSet {
        unit: String,
        name: String,
        value: String,
        version: u64,
    },

    ArtifactPublished { unit: String, artifact: ArtifactRef },

    Log {
        level: LogLevel,
        message: String,
        unit: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    pub fn step_output(
        unit: impl Into<String>,
        step_index: usize,
        line: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            unit: unit.into(),
            step_index,
            line: line.into(),
            is_error,
        }
    }

    pub fn info(message: impl Into<String>, unit: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            unit,
        }
    }

    pub fn warning(message: impl Into<String>, unit: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            unit,
        }
    }

    pub fn error(message: impl Into<String>, unit: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            unit,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::RunStarted {
            pipeline: "ci".to_string(),
            total_units: 3,
        });
        tx.send_event(ExecutionEvent::step_output("Build/Compile", 0, "hello", false));

        assert!(matches!(
            rx.recv().await.unwrap(),
            ExecutionEvent::RunStarted { total_units: 3, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ExecutionEvent::StepOutput { ref line, is_error: false, .. } if line == "hello"
        ));
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::info("test", None));
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (tx, rx) = progress_channel();
        drop(rx);
        tx.send_event(ExecutionEvent::warning("late", Some("Build/Compile".to_string())));
    }
}
