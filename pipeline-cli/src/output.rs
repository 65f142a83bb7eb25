// Output formatting helpers for CLI commands

use pipeline_engine::execution::events::LogLevel;
use pipeline_engine::{ExecutionEvent, RunStatus};

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

/// Print an info message
pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a stage header
pub fn stage_header(name: &str, total_units: usize) {
    eprintln!("\x1b[1;34m  Stage\x1b[0m '{}' ({} units)", name, total_units);
}

/// Print step output (indented)
pub fn step_output(line: &str) {
    println!("        | {}", line);
}

/// Print step error output (indented, red)
pub fn step_error(line: &str) {
    eprintln!("\x1b[31m        | {}\x1b[0m", line);
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

/// Colored, fixed-width status label
pub fn status_label(status: RunStatus) -> String {
    let color = match status {
        RunStatus::Succeeded => "32",
        RunStatus::Failed => "1;31",
        RunStatus::Canceled => "33",
        RunStatus::Skipped => "2",
        _ => "36",
    };
    format!("\x1b[{}m{:<9}\x1b[0m", color, status.as_str())
}

/// Render one progress event
pub fn event(event: &ExecutionEvent, quiet: bool) {
    match event {
        ExecutionEvent::RunStarted {
            pipeline,
            total_units,
        } => header(&format!("Running '{}' ({} units)", pipeline, total_units)),
        ExecutionEvent::StageStarted {
            stage,
            display_name,
            total_units,
        } => stage_header(display_name.as_deref().unwrap_or(stage), *total_units),
        ExecutionEvent::StageSkipped { stage, reason } => {
            dim(&format!("  Stage '{}' skipped: {}", stage, reason))
        }
        ExecutionEvent::UnitStarted { unit, .. } => status("Running", unit),
        ExecutionEvent::UnitSkipped { unit, reason } => {
            dim(&format!("{:>12} {} ({})", "Skipped", unit, reason))
        }
        ExecutionEvent::UnitCompleted {
            unit,
            status,
            duration,
        } => {
            let message = format!("{} ({}ms)", unit, duration.as_millis());
            match status {
                RunStatus::Succeeded => success(&message),
                RunStatus::Canceled => warning(&format!("{} canceled", unit)),
                _ => failure(&message),
            }
        }
        ExecutionEvent::StepStarted { label, .. } if !quiet => dim(&format!("      > {}", label)),
        ExecutionEvent::StepOutput { line, is_error, .. } if !quiet => {
            if *is_error {
                step_error(line);
            } else {
                step_output(line);
            }
        }
        ExecutionEvent::StepSkipped { step_index, reason, .. } if !quiet => {
            dim(&format!("      - step {} skipped: {}", step_index + 1, reason))
        }
        ExecutionEvent::VariableSet {
            name, version, ..
        } => dim(&format!("      set {} (v{})", name, version)),
        ExecutionEvent::ArtifactPublished { artifact, .. } => {
            info(&format!("published {} ({} bytes)", artifact.name, artifact.size))
        }
        ExecutionEvent::Log { level, message, .. } => match level {
            LogLevel::Error => error(message),
            LogLevel::Warning => warning(message),
            LogLevel::Info => info(message),
            LogLevel::Debug => {}
        },
        _ => {}
    }
}
