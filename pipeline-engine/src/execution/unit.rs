// Run Units
// Scheduling-time job instances and the sequential step loop that executes one

use crate::artifacts::{ArtifactRef, ArtifactStore};
use crate::error::ConditionError;
use crate::execution::context::{TriggerContext, Variables};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::expression::condition::Condition;
use crate::expression::evaluator::ConditionContext;
use crate::parser::models::{Job, RunStatus, StepStatus};
use crate::parser::parameters::ResolvedParameters;
use crate::runners::{StepContext, StepOutcome, StepRunner};

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A concrete, schedulable instance of a job template
#[derive(Debug, Clone, Serialize)]
pub struct RunUnit {
    pub id: usize,
    /// `Stage/Job` or `Stage/Job[axis=value,...]`
    pub name: String,
    pub stage: String,
    pub job: String,
    #[serde(skip)]
    pub stage_index: usize,
    #[serde(skip)]
    pub job_index: usize,
    /// Matrix values after replacements
    pub matrix: Vec<(String, String)>,
    pub status: RunStatus,
    pub reason: Option<String>,
}

impl RunUnit {
    /// Apply a status change if the state machine allows it
    pub fn transition(&mut self, to: RunStatus) -> bool {
        use RunStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Pending, Canceled)
                | (Pending, Failed)
                | (Ready, Running)
                | (Ready, Canceled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Canceled)
        );
        if allowed {
            self.status = to;
        }
        allowed
    }

    pub fn finish(&mut self, to: RunStatus, reason: Option<String>) -> bool {
        let changed = self.transition(to);
        if changed && reason.is_some() {
            self.reason = reason;
        }
        changed
    }
}

/// Result of one step, as reported
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub index: usize,
    pub label: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub message: Option<String>,
}

/// Everything a unit task needs, owned so it can move onto the pool
pub struct UnitWork {
    pub id: usize,
    pub name: String,
    pub job: Arc<Job>,
    /// Snapshot taken at dispatch, already layered with scope variables and matrix values
    pub variables: Variables,
    pub matrix: Vec<(String, String)>,
    pub parameters: Arc<ResolvedParameters>,
    pub trigger: Arc<TriggerContext>,
    pub strict: bool,
    pub working_dir: PathBuf,
    pub shell: String,
    pub cancel: CancellationToken,
    pub events: Option<ProgressSender>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub runner: Arc<dyn StepRunner>,
}

/// What a finished unit hands back to the coordinator
#[derive(Debug, Clone)]
pub struct UnitResult {
    pub id: usize,
    pub status: RunStatus,
    pub steps: Vec<StepResult>,
    /// Variable writes, applied by the coordinator
    pub variables: Vec<(String, String)>,
    pub artifacts: Vec<ArtifactRef>,
    pub error: Option<String>,
    /// Strict-mode condition failure; aborts the run
    pub abort: Option<ConditionError>,
    pub duration: Duration,
}

impl UnitResult {
    /// Failed result for a unit whose task died before reporting back
    pub fn failed(id: usize, error: impl Into<String>) -> Self {
        Self {
            id,
            status: RunStatus::Failed,
            steps: Vec::new(),
            variables: Vec::new(),
            artifacts: Vec::new(),
            error: Some(error.into()),
            abort: None,
            duration: Duration::ZERO,
        }
    }
}

/// Run a unit's steps in order.
///
/// A step's condition sees the unit's status so far as its only
/// dependency, so `succeeded()` means no earlier step failed.
pub async fn execute(work: UnitWork) -> UnitResult {
    let started = Instant::now();
    // A timeout too large to represent means no deadline
    let deadline = work
        .job
        .timeout_in_minutes
        .and_then(|minutes| minutes.checked_mul(60))
        .and_then(|secs| tokio::time::Instant::now().checked_add(Duration::from_secs(secs)));

    let mut variables = work.variables.clone();
    let mut result = UnitResult {
        id: work.id,
        status: RunStatus::Succeeded,
        steps: Vec::with_capacity(work.job.steps.len()),
        variables: Vec::new(),
        artifacts: Vec::new(),
        error: None,
        abort: None,
        duration: Duration::ZERO,
    };

    for (index, step) in work.job.steps.iter().enumerate() {
        let label = step.label(index);

        if work.cancel.is_cancelled() {
            result.status = RunStatus::Canceled;
            break;
        }

        if !step.enabled {
            skip_step(&work, &mut result, index, label, "step is disabled".to_string());
            continue;
        }

        let state = vec![(work.job.job.clone(), result.status)];
        let gate = Condition::parse(step.condition.as_deref()).and_then(|condition| {
            let context = ConditionContext::new(&variables, &work.parameters, &work.trigger)
                .with_dependencies(&state)
                .with_matrix(&work.matrix)
                .strict(work.strict);
            condition.gate(&context)
        });

        match gate {
            Ok(true) => {}
            Ok(false) => {
                skip_step(&work, &mut result, index, label, "condition evaluated to false".to_string());
                continue;
            }
            Err(err) if work.strict => {
                result.status = RunStatus::Failed;
                result.error = Some(err.to_string());
                result.abort = Some(err);
                break;
            }
            Err(err) => {
                skip_step(&work, &mut result, index, label, format!("condition error: {}", err));
                continue;
            }
        }

        work.events.send_event(ExecutionEvent::StepStarted {
            unit: work.name.clone(),
            step_index: index,
            label: label.clone(),
        });

        let context = StepContext {
            unit: work.name.clone(),
            step_index: index,
            variables: variables.clone(),
            working_dir: work.working_dir.clone(),
            shell: work.shell.clone(),
            cancel: work.cancel.clone(),
            events: work.events.clone(),
            artifacts: work.artifacts.clone(),
        };

        let step_started = Instant::now();
        let mut timed_out = false;
        let outcome = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, work.runner.run(step, &context)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        timed_out = true;
                        StepOutcome::failed(format!(
                            "timed out after {} minute(s)",
                            work.job.timeout_in_minutes.unwrap_or_default()
                        ))
                    }
                }
            }
            None => work.runner.run(step, &context).await,
        };
        let duration = step_started.elapsed();

        let status = match outcome.status {
            StepStatus::Failed if step.continue_on_error => StepStatus::SucceededWithIssues,
            other => other,
        };

        for (name, value) in &outcome.variables {
            variables.insert(name.clone(), value.clone());
        }
        result.variables.extend(outcome.variables.iter().cloned());
        result.artifacts.extend(outcome.artifacts.iter().cloned());

        work.events.send_event(ExecutionEvent::StepCompleted {
            unit: work.name.clone(),
            step_index: index,
            status,
            duration,
            exit_code: outcome.exit_code,
        });

        result.steps.push(StepResult {
            index,
            label: label.clone(),
            status,
            exit_code: outcome.exit_code,
            duration,
            message: outcome.error.clone(),
        });

        match status {
            StepStatus::Canceled => {
                result.status = RunStatus::Canceled;
                break;
            }
            StepStatus::Failed => {
                result.status = RunStatus::Failed;
                if result.error.is_none() {
                    result.error = Some(format!(
                        "step '{}' failed{}",
                        label,
                        outcome.error.map(|e| format!(": {}", e)).unwrap_or_default()
                    ));
                }
                if timed_out {
                    break;
                }
            }
            _ => {}
        }
    }

    result.duration = started.elapsed();
    result
}

fn skip_step(work: &UnitWork, result: &mut UnitResult, index: usize, label: String, reason: String) {
    tracing::debug!(unit = %work.name, step = %label, %reason, "step skipped");
    work.events.send_event(ExecutionEvent::StepSkipped {
        unit: work.name.clone(),
        step_index: index,
        reason: reason.clone(),
    });
    result.steps.push(StepResult {
        index,
        label,
        status: StepStatus::Skipped,
        exit_code: None,
        duration: Duration::ZERO,
        message: Some(reason),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::parser::models::{ScriptStep, Step, StepAction};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Runner that fails scripts containing "fail" and records what ran
    #[derive(Default)]
    struct Scripted {
        ran: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl StepRunner for Scripted {
        async fn run(&self, step: &Step, context: &StepContext) -> StepOutcome {
            let StepAction::Script(script) = &step.action else {
                return StepOutcome::succeeded();
            };
            let text = context.expand(&script.script);
            self.ran.lock().unwrap().push(text.clone());
            if text.contains("fail") {
                return StepOutcome::failed("boom");
            }
            if let Some(rest) = text.strip_prefix("set ") {
                let (name, value) = rest.split_once('=').unwrap();
                return StepOutcome {
                    variables: vec![(name.to_string(), value.to_string())],
                    ..StepOutcome::succeeded()
                };
            }
            if text == "hang" {
                context.cancel.cancelled().await;
                return StepOutcome::canceled();
            }
            StepOutcome::succeeded()
        }
    }

    fn script(text: &str, condition: Option<&str>) -> Step {
        Step {
            name: None,
            display_name: None,
            condition: condition.map(str::to_string),
            continue_on_error: false,
            enabled: true,
            env: HashMap::new(),
            action: StepAction::Script(ScriptStep {
                script: text.to_string(),
                working_directory: None,
            }),
        }
    }

    fn work(steps: Vec<Step>, runner: Arc<Scripted>) -> UnitWork {
        UnitWork {
            id: 0,
            name: "Build/Compile".to_string(),
            job: Arc::new(Job {
                job: "Compile".to_string(),
                steps,
                ..Default::default()
            }),
            variables: Variables::new(),
            matrix: Vec::new(),
            parameters: Arc::new(ResolvedParameters::default()),
            trigger: Arc::new(TriggerContext::new("main", "Manual", "app")),
            strict: false,
            working_dir: PathBuf::from("."),
            shell: "sh".to_string(),
            cancel: CancellationToken::new(),
            events: None,
            artifacts: Arc::new(InMemoryArtifactStore::new()),
            runner,
        }
    }

    fn unit(status: RunStatus) -> RunUnit {
        RunUnit {
            id: 0,
            name: "Build/Compile".to_string(),
            stage: "Build".to_string(),
            job: "Compile".to_string(),
            stage_index: 0,
            job_index: 0,
            matrix: Vec::new(),
            status,
            reason: None,
        }
    }

    #[test]
    fn test_state_machine() {
        let mut u = unit(RunStatus::Pending);
        assert!(!u.transition(RunStatus::Running));
        assert!(u.transition(RunStatus::Ready));
        assert!(u.transition(RunStatus::Running));
        assert!(u.transition(RunStatus::Succeeded));
        assert!(!u.transition(RunStatus::Canceled));
        assert_eq!(u.status, RunStatus::Succeeded);

        let mut skipped = unit(RunStatus::Pending);
        assert!(skipped.finish(RunStatus::Skipped, Some("not targeted".to_string())));
        assert_eq!(skipped.reason.as_deref(), Some("not targeted"));
        assert!(!skipped.transition(RunStatus::Ready));
    }

    #[tokio::test]
    async fn test_failure_skips_later_steps_unless_opted_in() {
        let runner = Arc::new(Scripted::default());
        let result = execute(work(
            vec![
                script("compile", None),
                script("fail now", None),
                script("package", None),
                script("cleanup", Some("always()")),
            ],
            runner.clone(),
        ))
        .await;

        assert_eq!(result.status, RunStatus::Failed);
        let statuses: Vec<StepStatus> = result.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                StepStatus::Succeeded,
                StepStatus::Failed,
                StepStatus::Skipped,
                StepStatus::Succeeded
            ]
        );
        assert_eq!(*runner.ran.lock().unwrap(), vec!["compile", "fail now", "cleanup"]);
    }

    #[tokio::test]
    async fn test_continue_on_error_and_disabled() {
        let mut flaky = script("fail softly", None);
        flaky.continue_on_error = true;
        let mut disabled = script("never", None);
        disabled.enabled = false;

        let result = execute(work(
            vec![flaky, disabled, script("after", None)],
            Arc::new(Scripted::default()),
        ))
        .await;

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.steps[0].status, StepStatus::SucceededWithIssues);
        assert_eq!(result.steps[1].status, StepStatus::Skipped);
        assert_eq!(result.steps[2].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_variable_writes_visible_to_later_steps() {
        let runner = Arc::new(Scripted::default());
        let result = execute(work(
            vec![
                script("set version=2.0", None),
                script("release $(version)", Some("eq(variables.version, '2.0')")),
            ],
            runner.clone(),
        ))
        .await;

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.variables, vec![("version".to_string(), "2.0".to_string())]);
        assert_eq!(runner.ran.lock().unwrap()[1], "release 2.0");
    }

    #[tokio::test]
    async fn test_strict_condition_error_aborts() {
        let mut w = work(
            vec![script("deploy", Some("eq(variables.missing, 'x')"))],
            Arc::new(Scripted::default()),
        );
        w.strict = true;
        let result = execute(w).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert!(matches!(
            result.abort,
            Some(ConditionError::UnresolvedReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_huge_timeout_means_no_deadline() {
        let mut w = work(vec![script("compile", None)], Arc::new(Scripted::default()));
        w.job = Arc::new(Job {
            timeout_in_minutes: Some(300_000_000_000_000_000),
            ..(*w.job).clone()
        });

        let result = execute(w).await;
        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.steps[0].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_cancellation_stops_unit() {
        let w = work(
            vec![script("hang", None), script("never", None)],
            Arc::new(Scripted::default()),
        );
        let cancel = w.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let result = execute(w).await;
        assert_eq!(result.status, RunStatus::Canceled);
        assert_eq!(result.steps.len(), 1);
    }
}
