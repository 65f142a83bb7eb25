// Runners Module
// Step execution contract and the unit-scoped context a step runs in

pub mod shell;

pub use shell::ShellRunner;

use crate::artifacts::{ArtifactRef, ArtifactStore};
use crate::execution::context::Variables;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::expression::lexer::{extract_segments, Segment};
use crate::parser::models::{Step, StepStatus};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a runner may use while executing one step of one unit
#[derive(Clone)]
pub struct StepContext {
    /// Qualified unit name, `Stage/Job[axis=value]`
    pub unit: String,
    pub step_index: usize,
    /// Unit-local variables: dispatch snapshot, scope variables, matrix
    /// values and writes from earlier steps of the same unit
    pub variables: Variables,
    pub working_dir: PathBuf,
    pub shell: String,
    pub cancel: CancellationToken,
    pub events: Option<ProgressSender>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl StepContext {
    /// Replace `$(name)` macros with variable values; unknown names stay as written
    pub fn expand(&self, text: &str) -> String {
        expand_macros(text, &self.variables)
    }

    /// Process environment for a step: every variable under its
    /// environment name, then the step's own `env`
    pub fn environment(&self, step: &Step) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .variables
            .iter()
            .map(|(name, value)| (environment_name(name), value.clone()))
            .collect();
        for (name, value) in &step.env {
            env.insert(name.clone(), self.expand(value));
        }
        env
    }

    pub fn emit(&self, event: ExecutionEvent) {
        self.events.send_event(event);
    }
}

/// What a runner reports back for one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    /// `task.setvariable` writes, in output order
    pub variables: Vec<(String, String)>,
    pub artifacts: Vec<ArtifactRef>,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn succeeded() -> Self {
        Self {
            status: StepStatus::Succeeded,
            exit_code: None,
            variables: Vec::new(),
            artifacts: Vec::new(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            error: Some(error.into()),
            ..Self::succeeded()
        }
    }

    pub fn canceled() -> Self {
        Self {
            status: StepStatus::Canceled,
            ..Self::succeeded()
        }
    }
}

/// Trait for step runners.
///
/// The scheduler treats steps as opaque; a runner must observe
/// `context.cancel` and stop promptly once it fires.
#[async_trait::async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &Step, context: &StepContext) -> StepOutcome;
}

/// `Build.Reason` becomes `BUILD_REASON`
pub fn environment_name(name: &str) -> String {
    name.replace(['.', ' '], "_").to_uppercase()
}

pub fn expand_macros(text: &str, variables: &Variables) -> String {
    if !text.contains("$(") {
        return text.to_string();
    }

    let mut result = String::with_capacity(text.len());
    for segment in extract_segments(text) {
        match segment {
            Segment::Text(s) => result.push_str(&s),
            Segment::Macro(name) => match variables.get(&name) {
                Some(value) => result.push_str(value),
                None => {
                    result.push_str("$(");
                    result.push_str(&name);
                    result.push(')');
                }
            },
            Segment::Expression(expr) => {
                result.push_str("${{ ");
                result.push_str(&expr);
                result.push_str(" }}");
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::parser::models::{ScriptStep, StepAction};

    fn context(variables: &[(&str, &str)]) -> StepContext {
        let mut vars = Variables::new();
        for (name, value) in variables {
            vars.insert(*name, *value);
        }
        StepContext {
            unit: "Build/Compile".to_string(),
            step_index: 0,
            variables: vars,
            working_dir: PathBuf::from("."),
            shell: "sh".to_string(),
            cancel: CancellationToken::new(),
            events: None,
            artifacts: Arc::new(InMemoryArtifactStore::new()),
        }
    }

    #[test]
    fn test_expand_macros() {
        let ctx = context(&[("os", "linux"), ("Build.Reason", "Manual")]);
        assert_eq!(ctx.expand("wheels-$(os)"), "wheels-linux");
        assert_eq!(ctx.expand("$(build.reason)/$(missing)"), "Manual/$(missing)");
        assert_eq!(ctx.expand("no macros"), "no macros");
    }

    #[test]
    fn test_environment_names() {
        assert_eq!(environment_name("Build.SourceBranch"), "BUILD_SOURCEBRANCH");
        assert_eq!(environment_name("pyver"), "PYVER");
    }

    #[test]
    fn test_step_env_overrides_variables() {
        let ctx = context(&[("configuration", "Debug"), ("os", "linux")]);
        let step = Step {
            name: None,
            display_name: None,
            condition: None,
            continue_on_error: false,
            enabled: true,
            env: HashMap::from([("TARGET".to_string(), "$(os)-x64".to_string())]),
            action: StepAction::Script(ScriptStep {
                script: "true".to_string(),
                working_directory: None,
            }),
        };

        let env = ctx.environment(&step);
        assert_eq!(env.get("CONFIGURATION").map(String::as_str), Some("Debug"));
        assert_eq!(env.get("TARGET").map(String::as_str), Some("linux-x64"));
    }
}
