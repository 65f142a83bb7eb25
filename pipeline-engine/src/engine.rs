// Engine
// Load, plan and run a definition in one call

use crate::artifacts::{ArtifactStore, InMemoryArtifactStore};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::execution::context::TriggerContext;
use crate::execution::events::ProgressSender;
use crate::execution::plan::ExecutionPlan;
use crate::execution::report::RunReport;
use crate::execution::scheduler::Scheduler;
use crate::execution::target::TargetFilter;
use crate::parser::loader::{DefinitionLoader, LoadedDefinition};
use crate::runners::{ShellRunner, StepRunner};

use serde_yaml::Value as Yaml;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One invocation: which definition, with what parameters, narrowed to what
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub definition: PathBuf,
    pub parameters: HashMap<String, Yaml>,
    pub targets: Vec<String>,
    pub trigger: TriggerContext,
}

impl RunRequest {
    pub fn new(definition: impl Into<PathBuf>) -> Self {
        Self {
            definition: definition.into(),
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Yaml) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerContext) -> Self {
        self.trigger = trigger;
        self
    }
}

pub struct Engine {
    config: EngineConfig,
    runner: Arc<dyn StepRunner>,
    artifacts: Arc<dyn ArtifactStore>,
    events: Option<ProgressSender>,
}

impl Engine {
    /// Shell steps and an in-memory artifact store
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            runner: Arc::new(ShellRunner::new()),
            artifacts: Arc::new(InMemoryArtifactStore::new()),
            events: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn artifacts(&self) -> Arc<dyn ArtifactStore> {
        self.artifacts.clone()
    }

    /// Parse, materialize templates, resolve parameters and validate
    pub fn load(&self, request: &RunRequest) -> Result<LoadedDefinition, EngineError> {
        tracing::debug!(definition = %request.definition.display(), "loading definition");
        let loaded = DefinitionLoader::new().load_file(&request.definition, &request.parameters)?;
        Ok(loaded)
    }

    /// Everything short of running: the expanded, targeted unit list
    pub fn plan(&self, request: &RunRequest) -> Result<ExecutionPlan, EngineError> {
        let targets = TargetFilter::parse_all(&request.targets)?;
        let loaded = self.load(request)?;
        Ok(ExecutionPlan::build(&loaded, &targets)?)
    }

    /// Load, plan and schedule. Definition errors surface before any unit runs.
    pub async fn run(&self, request: &RunRequest, cancel: CancellationToken) -> Result<RunReport, EngineError> {
        let plan = self.plan(request)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        let mut scheduler = Scheduler::new(self.config.clone(), self.runner.clone(), self.artifacts.clone());
        if let Some(tx) = &self.events {
            scheduler = scheduler.with_events(tx.clone());
        }

        Ok(scheduler.run(plan, request.trigger.clone(), cancel).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::report::RunOutcome;
    use crate::parser::models::RunStatus;
    use tempfile::TempDir;

    fn write_definition(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("pipeline.yml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_plan_reports_definition_errors() {
        let dir = TempDir::new().unwrap();
        let path = write_definition(
            &dir,
            "stages:\n  - stage: A\n    dependsOn: B\n    jobs: []\n  - stage: B\n    dependsOn: A\n    jobs: []\n",
        );

        let err = Engine::new(EngineConfig::default())
            .plan(&RunRequest::new(path))
            .unwrap_err();
        assert!(matches!(err, EngineError::Definition(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_plan_rejects_bad_target() {
        let dir = TempDir::new().unwrap();
        let path = write_definition(&dir, "stages: []\n");

        let err = Engine::new(EngineConfig::default())
            .plan(&RunRequest::new(path).with_target("a/b/c"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Target(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_shell_runner() {
        let dir = TempDir::new().unwrap();
        let path = write_definition(
            &dir,
            r###"
parameters:
  - name: greeting
    type: string
    default: hello
stages:
  - stage: Build
    jobs:
      - job: Compile
        steps:
          - script: echo "##vso[task.setvariable variable=message]${{ parameters.greeting }}"
  - stage: Test
    jobs:
      - job: Check
        steps:
          - script: test "$(message)" = "howdy"
"###,
        );

        let config = EngineConfig {
            working_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let request = RunRequest::new(path).with_parameter("greeting", Yaml::from("howdy"));
        let report = Engine::new(config)
            .run(&request, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert_eq!(report.variables.get("message").map(String::as_str), Some("howdy"));
        assert_eq!(report.unit("Test/Check").map(|u| u.status), Some(RunStatus::Succeeded));
    }
}
