// Scheduler
// Dispatches run units onto a bounded pool as their dependencies settle

use crate::artifacts::{ArtifactRef, ArtifactStore};
use crate::config::EngineConfig;
use crate::error::ConditionError;
use crate::execution::context::{TriggerContext, Variables};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::plan::{ExecutionPlan, NOT_TARGETED};
use crate::execution::report::{RunOutcome, RunReport, StageReport, UnitReport};
use crate::execution::unit::{self, UnitResult, UnitWork};
use crate::expression::condition::Condition;
use crate::expression::evaluator::ConditionContext;
use crate::parser::models::RunStatus;
use crate::runners::StepRunner;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Runs an execution plan to completion
pub struct Scheduler {
    config: EngineConfig,
    runner: Arc<dyn StepRunner>,
    artifacts: Arc<dyn ArtifactStore>,
    events: Option<ProgressSender>,
}

impl Scheduler {
    pub fn new(
        config: EngineConfig,
        runner: Arc<dyn StepRunner>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            runner,
            artifacts,
            events: None,
        }
    }

    /// Set progress event sender
    pub fn with_events(mut self, tx: ProgressSender) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute `plan`. Canceling `cancel` stops dispatch, cancels running
    /// units and waits up to the grace period for them to wind down.
    pub async fn run(
        &self,
        plan: ExecutionPlan,
        trigger: TriggerContext,
        cancel: CancellationToken,
    ) -> RunReport {
        Run::new(self, plan, trigger, cancel).drive().await
    }
}

#[derive(Debug)]
struct JobState {
    status: RunStatus,
    remaining: usize,
    activated: bool,
    open_units: usize,
    running: usize,
}

#[derive(Debug)]
struct StageState {
    status: RunStatus,
    remaining: usize,
    activated: bool,
    open_jobs: usize,
    started: Option<Instant>,
    duration: Duration,
    reason: Option<String>,
    jobs: Vec<JobState>,
}

/// Gate outcome for one unit
enum Decision {
    Ready,
    Skip(String),
    Fail(String),
    Abort(ConditionError),
}

/// Coordinator state for one run. Only this task mutates statuses and
/// variables; units get snapshots and report back through the join set.
struct Run<'a> {
    scheduler: &'a Scheduler,
    plan: ExecutionPlan,
    trigger: Arc<TriggerContext>,
    operator: CancellationToken,
    token: CancellationToken,
    working_dir: PathBuf,
    variables: Variables,
    stages: Vec<StageState>,
    ready: VecDeque<usize>,
    tasks: JoinSet<UnitResult>,
    /// Task id to unit, so a task that dies without reporting is still attributed
    spawned: HashMap<Id, usize>,
    results: HashMap<usize, UnitResult>,
    artifacts: Vec<ArtifactRef>,
    aborted: bool,
    stopping: bool,
    started: Instant,
}

impl<'a> Run<'a> {
    fn new(
        scheduler: &'a Scheduler,
        plan: ExecutionPlan,
        trigger: TriggerContext,
        cancel: CancellationToken,
    ) -> Self {
        let stages = plan
            .graph
            .stages
            .iter()
            .map(|node| StageState {
                status: RunStatus::Pending,
                remaining: node.node.dependencies.len(),
                activated: false,
                open_jobs: node.jobs.len(),
                started: None,
                duration: Duration::ZERO,
                reason: None,
                jobs: node
                    .jobs
                    .iter()
                    .map(|job| JobState {
                        status: RunStatus::Pending,
                        remaining: job.dependencies.len(),
                        activated: false,
                        open_units: 0,
                        running: 0,
                    })
                    .collect(),
            })
            .collect();

        Self {
            scheduler,
            variables: Variables::from_map(plan.variables.clone()),
            plan,
            trigger: Arc::new(trigger),
            token: cancel.child_token(),
            operator: cancel,
            working_dir: scheduler.config.working_dir(),
            stages,
            ready: VecDeque::new(),
            tasks: JoinSet::new(),
            spawned: HashMap::new(),
            results: HashMap::new(),
            artifacts: Vec::new(),
            aborted: false,
            stopping: false,
            started: Instant::now(),
        }
    }

    async fn drive(mut self) -> RunReport {
        let total_units = self
            .plan
            .units
            .iter()
            .filter(|u| u.status == RunStatus::Pending)
            .count();
        tracing::info!(
            pipeline = %self.plan.pipeline,
            units = total_units,
            max_concurrency = self.scheduler.config.max_concurrency,
            "run started"
        );
        self.emit(ExecutionEvent::RunStarted {
            pipeline: self.plan.pipeline.clone(),
            total_units,
        });

        for stage in self.plan.graph.topological_order() {
            if self.stages[stage].remaining == 0 {
                self.activate_stage(stage);
            }
        }

        loop {
            if self.token.is_cancelled() && !self.stopping {
                self.stop();
            }
            if self.stopping {
                self.drain().await;
                break;
            }

            self.dispatch();
            if self.tasks.is_empty() {
                break;
            }

            let token = self.token.clone();
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                joined = self.tasks.join_next_with_id() => {
                    if let Some(joined) = joined {
                        self.joined(joined);
                    }
                }
            }
        }

        self.finish()
    }

    fn emit(&self, event: ExecutionEvent) {
        self.scheduler.events.send_event(event);
    }

    fn strict(&self) -> bool {
        self.scheduler.config.strict_conditions
    }

    fn halted(&self) -> bool {
        self.stopping || self.token.is_cancelled()
    }

    // =========================================================================
    // Stages
    // =========================================================================

    fn activate_stage(&mut self, s: usize) {
        if self.halted() || self.stages[s].activated {
            return;
        }
        self.stages[s].activated = true;

        if !self.plan.stages[s].targeted {
            for job in &mut self.stages[s].jobs {
                job.activated = true;
                job.status = RunStatus::Skipped;
            }
            self.finish_stage(s, RunStatus::Skipped, Some(NOT_TARGETED.to_string()));
            return;
        }

        let dependencies = self.stage_dependencies(s);
        let stage = &self.plan.stages[s];
        let variables = self.variables.layered(&stage.variables);
        let context = ConditionContext::new(&variables, &self.plan.parameters, &self.trigger)
            .with_dependencies(&dependencies)
            .strict(self.strict());

        match stage.condition.gate(&context) {
            Ok(true) => self.start_stage(s),
            Ok(false) => {
                let reason = skip_reason(&stage.condition, &dependencies);
                self.skip_stage(s, reason);
            }
            Err(err) if self.strict() => {
                tracing::error!(stage = %stage.name, error = %err, "stage condition failed");
                let reason = err.to_string();
                self.stages[s].reason = Some(reason.clone());
                let ids: Vec<usize> = stage.jobs.iter().flat_map(|j| j.units.iter().copied()).collect();
                for id in ids {
                    self.plan.units[id].finish(RunStatus::Failed, Some(reason.clone()));
                }
                self.abort(err);
            }
            Err(err) => self.skip_stage(s, format!("condition error: {}", err)),
        }
    }

    fn start_stage(&mut self, s: usize) {
        let stage = &self.plan.stages[s];
        let total_units = stage
            .jobs
            .iter()
            .flat_map(|j| &j.units)
            .filter(|&&id| self.plan.units[id].status == RunStatus::Pending)
            .count();

        tracing::info!(stage = %stage.name, units = total_units, "stage started");
        self.emit(ExecutionEvent::StageStarted {
            stage: stage.name.clone(),
            display_name: stage.display_name.clone(),
            total_units,
        });

        let state = &mut self.stages[s];
        state.status = RunStatus::Running;
        state.started = Some(Instant::now());

        for j in 0..self.plan.stages[s].jobs.len() {
            if self.stages[s].jobs[j].activated {
                continue;
            }
            if !self.plan.stages[s].jobs[j].targeted {
                self.stages[s].jobs[j].activated = true;
                self.complete_job(s, j);
            } else if self.stages[s].jobs[j].remaining == 0 {
                self.activate_job(s, j);
            }
        }

        if self.stages[s].jobs.is_empty() {
            self.complete_stage(s);
        }
    }

    fn skip_stage(&mut self, s: usize, reason: String) {
        tracing::info!(stage = %self.plan.stages[s].name, %reason, "stage skipped");
        let ids: Vec<usize> = self.plan.stages[s]
            .jobs
            .iter()
            .flat_map(|j| j.units.iter().copied())
            .collect();
        for id in ids {
            self.skip_unit(id, reason.clone());
        }
        for job in &mut self.stages[s].jobs {
            job.activated = true;
            job.status = RunStatus::Skipped;
        }
        self.finish_stage(s, RunStatus::Skipped, Some(reason));
    }

    fn complete_stage(&mut self, s: usize) {
        if self.stages[s].status.is_terminal() {
            return;
        }
        let status = RunStatus::aggregate(self.stages[s].jobs.iter().map(|j| j.status));
        self.finish_stage(s, status, None);
    }

    fn finish_stage(&mut self, s: usize, status: RunStatus, reason: Option<String>) {
        let state = &mut self.stages[s];
        state.status = status;
        state.duration = state.started.map(|t| t.elapsed()).unwrap_or_default();
        if reason.is_some() {
            state.reason = reason.clone();
        }
        let duration = state.duration;

        let name = self.plan.stages[s].name.clone();
        match reason {
            Some(reason) if status == RunStatus::Skipped => {
                self.emit(ExecutionEvent::StageSkipped { stage: name, reason })
            }
            _ => {
                tracing::info!(stage = %name, %status, "stage completed");
                self.emit(ExecutionEvent::StageCompleted {
                    stage: name,
                    status,
                    duration,
                });
            }
        }

        let dependents = self.plan.graph.stages[s].node.dependents.clone();
        for d in dependents {
            self.stages[d].remaining = self.stages[d].remaining.saturating_sub(1);
            if self.stages[d].remaining == 0 {
                self.activate_stage(d);
            }
        }
    }

    /// Statuses of targeted upstream stages; untargeted ones count as satisfied
    fn stage_dependencies(&self, s: usize) -> Vec<(String, RunStatus)> {
        self.plan.graph.stages[s]
            .node
            .dependencies
            .iter()
            .filter(|&&d| self.plan.stages[d].targeted)
            .map(|&d| (self.plan.stages[d].name.clone(), self.stages[d].status))
            .collect()
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    fn activate_job(&mut self, s: usize, j: usize) {
        if self.halted() || self.stages[s].jobs[j].activated {
            return;
        }
        self.stages[s].jobs[j].activated = true;

        let decisions = self.gate_units(s, j);
        let mut open = 0;
        for (id, decision) in decisions {
            match decision {
                Decision::Ready => {
                    if self.plan.units[id].transition(RunStatus::Ready) {
                        self.ready.push_back(id);
                        open += 1;
                    }
                }
                Decision::Skip(reason) => self.skip_unit(id, reason),
                Decision::Fail(reason) => {
                    tracing::error!(unit = %self.plan.units[id].name, %reason, "unit failed before dispatch");
                    self.plan.units[id].finish(RunStatus::Failed, Some(reason.clone()));
                    self.emit(ExecutionEvent::error(reason, Some(self.plan.units[id].name.clone())));
                    self.emit(ExecutionEvent::UnitCompleted {
                        unit: self.plan.units[id].name.clone(),
                        status: RunStatus::Failed,
                        duration: Duration::ZERO,
                    });
                }
                Decision::Abort(err) => {
                    self.plan.units[id].finish(RunStatus::Failed, Some(err.to_string()));
                    self.abort(err);
                }
            }
        }

        self.stages[s].jobs[j].open_units = open;
        if open == 0 {
            self.complete_job(s, j);
        }
    }

    /// Evaluate the job condition once per pending unit so `matrix.*` resolves
    fn gate_units(&self, s: usize, j: usize) -> Vec<(usize, Decision)> {
        let stage = &self.plan.stages[s];
        let job = &stage.jobs[j];
        let dependencies = self.job_dependencies(s, j);
        let variables = self
            .variables
            .layered(&stage.variables)
            .layered(&job.job.variables);
        let strict = self.strict();

        job.units
            .iter()
            .filter(|&&id| self.plan.units[id].status == RunStatus::Pending)
            .map(|&id| {
                let unit = &self.plan.units[id];
                let context = ConditionContext::new(&variables, &self.plan.parameters, &self.trigger)
                    .with_dependencies(&dependencies)
                    .with_matrix(&unit.matrix)
                    .strict(strict);

                let decision = match job.condition.gate(&context) {
                    Ok(true) => match &job.expansion_error {
                        Some(err) => Decision::Fail(err.to_string()),
                        None => Decision::Ready,
                    },
                    Ok(false) => Decision::Skip(skip_reason(&job.condition, &dependencies)),
                    Err(err) if strict => Decision::Abort(err),
                    Err(err) => Decision::Skip(format!("condition error: {}", err)),
                };
                (id, decision)
            })
            .collect()
    }

    fn complete_job(&mut self, s: usize, j: usize) {
        let status = RunStatus::aggregate(
            self.plan.stages[s].jobs[j]
                .units
                .iter()
                .map(|&id| self.plan.units[id].status),
        );
        self.stages[s].jobs[j].status = status;
        tracing::debug!(
            stage = %self.plan.stages[s].name,
            job = %self.plan.stages[s].jobs[j].name,
            %status,
            "job completed"
        );

        let dependents = self.plan.graph.stages[s].jobs[j].dependents.clone();
        for d in dependents {
            let job = &mut self.stages[s].jobs[d];
            job.remaining = job.remaining.saturating_sub(1);
            if job.remaining == 0 && self.plan.stages[s].jobs[d].targeted {
                self.activate_job(s, d);
            }
        }

        let state = &mut self.stages[s];
        state.open_jobs = state.open_jobs.saturating_sub(1);
        if state.open_jobs == 0 {
            self.complete_stage(s);
        }
    }

    fn job_dependencies(&self, s: usize, j: usize) -> Vec<(String, RunStatus)> {
        self.plan.graph.stages[s].jobs[j]
            .dependencies
            .iter()
            .filter(|&&d| self.plan.stages[s].jobs[d].targeted)
            .map(|&d| (self.plan.stages[s].jobs[d].name.clone(), self.stages[s].jobs[d].status))
            .collect()
    }

    // =========================================================================
    // Units
    // =========================================================================

    fn skip_unit(&mut self, id: usize, reason: String) {
        let unit = &mut self.plan.units[id];
        if unit.finish(RunStatus::Skipped, Some(reason.clone())) {
            tracing::debug!(unit = %unit.name, %reason, "unit skipped");
            let name = unit.name.clone();
            self.emit(ExecutionEvent::UnitSkipped { unit: name, reason });
        }
    }

    fn has_capacity(&self, id: usize) -> bool {
        let unit = &self.plan.units[id];
        let limit = self.plan.stages[unit.stage_index].jobs[unit.job_index]
            .job
            .max_parallel
            .unwrap_or(usize::MAX);
        self.stages[unit.stage_index].jobs[unit.job_index].running < limit
    }

    fn dispatch(&mut self) {
        let capacity = self.scheduler.config.max_concurrency.max(1);
        while self.tasks.len() < capacity {
            let Some(position) = self.ready.iter().position(|&id| self.has_capacity(id)) else {
                break;
            };
            let Some(id) = self.ready.remove(position) else {
                break;
            };
            self.spawn_unit(id);
        }
    }

    fn spawn_unit(&mut self, id: usize) {
        if !self.plan.units[id].transition(RunStatus::Running) {
            return;
        }
        let unit = &self.plan.units[id];
        let (s, j) = (unit.stage_index, unit.job_index);
        let stage = &self.plan.stages[s];
        let job = &stage.jobs[j];

        let mut snapshot = Variables::new();
        for (name, value) in self.trigger.predefined_variables() {
            snapshot.insert(name, value);
        }
        for (name, value) in self.variables.iter() {
            snapshot.insert(name.clone(), value.clone());
        }
        let mut variables = snapshot.layered(&stage.variables).layered(&job.job.variables);
        for (axis, value) in &unit.matrix {
            variables.insert(axis.clone(), value.clone());
        }

        let work = UnitWork {
            id,
            name: unit.name.clone(),
            job: job.job.clone(),
            variables,
            matrix: unit.matrix.clone(),
            parameters: self.plan.parameters.clone(),
            trigger: self.trigger.clone(),
            strict: self.strict(),
            working_dir: self.working_dir.clone(),
            shell: self.scheduler.config.shell.clone(),
            cancel: self.token.child_token(),
            events: self.scheduler.events.clone(),
            artifacts: self.scheduler.artifacts.clone(),
            runner: self.scheduler.runner.clone(),
        };

        tracing::info!(unit = %unit.name, "unit dispatched");
        self.emit(ExecutionEvent::UnitStarted {
            unit: unit.name.clone(),
            stage: unit.stage.clone(),
            job: unit.job.clone(),
            matrix: unit.matrix.clone(),
            total_steps: job.job.steps.len(),
        });

        self.stages[s].jobs[j].running += 1;
        let handle = self.tasks.spawn(unit::execute(work));
        self.spawned.insert(handle.id(), id);
    }

    fn joined(&mut self, joined: Result<(Id, UnitResult), JoinError>) {
        match joined {
            Ok((task, result)) => {
                self.spawned.remove(&task);
                self.complete_unit(result);
            }
            Err(err) => {
                let Some(id) = self.spawned.remove(&err.id()) else {
                    return;
                };
                // Aborted after the grace period; finish() marks these canceled
                if err.is_cancelled() {
                    return;
                }
                tracing::error!(unit = %self.plan.units[id].name, error = %err, "unit task panicked");
                self.complete_unit(UnitResult::failed(id, format!("unit panicked: {}", err)));
            }
        }
    }

    fn complete_unit(&mut self, result: UnitResult) {
        let id = result.id;
        let status = result.status;
        let unit = &mut self.plan.units[id];
        unit.finish(status, result.error.clone());
        let (s, j, name) = (unit.stage_index, unit.job_index, unit.name.clone());

        tracing::info!(unit = %name, %status, duration_ms = result.duration.as_millis() as u64, "unit completed");
        if status == RunStatus::Canceled {
            self.emit(ExecutionEvent::UnitCanceled { unit: name.clone() });
        }
        self.emit(ExecutionEvent::UnitCompleted {
            unit: name.clone(),
            status,
            duration: result.duration,
        });

        // Writes land in completion order; the last completion wins
        if !result.variables.is_empty() {
            let version = self.variables.apply(result.variables.iter().cloned());
            for (variable, value) in &result.variables {
                tracing::debug!(unit = %name, variable = %variable, version, "variable set");
                self.emit(ExecutionEvent::VariableSet {
                    unit: name.clone(),
                    name: variable.clone(),
                    value: value.clone(),
                    version,
                });
            }
        }

        for artifact in &result.artifacts {
            self.emit(ExecutionEvent::ArtifactPublished {
                unit: name.clone(),
                artifact: artifact.clone(),
            });
            self.artifacts.push(artifact.clone());
        }

        if let Some(err) = result.abort.clone() {
            self.abort(err);
        }

        let job = &mut self.stages[s].jobs[j];
        job.running = job.running.saturating_sub(1);
        job.open_units = job.open_units.saturating_sub(1);
        let done = job.open_units == 0;
        self.results.insert(id, result);

        if done {
            self.complete_job(s, j);
        }
    }

    // =========================================================================
    // Stopping
    // =========================================================================

    fn abort(&mut self, err: ConditionError) {
        if self.aborted {
            return;
        }
        tracing::error!(error = %err, "run aborted");
        self.emit(ExecutionEvent::error(format!("run aborted: {}", err), None));
        self.aborted = true;
        self.token.cancel();
    }

    /// Stop dispatching; everything not yet running is canceled
    fn stop(&mut self) {
        self.stopping = true;
        let reason = if self.aborted { "run aborted" } else { "run canceled" };
        tracing::warn!(running = self.tasks.len(), "{}", reason);

        self.ready.clear();
        let events = self.scheduler.events.clone();
        for unit in self
            .plan
            .units
            .iter_mut()
            .filter(|u| matches!(u.status, RunStatus::Pending | RunStatus::Ready))
        {
            if unit.finish(RunStatus::Canceled, Some(reason.to_string())) {
                events.send_event(ExecutionEvent::UnitCanceled {
                    unit: unit.name.clone(),
                });
            }
        }
    }

    /// Wait for running units within the grace period, then abort the rest
    async fn drain(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        let grace = self.scheduler.config.cancel_grace_period();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next_with_id().await {
                self.joined(joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "grace period elapsed, aborting units");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }

    fn finish(mut self) -> RunReport {
        let reason = if self.aborted { "run aborted" } else { "run canceled" };
        for unit in &mut self.plan.units {
            if !unit.status.is_terminal() {
                unit.finish(RunStatus::Canceled, Some(reason.to_string()));
            }
        }

        let outcome = if self.aborted {
            RunOutcome::Aborted
        } else if self.operator.is_cancelled() {
            RunOutcome::Canceled
        } else if self.plan.units.iter().any(|u| u.status == RunStatus::Failed) {
            RunOutcome::Failed
        } else {
            RunOutcome::Succeeded
        };

        let stages: Vec<StageReport> = self
            .plan
            .stages
            .iter()
            .zip(&self.stages)
            .map(|(planned, state)| {
                let status = if state.status.is_terminal() {
                    state.status
                } else {
                    RunStatus::aggregate(
                        planned
                            .jobs
                            .iter()
                            .flat_map(|j| &j.units)
                            .map(|&id| self.plan.units[id].status),
                    )
                };
                StageReport {
                    name: planned.name.clone(),
                    status,
                    reason: state.reason.clone(),
                    duration: state
                        .started
                        .filter(|_| !state.status.is_terminal())
                        .map(|t| t.elapsed())
                        .unwrap_or(state.duration),
                }
            })
            .collect();

        let units: Vec<UnitReport> = self
            .plan
            .units
            .iter()
            .map(|unit| {
                let result = self.results.remove(&unit.id);
                UnitReport {
                    name: unit.name.clone(),
                    stage: unit.stage.clone(),
                    job: unit.job.clone(),
                    matrix: unit.matrix.iter().cloned().collect(),
                    status: unit.status,
                    reason: unit.reason.clone(),
                    steps: result.as_ref().map(|r| r.steps.clone()).unwrap_or_default(),
                    artifacts: result.as_ref().map(|r| r.artifacts.clone()).unwrap_or_default(),
                    duration: result.map(|r| r.duration).unwrap_or_default(),
                }
            })
            .collect();

        let duration = self.started.elapsed();
        tracing::info!(
            pipeline = %self.plan.pipeline,
            %outcome,
            duration_ms = duration.as_millis() as u64,
            "run completed"
        );
        self.emit(ExecutionEvent::RunCompleted {
            pipeline: self.plan.pipeline.clone(),
            outcome,
            duration,
        });

        RunReport {
            pipeline: self.plan.pipeline.clone(),
            outcome,
            units,
            stages,
            variables: self.variables.to_map(),
            artifacts: self.artifacts,
            duration,
        }
    }
}

/// Why a gate came back false
fn skip_reason(condition: &Condition, dependencies: &[(String, RunStatus)]) -> String {
    if !condition.opts_into_failure() {
        if let Some((name, status)) = dependencies
            .iter()
            .find(|(_, status)| *status != RunStatus::Succeeded)
        {
            return format!("dependency '{}' {}", name, status.as_str().to_lowercase());
        }
    }
    "condition evaluated to false".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::execution::target::TargetFilter;
    use crate::parser::loader::DefinitionLoader;
    use crate::parser::models::Step;
    use crate::runners::{StepContext, StepOutcome};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps briefly and tracks the peak number of concurrent steps
    #[derive(Default)]
    struct Counting {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl StepRunner for Counting {
        async fn run(&self, _step: &Step, context: &StepContext) -> StepOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let outcome = tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(30)) => StepOutcome::succeeded(),
                _ = context.cancel.cancelled() => StepOutcome::canceled(),
            };
            self.current.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn plan(source: &str) -> ExecutionPlan {
        let loaded = DefinitionLoader::new()
            .load_str(source, Path::new("."), &HashMap::new())
            .unwrap();
        ExecutionPlan::build(&loaded, &TargetFilter::all()).unwrap()
    }

    /// Panics instead of reporting an outcome
    struct Panicking;

    #[async_trait::async_trait]
    impl StepRunner for Panicking {
        async fn run(&self, _step: &Step, _context: &StepContext) -> StepOutcome {
            panic!("runner blew up")
        }
    }

    fn scheduler(runner: Arc<dyn StepRunner>, max_concurrency: usize) -> Scheduler {
        let config = EngineConfig {
            max_concurrency,
            ..EngineConfig::default()
        };
        Scheduler::new(config, runner, Arc::new(InMemoryArtifactStore::new()))
    }

    const MATRIX: &str = r#"
stages:
  - stage: Test
    jobs:
      - job: Unit
        maxParallel: 2
        matrix:
          dimensions:
            shard: ["1", "2", "3", "4", "5"]
        steps:
          - script: run
"#;

    #[tokio::test]
    async fn test_max_parallel_bounds_units_of_a_job() {
        let runner = Arc::new(Counting::default());
        let report = scheduler(runner.clone(), 8)
            .run(plan(MATRIX), TriggerContext::default(), CancellationToken::new())
            .await;

        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert_eq!(report.units.len(), 5);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_global_concurrency_limit() {
        let runner = Arc::new(Counting::default());
        let source = MATRIX.replace("maxParallel: 2", "maxParallel: 5");
        let report = scheduler(runner.clone(), 1)
            .run(plan(&source), TriggerContext::default(), CancellationToken::new())
            .await;

        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_marks_everything_canceled() {
        let runner = Arc::new(Counting::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let report = scheduler(runner, 1)
            .run(plan(MATRIX), TriggerContext::default(), cancel)
            .await;

        assert_eq!(report.outcome, RunOutcome::Canceled);
        assert_eq!(report.exit_code(), 130);
        assert!(report.units.iter().all(|u| u.status == RunStatus::Canceled));
    }

    #[tokio::test]
    async fn test_panicking_unit_fails_and_skips_dependents() {
        let source = r#"
stages:
  - stage: Build
    jobs:
      - job: Compile
        steps:
          - script: make
  - stage: Test
    jobs:
      - job: Unit
        steps:
          - script: make test
"#;
        let report = scheduler(Arc::new(Panicking), 2)
            .run(plan(source), TriggerContext::default(), CancellationToken::new())
            .await;

        let compile = report.unit("Build/Compile").unwrap();
        assert_eq!(compile.status, RunStatus::Failed);
        assert!(compile.reason.as_deref().unwrap().contains("panicked"));

        let unit = report.unit("Test/Unit").unwrap();
        assert_eq!(unit.status, RunStatus::Skipped);
        assert_eq!(unit.reason.as_deref(), Some("dependency 'Build' failed"));

        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_skip_reason() {
        let deps = vec![("Build".to_string(), RunStatus::Failed)];
        assert_eq!(skip_reason(&Condition::default(), &deps), "dependency 'Build' failed");

        let always = Condition::parse(Some("always()")).unwrap();
        assert_eq!(skip_reason(&always, &deps), "condition evaluated to false");
    }
}
