// Execution Planning
// Turns a loaded definition into graph nodes and matrix-expanded run units

use crate::error::{DefinitionError, ExpansionError};
use crate::execution::graph::PipelineGraph;
use crate::execution::matrix::{MatrixExpander, MatrixInstance};
use crate::execution::target::{Selection, TargetFilter};
use crate::execution::unit::RunUnit;
use crate::expression::condition::Condition;
use crate::parser::loader::LoadedDefinition;
use crate::parser::models::{Job, RunStatus, Stage};
use crate::parser::parameters::ResolvedParameters;

use std::collections::BTreeMap;
use std::sync::Arc;

pub const NOT_TARGETED: &str = "not targeted";

#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub name: String,
    pub job: Arc<Job>,
    pub condition: Condition,
    pub targeted: bool,
    /// Indices into `ExecutionPlan::units`
    pub units: Vec<usize>,
    /// Set when expansion failed; `units` then holds one placeholder
    pub expansion_error: Option<ExpansionError>,
}

#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub name: String,
    pub display_name: Option<String>,
    pub condition: Condition,
    pub variables: BTreeMap<String, String>,
    pub targeted: bool,
    pub jobs: Vec<PlannedJob>,
}

impl PlannedStage {
    pub fn unit_count(&self) -> usize {
        self.jobs.iter().map(|j| j.units.len()).sum()
    }
}

/// A fully expanded, not yet executed run
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub pipeline: String,
    pub graph: PipelineGraph,
    pub stages: Vec<PlannedStage>,
    pub units: Vec<RunUnit>,
    pub variables: BTreeMap<String, String>,
    pub parameters: Arc<ResolvedParameters>,
}

impl ExecutionPlan {
    /// Expand every targeted job. Expansion errors stay local to their
    /// job; structural errors were already rejected by the loader.
    pub fn build(loaded: &LoadedDefinition, targets: &TargetFilter) -> Result<Self, DefinitionError> {
        let definition = &loaded.definition;
        let graph = PipelineGraph::build(&definition.stages)?;

        let mut units = Vec::new();
        let mut stages = Vec::with_capacity(definition.stages.len());

        for (stage_index, stage) in definition.stages.iter().enumerate() {
            let mut jobs = Vec::with_capacity(stage.jobs.len());
            for (job_index, job) in stage.jobs.iter().enumerate() {
                jobs.push(plan_job(
                    stage,
                    stage_index,
                    job,
                    job_index,
                    &loaded.parameters,
                    targets.select(&stage.stage, &job.job),
                    &mut units,
                )?);
            }

            let targeted = targets.is_empty() || jobs.iter().any(|j| j.targeted);
            stages.push(PlannedStage {
                name: stage.stage.clone(),
                display_name: stage.display_name.clone(),
                condition: parse_condition(&format!("stage '{}'", stage.stage), stage.condition.as_deref())?,
                variables: stage.variables.clone(),
                targeted,
                jobs,
            });
        }

        let plan = Self {
            pipeline: definition.name.clone().unwrap_or_else(|| "pipeline".to_string()),
            graph,
            stages,
            units,
            variables: definition.variables.clone(),
            parameters: Arc::new(loaded.parameters.clone()),
        };

        tracing::debug!(
            pipeline = %plan.pipeline,
            stages = plan.stages.len(),
            units = plan.units.len(),
            "execution plan built"
        );
        Ok(plan)
    }

    pub fn unit_names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name.as_str()).collect()
    }

    pub fn expansion_errors(&self) -> Vec<&ExpansionError> {
        self.stages
            .iter()
            .flat_map(|s| &s.jobs)
            .filter_map(|j| j.expansion_error.as_ref())
            .collect()
    }
}

fn plan_job(
    stage: &Stage,
    stage_index: usize,
    job: &Job,
    job_index: usize,
    parameters: &ResolvedParameters,
    selection: Selection,
    units: &mut Vec<RunUnit>,
) -> Result<PlannedJob, DefinitionError> {
    let location = format!("job '{}/{}'", stage.stage, job.job);
    let mut planned = PlannedJob {
        name: job.job.clone(),
        job: Arc::new(job.clone()),
        condition: parse_condition(&location, job.condition.as_deref())?,
        targeted: true,
        units: Vec::new(),
        expansion_error: None,
    };

    let expanded = match &selection {
        Selection::NotTargeted => None,
        Selection::All => Some(MatrixExpander::expand(job, parameters, &[])),
        Selection::Matrix(groups) => match MatrixExpander::expand(job, parameters, groups) {
            // Targeting narrowed a valid matrix to nothing
            Err(ExpansionError::EmptyExpansion { .. })
                if MatrixExpander::expand(job, parameters, &[]).is_ok_and(|all| !all.is_empty()) =>
            {
                None
            }
            other => Some(other),
        },
    };

    let mut push = |name: String, matrix: Vec<(String, String)>, status: RunStatus, reason: Option<String>| {
        let id = units.len();
        units.push(RunUnit {
            id,
            name,
            stage: stage.stage.clone(),
            job: job.job.clone(),
            stage_index,
            job_index,
            matrix,
            status,
            reason,
        });
        id
    };

    match expanded {
        None => {
            planned.targeted = false;
            let id = push(
                qualified(&stage.stage, &job.job),
                Vec::new(),
                RunStatus::Skipped,
                Some(NOT_TARGETED.to_string()),
            );
            planned.units.push(id);
        }
        Some(Ok(instances)) => {
            for MatrixInstance { name, values, .. } in instances {
                let id = push(qualified(&stage.stage, &name), values, RunStatus::Pending, None);
                planned.units.push(id);
            }
        }
        Some(Err(err)) => {
            tracing::warn!(job = %location, error = %err, "matrix expansion failed");
            let id = push(
                qualified(&stage.stage, &job.job),
                Vec::new(),
                RunStatus::Pending,
                Some(err.to_string()),
            );
            planned.units.push(id);
            planned.expansion_error = Some(err);
        }
    }

    Ok(planned)
}

fn qualified(stage: &str, unit: &str) -> String {
    format!("{}/{}", stage, unit)
}

fn parse_condition(location: &str, source: Option<&str>) -> Result<Condition, DefinitionError> {
    Condition::parse(source).map_err(|err| DefinitionError::InvalidCondition {
        location: location.to_string(),
        message: err.to_string(),
    })
}
