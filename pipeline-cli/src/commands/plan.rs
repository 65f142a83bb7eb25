// Plan command
// Prints the expanded units grouped by stage, in dependency order

use crate::cli::PlanArgs;
use crate::commands::{report_error, request};
use crate::output;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use pipeline_engine::execution::plan::PlannedStage;
use pipeline_engine::{Engine, EngineConfig, ExecutionPlan, RunStatus};

pub fn execute(args: &PlanArgs, config: EngineConfig) -> Result<i32> {
    let engine = Engine::new(config);
    let plan = match engine.plan(&request(&args.definition)) {
        Ok(plan) => plan,
        Err(err) => return Ok(report_error(&err)),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&plan.units).wrap_err("failed to serialize plan")?;
        println!("{}", json);
        return Ok(0);
    }

    output::header(&format!("Plan for '{}'", plan.pipeline));
    for (level, stages) in plan.graph.stage_levels().iter().enumerate() {
        for &index in stages {
            print_stage(&plan, index, level);
        }
    }
    Ok(0)
}

fn print_stage(plan: &ExecutionPlan, index: usize, level: usize) {
    let stage: &PlannedStage = &plan.stages[index];
    let node = &plan.graph.stages[index];
    let depends: Vec<&str> = node
        .node
        .dependencies
        .iter()
        .map(|&d| plan.stages[d].name.as_str())
        .collect();

    let mut title = format!("[{}] {}", level + 1, stage.name);
    if !depends.is_empty() {
        title.push_str(&format!(" <- {}", depends.join(", ")));
    }
    if let Some(condition) = stage.condition.source() {
        title.push_str(&format!(" if {}", condition));
    }
    println!("{}", title);

    for job_index in plan.graph.jobs_topological_order(index) {
        let job = &stage.jobs[job_index];
        let depends: Vec<&str> = node.jobs[job_index]
            .dependencies
            .iter()
            .map(|&d| stage.jobs[d].name.as_str())
            .collect();
        let suffix = if depends.is_empty() {
            String::new()
        } else {
            format!(" <- {}", depends.join(", "))
        };
        println!("    {}{}", job.name, suffix);

        if let Some(err) = &job.expansion_error {
            println!("      \x1b[31m{}\x1b[0m", err);
            continue;
        }
        for &id in &job.units {
            let unit = &plan.units[id];
            match (&unit.reason, unit.status) {
                (Some(reason), RunStatus::Skipped) => {
                    println!("      \x1b[2m{} ({})\x1b[0m", unit.name, reason)
                }
                _ => println!("      {}", unit.name),
            }
        }
    }
}
