// Validate command
// Loads, materializes and expands a definition without running anything

use crate::cli::DefinitionArgs;
use crate::commands::{report_error, request};
use crate::output;

use color_eyre::Result;
use pipeline_engine::{Engine, EngineConfig};

pub fn execute(args: &DefinitionArgs, config: EngineConfig) -> Result<i32> {
    output::status("Validating", &args.definition.display().to_string());

    let engine = Engine::new(config);
    let plan = match engine.plan(&request(args)) {
        Ok(plan) => plan,
        Err(err) => return Ok(report_error(&err)),
    };

    let jobs: usize = plan.stages.iter().map(|s| s.jobs.len()).sum();
    output::success(&format!(
        "'{}': {} stages, {} jobs, {} units",
        plan.pipeline,
        plan.stages.len(),
        jobs,
        plan.units.len()
    ));

    let errors = plan.expansion_errors();
    for err in &errors {
        output::warning(&err.to_string());
    }

    Ok(if errors.is_empty() { 0 } else { 1 })
}
