// Command implementations
// Each command returns the process exit code

pub mod plan;
pub mod run;
pub mod validate;

use crate::cli::DefinitionArgs;
use crate::output;

use pipeline_engine::{EngineError, RunRequest};
use serde_yaml::Value as Yaml;

/// Build a request from the shared arguments. Parameter values are read
/// as YAML so lists, numbers and booleans keep their type.
pub fn request(args: &DefinitionArgs) -> RunRequest {
    let mut request = RunRequest::new(&args.definition);
    for (name, raw) in &args.params {
        let value = serde_yaml::from_str::<Yaml>(raw)
            .ok()
            .filter(|v| !v.is_null() || raw.trim() == "null")
            .unwrap_or_else(|| Yaml::String(raw.clone()));
        request = request.with_parameter(name.clone(), value);
    }
    for target in &args.targets {
        request = request.with_target(target.clone());
    }
    request
}

/// Report an error that stopped the command before anything ran
pub fn report_error(err: &EngineError) -> i32 {
    output::error(&err.to_string());
    err.exit_code()
}
