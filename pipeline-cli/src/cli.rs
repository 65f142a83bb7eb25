// Command-line interface
// Argument definitions for the pipeline binary

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Run, validate and plan stage/job pipeline definitions
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeline")]
#[command(version)]
#[command(about = "Run, validate and plan stage/job pipeline definitions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file
    #[arg(short, long, global = true, env = "PIPELINE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline definition
    Run(RunArgs),

    /// Load and validate a definition without running it
    Validate(DefinitionArgs),

    /// Show the expanded units and their dependency order
    Plan(PlanArgs),
}

/// Inputs shared by every command
#[derive(Debug, Args, Clone)]
pub struct DefinitionArgs {
    /// Path to the pipeline definition
    pub definition: PathBuf,

    /// Parameter override (name=value); the value is read as YAML
    #[arg(short, long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Restrict the run to Stage/Job globs, optionally with [axis=value] filters
    #[arg(short, long = "target")]
    pub targets: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub definition: DefinitionArgs,

    /// Write the run report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Maximum units running at once
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Abort on condition errors instead of skipping
    #[arg(long)]
    pub strict: bool,

    /// Source branch the run is for
    #[arg(long, env = "PIPELINE_BRANCH", default_value = "main")]
    pub branch: String,

    /// Why the run was started
    #[arg(long, env = "PIPELINE_REASON", default_value = "Manual")]
    pub reason: String,

    /// Repository name
    #[arg(long, env = "PIPELINE_REPOSITORY", default_value = "")]
    pub repository: String,

    /// Hide step output
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub definition: DefinitionArgs,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

/// Parse a `name=value` pair
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid name=value: no '=' found in '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid name=value: empty name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("pythonVersions=[3.9, 3.12]").unwrap(),
            ("pythonVersions".to_string(), "[3.9, 3.12]".to_string())
        );
        assert_eq!(
            parse_key_value("expr=a=b").unwrap(),
            ("expr".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "pipeline",
            "run",
            "ci.yml",
            "--param",
            "serviceDirectory=storage",
            "--target",
            "Test/*",
            "--target",
            "Build/Compile",
            "--strict",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.definition.definition, PathBuf::from("ci.yml"));
        assert_eq!(args.definition.targets, vec!["Test/*", "Build/Compile"]);
        assert_eq!(args.definition.params.len(), 1);
        assert!(args.strict);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pipeline", "validate", "ci.yml", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Validate(_)));
    }
}
