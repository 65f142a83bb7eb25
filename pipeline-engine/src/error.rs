// Engine Error Types
// Error taxonomy shared by loading, expansion, condition evaluation and execution

use crate::execution::graph::GraphError;
use crate::execution::target::TargetError;
use crate::expression::evaluator::EvalError;
use crate::expression::parser::ParseExprError;
use crate::parser::error::ParseError;
use crate::parser::loader::TemplateError;
use crate::parser::models::ParameterType;

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error returned by the engine facade
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("run canceled")]
    Canceled,
}

impl EngineError {
    /// Process exit code for a run that never produced a report
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Execution(_) => 1,
            EngineError::Canceled => 130,
            _ => 2,
        }
    }
}

/// Schema and reference violations; fatal before any unit runs
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Template(#[from] TemplateError),

    #[error("required parameter '{name}' was not provided")]
    MissingParameter { name: String },

    #[error("parameter '{name}' expects a {expected} value, got {found}")]
    TypeMismatch {
        name: String,
        expected: ParameterType,
        found: String,
    },

    #[error("unknown parameter '{name}'")]
    UnknownParameter { name: String },

    #[error("parameter '{name}' value '{value}' is not one of: {allowed}")]
    ValueNotAllowed {
        name: String,
        value: String,
        allowed: String,
    },

    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("invalid {kind} name '{name}': use letters, digits, '_' or '-'")]
    InvalidName { kind: &'static str, name: String },

    #[error("invalid matrix in job '{job}': {message}")]
    InvalidMatrix { job: String, message: String },

    #[error("invalid condition on {location}: {message}")]
    InvalidCondition { location: String, message: String },

    #[error("invalid expression at {location}: {message}")]
    InvalidExpression { location: String, message: String },

    #[error("{location} references undeclared {name}")]
    UndeclaredReference { location: String, name: String },

    #[error("{0}")]
    Graph(#[from] GraphError),

    #[error("unsupported construct at {location}: {message}")]
    Unsupported { location: String, message: String },
}

/// Matrix expansion failures, scoped to one job
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpansionError {
    #[error("matrix for job '{job}' expands to zero units")]
    EmptyExpansion { job: String },

    #[error("matrix for job '{job}' references unknown axis '{axis}'")]
    UnknownAxis { job: String, axis: String },

    #[error("matrix axis '{axis}' of job '{job}' lists '{value}' more than once")]
    DuplicateAxisValue {
        job: String,
        axis: String,
        value: String,
    },

    #[error("matrix axis '{axis}' of job '{job}' references unresolved '{reference}'")]
    UnresolvedParameter {
        job: String,
        axis: String,
        reference: String,
    },

    #[error("matrix axis '{axis}' of job '{job}': {message}")]
    InvalidAxisValues {
        job: String,
        axis: String,
        message: String,
    },
}

impl ExpansionError {
    pub fn job(&self) -> &str {
        match self {
            ExpansionError::EmptyExpansion { job }
            | ExpansionError::UnknownAxis { job, .. }
            | ExpansionError::DuplicateAxisValue { job, .. }
            | ExpansionError::UnresolvedParameter { job, .. }
            | ExpansionError::InvalidAxisValues { job, .. } => job,
        }
    }
}

/// Condition failures; skip the gated entity, or abort in strict mode
#[derive(Debug, Clone, Error)]
pub enum ConditionError {
    #[error("invalid condition '{condition}': {source}")]
    Syntax {
        condition: String,
        #[source]
        source: ParseExprError,
    },

    #[error("unresolved reference '{reference}' in condition '{condition}'")]
    UnresolvedReference { condition: String, reference: String },

    #[error("cannot evaluate condition '{condition}': {source}")]
    Eval {
        condition: String,
        #[source]
        source: EvalError,
    },
}
