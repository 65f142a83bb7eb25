// Pipeline Engine Library
// Parameterized stage/job pipelines: matrix expansion, gated conditions and DAG scheduling

pub mod artifacts;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod expression;
pub mod parser;
pub mod runners;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, RunRequest};
pub use error::{ConditionError, DefinitionError, EngineError, ExpansionError};

// Re-export parser types
pub use parser::{
    DefinitionLoader, Job, LoadedDefinition, ParameterResolver, PipelineDefinition,
    ResolvedParameters, RunStatus, Stage, Step, StepStatus,
};

// Re-export expression types
pub use expression::{Condition, ConditionContext};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, ExecutionPlan, GraphError, MatrixExpander, MatrixInstance,
    PipelineGraph, ProgressReceiver, ProgressSender, RunOutcome, RunReport, Scheduler,
    TargetFilter, TriggerContext, Variables,
};

// Re-export artifact and runner types
pub use artifacts::{ArtifactError, ArtifactRef, ArtifactStore, InMemoryArtifactStore};
pub use runners::{ShellRunner, StepContext, StepOutcome, StepRunner};
