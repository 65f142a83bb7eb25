// Execution Module
// Graph construction, matrix expansion, planning and scheduling of run units

pub mod context;
pub mod events;
pub mod graph;
pub mod matrix;
pub mod plan;
pub mod report;
pub mod scheduler;
pub mod target;
pub mod unit;

pub use context::{TriggerContext, Variables};
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use graph::{GraphError, GraphErrorKind, Node, PipelineGraph, StageNode};
pub use matrix::{MatrixExpander, MatrixInstance};
pub use plan::{ExecutionPlan, PlannedJob, PlannedStage};
pub use report::{RunOutcome, RunReport, StageReport, UnitReport};
pub use scheduler::Scheduler;
pub use target::{Selection, TargetError, TargetFilter, TargetSelector};
pub use unit::{RunUnit, StepResult, UnitResult};
