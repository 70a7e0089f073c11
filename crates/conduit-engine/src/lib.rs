pub mod catalog;
pub mod engine;
pub mod executors;
pub mod graph;
pub mod scheduler;

pub use catalog::{catalog, ComponentInfo};
pub use engine::{Engine, RunOptions};
pub use executors::{Adapters, ComponentExecutor, NodeContext, NodeInputs};
pub use graph::{plan, validate, ExecutionContext, ExecutionPlan, GraphModel, PlanSummary, ValidatedGraph};
pub use scheduler::ExecutionScheduler;
