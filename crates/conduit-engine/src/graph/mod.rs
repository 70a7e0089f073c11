//! Workflow graph: adjacency model, validation, level planning, and the
//! per-run artifact store.

pub mod context;
pub mod model;
pub mod plan;
pub mod validate;

pub use context::ExecutionContext;
pub use model::GraphModel;
pub use plan::{plan, ExecutionPlan, PlanSummary, PlannedNode};
pub use validate::{validate, ValidatedGraph};
