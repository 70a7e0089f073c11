pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;
pub mod workflow;

pub use config::AppConfig;
pub use error::{ConduitError, ExecutorError, Result, ValidationError, ValidationIssue};
pub use event::{EventBus, RunEvent};
pub use types::*;
pub use workflow::{EdgeSpec, NodeKind, NodeSpec, WorkflowDefinition};
