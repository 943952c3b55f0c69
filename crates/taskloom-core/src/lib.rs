//! taskloom-core
//!
//! Task scheduling and execution core.
//!
//! # Modules
//! - **domain**: task model (ids, task, state, spec, outcome, errors)
//! - **ports**: clock and id generation, swappable in tests
//! - **resources**: cpu / memory / gpu admission control
//! - **scheduler**: priority queue, strategies, dependency index, retry backoff
//! - **handler**: handler contract, registry, process-isolated command handler
//! - **executor**: bounded pool of isolated execution units with timeout and cancellation
//! - **monitor**: rolling execution metrics
//! - **manager**: `TaskManager` facade, builder, maintenance sweep, status views
//! - **config**: `ManagerConfig` and TOML loading

pub mod config;
pub mod domain;
pub mod executor;
pub mod handler;
pub mod manager;
pub mod monitor;
pub mod ports;
pub mod resources;
pub mod scheduler;

pub use config::ManagerConfig;
pub use domain::{
    HandlerError, Priority, ResourceRequirement, Task, TaskError, TaskFilter, TaskId, TaskSpec,
    TaskStatus,
};
pub use handler::{CommandHandler, ExecutionContext, TaskHandler, handler_fn};
pub use manager::{SystemStatus, TaskManager, TaskManagerBuilder};
pub use monitor::MonitoringMetrics;
pub use scheduler::SchedulingStrategy;
