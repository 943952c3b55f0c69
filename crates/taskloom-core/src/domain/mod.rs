//! Domain model: ids, tasks, the status state machine, outcomes and errors.

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod spec;
pub mod state;
pub mod task;

pub use self::errors::{ErrorInfo, ErrorKind, HandlerError, TaskError};
pub use self::ids::{ExecutionId, TaskId};
pub use self::outcome::{ExecutionOutcome, OutcomeKind};
pub use self::spec::TaskSpec;
pub use self::state::TaskStatus;
pub use self::task::{
    Dependency, DependencyKind, Priority, ResourceRequirement, Task, TaskFilter, TaskType,
};
