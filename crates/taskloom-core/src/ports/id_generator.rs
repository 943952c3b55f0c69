//! IdGenerator port - id creation.

use ulid::Ulid;

use crate::domain::ids::{ExecutionId, TaskId};
use crate::ports::Clock;

/// Creates task and execution ids.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_execution_id(&self) -> ExecutionId;
}

/// ULID generator whose timestamp part comes from a `Clock`.
///
/// With a `FixedClock` the timestamp part is stable while the random part
/// still keeps ids unique.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_execution_id(&self) -> ExecutionId {
        ExecutionId::from(self.next_ulid())
    }
}
