//! Read-only views over the manager.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::TaskStatus;
use crate::executor::ExecutorStats;
use crate::resources::ResourceUsage;
use crate::scheduler::SchedulingStrategy;

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub total: usize,
    /// Task count per status; every status is present.
    pub counts: BTreeMap<TaskStatus, usize>,
    pub running: usize,
    pub queue_size: usize,
    pub resource_usage: ResourceUsage,
    pub executor: ExecutorStats,
    pub strategy: SchedulingStrategy,
    pub handlers: Vec<String>,
    pub shut_down: bool,
}

impl SystemStatus {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}

/// What one maintenance sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Running tasks past `timeout + grace_period` that were cancelled.
    pub timed_out: usize,
    pub retried: usize,
    pub pruned: usize,
    pub dispatched: usize,
}

impl MaintenanceReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}
