//! Resource admission control.
//!
//! Aggregate cpu / memory / gpu-slot accounting against a fixed capacity.
//! `allocate` checks and reserves under one lock, so a successful allocation
//! can never push usage above capacity.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ids::TaskId;
pub use crate::domain::task::ResourceRequirement;

const CPU_EPSILON: f64 = 1e-9;

/// Total capacity managed by a `ResourceManager`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceCapacity {
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: f64,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default)]
    pub gpu_slots: u32,
}

fn default_cpu_cores() -> f64 {
    8.0
}

fn default_memory_mb() -> u64 {
    16_384
}

impl Default for ResourceCapacity {
    fn default() -> Self {
        Self {
            cpu_cores: default_cpu_cores(),
            memory_mb: default_memory_mb(),
            gpu_slots: 0,
        }
    }
}

/// Snapshot of what is currently reserved.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub gpu_slots: u32,
    pub allocations: usize,
    pub capacity: ResourceCapacity,
}

#[derive(Debug, Error, PartialEq)]
pub enum ResourceError {
    #[error("insufficient free resources (requested {requested:?}, free {free:?})")]
    Exhausted {
        requested: ResourceRequirement,
        free: ResourceUsage,
    },

    #[error("task {0} already holds an allocation")]
    AlreadyAllocated(TaskId),

    #[error("requirement {requested:?} exceeds total capacity {capacity:?}")]
    ExceedsCapacity {
        requested: ResourceRequirement,
        capacity: ResourceCapacity,
    },
}

#[derive(Debug, Default)]
struct Ledger {
    allocations: HashMap<TaskId, ResourceRequirement>,
    cpu_cores: f64,
    memory_mb: u64,
    gpu_slots: u32,
}

impl Ledger {
    fn fits(&self, capacity: &ResourceCapacity, req: &ResourceRequirement) -> bool {
        let cpu_ok = req
            .cpu_cores
            .is_none_or(|c| self.cpu_cores + c <= capacity.cpu_cores + CPU_EPSILON);
        let mem_ok = req
            .memory_mb
            .is_none_or(|m| self.memory_mb.saturating_add(m) <= capacity.memory_mb);
        let gpu_ok = !req.gpu_required || self.gpu_slots < capacity.gpu_slots;
        cpu_ok && mem_ok && gpu_ok
    }

    fn free(&self, capacity: &ResourceCapacity) -> ResourceUsage {
        ResourceUsage {
            cpu_cores: (capacity.cpu_cores - self.cpu_cores).max(0.0),
            memory_mb: capacity.memory_mb.saturating_sub(self.memory_mb),
            gpu_slots: capacity.gpu_slots.saturating_sub(self.gpu_slots),
            allocations: self.allocations.len(),
            capacity: *capacity,
        }
    }
}

/// Tracks reservations per task against a fixed capacity.
#[derive(Debug)]
pub struct ResourceManager {
    capacity: ResourceCapacity,
    ledger: Mutex<Ledger>,
}

impl ResourceManager {
    pub fn new(capacity: ResourceCapacity) -> Self {
        Self {
            capacity,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn capacity(&self) -> ResourceCapacity {
        self.capacity
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Would `req` fit in what is free right now.
    pub fn can_allocate(&self, req: &ResourceRequirement) -> bool {
        self.ledger().fits(&self.capacity, req)
    }

    /// Could `req` ever fit, i.e. against an empty ledger.
    pub fn fits_capacity(&self, req: &ResourceRequirement) -> bool {
        Ledger::default().fits(&self.capacity, req)
    }

    /// `can_allocate` with the reason attached when the answer is no.
    pub fn check(&self, req: &ResourceRequirement) -> Result<(), ResourceError> {
        if !self.fits_capacity(req) {
            return Err(ResourceError::ExceedsCapacity {
                requested: *req,
                capacity: self.capacity,
            });
        }
        let ledger = self.ledger();
        if ledger.fits(&self.capacity, req) {
            Ok(())
        } else {
            Err(ResourceError::Exhausted {
                requested: *req,
                free: ledger.free(&self.capacity),
            })
        }
    }

    pub fn allocate(&self, task_id: TaskId, req: &ResourceRequirement) -> Result<(), ResourceError> {
        if !self.fits_capacity(req) {
            return Err(ResourceError::ExceedsCapacity {
                requested: *req,
                capacity: self.capacity,
            });
        }

        let mut ledger = self.ledger();
        if ledger.allocations.contains_key(&task_id) {
            return Err(ResourceError::AlreadyAllocated(task_id));
        }
        if !ledger.fits(&self.capacity, req) {
            return Err(ResourceError::Exhausted {
                requested: *req,
                free: ledger.free(&self.capacity),
            });
        }

        ledger.cpu_cores += req.cpu_cores.unwrap_or(0.0);
        ledger.memory_mb += req.memory_mb.unwrap_or(0);
        if req.gpu_required {
            ledger.gpu_slots += 1;
        }
        ledger.allocations.insert(task_id, *req);
        Ok(())
    }

    /// Release the task's reservation. Returns false when it held none, so
    /// calling this more than once is harmless.
    pub fn deallocate(&self, task_id: TaskId) -> bool {
        let mut ledger = self.ledger();
        let Some(req) = ledger.allocations.remove(&task_id) else {
            return false;
        };

        ledger.cpu_cores = (ledger.cpu_cores - req.cpu_cores.unwrap_or(0.0)).max(0.0);
        ledger.memory_mb = ledger.memory_mb.saturating_sub(req.memory_mb.unwrap_or(0));
        if req.gpu_required {
            ledger.gpu_slots = ledger.gpu_slots.saturating_sub(1);
        }
        if ledger.allocations.is_empty() {
            ledger.cpu_cores = 0.0;
        }
        true
    }

    pub fn usage(&self) -> ResourceUsage {
        let ledger = self.ledger();
        ResourceUsage {
            cpu_cores: ledger.cpu_cores,
            memory_mb: ledger.memory_mb,
            gpu_slots: ledger.gpu_slots,
            allocations: ledger.allocations.len(),
            capacity: self.capacity,
        }
    }
}
