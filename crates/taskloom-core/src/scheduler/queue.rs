//! Priority queue over tasks awaiting dispatch.
//!
//! Design:
//! - `BinaryHeap` with reversed ordering, so it behaves as a min-heap on
//!   `(score, seq)`. `seq` is a monotonically increasing enqueue counter, so
//!   equal scores pop in FIFO order.
//! - `enqueued` is the source of truth for membership. `remove` only drops the
//!   membership; the heap entry is discarded lazily when it surfaces.
//! - Task status is never written here. The caller passes the task map so
//!   entries whose task has left PENDING/QUEUED can be discarded.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

use super::ScheduleError;
use super::strategy::{ScoreParams, SchedulingKey, SchedulingStrategy};
use crate::domain::{Priority, Task, TaskId, TaskStatus, TaskType};

#[derive(Debug, Clone, Copy)]
pub struct ScheduledEntry {
    pub task_id: TaskId,
    pub score: f64,
    pub seq: u64,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: the smallest (score, seq) sits at the top of the heap.
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct Enqueued {
    seq: u64,
    key: SchedulingKey,
}

pub struct Scheduler {
    strategy: SchedulingStrategy,
    params: ScoreParams,
    heap: BinaryHeap<ScheduledEntry>,
    enqueued: HashMap<TaskId, Enqueued>,
    next_seq: u64,
    /// Next ROUND_ROBIN turn per task type.
    rotation: HashMap<TaskType, u64>,
}

impl Scheduler {
    pub fn new(strategy: SchedulingStrategy, params: ScoreParams) -> Self {
        Self {
            strategy,
            params,
            heap: BinaryHeap::new(),
            enqueued: HashMap::new(),
            next_seq: 0,
            rotation: HashMap::new(),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Number of tasks currently enqueued.
    pub fn len(&self) -> usize {
        self.enqueued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enqueued.is_empty()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.enqueued.contains_key(&task_id)
    }

    /// Enqueue a PENDING task. Returns its score.
    pub fn schedule(&mut self, task: &Task, now: DateTime<Utc>) -> Result<f64, ScheduleError> {
        if task.status != TaskStatus::Pending {
            return Err(ScheduleError::NotPending {
                task_id: task.id,
                status: task.status,
            });
        }
        if self.enqueued.contains_key(&task.id) {
            return Err(ScheduleError::AlreadyEnqueued(task.id));
        }

        let turn = self.rotation.entry(task.task_type.clone()).or_insert(0);
        let key = SchedulingKey::from_task(task, *turn);
        *turn += 1;

        let seq = self.next_seq;
        self.next_seq += 1;

        let score = self.strategy.score(&key, &self.params, now);
        self.heap.push(ScheduledEntry {
            task_id: task.id,
            score,
            seq,
        });
        self.enqueued.insert(task.id, Enqueued { seq, key });
        Ok(score)
    }

    /// Pop the best task that is still awaiting dispatch and due.
    pub fn pop_next(
        &mut self,
        now: DateTime<Utc>,
        tasks: &HashMap<TaskId, Task>,
    ) -> Option<TaskId> {
        self.pop_next_where(now, tasks, |_| true)
    }

    /// Like `pop_next`, but entries failing `accept` are skipped and kept in
    /// the queue with their original sequence number.
    pub fn pop_next_where<F>(
        &mut self,
        now: DateTime<Utc>,
        tasks: &HashMap<TaskId, Task>,
        mut accept: F,
    ) -> Option<TaskId>
    where
        F: FnMut(&Task) -> bool,
    {
        let mut deferred = Vec::new();
        let mut found = None;

        while let Some(entry) = self.heap.pop() {
            let live = self
                .enqueued
                .get(&entry.task_id)
                .is_some_and(|e| e.seq == entry.seq);
            if !live {
                continue;
            }

            let Some(task) = tasks
                .get(&entry.task_id)
                .filter(|t| t.status.is_awaiting_dispatch())
            else {
                self.enqueued.remove(&entry.task_id);
                continue;
            };

            if !task.is_due(now) || !accept(task) {
                deferred.push(entry);
                continue;
            }

            self.enqueued.remove(&entry.task_id);
            found = Some(entry.task_id);
            break;
        }

        self.heap.extend(deferred);
        found
    }

    /// Drop a task from the queue. Its heap entry is discarded when popped.
    pub fn remove(&mut self, task_id: TaskId) -> bool {
        self.enqueued.remove(&task_id).is_some()
    }

    /// Re-score one task under a new priority.
    pub fn update_priority(
        &mut self,
        task_id: TaskId,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self.enqueued.get_mut(&task_id) else {
            return false;
        };
        entry.key.priority = priority;
        self.rebuild(now);
        true
    }

    /// Refresh every key from the task map and re-score everything.
    pub fn optimize(&mut self, tasks: &HashMap<TaskId, Task>, now: DateTime<Utc>) {
        for (id, entry) in self.enqueued.iter_mut() {
            if let Some(task) = tasks.get(id) {
                entry.key.refresh(task);
            }
        }
        self.rebuild(now);
    }

    fn rebuild(&mut self, now: DateTime<Utc>) {
        let (strategy, params) = (self.strategy, self.params);
        self.heap = self
            .enqueued
            .iter()
            .map(|(id, e)| ScheduledEntry {
                task_id: *id,
                score: strategy.score(&e.key, &params, now),
                seq: e.seq,
            })
            .collect();
    }
}
