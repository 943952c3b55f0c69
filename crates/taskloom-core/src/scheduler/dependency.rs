//! Dependency index.
//!
//! Design:
//! - Forward edges: task -> tasks it waits for
//! - Reverse edges: task -> tasks waiting for it
//! - Invariant: edges and reverse_edges are kept in sync
//!
//! Only completion dependencies are indexed. Dependencies must exist when a
//! task is created, so edges always point at older tasks and the graph is
//! acyclic by construction.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::domain::TaskId;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Answers "who is waiting for this task?" without a scan.
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `task` waits for `depends_on`.
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(task);
    }

    pub fn remove_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Drop every edge touching `task`. Used when a task is pruned.
    pub fn remove_task(&mut self, task: TaskId) {
        for dep in self.get_dependencies(task) {
            self.remove_dependency(task, dep);
        }
        for waiter in self.get_waiting_tasks(task) {
            self.remove_dependency(waiter, task);
        }
    }

    /// Tasks directly waiting for `task`. They may have other unmet
    /// dependencies; the caller checks.
    pub fn get_waiting_tasks(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every task that waits for `task`, directly or through others, in
    /// breadth-first order.
    pub fn transitive_dependents(&self, task: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut frontier: VecDeque<TaskId> = self.get_waiting_tasks(task).into();

        while let Some(next) = frontier.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            order.push(next);
            frontier.extend(self.get_waiting_tasks(next));
        }
        order
    }

    pub fn has_dependencies(&self, task: TaskId) -> bool {
        self.edges.get(&task).is_some_and(|deps| !deps.is_empty())
    }

    pub fn get_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }
}
