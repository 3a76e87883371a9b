//! Task graph with guarded dependencies.
//!
//! This module provides the TaskGraph structure that holds the tasks of a
//! job and the edges between them. Graphs are composed by appending tasks
//! and whole sub-graphs after the current sinks, and grow at run time when
//! a meta-task's expansion is spliced in place of the meta-task node.

use crate::core::task::{TaskGuard, TaskId, TaskNode, Work};
use crate::error::{Error, Result};
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// Scheduling decision for a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Predecessors needed by the guard are not terminal yet.
    Wait,
    /// Guard satisfied; the task may be dispatched.
    Run,
    /// Guard can never be satisfied.
    Skip,
}

/// The task dependency graph.
///
/// Nodes are [`TaskNode`]s, and an edge `a -> b` means `b` is gated on `a`
/// through `b`'s guard. Edges are only ever added from existing nodes to
/// newly inserted ones, so the graph stays acyclic.
#[derive(Clone)]
pub struct TaskGraph {
    /// The underlying directed graph. Stable indices survive node removal
    /// during splicing.
    graph: StableDiGraph<TaskNode, ()>,
    /// Index mapping from TaskId to NodeIndex for fast lookups.
    task_index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    /// Create a new empty TaskGraph.
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    fn insert(&mut self, work: Work, guard: TaskGuard) -> (TaskId, NodeIndex) {
        let node = TaskNode::new(work, guard);
        let id = node.id;
        let index = self.graph.add_node(node);
        self.task_index.insert(id, index);
        (id, index)
    }

    fn index_of(&self, id: &TaskId) -> Result<NodeIndex> {
        self.task_index
            .get(id)
            .copied()
            .ok_or_else(|| Error::Validation(format!("Task {} not found in graph", id)))
    }

    fn sink_indices(&self) -> Vec<NodeIndex> {
        self.graph
            .externals(Direction::Outgoing)
            .collect()
    }

    /// Add a task with no dependency edges.
    pub fn add_task(&mut self, work: Work) -> TaskId {
        self.insert(work, TaskGuard::default()).0
    }

    /// Add a task gated on an explicit set of existing tasks.
    ///
    /// # Errors
    /// Returns an error if any predecessor is not in the graph.
    pub fn add_task_after(
        &mut self,
        work: Work,
        guard: TaskGuard,
        predecessors: &[TaskId],
    ) -> Result<TaskId> {
        let preds = predecessors
            .iter()
            .map(|id| self.index_of(id))
            .collect::<Result<Vec<_>>>()?;

        let (id, index) = self.insert(work, guard);
        for pred in preds {
            self.graph.update_edge(pred, index, ());
        }
        Ok(id)
    }

    /// Append a task after every current sink with the default guard.
    pub fn append_task(&mut self, work: Work) -> TaskId {
        self.append_task_with_guard(work, TaskGuard::default())
    }

    /// Append a task after every current sink.
    ///
    /// On an empty graph this is the same as [`add_task`](Self::add_task).
    pub fn append_task_with_guard(&mut self, work: Work, guard: TaskGuard) -> TaskId {
        let sinks = self.sink_indices();
        let (id, index) = self.insert(work, guard);
        for sink in sinks {
            self.graph.update_edge(sink, index, ());
        }
        id
    }

    /// Move every node and edge of `other` into this graph.
    ///
    /// Returns the ids of the moved nodes in `other`'s insertion order. The
    /// merge is rejected before anything changes if a task id is present in
    /// both graphs.
    fn merge(&mut self, other: TaskGraph) -> Result<Vec<TaskId>> {
        if let Some(id) = other
            .task_index
            .keys()
            .find(|id| self.task_index.contains_key(*id))
        {
            return Err(Error::Validation(format!(
                "Task {} is already part of the graph",
                id
            )));
        }

        let mut graph = other.graph;
        let edges: Vec<_> = graph
            .edge_indices()
            .filter_map(|edge| graph.edge_endpoints(edge))
            .collect();
        let indices: Vec<_> = graph.node_indices().collect();

        let mut mapping = HashMap::with_capacity(indices.len());
        let mut added = Vec::with_capacity(indices.len());
        for old in indices {
            if let Some(node) = graph.remove_node(old) {
                let id = node.id;
                let new = self.graph.add_node(node);
                self.task_index.insert(id, new);
                mapping.insert(old, new);
                added.push(id);
            }
        }
        for (from, to) in edges {
            if let (Some(&from), Some(&to)) = (mapping.get(&from), mapping.get(&to)) {
                self.graph.update_edge(from, to, ());
            }
        }
        Ok(added)
    }

    /// Merge a sub-graph without connecting it to existing tasks.
    pub fn add_task_graph(&mut self, other: TaskGraph) -> Result<()> {
        self.merge(other).map(|_| ())
    }

    /// Merge a sub-graph and gate its sources on every current sink.
    ///
    /// The sources of `other` take `guard` as their guard.
    pub fn append_task_graph(&mut self, other: TaskGraph, guard: TaskGuard) -> Result<()> {
        let sinks = self.sink_indices();
        let sources = other.sources();
        self.merge(other)?;

        for id in sources {
            let index = self.index_of(&id)?;
            self.graph[index].guard = guard;
            for &sink in &sinks {
                self.graph.update_edge(sink, index, ());
            }
        }
        Ok(())
    }

    /// Replace the node `at` with the graph it expanded into.
    ///
    /// Predecessors of `at` become predecessors of the sub-graph's sources,
    /// which inherit `at`'s guard; successors of `at` become successors of
    /// the sub-graph's sinks. Every spliced node records `at` as its parent.
    /// Returns the ids of the spliced nodes. Nothing changes on error.
    pub(crate) fn splice(&mut self, at: &TaskId, sub: TaskGraph) -> Result<Vec<TaskId>> {
        let at_index = self.index_of(at)?;
        let guard = self.graph[at_index].guard;
        let preds: Vec<_> = self
            .graph
            .neighbors_directed(at_index, Direction::Incoming)
            .collect();
        let succs: Vec<_> = self
            .graph
            .neighbors_directed(at_index, Direction::Outgoing)
            .collect();
        let sources = sub.sources();
        let sinks = sub.sinks();

        let added = self.merge(sub)?;
        for id in &added {
            let index = self.index_of(id)?;
            self.graph[index].parent.get_or_insert(*at);
        }
        for id in &sources {
            let index = self.index_of(id)?;
            self.graph[index].guard = guard;
            for &pred in &preds {
                self.graph.update_edge(pred, index, ());
            }
        }
        for id in &sinks {
            let index = self.index_of(id)?;
            for &succ in &succs {
                self.graph.update_edge(index, succ, ());
            }
        }

        self.graph.remove_node(at_index);
        self.task_index.remove(at);
        Ok(added)
    }

    /// Get a reference to a task by its ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&TaskNode> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its ID.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut TaskNode> {
        let index = *self.task_index.get(id)?;
        self.graph.node_weight_mut(index)
    }

    /// First task with the given name, mostly useful in tests.
    pub fn task_by_name(&self, name: &str) -> Option<&TaskNode> {
        self.graph.node_weights().find(|node| node.name == name)
    }

    /// Check if the graph contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Get the number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of dependencies (edges) in the graph.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// True iff the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Check if a direct edge exists between two tasks.
    pub fn has_dependency(&self, from: &TaskId, to: &TaskId) -> bool {
        match (self.task_index.get(from), self.task_index.get(to)) {
            (Some(&from), Some(&to)) => self.graph.find_edge(from, to).is_some(),
            _ => false,
        }
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        match self.task_index.get(id) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, direction)
                .map(|n| self.graph[n].id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Direct predecessors of a task.
    pub fn predecessors(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct successors of a task.
    pub fn successors(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn ancestor_indices(&self, index: NodeIndex) -> HashSet<NodeIndex> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<_> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.graph.neighbors_directed(next, Direction::Incoming));
            }
        }
        seen
    }

    /// Every transitive predecessor of a task.
    pub fn ancestors(&self, id: &TaskId) -> Vec<TaskId> {
        match self.task_index.get(id) {
            Some(&index) => self
                .ancestor_indices(index)
                .into_iter()
                .map(|n| self.graph[n].id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Tasks with no incoming edge.
    pub fn sources(&self) -> Vec<TaskId> {
        self.graph
            .externals(Direction::Incoming)
            .map(|n| self.graph[n].id)
            .collect()
    }

    /// Tasks with no outgoing edge.
    pub fn sinks(&self) -> Vec<TaskId> {
        self.sink_indices()
            .into_iter()
            .map(|n| self.graph[n].id)
            .collect()
    }

    /// Get all tasks in the graph.
    pub fn all_tasks(&self) -> Vec<&TaskNode> {
        self.graph.node_weights().collect()
    }

    /// Get tasks in topological order (respecting dependencies).
    ///
    /// # Errors
    /// Returns an error if the graph contains a cycle, which the public
    /// construction API cannot produce.
    pub fn topological_order(&self) -> Result<Vec<&TaskNode>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let task_name = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.name.as_str())
                .unwrap_or("unknown");
            Error::Validation(format!("Cycle detected at task: {}", task_name))
        })?;

        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }

    /// Evaluate a pending task's guard against its predecessors.
    ///
    /// Tasks that are no longer pending, or unknown, report `Wait`.
    pub fn readiness(&self, id: &TaskId) -> Readiness {
        let Some(&index) = self.task_index.get(id) else {
            return Readiness::Wait;
        };
        let node = &self.graph[index];
        if !node.can_start() {
            return Readiness::Wait;
        }

        let preds: Vec<&TaskNode> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect();
        if preds.is_empty() {
            return Readiness::Run;
        }

        let all_terminal = preds.iter().all(|p| p.status.is_terminal());
        match node.guard {
            TaskGuard::AnyPredecessorCompleted => {
                if preds.iter().any(|p| p.status.is_terminal()) {
                    Readiness::Run
                } else {
                    Readiness::Wait
                }
            }
            TaskGuard::AllPredecessorsCompleted => {
                if all_terminal {
                    Readiness::Run
                } else {
                    Readiness::Wait
                }
            }
            TaskGuard::AllPredecessorsSucceeded => {
                if !all_terminal {
                    Readiness::Wait
                } else if preds.iter().all(|p| p.status.is_successful()) {
                    Readiness::Run
                } else {
                    Readiness::Skip
                }
            }
            TaskGuard::AllAncestorsSucceeded => {
                if !all_terminal {
                    Readiness::Wait
                } else if self
                    .ancestor_indices(index)
                    .into_iter()
                    .all(|n| self.graph[n].status.is_successful())
                {
                    Readiness::Run
                } else {
                    Readiness::Skip
                }
            }
        }
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
