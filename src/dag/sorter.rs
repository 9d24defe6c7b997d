// src/dag/sorter.rs

//! Owned topological sorter driving the DAG run.
//!
//! Nodes are added with their predecessors, the structure is `prepare`d
//! once, and then the orchestrator alternates between [`TopologicalSorter::get_ready`]
//! (hand out nodes whose predecessors are all done) and
//! [`TopologicalSorter::done`] (a handed-out node reached a terminal state).

use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use tracing::debug;

use crate::types::JobName;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SorterError {
    #[error("nodes cannot be added after the sorter was prepared")]
    AlreadyPrepared,

    #[error("sorter was not prepared")]
    NotPrepared,

    #[error("cycle between nodes: {}", .0.join(", "))]
    Cycle(Vec<JobName>),

    #[error("node '{0}' is unknown")]
    UnknownNode(JobName),

    #[error("node '{0}' was not handed out or is already done")]
    NotHandedOut(JobName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    /// Waiting on at least one predecessor.
    Pending,
    /// All predecessors done, not yet returned by `get_ready`.
    Ready,
    /// Returned by `get_ready`, waiting for `done`.
    HandedOut,
    Done,
}

#[derive(Debug, Clone)]
struct SortNode {
    successors: Vec<JobName>,
    npredecessors: usize,
    /// Predecessors not yet done; only meaningful after `prepare`.
    remaining: usize,
    state: NodeState,
}

impl SortNode {
    fn new() -> Self {
        Self {
            successors: Vec::new(),
            npredecessors: 0,
            remaining: 0,
            state: NodeState::Pending,
        }
    }
}

#[derive(Debug, Default)]
pub struct TopologicalSorter {
    nodes: HashMap<JobName, SortNode>,
    /// Insertion order, so ready nodes come out deterministically.
    order: Vec<JobName>,
    ready: VecDeque<JobName>,
    prepared: bool,
    finished: usize,
}

impl TopologicalSorter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `node` with the given predecessors. Unknown predecessors are
    /// created as nodes of their own; repeated edges are ignored.
    pub fn add<I, S>(&mut self, node: &str, predecessors: I) -> Result<(), SorterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.prepared {
            return Err(SorterError::AlreadyPrepared);
        }

        self.ensure_node(node);

        for pred in predecessors {
            let pred = pred.as_ref();
            self.ensure_node(pred);

            let pred_node = self
                .nodes
                .get_mut(pred)
                .ok_or_else(|| SorterError::UnknownNode(pred.to_string()))?;
            if pred_node.successors.iter().any(|s| s == node) {
                continue;
            }
            pred_node.successors.push(node.to_string());

            if let Some(n) = self.nodes.get_mut(node) {
                n.npredecessors += 1;
            }
        }

        Ok(())
    }

    fn ensure_node(&mut self, name: &str) {
        if !self.nodes.contains_key(name) {
            self.nodes.insert(name.to_string(), SortNode::new());
            self.order.push(name.to_string());
        }
    }

    /// Freeze the graph, check it for cycles and seed the ready queue.
    pub fn prepare(&mut self) -> Result<(), SorterError> {
        if self.prepared {
            return Err(SorterError::AlreadyPrepared);
        }

        let cycle = self.find_unsortable_nodes();
        if !cycle.is_empty() {
            return Err(SorterError::Cycle(cycle));
        }

        for name in &self.order {
            if let Some(node) = self.nodes.get_mut(name) {
                node.remaining = node.npredecessors;
                if node.remaining == 0 {
                    node.state = NodeState::Ready;
                    self.ready.push_back(name.clone());
                }
            }
        }

        self.prepared = true;
        debug!(
            nodes = self.nodes.len(),
            initially_ready = self.ready.len(),
            "topological sorter prepared"
        );
        Ok(())
    }

    /// Kahn's algorithm on a scratch copy of the in-degrees; returns the
    /// (sorted) names of nodes that can never become ready.
    fn find_unsortable_nodes(&self) -> Vec<JobName> {
        let mut indegree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(name, node)| (name.as_str(), node.npredecessors))
            .collect();

        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(|s| s.as_str())
            .filter(|name| indegree.get(name) == Some(&0))
            .collect();

        while let Some(name) = queue.pop_front() {
            let Some(node) = self.nodes.get(name) else {
                continue;
            };
            for succ in &node.successors {
                if let Some(deg) = indegree.get_mut(succ.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(succ.as_str());
                    }
                }
            }
        }

        let mut stuck: Vec<JobName> = indegree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        stuck.sort();
        stuck
    }

    /// `true` while some node is not yet done.
    pub fn is_active(&self) -> bool {
        self.prepared && self.finished < self.nodes.len()
    }

    /// Hand out every node that became ready since the last call.
    pub fn get_ready(&mut self) -> Vec<JobName> {
        let mut out = Vec::with_capacity(self.ready.len());
        while let Some(name) = self.ready.pop_front() {
            if let Some(node) = self.nodes.get_mut(&name) {
                node.state = NodeState::HandedOut;
            }
            out.push(name);
        }
        out
    }

    /// Mark a handed-out node as done and promote successors whose
    /// predecessors are now all done.
    pub fn done(&mut self, name: &str) -> Result<(), SorterError> {
        if !self.prepared {
            return Err(SorterError::NotPrepared);
        }

        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| SorterError::UnknownNode(name.to_string()))?;
        if node.state != NodeState::HandedOut {
            return Err(SorterError::NotHandedOut(name.to_string()));
        }
        node.state = NodeState::Done;
        self.finished += 1;

        let successors = node.successors.clone();
        for succ in successors {
            if let Some(s) = self.nodes.get_mut(&succ) {
                s.remaining = s.remaining.saturating_sub(1);
                if s.remaining == 0 && s.state == NodeState::Pending {
                    s.state = NodeState::Ready;
                    debug!(node = %succ, after = %name, "node became ready");
                    self.ready.push_back(succ);
                }
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> TopologicalSorter {
        let mut s = TopologicalSorter::new();
        s.add("A", Vec::<&str>::new()).unwrap();
        s.add("B", ["A"]).unwrap();
        s.add("C", ["A"]).unwrap();
        s.add("D", ["B", "C"]).unwrap();
        s
    }

    #[test]
    fn diamond_releases_in_waves() {
        let mut s = diamond();
        s.prepare().unwrap();

        assert_eq!(s.get_ready(), vec!["A".to_string()]);
        assert!(s.get_ready().is_empty());

        s.done("A").unwrap();
        assert_eq!(s.get_ready(), vec!["B".to_string(), "C".to_string()]);

        s.done("B").unwrap();
        assert!(s.get_ready().is_empty(), "D must wait for C");

        s.done("C").unwrap();
        assert_eq!(s.get_ready(), vec!["D".to_string()]);
        assert!(s.is_active());

        s.done("D").unwrap();
        assert!(!s.is_active());
    }

    #[test]
    fn cycle_is_reported_on_prepare() {
        let mut s = TopologicalSorter::new();
        s.add("A", ["C"]).unwrap();
        s.add("B", ["A"]).unwrap();
        s.add("C", ["B"]).unwrap();
        s.add("X", Vec::<&str>::new()).unwrap();

        let err = s.prepare().unwrap_err();
        assert_eq!(
            err,
            SorterError::Cycle(vec!["A".to_string(), "B".to_string(), "C".to_string()])
        );
    }

    #[test]
    fn done_requires_handed_out_node() {
        let mut s = diamond();
        s.prepare().unwrap();
        assert_eq!(s.done("B"), Err(SorterError::NotHandedOut("B".to_string())));
        let _ = s.get_ready();
        s.done("A").unwrap();
        assert_eq!(s.done("A"), Err(SorterError::NotHandedOut("A".to_string())));
    }

    #[test]
    fn add_after_prepare_is_rejected() {
        let mut s = diamond();
        s.prepare().unwrap();
        assert_eq!(
            s.add("E", ["D"]),
            Err(SorterError::AlreadyPrepared)
        );
    }

    #[test]
    fn duplicate_edges_count_once() {
        let mut s = TopologicalSorter::new();
        s.add("A", Vec::<&str>::new()).unwrap();
        s.add("B", ["A", "A"]).unwrap();
        s.prepare().unwrap();
        let _ = s.get_ready();
        s.done("A").unwrap();
        assert_eq!(s.get_ready(), vec!["B".to_string()]);
    }

    #[test]
    fn empty_sorter_is_inactive_after_prepare() {
        let mut s = TopologicalSorter::new();
        s.prepare().unwrap();
        assert!(!s.is_active());
        assert!(s.is_empty());
    }
}
