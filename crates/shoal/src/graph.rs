//! Labelled digraph with weighted-choice edge traversal. Single-threaded.
//!
//! `next_node` follows the outgoing edge whose chooser callback reports
//! the highest positive weight; an edge without a chooser acts as a
//! weight-0 fallback. The per-graph last-error code is retained for API
//! compatibility with older call sites.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("no error")]
    None,
    #[error("node not found")]
    NodeNotFound,
    #[error("a node with this label already exists")]
    DuplicateNode,
    #[error("nodes are not connected")]
    NotConnected,
    #[error("no outgoing edge is eligible")]
    NoEligibleEdge,
}

/// Weight callback; receives the candidate target node's value.
pub type ChooserFn<T> = fn(&T) -> i64;

struct Edge {
    to: String,
    chooser: Option<usize>,
}

pub struct GraphNode<T> {
    label: String,
    value: T,
    edges: Vec<Edge>,
}

impl<T> GraphNode<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

pub struct Graph<T> {
    label: String,
    nodes: HashMap<String, GraphNode<T>>,
    choosers: Vec<ChooserFn<T>>,
    last_error: GraphError,
}

impl<T> Graph<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            nodes: HashMap::new(),
            choosers: Vec::new(),
            last_error: GraphError::None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Last error code recorded by a failed operation.
    pub fn last_error(&self) -> GraphError {
        self.last_error
    }

    /// Human-readable description of the last error.
    pub fn strerror(&self) -> String {
        self.last_error.to_string()
    }

    pub fn error_reset(&mut self) {
        self.last_error = GraphError::None;
    }

    fn fail<R>(&mut self, error: GraphError) -> Option<R> {
        self.last_error = error;
        None
    }

    pub fn node_add(&mut self, label: impl Into<String>, value: T) -> Option<&GraphNode<T>> {
        let label = label.into();
        if self.nodes.contains_key(&label) {
            return self.fail(GraphError::DuplicateNode);
        }
        let node = GraphNode {
            label: label.clone(),
            value,
            edges: Vec::new(),
        };
        self.nodes.insert(label.clone(), node);
        self.nodes.get(&label)
    }

    pub fn node_get(&self, label: &str) -> Option<&GraphNode<T>> {
        self.nodes.get(label)
    }

    pub fn node_get_mut(&mut self, label: &str) -> Option<&mut GraphNode<T>> {
        self.nodes.get_mut(label)
    }

    /// Remove a node and every edge pointing at it.
    pub fn node_delete(&mut self, label: &str) -> Option<T> {
        let Some(node) = self.nodes.remove(label) else {
            return self.fail(GraphError::NodeNotFound);
        };
        for other in self.nodes.values_mut() {
            other.edges.retain(|e| e.to != label);
        }
        Some(node.value)
    }

    /// Connect `from` to `to`, optionally through a weight chooser.
    pub fn node_connect(
        &mut self,
        from: &str,
        to: &str,
        chooser: Option<ChooserFn<T>>,
    ) -> bool {
        if !self.nodes.contains_key(to) {
            self.last_error = GraphError::NodeNotFound;
            return false;
        }
        let chooser = chooser.map(|cb| {
            self.choosers.push(cb);
            self.choosers.len() - 1
        });
        let Some(node) = self.nodes.get_mut(from) else {
            self.last_error = GraphError::NodeNotFound;
            return false;
        };
        node.edges.push(Edge {
            to: to.to_string(),
            chooser,
        });
        true
    }

    pub fn node_disconnect(&mut self, from: &str, to: &str) -> bool {
        let Some(node) = self.nodes.get_mut(from) else {
            self.last_error = GraphError::NodeNotFound;
            return false;
        };
        let before = node.edges.len();
        node.edges.retain(|e| e.to != to);
        if node.edges.len() == before {
            self.last_error = GraphError::NotConnected;
            return false;
        }
        true
    }

    /// Labels of the nodes reachable over one outgoing edge.
    pub fn node_connections(&self, label: &str) -> Option<Vec<&str>> {
        self.nodes
            .get(label)
            .map(|n| n.edges.iter().map(|e| e.to.as_str()).collect())
    }

    /// Follow the outgoing edge whose chooser reports the highest positive
    /// weight. Edges without a chooser weigh 0 and act as fallbacks when
    /// nothing scores positive.
    pub fn node_next(&mut self, label: &str) -> Option<&GraphNode<T>> {
        let Some(node) = self.nodes.get(label) else {
            return self.fail(GraphError::NodeNotFound);
        };

        let mut best: Option<(&str, i64)> = None;
        for edge in &node.edges {
            let Some(target) = self.nodes.get(&edge.to) else {
                continue;
            };
            let weight = edge
                .chooser
                .map_or(0, |index| (self.choosers[index])(&target.value));
            match best {
                Some((_, w)) if w >= weight => {}
                _ => best = Some((&edge.to, weight)),
            }
        }

        match best {
            Some((to, weight)) if weight >= 0 => {
                let to = to.to_string();
                self.nodes.get(&to)
            }
            _ => self.fail(GraphError::NoEligibleEdge),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_delete() {
        let mut g = Graph::new("net");
        assert!(g.node_add("a", 1).is_some());
        assert!(g.node_add("a", 2).is_none());
        assert_eq!(g.last_error(), GraphError::DuplicateNode);

        g.error_reset();
        assert_eq!(g.last_error(), GraphError::None);

        assert_eq!(g.node_get("a").map(|n| *n.value()), Some(1));
        assert_eq!(g.node_delete("a"), Some(1));
        assert!(g.node_get("a").is_none());
        assert!(g.node_delete("a").is_none());
        assert_eq!(g.last_error(), GraphError::NodeNotFound);
    }

    #[test]
    fn test_delete_removes_incoming_edges() {
        let mut g = Graph::new("net");
        g.node_add("a", 0);
        g.node_add("b", 0);
        assert!(g.node_connect("a", "b", None));
        g.node_delete("b");
        assert_eq!(g.node_connections("a").unwrap().len(), 0);
    }

    #[test]
    fn test_next_follows_highest_weight() {
        let mut g = Graph::new("router");
        g.node_add("start", 0);
        g.node_add("slow", 10);
        g.node_add("fast", 90);

        // Weight comes straight from the target node's value.
        g.node_connect("start", "slow", Some(|v| *v));
        g.node_connect("start", "fast", Some(|v| *v));

        let next = g.node_next("start").unwrap();
        assert_eq!(next.label(), "fast");
    }

    #[test]
    fn test_chooserless_edge_is_fallback() {
        let mut g = Graph::new("router");
        g.node_add("start", 0);
        g.node_add("drain", 0);
        g.node_add("backup", 0);

        g.node_connect("start", "drain", Some(|_| -5));
        g.node_connect("start", "backup", None);

        // The negative-weight edge loses to the weight-0 fallback.
        let next = g.node_next("start").unwrap();
        assert_eq!(next.label(), "backup");
    }

    #[test]
    fn test_disconnect() {
        let mut g = Graph::new("net");
        g.node_add("a", 0);
        g.node_add("b", 0);
        g.node_connect("a", "b", None);

        assert!(g.node_disconnect("a", "b"));
        assert!(!g.node_disconnect("a", "b"));
        assert_eq!(g.last_error(), GraphError::NotConnected);
    }
}
