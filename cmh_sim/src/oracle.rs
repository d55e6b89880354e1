//! Oracle - ground-truth cycle detection over the global wait-for graph.
//!
//! The protocol never sees the whole graph. The oracle does, and runs a
//! plain depth-first search over it so the runner can check every verdict
//! the protocol reaches.

use cmh_core::{ParticipantId, SystemSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnPath,
    Done,
}

/// Centralized view of a wait-for graph, indexed by participant id.
///
/// Edges to ids outside the graph are ignored.
#[derive(Debug, Clone, Default)]
pub struct Oracle {
    adjacency: Vec<Vec<usize>>,
}

impl Oracle {
    pub fn new(adjacency: Vec<Vec<usize>>) -> Self {
        Self { adjacency }
    }

    /// Builds the graph from the wait edges recorded in a snapshot.
    pub fn from_snapshot(snapshot: &SystemSnapshot) -> Self {
        Self::new(snapshot.wait_edges())
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    fn successors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        let n = self.adjacency.len();
        self.adjacency
            .get(node)
            .into_iter()
            .flatten()
            .copied()
            .filter(move |&s| s < n)
    }

    /// Finds some cycle, returned in wait order: each node waits on the next
    /// and the last waits on the first. A self-wait is a cycle of one.
    pub fn find_cycle(&self) -> Option<Vec<usize>> {
        let n = self.adjacency.len();
        let mut state = vec![Visit::New; n];
        // (node, index of the next edge to follow)
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for start in 0..n {
            if state[start] != Visit::New {
                continue;
            }
            state[start] = Visit::OnPath;
            stack.push((start, 0));

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let edge = top.1;
                top.1 += 1;

                match self.adjacency[node].get(edge).copied() {
                    Some(succ) if succ >= n => {}
                    Some(succ) => match state[succ] {
                        Visit::New => {
                            state[succ] = Visit::OnPath;
                            stack.push((succ, 0));
                        }
                        Visit::OnPath => {
                            let from = stack.iter().position(|&(v, _)| v == succ).unwrap_or(0);
                            return Some(stack[from..].iter().map(|&(v, _)| v).collect());
                        }
                        Visit::Done => {}
                    },
                    None => {
                        state[node] = Visit::Done;
                        stack.pop();
                    }
                }
            }
        }

        None
    }

    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Whether `node` can reach itself along wait edges.
    pub fn lies_on_cycle(&self, node: usize) -> bool {
        if node >= self.adjacency.len() {
            return false;
        }

        let mut seen = vec![false; self.adjacency.len()];
        let mut frontier: Vec<usize> = self.successors(node).collect();

        while let Some(v) = frontier.pop() {
            if v == node {
                return true;
            }
            if !std::mem::replace(&mut seen[v], true) {
                frontier.extend(self.successors(v));
            }
        }

        false
    }

    /// Every participant that lies on at least one cycle.
    pub fn nodes_on_cycles(&self) -> Vec<ParticipantId> {
        (0..self.adjacency.len())
            .filter(|&v| self.lies_on_cycle(v))
            .map(ParticipantId)
            .collect()
    }
}
