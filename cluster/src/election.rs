//! Bully election engine.
//!
//! A single [`Election`] instance is shared by every participant. The round
//! state (in-progress flag and quorum) sits behind one mutex; callers that
//! need several steps to be atomic, such as checking validity and then
//! deciding, hold an [`ElectionGuard`] across them.

use crate::node::Node;
use crate::trace::{ProtocolTrace, TraceBus};
use bully_common::{BullyError, NodeId, Result};
use linked_hash_map::LinkedHashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct ElectionRound {
    in_progress: bool,
    /// Participants of the current round, in join order
    quorum: LinkedHashMap<NodeId, Arc<Node>>,
}

pub struct Election {
    round: Mutex<ElectionRound>,
    traces: TraceBus,
}

impl Election {
    pub fn new(traces: TraceBus) -> Self {
        Self {
            round: Mutex::new(ElectionRound::default()),
            traces,
        }
    }

    /// Lock the round for a sequence of operations
    pub fn lock(&self) -> ElectionGuard<'_> {
        ElectionGuard {
            round: self.round.lock(),
            traces: &self.traces,
        }
    }

    pub fn begin_election(&self) {
        self.lock().begin_election()
    }

    pub fn add_election_node(&self, node: Arc<Node>) {
        self.lock().add_election_node(node)
    }

    pub fn is_valid_election(&self, id: NodeId) -> bool {
        self.lock().is_valid_election(id)
    }

    pub fn end_election(&self) -> Result<Arc<Node>> {
        self.lock().end_election()
    }

    pub fn abort_election(&self) {
        self.lock().abort_election()
    }

    pub fn get_election_message(&self) -> String {
        self.lock().get_election_message()
    }

    pub fn is_in_progress(&self) -> bool {
        self.lock().is_in_progress()
    }
}

pub struct ElectionGuard<'a> {
    round: MutexGuard<'a, ElectionRound>,
    traces: &'a TraceBus,
}

impl ElectionGuard<'_> {
    pub fn is_in_progress(&self) -> bool {
        self.round.in_progress
    }

    /// Mark a round as started. Has no effect if one is already running.
    pub fn begin_election(&mut self) {
        if !self.round.in_progress {
            debug!("Election round started");
            self.round.in_progress = true;
        }
    }

    /// Add a participant to the round. A repeated join replaces the entry but
    /// keeps its original position. Joining implies the round is in progress.
    pub fn add_election_node(&mut self, node: Arc<Node>) {
        self.round.in_progress = true;
        match self.round.quorum.get_mut(&node.id) {
            Some(existing) => *existing = node,
            None => {
                self.round.quorum.insert(node.id, node);
            }
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.round.quorum.contains_key(&id)
    }

    /// Highest id currently in the quorum
    pub fn highest_id(&self) -> Option<NodeId> {
        self.round.quorum.keys().max().copied()
    }

    /// True if `id` may claim the round: the quorum is empty or holds no
    /// strictly higher id.
    pub fn is_valid_election(&self, id: NodeId) -> bool {
        match self.highest_id() {
            None => true,
            Some(highest) => id >= highest,
        }
    }

    /// Decide the round: the highest-id participant wins. The round is closed
    /// and the quorum emptied in the same critical section.
    pub fn end_election(&mut self) -> Result<Arc<Node>> {
        let winner = self
            .round
            .quorum
            .values()
            .max_by_key(|node| node.id)
            .cloned()
            .ok_or(BullyError::EmptyQuorum)?;

        info!(
            winner = %winner.id,
            quorum = %self.get_election_message(),
            "Election decided"
        );
        self.traces.publish(ProtocolTrace::Coordinator(winner.id));

        self.round.in_progress = false;
        self.round.quorum.clear();

        Ok(winner)
    }

    /// Close the round without a decision
    pub fn abort_election(&mut self) {
        if self.round.in_progress {
            debug!("Election round aborted");
        }
        self.round.in_progress = false;
        self.round.quorum.clear();
    }

    pub fn quorum_ids(&self) -> Vec<NodeId> {
        self.round.quorum.keys().copied().collect()
    }

    pub fn election_trace(&self) -> ProtocolTrace {
        ProtocolTrace::Election(self.quorum_ids())
    }

    /// `e [<id>, ...]` in join order. Used for tracing only.
    pub fn get_election_message(&self) -> String {
        self.election_trace().to_string()
    }
}
