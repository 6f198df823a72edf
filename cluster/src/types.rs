use bully_common::NodeId;
use serde::{Deserialize, Serialize};

/// Role of a participant in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Coordinator: serves heartbeats until it expires or is stopped
    Coordinator,

    /// Subordinate: heartbeats the coordinator and joins elections
    Subordinate,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Coordinator => write!(f, "Coordinator"),
            NodeRole::Subordinate => write!(f, "Subordinate"),
        }
    }
}

/// Snapshot of the cluster as seen by the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub active_nodes: usize,
    pub terminated_nodes: usize,
    pub coordinator: Option<NodeId>,
    pub highest: Option<NodeId>,
    pub election_in_progress: bool,
}
