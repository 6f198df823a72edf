use crate::node::Node;
use crate::transport::{Transport, STATUS_PREFIX};
use bully_common::{BullyError, NodeId, Result};
use std::sync::Arc;
use std::time::Instant;

/// Result of one successful heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatStatus {
    pub node_id: NodeId,
    pub reply: String,
    pub latency_ms: u64,
}

/// Heartbeat checker used by subordinates
pub struct HealthChecker {
    transport: Arc<dyn Transport>,
}

impl HealthChecker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Probe `target` once. Any error means the target should be treated as
    /// down.
    pub async fn check(&self, target: &Node) -> Result<HeartbeatStatus> {
        let started = Instant::now();
        let reply = self.transport.probe(&target.address).await?;

        if !reply.starts_with(STATUS_PREFIX) {
            return Err(BullyError::UnexpectedReply { reply });
        }

        Ok(HeartbeatStatus {
            node_id: target.id,
            reply,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}
