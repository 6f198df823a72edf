use crate::context::ClusterContext;
use crate::trace::ProtocolTrace;
use crate::transport::status_reply;
use crate::types::NodeRole;
use bully_common::{Address, NodeId, Result, RosterEntry};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// A participant in the cluster
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub address: Address,
    role: RwLock<NodeRole>,
    listening: AtomicBool,
    shutdown: Mutex<CancellationToken>,
}

impl Node {
    pub fn new(id: NodeId, address: Address, role: NodeRole) -> Self {
        Self {
            id,
            address,
            role: RwLock::new(role),
            listening: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn from_entry(entry: &RosterEntry) -> Self {
        Self::new(entry.id, entry.address.clone(), NodeRole::Subordinate)
    }

    /// Get current role
    pub fn get_role(&self) -> NodeRole {
        *self.role.read()
    }

    /// Set role
    pub fn set_role(&self, role: NodeRole) {
        *self.role.write() = role;
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self.get_role(), NodeRole::Coordinator)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::SeqCst);
    }

    /// Clear the listening flag and wake the serving loop, if any.
    pub fn stop_serving(&self) {
        self.set_listening(false);
        self.shutdown.lock().cancel();
    }

    /// Reply sent to every heartbeat while this node coordinates
    pub fn status_reply(&self) -> String {
        status_reply(&self.address)
    }

    fn arm_shutdown(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.shutdown.lock() = token.clone();
        token
    }

    /// Serve heartbeats until the coordinator lifetime elapses or serving is
    /// stopped. Bind and accept failures end the role the same way.
    #[instrument(skip_all, fields(node_id = %self.id))]
    pub async fn act_as_coordinator(self: &Arc<Self>, ctx: &ClusterContext) -> Result<()> {
        let shutdown = self.arm_shutdown();
        if !self.is_listening() {
            // Stopped before the task got scheduled
            shutdown.cancel();
        }

        let lifetime = ctx.config.coordinator_lifetime();
        let expiry = {
            let node = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(lifetime).await;
                debug!(node_id = %node.id, "Coordinator lifetime elapsed");
                node.stop_serving();
            })
        };

        info!("Serving heartbeats on {} for {:?}", self.address, lifetime);
        let result = ctx
            .transport
            .serve(&self.address, self.status_reply(), shutdown)
            .await;

        expiry.abort();
        self.set_listening(false);
        ctx.traces.publish(ProtocolTrace::Terminated(self.id));

        result
    }

    /// Heartbeat the recorded coordinator every period. Returns only when this
    /// participant wins an election, with itself as the winner.
    #[instrument(skip_all, fields(node_id = %self.id))]
    pub async fn act_as_subordinate(self: &Arc<Self>, ctx: &ClusterContext) -> Result<Arc<Node>> {
        let mut ticker = tokio::time::interval(ctx.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let decided = match ctx.coordinator() {
                Some(target) => match ctx.health.check(&target).await {
                    Ok(status) => {
                        trace!(
                            coordinator = %status.node_id,
                            latency_ms = status.latency_ms,
                            "Heartbeat acknowledged: {}",
                            status.reply
                        );
                        preempt_round(ctx, target.id);
                        continue;
                    }
                    Err(e) if e.is_unreachable() => {
                        warn!("Coordinator {} unreachable: {}", target.id, e);
                        self.contest(ctx, Some(target.id)).await?
                    }
                    Err(e) => return Err(e),
                },
                None => self.contest(ctx, None).await?,
            };

            // Only the quorum maximum passes the validity check, so a decided
            // round always names this participant
            if let Some(winner) = decided {
                debug_assert_eq!(winner.id, self.id);
                return Ok(winner);
            }

            // Give the new coordinator a full period to bind before probing it
            ticker.reset();
        }
    }

    /// Join the current election round (starting one if needed), wait for
    /// other participants to join, then decide the round if no higher id is
    /// contesting it. A recorded coordinator that still answers pre-empts
    /// the round instead.
    async fn contest(
        self: &Arc<Self>,
        ctx: &ClusterContext,
        failed: Option<NodeId>,
    ) -> Result<Option<Arc<Node>>> {
        {
            let mut round = ctx.election.lock();
            if let Some(failed) = failed {
                if !round.is_in_progress() && ctx.coordinator_id() != Some(failed) {
                    debug!(%failed, "Coordinator already replaced, resuming heartbeats");
                    return Ok(None);
                }
            }
            round.begin_election();
            round.add_election_node(self.clone());
            ctx.traces.publish(round.election_trace());
        }

        tokio::time::sleep(ctx.config.election_window()).await;

        loop {
            if let Some(current) = ctx.coordinator() {
                if current.id != self.id && ctx.health.check(&current).await.is_ok() {
                    preempt_round(ctx, current.id);
                    return Ok(None);
                }
            }

            {
                let mut round = ctx.election.lock();
                if !round.is_in_progress() || !round.contains(self.id) {
                    debug!("Election decided or aborted by another participant");
                    return Ok(None);
                }
                if round.is_valid_election(self.id) {
                    let winner = round.end_election()?;
                    ctx.set_coordinator(winner.clone());
                    return Ok(Some(winner));
                }
            }

            trace!("Higher participant contesting, waiting for its decision");
            tokio::time::sleep(ctx.config.heartbeat_interval()).await;
        }
    }
}

/// Abort the open round, if any: the recorded coordinator still answers.
fn preempt_round(ctx: &ClusterContext, coordinator: NodeId) {
    let mut round = ctx.election.lock();
    if round.is_in_progress() {
        info!(
            %coordinator,
            quorum = %round.get_election_message(),
            "Coordinator still answering, aborting election"
        );
        round.abort_election();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, port: u16) -> Node {
        Node::from_entry(&RosterEntry::new(id, "127.0.0.1", port))
    }

    #[test]
    fn test_node_creation() {
        let node = node(4, 9004);

        assert_eq!(node.id, NodeId(4));
        assert_eq!(node.get_role(), NodeRole::Subordinate);
        assert!(!node.is_coordinator());
        assert!(!node.is_listening());
        assert_eq!(node.status_reply(), "SERVER: ACTIVE [127.0.0.1:9004]");
    }

    #[test]
    fn test_node_role_transitions() {
        let node = node(1, 9001);

        node.set_role(NodeRole::Coordinator);
        node.set_listening(true);
        assert!(node.is_coordinator());
        assert!(node.is_listening());

        node.stop_serving();
        assert!(!node.is_listening());
        assert!(node.is_coordinator());
    }

    #[test]
    fn test_stop_serving_cancels_armed_token() {
        let node = node(1, 9001);
        let token = node.arm_shutdown();
        assert!(!token.is_cancelled());

        node.stop_serving();
        assert!(token.is_cancelled());

        // A fresh run gets a fresh token
        assert!(!node.arm_shutdown().is_cancelled());
    }
}
