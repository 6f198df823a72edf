use crate::config::ClusterConfig;
use crate::election::Election;
use crate::health::HealthChecker;
use crate::node::Node;
use crate::registry::Registry;
use crate::trace::{ProtocolTrace, TraceBus};
use crate::transport::Transport;
use crate::types::ClusterStats;
use bully_common::{BullyError, NodeId, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Events delivered to the supervisor loop
#[derive(Debug)]
pub(crate) enum SupervisorEvent {
    /// An election was decided in favour of this participant
    Elected(Arc<Node>),
    /// A coordinator task returned
    CoordinatorExited { id: NodeId, generation: u64 },
    /// A subordinate task hit an unrecoverable error
    SubordinateFailed { id: NodeId, generation: u64 },
    Shutdown,
}

/// State shared by the supervisor and every participant task
pub struct ClusterContext {
    pub config: ClusterConfig,
    pub registry: Registry,
    pub election: Election,
    pub traces: TraceBus,
    pub(crate) health: HealthChecker,
    pub(crate) transport: Arc<dyn Transport>,
    coordinator: RwLock<Option<Arc<Node>>>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl ClusterContext {
    pub(crate) fn new(
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let traces = TraceBus::new(config.trace_capacity);

        let ctx = Arc::new(Self {
            election: Election::new(traces.clone()),
            registry: Registry::new(),
            health: HealthChecker::new(transport.clone()),
            transport,
            traces,
            coordinator: RwLock::new(None),
            events,
            config,
        });
        (ctx, rx)
    }

    /// Participant currently recorded as coordinator
    pub fn coordinator(&self) -> Option<Arc<Node>> {
        self.coordinator.read().clone()
    }

    pub fn coordinator_id(&self) -> Option<NodeId> {
        self.coordinator.read().as_ref().map(|n| n.id)
    }

    pub(crate) fn set_coordinator(&self, node: Arc<Node>) {
        *self.coordinator.write() = Some(node);
    }

    pub(crate) fn notify(&self, event: SupervisorEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Supervisor stopped, dropping event");
        }
    }
}

/// Cloneable handle for observing and steering a running cluster
#[derive(Clone)]
pub struct ClusterHandle {
    ctx: Arc<ClusterContext>,
}

impl ClusterHandle {
    pub(crate) fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolTrace> {
        self.ctx.traces.subscribe()
    }

    pub fn coordinator(&self) -> Option<NodeId> {
        self.ctx.coordinator_id()
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.ctx.registry.get(id)
    }

    pub fn stats(&self) -> ClusterStats {
        ClusterStats {
            active_nodes: self.ctx.registry.active_count(),
            terminated_nodes: self.ctx.registry.terminated_count(),
            coordinator: self.ctx.coordinator_id(),
            highest: self.ctx.registry.highest().map(|n| n.id),
            election_in_progress: self.ctx.election.is_in_progress(),
        }
    }

    /// Stop a coordinator's serving loop now, as if its lifetime elapsed.
    /// Fails for participants that are not coordinating.
    pub fn crash(&self, id: NodeId) -> Result<()> {
        let node = self
            .ctx
            .registry
            .get(id)
            .ok_or(BullyError::NodeNotFound { id: id.0 })?;
        if !node.is_coordinator() {
            return Err(BullyError::NotCoordinator { id: id.0 });
        }

        tracing::info!("Forcing participant {} to stop serving", id);
        node.stop_serving();
        Ok(())
    }

    /// Ask the supervisor to stop every participant and return from `run`
    pub fn shutdown(&self) {
        self.ctx.notify(SupervisorEvent::Shutdown);
    }
}
