use crate::config::ClusterConfig;
use crate::context::{ClusterContext, ClusterHandle, SupervisorEvent};
use crate::node::Node;
use crate::transport::{TcpTransport, Transport};
use crate::types::NodeRole;
use bully_common::{BullyError, NodeId, Result, RosterEntry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct ParticipantTask {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Supervisor: boots the participants and rebinds the coordinator role
/// after every election decision.
pub struct NodeManager {
    ctx: Arc<ClusterContext>,
    tasks: HashMap<NodeId, ParticipantTask>,
    next_generation: u64,
    events: mpsc::UnboundedReceiver<SupervisorEvent>,
}

impl NodeManager {
    /// Create a supervisor that talks TCP
    pub fn new(config: ClusterConfig) -> Self {
        let transport = Arc::new(TcpTransport::from_config(&config));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: ClusterConfig, transport: Arc<dyn Transport>) -> Self {
        let (ctx, events) = ClusterContext::new(config, transport);
        Self {
            ctx,
            tasks: HashMap::new(),
            next_generation: 0,
            events,
        }
    }

    pub fn handle(&self) -> ClusterHandle {
        ClusterHandle::new(self.ctx.clone())
    }

    pub fn context(&self) -> &Arc<ClusterContext> {
        &self.ctx
    }

    /// Register the roster, give the highest id the coordinator role and
    /// start one task per participant. Must be called inside a tokio runtime.
    pub fn boot(&mut self, roster: Vec<RosterEntry>) -> Result<()> {
        if !self.tasks.is_empty() {
            return Err(BullyError::Config("cluster already booted".into()));
        }
        if roster.is_empty() {
            return Err(BullyError::EmptyRoster);
        }

        for entry in &roster {
            if !self.ctx.registry.add(Arc::new(Node::from_entry(entry))) {
                return Err(BullyError::DuplicateNodeId { id: entry.id.0 });
            }
        }

        let mut nodes = self.ctx.registry.active();
        nodes.sort_by(|a, b| b.id.cmp(&a.id));

        info!("Booting cluster with {} participants", nodes.len());

        for (index, node) in nodes.into_iter().enumerate() {
            if index == 0 {
                node.set_role(NodeRole::Coordinator);
                node.set_listening(true);
                self.ctx.set_coordinator(node.clone());
                info!("Initial coordinator: {} at {}", node.id, node.address);
            } else {
                node.set_role(NodeRole::Subordinate);
            }
            self.spawn_participant(node);
        }

        Ok(())
    }

    /// Start (or restart) `node`'s task in the coordinator role. Any previous
    /// task for the same id is discarded first.
    pub async fn rebind_coordinator(&mut self, node: Arc<Node>) {
        if let Some(previous) = self.tasks.remove(&node.id) {
            if !previous.handle.is_finished() {
                debug!("Stopping running task of participant {}", node.id);
                previous.handle.abort();
            }
            if let Err(e) = previous.handle.await {
                if !e.is_cancelled() {
                    warn!("Previous task of participant {} panicked: {}", node.id, e);
                }
            }
        }

        node.set_role(NodeRole::Coordinator);
        node.set_listening(true);
        self.ctx.set_coordinator(node.clone());

        info!("Binding participant {} as coordinator at {}", node.id, node.address);
        self.spawn_participant(node);
    }

    /// Process supervisor events until no active participant is left or
    /// shutdown is requested.
    pub async fn run(mut self) -> Result<()> {
        info!("Supervisor running");

        while let Some(event) = self.events.recv().await {
            match event {
                SupervisorEvent::Elected(winner) => self.rebind_coordinator(winner).await,
                SupervisorEvent::CoordinatorExited { id, generation } => {
                    info!("Coordinator {} stopped", id);
                    self.retire(id, generation);
                }
                SupervisorEvent::SubordinateFailed { id, generation } => {
                    warn!("Subordinate {} stopped", id);
                    self.retire(id, generation);
                }
                SupervisorEvent::Shutdown => {
                    self.stop_all().await;
                    info!("Supervisor shut down");
                    return Ok(());
                }
            }

            if self.ctx.registry.active_count() == 0 {
                warn!("No active participants remain, stopping supervisor");
                return Ok(());
            }
        }

        Ok(())
    }

    fn spawn_participant(&mut self, node: Arc<Node>) {
        let ctx = self.ctx.clone();
        let id = node.id;
        let generation = self.next_generation;
        self.next_generation += 1;

        let handle = tokio::spawn(async move {
            let event = match node.get_role() {
                NodeRole::Coordinator => {
                    if let Err(e) = node.act_as_coordinator(&ctx).await {
                        error!("Coordinator {} failed: {}", node.id, e);
                    }
                    SupervisorEvent::CoordinatorExited {
                        id: node.id,
                        generation,
                    }
                }
                NodeRole::Subordinate => match node.act_as_subordinate(&ctx).await {
                    Ok(winner) => SupervisorEvent::Elected(winner),
                    Err(e) => {
                        error!("Subordinate {} failed: {}", node.id, e);
                        SupervisorEvent::SubordinateFailed {
                            id: node.id,
                            generation,
                        }
                    }
                },
            };
            ctx.notify(event);
        });

        if let Some(previous) = self.tasks.insert(id, ParticipantTask { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Move a participant whose task ended to the terminated list. Events
    /// from a task that has since been replaced are ignored.
    fn retire(&mut self, id: NodeId, generation: u64) {
        match self.tasks.get(&id) {
            Some(task) if task.generation != generation => {
                debug!("Ignoring exit of replaced task for participant {}", id);
                return;
            }
            Some(_) => {
                self.tasks.remove(&id);
            }
            None => {}
        }

        if let Some(node) = self.ctx.registry.get(id) {
            node.set_role(NodeRole::Subordinate);
            node.set_listening(false);
        }
        if self.ctx.registry.add_terminated(id) {
            info!(
                "Participant {} terminated, {} active",
                id,
                self.ctx.registry.active_count()
            );
        }
    }

    async fn stop_all(&mut self) {
        for node in self.ctx.registry.active() {
            node.stop_serving();
        }
        for (id, task) in self.tasks.drain() {
            task.handle.abort();
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!("Task of participant {} panicked: {}", id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::ProtocolTrace;
    use crate::transport::memory::MemoryTransport;
    use async_trait::async_trait;
    use bully_common::Address;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    /// Drops the first heartbeat sent to one address, then behaves normally
    struct FlakyOnce {
        inner: MemoryTransport,
        target: Address,
        tripped: AtomicBool,
    }

    impl FlakyOnce {
        fn new(target: Address) -> Self {
            Self {
                inner: MemoryTransport::default(),
                target,
                tripped: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyOnce {
        async fn probe(&self, target: &Address) -> Result<String> {
            if *target == self.target && !self.tripped.swap(true, Ordering::SeqCst) {
                return Err(BullyError::ProbeTimeout {
                    address: target.to_string(),
                });
            }
            self.inner.probe(target).await
        }

        async fn serve(&self, address: &Address, reply: String, shutdown: CancellationToken) -> Result<()> {
            self.inner.serve(address, reply, shutdown).await
        }
    }

    fn fast_config(lifetime_ms: u64) -> ClusterConfig {
        ClusterConfig {
            heartbeat_interval_ms: 20,
            coordinator_lifetime_ms: lifetime_ms,
            probe_timeout_ms: 20,
            election_window_ms: 60,
            ..Default::default()
        }
    }

    fn roster(ids: &[u64]) -> Vec<RosterEntry> {
        ids.iter()
            .map(|id| RosterEntry::new(*id, "127.0.0.1", 9000 + *id as u16))
            .collect()
    }

    async fn next_decision(rx: &mut broadcast::Receiver<ProtocolTrace>) -> NodeId {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let ProtocolTrace::Coordinator(id) = rx.recv().await.unwrap() {
                    return id;
                }
            }
        })
        .await
        .expect("no election decision")
    }

    #[tokio::test]
    async fn test_boot_assigns_highest_id_coordinator() {
        let mut manager =
            NodeManager::with_transport(fast_config(60_000), Arc::new(MemoryTransport::default()));
        let handle = manager.handle();

        manager.boot(roster(&[2, 7, 1, 5])).unwrap();

        assert_eq!(handle.coordinator(), Some(NodeId(7)));
        for node in manager.context().registry.active() {
            assert_eq!(node.is_coordinator(), node.id == NodeId(7));
        }
        assert_eq!(handle.stats().highest, Some(NodeId(7)));
        handle.shutdown();
        manager.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_boot_rejects_bad_rosters() {
        let mut manager =
            NodeManager::with_transport(fast_config(60_000), Arc::new(MemoryTransport::default()));
        assert!(matches!(manager.boot(Vec::new()), Err(BullyError::EmptyRoster)));

        let mut manager =
            NodeManager::with_transport(fast_config(60_000), Arc::new(MemoryTransport::default()));
        assert!(matches!(
            manager.boot(roster(&[1, 1])),
            Err(BullyError::DuplicateNodeId { id: 1 })
        ));
    }

    #[tokio::test]
    async fn test_repeated_crashes_converge_on_highest_survivor() {
        let mut manager =
            NodeManager::with_transport(fast_config(60_000), Arc::new(MemoryTransport::default()));
        let handle = manager.handle();
        let mut traces = handle.subscribe();

        manager.boot(roster(&[1, 2, 3, 4])).unwrap();
        let supervisor = tokio::spawn(manager.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.crash(NodeId(4)).unwrap();
        assert_eq!(next_decision(&mut traces).await, NodeId(3));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.coordinator(), Some(NodeId(3)));
        handle.crash(NodeId(3)).unwrap();
        assert_eq!(next_decision(&mut traces).await, NodeId(2));

        let stats = handle.stats();
        assert_eq!(stats.coordinator, Some(NodeId(2)));
        assert_eq!(stats.terminated_nodes, 2);
        assert_eq!(stats.active_nodes, 2);

        handle.shutdown();
        supervisor.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missed_heartbeat_does_not_depose_live_coordinator() {
        let transport = Arc::new(FlakyOnce::new(Address::new("127.0.0.1", 9003)));
        let mut manager = NodeManager::with_transport(fast_config(60_000), transport.clone());
        let handle = manager.handle();
        let mut traces = handle.subscribe();

        manager.boot(roster(&[1, 2, 3])).unwrap();
        let supervisor = tokio::spawn(manager.run());

        while !transport.tripped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Long enough for any round opened by the dropped heartbeat to be
        // decided several times over
        tokio::time::sleep(Duration::from_millis(400)).await;

        let mut opened = false;
        while let Ok(trace) = traces.try_recv() {
            match trace {
                ProtocolTrace::Election(_) => opened = true,
                ProtocolTrace::Coordinator(id) => panic!("unexpected decision for {}", id),
                ProtocolTrace::Terminated(id) => panic!("unexpected termination of {}", id),
            }
        }
        assert!(opened, "the dropped heartbeat should open a round");

        let stats = handle.stats();
        assert_eq!(stats.coordinator, Some(NodeId(3)));
        assert!(!stats.election_in_progress);
        assert!(handle.node(NodeId(3)).unwrap().is_listening());
        for id in [1, 2] {
            assert_eq!(handle.node(NodeId(id)).unwrap().get_role(), NodeRole::Subordinate);
        }

        handle.shutdown();
        supervisor.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_crash_targets_only_the_coordinator() {
        let mut manager =
            NodeManager::with_transport(fast_config(60_000), Arc::new(MemoryTransport::default()));
        let handle = manager.handle();
        manager.boot(roster(&[1, 2])).unwrap();

        assert!(matches!(
            handle.crash(NodeId(1)),
            Err(BullyError::NotCoordinator { id: 1 })
        ));
        assert!(matches!(
            handle.crash(NodeId(9)),
            Err(BullyError::NodeNotFound { id: 9 })
        ));
        assert!(handle.node(NodeId(2)).unwrap().is_listening());
        assert!(handle.crash(NodeId(2)).is_ok());

        handle.shutdown();
        manager.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_coordinator_expiry_triggers_election() {
        let mut manager =
            NodeManager::with_transport(fast_config(150), Arc::new(MemoryTransport::default()));
        let handle = manager.handle();
        let mut traces = handle.subscribe();

        manager.boot(roster(&[1, 2])).unwrap();
        let supervisor = tokio::spawn(manager.run());

        let first = tokio::time::timeout(Duration::from_secs(5), traces.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, ProtocolTrace::Terminated(NodeId(2)));
        assert_eq!(next_decision(&mut traces).await, NodeId(1));

        // Participant 1 is the last one standing: after it expires the
        // supervisor has nobody left to elect and returns.
        tokio::time::timeout(Duration::from_secs(5), supervisor)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(handle.stats().active_nodes, 0);
        assert_eq!(handle.stats().terminated_nodes, 2);
    }

    #[tokio::test]
    async fn test_rebind_restarts_finished_coordinator() {
        let transport = Arc::new(MemoryTransport::default());
        let mut manager = NodeManager::with_transport(fast_config(60_000), transport.clone());
        let handle = manager.handle();

        manager.boot(roster(&[1])).unwrap();
        let node = handle.node(NodeId(1)).unwrap();

        handle.crash(NodeId(1)).unwrap();
        while !manager.tasks[&NodeId(1)].handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        manager.rebind_coordinator(node.clone()).await;
        assert!(node.is_coordinator());
        assert!(node.is_listening());

        let mut reply = transport.probe(&node.address).await;
        while reply.is_err() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            reply = transport.probe(&node.address).await;
        }
        assert!(reply.unwrap().contains("127.0.0.1:9001"));

        handle.shutdown();
        manager.run().await.unwrap();
    }
}
