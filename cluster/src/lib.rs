pub mod config;
pub mod context;
pub mod election;
pub mod health;
pub mod manager;
pub mod node;
pub mod registry;
pub mod trace;
pub mod transport;
pub mod types;

pub use config::ClusterConfig;
pub use context::{ClusterContext, ClusterHandle};
pub use election::{Election, ElectionGuard};
pub use health::{HealthChecker, HeartbeatStatus};
pub use manager::NodeManager;
pub use node::Node;
pub use registry::Registry;
pub use trace::{ProtocolTrace, TraceBus};
pub use transport::{TcpTransport, Transport};
pub use types::*;
