//! Protocol trace lines.
//!
//! Every protocol transition is published as a [`ProtocolTrace`]. Its
//! `Display` form is the line format consumers rely on:
//!
//! - `t <id>` when a coordinator stops serving
//! - `e [<id1>, <id2>, ...]` when a participant joins an election round
//! - `c <id>` when an election is decided

use bully_common::NodeId;
use std::fmt;
use tokio::sync::broadcast;

pub const TRACE_TARGET: &str = "bully::trace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolTrace {
    Terminated(NodeId),
    Election(Vec<NodeId>),
    Coordinator(NodeId),
}

impl fmt::Display for ProtocolTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolTrace::Terminated(id) => write!(f, "t {}", id),
            ProtocolTrace::Election(ids) => {
                write!(f, "e [")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", id)?;
                }
                write!(f, "]")
            }
            ProtocolTrace::Coordinator(id) => write!(f, "c {}", id),
        }
    }
}

/// Fan-out of protocol traces to any number of subscribers
#[derive(Debug, Clone)]
pub struct TraceBus {
    tx: broadcast::Sender<ProtocolTrace>,
}

impl TraceBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, trace: ProtocolTrace) {
        tracing::info!(target: TRACE_TARGET, "{}", trace);
        // No subscriber is fine: traces are also in the log
        let _ = self.tx.send(trace);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolTrace> {
        self.tx.subscribe()
    }
}
