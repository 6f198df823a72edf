use thiserror::Error;

/// Errors produced by the election cluster
#[derive(Debug, Error)]
pub enum BullyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid roster line {line}: {reason}")]
    InvalidRosterLine { line: usize, reason: String },

    #[error("Roster contains no participants")]
    EmptyRoster,

    #[error("Duplicate participant id in roster: {id}")]
    DuplicateNodeId { id: u64 },

    /// Deciding an election without any participant in the quorum
    #[error("Election quorum is empty, no coordinator can be decided")]
    EmptyQuorum,

    #[error("Participant not found: {id}")]
    NodeNotFound { id: u64 },

    #[error("Participant {id} is not coordinating")]
    NotCoordinator { id: u64 },

    #[error("Heartbeat to {address} timed out")]
    ProbeTimeout { address: String },

    #[error("Unexpected heartbeat reply: {reply}")]
    UnexpectedReply { reply: String },

    #[error("Connection to {address} closed before a reply was received")]
    ConnectionClosed { address: String },

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl BullyError {
    /// Returns true if the error means the probed coordinator is unreachable.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            BullyError::Io(_)
                | BullyError::ProbeTimeout { .. }
                | BullyError::ConnectionClosed { .. }
                | BullyError::UnexpectedReply { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BullyError>;
