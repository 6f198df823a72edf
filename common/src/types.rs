use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique, totally ordered identifier of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Network address of a participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One participant as described by the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: NodeId,
    pub address: Address,
}

impl RosterEntry {
    pub fn new(id: u64, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: NodeId(id),
            address: Address::new(host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_ordering() {
        let mut ids = vec![NodeId(2), NodeId(7), NodeId(1)];
        ids.sort();
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(7)]);
        assert_eq!(NodeId(7).to_string(), "7");
    }

    #[test]
    fn test_address_display() {
        let addr = Address::new("127.0.0.1", 9001);
        assert_eq!(addr.to_string(), "127.0.0.1:9001");
    }

    #[test]
    fn test_roster_entry_serialization() {
        let entry = RosterEntry::new(3, "10.0.0.3", 9003);
        let json = serde_json::to_string(&entry).unwrap();
        let back: RosterEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
