//! Roster file reader.
//!
//! Each non-empty line describes one participant as three whitespace-separated
//! tokens: `<id> <host> <port>`. Lines starting with `#` are ignored.

use crate::error::{BullyError, Result};
use crate::types::RosterEntry;
use std::collections::HashSet;
use std::path::Path;

/// Parse a roster from its text form, preserving line order
pub fn parse_roster(input: &str) -> Result<Vec<RosterEntry>> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for (index, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry = parse_line(index + 1, line)?;
        if !seen.insert(entry.id) {
            return Err(BullyError::DuplicateNodeId { id: entry.id.0 });
        }
        entries.push(entry);
    }

    if entries.is_empty() {
        return Err(BullyError::EmptyRoster);
    }

    tracing::debug!("Parsed roster with {} participants", entries.len());
    Ok(entries)
}

/// Read and parse a roster file
pub fn read_roster<P: AsRef<Path>>(path: P) -> Result<Vec<RosterEntry>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        BullyError::Config(format!("cannot read roster {}: {}", path.display(), e))
    })?;
    parse_roster(&contents)
}

fn parse_line(line_no: usize, line: &str) -> Result<RosterEntry> {
    let invalid = |reason: String| BullyError::InvalidRosterLine {
        line: line_no,
        reason,
    };

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(invalid(format!(
            "expected `<id> <host> <port>`, found {} token(s)",
            tokens.len()
        )));
    }

    let id = tokens[0]
        .parse::<u64>()
        .map_err(|_| invalid(format!("id `{}` is not an integer", tokens[0])))?;
    let port = tokens[2]
        .parse::<u16>()
        .map_err(|_| invalid(format!("port `{}` is not a valid port", tokens[2])))?;

    Ok(RosterEntry::new(id, tokens[1], port))
}
