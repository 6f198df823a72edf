use bully_common::{BullyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Cluster timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Period between a subordinate's heartbeats (milliseconds)
    pub heartbeat_interval_ms: u64,

    /// How long a coordinator serves before it stops itself (milliseconds)
    pub coordinator_lifetime_ms: u64,

    /// Upper bound on one heartbeat exchange (milliseconds)
    pub probe_timeout_ms: u64,

    /// How long a participant waits for others to join a round before
    /// attempting to decide it (milliseconds)
    pub election_window_ms: u64,

    /// Listen backlog of the coordinator's socket
    pub listen_backlog: u32,

    /// Buffered protocol traces per subscriber
    pub trace_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5000,
            coordinator_lifetime_ms: 10000,
            probe_timeout_ms: 2000,
            election_window_ms: 7500,
            listen_backlog: 10,
            trace_capacity: 256,
        }
    }
}

impl ClusterConfig {
    /// Load configuration: defaults, then an optional file, then `BULLY_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(config::Environment::with_prefix("BULLY").try_parsing(true));

        let config: ClusterConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BullyError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("coordinator_lifetime_ms", self.coordinator_lifetime_ms),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("election_window_ms", self.election_window_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(BullyError::Config(format!("{} must be greater than 0", name)));
            }
        }

        // Every live subordinate must get one heartbeat period to join a round
        if self.election_window_ms <= self.heartbeat_interval_ms + self.probe_timeout_ms {
            return Err(BullyError::Config(format!(
                "election_window_ms ({}) must exceed heartbeat_interval_ms + probe_timeout_ms ({})",
                self.election_window_ms,
                self.heartbeat_interval_ms + self.probe_timeout_ms
            )));
        }

        if self.listen_backlog == 0 {
            return Err(BullyError::Config("listen_backlog must be greater than 0".into()));
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn coordinator_lifetime(&self) -> Duration {
        Duration::from_millis(self.coordinator_lifetime_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn election_window(&self) -> Duration {
        Duration::from_millis(self.election_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClusterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.coordinator_lifetime(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_short_election_window() {
        let config = ClusterConfig {
            heartbeat_interval_ms: 100,
            probe_timeout_ms: 50,
            election_window_ms: 150,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BullyError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = ClusterConfig {
            coordinator_lifetime_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BullyError::Config(_))));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "heartbeat_interval_ms = 200").unwrap();
        writeln!(file, "probe_timeout_ms = 100").unwrap();
        writeln!(file, "election_window_ms = 500").unwrap();
        file.flush().unwrap();

        let config = ClusterConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.heartbeat_interval_ms, 200);
        assert_eq!(config.election_window_ms, 500);
        assert_eq!(config.coordinator_lifetime_ms, 10000);
        assert_eq!(config.listen_backlog, 10);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "election_window_ms = 10").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            ClusterConfig::load(Some(file.path())),
            Err(BullyError::Config(_))
        ));
    }
}
