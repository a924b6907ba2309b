//! ringcom application settings
use std::time::Duration;

use crate::config_error;
use crate::error::Result;

pub const DEFAULT_SETTLE_TIMEOUT_MS: &str = "1000";
pub const DEFAULT_MAX_CANDIDATE: &str = "100";
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: &str = "1000";
pub const DEFAULT_HEARTBEAT_CHECK_INTERVAL_MS: &str = "5000";
pub const DEFAULT_TOKEN_HOP_DELAY_MS: &str = "1";

/// Protocol timings of one coordinator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComConfig {
    // Delay between naming rounds, and before the token is seeded
    pub settle_timeout: Duration,
    // Identity candidates are drawn from 0..=max_candidate
    pub max_candidate: u32,
    // Heartbeat emission period
    pub heartbeat_interval: Duration,
    // Liveness check period; a peer silent for longer is reported stale
    pub heartbeat_check_interval: Duration,
    // Pause before forwarding a token nobody here wants
    pub token_hop_delay: Duration,
}

impl Default for ComConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(1),
            max_candidate: 100,
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_check_interval: Duration::from_secs(5),
            token_hop_delay: Duration::from_millis(1),
        }
    }
}

impl ComConfig {
    /// Short timings for tests and local demos
    pub fn fast() -> Self {
        Self {
            settle_timeout: Duration::from_millis(100),
            max_candidate: 1_000_000,
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_check_interval: Duration::from_millis(400),
            token_hop_delay: Duration::from_millis(1),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.settle_timeout.is_zero() {
            return Err(config_error!("settle timeout must be positive"));
        }
        if self.max_candidate == 0 {
            return Err(config_error!("max candidate must be positive"));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_check_interval.is_zero() {
            return Err(config_error!("heartbeat intervals must be positive"));
        }
        if self.heartbeat_check_interval <= self.heartbeat_interval {
            return Err(config_error!(
                "heartbeat check interval ({}ms) must exceed the heartbeat interval ({}ms)",
                self.heartbeat_check_interval.as_millis(),
                self.heartbeat_interval.as_millis()
            ));
        }
        Ok(())
    }
}

/// Launcher settings
#[derive(Clone, Debug)]
pub struct Settings {
    // Number of processes started by the launcher
    pub process_count: usize,

    // How long the launcher lets processes run before stopping them
    pub running_time: Duration,

    // Process names are `{name_prefix}{i}`
    pub name_prefix: String,

    pub com: ComConfig,
}

impl Settings {
    pub fn process_names(&self) -> Vec<String> {
        (0..self.process_count)
            .map(|i| format!("{}{}", self.name_prefix, i))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.process_count == 0 {
            return Err(config_error!("process count must be at least 1"));
        }
        if self.name_prefix.is_empty() {
            return Err(config_error!("name prefix must not be empty"));
        }
        self.com.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ComConfig::default().validate().is_ok());
        assert!(ComConfig::fast().validate().is_ok());
    }

    #[test]
    fn test_check_interval_must_exceed_heartbeat() {
        let config = ComConfig {
            heartbeat_check_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(500),
            ..ComConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must exceed"));
    }

    #[test]
    fn test_process_names() {
        let settings = Settings {
            process_count: 3,
            running_time: Duration::from_secs(5),
            name_prefix: "P".to_string(),
            com: ComConfig::default(),
        };
        assert_eq!(settings.process_names(), vec!["P0", "P1", "P2"]);
        assert!(settings.validate().is_ok());

        let empty = Settings {
            process_count: 0,
            ..settings
        };
        assert!(empty.validate().is_err());
    }
}
