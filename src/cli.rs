//! CLI for this application
//!
use std::time::Duration;

use crate::error::Result;
use crate::settings;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Debug, clap::Parser)]
#[clap(name = APP_NAME, version = APP_VERSION)]
pub struct Cli {
    // Number of processes to launch
    #[clap(
        long,
        default_value = "3",
        env("RINGCOM_PROCESSES"),
        help = "Number of processes to launch"
    )]
    pub processes: usize,

    // Total running time before every process is stopped
    #[clap(
        long,
        default_value = "5",
        env("RINGCOM_RUNNING_TIME_SECS"),
        help = "Seconds to let the processes run before stopping them"
    )]
    pub running_time_secs: u64,

    // Process name prefix
    #[clap(
        long,
        default_value = "P",
        env("RINGCOM_NAME_PREFIX"),
        help = "Process names are built as <prefix><index>"
    )]
    pub name_prefix: String,

    // Naming protocol settle delay
    #[clap(
        long,
        default_value = settings::DEFAULT_SETTLE_TIMEOUT_MS,
        env("RINGCOM_SETTLE_TIMEOUT_MS"),
        help = "Milliseconds between naming rounds and before seeding the token"
    )]
    pub settle_timeout_ms: u64,

    // Upper bound of the random identity candidate
    #[clap(
        long,
        default_value = settings::DEFAULT_MAX_CANDIDATE,
        env("RINGCOM_MAX_CANDIDATE"),
        help = "Identity candidates are drawn uniformly from 0..=max"
    )]
    pub max_candidate: u32,

    // Heartbeat emission period
    #[clap(
        long,
        default_value = settings::DEFAULT_HEARTBEAT_INTERVAL_MS,
        env("RINGCOM_HEARTBEAT_INTERVAL_MS"),
        help = "Milliseconds between heartbeats"
    )]
    pub heartbeat_interval_ms: u64,

    // Liveness check period
    #[clap(
        long,
        default_value = settings::DEFAULT_HEARTBEAT_CHECK_INTERVAL_MS,
        env("RINGCOM_HEARTBEAT_CHECK_INTERVAL_MS"),
        help = "Milliseconds between liveness checks; silent peers are reported"
    )]
    pub heartbeat_check_interval_ms: u64,

    // Idle token forwarding pause
    #[clap(
        long,
        default_value = settings::DEFAULT_TOKEN_HOP_DELAY_MS,
        env("RINGCOM_TOKEN_HOP_DELAY_MS"),
        help = "Milliseconds to hold an unwanted token before forwarding it"
    )]
    pub token_hop_delay_ms: u64,
}

impl Cli {
    pub fn into_settings(self) -> Result<settings::Settings> {
        let settings = settings::Settings {
            process_count: self.processes,
            running_time: Duration::from_secs(self.running_time_secs),
            name_prefix: self.name_prefix,
            com: settings::ComConfig {
                settle_timeout: Duration::from_millis(self.settle_timeout_ms),
                max_candidate: self.max_candidate,
                heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
                heartbeat_check_interval: Duration::from_millis(self.heartbeat_check_interval_ms),
                token_hop_delay: Duration::from_millis(self.token_hop_delay_ms),
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_command_identity() {
        use clap::CommandFactory;
        let command = Cli::command();
        assert_eq!(command.get_name(), APP_NAME);
        assert_eq!(command.get_version(), Some(APP_VERSION));
    }

    #[test]
    fn test_defaults() {
        let settings = Cli::parse_from(["ringcom"]).into_settings().unwrap();
        assert_eq!(settings.process_count, 3);
        assert_eq!(settings.running_time, Duration::from_secs(5));
        assert_eq!(settings.com, settings::ComConfig::default());
    }

    #[test]
    fn test_overrides() {
        let settings = Cli::parse_from([
            "ringcom",
            "--processes",
            "5",
            "--settle-timeout-ms",
            "200",
            "--name-prefix",
            "node-",
        ])
        .into_settings()
        .unwrap();
        assert_eq!(settings.process_count, 5);
        assert_eq!(settings.com.settle_timeout, Duration::from_millis(200));
        assert_eq!(settings.process_names()[4], "node-4");
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = Cli::parse_from(["ringcom", "--processes", "0"]).into_settings();
        assert!(result.is_err());
    }
}
