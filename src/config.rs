//! Loads and validates the TOML contest configuration (§6).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::score::ScoringPolicy;

/// Top-level contest configuration, loaded once at daemon startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestConfig {
    pub database: DatabaseConfig,
    pub pulse: PulseConfig,
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    pub teams: Vec<TeamConfig>,
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub connection: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    /// RFC 3339 timestamp the contest starts at.
    pub start: chrono::DateTime<chrono::Utc>,
    pub half_secs: u64,
    pub lunch_secs: u64,
    pub round_len_secs: u64,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
    #[serde(default = "default_port_check_timeout")]
    pub port_check_timeout_secs: u64,

    /// How many rounds back a flag may still be captured in. §9: "the
    /// capture expiry window is implicit in the source" — made explicit.
    #[serde(default = "default_capture_window")]
    pub capture_window_rounds: u32,
}

fn default_check_timeout() -> u64 {
    10
}

fn default_port_check_timeout() -> u64 {
    2
}

fn default_capture_window() -> u32 {
    1
}

impl PulseConfig {
    pub fn half(&self) -> Duration {
        Duration::from_secs(self.half_secs)
    }

    pub fn lunch(&self) -> Duration {
        Duration::from_secs(self.lunch_secs)
    }

    pub fn round_len(&self) -> Duration {
        Duration::from_secs(self.round_len_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn port_check_timeout(&self) -> Duration {
        Duration::from_secs(self.port_check_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub addr: String,
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: u64,
}

fn default_receive_timeout() -> u64 {
    30
}

impl ReceiverConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub name: String,
    pub subnet: IpNetwork,
    pub vulnbox: String,
    #[serde(default)]
    pub netbox: Option<String>,
    #[serde(default)]
    pub use_netbox: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub port: u16,
    pub checker_path: String,
    #[serde(default)]
    pub udp: bool,
}

/// Reads and validates the contest configuration at `path`.
pub fn load(path: &Path) -> Result<ContestConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: ContestConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source: Box::new(source),
    })?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ContestConfig) -> Result<(), ConfigError> {
    if config.teams.is_empty() {
        return Err(ConfigError::Invalid("no teams configured".into()));
    }
    if config.services.is_empty() {
        return Err(ConfigError::Invalid("no services configured".into()));
    }

    let mut names = HashSet::new();
    let mut subnets = HashSet::new();
    for team in &config.teams {
        if !names.insert(team.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate team name: {}",
                team.name
            )));
        }
        if !subnets.insert(team.subnet) {
            return Err(ConfigError::Invalid(format!(
                "duplicate team subnet: {}",
                team.subnet
            )));
        }
        if team.use_netbox && team.netbox.is_none() {
            return Err(ConfigError::Invalid(format!(
                "team {} sets use_netbox but has no netbox configured",
                team.name
            )));
        }
    }

    let mut service_names = HashSet::new();
    for service in &config.services {
        if !service_names.insert(service.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate service name: {}",
                service.name
            )));
        }
        if service.port == 0 {
            return Err(ConfigError::Invalid(format!(
                "service {} has an invalid port 0",
                service.name
            )));
        }
    }

    if config.pulse.half_secs == 0 {
        return Err(ConfigError::Invalid("pulse.half_secs must be > 0".into()));
    }
    if config.pulse.round_len_secs == 0 {
        return Err(ConfigError::Invalid(
            "pulse.round_len_secs must be > 0".into(),
        ));
    }
    if config.pulse.round_len_secs > config.pulse.half_secs {
        return Err(ConfigError::Invalid(
            "pulse.round_len_secs cannot exceed pulse.half_secs".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
        [database]
        connection = "postgres://localhost/tinfoilhat"

        [pulse]
        start = "2026-01-01T09:00:00Z"
        half_secs = 7200
        lunch_secs = 1800
        round_len_secs = 120

        [receiver]
        addr = "0.0.0.0:31337"

        [[teams]]
        name = "team-a"
        subnet = "10.0.1.0/24"
        vulnbox = "10.0.1.2"

        [[services]]
        name = "notes"
        port = 8080
        checker_path = "/opt/checkers/notes"
        "#
        .to_string()
    }

    #[test]
    fn parses_minimal_config() {
        let config: ContestConfig = toml::from_str(&minimal_toml()).unwrap();
        assert!(validate(&config).is_ok());
        assert_eq!(config.pulse.capture_window_rounds, 1);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn rejects_duplicate_team_subnet() {
        let mut doc = minimal_toml();
        doc.push_str(
            r#"
            [[teams]]
            name = "team-b"
            subnet = "10.0.1.0/24"
            vulnbox = "10.0.1.3"
            "#,
        );
        let config: ContestConfig = toml::from_str(&doc).unwrap();
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_use_netbox_without_netbox() {
        let mut doc = minimal_toml();
        doc.push_str(
            r#"
            [[teams]]
            name = "team-b"
            subnet = "10.0.2.0/24"
            vulnbox = "10.0.2.2"
            use_netbox = true
            "#,
        );
        let config: ContestConfig = toml::from_str(&doc).unwrap();
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_round_len_exceeding_half() {
        let mut config: ContestConfig = toml::from_str(&minimal_toml()).unwrap();
        config.pulse.round_len_secs = config.pulse.half_secs + 1;
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }
}
