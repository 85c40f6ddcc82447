//! Plain data types shared by the `Store` trait and its implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum ServiceState {
    Up,
    Down,
    Mumble,
    Corrupt,
    Error,
    Unknown,
}

impl ServiceState {
    /// Maps a checker exit code to a service state (§4.B, byte-for-byte).
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => ServiceState::Up,
            1 => ServiceState::Error,
            2 => ServiceState::Mumble,
            3 => ServiceState::Corrupt,
            4 => ServiceState::Down,
            124 => ServiceState::Down,
            _ => ServiceState::Unknown,
        }
    }

    pub fn is_up(self) -> bool {
        matches!(self, ServiceState::Up)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Up => "UP",
            ServiceState::Down => "DOWN",
            ServiceState::Mumble => "MUMBLE",
            ServiceState::Corrupt => "CORRUPT",
            ServiceState::Error => "ERROR",
            ServiceState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub subnet: ipnetwork::IpNetwork,
    pub vulnbox: String,
    pub netbox: Option<String>,
    pub use_netbox: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub port: i32,
    pub checker_path: String,
    pub udp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Round {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub length_secs: i64,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Status {
    pub id: i64,
    pub round: i64,
    pub team_id: Uuid,
    pub service_id: Uuid,
    pub state: ServiceState,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Flag {
    pub id: Uuid,
    pub token: String,
    pub round: i64,
    pub team_id: Uuid,
    pub service_id: Uuid,
    pub cred: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Capture {
    pub flag_id: Uuid,
    pub attacker_team_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, FromRow)]
pub struct RoundResult {
    pub team_id: Uuid,
    pub round: i64,
    pub attack_score: f64,
    pub defence_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Advisory {
    pub id: Uuid,
    pub team_id: Uuid,
    pub text: String,
    pub score: f64,
    pub reviewed: bool,
    pub hidden: bool,
    pub timestamp: DateTime<Utc>,
}

/// A freshly-minted flag ready to persist, before the store assigns it an id.
#[derive(Debug, Clone)]
pub struct NewFlag {
    pub token: String,
    pub round: i64,
    pub team_id: Uuid,
    pub service_id: Uuid,
    pub cred: Option<String>,
}
