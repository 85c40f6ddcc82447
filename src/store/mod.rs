//! The durable relational store (component C, §4.C) and its implementations.

pub mod memory;
pub mod model;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use model::{Advisory, Flag, NewFlag, RoundResult, Service, ServiceState, Team};

pub use postgres::PostgresStore;

/// Everything the round executor, receiver, scorer, and CLI need from
/// persistence. One production implementation (`PostgresStore`); a
/// `MemoryStore` test double implements the same contract so tests that
/// don't need a real database still exercise real `Store` call sites.
#[async_trait]
pub trait Store: Send + Sync {
    async fn add_team(&self, team: &Team) -> Result<(), StoreError>;
    async fn add_service(&self, service: &Service) -> Result<(), StoreError>;
    async fn get_teams(&self) -> Result<Vec<Team>, StoreError>;
    async fn get_services(&self) -> Result<Vec<Service>, StoreError>;

    /// Atomically allocates the next round id. Monotonic.
    async fn new_round(&self, length_secs: i64) -> Result<i64, StoreError>;
    async fn close_round(&self, round: i64) -> Result<(), StoreError>;

    async fn put_status(
        &self,
        round: i64,
        team_id: Uuid,
        service_id: Uuid,
        state: ServiceState,
    ) -> Result<(), StoreError>;

    /// Ordered (insertion order) state history for one (round, team, service).
    async fn get_states(
        &self,
        round: i64,
        team_id: Uuid,
        service_id: Uuid,
    ) -> Result<Vec<ServiceState>, StoreError>;

    async fn add_flag(&self, flag: NewFlag) -> Result<Flag, StoreError>;
    async fn get_flag_info(&self, token: &str) -> Result<Flag, StoreError>;

    /// The flag most recently minted for (round, team, service).
    async fn get_cred(
        &self,
        round: i64,
        team_id: Uuid,
        service_id: Uuid,
    ) -> Result<(String, Option<String>), StoreError>;

    async fn capture_flag(&self, flag_id: Uuid, attacker_team_id: Uuid) -> Result<(), StoreError>;
    async fn already_captured(&self, flag_id: Uuid) -> Result<bool, StoreError>;
    async fn get_captured_flags(
        &self,
        round: i64,
        attacker_team_id: Uuid,
    ) -> Result<Vec<Flag>, StoreError>;

    async fn put_round_result(&self, result: RoundResult) -> Result<(), StoreError>;
    async fn get_round_result(
        &self,
        team_id: Uuid,
        round: i64,
    ) -> Result<Option<RoundResult>, StoreError>;
    async fn get_all_round_results(&self) -> Result<Vec<RoundResult>, StoreError>;

    async fn add_advisory(&self, advisory: Advisory) -> Result<(), StoreError>;
    async fn list_advisories(&self, not_reviewed_only: bool) -> Result<Vec<Advisory>, StoreError>;
    async fn review_advisory(&self, id: Uuid, score: f64) -> Result<(), StoreError>;
    async fn set_advisory_hidden(&self, id: Uuid, hidden: bool) -> Result<(), StoreError>;

    /// The configured capture expiry window, in rounds, that
    /// `capture_flag` enforces (§9: made an explicit config field).
    fn capture_window_rounds(&self) -> u32;
}
