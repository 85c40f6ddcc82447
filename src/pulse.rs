//! Game clock / pulse (component G, §4.G): drives rounds on wall-clock
//! boundaries across two halves separated by a lunch break.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::PulseConfig;
use crate::context::AppContext;
use crate::round::run_round;
use crate::score::{self, ScoringPolicy};
use crate::store::model::{RoundResult, Service, Team};

/// Abstracts wall-clock time so tests can inject a fake clock instead
/// of sleeping in real time (grounded in the teacher's habit of taking
/// collaborators as trait objects rather than concrete types, here
/// generalized to time).
#[async_trait]
pub trait PulseClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep_until(&self, when: DateTime<Utc>);
}

pub struct WallClock;

#[async_trait]
impl PulseClock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, when: DateTime<Utc>) {
        // Polling sleep is acceptable per §4.G step 2.
        loop {
            let remaining = when - Utc::now();
            let Ok(remaining_std) = remaining.to_std() else {
                return;
            };
            tokio::time::sleep(remaining_std.min(Duration::from_millis(100))).await;
            if Utc::now() >= when {
                return;
            }
        }
    }
}

pub struct Pulse<'a> {
    pub config: &'a PulseConfig,
    pub scoring: ScoringPolicy,
    pub concurrency: usize,
}

impl<'a> Pulse<'a> {
    pub fn new(config: &'a PulseConfig, scoring: ScoringPolicy, concurrency: usize) -> Self {
        Self { config, scoring, concurrency }
    }

    /// Runs the full contest: blocks until `start`, runs both halves
    /// back-to-back across the lunch break, then returns (§4.G).
    pub async fn run(
        &self,
        ctx: &AppContext,
        clock: &dyn PulseClock,
        teams: &[Team],
        services: &[Service],
    ) {
        let half = chrono::Duration::from_std(self.config.half()).expect("half fits in range");
        let lunch = chrono::Duration::from_std(self.config.lunch()).expect("lunch fits in range");
        let start = self.config.start;
        let first_half_end = start + half;
        let lunch_end = first_half_end + lunch;
        let end_time = lunch_end + half;

        if clock.now() >= end_time {
            info!("pulse started after end_time; returning without running any rounds");
            return;
        }

        if clock.now() < start {
            clock.sleep_until(start).await;
        }

        if clock.now() < first_half_end {
            self.run_half(ctx, clock, teams, services, first_half_end).await;
        }

        if clock.now() < lunch_end {
            clock.sleep_until(lunch_end).await;
        }

        if clock.now() < end_time {
            self.run_half(ctx, clock, teams, services, end_time).await;
        }
    }

    /// Runs rounds back to back until `half_end` (§4.G step 3/5).
    async fn run_half(
        &self,
        ctx: &AppContext,
        clock: &dyn PulseClock,
        teams: &[Team],
        services: &[Service],
        half_end: DateTime<Utc>,
    ) {
        let round_len =
            chrono::Duration::from_std(self.config.round_len()).expect("round_len fits in range");

        while clock.now() < half_end {
            let round_start = clock.now();
            let round = match ctx.store.new_round(self.config.round_len_secs as i64).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(error = %e, "failed to open round; skipping to next boundary");
                    clock.sleep_until(round_start + round_len).await;
                    continue;
                }
            };

            info!(round, "round opened");
            run_round(ctx, round, teams, services, self.concurrency).await;
            if let Err(e) = ctx.store.close_round(round).await {
                tracing::warn!(round, error = %e, "failed to close round");
            }

            let boundary = round_start + round_len;
            if clock.now() < boundary {
                clock.sleep_until(boundary).await;
            }

            if let Err(e) = score_round(ctx, round, teams, services, &self.scoring).await {
                tracing::error!(round, error = %e, "scoring failed for round; skipping");
            }
        }
    }
}

/// Computes and persists `RoundResult`s for every team for one round
/// (§4.F). Errors for a single team are skipped rather than aborting
/// the rest of the round (§7).
async fn score_round(
    ctx: &AppContext,
    round: i64,
    teams: &[Team],
    services: &[Service],
    policy: &ScoringPolicy,
) -> Result<(), crate::error::StoreError> {
    for team in teams {
        let mut histories = Vec::with_capacity(services.len());
        let mut owned = Vec::with_capacity(services.len());
        for service in services {
            let states = ctx.store.get_states(round, team.id, service.id).await?;
            owned.push(states);
        }
        for states in &owned {
            histories.push(score::ServiceHistory { history: states });
        }

        let captured = ctx.store.get_captured_flags(round, team.id).await?;
        let defence = score::defence_score(&histories, captured.len(), policy);
        let attack = score::attack_score(captured.len(), policy);

        ctx.store
            .put_round_result(RoundResult {
                team_id: team.id,
                round,
                attack_score: attack,
                defence_score: defence,
            })
            .await?;
    }
    Ok(())
}
