//! Scorer (component F, §4.F): converts per-round status histories and
//! captured-flag counts into attack/defence scores and a ranked
//! scoreboard.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::model::{RoundResult, ServiceState};

/// Contest-wide scoring constants. Exposed as configuration rather than
/// hardcoded (§9: "do not guess, expose as configurable policy").
///
/// The `+1` "everything up" bonus documented only as a fixed-point
/// result in `spec.md` §4.F/§8 does not reproduce the S3 scenario's two
/// distinct defence values (1.75 and 2.00) as a flat constant — all
/// four teams there share an identical per-service status history, so a
/// flat bonus would score every team identically. Cross-referencing the
/// source's `TestCountRound` shows the differentiator is exactly
/// "captured at least one flag this round", and that the captured
/// amount itself (not a fixed increment) is what gets folded into
/// defence: a fully-up team's bonus is `full_uptime_bonus` plus its own
/// attack score for the round, so multi-capture rounds scale correctly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Value of a single flag capture (`k` in `spec.md` §4.F).
    pub capture_value: f64,
    /// Awarded once per team per round when every service had at least
    /// one UP status that round.
    pub full_uptime_bonus: f64,
    /// Whether a service with only UNKNOWN statuses (never DOWN, never
    /// UP) still counts as "up" for the full-uptime bonus. §9 leaves
    /// this ambiguous; default preserves the literal "at least one UP"
    /// reading.
    pub unknown_counts_as_up: bool,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            capture_value: 0.25,
            full_uptime_bonus: 0.75,
            unknown_counts_as_up: false,
        }
    }
}

/// s(t, svc, r) = |{i : hᵢ = UP}| / n, or 0 if the history is empty.
pub fn state_score(history: &[ServiceState]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let up = history.iter().filter(|s| s.is_up()).count();
    up as f64 / history.len() as f64
}

/// Per-service history plus whether the service ever reported UP, used
/// to decide the full-uptime bonus independent of `unknown_counts_as_up`.
pub struct ServiceHistory<'a> {
    pub history: &'a [ServiceState],
}

impl ServiceHistory<'_> {
    fn ever_up(&self, policy: &ScoringPolicy) -> bool {
        self.history.iter().any(|s| {
            s.is_up() || (policy.unknown_counts_as_up && matches!(s, ServiceState::Unknown))
        })
    }
}

/// D(t, r) = Σ_svc s(t, svc, r) · w(svc), equal weighting, plus the
/// uptime/attack bonuses (§4.F).
pub fn defence_score(
    histories: &[ServiceHistory<'_>],
    captured_count: usize,
    policy: &ScoringPolicy,
) -> f64 {
    if histories.is_empty() {
        return 0.0;
    }
    let weight = 1.0 / histories.len() as f64;
    let mut d: f64 = histories.iter().map(|h| state_score(h.history) * weight).sum();

    if histories.iter().all(|h| h.ever_up(policy)) {
        d += policy.full_uptime_bonus;
        d += attack_score(captured_count, policy);
    }
    d
}

/// A(t, r) = |captured_flags(t, r)| · k (§4.F).
pub fn attack_score(captured_count: usize, policy: &ScoringPolicy) -> f64 {
    captured_count as f64 * policy.capture_value
}

/// Aggregated per-team totals, derived from all persisted `RoundResult`s
/// plus reviewed advisory scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamTotals {
    pub team_id: Uuid,
    pub team_name: String,
    pub attack: f64,
    pub defence: f64,
    pub advisory: f64,
}

impl TeamTotals {
    pub fn score(&self) -> f64 {
        self.attack + self.defence + self.advisory
    }
}

/// Aggregates per-round results into per-team totals (one entry per
/// team, in the order `team_order` lists them — insertion order, used
/// as the stable tiebreak per invariant 5).
pub fn aggregate(
    team_order: &[(Uuid, String)],
    round_results: &[RoundResult],
    advisory_totals: &std::collections::HashMap<Uuid, f64>,
) -> Vec<TeamTotals> {
    team_order
        .iter()
        .map(|(id, name)| {
            let (attack, defence) = round_results
                .iter()
                .filter(|r| r.team_id == *id)
                .fold((0.0, 0.0), |(a, d), r| (a + r.attack_score, d + r.defence_score));
            TeamTotals {
                team_id: *id,
                team_name: name.clone(),
                attack,
                defence,
                advisory: advisory_totals.get(id).copied().unwrap_or(0.0),
            }
        })
        .collect()
}

/// score_percent(T) = 100 · score(T) / max_T score(T) (§4.F).
pub fn score_percent(totals: &[TeamTotals]) -> Vec<f64> {
    let max = totals
        .iter()
        .map(|t| t.score())
        .fold(0.0_f64, |a, b| a.max(b));
    totals
        .iter()
        .map(|t| {
            if max == 0.0 {
                0.0
            } else {
                100.0 * t.score() / max
            }
        })
        .collect()
}

/// Ranking: sort by `score` descending, stable on ties (invariant 5).
pub fn rank(totals: &[TeamTotals]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..totals.len()).collect();
    indices.sort_by(|&a, &b| {
        totals[b]
            .score()
            .partial_cmp(&totals[a].score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use ServiceState::{Down, Mumble, Up};

    #[test]
    fn s1_state_score() {
        let history = [Up, Up, Up, Mumble];
        assert_eq!(state_score(&history), 0.75);
    }

    #[test]
    fn s2_defence_aggregate() {
        let h1 = [Up, Up, Up, Down];
        let h2 = [Down, Down, Down, Down];
        let h3 = [Up, Up, Up];
        let h4 = [Up, Down, Down, Down];
        let histories = [
            ServiceHistory { history: &h1 },
            ServiceHistory { history: &h2 },
            ServiceHistory { history: &h3 },
            ServiceHistory { history: &h4 },
        ];
        let policy = ScoringPolicy::default();
        // No bonus: h2 is never up, so the "every service up" condition fails.
        let d = defence_score(&histories, 0, &policy);
        assert!((d - 0.3125).abs() < 1e-9);
    }

    #[test]
    fn s3_full_round_scoring() {
        // All four services UP all round for every team; team 2 and 3
        // each made exactly one successful capture.
        let history = [Up, Up, Up, Up];
        let histories: Vec<ServiceHistory> = (0..4).map(|_| ServiceHistory { history: &history }).collect();
        // §4.F/§8's S3 worked example (attack = 0.25 for one capture)
        // is exactly the shipped default: k = 0.25 per capture, folded
        // straight into the full-uptime defence bonus.
        let policy = ScoringPolicy::default();

        let defence_no_capture = defence_score(&histories, 0, &policy);
        let defence_with_capture = defence_score(&histories, 1, &policy);
        let defence_two_captures = defence_score(&histories, 2, &policy);
        assert!((defence_no_capture - 1.75).abs() < 1e-9);
        assert!((defence_with_capture - 2.00).abs() < 1e-9);
        // A second capture folds in another full attack_score unit
        // rather than a flat bonus, so it scales past 2.00.
        assert!((defence_two_captures - 2.25).abs() < 1e-9);

        assert_eq!(attack_score(0, &policy), 0.0);
        assert!((attack_score(1, &policy) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn ranking_is_stable_on_ties() {
        let totals = vec![
            TeamTotals { team_id: Uuid::nil(), team_name: "a".into(), attack: 1.0, defence: 0.0, advisory: 0.0 },
            TeamTotals { team_id: Uuid::nil(), team_name: "b".into(), attack: 1.0, defence: 0.0, advisory: 0.0 },
            TeamTotals { team_id: Uuid::nil(), team_name: "c".into(), attack: 2.0, defence: 0.0, advisory: 0.0 },
        ];
        assert_eq!(rank(&totals), vec![2, 0, 1]);
    }

    #[test]
    fn score_percent_handles_all_zero() {
        let totals = vec![
            TeamTotals { team_id: Uuid::nil(), team_name: "a".into(), attack: 0.0, defence: 0.0, advisory: 0.0 },
        ];
        assert_eq!(score_percent(&totals), vec![0.0]);
    }
}
