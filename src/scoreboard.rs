//! Scoreboard view (component H, §4.H): a pure projection of aggregated
//! results into a ranked, human-readable table.

use comfy_table::{ContentArrangement, Table};

use crate::score::{rank, score_percent, TeamTotals};
use crate::store::model::ServiceState;

/// One row of per-service state, alongside the aggregated totals, for
/// the current snapshot of one team.
pub struct TeamRow {
    pub totals: TeamTotals,
    /// Most recent known state per service, in the configured service
    /// order.
    pub service_states: Vec<ServiceState>,
}

/// Renders the current scoreboard as an ASCII table (§4.H). When
/// `hide_score` is set, score/attack/defence/advisory cells render as a
/// placeholder instead of their value — used in the closing minutes of
/// a contest to keep the final ranking a surprise.
pub fn render(rows: &[TeamRow], service_names: &[String], hide_score: bool) -> String {
    let totals: Vec<TeamTotals> = rows.iter().map(|r| r.totals.clone()).collect();
    let percents = score_percent(&totals);
    let order = rank(&totals);

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let mut header = vec![
        "rank".to_string(),
        "team".to_string(),
        "score%".to_string(),
        "attack".to_string(),
        "defence".to_string(),
        "advisory".to_string(),
    ];
    header.extend(service_names.iter().cloned());
    table.set_header(header);

    let best_attack = max_or(&totals, |t| t.attack);
    let best_defence = max_or(&totals, |t| t.defence);
    let best_advisory = max_or(&totals, |t| t.advisory);

    for (position, &idx) in order.iter().enumerate() {
        let row = &rows[idx];
        let t = &row.totals;

        let mut cells = if hide_score {
            vec![
                (position + 1).to_string(),
                t.team_name.clone(),
                "***".to_string(),
                "***".to_string(),
                "***".to_string(),
                "***".to_string(),
            ]
        } else {
            vec![
                (position + 1).to_string(),
                t.team_name.clone(),
                format!("{:.1}", percents[idx]),
                mark_best(t.attack, best_attack),
                mark_best(t.defence, best_defence),
                mark_best(t.advisory, best_advisory),
            ]
        };

        cells.extend(row.service_states.iter().map(|s| s.to_string()));
        table.add_row(cells);
    }

    table.to_string()
}

fn max_or(totals: &[TeamTotals], f: impl Fn(&TeamTotals) -> f64) -> f64 {
    totals.iter().map(f).fold(f64::MIN, f64::max)
}

fn mark_best(value: f64, best: f64) -> String {
    if (value - best).abs() < 1e-9 && best > 0.0 {
        format!("{value:.3}*")
    } else {
        format!("{value:.3}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn totals(name: &str, attack: f64, defence: f64) -> TeamTotals {
        TeamTotals {
            team_id: Uuid::new_v4(),
            team_name: name.to_string(),
            attack,
            defence,
            advisory: 0.0,
        }
    }

    #[test]
    fn renders_in_rank_order() {
        let rows = vec![
            TeamRow { totals: totals("low", 0.0, 1.0), service_states: vec![ServiceState::Up] },
            TeamRow { totals: totals("high", 1.0, 1.0), service_states: vec![ServiceState::Down] },
        ];
        let table = render(&rows, &[ "notes".to_string() ], false);
        let high_pos = table.find("high").unwrap();
        let low_pos = table.find("low").unwrap();
        assert!(high_pos < low_pos);
    }

    #[test]
    fn hides_scores_when_requested() {
        let rows = vec![TeamRow { totals: totals("a", 1.0, 1.0), service_states: vec![] }];
        let table = render(&rows, &[], true);
        assert!(table.contains("***"));
        assert!(!table.contains("1.000"));
    }
}
