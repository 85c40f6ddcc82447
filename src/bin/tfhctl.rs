//! `tfhctl` — operator CLI: view the scoreboard and manage advisories
//! (§6).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tinfoilhat::config;
use tinfoilhat::score::{self, TeamTotals};
use tinfoilhat::scoreboard::{self, TeamRow};
use tinfoilhat::store::model::ServiceState;
use tinfoilhat::store::{PostgresStore, Store};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tfhctl", about = "tinfoilhat operator CLI")]
struct Cli {
    #[arg(long, default_value = "/etc/tinfoilhat/tinfoilhat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the current scoreboard.
    Scoreboard {
        #[arg(long)]
        hide_score: bool,
    },
    /// Manage operator-reviewed advisories.
    Advisory {
        #[command(subcommand)]
        action: AdvisoryAction,
    },
}

#[derive(Subcommand)]
enum AdvisoryAction {
    List {
        #[arg(long)]
        not_reviewed: bool,
    },
    Review {
        id: Uuid,
        score: f64,
    },
    Hide {
        id: Uuid,
    },
    Unhide {
        id: Uuid,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("tfhctl: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = config::load(&cli.config)?;
    let store = PostgresStore::open(
        &config.database.connection,
        config.database.max_connections,
        config.pulse.capture_window_rounds,
    )
    .await?;

    match cli.command {
        Command::Scoreboard { hide_score } => print_scoreboard(&store, hide_score).await?,
        Command::Advisory { action } => run_advisory(&store, action).await?,
    }
    Ok(())
}

async fn print_scoreboard(store: &PostgresStore, hide_score: bool) -> anyhow::Result<()> {
    let teams = store.get_teams().await?;
    let services = store.get_services().await?;
    let round_results = store.get_all_round_results().await?;
    let advisories = store.list_advisories(false).await?;

    let mut advisory_totals = std::collections::HashMap::new();
    for advisory in advisories.iter().filter(|a| a.reviewed) {
        *advisory_totals.entry(advisory.team_id).or_insert(0.0) += advisory.score;
    }

    let team_order: Vec<(Uuid, String)> = teams.iter().map(|t| (t.id, t.name.clone())).collect();
    let totals: Vec<TeamTotals> = score::aggregate(&team_order, &round_results, &advisory_totals);

    let current_round = round_results.iter().map(|r| r.round).max().unwrap_or(0);
    let mut rows = Vec::with_capacity(totals.len());
    for (team, total) in teams.iter().zip(totals.into_iter()) {
        let mut states = Vec::with_capacity(services.len());
        for service in &services {
            let history = store.get_states(current_round, team.id, service.id).await?;
            states.push(history.last().copied().unwrap_or(ServiceState::Unknown));
        }
        rows.push(TeamRow { totals: total, service_states: states });
    }

    let service_names: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
    println!("{}", scoreboard::render(&rows, &service_names, hide_score));
    Ok(())
}

async fn run_advisory(store: &PostgresStore, action: AdvisoryAction) -> anyhow::Result<()> {
    match action {
        AdvisoryAction::List { not_reviewed } => {
            let advisories = store.list_advisories(not_reviewed).await?;
            for a in advisories {
                println!(
                    "{}  team={}  score={:.2}  reviewed={}  hidden={}  {}",
                    a.id, a.team_id, a.score, a.reviewed, a.hidden, a.text
                );
            }
        }
        AdvisoryAction::Review { id, score } => {
            store.review_advisory(id, score).await?;
            println!("reviewed {id} with score {score}");
        }
        AdvisoryAction::Hide { id } => {
            store.set_advisory_hidden(id, true).await?;
            println!("hid advisory {id}");
        }
        AdvisoryAction::Unhide { id } => {
            store.set_advisory_hidden(id, false).await?;
            println!("unhid advisory {id}");
        }
    }
    Ok(())
}
