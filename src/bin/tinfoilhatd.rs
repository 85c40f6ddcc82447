//! `tinfoilhatd` — the referee daemon. Loads configuration, opens the
//! store, optionally reinitializes it, generates the flag-signing key,
//! spawns the submission receiver, and runs the pulse to completion
//! (§6).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tinfoilhat::config::{self, ContestConfig};
use tinfoilhat::context::AppContext;
use tinfoilhat::flag::FlagCodec;
use tinfoilhat::probe::ProbeContext;
use tinfoilhat::pulse::{Pulse, WallClock};
use tinfoilhat::receiver;
use tinfoilhat::store::model::{Service, Team};
use tinfoilhat::store::{PostgresStore, Store};
use tinfoilhat::telemetry::{self, LogFormat};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tinfoilhatd", about = "attack/defence CTF referee daemon")]
struct Cli {
    #[arg(long, default_value = "/etc/tinfoilhat/tinfoilhat.toml")]
    config: PathBuf,

    /// Wipe and re-seed teams/services from the config before starting.
    #[arg(long)]
    reinit: bool,

    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    if let Err(e) = run(cli).await {
        error!(error = %e, "tinfoilhatd exiting on a fatal error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = config::load(&cli.config)?;
    info!(teams = config.teams.len(), services = config.services.len(), "configuration loaded");

    let store = PostgresStore::open(
        &config.database.connection,
        config.database.max_connections,
        config.pulse.capture_window_rounds,
    )
    .await?;
    store.migrate().await?;

    if cli.reinit {
        seed(&store, &config).await?;
        info!("store reinitialized from configuration");
    }

    let teams = store.get_teams().await?;
    let services = store.get_services().await?;

    let flags = FlagCodec::generate();
    let probe = ProbeContext {
        checker_timeout: config.pulse.check_timeout(),
        port_check_timeout: config.pulse.port_check_timeout(),
    };
    let store: Arc<dyn Store> = Arc::new(store);
    let ctx = AppContext::new(flags, probe, store);

    let receiver_ctx = ctx.clone();
    let addr = config.receiver.addr.clone();
    let receive_timeout = config.receiver.receive_timeout();
    tokio::spawn(async move {
        if let Err(e) = receiver::serve(receiver_ctx, &addr, receive_timeout).await {
            error!(error = %e, "submission receiver exited");
        }
    });

    let pulse = Pulse::new(&config.pulse, config.scoring, num_cpus());
    pulse.run(&ctx, &WallClock, &teams, &services).await;

    info!("pulse returned; contest complete");
    Ok(())
}

async fn seed(store: &PostgresStore, config: &ContestConfig) -> anyhow::Result<()> {
    for team in &config.teams {
        store
            .add_team(&Team {
                id: Uuid::new_v4(),
                name: team.name.clone(),
                subnet: team.subnet,
                vulnbox: team.vulnbox.clone(),
                netbox: team.netbox.clone(),
                use_netbox: team.use_netbox,
            })
            .await?;
    }
    for service in &config.services {
        store
            .add_service(&Service {
                id: Uuid::new_v4(),
                name: service.name.clone(),
                port: service.port as i32,
                checker_path: service.checker_path.clone(),
                udp: service.udp,
            })
            .await?;
    }
    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
