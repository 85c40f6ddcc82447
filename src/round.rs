//! Round executor (component D, §4.D): for a single round, fans Phase P
//! (put) then Phase C (check) out over every (team, service) pair.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::probe::CheckerTarget;
use crate::store::model::{NewFlag, Service, ServiceState, Team};

/// The outcome of one (team, service) probe unit within a phase. Each
/// unit is isolated: a panic or error here is logged and recorded as a
/// status row (or skipped with a warning if even that fails), and never
/// propagates to sibling units (§4.D, §5).
#[derive(Debug)]
pub enum PhaseOutcome {
    Completed { team: String, service: String, state: ServiceState },
    Panicked { team: String, service: String },
}

/// Runs `f` over every item in `items`, bounded to `concurrency`
/// in-flight tasks, with a single authoritative join barrier: the
/// `JoinSet` itself. Every task's result — including a panic, surfaced
/// as `PhaseOutcome::Panicked` — is collected before this returns. This
/// replaces the source's ad-hoc `sync.WaitGroup` usage, one construction
/// of which spawned its `Done()` call on the wrong task (§9).
pub async fn run_phase<T, F, Fut>(items: Vec<T>, concurrency: usize, f: F) -> Vec<PhaseOutcome>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PhaseOutcome> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let f = Arc::new(f);
    let mut set = JoinSet::new();

    for item in items {
        let semaphore = semaphore.clone();
        let f = f.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            f(item).await
        });
    }

    let mut outcomes = Vec::new();
    while let Some(result) = set.join_next().await {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(join_err) => {
                error!(%join_err, "probe task panicked");
                outcomes.push(PhaseOutcome::Panicked {
                    team: "unknown".into(),
                    service: "unknown".into(),
                });
            }
        }
    }
    outcomes
}

fn checker_target(team: &Team, service: &Service) -> CheckerTarget {
    CheckerTarget {
        checker_path: service.checker_path.clone(),
        ip: team.vulnbox.clone(),
        port: service.port as u16,
        udp: service.udp,
        netbox: if team.use_netbox { team.netbox.clone() } else { None },
    }
}

async fn record(ctx: &AppContext, round: i64, team: &Team, service: &Service, state: ServiceState) {
    if let Err(e) = ctx
        .store
        .put_status(round, team.id, service.id, state)
        .await
    {
        warn!(team = %team.name, service = %service.name, error = %e, "failed to record status");
    }
}

/// Phase P (put), one unit: mint, precheck, put, record status, persist
/// the flag (§4.D).
async fn phase_p_unit(ctx: AppContext, round: i64, team: Team, service: Service) -> PhaseOutcome {
    let target = checker_target(&team, &service);

    if !ctx.probe.port_reachable(&target).await {
        record(&ctx, round, &team, &service, ServiceState::Down).await;
        return PhaseOutcome::Completed {
            team: team.name,
            service: service.name,
            state: ServiceState::Down,
        };
    }

    let token = match ctx.flags.mint() {
        Ok(t) => t,
        Err(e) => {
            error!(team = %team.name, service = %service.name, error = %e, "failed to mint flag");
            record(&ctx, round, &team, &service, ServiceState::Error).await;
            return PhaseOutcome::Completed {
                team: team.name,
                service: service.name,
                state: ServiceState::Error,
            };
        }
    };

    let outcome = match ctx.probe.put(&target, token.as_str()).await {
        Ok(o) => o,
        Err(e) => {
            warn!(team = %team.name, service = %service.name, error = %e, "put failed");
            record(&ctx, round, &team, &service, ServiceState::Error).await;
            return PhaseOutcome::Completed {
                team: team.name,
                service: service.name,
                state: ServiceState::Error,
            };
        }
    };

    record(&ctx, round, &team, &service, outcome.state).await;

    if outcome.state.is_up() {
        let cred = if outcome.stdout.is_empty() { None } else { Some(outcome.stdout) };
        if let Err(e) = ctx
            .store
            .add_flag(NewFlag {
                token: token.into(),
                round,
                team_id: team.id,
                service_id: service.id,
                cred,
            })
            .await
        {
            warn!(team = %team.name, service = %service.name, error = %e, "failed to persist flag");
        }
    }

    PhaseOutcome::Completed {
        team: team.name,
        service: service.name,
        state: outcome.state,
    }
}

/// Phase C (check), one unit: precheck, chk, conditionally get+compare,
/// record the final state (§4.D).
async fn phase_c_unit(ctx: AppContext, round: i64, team: Team, service: Service) -> PhaseOutcome {
    let target = checker_target(&team, &service);

    if !ctx.probe.port_reachable(&target).await {
        record(&ctx, round, &team, &service, ServiceState::Down).await;
        return PhaseOutcome::Completed {
            team: team.name,
            service: service.name,
            state: ServiceState::Down,
        };
    }

    let chk = match ctx.probe.chk(&target).await {
        Ok(o) => o,
        Err(e) => {
            warn!(team = %team.name, service = %service.name, error = %e, "chk failed");
            record(&ctx, round, &team, &service, ServiceState::Error).await;
            return PhaseOutcome::Completed {
                team: team.name,
                service: service.name,
                state: ServiceState::Error,
            };
        }
    };

    let mut final_state = chk.state;

    if chk.state.is_up() {
        match ctx.store.get_cred(round, team.id, service.id).await {
            Ok((token, Some(cred))) => match ctx.probe.get(&target, &cred).await {
                Ok(get_outcome) if get_outcome.state.is_up() => {
                    if get_outcome.stdout != token {
                        final_state = ServiceState::Corrupt;
                    }
                }
                Ok(get_outcome) => final_state = get_outcome.state,
                Err(e) => {
                    warn!(team = %team.name, service = %service.name, error = %e, "get failed");
                    final_state = ServiceState::Error;
                }
            },
            Ok((_, None)) => {
                // No cred means `put` never recorded a handle for this
                // flag; there is nothing to hand `get`, so the round
                // cannot confirm the flag survived.
                final_state = ServiceState::Corrupt;
            }
            Err(_) => {
                // No prior flag for this (round, team, service): per
                // §4.D's edge case, this is recorded as CORRUPT.
                final_state = ServiceState::Corrupt;
            }
        }
    }

    record(&ctx, round, &team, &service, final_state).await;
    PhaseOutcome::Completed {
        team: team.name,
        service: service.name,
        state: final_state,
    }
}

/// Runs Phase P then Phase C for `round` over every (team, service)
/// pair, with a full join barrier between the phases: within a single
/// (round, team, service), P always completes before C begins (§5).
pub async fn run_round(
    ctx: &AppContext,
    round: i64,
    teams: &[Team],
    services: &[Service],
    concurrency: usize,
) -> (Vec<PhaseOutcome>, Vec<PhaseOutcome>) {
    let pairs: Vec<(Team, Service)> = teams
        .iter()
        .flat_map(|t| services.iter().map(move |s| (t.clone(), s.clone())))
        .collect();

    info!(round, pairs = pairs.len(), "phase P starting");
    let p_ctx = ctx.clone();
    let p_outcomes = run_phase(pairs.clone(), concurrency, move |(team, service)| {
        let ctx = p_ctx.clone();
        async move { phase_p_unit(ctx, round, team, service).await }
    })
    .await;
    info!(round, "phase P complete");

    info!(round, "phase C starting");
    let c_ctx = ctx.clone();
    let c_outcomes = run_phase(pairs, concurrency, move |(team, service)| {
        let ctx = c_ctx.clone();
        async move { phase_c_unit(ctx, round, team, service).await }
    })
    .await;
    info!(round, "phase C complete");

    (p_outcomes, c_outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::FlagCodec;
    use crate::probe::ProbeContext;
    use crate::store::memory::MemoryStore;
    use ipnetwork::IpNetwork;
    use std::str::FromStr;
    use std::time::Duration;
    use uuid::Uuid;

    fn team() -> Team {
        Team {
            id: Uuid::new_v4(),
            name: "team-a".into(),
            subnet: IpNetwork::from_str("10.0.1.0/24").unwrap(),
            vulnbox: "127.0.0.1".into(),
            netbox: None,
            use_netbox: false,
        }
    }

    fn service(checker: &str, port: u16) -> Service {
        Service {
            id: Uuid::new_v4(),
            name: "notes".into(),
            port: port as i32,
            checker_path: checker.into(),
            udp: true, // udp=true skips the TCP pre-probe so no listener is needed
        }
    }

    fn ctx(store: Arc<dyn crate::store::Store>) -> AppContext {
        AppContext::new(
            FlagCodec::generate(),
            ProbeContext {
                checker_timeout: Duration::from_secs(2),
                port_check_timeout: Duration::from_millis(100),
            },
            store,
        )
    }

    #[tokio::test]
    async fn phase_p_records_up_and_persists_flag_on_success() {
        let store: Arc<dyn crate::store::Store> = Arc::new(MemoryStore::new(1));
        let ctx = ctx(store.clone());
        let team = team();
        let service = service("/bin/true", 9);
        store.add_team(&team).await.unwrap();
        store.add_service(&service).await.unwrap();
        let round = store.new_round(120).await.unwrap();

        let outcome = phase_p_unit(ctx.clone(), round, team.clone(), service.clone()).await;
        match outcome {
            PhaseOutcome::Completed { state, .. } => assert_eq!(state, ServiceState::Up),
            PhaseOutcome::Panicked { .. } => panic!("unexpected panic outcome"),
        }

        let states = store.get_states(round, team.id, service.id).await.unwrap();
        assert_eq!(states, vec![ServiceState::Up]);
    }

    #[tokio::test]
    async fn phase_c_records_corrupt_when_no_flag_was_minted() {
        let store: Arc<dyn crate::store::Store> = Arc::new(MemoryStore::new(1));
        let ctx = ctx(store.clone());
        let team = team();
        let service = service("/bin/true", 9);
        store.add_team(&team).await.unwrap();
        store.add_service(&service).await.unwrap();
        let round = store.new_round(120).await.unwrap();

        // Phase C runs without a prior Phase P having minted a flag.
        let outcome = phase_c_unit(ctx, round, team.clone(), service.clone()).await;
        match outcome {
            PhaseOutcome::Completed { state, .. } => assert_eq!(state, ServiceState::Corrupt),
            PhaseOutcome::Panicked { .. } => panic!("unexpected panic outcome"),
        }
    }

    #[tokio::test]
    async fn invariant_6_phase_c_never_uses_a_flag_from_another_round() {
        let store: Arc<dyn crate::store::Store> = Arc::new(MemoryStore::new(2));
        let ctx = ctx(store.clone());
        let team = team();
        let service = service("/bin/true", 9);
        store.add_team(&team).await.unwrap();
        store.add_service(&service).await.unwrap();

        let round1 = store.new_round(120).await.unwrap();
        phase_p_unit(ctx.clone(), round1, team.clone(), service.clone()).await;

        let round2 = store.new_round(120).await.unwrap();
        let outcome = phase_c_unit(ctx, round2, team.clone(), service.clone()).await;
        match outcome {
            PhaseOutcome::Completed { state, .. } => assert_eq!(state, ServiceState::Corrupt),
            PhaseOutcome::Panicked { .. } => panic!("unexpected panic outcome"),
        }
    }

    #[tokio::test]
    async fn run_phase_isolates_a_unit_that_panics() {
        let outcomes = run_phase(vec![1, 2, 3], 2, |n| async move {
            if n == 2 {
                panic!("boom");
            }
            PhaseOutcome::Completed {
                team: n.to_string(),
                service: "svc".into(),
                state: ServiceState::Up,
            }
        })
        .await;

        assert_eq!(outcomes.len(), 3);
        let panicked = outcomes
            .iter()
            .filter(|o| matches!(o, PhaseOutcome::Panicked { .. }))
            .count();
        assert_eq!(panicked, 1);
    }
}
