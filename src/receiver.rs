//! Submission receiver (component E, §4.E): a line-oriented TCP
//! endpoint teams use to submit captured flags.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::error::{ReceiverError, StoreError};

const BANNER: &str = "tinfoilhat submission endpoint. send one flag per line.\n";

/// Runs the accept loop until the listener is closed. Each connection
/// gets its own task; a stuck or hostile client cannot affect others
/// (§4.E, §5).
pub async fn serve(
    ctx: AppContext,
    addr: &str,
    receive_timeout: std::time::Duration,
) -> Result<(), ReceiverError> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "submission receiver listening");
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let (socket, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        let active = active.clone();
        active.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(ctx, socket, peer, receive_timeout).await {
                warn!(%peer, error = %e, "submission connection ended with an error");
            }
            active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

async fn handle_connection(
    ctx: AppContext,
    mut socket: TcpStream,
    peer: SocketAddr,
    receive_timeout: std::time::Duration,
) -> Result<(), ReceiverError> {
    socket.write_all(BANNER.as_bytes()).await?;
    let (read_half, mut write_half) = socket.split();
    let mut reader = BufReader::new(read_half);

    loop {
        let mut line = String::new();
        let read = timeout(receive_timeout, reader.read_line(&mut line)).await;
        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                write_half.write_all(b"timed out\n").await?;
                return Ok(());
            }
        };
        if n == 0 {
            return Ok(()); // peer closed the connection
        }

        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        if token.eq_ignore_ascii_case("quit") {
            return Ok(());
        }

        let reply = handle_submission(&ctx, peer, token).await;
        write_half.write_all(reply.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
    }
}

/// Verifies, identifies, and records a single submitted flag token
/// (§4.E), returning the human-readable protocol reply.
async fn handle_submission(ctx: &AppContext, peer: SocketAddr, token: &str) -> String {
    if !ctx.flags.verify(token) {
        return "invalid flag".to_string();
    }

    let Some(attacker) = identify_team(ctx, peer).await else {
        return "unknown team".to_string();
    };

    let flag = match ctx.store.get_flag_info(token).await {
        Ok(f) => f,
        Err(_) => return "flag does not exist".to_string(),
    };

    match ctx.store.capture_flag(flag.id, attacker).await {
        Ok(()) => "accepted".to_string(),
        Err(StoreError::AlreadyCaptured) => "already captured".to_string(),
        Err(StoreError::SelfCapture) => "flag is yours".to_string(),
        Err(StoreError::FlagExpired) => "flag expired".to_string(),
        Err(StoreError::UnknownFlag) => "flag does not exist".to_string(),
        Err(_) => "internal error".to_string(),
    }
}

/// Matches the submitting peer's address against configured team
/// subnets (§4.E).
async fn identify_team(ctx: &AppContext, peer: SocketAddr) -> Option<uuid::Uuid> {
    let teams = ctx.store.get_teams().await.ok()?;
    teams
        .into_iter()
        .find(|t| t.subnet.contains(peer.ip()))
        .map(|t| t.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::FlagCodec;
    use crate::probe::ProbeContext;
    use crate::store::memory::MemoryStore;
    use crate::store::model::{NewFlag, Team};
    use ipnetwork::IpNetwork;
    use std::str::FromStr;
    use std::time::Duration;

    fn ctx_with(flags: FlagCodec, store: Arc<dyn crate::store::Store>) -> AppContext {
        AppContext::new(
            flags,
            ProbeContext {
                checker_timeout: Duration::from_secs(1),
                port_check_timeout: Duration::from_millis(50),
            },
            store,
        )
    }

    fn peer(ip: &str) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), 12345)
    }

    #[tokio::test]
    async fn s4_submission_protocol() {
        let flags = FlagCodec::generate();
        let store: Arc<dyn crate::store::Store> = Arc::new(MemoryStore::new(1));
        let ctx = ctx_with(flags.clone(), store.clone());

        let defender = Team {
            id: uuid::Uuid::new_v4(),
            name: "defender".into(),
            subnet: IpNetwork::from_str("10.0.1.0/24").unwrap(),
            vulnbox: "10.0.1.2".into(),
            netbox: None,
            use_netbox: false,
        };
        let attacker = Team {
            id: uuid::Uuid::new_v4(),
            name: "attacker".into(),
            subnet: IpNetwork::from_str("10.0.2.0/24").unwrap(),
            vulnbox: "10.0.2.2".into(),
            netbox: None,
            use_netbox: false,
        };
        store.add_team(&defender).await.unwrap();
        store.add_team(&attacker).await.unwrap();
        let round = store.new_round(120).await.unwrap();
        let token = flags.mint().unwrap();
        store
            .add_flag(NewFlag {
                token: token.as_str().to_string(),
                round,
                team_id: defender.id,
                service_id: uuid::Uuid::new_v4(),
                cred: None,
            })
            .await
            .unwrap();

        // Fabricated token.
        assert_eq!(
            handle_submission(&ctx, peer("10.0.2.2"), "not-a-real-flag").await,
            "invalid flag"
        );

        // Valid token submitted by its own defender.
        assert_eq!(
            handle_submission(&ctx, peer("10.0.1.2"), token.as_str()).await,
            "flag is yours"
        );

        // Valid token, other team, first time.
        assert_eq!(
            handle_submission(&ctx, peer("10.0.2.2"), token.as_str()).await,
            "accepted"
        );

        // Same token again.
        assert_eq!(
            handle_submission(&ctx, peer("10.0.2.2"), token.as_str()).await,
            "already captured"
        );
    }

    #[tokio::test]
    async fn unrecognized_peer_subnet_is_rejected() {
        let flags = FlagCodec::generate();
        let store: Arc<dyn crate::store::Store> = Arc::new(MemoryStore::new(1));
        let ctx = ctx_with(flags.clone(), store.clone());
        let token = flags.mint().unwrap();

        assert_eq!(
            handle_submission(&ctx, peer("192.168.50.1"), token.as_str()).await,
            "unknown team"
        );
    }
}
