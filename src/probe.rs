//! Probe driver (component B, §4.B): invokes the external checker
//! process for put/get/chk and maps exit codes to service states.

use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::error::ProbeError;
use crate::store::model::ServiceState;

/// One (team, service) target the probe driver operates against.
#[derive(Debug, Clone)]
pub struct CheckerTarget {
    pub checker_path: String,
    pub ip: String,
    pub port: u16,
    pub udp: bool,
    pub netbox: Option<String>,
}

/// Process-wide probe settings, resolved once from config at startup
/// and threaded explicitly rather than held as a global (§9).
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub checker_timeout: Duration,
    pub port_check_timeout: Duration,
}

/// The outcome of a single checker invocation.
pub struct ProbeOutcome {
    pub state: ServiceState,
    pub stdout: String,
    pub logs: String,
}

impl ProbeContext {
    /// put(checker, ip, port, flag) → (cred, logs, state) (§4.B).
    pub async fn put(&self, target: &CheckerTarget, flag: &str) -> Result<ProbeOutcome, ProbeError> {
        self.invoke(target, &["put", &target.ip, &target.port.to_string(), flag])
            .await
    }

    /// get(checker, ip, port, cred) → (returned_flag, logs, state) (§4.B).
    pub async fn get(&self, target: &CheckerTarget, cred: &str) -> Result<ProbeOutcome, ProbeError> {
        self.invoke(target, &["get", &target.ip, &target.port.to_string(), cred])
            .await
    }

    /// chk(checker, ip, port) → (logs, state) (§4.B).
    pub async fn chk(&self, target: &CheckerTarget) -> Result<ProbeOutcome, ProbeError> {
        self.invoke(target, &["chk", &target.ip, &target.port.to_string()])
            .await
    }

    /// TCP pre-probe liveness check for TCP services; UDP services
    /// always report reachable and skip straight to the checker.
    pub async fn port_reachable(&self, target: &CheckerTarget) -> bool {
        if target.udp {
            return true;
        }
        let addr = format!("{}:{}", target.ip, target.port);
        matches!(
            timeout(self.port_check_timeout, TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }

    async fn invoke(&self, target: &CheckerTarget, args: &[&str]) -> Result<ProbeOutcome, ProbeError> {
        let (program, full_args): (&str, Vec<String>) = match &target.netbox {
            Some(netbox) => {
                let mut a = vec![
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    "-o".to_string(),
                    format!("ConnectTimeout={}", self.port_check_timeout.as_secs()),
                    netbox.clone(),
                    target.checker_path.clone(),
                ];
                a.extend(args.iter().map(|s| s.to_string()));
                ("ssh", a)
            }
            None => (
                target.checker_path.as_str(),
                args.iter().map(|s| s.to_string()).collect(),
            ),
        };

        let mut child = Command::new(program)
            .args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stdout/stderr concurrently with waiting so a chatty
        // checker can't deadlock on a full pipe buffer.
        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
        let drain = async {
            use tokio::io::AsyncReadExt;
            let mut out = Vec::new();
            let mut err = Vec::new();
            let _ = tokio::join!(
                stdout_pipe.read_to_end(&mut out),
                stderr_pipe.read_to_end(&mut err),
            );
            (out, err)
        };

        // Native child-process timeout: kill on expiry rather than
        // shelling out to an external `timeout(1)` binary (§9).
        let (status, stdout_bytes, stderr_bytes) =
            match timeout(self.checker_timeout, futures::future::join(child.wait(), drain)).await {
                Ok((status, (out, err))) => (status?, out, err),
                Err(_) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return Ok(ProbeOutcome {
                        state: ServiceState::from_exit_code(124),
                        stdout: String::new(),
                        logs: "checker timed out".into(),
                    });
                }
            };

        let code = status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&stdout_bytes).trim().to_string();
        let logs = String::from_utf8_lossy(&stderr_bytes).trim().to_string();
        let state = ServiceState::from_exit_code(code);
        if matches!(state, ServiceState::Unknown) {
            warn!(%code, %logs, "checker exited with an unmapped code");
        }

        Ok(ProbeOutcome { state, stdout, logs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(checker: &str) -> CheckerTarget {
        CheckerTarget {
            checker_path: checker.to_string(),
            ip: "127.0.0.1".to_string(),
            port: 9,
            udp: false,
            netbox: None,
        }
    }

    fn ctx() -> ProbeContext {
        ProbeContext {
            checker_timeout: Duration::from_millis(200),
            port_check_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn exit_code_maps_to_state() {
        let ctx = ctx();
        let outcome = ctx.chk(&target("/bin/true")).await.unwrap();
        assert_eq!(outcome.state, ServiceState::Up);

        let outcome = ctx.chk(&target("/bin/false")).await.unwrap();
        assert_eq!(outcome.state, ServiceState::Error);
    }

    #[tokio::test]
    async fn checker_that_sleeps_past_timeout_is_recorded_down() {
        // S5: a checker slower than `checker_timeout` must be killed
        // and mapped to DOWN (the exit-124 path), not hang the probe.
        let script = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(script.path(), "#!/bin/sh\nsleep 5\n").unwrap();
        let mut perms = std::fs::metadata(script.path()).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(script.path(), perms).unwrap();

        let ctx = ProbeContext {
            checker_timeout: Duration::from_millis(50),
            port_check_timeout: Duration::from_millis(50),
        };
        let outcome = ctx
            .chk(&target(script.path().to_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(outcome.state, ServiceState::Down);
    }

    #[tokio::test]
    async fn port_unreachable_reports_false() {
        let ctx = ctx();
        let target = CheckerTarget {
            checker_path: "/bin/true".into(),
            ip: "127.0.0.1".into(),
            port: 1, // privileged, almost certainly nothing listening
            udp: false,
            netbox: None,
        };
        assert!(!ctx.port_reachable(&target).await);
    }

    #[tokio::test]
    async fn udp_services_skip_port_check() {
        let ctx = ctx();
        let target = CheckerTarget {
            checker_path: "/bin/true".into(),
            ip: "127.0.0.1".into(),
            port: 1,
            udp: true,
            netbox: None,
        };
        assert!(ctx.port_reachable(&target).await);
    }
}
