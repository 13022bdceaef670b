//! Readiness probing for the spawned Client.
//!
//! Two authoritative probes: the CDP HTTP endpoint must answer 200 (TCP
//! accept alone is not enough — the HTTP server may not take WebSocket
//! upgrades yet), and the Client's RPC pipe must answer a real `system.ping`
//! (a frozen child accepts connections but never replies).

use crate::client::PipeRpcClient;
use crate::pipe;
use crate::{Error, Result};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);
pub const READY_TIMEOUT: Duration = Duration::from_secs(90);
/// When the pipe comes up before CDP, the child is alive and making
/// progress; give it longer.
pub const READY_TIMEOUT_EXTENDED: Duration = Duration::from_secs(120);
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(60);
pub const PIPE_RELEASE_POLL: Duration = Duration::from_millis(300);
pub const PIPE_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Final state of both probes, carried in readiness diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeState {
    pub cdp_up: bool,
    pub pipe_up: bool,
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cdp={}, pipe={}",
            if self.cdp_up { "up" } else { "down" },
            if self.pipe_up { "up" } else { "down" }
        )
    }
}

/// 200 from `/json/version` on the CDP port.
pub async fn cdp_up(http: &reqwest::Client, cdp_port: u16) -> bool {
    let url = format!("http://127.0.0.1:{}/json/version", cdp_port);
    match http.get(&url).timeout(PING_TIMEOUT).send().await {
        Ok(response) => response.status().as_u16() == 200,
        Err(_) => false,
    }
}

/// A real ping round-trip over the Client pipe.
pub async fn pipe_up(pipe_path: &Path) -> bool {
    PipeRpcClient::new(pipe_path)
        .ping(PING_TIMEOUT)
        .await
        .map(|reply| reply.alive)
        .unwrap_or(false)
}

/// Wait until both probes answer, with the adaptive cap.
pub async fn wait_until_ready(
    http: &reqwest::Client,
    cdp_port: u16,
    pipe_path: &Path,
) -> Result<()> {
    let started = Instant::now();
    let mut last_log = Instant::now();
    let mut cap = READY_TIMEOUT;
    let mut state = ProbeState::default();
    let mut pipe_led = false;

    loop {
        state.cdp_up = cdp_up(http, cdp_port).await;
        state.pipe_up = pipe_up(pipe_path).await;

        if state.cdp_up && state.pipe_up {
            info!(
                cdp_port,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "client ready"
            );
            return Ok(());
        }

        if state.pipe_up && !state.cdp_up && !pipe_led {
            pipe_led = true;
            cap = READY_TIMEOUT_EXTENDED;
            debug!("pipe up before CDP; extending readiness cap");
        }

        if started.elapsed() >= cap {
            return Err(Error::Readiness(format!(
                "client not ready after {:?} ({})",
                cap, state
            )));
        }

        if last_log.elapsed() >= STATUS_LOG_INTERVAL {
            last_log = Instant::now();
            info!(
                cdp_port,
                cdp = state.cdp_up,
                pipe = state.pipe_up,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "waiting for client"
            );
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Reconnect variant: both probes must come back within 60 s.
pub async fn wait_until_back(
    http: &reqwest::Client,
    cdp_port: u16,
    pipe_path: &Path,
) -> Result<()> {
    let started = Instant::now();
    let mut state = ProbeState::default();
    while started.elapsed() < RECONNECT_TIMEOUT {
        state.cdp_up = cdp_up(http, cdp_port).await;
        state.pipe_up = pipe_up(pipe_path).await;
        if state.cdp_up && state.pipe_up {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(Error::Readiness(format!(
        "client did not come back within {:?} ({})",
        RECONNECT_TIMEOUT, state
    )))
}

/// Wait until the inspector port accepts TCP (debug-attach precondition).
pub async fn wait_for_inspector(inspector_port: u16, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    loop {
        if tokio::net::TcpStream::connect(("127.0.0.1", inspector_port))
            .await
            .is_ok()
        {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            return Err(Error::Readiness(format!(
                "inspector port {} never accepted",
                inspector_port
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Wait until nothing accepts on the pipe name anymore (the OS can lag a
/// moment behind a dying Client).
pub async fn wait_for_pipe_release(pipe_path: &Path) -> Result<()> {
    let started = Instant::now();
    loop {
        if !pipe::is_bound(pipe_path).await {
            return Ok(());
        }
        if started.elapsed() >= PIPE_RELEASE_TIMEOUT {
            return Err(Error::Readiness(format!(
                "pipe {} still bound after {:?}",
                pipe_path.display(),
                PIPE_RELEASE_TIMEOUT
            )));
        }
        tokio::time::sleep(PIPE_RELEASE_POLL).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::server::PipeRpcServer;

    fn temp_pipe(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "devtools-probe-test-{}-{}.sock",
            name,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn test_cdp_probe_rejects_plain_tcp() {
        // A bare TCP listener accepts but speaks no HTTP: not ready.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let http = reqwest::Client::new();
        assert!(!cdp_up(&http, port).await);
    }

    #[tokio::test]
    async fn test_cdp_probe_down_port() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let http = reqwest::Client::new();
        assert!(!cdp_up(&http, port).await);
    }

    #[tokio::test]
    async fn test_pipe_probe_requires_ping_answer() {
        let path = temp_pipe("ping-answer");
        assert!(!pipe_up(&path).await);

        let server = PipeRpcServer::new();
        server.start(&path).await.unwrap();
        assert!(pipe_up(&path).await);
        server.stop().await;
        assert!(!pipe_up(&path).await);
    }

    #[tokio::test]
    async fn test_inspector_wait_succeeds_on_live_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        wait_for_inspector(port, Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_inspector_wait_times_out() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = wait_for_inspector(port, Duration::from_millis(100)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_pipe_release_after_stop() {
        let path = temp_pipe("release");
        let server = PipeRpcServer::new();
        server.start(&path).await.unwrap();
        server.stop().await;
        wait_for_pipe_release(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_pipe_release_times_out_while_held() {
        let path = temp_pipe("held");
        let server = PipeRpcServer::new();
        server.start(&path).await.unwrap();

        let err = wait_for_pipe_release(&path).await;
        assert!(err.is_err());
        let message = err.unwrap_err().to_string();
        assert!(message.contains("still bound"));

        server.stop().await;
    }
}
