//! Reachability probes: cheap liveness checks run before any API call.
//!
//! Every prober makes several bounded attempts; a single success counts as
//! reachable.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, addr: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct ProbePolicy {
    pub attempts: u32,
    pub attempt_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            attempt_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl ProbePolicy {
    async fn run<F, Fut>(&self, addr: &str, mut attempt: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let attempts = self.attempts.max(1);
        for n in 1..=attempts {
            match tokio::time::timeout(self.attempt_timeout, attempt()).await {
                Ok(true) => return true,
                Ok(false) => debug!(addr, attempt = n, "probe attempt failed"),
                Err(_) => debug!(addr, attempt = n, "probe attempt timed out"),
            }
            if n < attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        false
    }
}

/// Connexion TCP vers `addr:port`.
#[derive(Debug, Clone)]
pub struct TcpProber {
    port: u16,
    policy: ProbePolicy,
}

impl TcpProber {
    pub fn new(port: u16, policy: ProbePolicy) -> Self {
        Self { port, policy }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, addr: &str) -> bool {
        let target = format!("{}:{}", addr, self.port);
        self.policy
            .run(addr, || {
                let target = target.clone();
                async move { TcpStream::connect(target.as_str()).await.is_ok() }
            })
            .await
    }
}

/// `ping` système, un paquet par tentative.
#[derive(Debug, Clone)]
pub struct IcmpProber {
    policy: ProbePolicy,
}

impl IcmpProber {
    pub fn new(policy: ProbePolicy) -> Self {
        Self { policy }
    }

    fn command(addr: &str) -> Command {
        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            cmd.args(["-n", "1", "-w", "1000", addr]);
        } else {
            cmd.args(["-c", "1", "-W", "1", addr]);
        }
        cmd.stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, addr: &str) -> bool {
        self.policy
            .run(addr, || async move {
                match Self::command(addr).status().await {
                    Ok(status) => status.success(),
                    Err(e) => {
                        debug!(addr, error = %e, "failed to spawn ping");
                        false
                    }
                }
            })
            .await
    }
}
