/**
 * CLOUD CONTROL API - Client de la passerelle de contrôle des VMs
 *
 * RÔLE :
 * Source de vérité pour le statut et l'adresse d'une VM, et action de
 * remédiation (démarrage).
 *
 * FONCTIONNEMENT :
 * - GET  {base}/info  → statut (majuscules côté API) + interfaces réseau
 * - POST {base}/start → 200 = démarrage accepté ;
 *   erreur `{code: 9, message: "RUNNING"}` = déjà démarrée (pas une erreur)
 * - Un token bucket partagé limite le débit global vers l'API
 */

use crate::status::VmStatus;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status code {code}: {body}")]
    Status { code: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInfo {
    pub status: VmStatus,
    /// Adresse NAT publique si présente, sinon adresse primaire.
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning { ip: Option<String> },
    Rejected(String),
}

#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn info(&self, base_url: &str) -> Result<VmInfo, ApiError>;
    async fn start(&self, base_url: &str) -> Result<StartOutcome, ApiError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default)]
    primary_v4_address: Option<PrimaryAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrimaryAddress {
    #[serde(default)]
    address: String,
    #[serde(default)]
    one_to_one_nat: Option<NatAddress>,
}

#[derive(Debug, Deserialize)]
struct NatAddress {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct StartErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    ip: Option<String>,
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

pub fn parse_info(body: &str) -> Result<VmInfo, ApiError> {
    let raw: RawInfo = serde_json::from_str(body)?;
    let ip = raw
        .network_interfaces
        .first()
        .and_then(|iface| iface.primary_v4_address.as_ref())
        .and_then(|primary| {
            primary
                .one_to_one_nat
                .as_ref()
                .and_then(|nat| non_empty(&nat.address))
                .or_else(|| non_empty(&primary.address))
        });
    Ok(VmInfo {
        status: VmStatus::from_api(&raw.status),
        ip,
    })
}

pub fn parse_start(code: u16, body: &str) -> StartOutcome {
    if code == 200 {
        return StartOutcome::Started;
    }
    match serde_json::from_str::<StartErrorBody>(body) {
        Ok(err) if err.code == 9 && err.message == "RUNNING" => StartOutcome::AlreadyRunning {
            ip: err.ip.as_deref().and_then(non_empty),
        },
        Ok(err) => StartOutcome::Rejected(format!("API error ({}): {}", code, err.message)),
        Err(_) => {
            let snippet: String = body.chars().take(100).collect();
            StartOutcome::Rejected(format!("API error ({}): {}", code, snippet))
        }
    }
}

/// Token bucket : `rate` jetons par seconde, au plus `burst` en réserve.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            rate: rate_per_sec.max(1) as f64,
            burst,
            state: Mutex::new((burst, Instant::now())),
        }
    }

    /// Réserve un jeton et retourne le temps d'attente nécessaire.
    fn reserve(&self) -> Duration {
        let mut state = self.state.lock();
        let (tokens, last) = *state;
        let now = Instant::now();
        let refilled = (tokens + now.duration_since(last).as_secs_f64() * self.rate).min(self.burst);
        let after = refilled - 1.0;
        *state = (after, now);
        if after >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-after / self.rate)
        }
    }

    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

pub struct HttpControlApi {
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl HttpControlApi {
    pub fn new(rate_per_sec: u32) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            limiter: RateLimiter::new(rate_per_sec, rate_per_sec.saturating_mul(2)),
        })
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn info(&self, base_url: &str) -> Result<VmInfo, ApiError> {
        self.limiter.acquire().await;
        let response = self.client.get(endpoint(base_url, "info")).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status { code: status.as_u16(), body });
        }
        parse_info(&body)
    }

    async fn start(&self, base_url: &str) -> Result<StartOutcome, ApiError> {
        self.limiter.acquire().await;
        let response = self.client.post(endpoint(base_url, "start")).send().await?;
        let code = response.status().as_u16();
        let body = response.text().await?;
        Ok(parse_start(code, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info_prefers_nat_address() {
        let body = r#"{
            "status": "RUNNING",
            "networkInterfaces": [
                {"primaryV4Address": {"address": "10.128.0.5", "oneToOneNat": {"address": "51.250.1.2"}}}
            ]
        }"#;
        let info = parse_info(body).unwrap();
        assert_eq!(info.status, VmStatus::Running);
        assert_eq!(info.ip.as_deref(), Some("51.250.1.2"));
    }

    #[test]
    fn test_parse_info_falls_back_to_primary() {
        let body = r#"{"status": "STOPPED", "networkInterfaces": [{"primaryV4Address": {"address": "10.128.0.5"}}]}"#;
        let info = parse_info(body).unwrap();
        assert_eq!(info.status, VmStatus::Stopped);
        assert_eq!(info.ip.as_deref(), Some("10.128.0.5"));

        let body = r#"{"status": "STOPPED", "networkInterfaces": [{"primaryV4Address": {"address": "10.0.0.1", "oneToOneNat": {"address": ""}}}]}"#;
        assert_eq!(parse_info(body).unwrap().ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_parse_info_without_interfaces() {
        let info = parse_info(r#"{"status": "PROVISIONING"}"#).unwrap();
        assert_eq!(info, VmInfo { status: VmStatus::Provisioning, ip: None });
        assert!(parse_info("not json").is_err());
    }

    #[test]
    fn test_parse_start_outcomes() {
        assert_eq!(parse_start(200, ""), StartOutcome::Started);
        assert_eq!(
            parse_start(400, r#"{"code": 9, "message": "RUNNING", "ip": "51.250.1.2"}"#),
            StartOutcome::AlreadyRunning { ip: Some("51.250.1.2".into()) }
        );
        assert_eq!(
            parse_start(400, r#"{"code": 9, "message": "RUNNING"}"#),
            StartOutcome::AlreadyRunning { ip: None }
        );
        assert_eq!(
            parse_start(400, r#"{"code": 9, "message": "STOPPING"}"#),
            StartOutcome::Rejected("API error (400): STOPPING".into())
        );
        assert_eq!(
            parse_start(502, "Bad Gateway"),
            StartOutcome::Rejected("API error (502): Bad Gateway".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_requests_after_burst() {
        let limiter = RateLimiter::new(10, 2);
        let started = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        // 2 jetons de burst, puis 2 x 100ms
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(190), "{waited:?}");
        assert!(waited < Duration::from_millis(400), "{waited:?}");
    }
}
