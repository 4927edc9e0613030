/**
 * CONFIGURATION - Réglages du watchdog lus dans l'environnement
 *
 * RÔLE :
 * Construit `Settings` depuis les variables d'environnement (après chargement
 * optionnel d'un `.env` par `main`).
 *
 * RÈGLES :
 * - BOT_TOKEN et GROUP_CHAT_ID obligatoires : absents/invalides = erreur fatale
 * - Valeur optionnelle invalide = warning + valeur par défaut
 * - Durées : syntaxe humantime (`5s`, `2m`) ou nombre entier de secondes
 * - MIN_CHECK_INTERVAL > MAX_CHECK_INTERVAL = erreur fatale
 */

use crate::monitor::MonitorSettings;
use crate::notify::telegram::DEFAULT_API_URL;
use crate::notify::QueueSettings;
use crate::probe::ProbePolicy;
use crate::retry::BackoffPolicy;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("MIN_CHECK_INTERVAL ({min:?}) is greater than MAX_CHECK_INTERVAL ({max:?})")]
    IntervalBounds { min: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    Tcp,
    Icmp,
}

impl FromStr for ProbeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ProbeMode::Tcp),
            "icmp" | "ping" => Ok(ProbeMode::Icmp),
            other => Err(format!("unknown probe mode {other:?} (expected tcp or icmp)")),
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pub bot_token: String,
    pub chat_id: i64,
    pub topic_id: Option<i64>,
    pub telegram_api_url: String,
    pub min_check_interval: Duration,
    pub max_check_interval: Duration,
    pub telegram_workers: usize,
    pub queue_size: usize,
    pub dedup_window: Duration,
    pub grace_period: Duration,
    pub persist_interval: Duration,
    pub shutdown_timeout: Duration,
    pub vms_file: PathBuf,
    pub probe_mode: ProbeMode,
    pub probe_port: u16,
    pub probe_attempts: u32,
    pub probe_timeout: Duration,
    pub api_rate_limit: u32,
    pub http_addr: Option<SocketAddr>,
    pub http_api_key: Option<String>,
}

// jamais de secret dans les logs
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bot_token", &"***")
            .field("chat_id", &self.chat_id)
            .field("topic_id", &self.topic_id)
            .field("telegram_api_url", &self.telegram_api_url)
            .field("min_check_interval", &self.min_check_interval)
            .field("max_check_interval", &self.max_check_interval)
            .field("telegram_workers", &self.telegram_workers)
            .field("queue_size", &self.queue_size)
            .field("dedup_window", &self.dedup_window)
            .field("grace_period", &self.grace_period)
            .field("persist_interval", &self.persist_interval)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("vms_file", &self.vms_file)
            .field("probe_mode", &self.probe_mode)
            .field("probe_port", &self.probe_port)
            .field("probe_attempts", &self.probe_attempts)
            .field("probe_timeout", &self.probe_timeout)
            .field("api_rate_limit", &self.api_rate_limit)
            .field("http_addr", &self.http_addr)
            .field("http_api_key", &self.http_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 3600);

/// Durée humantime ou entier en secondes, dans `]0, 365 jours]`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let d = match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(raw).map_err(|e| e.to_string())?,
    };
    if d.is_zero() {
        return Err("must be greater than zero".into());
    }
    if d > MAX_DURATION {
        return Err(format!("must not exceed {}", humantime::format_duration(MAX_DURATION)));
    }
    Ok(d)
}

fn parse_positive<T>(raw: &str) -> Result<T, String>
where
    T: FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let v = raw.parse::<T>().map_err(|e| e.to_string())?;
    if v <= T::default() {
        return Err("must be greater than zero".into());
    }
    Ok(v)
}

struct Lookup<F> {
    get: F,
}

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.get)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let value = self.raw(key).ok_or(ConfigError::Missing(key))?;
        value.parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        })
    }

    fn or_default<T: fmt::Debug>(
        &self,
        key: &'static str,
        default: T,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> T {
        let Some(value) = self.raw(key) else { return default };
        match parse(&value) {
            Ok(v) => v,
            Err(reason) => {
                warn!(key, value = %value, reason = %reason, default = ?default, "invalid setting, using default");
                default
            }
        }
    }

    fn optional<T: FromStr>(&self, key: &'static str) -> Option<T>
    where
        T::Err: fmt::Display,
    {
        let value = self.raw(key)?;
        match value.parse::<T>() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, value = %value, error = %e, "invalid setting, ignored");
                None
            }
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup { get };

        let bot_token = env.raw("BOT_TOKEN").ok_or(ConfigError::Missing("BOT_TOKEN"))?;
        let chat_id = env.required::<i64>("GROUP_CHAT_ID")?;

        let min_check_interval = env.or_default("MIN_CHECK_INTERVAL", Duration::from_secs(5), parse_duration);
        let max_check_interval = env.or_default("MAX_CHECK_INTERVAL", Duration::from_secs(60), parse_duration);
        if min_check_interval > max_check_interval {
            return Err(ConfigError::IntervalBounds { min: min_check_interval, max: max_check_interval });
        }

        Ok(Self {
            bot_token,
            chat_id,
            topic_id: env.optional("TOPIC_ID"),
            telegram_api_url: env.raw("TELEGRAM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            min_check_interval,
            max_check_interval,
            telegram_workers: env.or_default("TELEGRAM_WORKERS", 3, parse_positive::<usize>),
            queue_size: env.or_default("NOTIFICATION_QUEUE_SIZE", 100, parse_positive::<usize>),
            dedup_window: env.or_default("DEDUP_WINDOW", Duration::from_secs(5 * 60), parse_duration),
            grace_period: env.or_default("GRACE_PERIOD", Duration::from_secs(60), parse_duration),
            persist_interval: env.or_default("PERSIST_INTERVAL", Duration::from_secs(30), parse_duration),
            shutdown_timeout: env.or_default("SHUTDOWN_TIMEOUT", Duration::from_secs(10), parse_duration),
            vms_file: env.raw("VMS_FILE").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("vms.yaml")),
            probe_mode: env.or_default("PROBE_MODE", ProbeMode::Tcp, |v| v.parse()),
            probe_port: env.or_default("PROBE_PORT", 22, parse_positive::<u16>),
            probe_attempts: env.or_default("PROBE_ATTEMPTS", 3, parse_positive::<u32>),
            probe_timeout: env.or_default("PROBE_TIMEOUT", Duration::from_secs(1), parse_duration),
            api_rate_limit: env.or_default("API_RATE_LIMIT", 10, parse_positive::<u32>),
            http_addr: env.optional("HTTP_ADDR"),
            http_api_key: env.raw("HTTP_API_KEY"),
        })
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            min_interval: self.min_check_interval,
            max_interval: self.max_check_interval,
            grace_period: self.grace_period,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            workers: self.telegram_workers,
            capacity: self.queue_size,
            dedup_window: self.dedup_window,
            ..QueueSettings::default()
        }
    }

    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            attempts: self.probe_attempts,
            attempt_timeout: self.probe_timeout,
            ..ProbePolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [("BOT_TOKEN", "123:abc"), ("GROUP_CHAT_ID", "-1001234")];

    #[test]
    fn test_defaults() {
        let s = settings(&REQUIRED).unwrap();
        assert_eq!(s.chat_id, -1001234);
        assert_eq!(s.topic_id, None);
        assert_eq!(s.telegram_api_url, "https://api.telegram.org");
        assert_eq!(s.min_check_interval, Duration::from_secs(5));
        assert_eq!(s.max_check_interval, Duration::from_secs(60));
        assert_eq!(s.telegram_workers, 3);
        assert_eq!(s.queue_size, 100);
        assert_eq!(s.dedup_window, Duration::from_secs(300));
        assert_eq!(s.grace_period, Duration::from_secs(60));
        assert_eq!(s.persist_interval, Duration::from_secs(30));
        assert_eq!(s.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(s.vms_file, PathBuf::from("vms.yaml"));
        assert_eq!(s.probe_mode, ProbeMode::Tcp);
        assert_eq!(s.probe_port, 22);
        assert_eq!(s.api_rate_limit, 10);
        assert!(s.http_addr.is_none());
    }

    #[test]
    fn test_required_keys() {
        assert!(matches!(settings(&[]), Err(ConfigError::Missing("BOT_TOKEN"))));
        assert!(matches!(
            settings(&[("BOT_TOKEN", "t")]),
            Err(ConfigError::Missing("GROUP_CHAT_ID"))
        ));
        assert!(matches!(
            settings(&[("BOT_TOKEN", "  "), ("GROUP_CHAT_ID", "1")]),
            Err(ConfigError::Missing("BOT_TOKEN"))
        ));
        let err = settings(&[("BOT_TOKEN", "t"), ("GROUP_CHAT_ID", "general")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GROUP_CHAT_ID", .. }));
    }

    #[test]
    fn test_duration_syntaxes() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("MIN_CHECK_INTERVAL", "10"), ("MAX_CHECK_INTERVAL", "2m"), ("GRACE_PERIOD", "1m 30s")]);
        let s = settings(&pairs).unwrap();
        assert_eq!(s.min_check_interval, Duration::from_secs(10));
        assert_eq!(s.max_check_interval, Duration::from_secs(120));
        assert_eq!(s.grace_period, Duration::from_secs(90));
    }

    #[test]
    fn test_invalid_optional_values_fall_back() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("TELEGRAM_WORKERS", "0"),
            ("NOTIFICATION_QUEUE_SIZE", "lots"),
            ("DEDUP_WINDOW", "0s"),
            ("PROBE_MODE", "udp"),
            ("TOPIC_ID", "x"),
            ("HTTP_ADDR", "nowhere"),
        ]);
        let s = settings(&pairs).unwrap();
        assert_eq!(s.telegram_workers, 3);
        assert_eq!(s.queue_size, 100);
        assert_eq!(s.dedup_window, Duration::from_secs(300));
        assert_eq!(s.probe_mode, ProbeMode::Tcp);
        assert_eq!(s.topic_id, None);
        assert_eq!(s.http_addr, None);
    }

    #[test]
    fn test_oversized_durations_fall_back() {
        assert!(parse_duration("18446744073709551615").is_err());
        assert!(parse_duration("400days").is_err());
        assert_eq!(parse_duration("365days"), Ok(Duration::from_secs(365 * 24 * 3600)));

        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("GRACE_PERIOD", "18446744073709551615"), ("DEDUP_WINDOW", "1000years")]);
        let s = settings(&pairs).unwrap();
        assert_eq!(s.grace_period, Duration::from_secs(60));
        assert_eq!(s.dedup_window, Duration::from_secs(300));
    }

    #[test]
    fn test_interval_bounds_are_fatal() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("MIN_CHECK_INTERVAL", "2m"), ("MAX_CHECK_INTERVAL", "30s")]);
        assert!(matches!(settings(&pairs), Err(ConfigError::IntervalBounds { .. })));
    }

    #[test]
    fn test_optional_features() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("TOPIC_ID", "42"),
            ("PROBE_MODE", "ICMP"),
            ("HTTP_ADDR", "127.0.0.1:8080"),
            ("HTTP_API_KEY", "secret"),
        ]);
        let s = settings(&pairs).unwrap();
        assert_eq!(s.topic_id, Some(42));
        assert_eq!(s.probe_mode, ProbeMode::Icmp);
        assert_eq!(s.http_addr, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(s.http_api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("HTTP_API_KEY", "hunter2"));
        let out = format!("{:?}", settings(&pairs).unwrap());
        assert!(!out.contains("123:abc"));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn test_derived_settings() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("PROBE_ATTEMPTS", "5"), ("PROBE_TIMEOUT", "500ms"), ("TELEGRAM_WORKERS", "7")]);
        let s = settings(&pairs).unwrap();
        assert_eq!(s.probe_policy().attempts, 5);
        assert_eq!(s.probe_policy().attempt_timeout, Duration::from_millis(500));
        assert_eq!(s.queue_settings().workers, 7);
        assert_eq!(s.monitor_settings().grace_period, Duration::from_secs(60));
    }
}
