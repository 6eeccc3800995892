//! Signaling coordinator configuration.
//!
//! Configuration is loaded from `SC_*` environment variables. Every setting
//! has a default; a value that is present but malformed is an error rather
//! than silently replaced.

use crate::engine::TransportListenConfig;

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket signaling bind address.
pub const DEFAULT_WS_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default health/metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default IP the media engine listens on.
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";

/// Default RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 10000;
pub const DEFAULT_RTC_MAX_PORT: u16 = 10100;

/// Default initial outgoing bitrate estimate (bits per second).
pub const DEFAULT_INITIAL_OUTGOING_BITRATE: u32 = 1_000_000;

/// Default time between engine death and process exit.
pub const DEFAULT_ENGINE_DEATH_GRACE_MS: u64 = 2000;

/// Default time allowed for connections to drain on SIGTERM.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;

/// Default coordinator instance ID prefix.
pub const DEFAULT_COORDINATOR_ID_PREFIX: &str = "sc";

/// Signaling coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket bind address (default: "0.0.0.0:3000").
    pub ws_bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this coordinator instance.
    pub coordinator_id: String,

    /// IP the media engine binds transports to.
    pub listen_ip: String,

    /// Public IP advertised in ICE candidates; `listen_ip` when unset.
    pub announced_ip: Option<String>,

    pub rtc_min_port: u16,
    pub rtc_max_port: u16,

    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,

    pub initial_available_outgoing_bitrate: u32,

    /// Milliseconds between engine death and exit (default: 2000).
    pub engine_death_grace_ms: u64,

    /// Seconds connections get to drain on SIGTERM (default: 10).
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a malformed setting.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a malformed setting.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ws_bind_address = vars
            .get("SC_WS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_WS_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let listen_ip = vars
            .get("SC_LISTEN_IP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LISTEN_IP.to_string());

        let announced_ip = vars
            .get("SC_ANNOUNCED_IP")
            .filter(|s| !s.trim().is_empty())
            .cloned();

        let rtc_min_port = parse_var(vars, "SC_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_var(vars, "SC_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "SC_RTC_MIN_PORT ({rtc_min_port}) must not exceed SC_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let enable_udp = parse_bool(vars, "SC_ENABLE_UDP", true)?;
        let enable_tcp = parse_bool(vars, "SC_ENABLE_TCP", true)?;
        let prefer_udp = parse_bool(vars, "SC_PREFER_UDP", true)?;
        if !enable_udp && !enable_tcp {
            return Err(ConfigError::InvalidValue(
                "at least one of SC_ENABLE_UDP and SC_ENABLE_TCP must be true".to_string(),
            ));
        }

        let initial_available_outgoing_bitrate = parse_var(
            vars,
            "SC_INITIAL_OUTGOING_BITRATE",
            DEFAULT_INITIAL_OUTGOING_BITRATE,
        )?;

        let engine_death_grace_ms =
            parse_var(vars, "SC_ENGINE_DEATH_GRACE_MS", DEFAULT_ENGINE_DEATH_GRACE_MS)?;

        let shutdown_timeout_seconds = parse_var(
            vars,
            "SC_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?;

        let coordinator_id = vars.get("SC_COORDINATOR_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_COORDINATOR_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            ws_bind_address,
            health_bind_address,
            coordinator_id,
            listen_ip,
            announced_ip,
            rtc_min_port,
            rtc_max_port,
            enable_udp,
            enable_tcp,
            prefer_udp,
            initial_available_outgoing_bitrate,
            engine_death_grace_ms,
            shutdown_timeout_seconds,
        })
    }

    /// Listen parameters handed to the engine for every new transport.
    #[must_use]
    pub fn listen_config(&self) -> TransportListenConfig {
        TransportListenConfig {
            listen_ip: self.listen_ip.clone(),
            announced_ip: self.announced_ip.clone(),
            rtc_min_port: self.rtc_min_port,
            rtc_max_port: self.rtc_max_port,
            enable_udp: self.enable_udp,
            enable_tcp: self.enable_tcp,
            prefer_udp: self.prefer_udp,
            initial_available_outgoing_bitrate: self.initial_available_outgoing_bitrate,
        }
    }

    #[must_use]
    pub fn engine_death_grace(&self) -> Duration {
        Duration::from_millis(self.engine_death_grace_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!("{name}={v}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.ws_bind_address, DEFAULT_WS_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.listen_ip, DEFAULT_LISTEN_IP);
        assert_eq!(config.announced_ip, None);
        assert_eq!(config.rtc_min_port, 10000);
        assert_eq!(config.rtc_max_port, 10100);
        assert!(config.enable_udp);
        assert!(config.enable_tcp);
        assert!(config.prefer_udp);
        assert_eq!(config.initial_available_outgoing_bitrate, 1_000_000);
        assert_eq!(config.engine_death_grace(), Duration::from_millis(2000));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert!(config.coordinator_id.starts_with("sc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("SC_WS_BIND_ADDRESS".to_string(), "127.0.0.1:4000".to_string()),
            ("SC_COORDINATOR_ID".to_string(), "sc-custom-001".to_string()),
            ("SC_LISTEN_IP".to_string(), "10.0.0.5".to_string()),
            ("SC_ANNOUNCED_IP".to_string(), "203.0.113.7".to_string()),
            ("SC_RTC_MIN_PORT".to_string(), "40000".to_string()),
            ("SC_RTC_MAX_PORT".to_string(), "40010".to_string()),
            ("SC_ENABLE_TCP".to_string(), "false".to_string()),
            ("SC_ENGINE_DEATH_GRACE_MS".to_string(), "500".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.ws_bind_address, "127.0.0.1:4000");
        assert_eq!(config.coordinator_id, "sc-custom-001");
        assert!(!config.enable_tcp);

        let listen = config.listen_config();
        assert_eq!(listen.listen_ip, "10.0.0.5");
        assert_eq!(listen.announced_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(listen.rtc_min_port, 40000);
        assert_eq!(listen.rtc_max_port, 40010);
        assert_eq!(config.engine_death_grace(), Duration::from_millis(500));
    }

    #[test]
    fn test_blank_announced_ip_is_unset() {
        let vars = HashMap::from([("SC_ANNOUNCED_IP".to_string(), "  ".to_string())]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.announced_ip, None);
    }

    #[test]
    fn test_malformed_number_is_rejected() {
        let vars = HashMap::from([("SC_RTC_MIN_PORT".to_string(), "seventy".to_string())]);
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref msg) if msg.contains("SC_RTC_MIN_PORT")));
    }

    #[test]
    fn test_inverted_port_range_is_rejected() {
        let vars = HashMap::from([
            ("SC_RTC_MIN_PORT".to_string(), "20000".to_string()),
            ("SC_RTC_MAX_PORT".to_string(), "10000".to_string()),
        ]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_both_protocols_disabled_is_rejected() {
        let vars = HashMap::from([
            ("SC_ENABLE_UDP".to_string(), "0".to_string()),
            ("SC_ENABLE_TCP".to_string(), "off".to_string()),
        ]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_bad_bool_is_rejected() {
        let vars = HashMap::from([("SC_PREFER_UDP".to_string(), "maybe".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
