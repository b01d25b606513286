//! Process configuration, loaded once at startup from the environment variables documented in
//! the deployment surface. Bad input becomes a fatal startup error (exit code 2) rather than a
//! panic partway through the run; see [`Config::from_env`].

use std::net::IpAddr;
use std::time::Duration;

use camino::Utf8PathBuf;

/// Fully resolved, validated process configuration. Immutable for the life of the process:
/// nothing here is reloaded, so there is no lock. Risk-scoring rule tables are separate, fixed
/// constants (see `risk.rs`) rather than part of this struct.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub ssh_port: Option<u16>,
    pub http_port: Option<u16>,
    pub telnet_port: Option<u16>,
    pub mqtt_port: Option<u16>,
    pub api_port: u16,
    pub camera_port: Option<u16>,
    pub geoip_db_path: Option<Utf8PathBuf>,
    pub store_path: Utf8PathBuf,
    pub log_path: Utf8PathBuf,
    pub quarantine_dir: Utf8PathBuf,
    pub max_session_bytes: u64,
    pub session_idle_timeout: Duration,
    pub session_max_duration: Duration,
    pub subscriber_queue_size: usize,
    pub bus_queue_size: usize,
}

/// Errors while assembling a [`Config`] from the environment. Every variant maps to exit code 2
/// at the CLI boundary (see `main.rs`); none of these should ever be allowed to panic.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("{name} must be a valid UTF-8 path, got {value:?}")]
    NonUtf8Path { name: &'static str, value: std::ffi::OsString },
}

impl Config {
    /// Reads and validates every recognized environment variable, applying defaults for anything
    /// unset. This is the single place allowed to call `std::env::var`; everything downstream
    /// takes a `&Config`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Testable core of [`Config::from_env`], parameterized over the environment lookup so tests
    /// can supply a fixed map instead of mutating process-global env vars.
    pub fn from_env_with(mut get: impl FnMut(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: "BIND_ADDR",
                value: raw,
            })?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let ssh_port = parse_port_with_default("SSH_PORT", 2222, &mut get)?;
        let http_port = parse_port_with_default("HTTP_PORT", 8080, &mut get)?;
        let telnet_port = parse_port_with_default("TELNET_PORT", 2323, &mut get)?;
        let mqtt_port = parse_port_with_default("MQTT_PORT", 1883, &mut get)?;
        let camera_port = parse_port_with_default("CAMERA_PORT", 5000, &mut get)?;
        let api_port = parse_port_with_default("API_PORT", 8000, &mut get)?.unwrap_or(8000); // API port is never disabled by an empty value

        let geoip_db_path = match get("GEOIP_DB_PATH") {
            Some(raw) => Some(to_utf8_path("GEOIP_DB_PATH", raw)?),
            None => None,
        };
        let store_path = to_utf8_path("STORE_PATH", get("STORE_PATH").unwrap_or_else(|| "data/captures.db".to_owned()))?;
        let log_path = to_utf8_path("LOG_PATH", get("LOG_PATH").unwrap_or_else(|| "data/logs".to_owned()))?;
        let quarantine_dir = to_utf8_path(
            "QUARANTINE_DIR",
            get("QUARANTINE_DIR").unwrap_or_else(|| "data/quarantine".to_owned()),
        )?;

        let max_session_bytes = parse_u64("MAX_SESSION_BYTES", &mut get)?.unwrap_or(1_048_576);
        let session_idle_timeout = Duration::from_secs(parse_u64("SESSION_IDLE_TIMEOUT_S", &mut get)?.unwrap_or(60));
        let session_max_duration = Duration::from_secs(parse_u64("SESSION_MAX_DURATION_S", &mut get)?.unwrap_or(600));
        let subscriber_queue_size = parse_u64("SUBSCRIBER_QUEUE_SIZE", &mut get)?.unwrap_or(256) as usize;
        let bus_queue_size = parse_u64("BUS_QUEUE_SIZE", &mut get)?.unwrap_or(1024) as usize;

        Ok(Self {
            bind_addr,
            ssh_port,
            http_port,
            telnet_port,
            mqtt_port,
            api_port,
            camera_port,
            geoip_db_path,
            store_path,
            log_path,
            quarantine_dir,
            max_session_bytes,
            session_idle_timeout,
            session_max_duration,
            subscriber_queue_size,
            bus_queue_size,
        })
    }
}

/// Parses a port variable with three states: unset → `default`, set to the empty string →
/// `None` (the emulator is explicitly disabled), set to a number → that port.
fn parse_port_with_default(
    name: &'static str,
    default: u16,
    get: &mut impl FnMut(&str) -> Option<String>,
) -> Result<Option<u16>, ConfigError> {
    match get(name) {
        None => Ok(Some(default)),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

fn parse_u64(name: &'static str, get: &mut impl FnMut(&str) -> Option<String>) -> Result<Option<u64>, ConfigError> {
    match get(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(None),
    }
}

fn to_utf8_path(name: &'static str, raw: String) -> Result<Utf8PathBuf, ConfigError> {
    Utf8PathBuf::from_path_buf(raw.clone().into()).map_err(|_| ConfigError::NonUtf8Path {
        name,
        value: raw.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_map(pairs: &[(&str, &str)]) -> impl FnMut(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_env_with(env_map(&[])).unwrap();
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.camera_port, Some(5000));
        assert_eq!(config.ssh_port, Some(2222));
        assert_eq!(config.max_session_bytes, 1_048_576);
    }

    #[test]
    fn empty_port_disables_that_emulator() {
        let config = Config::from_env_with(env_map(&[("SSH_PORT", "")])).unwrap();
        assert_eq!(config.ssh_port, None);
    }

    #[test]
    fn invalid_port_is_a_config_error() {
        let err = Config::from_env_with(env_map(&[("API_PORT", "not-a-port")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "API_PORT", .. }));
    }

    #[test]
    fn bind_addr_overrides_default() {
        let config = Config::from_env_with(env_map(&[("BIND_ADDR", "127.0.0.1")])).unwrap();
        assert_eq!(config.bind_addr, IpAddr::from([127, 0, 0, 1]));
    }
}
