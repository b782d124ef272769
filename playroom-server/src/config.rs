//! Server Configuration
//!
//! Defaults, overridable through environment variables:
//!
//! - `PLAYROOM_BIND_ADDR`             (default: "0.0.0.0:4000")
//! - `PLAYROOM_MAX_CONNECTIONS`       (default: 1000)
//! - `PLAYROOM_MAX_MEMBERS`           (default: unlimited; 0 also means unlimited)
//! - `PLAYROOM_IDLE_ROOM_SECS`        (default: 1800)
//! - `PLAYROOM_CLEANUP_INTERVAL_SECS` (default: 60)
//! - `PLAYROOM_CODE_ATTEMPTS`         (default: 8)
//!
//! Authentication settings live in [`crate::network::AuthConfig`].

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::room::CoordinatorConfig;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but does not parse.
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Relayed input events buffered per connection before new ones are dropped.
    pub input_buffer: usize,
    /// How often idle rooms are looked for.
    pub cleanup_interval: Duration,
    /// Rooms unchanged for this long with nobody attached are deleted.
    pub idle_room_timeout: Duration,
    /// Room coordinator settings.
    pub coordinator: CoordinatorConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            max_connections: 1000,
            input_buffer: 64,
            cleanup_interval: Duration::from_secs(60),
            idle_room_timeout: Duration::from_secs(30 * 60),
            coordinator: CoordinatorConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Construct from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construct from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = EnvReader { lookup: &lookup };

        let max_members: usize = read.or_default("PLAYROOM_MAX_MEMBERS", 0)?;

        Ok(Self {
            bind_addr: read.or_default("PLAYROOM_BIND_ADDR", defaults.bind_addr)?,
            max_connections: read.or_default("PLAYROOM_MAX_CONNECTIONS", defaults.max_connections)?,
            input_buffer: defaults.input_buffer,
            cleanup_interval: Duration::from_secs(read.or_default(
                "PLAYROOM_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval.as_secs(),
            )?),
            idle_room_timeout: Duration::from_secs(read.or_default(
                "PLAYROOM_IDLE_ROOM_SECS",
                defaults.idle_room_timeout.as_secs(),
            )?),
            coordinator: CoordinatorConfig {
                max_members: (max_members > 0).then_some(max_members),
                code_attempts: read
                    .or_default("PLAYROOM_CODE_ATTEMPTS", defaults.coordinator.code_attempts)?,
            },
            version: defaults.version,
        })
    }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn or_default<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            Some(value) if !value.trim().is_empty() => {
                value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                    key,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            }
            _ => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 4000);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.idle_room_timeout, Duration::from_secs(1800));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.coordinator, CoordinatorConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PLAYROOM_BIND_ADDR", "127.0.0.1:9100"),
            ("PLAYROOM_MAX_MEMBERS", "2"),
            ("PLAYROOM_CODE_ATTEMPTS", " 12 "),
            ("PLAYROOM_IDLE_ROOM_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.coordinator.max_members, Some(2));
        assert_eq!(config.coordinator.code_attempts, 12);
        assert_eq!(config.idle_room_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_members_means_unlimited() {
        let config = ServerConfig::from_lookup(lookup(&[("PLAYROOM_MAX_MEMBERS", "0")])).unwrap();
        assert_eq!(config.coordinator.max_members, None);
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let err = ServerConfig::from_lookup(lookup(&[("PLAYROOM_MAX_CONNECTIONS", "lots")]))
            .unwrap_err();
        let ConfigError::Invalid { key, value, .. } = err;
        assert_eq!(key, "PLAYROOM_MAX_CONNECTIONS");
        assert_eq!(value, "lots");
    }
}
