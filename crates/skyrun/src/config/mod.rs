//! Session configuration and its file loader.

use crate::error::{ScopeError, ScopeResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default TCP port of the device's JSON control channel.
pub const DEFAULT_PORT: u16 = 4700;
/// First command id of a session.
pub const DEFAULT_COMMAND_ID_BASE: u64 = 999;
/// Large comet frames run past 50 KiB.
pub const DEFAULT_RECEIVE_BUFFER_BYTES: usize = 1024 * 60;

/// Connection and timing settings of a device session.
///
/// Every field has a default, so a config file only needs the fields it
/// changes. Immutable once the session is connected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub command_id_base: u64,
    /// Log every command and frame at debug level.
    pub debug: bool,
    pub connect_timeout_ms: u64,
    /// Socket read timeout; bounds how long the listener blocks per receive.
    pub read_timeout_ms: u64,
    pub receive_buffer_bytes: usize,
    /// Poll period of `wait_for_completion`.
    pub poll_interval_ms: u64,
    /// Send a heartbeat every N polls while waiting.
    pub heartbeat_every: u32,
    /// Watchdog for `wait_for_completion`. `None` waits forever.
    pub completion_timeout_ms: Option<u64>,
    /// Pause between a finished goto and the start of stacking.
    pub settle_delay_ms: u64,
    /// Idle sleep of the listener when a receive returned nothing.
    pub listener_idle_ms: u64,
    pub listener_join_timeout_ms: u64,
    pub continuous_exposure_secs: f64,
    pub lp_filter: bool,
    pub save_discrete_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "seestar.local".to_string(),
            port: DEFAULT_PORT,
            command_id_base: DEFAULT_COMMAND_ID_BASE,
            debug: false,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 1_000,
            receive_buffer_bytes: DEFAULT_RECEIVE_BUFFER_BYTES,
            poll_interval_ms: 1_000,
            heartbeat_every: 5,
            completion_timeout_ms: None,
            settle_delay_ms: 3_000,
            listener_idle_ms: 1_000,
            listener_join_timeout_ms: 10_000,
            continuous_exposure_secs: 60.0,
            lp_filter: true,
            save_discrete_frames: true,
        }
    }
}

impl SessionConfig {
    /// Config pointing at `host:port` with every other field defaulted.
    pub fn for_address(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_ms.map(Duration::from_millis)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn listener_idle(&self) -> Duration {
        Duration::from_millis(self.listener_idle_ms)
    }

    pub fn listener_join_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_join_timeout_ms)
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> ScopeResult<()> {
        let problem = if self.host.trim().is_empty() {
            Some("host must not be empty")
        } else if self.port == 0 {
            Some("port must not be zero")
        } else if self.heartbeat_every == 0 {
            Some("heartbeat_every must be at least 1")
        } else if self.poll_interval_ms == 0 {
            Some("poll_interval_ms must be positive")
        } else if self.receive_buffer_bytes == 0 {
            Some("receive_buffer_bytes must be positive")
        } else if self.read_timeout_ms == 0 {
            Some("read_timeout_ms must be positive")
        } else if !self.continuous_exposure_secs.is_finite() || self.continuous_exposure_secs <= 0.0 {
            Some("continuous_exposure_secs must be positive")
        } else {
            None
        };
        match problem {
            Some(message) => Err(ScopeError::new(
                crate::error::ErrorCode::Config,
                message,
                serde_json::json!({ "config": self }),
            )),
            None => Ok(()),
        }
    }
}

/// Load a config file: YAML for `.yaml`/`.yml`, JSON otherwise.
pub fn load_config_file(path: &Path) -> ScopeResult<SessionConfig> {
    let data = fs::read_to_string(path)
        .map_err(|err| ScopeError::io("failed to read config file", err))?;
    let config: SessionConfig = if is_yaml(path) {
        serde_yml::from_str(&data).map_err(|err| ScopeError::config("failed to parse yaml config", err))?
    } else {
        serde_json::from_str(&data).map_err(|err| ScopeError::config("failed to parse json config", err))?
    };
    config.validate()?;
    Ok(config)
}

pub(crate) fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"host": "10.0.0.5", "debug": true}"#).unwrap_or_default();
        assert_eq!(config.host, "10.0.0.5");
        assert!(config.debug);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.command_id_base, DEFAULT_COMMAND_ID_BASE);
        assert_eq!(config.completion_timeout(), None);
    }

    #[test]
    fn validate_rejects_zero_heartbeat() {
        let config = SessionConfig {
            heartbeat_every: 0,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_read_timeout() {
        let config = SessionConfig {
            read_timeout_ms: 0,
            ..SessionConfig::default()
        };
        let err = config.validate().err();
        assert_eq!(err.as_ref().map(|e| e.code), Some(crate::error::ErrorCode::Config));
        assert_eq!(
            err.map(|e| e.message),
            Some("read_timeout_ms must be positive".to_string())
        );
    }

    #[test]
    fn yaml_detection_is_case_insensitive() {
        assert!(is_yaml(Path::new("scope.YML")));
        assert!(is_yaml(Path::new("scope.yaml")));
        assert!(!is_yaml(Path::new("scope.json")));
    }
}
