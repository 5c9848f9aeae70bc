/*!
 * Engine Settings
 *
 * Plain configuration structures supplied once when a runtime is built.
 * Timeouts are milliseconds, negative values mean "no limit".
 */

use crate::core::limits::*;
use crate::core::{ConfigError, TimeoutMs};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Address family of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamily {
    #[default]
    Unspec,
    Inet,
    Inet6,
}

/// Transport used by a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    #[default]
    Tcp,
    Udp,
}

/// Network parameters for client targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointParams {
    pub address_family: AddressFamily,
    pub max_connections: usize,
    pub connect_timeout: TimeoutMs,
    pub response_timeout: TimeoutMs,
}

impl Default for EndpointParams {
    fn default() -> Self {
        Self {
            address_family: AddressFamily::Unspec,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_MS,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT_MS,
        }
    }
}

/// Server parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerParams {
    pub transport_type: TransportType,
    pub max_connections: usize,
    /// Timeout of each read or write operation
    pub peer_response_timeout: TimeoutMs,
    /// Timeout of receiving one whole request
    pub receive_timeout: TimeoutMs,
    pub keep_alive_timeout: TimeoutMs,
    pub request_size_limit: usize,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self {
            transport_type: TransportType::Tcp,
            max_connections: DEFAULT_SERVER_MAX_CONNECTIONS,
            peer_response_timeout: DEFAULT_PEER_RESPONSE_TIMEOUT_MS,
            receive_timeout: -1,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT_MS,
            request_size_limit: usize::MAX,
        }
    }
}

impl ServerParams {
    /// Per-operation timeout a service applies to its connections
    pub fn effective_response_timeout(&self) -> TimeoutMs {
        let peer = self.peer_response_timeout;
        if self.receive_timeout >= 0 && (peer < 0 || peer > self.receive_timeout) {
            self.receive_timeout
        } else {
            peer
        }
    }
}

/// Process-wide engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub endpoint_params: EndpointParams,
    pub dns_server_params: EndpointParams,
    /// Seconds a resolved address stays valid after success
    pub dns_ttl_default: u32,
    /// Seconds a resolved address stays valid after failure
    pub dns_ttl_min: u32,
    pub dns_threads: usize,
    pub poller_threads: usize,
    pub handler_threads: usize,
    /// Negative selects the CPU count
    pub compute_threads: i32,
    pub fio_max_events: usize,
    pub resolv_conf_path: String,
    pub hosts_path: String,
    pub max_open_files: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            endpoint_params: EndpointParams::default(),
            dns_server_params: EndpointParams::default(),
            dns_ttl_default: 3600,
            dns_ttl_min: 60,
            dns_threads: 4,
            poller_threads: 1,
            handler_threads: 1,
            compute_threads: -1,
            fio_max_events: 4096,
            resolv_conf_path: "/etc/resolv.conf".into(),
            hosts_path: "/etc/hosts".into(),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }
}

impl GlobalSettings {
    /// Load settings from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.as_ref().display(), e)))?;
        let settings: Self =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overlaid with FLOWKERNEL_* environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(v) = env_number::<usize>("FLOWKERNEL_POLLER_THREADS")? {
            settings.poller_threads = v;
        }
        if let Some(v) = env_number::<usize>("FLOWKERNEL_HANDLER_THREADS")? {
            settings.handler_threads = v;
        }
        if let Some(v) = env_number::<i32>("FLOWKERNEL_COMPUTE_THREADS")? {
            settings.compute_threads = v;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller_threads == 0 {
            return Err(invalid("poller_threads", "must be at least 1"));
        }
        if self.handler_threads == 0 {
            return Err(invalid("handler_threads", "must be at least 1"));
        }
        if self.compute_threads == 0 {
            return Err(invalid("compute_threads", "use a negative value for auto-detect"));
        }
        if self.max_open_files == 0 {
            return Err(invalid("max_open_files", "must be positive"));
        }
        if self.dns_ttl_min > self.dns_ttl_default {
            return Err(invalid("dns_ttl_min", "must not exceed dns_ttl_default"));
        }
        Ok(())
    }

    /// Compute threads with auto-detection applied
    pub fn resolved_compute_threads(&self) -> usize {
        if self.compute_threads > 0 {
            self.compute_threads as usize
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(key, &format!("'{}' is not a number", raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = GlobalSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.endpoint_params.max_connections, 200);
        assert_eq!(settings.poller_threads, 1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"handler_threads": 6, "endpoint_params": {{"max_connections": 3}}}}"#)
            .unwrap();

        let settings = GlobalSettings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.handler_threads, 6);
        assert_eq!(settings.endpoint_params.max_connections, 3);
        assert_eq!(settings.endpoint_params.connect_timeout, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(settings.dns_ttl_default, 3600);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = GlobalSettings {
            poller_threads: 0,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "poller_threads"
        ));
    }

    #[test]
    fn test_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            GlobalSettings::from_json_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_compute_threads_autodetect() {
        let settings = GlobalSettings::default();
        assert!(settings.resolved_compute_threads() >= 1);
        let fixed = GlobalSettings {
            compute_threads: 3,
            ..Default::default()
        };
        assert_eq!(fixed.resolved_compute_threads(), 3);
    }

    #[test]
    fn test_server_effective_timeout() {
        let params = ServerParams {
            peer_response_timeout: 10_000,
            receive_timeout: 2_000,
            ..Default::default()
        };
        assert_eq!(params.effective_response_timeout(), 2_000);
        assert_eq!(ServerParams::default().effective_response_timeout(), 10_000);
    }
}
