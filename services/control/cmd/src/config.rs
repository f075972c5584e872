//! Configuration handling for the control client.
//!
//! This module reads the `services.control` section of the shared config
//! file, then applies environment variable overrides. Command-line flags
//! are applied on top by `main`.

use anyhow::Result;
use control_session::MessengerConfig;
use control_wire::DEFAULT_MAX_PACKET_SIZE;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Port the capture service listens on unless configured otherwise
pub const DEFAULT_SERVER_PORT: u16 = 14785;

/// Control client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Host name or IP of the control server
    pub server_address: String,
    /// TCP port of the control server
    pub server_port: u16,
    /// Interval between keep-alive requests
    pub keep_alive_interval: Duration,
    /// Per-request response timeout; `None` waits until disconnect
    pub request_timeout: Option<Duration>,
    /// Largest packet accepted or produced
    pub max_packet_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: DEFAULT_SERVER_PORT,
            keep_alive_interval: Duration::from_secs(5),
            request_timeout: Some(Duration::from_secs(10)),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    control: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

impl ClientConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!("Config file {:?} not found, using defaults", config_path.as_ref()),
        }

        config.apply_overrides(|key| std::env::var(key).ok());

        info!(
            "Control configuration: server={}:{}, keep_alive={}, request_timeout={}",
            config.server_address,
            config.server_port,
            humantime::format_duration(config.keep_alive_interval),
            config
                .request_timeout
                .map(|t| humantime::format_duration(t).to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        Ok(config)
    }

    /// Messenger settings derived from this configuration
    pub fn messenger_config(&self) -> MessengerConfig {
        MessengerConfig {
            keep_alive_interval: self.keep_alive_interval,
            keep_alive_initial_delay: self.keep_alive_interval,
            request_timeout: self.request_timeout,
            max_packet_size: self.max_packet_size,
        }
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(control) = root_config.services.and_then(|s| s.control) {
            self.apply_service_config(control);
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) {
        for arg in service_config.args.unwrap_or_default() {
            if let Some(server) = arg.strip_prefix("--server=") {
                self.server_address = server.to_string();
            } else if let Some(port) = arg.strip_prefix("--port=") {
                if let Ok(port) = port.parse::<u16>() {
                    self.server_port = port;
                }
            }
        }

        for (key, value) in service_config.config.unwrap_or_default() {
            match key.as_str() {
                "services.control.server_address" => self.server_address = value,
                "services.control.server_port" => {
                    if let Ok(port) = value.parse::<u16>() {
                        self.server_port = port;
                    }
                }
                "services.control.keep_alive_interval" => {
                    if let Ok(interval) = humantime::parse_duration(&value) {
                        self.keep_alive_interval = interval;
                    }
                }
                "services.control.request_timeout" => {
                    self.request_timeout = parse_optional_duration(&value).unwrap_or(self.request_timeout);
                }
                "services.control.max_packet_size" => {
                    if let Ok(size) = value.parse::<usize>() {
                        self.max_packet_size = size;
                    }
                }
                other => warn!("Ignoring unknown configuration key {}", other),
            }
        }
    }

    /// Apply overrides looked up by environment variable name
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(address) = lookup("CONTROL_SERVER_ADDRESS") {
            info!("Server address overridden by environment: {}", address);
            self.server_address = address;
        }

        if let Some(port) = lookup("CONTROL_SERVER_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.server_port = port;
                    info!("Server port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring invalid CONTROL_SERVER_PORT {:?}", port),
            }
        }

        if let Some(interval) = lookup("CONTROL_KEEP_ALIVE_INTERVAL") {
            match humantime::parse_duration(&interval) {
                Ok(interval) => {
                    self.keep_alive_interval = interval;
                    info!("Keep-alive interval overridden by environment: {:?}", interval);
                }
                Err(_) => warn!("Ignoring invalid CONTROL_KEEP_ALIVE_INTERVAL {:?}", interval),
            }
        }

        if let Some(timeout) = lookup("CONTROL_REQUEST_TIMEOUT") {
            match parse_optional_duration(&timeout) {
                Some(timeout) => {
                    self.request_timeout = timeout;
                    info!("Request timeout overridden by environment: {:?}", timeout);
                }
                None => warn!("Ignoring invalid CONTROL_REQUEST_TIMEOUT {:?}", timeout),
            }
        }
    }
}

/// Parse a duration where `none` or `0` disables the limit.
///
/// Returns `None` when the text is not a valid setting.
pub fn parse_optional_duration(value: &str) -> Option<Option<Duration>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") || value == "0" {
        return Some(None);
    }
    humantime::parse_duration(value).ok().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_address, "127.0.0.1");
        assert_eq!(config.server_port, DEFAULT_SERVER_PORT);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
services:
  control:
    enabled: true
    args:
      - --server=10.0.0.7
      - --port=15000
    config:
      services.control.keep_alive_interval: "2s"
      services.control.request_timeout: "none"
      services.control.max_packet_size: "1048576"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = ClientConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.server_address, "10.0.0.7");
        assert_eq!(config.server_port, 15000);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(2));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.max_packet_size, 1_048_576);
    }

    #[test]
    fn test_unparseable_file_falls_back_to_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"services: [unterminated").unwrap();

        let mut config = ClientConfig::default();
        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(serde_yaml::from_str::<RootConfig>(&content).is_err());

        // Overrides still apply on top of defaults
        config.apply_overrides(|_| None);
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("CONTROL_SERVER_ADDRESS", "capture.local"),
            ("CONTROL_SERVER_PORT", "not-a-port"),
            ("CONTROL_KEEP_ALIVE_INTERVAL", "750ms"),
            ("CONTROL_REQUEST_TIMEOUT", "3s"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server_address, "capture.local");
        assert_eq!(config.server_port, DEFAULT_SERVER_PORT);
        assert_eq!(config.keep_alive_interval, Duration::from_millis(750));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_parse_optional_duration() {
        assert_eq!(parse_optional_duration("none"), Some(None));
        assert_eq!(parse_optional_duration("0"), Some(None));
        assert_eq!(parse_optional_duration("1m"), Some(Some(Duration::from_secs(60))));
        assert_eq!(parse_optional_duration("soon"), None);
    }

    #[test]
    fn test_messenger_config() {
        let config = ClientConfig {
            keep_alive_interval: Duration::from_secs(3),
            ..Default::default()
        };
        let messenger = config.messenger_config();
        assert_eq!(messenger.keep_alive_interval, Duration::from_secs(3));
        assert_eq!(messenger.keep_alive_initial_delay, Duration::from_secs(3));
        assert_eq!(messenger.request_timeout, config.request_timeout);
    }
}
