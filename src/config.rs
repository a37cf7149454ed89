//! Configuration loading: environment variables merged with an optional
//! `KEY=VALUE` file (A1).
//!
//! The file format matches the original system's config file exactly: one
//! `KEY=VALUE` pair per line, blank lines and lines starting with `#`
//! ignored, leading/trailing whitespace trimmed from both key and value.
//! Environment variables always win over the file, mirroring
//! [`figment::providers::Env`]'s usual precedence when merged last.

use std::path::Path;

use figment::value::{Dict, Map, Value};
use figment::{Error as FigmentError, Figment, Metadata, Profile, Provider};
use serde::Deserialize;

use crate::error::InitError;

/// Default TCP bind address.
pub const DEFAULT_SERVER_IP: &str = "0.0.0.0";
/// Default TCP bind port.
pub const DEFAULT_SERVER_PORT: u16 = 9218;

/// Broker connectivity shared by both processes.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Comma-separated Kafka bootstrap servers.
    #[serde(rename = "KAFKA_BOOTSTRAP_SERVERS")]
    pub bootstrap_servers: String,
    /// SASL_SSL username, if the cluster requires authentication.
    #[serde(rename = "KAFKA_USERNAME", default)]
    pub username: Option<String>,
    /// SASL_SSL password, if the cluster requires authentication.
    #[serde(rename = "KAFKA_PASSWORD", default)]
    pub password: Option<String>,
    /// Topic carrying gateway-to-order traffic.
    #[serde(rename = "GATEWAY_TO_ORDER_TOPIC")]
    pub gateway_to_order_topic: String,
    /// Topic carrying order-to-gateway traffic.
    #[serde(rename = "ORDER_TO_GATEWAY_TOPIC")]
    pub order_to_gateway_topic: String,
}

/// Gateway process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// TCP bind address.
    #[serde(rename = "GATEWAY_SERVER_IP", default = "default_server_ip")]
    pub server_ip: String,
    /// TCP bind port.
    #[serde(rename = "GATEWAY_SERVER_PORT", default = "default_server_port")]
    pub server_port: u16,
    /// Optional warm-restart identifier for the connection table snapshot.
    #[serde(rename = "SOCKET_SHM_KEY", default)]
    pub socket_shm_key: Option<String>,
    /// Kafka consumer group id for `order→gateway`.
    #[serde(rename = "GATEWAY_KAFKA_CONSUMER_GROUP_ID")]
    pub consumer_group_id: String,
    /// Broker connectivity.
    #[serde(flatten)]
    pub broker: BrokerConfig,
}

/// Order service process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfig {
    /// Kafka consumer group id for `gateway→order`.
    #[serde(rename = "ORDER_KAFKA_CONSUMER_GROUP_ID")]
    pub consumer_group_id: String,
    /// Whether an account with no session-table entry is approved on first
    /// login instead of rejected. Defaults to strict (`false`).
    #[serde(rename = "ORDER_PERMISSIVE_LOGIN", default)]
    pub permissive_login: bool,
    /// Topic receiving accepted orders for the matching engine. Only the
    /// order service produces here, so this lives on `OrderConfig` rather
    /// than the shared `BrokerConfig` the gateway also uses (§6); a
    /// gateway-only environment has no reason to set it.
    #[serde(rename = "MATCHING_ENGINE_TOPIC")]
    pub matching_engine_topic: String,
    /// Broker connectivity.
    #[serde(flatten)]
    pub broker: BrokerConfig,
}

fn default_server_ip() -> String {
    DEFAULT_SERVER_IP.to_owned()
}

const fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

/// A [`Provider`] that parses the original `KEY=VALUE` config file grammar.
#[derive(Debug, Clone)]
pub struct KeyValueFile {
    path: std::path::PathBuf,
}

impl KeyValueFile {
    /// Reference a config file at `path`. The file is read lazily when the
    /// provider is merged into a [`Figment`].
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn parse(contents: &str) -> Dict {
        let mut dict = Dict::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_owned();
            let value = value.trim().to_owned();
            dict.insert(key, Value::from(value));
        }
        dict
    }
}

impl Provider for KeyValueFile {
    fn metadata(&self) -> Metadata {
        Metadata::named("key=value config file").source(figment::Source::File(self.path.clone()))
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(FigmentError::from(err.to_string())),
        };
        let dict = Self::parse(&contents);
        Ok(Map::from([(Profile::default(), dict)]))
    }
}

fn load<T: for<'de> Deserialize<'de>>(config_file: Option<&Path>) -> Result<T, InitError> {
    let mut figment = Figment::new();
    if let Some(path) = config_file {
        figment = figment.merge(KeyValueFile::new(path));
    }
    figment = figment.merge(figment::providers::Env::raw());
    figment
        .extract()
        .map_err(|err| InitError::ConfigMissing(err.to_string()))
}

/// Load the gateway configuration from an optional file merged under the
/// process environment.
///
/// # Errors
/// Returns [`InitError::ConfigMissing`] if a required key is absent or a
/// value fails to parse.
pub fn load_gateway_config(config_file: Option<&Path>) -> Result<GatewayConfig, InitError> {
    load(config_file)
}

/// Load the order service configuration from an optional file merged under
/// the process environment.
///
/// # Errors
/// Returns [`InitError::ConfigMissing`] if a required key is absent or a
/// value fails to parse.
pub fn load_order_config(config_file: Option<&Path>) -> Result<OrderConfig, InitError> {
    load(config_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines_and_skips_comments_and_blanks() {
        let dict = KeyValueFile::parse(
            "# comment\n\nGATEWAY_SERVER_IP=127.0.0.1\n  GATEWAY_SERVER_PORT = 9218 \n",
        );
        assert_eq!(
            dict.get("GATEWAY_SERVER_IP").and_then(Value::as_str),
            Some("127.0.0.1")
        );
        assert_eq!(
            dict.get("GATEWAY_SERVER_PORT").and_then(Value::as_str),
            Some("9218")
        );
    }

    #[test]
    fn missing_file_yields_an_empty_layer_rather_than_an_error() {
        let provider = KeyValueFile::new("/nonexistent/path/to/config");
        let data = provider.data().expect("missing file is not an error");
        assert!(data.get(&Profile::default()).is_some_or(Dict::is_empty));
    }
}
