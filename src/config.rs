use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_MAPPINGS_DIR: &str = "mappings";
pub const DEFAULT_MAPPINGS_SUFFIX: &str = "_mapping.json";

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_id: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub service_description: Option<String>,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub authentication_enabled: bool,
    #[serde(default)]
    pub default_token: Option<String>,
    #[serde(default = "default_mappings_dir")]
    pub mappings_dir: String,
    #[serde(default = "default_mappings_suffix")]
    pub mappings_suffix: String,
    #[serde(default = "default_handle_prefix")]
    pub handle_prefix: String,
    #[serde(
        default = "default_backend_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub backend_timeout: Duration,
    #[serde(default = "default_max_stream_bytes")]
    pub max_stream_bytes: usize,
    #[serde(
        default = "default_drain_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub drain_timeout: Duration,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8880
}

fn default_mappings_dir() -> String {
    DEFAULT_MAPPINGS_DIR.to_string()
}

fn default_mappings_suffix() -> String {
    DEFAULT_MAPPINGS_SUFFIX.to_string()
}

fn default_handle_prefix() -> String {
    "123456".to_string()
}

const fn default_backend_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_stream_bytes() -> usize {
    64 * 1024
}

const fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

impl ServiceConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::with_name("config/turnstone").required(false))
            .add_source(Environment::with_prefix("TURNSTONE").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("TURNSTONE").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check field-level constraints, collecting every problem before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.service_id.trim().is_empty() {
            errors.push("error[service_id]: must not be blank".to_string());
        }
        if self.listen_address.parse::<IpAddr>().is_err() {
            errors.push(format!(
                "error[listen_address]: `{}` is not a valid IP address",
                self.listen_address
            ));
        }
        if self.mappings_suffix.is_empty() {
            errors.push("error[mappings_suffix]: must not be empty".to_string());
        }
        if self.handle_prefix.trim().is_empty() {
            errors.push("error[handle_prefix]: must not be blank".to_string());
        }
        if self.max_stream_bytes == 0 {
            errors.push("error[max_stream_bytes]: must be greater than zero".to_string());
        }
        if self.backend_timeout.is_zero() {
            errors.push("error[backend_timeout]: must be greater than zero".to_string());
        }
        if self.drain_timeout.is_zero() {
            errors.push("error[drain_timeout]: must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Message(errors.join("; ")))
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.listen_address, self.port).parse()
    }
}
