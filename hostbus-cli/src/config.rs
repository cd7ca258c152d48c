//! Gateway configuration file
//!
//! Example:
//!
//! ```toml
//! # Wake up at least every 500ms even without incoming data
//! idle_timeout_ms = 500
//!
//! [can]
//! interface = "can0"
//! max_tx_frames = 1000
//!
//! [zeromq]
//! endpoint_in = "tcp://*:8212"
//! endpoint_out = "tcp://*:8211"
//! mode = "pub-pull"
//! max_queue_size = 1000
//! overflow_policy = "drop-newest"
//! ```
//!
//! Every field is optional.
use std::{path::Path, time::Duration};

use hostbus_connector::{
    common::{OverflowPolicy, DEFAULT_MAX_QUEUE_SIZE},
    zeromq::{Mode, PubSubConfig, DEFAULT_POLL_TIMEOUT},
    BusConnectorConfig,
};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

/// Error returned when loading a gateway configuration file
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The file could not be read
    #[snafu(display("IO error loading {path}: {source:?}"))]
    Io {
        /// Path of the file
        path: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// The file is not valid TOML, or has unexpected contents
    #[snafu(display("Error parsing TOML: {source}"))]
    TomlDeserialization {
        /// Underlying error
        source: toml::de::Error,
    },
}

/// Socket arrangement, as written in config files and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModeSetting {
    /// Connect SUB and PUSH sockets
    SubPush,
    /// Bind PULL and PUB sockets
    PubPull,
}

impl From<ModeSetting> for Mode {
    fn from(value: ModeSetting) -> Self {
        match value {
            ModeSetting::SubPush => Mode::SubPush,
            ModeSetting::PubPull => Mode::PubPull,
        }
    }
}

/// Queue overflow policy, as written in config files and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicySetting {
    /// Discard packets arriving at a full queue
    #[default]
    DropNewest,
    /// Evict the oldest queued packet
    DropOldest,
}

impl From<PolicySetting> for OverflowPolicy {
    fn from(value: PolicySetting) -> Self {
        match value {
            PolicySetting::DropNewest => OverflowPolicy::DropNewest,
            PolicySetting::DropOldest => OverflowPolicy::DropOldest,
        }
    }
}

/// The `[can]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CanSection {
    /// Name of the socketcan interface
    pub interface: String,
    /// Capacity of the received packet queue
    pub max_queue_size: usize,
    /// Capacity of the transmit frame queue
    pub max_tx_frames: usize,
    /// Overflow policy of the received packet queue
    pub overflow_policy: PolicySetting,
}

impl Default for CanSection {
    fn default() -> Self {
        Self {
            interface: "can0".into(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_tx_frames: DEFAULT_MAX_QUEUE_SIZE,
            overflow_policy: PolicySetting::default(),
        }
    }
}

impl CanSection {
    /// Build the connector configuration
    pub fn connector_config(&self) -> BusConnectorConfig {
        BusConnectorConfig {
            max_queue_size: self.max_queue_size,
            overflow_policy: self.overflow_policy.into(),
            max_tx_frames: self.max_tx_frames,
            ..Default::default()
        }
    }
}

/// The `[zeromq]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ZeromqSection {
    /// Endpoint packets are received from
    pub endpoint_in: String,
    /// Endpoint packets are published to
    pub endpoint_out: String,
    /// Socket arrangement
    pub mode: ModeSetting,
    /// Capacity of the received packet queue
    pub max_queue_size: usize,
    /// Overflow policy of the received packet queue
    pub overflow_policy: PolicySetting,
    /// Interval at which the reader thread checks for shutdown
    pub poll_timeout_ms: u64,
}

impl Default for ZeromqSection {
    fn default() -> Self {
        Self {
            endpoint_in: "tcp://*:8212".into(),
            endpoint_out: "tcp://*:8211".into(),
            mode: ModeSetting::PubPull,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            overflow_policy: PolicySetting::default(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ZeromqSection {
    /// Build the connector configuration
    pub fn connector_config(&self) -> PubSubConfig {
        let mut config =
            PubSubConfig::new(&self.endpoint_in, &self.endpoint_out, self.mode.into());
        config.max_queue_size = self.max_queue_size;
        config.overflow_policy = self.overflow_policy.into();
        config.poll_timeout = Duration::from_millis(self.poll_timeout_ms);
        config
    }
}

/// Configuration of the `hostbus-gateway` binary
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    /// If set, the gateway polls its connectors at least this often
    pub idle_timeout_ms: Option<u64>,
    /// CAN side
    pub can: CanSection,
    /// ZeroMQ side
    pub zeromq: ZeromqSection,
}

impl GatewayConfig {
    /// Read a configuration from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<GatewayConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(IoSnafu {
            path: path.to_string_lossy(),
        })?;
        Self::load_from_str(&content)
    }

    /// Read a configuration from a string
    pub fn load_from_str(s: &str) -> Result<GatewayConfig, ConfigError> {
        toml::from_str(s).context(TomlDeserializationSnafu)
    }

    /// The idle timeout, if any
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::load_from_str("").unwrap();
        assert_eq!(GatewayConfig::default(), config);
        assert_eq!("tcp://*:8211", config.zeromq.endpoint_out);
        assert_eq!("tcp://*:8212", config.zeromq.endpoint_in);
        assert_eq!(ModeSetting::PubPull, config.zeromq.mode);
        assert_eq!(None, config.idle_timeout());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            idle_timeout_ms = 250

            [can]
            interface = "vcan0"
            max_queue_size = 10
            max_tx_frames = 64
            overflow_policy = "drop-oldest"

            [zeromq]
            endpoint_in = "tcp://localhost:9000"
            endpoint_out = "tcp://localhost:9001"
            mode = "sub-push"
            max_queue_size = 20
            poll_timeout_ms = 50
        "#;
        let config = GatewayConfig::load_from_str(toml).unwrap();
        assert_eq!(Some(Duration::from_millis(250)), config.idle_timeout());

        let can = config.can.connector_config();
        assert_eq!("vcan0", config.can.interface);
        assert_eq!(10, can.max_queue_size);
        assert_eq!(64, can.max_tx_frames);
        assert_eq!(OverflowPolicy::DropOldest, can.overflow_policy);

        let zmq = config.zeromq.connector_config();
        assert_eq!("tcp://localhost:9000", zmq.endpoint_in);
        assert_eq!("tcp://localhost:9001", zmq.endpoint_out);
        assert_eq!(Mode::SubPush, zmq.mode);
        assert_eq!(20, zmq.max_queue_size);
        assert_eq!(OverflowPolicy::DropNewest, zmq.overflow_policy);
        assert_eq!(Duration::from_millis(50), zmq.poll_timeout);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = GatewayConfig::load_from_str("[can]\nbitrate = 500000\n");
        assert!(matches!(
            result,
            Err(ConfigError::TomlDeserialization { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[zeromq]\nmode = \"sub-push\"").unwrap();
        let config = GatewayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(ModeSetting::SubPush, config.zeromq.mode);
        assert_eq!("can0", config.can.interface);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = GatewayConfig::load_from_file(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
