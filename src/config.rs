//! Node configuration, loaded from a toml file.
//!
//! Every section is optional, missing values fall back to their defaults. A minimal file only
//! needs the node address:
//!
//! ```toml
//! address = 1
//!
//! [transport]
//! kind = "serial"
//! device = "/dev/ttyUSB0"
//! ```

use core::fmt;
use std::{io, net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{address::Address, packet::ARMORED_MESSAGE_HEADER_LEN};

/// Default radio configuration: 434.92 MHz, 5 dBm, 125 kHz bandwidth, spreading factor 12,
/// coding rate 4/8, CRC on, explicit header, no hopping, 3000 ms receive timeout, 8 byte user
/// data length and 8 symbol preamble.
pub const DEFAULT_RADIO_CONFIGURATION: &str = "434920000,5,6,12,4,1,0,0,0,0,3000,8,8";

/// Full configuration of a node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Address of this node, must not be the broadcast address.
    pub address: Address,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl NodeConfig {
    /// Create a `NodeConfig` for `address` with default settings.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            transport: TransportConfig::default(),
            radio: RadioConfig::default(),
            routing: RoutingConfig::default(),
        }
    }

    /// Load and validate a `NodeConfig` from the toml file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse and validate a `NodeConfig` from toml text.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values which can be deserialized, but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_broadcast() {
            return Err(ConfigError::Invalid(
                "the broadcast address can't be used as node address",
            ));
        }
        self.radio.validate()?;
        self.routing.validate()
    }
}

/// How the radio module is reached.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// A serial device node. The line settings (baud rate and the like) must already be applied
    /// to the device.
    Serial { device: PathBuf },
    /// A TCP socket bridged to the serial line of the module.
    Tcp { address: SocketAddr },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Serial {
            device: PathBuf::from("/dev/ttyUSB0"),
        }
    }
}

/// Settings of the radio module and the pacing of commands sent to it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RadioConfig {
    /// Parameters of the `AT+CFG` command.
    pub configuration: String,
    /// Pause between consecutive commands, in milliseconds.
    pub pause_ms: u64,
    /// Longest line sent in a single radio frame. Longer lines are split.
    pub max_message_length: usize,
    /// Time to wait for the module to answer a command, in milliseconds.
    pub response_timeout_ms: u64,
}

impl RadioConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Longest message payload which still fits in a single radio frame. This is 0 if the frame
    /// can't even hold a message header.
    pub fn max_payload_length(&self) -> usize {
        self.max_message_length
            .saturating_sub(ARMORED_MESSAGE_HEADER_LEN)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_length <= ARMORED_MESSAGE_HEADER_LEN {
            return Err(ConfigError::Invalid(
                "max_message_length must leave room for a message header",
            ));
        }
        Ok(())
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            configuration: DEFAULT_RADIO_CONFIGURATION.to_string(),
            pause_ms: 500,
            max_message_length: 250,
            response_timeout_ms: 10_000,
        }
    }
}

/// Timers and limits of the routing engine.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Time to wait for a route reply before a discovery fails, in milliseconds. The request is
    /// rebroadcast 3 times in this period.
    pub route_wait_time_ms: u64,
    /// Time to wait for an ACK of a single transmission, in milliseconds.
    pub ack_timeout_ms: u64,
    /// Amount of transmissions of a packet before giving up on an ACK.
    pub ack_retries: usize,
    /// Maximum amount of times a route request is rebroadcast.
    pub rreq_ttl: u8,
    /// Upper bound of the random delay before rebroadcasting a route request, in milliseconds.
    pub forward_jitter_ms: u64,
}

impl RoutingConfig {
    pub fn route_wait_time(&self) -> Duration {
        Duration::from_millis(self.route_wait_time_ms)
    }

    /// Interval between rebroadcasts of a pending route request.
    pub fn rreq_retry_interval(&self) -> Duration {
        self.route_wait_time() / 3
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn forward_jitter(&self) -> Duration {
        Duration::from_millis(self.forward_jitter_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_retries == 0 {
            return Err(ConfigError::Invalid("ack_retries must be at least 1"));
        }
        if self.route_wait_time_ms < 3 {
            return Err(ConfigError::Invalid("route_wait_time_ms is too short"));
        }
        Ok(())
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            route_wait_time_ms: 60_000,
            ack_timeout_ms: 5_000,
            ack_retries: 3,
            rreq_ttl: 10,
            forward_jitter_ms: 1_000,
        }
    }
}

/// Error returned when a configuration can't be loaded.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(io::Error),
    /// The file is not valid toml, or does not match the expected structure.
    Parse(toml::de::Error),
    /// A value is out of range.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "could not read config file: {e}"),
            ConfigError::Parse(e) => write!(f, "could not parse config file: {e}"),
            ConfigError::Invalid(reason) => write!(f, "invalid config: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Parse(value)
    }
}
