use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;

/// Default packet length, in bytes
pub const DEFAULT_PACKET_LENGTH: u16 = 50;
/// Default source address (172.16.0.1)
pub const DEFAULT_SOURCE: Ipv4Addr = Ipv4Addr::new(172, 16, 0, 1);
/// Default destination address (172.16.0.2)
pub const DEFAULT_DESTINATION: Ipv4Addr = Ipv4Addr::new(172, 16, 0, 2);
/// Default maximum number of clones handed to the host and not yet released
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;
/// Default raw socket buffer size
pub const DEFAULT_SOCKET_BUFFER: usize = 4096;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read the configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("ill-formed configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The fixed parameters of a generation run.
///
/// Every field is optional in the TOML file and falls back to its default:
///
/// ```toml
/// packet_length = 50
/// source = "172.16.0.1"
/// destination = "172.16.0.2"
/// max_in_flight = 1024
/// socket_buffer = 4096
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Written verbatim in the IPv4 total length field. Not checked against the header size.
    pub packet_length: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// Clones beyond this count cannot be created until the host releases some
    pub max_in_flight: usize,
    pub socket_buffer: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            packet_length: DEFAULT_PACKET_LENGTH,
            source: DEFAULT_SOURCE,
            destination: DEFAULT_DESTINATION,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            socket_buffer: DEFAULT_SOCKET_BUFFER,
        }
    }
}

impl GeneratorConfig {
    /// Load and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path)?;
        import_config(&config_str)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.socket_buffer == 0 {
            return Err(ConfigError::Invalid(
                "socket_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a TOML configuration. Missing fields take their default value.
pub fn import_config(config_str: &str) -> Result<GeneratorConfig, ConfigError> {
    let config: GeneratorConfig = toml::from_str(config_str)?;
    config.validate()?;
    log::trace!("Configuration: {config:?}");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = import_config("").unwrap();
        assert_eq!(config, GeneratorConfig::default());
        assert_eq!(config.packet_length, 50);
        assert_eq!(config.source, Ipv4Addr::new(172, 16, 0, 1));
        assert_eq!(config.destination, Ipv4Addr::new(172, 16, 0, 2));
    }

    #[test]
    fn test_config() {
        let config = import_config(
            r#"
packet_length = 1500
source = "10.10.1.1"
destination = "10.10.1.2"
max_in_flight = 8
"#,
        )
        .unwrap();
        assert_eq!(config.packet_length, 1500);
        assert_eq!(config.source, Ipv4Addr::new(10, 10, 1, 1));
        assert_eq!(config.destination, Ipv4Addr::new(10, 10, 1, 2));
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.socket_buffer, DEFAULT_SOCKET_BUFFER);
    }

    #[test]
    fn test_short_packet_length_is_accepted() {
        let config = import_config("packet_length = 4").unwrap();
        assert_eq!(config.packet_length, 4);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            import_config("max_in_flight = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            import_config("source = \"not an address\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            import_config("rate = 10"),
            Err(ConfigError::Parse(_))
        ));
    }
}
