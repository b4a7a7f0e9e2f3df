/// Server configuration that can be tested independently
use serde::{Deserialize, Serialize};

/// Default receive buffer capacity in bytes.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Default TCP port the OTA server listens on.
pub const DEFAULT_PORT: u16 = 8032;

/// Delay between the success response and the restart, so the reply can drain.
pub const DEFAULT_RESTART_DELAY_MS: u32 = 2000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub restart_delay_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8032);
        assert_eq!(config.restart_delay_ms, 2000);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"port": 3232}"#).unwrap();
        assert_eq!(config.port, 3232);
        assert_eq!(config.restart_delay_ms, DEFAULT_RESTART_DELAY_MS);
    }

    #[test]
    fn test_server_config_serialization() {
        let config = ServerConfig {
            port: 80,
            restart_delay_ms: 500,
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }
}
