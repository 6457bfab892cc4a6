//! Daemon configuration file

use std::path::{Path, PathBuf};
use std::time::Duration;

use mdlive_core::RenderOptions;
use mdlive_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    Read {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    Parse {
        config_path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub parser: ParserConfig,
    pub websocket: WebSocketConfig,
    pub sessions: SessionConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub max_content_size: usize,
    pub gfm: bool,
    /// Line diffs needing a larger LCS table are reported as a full replacement
    pub max_diff_cells: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_content_size: mdlive_core::render::DEFAULT_MAX_CONTENT_SIZE,
            gfm: true,
            max_diff_cells: mdlive_core::DEFAULT_MAX_DIFF_CELLS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub max_connections: usize,
    pub max_message_size: usize,
    /// Outbound frames buffered per connection
    pub send_buffer: usize,
    pub ping_period_secs: u64,
    pub pong_wait_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_message_size: 512 * 1024,
            send_buffer: 256,
            ping_period_secs: 54,
            pong_wait_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Document sessions unused for this long are dropped
    pub idle_timeout_secs: u64,
    pub gc_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            gc_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics endpoint port; disabled when unset
    pub port: Option<u16>,
}

impl Config {
    /// Load a config file; a missing file yields the defaults
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            config_path: config_path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            config_path: config_path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws = &self.websocket;
        if ws.max_connections == 0 {
            return Err(ConfigError::Invalid("websocket.max_connections must be at least 1".into()));
        }
        if ws.send_buffer == 0 {
            return Err(ConfigError::Invalid("websocket.send_buffer must be at least 1".into()));
        }
        if ws.ping_period_secs == 0 || ws.ping_period_secs >= ws.pong_wait_secs {
            return Err(ConfigError::Invalid(format!(
                "websocket.ping_period_secs ({}) must be positive and below pong_wait_secs ({})",
                ws.ping_period_secs, ws.pong_wait_secs
            )));
        }
        if self.sessions.gc_interval_secs == 0 {
            return Err(ConfigError::Invalid("sessions.gc_interval_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            max_content_size: self.parser.max_content_size,
            gfm: self.parser.gfm,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            max_message_size: self.websocket.max_message_size,
            send_buffer: self.websocket.send_buffer,
            ping_period: Duration::from_secs(self.websocket.ping_period_secs),
            pong_wait: Duration::from_secs(self.websocket.pong_wait_secs),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions.idle_timeout_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.gc_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("mdlive.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from_path(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.parser.max_content_size, 1024 * 1024);
        assert_eq!(config.parser.max_diff_cells, 4 * 1024 * 1024);
        assert_eq!(config.websocket.max_connections, 1000);
        assert_eq!(config.websocket.max_message_size, 512 * 1024);
        assert!(config.metrics.port.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"
[server]
port = 9000

[parser]
max_diff_cells = 1000

[websocket]
send_buffer = 8

[metrics]
port = 9100
"#,
        );

        let config = Config::load_from_path(path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.parser.max_diff_cells, 1000);
        assert!(config.parser.gfm);
        assert_eq!(config.websocket.send_buffer, 8);
        assert_eq!(config.websocket.pong_wait_secs, 60);
        assert_eq!(config.metrics.port, Some(9100));

        let transport = config.transport();
        assert_eq!(transport.ping_period, Duration::from_secs(54));
        assert_eq!(transport.send_buffer, 8);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();

        let path = write(&dir, "[websocket]\nping_period_secs = 60\npong_wait_secs = 30\n");
        assert!(matches!(Config::load_from_path(path), Err(ConfigError::Invalid(_))));

        let path = write(&dir, "[websocket]\nsend_buffer = 0\n");
        assert!(matches!(Config::load_from_path(path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "[server\nport = ");

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("mdlive.toml"));
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/mdlive.toml");
        assert_eq!(Config::load_from_path(path).unwrap(), Config::default());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut original = Config::default();
        original.metrics.port = Some(9100);

        let toml_str = toml::to_string(&original).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(original, deserialized);
    }
}
