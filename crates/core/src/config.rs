//! Simulator configuration.
//!
//! ```toml
//! board = "wokwi-arduino-uno"
//! checkpoint_interval = 500000
//! log_level = "info"
//!
//! [[inputs]]
//! pin = "2"
//! value = true
//! ```
//!
//! Every field is optional; missing ones take the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pinmap::BoardType;
use crate::DEFAULT_CHECKPOINT_INTERVAL;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default = "default_board")]
    pub board: String,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// External pin levels applied whenever a machine is built.
    #[serde(default)]
    pub inputs: Vec<PinInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PinInput {
    pub pin: String,
    pub value: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            board: default_board(),
            checkpoint_interval: default_checkpoint_interval(),
            log_level: default_log_level(),
            inputs: Vec::new(),
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if BoardType::from_id(&self.board).is_none() {
            return Err(ConfigError::Invalid(format!("unknown board '{}'", self.board)));
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid("checkpoint_interval must be > 0".to_string()));
        }
        Ok(())
    }

    /// Board type named by `board`; only meaningful after [`validate`](Self::validate).
    pub fn board_type(&self) -> Option<BoardType> {
        BoardType::from_id(&self.board)
    }
}

fn default_board() -> String { BoardType::ArduinoUno.id().to_string() }
fn default_checkpoint_interval() -> u64 { DEFAULT_CHECKPOINT_INTERVAL }
fn default_log_level() -> String { "info".to_string() }

/// Load and validate configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<SimConfig, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: SimConfig = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: SimConfig = toml::from_str("").unwrap();
        assert_eq!(config, SimConfig::default());
        assert_eq!(config.checkpoint_interval, 500_000);
        assert_eq!(config.board_type(), Some(BoardType::ArduinoUno));
    }

    #[test]
    fn test_parse_inputs() {
        let toml_str = r#"
            board = "wokwi-arduino-mega"
            checkpoint_interval = 1000

            [[inputs]]
            pin = "A0"
            value = true

            [[inputs]]
            pin = "22"
            value = false
        "#;
        let config: SimConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.inputs.len(), 2);
        assert_eq!(config.inputs[0], PinInput { pin: "A0".into(), value: true });
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SimConfig { board: "wokwi-esp32".into(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        let config = SimConfig { checkpoint_interval: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "board = \"wokwi-arduino-nano\"\nlog_level = \"debug\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.board_type(), Some(BoardType::ArduinoNano));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_load_config_errors() {
        assert!(matches!(load_config("/nonexistent/avrsim.toml"), Err(ConfigError::Io(_))));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "checkpoint_interval = \"soon\"").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Toml(_))));
    }
}
