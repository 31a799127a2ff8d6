//! MIDI output configuration, loaded from `~/.motet/midi.yaml`.

use serde::{Deserialize, Serialize};

/// Device preferences for the midir-backed output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidiConfig {
    /// Preferred output port name (substring match). None = first available.
    #[serde(default)]
    pub device_name: Option<String>,
    /// Create a virtual output port instead of connecting to an existing one
    /// (not available on Windows).
    #[serde(default)]
    pub virtual_port: bool,
}

impl MidiConfig {
    /// Load config from the standard path (~/.motet/midi.yaml).
    /// Returns None if the file doesn't exist (graceful fallback).
    pub fn load() -> Option<Self> {
        let home = dirs::home_dir()?;
        let path = home.join(".motet").join("midi.yaml");
        let content = std::fs::read_to_string(path).ok()?;
        serde_yaml::from_str(&content).ok()
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            virtual_port: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = MidiConfig::default();
        assert!(config.device_name.is_none());
        assert!(!config.virtual_port);
    }

    #[test]
    fn parses_partial_yaml() {
        let config: MidiConfig = serde_yaml::from_str("device_name: Loop").unwrap();
        assert_eq!(config.device_name.as_deref(), Some("Loop"));
        assert!(!config.virtual_port);
    }
}
