//! The per-build configuration record.
//!
//! Everything the firmware would bake in at link time is one serde value
//! here: the integrator loads or constructs it and wires subsystems up from
//! it. No runtime CLI exists.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::{fs, io};

/// AEAD suite selection. Alternates are build-time substitutions that
/// behave identically from the caller's perspective; hosted builds run
/// ChaCha20-Poly1305 regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    #[default]
    ChaCha20Poly1305,
    Ascon128,
    Ascon128a,
    Ascon80pq,
    Xoodyak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickSource {
    /// The runner drives itself via `start_auto_iterate`.
    Internal,
    /// The integrator calls `tick` explicitly.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogSettings {
    pub timeout_ms: u64,
    pub warning_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfuseConfig {
    pub device_id: u64,
    pub device_name: String,
    /// Mask of logger instances enabled in this build.
    pub enabled_loggers: u8,
    pub aead: AeadAlgorithm,
    pub watchdog: WatchdogSettings,
    pub tick_source: TickSource,
}

impl Default for InfuseConfig {
    fn default() -> Self {
        InfuseConfig {
            device_id: 0,
            device_name: "infuse-device".to_string(),
            enabled_loggers: 0xff,
            aead: AeadAlgorithm::default(),
            watchdog: WatchdogSettings {
                timeout_ms: 10_000,
                warning_ms: 2_000,
            },
            tick_source: TickSource::Internal,
        }
    }
}

pub fn load_config(config_dir: &Path) -> InfuseConfig {
    let config_path = config_dir.join("infuse.json");
    fs::read_to_string(config_path)
        .ok()
        .and_then(|data| serde_json::from_str::<InfuseConfig>(&data).ok())
        .unwrap_or_default()
}

pub fn save_config(config_dir: &Path, config: &InfuseConfig) -> io::Result<()> {
    let config_path = config_dir.join("infuse.json");
    let data = serde_json::to_string_pretty(config)?;
    let mut file = fs::File::create(config_path)?;
    file.write_all(data.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = InfuseConfig::default();
        config.device_id = 0x42;
        config.tick_source = TickSource::External;
        save_config(dir.path(), &config).unwrap();
        assert_eq!(load_config(dir.path()), config);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config(dir.path()), InfuseConfig::default());
    }
}
