// Persistent configuration: storage layout, timing, ROM pool size, audio
// and video defaults, and panel geometry.
// Stored as JSON in <config_dir>/emubox/config.json

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::VideoSetting;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the ROM volume.
    pub mount_point: PathBuf,
    /// Cartridge directory, relative to `mount_point`.
    pub rom_dir: PathBuf,
    /// Battery save directory, relative to `mount_point`.
    pub save_dir: PathBuf,
    /// Menu redraw period.
    pub refresh_interval_ms: u64,
    /// Menu input polling period.
    pub input_poll_interval_ms: u64,
    /// Cart frame period; 0 runs carts unpaced.
    pub frame_interval_ms: u64,
    /// Upper bound on a single I2C transaction.
    pub bus_timeout_ms: u64,
    /// Largest ROM image the memory pool accepts.
    pub rom_pool_bytes: usize,
    /// Volume percentage applied at boot, clamped to 0..=100.
    pub initial_volume: i32,
    pub muted: bool,
    /// Cart scaling: "original", "fit" or "fill". The menu's Y button
    /// cycles it and writes it back.
    pub video_setting: VideoSetting,
    pub display_width: u16,
    pub display_height: u16,
    /// Rows per menu strip buffer.
    pub rows_per_buffer: u16,
    /// Log filter used when RUST_LOG is unset ("info", "emubox=debug", ...).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("/sdcard"),
            rom_dir: PathBuf::new(),
            save_dir: PathBuf::from("saves"),
            refresh_interval_ms: 16,
            input_poll_interval_ms: 50,
            frame_interval_ms: 16,
            bus_timeout_ms: 10,
            rom_pool_bytes: 4 * 1024 * 1024,
            initial_volume: 60,
            muted: false,
            video_setting: VideoSetting::Fit,
            display_width: 320,
            display_height: 240,
            rows_per_buffer: 40,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Default path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("config.json"))
    }

    /// Load from `path`. A missing file gives defaults silently; an
    /// unreadable or malformed one gives defaults with a warning.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse_json(&content).unwrap_or_else(|e| {
                log::warn!("Invalid config {}: {e}", path.display());
                Self::default()
            }),
            Err(e) => {
                log::warn!("Cannot read config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Unknown fields are ignored, missing fields get defaults.
    pub fn parse_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn to_json(&self) -> String {
        // A struct of plain fields always serializes.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, self.to_json()) {
            log::warn!("Cannot save config: {e}");
        } else {
            log::info!("Config saved to {}", path.display());
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    pub fn input_poll_interval(&self) -> Duration {
        Duration::from_millis(self.input_poll_interval_ms.max(1))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }
}

fn config_dir() -> Option<PathBuf> {
    // $XDG_CONFIG_HOME/emubox/, else ~/.config/emubox/
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("emubox"));
    }
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join("emubox"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let config = Config {
            mount_point: PathBuf::from("/mnt/roms"),
            initial_volume: 35,
            muted: true,
            video_setting: VideoSetting::Original,
            log_level: "emubox=debug".into(),
            ..Config::default()
        };
        assert_eq!(Config::parse_json(&config.to_json()).unwrap(), config);
    }

    #[test]
    fn missing_fields_get_defaults() {
        let config = Config::parse_json(r#"{ "rom_dir": "roms", "bogus": 1 }"#).unwrap();
        assert_eq!(config.rom_dir, PathBuf::from("roms"));
        assert_eq!(config.refresh_interval_ms, 16);
        assert_eq!(config.input_poll_interval_ms, 50);
        assert_eq!(config.rom_pool_bytes, 4 * 1024 * 1024);
        assert_eq!((config.display_width, config.display_height), (320, 240));
        assert_eq!(config.video_setting, VideoSetting::Fit);
    }

    #[test]
    fn video_setting_is_lowercase() {
        let config = Config::parse_json(r#"{ "video_setting": "fill" }"#).unwrap();
        assert_eq!(config.video_setting, VideoSetting::Fill);
        assert!(config.to_json().contains(r#""video_setting": "fill""#));
        assert!(Config::parse_json(r#"{ "video_setting": "zoom" }"#).is_err());
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
        assert_eq!(Config::load_from(&dir.path().join("absent.json")), Config::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let config = Config {
            bus_timeout_ms: 25,
            ..Config::default()
        };
        config.save_to(&path);
        assert_eq!(Config::load_from(&path), config);
        assert_eq!(config.bus_timeout(), Duration::from_millis(25));
    }
}
