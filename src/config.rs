// Local settings: the card address and the per-request timeout.
//
// Stored as TOML under the platform config directory, e.g.
// ~/.config/bulk-notify/settings.toml on Linux.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const APP_NAME: &str = "bulk-notify";
const SETTINGS_FILE: &str = "settings.toml";
const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device_ip: Option<Ipv4Addr>,
    pub request_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            device_ip: None,
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join(SETTINGS_FILE)
    }

    /// Read settings from `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let settings = Settings {
            device_ip: Some(Ipv4Addr::new(172, 16, 199, 10)),
            request_timeout_ms: 1500,
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "device_ip = \"10.1.2.3\"\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.device_ip, Some(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(settings.request_timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "device_ip = [").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse(_))));
    }
}
