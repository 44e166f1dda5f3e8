//! Settings loader for `<config_dir>/cadence/config.toml`

use std::path::{Path, PathBuf};

use super::types::Settings;
use cadence_core::prelude::*;

const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "cadence";

/// Environment variable that overrides `connection.url`.
pub const URL_ENV_VAR: &str = "CADENCE_URL";

/// Default config location: `<config_dir>/cadence/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILENAME))
}

/// Load settings from `config_path`.
///
/// Returns default settings if the file doesn't exist, can't be parsed,
/// or holds out-of-range values.
pub fn load_settings(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str::<Settings>(&content) {
            Ok(settings) => match settings.validate() {
                Ok(()) => {
                    debug!("Loaded settings from {:?}", config_path);
                    settings
                }
                Err(e) => {
                    warn!("Ignoring {:?}: {}", config_path, e);
                    Settings::default()
                }
            },
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Apply environment overrides on top of file settings.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(url) = std::env::var(URL_ENV_VAR) {
        if !url.is_empty() {
            debug!("Using {} from environment", URL_ENV_VAR);
            settings.connection.url = Some(url);
        }
    }
}

/// Write a commented default config to `config_path` unless one exists.
pub fn init_config_file(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        return Ok(());
    }

    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::config(format!("Failed to create {:?}: {}", dir, e)))?;
    }

    std::fs::write(config_path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {:?}", config_path))?;

    info!("Wrote default settings to {:?}", config_path);
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# cadence configuration

[connection]
# url = "ws://127.0.0.1:7780/ws"
handshake_timeout_ms = 10000
initial_backoff_ms = 500
max_backoff_ms = 30000
backoff_jitter = 0.2
# max_reconnect_attempts = 10   # absent = retry forever

[invoke]
timeout_ms = 30000
"#;
