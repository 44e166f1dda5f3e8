//! Configuration file parsing for cadence
//!
//! Supports:
//! - `<config_dir>/cadence/config.toml` - Connection and invoke settings
//! - `CADENCE_URL` - Environment override for the backend URL

pub mod settings;
pub mod types;

pub use settings::{
    apply_env_overrides, default_config_path, init_config_file, load_settings, URL_ENV_VAR,
};
pub use types::*;
