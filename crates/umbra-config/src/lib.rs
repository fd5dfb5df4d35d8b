//! Persistent configuration for the Umbra shadow demo.
//!
//! Settings live in `config.ron` under the platform config directory. Every
//! section is `#[serde(default)]`, so partial files load; CLI flags override
//! what was loaded.

mod cli;
mod config;
mod error;

pub use cli::{CliArgs, parse_technique};
pub use config::{CONFIG_FILE_NAME, Config, DebugConfig, LightConfig, SceneConfig, ViewerConfig, default_config_dir};
pub use error::ConfigError;
