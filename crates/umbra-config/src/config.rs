//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};
use umbra_math::Aabb;
use umbra_shadow::{LightCamera, ShadowSettings, ViewerCamera};

use crate::error::ConfigError;

/// File name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Shadow subsystem settings.
    pub shadows: ShadowSettings,
    /// Viewer camera of the demo scene.
    pub viewer: ViewerConfig,
    /// Directional light.
    pub light: LightConfig,
    /// Synthetic scene layout.
    pub scene: SceneConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Viewer camera placement and projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewerConfig {
    pub eye: [f32; 3],
    pub target: [f32; 3],
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

/// Directional light.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LightConfig {
    /// Direction the light travels, need not be normalized.
    pub direction: [f32; 3],
}

/// Synthetic scene: a ground slab plus a grid of boxes inside `min..max`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SceneConfig {
    pub min: [f32; 3],
    pub max: [f32; 3],
    /// Boxes per side of the caster grid.
    pub grid: u32,
    /// Edge length of each box.
    pub box_size: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Frames the demo runs before exiting.
    pub frames: u32,
    /// Log per-cascade statistics every frame.
    pub report_stats: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            eye: [0.0, 12.0, 40.0],
            target: [0.0, 0.0, 0.0],
            fov_y_degrees: 60.0,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 400.0,
        }
    }
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            direction: [0.4, -1.0, 0.25],
        }
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            min: [-200.0, -2.0, -200.0],
            max: [200.0, 40.0, 200.0],
            grid: 8,
            box_size: 6.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            frames: 60,
            report_stats: true,
        }
    }
}

impl ViewerConfig {
    pub fn to_camera(&self) -> ViewerCamera {
        ViewerCamera::look_at(
            Vec3::from(self.eye),
            Vec3::from(self.target),
            self.fov_y_degrees.to_radians(),
            self.aspect,
            self.near,
            self.far,
        )
    }
}

impl LightConfig {
    pub fn to_camera(&self) -> LightCamera {
        LightCamera::directional(Vec3::from(self.direction))
    }
}

impl SceneConfig {
    /// World-space bounds of everything in the scene.
    pub fn bounds(&self) -> Aabb {
        Aabb::new(Vec3::from(self.min), Vec3::from(self.max))
    }
}

/// Platform config directory for Umbra, e.g. `~/.config/umbra`.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("umbra"))
        .ok_or(ConfigError::NoConfigDir)
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let config = read_config(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::Write {
            path: config_path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let new_config = read_config(&config_path)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ron::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
