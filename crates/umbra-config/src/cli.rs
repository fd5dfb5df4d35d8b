//! Command-line argument parsing for the Umbra demo.

use std::path::PathBuf;

use clap::Parser;
use umbra_shadow::ShadowTechnique;

use crate::Config;

/// Umbra demo command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "umbra", about = "Cascaded shadow map demo")]
pub struct CliArgs {
    /// Shadow technique (depth, vsm, esm, evsm2, evsm4).
    #[arg(long, value_parser = parse_technique)]
    pub technique: Option<ShadowTechnique>,

    /// Number of cascades (1-8).
    #[arg(long)]
    pub cascades: Option<u32>,

    /// Slice resolution in texels.
    #[arg(long)]
    pub resolution: Option<u32>,

    /// Frames to run before exiting.
    #[arg(long)]
    pub frames: Option<u32>,

    /// Tint receivers by cascade.
    #[arg(long)]
    pub debug_tint: Option<bool>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Parse a technique name as accepted on the command line.
pub fn parse_technique(name: &str) -> Result<ShadowTechnique, String> {
    match name.to_ascii_lowercase().as_str() {
        "depth" | "depthonly" | "depth-only" => Ok(ShadowTechnique::DepthOnly),
        "vsm" => Ok(ShadowTechnique::Vsm),
        "esm" => Ok(ShadowTechnique::Esm),
        "evsm2" => Ok(ShadowTechnique::Evsm2),
        "evsm4" | "evsm" => Ok(ShadowTechnique::Evsm4),
        other => Err(format!("unknown shadow technique `{other}`")),
    }
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(technique) = args.technique {
            self.shadows.technique = technique;
        }
        if let Some(count) = args.cascades {
            self.shadows.cascade_count = count;
        }
        if let Some(resolution) = args.resolution {
            self.shadows.resolution = resolution;
        }
        if let Some(frames) = args.frames {
            self.debug.frames = frames;
        }
        if let Some(tint) = args.debug_tint {
            self.shadows.debug_tint = tint;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
