//! Headless cascaded shadow demo.
//!
//! Loads `config.ron` (CLI flags override it), builds a synthetic scene and
//! runs a fixed number of frames with an orbiting viewer, logging cascade
//! statistics. Shadows are rendered when a GPU adapter is available;
//! otherwise only the CPU cascade path runs.
//! Run with `cargo run -p umbra-demo -- --technique evsm4 --frames 10`.

mod scene;

use std::path::Path;

use clap::Parser;
use glam::{Mat3, Vec3};
use tracing::{debug, error, info, warn};
use umbra_config::{CliArgs, Config, default_config_dir};
use umbra_render::{
    CascadedShadows, CasterInstances, CasterMaterial, CasterMesh, GpuContext, init_headless_blocking,
};
use umbra_shadow::{CascadeSet, ViewerCamera, compute_cascades};

use scene::{SyntheticScene, unit_cube};

/// Frames between config hot-reload checks.
const RELOAD_INTERVAL: u32 = 30;

/// Viewer orbit speed in radians per frame.
const ORBIT_STEP: f32 = 0.01;

struct GpuScene {
    cube: CasterMesh,
    ground: CasterInstances,
    /// One single-instance buffer per box so each can be culled on its own.
    boxes: Vec<CasterInstances>,
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = match args.config.clone().map_or_else(default_config_dir, Ok) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{e}, using ./umbra");
            Path::new("umbra").to_path_buf()
        }
    };

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    umbra_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let scene = SyntheticScene::from_config(&config.scene);
    info!(
        "Scene: ground plus {} boxes in {:?}..{:?}",
        scene.boxes.len(),
        scene.bounds().min,
        scene.bounds().max
    );

    match init_headless_blocking() {
        Ok(ctx) => run_gpu(&ctx, &mut config, &args, &config_dir, &scene),
        Err(e) => {
            warn!("GPU unavailable ({e}), running cascade setup only");
            run_cpu(&config, &scene);
        }
    }
}

/// Viewer for `frame`, orbiting the configured target.
fn viewer_at(config: &Config, frame: u32) -> ViewerCamera {
    let mut viewer = config.viewer.clone();
    let target = Vec3::from(viewer.target);
    let offset = Mat3::from_rotation_y(frame as f32 * ORBIT_STEP) * (Vec3::from(viewer.eye) - target);
    viewer.eye = (target + offset).to_array();
    viewer.to_camera()
}

fn report(frame: u32, cascades: &CascadeSet, verbose: bool) {
    if !verbose {
        return;
    }
    for stats in cascades.stats() {
        info!(
            "frame {frame} cascade {}: [{:.2}, {:.2}] texel {:.4} m, window {:.1}x{:.1} m, depth {:.1} m",
            stats.index,
            stats.near,
            stats.far,
            stats.texel_world_size,
            stats.coverage.x,
            stats.coverage.y,
            stats.depth_range
        );
    }
}

fn run_cpu(config: &Config, scene: &SyntheticScene) {
    let light = config.light.to_camera();
    let bounds = scene.bounds();
    for frame in 0..config.debug.frames {
        let cascades = compute_cascades(&viewer_at(config, frame), &light, Some(&bounds), &config.shadows);
        report(frame, &cascades, config.debug.report_stats);
    }
    info!("Ran {} frames without a GPU", config.debug.frames);
}

fn upload_scene(ctx: &GpuContext, scene: &SyntheticScene) -> GpuScene {
    let (vertices, indices) = unit_cube();
    GpuScene {
        cube: CasterMesh::new(&ctx.device, "demo-cube", &vertices, Some(&indices)),
        ground: CasterInstances::new(&ctx.device, "demo-ground", &[scene.ground.transform]),
        boxes: scene
            .boxes
            .iter()
            .map(|b| CasterInstances::new(&ctx.device, "demo-box", &[b.transform]))
            .collect(),
    }
}

fn run_gpu(ctx: &GpuContext, config: &mut Config, args: &CliArgs, config_dir: &Path, scene: &SyntheticScene) {
    let mut shadows = match CascadedShadows::new(&ctx.device, &config.shadows) {
        Ok(shadows) => shadows,
        Err(e) => {
            error!("Failed to create shadow maps: {e}");
            std::process::exit(1);
        }
    };
    let meshes = upload_scene(ctx, scene);
    let bounds = scene.bounds();

    let mut total_draws = 0;
    for frame in 0..config.debug.frames {
        if frame > 0 && frame % RELOAD_INTERVAL == 0 {
            reload(ctx, config, args, config_dir, &mut shadows);
        }

        let light = config.light.to_camera();
        let cascades = shadows.prepare(&ctx.queue, &viewer_at(config, frame), &light, Some(&bounds));
        report(frame, cascades, config.debug.report_stats);

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("demo-shadows"),
        });
        let draws = shadows.render(&mut encoder, |pass, cascade| {
            if cascade.intersects_aabb(&scene.ground.bounds) {
                pass.draw(&meshes.cube, Some(&meshes.ground), CasterMaterial::Opaque);
            }
            let mut visible = 0;
            for i in scene.visible_boxes(cascade) {
                pass.draw(&meshes.cube, Some(&meshes.boxes[i]), CasterMaterial::Opaque);
                visible += 1;
            }
            debug!("cascade {}: {visible}/{} boxes visible", cascade.index, scene.boxes.len());
        });
        ctx.queue.submit(Some(encoder.finish()));
        let _ = ctx.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        });
        total_draws += draws;
    }

    info!(
        "Rendered {} frames, {} caster draws, shadow map generation {}",
        config.debug.frames,
        total_draws,
        shadows.shadow_map().generation()
    );
}

fn reload(ctx: &GpuContext, config: &mut Config, args: &CliArgs, config_dir: &Path, shadows: &mut CascadedShadows) {
    let reloaded = match config.reload(config_dir) {
        Ok(Some(mut reloaded)) => {
            reloaded.apply_cli_overrides(args);
            if reloaded == *config {
                return;
            }
            reloaded
        }
        Ok(None) => return,
        Err(e) => {
            warn!("Config reload failed: {e}");
            return;
        }
    };
    match shadows.set_settings(&ctx.device, &reloaded.shadows) {
        Ok(reallocated) => info!("Applied reloaded shadow settings (reallocated: {reallocated})"),
        Err(e) => {
            warn!("Rejected reloaded shadow settings: {e}");
            return;
        }
    }
    *config = reloaded;
}
