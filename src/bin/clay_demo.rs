//! Clay Engine Demo
//!
//! Run with: `cargo run --bin clay_demo [config.json]`
//!
//! Headless walkthrough of the engine: builds a small sculpture from blended,
//! subtracted and painted solids, evaluates it with every extraction strategy,
//! instances it, trims it and materializes the mesh. Runs on the GPU when an
//! adapter is available and on the CPU backend otherwise.
//!
//! Set `RUST_LOG=debug` for per-pass detail.

use glam::{Mat4, Quat, Vec3};
use sdf_clay_engine::field::{PRIM_CAPSULE, PRIM_CUBE, PRIM_SPHERE, PRIM_TORUS};
use sdf_clay_engine::{
    ClayScene, ComputeBackend, ContainerId, ContainerOptions, CpuBackend, EngineConfig, EngineResult,
    GpuContextConfig, GridResolution, Solid, SolidFlags, Strategy, WgpuBackend,
};

// ============================================================================
// SCENE CONTENT
// ============================================================================

/// A clay figure: blended body, carved eye sockets and a painted band.
fn sculpture() -> Vec<Solid> {
    vec![
        Solid::new(PRIM_SPHERE)
            .with_scale(Vec3::splat(2.0))
            .with_color(Vec3::new(0.85, 0.55, 0.35))
            .with_blend(0.4),
        Solid::new(PRIM_CAPSULE)
            .with_position(Vec3::new(0.0, 2.2, 0.0))
            .with_scale(Vec3::splat(0.9))
            .with_blend(0.6),
        Solid::new(PRIM_TORUS)
            .with_position(Vec3::new(0.0, -0.5, 0.0))
            .with_rotation(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2))
            .with_scale(Vec3::splat(2.2))
            .with_blend(0.3),
        Solid::new(PRIM_SPHERE)
            .with_position(Vec3::new(0.6, 2.6, 0.8))
            .with_scale(Vec3::splat(0.3))
            .with_blend(-0.1)
            .with_flags(SolidFlags::MIRROR_X),
        Solid::new(PRIM_CUBE)
            .with_position(Vec3::new(0.0, 0.4, 0.0))
            .with_scale(Vec3::new(3.0, 0.3, 3.0))
            .with_color(Vec3::new(0.2, 0.35, 0.9))
            .with_flags(SolidFlags::PAINTER),
    ]
}

// ============================================================================
// WALKTHROUGH
// ============================================================================

fn log_surface<B: ComputeBackend>(scene: &mut ClayScene<B>, id: ContainerId) -> EngineResult<()> {
    let snapshot = scene.surface_snapshot(id)?;
    for (chunk, record) in snapshot.records.iter().enumerate() {
        log::info!(
            "  chunk {:2}: {:3} solids, counts {:?}, status {}",
            chunk,
            record.solid_count,
            record.counts,
            record.status
        );
    }
    if let Some(warning) = scene.container_warning(id) {
        log::warn!("  {}", warning);
    }
    Ok(())
}

fn run<B: ComputeBackend>(backend: B, config: EngineConfig) -> EngineResult<()> {
    let mut scene = ClayScene::new(backend, config)?;
    let figure = scene.create_container(ContainerOptions {
        chunks: [2, 2, 2],
        ..Default::default()
    })?;
    for solid in sculpture() {
        scene.add_solid(figure, solid)?;
    }

    for strategy in [Strategy::PointSplat, Strategy::SparseVoxel, Strategy::Mesh] {
        let options = ContainerOptions {
            strategy,
            ..scene.container(figure).map(|c| c.options.clone()).unwrap_or_default()
        };
        scene.set_options(figure, options)?;
        scene.tick()?;
        scene.wait_idle()?;
        log::info!("{} strategy:", strategy.name());
        log_surface(&mut scene, figure)?;
    }

    let copy = scene.create_default_container()?;
    scene.set_transform(copy, Mat4::from_translation(Vec3::new(12.0, 0.0, 0.0)))?;
    scene.attach_instance(figure, copy)?;
    scene.tick()?;
    let snapshot = scene.surface_snapshot(figure)?;
    log::info!("instanced: draw args of chunk 0 {:?}", snapshot.chunk_draw_args(0));

    let before = scene.container(figure).map_or(0, |c| c.layout.total_words());
    scene.trim_container(figure)?;
    let after = scene.container(figure).map_or(0, |c| c.layout.total_words());
    log::info!("trimmed: {} -> {} words", before, after);

    let mesh = scene.materialize_mesh(figure)?;
    log::info!(
        "materialized mesh: {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(())
}

fn load_config() -> EngineResult<EngineConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("loading config from {}", path);
            EngineConfig::load(path)
        }
        None => Ok(EngineConfig {
            grid: GridResolution::new(64, 16),
            ..Default::default()
        }),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Clay Engine Demo ===");

    let result = load_config().and_then(|config| {
        match WgpuBackend::request(GpuContextConfig::default()) {
            Ok(backend) => run(backend, config),
            Err(err) => {
                log::warn!("{}; falling back to the CPU backend", err);
                run(CpuBackend::new(), config)
            }
        }
    });
    if let Err(err) = result {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
