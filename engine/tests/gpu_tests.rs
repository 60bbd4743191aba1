//! GPU Tests - Kernel Chain on a Real Adapter
//!
//! Require a GPU (or a software adapter); run with `--ignored`.

use glam::Vec3;
use sdf_clay_engine::field::PRIM_SPHERE;
use sdf_clay_engine::{
    ClayScene, ComputeBackend, ContainerOptions, CpuBackend, EngineConfig, GpuContextConfig, GridResolution,
    Placement, Solid, Strategy, SurfaceSnapshot, WgpuBackend,
};

fn config() -> EngineConfig {
    EngineConfig {
        grid: GridResolution::new(32, 8),
        ..Default::default()
    }
}

fn gpu_backend() -> WgpuBackend {
    WgpuBackend::request(GpuContextConfig {
        high_performance: false,
        allow_fallback: true,
    })
    .expect("no GPU adapter available")
}

fn evaluate<B: ComputeBackend>(backend: B, strategy: Strategy) -> SurfaceSnapshot {
    let mut scene = ClayScene::new(backend, config()).unwrap();
    let c = scene
        .create_container(ContainerOptions {
            strategy,
            chunks: [2, 1, 1],
            ..Default::default()
        })
        .unwrap();
    scene
        .add_solid(c, Solid::new(PRIM_SPHERE).with_scale(Vec3::splat(2.0)))
        .unwrap();
    scene.tick().unwrap();
    scene.wait_idle().unwrap();
    scene.surface_snapshot(c).unwrap()
}

fn assert_close(gpu: u32, cpu: u32) {
    let tolerance = (cpu / 50).max(4);
    assert!(gpu.abs_diff(cpu) <= tolerance, "gpu {} vs cpu {}", gpu, cpu);
}

// ============================================================================
// Agreement with the CPU backend
// ============================================================================

#[test]
#[ignore = "requires a GPU adapter"]
fn test_point_splat_matches_cpu() {
    let gpu = evaluate(gpu_backend(), Strategy::PointSplat);
    let cpu = evaluate(CpuBackend::new(), Strategy::PointSplat);
    for (g, c) in gpu.records.iter().zip(&cpu.records) {
        assert_eq!(g.solid_count, c.solid_count);
        assert_eq!(g.status, c.status);
        assert_close(g.counts[0], c.counts[0]);
    }
    assert_eq!(gpu.chunk_draw_args(0)[0], gpu.records[0].counts[0] * 3);
}

#[test]
#[ignore = "requires a GPU adapter"]
fn test_mesh_matches_cpu() {
    let gpu = evaluate(gpu_backend(), Strategy::Mesh);
    let cpu = evaluate(CpuBackend::new(), Strategy::Mesh);
    for (g, c) in gpu.records.iter().zip(&cpu.records) {
        assert_eq!(g.counts[0], g.counts[1]);
        assert_eq!(g.counts[0] % 3, 0);
        assert_close(g.counts[0], c.counts[0]);
    }
}

#[test]
#[ignore = "requires a GPU adapter"]
fn test_gpu_trim_keeps_committed_points() {
    let mut scene = ClayScene::new(gpu_backend(), config()).unwrap();
    let c = scene.create_default_container().unwrap();
    scene
        .add_solid(c, Solid::new(PRIM_SPHERE).with_scale(Vec3::splat(2.0)))
        .unwrap();
    scene.tick().unwrap();
    scene.wait_idle().unwrap();
    let before = scene.surface_snapshot(c).unwrap();

    scene.trim_container(c).unwrap();
    assert_eq!(scene.container(c).unwrap().layout.placement, Placement::Trimmed);
    let after = scene.surface_snapshot(c).unwrap();
    assert_eq!(after.chunk_stream(0, 0), before.chunk_stream(0, 0));
    assert_eq!(after.chunk_draw_args(0)[0], before.chunk_draw_args(0)[0]);
}
