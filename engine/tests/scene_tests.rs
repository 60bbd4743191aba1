//! Scene Tests - Evaluation, Arena and Instances
//!
//! End-to-end scenarios driven through `ClayScene` on the CPU backend at a
//! small grid resolution (32 fine / 8 coarse).

use glam::{Mat4, Vec3};
use sdf_clay_engine::extract::ExtractState;
use sdf_clay_engine::field::{PRIM_CUBE, PRIM_SPHERE};
use sdf_clay_engine::{
    AttachOutcome, ClayScene, ContainerId, ContainerOptions, CpuBackend, EngineConfig, EngineLimits,
    GridResolution, Placement, Solid, SurfaceSnapshot, Strategy,
};

fn config() -> EngineConfig {
    EngineConfig {
        grid: GridResolution::new(32, 8),
        ..Default::default()
    }
}

fn scene_with(config: EngineConfig) -> ClayScene<CpuBackend> {
    ClayScene::new(CpuBackend::new(), config).unwrap()
}

fn scene() -> ClayScene<CpuBackend> {
    scene_with(config())
}

fn sphere(radius: f32) -> Solid {
    Solid::new(PRIM_SPHERE).with_scale(Vec3::splat(radius))
}

fn container_with(scene: &mut ClayScene<CpuBackend>, options: ContainerOptions, solids: &[Solid]) -> ContainerId {
    let id = scene.create_container(options).unwrap();
    for solid in solids {
        scene.add_solid(id, *solid).unwrap().unwrap();
    }
    id
}

fn chunk_streams(snapshot: &SurfaceSnapshot, stream: usize) -> Vec<Vec<u32>> {
    (0..snapshot.records.len() as u32)
        .map(|chunk| snapshot.chunk_stream(chunk, stream).to_vec())
        .collect()
}

// ============================================================================
// Evaluation
// ============================================================================

#[test]
fn test_single_chunk_blend_and_subtract() {
    let mut s = scene();
    let solids = [
        sphere(4.0).with_position(Vec3::new(-3.0, 0.0, 0.0)).with_blend(0.5),
        sphere(4.0).with_position(Vec3::new(3.0, 0.0, 0.0)).with_blend(0.5),
        Solid::new(PRIM_CUBE).with_scale(Vec3::splat(2.0)).with_blend(-0.2),
    ];
    let options = ContainerOptions {
        detail: 50,
        ..Default::default()
    };
    let c = container_with(&mut s, options, &solids);
    assert_eq!(s.container(c).unwrap().grid.chunk_size, 22.0);

    assert_eq!(s.tick().unwrap(), vec![c]);
    assert_eq!(s.container(c).unwrap().state, ExtractState::Compacted);

    let snap = s.surface_snapshot(c).unwrap();
    assert_eq!(snap.records.len(), 1);
    let record = snap.records[0];
    assert_eq!(record.solid_count, 3);
    assert_eq!(record.status, 0);
    assert!(record.counts[0] > 0);

    // One splat quad (3 vertices per point), source only
    let args = snap.chunk_draw_args(0);
    assert_eq!(args[0], record.counts[0] * 3);
    assert_eq!(args[1], 1);
    assert!(s.container_warning(c).is_none());
}

#[test]
fn test_empty_container_commits_nothing() {
    let mut s = scene();
    let c = s.create_default_container().unwrap();
    assert_eq!(s.tick().unwrap(), vec![c]);

    let snap = s.surface_snapshot(c).unwrap();
    assert_eq!(snap.total_count(0), 0);
    assert_eq!(snap.chunk_draw_args(0)[0], 0);
}

#[test]
fn test_solid_limit_refuses_with_warning() {
    let mut s = scene();
    let c = s.create_default_container().unwrap();
    for i in 0..512 {
        let solid = sphere(0.1).with_position(Vec3::new(i as f32 * 0.001, 0.0, 0.0));
        assert_eq!(s.add_solid(c, solid).unwrap(), Some(i));
    }
    assert!(s.global_warning().is_none());

    assert_eq!(s.add_solid(c, sphere(0.1)).unwrap(), None);
    assert!(s.global_warning().is_some());
    assert!(s.container_warning(c).is_some());
    assert_eq!(s.solids(c).unwrap().len(), 512);
}

#[test]
fn test_solid_limit_warning_clears_after_removal() {
    let mut limits = EngineLimits::default();
    limits.max_solids = EngineLimits::MIN_SOLIDS;
    let mut s = scene_with(EngineConfig { limits, ..config() });
    let c = s.create_default_container().unwrap();
    for i in 0..EngineLimits::MIN_SOLIDS {
        let solid = sphere(0.1).with_position(Vec3::new(i as f32 * 0.01, 0.0, 0.0));
        s.add_solid(c, solid).unwrap().unwrap();
    }
    assert_eq!(s.add_solid(c, sphere(0.1)).unwrap(), None);
    assert!(s.container_warning(c).unwrap().contains("too many solids"));

    s.remove_solid(c, 0).unwrap();
    s.tick().unwrap();
    s.wait_idle().unwrap();
    assert_eq!(s.solids(c).unwrap().len(), EngineLimits::MIN_SOLIDS as usize - 1);
    assert!(s.container_warning(c).is_none());
}

#[test]
fn test_removed_solids_are_compacted_in_order() {
    let mut s = scene();
    let solids = [
        sphere(1.0).with_position(Vec3::new(-2.0, 0.0, 0.0)),
        sphere(1.0),
        sphere(1.0).with_position(Vec3::new(2.0, 0.0, 0.0)),
    ];
    let c = container_with(&mut s, ContainerOptions::default(), &solids);
    s.tick().unwrap();

    s.remove_solid(c, 1).unwrap();
    assert!(s.remove_solid(c, 1).is_err());
    s.tick().unwrap();

    let remaining = s.solids(c).unwrap();
    let ids: Vec<_> = remaining.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(remaining[0].1.position.x, -2.0);
    assert_eq!(remaining[1].1.position.x, 2.0);
}

#[test]
fn test_strategy_switch_reevaluates_every_chunk() {
    let mut s = scene();
    let options = ContainerOptions {
        chunks: [2, 1, 1],
        ..Default::default()
    };
    let c = container_with(&mut s, options.clone(), &[sphere(2.0)]);
    s.tick().unwrap();
    assert_eq!(s.surface_snapshot(c).unwrap().layout.strategy, Strategy::PointSplat);

    s.set_options(
        c,
        ContainerOptions {
            strategy: Strategy::Mesh,
            ..options
        },
    )
    .unwrap();
    // Fresh empty buffers until the next evaluation
    assert_eq!(s.container(c).unwrap().layout.placement, Placement::Trimmed);

    assert_eq!(s.tick().unwrap(), vec![c]);
    let snap = s.surface_snapshot(c).unwrap();
    assert_eq!(snap.layout.strategy, Strategy::Mesh);
    for record in &snap.records {
        assert!(record.counts[0] > 0);
        assert_eq!(record.counts[0], record.counts[1]);
        assert_eq!(record.counts[1] % 3, 0);
    }
    assert_eq!(snap.chunk_draw_args(1).len(), 5);
}

#[test]
fn test_overflow_zeroes_draws_until_surface_fits() {
    let mut limits = EngineLimits::default();
    limits.max_point_count = EngineLimits::MIN_POINT_COUNT;
    let mut s = scene_with(EngineConfig { limits, ..config() });
    let c = container_with(&mut s, ContainerOptions::default(), &[sphere(3.5)]);

    s.tick().unwrap();
    assert_eq!(s.container(c).unwrap().state, ExtractState::Overflowed);
    assert!(s.container_warning(c).unwrap().contains("capacity"));
    let snap = s.surface_snapshot(c).unwrap();
    assert_eq!(snap.chunk_draw_args(0)[0], 0);
    assert_eq!(snap.total_count(0), 0);

    s.update_solid(c, 0, |solid| solid.scale = Vec3::ONE).unwrap();
    s.tick().unwrap();
    assert_eq!(s.container(c).unwrap().state, ExtractState::Compacted);
    assert!(s.container_warning(c).is_none());
    let snap = s.surface_snapshot(c).unwrap();
    assert!(snap.total_count(0) > 0);
    assert_eq!(snap.chunk_draw_args(0)[0], snap.total_count(0) * 3);
}

// ============================================================================
// Chunk Planner
// ============================================================================

#[test]
fn test_auto_bounds_is_stable() {
    let mut s = scene();
    let options = ContainerOptions {
        auto_bounds: true,
        ..Default::default()
    };
    let c = container_with(&mut s, options, &[sphere(1.0).with_position(Vec3::new(5.0, 0.0, 0.0))]);

    s.tick().unwrap();
    let grid = s.container(c).unwrap().grid;
    assert_eq!(grid.dims, [2, 2, 2]);
    assert!(grid.extent().x * 0.5 > 6.0);
    assert_eq!(s.container(c).unwrap().layout.chunk_count, 8);

    s.recompute(c).unwrap();
    assert_eq!(s.tick().unwrap(), vec![c]);
    assert_eq!(s.container(c).unwrap().grid, grid);
    assert_eq!(s.surface_snapshot(c).unwrap().records.len(), 8);
}

// ============================================================================
// Memory Arena
// ============================================================================

#[test]
fn test_trim_and_expand_preserve_committed_data() {
    let mut s = scene();
    let options = ContainerOptions {
        chunks: [3, 1, 1],
        ..Default::default()
    };
    let solids = [
        sphere(1.0).with_position(Vec3::new(-8.0, 0.0, 0.0)),
        sphere(3.0),
        sphere(1.0).with_position(Vec3::new(8.0, 0.0, 0.0)),
    ];
    let c = container_with(&mut s, options, &solids);
    s.tick().unwrap();
    assert_eq!(s.container(c).unwrap().layout.placement, Placement::Expanded);
    let before = s.surface_snapshot(c).unwrap();
    let committed = chunk_streams(&before, 0);
    assert!(committed.iter().all(|words| !words.is_empty()));

    s.trim_container(c).unwrap();
    let layout = s.container(c).unwrap().layout;
    assert_eq!(layout.placement, Placement::Trimmed);
    let trimmed = s.surface_snapshot(c).unwrap();
    assert_eq!(layout.stream_len[0], before.total_count(0));
    assert_eq!(trimmed.streams[0].len() as u32, before.total_count(0) * 2);
    assert_eq!(chunk_streams(&trimmed, 0), committed);

    // Trimming twice changes nothing
    s.trim_container(c).unwrap();
    assert_eq!(s.surface_snapshot(c).unwrap(), trimmed);

    s.expand_container(c).unwrap();
    assert_eq!(s.container(c).unwrap().layout.placement, Placement::Expanded);
    let expanded = s.surface_snapshot(c).unwrap();
    assert_eq!(chunk_streams(&expanded, 0), committed);
    for (a, b) in expanded.records.iter().zip(&before.records) {
        assert_eq!(a.counts, b.counts);
        assert_eq!(a.bases, b.bases);
    }
}

#[test]
fn test_sparse_voxel_containers_share_one_arena() {
    let mut s = scene();
    let options = ContainerOptions {
        strategy: Strategy::SparseVoxel,
        ..Default::default()
    };
    let a = container_with(&mut s, options.clone(), &[sphere(1.0)]);
    let b = container_with(&mut s, options, &[sphere(0.8)]);

    s.evaluate_container(a).unwrap();
    assert_eq!(s.arena().borrower(), Some(a));
    assert_eq!(s.container(a).unwrap().layout.placement, Placement::Shared);
    s.wait_idle().unwrap();
    let a_points = chunk_streams(&s.surface_snapshot(a).unwrap(), 0);

    // The next borrower displaces a, which is trimmed with its data intact
    s.evaluate_container(b).unwrap();
    assert_eq!(s.arena().borrower(), Some(b));
    assert_eq!(s.container(a).unwrap().layout.placement, Placement::Trimmed);
    assert_eq!(chunk_streams(&s.surface_snapshot(a).unwrap(), 0), a_points);
}

#[test]
fn test_interactive_sparse_voxel_owns_its_buffers() {
    let mut s = scene();
    let options = ContainerOptions {
        strategy: Strategy::SparseVoxel,
        interactive: true,
        ..Default::default()
    };
    let c = container_with(&mut s, options, &[sphere(1.0)]);
    s.tick().unwrap();
    assert_eq!(s.container(c).unwrap().layout.placement, Placement::Expanded);
    assert_eq!(s.arena().last_active(), Some(c));
    assert_eq!(s.arena().borrower(), None);
}

#[test]
fn test_one_expanded_sparse_voxel_container_at_a_time() {
    let mut s = scene();
    let options = ContainerOptions {
        strategy: Strategy::SparseVoxel,
        interactive: true,
        ..Default::default()
    };
    let a = container_with(&mut s, options.clone(), &[sphere(1.0)]);
    let b = container_with(&mut s, options, &[sphere(0.8)]);
    s.tick().unwrap();
    s.wait_idle().unwrap();

    let placement = |s: &ClayScene<CpuBackend>, id| s.container(id).unwrap().layout.placement;
    let expanded = [a, b].iter().filter(|&&id| placement(&s, id) == Placement::Expanded).count();
    assert_eq!(expanded, 1);
    assert_eq!(placement(&s, a), Placement::Trimmed);
    assert_eq!(placement(&s, b), Placement::Expanded);
    assert_eq!(s.arena().last_active(), Some(b));
    let b_points = chunk_streams(&s.surface_snapshot(b).unwrap(), 0);

    // Editing a takes over the expanded slot; b is trimmed with its data intact
    s.begin_edit(a).unwrap();
    assert_eq!(placement(&s, a), Placement::Expanded);
    assert_eq!(placement(&s, b), Placement::Trimmed);
    assert_eq!(s.arena().last_active(), Some(a));
    assert_eq!(chunk_streams(&s.surface_snapshot(b).unwrap(), 0), b_points);
}

// ============================================================================
// Instances
// ============================================================================

#[test]
fn test_instances_share_source_surface() {
    let mut s = scene();
    let a = container_with(&mut s, ContainerOptions::default(), &[sphere(2.0)]);
    let b = s.create_default_container().unwrap();
    s.tick().unwrap();

    assert_eq!(s.attach_instance(a, b).unwrap(), AttachOutcome::Attached);
    let snap = s.surface_snapshot(a).unwrap();
    assert_eq!(snap.chunk_draw_args(0)[1], 2);
    assert_eq!(snap.chunk_draw_args(0)[0], snap.total_count(0) * 3);

    let surface = s.container(a).unwrap().surface;
    let (transforms, owners) = s.backend().instances(surface).unwrap();
    assert_eq!(owners, &[a.0, b.0]);
    assert_eq!(transforms.len(), 2);

    // Instances are never evaluated themselves
    s.add_solid(b, sphere(1.0)).unwrap();
    assert!(!s.evaluate_container(b).unwrap());

    let offset = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
    s.set_transform(b, offset).unwrap();
    s.tick().unwrap();
    let (transforms, _) = s.backend().instances(surface).unwrap();
    assert_eq!(Mat4::from_cols_array_2d(&transforms[1].model), offset);

    assert_eq!(s.detach_instance(b).unwrap(), Some(a));
    assert_eq!(s.surface_snapshot(a).unwrap().chunk_draw_args(0)[1], 1);
}

#[test]
fn test_instance_capacity_warns() {
    let mut limits = EngineLimits::default();
    limits.max_instances = 1;
    let mut s = scene_with(EngineConfig { limits, ..config() });
    let a = s.create_default_container().unwrap();
    let b = s.create_default_container().unwrap();
    let c = s.create_default_container().unwrap();

    assert_eq!(s.attach_instance(a, b).unwrap(), AttachOutcome::Attached);
    assert_eq!(s.attach_instance(a, c).unwrap(), AttachOutcome::AtCapacity);
    assert!(s.global_warning().unwrap().contains("max instances"));
    assert_eq!(s.instance_broadcaster().instances_of(a), &[b]);
}

// ============================================================================
// Mesh Materialization
// ============================================================================

#[test]
fn test_materialized_mesh_is_welded_sphere() {
    let mut s = scene();
    let options = ContainerOptions {
        strategy: Strategy::Mesh,
        ..Default::default()
    };
    let c = container_with(&mut s, options, &[sphere(2.0)]);
    s.tick().unwrap();

    let raw = s.surface_snapshot(c).unwrap().total_count(0) as usize;
    let mesh = s.materialize_mesh(c).unwrap();
    assert!(mesh.triangle_count() > 0);
    // Welding shares vertices between neighbouring triangles
    assert!(mesh.vertex_count() < raw);
    assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertex_count()));
    for p in &mesh.positions {
        assert!((p.length() - 2.0).abs() < 0.1, "vertex off surface: {}", p.length());
    }
}
