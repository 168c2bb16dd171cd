//! Whole-pipeline properties on the CPU backend.

use avoidance_boids::prelude::*;
use avoidance_boids::{ConfigError, FieldParams, MeshLayout, SimParams};

fn config(population: u32) -> SimConfig {
    SimConfig::new()
        .with_field(FieldConfig::new(8).with_cell_scale(0.5))
        .with_flock(
            FlockConfig::new(population)
                .with_velocity_range(0.5, 2.0)
                .with_distances(0.8, 0.3, 0.6)
                .with_boundary(Vec3::ZERO, 1.5, 4.0)
                .with_avoid_force(6.0),
        )
        .with_seed(11)
}

// ============================================================================
// Speed invariants
// ============================================================================

#[test]
fn test_speeds_stay_in_range_every_frame() {
    let sphere = StaticMesh::sphere(0.7, 8, 12);
    let meshes: [&dyn MeshSource; 1] = [&sphere];
    let mut sim = FrameOrchestrator::cpu(&config(256), &meshes).unwrap();

    for _ in 0..40 {
        sim.frame(&meshes, 1.0 / 30.0).unwrap();
        for agent in sim.read_agents().unwrap() {
            let speed = agent.velocity.length();
            assert!(speed >= 0.5 - 1e-4 && speed <= 2.0 + 1e-4, "speed {}", speed);
            assert!(agent.position.is_finite());
        }
    }
}

#[test]
fn test_isolated_agent_never_speeds_up_under_drag() {
    let config = SimConfig::new()
        .with_field(FieldConfig::new(2))
        .with_flock(
            FlockConfig::new(1)
                .with_velocity_range(1.0, 3.0)
                .with_boundary(Vec3::ZERO, 1000.0, 1.0)
                .with_drag(1.5),
        )
        .with_seed(3);
    let mut sim = FrameOrchestrator::cpu(&config, &[]).unwrap();

    let mut last = f32::MAX;
    for _ in 0..100 {
        sim.frame(&[], 0.05).unwrap();
        let speed = sim.read_agents().unwrap()[0].velocity.length();
        assert!(speed <= last + 1e-5);
        last = speed;
    }
    assert!((last - 1.0).abs() < 1e-4);
}

#[test]
fn test_default_config_isolated_agent_converges_to_min_velocity() {
    let config = SimConfig::new()
        .with_field(FieldConfig::new(2))
        .with_flock(FlockConfig::new(1).with_boundary(Vec3::ZERO, 1000.0, 3.0));
    let params = SimParams::resolve(&config, 0).unwrap();
    let fast = Agent {
        position: Vec3::ZERO,
        velocity: Vec3::new(2.0, 2.0, 1.0),
    };
    let mut backend = CpuBackend::new(&params, vec![fast]);

    for _ in 0..1000 {
        backend.step_agents(0.05);
    }
    let speed = backend.agents()[0].velocity.length();
    assert!((speed - params.flock.min_velocity).abs() < 1e-4, "speed {}", speed);
}

// ============================================================================
// Boundary
// ============================================================================

#[test]
fn test_flock_is_pulled_back_inside_boundary() {
    let config = SimConfig::new()
        .with_field(FieldConfig::new(4))
        .with_flock(
            FlockConfig::new(32)
                .with_weights(0.0, 0.0, 0.0)
                .with_velocity_range(0.5, 1.0)
                .with_boundary(Vec3::new(20.0, 0.0, 0.0), 2.0, 5.0)
                .with_max_force(5.0),
        )
        .with_seed(5);
    let mut sim = FrameOrchestrator::cpu(&config, &[]).unwrap();

    let distance = |agents: &[Agent]| {
        agents
            .iter()
            .map(|a| a.position.distance(Vec3::new(20.0, 0.0, 0.0)))
            .fold(0.0f32, f32::max)
    };
    for _ in 0..600 {
        sim.frame(&[], 1.0 / 60.0).unwrap();
    }
    // Agents overshoot a little before turning, but stay close to the sphere.
    assert!(distance(&sim.read_agents().unwrap()) < 4.0);
}

// ============================================================================
// Field
// ============================================================================

#[test]
fn test_empty_scene_leaves_field_zero() {
    let config = SimConfig::new()
        .with_field(FieldConfig::new(4).with_cell_scale(1.0))
        .with_flock(FlockConfig::new(4))
        .with_seed(1);
    let mut sim = FrameOrchestrator::cpu(&config, &[]).unwrap();
    sim.frame(&[], 0.01).unwrap();

    let cells = sim.read_field().unwrap();
    assert_eq!(cells.len(), 64);
    assert!(cells.iter().all(|c| c.direction == Vec3::ZERO));
}

#[test]
fn test_single_sample_lights_nearest_cell() {
    let point = Vec3::new(0.3, -1.2, 1.7);
    let mesh = StaticMesh::new(vec![point], vec![Vec3::new(0.0, 0.0, -4.0)]);
    let meshes: [&dyn MeshSource; 1] = [&mesh];
    let config = SimConfig::new()
        .with_field(FieldConfig::new(4).with_cell_scale(1.0))
        .with_flock(FlockConfig::new(4))
        .with_seed(1);
    let mut sim = FrameOrchestrator::cpu(&config, &meshes).unwrap();
    sim.frame(&meshes, 0.01).unwrap();

    let field = sim.params().field;
    let expected = field.cell_of(point).unwrap() as usize;
    let cells = sim.read_field().unwrap();
    for (index, cell) in cells.iter().enumerate() {
        if index == expected {
            assert_eq!(cell.direction, -Vec3::Z);
            assert!((cell.position - point).abs().max_element() <= 0.5);
        } else {
            assert_eq!(cell.direction, Vec3::ZERO);
        }
    }
}

#[test]
fn test_cell_index_round_trip() {
    let field = FieldParams::from_config(
        &FieldConfig::new(6)
            .with_cell_scale(0.3)
            .with_center(Vec3::new(1.0, -2.0, 0.5)),
    )
    .unwrap();
    let half = 6.0 * 0.3 / 2.0;
    for index in 0..field.cell_count {
        let c = field.coords(index);
        assert_eq!(field.index(c.x, c.y, c.z), index);
        let p = field.cell_position(c);
        assert!((p - field.center).abs().max_element() < half);
        assert_eq!(field.cell_of(p), Some(index));
    }
}

#[test]
fn test_agents_avoid_surface() {
    // A wall of upward-facing samples fills the bottom layer of the field.
    let mut positions = Vec::new();
    for i in 0..8 {
        for k in 0..8 {
            positions.push(Vec3::new(-1.75 + 0.5 * i as f32, -1.75, -1.75 + 0.5 * k as f32));
        }
    }
    let normals = vec![Vec3::Y; positions.len()];
    let floor = StaticMesh::new(positions, normals);
    let meshes: [&dyn MeshSource; 1] = [&floor];

    let config = SimConfig::new()
        .with_field(FieldConfig::new(8).with_cell_scale(0.5))
        .with_flock(
            FlockConfig::new(64)
                .with_weights(0.0, 0.0, 0.0)
                .with_velocity_range(0.5, 1.0)
                .with_boundary(Vec3::new(0.0, -1.75, 0.0), 0.2, 0.0)
                .with_avoid_force(10.0)
                .with_max_force(10.0),
        )
        .with_seed(9);
    let mut sim = FrameOrchestrator::cpu(&config, &meshes).unwrap();

    sim.frame(&meshes, 0.05).unwrap();
    let before = sim.read_agents().unwrap();
    for _ in 0..10 {
        sim.frame(&meshes, 0.05).unwrap();
    }
    let after = sim.read_agents().unwrap();

    let mean_y = |agents: &[Agent]| agents.iter().map(|a| a.velocity.y).sum::<f32>() / agents.len() as f32;
    assert!(mean_y(&after) > mean_y(&before));
    assert!(mean_y(&after) > 0.0);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_population_coercion() {
    for (requested, expected) in [(100, 128), (256, 256), (0, 1), (96, 128), (90, 64)] {
        let params = SimParams::resolve(&config(requested), 0).unwrap();
        assert_eq!(params.flock.agent_count, expected, "requested {}", requested);
    }
}

#[test]
fn test_strict_dispatch_rejects_odd_vertex_counts() {
    let sphere = StaticMesh::sphere(1.0, 3, 5);
    let meshes: [&dyn MeshSource; 1] = [&sphere];
    let config = config(256)
        .with_workgroup_size(64)
        .with_dispatch_policy(DispatchPolicy::Reject);

    match FrameOrchestrator::cpu(&config, &meshes) {
        Err(SimulationError::Config(ConfigError::IndivisibleDispatch { stage, count, width })) => {
            assert_eq!(stage, "Vertex");
            assert_eq!(count, 20);
            assert_eq!(width, 64);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("indivisible vertex count was accepted"),
    }
}

#[test]
fn test_layout_is_fixed_at_startup() {
    let small = StaticMesh::sphere(1.0, 3, 4);
    let large = StaticMesh::sphere(1.0, 6, 8);
    let mut sim = FrameOrchestrator::cpu(&config(8), &[&small]).unwrap();
    assert_eq!(sim.layout(), &MeshLayout::from_counts(&[16]).unwrap());

    match sim.frame(&[&large], 0.01) {
        Err(SimulationError::VertexCount { mesh, expected, actual }) => {
            assert_eq!((mesh, expected, actual), (0, 16, 56));
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}
