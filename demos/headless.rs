//! # Headless Flock Demo
//!
//! Two breathing spheres drift through a flock of boids. Runs a fixed number
//! of frames and logs flock statistics along the way; no window is opened.
//!
//! Run with: `RUST_LOG=info cargo run --example headless --release -- [cpu|gpu] [frames]`

use std::sync::Arc;

use avoidance_boids::prelude::*;

/// A UV sphere whose radius pulses along its height.
struct BreathingSphere {
    directions: Vec<Vec3>,
    radius: f32,
    phase: f32,
    time: f32,
    transform: MeshTransform,
}

impl BreathingSphere {
    fn new(radius: f32, phase: f32, position: Vec3) -> Self {
        let rings = 12;
        let segments = 18;
        let mut directions = Vec::new();
        for r in 0..=rings {
            let theta = std::f32::consts::PI * r as f32 / rings as f32;
            for s in 0..segments {
                let phi = std::f32::consts::TAU * s as f32 / segments as f32;
                directions.push(Vec3::new(
                    theta.sin() * phi.cos(),
                    theta.cos(),
                    theta.sin() * phi.sin(),
                ));
            }
        }
        Self {
            directions,
            radius,
            phase,
            time: 0.0,
            transform: MeshTransform::new().with_position(position),
        }
    }

    fn advance(&mut self, dt: f32) {
        self.time += dt;
        let t = self.time + self.phase;
        self.transform.position.x = 1.5 * t.sin();
        self.transform.euler_degrees.y = 30.0 * self.time;
    }
}

impl MeshSource for BreathingSphere {
    fn vertex_count(&self) -> usize {
        self.directions.len()
    }

    fn transform(&self) -> MeshTransform {
        self.transform
    }

    fn bake(&self, snapshot: &mut MeshSnapshot) {
        let t = self.time + self.phase;
        for d in &self.directions {
            let pulse = 1.0 + 0.25 * (3.0 * t + 4.0 * d.y).sin();
            snapshot.push(*d * self.radius * pulse, *d);
        }
    }
}

fn report(frame: u64, agents: &[Agent]) {
    let n = agents.len().max(1) as f32;
    let centroid = agents.iter().map(|a| a.position).sum::<Vec3>() / n;
    let mean_speed = agents.iter().map(|a| a.velocity.length()).sum::<f32>() / n;
    let spread = agents
        .iter()
        .map(|a| a.position.distance(centroid))
        .fold(0.0f32, f32::max);
    log::info!(
        "frame {:>4}: centroid ({:>6.2}, {:>6.2}, {:>6.2})  mean speed {:.3}  spread {:.2}",
        frame,
        centroid.x,
        centroid.y,
        centroid.z,
        mean_speed,
        spread
    );
}

fn run<B: ComputeBackend>(
    mut sim: FrameOrchestrator<B>,
    spheres: &mut [BreathingSphere; 2],
    frames: u64,
) -> Result<(), SimulationError> {
    let mut clock = FrameClock::new().with_fixed_delta(1.0 / 60.0);
    let mut stats_secs = 0.0f32;

    for _ in 0..frames {
        let dt = clock.tick();
        for sphere in spheres.iter_mut() {
            sphere.advance(dt);
        }
        let [a, b] = &*spheres;
        let meshes: [&dyn MeshSource; 2] = [a, b];
        let stats = sim.frame(&meshes, dt)?;
        stats_secs += stats.total_secs;

        if stats.frame % 60 == 0 {
            report(stats.frame, &sim.read_agents()?);
        }
    }

    log::info!(
        "{} frames, {:.3} ms per frame on the host",
        frames,
        1000.0 * stats_secs / frames.max(1) as f32
    );
    Ok(())
}

fn main() -> Result<(), SimulationError> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let use_gpu = args.next().map_or(true, |s| s != "cpu");
    let frames: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(600);

    let mut spheres = [
        BreathingSphere::new(0.8, 0.0, Vec3::new(-1.0, 0.0, 0.0)),
        BreathingSphere::new(0.6, 1.7, Vec3::new(1.0, 0.5, 0.0)),
    ];

    let config = SimConfig::new()
        .with_field(FieldConfig::new(24).with_cell_scale(0.25))
        .with_flock(
            FlockConfig::new(if use_gpu { 8192 } else { 1024 })
                .with_velocity_range(0.5, 2.0)
                .with_distances(0.6, 0.25, 0.5)
                .with_boundary(Vec3::ZERO, 2.5, 3.0)
                .with_avoid_force(8.0),
        )
        .with_seed(2024);

    let layout_meshes: [&dyn MeshSource; 2] = [&spheres[0], &spheres[1]];

    if use_gpu {
        match GpuContext::new_blocking() {
            Ok(ctx) => {
                let sim = FrameOrchestrator::gpu(Arc::new(ctx), &config, &layout_meshes)?;
                return run(sim, &mut spheres, frames);
            }
            Err(e) => log::warn!("{}; falling back to the CPU backend", e),
        }
    }

    let sim = FrameOrchestrator::cpu(&config, &layout_meshes)?;
    run(sim, &mut spheres, frames)
}
