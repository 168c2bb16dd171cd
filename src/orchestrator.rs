//! Frame sequencing.
//!
//! [`FrameOrchestrator`] owns the surface sampler and a [`ComputeBackend`],
//! and runs the stages of every frame strictly in order:
//!
//! ```text
//! reset field -> sample surfaces -> rebuild field -> step agents
//! ```
//!
//! # Example
//!
//! ```
//! use avoidance_boids::prelude::*;
//!
//! let sphere = StaticMesh::sphere(1.0, 8, 12);
//! let meshes: [&dyn MeshSource; 1] = [&sphere];
//!
//! let config = SimConfig::new()
//!     .with_field(FieldConfig::new(8).with_cell_scale(0.5))
//!     .with_flock(FlockConfig::new(64).with_boundary(Vec3::ZERO, 3.0, 2.0))
//!     .with_seed(1);
//!
//! let mut sim = FrameOrchestrator::cpu(&config, &meshes).unwrap();
//! let stats = sim.frame(&meshes, 1.0 / 60.0).unwrap();
//! assert_eq!(stats.frame, 1);
//! ```

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::backend::ComputeBackend;
use crate::config::{SimConfig, SimParams};
use crate::cpu::CpuBackend;
use crate::error::SimulationError;
use crate::field::FieldCell;
use crate::flock::{spawn_agents, Agent};
use crate::gpu::{GpuBackend, GpuContext};
use crate::render::RenderInfo;
use crate::surface::{MeshLayout, MeshSource, SurfaceSampler};

/// Startup state shared by every backend: resolved parameters, the mesh
/// layout and the initial flock.
pub struct SimSetup {
    pub params: SimParams,
    pub layout: MeshLayout,
    pub initial_agents: Vec<Agent>,
}

impl SimSetup {
    /// Capture the mesh layout, validate `config` and spawn the flock.
    pub fn new(config: &SimConfig, meshes: &[&dyn MeshSource]) -> Result<Self, SimulationError> {
        let layout = MeshLayout::from_meshes(meshes)?;
        let params = SimParams::resolve(config, layout.vertex_count())?;

        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let initial_agents = spawn_agents(&params.flock, &mut rng);

        log::info!(
            "Flock of {} agents, {}³ field ({} cells), {} surface samples over {} meshes",
            params.flock.agent_count,
            params.field.grid_length,
            params.field.cell_count,
            layout.vertex_count(),
            layout.mesh_count()
        );

        Ok(Self {
            params,
            layout,
            initial_agents,
        })
    }
}

/// Timing of one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameStats {
    /// Frames completed, including this one.
    pub frame: u64,
    /// Delta time injected into the agent stage.
    pub delta_time: f32,
    /// Host time spent sampling surfaces.
    pub sample_secs: f32,
    /// Host time spent recording (GPU) or running (CPU) all stages.
    pub total_secs: f32,
}

/// Runs the per-frame pipeline on a backend.
pub struct FrameOrchestrator<B: ComputeBackend> {
    params: SimParams,
    sampler: SurfaceSampler,
    render: RenderInfo,
    backend: B,
    frame: u64,
}

impl<B: ComputeBackend> FrameOrchestrator<B> {
    pub fn new(setup: SimSetup, backend: B) -> Self {
        log::debug!("Frame orchestrator on the {} backend", backend.name());
        Self {
            render: RenderInfo::from_params(&setup.params),
            sampler: SurfaceSampler::new(setup.layout),
            params: setup.params,
            backend,
            frame: 0,
        }
    }

    /// Run one frame with delta time `dt`.
    ///
    /// `meshes` must match the count and vertex counts given at startup. That
    /// is checked before any stage runs.
    pub fn frame(&mut self, meshes: &[&dyn MeshSource], dt: f32) -> Result<FrameStats, SimulationError> {
        self.sampler.layout().check(meshes)?;
        let start = Instant::now();

        self.backend.begin_frame();
        self.backend.reset_field();

        self.sampler.sample(meshes)?;
        let sample_secs = start.elapsed().as_secs_f32();
        self.backend
            .upload_surface(self.sampler.samples(), self.sampler.layout());

        self.backend.rebuild_field();
        self.backend.step_agents(dt);
        self.backend.end_frame()?;

        self.frame += 1;
        Ok(FrameStats {
            frame: self.frame,
            delta_time: dt,
            sample_secs,
            total_secs: start.elapsed().as_secs_f32(),
        })
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Draw arguments and bounds for render consumers.
    pub fn render_info(&self) -> &RenderInfo {
        &self.render
    }

    pub fn layout(&self) -> &MeshLayout {
        self.sampler.layout()
    }

    pub fn frames(&self) -> u64 {
        self.frame
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Copy of the committed agents.
    pub fn read_agents(&mut self) -> Result<Vec<Agent>, SimulationError> {
        self.backend.read_agents()
    }

    /// Copy of the field cells.
    pub fn read_field(&mut self) -> Result<Vec<FieldCell>, SimulationError> {
        self.backend.read_field()
    }
}

impl FrameOrchestrator<CpuBackend> {
    /// Build a pipeline on the CPU backend.
    pub fn cpu(config: &SimConfig, meshes: &[&dyn MeshSource]) -> Result<Self, SimulationError> {
        let setup = SimSetup::new(config, meshes)?;
        let backend = CpuBackend::new(&setup.params, setup.initial_agents.clone());
        Ok(Self::new(setup, backend))
    }
}

impl FrameOrchestrator<GpuBackend> {
    /// Build a pipeline on an opened GPU.
    pub fn gpu(
        ctx: Arc<GpuContext>,
        config: &SimConfig,
        meshes: &[&dyn MeshSource],
    ) -> Result<Self, SimulationError> {
        let setup = SimSetup::new(config, meshes)?;
        let backend = GpuBackend::new(ctx, &setup.params, &setup.layout, &setup.initial_agents)?;
        Ok(Self::new(setup, backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldConfig, FlockConfig};
    use crate::surface::{MeshTransform, StaticMesh};
    use glam::Vec3;

    fn config(population: u32) -> SimConfig {
        SimConfig::new()
            .with_field(FieldConfig::new(4))
            .with_flock(FlockConfig::new(population).with_boundary(Vec3::ZERO, 2.0, 2.0))
            .with_seed(42)
    }

    #[test]
    fn test_setup_coerces_population() {
        let setup = SimSetup::new(&config(100), &[]).unwrap();
        assert_eq!(setup.params.flock.agent_count, 128);
        assert_eq!(setup.params.requested_population, 100);
        assert_eq!(setup.initial_agents.len(), 128);
    }

    #[test]
    fn test_setup_is_seeded() {
        let a = SimSetup::new(&config(16), &[]).unwrap();
        let b = SimSetup::new(&config(16), &[]).unwrap();
        assert_eq!(a.initial_agents, b.initial_agents);
    }

    #[test]
    fn test_frame_counts_and_reports_dt() {
        let mut sim = FrameOrchestrator::cpu(&config(8), &[]).unwrap();
        let stats = sim.frame(&[], 0.02).unwrap();
        assert_eq!(stats.frame, 1);
        assert_eq!(stats.delta_time, 0.02);
        sim.frame(&[], 0.02).unwrap();
        assert_eq!(sim.frames(), 2);
    }

    #[test]
    fn test_frame_rejects_changed_meshes() {
        let a = StaticMesh::sphere(1.0, 4, 4);
        let mut sim = FrameOrchestrator::cpu(&config(8), &[&a]).unwrap();
        let err = sim.frame(&[], 0.01).unwrap_err();
        assert!(matches!(err, SimulationError::MeshCount { expected: 1, actual: 0 }));
        assert_eq!(sim.frames(), 0);
    }

    #[test]
    fn test_rejected_frame_leaves_state_untouched() {
        let mesh = StaticMesh::new(vec![Vec3::ZERO], vec![Vec3::Y]);
        let other = StaticMesh::new(vec![Vec3::ZERO, Vec3::X], vec![Vec3::Y, Vec3::Y]);
        let mut sim = FrameOrchestrator::cpu(&config(8), &[&mesh]).unwrap();
        sim.frame(&[&mesh], 0.01).unwrap();
        let field = sim.read_field().unwrap();
        let agents = sim.read_agents().unwrap();
        assert!(field.iter().any(|c| c.direction != Vec3::ZERO));

        assert!(sim.frame(&[&other], 0.01).is_err());
        assert_eq!(sim.read_field().unwrap(), field);
        assert_eq!(sim.read_agents().unwrap(), agents);
        assert_eq!(sim.frames(), 1);
    }

    #[test]
    fn test_frame_rebuilds_field_from_moving_mesh() {
        let mut mesh = StaticMesh::new(vec![Vec3::ZERO], vec![Vec3::Y]);
        let layout_meshes: [&dyn MeshSource; 1] = [&mesh];
        let mut sim = FrameOrchestrator::cpu(&config(8), &layout_meshes).unwrap();

        mesh.set_transform(MeshTransform::new().with_position(Vec3::splat(-1.5)));
        sim.frame(&[&mesh], 0.01).unwrap();
        let before = sim.read_field().unwrap();

        mesh.set_transform(MeshTransform::new().with_position(Vec3::splat(1.5)));
        sim.frame(&[&mesh], 0.01).unwrap();
        let after = sim.read_field().unwrap();

        let lit = |cells: &[FieldCell]| {
            cells.iter().position(|c| c.direction != Vec3::ZERO)
        };
        assert_eq!(lit(&before), Some(0));
        assert_eq!(lit(&after), Some(63));
        assert_eq!(after.iter().filter(|c| c.direction != Vec3::ZERO).count(), 1);
    }

    #[test]
    fn test_render_info_from_orchestrator() {
        let sim = FrameOrchestrator::cpu(&config(100), &[]).unwrap();
        let info = sim.render_info();
        assert_eq!(info.agent_draw.instance_count, 128);
        assert_eq!(info.cell_draw.instance_count, 64);
    }
}
