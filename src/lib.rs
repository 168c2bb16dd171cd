//! # Avoidance Boids
//!
//! A flock of thousands of boids steering around deforming meshes, stepped on
//! the GPU with wgpu compute shaders (or on the CPU with rayon).
//!
//! Each frame the pipeline samples the current surface of every mesh into a 3D
//! repulsion field, then steps every agent under cohesion, separation,
//! alignment, boundary containment and field avoidance.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use avoidance_boids::prelude::*;
//!
//! let blob = StaticMesh::sphere(1.0, 16, 24);
//! let meshes: [&dyn MeshSource; 1] = [&blob];
//!
//! let config = SimConfig::new()
//!     .with_field(FieldConfig::new(32).with_cell_scale(0.25))
//!     .with_flock(FlockConfig::new(4096).with_boundary(Vec3::ZERO, 4.0, 3.0));
//!
//! let ctx = Arc::new(GpuContext::new_blocking()?);
//! let mut sim = FrameOrchestrator::gpu(ctx, &config, &meshes)?;
//! let mut clock = FrameClock::new();
//!
//! loop {
//!     sim.frame(&meshes, clock.tick())?;
//!     // Draw with sim.backend().agent_buffer() and sim.backend().agent_draw_args().
//! #   break;
//! }
//! # Ok::<(), SimulationError>(())
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Units | Kernel |
//! |-------|-------|--------|
//! | Reset field | cells | `reset_field` |
//! | Sample surfaces | host | [`SurfaceSampler::sample`] |
//! | Rebuild field | samples, then cells | `accumulate_field`, `resolve_field` |
//! | Step agents | agents | `update_boids` |
//!
//! Stages never overlap: each is its own compute pass. Agents are
//! double-buffered, so the step reads the committed buffer and writes the
//! other one.
//!
//! ## Configuration
//!
//! All parameters are fixed at startup. [`SimParams::resolve`] validates them,
//! coerces the population to the closest power of two, squares distances,
//! converts angles to radians and sizes every dispatch.

pub mod backend;
pub mod config;
pub mod cpu;
pub mod dispatch;
pub mod error;
pub mod field;
pub mod flock;
pub mod gpu;
pub mod orchestrator;
pub mod render;
pub mod surface;
pub mod time;

pub use backend::ComputeBackend;
pub use config::{AccumulationPolicy, DispatchPolicy, FieldConfig, FlockConfig, SimConfig, SimParams};
pub use cpu::CpuBackend;
pub use dispatch::{DispatchPlan, StageDispatch};
pub use error::{ConfigError, GpuError, SimulationError};
pub use field::{FieldCell, FieldGrid, FieldParams};
pub use flock::{Agent, FlockParams};
pub use gpu::{GpuBackend, GpuContext};
pub use orchestrator::{FrameOrchestrator, FrameStats, SimSetup};
pub use render::{DrawArgs, DrawBounds, RenderInfo};
pub use surface::{
    MeshLayout, MeshRange, MeshSnapshot, MeshSource, MeshTransform, StaticMesh, SurfaceSampler,
    SurfaceSamples,
};
pub use time::FrameClock;

pub use glam::{Vec3, Vec4};

/// Everything needed to configure and run a simulation.
///
/// ```
/// use avoidance_boids::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backend::ComputeBackend;
    pub use crate::config::{AccumulationPolicy, DispatchPolicy, FieldConfig, FlockConfig, SimConfig};
    pub use crate::cpu::CpuBackend;
    pub use crate::error::SimulationError;
    pub use crate::flock::Agent;
    pub use crate::gpu::{GpuBackend, GpuContext};
    pub use crate::orchestrator::FrameOrchestrator;
    pub use crate::surface::{MeshSnapshot, MeshSource, MeshTransform, StaticMesh};
    pub use crate::time::FrameClock;
    pub use glam::Vec3;
}
