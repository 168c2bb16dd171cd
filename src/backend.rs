//! The seam between the frame orchestrator and where the work runs.
//!
//! A backend owns every per-run buffer: field cells, surface samples, mesh
//! transforms, the two agent buffers and the draw arguments. The orchestrator
//! only ever calls the stage methods in this order:
//!
//! ```text
//! begin_frame -> reset_field -> upload_surface -> rebuild_field -> step_agents -> end_frame
//! ```
//!
//! Implementations:
//! - [`CpuBackend`](crate::cpu::CpuBackend): rayon over agents, reference semantics
//! - [`GpuBackend`](crate::gpu::GpuBackend): wgpu compute passes

use crate::error::SimulationError;
use crate::field::FieldCell;
use crate::flock::Agent;
use crate::surface::{MeshLayout, SurfaceSamples};

pub trait ComputeBackend {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Start recording a frame.
    fn begin_frame(&mut self) {}

    /// Zero every field direction and any accumulation scratch.
    fn reset_field(&mut self);

    /// Take this frame's flattened surface samples and mesh transforms.
    fn upload_surface(&mut self, samples: &SurfaceSamples, layout: &MeshLayout);

    /// Scatter the uploaded samples into the field and resolve it.
    fn rebuild_field(&mut self);

    /// Step every agent from the committed buffer into the other one, then
    /// commit it.
    fn step_agents(&mut self, dt: f32);

    /// Finish the frame. The GPU backend submits its recorded passes here.
    fn end_frame(&mut self) -> Result<(), SimulationError> {
        Ok(())
    }

    /// Copy of the committed agent buffer.
    fn read_agents(&mut self) -> Result<Vec<Agent>, SimulationError>;

    /// Copy of the field cells.
    fn read_field(&mut self) -> Result<Vec<FieldCell>, SimulationError>;
}
