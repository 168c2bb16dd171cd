//! `Pod` mirrors of the WGSL structs.
//!
//! Every `vec3` is padded to 16 bytes to match WGSL alignment rules. The
//! size asserts pin each layout to its WGSL counterpart in `shaders.rs`.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3};

use super::shaders::fixed_point_scale;
use crate::field::{FieldCell, FieldParams};
use crate::flock::{Agent, FlockParams};
use crate::surface::{MeshLayout, MeshMatrices};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FieldCellGpu {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub direction: [f32; 3],
    pub _pad1: f32,
}

impl From<&FieldCell> for FieldCellGpu {
    fn from(cell: &FieldCell) -> Self {
        Self {
            position: cell.position.to_array(),
            direction: cell.direction.to_array(),
            ..Default::default()
        }
    }
}

impl From<&FieldCellGpu> for FieldCell {
    fn from(cell: &FieldCellGpu) -> Self {
        Self {
            position: Vec3::from_array(cell.position),
            direction: Vec3::from_array(cell.direction),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AgentGpu {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub velocity: [f32; 3],
    pub _pad1: f32,
}

impl From<&Agent> for AgentGpu {
    fn from(agent: &Agent) -> Self {
        Self {
            position: agent.position.to_array(),
            velocity: agent.velocity.to_array(),
            ..Default::default()
        }
    }
}

impl From<&AgentGpu> for Agent {
    fn from(agent: &AgentGpu) -> Self {
        Self {
            position: Vec3::from_array(agent.position),
            velocity: Vec3::from_array(agent.velocity),
        }
    }
}

/// Per-mesh transform and flat vertex range. The normal matrix is widened to
/// a `mat4x4` to sidestep `mat3x3` column padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshRangeGpu {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub vertex_start: u32,
    pub vertex_end: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl MeshRangeGpu {
    pub fn new(matrices: &MeshMatrices, vertex_start: u32, vertex_end: u32) -> Self {
        Self {
            model: matrices.model.to_cols_array_2d(),
            normal_matrix: Mat4::from_mat3(matrices.normal).to_cols_array_2d(),
            vertex_start,
            vertex_end,
            _pad0: 0,
            _pad1: 0,
        }
    }

    /// One entry per mesh in `layout`, in mesh order.
    pub fn ranges_for<'a>(
        layout: &'a MeshLayout,
        matrices: &'a [MeshMatrices],
    ) -> impl Iterator<Item = Self> + 'a {
        layout
            .ranges()
            .iter()
            .map(move |r| Self::new(&matrices[r.mesh_id], r.start, r.end))
    }
}

impl Default for MeshRangeGpu {
    fn default() -> Self {
        let identity = MeshMatrices {
            model: Mat4::IDENTITY,
            normal: Mat3::IDENTITY,
        };
        Self::new(&identity, 0, 0)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FieldParamsGpu {
    pub min_corner: [f32; 4],
    pub max_corner: [f32; 4],
    pub cell_scale: f32,
    pub grid_length: u32,
    pub cell_count: u32,
    pub vertex_count: u32,
    pub mesh_count: u32,
    pub policy: u32,
    /// Fixed-point scale of the additive sums, sized to the sample count.
    pub fixed_point_scale: f32,
    pub _pad1: u32,
}

impl FieldParamsGpu {
    pub fn new(params: &FieldParams, layout: &MeshLayout) -> Self {
        Self {
            min_corner: params.min_corner.extend(0.0).to_array(),
            max_corner: params.max_corner.extend(0.0).to_array(),
            cell_scale: params.cell_scale,
            grid_length: params.grid_length,
            cell_count: params.cell_count,
            vertex_count: layout.vertex_count(),
            mesh_count: layout.mesh_count() as u32,
            policy: params.policy.gpu_tag(),
            fixed_point_scale: fixed_point_scale(layout.vertex_count()),
            _pad1: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FlockParamsGpu {
    pub boundary_center: [f32; 4],
    pub cohesion_weight: f32,
    pub cohesion_distance_sq: f32,
    pub cohesion_angle: f32,
    pub separation_weight: f32,
    pub separation_distance_sq: f32,
    pub separation_angle: f32,
    pub alignment_weight: f32,
    pub alignment_distance_sq: f32,
    pub alignment_angle: f32,
    pub boundary_radius_sq: f32,
    pub boundary_force: f32,
    pub avoid_force: f32,
    pub min_velocity: f32,
    pub max_velocity: f32,
    pub max_force: f32,
    pub drag: f32,
    pub agent_count: u32,
    pub _pad0: u32,
    pub _pad1: u32,
    pub _pad2: u32,
}

impl From<&FlockParams> for FlockParamsGpu {
    fn from(p: &FlockParams) -> Self {
        Self {
            boundary_center: p.boundary_center.extend(0.0).to_array(),
            cohesion_weight: p.cohesion.weight,
            cohesion_distance_sq: p.cohesion.distance_sq,
            cohesion_angle: p.cohesion.angle,
            separation_weight: p.separation.weight,
            separation_distance_sq: p.separation.distance_sq,
            separation_angle: p.separation.angle,
            alignment_weight: p.alignment.weight,
            alignment_distance_sq: p.alignment.distance_sq,
            alignment_angle: p.alignment.angle,
            boundary_radius_sq: p.boundary_radius_sq,
            boundary_force: p.boundary_force,
            avoid_force: p.avoid_force,
            min_velocity: p.min_velocity,
            max_velocity: p.max_velocity,
            max_force: p.max_force,
            drag: p.drag,
            agent_count: p.agent_count,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        }
    }
}

/// Values that change every frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameParamsGpu {
    pub delta_time: f32,
    pub frame: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

const _: () = assert!(std::mem::size_of::<FieldCellGpu>() == 32);
const _: () = assert!(std::mem::size_of::<AgentGpu>() == 32);
const _: () = assert!(std::mem::size_of::<MeshRangeGpu>() == 144);
const _: () = assert!(std::mem::size_of::<FieldParamsGpu>() == 64);
const _: () = assert!(std::mem::size_of::<FlockParamsGpu>() == 96);
const _: () = assert!(std::mem::size_of::<FrameParamsGpu>() == 16);
