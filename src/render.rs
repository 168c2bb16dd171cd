//! What render consumers get: indirect draw arguments and culling bounds.
//!
//! Rendering itself lives outside this crate. A consumer instancing a mesh
//! per agent (or per field cell) binds the committed agent (or cell) buffer
//! and issues one indexed-indirect draw with the arguments below.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::config::SimParams;

/// Indexed-indirect draw arguments, laid out as the GPU expects them.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

const _: () = assert!(std::mem::size_of::<DrawArgs>() == 20);

impl DrawArgs {
    pub fn instanced(index_count: u32, instance_count: u32) -> Self {
        Self {
            index_count,
            instance_count,
            ..Default::default()
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Axis-aligned bounds for frustum culling of the instanced draws.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl DrawBounds {
    /// Bounds covering the field cube and the boundary sphere.
    ///
    /// Agents can overshoot the boundary sphere before the boundary force
    /// turns them, so consumers should treat this as a culling hint.
    pub fn from_params(params: &SimParams) -> Self {
        let radius = Vec3::splat(params.flock.boundary_radius);
        let center = params.flock.boundary_center;
        Self {
            min: params.field.min_corner.min(center - radius),
            max: params.field.max_corner.max(center + radius),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// Everything a consumer needs to draw the flock and the field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderInfo {
    /// One instance per agent.
    pub agent_draw: DrawArgs,
    /// One instance per field cell.
    pub cell_draw: DrawArgs,
    pub bounds: DrawBounds,
    pub agent_count: u32,
    pub grid_length: u32,
    pub cell_scale: f32,
}

impl RenderInfo {
    pub fn from_params(params: &SimParams) -> Self {
        Self {
            agent_draw: DrawArgs::instanced(params.agent_mesh_index_count, params.flock.agent_count),
            cell_draw: DrawArgs::instanced(params.cell_mesh_index_count, params.field.cell_count),
            bounds: DrawBounds::from_params(params),
            agent_count: params.flock.agent_count,
            grid_length: params.field.grid_length,
            cell_scale: params.field.cell_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldConfig, FlockConfig, SimConfig};

    fn params() -> SimParams {
        let config = SimConfig::new()
            .with_field(FieldConfig::new(4).with_cell_scale(0.5))
            .with_flock(FlockConfig::new(100).with_boundary(Vec3::new(5.0, 0.0, 0.0), 2.0, 1.0))
            .with_mesh_index_counts(240, 36);
        SimParams::resolve(&config, 0).unwrap()
    }

    #[test]
    fn test_draw_args_layout() {
        let args = DrawArgs::instanced(36, 128);
        let words: &[u32] = bytemuck::cast_slice(args.as_bytes());
        assert_eq!(words, &[36, 128, 0, 0, 0]);
    }

    #[test]
    fn test_render_info() {
        let info = RenderInfo::from_params(&params());
        assert_eq!(info.agent_draw, DrawArgs::instanced(240, 128));
        assert_eq!(info.cell_draw, DrawArgs::instanced(36, 64));
        assert_eq!(info.agent_count, 128);
        assert_eq!(info.grid_length, 4);
    }

    #[test]
    fn test_bounds_cover_field_and_boundary() {
        let bounds = DrawBounds::from_params(&params());
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, -2.0));
        assert_eq!(bounds.max, Vec3::new(7.0, 2.0, 2.0));
        assert!(bounds.contains(Vec3::new(6.5, 0.0, 0.0)));
        assert!(!bounds.contains(Vec3::new(7.5, 0.0, 0.0)));
    }
}
