//! The repulsion field: a fixed 3D grid of cells covering a cube.
//!
//! Each cell has a fixed world position and a `direction` that is rebuilt
//! every frame from the surface samples. Agents read the direction of the cell
//! nearest to them and steer along it.
//!
//! # Layout
//!
//! The grid holds `L³` cells in a flat array. Cell `(i, j, k)` lives at index
//! `i*L*L + j*L + k`, with `i` along x, `j` along y and `k` along z, and is
//! centered at `center - L*s/2 + s/2 + (i, j, k) * s`.
//!
//! # Rebuild
//!
//! ```text
//! reset()       -> every direction (and the sum scratch) back to zero
//! accumulate()  -> each world-space sample writes its unit normal to its cell
//! resolve()     -> Additive only: normalize the per-cell sums
//! ```

use glam::{UVec3, Vec3};

use crate::config::{AccumulationPolicy, FieldConfig};
use crate::error::ConfigError;
use crate::flock::safe_normalize;
use crate::surface::{MeshLayout, SurfaceSamples};

/// One grid cell. Only `direction` changes after startup.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FieldCell {
    pub position: Vec3,
    pub direction: Vec3,
}

/// Resolved grid geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldParams {
    pub grid_length: u32,
    pub cell_scale: f32,
    pub center: Vec3,
    /// Lower corner of the field cube.
    pub min_corner: Vec3,
    /// Upper corner of the field cube.
    pub max_corner: Vec3,
    pub cell_count: u32,
    pub policy: AccumulationPolicy,
}

impl FieldParams {
    /// Validate `config` and derive the grid geometry.
    pub fn from_config(config: &FieldConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cell_count = config
            .total_cells()
            .ok_or(ConfigError::GridTooLarge(config.grid_length))?;
        let half = Vec3::splat(config.half_extent());
        Ok(Self {
            grid_length: config.grid_length,
            cell_scale: config.cell_scale,
            center: config.center,
            min_corner: config.center - half,
            max_corner: config.center + half,
            cell_count,
            policy: config.policy,
        })
    }

    /// Flat index of cell `(i, j, k)`.
    #[inline]
    pub fn index(&self, i: u32, j: u32, k: u32) -> u32 {
        let l = self.grid_length;
        i * l * l + j * l + k
    }

    /// Inverse of [`index`](Self::index).
    #[inline]
    pub fn coords(&self, index: u32) -> UVec3 {
        let l = self.grid_length;
        UVec3::new(index / (l * l), (index / l) % l, index % l)
    }

    /// World-space center of cell `coords`.
    pub fn cell_position(&self, coords: UVec3) -> Vec3 {
        let s = self.cell_scale;
        self.min_corner + Vec3::splat(s / 2.0) + coords.as_vec3() * s
    }

    /// Whether `point` lies inside the field cube (faces included).
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min_corner).all() && point.cmple(self.max_corner).all()
    }

    /// Index of the cell containing `point`, or `None` outside the cube.
    pub fn cell_of(&self, point: Vec3) -> Option<u32> {
        if !self.contains(point) {
            return None;
        }
        Some(self.nearest_cell(point))
    }

    /// Index of the cell nearest to `point`.
    ///
    /// Cell coordinates are clamped into the grid, so points outside the cube
    /// map to the closest boundary cell.
    pub fn nearest_cell(&self, point: Vec3) -> u32 {
        let max = (self.grid_length - 1) as f32;
        let local = ((point - self.min_corner) / self.cell_scale).floor();
        let c = local.clamp(Vec3::ZERO, Vec3::splat(max)).as_uvec3();
        self.index(c.x, c.y, c.z)
    }

    /// Cells at their fixed positions with zero direction.
    pub fn initial_cells(&self) -> Vec<FieldCell> {
        (0..self.cell_count)
            .map(|index| FieldCell {
                position: self.cell_position(self.coords(index)),
                direction: Vec3::ZERO,
            })
            .collect()
    }
}

/// CPU-resident field grid.
pub struct FieldGrid {
    params: FieldParams,
    cells: Vec<FieldCell>,
    /// Per-cell running sums for [`AccumulationPolicy::Additive`].
    sums: Vec<Vec3>,
}

impl FieldGrid {
    pub fn new(params: FieldParams) -> Self {
        let sums = match params.policy {
            AccumulationPolicy::Additive => vec![Vec3::ZERO; params.cell_count as usize],
            AccumulationPolicy::LastWriteWins => Vec::new(),
        };
        Self {
            cells: params.initial_cells(),
            sums,
            params,
        }
    }

    pub fn params(&self) -> &FieldParams {
        &self.params
    }

    pub fn cells(&self) -> &[FieldCell] {
        &self.cells
    }

    /// Clear every direction and the sum scratch.
    pub fn reset(&mut self) {
        for cell in &mut self.cells {
            cell.direction = Vec3::ZERO;
        }
        self.sums.fill(Vec3::ZERO);
    }

    /// Scatter the world-space normal of every sample into its cell.
    ///
    /// Samples are visited in flat-index order, which fixes the winner under
    /// [`AccumulationPolicy::LastWriteWins`].
    pub fn accumulate(&mut self, samples: &SurfaceSamples, layout: &MeshLayout) {
        for range in layout.ranges() {
            let matrices = &samples.matrices[range.mesh_id];
            for v in range.start as usize..range.end as usize {
                let world = matrices.model.transform_point3(samples.positions[v]);
                let Some(index) = self.params.cell_of(world) else {
                    continue;
                };
                let normal = safe_normalize(matrices.normal * samples.normals[v]);
                match self.params.policy {
                    AccumulationPolicy::LastWriteWins => {
                        self.cells[index as usize].direction = normal;
                    }
                    AccumulationPolicy::Additive => {
                        self.sums[index as usize] += normal;
                    }
                }
            }
        }
    }

    /// Turn the accumulated sums into unit directions.
    pub fn resolve(&mut self) {
        if self.params.policy != AccumulationPolicy::Additive {
            return;
        }
        for (cell, sum) in self.cells.iter_mut().zip(&self.sums) {
            cell.direction = safe_normalize(*sum);
        }
    }

    /// Full rebuild: reset, accumulate, resolve.
    pub fn rebuild(&mut self, samples: &SurfaceSamples, layout: &MeshLayout) {
        self.reset();
        self.accumulate(samples, layout);
        self.resolve();
    }

    /// Cell nearest to `point`.
    #[inline]
    pub fn nearest(&self, point: Vec3) -> &FieldCell {
        &self.cells[self.params.nearest_cell(point) as usize]
    }
}
