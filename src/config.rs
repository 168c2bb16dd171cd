//! Startup configuration.
//!
//! Everything here is fixed for the lifetime of a run. The builder structs are
//! plain data; [`SimParams::resolve`] validates them once and derives the
//! immutable parameter blocks every stage reads (squared distances, radians,
//! dispatch sizing, coerced population).
//!
//! # Example
//!
//! ```
//! use avoidance_boids::{FieldConfig, FlockConfig, SimConfig, Vec3};
//!
//! let config = SimConfig::new()
//!     .with_field(FieldConfig::new(16).with_cell_scale(0.5).with_center(Vec3::Y))
//!     .with_flock(
//!         FlockConfig::new(1000)
//!             .with_velocity_range(0.5, 2.0)
//!             .with_boundary(Vec3::ZERO, 4.0, 3.0),
//!     )
//!     .with_seed(7);
//!
//! assert_eq!(config.flock.population, 1000);
//! ```

use glam::Vec3;

use crate::dispatch::DispatchPlan;
use crate::error::ConfigError;
use crate::field::FieldParams;
use crate::flock::{closest_power_of_two, FlockParams};

/// How colliding surface samples combine inside one field cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AccumulationPolicy {
    /// The last sample written to a cell wins. Order-dependent on the GPU.
    LastWriteWins,
    /// Contributions are summed, then normalized into a unit direction.
    #[default]
    Additive,
}

impl AccumulationPolicy {
    /// Tag understood by the field kernels.
    pub fn gpu_tag(self) -> u32 {
        match self {
            AccumulationPolicy::LastWriteWins => 0,
            AccumulationPolicy::Additive => 1,
        }
    }
}

/// What to do when a unit count is not a multiple of the workgroup width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Round the group count up; kernels skip out-of-range invocations.
    #[default]
    Pad,
    /// Fail at startup.
    Reject,
}

/// Configuration of the repulsion grid.
#[derive(Clone, Debug)]
pub struct FieldConfig {
    /// Cells per axis (total cells = grid_length³).
    pub grid_length: u32,
    /// Edge length of one cell in world units.
    pub cell_scale: f32,
    /// World-space center of the field cube.
    pub center: Vec3,
    /// Collision policy for samples landing in the same cell.
    pub policy: AccumulationPolicy,
}

impl FieldConfig {
    /// Create a field with `grid_length` cells per axis.
    ///
    /// Default values:
    /// - `cell_scale`: 1.0
    /// - `center`: origin
    /// - `policy`: [`AccumulationPolicy::Additive`]
    pub fn new(grid_length: u32) -> Self {
        Self {
            grid_length,
            cell_scale: 1.0,
            center: Vec3::ZERO,
            policy: AccumulationPolicy::default(),
        }
    }

    pub fn with_cell_scale(mut self, cell_scale: f32) -> Self {
        self.cell_scale = cell_scale;
        self
    }

    pub fn with_center(mut self, center: Vec3) -> Self {
        self.center = center;
        self
    }

    pub fn with_policy(mut self, policy: AccumulationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Total number of cells in the grid, or `None` if it overflows a `u32`.
    pub fn total_cells(&self) -> Option<u32> {
        self.grid_length
            .checked_mul(self.grid_length)?
            .checked_mul(self.grid_length)
    }

    /// Half the edge length of the field cube.
    pub fn half_extent(&self) -> f32 {
        self.cell_scale * self.grid_length as f32 / 2.0
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_length == 0 {
            return Err(ConfigError::InvalidGridLength(self.grid_length));
        }
        if self.total_cells().is_none() {
            return Err(ConfigError::GridTooLarge(self.grid_length));
        }
        if !self.cell_scale.is_finite() || self.cell_scale <= 0.0 {
            return Err(ConfigError::InvalidCellScale(self.cell_scale));
        }
        Ok(())
    }
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self::new(32).with_cell_scale(0.5)
    }
}

/// Configuration of the flock: population and every force parameter.
///
/// Distances are linear and angles are in degrees here; they are squared and
/// converted to radians once by [`SimParams::resolve`].
#[derive(Clone, Debug)]
pub struct FlockConfig {
    /// Requested population. Coerced to the closest power of two.
    pub population: u32,

    pub cohesion_force: f32,
    pub separation_force: f32,
    pub alignment_force: f32,

    pub cohesion_distance: f32,
    pub separation_distance: f32,
    pub alignment_distance: f32,

    /// Field-of-view half angles in degrees.
    pub cohesion_angle: f32,
    pub separation_angle: f32,
    pub alignment_angle: f32,

    pub boundary_force: f32,
    pub boundary_radius: f32,
    pub boundary_center: Vec3,

    /// Weight applied to the field cell direction under the agent.
    pub avoid_force: f32,

    pub min_velocity: f32,
    pub max_velocity: f32,
    pub max_force: f32,

    /// Linear drag coefficient. Decays an unforced agent toward
    /// `min_velocity`; 0.0 disables it.
    pub drag: f32,
}

impl FlockConfig {
    /// Create a flock configuration with `population` agents and default forces.
    pub fn new(population: u32) -> Self {
        Self {
            population,
            cohesion_force: 1.0,
            separation_force: 1.5,
            alignment_force: 1.0,
            cohesion_distance: 1.0,
            separation_distance: 0.5,
            alignment_distance: 1.0,
            cohesion_angle: 90.0,
            separation_angle: 90.0,
            alignment_angle: 90.0,
            boundary_force: 3.0,
            boundary_radius: 10.0,
            boundary_center: Vec3::ZERO,
            avoid_force: 5.0,
            min_velocity: 1.0,
            max_velocity: 4.0,
            max_force: 5.0,
            drag: 0.5,
        }
    }

    pub fn with_population(mut self, population: u32) -> Self {
        self.population = population;
        self
    }

    /// Set the cohesion, separation and alignment weights.
    pub fn with_weights(mut self, cohesion: f32, separation: f32, alignment: f32) -> Self {
        self.cohesion_force = cohesion;
        self.separation_force = separation;
        self.alignment_force = alignment;
        self
    }

    /// Set the cohesion, separation and alignment neighbor distances.
    pub fn with_distances(mut self, cohesion: f32, separation: f32, alignment: f32) -> Self {
        self.cohesion_distance = cohesion;
        self.separation_distance = separation;
        self.alignment_distance = alignment;
        self
    }

    /// Set the cohesion, separation and alignment view angles, in degrees.
    pub fn with_angles(mut self, cohesion: f32, separation: f32, alignment: f32) -> Self {
        self.cohesion_angle = cohesion;
        self.separation_angle = separation;
        self.alignment_angle = alignment;
        self
    }

    /// Set the containment sphere and the force pulling agents back into it.
    pub fn with_boundary(mut self, center: Vec3, radius: f32, force: f32) -> Self {
        self.boundary_center = center;
        self.boundary_radius = radius;
        self.boundary_force = force;
        self
    }

    pub fn with_avoid_force(mut self, avoid_force: f32) -> Self {
        self.avoid_force = avoid_force;
        self
    }

    pub fn with_velocity_range(mut self, min: f32, max: f32) -> Self {
        self.min_velocity = min;
        self.max_velocity = max;
        self
    }

    pub fn with_max_force(mut self, max_force: f32) -> Self {
        self.max_force = max_force;
        self
    }

    /// Set linear drag. Negative values are clamped to zero.
    pub fn with_drag(mut self, drag: f32) -> Self {
        self.drag = drag.max(0.0);
        self
    }

    /// Population after power-of-two coercion.
    pub fn effective_population(&self) -> u32 {
        closest_power_of_two(self.population)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_velocity > 0.0 && self.max_velocity >= self.min_velocity) {
            return Err(ConfigError::InvalidVelocityRange {
                min: self.min_velocity,
                max: self.max_velocity,
            });
        }

        let non_negative = [
            ("cohesion_force", self.cohesion_force),
            ("separation_force", self.separation_force),
            ("alignment_force", self.alignment_force),
            ("cohesion_distance", self.cohesion_distance),
            ("separation_distance", self.separation_distance),
            ("alignment_distance", self.alignment_distance),
            ("boundary_force", self.boundary_force),
            ("boundary_radius", self.boundary_radius),
            ("avoid_force", self.avoid_force),
            ("max_force", self.max_force),
            ("drag", self.drag),
        ];
        for (name, value) in non_negative {
            if value < 0.0 || value.is_nan() {
                return Err(ConfigError::Negative { name, value });
            }
        }

        let angles = [
            ("cohesion_angle", self.cohesion_angle),
            ("separation_angle", self.separation_angle),
            ("alignment_angle", self.alignment_angle),
        ];
        for (name, degrees) in angles {
            if !(0.0..=180.0).contains(&degrees) {
                return Err(ConfigError::InvalidAngle { name, degrees });
            }
        }

        Ok(())
    }
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// Top-level configuration handed to the frame orchestrator.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub field: FieldConfig,
    pub flock: FlockConfig,
    /// Invocations per workgroup for every kernel.
    pub workgroup_size: u32,
    pub dispatch_policy: DispatchPolicy,
    /// Seed for agent spawning. `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Index count of the mesh instanced once per agent.
    pub agent_mesh_index_count: u32,
    /// Index count of the mesh instanced once per field cell.
    pub cell_mesh_index_count: u32,
}

impl SimConfig {
    pub fn new() -> Self {
        Self {
            field: FieldConfig::default(),
            flock: FlockConfig::default(),
            workgroup_size: 256,
            dispatch_policy: DispatchPolicy::default(),
            seed: None,
            agent_mesh_index_count: 36,
            cell_mesh_index_count: 36,
        }
    }

    pub fn with_field(mut self, field: FieldConfig) -> Self {
        self.field = field;
        self
    }

    pub fn with_flock(mut self, flock: FlockConfig) -> Self {
        self.flock = flock;
        self
    }

    pub fn with_workgroup_size(mut self, workgroup_size: u32) -> Self {
        self.workgroup_size = workgroup_size;
        self
    }

    pub fn with_dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the index counts of the agent and cell instance meshes.
    pub fn with_mesh_index_counts(mut self, agent: u32, cell: u32) -> Self {
        self.agent_mesh_index_count = agent;
        self.cell_mesh_index_count = cell;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable, validated parameters shared by every stage.
#[derive(Clone, Debug)]
pub struct SimParams {
    pub field: FieldParams,
    pub flock: FlockParams,
    pub dispatch: DispatchPlan,
    /// Population asked for before coercion.
    pub requested_population: u32,
    pub seed: Option<u64>,
    pub agent_mesh_index_count: u32,
    pub cell_mesh_index_count: u32,
}

impl SimParams {
    /// Validate `config` and derive the per-stage parameter blocks.
    ///
    /// `vertex_count` is the total number of surface samples across every mesh,
    /// needed to size the accumulation dispatch.
    pub fn resolve(config: &SimConfig, vertex_count: u32) -> Result<Self, ConfigError> {
        let field = FieldParams::from_config(&config.field)?;
        config.flock.validate()?;

        let population = config.flock.effective_population();
        if population != config.flock.population {
            log::warn!(
                "Population {} is not a power of two, using {}",
                config.flock.population,
                population
            );
        }

        let flock = FlockParams::from_config(&config.flock, population);
        let dispatch = DispatchPlan::new(
            config.workgroup_size,
            config.dispatch_policy,
            field.cell_count,
            vertex_count,
            population,
        )?;

        Ok(Self {
            field,
            flock,
            dispatch,
            requested_population: config.flock.population,
            seed: config.seed,
            agent_mesh_index_count: config.agent_mesh_index_count,
            cell_mesh_index_count: config.cell_mesh_index_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_config_defaults() {
        let config = FieldConfig::new(8);
        assert_eq!(config.grid_length, 8);
        assert_eq!(config.cell_scale, 1.0);
        assert_eq!(config.center, Vec3::ZERO);
        assert_eq!(config.policy, AccumulationPolicy::Additive);
        assert_eq!(config.total_cells(), Some(512));
        assert!((config.half_extent() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_flock_config_builder() {
        let config = FlockConfig::new(100)
            .with_weights(2.0, 3.0, 4.0)
            .with_distances(5.0, 6.0, 7.0)
            .with_angles(30.0, 60.0, 90.0)
            .with_velocity_range(0.5, 1.5)
            .with_drag(-1.0);

        assert_eq!(config.cohesion_force, 2.0);
        assert_eq!(config.separation_distance, 6.0);
        assert_eq!(config.alignment_angle, 90.0);
        assert_eq!(config.min_velocity, 0.5);
        assert_eq!(config.drag, 0.0);
        assert_eq!(config.effective_population(), 128);
    }

    #[test]
    fn test_resolve_squares_distances_and_converts_angles() {
        let config = SimConfig::new()
            .with_field(FieldConfig::new(4))
            .with_flock(
                FlockConfig::new(256)
                    .with_distances(2.0, 3.0, 4.0)
                    .with_angles(180.0, 90.0, 45.0)
                    .with_boundary(Vec3::ZERO, 5.0, 1.0),
            );
        let params = SimParams::resolve(&config, 0).unwrap();

        assert_eq!(params.flock.cohesion.distance_sq, 4.0);
        assert_eq!(params.flock.separation.distance_sq, 9.0);
        assert_eq!(params.flock.alignment.distance_sq, 16.0);
        assert!((params.flock.cohesion.angle - std::f32::consts::PI).abs() < 1e-6);
        assert!((params.flock.alignment.angle - std::f32::consts::FRAC_PI_4).abs() < 1e-6);
        assert_eq!(params.flock.boundary_radius_sq, 25.0);
        assert_eq!(params.flock.agent_count, 256);
        assert_eq!(params.requested_population, 256);
    }

    #[test]
    fn test_resolve_rejects_bad_velocity_range() {
        let config = SimConfig::new().with_flock(FlockConfig::new(64).with_velocity_range(2.0, 1.0));
        let err = SimParams::resolve(&config, 0).unwrap_err();
        assert_eq!(err, ConfigError::InvalidVelocityRange { min: 2.0, max: 1.0 });

        let config = SimConfig::new().with_flock(FlockConfig::new(64).with_velocity_range(0.0, 1.0));
        assert!(SimParams::resolve(&config, 0).is_err());
    }

    #[test]
    fn test_resolve_rejects_bad_field() {
        let config = SimConfig::new().with_field(FieldConfig::new(0));
        assert_eq!(
            SimParams::resolve(&config, 0).unwrap_err(),
            ConfigError::InvalidGridLength(0)
        );

        let config = SimConfig::new().with_field(FieldConfig::new(4).with_cell_scale(-1.0));
        assert_eq!(
            SimParams::resolve(&config, 0).unwrap_err(),
            ConfigError::InvalidCellScale(-1.0)
        );
    }

    #[test]
    fn test_resolve_rejects_oversized_grid() {
        // 1626³ is the first cube past u32::MAX.
        let config = SimConfig::new().with_field(FieldConfig::new(1626));
        assert_eq!(
            SimParams::resolve(&config, 0).unwrap_err(),
            ConfigError::GridTooLarge(1626)
        );
        assert_eq!(FieldConfig::new(1625).total_cells(), Some(1625 * 1625 * 1625));
        assert_eq!(FieldConfig::new(u32::MAX).total_cells(), None);
    }

    #[test]
    fn test_resolve_rejects_negative_and_angles() {
        let config = SimConfig::new().with_flock(FlockConfig::new(64).with_avoid_force(-2.0));
        assert_eq!(
            SimParams::resolve(&config, 0).unwrap_err(),
            ConfigError::Negative { name: "avoid_force", value: -2.0 }
        );

        let config = SimConfig::new().with_flock(FlockConfig::new(64).with_angles(90.0, 200.0, 90.0));
        assert_eq!(
            SimParams::resolve(&config, 0).unwrap_err(),
            ConfigError::InvalidAngle { name: "separation_angle", degrees: 200.0 }
        );
    }

    #[test]
    fn test_policy_gpu_tags() {
        assert_eq!(AccumulationPolicy::LastWriteWins.gpu_tag(), 0);
        assert_eq!(AccumulationPolicy::Additive.gpu_tag(), 1);
    }
}
