//! Flocking: per-agent forces and integration.
//!
//! Each agent reads the whole prior flock and writes only its own next state.
//! The blended force is
//!
//! ```text
//! cohesion + separation + alignment   (brute-force neighbor scan)
//! + boundary                          (outside the containment sphere)
//! + field.direction * avoid_force     (nearest field cell)
//! - velocity * drag
//! ```
//!
//! clamped to `max_force`, then integrated with speed clamped into
//! `[min_velocity, max_velocity]`.

use glam::Vec3;
use rand::Rng;

use crate::config::FlockConfig;
use crate::field::FieldGrid;

/// Position and velocity of one boid.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Agent {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Gate and weight of one neighbor rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RuleParams {
    pub weight: f32,
    /// Squared neighbor distance threshold.
    pub distance_sq: f32,
    /// Half view angle in radians.
    pub angle: f32,
}

impl RuleParams {
    fn new(weight: f32, distance: f32, degrees: f32) -> Self {
        Self {
            weight,
            distance_sq: distance * distance,
            angle: degrees.to_radians(),
        }
    }

    #[inline]
    fn admits(&self, distance_sq: f32, angle: f32) -> bool {
        distance_sq <= self.distance_sq && angle <= self.angle
    }
}

/// Resolved flock parameters, shared by every agent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlockParams {
    pub agent_count: u32,
    pub cohesion: RuleParams,
    pub separation: RuleParams,
    pub alignment: RuleParams,
    pub boundary_center: Vec3,
    pub boundary_radius: f32,
    pub boundary_radius_sq: f32,
    pub boundary_force: f32,
    pub avoid_force: f32,
    pub min_velocity: f32,
    pub max_velocity: f32,
    pub max_force: f32,
    pub drag: f32,
}

impl FlockParams {
    pub fn from_config(config: &FlockConfig, agent_count: u32) -> Self {
        Self {
            agent_count,
            cohesion: RuleParams::new(
                config.cohesion_force,
                config.cohesion_distance,
                config.cohesion_angle,
            ),
            separation: RuleParams::new(
                config.separation_force,
                config.separation_distance,
                config.separation_angle,
            ),
            alignment: RuleParams::new(
                config.alignment_force,
                config.alignment_distance,
                config.alignment_angle,
            ),
            boundary_center: config.boundary_center,
            boundary_radius: config.boundary_radius,
            boundary_radius_sq: config.boundary_radius * config.boundary_radius,
            boundary_force: config.boundary_force,
            avoid_force: config.avoid_force,
            min_velocity: config.min_velocity,
            max_velocity: config.max_velocity,
            max_force: config.max_force,
            drag: config.drag,
        }
    }
}

/// Closest power of two to `n`. Ties round up and 0 becomes 1.
pub fn closest_power_of_two(n: u32) -> u32 {
    if n <= 1 {
        return 1;
    }
    if n.is_power_of_two() {
        return n;
    }
    let lower = 1u32 << (31 - n.leading_zeros());
    match lower.checked_mul(2) {
        Some(upper) if upper - n <= n - lower => upper,
        _ => lower,
    }
}

/// `v` normalized, or zero when `|v|` is within `f32::EPSILON` of zero.
#[inline]
pub fn safe_normalize(v: Vec3) -> Vec3 {
    let len = v.length();
    if len > f32::EPSILON {
        v / len
    } else {
        Vec3::ZERO
    }
}

/// Steering force toward `direction` at full speed, scaled by `weight`.
#[inline]
fn steer(direction: Vec3, velocity: Vec3, max_velocity: f32, weight: f32) -> Vec3 {
    let heading = safe_normalize(direction);
    if heading == Vec3::ZERO {
        return Vec3::ZERO;
    }
    (heading * max_velocity - velocity) * weight
}

/// The three neighbor-rule forces acting on one agent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlockForces {
    pub cohesion: Vec3,
    pub separation: Vec3,
    pub alignment: Vec3,
}

impl FlockForces {
    pub fn total(&self) -> Vec3 {
        self.cohesion + self.separation + self.alignment
    }
}

/// Cohesion, separation and alignment for agent `index` from a full scan.
pub fn flocking_forces(index: usize, agents: &[Agent], params: &FlockParams) -> FlockForces {
    let me = agents[index];
    let heading = safe_normalize(me.velocity);

    let mut cohesion_sum = Vec3::ZERO;
    let mut cohesion_count = 0u32;
    let mut separation_sum = Vec3::ZERO;
    let mut alignment_sum = Vec3::ZERO;
    let mut alignment_count = 0u32;

    for (other_idx, other) in agents.iter().enumerate() {
        if other_idx == index {
            continue;
        }
        let offset = other.position - me.position;
        let distance_sq = offset.length_squared();
        let angle = heading.dot(safe_normalize(offset)).clamp(-1.0, 1.0).acos();

        if params.cohesion.admits(distance_sq, angle) {
            cohesion_sum += other.position;
            cohesion_count += 1;
        }
        if params.separation.admits(distance_sq, angle) {
            let distance = distance_sq.sqrt();
            if distance > f32::EPSILON {
                separation_sum -= offset / distance / distance;
            }
        }
        if params.alignment.admits(distance_sq, angle) {
            alignment_sum += other.velocity;
            alignment_count += 1;
        }
    }

    let mut forces = FlockForces::default();
    if cohesion_count > 0 {
        let centroid = cohesion_sum / cohesion_count as f32;
        forces.cohesion = steer(
            centroid - me.position,
            me.velocity,
            params.max_velocity,
            params.cohesion.weight,
        );
    }
    forces.separation = steer(
        separation_sum,
        me.velocity,
        params.max_velocity,
        params.separation.weight,
    );
    if alignment_count > 0 {
        forces.alignment = steer(
            alignment_sum / alignment_count as f32,
            me.velocity,
            params.max_velocity,
            params.alignment.weight,
        );
    }
    forces
}

/// Pull back toward the boundary center once outside the boundary sphere.
pub fn boundary_force(position: Vec3, params: &FlockParams) -> Vec3 {
    let offset = params.boundary_center - position;
    if offset.length_squared() > params.boundary_radius_sq {
        safe_normalize(offset) * params.boundary_force
    } else {
        Vec3::ZERO
    }
}

/// Scale `velocity` so its speed lies in `[min, max]`.
///
/// A near-zero velocity keeps `prior`'s heading (or +Z) at `min` speed.
pub fn clamp_speed(velocity: Vec3, prior: Vec3, min: f32, max: f32) -> Vec3 {
    let speed = velocity.length();
    if speed > f32::EPSILON {
        return velocity * (speed.clamp(min, max) / speed);
    }
    let heading = safe_normalize(prior);
    if heading == Vec3::ZERO {
        Vec3::Z * min
    } else {
        heading * min
    }
}

/// Advance agent `index` by `dt`, reading `prior` and writing `out`.
pub fn step_agent(
    index: usize,
    prior: &[Agent],
    field: &FieldGrid,
    params: &FlockParams,
    dt: f32,
    out: &mut Agent,
) {
    let me = prior[index];

    let mut force = flocking_forces(index, prior, params).total();
    force += boundary_force(me.position, params);
    force += field.nearest(me.position).direction * params.avoid_force;
    force -= me.velocity * params.drag;
    let force = force.clamp_length_max(params.max_force);

    let velocity = clamp_speed(
        me.velocity + force * dt,
        me.velocity,
        params.min_velocity,
        params.max_velocity,
    );
    out.velocity = velocity;
    out.position = me.position + velocity * dt;
}

/// Spawn `params.agent_count` agents uniformly inside the boundary sphere,
/// each moving in a random direction at `min_velocity`.
pub fn spawn_agents<R: Rng>(params: &FlockParams, rng: &mut R) -> Vec<Agent> {
    (0..params.agent_count)
        .map(|_| {
            let offset = random_in_unit_sphere(rng) * params.boundary_radius;
            let direction = random_unit_vector(rng);
            Agent {
                position: params.boundary_center + offset,
                velocity: direction * params.min_velocity,
            }
        })
        .collect()
}

fn random_in_unit_sphere<R: Rng>(rng: &mut R) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        );
        if v.length_squared() <= 1.0 {
            return v;
        }
    }
}

fn random_unit_vector<R: Rng>(rng: &mut R) -> Vec3 {
    loop {
        let v = random_in_unit_sphere(rng);
        let len_sq = v.length_squared();
        if len_sq > 1e-6 {
            return v / len_sq.sqrt();
        }
    }
}
