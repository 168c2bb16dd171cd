//! WGSL sources for the field and flock kernels.
//!
//! Both modules are assembled at startup with the workgroup width baked in.
//! Struct declarations mirror `layout.rs` field for field.

/// Largest fixed-point scale for atomic direction sums (16.16).
pub const FIELD_SCALE: f32 = 65536.0;

/// Fixed-point scale for a run with `vertex_count` surface samples.
///
/// No normal component exceeds 1, so even with every sample in one cell the
/// `i32` sum stays within `vertex_count * scale <= i32::MAX`.
pub fn fixed_point_scale(vertex_count: u32) -> f32 {
    let bound = i32::MAX as u32 / vertex_count.max(1);
    (bound.max(1) as f32).min(FIELD_SCALE)
}

const COMMON_WGSL: &str = r#"
const EPSILON: f32 = 1.1920929e-7;

struct FieldCell {
    position: vec3<f32>,
    direction: vec3<f32>,
}

struct FieldParams {
    min_corner: vec4<f32>,
    max_corner: vec4<f32>,
    cell_scale: f32,
    grid_length: u32,
    cell_count: u32,
    vertex_count: u32,
    mesh_count: u32,
    policy: u32,
    fixed_point_scale: f32,
    _pad1: u32,
}

fn safe_normalize(v: vec3<f32>) -> vec3<f32> {
    let len = length(v);
    if len > EPSILON {
        return v / len;
    }
    return vec3<f32>(0.0);
}
"#;

/// Field rebuild module with entry points `reset_field`, `accumulate_field`
/// and `resolve_field`, sharing one bind group:
///
/// | binding | resource |
/// |---|---|
/// | 0 | `cells`, read-write |
/// | 1 | `accum`, `atomic<i32>` x3 per cell |
/// | 2 | `field`, uniform |
/// | 3 | `positions`, `vec4` per sample |
/// | 4 | `normals`, `vec4` per sample |
/// | 5 | `meshes`, one `MeshRange` per mesh |
pub fn field_shader(workgroup_size: u32) -> String {
    format!(
        r#"{COMMON_WGSL}
const POLICY_LAST_WRITE: u32 = 0u;

struct MeshRange {{
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    vertex_start: u32,
    vertex_end: u32,
    _pad0: u32,
    _pad1: u32,
}}

@group(0) @binding(0) var<storage, read_write> cells: array<FieldCell>;
@group(0) @binding(1) var<storage, read_write> accum: array<atomic<i32>>;
@group(0) @binding(2) var<uniform> field: FieldParams;
@group(0) @binding(3) var<storage, read> positions: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read> normals: array<vec4<f32>>;
@group(0) @binding(5) var<storage, read> meshes: array<MeshRange>;

// First mesh whose range ends past flat_index. Returns mesh_count past the end.
fn owning_mesh(flat_index: u32) -> u32 {{
    var lo = 0u;
    var hi = field.mesh_count;
    while lo < hi {{
        let mid = (lo + hi) / 2u;
        if meshes[mid].vertex_end <= flat_index {{
            lo = mid + 1u;
        }} else {{
            hi = mid;
        }}
    }}
    return lo;
}}

fn cell_index(c: vec3<u32>) -> u32 {{
    let l = field.grid_length;
    return c.x * l * l + c.y * l + c.z;
}}

@compute @workgroup_size({workgroup_size})
fn reset_field(@builtin(global_invocation_id) global_id: vec3<u32>) {{
    let idx = global_id.x;
    if idx >= field.cell_count {{
        return;
    }}
    cells[idx].direction = vec3<f32>(0.0);
    atomicStore(&accum[idx * 3u], 0);
    atomicStore(&accum[idx * 3u + 1u], 0);
    atomicStore(&accum[idx * 3u + 2u], 0);
}}

@compute @workgroup_size({workgroup_size})
fn accumulate_field(@builtin(global_invocation_id) global_id: vec3<u32>) {{
    let v = global_id.x;
    if v >= field.vertex_count {{
        return;
    }}
    let m = owning_mesh(v);
    if m >= field.mesh_count {{
        return;
    }}
    let mesh = meshes[m];

    let world = (mesh.model * vec4<f32>(positions[v].xyz, 1.0)).xyz;
    if any(world < field.min_corner.xyz) || any(world > field.max_corner.xyz) {{
        return;
    }}
    let normal = safe_normalize((mesh.normal_matrix * vec4<f32>(normals[v].xyz, 0.0)).xyz);

    let max_cell = f32(field.grid_length - 1u);
    let local_cell = floor((world - field.min_corner.xyz) / field.cell_scale);
    let idx = cell_index(vec3<u32>(clamp(local_cell, vec3<f32>(0.0), vec3<f32>(max_cell))));

    if field.policy == POLICY_LAST_WRITE {{
        cells[idx].direction = normal;
        return;
    }}

    let fixed_point = vec3<i32>(round(normal * field.fixed_point_scale));
    atomicAdd(&accum[idx * 3u], fixed_point.x);
    atomicAdd(&accum[idx * 3u + 1u], fixed_point.y);
    atomicAdd(&accum[idx * 3u + 2u], fixed_point.z);
}}

@compute @workgroup_size({workgroup_size})
fn resolve_field(@builtin(global_invocation_id) global_id: vec3<u32>) {{
    let idx = global_id.x;
    if idx >= field.cell_count || field.policy == POLICY_LAST_WRITE {{
        return;
    }}
    let sum = vec3<f32>(
        f32(atomicLoad(&accum[idx * 3u])),
        f32(atomicLoad(&accum[idx * 3u + 1u])),
        f32(atomicLoad(&accum[idx * 3u + 2u])),
    ) / field.fixed_point_scale;
    cells[idx].direction = safe_normalize(sum);
}}
"#
    )
}

/// Flock step module with entry point `update_boids`:
///
/// | binding | resource |
/// |---|---|
/// | 0 | `agents_in`, committed buffer, read-only |
/// | 1 | `agents_out`, next buffer |
/// | 2 | `cells`, read-only |
/// | 3 | `field`, uniform |
/// | 4 | `flock`, uniform |
/// | 5 | `frame`, uniform |
pub fn boids_shader(workgroup_size: u32) -> String {
    format!(
        r#"{COMMON_WGSL}
struct Agent {{
    position: vec3<f32>,
    velocity: vec3<f32>,
}}

struct FlockParams {{
    boundary_center: vec4<f32>,
    cohesion_weight: f32,
    cohesion_distance_sq: f32,
    cohesion_angle: f32,
    separation_weight: f32,
    separation_distance_sq: f32,
    separation_angle: f32,
    alignment_weight: f32,
    alignment_distance_sq: f32,
    alignment_angle: f32,
    boundary_radius_sq: f32,
    boundary_force: f32,
    avoid_force: f32,
    min_velocity: f32,
    max_velocity: f32,
    max_force: f32,
    drag: f32,
    agent_count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}}

struct FrameParams {{
    delta_time: f32,
    frame: u32,
    _pad0: u32,
    _pad1: u32,
}}

@group(0) @binding(0) var<storage, read> agents_in: array<Agent>;
@group(0) @binding(1) var<storage, read_write> agents_out: array<Agent>;
@group(0) @binding(2) var<storage, read> cells: array<FieldCell>;
@group(0) @binding(3) var<uniform> field: FieldParams;
@group(0) @binding(4) var<uniform> flock: FlockParams;
@group(0) @binding(5) var<uniform> frame: FrameParams;

fn steer(direction: vec3<f32>, velocity: vec3<f32>, weight: f32) -> vec3<f32> {{
    let heading = safe_normalize(direction);
    if all(heading == vec3<f32>(0.0)) {{
        return vec3<f32>(0.0);
    }}
    return (heading * flock.max_velocity - velocity) * weight;
}}

fn clamp_length_max(v: vec3<f32>, max_len: f32) -> vec3<f32> {{
    let len_sq = dot(v, v);
    if len_sq > max_len * max_len {{
        return v * (max_len / sqrt(len_sq));
    }}
    return v;
}}

fn nearest_cell(p: vec3<f32>) -> u32 {{
    let max_cell = f32(field.grid_length - 1u);
    let local_cell = floor((p - field.min_corner.xyz) / field.cell_scale);
    let c = vec3<u32>(clamp(local_cell, vec3<f32>(0.0), vec3<f32>(max_cell)));
    let l = field.grid_length;
    return c.x * l * l + c.y * l + c.z;
}}

@compute @workgroup_size({workgroup_size})
fn update_boids(@builtin(global_invocation_id) global_id: vec3<u32>) {{
    let index = global_id.x;
    if index >= flock.agent_count {{
        return;
    }}
    let me = agents_in[index];
    let heading = safe_normalize(me.velocity);

    var cohesion_sum = vec3<f32>(0.0);
    var cohesion_count = 0u;
    var separation_sum = vec3<f32>(0.0);
    var alignment_sum = vec3<f32>(0.0);
    var alignment_count = 0u;

    for (var other_idx = 0u; other_idx < flock.agent_count; other_idx += 1u) {{
        if other_idx == index {{
            continue;
        }}
        let other = agents_in[other_idx];
        let offset = other.position - me.position;
        let distance_sq = dot(offset, offset);
        let angle = acos(clamp(dot(heading, safe_normalize(offset)), -1.0, 1.0));

        if distance_sq <= flock.cohesion_distance_sq && angle <= flock.cohesion_angle {{
            cohesion_sum += other.position;
            cohesion_count += 1u;
        }}
        if distance_sq <= flock.separation_distance_sq && angle <= flock.separation_angle {{
            let dist = sqrt(distance_sq);
            if dist > EPSILON {{
                separation_sum -= offset / dist / dist;
            }}
        }}
        if distance_sq <= flock.alignment_distance_sq && angle <= flock.alignment_angle {{
            alignment_sum += other.velocity;
            alignment_count += 1u;
        }}
    }}

    var force = vec3<f32>(0.0);
    if cohesion_count > 0u {{
        let centroid = cohesion_sum / f32(cohesion_count);
        force += steer(centroid - me.position, me.velocity, flock.cohesion_weight);
    }}
    force += steer(separation_sum, me.velocity, flock.separation_weight);
    if alignment_count > 0u {{
        force += steer(alignment_sum / f32(alignment_count), me.velocity, flock.alignment_weight);
    }}

    let to_center = flock.boundary_center.xyz - me.position;
    if dot(to_center, to_center) > flock.boundary_radius_sq {{
        force += safe_normalize(to_center) * flock.boundary_force;
    }}

    force += cells[nearest_cell(me.position)].direction * flock.avoid_force;
    force -= me.velocity * flock.drag;
    force = clamp_length_max(force, flock.max_force);

    var velocity = me.velocity + force * frame.delta_time;
    let speed = length(velocity);
    if speed > EPSILON {{
        velocity *= clamp(speed, flock.min_velocity, flock.max_velocity) / speed;
    }} else if length(me.velocity) > EPSILON {{
        velocity = normalize(me.velocity) * flock.min_velocity;
    }} else {{
        velocity = vec3<f32>(0.0, 0.0, flock.min_velocity);
    }}

    agents_out[index].position = me.position + velocity * frame.delta_time;
    agents_out[index].velocity = velocity;
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_wgsl(code: &str) -> Result<naga::Module, String> {
        let module = naga::front::wgsl::parse_str(code)
            .map_err(|e| format!("WGSL parse error: {:?}", e))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| format!("WGSL validation error: {:?}", e))?;

        Ok(module)
    }

    fn entry_points(module: &naga::Module) -> Vec<(String, [u32; 3])> {
        module
            .entry_points
            .iter()
            .map(|ep| (ep.name.clone(), ep.workgroup_size))
            .collect()
    }

    #[test]
    fn test_field_shader_validates() {
        let module = validate_wgsl(&field_shader(256)).unwrap();
        assert_eq!(
            entry_points(&module),
            vec![
                ("reset_field".to_string(), [256, 1, 1]),
                ("accumulate_field".to_string(), [256, 1, 1]),
                ("resolve_field".to_string(), [256, 1, 1]),
            ]
        );
    }

    #[test]
    fn test_boids_shader_validates() {
        let module = validate_wgsl(&boids_shader(64)).unwrap();
        assert_eq!(entry_points(&module), vec![("update_boids".to_string(), [64, 1, 1])]);
    }

    #[test]
    fn test_shaders_validate_across_widths() {
        for width in [1, 32, 128, 1024] {
            validate_wgsl(&field_shader(width)).unwrap();
            validate_wgsl(&boids_shader(width)).unwrap();
        }
    }

    #[test]
    fn test_fixed_point_scale_bounds() {
        assert_eq!(fixed_point_scale(0), FIELD_SCALE);
        assert_eq!(fixed_point_scale(1000), FIELD_SCALE);
        assert_eq!(fixed_point_scale(32_767), FIELD_SCALE);
        assert_eq!(fixed_point_scale(40_000), 53_687.0);

        // Every sample landing in one cell still fits an i32 sum.
        for count in [32_768u32, 40_000, 1_000_000, 50_000_000] {
            let scale = fixed_point_scale(count);
            let per_sample = (1.0f32 * scale).round() as i64;
            assert!(per_sample * count as i64 <= i32::MAX as i64, "count {}", count);
        }
    }

    #[test]
    fn test_field_shader_reads_scale_from_uniform() {
        let code = field_shader(64);
        assert!(code.contains("round(normal * field.fixed_point_scale)"));
        assert!(!code.contains("const FIELD_SCALE"));
    }
}
