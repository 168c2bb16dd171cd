use std::sync::{mpsc, Arc};

use bytemuck::Pod;
use wgpu::util::DeviceExt;

use super::layout::{
    AgentGpu, FieldCellGpu, FieldParamsGpu, FlockParamsGpu, FrameParamsGpu, MeshRangeGpu,
};
use super::shaders::{boids_shader, field_shader};
use super::GpuContext;
use crate::backend::ComputeBackend;
use crate::config::SimParams;
use crate::dispatch::DispatchPlan;
use crate::error::{GpuError, SimulationError};
use crate::field::FieldCell;
use crate::flock::Agent;
use crate::render::RenderInfo;
use crate::surface::{MeshLayout, SurfaceSamples};

/// Runs the field and flock stages as wgpu compute passes.
///
/// All stages of a frame are recorded into one command encoder, one compute
/// pass per stage, and submitted in [`end_frame`](ComputeBackend::end_frame).
/// Pass boundaries order the stages on the device.
pub struct GpuBackend {
    ctx: Arc<GpuContext>,
    plan: DispatchPlan,
    agent_count: u32,
    cell_count: u32,

    cells: wgpu::Buffer,
    /// Only referenced through `field_bind_group`.
    _accum: wgpu::Buffer,
    positions: wgpu::Buffer,
    normals: wgpu::Buffer,
    meshes: wgpu::Buffer,
    field_uniform: wgpu::Buffer,
    flock_uniform: wgpu::Buffer,
    frame_uniform: wgpu::Buffer,
    /// Ping-pong agent buffers; `current` is the committed one.
    agents: [wgpu::Buffer; 2],
    current: usize,
    agent_args: wgpu::Buffer,
    cell_args: wgpu::Buffer,

    reset_pipeline: wgpu::ComputePipeline,
    accumulate_pipeline: wgpu::ComputePipeline,
    resolve_pipeline: wgpu::ComputePipeline,
    boids_pipeline: wgpu::ComputePipeline,
    field_bind_group: wgpu::BindGroup,
    /// Entry `i` reads `agents[i]` and writes the other buffer.
    boids_bind_groups: [wgpu::BindGroup; 2],

    encoder: Option<wgpu::CommandEncoder>,
    /// Reused upload scratch for positions and normals.
    upload: Vec<[f32; 4]>,
    mesh_upload: Vec<MeshRangeGpu>,
    frame_index: u32,
}

impl GpuBackend {
    /// Allocate every buffer and build the pipelines.
    ///
    /// Fails if the run exceeds the device limits or a pipeline does not
    /// validate. Anything created before the failure is released on return.
    pub fn new(
        ctx: Arc<GpuContext>,
        params: &SimParams,
        layout: &MeshLayout,
        initial_agents: &[Agent],
    ) -> Result<Self, GpuError> {
        let device = &ctx.device;
        check_limits(params, layout, &device.limits())?;

        let agent_count = params.flock.agent_count;
        let cell_count = params.field.cell_count;
        let vertex_count = layout.vertex_count();

        let cell_data: Vec<FieldCellGpu> =
            params.field.initial_cells().iter().map(FieldCellGpu::from).collect();
        let cells = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Field Cells"),
            contents: bytemuck::cast_slice(&cell_data),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_SRC,
        });

        // Three fixed-point i32 components per cell.
        let accum = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Accumulator"),
            size: (cell_count as u64 * 3 * 4).max(4),
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let sample_size = (vertex_count.max(1) as u64) * 16;
        let positions = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface Positions"),
            size: sample_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let normals = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface Normals"),
            size: sample_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mesh_data = vec![MeshRangeGpu::default(); layout.mesh_count().max(1)];
        let meshes = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Ranges"),
            contents: bytemuck::cast_slice(&mesh_data),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });

        let field_uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Field Params"),
            contents: bytemuck::bytes_of(&FieldParamsGpu::new(&params.field, layout)),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let flock_uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Flock Params"),
            contents: bytemuck::bytes_of(&FlockParamsGpu::from(&params.flock)),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let frame_uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Params"),
            contents: bytemuck::bytes_of(&FrameParamsGpu::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let agent_data: Vec<AgentGpu> = initial_agents.iter().map(AgentGpu::from).collect();
        let agent_buffer = |label: &str| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&agent_data),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_SRC,
            })
        };
        let agents = [agent_buffer("Agents A"), agent_buffer("Agents B")];

        let info = RenderInfo::from_params(params);
        let agent_args = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Agent Draw Args"),
            contents: info.agent_draw.as_bytes(),
            usage: wgpu::BufferUsages::INDIRECT,
        });
        let cell_args = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Cell Draw Args"),
            contents: info.cell_draw.as_bytes(),
            usage: wgpu::BufferUsages::INDIRECT,
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        // Field stage: reset, accumulate and resolve share one layout.
        let field_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Field Bind Group Layout"),
            entries: &[
                storage_entry(0, false),
                storage_entry(1, false),
                uniform_entry(2),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, true),
            ],
        });
        let field_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Field Bind Group"),
            layout: &field_layout,
            entries: &[
                buffer_entry(0, &cells),
                buffer_entry(1, &accum),
                buffer_entry(2, &field_uniform),
                buffer_entry(3, &positions),
                buffer_entry(4, &normals),
                buffer_entry(5, &meshes),
            ],
        });

        let field_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Field Shader"),
            source: wgpu::ShaderSource::Wgsl(field_shader(params.dispatch.workgroup_size).into()),
        });
        let field_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Field Pipeline Layout"),
            bind_group_layouts: &[&field_layout],
            push_constant_ranges: &[],
        });
        let reset_pipeline =
            compute_pipeline(device, &field_pipeline_layout, &field_module, "reset_field");
        let accumulate_pipeline =
            compute_pipeline(device, &field_pipeline_layout, &field_module, "accumulate_field");
        let resolve_pipeline =
            compute_pipeline(device, &field_pipeline_layout, &field_module, "resolve_field");

        // Flock stage.
        let boids_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Boids Bind Group Layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                storage_entry(2, true),
                uniform_entry(3),
                uniform_entry(4),
                uniform_entry(5),
            ],
        });
        let boids_bind_group = |read: &wgpu::Buffer, write: &wgpu::Buffer, label: &str| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &boids_layout,
                entries: &[
                    buffer_entry(0, read),
                    buffer_entry(1, write),
                    buffer_entry(2, &cells),
                    buffer_entry(3, &field_uniform),
                    buffer_entry(4, &flock_uniform),
                    buffer_entry(5, &frame_uniform),
                ],
            })
        };
        let boids_bind_groups = [
            boids_bind_group(&agents[0], &agents[1], "Boids Bind Group A->B"),
            boids_bind_group(&agents[1], &agents[0], "Boids Bind Group B->A"),
        ];

        let boids_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Boids Shader"),
            source: wgpu::ShaderSource::Wgsl(boids_shader(params.dispatch.workgroup_size).into()),
        });
        let boids_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Boids Pipeline Layout"),
            bind_group_layouts: &[&boids_layout],
            push_constant_ranges: &[],
        });
        let boids_pipeline =
            compute_pipeline(device, &boids_pipeline_layout, &boids_module, "update_boids");

        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::Pipeline(e.to_string()));
        }

        log::info!(
            "GPU backend ready: {} agents, {} cells, {} surface samples over {} meshes",
            agent_count,
            cell_count,
            vertex_count,
            layout.mesh_count()
        );

        Ok(Self {
            plan: params.dispatch,
            agent_count,
            cell_count,
            cells,
            _accum: accum,
            positions,
            normals,
            meshes,
            field_uniform,
            flock_uniform,
            frame_uniform,
            agents,
            current: 0,
            agent_args,
            cell_args,
            reset_pipeline,
            accumulate_pipeline,
            resolve_pipeline,
            boids_pipeline,
            field_bind_group,
            boids_bind_groups,
            encoder: None,
            upload: Vec::with_capacity(vertex_count as usize),
            mesh_upload: Vec::with_capacity(layout.mesh_count()),
            frame_index: 0,
            ctx,
        })
    }

    /// Committed agent buffer, `AgentGpu` per agent.
    pub fn agent_buffer(&self) -> &wgpu::Buffer {
        &self.agents[self.current]
    }

    /// Field cells, `FieldCellGpu` per cell.
    pub fn cell_buffer(&self) -> &wgpu::Buffer {
        &self.cells
    }

    /// Indexed-indirect arguments for drawing one mesh per agent.
    pub fn agent_draw_args(&self) -> &wgpu::Buffer {
        &self.agent_args
    }

    /// Indexed-indirect arguments for drawing one mesh per field cell.
    pub fn cell_draw_args(&self) -> &wgpu::Buffer {
        &self.cell_args
    }

    /// Uniform holding `FieldParamsGpu`, for consumers drawing the grid.
    pub fn field_params_buffer(&self) -> &wgpu::Buffer {
        &self.field_uniform
    }

    /// Uniform holding `FlockParamsGpu`.
    pub fn flock_params_buffer(&self) -> &wgpu::Buffer {
        &self.flock_uniform
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Copy `count` elements of `buffer` back to the host.
    fn read_buffer<T: Pod>(&mut self, which: ReadTarget, count: u32) -> Result<Vec<T>, GpuError> {
        let size = count as u64 * std::mem::size_of::<T>() as u64;
        if size == 0 {
            return Ok(Vec::new());
        }

        // Flush anything recorded but not yet submitted.
        if let Some(encoder) = self.encoder.take() {
            self.ctx.queue.submit(Some(encoder.finish()));
        }

        let device = &self.ctx.device;
        let source = match which {
            ReadTarget::Agents => &self.agents[self.current],
            ReadTarget::Cells => &self.cells,
        };
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let data = {
            let mapped = slice.get_mapped_range();
            let values: &[T] = bytemuck::cast_slice(&mapped);
            values.to_vec()
        };
        staging.unmap();
        Ok(data)
    }
}

#[derive(Clone, Copy)]
enum ReadTarget {
    Agents,
    Cells,
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn begin_frame(&mut self) {
        if self.encoder.is_none() {
            self.encoder = Some(frame_encoder(&self.ctx.device));
        }
    }

    fn reset_field(&mut self) {
        let groups = self.plan.cells.groups;
        let device = &self.ctx.device;
        let encoder = self.encoder.get_or_insert_with(|| frame_encoder(device));
        dispatch(encoder, "Reset Field", &self.reset_pipeline, &self.field_bind_group, groups);
    }

    fn upload_surface(&mut self, samples: &SurfaceSamples, layout: &MeshLayout) {
        let queue = &self.ctx.queue;

        if !samples.positions.is_empty() {
            self.upload.clear();
            self.upload.extend(samples.positions.iter().map(|p| p.extend(1.0).to_array()));
            queue.write_buffer(&self.positions, 0, bytemuck::cast_slice(&self.upload));

            self.upload.clear();
            self.upload.extend(samples.normals.iter().map(|n| n.extend(0.0).to_array()));
            queue.write_buffer(&self.normals, 0, bytemuck::cast_slice(&self.upload));
        }

        if layout.mesh_count() > 0 {
            self.mesh_upload.clear();
            self.mesh_upload
                .extend(MeshRangeGpu::ranges_for(layout, &samples.matrices));
            queue.write_buffer(&self.meshes, 0, bytemuck::cast_slice(&self.mesh_upload));
        }
    }

    fn rebuild_field(&mut self) {
        let vertex_groups = self.plan.vertices.groups;
        let cell_groups = self.plan.cells.groups;
        let device = &self.ctx.device;
        let encoder = self.encoder.get_or_insert_with(|| frame_encoder(device));
        dispatch(
            encoder,
            "Accumulate Field",
            &self.accumulate_pipeline,
            &self.field_bind_group,
            vertex_groups,
        );
        dispatch(encoder, "Resolve Field", &self.resolve_pipeline, &self.field_bind_group, cell_groups);
    }

    fn step_agents(&mut self, dt: f32) {
        let frame = FrameParamsGpu {
            delta_time: dt,
            frame: self.frame_index,
            ..Default::default()
        };
        self.ctx
            .queue
            .write_buffer(&self.frame_uniform, 0, bytemuck::bytes_of(&frame));

        let groups = self.plan.agents.groups;
        let device = &self.ctx.device;
        let encoder = self.encoder.get_or_insert_with(|| frame_encoder(device));
        dispatch(
            encoder,
            "Update Boids",
            &self.boids_pipeline,
            &self.boids_bind_groups[self.current],
            groups,
        );

        self.current ^= 1;
        self.frame_index = self.frame_index.wrapping_add(1);
    }

    fn end_frame(&mut self) -> Result<(), SimulationError> {
        if let Some(encoder) = self.encoder.take() {
            self.ctx.queue.submit(Some(encoder.finish()));
        }
        Ok(())
    }

    fn read_agents(&mut self) -> Result<Vec<Agent>, SimulationError> {
        let raw: Vec<AgentGpu> = self.read_buffer(ReadTarget::Agents, self.agent_count)?;
        Ok(raw.iter().map(Agent::from).collect())
    }

    fn read_field(&mut self) -> Result<Vec<FieldCell>, SimulationError> {
        let raw: Vec<FieldCellGpu> = self.read_buffer(ReadTarget::Cells, self.cell_count)?;
        Ok(raw.iter().map(FieldCell::from).collect())
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.ctx.queue.submit(Some(encoder.finish()));
        }
        self.ctx.device.poll(wgpu::Maintain::Wait);
    }
}

/// Check a run against the limits of the opened device.
pub fn check_limits(
    params: &SimParams,
    layout: &MeshLayout,
    limits: &wgpu::Limits,
) -> Result<(), GpuError> {
    let exceeds = |limit: &'static str, requested: u64, max: u64| {
        if requested > max {
            Err(GpuError::LimitExceeded { limit, requested, max })
        } else {
            Ok(())
        }
    };

    let width = params.dispatch.workgroup_size as u64;
    exceeds("max_compute_workgroup_size_x", width, limits.max_compute_workgroup_size_x as u64)?;
    exceeds(
        "max_compute_invocations_per_workgroup",
        width,
        limits.max_compute_invocations_per_workgroup as u64,
    )?;

    let plan = &params.dispatch;
    let groups = plan.cells.groups.max(plan.vertices.groups).max(plan.agents.groups);
    exceeds(
        "max_compute_workgroups_per_dimension",
        groups as u64,
        limits.max_compute_workgroups_per_dimension as u64,
    )?;

    let binding = limits.max_storage_buffer_binding_size as u64;
    let cells = params.field.cell_count as u64;
    let storage = [
        cells * std::mem::size_of::<FieldCellGpu>() as u64,
        cells * 3 * 4,
        layout.vertex_count() as u64 * 16,
        layout.mesh_count() as u64 * std::mem::size_of::<MeshRangeGpu>() as u64,
        params.flock.agent_count as u64 * std::mem::size_of::<AgentGpu>() as u64,
    ];
    let largest = storage.into_iter().max().unwrap_or(0);
    exceeds("max_storage_buffer_binding_size", largest, binding)?;
    exceeds("max_buffer_size", largest, limits.max_buffer_size)?;

    Ok(())
}

fn frame_encoder(device: &wgpu::Device) -> wgpu::CommandEncoder {
    device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Frame Encoder"),
    })
}

/// Record one stage as its own compute pass.
fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    groups: u32,
) {
    if groups == 0 {
        return;
    }
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(groups, 1, 1);
}

fn compute_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn buffer_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldConfig, FlockConfig, SimConfig};

    fn params(width: u32) -> SimParams {
        let config = SimConfig::new()
            .with_field(FieldConfig::new(16))
            .with_flock(FlockConfig::new(1024))
            .with_workgroup_size(width);
        SimParams::resolve(&config, 300).unwrap()
    }

    #[test]
    fn test_default_limits_accept_default_width() {
        let layout = MeshLayout::from_counts(&[100, 200]).unwrap();
        assert!(check_limits(&params(256), &layout, &wgpu::Limits::default()).is_ok());
    }

    #[test]
    fn test_wide_workgroups_exceed_default_limits() {
        let layout = MeshLayout::from_counts(&[100, 200]).unwrap();
        for width in [512, 1024] {
            match check_limits(&params(width), &layout, &wgpu::Limits::default()) {
                Err(GpuError::LimitExceeded { limit, requested, max }) => {
                    assert_eq!(limit, "max_compute_workgroup_size_x");
                    assert_eq!(requested, width as u64);
                    assert_eq!(max, 256);
                }
                other => panic!("width {} accepted: {:?}", width, other),
            }
        }
    }

    #[test]
    fn test_storage_binding_limit() {
        let layout = MeshLayout::from_counts(&[100, 200]).unwrap();
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 1024,
            ..wgpu::Limits::default()
        };
        // 16³ cells at 32 bytes each is the largest buffer.
        match check_limits(&params(256), &layout, &limits) {
            Err(GpuError::LimitExceeded { limit, requested, .. }) => {
                assert_eq!(limit, "max_storage_buffer_binding_size");
                assert_eq!(requested, 4096 * 32);
            }
            other => panic!("oversized binding accepted: {:?}", other),
        }
    }
}
