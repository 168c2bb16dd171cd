//! Error types for the avoidance-boids pipeline.
//!
//! Every failure here is a startup-time fault: invalid configuration, a missing
//! GPU adapter, or meshes that do not match the layout captured at startup.
//! Numerical degeneracy inside a frame is guarded locally and never surfaces
//! as an error.

use std::fmt;

/// Configuration rejected by [`SimParams::resolve`](crate::SimParams::resolve).
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Grid must have at least one cell per axis.
    InvalidGridLength(u32),
    /// `grid_length³` does not fit in a `u32` cell index.
    GridTooLarge(u32),
    /// Cell scale must be finite and positive.
    InvalidCellScale(f32),
    /// Velocity range must satisfy `0 < min <= max`.
    InvalidVelocityRange { min: f32, max: f32 },
    /// A weight, distance or force that must not be negative.
    Negative { name: &'static str, value: f32 },
    /// A field-of-view angle outside `[0, 180]` degrees.
    InvalidAngle { name: &'static str, degrees: f32 },
    /// Workgroup width must be a power of two in `1..=1024`.
    InvalidWorkgroupSize(u32),
    /// Unit count is not a multiple of the workgroup width (strict dispatch only).
    IndivisibleDispatch { stage: &'static str, count: u32, width: u32 },
    /// A stage would need more workgroups than a single dispatch dimension allows.
    DispatchTooLarge { stage: &'static str, groups: u32 },
    /// The running vertex total overflows a `u32` sample index at `mesh`.
    TooManySamples { mesh: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidGridLength(len) => {
                write!(f, "Grid length must be at least 1, got {}", len)
            }
            ConfigError::GridTooLarge(len) => write!(
                f,
                "Grid length {} gives more cells than a 32-bit index can address",
                len
            ),
            ConfigError::InvalidCellScale(scale) => {
                write!(f, "Cell scale must be finite and positive, got {}", scale)
            }
            ConfigError::InvalidVelocityRange { min, max } => write!(
                f,
                "Velocity range must satisfy 0 < min <= max, got min={} max={}",
                min, max
            ),
            ConfigError::Negative { name, value } => {
                write!(f, "'{}' must not be negative, got {}", name, value)
            }
            ConfigError::InvalidAngle { name, degrees } => write!(
                f,
                "'{}' must be within [0, 180] degrees, got {}",
                name, degrees
            ),
            ConfigError::InvalidWorkgroupSize(width) => write!(
                f,
                "Workgroup size must be a power of two between 1 and 1024, got {}",
                width
            ),
            ConfigError::IndivisibleDispatch { stage, count, width } => write!(
                f,
                "{} count {} is not a multiple of the workgroup size {}",
                stage, count, width
            ),
            ConfigError::DispatchTooLarge { stage, groups } => write!(
                f,
                "{} stage needs {} workgroups, more than the 65535 allowed per dispatch",
                stage, groups
            ),
            ConfigError::TooManySamples { mesh } => write!(
                f,
                "Surface sample count overflows a 32-bit index at mesh {}",
                mesh
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors that can occur during GPU initialization or readback.
#[derive(Debug)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// Failed to map buffer for reading.
    BufferMapping(String),
    /// The configuration asks for more than the device allows.
    LimitExceeded { limit: &'static str, requested: u64, max: u64 },
    /// Shader module or pipeline creation failed validation.
    Pipeline(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
            GpuError::LimitExceeded { limit, requested, max } => write!(
                f,
                "Device limit {} is {}, but {} is required",
                limit, max, requested
            ),
            GpuError::Pipeline(msg) => write!(f, "Failed to create compute pipeline: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

/// Errors that can occur while building or running the frame pipeline.
#[derive(Debug)]
pub enum SimulationError {
    /// Startup configuration was invalid.
    Config(ConfigError),
    /// GPU initialization or readback failed.
    Gpu(GpuError),
    /// The frame was given a different number of meshes than at startup.
    MeshCount { expected: usize, actual: usize },
    /// A mesh's vertex count changed since startup.
    VertexCount { mesh: usize, expected: usize, actual: usize },
    /// A mesh baked fewer positions or normals than its vertex count.
    IncompleteSnapshot { mesh: usize, positions: usize, normals: usize, expected: usize },
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::Config(e) => write!(f, "Invalid configuration: {}", e),
            SimulationError::Gpu(e) => write!(f, "GPU error: {}", e),
            SimulationError::MeshCount { expected, actual } => write!(
                f,
                "Expected {} meshes (fixed at startup), got {}",
                expected, actual
            ),
            SimulationError::VertexCount { mesh, expected, actual } => write!(
                f,
                "Mesh {} has {} vertices, but the layout was built with {}",
                mesh, actual, expected
            ),
            SimulationError::IncompleteSnapshot { mesh, positions, normals, expected } => write!(
                f,
                "Mesh {} baked {} positions and {} normals, expected {} of each",
                mesh, positions, normals, expected
            ),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::Config(e) => Some(e),
            SimulationError::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for SimulationError {
    fn from(e: ConfigError) -> Self {
        SimulationError::Config(e)
    }
}

impl From<GpuError> for SimulationError {
    fn from(e: GpuError) -> Self {
        SimulationError::Gpu(e)
    }
}
