//! Surface sampling of deforming meshes.
//!
//! Every frame each [`MeshSource`] bakes its current local-space vertices and
//! normals into a shared [`MeshSnapshot`], and the [`SurfaceSampler`] copies
//! them into one flat buffer ordered by mesh index. The vertex range of each
//! mesh is fixed at startup by a [`MeshLayout`]; a mesh whose vertex count
//! drifts from that layout is an error rather than a silent truncation.
//!
//! ```text
//! flat index: 0 ......... 120 ............ 300 ..... 340
//!             |  mesh 0   |     mesh 1     |  mesh 2 |
//! thresholds:            120              300       340
//! ```

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

use crate::error::{ConfigError, SimulationError};

/// A mesh whose surface the field is rebuilt from.
///
/// Implementors are typically skinned or procedurally deforming meshes. The
/// vertex count must stay constant for the whole run.
pub trait MeshSource {
    /// Number of vertices [`bake`](Self::bake) produces.
    fn vertex_count(&self) -> usize;

    /// Current rigid transform of the mesh.
    fn transform(&self) -> MeshTransform;

    /// Write the current local-space positions and normals into `snapshot`.
    ///
    /// The snapshot arrives cleared.
    fn bake(&self, snapshot: &mut MeshSnapshot);
}

/// Rigid transform of a mesh: translation, Euler orientation and scale.
///
/// Euler angles are in degrees and applied in Z, X, Y order
/// (`R = Ry * Rx * Rz`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshTransform {
    pub position: Vec3,
    pub euler_degrees: Vec3,
    pub scale: Vec3,
}

impl MeshTransform {
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            euler_degrees: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_euler_degrees(mut self, euler_degrees: Vec3) -> Self {
        self.euler_degrees = euler_degrees;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn rotation(&self) -> Quat {
        let r = self.euler_degrees;
        Quat::from_euler(
            EulerRot::YXZ,
            r.y.to_radians(),
            r.x.to_radians(),
            r.z.to_radians(),
        )
    }

    /// `T * R * S`.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation(), self.position)
    }

    pub fn matrices(&self) -> MeshMatrices {
        let model = self.model_matrix();
        let linear = Mat3::from_mat4(model);
        let normal = if linear.determinant().abs() > f32::EPSILON {
            linear.inverse().transpose()
        } else {
            // Collapsed scale: fall back to the pure rotation.
            Mat3::from_quat(self.rotation())
        };
        MeshMatrices { model, normal }
    }
}

impl Default for MeshTransform {
    fn default() -> Self {
        Self::new()
    }
}

/// Matrices derived from a [`MeshTransform`] once per frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshMatrices {
    /// Local to world for positions.
    pub model: Mat4,
    /// Inverse-transpose of the model's linear part, for normals.
    pub normal: Mat3,
}

impl Default for MeshMatrices {
    fn default() -> Self {
        MeshTransform::new().matrices()
    }
}

/// Scratch buffer a mesh bakes into. Reused across meshes and frames.
#[derive(Clone, Debug, Default)]
pub struct MeshSnapshot {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
}

impl MeshSnapshot {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            normals: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
    }

    pub fn push(&mut self, position: Vec3, normal: Vec3) {
        self.positions.push(position);
        self.normals.push(normal);
    }

    pub fn extend_from_slices(&mut self, positions: &[Vec3], normals: &[Vec3]) {
        self.positions.extend_from_slice(positions);
        self.normals.extend_from_slice(normals);
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }
}

/// Flat vertex range owned by one mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshRange {
    pub mesh_id: usize,
    pub start: u32,
    pub end: u32,
}

impl MeshRange {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Vertex ranges of every mesh, fixed at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshLayout {
    ranges: Vec<MeshRange>,
}

impl MeshLayout {
    /// Lay out meshes with the given vertex counts back to back.
    ///
    /// Fails if the running total does not fit a `u32` sample index.
    pub fn from_counts(counts: &[usize]) -> Result<Self, ConfigError> {
        let mut start = 0u32;
        let mut ranges = Vec::with_capacity(counts.len());
        for (mesh_id, &count) in counts.iter().enumerate() {
            let end = u32::try_from(count)
                .ok()
                .and_then(|count| start.checked_add(count))
                .ok_or(ConfigError::TooManySamples { mesh: mesh_id })?;
            ranges.push(MeshRange { mesh_id, start, end });
            start = end;
        }
        Ok(Self { ranges })
    }

    pub fn from_meshes(meshes: &[&dyn MeshSource]) -> Result<Self, ConfigError> {
        let counts: Vec<usize> = meshes.iter().map(|m| m.vertex_count()).collect();
        Self::from_counts(&counts)
    }

    pub fn ranges(&self) -> &[MeshRange] {
        &self.ranges
    }

    pub fn mesh_count(&self) -> usize {
        self.ranges.len()
    }

    /// Total vertices across all meshes.
    pub fn vertex_count(&self) -> u32 {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// Mesh owning the flat vertex index, or `None` past the end.
    ///
    /// Same binary search as the WGSL `owning_mesh`. The CPU scatter walks
    /// [`ranges`](Self::ranges) directly and does not need it.
    pub fn owner_of(&self, flat_index: u32) -> Option<usize> {
        let slot = self.ranges.partition_point(|r| r.end <= flat_index);
        self.ranges.get(slot).map(|r| r.mesh_id)
    }

    /// Cumulative vertex counts: entry `m` is one past the last vertex of mesh `m`.
    pub fn thresholds(&self) -> Vec<u32> {
        self.ranges.iter().map(|r| r.end).collect()
    }

    /// Check `meshes` against the layout captured at startup.
    pub fn check(&self, meshes: &[&dyn MeshSource]) -> Result<(), SimulationError> {
        if meshes.len() != self.ranges.len() {
            return Err(SimulationError::MeshCount {
                expected: self.ranges.len(),
                actual: meshes.len(),
            });
        }
        for (range, mesh) in self.ranges.iter().zip(meshes) {
            let actual = mesh.vertex_count();
            if actual != range.len() {
                return Err(SimulationError::VertexCount {
                    mesh: range.mesh_id,
                    expected: range.len(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// One frame of flattened surface data.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSamples {
    /// Local-space positions, ordered by mesh then vertex.
    pub positions: Vec<Vec3>,
    /// Local-space normals, parallel to `positions`.
    pub normals: Vec<Vec3>,
    /// Per-mesh transforms for this frame.
    pub transforms: Vec<MeshTransform>,
    /// Matrices derived from `transforms`.
    pub matrices: Vec<MeshMatrices>,
}

/// Flattens the meshes into [`SurfaceSamples`] once per frame.
pub struct SurfaceSampler {
    layout: MeshLayout,
    snapshot: MeshSnapshot,
    samples: SurfaceSamples,
}

impl SurfaceSampler {
    pub fn new(layout: MeshLayout) -> Self {
        let total = layout.vertex_count() as usize;
        let largest = layout.ranges().iter().map(MeshRange::len).max().unwrap_or(0);
        let meshes = layout.mesh_count();
        Self {
            snapshot: MeshSnapshot::with_capacity(largest),
            samples: SurfaceSamples {
                positions: vec![Vec3::ZERO; total],
                normals: vec![Vec3::ZERO; total],
                transforms: vec![MeshTransform::new(); meshes],
                matrices: vec![MeshMatrices::default(); meshes],
            },
            layout,
        }
    }

    pub fn layout(&self) -> &MeshLayout {
        &self.layout
    }

    /// Most recent samples.
    pub fn samples(&self) -> &SurfaceSamples {
        &self.samples
    }

    /// Bake every mesh and overwrite the flat buffers.
    pub fn sample(&mut self, meshes: &[&dyn MeshSource]) -> Result<&SurfaceSamples, SimulationError> {
        self.layout.check(meshes)?;

        for (range, mesh) in self.layout.ranges.iter().zip(meshes) {
            self.snapshot.clear();
            mesh.bake(&mut self.snapshot);

            let expected = range.len();
            let positions = self.snapshot.positions.len();
            let normals = self.snapshot.normals.len();
            if positions != expected || normals != expected {
                return Err(SimulationError::IncompleteSnapshot {
                    mesh: range.mesh_id,
                    positions,
                    normals,
                    expected,
                });
            }

            let span = range.start as usize..range.end as usize;
            self.samples.positions[span.clone()].copy_from_slice(&self.snapshot.positions);
            self.samples.normals[span].copy_from_slice(&self.snapshot.normals);

            let transform = mesh.transform();
            self.samples.transforms[range.mesh_id] = transform;
            self.samples.matrices[range.mesh_id] = transform.matrices();
        }

        Ok(&self.samples)
    }
}

/// A mesh with fixed local geometry and a settable transform.
#[derive(Clone, Debug)]
pub struct StaticMesh {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    transform: MeshTransform,
}

impl StaticMesh {
    /// # Panics
    ///
    /// Panics if `positions` and `normals` differ in length.
    pub fn new(positions: Vec<Vec3>, normals: Vec<Vec3>) -> Self {
        assert_eq!(
            positions.len(),
            normals.len(),
            "StaticMesh needs one normal per position"
        );
        Self {
            positions,
            normals,
            transform: MeshTransform::new(),
        }
    }

    /// UV sphere of the given radius with outward normals.
    pub fn sphere(radius: f32, rings: u32, segments: u32) -> Self {
        let rings = rings.max(2);
        let segments = segments.max(3);
        let mut positions = Vec::with_capacity(((rings + 1) * segments) as usize);
        let mut normals = Vec::with_capacity(positions.capacity());
        for r in 0..=rings {
            let theta = std::f32::consts::PI * r as f32 / rings as f32;
            for s in 0..segments {
                let phi = std::f32::consts::TAU * s as f32 / segments as f32;
                let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                positions.push(n * radius);
                normals.push(n);
            }
        }
        Self::new(positions, normals)
    }

    pub fn with_transform(mut self, transform: MeshTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn set_transform(&mut self, transform: MeshTransform) {
        self.transform = transform;
    }
}

impl MeshSource for StaticMesh {
    fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    fn transform(&self) -> MeshTransform {
        self.transform
    }

    fn bake(&self, snapshot: &mut MeshSnapshot) {
        snapshot.extend_from_slices(&self.positions, &self.normals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ShortMesh;

    impl MeshSource for ShortMesh {
        fn vertex_count(&self) -> usize {
            3
        }

        fn transform(&self) -> MeshTransform {
            MeshTransform::new()
        }

        fn bake(&self, snapshot: &mut MeshSnapshot) {
            snapshot.push(Vec3::ZERO, Vec3::Y);
        }
    }

    #[test]
    fn test_layout_thresholds_and_owner() {
        let layout = MeshLayout::from_counts(&[120, 180, 0, 40]).unwrap();
        assert_eq!(layout.thresholds(), vec![120, 300, 300, 340]);
        assert_eq!(layout.vertex_count(), 340);
        assert_eq!(layout.owner_of(0), Some(0));
        assert_eq!(layout.owner_of(119), Some(0));
        assert_eq!(layout.owner_of(120), Some(1));
        assert_eq!(layout.owner_of(299), Some(1));
        // The empty mesh owns nothing.
        assert_eq!(layout.owner_of(300), Some(3));
        assert_eq!(layout.owner_of(340), None);
    }

    #[test]
    fn test_layout_rejects_index_overflow() {
        let max = u32::MAX as usize;
        assert!(MeshLayout::from_counts(&[max]).is_ok());
        assert_eq!(
            MeshLayout::from_counts(&[max, 1]).unwrap_err(),
            ConfigError::TooManySamples { mesh: 1 }
        );
        assert_eq!(
            MeshLayout::from_counts(&[3, 5, max]).unwrap_err(),
            ConfigError::TooManySamples { mesh: 2 }
        );
    }

    #[test]
    fn test_sampler_flattens_in_mesh_order() {
        let a = StaticMesh::new(vec![Vec3::X, Vec3::Y], vec![Vec3::X, Vec3::Y]);
        let b = StaticMesh::new(vec![Vec3::Z], vec![Vec3::Z])
            .with_transform(MeshTransform::new().with_position(Vec3::ONE));
        let meshes: [&dyn MeshSource; 2] = [&a, &b];
        let mut sampler = SurfaceSampler::new(MeshLayout::from_meshes(&meshes).unwrap());

        let samples = sampler.sample(&meshes).unwrap();
        assert_eq!(samples.positions, vec![Vec3::X, Vec3::Y, Vec3::Z]);
        assert_eq!(samples.normals, vec![Vec3::X, Vec3::Y, Vec3::Z]);
        assert_eq!(samples.transforms[1].position, Vec3::ONE);
        assert_eq!(samples.matrices[1].model.transform_point3(Vec3::ZERO), Vec3::ONE);
    }

    #[test]
    fn test_sampler_rejects_changed_layout() {
        let a = StaticMesh::new(vec![Vec3::X], vec![Vec3::X]);
        let b = StaticMesh::new(vec![Vec3::X, Vec3::Y], vec![Vec3::X, Vec3::Y]);
        let mut sampler = SurfaceSampler::new(MeshLayout::from_counts(&[1]).unwrap());

        match sampler.sample(&[&b]) {
            Err(SimulationError::VertexCount { mesh: 0, expected: 1, actual: 2 }) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        match sampler.sample(&[&a, &b]) {
            Err(SimulationError::MeshCount { expected: 1, actual: 2 }) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_sampler_rejects_short_snapshot() {
        let mut sampler = SurfaceSampler::new(MeshLayout::from_counts(&[3]).unwrap());
        match sampler.sample(&[&ShortMesh]) {
            Err(SimulationError::IncompleteSnapshot { positions: 1, normals: 1, expected: 3, .. }) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_rotation_order() {
        // Z applied first, then X, then Y.
        let t = MeshTransform::new().with_euler_degrees(Vec3::new(90.0, 90.0, 0.0));
        let v = t.rotation() * Vec3::Y;
        // Rx(90) takes +Y to +Z, Ry(90) takes +Z to +X.
        assert!((v - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn test_normal_matrix_under_nonuniform_scale() {
        let t = MeshTransform::new().with_scale(Vec3::new(2.0, 1.0, 1.0));
        let m = t.matrices();
        // A slanted surface in the xy plane.
        let tangent = m.model.transform_vector3(Vec3::new(1.0, -1.0, 0.0));
        let normal = m.normal * Vec3::new(1.0, 1.0, 0.0);
        assert!(tangent.dot(normal).abs() < 1e-5);
    }

    #[test]
    fn test_degenerate_scale_keeps_rotation() {
        let t = MeshTransform::new().with_scale(Vec3::ZERO);
        let m = t.matrices();
        assert!(m.normal.is_finite());
        assert_eq!(m.normal * Vec3::Y, Vec3::Y);
    }

    #[test]
    fn test_sphere_normals_are_unit() {
        let sphere = StaticMesh::sphere(2.0, 4, 6);
        assert_eq!(sphere.vertex_count(), 5 * 6);
        let mut snapshot = MeshSnapshot::default();
        sphere.bake(&mut snapshot);
        for (p, n) in snapshot.positions().iter().zip(snapshot.normals()) {
            assert!((n.length() - 1.0).abs() < 1e-5);
            assert!((p.length() - 2.0).abs() < 1e-5);
        }
    }
}
