use nalgebra::{Matrix4, Vector3};

pub mod cylinder;
pub mod polygon;
pub mod sphere;

/// A host-side triangle mesh: positions plus 32-bit indices into them (spec §3 "Index — 32-bit
/// unsigned integer into the combined vertex buffer"). Always generated in local/object space;
/// callers bake a world transform via [`Mesh::transform`] before handing it to the catalog or a
/// user `polygon()` draw.
#[derive(Clone)]
pub struct Mesh {
    pub vertices: Vec<Vector3<f32>>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn from_indices(vertices: Vec<Vector3<f32>>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn transform(self, transform: &Matrix4<f32>) -> Self {
        let vertices = self
            .vertices
            .into_iter()
            .map(|v| (transform * v.insert_row(3, 1.0)).xyz())
            .collect::<Vec<_>>();
        Self {
            vertices,
            indices: self.indices,
        }
    }

    /// Appends `other` onto `self`, rebasing its indices by the current vertex count. Used by
    /// [`crate::catalog::PrimitiveCatalog`] to pack every primitive kind into one combined buffer.
    pub fn append(&mut self, other: Mesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.into_iter().map(|i| i + base));
    }

    /// Per-vertex smooth normals, accumulated from adjacent face normals and normalized.
    /// Shapes that duplicate vertices per face (e.g. [`polygon::cube`]) get flat shading for
    /// free since no two faces share a vertex; shapes that don't (sphere, cylinder) get smooth
    /// shading. Used by [`crate::catalog::PrimitiveCatalog`] when building `Vertex3D` data.
    pub fn compute_smooth_normals(&self) -> Vec<Vector3<f32>> {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            let edge1 = self.vertices[b] - self.vertices[a];
            let edge2 = self.vertices[c] - self.vertices[a];
            let face_normal = edge1.cross(&edge2);
            normals[a] += face_normal;
            normals[b] += face_normal;
            normals[c] += face_normal;
        }
        for normal in &mut normals {
            *normal = if normal.norm_squared() > 1e-12 {
                normal.normalize()
            } else {
                Vector3::z()
            };
        }
        normals
    }
}
