//! Primitive geometry catalog (spec §4.A). Builds the combined vertex/index buffers for the
//! fixed set of shapes at engine init and hands out immutable [`PrimitiveDataLayout`] byte-range
//! descriptors; read-only after construction.

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::{Context, Result};
use gpu_allocator::MemoryLocation;
use nalgebra::{Vector2, Vector3};

use crate::dim::{Dim2, Dim3, Dimension};
use crate::geometry::{cylinder::CylinderBuilder, polygon, sphere::SphereBuilder, Mesh};
use crate::vulkan::{
    device::Device,
    resource::{Buffer, BufferDescriptor},
    vk,
};

/// Smallest and one-past-largest regular polygon side count the catalog generates eagerly
/// (spec §4.A "Regular polygons for N∈[3, 3+K)"); `circle()` uses its own, higher-sided mesh
/// rather than one of these (see [`PrimitiveCatalog::circle`]).
pub const NGON_MIN_SIDES: u32 = 3;
pub const NGON_SIDE_COUNT: u32 = 9;
const NGON_MAX_SIDES_EXCLUSIVE: u32 = NGON_MIN_SIDES + NGON_SIDE_COUNT;

/// Side count of the dedicated circle mesh (spec §4.A "parametric primitives").
pub const CIRCLE_SIDES: u32 = 48;

/// Five monotonically increasing sphere/cylinder resolutions (spec §4.A "spheres and cylinders
/// are generated at five monotonically increasing resolutions").
pub const SPHERE_RESOLUTIONS: [(usize, usize); 5] = [(8, 6), (12, 8), (16, 12), (24, 16), (32, 24)];
pub const CYLINDER_RESOLUTIONS: [usize; 5] = [8, 12, 16, 24, 32];

/// The byte-range (in practice element-range: `vertices_start`/`vertex_offset` is added to every
/// index before indexing the combined vertex buffer, `indices_start` is `first_index`) within the
/// combined per-dimension buffers identifying one primitive kind (spec §3 `PrimitiveDataLayout`).
/// Immutable after catalog build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveDataLayout {
    pub vertices_start: u32,
    pub indices_start: u32,
    pub indices_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Vertex2D {
    pub position: Vector2<f32>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Vertex3D {
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
}

/// Dimension-specific conversion from host [`Mesh`]es to the vertex layout that dimension's
/// shaders read (spec §3 `Vertex<D>`: position only in 2D, position+normal in 3D).
pub trait CatalogVertex: Dimension {
    type Vertex: Copy + Send + Sync + 'static;

    fn to_vertices(mesh: &Mesh) -> Vec<Self::Vertex>;
    /// Which shapes this dimension's catalog builds, in stable index order.
    fn shapes() -> Vec<Mesh>;
}

impl CatalogVertex for Dim2 {
    type Vertex = Vertex2D;

    fn to_vertices(mesh: &Mesh) -> Vec<Self::Vertex> {
        mesh.vertices
            .iter()
            .map(|v| Vertex2D { position: v.xy() })
            .collect()
    }

    fn shapes() -> Vec<Mesh> {
        let mut shapes = vec![polygon::triangle(), polygon::square()];
        for sides in NGON_MIN_SIDES..NGON_MAX_SIDES_EXCLUSIVE {
            shapes.push(polygon::regular_ngon(sides));
        }
        shapes.push(polygon::regular_ngon(CIRCLE_SIDES));
        shapes
    }
}

impl CatalogVertex for Dim3 {
    type Vertex = Vertex3D;

    fn to_vertices(mesh: &Mesh) -> Vec<Self::Vertex> {
        let normals = mesh.compute_smooth_normals();
        mesh.vertices
            .iter()
            .zip(normals)
            .map(|(position, normal)| Vertex3D {
                position: *position,
                normal,
            })
            .collect()
    }

    fn shapes() -> Vec<Mesh> {
        let mut shapes = vec![polygon::cube()];
        for (u, v) in SPHERE_RESOLUTIONS {
            shapes.push(SphereBuilder::new(1.0, u, v).build_mesh());
        }
        for sides in CYLINDER_RESOLUTIONS {
            shapes.push(CylinderBuilder::new(1.0, 1.0, sides).build_mesh());
        }
        // A flat disc (spec §4.C "circle" drawable kind) embedded in the `xy` plane, facing `+z`,
        // for the circle batcher to draw in 3D scenes just as it does in 2D ones.
        shapes.push(polygon::regular_ngon(CIRCLE_SIDES));
        shapes
    }
}

/// Stable indices into a built [`PrimitiveCatalog<Dim2>`]'s `layouts`.
pub struct Primitives2D;
impl Primitives2D {
    pub const TRIANGLE: u32 = 0;
    pub const SQUARE: u32 = 1;
    /// `n` must satisfy `NGON_MIN_SIDES <= n < NGON_MIN_SIDES + NGON_SIDE_COUNT`.
    pub fn ngon(n: u32) -> u32 {
        assert!(
            (NGON_MIN_SIDES..NGON_MAX_SIDES_EXCLUSIVE).contains(&n),
            "n-gon side count {n} is not cataloged; use the polygon batcher instead"
        );
        2 + (n - NGON_MIN_SIDES)
    }
    pub const CIRCLE: u32 = 2 + NGON_SIDE_COUNT;
}

/// Stable indices into a built [`PrimitiveCatalog<Dim3>`]'s `layouts`.
pub struct Primitives3D;
impl Primitives3D {
    pub const CUBE: u32 = 0;
    /// `resolution` in `0..5`, finest at the highest index.
    pub fn sphere(resolution: usize) -> u32 {
        assert!(resolution < SPHERE_RESOLUTIONS.len());
        1 + resolution as u32
    }
    pub fn cylinder(resolution: usize) -> u32 {
        assert!(resolution < CYLINDER_RESOLUTIONS.len());
        1 + SPHERE_RESOLUTIONS.len() as u32 + resolution as u32
    }
    pub const CIRCLE: u32 = 1 + SPHERE_RESOLUTIONS.len() as u32 + CYLINDER_RESOLUTIONS.len() as u32;
}

/// Combined vertex/index buffers for every shape of one dimension, built once at init
/// (spec §4.A). Read-only thereafter; generation and upload must succeed at init or the engine
/// refuses to start (spec §4.A "Failure").
pub struct PrimitiveCatalog<D: Dimension + CatalogVertex> {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    layouts: Vec<PrimitiveDataLayout>,
    _dim: PhantomData<D>,
}

impl<D: Dimension + CatalogVertex> PrimitiveCatalog<D> {
    pub fn build(device: &Arc<Device>) -> Result<Self> {
        let shapes = D::shapes();

        let mut combined_vertices: Vec<D::Vertex> = Vec::new();
        let mut combined_indices: Vec<u32> = Vec::new();
        let mut layouts = Vec::with_capacity(shapes.len());

        for mesh in &shapes {
            let vertices_start = combined_vertices.len() as u32;
            let indices_start = combined_indices.len() as u32;
            let indices_count = mesh.indices.len() as u32;

            combined_vertices.extend(D::to_vertices(mesh));
            combined_indices.extend(mesh.indices.iter().copied());

            layouts.push(PrimitiveDataLayout {
                vertices_start,
                indices_start,
                indices_count,
            });
        }

        let vertex_buffer = Self::upload(
            device,
            &combined_vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )
        .context("uploading primitive catalog vertex buffer")?;
        let index_buffer = Self::upload(
            device,
            &combined_indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )
        .context("uploading primitive catalog index buffer")?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            layouts,
            _dim: PhantomData,
        })
    }

    /// Host-visible, then written once; the catalog never changes after init so there is no
    /// need for a staging+device-local split the way per-frame instance data requires.
    fn upload<T: Copy>(
        device: &Arc<Device>,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer> {
        let size = (data.len() * std::mem::size_of::<T>()).max(1) as u64;
        let buffer = device.create_buffer(BufferDescriptor::new(
            size,
            usage,
            MemoryLocation::CpuToGpu,
        ))?;
        if !data.is_empty() {
            buffer.write_data(data)?;
        }
        Ok(buffer)
    }

    pub fn get_vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    pub fn get_index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    pub fn get_layout(&self, primitive_index: u32) -> PrimitiveDataLayout {
        self.layouts[primitive_index as usize]
    }

    pub fn layout_count(&self) -> u32 {
        self.layouts.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ngon_index_mapping_is_contiguous() {
        assert_eq!(Primitives2D::ngon(NGON_MIN_SIDES), 2);
        assert_eq!(
            Primitives2D::ngon(NGON_MIN_SIDES + NGON_SIDE_COUNT - 1),
            2 + NGON_SIDE_COUNT - 1
        );
    }

    #[test]
    #[should_panic]
    fn ngon_index_rejects_out_of_range() {
        Primitives2D::ngon(NGON_MIN_SIDES + NGON_SIDE_COUNT);
    }

    #[test]
    fn dim2_shape_count_matches_layout_indices() {
        let shapes = Dim2::shapes();
        // triangle, square, NGON_SIDE_COUNT polygons, circle.
        assert_eq!(shapes.len() as u32, 2 + NGON_SIDE_COUNT + 1);
    }

    #[test]
    fn dim3_shape_count_matches_layout_indices() {
        let shapes = Dim3::shapes();
        assert_eq!(
            shapes.len(),
            1 + SPHERE_RESOLUTIONS.len() + CYLINDER_RESOLUTIONS.len() + 1
        );
    }
}
