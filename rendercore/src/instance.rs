//! Per-instance GPU-visible data (spec §3 `InstanceData<D, Fill|Outline>`) and the packing from
//! a composed world transform into the dimension-correct basis-column layout the shaders expect
//! (spec §6 "Storage buffer layout contract with shaders": column-major basis vectors followed
//! by color then material scalars, naturally aligned).

use nalgebra::{Matrix4, Vector2, Vector3};

use crate::color::Color;
use crate::dim::{Dim2, Dim3, Dimension, MaterialContribution3D};

/// 2D fill instance: 3 basis columns (x-basis, y-basis, translation), each `xy` only.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InstanceDataFill2D {
    pub basis: [Vector2<f32>; 3],
    pub color: u32,
}

/// 2D outline instance. Same layout as the fill instance; kept as a distinct type so a batch's
/// `T` selects the right pipeline-mode grouping at the type level (spec §4.C "for one
/// (primitive kind, pipeline mode) pair").
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InstanceDataOutline2D {
    pub basis: [Vector2<f32>; 3],
    pub color: u32,
}

/// 3D fill instance: 4 basis columns plus the material contribution spec §3 `Material<D>` adds
/// in 3D (diffuse/specular/sharpness).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InstanceDataFill3D {
    pub basis: [Vector3<f32>; 4],
    pub color: u32,
    pub diffuse_contribution: f32,
    pub specular_contribution: f32,
    pub specular_sharpness: f32,
}

/// 3D outline instance carries no material: the outline pass is unlit flat color.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InstanceDataOutline3D {
    pub basis: [Vector3<f32>; 4],
    pub color: u32,
}

fn basis_columns_2d(transform: &Matrix4<f32>) -> [Vector2<f32>; 3] {
    [
        transform.column(0).xy(),
        transform.column(1).xy(),
        transform.column(3).xy(),
    ]
}

fn basis_columns_3d(transform: &Matrix4<f32>) -> [Vector3<f32>; 4] {
    [
        transform.column(0).xyz(),
        transform.column(1).xyz(),
        transform.column(2).xyz(),
        transform.column(3).xyz(),
    ]
}

/// Packs a final composed transform into the instance layout `D`'s shaders expect. Implemented
/// for [`Dim2`] and [`Dim3`] so [`crate::batch::PerPrimitiveBatch::draw`] never branches on `D`
/// (spec §9 "Multiple dimensions via type parameter").
pub trait InstancePacking: Dimension {
    type FillInstance: Copy + Send + Sync + 'static;
    type OutlineInstance: Copy + Send + Sync + 'static;

    fn pack_fill(transform: &Matrix4<f32>, color: Color, material: Self::Lighting) -> Self::FillInstance;
    fn pack_outline(transform: &Matrix4<f32>, color: Color) -> Self::OutlineInstance;
}

impl InstancePacking for Dim2 {
    type FillInstance = InstanceDataFill2D;
    type OutlineInstance = InstanceDataOutline2D;

    fn pack_fill(transform: &Matrix4<f32>, color: Color, _material: ()) -> Self::FillInstance {
        InstanceDataFill2D {
            basis: basis_columns_2d(transform),
            color: color.0,
        }
    }

    fn pack_outline(transform: &Matrix4<f32>, color: Color) -> Self::OutlineInstance {
        InstanceDataOutline2D {
            basis: basis_columns_2d(transform),
            color: color.0,
        }
    }
}

impl InstancePacking for Dim3 {
    type FillInstance = InstanceDataFill3D;
    type OutlineInstance = InstanceDataOutline3D;

    fn pack_fill(
        transform: &Matrix4<f32>,
        color: Color,
        material: MaterialContribution3D,
    ) -> Self::FillInstance {
        InstanceDataFill3D {
            basis: basis_columns_3d(transform),
            color: color.0,
            diffuse_contribution: material.diffuse,
            specular_contribution: material.specular,
            specular_sharpness: material.specular_sharpness,
        }
    }

    fn pack_outline(transform: &Matrix4<f32>, color: Color) -> Self::OutlineInstance {
        InstanceDataOutline3D {
            basis: basis_columns_3d(transform),
            color: color.0,
        }
    }
}

/// Polygon fill instance: the regular fill instance plus the drawn polygon's own sub-range into
/// the polygon batcher's shared vertex/index pool (spec §4.C "each instance also carries its own
/// `PrimitiveDataLayout`-equivalent sub-range"), read by the vertex shader via
/// `gl_InstanceIndex` to pull its geometry from the shared storage buffers rather than a bound
/// vertex/index buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PolygonInstanceFill2D {
    pub instance: InstanceDataFill2D,
    pub vertices_start: u32,
    pub indices_start: u32,
    pub indices_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PolygonInstanceOutline2D {
    pub instance: InstanceDataOutline2D,
    pub vertices_start: u32,
    pub indices_start: u32,
    pub indices_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PolygonInstanceFill3D {
    pub instance: InstanceDataFill3D,
    pub vertices_start: u32,
    pub indices_start: u32,
    pub indices_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PolygonInstanceOutline3D {
    pub instance: InstanceDataOutline3D,
    pub vertices_start: u32,
    pub indices_start: u32,
    pub indices_count: u32,
}

/// Recovers the shared-pool sub-range a polygon instance was packed with, so the polygon batcher
/// can issue its per-instance draw without tracking layouts in a second, parallel array.
pub trait PolygonLayout {
    fn polygon_layout(&self) -> crate::catalog::PrimitiveDataLayout;
}

macro_rules! impl_polygon_layout {
    ($ty:ty) => {
        impl PolygonLayout for $ty {
            fn polygon_layout(&self) -> crate::catalog::PrimitiveDataLayout {
                crate::catalog::PrimitiveDataLayout {
                    vertices_start: self.vertices_start,
                    indices_start: self.indices_start,
                    indices_count: self.indices_count,
                }
            }
        }
    };
}

impl_polygon_layout!(PolygonInstanceFill2D);
impl_polygon_layout!(PolygonInstanceOutline2D);
impl_polygon_layout!(PolygonInstanceFill3D);
impl_polygon_layout!(PolygonInstanceOutline3D);

/// Wraps [`InstancePacking`] to additionally stamp the shared-pool sub-range onto the packed
/// instance (spec §4.C polygon variant).
pub trait PolygonInstancePacking: InstancePacking {
    type PolygonFillInstance: Copy + Send + Sync + PolygonLayout + 'static;
    type PolygonOutlineInstance: Copy + Send + Sync + PolygonLayout + 'static;

    fn pack_polygon_fill(
        transform: &Matrix4<f32>,
        color: Color,
        material: Self::Lighting,
        vertices_start: u32,
        indices_start: u32,
        indices_count: u32,
    ) -> Self::PolygonFillInstance;

    fn pack_polygon_outline(
        transform: &Matrix4<f32>,
        color: Color,
        vertices_start: u32,
        indices_start: u32,
        indices_count: u32,
    ) -> Self::PolygonOutlineInstance;
}

impl PolygonInstancePacking for Dim2 {
    type PolygonFillInstance = PolygonInstanceFill2D;
    type PolygonOutlineInstance = PolygonInstanceOutline2D;

    fn pack_polygon_fill(
        transform: &Matrix4<f32>,
        color: Color,
        material: (),
        vertices_start: u32,
        indices_start: u32,
        indices_count: u32,
    ) -> Self::PolygonFillInstance {
        PolygonInstanceFill2D {
            instance: Self::pack_fill(transform, color, material),
            vertices_start,
            indices_start,
            indices_count,
        }
    }

    fn pack_polygon_outline(
        transform: &Matrix4<f32>,
        color: Color,
        vertices_start: u32,
        indices_start: u32,
        indices_count: u32,
    ) -> Self::PolygonOutlineInstance {
        PolygonInstanceOutline2D {
            instance: Self::pack_outline(transform, color),
            vertices_start,
            indices_start,
            indices_count,
        }
    }
}

impl PolygonInstancePacking for Dim3 {
    type PolygonFillInstance = PolygonInstanceFill3D;
    type PolygonOutlineInstance = PolygonInstanceOutline3D;

    fn pack_polygon_fill(
        transform: &Matrix4<f32>,
        color: Color,
        material: MaterialContribution3D,
        vertices_start: u32,
        indices_start: u32,
        indices_count: u32,
    ) -> Self::PolygonFillInstance {
        PolygonInstanceFill3D {
            instance: Self::pack_fill(transform, color, material),
            vertices_start,
            indices_start,
            indices_count,
        }
    }

    fn pack_polygon_outline(
        transform: &Matrix4<f32>,
        color: Color,
        vertices_start: u32,
        indices_start: u32,
        indices_count: u32,
    ) -> Self::PolygonOutlineInstance {
        PolygonInstanceOutline3D {
            instance: Self::pack_outline(transform, color),
            vertices_start,
            indices_start,
            indices_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix4;

    #[test]
    fn basis_columns_2d_picks_xy_of_col0_col1_col3() {
        let m = Matrix4::new(
            1.0, 2.0, 0.0, 10.0, //
            3.0, 4.0, 0.0, 20.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        );
        let basis = basis_columns_2d(&m);
        assert_eq!(basis[0], Vector2::new(1.0, 3.0));
        assert_eq!(basis[1], Vector2::new(2.0, 4.0));
        assert_eq!(basis[2], Vector2::new(10.0, 20.0));
    }

    #[test]
    fn dim2_pack_fill_round_trips_color() {
        let m = Matrix4::identity();
        let instance = Dim2::pack_fill(&m, Color::RED, ());
        assert_eq!(instance.color, Color::RED.0);
    }
}
