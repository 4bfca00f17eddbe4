//! Replaces the original `<N>` C++ template (spec §9 "Multiple dimensions via type parameter")
//! with a sealed marker-type pair implementing [`Dimension`]. Code generic over `D: Dimension`
//! monomorphizes per dimension; no runtime branching on dimensionality belongs in a hot path.

use nalgebra::{Vector2, Vector3};

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Dim2 {}
    impl Sealed for super::Dim3 {}
}

/// Per-dimension material contribution. 2D materials carry none; 3D materials carry the
/// diffuse/specular/sharpness scalars from spec §3 `Material<D>`.
pub trait Lighting: Copy + Default + Send + Sync + 'static {
    /// Number of `f32` scalars this contributes to `InstanceData`'s fill payload.
    const SCALAR_COUNT: usize;

    fn write_scalars(&self, out: &mut Vec<f32>);
}

impl Lighting for () {
    const SCALAR_COUNT: usize = 0;
    fn write_scalars(&self, _out: &mut Vec<f32>) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialContribution3D {
    pub diffuse: f32,
    pub specular: f32,
    pub specular_sharpness: f32,
}

impl Default for MaterialContribution3D {
    fn default() -> Self {
        Self {
            diffuse: 1.0,
            specular: 0.4,
            specular_sharpness: 32.0,
        }
    }
}

impl Lighting for MaterialContribution3D {
    const SCALAR_COUNT: usize = 3;
    fn write_scalars(&self, out: &mut Vec<f32>) {
        out.push(self.diffuse);
        out.push(self.specular);
        out.push(self.specular_sharpness);
    }
}

/// Compile-time dimension selector, `D ∈ {2, 3}` (spec §3 "Dimension D").
pub trait Dimension: sealed::Sealed + Copy + Clone + Send + Sync + 'static {
    /// Number of basis columns packed per instance (spec §3 `InstanceData<D, _>`): 3 in 2D, 4 in 3D.
    const BASIS_COLUMNS: usize;
    const IS_3D: bool;

    type Lighting: Lighting;
    type Vector: Copy + Send + Sync;

    fn vector_zero() -> Self::Vector;
}

/// 2D dimension marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dim2;

impl Dimension for Dim2 {
    const BASIS_COLUMNS: usize = 3;
    const IS_3D: bool = false;
    type Lighting = ();
    type Vector = Vector2<f32>;

    fn vector_zero() -> Self::Vector {
        Vector2::zeros()
    }
}

/// 3D dimension marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dim3;

impl Dimension for Dim3 {
    const BASIS_COLUMNS: usize = 4;
    const IS_3D: bool = true;
    type Lighting = MaterialContribution3D;
    type Vector = Vector3<f32>;

    fn vector_zero() -> Self::Vector {
        Vector3::zeros()
    }
}
