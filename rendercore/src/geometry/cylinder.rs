use std::f32::consts::PI;

use nalgebra::Vector3;

use super::Mesh;

/// Builds a cylinder of unit radius and unit height, centered at the origin and aligned on the
/// `z` axis (`z ∈ [-0.5, 0.5]`), with both caps filled. Used for the 3D `cylinder()`/`capsule()`
/// drawables and `line()`'s 3D shaft (spec §4.G).
pub struct CylinderBuilder {
    radius: f32,
    half_height: f32,
    sides: usize,
}

impl CylinderBuilder {
    /// `sides` must be at least 3.
    pub fn new(radius: f32, height: f32, sides: usize) -> Self {
        assert!(sides >= 3);
        Self {
            radius,
            half_height: height * 0.5,
            sides,
        }
    }

    pub fn build_mesh(&self) -> Mesh {
        let n = self.sides;
        let mut vertices = Vec::with_capacity(n * 2 + 2);
        let mut indices = Vec::with_capacity(n * 12);

        // Side wall: two rings, one per cap height.
        let top_ring_start = 0u32;
        for i in 0..n {
            let angle = (i as f32 / n as f32) * PI * 2.0;
            let (c, s) = (angle.cos(), angle.sin());
            vertices.push(Vector3::new(self.radius * c, self.radius * s, self.half_height));
        }
        let bottom_ring_start = vertices.len() as u32;
        for i in 0..n {
            let angle = (i as f32 / n as f32) * PI * 2.0;
            let (c, s) = (angle.cos(), angle.sin());
            vertices.push(Vector3::new(
                self.radius * c,
                self.radius * s,
                -self.half_height,
            ));
        }

        for i in 0..n as u32 {
            let next = (i + 1) % n as u32;
            let t0 = top_ring_start + i;
            let t1 = top_ring_start + next;
            let b0 = bottom_ring_start + i;
            let b1 = bottom_ring_start + next;
            indices.extend_from_slice(&[t0, b0, b1, t0, b1, t1]);
        }

        // Caps: one center vertex each, fan against the corresponding ring.
        let top_center = vertices.len() as u32;
        vertices.push(Vector3::new(0.0, 0.0, self.half_height));
        for i in 0..n as u32 {
            let next = (i + 1) % n as u32;
            indices.extend_from_slice(&[top_center, top_ring_start + i, top_ring_start + next]);
        }

        let bottom_center = vertices.len() as u32;
        vertices.push(Vector3::new(0.0, 0.0, -self.half_height));
        for i in 0..n as u32 {
            let next = (i + 1) % n as u32;
            indices.extend_from_slice(&[
                bottom_center,
                bottom_ring_start + next,
                bottom_ring_start + i,
            ]);
        }

        Mesh::from_indices(vertices, indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_count_is_two_rings_plus_two_caps() {
        let mesh = CylinderBuilder::new(1.0, 2.0, 12).build_mesh();
        assert_eq!(mesh.vertices.len(), 12 * 2 + 2);
    }
}
