use std::f32::consts::PI;

use nalgebra::Vector3;

use super::Mesh;

/// Builds a regular `n`-gon centered at the origin, lying in the `xy` plane with radius 1,
/// as an origin vertex plus a triangle fan (spec §4.A "origin vertex + fan"). `n` must be at
/// least 3. The first perimeter vertex sits at angle 0 (the positive `x` axis); vertices wind
/// counter-clockwise so the mesh faces `+z`.
pub fn regular_ngon(n: u32) -> Mesh {
    assert!(n >= 3, "a polygon needs at least 3 sides");

    let mut vertices = Vec::with_capacity(n as usize + 1);
    vertices.push(Vector3::new(0.0, 0.0, 0.0));
    for i in 0..n {
        let angle = (i as f32 / n as f32) * PI * 2.0;
        vertices.push(Vector3::new(angle.cos(), angle.sin(), 0.0));
    }

    let mut indices = Vec::with_capacity(n as usize * 3);
    for i in 0..n {
        let next = (i + 1) % n;
        indices.push(0);
        indices.push(1 + i);
        indices.push(1 + next);
    }

    Mesh::from_indices(vertices, indices)
}

/// Unit square centered at the origin in the `xy` plane, edges length 1 (half-extent 0.5),
/// built from two triangles sharing the diagonal.
pub fn square() -> Mesh {
    let vertices = vec![
        Vector3::new(-0.5, -0.5, 0.0),
        Vector3::new(0.5, -0.5, 0.0),
        Vector3::new(0.5, 0.5, 0.0),
        Vector3::new(-0.5, 0.5, 0.0),
    ];
    let indices = vec![0, 1, 2, 0, 2, 3];
    Mesh::from_indices(vertices, indices)
}

/// Equilateral triangle centered at the origin in the `xy` plane, circumradius 1.
pub fn triangle() -> Mesh {
    regular_ngon(3)
}

/// Unit cube centered at the origin, edge length 1 (half-extent 0.5), with per-face normals
/// realized by duplicating vertices so flat shading reads correctly (24 vertices, 6 faces).
pub fn cube() -> Mesh {
    const FACES: [[Vector3<f32>; 4]; 6] = [
        // +x
        [
            Vector3::new(0.5, -0.5, -0.5),
            Vector3::new(0.5, 0.5, -0.5),
            Vector3::new(0.5, 0.5, 0.5),
            Vector3::new(0.5, -0.5, 0.5),
        ],
        // -x
        [
            Vector3::new(-0.5, -0.5, 0.5),
            Vector3::new(-0.5, 0.5, 0.5),
            Vector3::new(-0.5, 0.5, -0.5),
            Vector3::new(-0.5, -0.5, -0.5),
        ],
        // +y
        [
            Vector3::new(-0.5, 0.5, -0.5),
            Vector3::new(-0.5, 0.5, 0.5),
            Vector3::new(0.5, 0.5, 0.5),
            Vector3::new(0.5, 0.5, -0.5),
        ],
        // -y
        [
            Vector3::new(-0.5, -0.5, 0.5),
            Vector3::new(-0.5, -0.5, -0.5),
            Vector3::new(0.5, -0.5, -0.5),
            Vector3::new(0.5, -0.5, 0.5),
        ],
        // +z
        [
            Vector3::new(-0.5, -0.5, 0.5),
            Vector3::new(0.5, -0.5, 0.5),
            Vector3::new(0.5, 0.5, 0.5),
            Vector3::new(-0.5, 0.5, 0.5),
        ],
        // -z
        [
            Vector3::new(0.5, -0.5, -0.5),
            Vector3::new(-0.5, -0.5, -0.5),
            Vector3::new(-0.5, 0.5, -0.5),
            Vector3::new(0.5, 0.5, -0.5),
        ],
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for face in FACES {
        let base = vertices.len() as u32;
        vertices.extend_from_slice(&face);
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    Mesh::from_indices(vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ngon_has_one_triangle_per_side() {
        let mesh = regular_ngon(6);
        assert_eq!(mesh.vertices.len(), 7);
        assert_eq!(mesh.indices.len(), 6 * 3);
    }

    #[test]
    fn square_is_two_triangles() {
        let mesh = square();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
    }

    #[test]
    fn cube_has_six_faces() {
        let mesh = cube();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
    }

    #[test]
    #[should_panic]
    fn ngon_rejects_degenerate_side_count() {
        regular_ngon(2);
    }
}
