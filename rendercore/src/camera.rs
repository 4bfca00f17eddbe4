//! Camera (spec §4.H). View/projection for 2D and 3D, viewport/scissor rectangles in normalized
//! space, mouse unprojection, and the per-camera snapshot ([`CameraInfo`]) the [`crate::renderer::Renderer`]
//! consumes once per frame (spec §3 `Camera<D>`).

use nalgebra::{Matrix4, Vector2, Vector3, Vector4};

use crate::color::Color;
use crate::dim::{Dim2, Dim3};

/// A rectangle in normalized `[0, 1]` window-fraction coordinates, with depth bounds (spec §3
/// "Viewport, Scissor: normalized rectangles with depth bounds").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for NormalizedRect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// A pixel-space rectangle: a [`NormalizedRect`] resolved against the current framebuffer extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    fn to_pixels(self, extent: Vector2<f32>) -> PixelRect {
        PixelRect {
            x: self.x * extent.x,
            y: self.y * extent.y,
            width: self.width * extent.x,
            height: self.height * extent.y,
        }
    }
}

/// Snapshot the [`crate::renderer::Renderer`] consumes once per frame (spec §4.H
/// `create_camera_info`): everything a draw pass needs, with no further dependency on the
/// `Camera` that produced it.
#[derive(Debug, Clone, Copy)]
pub struct CameraInfo {
    pub projection_view: Matrix4<f32>,
    /// World-space eye position; zero in 2D (spec §3 `Camera<D>` names it 3D-only).
    pub view_position: Vector3<f32>,
    pub background_color: Color,
    pub transparent: bool,
    pub viewport: PixelRect,
    pub scissor: PixelRect,
}

/// Shared viewport/scissor/background state plus the dirty-recompute discipline spec §3 requires
/// ("Derived ProjectionView matrix is recomputed whenever View, Projection, or Viewport changes").
struct CameraCommon {
    viewport: NormalizedRect,
    scissor: NormalizedRect,
    background_color: Color,
    transparent: bool,
    framebuffer_extent: Vector2<f32>,
    projection_view: Matrix4<f32>,
    dirty: bool,
}

impl CameraCommon {
    fn new() -> Self {
        Self {
            viewport: NormalizedRect::default(),
            scissor: NormalizedRect::default(),
            background_color: Color::BLACK,
            transparent: false,
            framebuffer_extent: Vector2::new(1.0, 1.0),
            projection_view: Matrix4::identity(),
            dirty: true,
        }
    }
}

/// 2D camera. `view` is the camera's world-space transform (extrinsic, spec §3 "Axes vs
/// Transform"); panning/rotating/scaling it moves the camera rather than the scene. Projection
/// is an orthographic frustum derived from `viewport`'s aspect ratio and `zoom`, not a stored
/// field — spec §3 only names a `Projection` field for 3D.
pub struct Camera2D {
    view: Matrix4<f32>,
    zoom: f32,
    common: CameraCommon,
}

impl Camera2D {
    pub fn new() -> Self {
        Self {
            view: Matrix4::identity(),
            zoom: 1.0,
            common: CameraCommon::new(),
        }
    }

    pub fn view(&self) -> &Matrix4<f32> {
        &self.view
    }

    pub fn set_view(&mut self, view: Matrix4<f32>) {
        self.view = view;
        self.common.dirty = true;
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.max(1e-4);
        self.common.dirty = true;
    }

    pub fn set_viewport(&mut self, viewport: NormalizedRect) {
        self.common.viewport = viewport;
        self.common.dirty = true;
    }

    pub fn set_scissor(&mut self, scissor: NormalizedRect) {
        self.common.scissor = scissor;
    }

    pub fn set_background_color(&mut self, color: Color) {
        self.common.background_color = color;
    }

    pub fn set_transparent(&mut self, transparent: bool) {
        self.common.transparent = transparent;
    }

    /// Called once per frame by [`crate::window::Window`] with the current framebuffer size.
    pub fn set_framebuffer_extent(&mut self, width: u32, height: u32) {
        let extent = Vector2::new(width.max(1) as f32, height.max(1) as f32);
        if extent != self.common.framebuffer_extent {
            self.common.framebuffer_extent = extent;
            self.common.dirty = true;
        }
    }

    fn half_extents_world(&self) -> Vector2<f32> {
        let pixels = self.common.viewport.to_pixels(self.common.framebuffer_extent);
        let aspect = pixels.width.max(1.0) / pixels.height.max(1.0);
        Vector2::new(aspect / self.zoom, 1.0 / self.zoom)
    }

    fn recompute(&mut self) {
        if !self.common.dirty {
            return;
        }
        let half_extents = self.half_extents_world();
        let projection = Matrix4::new_orthographic(
            -half_extents.x,
            half_extents.x,
            -half_extents.y,
            half_extents.y,
            -1.0,
            1.0,
        );
        let view_inverse = self.view.try_inverse().unwrap_or_else(Matrix4::identity);
        self.common.projection_view = projection * view_inverse;
        self.common.dirty = false;
    }

    pub fn projection_view(&mut self) -> Matrix4<f32> {
        self.recompute();
        self.common.projection_view
    }

    pub fn screen_to_viewport(&self, screen: Vector2<f32>) -> Vector2<f32> {
        let pixels = self.common.viewport.to_pixels(self.common.framebuffer_extent);
        Vector2::new(
            ((screen.x - pixels.x) / pixels.width.max(1.0)) * 2.0 - 1.0,
            1.0 - ((screen.y - pixels.y) / pixels.height.max(1.0)) * 2.0,
        )
    }

    pub fn viewport_to_screen(&self, ndc: Vector2<f32>) -> Vector2<f32> {
        let pixels = self.common.viewport.to_pixels(self.common.framebuffer_extent);
        Vector2::new(
            pixels.x + ((ndc.x + 1.0) * 0.5) * pixels.width,
            pixels.y + ((1.0 - ndc.y) * 0.5) * pixels.height,
        )
    }

    pub fn viewport_to_world(&mut self, ndc: Vector2<f32>) -> Vector2<f32> {
        let projection_view = self.projection_view();
        let inverse = projection_view.try_inverse().unwrap_or_else(Matrix4::identity);
        let world = inverse * Vector4::new(ndc.x, ndc.y, 0.0, 1.0);
        Vector2::new(world.x, world.y)
    }

    pub fn world_to_viewport(&mut self, world: Vector2<f32>) -> Vector2<f32> {
        let projection_view = self.projection_view();
        let clip = projection_view * Vector4::new(world.x, world.y, 0.0, 1.0);
        Vector2::new(clip.x, clip.y)
    }

    pub fn screen_to_world(&mut self, screen: Vector2<f32>) -> Vector2<f32> {
        let ndc = self.screen_to_viewport(screen);
        self.viewport_to_world(ndc)
    }

    pub fn world_to_screen(&mut self, world: Vector2<f32>) -> Vector2<f32> {
        let ndc = self.world_to_viewport(world);
        self.viewport_to_screen(ndc)
    }

    /// WASD + up/down translate, left/right rotate, scaled by `view.Scale · step` (spec §4.H).
    /// `input` is the fixed set of held-direction booleans the application derives from
    /// [`crate::input::Event`]; the camera itself has no dependency on a windowing crate.
    pub fn control_movement_with_user_input(&mut self, controls: &PlanarMovementInput, dt: f32) {
        let step = dt / self.zoom;
        let mut delta = Vector2::new(0.0, 0.0);
        if controls.move_right {
            delta.x += step;
        }
        if controls.move_left {
            delta.x -= step;
        }
        if controls.move_up {
            delta.y += step;
        }
        if controls.move_down {
            delta.y -= step;
        }
        if delta != Vector2::zeros() {
            let translation = Matrix4::new_translation(&nalgebra::Vector3::new(delta.x, delta.y, 0.0));
            self.view = translation * self.view;
            self.common.dirty = true;
        }

        let mut rotate = 0.0f32;
        if controls.rotate_counter_clockwise {
            rotate += step;
        }
        if controls.rotate_clockwise {
            rotate -= step;
        }
        if rotate != 0.0 {
            let rotation = Matrix4::new_rotation(nalgebra::Vector3::z() * rotate);
            self.view *= rotation;
            self.common.dirty = true;
        }
    }

    /// Zooms toward the pointer: keep the world point under `pointer_screen` fixed while scaling
    /// (spec §4.H `control_scroll_with_user_input`).
    pub fn control_scroll_with_user_input(&mut self, pointer_screen: Vector2<f32>, scroll_step: f32) {
        let before = self.screen_to_world(pointer_screen);
        self.set_zoom(self.zoom * (1.0 + scroll_step).max(1e-4));
        let after = self.screen_to_world(pointer_screen);
        let correction = before - after;
        self.view = Matrix4::new_translation(&nalgebra::Vector3::new(correction.x, correction.y, 0.0)) * self.view;
        self.common.dirty = true;
    }

    pub fn create_camera_info(&mut self) -> CameraInfo {
        let projection_view = self.projection_view();
        CameraInfo {
            projection_view,
            view_position: Vector3::zeros(),
            background_color: self.common.background_color,
            transparent: self.common.transparent,
            viewport: self.common.viewport.to_pixels(self.common.framebuffer_extent),
            scissor: self.common.scissor.to_pixels(self.common.framebuffer_extent),
        }
    }
}

impl Default for Camera2D {
    fn default() -> Self {
        Self::new()
    }
}

/// Held-direction input for [`Camera2D::control_movement_with_user_input`] (spec §4.H
/// "WASD+Up/Down for translate, arrow keys ... for rotate"); the application fills this in from
/// whatever key-state tracking it keeps against [`crate::input::Event`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanarMovementInput {
    pub move_up: bool,
    pub move_down: bool,
    pub move_left: bool,
    pub move_right: bool,
    pub rotate_clockwise: bool,
    pub rotate_counter_clockwise: bool,
}

/// Held-direction input for [`Camera3D::control_movement_with_user_input`], adding the 3D
/// up/down pair and a mouse-delta look-around mode (spec §4.H "in 3D adds a look-around mode
/// using mouse delta").
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpatialMovementInput {
    pub move_forward: bool,
    pub move_backward: bool,
    pub move_left: bool,
    pub move_right: bool,
    pub move_up: bool,
    pub move_down: bool,
    pub look_around: bool,
    pub mouse_delta: Vector2<f32>,
}

/// 3D camera: a world-space view transform plus an explicit projection matrix (spec §3
/// `Camera<D>` "Projection (3D): mat4").
pub struct Camera3D {
    view: Matrix4<f32>,
    projection: Matrix4<f32>,
    fov_y_radians: f32,
    near: f32,
    far: f32,
    yaw: f32,
    pitch: f32,
    common: CameraCommon,
}

impl Camera3D {
    pub fn new(fov_y_radians: f32, near: f32, far: f32) -> Self {
        let mut camera = Self {
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
            fov_y_radians,
            near,
            far,
            yaw: 0.0,
            pitch: 0.0,
            common: CameraCommon::new(),
        };
        camera.common.dirty = true;
        camera
    }

    pub fn view(&self) -> &Matrix4<f32> {
        &self.view
    }

    pub fn set_view(&mut self, view: Matrix4<f32>) {
        self.view = view;
        self.common.dirty = true;
    }

    pub fn set_viewport(&mut self, viewport: NormalizedRect) {
        self.common.viewport = viewport;
        self.common.dirty = true;
    }

    pub fn set_scissor(&mut self, scissor: NormalizedRect) {
        self.common.scissor = scissor;
    }

    pub fn set_background_color(&mut self, color: Color) {
        self.common.background_color = color;
    }

    pub fn set_transparent(&mut self, transparent: bool) {
        self.common.transparent = transparent;
    }

    pub fn set_framebuffer_extent(&mut self, width: u32, height: u32) {
        let extent = Vector2::new(width.max(1) as f32, height.max(1) as f32);
        if extent != self.common.framebuffer_extent {
            self.common.framebuffer_extent = extent;
            self.common.dirty = true;
        }
    }

    fn aspect_ratio(&self) -> f32 {
        let pixels = self.common.viewport.to_pixels(self.common.framebuffer_extent);
        pixels.width.max(1.0) / pixels.height.max(1.0)
    }

    fn recompute(&mut self) {
        if !self.common.dirty {
            return;
        }
        self.projection =
            Matrix4::new_perspective(self.aspect_ratio(), self.fov_y_radians, self.near, self.far);
        let view_inverse = self.view.try_inverse().unwrap_or_else(Matrix4::identity);
        self.common.projection_view = self.projection * view_inverse;
        self.common.dirty = false;
    }

    pub fn projection_view(&mut self) -> Matrix4<f32> {
        self.recompute();
        self.common.projection_view
    }

    pub fn view_position(&self) -> Vector3<f32> {
        self.view.column(3).xyz()
    }

    pub fn screen_to_viewport(&self, screen: Vector2<f32>) -> Vector2<f32> {
        let pixels = self.common.viewport.to_pixels(self.common.framebuffer_extent);
        Vector2::new(
            ((screen.x - pixels.x) / pixels.width.max(1.0)) * 2.0 - 1.0,
            1.0 - ((screen.y - pixels.y) / pixels.height.max(1.0)) * 2.0,
        )
    }

    pub fn viewport_to_screen(&self, ndc: Vector2<f32>) -> Vector2<f32> {
        let pixels = self.common.viewport.to_pixels(self.common.framebuffer_extent);
        Vector2::new(
            pixels.x + ((ndc.x + 1.0) * 0.5) * pixels.width,
            pixels.y + ((1.0 - ndc.y) * 0.5) * pixels.height,
        )
    }

    /// Unprojects a normalized-device-coordinate pointer position onto the near plane in world
    /// space (spec §4.H mouse unprojection). Picking a ray's far point is left to the caller
    /// (out of scope, spec §1 "picking").
    pub fn viewport_to_world(&mut self, ndc: Vector2<f32>) -> Vector3<f32> {
        let projection_view = self.projection_view();
        let inverse = projection_view.try_inverse().unwrap_or_else(Matrix4::identity);
        let near = inverse * Vector4::new(ndc.x, ndc.y, -1.0, 1.0);
        near.xyz() / near.w
    }

    pub fn world_to_viewport(&mut self, world: Vector3<f32>) -> Vector2<f32> {
        let projection_view = self.projection_view();
        let clip = projection_view * Vector4::new(world.x, world.y, world.z, 1.0);
        Vector2::new(clip.x / clip.w, clip.y / clip.w)
    }

    pub fn screen_to_world(&mut self, screen: Vector2<f32>) -> Vector3<f32> {
        let ndc = self.screen_to_viewport(screen);
        self.viewport_to_world(ndc)
    }

    pub fn world_to_screen(&mut self, world: Vector3<f32>) -> Vector2<f32> {
        let ndc = self.world_to_viewport(world);
        self.viewport_to_screen(ndc)
    }

    fn rebuild_view_from_yaw_pitch(&mut self, position: Vector3<f32>) {
        let rotation =
            nalgebra::Rotation3::from_euler_angles(self.pitch, self.yaw, 0.0).to_homogeneous();
        self.view = Matrix4::new_translation(&position) * rotation;
        self.common.dirty = true;
    }

    /// WASD + up/down translate relative to the camera's own basis; mouse delta looks around
    /// while `look_around` is held (spec §4.H "3D adds a look-around mode using mouse delta").
    pub fn control_movement_with_user_input(&mut self, controls: &SpatialMovementInput, dt: f32) {
        let position = self.view.column(3).xyz();
        let forward = -self.view.column(2).xyz();
        let right = self.view.column(0).xyz();
        let up = Vector3::y();

        let step = dt;
        let mut delta = Vector3::zeros();
        if controls.move_forward {
            delta += forward * step;
        }
        if controls.move_backward {
            delta -= forward * step;
        }
        if controls.move_right {
            delta += right * step;
        }
        if controls.move_left {
            delta -= right * step;
        }
        if controls.move_up {
            delta += up * step;
        }
        if controls.move_down {
            delta -= up * step;
        }

        if controls.look_around {
            const LOOK_SENSITIVITY: f32 = 0.0025;
            self.yaw -= controls.mouse_delta.x * LOOK_SENSITIVITY;
            self.pitch = (self.pitch - controls.mouse_delta.y * LOOK_SENSITIVITY)
                .clamp(-std::f32::consts::FRAC_PI_2 + 0.01, std::f32::consts::FRAC_PI_2 - 0.01);
        }

        if delta != Vector3::zeros() || controls.look_around {
            self.rebuild_view_from_yaw_pitch(position + delta);
        }
    }

    pub fn control_scroll_with_user_input(&mut self, scroll_step: f32) {
        self.fov_y_radians = (self.fov_y_radians - scroll_step * 0.05)
            .clamp(0.1, std::f32::consts::PI - 0.1);
        self.common.dirty = true;
    }

    pub fn create_camera_info(&mut self) -> CameraInfo {
        let view_position = self.view_position();
        let projection_view = self.projection_view();
        CameraInfo {
            projection_view,
            view_position,
            background_color: self.common.background_color,
            transparent: self.common.transparent,
            viewport: self.common.viewport.to_pixels(self.common.framebuffer_extent),
            scissor: self.common.scissor.to_pixels(self.common.framebuffer_extent),
        }
    }
}

/// Marker so call sites that are themselves generic over dimension (e.g. a future multi-window
/// abstraction) can name "the 2D or 3D camera type" without a trait object; `rendercore` itself
/// only ever constructs [`Camera2D`]/[`Camera3D`] directly.
pub trait CameraDimension {
    type Camera;
}
impl CameraDimension for Dim2 {
    type Camera = Camera2D;
}
impl CameraDimension for Dim3 {
    type Camera = Camera3D;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera2d_screen_world_round_trip() {
        let mut camera = Camera2D::new();
        camera.set_framebuffer_extent(1920, 1080);
        camera.set_view(Matrix4::new_translation(&nalgebra::Vector3::new(3.0, -2.0, 0.0)));
        camera.set_zoom(2.0);

        let screen = Vector2::new(640.0, 300.0);
        let world = camera.screen_to_world(screen);
        let round_tripped = camera.world_to_screen(world);

        assert!((round_tripped - screen).norm() < 1e-2);
    }

    #[test]
    fn camera3d_screen_world_round_trip_on_near_plane() {
        let mut camera = Camera3D::new(1.2, 0.1, 100.0);
        camera.set_framebuffer_extent(1280, 720);

        let screen = Vector2::new(200.0, 400.0);
        let world = camera.screen_to_world(screen);
        let round_tripped = camera.world_to_screen(world);

        assert!((round_tripped - screen).norm() < 1e-1);
    }

    #[test]
    fn zoom_toward_pointer_keeps_world_point_fixed() {
        let mut camera = Camera2D::new();
        camera.set_framebuffer_extent(800.0 as u32, 600.0 as u32);
        let pointer = Vector2::new(400.0, 300.0);
        let before = camera.screen_to_world(pointer);
        camera.control_scroll_with_user_input(pointer, 0.5);
        let after = camera.screen_to_world(pointer);
        assert!((before - after).norm() < 1e-3);
    }
}
