//! Render context (spec §4.G). The stateful immediate-mode front end: per-thread
//! transform/axes/fill/outline/material stacks that resolve each high-level drawable call into
//! one or more batcher submissions with the correct pipeline-mode bitmask.
//!
//! Kept generic over [`Dimension`] like [`crate::renderer::Renderer`]; 2D-only operations
//! (`square`, `n_gon`, `stadium`, `rounded_square`) and 3D-only operations (`cube`, `sphere`,
//! `cylinder`, `capsule`, `rounded_cube`, lights) live in concrete `impl RenderContext<Dim2>` /
//! `impl RenderContext<Dim3>` blocks rather than behind extra trait bounds, since the underlying
//! primitive catalogs themselves only cover those shapes for one dimension (spec §4.A).

use std::f32::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use nalgebra::{Matrix4, Rotation3, Vector2, Vector3};
use parking_lot::Mutex;

use crate::catalog::{CatalogVertex, Primitives2D, Primitives3D};
use crate::color::Color;
use crate::dim::{Dim2, Dim3, Dimension};
use crate::error::{Error, Result};
use crate::geometry::Mesh;
use crate::instance::{InstancePacking, PolygonInstancePacking};
use crate::light::{DirectionalLight, LightSupport, PointLight};
use crate::pipeline::{PipelineMode, PipelineModeMask};
use crate::renderer::Renderer;

/// Per-draw fill/outline bitset (spec §3 "Flags: bitset {Fill, Outline}").
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const FILL = 0b01;
        const OUTLINE = 0b10;
    }
}

/// Spacing between successive 2D draws' synthetic depth value (SPEC_FULL.md §3, resolving
/// spec.md §9's 2D-layering open question the way `onyx` does: a monotonically decreasing `z`
/// per draw rather than an explicit layer index). At this spacing a single frame can order
/// roughly 100,000 2D draws by call order before `z` underflows past `-1.0`; callers relying on
/// draw-order layering beyond that count need an explicit camera-space `z` instead.
pub const DEPTH_EPSILON: f32 = 1.0e-5;

/// Coarse-ish cylinder resolution used for `line()`'s 3D cylinder — lines are thin, so the
/// highest tessellation level buys nothing visually.
const LINE_CYLINDER_RESOLUTION: usize = 1;

/// One thread's current drawing state (spec §4.G `RenderState`). Cloned onto a stack's top by
/// `push`, mutated in place by the transform/fill/outline manipulators, discarded by `pop`.
#[derive(Clone)]
pub struct RenderState<D: Dimension> {
    /// Composed object transform; manipulators like `translate`/`scale`/`rotate_*` compose here
    /// extrinsically (new = arg · current).
    pub transform: Matrix4<f32>,
    /// Composed axes transform; `translate_axes`/`transform_axes`/`keep_window_aspect` compose
    /// here intrinsically (new = current · arg).
    pub axes: Matrix4<f32>,
    pub fill: bool,
    pub outline: bool,
    pub outline_width: f32,
    pub fill_color: Color,
    pub outline_color: Color,
    pub material: D::Lighting,
}

impl<D: Dimension> RenderState<D> {
    pub fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        if self.fill {
            flags |= Flags::FILL;
        }
        if self.outline {
            flags |= Flags::OUTLINE;
        }
        flags
    }

    /// `transform` composes extrinsically: `new = delta · current` (spec §4.G). Pure CPU state
    /// mutation, split out of [`RenderContext::transform`] so it's unit-testable without a
    /// [`crate::renderer::Renderer`]/device, the same way [`StateStacks`] is.
    fn apply_transform(&mut self, delta: Matrix4<f32>) {
        self.transform = delta * self.transform;
    }

    /// `transform_axes` composes intrinsically: `new = current · delta` (spec §4.G).
    fn apply_transform_axes(&mut self, delta: Matrix4<f32>) {
        self.axes *= delta;
    }
}

impl<D: Dimension> Default for RenderState<D> {
    fn default() -> Self {
        Self {
            transform: Matrix4::identity(),
            axes: Matrix4::identity(),
            fill: true,
            outline: false,
            outline_width: 0.0,
            fill_color: Color::WHITE,
            outline_color: Color::BLACK,
            material: D::Lighting::default(),
        }
    }
}

/// Resolves spec §4.G step 2's fixed table from `Flags` plus the current outline width. An
/// outline request with a non-positive width degrades to no outline pass at all (there is
/// nothing meaningful to test the stencil against).
fn resolve_mode_mask(flags: Flags, outline_width: f32) -> PipelineModeMask {
    let fill = flags.contains(Flags::FILL);
    let outline = flags.contains(Flags::OUTLINE) && outline_width > 0.0;
    match (fill, outline) {
        (true, false) => PipelineModeMask::NO_STENCIL_WRITE_DO_FILL,
        (true, true) => PipelineModeMask::DO_STENCIL_WRITE_DO_FILL | PipelineModeMask::DO_STENCIL_TEST_NO_FILL,
        (false, true) => PipelineModeMask::DO_STENCIL_WRITE_NO_FILL | PipelineModeMask::DO_STENCIL_TEST_NO_FILL,
        (false, false) => PipelineModeMask::empty(),
    }
}

/// The three fill-instance passes a mask may select, in spec §4.E render order.
fn fill_modes(mask: PipelineModeMask) -> impl Iterator<Item = PipelineMode> {
    [
        PipelineMode::NoStencilWriteDoFill,
        PipelineMode::DoStencilWriteDoFill,
        PipelineMode::DoStencilWriteNoFill,
    ]
    .into_iter()
    .filter(move |mode| mask.contains_mode(*mode))
}

/// Owns every render thread's state stack for one context (spec §4.G `state_stack[thread_id]`).
/// Deliberately holds no GPU state, so its push/pop/share/flush bookkeeping is unit-testable
/// without a device (SPEC_FULL.md §2 "CPU-only logic ... is tested").
struct StateStacks<D: Dimension> {
    stacks: Mutex<Vec<Vec<RenderState<D>>>>,
    draw_index: AtomicU32,
}

impl<D: Dimension> StateStacks<D> {
    fn new() -> Self {
        Self {
            stacks: Mutex::new(vec![vec![RenderState::default()]]),
            draw_index: AtomicU32::new(0),
        }
    }

    fn push_thread(&self, initial_stack: Vec<RenderState<D>>) -> usize {
        let mut stacks = self.stacks.lock();
        let thread_id = stacks.len();
        stacks.push(initial_stack);
        thread_id
    }

    fn next_depth(&self) -> f32 {
        let index = self.draw_index.fetch_add(1, Ordering::Relaxed);
        1.0 - index as f32 * DEPTH_EPSILON
    }
}

/// Stateful immediate-mode front end (spec §4.G). Cheap to clone — a clone shares the underlying
/// [`Renderer`] and thread-stack table, differing only in which thread slot it addresses.
#[derive(Clone)]
pub struct RenderContext<D: Dimension + CatalogVertex + InstancePacking + PolygonInstancePacking + LightSupport> {
    renderer: Arc<Mutex<Renderer<D>>>,
    stacks: Arc<StateStacks<D>>,
    thread_id: usize,
}

impl<D> RenderContext<D>
where
    D: Dimension + CatalogVertex + InstancePacking + PolygonInstancePacking + LightSupport,
{
    pub fn new(renderer: Renderer<D>) -> Self {
        Self {
            renderer: Arc::new(Mutex::new(renderer)),
            stacks: Arc::new(StateStacks::new()),
            thread_id: 0,
        }
    }

    /// Access to the underlying [`Renderer`] for the per-frame orchestration calls
    /// (`flush`/`grow_to_fit`/`send_to_device`/`render`) that the owning [`crate::window::Window`]
    /// drives — distinct from this type's own per-draw-call state management.
    pub fn lock_renderer(&self) -> parking_lot::MutexGuard<'_, Renderer<D>> {
        self.renderer.lock()
    }

    fn distribute(&self, n_threads: usize, seed_stack: Vec<RenderState<D>>) -> Vec<RenderContext<D>> {
        (0..n_threads)
            .map(|_| {
                let thread_id = self.stacks.push_thread(seed_stack.clone());
                RenderContext {
                    renderer: self.renderer.clone(),
                    stacks: self.stacks.clone(),
                    thread_id,
                }
            })
            .collect()
    }

    /// Copies this thread's full stack onto `n_threads` new thread slots (spec §4.G
    /// `share_state_stack`), returning one handle per new slot to hand to spawned workers.
    pub fn share_state_stack(&self, n_threads: usize) -> Vec<RenderContext<D>> {
        let stack = self.stacks.stacks.lock()[self.thread_id].clone();
        self.distribute(n_threads, stack)
    }

    /// Copies only this thread's current (top) state onto `n_threads` new thread slots (spec
    /// §4.G `share_current_state`).
    pub fn share_current_state(&self, n_threads: usize) -> Vec<RenderContext<D>> {
        let top = self.current_state();
        self.distribute(n_threads, vec![top])
    }

    /// Seeds `n_threads` new thread slots with an explicit state (spec §4.G `share_state`).
    pub fn share_state(&self, state: RenderState<D>, n_threads: usize) -> Vec<RenderContext<D>> {
        self.distribute(n_threads, vec![state])
    }

    /// Validates that every one of this context's first `n_threads` slots has returned to a
    /// balanced (single-element) stack (spec §4.G `flush(n_threads)`), then resets the shared
    /// depth-layering counter for the next frame.
    pub fn flush(&self, n_threads: usize) -> Result<()> {
        let stacks = self.stacks.stacks.lock();
        for thread_id in 0..n_threads {
            let Some(stack) = stacks.get(thread_id) else {
                return Err(Error::InvalidState("flush referenced a thread slot that was never shared"));
            };
            if stack.len() != 1 {
                return Err(Error::InvalidState("push/pop imbalance at flush"));
            }
        }
        drop(stacks);
        self.stacks.draw_index.store(0, Ordering::Relaxed);
        Ok(())
    }

    pub fn current_state(&self) -> RenderState<D> {
        self.stacks.stacks.lock()[self.thread_id]
            .last()
            .cloned()
            .expect("a thread's state stack is never empty")
    }

    fn with_top<R>(&self, f: impl FnOnce(&mut RenderState<D>) -> R) -> R {
        let mut stacks = self.stacks.stacks.lock();
        let stack = &mut stacks[self.thread_id];
        f(stack.last_mut().expect("a thread's state stack is never empty"))
    }

    /// Duplicates the top state and pushes the copy.
    pub fn push(&self) {
        let top = self.current_state();
        self.stacks.stacks.lock()[self.thread_id].push(top);
    }

    pub fn pop(&self) -> Result<()> {
        let mut stacks = self.stacks.stacks.lock();
        let stack = &mut stacks[self.thread_id];
        if stack.len() <= 1 {
            return Err(Error::InvalidState("pop without a matching push"));
        }
        stack.pop();
        Ok(())
    }

    pub fn set_fill(&self, fill: bool) {
        self.with_top(|state| state.fill = fill);
    }

    pub fn set_outline(&self, width: f32, color: Color) {
        self.with_top(|state| {
            state.outline = width > 0.0;
            state.outline_width = width;
            state.outline_color = color;
        });
    }

    pub fn set_color(&self, color: Color) {
        self.with_top(|state| state.fill_color = color);
    }

    pub fn set_material(&self, material: D::Lighting) {
        self.with_top(|state| state.material = material);
    }

    /// `transform` composes extrinsically: `new = arg · current` (spec §4.G).
    pub fn transform(&self, delta: Matrix4<f32>) {
        self.with_top(|state| state.apply_transform(delta));
    }

    /// `transform_axes` composes intrinsically: `new = current · arg` (spec §4.G).
    pub fn transform_axes(&self, delta: Matrix4<f32>) {
        self.with_top(|state| state.apply_transform_axes(delta));
    }

    pub fn translate(&self, delta: Vector3<f32>) {
        self.transform(Matrix4::new_translation(&delta));
    }

    pub fn translate_axes(&self, delta: Vector3<f32>) {
        self.transform_axes(Matrix4::new_translation(&delta));
    }

    pub fn scale(&self, factor: f32) {
        self.transform(Matrix4::new_scaling(factor));
    }

    pub fn rotate_z(&self, radians: f32) {
        self.transform(Rotation3::from_axis_angle(&Vector3::z_axis(), radians).to_homogeneous());
    }

    /// Non-uniformly scales the axes transform to counter a window's aspect ratio, so content
    /// composed before this call keeps its on-screen proportions regardless of window shape
    /// (onyx `render_context.cpp`'s `keep_window_aspect`, SPEC_FULL.md §3).
    pub fn keep_window_aspect(&self, aspect: f32) {
        self.transform_axes(Matrix4::new_nonuniform_scaling(&Vector3::new(1.0 / aspect, 1.0, 1.0)));
    }

    pub fn mesh(&self, mesh: &Mesh) {
        self.submit_polygon(mesh);
    }

    fn submit_polygon(&self, mesh: &Mesh) {
        let state = self.current_state();
        let composed = self.compose(&state, Matrix4::identity());
        let mask = resolve_mode_mask(state.flags(), state.outline_width);

        let mut renderer = self.renderer.lock();
        for mode in fill_modes(mask) {
            renderer
                .polygon_batch()
                .draw_fill(mode, mesh, &composed, state.fill_color, state.material);
        }
        if mask.contains_mode(PipelineMode::DoStencilTestNoFill) {
            let outline_transform = composed * Matrix4::new_scaling(1.0 + state.outline_width);
            renderer.polygon_batch().draw_outline(mesh, &outline_transform, state.outline_color);
        }
    }

    /// `Axes · Transform · local_transform`, with the 2D depth-layering `z` patched in for
    /// non-3D dimensions (spec §4.G step 3; SPEC_FULL.md §3).
    fn compose(&self, state: &RenderState<D>, local_transform: Matrix4<f32>) -> Matrix4<f32> {
        let mut composed = state.axes * state.transform * local_transform;
        if !D::IS_3D {
            composed[(2, 3)] = self.stacks.next_depth();
        }
        composed
    }
}

/// Which batcher group a fixed-catalog primitive submits to (spec §4.C "mesh / circle" kinds).
enum DrawableKind {
    Mesh,
    Circle,
}

impl<D> RenderContext<D>
where
    D: Dimension + CatalogVertex + InstancePacking + PolygonInstancePacking + LightSupport,
{
    fn submit_primitive(&self, kind: DrawableKind, primitive_index: u32, local_transform: Matrix4<f32>) {
        let state = self.current_state();
        let composed = self.compose(&state, local_transform);
        let mask = resolve_mode_mask(state.flags(), state.outline_width);

        let mut renderer = self.renderer.lock();
        for mode in fill_modes(mask) {
            let instance = D::pack_fill(&composed, state.fill_color, state.material);
            let batch = match kind {
                DrawableKind::Mesh => renderer.mesh_fill_batch(primitive_index, mode),
                DrawableKind::Circle => renderer.circle_fill_batch(mode),
            };
            if let Some(batch) = batch {
                batch.draw(instance);
            }
        }
        if mask.contains_mode(PipelineMode::DoStencilTestNoFill) {
            let outline_transform = composed * Matrix4::new_scaling(1.0 + state.outline_width);
            let instance = D::pack_outline(&outline_transform, state.outline_color);
            let batch = match kind {
                DrawableKind::Mesh => renderer.mesh_outline_batch(primitive_index, PipelineMode::DoStencilTestNoFill),
                DrawableKind::Circle => renderer.circle_outline_batch(PipelineMode::DoStencilTestNoFill),
            };
            if let Some(batch) = batch {
                batch.draw(instance);
            }
        }
    }
}

// 2D-only drawables: the `Dim2` catalog (spec §4.A) has no cube/sphere/cylinder entries, so these
// live here rather than behind a shared trait bound.
impl RenderContext<Dim2> {
    pub fn triangle(&self) {
        self.submit_primitive(DrawableKind::Mesh, Primitives2D::TRIANGLE, Matrix4::identity());
    }

    pub fn square(&self) {
        self.submit_primitive(DrawableKind::Mesh, Primitives2D::SQUARE, Matrix4::identity());
    }

    pub fn n_gon(&self, sides: u32) {
        self.submit_primitive(DrawableKind::Mesh, Primitives2D::ngon(sides), Matrix4::identity());
    }

    pub fn circle(&self) {
        self.submit_primitive(DrawableKind::Circle, Primitives2D::CIRCLE, Matrix4::identity());
    }

    /// A rectangular body plus two circular caps (spec §4.G "`stadium` draws a square plus two
    /// half-circles"). Drawing full caps rather than half-circles is equivalent for an opaque
    /// fill — the half of each cap overlapping the body is redundant, not incorrect — and avoids
    /// a half-circle mesh the catalog doesn't otherwise need.
    pub fn stadium(&self, length: f32, radius: f32) {
        let body_length = (length - 2.0 * radius).max(0.0);
        self.submit_primitive(
            DrawableKind::Mesh,
            Primitives2D::SQUARE,
            Matrix4::new_nonuniform_scaling(&Vector3::new(body_length, radius * 2.0, 1.0)),
        );
        for sign in [-1.0f32, 1.0] {
            let cap = Matrix4::new_translation(&Vector3::new(sign * body_length / 2.0, 0.0, 0.0))
                * Matrix4::new_scaling(radius);
            self.submit_primitive(DrawableKind::Circle, Primitives2D::CIRCLE, cap);
        }
    }

    /// A central cross of two overlapping rectangles plus four corner circles (spec §4.G
    /// "compose a central rectangle with corner and edge arcs"); same full-circle-overlap
    /// reasoning as [`Self::stadium`].
    pub fn rounded_square(&self, size: Vector2<f32>, radius: f32) {
        let (w, h) = (size.x, size.y);
        self.submit_primitive(
            DrawableKind::Mesh,
            Primitives2D::SQUARE,
            Matrix4::new_nonuniform_scaling(&Vector3::new(w, (h - 2.0 * radius).max(0.0), 1.0)),
        );
        self.submit_primitive(
            DrawableKind::Mesh,
            Primitives2D::SQUARE,
            Matrix4::new_nonuniform_scaling(&Vector3::new((w - 2.0 * radius).max(0.0), h, 1.0)),
        );
        for sx in [-1.0f32, 1.0] {
            for sy in [-1.0f32, 1.0] {
                let corner = Matrix4::new_translation(&Vector3::new(sx * (w / 2.0 - radius), sy * (h / 2.0 - radius), 0.0))
                    * Matrix4::new_scaling(radius);
                self.submit_primitive(DrawableKind::Circle, Primitives2D::CIRCLE, corner);
            }
        }
    }

    pub fn polygon(&self, points: &[Vector2<f32>]) {
        self.mesh(&fan_mesh(points));
    }

    /// Rotates a unit square to align with `b - a`, scaled to `length × thickness` (spec §4.G).
    pub fn line(&self, a: Vector2<f32>, b: Vector2<f32>, thickness: f32) {
        let delta = b - a;
        let length = delta.norm();
        if length < f32::EPSILON {
            return;
        }
        let mid = (a + b) * 0.5;
        let angle = delta.y.atan2(delta.x);
        let local = Matrix4::new_translation(&Vector3::new(mid.x, mid.y, 0.0))
            * Rotation3::from_axis_angle(&Vector3::z_axis(), angle).to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&Vector3::new(length, thickness, 1.0));
        self.submit_primitive(DrawableKind::Mesh, Primitives2D::SQUARE, local);
    }

    pub fn line_strip(&self, points: &[Vector2<f32>], thickness: f32) {
        for pair in points.windows(2) {
            self.line(pair[0], pair[1], thickness);
        }
    }

    /// Draws the x (red) and y (green) basis vectors from the origin, scaled to `size`.
    pub fn axes(&self, size: f32) {
        let thickness = size * 0.05;
        for (tip, color) in [(Vector2::new(size, 0.0), Color::RED), (Vector2::new(0.0, size), Color::GREEN)] {
            self.push();
            self.set_color(color);
            self.line(Vector2::zeros(), tip, thickness);
            let _ = self.pop();
        }
    }

    pub fn rotate(&self, radians: f32) {
        self.rotate_z(radians);
    }
}

fn fan_mesh(points: &[Vector2<f32>]) -> Mesh {
    let mut vertices = Vec::with_capacity(points.len());
    for p in points {
        vertices.push(Vector3::new(p.x, p.y, 0.0));
    }
    let n = points.len() as u32;
    let mut indices = Vec::with_capacity(points.len().saturating_sub(2) * 3);
    for i in 1..n.saturating_sub(1) {
        indices.extend_from_slice(&[0, i, i + 1]);
    }
    Mesh::from_indices(vertices, indices)
}

// 3D-only drawables: the `Dim3` catalog has no square/n-gon entries (its "circle" entry is a flat
// disc, shared with 2D via `circle()`).
impl RenderContext<Dim3> {
    pub fn cube(&self) {
        self.submit_primitive(DrawableKind::Mesh, Primitives3D::CUBE, Matrix4::identity());
    }

    pub fn sphere(&self, resolution: usize) {
        self.submit_primitive(DrawableKind::Mesh, Primitives3D::sphere(resolution), Matrix4::identity());
    }

    pub fn cylinder(&self, resolution: usize) {
        self.submit_primitive(DrawableKind::Mesh, Primitives3D::cylinder(resolution), Matrix4::identity());
    }

    pub fn circle(&self) {
        self.submit_primitive(DrawableKind::Circle, Primitives3D::CIRCLE, Matrix4::identity());
    }

    /// A cylindrical body plus two spherical caps (spec §4.G "`capsule` draws a cylinder plus
    /// two spheres").
    pub fn capsule(&self, length: f32, radius: f32, resolution: usize) {
        let body_length = (length - 2.0 * radius).max(0.0);
        self.submit_primitive(
            DrawableKind::Mesh,
            Primitives3D::cylinder(resolution),
            Matrix4::new_nonuniform_scaling(&Vector3::new(radius * 2.0, radius * 2.0, body_length)),
        );
        for sign in [-1.0f32, 1.0] {
            let cap = Matrix4::new_translation(&Vector3::new(0.0, 0.0, sign * body_length / 2.0)) * Matrix4::new_scaling(radius);
            self.submit_primitive(DrawableKind::Mesh, Primitives3D::sphere(resolution), cap);
        }
    }

    /// A box with its corners and edges rounded off (spec §4.G "`rounded_cube` compose a central
    /// box with corner and edge arcs"): three overlapping boxes forming a plus-shaped cross,
    /// eight corner spheres, and twelve edge cylinders. As with [`RenderContext::<Dim2>::stadium`],
    /// drawing full spheres/cylinders rather than the exact octant/quarter arcs is harmless
    /// overdraw for an opaque fill.
    pub fn rounded_cube(&self, size: Vector3<f32>, radius: f32, resolution: usize) {
        let (w, h, d) = (size.x, size.y, size.z);
        let half = Vector3::new(w / 2.0 - radius, h / 2.0 - radius, d / 2.0 - radius);

        self.submit_primitive(
            DrawableKind::Mesh,
            Primitives3D::CUBE,
            Matrix4::new_nonuniform_scaling(&Vector3::new(w, 2.0 * half.y, 2.0 * half.z)),
        );
        self.submit_primitive(
            DrawableKind::Mesh,
            Primitives3D::CUBE,
            Matrix4::new_nonuniform_scaling(&Vector3::new(2.0 * half.x, h, 2.0 * half.z)),
        );
        self.submit_primitive(
            DrawableKind::Mesh,
            Primitives3D::CUBE,
            Matrix4::new_nonuniform_scaling(&Vector3::new(2.0 * half.x, 2.0 * half.y, d)),
        );

        for sx in [-1.0f32, 1.0] {
            for sy in [-1.0f32, 1.0] {
                for sz in [-1.0f32, 1.0] {
                    let corner = Matrix4::new_translation(&Vector3::new(sx * half.x, sy * half.y, sz * half.z)) * Matrix4::new_scaling(radius);
                    self.submit_primitive(DrawableKind::Mesh, Primitives3D::sphere(resolution), corner);
                }
            }
        }

        let edge_scale = |axis_len: f32| Matrix4::new_nonuniform_scaling(&Vector3::new(radius * 2.0, radius * 2.0, axis_len));
        let rotate_to_x = Rotation3::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2).to_homogeneous();
        let rotate_to_y = Rotation3::from_axis_angle(&Vector3::x_axis(), -FRAC_PI_2).to_homogeneous();

        for sx in [-1.0f32, 1.0] {
            for sy in [-1.0f32, 1.0] {
                let m = Matrix4::new_translation(&Vector3::new(sx * half.x, sy * half.y, 0.0)) * edge_scale(2.0 * half.z);
                self.submit_primitive(DrawableKind::Mesh, Primitives3D::cylinder(resolution), m);
            }
        }
        for sy in [-1.0f32, 1.0] {
            for sz in [-1.0f32, 1.0] {
                let m = Matrix4::new_translation(&Vector3::new(0.0, sy * half.y, sz * half.z)) * rotate_to_x * edge_scale(2.0 * half.x);
                self.submit_primitive(DrawableKind::Mesh, Primitives3D::cylinder(resolution), m);
            }
        }
        for sx in [-1.0f32, 1.0] {
            for sz in [-1.0f32, 1.0] {
                let m = Matrix4::new_translation(&Vector3::new(sx * half.x, 0.0, sz * half.z)) * rotate_to_y * edge_scale(2.0 * half.y);
                self.submit_primitive(DrawableKind::Mesh, Primitives3D::cylinder(resolution), m);
            }
        }
    }

    /// In 3D there is no separate 2D point-list `polygon` concept (spec §4.G); an arbitrary
    /// mesh is the one way to submit custom geometry, so this is an alias for [`Self::mesh`].
    pub fn polygon(&self, mesh: &Mesh) {
        self.mesh(mesh);
    }

    /// Rotates a unit cylinder (assumed to run along local `+z`, matching [`Self::rounded_cube`]'s
    /// z-edge cylinders) to align with `b - a`, scaled to `length × thickness` (spec §4.G).
    pub fn line(&self, a: Vector3<f32>, b: Vector3<f32>, thickness: f32) {
        let delta = b - a;
        let length = delta.norm();
        if length < f32::EPSILON {
            return;
        }
        let mid = (a + b) * 0.5;
        let direction = delta / length;
        let rotation = Rotation3::rotation_between(&Vector3::z(), &direction).unwrap_or_else(Rotation3::identity);
        let local = Matrix4::new_translation(&mid)
            * rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&Vector3::new(thickness, thickness, length));
        self.submit_primitive(DrawableKind::Mesh, Primitives3D::cylinder(LINE_CYLINDER_RESOLUTION), local);
    }

    pub fn line_strip(&self, points: &[Vector3<f32>], thickness: f32) {
        for pair in points.windows(2) {
            self.line(pair[0], pair[1], thickness);
        }
    }

    /// Draws the x (red), y (green) and z (blue) basis vectors from the origin, scaled to `size`.
    pub fn axes(&self, size: f32) {
        let thickness = size * 0.05;
        let tips = [
            (Vector3::new(size, 0.0, 0.0), Color::RED),
            (Vector3::new(0.0, size, 0.0), Color::GREEN),
            (Vector3::new(0.0, 0.0, size), Color::BLUE),
        ];
        for (tip, color) in tips {
            self.push();
            self.set_color(color);
            self.line(Vector3::zeros(), tip, thickness);
            let _ = self.pop();
        }
    }

    pub fn rotate_x(&self, radians: f32) {
        self.transform(Rotation3::from_axis_angle(&Vector3::x_axis(), radians).to_homogeneous());
    }

    pub fn rotate_y(&self, radians: f32) {
        self.transform(Rotation3::from_axis_angle(&Vector3::y_axis(), radians).to_homogeneous());
    }

    fn transform_direction(transform: &Matrix4<f32>, v: Vector3<f32>) -> Vector3<f32> {
        let rotated = transform.fixed_view::<3, 3>(0, 0) * v;
        if rotated.norm_squared() > 1e-12 {
            rotated.normalize()
        } else {
            v
        }
    }

    fn transform_position(transform: &Matrix4<f32>, v: Vector3<f32>) -> Vector3<f32> {
        (transform * v.insert_row(3, 1.0)).xyz()
    }

    /// Appends a directional light, transforming its direction by the current state's transform
    /// first (spec.md line 134, spec §4.E item 6).
    pub fn add_directional_light(&self, light: DirectionalLight) {
        let state = self.current_state();
        let direction = Self::transform_direction(&state.transform, light.direction);
        self.renderer.lock().add_directional_light_typed(DirectionalLight { direction, ..light });
    }

    /// Appends a point light, transforming its position first (spec.md line 134).
    pub fn add_point_light(&self, light: PointLight) {
        let state = self.current_state();
        let position = Self::transform_position(&state.transform, light.position);
        self.renderer.lock().add_point_light_typed(PointLight { position, ..light });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_mask_fill_only() {
        assert_eq!(resolve_mode_mask(Flags::FILL, 0.0), PipelineModeMask::NO_STENCIL_WRITE_DO_FILL);
    }

    #[test]
    fn mode_mask_fill_and_outline() {
        let mask = resolve_mode_mask(Flags::FILL | Flags::OUTLINE, 2.0);
        assert!(mask.contains_mode(PipelineMode::DoStencilWriteDoFill));
        assert!(mask.contains_mode(PipelineMode::DoStencilTestNoFill));
        assert!(!mask.contains_mode(PipelineMode::NoStencilWriteDoFill));
    }

    #[test]
    fn mode_mask_outline_only() {
        let mask = resolve_mode_mask(Flags::OUTLINE, 2.0);
        assert!(mask.contains_mode(PipelineMode::DoStencilWriteNoFill));
        assert!(mask.contains_mode(PipelineMode::DoStencilTestNoFill));
    }

    #[test]
    fn mode_mask_outline_with_zero_width_degrades_to_nothing() {
        assert_eq!(resolve_mode_mask(Flags::OUTLINE, 0.0), PipelineModeMask::empty());
    }

    #[test]
    fn mode_mask_neither_is_empty() {
        assert_eq!(resolve_mode_mask(Flags::empty(), 1.0), PipelineModeMask::empty());
    }

    #[test]
    fn push_pop_balances() {
        let stacks = StateStacks::<Dim2>::new();
        {
            let mut s = stacks.stacks.lock();
            s[0].push(RenderState::default());
            assert_eq!(s[0].len(), 2);
            s[0].pop();
            assert_eq!(s[0].len(), 1);
        }
    }

    #[test]
    fn share_state_stack_seeds_new_thread_slots() {
        let stacks = StateStacks::<Dim2>::new();
        let mut seed = vec![RenderState::default()];
        seed.push(RenderState::default());
        let t1 = stacks.push_thread(seed.clone());
        let t2 = stacks.push_thread(seed);
        assert_ne!(t1, t2);
        let locked = stacks.stacks.lock();
        assert_eq!(locked[t1].len(), 2);
        assert_eq!(locked[t2].len(), 2);
    }

    #[test]
    fn depth_values_strictly_decrease() {
        let stacks = StateStacks::<Dim2>::new();
        let first = stacks.next_depth();
        let second = stacks.next_depth();
        assert!(second < first);
        assert!((first - second - DEPTH_EPSILON).abs() < 1e-9);
    }

    #[test]
    fn transform_composes_extrinsically() {
        // current = rotate 90 degrees about z; delta = translate along x. Pre- (extrinsic) and
        // post-multiplying (intrinsic) by a translation disagree once a prior rotation is in
        // play, unlike a pure scale/translate pair: extrinsic leaves the new translation
        // untouched by the existing rotation, intrinsic rotates it.
        let rotate = Rotation3::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2).to_homogeneous();
        let translate = Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0));
        let mut state = RenderState::<Dim2>::default();
        state.transform = rotate;

        state.apply_transform(translate);

        let translation = state.transform.column(3).xyz();
        assert!((translation - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn transform_axes_composes_intrinsically() {
        let rotate = Rotation3::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2).to_homogeneous();
        let translate = Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0));
        let mut state = RenderState::<Dim2>::default();
        state.axes = rotate;

        state.apply_transform_axes(translate);

        // intrinsic: new = current * delta, so the translation ends up rotated by 90 degrees.
        let translation = state.axes.column(3).xyz();
        assert!((translation - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn fan_mesh_triangulates_a_quad() {
        let points = vec![
            Vector2::new(-0.5, -0.5),
            Vector2::new(0.5, -0.5),
            Vector2::new(0.5, 0.5),
            Vector2::new(-0.5, 0.5),
        ];
        let mesh = fan_mesh(&points);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
    }
}
