//! Window (spec §9 "Cyclic graph window↔renderer↔frame-scheduler"). The owner tree's leaf: holds
//! the per-window [`FrameScheduler`] and the [`Renderer`]/[`RenderContext`] pair behind it, and
//! drives one frame's spec §4.E operation sequence end to end. Destroying a `Window` tears down
//! in `RenderContext → Renderer → FrameScheduler → swap chain → surface` order (spec line 77) —
//! field declaration order here matches that, so the derived drop glue does it for free.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::camera::CameraInfo;
use crate::catalog::CatalogVertex;
use crate::context::RenderContext;
use crate::dim::Dimension;
use crate::engine::{Engine, EngineCatalog};
use crate::frame::{FrameScheduler, WaitMode};
use crate::instance::{InstancePacking, PolygonInstancePacking};
use crate::light::LightSupport;
use crate::renderer::Renderer;

/// One open window's render-side state, generic over [`Dimension`] like [`Renderer`]/
/// [`RenderContext`] (spec §9 "Multiple dimensions via type parameter"). A mixed 2D+3D window is
/// two `Window`s — one `Window<Dim2>`, one `Window<Dim3>` — sharing one OS window's surface is out
/// of scope here (DESIGN.md open question): nothing in spec §4.E's per-dimension `Renderer::render`
/// composes two dimensions' draws into a single swap chain image.
pub struct Window<D>
where
    D: Dimension + CatalogVertex + InstancePacking + PolygonInstancePacking + LightSupport + EngineCatalog,
{
    context: RenderContext<D>,
    scheduler: FrameScheduler,
    engine: Arc<Engine>,
}

impl<D> Window<D>
where
    D: Dimension + CatalogVertex + InstancePacking + PolygonInstancePacking + LightSupport + EngineCatalog,
{
    pub fn new(
        engine: &Arc<Engine>,
        window_handle: RawWindowHandle,
        display_handle: RawDisplayHandle,
        present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let scheduler = FrameScheduler::new(engine.device().clone(), window_handle, display_handle, present_mode)?;
        let renderer = Renderer::new(engine.device().clone(), D::catalog(engine));
        let context = RenderContext::new(renderer);

        Ok(Self { context, scheduler, engine: engine.clone() })
    }

    /// The context this window's render thread (and any threads it shares state to via
    /// `share_state_stack`/`share_current_state`/`share_state`) issues draw calls through.
    pub fn context(&self) -> &RenderContext<D> {
        &self.context
    }

    pub fn frame_extent(&self) -> vk::Extent2D {
        self.scheduler.frame_extent()
    }

    pub fn notify_resized(&mut self, extent: vk::Extent2D) {
        self.scheduler.notify_resized(extent);
    }

    /// Drives one full frame through spec §4.E's six operations plus the §4.F scheduler states
    /// around them, in the order spec §5's "Ordering guarantees" require: grow/copy-to-device
    /// before the barrier that gates the render pass, `flush()` only after the frame's draws are
    /// recorded. Returns `Ok(false)` without having drawn anything when `wait_mode` is
    /// [`WaitMode::Poll`] and the frame was skipped (fence not yet signalled, or a swap chain
    /// recreation was triggered instead).
    ///
    /// `n_threads` must equal whatever was last passed to `share_state_stack`/`share_current_state`/
    /// `share_state` on [`Self::context`] this frame, so `RenderContext::flush` can verify every
    /// thread slot returned to a balanced stack (spec §4.G `flush(n_threads)`).
    pub fn render_frame(
        &mut self,
        wait_mode: WaitMode,
        clear_on_load: bool,
        cameras: &[CameraInfo],
        n_threads: usize,
    ) -> Result<bool> {
        if self.scheduler.begin_frame(wait_mode)?.is_none() {
            return Ok(false);
        }
        let frame = self.scheduler.current_frame_index();

        let stage_mask = {
            let mut renderer = self.context.lock_renderer();
            renderer.grow_to_fit(frame)?;
            renderer.send_to_device(frame)?;

            let gfx_cmd = self.scheduler.graphics_command_buffer().clone();
            let xfer_cmd = self.scheduler.transfer_command_buffer().clone();
            renderer.record_copy_commands(frame, &gfx_cmd, &xfer_cmd)?
        };

        self.scheduler.begin_rendering(clear_on_load)?;
        {
            let renderer = self.context.lock_renderer();
            let gfx_cmd = self.scheduler.graphics_command_buffer().clone();
            let mut pipelines = self.engine.lock_pipelines();
            let catalog = D::catalog(&self.engine);
            renderer.render(frame, &gfx_cmd, &mut pipelines, catalog, cameras)?;
        }
        self.scheduler.end_rendering()?;

        self.scheduler.submit_graphics_queue(stage_mask)?;
        self.scheduler.present()?;
        self.scheduler.end_frame()?;

        self.context.lock_renderer().flush();
        self.context.flush(n_threads)?;

        Ok(true)
    }
}
