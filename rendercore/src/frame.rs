//! Frame scheduler (spec §4.F). Owns the swap chain, per-frame-in-flight sync/command state, and
//! the state machine `Idle -> Recording -> Rendering -> Submitted -> Presented -> Idle`.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::vulkan::{
    command::{CommandBuffer, CommandPool},
    device::{Device, TransferMode},
    swapchain::{AcquireOutcome, PresentOutcome, Surface, SwapChain},
    sync::{FrameSyncSet, ImageSyncSet},
};

/// Whether `begin_frame` blocks on the next frame-in-flight fence or polls and bails out
/// (spec §4.F "two wait disciplines"). `Poll`'s zero-timeout semantics mirror `onyx`'s non-blocking
/// frame pump for applications that must not stall their main loop on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Block,
    Poll,
}

/// The scheduler's current point in its state machine; used only for debug assertions guarding
/// against out-of-order calls (spec §4.F invariant: `begin_frame`, `begin_rendering`,
/// `end_rendering`, `end_frame` must alternate in that order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Idle,
    Recording,
    Rendering,
    Submitted,
}

/// A pluggable post-processing pass sampling the per-image intermediate color attachment and
/// compositing into the swap chain image about to be presented (spec §4.F "pluggable post
/// processing"). Implementors record directly into `gfx_cmd`; the scheduler has already
/// transitioned both images to the layouts documented below before calling `apply`.
pub trait PostProcessingPass: Send + Sync {
    /// `intermediate` is `TRANSFER_SRC_OPTIMAL` (or whatever layout the implementation requested
    /// via a prior barrier it recorded itself); `swapchain_image` is `TRANSFER_DST_OPTIMAL`.
    fn apply(
        &self,
        gfx_cmd: &CommandBuffer,
        intermediate: vk::Image,
        swapchain_image: vk::Image,
        extent: vk::Extent2D,
    );

    /// Called after the swap chain (and with it every per-image intermediate color image) has been
    /// recreated, one view per swap chain image in index order. A pass that samples the
    /// intermediate image through a descriptor set rather than `NaivePostProcessing`'s raw copy
    /// must rebuild that set here against the new views (SPEC_FULL.md §3 "descriptor set
    /// rebinding on intermediate-image recreation"). Default no-op: the built-in pass has no
    /// descriptor set to rebind.
    fn on_swapchain_recreated(&mut self, _intermediate_views: &[vk::ImageView]) {}
}

/// Default post-processing pass: an unconditional fullscreen copy from the intermediate color
/// image to the swap chain image (spec §4.F "by default, a no-op fullscreen copy").
pub struct NaivePostProcessing;

impl PostProcessingPass for NaivePostProcessing {
    fn apply(
        &self,
        gfx_cmd: &CommandBuffer,
        intermediate: vk::Image,
        swapchain_image: vk::Image,
        extent: vk::Extent2D,
    ) {
        gfx_cmd.copy_image_raw(
            intermediate,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        );
    }
}

/// Per-frame-in-flight recording state: one graphics command pool/buffer pair always, plus a
/// transfer-side pair only under `TransferMode::SeparateQueueFamily` (spec §4.F "three transfer
/// modes" simplified per `Device::create_logical_device`'s actual reachable set to a binary
/// split: separate queue family, or not).
struct FrameResources {
    sync: FrameSyncSet,
    graphics_pool: CommandPool,
    graphics_cmd: CommandBuffer,
    transfer_pool: Option<CommandPool>,
    transfer_cmd: Option<CommandBuffer>,
}

/// Owns component F (spec §4.F): the swap chain, the surface it was built from, per-frame and
/// per-image synchronization, and the pluggable post-processing pass. `Renderer`/`RenderContext`
/// are handed the command buffers this produces; they don't own any Vulkan submission state
/// themselves.
pub struct FrameScheduler {
    device: Arc<Device>,
    surface: Surface,
    swapchain: SwapChain,
    frames: Vec<FrameResources>,
    image_syncs: Vec<ImageSyncSet>,
    current_frame: usize,
    state: FrameState,
    post_processing: Box<dyn PostProcessingPass>,
    acquired_image_index: Option<u32>,
    pending_resize: Option<vk::Extent2D>,
    present_mode: vk::PresentModeKHR,
}

impl FrameScheduler {
    pub fn new(
        device: Arc<Device>,
        window_handle: RawWindowHandle,
        display_handle: RawDisplayHandle,
        present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let surface = Surface::new(device.entry(), device.instance(), display_handle, window_handle)
            .context("creating window surface")?;

        let swapchain = SwapChain::new(
            device_shared(&device),
            device.instance(),
            &surface,
            device.physical_device_raw(),
            present_mode,
            None,
        )
        .context("creating swap chain")?;

        let frames_in_flight = device.frames_in_flight() as usize;
        let separate_transfer = device.transfer_mode() == TransferMode::SeparateQueueFamily;

        let mut frames = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            let graphics_pool = CommandPool::new(device_shared(&device), device.graphics_queue_family())?;
            let graphics_cmd = graphics_pool.allocate_command_buffer()?;

            let (transfer_pool, transfer_cmd) = if separate_transfer {
                let pool = CommandPool::new(device_shared(&device), device.transfer_queue_family())?;
                let cmd = pool.allocate_command_buffer()?;
                (Some(pool), Some(cmd))
            } else {
                (None, None)
            };

            frames.push(FrameResources {
                sync: FrameSyncSet::new(device_shared(&device))?,
                graphics_pool,
                graphics_cmd,
                transfer_pool,
                transfer_cmd,
            });
        }

        let image_syncs = (0..swapchain.images.len())
            .map(|_| ImageSyncSet::new(device_shared(&device)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device,
            surface,
            swapchain,
            frames,
            image_syncs,
            current_frame: 0,
            state: FrameState::Idle,
            post_processing: Box::new(NaivePostProcessing),
            acquired_image_index: None,
            pending_resize: None,
            present_mode,
        })
    }

    pub fn set_post_processing(&mut self, pass: Box<dyn PostProcessingPass>) {
        self.post_processing = pass;
    }

    pub fn remove_post_processing(&mut self) {
        self.post_processing = Box::new(NaivePostProcessing);
    }

    pub fn current_frame_index(&self) -> usize {
        self.current_frame
    }

    pub fn frame_extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Call when the windowing layer reports a framebuffer resize (spec §4.F "recreate on resize
    /// or suboptimal/out-of-date"); deferred until the next `begin_frame` so an in-flight frame
    /// is never invalidated mid-recording.
    pub fn notify_resized(&mut self, extent: vk::Extent2D) {
        self.pending_resize = Some(extent);
    }

    /// `Idle -> Recording`. Waits (or polls) the frame-in-flight fence, acquires the next swap
    /// chain image, and begins recording into that frame's graphics (and, if separate, transfer)
    /// command buffer.
    pub fn begin_frame(&mut self, wait_mode: WaitMode) -> Result<Option<u32>> {
        debug_assert_eq!(self.state, FrameState::Idle, "begin_frame called out of order");

        if self.pending_resize.take().is_some() {
            self.recreate_swapchain()?;
        }

        let image_available = self.frames[self.current_frame].sync.image_available.raw;
        match wait_mode {
            WaitMode::Block => self.frames[self.current_frame].sync.in_flight.wait()?,
            WaitMode::Poll => {
                if !self.frames[self.current_frame].sync.in_flight.wait_timeout(0)? {
                    return Ok(None);
                }
            }
        }

        let acquire = self.swapchain.acquire_next_image(image_available, u64::MAX)?;

        let image_index = match acquire {
            AcquireOutcome::Acquired { image_index, suboptimal } => {
                if suboptimal {
                    self.pending_resize = Some(self.swapchain.extent);
                }
                image_index
            }
            AcquireOutcome::NotReady => return Ok(None),
            AcquireOutcome::OutOfDate => {
                self.recreate_swapchain()?;
                return Ok(None);
            }
            AcquireOutcome::SurfaceLost => bail!("surface lost during image acquisition"),
        };

        let frame = &self.frames[self.current_frame];
        frame.sync.in_flight.reset()?;

        frame.graphics_pool.reset()?;
        frame.graphics_cmd.begin()?;
        if let Some(transfer_cmd) = &frame.transfer_cmd {
            frame.transfer_pool.as_ref().unwrap().reset()?;
            transfer_cmd.begin()?;
        }

        self.acquired_image_index = Some(image_index);
        self.state = FrameState::Recording;
        Ok(Some(image_index))
    }

    pub fn graphics_command_buffer(&self) -> &CommandBuffer {
        &self.frames[self.current_frame].graphics_cmd
    }

    /// The transfer-side command buffer under `TransferMode::SeparateQueueFamily`; otherwise the
    /// same graphics buffer is used for copy commands too (spec §4.F "same queue/index: the copy
    /// commands are simply recorded on the graphics command buffer").
    pub fn transfer_command_buffer(&self) -> &CommandBuffer {
        let frame = &self.frames[self.current_frame];
        frame.transfer_cmd.as_ref().unwrap_or(&frame.graphics_cmd)
    }

    /// Begins dynamic rendering into the acquired image's color+depth-stencil attachments, plus
    /// its own off-screen intermediate color attachment used for post-processing (spec §4.F
    /// "render into an intermediate image, then post-process into the swap chain image").
    pub fn begin_rendering(&mut self, clear_on_load: bool) -> Result<()> {
        debug_assert_eq!(self.state, FrameState::Recording, "begin_rendering called out of order");

        let image_index = self
            .acquired_image_index
            .ok_or_else(|| anyhow!("begin_rendering called before a successful begin_frame"))?;
        let gfx_cmd = self.graphics_command_buffer().clone();
        let swapchain_image = &self.swapchain.images[image_index as usize];

        let load_op = if clear_on_load {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        };

        gfx_cmd.pipeline_image_barrier(&[vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .image(swapchain_image.intermediate.raw)
            .subresource_range(color_subresource_range())]);

        if self.device.frames_in_flight() > 0 {
            // Depth/stencil transition is only meaningful when a 3D render context draws this
            // frame; cost is negligible and keeping a single unconditional barrier here avoids
            // threading a `is_3d` flag through the scheduler, which otherwise knows nothing about
            // dimensionality (spec §9 keeps F dimension-agnostic).
            gfx_cmd.pipeline_image_barrier(&[vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS)
                .dst_access_mask(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .image(swapchain_image.depth_stencil.raw)
                .subresource_range(depth_stencil_subresource_range())]);
        }

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(swapchain_image.intermediate.raw_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] },
            });

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(swapchain_image.depth_stencil.raw_view)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });

        gfx_cmd.begin_rendering(
            &[color_attachment],
            Some(&depth_attachment),
            vk::Rect2D { offset: vk::Offset2D::default(), extent: self.swapchain.extent },
        );

        self.state = FrameState::Rendering;
        Ok(())
    }

    pub fn end_rendering(&mut self) -> Result<()> {
        debug_assert_eq!(self.state, FrameState::Rendering, "end_rendering called out of order");

        let image_index = self.acquired_image_index.ok_or_else(|| anyhow!("no image acquired"))?;
        let gfx_cmd = self.graphics_command_buffer().clone();
        gfx_cmd.end_rendering();

        let swapchain_image = &self.swapchain.images[image_index as usize];

        gfx_cmd.pipeline_image_barrier(&[
            vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
                .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .image(swapchain_image.intermediate.raw)
                .subresource_range(color_subresource_range()),
            vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .image(swapchain_image.raw)
                .subresource_range(color_subresource_range()),
        ]);

        self.post_processing.apply(&gfx_cmd, swapchain_image.intermediate.raw, swapchain_image.raw, self.swapchain.extent);

        gfx_cmd.pipeline_image_barrier(&[vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .image(swapchain_image.raw)
            .subresource_range(color_subresource_range())]);

        self.state = FrameState::Recording;
        Ok(())
    }

    /// `Recording -> Submitted`. Ends command buffer recording and submits to the graphics (and,
    /// if separate, transfer) queue (spec §4.F "submit_graphics_queue").
    pub fn submit_graphics_queue(&mut self, wait_stage_mask: vk::PipelineStageFlags) -> Result<()> {
        debug_assert_eq!(self.state, FrameState::Recording, "submit_graphics_queue called out of order");

        let image_index = self.acquired_image_index.ok_or_else(|| anyhow!("no image acquired"))?;

        if let Some(prev_frame) = self.image_syncs[image_index as usize].in_flight_frame {
            self.frames[prev_frame].sync.in_flight.wait()?;
        }
        self.image_syncs[image_index as usize].in_flight_frame = Some(self.current_frame);

        let frame = &self.frames[self.current_frame];

        if let Some(transfer_cmd) = &frame.transfer_cmd {
            transfer_cmd.end()?;
            let transfer_buffers = [transfer_cmd.raw];
            let transfer_signal = [frame.sync.transfer_copy_done.raw];
            let transfer_submit = vk::SubmitInfo::default()
                .command_buffers(&transfer_buffers)
                .signal_semaphores(&transfer_signal);
            unsafe {
                self.device
                    .raw()
                    .queue_submit(self.device.transfer_queue, &[transfer_submit], vk::Fence::null())?
            };
        }

        frame.graphics_cmd.end()?;

        let wait_semaphores: Vec<vk::Semaphore> = if frame.transfer_cmd.is_some() {
            vec![frame.sync.image_available.raw, frame.sync.transfer_copy_done.raw]
        } else {
            vec![frame.sync.image_available.raw]
        };
        let wait_stages: Vec<vk::PipelineStageFlags> = if frame.transfer_cmd.is_some() {
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT, wait_stage_mask]
        } else {
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | wait_stage_mask]
        };

        let command_buffers = [frame.graphics_cmd.raw];
        let signal_semaphores = [self.image_syncs[image_index as usize].render_finished.raw];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .raw()
                .queue_submit(self.device.graphics_queue, &[submit_info], frame.sync.in_flight.raw)?
        };

        self.state = FrameState::Submitted;
        Ok(())
    }

    /// `Submitted -> Presented`. Presents the acquired image, requesting a swap chain recreation
    /// on `OutOfDate`/`SurfaceLost`/suboptimal (spec §4.F "present").
    pub fn present(&mut self) -> Result<()> {
        debug_assert_eq!(self.state, FrameState::Submitted, "present called out of order");

        let image_index = self.acquired_image_index.ok_or_else(|| anyhow!("no image acquired"))?;
        let wait_semaphore = self.image_syncs[image_index as usize].render_finished.raw;

        let outcome = self
            .swapchain
            .queue_present(self.device.graphics_queue, image_index, &[wait_semaphore])?;

        match outcome {
            PresentOutcome::Presented { suboptimal } => {
                if suboptimal {
                    self.pending_resize = Some(self.swapchain.extent);
                }
            }
            PresentOutcome::OutOfDate => self.pending_resize = Some(self.swapchain.extent),
            PresentOutcome::SurfaceLost => bail!("surface lost during present"),
        }

        Ok(())
    }

    /// `Submitted/Presented -> Idle`. Advances to the next frame-in-flight slot and runs the
    /// device's deferred-destruction queue (spec §4.F "end_frame also drains pending GPU resource
    /// destructions").
    pub fn end_frame(&mut self) -> Result<()> {
        self.acquired_image_index = None;
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        self.state = FrameState::Idle;
        self.device.process_deletion_queue()?;
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.device.wait_idle()?;

        let new_swapchain = SwapChain::new(
            device_shared(&self.device),
            self.device.instance(),
            &self.surface,
            self.device.physical_device_raw(),
            self.present_mode,
            Some(self.swapchain.raw()),
        )
        .context("recreating swap chain")?;

        self.swapchain = new_swapchain;
        self.image_syncs = (0..self.swapchain.images.len())
            .map(|_| ImageSyncSet::new(device_shared(&self.device)))
            .collect::<Result<Vec<_>>>()?;

        let intermediate_views: Vec<vk::ImageView> =
            self.swapchain.images.iter().map(|image| image.intermediate.raw_view).collect();
        self.post_processing.on_swapchain_recreated(&intermediate_views);

        Ok(())
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

fn depth_stencil_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Internal helper for the `DeviceShared` handle sync/swapchain object construction needs;
/// `Device::shared` is `pub(crate)` so this is only reachable from within the crate.
fn device_shared(device: &Arc<Device>) -> Arc<crate::vulkan::DeviceShared> {
    device.shared.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_mode_poll_is_distinct_from_block() {
        assert_ne!(WaitMode::Poll, WaitMode::Block);
    }
}
