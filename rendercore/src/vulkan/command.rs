//! Command pool/buffer wrappers. Allocation and pool lifetime are owned by
//! [`crate::frame::FrameScheduler`] (one pool per frame-in-flight slot, spec §4.F); this module
//! only wraps the raw handles and the recording calls the renderer and render context need.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use super::{
    resource::{Buffer, DescriptorSet, Image, Pipeline},
    DeviceShared,
};

pub(crate) struct CommandPool {
    pub(crate) raw: vk::CommandPool,
    device: Arc<DeviceShared>,
}

impl CommandPool {
    pub(crate) fn new(device: Arc<DeviceShared>, queue_family_index: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let raw = unsafe { device.raw.create_command_pool(&create_info, None)? };

        Ok(Self { raw, device })
    }

    pub(crate) fn allocate_command_buffer(&self) -> Result<CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let raw = unsafe { self.device.raw.allocate_command_buffers(&allocate_info)? }[0];

        Ok(CommandBuffer {
            raw,
            device: self.device.clone(),
        })
    }

    pub(crate) fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .raw
                .reset_command_pool(self.raw, vk::CommandPoolResetFlags::empty())?
        };
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_command_pool(self.raw, None) };
    }
}

/// A command buffer does not outlive the pool it came from; `FrameScheduler` resets pools
/// rather than freeing individual buffers, matching a per-frame transient-pool discipline.
#[derive(Clone)]
pub struct CommandBuffer {
    pub(crate) raw: vk::CommandBuffer,
    device: Arc<DeviceShared>,
}

impl CommandBuffer {
    pub fn begin(&self) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.raw.begin_command_buffer(self.raw, &begin_info)? };
        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        unsafe { self.device.raw.end_command_buffer(self.raw)? };
        Ok(())
    }

    pub fn begin_rendering(
        &self,
        color_attachments: &[vk::RenderingAttachmentInfo],
        depth_attachment: Option<&vk::RenderingAttachmentInfo>,
        render_area: vk::Rect2D,
    ) {
        let empty_depth_attachment = vk::RenderingAttachmentInfo::default();
        let rendering_info = vk::RenderingInfo::default()
            .flags(vk::RenderingFlags::empty())
            .color_attachments(color_attachments)
            .depth_attachment(depth_attachment.unwrap_or(&empty_depth_attachment))
            .render_area(render_area)
            .layer_count(1);
        unsafe { self.device.raw.cmd_begin_rendering(self.raw, &rendering_info) };
    }

    pub fn end_rendering(&self) {
        unsafe { self.device.raw.cmd_end_rendering(self.raw) };
    }

    pub fn pipeline_image_barrier(&self, image_memory_barriers: &[vk::ImageMemoryBarrier2]) {
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(image_memory_barriers);
        unsafe { self.device.raw.cmd_pipeline_barrier2(self.raw, &dependency_info) };
    }

    /// Encodes buffer-memory barriers (spec §4.C "acquire barriers and ... release barriers",
    /// spec §5 "a pipeline barrier with `VK_PIPELINE_STAGE_VERTEX_SHADER_BIT` ...").
    pub fn pipeline_buffer_barrier(&self, buffer_memory_barriers: &[vk::BufferMemoryBarrier2]) {
        let dependency_info =
            vk::DependencyInfo::default().buffer_memory_barriers(buffer_memory_barriers);
        unsafe { self.device.raw.cmd_pipeline_barrier2(self.raw, &dependency_info) };
    }

    pub fn set_viewport(&self, viewport: vk::Viewport) {
        unsafe { self.device.raw.cmd_set_viewport(self.raw, 0, &[viewport]) };
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        unsafe { self.device.raw.cmd_set_scissor(self.raw, 0, &[scissor]) };
    }

    pub fn bind_pipeline_graphics(&self, pipeline: &Pipeline) {
        unsafe {
            self.device
                .raw
                .cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::GRAPHICS, pipeline.raw)
        };
    }

    /// Pushes `data`'s raw bytes at `offset` for the stages `pipeline`'s layout declared them at
    /// (spec §6 "Pipeline layouts: ... push-constant range sized for the per-pass camera data").
    pub fn push_constants<T: Copy>(
        &self,
        pipeline: &Pipeline,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
        data: &T,
    ) {
        let bytes = unsafe {
            std::slice::from_raw_parts(
                (data as *const T) as *const u8,
                std::mem::size_of::<T>(),
            )
        };
        unsafe {
            self.device.raw.cmd_push_constants(
                self.raw,
                pipeline.raw_layout,
                stage_flags,
                offset,
                bytes,
            )
        };
    }

    pub fn bind_descriptor_sets_graphics(
        &self,
        first_set: u32,
        descriptor_sets: &[&DescriptorSet],
        pipeline: &Pipeline,
    ) {
        let raws = descriptor_sets.iter().map(|set| set.raw).collect::<Vec<_>>();
        unsafe {
            self.device.raw.cmd_bind_descriptor_sets(
                self.raw,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.raw_layout,
                first_set,
                &raws,
                &[],
            )
        };
    }

    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[&Buffer], offsets: &[u64]) {
        let raws = buffers.iter().map(|buffer| buffer.raw).collect::<Vec<_>>();
        unsafe {
            self.device
                .raw
                .cmd_bind_vertex_buffers(self.raw, first_binding, &raws, offsets)
        };
    }

    pub fn bind_index_buffer(&self, buffer: &Buffer, offset: u64) {
        unsafe {
            self.device
                .raw
                .cmd_bind_index_buffer(self.raw, buffer.raw, offset, vk::IndexType::UINT32)
        };
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.raw.cmd_draw_indexed(
                self.raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    /// Non-indexed draw: used by the polygon batcher's vertex-pulling draws, where the vertex
    /// shader looks up both index and position manually from storage buffers using
    /// `gl_VertexIndex`/`gl_InstanceIndex` rather than a bound vertex/index buffer (spec §4.C
    /// "For polygon draws ... each instance also carries its own `PrimitiveDataLayout`-equivalent
    /// sub-range").
    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .raw
                .cmd_draw(self.raw, vertex_count, instance_count, first_vertex, first_instance)
        };
    }

    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .raw
                .cmd_copy_buffer(self.raw, src.raw, dst.raw, regions)
        };
    }

    /// Copies between raw image handles rather than [`Image`] wrappers: the frame scheduler's
    /// default post-processing pass (spec §4.F "by default a no-op fullscreen copy") copies into
    /// a swap chain image, which has no `Image` wrapper of its own.
    pub fn copy_image_raw(
        &self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        extent: vk::Extent3D,
    ) {
        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        let region = vk::ImageCopy::default()
            .src_subresource(subresource)
            .src_offset(vk::Offset3D::default())
            .dst_subresource(subresource)
            .dst_offset(vk::Offset3D::default())
            .extent(extent);
        unsafe {
            self.device
                .raw
                .cmd_copy_image(self.raw, src, src_layout, dst, dst_layout, &[region])
        };
    }

    pub fn copy_buffer_to_image(&self, buffer: &Buffer, image: &Image, buffer_offset: u64) {
        let region = vk::BufferImageCopy::default()
            .buffer_offset(buffer_offset)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(image.extent);

        unsafe {
            self.device.raw.cmd_copy_buffer_to_image(
                self.raw,
                buffer.raw,
                image.raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    pub fn clear_color_attachment(&self, color: [f32; 4], rect: vk::Rect2D) {
        let attachment = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
        };
        let clear_rect = vk::ClearRect {
            rect,
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.device
                .raw
                .cmd_clear_attachments(self.raw, &[attachment], &[clear_rect])
        };
    }

    /// 3D cameras also clear depth+stencil per camera (spec §4.E "for 3D also depth+stencil").
    pub fn clear_depth_stencil_attachment(&self, depth: f32, stencil: u32, rect: vk::Rect2D) {
        let attachment = vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        };
        let clear_rect = vk::ClearRect {
            rect,
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.device
                .raw
                .cmd_clear_attachments(self.raw, &[attachment], &[clear_rect])
        };
    }
}
