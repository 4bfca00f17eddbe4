//! Per-primitive-kind draw batcher (spec §4.C). One [`PerPrimitiveBatch`] exists per
//! `(primitive kind, pipeline mode)` pair; [`Batcher`] groups the three drawable kinds spec §4.C
//! names — static mesh, circle, polygon — each carrying its own set of four mode-keyed batches.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use gpu_allocator::MemoryLocation;

use crate::catalog::PrimitiveDataLayout;
use crate::pipeline::PipelineMode;
use crate::vulkan::{
    command::CommandBuffer,
    device::Device,
    resource::{
        Buffer, BufferDescriptor, DescriptorBindingBufferWrite, DescriptorBindingWrites,
        DescriptorSet, DescriptorSetDescriptor, DescriptorSetLayout, Pipeline,
    },
    vk,
};

/// First capacity a batch grows to once it sees its first draw (spec §4.C doesn't name an
/// initial value; chosen so the common "a few dozen instances" case needs no regrowth).
const INITIAL_CAPACITY: usize = 64;

/// `new_cap = 1 + size + size/2`, floored at [`INITIAL_CAPACITY`] (spec §4.C `grow_to_fit`).
/// Returns `None` when `current_capacity` already covers `size` — the no-op case invariant #9
/// requires (no allocation, no descriptor rewrite).
fn next_capacity(current_capacity: usize, size: usize) -> Option<usize> {
    if size <= current_capacity {
        return None;
    }
    Some((1 + size + size / 2).max(INITIAL_CAPACITY))
}

/// Acquire barrier always returned by [`PerPrimitiveBatch::record_copy_commands`]; the release
/// barrier is only `Some` under `TransferMode::SeparateQueueFamily`.
pub struct CopyBarriers {
    pub acquire: vk::BufferMemoryBarrier2<'static>,
    pub release: Option<vk::BufferMemoryBarrier2<'static>>,
}

struct FrameSlot {
    capacity: usize,
    device_local: Option<Buffer>,
    staging: Option<Buffer>,
    descriptor_set: Option<DescriptorSet>,
}

impl FrameSlot {
    fn empty() -> Self {
        Self {
            capacity: 0,
            device_local: None,
            staging: None,
            descriptor_set: None,
        }
    }
}

/// Host staging vector plus per-frame-in-flight device buffers for one `(primitive kind,
/// pipeline mode)` pair (spec §3 `PerPrimitiveBatch<D, Mode>`).
pub struct PerPrimitiveBatch<T: Copy + Send + Sync + 'static> {
    host_instances: Vec<T>,
    frames: Vec<FrameSlot>,
    descriptor_set_layout: Arc<DescriptorSetLayout>,
    binding_index: u32,
}

impl<T: Copy + Send + Sync + 'static> PerPrimitiveBatch<T> {
    pub fn new(frames_in_flight: u32, descriptor_set_layout: Arc<DescriptorSetLayout>) -> Self {
        Self {
            host_instances: Vec::new(),
            frames: (0..frames_in_flight).map(|_| FrameSlot::empty()).collect(),
            descriptor_set_layout,
            binding_index: 0,
        }
    }

    /// Like [`Self::new`] but for a batch whose descriptor set binds this buffer at a binding
    /// other than 0 (the polygon batcher's vertex/index storage buffers, spec §4.C).
    pub fn new_at_binding(
        frames_in_flight: u32,
        descriptor_set_layout: Arc<DescriptorSetLayout>,
        binding_index: u32,
    ) -> Self {
        let mut batch = Self::new(frames_in_flight, descriptor_set_layout);
        batch.binding_index = binding_index;
        batch
    }

    /// O(1) amortized (spec §4.C `draw`).
    pub fn draw(&mut self, instance: T) {
        self.host_instances.push(instance);
    }

    pub fn len(&self) -> usize {
        self.host_instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host_instances.is_empty()
    }

    /// Clears host-side data; invariant #1 (spec §8) restored at the caller's frame boundary.
    pub fn flush(&mut self) {
        self.host_instances.clear();
    }

    /// Destroys old buffers and allocates `new_cap = 1 + size + size/2` when
    /// `HostInstances.size > Staging[frame].capacity`; rewrites the descriptor set to point at
    /// the new device buffer (spec §4.C `grow_to_fit`). No-op (no allocation, no descriptor
    /// rewrite) when capacity already suffices — invariant #9.
    pub fn grow_to_fit(&mut self, frame: usize, device: &Arc<Device>) -> Result<bool> {
        let size = self.host_instances.len();
        let slot = &mut self.frames[frame];
        let Some(new_capacity) = next_capacity(slot.capacity, size) else {
            return Ok(false);
        };

        let byte_size = (new_capacity * std::mem::size_of::<T>()) as u64;

        let device_local = device.create_buffer(BufferDescriptor::new(
            byte_size,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryLocation::GpuOnly,
        ))?;
        let staging = device.create_buffer(BufferDescriptor::new(
            byte_size,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryLocation::CpuToGpu,
        ))?;

        let descriptor_set = match slot.descriptor_set.take() {
            Some(set) => set,
            None => device.create_descriptor_set(DescriptorSetDescriptor::new_generic(
                self.descriptor_set_layout.clone(),
            ))?,
        };
        device.update_descriptor_set(
            &descriptor_set,
            &DescriptorBindingWrites {
                buffers: vec![DescriptorBindingBufferWrite {
                    buffer: &device_local,
                    binding_index: self.binding_index,
                }],
            },
        )?;

        slot.device_local = Some(device_local);
        slot.staging = Some(staging);
        slot.descriptor_set = Some(descriptor_set);
        slot.capacity = new_capacity;

        Ok(true)
    }

    /// Writes `HostInstances` bytes into `Staging[frame]` and flushes the mapped range (spec
    /// §4.C `send_to_device`). May run on a worker thread; callers join before
    /// `record_copy_commands`.
    pub fn send_to_device(&self, frame: usize) -> Result<()> {
        if self.host_instances.is_empty() {
            return Ok(());
        }
        let slot = &self.frames[frame];
        let staging = slot
            .staging
            .as_ref()
            .ok_or_else(|| anyhow!("send_to_device called before grow_to_fit allocated a staging buffer"))?;
        staging.write_data(&self.host_instances)
    }

    /// Encodes a `copy_buffer` of exactly `HostInstances.size * sizeof(T)` bytes from
    /// `Staging[frame]` to `DeviceLocal[frame]`, and returns the acquire/release barriers the
    /// caller (the `Renderer`) applies to the appropriate command buffers (spec §4.C
    /// `record_copy_commands`).
    pub fn record_copy_commands(
        &self,
        frame: usize,
        xfer_cmd: &CommandBuffer,
        graphics_family: u32,
        transfer_family: u32,
    ) -> Result<Option<CopyBarriers>> {
        if self.host_instances.is_empty() {
            return Ok(None);
        }
        let slot = &self.frames[frame];
        let staging = slot
            .staging
            .as_ref()
            .ok_or_else(|| anyhow!("record_copy_commands called before grow_to_fit"))?;
        let device_local = slot
            .device_local
            .as_ref()
            .ok_or_else(|| anyhow!("record_copy_commands called before grow_to_fit"))?;

        let byte_size = (self.host_instances.len() * std::mem::size_of::<T>()) as u64;
        let region = vk::BufferCopy::default().src_offset(0).dst_offset(0).size(byte_size);
        xfer_cmd.copy_buffer(staging, device_local, &[region]);

        let separate_families = graphics_family != transfer_family;

        let acquire = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::VERTEX_SHADER)
            .dst_access_mask(vk::AccessFlags2::SHADER_READ)
            .src_queue_family_index(if separate_families {
                transfer_family
            } else {
                vk::QUEUE_FAMILY_IGNORED
            })
            .dst_queue_family_index(if separate_families {
                graphics_family
            } else {
                vk::QUEUE_FAMILY_IGNORED
            })
            .buffer(device_local.raw)
            .offset(0)
            .size(byte_size);

        let release = separate_families.then(|| {
            vk::BufferMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::VERTEX_SHADER)
                .dst_access_mask(vk::AccessFlags2::empty())
                .src_queue_family_index(transfer_family)
                .dst_queue_family_index(graphics_family)
                .buffer(device_local.raw)
                .offset(0)
                .size(byte_size)
        });

        Ok(Some(CopyBarriers { acquire, release }))
    }

    /// Binds the descriptor set and issues one indexed draw covering every instance appended
    /// since the last flush, returning the updated `first_instance` accumulator (spec §4.C
    /// `render`). Vertex/index buffers are bound once per pass by the caller.
    pub fn record_draw(
        &self,
        frame: usize,
        gfx_cmd: &CommandBuffer,
        pipeline: &Pipeline,
        layout: PrimitiveDataLayout,
        first_instance: u32,
    ) -> Result<u32> {
        if self.host_instances.is_empty() {
            return Ok(first_instance);
        }
        let slot = &self.frames[frame];
        let descriptor_set = slot
            .descriptor_set
            .as_ref()
            .ok_or_else(|| anyhow!("record_draw called before grow_to_fit allocated a descriptor set"))?;

        gfx_cmd.bind_descriptor_sets_graphics(0, &[descriptor_set], pipeline);
        gfx_cmd.draw_indexed(
            layout.indices_count,
            self.host_instances.len() as u32,
            layout.indices_start,
            layout.vertices_start as i32,
            first_instance,
        );

        Ok(first_instance + self.host_instances.len() as u32)
    }
}

/// Groups the four pipeline-mode-keyed batches for one primitive drawable kind (spec §4.C "for
/// one (primitive kind, pipeline mode) pair"). `Fill` carries the three modes that draw
/// unscaled, non-outline-colored geometry; `Outline` carries the stencil-test pass that draws
/// outline-scaled, `OutlineColor`-packed geometry.
pub struct ModeBatches<Fill: Copy + Send + Sync + 'static, Outline: Copy + Send + Sync + 'static> {
    pub no_stencil_write_do_fill: PerPrimitiveBatch<Fill>,
    pub do_stencil_write_do_fill: PerPrimitiveBatch<Fill>,
    pub do_stencil_write_no_fill: PerPrimitiveBatch<Fill>,
    pub do_stencil_test_no_fill: PerPrimitiveBatch<Outline>,
}

impl<Fill: Copy + Send + Sync + 'static, Outline: Copy + Send + Sync + 'static>
    ModeBatches<Fill, Outline>
{
    pub fn new(frames_in_flight: u32, layout: Arc<DescriptorSetLayout>) -> Self {
        Self {
            no_stencil_write_do_fill: PerPrimitiveBatch::new(frames_in_flight, layout.clone()),
            do_stencil_write_do_fill: PerPrimitiveBatch::new(frames_in_flight, layout.clone()),
            do_stencil_write_no_fill: PerPrimitiveBatch::new(frames_in_flight, layout.clone()),
            do_stencil_test_no_fill: PerPrimitiveBatch::new(frames_in_flight, layout),
        }
    }

    pub fn fill_batch(&mut self, mode: PipelineMode) -> Option<&mut PerPrimitiveBatch<Fill>> {
        match mode {
            PipelineMode::NoStencilWriteDoFill => Some(&mut self.no_stencil_write_do_fill),
            PipelineMode::DoStencilWriteDoFill => Some(&mut self.do_stencil_write_do_fill),
            PipelineMode::DoStencilWriteNoFill => Some(&mut self.do_stencil_write_no_fill),
            PipelineMode::DoStencilTestNoFill => None,
        }
    }

    pub fn outline_batch(&mut self, mode: PipelineMode) -> Option<&mut PerPrimitiveBatch<Outline>> {
        match mode {
            PipelineMode::DoStencilTestNoFill => Some(&mut self.do_stencil_test_no_fill),
            _ => None,
        }
    }

    pub fn flush(&mut self) {
        self.no_stencil_write_do_fill.flush();
        self.do_stencil_write_do_fill.flush();
        self.do_stencil_write_no_fill.flush();
        self.do_stencil_test_no_fill.flush();
    }

    pub fn grow_to_fit(&mut self, frame: usize, device: &Arc<Device>) -> Result<bool> {
        let mut grew = false;
        grew |= self.no_stencil_write_do_fill.grow_to_fit(frame, device)?;
        grew |= self.do_stencil_write_do_fill.grow_to_fit(frame, device)?;
        grew |= self.do_stencil_write_no_fill.grow_to_fit(frame, device)?;
        grew |= self.do_stencil_test_no_fill.grow_to_fit(frame, device)?;
        Ok(grew)
    }

    pub fn for_each_non_empty_fill(&self, mut f: impl FnMut(&PerPrimitiveBatch<Fill>)) {
        for batch in [
            &self.no_stencil_write_do_fill,
            &self.do_stencil_write_do_fill,
            &self.do_stencil_write_no_fill,
        ] {
            if !batch.is_empty() {
                f(batch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_capacity_grows_by_one_and_a_half_past_current() {
        assert_eq!(next_capacity(0, 4096), Some(6145));
        assert_eq!(next_capacity(6145, 6200), Some(9301));
    }

    #[test]
    fn next_capacity_floors_at_initial_capacity() {
        assert_eq!(next_capacity(0, 1), Some(INITIAL_CAPACITY));
    }

    #[test]
    fn next_capacity_is_noop_when_current_already_suffices() {
        assert_eq!(next_capacity(100, 100), None);
        assert_eq!(next_capacity(100, 50), None);
    }
}
