//! Polygon batcher (spec §4.C "Polygon variant only"). Unlike the mesh/circle batches in
//! [`crate::batch`], which draw from the fixed, read-only [`crate::catalog::PrimitiveCatalog`],
//! polygon draws supply their own geometry at call time. That geometry is appended to one shared
//! host pool per dimension; each polygon instance carries its own sub-range into the pool
//! ([`crate::instance::PolygonInstancePacking`]) and the vertex shader pulls its vertex/index
//! data from the pool's storage buffers via `gl_InstanceIndex`/`gl_VertexIndex`
//! (`Device::polygon_storage_layout`) rather than a bound vertex/index buffer.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use gpu_allocator::MemoryLocation;

use crate::batch::CopyBarriers;
use crate::catalog::{CatalogVertex, PrimitiveDataLayout};
use crate::geometry::Mesh;
use crate::instance::PolygonLayout;
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

const INITIAL_INSTANCE_CAPACITY: usize = 16;
const INITIAL_GEOMETRY_CAPACITY: usize = 512;

/// Shared, append-only host geometry appended to by every polygon draw this frame regardless of
/// which pipeline mode ultimately consumes it.
struct GeometryPool<V: Copy + Send + Sync + 'static> {
    host_vertices: Vec<V>,
    host_indices: Vec<u32>,
}

impl<V: Copy + Send + Sync + 'static> GeometryPool<V> {
    fn new() -> Self {
        Self {
            host_vertices: Vec::new(),
            host_indices: Vec::new(),
        }
    }

    /// Appends one mesh's vertices/indices and returns the sub-range identifying them (spec §3
    /// `PrimitiveDataLayout`); indices are stored relative to the mesh's own vertex range, exactly
    /// as `vertex_offset` does for the fixed catalog.
    fn append(&mut self, vertices: &[V], indices: &[u32]) -> PrimitiveDataLayout {
        let vertices_start = self.host_vertices.len() as u32;
        let indices_start = self.host_indices.len() as u32;
        self.host_vertices.extend_from_slice(vertices);
        self.host_indices.extend_from_slice(indices);
        PrimitiveDataLayout {
            vertices_start,
            indices_start,
            indices_count: indices.len() as u32,
        }
    }

    fn flush(&mut self) {
        self.host_vertices.clear();
        self.host_indices.clear();
    }
}

struct PolygonFrameSlot {
    instance_capacity: usize,
    vertex_capacity: usize,
    index_capacity: usize,
    instance_device_local: Option<Buffer>,
    instance_staging: Option<Buffer>,
    vertex_device_local: Option<Buffer>,
    vertex_staging: Option<Buffer>,
    index_device_local: Option<Buffer>,
    index_staging: Option<Buffer>,
    descriptor_set: Option<DescriptorSet>,
}

impl PolygonFrameSlot {
    fn empty() -> Self {
        Self {
            instance_capacity: 0,
            vertex_capacity: 0,
            index_capacity: 0,
            instance_device_local: None,
            instance_staging: None,
            vertex_device_local: None,
            vertex_staging: None,
            index_device_local: None,
            index_staging: None,
            descriptor_set: None,
        }
    }
}

/// Host instances plus per-frame-in-flight buffers/descriptor set for one pipeline mode; the
/// vertex/index bindings point at the `PolygonBatch`'s shared [`GeometryPool`] buffers, written
/// whenever *either* this mode's instance array or the shared pool grows.
struct PolygonModeBatch<T: Copy + Send + Sync + crate::instance::PolygonLayout + 'static> {
    host_instances: Vec<T>,
    frames: Vec<PolygonFrameSlot>,
}

impl<T: Copy + Send + Sync + crate::instance::PolygonLayout + 'static> PolygonModeBatch<T> {
    fn new(frames_in_flight: u32) -> Self {
        Self {
            host_instances: Vec::new(),
            frames: (0..frames_in_flight).map(|_| PolygonFrameSlot::empty()).collect(),
        }
    }

    fn flush(&mut self) {
        self.host_instances.clear();
    }

    fn is_empty(&self) -> bool {
        self.host_instances.is_empty()
    }

    fn grow_to_fit<V: Copy + Send + Sync + 'static>(
        &mut self,
        frame: usize,
        device: &Arc<Device>,
        pool: &GeometryPool<V>,
        descriptor_set_layout: &Arc<DescriptorSetLayout>,
    ) -> Result<bool> {
        let instance_size = self.host_instances.len();
        let vertex_size = pool.host_vertices.len();
        let index_size = pool.host_indices.len();
        let slot = &mut self.frames[frame];

        let needs_instance_grow = instance_size > slot.instance_capacity;
        let needs_vertex_grow = vertex_size > slot.vertex_capacity;
        let needs_index_grow = index_size > slot.index_capacity;
        if !needs_instance_grow && !needs_vertex_grow && !needs_index_grow {
            return Ok(false);
        }

        let make_buffer_pair = |byte_size: u64| -> Result<(Buffer, Buffer)> {
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
            Ok((device_local, staging))
        };

        if needs_instance_grow {
            let capacity = (1 + instance_size + instance_size / 2).max(INITIAL_INSTANCE_CAPACITY);
            let (device_local, staging) =
                make_buffer_pair((capacity * std::mem::size_of::<T>()) as u64)?;
            slot.instance_device_local = Some(device_local);
            slot.instance_staging = Some(staging);
            slot.instance_capacity = capacity;
        }
        if needs_vertex_grow {
            let capacity = (1 + vertex_size + vertex_size / 2).max(INITIAL_GEOMETRY_CAPACITY);
            let (device_local, staging) =
                make_buffer_pair((capacity * std::mem::size_of::<V>()) as u64)?;
            slot.vertex_device_local = Some(device_local);
            slot.vertex_staging = Some(staging);
            slot.vertex_capacity = capacity;
        }
        if needs_index_grow {
            let capacity = (1 + index_size + index_size / 2).max(INITIAL_GEOMETRY_CAPACITY);
            let (device_local, staging) =
                make_buffer_pair((capacity * std::mem::size_of::<u32>()) as u64)?;
            slot.index_device_local = Some(device_local);
            slot.index_staging = Some(staging);
            slot.index_capacity = capacity;
        }

        let descriptor_set = match slot.descriptor_set.take() {
            Some(set) => set,
            None => device.create_descriptor_set(DescriptorSetDescriptor::new_generic(
                descriptor_set_layout.clone(),
            ))?,
        };
        device.update_descriptor_set(
            &descriptor_set,
            &DescriptorBindingWrites {
                buffers: vec![
                    DescriptorBindingBufferWrite {
                        buffer: slot.instance_device_local.as_ref().unwrap(),
                        binding_index: 0,
                    },
                    DescriptorBindingBufferWrite {
                        buffer: slot.vertex_device_local.as_ref().unwrap(),
                        binding_index: 1,
                    },
                    DescriptorBindingBufferWrite {
                        buffer: slot.index_device_local.as_ref().unwrap(),
                        binding_index: 2,
                    },
                ],
            },
        )?;
        slot.descriptor_set = Some(descriptor_set);

        Ok(true)
    }

    fn send_instances_to_device(&self, frame: usize) -> Result<()> {
        if self.host_instances.is_empty() {
            return Ok(());
        }
        let slot = &self.frames[frame];
        slot.instance_staging
            .as_ref()
            .ok_or_else(|| anyhow!("send_to_device called before grow_to_fit"))?
            .write_data(&self.host_instances)
    }

    fn record_instance_copy(
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
        let byte_size = (self.host_instances.len() * std::mem::size_of::<T>()) as u64;
        copy_with_barrier(
            xfer_cmd,
            slot.instance_staging.as_ref(),
            slot.instance_device_local.as_ref(),
            byte_size,
            graphics_family,
            transfer_family,
        )
    }

    /// Binds this mode's descriptor set and issues one non-indexed draw per instance, since each
    /// polygon instance's vertex count (`indices_count`) can differ (spec §4.C `render`: "a
    /// non-indexed draw per instance, `first_instance` advancing by one each time").
    fn record_draw(&self, frame: usize, gfx_cmd: &CommandBuffer, pipeline: &Pipeline, first_instance: u32) -> Result<u32> {
        if self.host_instances.is_empty() {
            return Ok(first_instance);
        }
        let slot = &self.frames[frame];
        let descriptor_set = slot
            .descriptor_set
            .as_ref()
            .ok_or_else(|| anyhow!("record_draw called before grow_to_fit"))?;

        gfx_cmd.bind_descriptor_sets_graphics(0, &[descriptor_set], pipeline);
        for (i, instance) in self.host_instances.iter().enumerate() {
            let layout = instance.polygon_layout();
            gfx_cmd.draw(layout.indices_count, 1, 0, first_instance + i as u32);
        }
        Ok(first_instance + self.host_instances.len() as u32)
    }
}

fn copy_with_barrier(
    xfer_cmd: &CommandBuffer,
    staging: Option<&Buffer>,
    device_local: Option<&Buffer>,
    byte_size: u64,
    graphics_family: u32,
    transfer_family: u32,
) -> Result<Option<CopyBarriers>> {
    if byte_size == 0 {
        return Ok(None);
    }
    let staging = staging.ok_or_else(|| anyhow!("record_copy_commands called before grow_to_fit"))?;
    let device_local =
        device_local.ok_or_else(|| anyhow!("record_copy_commands called before grow_to_fit"))?;
    let region = vk::BufferCopy::default().src_offset(0).dst_offset(0).size(byte_size);
    xfer_cmd.copy_buffer(staging, device_local, &[region]);

    let separate_families = graphics_family != transfer_family;
    let acquire = vk::BufferMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
        .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::VERTEX_SHADER)
        .dst_access_mask(vk::AccessFlags2::SHADER_READ)
        .src_queue_family_index(if separate_families { transfer_family } else { vk::QUEUE_FAMILY_IGNORED })
        .dst_queue_family_index(if separate_families { graphics_family } else { vk::QUEUE_FAMILY_IGNORED })
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

/// The polygon drawable kind's four pipeline-mode batches plus the shared geometry pool (spec
/// §4.C "Polygon variant only"). Generic over a dimension exposing both [`CatalogVertex`] (to
/// convert a user [`Mesh`] into GPU vertices) and [`crate::instance::PolygonInstancePacking`]
/// (to pack transform/color plus the instance's sub-range).
pub struct PolygonBatch<D: CatalogVertex + crate::instance::PolygonInstancePacking> {
    pool: GeometryPool<D::Vertex>,
    no_stencil_write_do_fill: PolygonModeBatch<D::PolygonFillInstance>,
    do_stencil_write_do_fill: PolygonModeBatch<D::PolygonFillInstance>,
    do_stencil_write_no_fill: PolygonModeBatch<D::PolygonFillInstance>,
    do_stencil_test_no_fill: PolygonModeBatch<D::PolygonOutlineInstance>,
    descriptor_set_layout: Arc<DescriptorSetLayout>,
}

impl<D: CatalogVertex + crate::instance::PolygonInstancePacking> PolygonBatch<D> {
    pub fn new(frames_in_flight: u32, descriptor_set_layout: Arc<DescriptorSetLayout>) -> Self {
        Self {
            pool: GeometryPool::new(),
            no_stencil_write_do_fill: PolygonModeBatch::new(frames_in_flight),
            do_stencil_write_do_fill: PolygonModeBatch::new(frames_in_flight),
            do_stencil_write_no_fill: PolygonModeBatch::new(frames_in_flight),
            do_stencil_test_no_fill: PolygonModeBatch::new(frames_in_flight),
            descriptor_set_layout,
        }
    }

    /// Appends `mesh`'s geometry to the shared pool once and stamps the resulting sub-range onto
    /// the fill instance for `mode` (spec §4.C "`draw`: appends geometry to the shared pool,
    /// then an instance to the one pipeline-mode batch that pass maps to").
    pub fn draw_fill(
        &mut self,
        mode: PipelineMode,
        mesh: &Mesh,
        transform: &nalgebra::Matrix4<f32>,
        color: crate::color::Color,
        material: D::Lighting,
    ) {
        let vertices = D::to_vertices(mesh);
        let layout = self.pool.append(&vertices, &mesh.indices);
        let instance = D::pack_polygon_fill(
            transform,
            color,
            material,
            layout.vertices_start,
            layout.indices_start,
            layout.indices_count,
        );
        match mode {
            PipelineMode::NoStencilWriteDoFill => self.no_stencil_write_do_fill.host_instances.push(instance),
            PipelineMode::DoStencilWriteDoFill => self.do_stencil_write_do_fill.host_instances.push(instance),
            PipelineMode::DoStencilWriteNoFill => self.do_stencil_write_no_fill.host_instances.push(instance),
            PipelineMode::DoStencilTestNoFill => {}
        }
    }

    /// Outline pass for the same mesh; appends its own copy of the geometry to the shared pool
    /// rather than reusing the fill pass's sub-range, since the fill and outline instances may be
    /// recorded on different host threads sharing this batch only under a caller-held lock.
    pub fn draw_outline(
        &mut self,
        mesh: &Mesh,
        transform: &nalgebra::Matrix4<f32>,
        color: crate::color::Color,
    ) {
        let vertices = D::to_vertices(mesh);
        let layout = self.pool.append(&vertices, &mesh.indices);
        let instance = D::pack_polygon_outline(
            transform,
            color,
            layout.vertices_start,
            layout.indices_start,
            layout.indices_count,
        );
        self.do_stencil_test_no_fill.host_instances.push(instance);
    }

    pub fn flush(&mut self) {
        self.pool.flush();
        self.no_stencil_write_do_fill.flush();
        self.do_stencil_write_do_fill.flush();
        self.do_stencil_write_no_fill.flush();
        self.do_stencil_test_no_fill.flush();
    }

    pub fn is_empty(&self) -> bool {
        self.no_stencil_write_do_fill.is_empty()
            && self.do_stencil_write_do_fill.is_empty()
            && self.do_stencil_write_no_fill.is_empty()
            && self.do_stencil_test_no_fill.is_empty()
    }

    pub fn grow_to_fit(&mut self, frame: usize, device: &Arc<Device>) -> Result<bool> {
        let mut grew = false;
        grew |= self
            .no_stencil_write_do_fill
            .grow_to_fit(frame, device, &self.pool, &self.descriptor_set_layout)?;
        grew |= self
            .do_stencil_write_do_fill
            .grow_to_fit(frame, device, &self.pool, &self.descriptor_set_layout)?;
        grew |= self
            .do_stencil_write_no_fill
            .grow_to_fit(frame, device, &self.pool, &self.descriptor_set_layout)?;
        grew |= self
            .do_stencil_test_no_fill
            .grow_to_fit(frame, device, &self.pool, &self.descriptor_set_layout)?;
        Ok(grew)
    }

    /// Writes each mode's own copy of the shared pool plus its own instances (spec §4.C
    /// `send_to_device`). Each mode keeps an independent copy of the pool's bytes rather than
    /// sharing one buffer across descriptor sets, trading bandwidth for a simpler per-mode
    /// growth/descriptor-rewrite path mirroring `PerPrimitiveBatch`.
    pub fn send_to_device(&self, frame: usize) -> Result<()> {
        let write_pool_copy = |slot: &PolygonFrameSlot| -> Result<()> {
            if !self.pool.host_vertices.is_empty() {
                if let Some(staging) = slot.vertex_staging.as_ref() {
                    staging.write_data(&self.pool.host_vertices)?;
                }
            }
            if !self.pool.host_indices.is_empty() {
                if let Some(staging) = slot.index_staging.as_ref() {
                    staging.write_data(&self.pool.host_indices)?;
                }
            }
            Ok(())
        };

        for batch in [
            &self.no_stencil_write_do_fill,
            &self.do_stencil_write_do_fill,
            &self.do_stencil_write_no_fill,
        ] {
            if let Some(slot) = batch.frames.get(frame) {
                write_pool_copy(slot)?;
            }
            batch.send_instances_to_device(frame)?;
        }
        if let Some(slot) = self.do_stencil_test_no_fill.frames.get(frame) {
            write_pool_copy(slot)?;
        }
        self.do_stencil_test_no_fill.send_instances_to_device(frame)?;
        Ok(())
    }

    /// Copies each mode's own vertex/index/instance staging buffers that were actually written
    /// this frame (spec §4.C `record_copy_commands`). Duplicated per mode because each mode keeps
    /// its own copy of the shared pool's bytes, grown independently.
    pub fn record_copy_commands(
        &self,
        frame: usize,
        xfer_cmd: &CommandBuffer,
        graphics_family: u32,
        transfer_family: u32,
    ) -> Result<Vec<CopyBarriers>> {
        let mut barriers = Vec::new();
        let vertex_bytes = (self.pool.host_vertices.len() * std::mem::size_of::<D::Vertex>()) as u64;
        let index_bytes = (self.pool.host_indices.len() * std::mem::size_of::<u32>()) as u64;

        let mut copy_mode = |slot: &PolygonFrameSlot, instance_barrier: Option<CopyBarriers>| -> Result<()> {
            barriers.extend(instance_barrier);
            if let Some(b) = copy_with_barrier(
                xfer_cmd,
                slot.vertex_staging.as_ref(),
                slot.vertex_device_local.as_ref(),
                vertex_bytes,
                graphics_family,
                transfer_family,
            )? {
                barriers.push(b);
            }
            if let Some(b) = copy_with_barrier(
                xfer_cmd,
                slot.index_staging.as_ref(),
                slot.index_device_local.as_ref(),
                index_bytes,
                graphics_family,
                transfer_family,
            )? {
                barriers.push(b);
            }
            Ok(())
        };

        for batch in [
            &self.no_stencil_write_do_fill,
            &self.do_stencil_write_do_fill,
            &self.do_stencil_write_no_fill,
        ] {
            let instance_barrier = batch.record_instance_copy(frame, xfer_cmd, graphics_family, transfer_family)?;
            copy_mode(&batch.frames[frame], instance_barrier)?;
        }
        let outline_instance_barrier =
            self.do_stencil_test_no_fill
                .record_instance_copy(frame, xfer_cmd, graphics_family, transfer_family)?;
        copy_mode(&self.do_stencil_test_no_fill.frames[frame], outline_instance_barrier)?;

        Ok(barriers)
    }

    pub fn is_fill_empty(&self, mode: PipelineMode) -> bool {
        match mode {
            PipelineMode::NoStencilWriteDoFill => self.no_stencil_write_do_fill.is_empty(),
            PipelineMode::DoStencilWriteDoFill => self.do_stencil_write_do_fill.is_empty(),
            PipelineMode::DoStencilWriteNoFill => self.do_stencil_write_no_fill.is_empty(),
            PipelineMode::DoStencilTestNoFill => true,
        }
    }

    /// Binds the mode's own descriptor set (instance + shared vertex/index pool) and issues its
    /// per-instance draws (spec §4.C `render`).
    pub fn record_fill_draw(
        &self,
        mode: PipelineMode,
        frame: usize,
        gfx_cmd: &CommandBuffer,
        pipeline: &Pipeline,
        first_instance: u32,
    ) -> Result<u32> {
        let batch = match mode {
            PipelineMode::NoStencilWriteDoFill => &self.no_stencil_write_do_fill,
            PipelineMode::DoStencilWriteDoFill => &self.do_stencil_write_do_fill,
            PipelineMode::DoStencilWriteNoFill => &self.do_stencil_write_no_fill,
            PipelineMode::DoStencilTestNoFill => return Ok(first_instance),
        };
        batch.record_draw(frame, gfx_cmd, pipeline, first_instance)
    }

    pub fn record_outline_draw(
        &self,
        frame: usize,
        gfx_cmd: &CommandBuffer,
        pipeline: &Pipeline,
        first_instance: u32,
    ) -> Result<u32> {
        self.do_stencil_test_no_fill.record_draw(frame, gfx_cmd, pipeline, first_instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_pool_append_tracks_running_offsets() {
        let mut pool: GeometryPool<crate::catalog::Vertex2D> = GeometryPool::new();
        let v = crate::catalog::Vertex2D {
            position: nalgebra::Vector2::new(0.0, 0.0),
        };
        let layout_a = pool.append(&[v, v, v], &[0, 1, 2]);
        assert_eq!(layout_a.vertices_start, 0);
        assert_eq!(layout_a.indices_start, 0);

        let layout_b = pool.append(&[v, v], &[0, 1]);
        assert_eq!(layout_b.vertices_start, 3);
        assert_eq!(layout_b.indices_start, 3);
        assert_eq!(pool.host_vertices.len(), 5);
        assert_eq!(pool.host_indices.len(), 5);
    }
}
