//! Light data manager (3D only, spec §4.D). Structurally analogous to
//! [`crate::batch::PerPrimitiveBatch`] but with no primitive indirection and two independent
//! host arrays sharing one two-binding descriptor set (spec §3 `Light (3D)`,
//! `Device::light_storage_layout`).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use gpu_allocator::MemoryLocation;
use nalgebra::Vector3;

use crate::batch::CopyBarriers;
use crate::color::Color;
use crate::dim::{Dim2, Dim3, Dimension};
use crate::vulkan::{
    command::CommandBuffer,
    device::Device,
    resource::{
        Buffer, BufferDescriptor, DescriptorBindingBufferWrite, DescriptorBindingWrites,
        DescriptorSet, DescriptorSetDescriptor,
    },
    vk,
};

/// Per-dimension presence of a [`LightManager`] (spec §3 `Light (3D)` — 2D scenes carry none).
/// Lets [`crate::renderer::Renderer<D>`] stay generic over `D` without branching on
/// `D::IS_3D` at the call sites that add/flush/grow/send/draw lights.
pub trait LightSupport: Dimension {
    type Lights: LightsHandle;

    fn new_lights(frames_in_flight: u32, device: &Arc<Device>) -> Self::Lights;
}

/// Uniform no-op/forwarding surface so `Renderer<D>` can call these methods regardless of
/// whether `D::Lights` is `()` (2D) or [`LightManager`] (3D).
pub trait LightsHandle {
    fn flush(&mut self);
    fn grow_to_fit(&mut self, frame: usize, device: &Arc<Device>) -> Result<bool>;
    fn send_to_device(&self, frame: usize) -> Result<()>;
    fn record_copy_commands(
        &self,
        frame: usize,
        xfer_cmd: &CommandBuffer,
        graphics_family: u32,
        transfer_family: u32,
    ) -> Result<Vec<CopyBarriers>>;
    fn descriptor_set(&self, frame: usize) -> Option<&DescriptorSet>;
    fn directional_count(&self) -> u32;
    fn point_count(&self) -> u32;
}

impl LightsHandle for () {
    fn flush(&mut self) {}
    fn grow_to_fit(&mut self, _frame: usize, _device: &Arc<Device>) -> Result<bool> {
        Ok(false)
    }
    fn send_to_device(&self, _frame: usize) -> Result<()> {
        Ok(())
    }
    fn record_copy_commands(
        &self,
        _frame: usize,
        _xfer_cmd: &CommandBuffer,
        _graphics_family: u32,
        _transfer_family: u32,
    ) -> Result<Vec<CopyBarriers>> {
        Ok(Vec::new())
    }
    fn descriptor_set(&self, _frame: usize) -> Option<&DescriptorSet> {
        None
    }
    fn directional_count(&self) -> u32 {
        0
    }
    fn point_count(&self) -> u32 {
        0
    }
}

impl LightSupport for Dim2 {
    type Lights = ();

    fn new_lights(_frames_in_flight: u32, _device: &Arc<Device>) -> Self::Lights {}
}

impl LightSupport for Dim3 {
    type Lights = LightManager;

    fn new_lights(frames_in_flight: u32, device: &Arc<Device>) -> Self::Lights {
        LightManager::new(frames_in_flight, device.light_storage_layout.clone())
    }
}

const INITIAL_CAPACITY: usize = 8;

/// Host-side directional light (spec §3 "DirectionalLight: {Direction, Intensity, Color}").
#[derive(Debug, Clone, Copy)]
pub struct DirectionalLight {
    pub direction: Vector3<f32>,
    pub intensity: f32,
    pub color: Color,
}

/// Host-side point light (spec §3 "PointLight: {Position, Intensity, Radius, Color}").
#[derive(Debug, Clone, Copy)]
pub struct PointLight {
    pub position: Vector3<f32>,
    pub intensity: f32,
    pub radius: f32,
    pub color: Color,
}

/// std430-compatible directional light, 16-byte aligned fields padded to a `vec4` boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct DirectionalLightGpu {
    direction: [f32; 3],
    intensity: f32,
    color: u32,
    _pad: [u32; 3],
}

impl From<DirectionalLight> for DirectionalLightGpu {
    fn from(light: DirectionalLight) -> Self {
        Self {
            direction: light.direction.into(),
            intensity: light.intensity,
            color: light.color.0,
            _pad: [0; 3],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct PointLightGpu {
    position: [f32; 3],
    intensity: f32,
    color: u32,
    radius: f32,
    _pad: [u32; 2],
}

impl From<PointLight> for PointLightGpu {
    fn from(light: PointLight) -> Self {
        Self {
            position: light.position.into(),
            intensity: light.intensity,
            color: light.color.0,
            radius: light.radius,
            _pad: [0; 2],
        }
    }
}

struct LightFrameSlot {
    directional_capacity: usize,
    point_capacity: usize,
    directional_device_local: Option<Buffer>,
    directional_staging: Option<Buffer>,
    point_device_local: Option<Buffer>,
    point_staging: Option<Buffer>,
    descriptor_set: Option<DescriptorSet>,
}

impl LightFrameSlot {
    fn empty() -> Self {
        Self {
            directional_capacity: 0,
            point_capacity: 0,
            directional_device_local: None,
            directional_staging: None,
            point_device_local: None,
            point_staging: None,
            descriptor_set: None,
        }
    }
}

/// Owns the per-frame-in-flight buffers and one descriptor set per frame, binding 0 to the
/// directional-light storage buffer and binding 1 to the point-light one (spec §4.D).
pub struct LightManager {
    host_directional: Vec<DirectionalLight>,
    host_point: Vec<PointLight>,
    frames: Vec<LightFrameSlot>,
    descriptor_set_layout: Arc<crate::vulkan::resource::DescriptorSetLayout>,
}

impl LightManager {
    pub fn new(frames_in_flight: u32, descriptor_set_layout: Arc<crate::vulkan::resource::DescriptorSetLayout>) -> Self {
        Self {
            host_directional: Vec::new(),
            host_point: Vec::new(),
            frames: (0..frames_in_flight).map(|_| LightFrameSlot::empty()).collect(),
            descriptor_set_layout,
        }
    }

    /// Appends a directional light, transformed by the caller (spec §4.E
    /// `add_directional_light`: "the light's direction/position is first transformed by the
    /// current state's transform").
    pub fn add_directional_light(&mut self, light: DirectionalLight) {
        self.host_directional.push(light);
    }

    pub fn add_point_light(&mut self, light: PointLight) {
        self.host_point.push(light);
    }

    pub fn directional_count(&self) -> u32 {
        self.host_directional.len() as u32
    }

    pub fn point_count(&self) -> u32 {
        self.host_point.len() as u32
    }

    pub fn flush(&mut self) {
        self.host_directional.clear();
        self.host_point.clear();
    }

    /// Rewrites the 2-binding light descriptor set whenever either array's capacity is exceeded
    /// (spec §4.D "on grow, rewrites the 2-binding light descriptor set").
    pub fn grow_to_fit(&mut self, frame: usize, device: &Arc<Device>) -> Result<bool> {
        let dir_size = self.host_directional.len();
        let point_size = self.host_point.len();
        let slot = &mut self.frames[frame];

        let needs_dir_grow = dir_size > slot.directional_capacity;
        let needs_point_grow = point_size > slot.point_capacity;
        if !needs_dir_grow && !needs_point_grow {
            return Ok(false);
        }

        let dir_capacity = if needs_dir_grow {
            (1 + dir_size + dir_size / 2).max(INITIAL_CAPACITY)
        } else {
            slot.directional_capacity.max(INITIAL_CAPACITY)
        };
        let point_capacity = if needs_point_grow {
            (1 + point_size + point_size / 2).max(INITIAL_CAPACITY)
        } else {
            slot.point_capacity.max(INITIAL_CAPACITY)
        };

        let make_pair = |capacity: usize, stride: usize| -> Result<(Buffer, Buffer)> {
            let byte_size = (capacity * stride) as u64;
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

        if needs_dir_grow {
            let (device_local, staging) = make_pair(dir_capacity, std::mem::size_of::<DirectionalLightGpu>())?;
            slot.directional_device_local = Some(device_local);
            slot.directional_staging = Some(staging);
            slot.directional_capacity = dir_capacity;
        }
        if needs_point_grow {
            let (device_local, staging) = make_pair(point_capacity, std::mem::size_of::<PointLightGpu>())?;
            slot.point_device_local = Some(device_local);
            slot.point_staging = Some(staging);
            slot.point_capacity = point_capacity;
        }

        let descriptor_set = match slot.descriptor_set.take() {
            Some(set) => set,
            None => device.create_descriptor_set(DescriptorSetDescriptor::new_generic(
                self.descriptor_set_layout.clone(),
            ))?,
        };
        device.update_descriptor_set(
            &descriptor_set,
            &DescriptorBindingWrites {
                buffers: vec![
                    DescriptorBindingBufferWrite {
                        buffer: slot.directional_device_local.as_ref().unwrap(),
                        binding_index: 0,
                    },
                    DescriptorBindingBufferWrite {
                        buffer: slot.point_device_local.as_ref().unwrap(),
                        binding_index: 1,
                    },
                ],
            },
        )?;
        slot.descriptor_set = Some(descriptor_set);

        Ok(true)
    }

    pub fn send_to_device(&self, frame: usize) -> Result<()> {
        let slot = &self.frames[frame];
        if !self.host_directional.is_empty() {
            let gpu_data: Vec<DirectionalLightGpu> =
                self.host_directional.iter().copied().map(Into::into).collect();
            slot.directional_staging
                .as_ref()
                .ok_or_else(|| anyhow!("send_to_device called before grow_to_fit"))?
                .write_data(&gpu_data)?;
        }
        if !self.host_point.is_empty() {
            let gpu_data: Vec<PointLightGpu> = self.host_point.iter().copied().map(Into::into).collect();
            slot.point_staging
                .as_ref()
                .ok_or_else(|| anyhow!("send_to_device called before grow_to_fit"))?
                .write_data(&gpu_data)?;
        }
        Ok(())
    }

    pub fn record_copy_commands(
        &self,
        frame: usize,
        xfer_cmd: &CommandBuffer,
        graphics_family: u32,
        transfer_family: u32,
    ) -> Result<Vec<CopyBarriers>> {
        let slot = &self.frames[frame];
        let mut barriers = Vec::with_capacity(2);

        let mut copy_one = |size: usize, stride: usize, staging: &Option<Buffer>, device_local: &Option<Buffer>| -> Result<()> {
            if size == 0 {
                return Ok(());
            }
            let staging = staging.as_ref().ok_or_else(|| anyhow!("record_copy_commands called before grow_to_fit"))?;
            let device_local = device_local.as_ref().ok_or_else(|| anyhow!("record_copy_commands called before grow_to_fit"))?;
            let byte_size = (size * stride) as u64;
            let region = vk::BufferCopy::default().src_offset(0).dst_offset(0).size(byte_size);
            xfer_cmd.copy_buffer(staging, device_local, &[region]);

            let separate_families = graphics_family != transfer_family;
            let acquire = vk::BufferMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
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
                    .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
                    .dst_access_mask(vk::AccessFlags2::empty())
                    .src_queue_family_index(transfer_family)
                    .dst_queue_family_index(graphics_family)
                    .buffer(device_local.raw)
                    .offset(0)
                    .size(byte_size)
            });
            barriers.push(CopyBarriers { acquire, release });
            Ok(())
        };

        copy_one(
            self.host_directional.len(),
            std::mem::size_of::<DirectionalLightGpu>(),
            &slot.directional_staging,
            &slot.directional_device_local,
        )?;
        copy_one(
            self.host_point.len(),
            std::mem::size_of::<PointLightGpu>(),
            &slot.point_staging,
            &slot.point_device_local,
        )?;

        Ok(barriers)
    }

    pub fn descriptor_set(&self, frame: usize) -> Option<&DescriptorSet> {
        self.frames[frame].descriptor_set.as_ref()
    }
}

impl LightsHandle for LightManager {
    fn flush(&mut self) {
        LightManager::flush(self)
    }
    fn grow_to_fit(&mut self, frame: usize, device: &Arc<Device>) -> Result<bool> {
        LightManager::grow_to_fit(self, frame, device)
    }
    fn send_to_device(&self, frame: usize) -> Result<()> {
        LightManager::send_to_device(self, frame)
    }
    fn record_copy_commands(
        &self,
        frame: usize,
        xfer_cmd: &CommandBuffer,
        graphics_family: u32,
        transfer_family: u32,
    ) -> Result<Vec<CopyBarriers>> {
        LightManager::record_copy_commands(self, frame, xfer_cmd, graphics_family, transfer_family)
    }
    fn descriptor_set(&self, frame: usize) -> Option<&DescriptorSet> {
        LightManager::descriptor_set(self, frame)
    }
    fn directional_count(&self) -> u32 {
        LightManager::directional_count(self)
    }
    fn point_count(&self) -> u32 {
        LightManager::point_count(self)
    }
}

