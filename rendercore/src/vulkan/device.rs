//! Instance/physical-device/logical-device bring-up and the resource deletion queue.
//!
//! `Device` is the shared, refcounted GPU handle spec §9 asks for in place of the original's
//! process-wide globals: every other component holds an `Arc<Device>` rather than reaching into
//! static state. It owns nothing *per-frame* — no swap chain, no command pools, no sync objects;
//! those belong to [`crate::frame::FrameScheduler`] (spec §3 "SwapChain — owned by F").

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::resource::{
    DescriptorPool, DescriptorSetLayoutDescriptor, PendingDestructionBuffer,
    PendingDestructionImage, PendingDestructionPipeline, PendingDestructionSampler,
};
use crate::vulkan::types::DescriptorSetLayoutBinding;

/// Wraps `ash::Entry` + `ash::Instance` so `Device` doesn't need to carry both loose.
pub(crate) struct Instance {
    pub(crate) entry: ash::Entry,
    pub(crate) raw: ash::Instance,
    pub(crate) surface_loader: ash::khr::surface::Instance,
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe { self.raw.destroy_instance(None) };
    }
}

pub(crate) struct PhysicalDevice {
    pub(crate) raw: vk::PhysicalDevice,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) graphics_family: u32,
    /// `None` when no dedicated transfer-only queue family exists; the transfer queue then
    /// aliases the graphics queue family (spec §4.F `TransferMode::SameQueue`/`SameIndex`).
    pub(crate) transfer_family: Option<u32>,
}

/// Whether graphics and transfer submissions share a queue family, matching spec §4.F.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Same queue, single command buffer, no transfer semaphore.
    SameQueue,
    /// Different queue objects, same queue family: no ownership transfer needed, but still an
    /// explicit transfer submission.
    SameIndex,
    /// Separate queue family: explicit release/acquire barriers and a `TransferCopyDone` semaphore.
    SeparateQueueFamily,
}

/// Per-object-kind queues awaiting actual `vkDestroy*`/deallocation once it is safe: every kind
/// carries a "frames remaining" counter seeded at `frames_in_flight` when scheduled, so an object
/// is not destroyed until every frame that could still reference it has retired (spec §5 "the
/// `InFlight[frame]` fence ensures frame N+F cannot begin until frame N's GPU work has finished").
#[derive(Default)]
pub(crate) struct ResourceHub {
    pub(crate) pending_destruction_buffers: Vec<(u32, PendingDestructionBuffer)>,
    pub(crate) pending_destruction_images: Vec<(u32, PendingDestructionImage)>,
    pub(crate) pending_destruction_sampler: Vec<(u32, PendingDestructionSampler)>,
    pub(crate) pending_destruction_pipelines: Vec<(u32, PendingDestructionPipeline)>,
}

pub(crate) struct DeviceShared {
    pub(crate) instance: Instance,
    pub(crate) physical_device: PhysicalDevice,
    pub(crate) raw: ash::Device,
    pub(crate) allocator: Mutex<Allocator>,
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe { self.raw.destroy_device(None) };
    }
}

pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
    pub(crate) resource_hub: Mutex<ResourceHub>,

    pub(crate) graphics_queue: vk::Queue,
    pub(crate) transfer_queue: vk::Queue,
    pub(crate) transfer_mode: TransferMode,

    pub(crate) global_descriptor_pool: DescriptorPool,
    pub(crate) global_descriptor_pool_bindless_textures: DescriptorPool,

    /// Single-binding layout shared by the mesh/circle batchers (spec §4.C): binding 0 is the
    /// per-kind instance storage buffer.
    pub(crate) instance_storage_layout: Arc<super::resource::DescriptorSetLayout>,
    /// Three-binding layout for the polygon batcher (spec §4.C "Polygon variant only"): instance
    /// storage, then the dynamic vertex storage buffer, then the dynamic index storage buffer.
    pub(crate) polygon_storage_layout: Arc<super::resource::DescriptorSetLayout>,
    /// Two-binding layout for the light manager (spec §4.D): directional, then point lights.
    pub(crate) light_storage_layout: Arc<super::resource::DescriptorSetLayout>,

    frames_in_flight: u32,
}

impl Device {
    pub fn new(
        window_handle: RawWindowHandle,
        display_handle: RawDisplayHandle,
        frames_in_flight: u32,
    ) -> Result<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }.context("loading Vulkan entry points")?;
        let instance_raw = Self::create_instance(&entry, display_handle)?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance_raw);
        let instance = Instance {
            entry,
            raw: instance_raw,
            surface_loader,
        };

        // A throwaway surface is enough to test present support during physical device
        // selection; the real, long-lived surface is created and owned by `FrameScheduler`.
        let probe_surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.raw,
                display_handle,
                window_handle,
                None,
            )?
        };

        let physical_device = Self::select_physical_device(&instance, probe_surface)?;

        unsafe {
            instance.surface_loader.destroy_surface(probe_surface, None);
        }

        let (raw, graphics_queue, transfer_queue, transfer_mode) =
            Self::create_logical_device(&instance, &physical_device)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.raw.clone(),
            device: raw.clone(),
            physical_device: physical_device.raw,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let shared = Arc::new(DeviceShared {
            instance,
            physical_device,
            raw,
            allocator: Mutex::new(allocator),
        });

        let global_descriptor_pool = Self::create_descriptor_pool(&shared, 1024, false)?;
        let global_descriptor_pool_bindless_textures =
            Self::create_descriptor_pool(&shared, 4096, true)?;

        let instance_storage_layout = Arc::new(super::resource::DescriptorSetLayout::new(
            shared.clone(),
            DescriptorSetLayoutDescriptor::new(
                vec![DescriptorSetLayoutBinding::new()
                    .binding(0)
                    .descriptor_count(1)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .stage_flags(vk::ShaderStageFlags::VERTEX)],
                vk::DescriptorSetLayoutCreateFlags::empty(),
            ),
        )?);

        let polygon_storage_layout = Arc::new(super::resource::DescriptorSetLayout::new(
            shared.clone(),
            DescriptorSetLayoutDescriptor::new(
                vec![
                    DescriptorSetLayoutBinding::new()
                        .binding(0)
                        .descriptor_count(1)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .stage_flags(vk::ShaderStageFlags::VERTEX),
                    DescriptorSetLayoutBinding::new()
                        .binding(1)
                        .descriptor_count(1)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .stage_flags(vk::ShaderStageFlags::VERTEX),
                    DescriptorSetLayoutBinding::new()
                        .binding(2)
                        .descriptor_count(1)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .stage_flags(vk::ShaderStageFlags::VERTEX),
                ],
                vk::DescriptorSetLayoutCreateFlags::empty(),
            ),
        )?);

        let light_storage_layout = Arc::new(super::resource::DescriptorSetLayout::new(
            shared.clone(),
            DescriptorSetLayoutDescriptor::new(
                vec![
                    DescriptorSetLayoutBinding::new()
                        .binding(0)
                        .descriptor_count(1)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .stage_flags(vk::ShaderStageFlags::FRAGMENT),
                    DescriptorSetLayoutBinding::new()
                        .binding(1)
                        .descriptor_count(1)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .stage_flags(vk::ShaderStageFlags::FRAGMENT),
                ],
                vk::DescriptorSetLayoutCreateFlags::empty(),
            ),
        )?);

        let device = Self {
            shared,
            resource_hub: Mutex::new(ResourceHub::default()),
            graphics_queue,
            transfer_queue,
            transfer_mode,
            global_descriptor_pool,
            global_descriptor_pool_bindless_textures,
            instance_storage_layout,
            polygon_storage_layout,
            light_storage_layout,
            frames_in_flight,
        };

        Ok(Arc::new(device))
    }

    fn create_instance(entry: &ash::Entry, display_handle: RawDisplayHandle) -> Result<ash::Instance> {
        let app_name = c"rendercore";
        let application_info = vk::ApplicationInfo::default()
            .application_name(app_name)
            .application_version(0)
            .engine_name(app_name)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_3);

        let mut extension_names =
            ash_window::enumerate_required_extensions(display_handle)?.to_vec();
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_extension_names(&extension_names);

        unsafe { Ok(entry.create_instance(&create_info, None)?) }
    }

    fn select_physical_device(
        instance: &Instance,
        probe_surface: vk::SurfaceKHR,
    ) -> Result<PhysicalDevice> {
        let candidates = unsafe { instance.raw.enumerate_physical_devices()? };

        for pdev in candidates {
            let queue_families =
                unsafe { instance.raw.get_physical_device_queue_family_properties(pdev) };

            let graphics_family = queue_families.iter().enumerate().position(|(index, props)| {
                props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                    && unsafe {
                        instance
                            .surface_loader
                            .get_physical_device_surface_support(pdev, index as u32, probe_surface)
                            .unwrap_or(false)
                    }
            });

            let Some(graphics_family) = graphics_family else {
                continue;
            };

            // Prefer a queue family that supports transfer but *not* graphics: a dedicated DMA
            // engine enables `TransferMode::SeparateQueueFamily` (spec §4.F).
            let transfer_family = queue_families
                .iter()
                .enumerate()
                .position(|(index, props)| {
                    index != graphics_family
                        && props.queue_flags.contains(vk::QueueFlags::TRANSFER)
                        && !props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                });

            let memory_properties =
                unsafe { instance.raw.get_physical_device_memory_properties(pdev) };

            return Ok(PhysicalDevice {
                raw: pdev,
                memory_properties,
                graphics_family: graphics_family as u32,
                transfer_family: transfer_family.map(|i| i as u32),
            });
        }

        Err(anyhow!("no suitable physical device with graphics + present support"))
    }

    fn create_logical_device(
        instance: &Instance,
        physical_device: &PhysicalDevice,
    ) -> Result<(ash::Device, vk::Queue, vk::Queue, TransferMode)> {
        let priorities = [1.0f32];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(physical_device.graphics_family)
            .queue_priorities(&priorities)];

        let transfer_mode = match physical_device.transfer_family {
            Some(family) if family != physical_device.graphics_family => {
                queue_create_infos.push(
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(family)
                        .queue_priorities(&priorities),
                );
                TransferMode::SeparateQueueFamily
            }
            _ => TransferMode::SameQueue,
        };

        let extension_names = [
            ash::khr::swapchain::NAME.as_ptr(),
            ash::khr::dynamic_rendering::NAME.as_ptr(),
        ];

        let mut dynamic_rendering =
            vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true);
        let features = vk::PhysicalDeviceFeatures::default()
            .fill_mode_non_solid(true)
            .wide_lines(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut dynamic_rendering);

        let raw = unsafe {
            instance
                .raw
                .create_device(physical_device.raw, &create_info, None)?
        };

        let graphics_queue =
            unsafe { raw.get_device_queue(physical_device.graphics_family, 0) };
        let transfer_queue = match transfer_mode {
            TransferMode::SeparateQueueFamily => unsafe {
                raw.get_device_queue(physical_device.transfer_family.unwrap(), 0)
            },
            _ => graphics_queue,
        };

        Ok((raw, graphics_queue, transfer_queue, transfer_mode))
    }

    fn create_descriptor_pool(
        shared: &Arc<DeviceShared>,
        max_sets: u32,
        bindless: bool,
    ) -> Result<DescriptorPool> {
        let pool_sizes = if bindless {
            [vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(max_sets)]
        } else {
            [vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(max_sets * 4)]
        };

        let mut flags = vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        if bindless {
            flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes)
            .flags(flags);

        DescriptorPool::new(shared.clone(), create_info)
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.shared.physical_device.graphics_family
    }

    pub fn transfer_queue_family(&self) -> u32 {
        self.shared
            .physical_device
            .transfer_family
            .unwrap_or(self.shared.physical_device.graphics_family)
    }

    pub fn transfer_mode(&self) -> TransferMode {
        self.transfer_mode
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    pub fn raw(&self) -> &ash::Device {
        &self.shared.raw
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.shared.instance.raw
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.shared.instance.entry
    }

    pub fn physical_device_raw(&self) -> vk::PhysicalDevice {
        self.shared.physical_device.raw
    }

    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.shared.instance.surface_loader
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.shared.raw.device_wait_idle()? };
        Ok(())
    }

    pub fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()> {
        unsafe { self.shared.raw.queue_wait_idle(queue)? };
        Ok(())
    }

    /// Drains every per-kind pending-destruction list, decrementing each entry's
    /// frames-remaining counter and actually destroying entries that reach zero. Called once per
    /// `FrameScheduler::end_frame` after the frame's `InFlight` fence has been observed signalled.
    pub(crate) fn process_deletion_queue(&self) -> Result<()> {
        let mut hub = self.resource_hub.lock();

        Self::drain(&mut hub.pending_destruction_buffers, |item| {
            self.destroy_buffer(item)
        })?;
        Self::drain(&mut hub.pending_destruction_images, |item| {
            self.destroy_image(item)
        })?;
        Self::drain(&mut hub.pending_destruction_sampler, |item| {
            self.destroy_sampler(item)
        })?;
        Self::drain(&mut hub.pending_destruction_pipelines, |item| {
            self.destroy_pipeline(item)
        })?;

        Ok(())
    }

    fn drain<T>(
        queue: &mut Vec<(u32, T)>,
        mut destroy: impl FnMut(T) -> Result<()>,
    ) -> Result<()> {
        let mut remaining = Vec::with_capacity(queue.len());
        for (frames_left, item) in queue.drain(..) {
            if frames_left == 0 {
                destroy(item)?;
            } else {
                remaining.push((frames_left - 1, item));
            }
        }
        *queue = remaining;
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Deletion queue in reverse-insertion order after one final idle (spec §9 "Global
        // engine state"). Anything still pending at this point is destroyed unconditionally:
        // the device is idle, so nothing can still be reading it.
        let _ = self.wait_idle();
        let mut hub = self.resource_hub.lock();
        for (_, item) in hub.pending_destruction_pipelines.drain(..) {
            let _ = self.destroy_pipeline(item);
        }
        for (_, item) in hub.pending_destruction_sampler.drain(..) {
            let _ = self.destroy_sampler(item);
        }
        for (_, item) in hub.pending_destruction_images.drain(..) {
            let _ = self.destroy_image(item);
        }
        for (_, item) in hub.pending_destruction_buffers.drain(..) {
            let _ = self.destroy_buffer(item);
        }
    }
}

