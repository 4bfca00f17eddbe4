//! Presentable surface and swap chain (spec §3/§6). Owned by [`crate::frame::FrameScheduler`],
//! not by [`super::device::Device`] — the device is a GPU handle with no notion of "the" window.

use std::sync::Arc;

use anyhow::{Context, Result};
use ash::khr;
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::DeviceShared;

pub(crate) struct Surface {
    raw_ash: khr::surface::Instance,
    raw: vk::SurfaceKHR,
}

impl Surface {
    pub(crate) fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        let raw_ash = khr::surface::Instance::new(entry, instance);
        let raw =
            unsafe { ash_window::create_surface(entry, instance, display_handle, window_handle, None)? };
        Ok(Self { raw_ash, raw })
    }

    pub(crate) fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.raw_ash.destroy_surface(self.raw, None) };
    }
}

/// A depth+stencil image owned directly by `SwapChain` rather than going through
/// [`super::resource::Image`]'s deletion queue: its lifetime is already pinned to the swap chain
/// it belongs to, so there is no benefit to deferring its destruction past a frame boundary.
pub(crate) struct DepthStencilImage {
    pub(crate) raw: vk::Image,
    pub(crate) raw_view: vk::ImageView,
    allocation: Option<Allocation>,
    device: Arc<DeviceShared>,
}

impl DepthStencilImage {
    fn new(device: Arc<DeviceShared>, width: u32, height: u32, format: vk::Format) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe { device.raw.create_image(&create_info, None)? };
        let requirements = unsafe { device.raw.get_image_memory_requirements(raw) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name: "swapchain depth/stencil",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        unsafe { device.raw.bind_image_memory(raw, allocation.memory(), allocation.offset())? };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let raw_view = unsafe { device.raw.create_image_view(&view_info, None)? };

        Ok(Self {
            raw,
            raw_view,
            allocation: Some(allocation),
            device,
        })
    }
}

impl Drop for DepthStencilImage {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_image_view(self.raw_view, None);
            self.device.raw.destroy_image(self.raw, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator.lock().free(allocation);
        }
    }
}

/// Off-screen color target the scene is actually rendered into; `FrameScheduler`'s
/// post-processing pass then samples it and writes the result into the presentable image (spec
/// §3/§6 "Intermediate image"). Owned directly for the same reason as `DepthStencilImage`.
pub(crate) struct IntermediateColorImage {
    pub(crate) raw: vk::Image,
    pub(crate) raw_view: vk::ImageView,
    allocation: Option<Allocation>,
    device: Arc<DeviceShared>,
}

impl IntermediateColorImage {
    fn new(device: Arc<DeviceShared>, width: u32, height: u32, format: vk::Format) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe { device.raw.create_image(&create_info, None)? };
        let requirements = unsafe { device.raw.get_image_memory_requirements(raw) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name: "swapchain intermediate color",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        unsafe { device.raw.bind_image_memory(raw, allocation.memory(), allocation.offset())? };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let raw_view = unsafe { device.raw.create_image_view(&view_info, None)? };

        Ok(Self {
            raw,
            raw_view,
            allocation: Some(allocation),
            device,
        })
    }
}

impl Drop for IntermediateColorImage {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_image_view(self.raw_view, None);
            self.device.raw.destroy_image(self.raw, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = self.device.allocator.lock().free(allocation);
        }
    }
}

/// Presentable color image plus the per-image depth/stencil and intermediate color images spec
/// §3/§6 attach to it.
pub(crate) struct SwapchainImage {
    pub(crate) raw: vk::Image,
    pub(crate) raw_view: vk::ImageView,
    pub(crate) depth_stencil: DepthStencilImage,
    pub(crate) intermediate: IntermediateColorImage,
}

pub(crate) struct SwapChain {
    raw_ash: khr::swapchain::Device,
    raw: vk::SwapchainKHR,
    pub(crate) images: Vec<SwapchainImage>,
    pub(crate) surface_format: vk::SurfaceFormatKHR,
    pub(crate) depth_format: vk::Format,
    pub(crate) extent: vk::Extent2D,
    device: Arc<DeviceShared>,
}

/// Picks `B8G8R8A8_UNORM`/`SRGB_NONLINEAR` when the surface supports it, else its first
/// reported format. Shared by [`SwapChain::new`] and `Engine`'s bring-up probe (spec §4.B: the
/// pipeline catalog is built once at engine init against the format real windows will negotiate).
pub(crate) fn negotiate_surface_format(
    surface_loader: &khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: &Surface,
) -> Result<vk::SurfaceFormatKHR> {
    let formats =
        unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface.raw)? };
    Ok(formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_UNORM
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .unwrap_or(formats[0]))
}

impl SwapChain {
    pub(crate) fn new(
        device: Arc<DeviceShared>,
        instance: &ash::Instance,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
        requested_present_mode: vk::PresentModeKHR,
        previous: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let surface_loader = &device.instance.surface_loader;

        let surface_format = negotiate_surface_format(surface_loader, physical_device, surface)?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface.raw)?
        };
        let present_mode = if present_modes.contains(&requested_present_mode) {
            requested_present_mode
        } else {
            vk::PresentModeKHR::FIFO
        };

        let capabilities =
            unsafe { surface_loader.get_physical_device_surface_capabilities(physical_device, surface.raw)? };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            capabilities.max_image_extent
        };

        // At least triple-buffered, bounded by what the surface supports (spec §6).
        let mut min_image_count = capabilities.min_image_count.max(3);
        if capabilities.max_image_count != 0 {
            min_image_count = min_image_count.min(capabilities.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.raw)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(previous.unwrap_or(vk::SwapchainKHR::null()));

        let raw_ash = khr::swapchain::Device::new(instance, &device.raw);
        let raw = unsafe { raw_ash.create_swapchain(&create_info, None)? };

        let images_raw = unsafe { raw_ash.get_swapchain_images(raw)? };
        let depth_format = vk::Format::D32_SFLOAT_S8_UINT;

        let images = images_raw
            .into_iter()
            .map(|image_raw| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image_raw)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );
                let raw_view = unsafe { device.raw.create_image_view(&view_info, None)? };

                let depth_stencil =
                    DepthStencilImage::new(device.clone(), extent.width, extent.height, depth_format)?;
                let intermediate = IntermediateColorImage::new(
                    device.clone(),
                    extent.width,
                    extent.height,
                    surface_format.format,
                )?;

                Ok(SwapchainImage {
                    raw: image_raw,
                    raw_view,
                    depth_stencil,
                    intermediate,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            device,
            raw_ash,
            raw,
            images,
            surface_format,
            depth_format,
            extent,
        })
    }

    pub(crate) fn raw(&self) -> vk::SwapchainKHR {
        self.raw
    }

    /// `timeout_ns` lets `FrameScheduler::begin_frame` implement `WaitMode::Poll` (spec §4.F):
    /// a zero timeout makes `NotReady` observable instead of blocking.
    pub(crate) fn acquire_next_image(
        &self,
        signal_semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        match unsafe {
            self.raw_ash
                .acquire_next_image(self.raw, timeout_ns, signal_semaphore, vk::Fence::null())
        } {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::NOT_READY) | Err(vk::Result::TIMEOUT) => Ok(AcquireOutcome::NotReady),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Ok(AcquireOutcome::SurfaceLost),
            Err(e) => Err(e).context("vkAcquireNextImageKHR"),
        }
    }

    pub(crate) fn queue_present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.raw];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.raw_ash.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(PresentOutcome::Presented { suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Ok(PresentOutcome::SurfaceLost),
            Err(e) => Err(e).context("vkQueuePresentKHR"),
        }
    }
}

/// Distinguishes "skip this frame and retry" (`NotReady`, under `WaitMode::Poll`) from "the swap
/// chain must be rebuilt" (`OutOfDate`) from "the surface itself is gone" (`SurfaceLost`) — spec
/// §4.F requires `FrameScheduler` to react differently to each.
pub(crate) enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    NotReady,
    OutOfDate,
    SurfaceLost,
}

pub(crate) enum PresentOutcome {
    Presented { suboptimal: bool },
    OutOfDate,
    SurfaceLost,
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        unsafe {
            for image in &self.images {
                self.device.raw.destroy_image_view(image.raw_view, None);
            }
            self.raw_ash.destroy_swapchain(self.raw, None);
        }
    }
}

