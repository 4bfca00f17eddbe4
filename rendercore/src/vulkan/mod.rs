//! Thin, explicit wrapper around the Vulkan-class GPU API (spec §1 "treated as an opaque
//! explicit device with queues, command buffers, pipelines, buffers, images, descriptor sets,
//! semaphores, fences"). Nothing outside this module imports `ash` directly.

pub mod command;
pub mod device;
pub mod resource;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod types;

pub use ash::vk;

pub(crate) use device::DeviceShared;
