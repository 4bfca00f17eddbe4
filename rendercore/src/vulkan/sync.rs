//! Per-frame and per-swapchain-image synchronization primitives (spec §5 `FrameSyncSet`/
//! `ImageSyncSet`). Kept as thin owning wrappers so `FrameScheduler` doesn't touch raw handles.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use super::DeviceShared;

pub(crate) struct Semaphore {
    pub(crate) raw: vk::Semaphore,
    device: Arc<DeviceShared>,
}

impl Semaphore {
    pub(crate) fn new(device: Arc<DeviceShared>) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let raw = unsafe { device.raw.create_semaphore(&create_info, None)? };
        Ok(Self { raw, device })
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_semaphore(self.raw, None) };
    }
}

pub(crate) struct Fence {
    pub(crate) raw: vk::Fence,
    device: Arc<DeviceShared>,
}

impl Fence {
    /// Created pre-signalled: the first `wait` for a frame slot must not block (spec §5 "frame 0
    /// begins immediately, no history to wait on").
    pub(crate) fn new_signalled(device: Arc<DeviceShared>) -> Result<Self> {
        let create_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let raw = unsafe { device.raw.create_fence(&create_info, None)? };
        Ok(Self { raw, device })
    }

    pub(crate) fn wait(&self) -> Result<()> {
        unsafe { self.device.raw.wait_for_fences(&[self.raw], true, u64::MAX)? };
        Ok(())
    }

    /// `timeout_ns = 0` realizes `WaitMode::Poll` (spec §4.F): returns `Ok(false)` on
    /// `VK_TIMEOUT` instead of propagating it as an error.
    pub(crate) fn wait_timeout(&self, timeout_ns: u64) -> Result<bool> {
        match unsafe {
            self.device
                .raw
                .wait_for_fences(&[self.raw], true, timeout_ns)
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn reset(&self) -> Result<()> {
        unsafe { self.device.raw.reset_fences(&[self.raw])? };
        Ok(())
    }

    pub(crate) fn is_signalled(&self) -> Result<bool> {
        Ok(unsafe { self.device.raw.get_fence_status(self.raw)? })
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_fence(self.raw, None) };
    }
}

/// Per-frame-in-flight-slot synchronization (spec §5 `FrameSyncSet`): signalled when a swapchain
/// image has been acquired, when the queued transfer copy has completed (only meaningful under
/// `TransferMode::SeparateQueueFamily`), and a CPU-waitable fence bounding the frame's in-flight
/// GPU work.
pub(crate) struct FrameSyncSet {
    pub(crate) image_available: Semaphore,
    pub(crate) transfer_copy_done: Semaphore,
    pub(crate) in_flight: Fence,
}

impl FrameSyncSet {
    pub(crate) fn new(device: Arc<DeviceShared>) -> Result<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            transfer_copy_done: Semaphore::new(device.clone())?,
            in_flight: Fence::new_signalled(device)?,
        })
    }
}

/// Per-swapchain-image synchronization (spec §5 `ImageSyncSet`): signalled when rendering into
/// that image has finished (the present wait), and which frame slot's fence last wrote to it, so
/// a frame can wait on an image still owned by a previous in-flight frame before reusing it.
pub(crate) struct ImageSyncSet {
    pub(crate) render_finished: Semaphore,
    pub(crate) in_flight_frame: Option<usize>,
}

impl ImageSyncSet {
    pub(crate) fn new(device: Arc<DeviceShared>) -> Result<Self> {
        Ok(Self {
            render_finished: Semaphore::new(device)?,
            in_flight_frame: None,
        })
    }
}
