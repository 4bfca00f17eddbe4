//! Crate-level error type.
//!
//! Internal Vulkan plumbing (`vulkan::resource`, `vulkan::device`) keeps using
//! `anyhow::Result` the way the original wrapper does; the cross-module surface
//! (`Renderer`, `FrameScheduler`, `RenderContext`) returns this `Error` instead so
//! callers can match on the recoverable/fatal distinction described in the design.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The logical device was lost. The caller is not notified unless the
    /// subsequent surface/device recreation itself fails.
    #[error("device lost")]
    DeviceLost,

    /// The presentation surface was lost and could not be recreated.
    #[error("surface lost: {0}")]
    SurfaceLost(String),

    /// The swap chain is out of date with the surface and must be recreated.
    #[error("swap chain out of date")]
    OutOfDate,

    /// The swap chain is usable but suboptimal for the surface.
    #[error("swap chain suboptimal")]
    Suboptimal,

    /// Host or device memory allocation failed. Fatal.
    #[error("out of memory ({0})")]
    OutOfMemory(&'static str),

    /// Fatal at init time.
    #[error("shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Fatal at init time (shader or asset load).
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Push/pop imbalance, draw before begin, draw after end. Debug-build
    /// assertion; in release this variant may simply not be constructed.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Catch-all for infra-level Vulkan errors (queue submit, fence wait,
    /// buffer allocation) that are fatal and not individually recoverable.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl From<ash::vk::Result> for Error {
    fn from(result: ash::vk::Result) -> Self {
        match result {
            ash::vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost,
            ash::vk::Result::ERROR_SURFACE_LOST_KHR => {
                Error::SurfaceLost("vkAcquireNextImageKHR/vkQueuePresentKHR".to_string())
            }
            ash::vk::Result::ERROR_OUT_OF_DATE_KHR => Error::OutOfDate,
            ash::vk::Result::SUBOPTIMAL_KHR => Error::Suboptimal,
            ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY => Error::OutOfMemory("host"),
            ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Error::OutOfMemory("device"),
            other => Error::Fatal(anyhow::anyhow!("unhandled vulkan result: {other:?}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
