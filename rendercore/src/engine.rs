//! Engine (spec §9 "Global engine state"). Owns the instance/device, the two fixed-catalog
//! primitive buffers (one per dimension, spec §4.A), and the pipeline catalog (spec §4.B) — every
//! piece of state the ownership table marks "created once at engine init; released on shutdown
//! after device idle", as opposed to the per-window `Renderer`/`FrameScheduler`/`RenderContext`
//! triple (spec line 77).

use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::catalog::{CatalogVertex, PrimitiveCatalog};
use crate::dim::{Dim2, Dim3, Dimension};
use crate::pipeline::{PipelineCatalog, ShaderSet};
use crate::vulkan::{
    device::Device,
    swapchain::{negotiate_surface_format, Surface},
};

/// Engine construction needs one real window/display handle up front: `Device::new` uses it to
/// probe present support during physical-device selection, and the pipeline catalog (spec §4.B)
/// needs a concrete color attachment format before its first pipeline can be built. Every
/// [`crate::window::Window`] opened afterwards is assumed to negotiate the same swap chain surface
/// format — true in practice for windows opened against the same physical device and display
/// server, and the only way to honor spec §4.B's "created once at engine init" on top of a format
/// that Vulkan only exposes per-surface.
pub struct Engine {
    device: Arc<Device>,
    catalog_2d: PrimitiveCatalog<Dim2>,
    catalog_3d: PrimitiveCatalog<Dim3>,
    /// Guarded rather than plain `&mut`-accessed: spec §5 allows one render thread per
    /// [`crate::window::Window`], and the pipeline cache's "build on first request" miss path
    /// (spec §4.B) is the one piece of engine-wide state two windows' render threads can touch
    /// concurrently. Mirrors `Device`'s own `parking_lot::Mutex`-guarded caches
    /// (`vulkan/device.rs`'s `allocator`/`resource_hub`).
    pipelines: Mutex<PipelineCatalog>,
}

impl Engine {
    pub fn new(
        window_handle: RawWindowHandle,
        display_handle: RawDisplayHandle,
        frames_in_flight: u32,
        shaders: ShaderSet,
    ) -> Result<Arc<Self>> {
        let device = Device::new(window_handle, display_handle, frames_in_flight)
            .context("bringing up the Vulkan device")?;

        let catalog_2d = PrimitiveCatalog::<Dim2>::build(&device).context("building 2D primitive catalog")?;
        let catalog_3d = PrimitiveCatalog::<Dim3>::build(&device).context("building 3D primitive catalog")?;

        let color_attachment_format = Self::probe_color_attachment_format(&device, window_handle, display_handle)
            .context("probing swap chain surface format")?;
        let pipelines = Mutex::new(PipelineCatalog::new(device.clone(), shaders, color_attachment_format));

        Ok(Arc::new(Self {
            device,
            catalog_2d,
            catalog_3d,
            pipelines,
        }))
    }

    /// Creates and immediately tears down a throwaway surface, mirroring `Device::new`'s own
    /// probe-surface idiom, purely to learn the format [`crate::vulkan::swapchain::SwapChain::new`]
    /// would negotiate for a real window against this physical device.
    fn probe_color_attachment_format(
        device: &Arc<Device>,
        window_handle: RawWindowHandle,
        display_handle: RawDisplayHandle,
    ) -> Result<vk::Format> {
        let surface = Surface::new(device.entry(), device.instance(), display_handle, window_handle)
            .context("creating probe surface")?;
        let surface_format =
            negotiate_surface_format(device.surface_loader(), device.physical_device_raw(), &surface)?;
        Ok(surface_format.format)
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn catalog_2d(&self) -> &PrimitiveCatalog<Dim2> {
        &self.catalog_2d
    }

    pub fn catalog_3d(&self) -> &PrimitiveCatalog<Dim3> {
        &self.catalog_3d
    }

    pub fn lock_pipelines(&self) -> MutexGuard<'_, PipelineCatalog> {
        self.pipelines.lock()
    }
}

/// Picks this dimension's primitive catalog out of an [`Engine`] (spec §4.A: "one set per D"),
/// mirroring [`CatalogVertex`]'s own per-dimension dispatch so [`crate::window::Window<D>`] can
/// fetch the right catalog without matching on `D::IS_3D`.
pub trait EngineCatalog: Dimension + CatalogVertex {
    fn catalog(engine: &Engine) -> &PrimitiveCatalog<Self>;
}

impl EngineCatalog for Dim2 {
    fn catalog(engine: &Engine) -> &PrimitiveCatalog<Dim2> {
        engine.catalog_2d()
    }
}

impl EngineCatalog for Dim3 {
    fn catalog(engine: &Engine) -> &PrimitiveCatalog<Dim3> {
        engine.catalog_3d()
    }
}

// No explicit `Drop` impl: field drop order already tears down the pipeline catalog and both
// primitive catalogs before `device`, and `Device`'s own `Drop` runs the deletion queue in
// reverse-insertion order after one final `device_wait_idle` (spec §9).
