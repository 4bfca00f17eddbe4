//! Rendering core of an immediate-mode 2D/3D graphics engine built atop Vulkan.
//!
//! [`engine::Engine`] owns the device and the state created once at init (primitive catalogs,
//! pipeline catalog); [`window::Window`] owns everything per-window (frame scheduler, renderer,
//! render context). Applications drive a frame via [`window::Window::render_frame`] and issue draws
//! in between through [`context::RenderContext`].

pub mod batch;
pub mod camera;
pub mod catalog;
pub mod color;
pub mod context;
pub mod dim;
pub mod engine;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod gui;
pub mod input;
pub mod instance;
pub mod light;
pub mod pipeline;
pub mod polygon;
pub mod renderer;
pub mod vulkan;
pub mod window;

pub use camera::{Camera2D, Camera3D, CameraInfo};
pub use context::RenderContext;
pub use dim::{Dim2, Dim3, Dimension};
pub use engine::Engine;
pub use error::{Error, Result};
pub use frame::{FrameScheduler, WaitMode};
pub use window::Window;
