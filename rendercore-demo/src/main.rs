use std::time::Instant;

use anyhow::Result;
use nalgebra::Vector2;
use rendercore::color::Color;
use rendercore::engine::Engine;
use rendercore::frame::WaitMode;
use rendercore::pipeline::ShaderSet;
use rendercore::vulkan::vk;
use rendercore::window::Window;
use rendercore::{Dim2, RenderContext};
use winit::dpi;
use winit::event::{DeviceEvent, Event as WinitEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::WindowBuilder;

use rendercore::input::{self, Event as InputEvent, EventRing, KeyCode};

fn main() -> Result<()> {
    let env = env_logger::Env::default()
        .filter_or("RENDERCORE_LOG", "info")
        .write_style_or("RENDERCORE_LOG_STYLE", "always");
    env_logger::init_from_env(env);

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title("rendercore-demo")
        .with_inner_size(dpi::PhysicalSize::new(1280, 720))
        .build(&event_loop)?;

    let window_handle = window.window_handle()?.as_raw();
    let display_handle = window.display_handle()?.as_raw();

    let shaders = ShaderSet {
        vertex_2d: include_bytes!("../shaders/shape2d.vert.spv"),
        fragment_2d: include_bytes!("../shaders/shape2d.frag.spv"),
        vertex_3d: include_bytes!("../shaders/shape3d.vert.spv"),
        fragment_3d: include_bytes!("../shaders/shape3d.frag.spv"),
    };

    const FRAMES_IN_FLIGHT: u32 = 2;
    let engine = Engine::new(window_handle, display_handle, FRAMES_IN_FLIGHT, shaders)?;
    let mut render_window: Window<Dim2> =
        Window::new(&engine, window_handle, display_handle, vk::PresentModeKHR::FIFO)?;

    let mut ring = EventRing::new();
    let mut last_frame = Instant::now();
    let mut camera = rendercore::Camera2D::new();

    event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            WinitEvent::WindowEvent { event, .. } => {
                input::push_window_event(&mut ring, &event);
                match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::Resized(size) => {
                        render_window.notify_resized(vk::Extent2D { width: size.width, height: size.height });
                    }
                    WindowEvent::RedrawRequested => {
                        let now = Instant::now();
                        let dt = (now - last_frame).as_secs_f32();
                        last_frame = now;

                        apply_input(&mut ring, &mut camera, dt);

                        if let Err(error) = draw_frame(&mut render_window, &mut camera) {
                            log::error!("render_frame failed: {error:#}");
                        }
                    }
                    _ => {}
                }
            }
            WinitEvent::DeviceEvent { event: DeviceEvent::MouseMotion { delta }, .. } => {
                let _ = delta;
            }
            WinitEvent::AboutToWait => window.request_redraw(),
            _ => {}
        }
    })?;

    Ok(())
}

fn apply_input(ring: &mut EventRing, camera: &mut rendercore::Camera2D, dt: f32) {
    let mut controls = rendercore::camera::PlanarMovementInput::default();
    for event in ring.drain() {
        match event {
            InputEvent::KeyPressed(KeyCode::W) | InputEvent::KeyRepeat(KeyCode::W) => controls.move_up = true,
            InputEvent::KeyPressed(KeyCode::S) | InputEvent::KeyRepeat(KeyCode::S) => controls.move_down = true,
            InputEvent::KeyPressed(KeyCode::A) | InputEvent::KeyRepeat(KeyCode::A) => controls.move_left = true,
            InputEvent::KeyPressed(KeyCode::D) | InputEvent::KeyRepeat(KeyCode::D) => controls.move_right = true,
            InputEvent::KeyPressed(KeyCode::Left) => controls.rotate_counter_clockwise = true,
            InputEvent::KeyPressed(KeyCode::Right) => controls.rotate_clockwise = true,
            InputEvent::Scrolled(offset) => {
                camera.control_scroll_with_user_input(Vector2::new(640.0, 360.0), offset.y * 0.1);
            }
            _ => {}
        }
    }
    camera.control_movement_with_user_input(&controls, dt);
}

fn draw_frame(window: &mut Window<Dim2>, camera: &mut rendercore::Camera2D) -> Result<()> {
    let extent = window.frame_extent();
    camera.set_framebuffer_extent(extent.width, extent.height);

    {
        let context: &RenderContext<Dim2> = window.context();
        context.push();
        context.set_fill(true);
        context.set_color(Color(0xffffffff));
        context.square();
        context.pop()?;
    }

    let camera_info = camera.create_camera_info();
    window.render_frame(WaitMode::Block, true, &[camera_info], 1)?;
    Ok(())
}
