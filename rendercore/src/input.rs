//! Input events (spec §6 "Events (input)"). A fixed enum the application builds by translating
//! `winit::event::{WindowEvent, DeviceEvent}` as they arrive, pushed into a bounded per-window ring
//! and drained once per frame. The camera's `control_*_with_user_input` methods (`camera.rs`) don't
//! depend on this module or on winit directly — the application is expected to fold a frame's worth
//! of [`Event`]s into a [`crate::camera::PlanarMovementInput`]/[`crate::camera::SpatialMovementInput`]
//! itself, the way `control_movement_with_user_input`'s doc comments describe.

use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::PhysicalKey;

/// Ring capacity per window (spec §6 "bounded per-window ring (≤ 32)").
pub const RING_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MousePosition {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollOffset {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPosition {
    pub x: i32,
    pub y: i32,
}

/// Fixed action-type enum (spec §6). Each variant carries the tagged payload spec §6 names for it
/// (key code, mouse position, window-dimensions pair, scroll offsets, codepoint) and nothing else —
/// there is no generic "raw winit event" escape hatch, so downstream code never needs to match on a
/// windowing crate's own event type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    KeyPressed(KeyCode),
    KeyReleased(KeyCode),
    KeyRepeat(KeyCode),
    MousePressed(MouseButton),
    MouseReleased(MouseButton),
    MouseMoved(MousePosition),
    MouseEntered,
    MouseLeft,
    Scrolled(ScrollOffset),
    WindowResized(WindowSize),
    WindowMoved(WindowPosition),
    WindowFocused,
    WindowUnfocused,
    WindowClosed,
    WindowOpened,
    WindowMinimized,
    WindowRestored,
    FramebufferResized(WindowSize),
    SwapChainRecreated,
    CharInput(char),
}

/// Physical key code, decoupled from winit's own `PhysicalKey`/`KeyCode` so [`Event`] stays a
/// windowing-crate-agnostic value type. Only the keys `control_movement_with_user_input` (spec
/// §4.H) actually reads are named individually; everything else collapses to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    W,
    A,
    S,
    D,
    Up,
    Down,
    Left,
    Right,
    Space,
    Escape,
    Other(u32),
}

impl From<PhysicalKey> for KeyCode {
    fn from(key: PhysicalKey) -> Self {
        use winit::keyboard::KeyCode as WinitKeyCode;
        match key {
            PhysicalKey::Code(code) => match code {
                WinitKeyCode::KeyW => KeyCode::W,
                WinitKeyCode::KeyA => KeyCode::A,
                WinitKeyCode::KeyS => KeyCode::S,
                WinitKeyCode::KeyD => KeyCode::D,
                WinitKeyCode::ArrowUp => KeyCode::Up,
                WinitKeyCode::ArrowDown => KeyCode::Down,
                WinitKeyCode::ArrowLeft => KeyCode::Left,
                WinitKeyCode::ArrowRight => KeyCode::Right,
                WinitKeyCode::Space => KeyCode::Space,
                WinitKeyCode::Escape => KeyCode::Escape,
                other => KeyCode::Other(other as u32),
            },
            PhysicalKey::Unidentified(_) => KeyCode::Other(u32::MAX),
        }
    }
}

/// Bounded per-window event queue (spec §6). OS callbacks push via [`Self::push`]; the application
/// drains the whole ring once per frame with [`Self::drain`]. A full ring drops the oldest entry
/// rather than the newest one, so a frame that runs long still sees the most recent input.
#[derive(Debug, Default)]
pub struct EventRing {
    events: std::collections::VecDeque<Event>,
}

impl EventRing {
    pub fn new() -> Self {
        Self { events: std::collections::VecDeque::with_capacity(RING_CAPACITY) }
    }

    pub fn push(&mut self, event: Event) {
        if self.events.len() == RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Drains the ring in arrival order. Called once per frame (spec §6 "flushed each frame").
    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, Event> {
        self.events.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Translates one `winit::event::WindowEvent` into zero or more [`Event`]s and pushes them into
/// `ring`. `WindowEvent::RedrawRequested`/`CloseRequested` are left for the application's own event
/// loop to act on directly (spec treats the main loop and OS windowing as an external collaborator);
/// `CloseRequested` still yields [`Event::WindowClosed`] here so code only watching the ring sees it.
pub fn push_window_event(ring: &mut EventRing, event: &WindowEvent) {
    match event {
        WindowEvent::KeyboardInput { event: key_event, .. } => push_key_event(ring, key_event),
        WindowEvent::MouseInput { state, button, .. } => ring.push(match state {
            ElementState::Pressed => Event::MousePressed(*button),
            ElementState::Released => Event::MouseReleased(*button),
        }),
        WindowEvent::CursorMoved { position, .. } => ring.push(Event::MouseMoved(MousePosition {
            x: position.x as f32,
            y: position.y as f32,
        })),
        WindowEvent::CursorEntered { .. } => ring.push(Event::MouseEntered),
        WindowEvent::CursorLeft { .. } => ring.push(Event::MouseLeft),
        WindowEvent::MouseWheel { delta, .. } => ring.push(Event::Scrolled(scroll_offset(*delta))),
        WindowEvent::Resized(size) => {
            let size = WindowSize { width: size.width, height: size.height };
            ring.push(Event::WindowResized(size));
            ring.push(Event::FramebufferResized(size));
        }
        WindowEvent::Moved(position) => {
            ring.push(Event::WindowMoved(WindowPosition { x: position.x, y: position.y }))
        }
        WindowEvent::Focused(true) => ring.push(Event::WindowFocused),
        WindowEvent::Focused(false) => ring.push(Event::WindowUnfocused),
        WindowEvent::CloseRequested | WindowEvent::Destroyed => ring.push(Event::WindowClosed),
        WindowEvent::Occluded(true) => ring.push(Event::WindowMinimized),
        WindowEvent::Occluded(false) => ring.push(Event::WindowRestored),
        WindowEvent::ScaleFactorChanged { .. } => {}
        _ => {}
    }
}

fn push_key_event(ring: &mut EventRing, key_event: &KeyEvent) {
    let code = KeyCode::from(key_event.physical_key);
    match key_event.state {
        ElementState::Pressed if key_event.repeat => ring.push(Event::KeyRepeat(code)),
        ElementState::Pressed => ring.push(Event::KeyPressed(code)),
        ElementState::Released => ring.push(Event::KeyReleased(code)),
    }
    if let Some(text) = &key_event.text {
        for ch in text.chars() {
            ring.push(Event::CharInput(ch));
        }
    }
}

/// Translates mouse-delta `DeviceEvent`s, the source for `SpatialMovementInput::mouse_delta`'s
/// look-around mode (spec §4.H "in 3D adds a look-around mode using mouse delta"). Returned
/// directly rather than pushed through [`Event`]: accumulated deltas, not discrete events, are what
/// the 3D camera control method consumes.
pub fn mouse_delta(event: &DeviceEvent) -> Option<(f64, f64)> {
    match event {
        DeviceEvent::MouseMotion { delta } => Some(*delta),
        _ => None,
    }
}

fn scroll_offset(delta: MouseScrollDelta) -> ScrollOffset {
    match delta {
        MouseScrollDelta::LineDelta(x, y) => ScrollOffset { x, y },
        MouseScrollDelta::PixelDelta(position) => {
            ScrollOffset { x: position.x as f32, y: position.y as f32 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_when_full() {
        let mut ring = EventRing::new();
        for _ in 0..RING_CAPACITY {
            ring.push(Event::WindowFocused);
        }
        ring.push(Event::WindowUnfocused);
        let drained: Vec<_> = ring.drain().collect();
        assert_eq!(drained.len(), RING_CAPACITY);
        assert_eq!(drained[RING_CAPACITY - 1], Event::WindowUnfocused);
    }

    #[test]
    fn drain_empties_ring() {
        let mut ring = EventRing::new();
        ring.push(Event::MouseEntered);
        ring.push(Event::MouseLeft);
        assert_eq!(ring.drain().count(), 2);
        assert!(ring.is_empty());
    }

    #[test]
    fn resized_yields_both_window_and_framebuffer_events() {
        let mut ring = EventRing::new();
        push_window_event(
            &mut ring,
            &WindowEvent::Resized(winit::dpi::PhysicalSize::new(800, 600)),
        );
        let drained: Vec<_> = ring.drain().collect();
        assert_eq!(
            drained,
            vec![
                Event::WindowResized(WindowSize { width: 800, height: 600 }),
                Event::FramebufferResized(WindowSize { width: 800, height: 600 }),
            ]
        );
    }
}
