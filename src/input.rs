use bitflags::bitflags;
use glam::Vec2;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, TouchPhase as WinitTouchPhase, WindowEvent};

/// Pixels one wheel "line" is worth when the platform reports line deltas.
const LINE_DELTA_PIXELS: f32 = 100.0;

bitflags! {
    /// Event categories a mounted viewport listens to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Listeners: u8 {
        const RESIZE = 1 << 0;
        const POINTER = 1 << 1;
        const WHEEL = 1 << 2;
        const TOUCH = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerButton {
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Started,
    Moved,
    Ended,
}

/// Host-independent pointer, wheel and touch input in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    ButtonDown { button: PointerButton, position: Vec2 },
    ButtonUp { button: PointerButton, position: Vec2 },
    Moved { position: Vec2 },
    /// Positive values scroll towards the user (zoom out).
    Wheel { delta_y: f32 },
    Touch { id: u64, phase: TouchPhase, position: Vec2 },
}

impl PointerEvent {
    pub fn listener(&self) -> Listeners {
        match self {
            PointerEvent::ButtonDown { .. } | PointerEvent::ButtonUp { .. } | PointerEvent::Moved { .. } => {
                Listeners::POINTER
            }
            PointerEvent::Wheel { .. } => Listeners::WHEEL,
            PointerEvent::Touch { .. } => Listeners::TOUCH,
        }
    }
}

/// Translates winit window events into [`PointerEvent`]s, tracking the cursor position that
/// winit omits from button events.
#[derive(Debug, Default)]
pub struct PointerInput {
    cursor: Option<Vec2>,
}

impl PointerInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor_position(&self) -> Option<Vec2> {
        self.cursor
    }

    pub fn translate(&mut self, event: &WindowEvent) -> Option<PointerEvent> {
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                let position = Vec2::new(position.x as f32, position.y as f32);
                self.cursor = Some(position);
                Some(PointerEvent::Moved { position })
            }
            WindowEvent::CursorLeft { .. } => {
                self.cursor = None;
                None
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = map_button(*button)?;
                let position = self.cursor.unwrap_or(Vec2::ZERO);
                Some(match state {
                    ElementState::Pressed => PointerEvent::ButtonDown { button, position },
                    ElementState::Released => PointerEvent::ButtonUp { button, position },
                })
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let delta_y = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -*y * LINE_DELTA_PIXELS,
                    MouseScrollDelta::PixelDelta(pos) => -pos.y as f32,
                };
                if delta_y == 0.0 {
                    None
                } else {
                    Some(PointerEvent::Wheel { delta_y })
                }
            }
            WindowEvent::Touch(touch) => {
                let phase = match touch.phase {
                    WinitTouchPhase::Started => TouchPhase::Started,
                    WinitTouchPhase::Moved => TouchPhase::Moved,
                    WinitTouchPhase::Ended | WinitTouchPhase::Cancelled => TouchPhase::Ended,
                };
                let position = Vec2::new(touch.location.x as f32, touch.location.y as f32);
                Some(PointerEvent::Touch { id: touch.id, phase, position })
            }
            _ => None,
        }
    }
}

fn map_button(button: MouseButton) -> Option<PointerButton> {
    match button {
        MouseButton::Left => Some(PointerButton::Left),
        MouseButton::Middle => Some(PointerButton::Middle),
        MouseButton::Right => Some(PointerButton::Right),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_categories_map_to_listeners() {
        let down = PointerEvent::ButtonDown { button: PointerButton::Left, position: Vec2::ZERO };
        assert_eq!(down.listener(), Listeners::POINTER);
        assert_eq!(PointerEvent::Wheel { delta_y: 1.0 }.listener(), Listeners::WHEEL);
        let touch = PointerEvent::Touch { id: 0, phase: TouchPhase::Started, position: Vec2::ZERO };
        assert_eq!(touch.listener(), Listeners::TOUCH);
    }

    #[test]
    fn unsupported_buttons_are_dropped() {
        assert_eq!(map_button(MouseButton::Back), None);
        assert_eq!(map_button(MouseButton::Other(7)), None);
        assert_eq!(map_button(MouseButton::Right), Some(PointerButton::Right));
    }
}
