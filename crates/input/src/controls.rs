use glam::Vec2;
use std::collections::BTreeSet;

/// Logical buttons. Device layers map keys, touch buttons and controller
/// inputs onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Button {
    Forward,
    Back,
    Left,
    Right,
    Jump,
    /// Fly downwards.
    Descend,
    Run,
    PointerPrimary,
    PointerSecondary,
}

/// Input as sampled for one frame.
#[derive(Debug, Clone, Default)]
pub struct ControlState {
    down: BTreeSet<Button>,
    pressed: BTreeSet<Button>,
    released: BTreeSet<Button>,
    pub pointer_locked: bool,
    /// Mouse movement this frame, in pixels.
    pub pointer_delta: Vec2,
    /// Touch drag this frame, in pixels.
    pub pan_delta: Vec2,
    pub scroll_delta: f32,
    /// Virtual stick, x right and y forward, length 0..=1.
    pub stick: Vec2,
    /// XR move thumbstick, same axes as `stick`.
    pub xr_move: Vec2,
    /// XR turn thumbstick x axis.
    pub xr_turn: f32,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, button: Button) {
        if self.down.insert(button) {
            self.pressed.insert(button);
        }
    }

    pub fn release(&mut self, button: Button) {
        if self.down.remove(&button) {
            self.released.insert(button);
        }
    }

    pub fn is_down(&self, button: Button) -> bool {
        self.down.contains(&button)
    }

    /// Went down this frame.
    pub fn was_pressed(&self, button: Button) -> bool {
        self.pressed.contains(&button)
    }

    /// Went up this frame.
    pub fn was_released(&self, button: Button) -> bool {
        self.released.contains(&button)
    }

    /// Keyboard movement axes, x right and y forward.
    pub fn key_axes(&self) -> Vec2 {
        let mut axes = Vec2::ZERO;
        if self.is_down(Button::Forward) {
            axes.y += 1.0;
        }
        if self.is_down(Button::Back) {
            axes.y -= 1.0;
        }
        if self.is_down(Button::Right) {
            axes.x += 1.0;
        }
        if self.is_down(Button::Left) {
            axes.x -= 1.0;
        }
        axes
    }

    /// Clear per-frame edges and deltas. Held buttons stay down.
    pub fn end_frame(&mut self) {
        self.pressed.clear();
        self.released.clear();
        self.pointer_delta = Vec2::ZERO;
        self.pan_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }

    /// Release everything, e.g. when the window loses focus.
    pub fn clear(&mut self) {
        let held: Vec<Button> = self.down.iter().copied().collect();
        for button in held {
            self.release(button);
        }
        self.stick = Vec2::ZERO;
        self.xr_move = Vec2::ZERO;
        self.xr_turn = 0.0;
        tracing::trace!("controls cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_edges_last_one_frame() {
        let mut c = ControlState::new();
        c.press(Button::Jump);
        assert!(c.was_pressed(Button::Jump));
        assert!(c.is_down(Button::Jump));
        c.end_frame();
        assert!(!c.was_pressed(Button::Jump));
        assert!(c.is_down(Button::Jump));
    }

    #[test]
    fn repeated_press_is_not_a_new_edge() {
        let mut c = ControlState::new();
        c.press(Button::Forward);
        c.end_frame();
        c.press(Button::Forward);
        assert!(!c.was_pressed(Button::Forward));
    }

    #[test]
    fn key_axes_cancel_out() {
        let mut c = ControlState::new();
        c.press(Button::Forward);
        c.press(Button::Back);
        c.press(Button::Right);
        assert_eq!(c.key_axes(), Vec2::new(1.0, 0.0));
    }

    #[test]
    fn end_frame_resets_deltas() {
        let mut c = ControlState::new();
        c.pointer_delta = Vec2::new(3.0, 4.0);
        c.scroll_delta = 1.0;
        c.end_frame();
        assert_eq!(c.pointer_delta, Vec2::ZERO);
        assert_eq!(c.scroll_delta, 0.0);
    }

    #[test]
    fn clear_releases_held_buttons() {
        let mut c = ControlState::new();
        c.press(Button::Run);
        c.end_frame();
        c.clear();
        assert!(!c.is_down(Button::Run));
        assert!(c.was_released(Button::Run));
    }
}
