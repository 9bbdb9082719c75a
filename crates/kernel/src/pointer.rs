//! Hover and press tracking for pointer interaction with nodes.

use realm_common::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEventKind {
    Enter,
    Leave,
    Down,
    Up,
}

impl PointerEventKind {
    /// Event name delivered to scripts.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Enter => "pointerenter",
            Self::Leave => "pointerleave",
            Self::Down => "pointerdown",
            Self::Up => "pointerup",
        }
    }
}

/// Which interactive nodes the pointer is over and which received the
/// current press.
///
/// Chains run from the outermost interactive ancestor down to the node
/// directly under the pointer. The dispatch callback returns `true` when a
/// handler stopped propagation.
#[derive(Debug, Clone, Default)]
pub struct PointerState {
    hover: Vec<NodeId>,
    pressed: Vec<NodeId>,
}

impl PointerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hovered(&self) -> &[NodeId] {
        &self.hover
    }

    pub fn pressed(&self) -> &[NodeId] {
        &self.pressed
    }

    /// Move the pointer onto `chain`. Nodes no longer under the pointer get
    /// `Leave` deepest first, newly entered nodes get `Enter` outermost first.
    pub fn hover(
        &mut self,
        chain: Vec<NodeId>,
        mut dispatch: impl FnMut(NodeId, PointerEventKind) -> bool,
    ) {
        let shared = self
            .hover
            .iter()
            .zip(&chain)
            .take_while(|(a, b)| a == b)
            .count();
        for node in self.hover[shared..].iter().rev() {
            if dispatch(*node, PointerEventKind::Leave) {
                break;
            }
        }
        for node in &chain[shared..] {
            if dispatch(*node, PointerEventKind::Enter) {
                break;
            }
        }
        self.hover = chain;
    }

    /// Press on the hovered chain, deepest node first, until a handler stops
    /// propagation.
    pub fn press(&mut self, mut dispatch: impl FnMut(NodeId, PointerEventKind) -> bool) {
        self.pressed.clear();
        for node in self.hover.iter().rev() {
            self.pressed.push(*node);
            if dispatch(*node, PointerEventKind::Down) {
                break;
            }
        }
    }

    /// Release goes to every node that received the press.
    pub fn release(&mut self, mut dispatch: impl FnMut(NodeId, PointerEventKind) -> bool) {
        for node in std::mem::take(&mut self.pressed) {
            dispatch(node, PointerEventKind::Up);
        }
    }

    /// Forget a node that left the stage.
    pub fn forget(&mut self, node: NodeId) {
        if let Some(index) = self.hover.iter().position(|n| *n == node) {
            self.hover.truncate(index);
        }
        self.pressed.retain(|n| *n != node);
    }
}
