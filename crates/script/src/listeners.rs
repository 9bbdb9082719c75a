use crate::is_hot_event;
use std::collections::BTreeSet;

/// Event names a script has subscribed to on its own entity.
#[derive(Debug, Clone, Default)]
pub struct Listeners {
    names: BTreeSet<String>,
    hot: usize,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe; returns false if already subscribed.
    pub fn on(&mut self, name: &str) -> bool {
        if !self.names.insert(name.to_string()) {
            return false;
        }
        if is_hot_event(name) {
            self.hot += 1;
        }
        true
    }

    /// Unsubscribe; returns false if not subscribed.
    pub fn off(&mut self, name: &str) -> bool {
        if !self.names.remove(name) {
            return false;
        }
        if is_hot_event(name) {
            self.hot -= 1;
        }
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Whether any per-frame phase is subscribed.
    pub fn is_hot(&self) -> bool {
        self.hot > 0
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.hot = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
