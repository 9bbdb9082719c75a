use realm_common::EntityId;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A world bus event.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub name: String,
    pub data: Value,
}

/// Cross-entity notifications (`player`, `enter`, `leave`, `chat`, and
/// whatever apps emit).
///
/// Emitting only queues. The world flushes the queue once per frame, so a
/// listener never runs inside the emitter's call.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: BTreeMap<String, BTreeSet<EntityId>>,
    queue: VecDeque<BusEvent>,
    /// Emits per event name over the session.
    emitted: BTreeMap<String, usize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, name: &str, entity: &EntityId) {
        self.subscribers
            .entry(name.to_string())
            .or_default()
            .insert(entity.clone());
    }

    pub fn off(&mut self, name: &str, entity: &EntityId) {
        if let Some(set) = self.subscribers.get_mut(name) {
            set.remove(entity);
            if set.is_empty() {
                self.subscribers.remove(name);
            }
        }
    }

    /// Drop every subscription held by `entity`.
    pub fn off_all(&mut self, entity: &EntityId) {
        self.subscribers.retain(|_, set| {
            set.remove(entity);
            !set.is_empty()
        });
    }

    pub fn emit(&mut self, name: &str, data: Value) {
        tracing::trace!(event = name, "bus emit");
        let event = BusEvent {
            name: name.to_string(),
            data,
        };
        *self.emitted.entry(event.name.clone()).or_default() += 1;
        self.queue.push_back(event);
    }

    pub fn subscribers(&self, name: &str) -> Vec<EntityId> {
        self.subscribers
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn next(&mut self) -> Option<BusEvent> {
        self.queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// How many `name` events were emitted, delivered or not.
    pub fn emitted(&self, name: &str) -> usize {
        self.emitted.get(name).copied().unwrap_or_default()
    }
}
