use crate::Network;
use crate::message::NetMessage;
use realm_common::PeerId;
use std::cell::RefCell;
use std::rc::Rc;

/// Who an outbound message was addressed to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Broadcast { exclude: Option<PeerId> },
    Peer(PeerId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub message: NetMessage,
}

/// Transport that records what would have been sent.
///
/// Clones share the outbox, so a handle kept by a test or tool still sees
/// traffic after the original moved into a world.
#[derive(Debug, Clone)]
pub struct LoopbackNetwork {
    id: PeerId,
    server: bool,
    time: f64,
    outbox: Rc<RefCell<Vec<Outbound>>>,
}

impl LoopbackNetwork {
    pub fn client(id: impl Into<PeerId>) -> Self {
        Self::new(id.into(), false)
    }

    pub fn server(id: impl Into<PeerId>) -> Self {
        Self::new(id.into(), true)
    }

    fn new(id: PeerId, server: bool) -> Self {
        Self {
            id,
            server,
            time: 0.0,
            outbox: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.outbox.borrow().clone()
    }

    pub fn take_sent(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.outbox.borrow_mut())
    }

    /// Number of recorded messages with the given wire name.
    pub fn count(&self, name: &str) -> usize {
        self.outbox
            .borrow()
            .iter()
            .filter(|o| o.message.name() == name)
            .count()
    }
}

impl Network for LoopbackNetwork {
    fn id(&self) -> &PeerId {
        &self.id
    }

    fn is_server(&self) -> bool {
        self.server
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn update(&mut self, dt: f64) {
        self.time += dt;
    }

    fn send(&mut self, message: NetMessage, exclude: Option<&PeerId>) {
        tracing::trace!(name = message.name(), "send");
        self.outbox.borrow_mut().push(Outbound {
            target: Target::Broadcast {
                exclude: exclude.cloned(),
            },
            message,
        });
    }

    fn send_to(&mut self, peer: &PeerId, message: NetMessage) {
        tracing::trace!(name = message.name(), %peer, "send_to");
        self.outbox.borrow_mut().push(Outbound {
            target: Target::Peer(peer.clone()),
            message,
        });
    }
}
