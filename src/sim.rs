//! Deterministic in-memory driver for the protocol state machine.
//!
//! Every node is a plain `RaymondNode`; links are per-(sender, receiver)
//! FIFO queues and the resource guard is a set of pending releases. Each
//! step either delivers one message from the head of some link or releases
//! one critical-section occupant, chosen by the schedule. Safety is checked
//! after every step.

use std::collections::BTreeMap;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    common::{MutexError, NodeId},
    mutex::{
        message::{Action, Event, Message},
        state::{NodeSnapshot, RaymondNode},
    },
    network::Tree,
};

/// How the next step is picked among everything that is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Global send order.
    Oldest,
    /// Uniformly among link heads and pending releases.
    Random,
}

/// One message that reached its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: NodeId,
    pub to: NodeId,
    pub message: Message,
}

#[derive(Debug, Clone)]
enum Pending {
    Message(Delivery),
    Release(NodeId),
}

pub struct Simulator {
    nodes: BTreeMap<NodeId, RaymondNode>,
    pending: Vec<Pending>,
    trace: Vec<Delivery>,
    entries: Vec<NodeId>,
    schedule: Schedule,
    rng: StdRng,
}

impl Simulator {
    pub fn new(tree: &Tree, schedule: Schedule, seed: u64) -> Result<Self, MutexError> {
        let mut nodes = BTreeMap::new();
        for id in tree.nodes() {
            let mut node = RaymondNode::new(id);
            node.set_neighbors(tree.neighbors(id))?;
            nodes.insert(id, node);
        }
        Ok(Simulator {
            nodes,
            pending: Vec::new(),
            trace: Vec::new(),
            entries: Vec::new(),
            schedule,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn node(&self, id: NodeId) -> Result<&RaymondNode, MutexError> {
        self.nodes.get(&id).ok_or(MutexError::UnknownNode(id))
    }

    pub fn snapshot(&self, id: NodeId) -> Result<NodeSnapshot, MutexError> {
        self.node(id).map(RaymondNode::snapshot)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Messages delivered so far, in delivery order.
    pub fn trace(&self) -> &[Delivery] {
        &self.trace
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    /// Critical-section entries in the order they happened.
    pub fn entries(&self) -> &[NodeId] {
        &self.entries
    }

    pub fn using_nodes(&self) -> Vec<NodeId> {
        self.nodes.values().filter(|n| n.is_using()).map(RaymondNode::id).collect()
    }

    /// Hands `event` to node `id` as if it had just arrived.
    pub fn inject(&mut self, id: NodeId, event: Event) -> Result<(), MutexError> {
        let node = self.nodes.get_mut(&id).ok_or(MutexError::UnknownNode(id))?;
        let actions = node.handle(event);
        self.route(id, actions);
        self.check_safety()
    }

    pub fn initialize(&mut self, origin: NodeId) -> Result<(), MutexError> {
        self.inject(origin, Event::Initialize { origin: true, from: None })
    }

    pub fn enter(&mut self, id: NodeId) -> Result<(), MutexError> {
        self.inject(id, Event::Request { from: id })
    }

    pub fn crash(&mut self, id: NodeId) -> Result<(), MutexError> {
        self.inject(id, Event::SimulateCrash)
    }

    fn route(&mut self, from: NodeId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => {
                    self.pending.push(Pending::Message(Delivery { from, to, message }))
                }
                Action::AccessResource => {
                    self.entries.push(from);
                    self.pending.push(Pending::Release(from));
                }
            }
        }
    }

    /// Indices of pending items that may go next without breaking per-link
    /// FIFO order.
    fn ready(&self) -> Vec<usize> {
        let mut heads: Vec<(NodeId, NodeId)> = Vec::new();
        let mut ready = Vec::new();
        for (index, pending) in self.pending.iter().enumerate() {
            match pending {
                Pending::Message(delivery) => {
                    let link = (delivery.from, delivery.to);
                    if !heads.contains(&link) {
                        heads.push(link);
                        ready.push(index);
                    }
                }
                Pending::Release(_) => ready.push(index),
            }
        }
        ready
    }

    /// Performs one delivery or release. Returns false when nothing is
    /// pending.
    pub fn step(&mut self) -> Result<bool, MutexError> {
        let ready = self.ready();
        if ready.is_empty() {
            return Ok(false);
        }
        let index = match self.schedule {
            Schedule::Oldest => ready[0],
            Schedule::Random => ready[self.rng.gen_range(0..ready.len())],
        };

        match self.pending.remove(index) {
            Pending::Message(delivery) => {
                let event = Event::from_peer(delivery.from, delivery.message.clone());
                let to = delivery.to;
                self.trace.push(delivery);
                self.inject(to, event)?;
            }
            Pending::Release(id) => self.inject(id, Event::ExitCriticalSection)?,
        }
        Ok(true)
    }

    /// Steps until nothing is pending. Returns the number of steps taken.
    pub fn run_until_quiet(&mut self, max_steps: usize) -> Result<usize, MutexError> {
        let mut steps = 0;
        while self.step()? {
            steps += 1;
            if steps >= max_steps {
                return Err(MutexError::NoQuiescence(max_steps));
            }
        }
        Ok(steps)
    }

    fn check_safety(&self) -> Result<(), MutexError> {
        let using = self.using_nodes();
        if using.len() > 1 {
            return Err(MutexError::SafetyViolation(using));
        }
        Ok(())
    }

    /// Number of nodes that currently believe they hold the privilege.
    pub fn privilege_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.holder() == Some(n.id()))
            .count()
    }

    /// Follows holder pointers from `id` until a node that points at itself.
    pub fn privilege_location(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = id;
        for _ in 0..=self.nodes.len() {
            let holder = self.nodes.get(&cursor)?.holder()?;
            if holder == cursor {
                return Some(cursor);
            }
            cursor = holder;
        }
        None
    }
}
