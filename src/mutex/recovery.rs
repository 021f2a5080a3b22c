use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::common::NodeId;

use super::message::Event;

/// A neighbor's view of the edge it shares with a restarting node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Advisory {
    /// The advising node's holder is the restarting node.
    pub holder_is_recipient: bool,
    /// The advising node has an unanswered request toward its holder.
    pub asked: bool,
    /// The restarting node sits in the advising node's request queue.
    pub recipient_in_queue: bool,
}

impl Advisory {
    /// What a node with the given state tells `restarting`.
    pub fn describe(
        holder: Option<NodeId>,
        asked: bool,
        request_queue: &VecDeque<NodeId>,
        restarting: NodeId,
    ) -> Self {
        Advisory {
            holder_is_recipient: holder == Some(restarting),
            asked,
            recipient_in_queue: request_queue.contains(&restarting),
        }
    }
}

/// Protocol state rebuilt from a full set of advisories.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Reconstruction {
    pub holder: Option<NodeId>,
    pub asked: bool,
    pub request_queue: VecDeque<NodeId>,
}

/// Rebuilds holder, asked and the request queue of `me`.
///
/// A neighbor that points at us and has asked is a pending requester. The
/// one neighbor that does not point at us lies toward the privilege. If all
/// of them point at us, the privilege is here (or in flight to us).
pub fn reconstruct(me: NodeId, advisories: &BTreeMap<NodeId, Advisory>) -> Reconstruction {
    let mut rebuilt = Reconstruction {
        holder: None,
        asked: false,
        request_queue: VecDeque::new(),
    };

    for (&neighbor, advisory) in advisories {
        if advisory.holder_is_recipient {
            if advisory.asked && !rebuilt.request_queue.contains(&neighbor) {
                rebuilt.request_queue.push_back(neighbor);
            }
        } else if rebuilt.holder != Some(me) {
            rebuilt.holder = Some(neighbor);
            rebuilt.asked = advisory.recipient_in_queue;
        }
    }

    if advisories.values().all(|a| a.holder_is_recipient) {
        rebuilt.holder = Some(me);
        rebuilt.asked = false;
    }

    rebuilt
}

/// Bookkeeping that only exists while a node is recovering.
#[derive(Default, Debug)]
pub struct Recovery {
    active: bool,
    advisories: BTreeMap<NodeId, Advisory>,
    stash: VecDeque<Event>,
}

impl Recovery {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn begin(&mut self) {
        self.active = true;
        self.advisories.clear();
        self.stash.clear();
    }

    /// Defers an event until recovery completes, keeping arrival order.
    pub fn stash(&mut self, event: Event) {
        self.stash.push_back(event);
    }

    pub fn stashed(&self) -> usize {
        self.stash.len()
    }

    pub fn pending_advisories(&self) -> usize {
        self.advisories.len()
    }

    /// Records an advisory; a repeated advisory from the same neighbor
    /// replaces the earlier one.
    pub fn record(&mut self, from: NodeId, advisory: Advisory) {
        self.advisories.insert(from, advisory);
    }

    pub fn has_advised(&self, neighbor: NodeId) -> bool {
        self.advisories.contains_key(&neighbor)
    }

    pub fn is_complete(&self, neighbors: &BTreeSet<NodeId>) -> bool {
        neighbors.iter().all(|n| self.advisories.contains_key(n))
    }

    /// Ends recovery, returning the reconstruction and the deferred events
    /// in their original order.
    pub fn finish(&mut self, me: NodeId) -> (Reconstruction, Vec<Event>) {
        let rebuilt = reconstruct(me, &self.advisories);
        self.advisories.clear();
        self.active = false;
        (rebuilt, self.stash.drain(..).collect())
    }
}
