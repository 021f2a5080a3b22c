use std::collections::{BTreeSet, VecDeque};

use crate::common::{MutexError, NodeId};

use super::{
    message::{Action, Event, Message},
    recovery::{Advisory, Recovery},
};

/*
    Raymond's algorithm keeps one privilege on a static tree. Every node
    points its holder at the neighbor that lies toward the privilege (or at
    itself when it has it), queues requesters in arrival order, and keeps at
    most one request outstanding toward its holder.

    The machine is synchronous and owns no I/O: each handled event returns
    the actions a driver must perform. Control messages a node sends to
    itself are follow-up events, handled right after the event that produced
    them and before anything else reaches the node.
*/

pub struct RaymondNode {
    id: NodeId,
    neighbors: Option<BTreeSet<NodeId>>,
    holder: Option<NodeId>,
    using: bool,
    request_queue: VecDeque<NodeId>,
    asked: bool,
    recovery: Recovery,
    cs_entries: u64,
    follow_ups: Vec<Event>,
    actions: Vec<Action>,
}

/// Point-in-time copy of a node's protocol state.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub holder: Option<NodeId>,
    pub using: bool,
    pub request_queue: Vec<NodeId>,
    pub asked: bool,
    pub recovering: bool,
    pub pending_advisories: usize,
    pub stashed: usize,
    pub cs_entries: u64,
}

impl NodeSnapshot {
    pub fn holds_privilege(&self) -> bool {
        self.holder == Some(self.id)
    }
}

impl RaymondNode {
    pub fn new(id: NodeId) -> Self {
        RaymondNode {
            id,
            neighbors: None,
            holder: None,
            using: false,
            request_queue: VecDeque::new(),
            asked: false,
            recovery: Recovery::default(),
            cs_entries: 0,
            follow_ups: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn neighbors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.neighbors.iter().flatten().copied()
    }

    pub fn is_neighbor(&self, node: NodeId) -> bool {
        self.neighbors.as_ref().is_some_and(|n| n.contains(&node))
    }

    pub fn holder(&self) -> Option<NodeId> {
        self.holder
    }

    pub fn is_using(&self) -> bool {
        self.using
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.is_active()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id,
            holder: self.holder,
            using: self.using,
            request_queue: self.request_queue.iter().copied().collect(),
            asked: self.asked,
            recovering: self.recovery.is_active(),
            pending_advisories: self.recovery.pending_advisories(),
            stashed: self.recovery.stashed(),
            cs_entries: self.cs_entries,
        }
    }

    /// Fixes the neighbor set. Only the first assignment is accepted.
    pub fn set_neighbors(
        &mut self,
        neighbors: impl IntoIterator<Item = NodeId>,
    ) -> Result<(), MutexError> {
        if self.neighbors.is_some() {
            return Err(MutexError::NeighborsAlreadySet(self.id));
        }
        let neighbors: BTreeSet<NodeId> = neighbors.into_iter().filter(|n| *n != self.id).collect();
        log::info!("{}: neighbors set ({} peers)", self.id, neighbors.len());
        self.neighbors = Some(neighbors);
        Ok(())
    }

    /// Runs `event` and every follow-up it triggers to completion.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        let mut agenda = VecDeque::from([event]);
        while let Some(event) = agenda.pop_front() {
            self.dispatch(event);
            for follow_up in self.follow_ups.drain(..).rev() {
                agenda.push_front(follow_up);
            }
        }
        std::mem::take(&mut self.actions)
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Initialize { origin, from } => self.handle_initialize(origin, from),
            Event::Request { from } => self.handle_request(from),
            Event::Grant { from } => self.handle_grant(from),
            Event::InvokePrivilegeForward => self.forward_privilege(),
            Event::EnterCriticalSection => self.enter_critical_section(),
            Event::ExitCriticalSection => self.exit_critical_section(),
            Event::SimulateCrash => self.simulate_crash(),
            Event::Restart { from } => self.handle_restart(from),
            Event::Advise { from, advisory } => self.handle_advise(from, advisory),
        }
    }

    fn send(&mut self, to: NodeId, message: Message) {
        log::debug!("{} -> {}: {}", self.id, to, message.kind());
        self.actions.push(Action::Send { to, message });
    }

    fn holds_privilege(&self) -> bool {
        self.holder == Some(self.id)
    }

    fn handle_initialize(&mut self, origin: bool, from: Option<NodeId>) {
        if self.recovery.is_active() {
            log::warn!("{}: initialize ignored while recovering", self.id);
            return;
        }
        if self.holder.is_some() {
            log::debug!("{}: already initialized, flood stops here", self.id);
            return;
        }

        self.holder = match (origin, from) {
            (true, _) => Some(self.id),
            (false, Some(sender)) if self.is_neighbor(sender) => Some(sender),
            (false, sender) => {
                log::warn!("{}: non-origin initialize from unexpected sender {:?}", self.id, sender);
                return;
            }
        };
        log::info!("{}: initialized, holder is {:?}", self.id, self.holder);

        let neighbors: Vec<NodeId> = self.neighbors().collect();
        for neighbor in neighbors {
            self.send(neighbor, Message::Initialize);
        }

        // requests that raced ahead of the flood
        self.resume_pending_demand();
    }

    fn handle_request(&mut self, requester: NodeId) {
        if self.recovery.is_active() {
            log::debug!("{}: deferring request from {} until recovered", self.id, requester);
            self.recovery.stash(Event::Request { from: requester });
            return;
        }

        if !self.request_queue.contains(&requester) {
            self.request_queue.push_back(requester);
        }

        match self.holder {
            None => {
                log::warn!("{}: request from {} queued before initialization", self.id, requester);
            }
            Some(holder) if holder != self.id => self.make_request(),
            Some(_) if self.using => {}
            Some(_) => {
                if requester == self.id && self.request_queue.front() == Some(&self.id) {
                    // idle privilege already here and we are next in line
                    self.receive_privilege();
                } else {
                    self.follow_ups.push(Event::InvokePrivilegeForward);
                }
            }
        }
    }

    /// Sends one request toward the holder if demand exists and none is
    /// outstanding.
    fn make_request(&mut self) {
        let Some(holder) = self.holder else {
            return;
        };
        if holder != self.id && !self.request_queue.is_empty() && !self.asked {
            self.asked = true;
            self.send(holder, Message::RequestToken);
        }
    }

    fn handle_grant(&mut self, from: NodeId) {
        if self.recovery.is_active() {
            if self.recovery.has_advised(from) {
                log::debug!("{}: deferring grant from {} until recovered", self.id, from);
                self.recovery.stash(Event::Grant { from });
            } else {
                // sent before the sender saw our restart; its advisory will
                // already point at us
                log::debug!("{}: grant from {} is covered by its advisory", self.id, from);
            }
            return;
        }
        if self.holds_privilege() {
            log::warn!("{}: grant from {} while already holding the privilege", self.id, from);
        }
        log::info!("{}: received privilege from {}", self.id, from);
        self.receive_privilege();
    }

    fn receive_privilege(&mut self) {
        self.holder = Some(self.id);
        self.asked = false;

        match self.request_queue.front() {
            Some(&head) if head == self.id => {
                self.request_queue.pop_front();
                self.using = true;
                self.follow_ups.push(Event::EnterCriticalSection);
            }
            Some(_) => self.follow_ups.push(Event::InvokePrivilegeForward),
            None => {
                log::warn!("{}: privilege received with an empty request queue", self.id);
            }
        }
    }

    fn forward_privilege(&mut self) {
        if self.recovery.is_active() {
            self.recovery.stash(Event::InvokePrivilegeForward);
            return;
        }
        if !self.holds_privilege() || self.using {
            log::warn!(
                "{}: cannot forward privilege (holder: {:?}, using: {})",
                self.id,
                self.holder,
                self.using
            );
            return;
        }

        let next = match self.request_queue.front() {
            None => {
                log::debug!("{}: privilege idle, no demand", self.id);
                return;
            }
            Some(&head) if head == self.id => {
                log::warn!("{}: cannot forward privilege, self is at the queue head", self.id);
                return;
            }
            Some(&head) => head,
        };

        self.request_queue.pop_front();
        self.holder = Some(next);
        self.asked = false;
        log::info!("{}: sending privilege to {}", self.id, next);
        self.send(next, Message::SendToken);

        // reclaim the privilege for whoever is still queued here
        self.make_request();
    }

    fn enter_critical_section(&mut self) {
        if !self.holds_privilege() {
            log::warn!("{}: refusing to enter critical section without the privilege", self.id);
            return;
        }
        self.using = true;
        self.cs_entries += 1;
        log::info!("{}: entering critical section", self.id);
        self.actions.push(Action::AccessResource);
    }

    fn exit_critical_section(&mut self) {
        if !self.using {
            log::warn!("{}: exit signal while not in the critical section", self.id);
            return;
        }
        self.using = false;
        log::info!("{}: left critical section", self.id);

        if self.request_queue.front() == Some(&self.id) {
            // asked again while inside; go straight back in
            self.receive_privilege();
        } else {
            self.follow_ups.push(Event::InvokePrivilegeForward);
        }
    }

    fn simulate_crash(&mut self) {
        if self.using {
            log::warn!("{}: crash rejected, node is in the critical section", self.id);
            return;
        }
        if self.recovery.is_active() {
            log::warn!("{}: crash rejected, node is already recovering", self.id);
            return;
        }
        if self.neighbors.is_none() {
            log::warn!("{}: crash rejected, node has no neighbors yet", self.id);
            return;
        }
        if self.holder.is_none() {
            log::warn!("{}: crash rejected, node is not initialized yet", self.id);
            return;
        }

        log::info!("{}: crashed, starting recovery", self.id);
        self.holder = None;
        self.asked = false;
        self.using = false;
        self.request_queue.clear();
        self.recovery.begin();

        let neighbors: Vec<NodeId> = self.neighbors().collect();
        for neighbor in neighbors {
            self.send(neighbor, Message::Restart);
        }
        self.try_complete_recovery();
    }

    fn handle_restart(&mut self, from: NodeId) {
        if !self.is_neighbor(from) {
            log::warn!("{}: restart from non-neighbor {}", self.id, from);
            return;
        }
        if self.recovery.is_active() {
            // neither side can advise until the other has recovered
            log::warn!(
                "{}: restart from {} deferred while recovering, adjacent recoveries stall",
                self.id,
                from
            );
            self.recovery.stash(Event::Restart { from });
            return;
        }
        let advisory = Advisory::describe(self.holder, self.asked, &self.request_queue, from);
        self.send(from, Message::Advise(advisory));
    }

    fn handle_advise(&mut self, from: NodeId, advisory: Advisory) {
        if !self.recovery.is_active() {
            log::warn!("{}: unsolicited advise from {}", self.id, from);
            return;
        }
        if !self.is_neighbor(from) {
            log::warn!("{}: advise from non-neighbor {}", self.id, from);
            return;
        }
        self.recovery.record(from, advisory);
        self.try_complete_recovery();
    }

    fn try_complete_recovery(&mut self) {
        let complete = match &self.neighbors {
            Some(neighbors) => self.recovery.is_complete(neighbors),
            None => false,
        };
        if !complete {
            return;
        }

        let (rebuilt, replay) = self.recovery.finish(self.id);
        self.using = false;
        self.holder = rebuilt.holder;
        self.asked = rebuilt.asked;
        self.request_queue = rebuilt.request_queue;
        log::info!(
            "{}: recovered (holder: {:?}, asked: {}, queue: {:?}), replaying {} deferred events",
            self.id,
            self.holder,
            self.asked,
            self.request_queue,
            replay.len()
        );

        self.resume_pending_demand();
        self.follow_ups.extend(replay);
    }

    /// Acts on queued demand after the holder pointer was (re)established.
    fn resume_pending_demand(&mut self) {
        if self.request_queue.is_empty() {
            return;
        }
        if self.holds_privilege() {
            if !self.using {
                if self.request_queue.front() == Some(&self.id) {
                    self.receive_privilege();
                } else {
                    self.follow_ups.push(Event::InvokePrivilegeForward);
                }
            }
        } else {
            self.make_request();
        }
    }
}
