use std::collections::BTreeMap;

use tokio::sync::mpsc::Sender;

use crate::common::{crypto::Pubkey, NodeId};

use super::processor::Inbound;

/// A directly connected peer: where to reach it and which key signs its
/// envelopes.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: NodeId,
    pub pubkey: Pubkey,
    pub mailbox: Sender<Inbound>,
}

#[derive(Debug, Clone, Default)]
pub struct Neighbors {
    members: BTreeMap<NodeId, Neighbor>,
}

impl Neighbors {
    pub fn new(members: Vec<Neighbor>) -> Self {
        Neighbors {
            members: members.into_iter().map(|n| (n.id, n)).collect(),
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&Neighbor> {
        self.members.get(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
