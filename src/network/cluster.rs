use std::{collections::BTreeMap, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    common::{crypto::Keypair, ClusterConfig, MutexError, NodeId},
    mutex::{
        guard::{GuardHandle, ResourceGuard},
        neighbors::{Neighbor, Neighbors},
        processor::{Inbound, NodeProcessor},
        state::{NodeSnapshot, RaymondNode},
    },
};

use super::{node::NodeHandle, topology::Tree};

/// A running tree of node processors sharing one resource guard.
pub struct Cluster {
    nodes: BTreeMap<NodeId, NodeHandle>,
    guard: GuardHandle,
    origin: NodeId,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Spawns one processor per vertex, wires neighbor sets and floods the
    /// privilege out from `origin`.
    pub async fn spawn(tree: &Tree, origin: NodeId, config: &ClusterConfig) -> Result<Self, MutexError> {
        if !tree.contains(origin) {
            return Err(MutexError::UnknownNode(origin));
        }

        let (guard, guard_task) = ResourceGuard::spawn(config.hold, config.mailbox_capacity);
        let mut tasks = vec![guard_task];
        let mut nodes = BTreeMap::new();

        for id in tree.nodes() {
            let keypair = Keypair::new_pair();
            let (mailbox, msg_rx) = mpsc::channel(config.mailbox_capacity);
            let state = RaymondNode::new(id);
            let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());

            nodes.insert(
                id,
                NodeHandle {
                    id,
                    pubkey: keypair.pubkey(),
                    mailbox: mailbox.clone(),
                    snapshot: snapshot_rx,
                },
            );

            let processor = NodeProcessor {
                keypair,
                state,
                neighbors: Neighbors::default(),
                guard: guard.clone(),
                msg_rx,
                self_tx: mailbox,
                snapshot_tx,
            };
            tasks.push(tokio::spawn(processor.run()));
        }

        let cluster = Cluster {
            nodes,
            guard,
            origin,
            tasks,
        };

        // every node learns its neighbors before the flood can reach it
        for id in tree.nodes() {
            let neighbors = tree
                .neighbors(id)
                .map(|n| {
                    let handle = cluster.node(n)?;
                    Ok(Neighbor {
                        id: n,
                        pubkey: handle.pubkey,
                        mailbox: handle.mailbox.clone(),
                    })
                })
                .collect::<Result<Vec<_>, MutexError>>()?;
            cluster.node(id)?.send(Inbound::SetNeighbors(neighbors)).await?;
        }
        cluster.node(origin)?.send(Inbound::Initialize).await?;
        log::info!("cluster of {} nodes bootstrapped, origin {}", tree.len(), origin);

        Ok(cluster)
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeHandle, MutexError> {
        self.nodes.get(&id).ok_or(MutexError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeHandle> {
        self.nodes.values()
    }

    pub fn guard(&self) -> &GuardHandle {
        &self.guard
    }

    pub fn snapshots(&self) -> Vec<NodeSnapshot> {
        self.nodes.values().map(|n| n.snapshot()).collect()
    }

    /// Polls every node's published state until `condition` holds across
    /// the whole tree.
    pub async fn wait_until(
        &self,
        within: Duration,
        mut condition: impl FnMut(&[NodeSnapshot]) -> bool,
    ) -> Result<Vec<NodeSnapshot>, MutexError> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let snapshots = self.snapshots();
            if condition(&snapshots) {
                return Ok(snapshots);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MutexError::Timeout(self.origin));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
        log::info!("cluster stopped");
    }
}
