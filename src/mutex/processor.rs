use tokio::sync::{
    mpsc::{Receiver, Sender},
    watch,
};

use crate::{
    common::{crypto::Keypair, MutexError, NodeId},
    network::Envelope,
};

use super::{
    guard::{Claim, GuardHandle},
    message::{Action, Event},
    neighbors::{Neighbor, Neighbors},
    state::{NodeSnapshot, RaymondNode},
};

/// Everything that can land in a node's mailbox.
#[derive(Debug)]
pub enum Inbound {
    /// Signed protocol message from a neighbor.
    Peer(Envelope),
    /// Bootstrap: fixes the neighbor set, must precede any other traffic.
    SetNeighbors(Vec<Neighbor>),
    /// Bootstrap: makes the receiving node the origin of the flood.
    Initialize,
    Operator(Command),
    /// The resource guard ended our hold.
    Release,
}

/// Operator-issued events.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    EnterCriticalSection,
    SimulateCrash,
    PrintState,
}

/// Drives one `RaymondNode` from its mailbox, one message at a time.
pub struct NodeProcessor {
    pub keypair: Keypair,
    pub state: RaymondNode,
    pub neighbors: Neighbors,
    pub guard: GuardHandle,
    pub msg_rx: Receiver<Inbound>,
    /// Our own mailbox, handed to the guard as the release address.
    pub self_tx: Sender<Inbound>,
    pub snapshot_tx: watch::Sender<NodeSnapshot>,
}

impl NodeProcessor {
    pub fn id(&self) -> NodeId {
        self.state.id()
    }

    pub async fn run(mut self) {
        log::debug!("{}: processor running", self.id());
        while let Some(inbound) = self.msg_rx.recv().await {
            if let Err(e) = self.process(inbound).await {
                log::error!("{}: {}", self.id(), e);
            }
            self.snapshot_tx.send_replace(self.state.snapshot());
        }
        log::debug!("{}: mailbox closed, processor stopped", self.id());
    }

    async fn process(&mut self, inbound: Inbound) -> Result<(), MutexError> {
        let event = match inbound {
            Inbound::SetNeighbors(neighbors) => return self.set_neighbors(neighbors),
            Inbound::Initialize => Event::Initialize {
                origin: true,
                from: None,
            },
            Inbound::Peer(envelope) => match envelope.open(self.id(), &self.neighbors) {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("{}: dropping envelope: {}", self.id(), e);
                    return Ok(());
                }
            },
            Inbound::Operator(Command::EnterCriticalSection) => Event::Request { from: self.id() },
            Inbound::Operator(Command::SimulateCrash) => Event::SimulateCrash,
            Inbound::Operator(Command::PrintState) => {
                log::info!("{:?}", self.state.snapshot());
                return Ok(());
            }
            Inbound::Release => Event::ExitCriticalSection,
        };

        for action in self.state.handle(event) {
            if let Err(e) = self.perform(action).await {
                // the state has already changed, so the rest still goes out
                log::error!("{}: {}", self.id(), e);
            }
        }
        Ok(())
    }

    fn set_neighbors(&mut self, neighbors: Vec<Neighbor>) -> Result<(), MutexError> {
        self.state.set_neighbors(neighbors.iter().map(|n| n.id))?;
        self.neighbors = Neighbors::new(neighbors);
        log::debug!("{}: {} neighbor keys registered", self.id(), self.neighbors.len());
        Ok(())
    }

    async fn perform(&mut self, action: Action) -> Result<(), MutexError> {
        match action {
            Action::Send { to, message } => {
                let neighbor = self.neighbors.get(&to).ok_or(MutexError::NotANeighbor {
                    node: self.id(),
                    from: to,
                })?;
                let envelope = Envelope::seal(&self.keypair, self.id(), to, message);
                neighbor
                    .mailbox
                    .send(Inbound::Peer(envelope))
                    .await
                    .map_err(|_| MutexError::MailboxClosed(to))
            }
            Action::AccessResource => {
                self.guard
                    .claim(Claim {
                        claimant: self.id(),
                        release: self.self_tx.clone(),
                    })
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        common::crypto::Hashable,
        mutex::{guard::ResourceGuard, message::Message},
    };

    struct Harness {
        processor: NodeProcessor,
        mailbox: Sender<Inbound>,
        snapshot_rx: watch::Receiver<NodeSnapshot>,
    }

    fn harness(id: u32, seed: u8) -> Harness {
        let id = NodeId(id);
        let (mailbox, msg_rx) = mpsc::channel(100);
        let state = RaymondNode::new(id);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let (guard, _task) = ResourceGuard::spawn(Duration::from_millis(20), 100);
        let processor = NodeProcessor {
            keypair: Keypair::from_seed([seed; 32]),
            state,
            neighbors: Neighbors::default(),
            guard,
            msg_rx,
            self_tx: mailbox.clone(),
            snapshot_tx,
        };
        Harness {
            processor,
            mailbox,
            snapshot_rx,
        }
    }

    #[tokio::test]
    async fn test_request_is_signed_and_sent_to_holder() {
        let Harness { processor, mailbox, mut snapshot_rx } = harness(7, 7);
        let n3_keys = Keypair::from_seed([3u8; 32]);
        let (n3_tx, mut n3_rx) = mpsc::channel(100);
        let n7_pubkey = processor.keypair.pubkey();

        tokio::spawn(processor.run());

        mailbox
            .send(Inbound::SetNeighbors(vec![Neighbor {
                id: NodeId(3),
                pubkey: n3_keys.pubkey(),
                mailbox: n3_tx,
            }]))
            .await
            .unwrap();
        let init = Envelope::seal(&n3_keys, NodeId(3), NodeId(7), Message::Initialize);
        mailbox.send(Inbound::Peer(init)).await.unwrap();
        mailbox.send(Inbound::Operator(Command::EnterCriticalSection)).await.unwrap();

        // the flood echo comes first, then the request
        let Some(Inbound::Peer(echo)) = n3_rx.recv().await else {
            panic!("expected initialize echo");
        };
        assert_eq!(echo.message, Message::Initialize);
        let Some(Inbound::Peer(request)) = n3_rx.recv().await else {
            panic!("expected token request");
        };
        assert_eq!(request.message, Message::RequestToken);
        assert_eq!(request.to, NodeId(3));
        assert!(request.sig.verify(&n7_pubkey, &request.hash()).is_ok());

        let snapshot = snapshot_rx.wait_for(|s| s.asked).await.unwrap().clone();
        assert_eq!(snapshot.holder, Some(NodeId(3)));
        assert_eq!(snapshot.request_queue, vec![NodeId(7)]);
    }

    #[tokio::test]
    async fn test_forged_envelope_is_dropped() {
        let Harness { processor, mailbox, mut snapshot_rx } = harness(7, 7);
        let n3_keys = Keypair::from_seed([3u8; 32]);
        let impostor = Keypair::from_seed([66u8; 32]);
        let (n3_tx, _n3_rx) = mpsc::channel(100);

        tokio::spawn(processor.run());

        mailbox
            .send(Inbound::SetNeighbors(vec![Neighbor {
                id: NodeId(3),
                pubkey: n3_keys.pubkey(),
                mailbox: n3_tx,
            }]))
            .await
            .unwrap();
        let forged = Envelope::seal(&impostor, NodeId(3), NodeId(7), Message::Initialize);
        mailbox.send(Inbound::Peer(forged)).await.unwrap();
        mailbox.send(Inbound::Operator(Command::PrintState)).await.unwrap();

        // two messages processed, holder never set
        tokio::time::timeout(Duration::from_secs(2), snapshot_rx.changed())
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(snapshot_rx.borrow().holder, None);
    }

    #[tokio::test]
    async fn test_closed_neighbor_does_not_block_other_sends() {
        let Harness { processor, mailbox, mut snapshot_rx } = harness(4, 4);
        let n1_keys = Keypair::from_seed([1u8; 32]);
        let n9_keys = Keypair::from_seed([9u8; 32]);
        let (n1_tx, n1_rx) = mpsc::channel(100);
        let (n9_tx, mut n9_rx) = mpsc::channel(100);
        drop(n1_rx);

        tokio::spawn(processor.run());

        mailbox
            .send(Inbound::SetNeighbors(vec![
                Neighbor {
                    id: NodeId(1),
                    pubkey: n1_keys.pubkey(),
                    mailbox: n1_tx,
                },
                Neighbor {
                    id: NodeId(9),
                    pubkey: n9_keys.pubkey(),
                    mailbox: n9_tx,
                },
            ]))
            .await
            .unwrap();
        mailbox.send(Inbound::Initialize).await.unwrap();

        // n1 comes first in the flood and its mailbox is gone
        let flood = tokio::time::timeout(Duration::from_secs(2), n9_rx.recv())
            .await
            .unwrap();
        let Some(Inbound::Peer(envelope)) = flood else {
            panic!("expected initialize for n9");
        };
        assert_eq!(envelope.message, Message::Initialize);
        assert_eq!(envelope.to, NodeId(9));

        let snapshot = snapshot_rx.wait_for(|s| s.holder.is_some()).await.unwrap().clone();
        assert!(snapshot.holds_privilege());
    }

    #[tokio::test]
    async fn test_origin_enters_and_is_released() {
        let Harness { processor, mailbox, mut snapshot_rx } = harness(4, 4);

        tokio::spawn(processor.run());

        mailbox.send(Inbound::SetNeighbors(Vec::new())).await.unwrap();
        mailbox.send(Inbound::Initialize).await.unwrap();
        mailbox.send(Inbound::Operator(Command::EnterCriticalSection)).await.unwrap();

        let entered = tokio::time::timeout(
            Duration::from_secs(2),
            snapshot_rx.wait_for(|s| s.cs_entries == 1),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!(entered.holds_privilege());

        // the guard's release brings the node back out
        let left = tokio::time::timeout(
            Duration::from_secs(2),
            snapshot_rx.wait_for(|s| s.cs_entries == 1 && !s.using),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!(left.holds_privilege());
    }
}
