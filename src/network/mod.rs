pub mod cluster;
pub mod node;
pub mod topology;

pub use cluster::*;
pub use node::*;
pub use topology::*;

use crate::{
    common::{
        crypto::{digest_of, Digest, Hashable, Keypair, Signature},
        MutexError, NodeId,
    },
    mutex::{message::{Event, Message}, neighbors::Neighbors},
};

/*
    Links are point-to-point and reliable, and a tokio mailbox keeps every
    (sender, receiver) pair in send order. What the channel cannot promise
    is who is talking, so every peer message is sealed with the sender's key
    over (from, to, message) and opened only against the key of a known
    neighbor.
*/

#[derive(Clone, Debug)]
pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub message: Message,
    pub sig: Signature,
}

fn link_digest(from: NodeId, to: NodeId, message: &Message) -> Digest {
    let from = from.to_be_bytes();
    let to = to.to_be_bytes();
    let body = message.encode();
    digest_of([&from[..], &to[..], &body[..]])
}

impl Envelope {
    pub fn seal(keypair: &Keypair, from: NodeId, to: NodeId, message: Message) -> Self {
        let sig = keypair.sign(&link_digest(from, to, &message));
        Envelope {
            from,
            to,
            message,
            sig,
        }
    }

    /// Authenticates the envelope at node `me` and turns it into the event
    /// the state machine handles.
    pub fn open(self, me: NodeId, neighbors: &Neighbors) -> Result<Event, MutexError> {
        if self.to != me {
            return Err(MutexError::Misrouted {
                node: me,
                from: self.from,
                to: self.to,
            });
        }
        let neighbor = neighbors.get(&self.from).ok_or(MutexError::NotANeighbor {
            node: me,
            from: self.from,
        })?;
        self.sig.verify(&neighbor.pubkey, &self.hash())?;
        Ok(Event::from_peer(self.from, self.message))
    }
}

impl Hashable for Envelope {
    fn hash(&self) -> Digest {
        link_digest(self.from, self.to, &self.message)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::mutex::neighbors::Neighbor;

    fn neighbors_of(id: u32, keys: &Keypair) -> Neighbors {
        let (mailbox, _rx) = mpsc::channel(1);
        Neighbors::new(vec![Neighbor {
            id: NodeId(id),
            pubkey: keys.pubkey(),
            mailbox,
        }])
    }

    #[test]
    fn test_open_authenticated_envelope() {
        let n3 = Keypair::from_seed([3u8; 32]);
        let envelope = Envelope::seal(&n3, NodeId(3), NodeId(7), Message::SendToken);

        let event = envelope.open(NodeId(7), &neighbors_of(3, &n3)).unwrap();
        assert_eq!(event, Event::Grant { from: NodeId(3) });
    }

    #[test]
    fn test_open_rejects_misrouted_and_unknown_sender() {
        let n3 = Keypair::from_seed([3u8; 32]);
        let envelope = Envelope::seal(&n3, NodeId(3), NodeId(8), Message::SendToken);
        assert!(matches!(
            envelope.open(NodeId(7), &neighbors_of(3, &n3)),
            Err(MutexError::Misrouted { .. })
        ));

        let envelope = Envelope::seal(&n3, NodeId(3), NodeId(7), Message::RequestToken);
        assert!(matches!(
            envelope.open(NodeId(7), &neighbors_of(1, &n3)),
            Err(MutexError::NotANeighbor { .. })
        ));
    }

    #[test]
    fn test_open_rejects_tampered_message() {
        let n3 = Keypair::from_seed([3u8; 32]);
        let mut envelope = Envelope::seal(&n3, NodeId(3), NodeId(7), Message::RequestToken);
        envelope.message = Message::SendToken;

        assert!(matches!(
            envelope.open(NodeId(7), &neighbors_of(3, &n3)),
            Err(MutexError::BadSignature(_))
        ));
    }
}
