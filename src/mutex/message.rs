use crate::common::NodeId;

use super::recovery::Advisory;

/*
    Peer messages are the only things that cross a tree edge. Everything a
    node tells itself (forwarding the privilege, entering or leaving the
    critical section) stays inside the state machine as an Event and never
    touches the transport.
*/

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Message {
    /// Flood that orients every holder pointer toward the origin. Always
    /// non-origin once it is on the wire.
    Initialize,
    RequestToken,
    /// Grant: transfers the privilege to the recipient.
    SendToken,
    /// Crash notice from a node entering recovery.
    Restart,
    Advise(Advisory),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Initialize => "Initialize",
            Message::RequestToken => "RequestToken",
            Message::SendToken => "SendToken",
            Message::Restart => "Restart",
            Message::Advise(_) => "Advise",
        }
    }

    /// Stable byte encoding, signed as part of the envelope digest.
    pub fn encode(&self) -> [u8; 4] {
        match self {
            Message::Initialize => [1, 0, 0, 0],
            Message::RequestToken => [2, 0, 0, 0],
            Message::SendToken => [3, 0, 0, 0],
            Message::Restart => [4, 0, 0, 0],
            Message::Advise(advisory) => [
                5,
                advisory.holder_is_recipient as u8,
                advisory.asked as u8,
                advisory.recipient_in_queue as u8,
            ],
        }
    }
}

/// Input to the per-node state machine.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Event {
    /// `from` is `None` only for the bootstrap-injected origin event.
    Initialize { origin: bool, from: Option<NodeId> },
    Request { from: NodeId },
    Grant { from: NodeId },
    Restart { from: NodeId },
    Advise { from: NodeId, advisory: Advisory },
    InvokePrivilegeForward,
    EnterCriticalSection,
    ExitCriticalSection,
    SimulateCrash,
}

impl Event {
    /// Builds the event a node handles when `message` arrives from `from`.
    pub fn from_peer(from: NodeId, message: Message) -> Self {
        match message {
            Message::Initialize => Event::Initialize {
                origin: false,
                from: Some(from),
            },
            Message::RequestToken => Event::Request { from },
            Message::SendToken => Event::Grant { from },
            Message::Restart => Event::Restart { from },
            Message::Advise(advisory) => Event::Advise { from, advisory },
        }
    }
}

/// Side effects the state machine asks its driver to perform.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Action {
    Send { to: NodeId, message: Message },
    /// Claim the resource guard; the guard answers with ExitCriticalSection.
    AccessResource,
}
