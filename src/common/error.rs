use thiserror::Error;

use super::id::NodeId;

/// Failures outside the protocol itself.
///
/// Protocol precondition misses are not represented here: the state machine
/// logs them and treats the event as a no-op.
#[derive(Debug, Error)]
pub enum MutexError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("mailbox of node {0} is closed")]
    MailboxClosed(NodeId),

    #[error("neighbors of node {0} were already assigned")]
    NeighborsAlreadySet(NodeId),

    #[error("node {from} is not a neighbor of {node}")]
    NotANeighbor { node: NodeId, from: NodeId },

    #[error("envelope from {from} addressed to {to} delivered to {node}")]
    Misrouted { node: NodeId, from: NodeId, to: NodeId },

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("timed out waiting on node {0}")]
    Timeout(NodeId),

    #[error("mutual exclusion violated, in critical section: {0:?}")]
    SafetyViolation(Vec<NodeId>),

    #[error("still busy after {0} steps")]
    NoQuiescence(usize),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}
