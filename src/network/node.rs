use std::time::Duration;

use tokio::sync::{mpsc::Sender, watch};

use crate::{
    common::{crypto::Pubkey, MutexError, NodeId},
    mutex::{processor::{Command, Inbound}, state::NodeSnapshot},
};

/// Operator-side handle to a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    pub id: NodeId,
    pub pubkey: Pubkey,
    pub mailbox: Sender<Inbound>,
    pub snapshot: watch::Receiver<NodeSnapshot>,
}

impl NodeHandle {
    pub async fn send(&self, inbound: Inbound) -> Result<(), MutexError> {
        self.mailbox
            .send(inbound)
            .await
            .map_err(|_| MutexError::MailboxClosed(self.id))
    }

    pub async fn command(&self, command: Command) -> Result<(), MutexError> {
        self.send(Inbound::Operator(command)).await
    }

    pub async fn enter_critical_section(&self) -> Result<(), MutexError> {
        self.command(Command::EnterCriticalSection).await
    }

    pub async fn simulate_crash(&self) -> Result<(), MutexError> {
        self.command(Command::SimulateCrash).await
    }

    pub async fn print_state(&self) -> Result<(), MutexError> {
        self.command(Command::PrintState).await
    }

    /// Latest published state; lags the mailbox by at most one event.
    pub fn snapshot(&self) -> NodeSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Waits until the published state satisfies `condition`.
    pub async fn wait_for(
        &self,
        within: Duration,
        condition: impl FnMut(&NodeSnapshot) -> bool,
    ) -> Result<NodeSnapshot, MutexError> {
        let mut snapshot = self.snapshot.clone();
        let waited = async move { snapshot.wait_for(condition).await.map(|state| state.clone()) };
        match tokio::time::timeout(within, waited).await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(_)) => Err(MutexError::MailboxClosed(self.id)),
            Err(_) => Err(MutexError::Timeout(self.id)),
        }
    }
}
