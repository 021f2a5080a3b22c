use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::mpsc::{self, Receiver, Sender},
    task::JoinHandle,
};

use crate::common::{MutexError, NodeId};

use super::processor::Inbound;

/*
    The guard is a timer, not a lock: it trusts the token protocol to send it
    one claim at a time, holds the claimant for a fixed interval and then
    tells it to leave. It still watches occupancy so that an overlapping
    claim, which would mean the protocol broke mutual exclusion, is visible.
*/

const VACANT: u64 = u64::MAX;

/// A node asking for exclusive use of the resource.
#[derive(Debug)]
pub struct Claim {
    pub claimant: NodeId,
    /// Where the release signal goes.
    pub release: Sender<Inbound>,
}

/// Occupancy counters shared between the guard and its observers.
#[derive(Debug)]
pub struct Occupancy {
    occupant: AtomicU64,
    claims: AtomicU64,
    overlaps: AtomicU64,
}

impl Default for Occupancy {
    fn default() -> Self {
        Occupancy {
            occupant: AtomicU64::new(VACANT),
            claims: AtomicU64::new(0),
            overlaps: AtomicU64::new(0),
        }
    }
}

impl Occupancy {
    fn occupy(&self, node: NodeId) {
        self.claims.fetch_add(1, Ordering::SeqCst);
        let node = u64::from(node.0);
        if let Err(current) =
            self.occupant
                .compare_exchange(VACANT, node, Ordering::SeqCst, Ordering::SeqCst)
        {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
            log::error!(
                "mutual exclusion violated: n{} claimed the resource while n{} holds it",
                node,
                current
            );
            self.occupant.store(node, Ordering::SeqCst);
        }
    }

    fn vacate(&self, node: NodeId) {
        let _ = self.occupant.compare_exchange(
            u64::from(node.0),
            VACANT,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn occupant(&self) -> Option<NodeId> {
        match self.occupant.load(Ordering::SeqCst) {
            VACANT => None,
            // ids are u32, so anything stored here fits
            id => Some(NodeId(id as u32)),
        }
    }

    pub fn claims(&self) -> u64 {
        self.claims.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> u64 {
        self.overlaps.load(Ordering::SeqCst)
    }
}

/// Address of a running guard.
#[derive(Debug, Clone)]
pub struct GuardHandle {
    pub claims: Sender<Claim>,
    pub occupancy: Arc<Occupancy>,
}

impl GuardHandle {
    pub async fn claim(&self, claim: Claim) -> Result<(), MutexError> {
        let claimant = claim.claimant;
        self.claims
            .send(claim)
            .await
            .map_err(|_| MutexError::MailboxClosed(claimant))
    }
}

pub struct ResourceGuard {
    pub hold: Duration,
    pub claim_rx: Receiver<Claim>,
    pub occupancy: Arc<Occupancy>,
}

impl ResourceGuard {
    pub fn spawn(hold: Duration, capacity: usize) -> (GuardHandle, JoinHandle<()>) {
        let (claim_tx, claim_rx) = mpsc::channel(capacity);
        let occupancy = Arc::new(Occupancy::default());
        let guard = ResourceGuard {
            hold,
            claim_rx,
            occupancy: occupancy.clone(),
        };
        let task = tokio::spawn(guard.run());
        (
            GuardHandle {
                claims: claim_tx,
                occupancy,
            },
            task,
        )
    }

    pub async fn run(mut self) {
        log::debug!("resource guard running, hold {:?}", self.hold);
        while let Some(claim) = self.claim_rx.recv().await {
            self.handle_claim(claim);
        }
        log::debug!("resource guard stopped");
    }

    fn handle_claim(&self, claim: Claim) {
        log::info!("{} is accessing the resource", claim.claimant);
        self.occupancy.occupy(claim.claimant);

        // the claimant keeps processing its mailbox while the hold runs
        let hold = self.hold;
        let occupancy = self.occupancy.clone();
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            occupancy.vacate(claim.claimant);
            if claim.release.send(Inbound::Release).await.is_err() {
                log::error!("{}: mailbox closed before release", claim.claimant);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_is_released_after_hold() {
        let (guard, _task) = ResourceGuard::spawn(Duration::from_millis(20), 8);
        let (release_tx, mut release_rx) = mpsc::channel(8);

        guard
            .claim(Claim {
                claimant: NodeId(7),
                release: release_tx,
            })
            .await
            .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(2), release_rx.recv())
            .await
            .unwrap();
        assert!(matches!(signal, Some(Inbound::Release)));
        assert_eq!(guard.occupancy.claims(), 1);
        assert_eq!(guard.occupancy.overlaps(), 0);
        assert_eq!(guard.occupancy.occupant(), None);
    }

    #[tokio::test]
    async fn test_overlapping_claims_are_counted() {
        let (guard, _task) = ResourceGuard::spawn(Duration::from_millis(200), 8);
        let (tx_a, _rx_a) = mpsc::channel(8);
        let (tx_b, _rx_b) = mpsc::channel(8);

        guard.claim(Claim { claimant: NodeId(1), release: tx_a }).await.unwrap();
        guard.claim(Claim { claimant: NodeId(2), release: tx_b }).await.unwrap();

        // let the guard task drain both claims
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(guard.occupancy.claims(), 2);
        assert_eq!(guard.occupancy.overlaps(), 1);
    }
}
