use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{info, warn};

use super::transport::{PeerStatus, PeerTransport};
use crate::blockchain::{Block, Ledger, Transaction};
use crate::node::Shutdown;

/// Per-peer tally of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub accepted: usize,
    pub rejected: usize,
    pub conflicts: usize,
    pub unreachable: usize,
}

impl BroadcastOutcome {
    fn record(&mut self, status: PeerStatus) {
        match status {
            PeerStatus::Accepted => self.accepted += 1,
            PeerStatus::Rejected => self.rejected += 1,
            PeerStatus::Conflict => self.conflicts += 1,
            PeerStatus::Unreachable => self.unreachable += 1,
        }
    }

    /// Whether any peer explicitly refused the payload
    pub fn is_rejected(&self) -> bool {
        self.rejected > 0
    }
}

/// Propagates transactions and blocks to peers and resolves chain conflicts
pub struct PeerSync {
    ledger: Arc<Ledger>,
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
    shutdown: Shutdown,
}

impl PeerSync {
    pub fn new(
        ledger: Arc<Ledger>,
        transport: Arc<dyn PeerTransport>,
        timeout: Duration,
        shutdown: Shutdown,
    ) -> Self {
        PeerSync {
            ledger,
            transport,
            timeout,
            shutdown,
        }
    }

    /// Runs one peer call with its own timeout. `None` on timeout or shutdown.
    async fn bounded<F: Future>(&self, call: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = tokio::time::timeout(self.timeout, call) => result.ok(),
        }
    }

    /// Sends `transaction` to every peer.
    ///
    /// Unreachable peers are skipped. A rejection is reported in the outcome
    /// but the local admission stands.
    pub async fn broadcast_transaction(&self, transaction: &Transaction) -> BroadcastOutcome {
        let peers = self.ledger.peers();
        let calls = peers.iter().map(|peer| async move {
            let status = self
                .bounded(self.transport.post_transaction(peer, transaction))
                .await
                .unwrap_or(PeerStatus::Unreachable);
            match status {
                PeerStatus::Unreachable => warn!("Peer {} unreachable, skipping", peer),
                PeerStatus::Rejected => warn!("Peer {} rejected transaction", peer),
                _ => {}
            }
            status
        });

        let mut outcome = BroadcastOutcome::default();
        for status in join_all(calls).await {
            outcome.record(status);
        }
        outcome
    }

    /// Sends a freshly mined block to every peer.
    ///
    /// A conflict answer marks the ledger as needing resolution.
    pub async fn broadcast_block(&self, block: &Block) -> BroadcastOutcome {
        let peers = self.ledger.peers();
        let calls = peers.iter().map(|peer| async move {
            let status = self
                .bounded(self.transport.post_block(peer, block))
                .await
                .unwrap_or(PeerStatus::Unreachable);
            match status {
                PeerStatus::Unreachable => warn!("Peer {} unreachable, skipping", peer),
                PeerStatus::Conflict => warn!("Peer {} reports a diverged chain", peer),
                PeerStatus::Rejected => warn!("Peer {} rejected block {}", peer, block.index()),
                PeerStatus::Accepted => {}
            }
            status
        });

        let mut outcome = BroadcastOutcome::default();
        for status in join_all(calls).await {
            outcome.record(status);
        }

        if outcome.conflicts > 0 {
            self.ledger.mark_needs_resolution();
        }
        outcome
    }

    /// Longest-valid-chain resolution against every reachable peer.
    ///
    /// Snapshots are considered in sorted peer order; a snapshot replaces the
    /// current candidate only when strictly longer and valid. Returns whether
    /// the local chain was replaced.
    pub async fn resolve(&self) -> bool {
        let peers = self.ledger.peers();
        let fetches = peers.iter().map(|peer| async move {
            match self.bounded(self.transport.get_chain(peer)).await {
                Some(Ok(chain)) => Some(chain),
                Some(Err(err)) => {
                    warn!("Skipping peer {}: {}", peer, err);
                    None
                }
                None => {
                    warn!("Peer {} timed out", peer);
                    None
                }
            }
        });
        let snapshots = join_all(fetches).await;

        let verifier = self.ledger.verifier();
        let mut best_length = self.ledger.chain().len();
        let mut winner = None;

        for (peer, snapshot) in peers.iter().zip(snapshots) {
            let Some(chain) = snapshot else { continue };
            if chain.len() > best_length && verifier.verify_chain(&chain) {
                info!("Peer {} offers a valid chain of {} blocks", peer, chain.len());
                best_length = chain.len();
                winner = Some(chain);
            }
        }

        let replaced = match winner {
            Some(chain) => self.ledger.adopt_chain(chain),
            None => false,
        };

        self.ledger.clear_needs_resolution();
        replaced
    }
}
