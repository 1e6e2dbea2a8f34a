//! Round synchronizer.
//!
//! One [`Synchronizer`] per node, shared by every channel worker of that
//! node. It tracks, for the current round, which neighbors this node has sent
//! to and received from. Once both are complete for every neighbor the round
//! advances and all workers waiting on it are woken; after the last
//! exchanging round the session finalizes and a [`HopReport`] is produced.
//!
//! # Critical sections
//!
//! All state sits behind one `RefCell`. Each operation borrows it once and
//! never awaits while holding the borrow, so on the single-threaded executor
//! every operation runs to completion before any other worker can observe
//! the state. The advance check therefore always sees the maps exactly as the
//! operation that triggered it left them.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::Notify;

use crate::envelope::Envelope;
use crate::error::SyncError;
use crate::hop_table::HopTable;
use crate::report::HopReport;
use lockstep_core::NodeId;

/// Outcome of an advance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundProgress {
    /// The current round still waits on some sends or receives.
    Pending,
    /// The round completed; the value is the new current round.
    Advanced(u64),
    /// The session is finalized.
    Finalized,
}

/// Counters for one synchronizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMetrics {
    /// Rounds in which every send and receive completed.
    pub rounds_completed: u64,
    /// Envelopes that arrived ahead of the node's round.
    pub buffered_messages: u64,
    /// Sends recorded.
    pub envelopes_sent: u64,
    /// Receipts recorded.
    pub envelopes_received: u64,
    /// Times the session finalized. Never more than 1.
    pub finalizations: u64,
}

#[derive(Debug)]
struct RoundState {
    current_round: u64,
    sent_to: BTreeMap<NodeId, bool>,
    received_from: BTreeMap<NodeId, bool>,
    hop_table: HopTable,
    report: Option<HopReport>,
    metrics: SyncMetrics,
}

impl RoundState {
    fn round_complete(&self) -> bool {
        self.sent_to.values().all(|sent| *sent) && self.received_from.values().all(|recv| *recv)
    }

    fn reset_round(&mut self) {
        self.sent_to.values_mut().for_each(|sent| *sent = false);
        self.received_from.values_mut().for_each(|recv| *recv = false);
    }
}

/// Lock-step round barrier for one node.
#[derive(Debug)]
pub struct Synchronizer {
    node_id: NodeId,
    neighbors: Vec<NodeId>,
    terminal_round: u64,
    state: RefCell<RoundState>,
    round_advanced: Notify,
    finished: Notify,
}

impl Synchronizer {
    /// Synchronizer for `node_id` in a topology of `node_count` nodes.
    ///
    /// With `node_count <= 2` there is nothing to exchange: the hop table is
    /// complete at construction and the session is already finalized.
    pub fn new(node_id: NodeId, neighbors: &[NodeId], node_count: usize) -> Self {
        let max_hop = node_count.saturating_sub(1);
        let terminal_round = node_count.saturating_sub(2) as u64;

        let hop_table = HopTable::new(node_id, neighbors, max_hop);
        let flags: BTreeMap<NodeId, bool> = neighbors.iter().map(|n| (*n, false)).collect();

        let mut state = RoundState {
            current_round: 0,
            sent_to: flags.clone(),
            received_from: flags,
            hop_table,
            report: None,
            metrics: SyncMetrics::default(),
        };

        if terminal_round == 0 {
            state.report = Some(HopReport::from_table(&state.hop_table));
            state.metrics.finalizations = 1;
            tracing::info!(
                "Node {} finalized without rounds (eccentricity {})",
                node_id,
                state.hop_table.eccentricity()
            );
        }

        Self {
            node_id,
            neighbors: neighbors.to_vec(),
            terminal_round,
            state: RefCell::new(state),
            round_advanced: Notify::new(),
            finished: Notify::new(),
        }
    }

    /// Node this synchronizer belongs to.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Neighbors whose channels take part in every round.
    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Number of exchanging rounds; workers stop once their round reaches it.
    pub fn terminal_round(&self) -> u64 {
        self.terminal_round
    }

    /// The round this node is in.
    pub fn current_round(&self) -> u64 {
        self.state.borrow().current_round
    }

    /// Copy of every hop layer as it stands now.
    pub fn snapshot_hop_table(&self) -> Vec<BTreeSet<NodeId>> {
        self.state.borrow().hop_table.snapshot()
    }

    /// Envelope for `peer` carrying the current round and hop table.
    pub fn envelope_for(&self, peer: NodeId) -> Result<Envelope, SyncError> {
        self.require_neighbor(peer)?;
        let state = self.state.borrow();
        Ok(Envelope::new(
            state.current_round,
            self.node_id,
            peer,
            state.hop_table.snapshot(),
        ))
    }

    /// Record that this round's envelope went out to `neighbor`.
    ///
    /// Recording the same send twice is harmless.
    pub fn mark_sent(&self, neighbor: NodeId) -> Result<RoundProgress, SyncError> {
        self.require_neighbor(neighbor)?;
        let mut state = self.state.borrow_mut();
        if state.report.is_some() {
            return Err(SyncError::SessionFinished {
                round: state.current_round,
            });
        }

        let newly_sent = match state.sent_to.get_mut(&neighbor) {
            Some(sent) if !*sent => {
                *sent = true;
                true
            }
            _ => false,
        };
        if newly_sent {
            state.metrics.envelopes_sent += 1;
            tracing::debug!(
                "Node {} sent round {} to {}",
                self.node_id,
                state.current_round,
                neighbor
            );
        }

        Ok(self.advance(&mut state))
    }

    /// Merge `envelope` from `neighbor` into the hop table and record the
    /// receipt.
    ///
    /// The envelope must be for the current round, come from `neighbor`, be
    /// the first one from `neighbor` this round, and carry the layer this
    /// round reads. Otherwise nothing changes and a
    /// [`SyncError::ProtocolViolation`] is returned.
    pub fn mark_received(
        &self,
        neighbor: NodeId,
        envelope: &Envelope,
    ) -> Result<RoundProgress, SyncError> {
        self.require_neighbor(neighbor)?;
        let mut state = self.state.borrow_mut();
        if state.report.is_some() {
            return Err(SyncError::SessionFinished {
                round: state.current_round,
            });
        }

        let round = state.current_round;
        let violation = |message: String| SyncError::ProtocolViolation {
            peer: neighbor,
            message,
        };

        if envelope.source() != neighbor {
            return Err(violation(format!(
                "envelope claims to come from node {}",
                envelope.source()
            )));
        }
        if envelope.dest() != self.node_id {
            return Err(violation(format!(
                "envelope is addressed to node {}",
                envelope.dest()
            )));
        }
        if envelope.round() != round {
            return Err(violation(format!(
                "envelope for round {} received in round {}",
                envelope.round(),
                round
            )));
        }
        if state.received_from.get(&neighbor).copied().unwrap_or(false) {
            return Err(violation(format!(
                "second envelope in round {}",
                round
            )));
        }
        let Some(layer) = envelope.layer(round as usize) else {
            return Err(violation(format!(
                "payload has {} layers, round {} needs layer {}",
                envelope.payload().len(),
                round,
                round
            )));
        };

        let added = state
            .hop_table
            .merge(round, layer)
            .map_err(|e| violation(e.to_string()))?;
        state.received_from.insert(neighbor, true);
        state.metrics.envelopes_received += 1;
        tracing::debug!(
            "Node {} received round {} from {} ({} new at {} hops)",
            self.node_id,
            round,
            neighbor,
            added,
            round + 2
        );

        Ok(self.advance(&mut state))
    }

    /// Run the advance check without recording anything.
    ///
    /// After finalization this is a no-op returning
    /// [`RoundProgress::Finalized`].
    pub fn check_advance(&self) -> RoundProgress {
        let mut state = self.state.borrow_mut();
        self.advance(&mut state)
    }

    /// Wait until this node has reached `round` or the session finalized.
    ///
    /// Called by a worker holding an envelope from a later round.
    pub async fn buffer_and_wait(&self, round: u64) {
        {
            let mut state = self.state.borrow_mut();
            state.metrics.buffered_messages += 1;
            tracing::debug!(
                "Node {} buffering envelope for round {} (current round {})",
                self.node_id,
                round,
                state.current_round
            );
        }
        self.wait_for_round(round).await;
    }

    /// Wait until this node has reached `round` or the session finalized,
    /// without counting a buffered envelope.
    pub async fn wait_for_round(&self, round: u64) {
        loop {
            // Register before checking so an advance in between still wakes us.
            let advanced = self.round_advanced.notified();
            {
                let state = self.state.borrow();
                if state.current_round >= round || state.report.is_some() {
                    return;
                }
            }
            advanced.await;
        }
    }

    /// Whether the session finalized.
    pub fn is_finalized(&self) -> bool {
        self.state.borrow().report.is_some()
    }

    /// The final report, once finalized.
    pub fn report(&self) -> Option<HopReport> {
        self.state.borrow().report.clone()
    }

    /// Wait for finalization and return the report.
    pub async fn wait_finalized(&self) -> HopReport {
        loop {
            let finished = self.finished.notified();
            if let Some(report) = self.report() {
                return report;
            }
            finished.await;
        }
    }

    /// Current counters.
    pub fn metrics(&self) -> SyncMetrics {
        self.state.borrow().metrics
    }

    fn require_neighbor(&self, neighbor: NodeId) -> Result<(), SyncError> {
        if self.neighbors.contains(&neighbor) {
            Ok(())
        } else {
            Err(SyncError::UnknownNeighbor(neighbor))
        }
    }

    fn advance(&self, state: &mut RoundState) -> RoundProgress {
        if state.report.is_some() {
            return RoundProgress::Finalized;
        }
        if !state.round_complete() {
            return RoundProgress::Pending;
        }

        state.metrics.rounds_completed += 1;

        if state.current_round + 1 >= self.terminal_round {
            let report = HopReport::from_table(&state.hop_table);
            tracing::info!(
                "Node {} finalized after round {} with eccentricity {}",
                self.node_id,
                state.current_round,
                report.eccentricity()
            );
            state.report = Some(report);
            state.metrics.finalizations += 1;
            self.round_advanced.notify_waiters();
            self.finished.notify_waiters();
            return RoundProgress::Finalized;
        }

        state.current_round += 1;
        state.reset_round();
        tracing::debug!(
            "Node {} advanced to round {}",
            self.node_id,
            state.current_round
        );
        self.round_advanced.notify_waiters();
        RoundProgress::Advanced(state.current_round)
    }
}
