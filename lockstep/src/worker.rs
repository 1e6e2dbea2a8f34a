//! Channel worker: drives one neighbor channel through every round.
//!
//! ```text
//! Connecting ──► Handshaking ──► RoundLoop ──► Done
//! (initiator)    Hello / Ack     one Round frame each way per round
//! ```
//!
//! On each edge the larger id initiates and the smaller id accepts. After
//! the handshake both roles run the same loop. In round 0 the initiator
//! sends first and the acceptor reads that envelope before its own send.
//! From then on each end sends its round-r envelope as soon as its node
//! enters round r, whatever the other end is doing. A worker that has
//! already merged round r while its node is still in round r reads the next
//! envelope only while also watching for the round to advance, so it never
//! sits in a receive while it owes a send.

use std::fmt;
use std::rc::Rc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::envelope::{Envelope, Frame};
use crate::error::{SyncError, WorkerError};
use crate::synchronizer::Synchronizer;
use crate::topology::NodeDescriptor;
use lockstep_core::{MessageCodec, NetworkProvider, NodeId, TimeProvider};
use lockstep_transport::{connect_with_retry, Connection, RetryPolicy};

/// Which end of the channel this worker is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Larger id; opens the connection.
    Initiator,
    /// Smaller id; was handed an accepted connection.
    Acceptor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Acceptor => write!(f, "acceptor"),
        }
    }
}

/// Lifecycle of a channel worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Opening the connection (initiator only).
    Connecting,
    /// Exchanging `Hello` / `Ack`.
    Handshaking,
    /// Exchanging one envelope per round.
    RoundLoop,
    /// Every round exchanged.
    Done,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Connecting => "connecting",
            WorkerState::Handshaking => "handshaking",
            WorkerState::RoundLoop => "round-loop",
            WorkerState::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a worker did, returned when it finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Neighbor on the other end.
    pub peer: NodeId,
    /// This end's role.
    pub role: Role,
    /// Envelopes merged, one per round.
    pub rounds: u64,
    /// Times an envelope was held for a later round.
    pub buffered: u64,
    /// Frames sent, handshake included.
    pub frames_sent: u64,
    /// Frames received, handshake included.
    pub frames_received: u64,
}

/// Owns one connection to one neighbor.
pub struct ChannelWorker<S, C> {
    node_id: NodeId,
    peer: NodeId,
    role: Role,
    state: WorkerState,
    connection: Connection<S>,
    sync: Rc<Synchronizer>,
    codec: C,
    local_round: u64,
    last_sent: Option<u64>,
    retained: Option<Envelope>,
    buffered: u64,
}

impl<S, C> ChannelWorker<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: MessageCodec,
{
    /// Open the channel to `peer` and complete the handshake as initiator.
    pub async fn connect<N, T>(
        network: &N,
        time: &T,
        sync: Rc<Synchronizer>,
        peer: &NodeDescriptor,
        policy: &RetryPolicy,
        codec: C,
    ) -> Result<Self, WorkerError>
    where
        N: NetworkProvider<Stream = S>,
        T: TimeProvider,
    {
        let node_id = sync.node_id();
        if !sync.neighbors().contains(&peer.id()) {
            return Err(SyncError::UnknownNeighbor(peer.id()).into());
        }

        tracing::debug!(
            "Node {} channel to {}: {}",
            node_id,
            peer.id(),
            WorkerState::Connecting
        );
        let stream = connect_with_retry(network, time, &peer.address(), policy).await?;

        let mut worker = Self::new(node_id, peer.id(), Role::Initiator, stream, sync, codec);
        worker.transition(WorkerState::Handshaking);

        worker
            .send_frame(&Frame::Hello { source: node_id })
            .await?;
        match worker.receive_frame().await? {
            Frame::Ack { source } if source == peer.id() => {}
            Frame::Ack { source } => {
                return Err(WorkerError::Handshake(format!(
                    "expected ack from node {}, got ack from node {}",
                    peer.id(),
                    source
                )))
            }
            other => {
                return Err(WorkerError::UnexpectedFrame {
                    expected: "ack",
                    found: other.kind(),
                })
            }
        }

        tracing::info!(
            "Node {} established channel to {} as {}",
            node_id,
            peer.id(),
            Role::Initiator
        );
        Ok(worker)
    }

    /// Complete the handshake on an accepted stream.
    ///
    /// The connecting node must be a neighbor with a larger id, and `claim`
    /// must accept it; `claim` is how the node runner refuses a second
    /// channel from the same peer. A rejected peer gets no `Ack`. The caller
    /// should record the peer as taken only once this returns `Ok`, since
    /// sending the `Ack` can still fail.
    pub async fn accept<F>(
        stream: S,
        sync: Rc<Synchronizer>,
        codec: C,
        claim: F,
    ) -> Result<Self, WorkerError>
    where
        F: FnOnce(NodeId) -> bool,
    {
        let node_id = sync.node_id();
        let mut connection = Connection::new(stream);

        let bytes = connection.receive().await?;
        let source = match Frame::decode(&codec, &bytes)? {
            Frame::Hello { source } => source,
            other => {
                return Err(WorkerError::UnexpectedFrame {
                    expected: "hello",
                    found: other.kind(),
                })
            }
        };

        if !sync.neighbors().contains(&source) {
            return Err(WorkerError::Handshake(format!(
                "node {} is not a neighbor of node {}",
                source, node_id
            )));
        }
        if source < node_id {
            return Err(WorkerError::Handshake(format!(
                "node {} has a smaller id and must accept, not initiate",
                source
            )));
        }
        if !claim(source) {
            return Err(WorkerError::Handshake(format!(
                "node {} already has a channel",
                source
            )));
        }

        let mut worker = Self {
            state: WorkerState::Handshaking,
            ..Self::from_connection(node_id, source, Role::Acceptor, connection, sync, codec)
        };
        worker.send_frame(&Frame::Ack { source: node_id }).await?;

        tracing::info!(
            "Node {} established channel to {} as {}",
            node_id,
            source,
            Role::Acceptor
        );
        Ok(worker)
    }

    fn new(
        node_id: NodeId,
        peer: NodeId,
        role: Role,
        stream: S,
        sync: Rc<Synchronizer>,
        codec: C,
    ) -> Self {
        Self::from_connection(node_id, peer, role, Connection::new(stream), sync, codec)
    }

    fn from_connection(
        node_id: NodeId,
        peer: NodeId,
        role: Role,
        connection: Connection<S>,
        sync: Rc<Synchronizer>,
        codec: C,
    ) -> Self {
        Self {
            node_id,
            peer,
            role,
            state: WorkerState::Connecting,
            connection,
            sync,
            codec,
            local_round: 0,
            last_sent: None,
            retained: None,
            buffered: 0,
        }
    }

    /// Neighbor on the other end.
    pub fn peer(&self) -> NodeId {
        self.peer
    }

    /// This end's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Exchange one envelope per round until the terminal round.
    ///
    /// Hands the connection back so the caller decides when it closes.
    /// Any error is fatal to the channel and is not retried.
    pub async fn run(mut self) -> Result<(WorkerSummary, Connection<S>), WorkerError> {
        self.transition(WorkerState::RoundLoop);

        if let Err(e) = self.round_loop().await {
            tracing::error!(
                "Node {} channel to {} failed in round {}: {}",
                self.node_id,
                self.peer,
                self.local_round,
                e
            );
            return Err(e);
        }

        self.transition(WorkerState::Done);
        let summary = WorkerSummary {
            peer: self.peer,
            role: self.role,
            rounds: self.local_round,
            buffered: self.buffered,
            frames_sent: self.connection.frames_sent(),
            frames_received: self.connection.frames_received(),
        };
        Ok((summary, self.connection))
    }

    async fn round_loop(&mut self) -> Result<(), WorkerError> {
        let terminal_round = self.sync.terminal_round();

        if self.role == Role::Acceptor && terminal_round > 0 {
            let first = self.receive_envelope().await?;
            self.retained = Some(first);
        }

        while self.local_round < terminal_round {
            if self.owes_send() {
                let envelope = self.sync.envelope_for(self.peer)?;
                self.send_frame(&Frame::Round(envelope)).await?;
                self.sync.mark_sent(self.peer)?;
                self.last_sent = Some(self.local_round);
            }

            let envelope = match self.retained.take() {
                Some(envelope) => envelope,
                None => match self.receive_or_advance().await? {
                    Some(envelope) => envelope,
                    None => continue,
                },
            };

            // The round may have advanced while we waited on the receive.
            if self.owes_send() {
                self.retained = Some(envelope);
                continue;
            }

            let current_round = self.sync.current_round();
            if envelope.round() > current_round {
                let round = envelope.round();
                self.retained = Some(envelope);
                self.buffered += 1;
                self.sync.buffer_and_wait(round).await;
                continue;
            }

            self.sync.mark_received(self.peer, &envelope)?;
            self.local_round += 1;
        }
        Ok(())
    }

    /// This round's envelope is due: the node is in our round and we have
    /// not sent for it yet.
    fn owes_send(&self) -> bool {
        self.sync.current_round() == self.local_round
            && self.last_sent != Some(self.local_round)
            && !self.sync.is_finalized()
    }

    /// Receive the next envelope, or return `None` once the node reaches
    /// `local_round` and this worker has a send to make.
    async fn receive_or_advance(&mut self) -> Result<Option<Envelope>, WorkerError> {
        if self.local_round <= self.sync.current_round() || self.sync.is_finalized() {
            return self.receive_envelope().await.map(Some);
        }

        // `Connection::receive` keeps partial frames in its own buffer, so
        // dropping it when the round wins loses nothing.
        let sync = Rc::clone(&self.sync);
        let round = self.local_round;
        tokio::select! {
            _ = sync.wait_for_round(round) => Ok(None),
            received = self.receive_envelope() => received.map(Some),
        }
    }

    async fn receive_envelope(&mut self) -> Result<Envelope, WorkerError> {
        let frame = self.receive_frame().await?;
        let kind = frame.kind();
        frame.into_round().ok_or(WorkerError::UnexpectedFrame {
            expected: "round",
            found: kind,
        })
    }

    async fn receive_frame(&mut self) -> Result<Frame, WorkerError> {
        let bytes = self.connection.receive().await?;
        Ok(Frame::decode(&self.codec, &bytes)?)
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), WorkerError> {
        let bytes = frame.encode(&self.codec)?;
        self.connection.send(&bytes).await?;
        Ok(())
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!(
            "Node {} channel to {}: {} -> {}",
            self.node_id,
            self.peer,
            self.state,
            next
        );
        self.state = next;
    }
}

impl<S, C> fmt::Debug for ChannelWorker<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelWorker")
            .field("node_id", &self.node_id)
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("local_round", &self.local_round)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::JsonCodec;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    /// Run both ends of the 0-1 edge of a 3-node path 0-1-2 from node 0's
    /// and node 1's point of view, with node 1's other edge simulated by
    /// hand.
    #[tokio::test]
    async fn test_acceptor_and_initiator_exchange_round() {
        init_tracing();
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node0 = Rc::new(Synchronizer::new(NodeId::new(0), &[NodeId::new(1)], 3));
                let node1 = Rc::new(Synchronizer::new(
                    NodeId::new(1),
                    &[NodeId::new(0), NodeId::new(2)],
                    3,
                ));

                let (a, b) = tokio::io::duplex(4096);

                let acceptor = {
                    let node0 = node0.clone();
                    tokio::task::spawn_local(async move {
                        let worker = ChannelWorker::accept(a, node0, JsonCodec, |_| true).await?;
                        worker.run().await
                    })
                };
                let initiator = {
                    let node1 = node1.clone();
                    tokio::task::spawn_local(async move {
                        let mut worker = ChannelWorker::new(
                            NodeId::new(1),
                            NodeId::new(0),
                            Role::Initiator,
                            b,
                            node1,
                            JsonCodec,
                        );
                        worker.send_frame(&Frame::Hello { source: NodeId::new(1) }).await?;
                        let ack = worker.receive_frame().await?;
                        assert_eq!(ack, Frame::Ack { source: NodeId::new(0) });
                        worker.run().await
                    })
                };

                // Node 1's edge to node 2, played by hand.
                node1.mark_sent(NodeId::new(2)).expect("send to 2");
                let from_two = Envelope::new(
                    0,
                    NodeId::new(2),
                    NodeId::new(1),
                    vec![std::collections::BTreeSet::from([NodeId::new(1)]), Default::default()],
                );
                node1
                    .mark_received(NodeId::new(2), &from_two)
                    .expect("receive from 2");

                let (summary0, _conn0) = acceptor.await.expect("join").expect("acceptor");
                let (summary1, _conn1) = initiator.await.expect("join").expect("initiator");

                assert_eq!(summary0.role, Role::Acceptor);
                assert_eq!(summary0.rounds, 1);
                assert_eq!(summary1.rounds, 1);
                assert_eq!(summary1.frames_sent, 2);

                let report0 = node0.report().expect("node 0 finalized");
                assert_eq!(report0.eccentricity(), 2);
                assert_eq!(
                    report0.k_hop(2),
                    std::collections::BTreeSet::from([NodeId::new(2)])
                );
                assert!(node1.is_finalized());
            })
            .await;
    }

    fn layers(raw: &[&[u32]]) -> Vec<std::collections::BTreeSet<NodeId>> {
        raw.iter()
            .map(|layer| layer.iter().copied().map(NodeId::new).collect())
            .collect()
    }

    /// Path 0-1-2-3 with real workers on the 1-2 edge and the outer edges
    /// played by hand. The inner edge finishes round 0 while both nodes still
    /// wait on their outer neighbor; once those arrive, both workers must
    /// send round 1 instead of waiting on each other's receive.
    #[tokio::test]
    async fn test_inner_edge_sends_after_outer_edges_advance() {
        init_tracing();
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let node1 = Rc::new(Synchronizer::new(
                    NodeId::new(1),
                    &[NodeId::new(0), NodeId::new(2)],
                    4,
                ));
                let node2 = Rc::new(Synchronizer::new(
                    NodeId::new(2),
                    &[NodeId::new(1), NodeId::new(3)],
                    4,
                ));

                let (a, b) = tokio::io::duplex(4096);

                let acceptor = {
                    let node1 = node1.clone();
                    tokio::task::spawn_local(async move {
                        let worker = ChannelWorker::accept(a, node1, JsonCodec, |_| true).await?;
                        worker.run().await
                    })
                };
                let initiator = {
                    let node2 = node2.clone();
                    tokio::task::spawn_local(async move {
                        let mut worker = ChannelWorker::new(
                            NodeId::new(2),
                            NodeId::new(1),
                            Role::Initiator,
                            b,
                            node2,
                            JsonCodec,
                        );
                        worker.send_frame(&Frame::Hello { source: NodeId::new(2) }).await?;
                        worker.receive_frame().await?;
                        worker.run().await
                    })
                };

                // Let the inner edge exchange round 0 on its own.
                tokio::time::timeout(std::time::Duration::from_secs(2), async {
                    while node1.metrics().envelopes_received < 1
                        || node2.metrics().envelopes_received < 1
                    {
                        tokio::task::yield_now().await;
                    }
                })
                .await
                .expect("inner edge exchanges round 0");
                assert_eq!(node1.current_round(), 0);
                assert_eq!(node2.current_round(), 0);

                // Round 0 on the outer edges moves both nodes to round 1.
                node1.mark_sent(NodeId::new(0)).expect("send to 0");
                node1
                    .mark_received(
                        NodeId::new(0),
                        &Envelope::new(0, NodeId::new(0), NodeId::new(1), layers(&[&[1], &[], &[]])),
                    )
                    .expect("receive from 0");
                node2.mark_sent(NodeId::new(3)).expect("send to 3");
                node2
                    .mark_received(
                        NodeId::new(3),
                        &Envelope::new(0, NodeId::new(3), NodeId::new(2), layers(&[&[2], &[], &[]])),
                    )
                    .expect("receive from 3");
                assert_eq!(node1.current_round(), 1);
                assert_eq!(node2.current_round(), 1);

                // Round 1 on the outer edges.
                node1.mark_sent(NodeId::new(0)).expect("send to 0");
                node1
                    .mark_received(
                        NodeId::new(0),
                        &Envelope::new(1, NodeId::new(0), NodeId::new(1), layers(&[&[1], &[2], &[]])),
                    )
                    .expect("receive from 0");
                node2.mark_sent(NodeId::new(3)).expect("send to 3");
                node2
                    .mark_received(
                        NodeId::new(3),
                        &Envelope::new(1, NodeId::new(3), NodeId::new(2), layers(&[&[2], &[1], &[]])),
                    )
                    .expect("receive from 3");

                let (summary1, _conn1) =
                    tokio::time::timeout(std::time::Duration::from_secs(2), acceptor)
                        .await
                        .expect("acceptor finishes")
                        .expect("join")
                        .expect("acceptor");
                let (summary2, _conn2) =
                    tokio::time::timeout(std::time::Duration::from_secs(2), initiator)
                        .await
                        .expect("initiator finishes")
                        .expect("join")
                        .expect("initiator");

                assert_eq!(summary1.rounds, 2);
                assert_eq!(summary2.rounds, 2);
                assert_eq!(
                    node1.report().expect("node 1 finalized").k_hop(2),
                    std::collections::BTreeSet::from([NodeId::new(3)])
                );
                assert_eq!(
                    node2.report().expect("node 2 finalized").k_hop(2),
                    std::collections::BTreeSet::from([NodeId::new(0)])
                );
            })
            .await;
    }

    #[tokio::test]
    async fn test_accept_rejects_smaller_id() {
        init_tracing();
        let sync = Rc::new(Synchronizer::new(
            NodeId::new(1),
            &[NodeId::new(0), NodeId::new(2)],
            3,
        ));
        let (a, b) = tokio::io::duplex(4096);

        let mut initiator = Connection::new(b);
        let hello = Frame::Hello {
            source: NodeId::new(0),
        }
        .encode(&JsonCodec)
        .expect("encode");
        initiator.send(&hello).await.expect("send hello");

        let err = ChannelWorker::accept(a, sync, JsonCodec, |_| true)
            .await
            .expect_err("node 0 must accept, not initiate");
        assert!(matches!(err, WorkerError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_accept_rejects_unclaimed_peer() {
        let sync = Rc::new(Synchronizer::new(NodeId::new(0), &[NodeId::new(1)], 3));
        let (a, b) = tokio::io::duplex(4096);

        let mut initiator = Connection::new(b);
        let hello = Frame::Hello {
            source: NodeId::new(1),
        }
        .encode(&JsonCodec)
        .expect("encode");
        initiator.send(&hello).await.expect("send hello");

        let err = ChannelWorker::accept(a, sync, JsonCodec, |_| false)
            .await
            .expect_err("claim refused");
        assert!(matches!(err, WorkerError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_accept_fails_when_initiator_hangs_up() {
        init_tracing();
        let sync = Rc::new(Synchronizer::new(NodeId::new(0), &[NodeId::new(1)], 3));
        let (a, b) = tokio::io::duplex(4096);

        let mut initiator = Connection::new(b);
        let hello = Frame::Hello {
            source: NodeId::new(1),
        }
        .encode(&JsonCodec)
        .expect("encode");
        initiator.send(&hello).await.expect("send hello");
        drop(initiator);

        let mut claimed = None;
        let err = ChannelWorker::accept(a, sync, JsonCodec, |peer| {
            claimed = Some(peer);
            true
        })
        .await
        .expect_err("ack cannot be sent");
        assert!(matches!(err, WorkerError::Transport(_)));
        assert_eq!(claimed, Some(NodeId::new(1)));
    }
}
