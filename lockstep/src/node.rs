//! Node runner: one process (or task) per topology node.
//!
//! The runner binds the node's listener when some neighbor has a larger id,
//! starts one initiator task per smaller-id neighbor, and accepts exactly as
//! many channels as there are larger-id neighbors. Every channel worker
//! reports back on one event queue; the first failure stops the node.

use std::collections::BTreeSet;
use std::rc::Rc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::error::{NodeError, WorkerError};
use crate::report::HopReport;
use crate::synchronizer::{SyncMetrics, Synchronizer};
use crate::topology::{NodeDescriptor, Topology};
use crate::worker::{ChannelWorker, WorkerSummary};
use lockstep_core::{
    ChannelListener, JsonCodec, NetworkProvider, NodeId, Providers, TaskProvider, TimeProvider,
};
use lockstep_transport::{Connection, RetryPolicy};

type Stream<P> = <<P as Providers>::Network as NetworkProvider>::Stream;

type WorkerOutcome<S> = Result<(WorkerSummary, Connection<S>), NodeError>;

enum NodeEvent<S> {
    /// Handshake done on an accepted channel.
    Accepted(ChannelWorker<S, JsonCodec>),
    /// A channel worker finished.
    Finished(WorkerOutcome<S>),
}

/// Aborts its tasks when the node returns.
#[derive(Default)]
struct TaskSet(Vec<JoinHandle<()>>);

impl TaskSet {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.0.push(handle);
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Everything a finished node knows.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    /// Final hop layers and eccentricity.
    pub report: HopReport,
    /// Synchronizer counters.
    pub metrics: SyncMetrics,
    /// One summary per channel, in completion order.
    pub channels: Vec<WorkerSummary>,
}

/// Run node `id` of `topology` to completion and return its report.
///
/// Writes the report to the configured sink before returning.
pub async fn run_node<P: Providers>(
    providers: P,
    topology: &Topology,
    id: NodeId,
    config: &NodeConfig,
) -> Result<HopReport, NodeError> {
    run_node_with_stats(providers, topology, id, config)
        .await
        .map(|outcome| outcome.report)
}

/// Like [`run_node`], also returning synchronizer and channel statistics.
pub async fn run_node_with_stats<P: Providers>(
    providers: P,
    topology: &Topology,
    id: NodeId,
    config: &NodeConfig,
) -> Result<NodeOutcome, NodeError> {
    let descriptor = topology.descriptor(id).ok_or(NodeError::UnknownNode(id))?;
    let sync = Rc::new(Synchronizer::new(
        id,
        descriptor.neighbors(),
        topology.len(),
    ));
    let expected_accepts = descriptor.accepts_from().count();

    tracing::info!(
        "Node {} starting: {} neighbors, {} rounds",
        id,
        descriptor.neighbors().len(),
        sync.terminal_round()
    );

    let (events_tx, mut events) = mpsc::unbounded_channel::<NodeEvent<Stream<P>>>();
    let mut tasks = TaskSet::default();

    if expected_accepts > 0 {
        let address = config
            .listen_address()
            .map(str::to_string)
            .unwrap_or_else(|| descriptor.address());
        let listener = providers
            .network()
            .bind(&address)
            .await
            .map_err(|source| NodeError::Bind {
                address: address.clone(),
                source,
            })?;
        tracing::info!("Node {} listening on {}", id, address);

        tasks.push(providers.task().spawn_task(
            &format!("accept-{}", id),
            accept_loop(listener, sync.clone(), expected_accepts, events_tx.clone()),
        ));
    }

    for peer in descriptor.initiates_to() {
        let peer_descriptor = topology
            .descriptor(peer)
            .ok_or(NodeError::UnknownNode(peer))?
            .clone();
        let network = providers.network().clone();
        let time = providers.time().clone();
        let policy = config.retry().clone();
        let sync = sync.clone();
        let events = events_tx.clone();

        tasks.push(providers.task().spawn_task(
            &format!("channel-{}-{}", id, peer),
            async move {
                let outcome = initiate(network, time, sync, peer_descriptor, policy)
                    .await
                    .map_err(|source| NodeError::Worker {
                        peer: Some(peer),
                        source,
                    });
                let _ = events.send(NodeEvent::Finished(outcome));
            },
        ));
    }

    let neighbor_count = descriptor.neighbors().len();
    let mut channels = Vec::with_capacity(neighbor_count);
    // Held until the node returns so peers never see an early close.
    let mut connections = Vec::with_capacity(neighbor_count);

    while channels.len() < neighbor_count {
        let Some(event) = events.recv().await else {
            break;
        };
        match event {
            NodeEvent::Accepted(worker) => {
                let peer = worker.peer();
                let events = events_tx.clone();
                tasks.push(providers.task().spawn_task(
                    &format!("channel-{}-{}", id, peer),
                    async move {
                        let outcome = worker.run().await.map_err(|source| NodeError::Worker {
                            peer: Some(peer),
                            source,
                        });
                        let _ = events.send(NodeEvent::Finished(outcome));
                    },
                ));
            }
            NodeEvent::Finished(Ok((summary, connection))) => {
                tracing::debug!(
                    "Node {} channel to {} done after {} rounds ({} buffered)",
                    id,
                    summary.peer,
                    summary.rounds,
                    summary.buffered
                );
                channels.push(summary);
                connections.push(connection);
            }
            NodeEvent::Finished(Err(e)) => {
                tracing::error!("Node {} stopping: {}", id, e);
                return Err(e);
            }
        }
    }

    let report = sync.report().ok_or(NodeError::Incomplete {
        round: sync.current_round(),
    })?;
    if let Some(sink) = config.sink() {
        sink.write(&report)?;
    }

    let metrics = sync.metrics();
    tracing::info!(
        "Node {} done: eccentricity {}, {} rounds, {} buffered envelopes",
        id,
        report.eccentricity(),
        metrics.rounds_completed,
        metrics.buffered_messages
    );

    drop(connections);
    Ok(NodeOutcome {
        report,
        metrics,
        channels,
    })
}

async fn initiate<N, T>(
    network: N,
    time: T,
    sync: Rc<Synchronizer>,
    peer: NodeDescriptor,
    policy: RetryPolicy,
) -> Result<(WorkerSummary, Connection<N::Stream>), WorkerError>
where
    N: NetworkProvider,
    T: TimeProvider,
{
    let worker = ChannelWorker::connect(&network, &time, sync, &peer, &policy, JsonCodec).await?;
    worker.run().await
}

/// Accept until every larger-id neighbor has a channel.
///
/// Connections that fail the handshake are dropped and do not count.
async fn accept_loop<L, S>(
    listener: L,
    sync: Rc<Synchronizer>,
    expected: usize,
    events: mpsc::UnboundedSender<NodeEvent<S>>,
) where
    L: ChannelListener<Stream = S>,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let node_id = sync.node_id();
    let mut claimed = BTreeSet::new();

    while claimed.len() < expected {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                let _ = events.send(NodeEvent::Finished(Err(NodeError::Worker {
                    peer: None,
                    source: WorkerError::Transport(e.into()),
                })));
                return;
            }
        };
        tracing::debug!("Node {} accepted connection from {}", node_id, remote);

        let handshake = ChannelWorker::accept(stream, sync.clone(), JsonCodec, |peer| {
            !claimed.contains(&peer)
        })
        .await;
        match handshake {
            Ok(worker) => {
                // Claimed only once the Ack went out; a failed handshake
                // leaves the peer free to reconnect.
                claimed.insert(worker.peer());
                if events.send(NodeEvent::Accepted(worker)).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Node {} rejected connection from {}: {}",
                    node_id,
                    remote,
                    e
                );
            }
        }
    }

    tracing::debug!("Node {} accepted all {} channels", node_id, expected);
}
