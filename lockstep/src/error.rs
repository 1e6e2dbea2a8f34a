//! Error types for lockstep nodes.

use std::io;
use std::path::PathBuf;

use lockstep_core::{CodecError, NodeId};
use lockstep_transport::TransportError;
use thiserror::Error;

/// Errors raised while loading or validating a topology.
///
/// Any of these aborts startup.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The topology file could not be read.
    #[error("failed to read topology: {0}")]
    Io(#[from] io::Error),

    /// The topology file exceeds the size limit.
    #[error("topology file is {size} bytes (max: {max} bytes)")]
    FileTooLarge {
        /// Size of the file in bytes.
        size: u64,
        /// Largest accepted size in bytes.
        max: u64,
    },

    /// A line could not be parsed.
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },

    /// The file ended before every node and neighbor line was read.
    #[error("expected {expected} topology lines, found {found}")]
    Truncated {
        /// Node and neighbor lines required by the header.
        expected: usize,
        /// Lines actually present.
        found: usize,
    },

    /// The topology has no nodes.
    #[error("topology has no nodes")]
    Empty,

    /// Node lines must list ids `0..n-1` in order.
    #[error("expected node {expected}, found node {found}")]
    UnexpectedNodeId {
        /// Id required at this position.
        expected: NodeId,
        /// Id found in the file.
        found: NodeId,
    },

    /// A neighbor id is not a node of the topology.
    #[error("node {node} lists unknown neighbor {neighbor}")]
    NeighborOutOfRange {
        /// Node whose neighbor line is invalid.
        node: NodeId,
        /// The unknown id.
        neighbor: NodeId,
    },

    /// A node lists itself as a neighbor.
    #[error("node {node} lists itself as a neighbor")]
    SelfLoop {
        /// The offending node.
        node: NodeId,
    },

    /// A neighbor is listed twice.
    #[error("node {node} lists neighbor {neighbor} twice")]
    DuplicateNeighbor {
        /// Node whose neighbor line is invalid.
        node: NodeId,
        /// The repeated id.
        neighbor: NodeId,
    },

    /// Channels are bidirectional, so adjacency must be symmetric.
    #[error("node {node} lists {neighbor} but {neighbor} does not list {node}")]
    Asymmetric {
        /// Node listing the edge.
        node: NodeId,
        /// Node missing the reverse edge.
        neighbor: NodeId,
    },

    /// Some node cannot be reached from node 0.
    #[error("node {unreachable} is not reachable from node 0")]
    Disconnected {
        /// Smallest unreachable id.
        unreachable: NodeId,
    },
}

/// Errors raised by [`HopTable`](crate::HopTable) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HopTableError {
    /// A merge would write past the last layer.
    #[error("layer {index} is out of range (max hop {max_hop})")]
    LayerOutOfRange {
        /// Requested layer index.
        index: usize,
        /// Number of layers in the table.
        max_hop: usize,
    },

    /// A node id was found in two layers.
    #[error("node {node} placed in layers {first} and {second}")]
    DuplicatePlacement {
        /// The node id.
        node: NodeId,
        /// First layer holding it.
        first: usize,
        /// Second layer holding it.
        second: usize,
    },

    /// A placed node id is missing from the visited set.
    #[error("node {node} placed in layer {layer} but not marked visited")]
    NotVisited {
        /// The node id.
        node: NodeId,
        /// Layer holding it.
        layer: usize,
    },

    /// The owner appears in its own table.
    #[error("owner {node} placed in its own hop table")]
    SelfPlaced {
        /// The table owner.
        node: NodeId,
    },
}

/// Errors raised by [`Synchronizer`](crate::Synchronizer) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The id is not a neighbor of this node.
    #[error("node {0} is not a neighbor")]
    UnknownNeighbor(NodeId),

    /// An envelope broke the round protocol. Under reliable FIFO channels this
    /// cannot happen; it means an assumption about the transport is broken.
    #[error("protocol violation from node {peer}: {message}")]
    ProtocolViolation {
        /// Neighbor the envelope came from.
        peer: NodeId,
        /// Which check failed.
        message: String,
    },

    /// The session already finalized; no further rounds are exchanged.
    #[error("session already finalized at round {round}")]
    SessionFinished {
        /// Round at which the session finalized.
        round: u64,
    },
}

/// Errors that end a channel worker. Never retried.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Connection failed or closed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The handshake did not complete as expected.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer sent a frame of the wrong kind.
    #[error("expected {expected} frame, got {found}")]
    UnexpectedFrame {
        /// Frame kind the protocol required.
        expected: &'static str,
        /// Frame kind received.
        found: &'static str,
    },

    /// The synchronizer rejected a send or receive.
    #[error("synchronizer error: {0}")]
    Sync(#[from] SyncError),
}

/// Errors raised while persisting a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Writing the report failed.
    #[error("failed to write report to {path}: {source}")]
    Io {
        /// Destination of the report.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Errors that stop a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node id is not part of the topology.
    #[error("node {0} is not part of the topology")]
    UnknownNode(NodeId),

    /// The topology could not be loaded.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// The listener could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address of this node's listener.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A channel worker failed.
    #[error("channel to {} failed: {source}", describe_peer(.peer))]
    Worker {
        /// Neighbor on the other end, if the handshake got that far.
        peer: Option<NodeId>,
        /// What went wrong.
        #[source]
        source: WorkerError,
    },

    /// The report could not be written.
    #[error(transparent)]
    Report(#[from] ReportError),

    /// A node task panicked or was cancelled.
    #[error("node task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Every worker finished but the session did not finalize.
    #[error("all channels finished but the session stopped at round {round}")]
    Incomplete {
        /// Round the synchronizer was in.
        round: u64,
    },
}

fn describe_peer(peer: &Option<NodeId>) -> String {
    match peer {
        Some(id) => format!("node {}", id),
        None => "unknown peer".to_string(),
    }
}
