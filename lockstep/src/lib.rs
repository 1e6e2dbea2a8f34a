//! # lockstep
//!
//! Lock-step round synchronization over point-to-point channels, and the
//! hop-count discovery algorithm that rides on it.
//!
//! Every node of a static topology runs as its own process (or task). Nodes
//! only talk to their neighbors, one channel per edge. A per-node
//! [`Synchronizer`] makes the asynchronous exchange behave like a synchronous
//! system: no node starts round `r + 1` before it has sent and received
//! exactly one envelope for round `r` on every channel. Envelopes that arrive
//! early are held by their channel worker until the round catches up.
//!
//! On top of that, each node learns which nodes sit at each hop distance and
//! derives its eccentricity.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ node runner: accept loop + one ChannelWorker per edge     │
//! ├───────────────────────────────────────────────────────────┤
//! │ Synchronizer: round barrier, buffering, HopTable merges   │
//! ├───────────────────────────────────────────────────────────┤
//! │ lockstep-transport: framed Connection, connect retry      │
//! ├───────────────────────────────────────────────────────────┤
//! │ lockstep-core: Network / Time / Task providers, codec     │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use lockstep::{run_cluster, NodeConfig, Topology};
//! use lockstep_transport::MemoryProviders;
//!
//! let topology = Topology::parse(include_str!("../../demos/cycle5.txt"))?;
//! let local = tokio::task::LocalSet::new();
//! let reports = local
//!     .run_until(run_cluster(MemoryProviders::new(), &topology, &NodeConfig::default()))
//!     .await?;
//! assert!(reports.iter().all(|report| report.eccentricity() == 2));
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod cluster;
pub mod config;
pub mod envelope;
pub mod error;
pub mod hop_table;
pub mod node;
pub mod report;
pub mod synchronizer;
pub mod topology;
pub mod worker;

pub use cluster::run_cluster;
pub use config::{NodeConfig, NodeConfigBuilder};
pub use envelope::{Envelope, Frame};
pub use error::{
    HopTableError, NodeError, ReportError, SyncError, TopologyError, WorkerError,
};
pub use hop_table::HopTable;
pub use node::{run_node, run_node_with_stats, NodeOutcome};
pub use report::{FileReportSink, HopReport, MemoryReportSink, ReportSink};
pub use synchronizer::{RoundProgress, SyncMetrics, Synchronizer};
pub use topology::{NodeDescriptor, Topology};
pub use worker::{ChannelWorker, Role, WorkerState, WorkerSummary};

pub use lockstep_core::NodeId;
