//! # lockstep-transport
//!
//! Point-to-point channels between neighboring nodes.
//!
//! - [`wire`]: `[length:4][checksum:4][payload:N]` framing
//! - [`Connection`]: one whole frame per `send`/`receive` over any provider
//!   stream
//! - [`connect_with_retry`] and [`RetryPolicy`]: how an initiator opens its
//!   channel
//! - [`MemoryNetwork`] / [`MemoryProviders`]: in-process network for tests and
//!   single-process clusters

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod config;
mod connection;
mod error;
mod memory;
pub mod wire;

pub use config::RetryPolicy;
pub use connection::{connect_with_retry, Connection};
pub use error::{TransportError, TransportResult};
pub use memory::{MemoryListener, MemoryNetwork, MemoryProviders};
pub use wire::{WireError, HEADER_SIZE, MAX_PAYLOAD_SIZE};

pub use lockstep_core::{
    ChannelListener, NetworkProvider, Providers, TaskProvider, TimeProvider, TokioProviders,
};
