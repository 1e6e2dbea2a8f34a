//! # lockstep-core
//!
//! Core abstractions shared by the lockstep crates:
//!
//! - **Provider traits**: [`NetworkProvider`], [`TimeProvider`] and
//!   [`TaskProvider`], bundled by [`Providers`], so the same node code runs on
//!   real TCP or on an in-memory network.
//! - **Node identity**: [`NodeId`].
//! - **Codec**: [`MessageCodec`] with the default [`JsonCodec`].
//!
//! All providers follow a single-core design: futures are `!Send` and tasks
//! are spawned with `spawn_local`, so callers run inside a
//! [`tokio::task::LocalSet`] on a current-thread runtime.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod network;
mod providers;
mod task;
mod time;
mod types;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use network::{ChannelListener, NetworkProvider, TokioChannelListener, TokioNetworkProvider};
pub use providers::{Providers, TokioProviders};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
pub use types::{NodeId, NodeIdParseError};
