//! Messages exchanged on a channel.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use lockstep_core::{CodecError, MessageCodec, NodeId};

/// One round's application message from `source` to `dest`.
///
/// `payload[i]` is the sender's hop layer `i` (nodes at distance `i + 1`) as
/// it stood when the envelope was built. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    round: u64,
    source: NodeId,
    dest: NodeId,
    payload: Vec<BTreeSet<NodeId>>,
}

impl Envelope {
    /// Build an envelope.
    pub fn new(round: u64, source: NodeId, dest: NodeId, payload: Vec<BTreeSet<NodeId>>) -> Self {
        Self {
            round,
            source,
            dest,
            payload,
        }
    }

    /// Round the sender was in.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Sender.
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Receiver.
    pub fn dest(&self) -> NodeId {
        self.dest
    }

    /// The sender's hop table.
    pub fn payload(&self) -> &[BTreeSet<NodeId>] {
        &self.payload
    }

    /// Layer `index` of the sender's hop table, if present.
    pub fn layer(&self, index: usize) -> Option<&BTreeSet<NodeId>> {
        self.payload.get(index)
    }
}

/// Unit exchanged on a connection.
///
/// Each channel starts with a `Hello`/`Ack` handshake that tells the
/// acceptor who connected, followed by exactly one `Round` frame per round in
/// each direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Sent by the initiator right after connecting.
    Hello {
        /// The initiator's id.
        source: NodeId,
    },
    /// The acceptor's reply to `Hello`.
    Ack {
        /// The acceptor's id.
        source: NodeId,
    },
    /// One round's envelope.
    Round(Envelope),
}

impl Frame {
    /// Short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::Ack { .. } => "ack",
            Frame::Round(_) => "round",
        }
    }

    /// The envelope, if this is a `Round` frame.
    pub fn into_round(self) -> Option<Envelope> {
        match self {
            Frame::Round(envelope) => Some(envelope),
            _ => None,
        }
    }

    /// Encode with `codec`.
    pub fn encode<C: MessageCodec>(&self, codec: &C) -> Result<Vec<u8>, CodecError> {
        codec.encode(self)
    }

    /// Decode with `codec`.
    pub fn decode<C: MessageCodec>(codec: &C, bytes: &[u8]) -> Result<Self, CodecError> {
        codec.decode(bytes)
    }
}
