//! Node identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a node in the topology.
///
/// Nodes are numbered `0..n-1`. On each edge the smaller id accepts the
/// connection and the larger id initiates it, so ids are totally ordered.
///
/// Serialized as a bare integer.
///
/// # Examples
///
/// ```
/// use lockstep_core::NodeId;
///
/// let id: NodeId = "3".parse().expect("valid id");
/// assert_eq!(id, NodeId::new(3));
/// assert_eq!(id.to_string(), "3");
/// assert!(NodeId::new(2) < id);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create a node id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The id as a table index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Error parsing a [`NodeId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid node id: {input:?}")]
pub struct NodeIdParseError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(NodeId)
            .map_err(|_| NodeIdParseError {
                input: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_negative_and_garbage() {
        assert!("-1".parse::<NodeId>().is_err());
        assert!("node".parse::<NodeId>().is_err());
        assert_eq!(" 7 ".parse::<NodeId>(), Ok(NodeId(7)));
    }

    #[test]
    fn test_serializes_as_bare_integer() {
        let json = serde_json::to_string(&vec![NodeId(1), NodeId(4)]).expect("serialize");
        assert_eq!(json, "[1,4]");
    }
}
