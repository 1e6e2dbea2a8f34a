//! Static topology: the node table and adjacency lists.
//!
//! # File format
//!
//! ```text
//! # lines whose first token is not an unsigned integer are ignored
//! 3                       # number of nodes
//! 0 dc01.example.com 5230 # id host port, for ids 0..n-1 in order
//! 1 dc02.example.com 5231
//! 2 dc03.example.com 5232
//! 1 2                     # neighbors of node 0
//! 0 2                     # neighbors of node 1
//! 0 1                     # neighbors of node 2
//! ```
//!
//! Everything after a `#` on a line is a comment.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;

use crate::error::TopologyError;
use lockstep_core::NodeId;

/// Largest topology file accepted by [`Topology::from_file`].
pub const MAX_TOPOLOGY_FILE_SIZE: u64 = 100_000;

/// One node of the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    id: NodeId,
    host: String,
    port: u16,
    neighbors: Vec<NodeId>,
}

impl NodeDescriptor {
    /// Create a descriptor. Neighbors keep the given order.
    pub fn new(id: NodeId, host: impl Into<String>, port: u16, neighbors: Vec<NodeId>) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            neighbors,
        }
    }

    /// This node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Host name the node listens on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the node listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, as passed to the network provider.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Direct neighbors.
    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Neighbors this node connects to (smaller ids).
    pub fn initiates_to(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.neighbors.iter().copied().filter(move |n| *n < self.id)
    }

    /// Neighbors that connect to this node (larger ids).
    pub fn accepts_from(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.neighbors.iter().copied().filter(move |n| *n > self.id)
    }

    /// Whether `peer` is a direct neighbor.
    pub fn is_neighbor(&self, peer: NodeId) -> bool {
        self.neighbors.contains(&peer)
    }
}

/// A validated topology: ids `0..n-1`, symmetric adjacency, connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    nodes: Vec<NodeDescriptor>,
}

impl Topology {
    /// Validate and build a topology from its descriptors.
    pub fn new(nodes: Vec<NodeDescriptor>) -> Result<Self, TopologyError> {
        if nodes.is_empty() {
            return Err(TopologyError::Empty);
        }

        let n = nodes.len();
        for (index, node) in nodes.iter().enumerate() {
            let expected = NodeId::new(index as u32);
            if node.id != expected {
                return Err(TopologyError::UnexpectedNodeId {
                    expected,
                    found: node.id,
                });
            }

            let mut seen = BTreeSet::new();
            for &neighbor in &node.neighbors {
                if neighbor.index() >= n {
                    return Err(TopologyError::NeighborOutOfRange {
                        node: node.id,
                        neighbor,
                    });
                }
                if neighbor == node.id {
                    return Err(TopologyError::SelfLoop { node: node.id });
                }
                if !seen.insert(neighbor) {
                    return Err(TopologyError::DuplicateNeighbor {
                        node: node.id,
                        neighbor,
                    });
                }
            }
        }

        for node in &nodes {
            for &neighbor in &node.neighbors {
                if !nodes[neighbor.index()].is_neighbor(node.id) {
                    return Err(TopologyError::Asymmetric {
                        node: node.id,
                        neighbor,
                    });
                }
            }
        }

        let topology = Self { nodes };
        topology.check_connected()?;
        Ok(topology)
    }

    /// Parse the text format described in the module docs.
    pub fn parse(text: &str) -> Result<Self, TopologyError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(index, raw)| (index + 1, strip_comment(raw)))
            .filter(|(_, line)| starts_with_number(line));

        let (line_no, header) = lines.next().ok_or(TopologyError::Empty)?;
        let count = header.split_whitespace().next().unwrap_or_default();
        let n: usize = parse_token(count, line_no, "node count")?;
        if n == 0 {
            return Err(TopologyError::Empty);
        }

        let mut entries = Vec::with_capacity(n);
        for found in 0..n {
            let (line_no, line) = lines.next().ok_or(TopologyError::Truncated {
                expected: 2 * n,
                found,
            })?;
            entries.push(parse_node_line(line, line_no)?);
        }

        let mut nodes = Vec::with_capacity(n);
        for (index, (id, host, port)) in entries.into_iter().enumerate() {
            let neighbors = match lines.next() {
                Some((line_no, line)) => parse_neighbor_line(line, line_no)?,
                // A lone node has nothing to list.
                None if n == 1 => Vec::new(),
                None => {
                    return Err(TopologyError::Truncated {
                        expected: 2 * n,
                        found: n + index,
                    })
                }
            };
            nodes.push(NodeDescriptor::new(id, host, port, neighbors));
        }

        Self::new(nodes)
    }

    /// Read and parse a topology file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        if size > MAX_TOPOLOGY_FILE_SIZE {
            return Err(TopologyError::FileTooLarge {
                size,
                max: MAX_TOPOLOGY_FILE_SIZE,
            });
        }

        let text = std::fs::read_to_string(path)?;
        let topology = Self::parse(&text)?;
        tracing::debug!(
            "Loaded topology with {} nodes from {}",
            topology.len(),
            path.display()
        );
        Ok(topology)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a valid topology has at least one node.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Descriptor of node `id`, if it exists.
    pub fn descriptor(&self, id: NodeId) -> Option<&NodeDescriptor> {
        self.nodes.get(id.index())
    }

    /// All descriptors, ordered by id.
    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    /// Every edge once, as `(acceptor, initiator)`.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .iter()
            .flat_map(|node| node.accepts_from().map(move |peer| (node.id, peer)))
            .collect()
    }

    /// Largest possible distance between two nodes: `n - 1`.
    pub fn max_hop(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Number of rounds that exchange envelopes: `n - 2`.
    ///
    /// Round `r` fills layer `r + 1`, so after `n - 2` rounds all `n - 1`
    /// layers are final.
    pub fn terminal_round(&self) -> u64 {
        self.nodes.len().saturating_sub(2) as u64
    }

    fn check_connected(&self) -> Result<(), TopologyError> {
        let mut reached = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([NodeId::new(0)]);
        reached[0] = true;

        while let Some(id) = queue.pop_front() {
            for &neighbor in self.nodes[id.index()].neighbors() {
                if !reached[neighbor.index()] {
                    reached[neighbor.index()] = true;
                    queue.push_back(neighbor);
                }
            }
        }

        match reached.iter().position(|r| !r) {
            Some(index) => Err(TopologyError::Disconnected {
                unreachable: NodeId::new(index as u32),
            }),
            None => Ok(()),
        }
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn starts_with_number(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .is_some_and(|token| token.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_token<T: std::str::FromStr>(
    token: &str,
    line: usize,
    what: &str,
) -> Result<T, TopologyError> {
    token.parse().map_err(|_| TopologyError::Parse {
        line,
        message: format!("invalid {}: {:?}", what, token),
    })
}

fn parse_node_line(line: &str, line_no: usize) -> Result<(NodeId, String, u16), TopologyError> {
    let mut tokens = line.split_whitespace();
    let (Some(id), Some(host), Some(port)) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(TopologyError::Parse {
            line: line_no,
            message: "expected `id host port`".to_string(),
        });
    };

    let id = parse_token(id, line_no, "node id")?;
    let port = parse_token(port, line_no, "port")?;
    Ok((id, host.to_string(), port))
}

fn parse_neighbor_line(line: &str, line_no: usize) -> Result<Vec<NodeId>, TopologyError> {
    line.split_whitespace()
        .map(|token| parse_token(token, line_no, "neighbor id"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TRIANGLE: &str = "\
# three nodes, all connected
3
0 localhost 5230
1 localhost 5231
2 localhost 5232

1 2   # node 0
0 2
0 1
";

    #[test]
    fn test_parse_with_comments_and_blank_lines() {
        let topology = Topology::parse(TRIANGLE).expect("valid topology");

        assert_eq!(topology.len(), 3);
        assert_eq!(topology.max_hop(), 2);
        assert_eq!(topology.terminal_round(), 1);

        let node1 = topology.descriptor(NodeId::new(1)).expect("node 1");
        assert_eq!(node1.address(), "localhost:5231");
        assert_eq!(node1.neighbors(), &[NodeId::new(0), NodeId::new(2)]);
        assert_eq!(node1.initiates_to().collect::<Vec<_>>(), vec![NodeId::new(0)]);
        assert_eq!(node1.accepts_from().collect::<Vec<_>>(), vec![NodeId::new(2)]);

        assert_eq!(
            topology.edges(),
            vec![
                (NodeId::new(0), NodeId::new(1)),
                (NodeId::new(0), NodeId::new(2)),
                (NodeId::new(1), NodeId::new(2)),
            ]
        );
    }

    #[test]
    fn test_single_node_needs_no_neighbor_line() {
        let topology = Topology::parse("1\n0 localhost 6000\n").expect("valid topology");
        assert_eq!(topology.len(), 1);
        assert_eq!(topology.max_hop(), 0);
        assert_eq!(topology.terminal_round(), 0);
        assert!(topology.edges().is_empty());
    }

    #[test]
    fn test_rejects_asymmetric_adjacency() {
        let text = "3\n0 h 1\n1 h 2\n2 h 3\n1 2\n0\n0 1\n";
        let err = Topology::parse(text).expect_err("1 does not list 2");
        assert!(matches!(
            err,
            TopologyError::Asymmetric { node, neighbor }
                if node == NodeId::new(2) && neighbor == NodeId::new(1)
        ));
    }

    #[test]
    fn test_rejects_disconnected_graph() {
        let text = "4\n0 h 1\n1 h 2\n2 h 3\n3 h 4\n1\n0\n3\n2\n";
        let err = Topology::parse(text).expect_err("two components");
        assert!(matches!(
            err,
            TopologyError::Disconnected { unreachable } if unreachable == NodeId::new(2)
        ));
    }

    #[test]
    fn test_rejects_bad_neighbor_lists() {
        let self_loop = "2\n0 h 1\n1 h 2\n0 1\n0\n";
        assert!(matches!(
            Topology::parse(self_loop),
            Err(TopologyError::SelfLoop { .. })
        ));

        let out_of_range = "2\n0 h 1\n1 h 2\n1 5\n0\n";
        assert!(matches!(
            Topology::parse(out_of_range),
            Err(TopologyError::NeighborOutOfRange { .. })
        ));

        let duplicate = "2\n0 h 1\n1 h 2\n1 1\n0\n";
        assert!(matches!(
            Topology::parse(duplicate),
            Err(TopologyError::DuplicateNeighbor { .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_order_ids_and_truncation() {
        let swapped = "2\n1 h 1\n0 h 2\n1\n0\n";
        assert!(matches!(
            Topology::parse(swapped),
            Err(TopologyError::UnexpectedNodeId { .. })
        ));

        let truncated = "3\n0 h 1\n1 h 2\n2 h 3\n1 2\n";
        assert!(matches!(
            Topology::parse(truncated),
            Err(TopologyError::Truncated {
                expected: 6,
                found: 4
            })
        ));

        let bad_port = "1\n0 h port\n";
        assert!(matches!(
            Topology::parse(bad_port),
            Err(TopologyError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_empty_topology() {
        assert!(matches!(Topology::parse(""), Err(TopologyError::Empty)));
        assert!(matches!(Topology::parse("0\n"), Err(TopologyError::Empty)));
    }

    #[test]
    fn test_from_file_size_limit() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(TRIANGLE.as_bytes()).expect("write");
        let topology = Topology::from_file(file.path()).expect("load");
        assert_eq!(topology.len(), 3);

        let mut big = tempfile::NamedTempFile::new().expect("temp file");
        let padding = "#".repeat(MAX_TOPOLOGY_FILE_SIZE as usize + 1);
        big.write_all(padding.as_bytes()).expect("write");
        assert!(matches!(
            Topology::from_file(big.path()),
            Err(TopologyError::FileTooLarge { .. })
        ));
    }
}
