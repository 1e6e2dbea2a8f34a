//! Per-node hop table.
//!
//! Layer `i` holds the nodes at distance exactly `i + 1` from the owner.
//! Layer 0 is known up front (the direct neighbors). Every later layer is
//! filled by one round of exchange: in round `r` a node learns, from each
//! neighbor, that neighbor's layer `r`; anything not yet visited is at
//! distance `r + 2` and goes into layer `r + 1`.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::HopTableError;
use lockstep_core::NodeId;

/// Hop layers plus the set of every node already placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopTable {
    owner: NodeId,
    layers: Vec<BTreeSet<NodeId>>,
    visited: BTreeSet<NodeId>,
}

impl HopTable {
    /// Table for `owner` with `max_hop` layers, layer 0 seeded with
    /// `neighbors`.
    pub fn new(owner: NodeId, neighbors: &[NodeId], max_hop: usize) -> Self {
        let mut layers = vec![BTreeSet::new(); max_hop];
        let mut visited = BTreeSet::from([owner]);

        if let Some(first) = layers.first_mut() {
            first.extend(neighbors.iter().copied());
            visited.extend(neighbors.iter().copied());
        }

        Self {
            owner,
            layers,
            visited,
        }
    }

    /// Merge a neighbor's layer `round` into layer `round + 1`.
    ///
    /// Returns how many nodes were newly placed.
    pub fn merge(
        &mut self,
        round: u64,
        peer_layer: &BTreeSet<NodeId>,
    ) -> Result<usize, HopTableError> {
        let index = round as usize + 1;
        if index >= self.layers.len() {
            return Err(HopTableError::LayerOutOfRange {
                index,
                max_hop: self.layers.len(),
            });
        }

        let mut added = 0;
        for &id in peer_layer {
            if self.visited.insert(id) {
                self.layers[index].insert(id);
                added += 1;
            }
        }
        Ok(added)
    }

    /// Owner of the table.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// Number of layers (`n - 1`).
    pub fn max_hop(&self) -> usize {
        self.layers.len()
    }

    /// All layers.
    pub fn layers(&self) -> &[BTreeSet<NodeId>] {
        &self.layers
    }

    /// Owned copy of all layers, as carried in an envelope.
    pub fn snapshot(&self) -> Vec<BTreeSet<NodeId>> {
        self.layers.clone()
    }

    /// Owner plus every placed node.
    pub fn visited(&self) -> &BTreeSet<NodeId> {
        &self.visited
    }

    /// Distance to the farthest placed node; 0 when nothing is placed.
    pub fn eccentricity(&self) -> usize {
        self.layers
            .iter()
            .rposition(|layer| !layer.is_empty())
            .map_or(0, |index| index + 1)
    }

    /// Check that layers partition the placed nodes.
    ///
    /// No id is in two layers, every placed id is visited, and the owner is
    /// never placed.
    pub fn check_partition(&self) -> Result<(), HopTableError> {
        let mut placed_in = BTreeMap::new();

        for (layer_index, layer) in self.layers.iter().enumerate() {
            for &id in layer {
                if id == self.owner {
                    return Err(HopTableError::SelfPlaced { node: id });
                }
                if !self.visited.contains(&id) {
                    return Err(HopTableError::NotVisited {
                        node: id,
                        layer: layer_index,
                    });
                }
                if let Some(first) = placed_in.insert(id, layer_index) {
                    return Err(HopTableError::DuplicatePlacement {
                        node: id,
                        first,
                        second: layer_index,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u32]) -> BTreeSet<NodeId> {
        raw.iter().copied().map(NodeId::new).collect()
    }

    #[test]
    fn test_new_seeds_first_layer() {
        let table = HopTable::new(NodeId::new(0), &[NodeId::new(1), NodeId::new(4)], 4);

        assert_eq!(table.max_hop(), 4);
        assert_eq!(table.layers()[0], ids(&[1, 4]));
        assert!(table.layers()[1..].iter().all(BTreeSet::is_empty));
        assert_eq!(table.visited(), &ids(&[0, 1, 4]));
        assert_eq!(table.eccentricity(), 1);
        table.check_partition().expect("valid partition");
    }

    #[test]
    fn test_merge_skips_visited_nodes() {
        // Node 0 of the 5-cycle 0-1-2-3-4-0.
        let mut table = HopTable::new(NodeId::new(0), &[NodeId::new(1), NodeId::new(4)], 4);

        // Neighbor 1 reports its layer 0 = {0, 2}.
        let added = table.merge(0, &ids(&[0, 2])).expect("merge");
        assert_eq!(added, 1);
        // Neighbor 4 reports {0, 3}.
        let added = table.merge(0, &ids(&[0, 3])).expect("merge");
        assert_eq!(added, 1);

        assert_eq!(table.layers()[1], ids(&[2, 3]));
        assert_eq!(table.eccentricity(), 2);

        // Round 1 brings nothing new.
        assert_eq!(table.merge(1, &ids(&[3, 4])).expect("merge"), 0);
        assert!(table.layers()[2].is_empty());
        table.check_partition().expect("valid partition");
    }

    #[test]
    fn test_merge_past_last_layer() {
        let mut table = HopTable::new(NodeId::new(0), &[NodeId::new(1)], 1);
        assert_eq!(
            table.merge(0, &ids(&[1])),
            Err(HopTableError::LayerOutOfRange {
                index: 1,
                max_hop: 1
            })
        );
    }

    #[test]
    fn test_single_node_table() {
        let table = HopTable::new(NodeId::new(0), &[], 0);
        assert!(table.snapshot().is_empty());
        assert_eq!(table.eccentricity(), 0);
    }

    #[test]
    fn test_check_partition_detects_corruption() {
        let mut table = HopTable::new(NodeId::new(0), &[NodeId::new(1)], 3);
        table.layers[2].insert(NodeId::new(1));
        assert!(matches!(
            table.check_partition(),
            Err(HopTableError::DuplicatePlacement { first: 0, second: 2, .. })
        ));

        let mut table = HopTable::new(NodeId::new(0), &[NodeId::new(1)], 3);
        table.layers[1].insert(NodeId::new(0));
        assert_eq!(
            table.check_partition(),
            Err(HopTableError::SelfPlaced {
                node: NodeId::new(0)
            })
        );

        let mut table = HopTable::new(NodeId::new(0), &[NodeId::new(1)], 3);
        table.layers[1].insert(NodeId::new(2));
        assert_eq!(
            table.check_partition(),
            Err(HopTableError::NotVisited {
                node: NodeId::new(2),
                layer: 1
            })
        );
    }
}
