//! Per-node results and where they go.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ReportError;
use crate::hop_table::HopTable;
use lockstep_core::NodeId;

/// Final hop layers and eccentricity of one node.
///
/// Displays in the plain-text report format:
///
/// ```text
/// Node 3
/// 1-hop neighbors --> [2, 4]
/// 2-hop neighbors --> [0, 1]
/// Eccentricity: 2
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopReport {
    node_id: NodeId,
    layers: Vec<BTreeSet<NodeId>>,
    eccentricity: usize,
}

impl HopReport {
    /// Freeze a hop table into a report.
    pub fn from_table(table: &HopTable) -> Self {
        Self {
            node_id: table.owner(),
            layers: table.snapshot(),
            eccentricity: table.eccentricity(),
        }
    }

    /// Node this report belongs to.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// All hop layers; `layers()[k - 1]` holds the k-hop neighbors.
    pub fn layers(&self) -> &[BTreeSet<NodeId>] {
        &self.layers
    }

    /// Nodes exactly `k` hops away. Empty for `k == 0` or past the last layer.
    pub fn k_hop(&self, k: usize) -> BTreeSet<NodeId> {
        k.checked_sub(1)
            .and_then(|index| self.layers.get(index))
            .cloned()
            .unwrap_or_default()
    }

    /// Distance to the farthest node.
    pub fn eccentricity(&self) -> usize {
        self.eccentricity
    }
}

impl fmt::Display for HopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node {}", self.node_id)?;
        for (index, layer) in self.layers.iter().take(self.eccentricity).enumerate() {
            let ids: Vec<String> = layer.iter().map(ToString::to_string).collect();
            writeln!(f, "{}-hop neighbors --> [{}]", index + 1, ids.join(", "))?;
        }
        writeln!(f, "Eccentricity: {}", self.eccentricity)
    }
}

/// Destination for finished reports.
pub trait ReportSink: fmt::Debug {
    /// Persist or record `report`.
    fn write(&self, report: &HopReport) -> Result<(), ReportError>;
}

/// Writes each report to `<dir>/<prefix>-<id>.txt`.
#[derive(Debug, Clone)]
pub struct FileReportSink {
    dir: PathBuf,
    prefix: String,
}

impl FileReportSink {
    /// Sink writing into `dir`, file names starting with `prefix`.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the report of node `id` is written to.
    pub fn path_for(&self, id: NodeId) -> PathBuf {
        self.dir.join(format!("{}-{}.txt", self.prefix, id))
    }
}

impl ReportSink for FileReportSink {
    fn write(&self, report: &HopReport) -> Result<(), ReportError> {
        let path = self.path_for(report.node_id());
        let io_error = |source| ReportError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(io_error)?;
        std::fs::write(&path, report.to_string()).map_err(io_error)?;

        tracing::info!("Node {} wrote report to {}", report.node_id(), path.display());
        Ok(())
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    reports: RefCell<Vec<HopReport>>,
}

impl MemoryReportSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports written so far, in write order.
    pub fn reports(&self) -> Vec<HopReport> {
        self.reports.borrow().clone()
    }
}

impl ReportSink for MemoryReportSink {
    fn write(&self, report: &HopReport) -> Result<(), ReportError> {
        self.reports.borrow_mut().push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_node_zero() -> HopReport {
        let mut table = HopTable::new(NodeId::new(0), &[NodeId::new(1), NodeId::new(4)], 4);
        table
            .merge(0, &BTreeSet::from([NodeId::new(0), NodeId::new(2)]))
            .expect("merge");
        table
            .merge(0, &BTreeSet::from([NodeId::new(0), NodeId::new(3)]))
            .expect("merge");
        HopReport::from_table(&table)
    }

    #[test]
    fn test_display_format() {
        let report = cycle_node_zero();
        assert_eq!(
            report.to_string(),
            "Node 0\n1-hop neighbors --> [1, 4]\n2-hop neighbors --> [2, 3]\nEccentricity: 2\n"
        );
    }

    #[test]
    fn test_k_hop() {
        let report = cycle_node_zero();
        assert_eq!(report.k_hop(2), BTreeSet::from([NodeId::new(2), NodeId::new(3)]));
        assert!(report.k_hop(0).is_empty());
        assert!(report.k_hop(3).is_empty());
        assert!(report.k_hop(9).is_empty());
    }

    #[test]
    fn test_file_sink_writes_one_file_per_node() {
        let dir = tempfile::tempdir().expect("temp dir");
        let sink = FileReportSink::new(dir.path().join("out"), "cycle5");
        let report = cycle_node_zero();

        sink.write(&report).expect("write report");

        let path = dir.path().join("out").join("cycle5-0.txt");
        assert_eq!(sink.path_for(NodeId::new(0)), path);
        let written = std::fs::read_to_string(path).expect("read back");
        assert_eq!(written, report.to_string());
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryReportSink::new();
        sink.write(&cycle_node_zero()).expect("write");
        assert_eq!(sink.reports().len(), 1);
        assert_eq!(sink.reports()[0].eccentricity(), 2);
    }
}
