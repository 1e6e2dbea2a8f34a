//! Run every node of a topology in the current process.

use std::rc::Rc;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::node::run_node;
use crate::report::HopReport;
use crate::topology::Topology;
use lockstep_core::{NodeId, Providers, TaskProvider};

/// Run all nodes of `topology` as local tasks and collect their reports,
/// ordered by node id.
///
/// Must be called inside a `tokio::task::LocalSet`. All nodes share
/// `providers`, so with a `MemoryProviders` bundle every channel stays in
/// process. The first node failure aborts the remaining nodes.
pub async fn run_cluster<P: Providers>(
    providers: P,
    topology: &Topology,
    config: &NodeConfig,
) -> Result<Vec<HopReport>, NodeError> {
    let shared = Rc::new(topology.clone());
    tracing::info!("Starting cluster of {} nodes", shared.len());

    let handles: Vec<_> = (0..shared.len())
        .map(|index| {
            let id = NodeId::new(index as u32);
            let node_providers = providers.clone();
            let topology = shared.clone();
            let config = config.clone();
            providers.task().spawn_task(&format!("node-{}", id), async move {
                run_node(node_providers, &topology, id, &config).await
            })
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    let mut pending = handles.into_iter();
    while let Some(handle) = pending.next() {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(NodeError::Task(join_error)),
        };
        match outcome {
            Ok(report) => reports.push(report),
            Err(e) => {
                for remaining in pending {
                    remaining.abort();
                }
                return Err(e);
            }
        }
    }

    Ok(reports)
}
