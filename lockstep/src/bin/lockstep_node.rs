//! Run one node of a topology over TCP.
//!
//! Start one process per node, in any order:
//!
//! ```bash
//! lockstep-node 0 demos/cycle5.txt --output-dir out
//! lockstep-node 1 demos/cycle5.txt --output-dir out
//! ...
//! ```
//!
//! Each node writes `out/<config name>-<id>.txt` once its session finalizes.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use lockstep::{run_node, FileReportSink, NodeConfig, NodeId, Topology};
use lockstep_transport::{RetryPolicy, TokioProviders};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "lockstep-node")]
#[command(about = "Discover k-hop neighbors and eccentricity for one topology node", long_about = None)]
struct Args {
    /// Id of the node this process runs
    node_id: NodeId,

    /// Topology file
    config: PathBuf,

    /// Directory for the report file (defaults to the topology file's directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Delay between connection attempts, in milliseconds
    #[arg(long, default_value = "500")]
    retry_delay_ms: u64,

    /// Give up after this many connection attempts (default: retry forever)
    #[arg(long)]
    max_connect_attempts: Option<u32>,

    /// Bind this address instead of the one in the topology file
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let topology = Topology::from_file(&args.config)?;

    let mut retry = RetryPolicy::fixed(Duration::from_millis(args.retry_delay_ms));
    if let Some(attempts) = args.max_connect_attempts {
        retry = retry.with_max_attempts(attempts);
    }

    let output_dir = args.output_dir.clone().unwrap_or_else(|| {
        args.config
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default()
    });
    let prefix = args
        .config
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());

    let mut builder = NodeConfig::builder()
        .retry(retry)
        .sink(Rc::new(FileReportSink::new(output_dir, prefix)));
    if let Some(listen) = args.listen.clone() {
        builder = builder.listen_address(listen);
    }
    let config = builder.build();

    let local = tokio::task::LocalSet::new();
    let report = local
        .run_until(run_node(TokioProviders::new(), &topology, args.node_id, &config))
        .await;

    match report {
        Ok(report) => {
            print!("{}", report);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Node {} failed: {}", args.node_id, e);
            Err(e.into())
        }
    }
}
