//! Per-node configuration for [`run_node`](crate::run_node).
//!
//! The topology says who the node is and who its neighbors are; this says how
//! it connects and where its report goes.

use std::rc::Rc;

use lockstep_transport::RetryPolicy;

use crate::report::ReportSink;

/// Per-node configuration.
///
/// # Example
///
/// ```rust,ignore
/// // Retry every 500ms forever, keep the report in memory only
/// let config = NodeConfig::default();
///
/// // Full control via builder
/// let config = NodeConfig::builder()
///     .retry(RetryPolicy::local_network())
///     .sink(Rc::new(FileReportSink::new("out", "cycle5")))
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    retry: RetryPolicy,
    sink: Option<Rc<dyn ReportSink>>,
    listen_address: Option<String>,
}

impl NodeConfig {
    /// Start building a node configuration.
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }

    /// How initiator channels retry their connection.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Where the final report is written, if anywhere.
    pub fn sink(&self) -> Option<&Rc<dyn ReportSink>> {
        self.sink.as_ref()
    }

    /// Address to bind instead of the topology's `host:port`.
    pub fn listen_address(&self) -> Option<&str> {
        self.listen_address.as_deref()
    }
}

/// Builder for [`NodeConfig`].
#[derive(Debug, Clone, Default)]
pub struct NodeConfigBuilder {
    retry: Option<RetryPolicy>,
    sink: Option<Rc<dyn ReportSink>>,
    listen_address: Option<String>,
}

impl NodeConfigBuilder {
    /// Set the connection retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the report sink.
    pub fn sink(mut self, sink: Rc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Bind `address` (e.g. `0.0.0.0:5230`) instead of the topology address.
    pub fn listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = Some(address.into());
        self
    }

    /// Build the node configuration (infallible).
    pub fn build(self) -> NodeConfig {
        NodeConfig {
            retry: self.retry.unwrap_or_default(),
            sink: self.sink,
            listen_address: self.listen_address,
        }
    }
}
