//! In-process network provider.
//!
//! Listeners are registered by address in a shared table; `connect` hands the
//! listener one half of a `tokio::io::duplex` pipe. Connecting to an address
//! with no listener fails with `ConnectionRefused`, exactly like a TCP peer
//! that has not started yet, so initiators go through their retry policy.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex};

use crate::wire::{HEADER_SIZE, MAX_PAYLOAD_SIZE};
use lockstep_core::{
    ChannelListener, NetworkProvider, Providers, TokioTaskProvider, TokioTimeProvider,
};

/// Room for a few maximum-size frames in flight per direction.
const PIPE_CAPACITY: usize = 4 * (HEADER_SIZE + MAX_PAYLOAD_SIZE);

type Incoming = mpsc::UnboundedSender<(DuplexStream, String)>;

/// In-process [`NetworkProvider`].
///
/// Clones share the same address table, so every node of a cluster running
/// in one process must use clones of the same `MemoryNetwork`.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    listeners: Rc<RefCell<HashMap<String, Incoming>>>,
    next_client_port: Rc<Cell<u32>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a listener is currently bound at `addr`.
    pub fn is_bound(&self, addr: &str) -> bool {
        self.listeners
            .borrow()
            .get(addr)
            .is_some_and(|incoming| !incoming.is_closed())
    }
}

#[async_trait(?Send)]
impl NetworkProvider for MemoryNetwork {
    type Stream = DuplexStream;
    type Listener = MemoryListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        if self.is_bound(addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is already bound", addr),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.borrow_mut().insert(addr.to_string(), tx);
        tracing::trace!("MemoryNetwork bound {}", addr);

        Ok(MemoryListener {
            addr: addr.to_string(),
            incoming: Mutex::new(rx),
            listeners: self.listeners.clone(),
        })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        let incoming = self.listeners.borrow().get(addr).cloned();
        let Some(incoming) = incoming else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("nothing listening on {}", addr),
            ));
        };

        let port = self.next_client_port.get() + 1;
        self.next_client_port.set(port);

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        incoming
            .send((server, format!("memory-client:{}", port)))
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("listener on {} was closed", addr),
                )
            })?;
        Ok(client)
    }
}

/// Listener half of [`MemoryNetwork`]. Unregisters its address on drop.
pub struct MemoryListener {
    addr: String,
    incoming: Mutex<mpsc::UnboundedReceiver<(DuplexStream, String)>>,
    listeners: Rc<RefCell<HashMap<String, Incoming>>>,
}

#[async_trait(?Send)]
impl ChannelListener for MemoryListener {
    type Stream = DuplexStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("listener on {} is shut down", self.addr),
            )
        })
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.addr.clone())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.listeners.borrow_mut().remove(&self.addr);
    }
}

/// Provider bundle over [`MemoryNetwork`] with real Tokio time and tasks.
#[derive(Clone, Default)]
pub struct MemoryProviders {
    network: MemoryNetwork,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
}

impl MemoryProviders {
    /// Create a bundle with a fresh, empty network.
    pub fn new() -> Self {
        Self::with_network(MemoryNetwork::new())
    }

    /// Create a bundle sharing an existing network.
    pub fn with_network(network: MemoryNetwork) -> Self {
        Self {
            network,
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
        }
    }
}

impl Providers for MemoryProviders {
    type Network = MemoryNetwork;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }
}
