//! Dual-mode listener: a TCP socket, or in-memory pipes for tests and
//! embedding.
//!
//! The in-process mode never touches the network. Each dial creates a
//! `tokio::io::duplex` pipe of `buffer_size` bytes and hands the server half
//! to the listener.

use crate::{Error, Result, config::ServerConfig};
use futures::Stream;
use hyper_util::rt::TokioIo;
use std::io;
use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint, Uri};

/// Connections accepted but not yet picked up by the serve loop.
const PENDING_CONNECTIONS: usize = 64;

/// The listener a server serves on.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    InProcess(InProcessListener),
}

impl Listener {
    /// Binds according to `config.in_process`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the TCP socket cannot be bound.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        if config.in_process {
            return Ok(Self::InProcess(InProcessListener::new(config.buffer_size)));
        }

        let address = normalize_address(&config.address);
        match TcpListener::bind(&address).await {
            Ok(listener) => Ok(Self::Tcp(listener)),
            Err(source) => Err(Error::Bind { address, source }),
        }
    }
}

/// `:port` becomes `0.0.0.0:port`; anything else is returned unchanged.
pub fn normalize_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

/// Accepts in-memory connections created by an [`InProcessDialer`].
#[derive(Debug)]
pub struct InProcessListener {
    incoming: mpsc::Receiver<DuplexStream>,
    dialer: InProcessDialer,
}

impl InProcessListener {
    pub fn new(buffer_size: usize) -> Self {
        let (connections, incoming) = mpsc::channel(PENDING_CONNECTIONS);
        Self {
            incoming,
            dialer: InProcessDialer {
                connections,
                buffer_size,
            },
        }
    }

    pub fn dialer(&self) -> InProcessDialer {
        self.dialer.clone()
    }

    /// The accepted server halves, as the serve loop consumes them.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<DuplexStream>> + Send + 'static {
        ReceiverStream::new(self.incoming).map(Ok)
    }
}

/// Client side of the in-process transport.
#[derive(Debug, Clone)]
pub struct InProcessDialer {
    connections: mpsc::Sender<DuplexStream>,
    buffer_size: usize,
}

impl InProcessDialer {
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Opens a new pipe to the listener.
    ///
    /// # Errors
    ///
    /// Fails with `ConnectionRefused` once the listener has been dropped.
    pub async fn dial(&self) -> io::Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(self.buffer_size);
        self.connections.send(server).await.map_err(|_| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "in-process listener closed")
        })?;
        Ok(client)
    }

    /// A tonic channel whose connections are in-process pipes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the first connection cannot be
    /// established.
    pub async fn channel(&self) -> Result<Channel> {
        let dialer = self.clone();
        let channel = Endpoint::from_static("http://in-process.trellis")
            .connect_with_connector(tower::service_fn(move |_: Uri| {
                let dialer = dialer.clone();
                async move { dialer.dial().await.map(TokioIo::new) }
            }))
            .await?;
        Ok(channel)
    }
}
