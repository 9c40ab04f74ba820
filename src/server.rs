//! TCP server acknowledging one message per connection.
//!
//! The accept loop runs forever and hands every connection to its own task.
//! A handler performs a single bounded read, notifies the connection
//! tracker, writes the acknowledgment and drops the stream.

use crate::config::Config;
use crate::protocol::{self, Response};
use crate::tracker::{self, ConnectionCounter, Notifier};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Server instance
pub struct Server {
    config: Config,
    counter: Arc<ConnectionCounter>,
}

/// How a connection handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Request read, tracker notified, acknowledgment written
    Responded,
    /// Peer closed its side before sending anything
    PeerClosed,
    /// The read failed; nothing was sent
    ReadFailed,
    /// Request read and counted, but the acknowledgment could not be written
    WriteFailed,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Server {
            config,
            counter: Arc::new(ConnectionCounter::new()),
        }
    }

    /// Bind the listening socket.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.address;
        create_listener(addr, self.config.backlog)
            .and_then(TcpListener::from_std)
            .map_err(|e| ServerError::Bind(addr, e))
    }

    /// Bind and serve until the process exits.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections forever.
    ///
    /// The tracker is started before the first accept so no notification is
    /// ever sent without a consumer.
    pub async fn serve(&self, listener: TcpListener) {
        let local = listener.local_addr().unwrap_or(self.config.address);
        let notifier = tracker::spawn(Arc::clone(&self.counter));
        let buffer_size = self.config.buffer_size;

        info!(address = %local, buffer_size, "Server started");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let notifier = notifier.clone();
                    tokio::spawn(async move {
                        let outcome = handle_connection(stream, notifier, buffer_size).await;
                        debug!(peer = %addr, ?outcome, "Connection closed");
                    });
                }
                Err(e) => {
                    error!(error = %e, "Error accepting connection");
                }
            }
        }
    }

    /// Get a reference to the connection counter for testing
    #[cfg(test)]
    pub fn counter(&self) -> &Arc<ConnectionCounter> {
        &self.counter
    }
}

/// Handle a single client connection.
///
/// The stream is owned here and dropped on every return path, which closes
/// it exactly once.
pub async fn handle_connection<S>(mut stream: S, notifier: Notifier, buffer_size: usize) -> Outcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::zeroed(buffer_size);

    let n = match stream.read(&mut buffer).await {
        Ok(0) => {
            warn!("Connection closed before any data was received");
            return Outcome::PeerClosed;
        }
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "Error reading from connection");
            return Outcome::ReadFailed;
        }
    };
    buffer.truncate(n);

    info!(bytes = n, payload = %protocol::display(&buffer), "Received");
    notifier.notify().await;

    match stream.write_all(Response::ack()).await {
        Ok(()) => Outcome::Responded,
        Err(e) => {
            warn!(error = %e, "Error writing response");
            Outcome::WriteFailed
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR and an explicit backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket.into())
}

/// Server errors that stop the process
#[derive(Debug)]
pub enum ServerError {
    Bind(SocketAddr, io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "Failed to listen on {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ServerError {}
