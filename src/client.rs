//! Client pool.
//!
//! Every worker dials the server (retrying forever on failure), sends the
//! greeting, reads a single reply and closes. The pool waits for all of its
//! workers whether they succeed or not.

use crate::config::Config;
use crate::protocol::{self, Request};
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Run `config.max_clients` workers concurrently and wait for all of them.
///
/// Returns the number of workers that finished, which always equals the
/// number launched.
pub async fn run_pool(config: &Config) -> usize {
    let config = Arc::new(config.clone());
    let mut workers = JoinSet::new();

    for id in 0..config.max_clients {
        workers.spawn(run_worker(id, Arc::clone(&config)));
    }

    info!(
        workers = config.max_clients,
        address = %config.address,
        "Client pool started"
    );

    let mut finished = 0;
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Client worker panicked");
        }
        finished += 1;
    }

    info!(finished, "Client pool finished");
    finished
}

/// One full request/response cycle, including dial retries.
///
/// Returns the reply on success. Failures after connecting are logged here
/// and only end this worker.
pub async fn run_worker(id: usize, config: Arc<Config>) -> Option<Bytes> {
    let stream = dial_with_retry(config.address, config.retry_delay).await;

    match exchange(stream, config.buffer_size).await {
        Ok(reply) => {
            info!(worker = id, response = %protocol::display(&reply), "Received response");
            Some(reply)
        }
        Err(e) => {
            warn!(worker = id, error = %e, "Client worker failed");
            None
        }
    }
}

/// Dial `addr` until it succeeds, sleeping `retry_delay` between attempts.
pub async fn dial_with_retry(addr: SocketAddr, retry_delay: Duration) -> TcpStream {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return stream,
            Err(e) => {
                warn!(
                    address = %addr,
                    retry_in = ?retry_delay,
                    error = %e,
                    "Error dialing server, retrying"
                );
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

/// Send the greeting and read one reply of at most `buffer_size` bytes.
///
/// The stream is dropped when this returns, on success or failure.
pub async fn exchange<S>(mut stream: S, buffer_size: usize) -> Result<Bytes, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(Request::greeting())
        .await
        .map_err(ClientError::Write)?;

    let mut buffer = BytesMut::zeroed(buffer_size);
    let n = stream.read(&mut buffer).await.map_err(ClientError::Read)?;
    if n == 0 {
        return Err(ClientError::Closed);
    }
    buffer.truncate(n);

    Ok(buffer.freeze())
}

/// Errors ending a single worker
#[derive(Debug)]
pub enum ClientError {
    Write(io::Error),
    Read(io::Error),
    Closed,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Write(e) => write!(f, "Error sending message: {}", e),
            ClientError::Read(e) => write!(f, "Error reading response: {}", e),
            ClientError::Closed => write!(f, "Server closed the connection without a response"),
        }
    }
}

impl std::error::Error for ClientError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Response;
    use crate::server::Server;
    use crate::tracker::ConnectionCounter;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    fn test_config(address: SocketAddr, max_clients: usize) -> Config {
        Config {
            address,
            max_clients,
            retry_delay: Duration::from_millis(50),
            ..Config::default()
        }
    }

    async fn start_server(address: SocketAddr) -> (SocketAddr, Arc<ConnectionCounter>) {
        let server = Server::new(test_config(address, 0));
        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();
        let counter = Arc::clone(server.counter());

        tokio::spawn(async move { server.serve(listener).await });

        (addr, counter)
    }

    /// An address nothing is listening on, as far as can be arranged.
    fn closed_port() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let stream = Builder::new()
            .write(Request::greeting())
            .read(Response::ack())
            .build();

        let reply = exchange(stream, 1024).await.unwrap();
        assert_eq!(&reply[..], Response::ack());
    }

    #[tokio::test]
    async fn test_exchange_write_error() {
        let stream = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
            .build();

        match exchange(stream, 1024).await {
            Err(ClientError::Write(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_read_error() {
        let stream = Builder::new()
            .write(Request::greeting())
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        match exchange(stream, 1024).await {
            Err(ClientError::Read(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_closed_without_reply() {
        let stream = Builder::new().write(Request::greeting()).build();

        match exchange(stream, 1024).await {
            Err(ClientError::Closed) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dial_retries_until_server_is_up() {
        let addr = closed_port();
        let config = Arc::new(test_config(addr, 1));

        let worker = tokio::spawn(run_worker(0, Arc::clone(&config)));

        // Let at least one dial fail before the port opens.
        tokio::time::sleep(config.retry_delay * 3).await;
        assert!(!worker.is_finished());
        let (_, counter) = start_server(addr).await;

        let reply = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not connect after the server came up")
            .unwrap();

        assert_eq!(reply.as_deref(), Some(Response::ack()));
        assert_eq!(counter.wait_for(1).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_completes_every_round_trip() {
        let (addr, counter) = start_server("127.0.0.1:0".parse().unwrap()).await;

        let finished = run_pool(&test_config(addr, 25)).await;

        assert_eq!(finished, 25);
        assert_eq!(counter.wait_for(25).await, 25);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_returns_when_workers_fail() {
        // Accepts and immediately hangs up, so every worker fails after dialing.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let finished = tokio::time::timeout(
            Duration::from_secs(10),
            run_pool(&test_config(addr, 10)),
        )
        .await
        .expect("pool hung on failing workers");

        assert_eq!(finished, 10);
    }
}
