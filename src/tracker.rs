//! Connection tracking.
//!
//! Handlers never touch the counter directly. Each one sends a payload-less
//! notification once it has read a request, and a single background task
//! turns notifications into increments. The counter lock is only held for
//! the increment-and-read.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capacity of the notification channel. A capacity of one is the closest
/// tokio gets to a rendezvous channel: a handler suspends in `notify` while
/// the tracker is still busy with the previous event.
const NOTIFY_CAPACITY: usize = 1;

/// Total number of connections that completed a read since server start
#[derive(Debug, Default)]
pub struct ConnectionCounter {
    total: Mutex<u64>,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the total and return the new value
    pub fn increment(&self) -> u64 {
        let mut total = self.total.lock().unwrap_or_else(|e| e.into_inner());
        *total += 1;
        *total
    }

    /// Current total
    #[cfg(test)]
    pub fn get(&self) -> u64 {
        *self.total.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Poll until the total reaches `expected` or a few seconds pass.
    /// Returns the last observed total.
    #[cfg(test)]
    pub async fn wait_for(&self, expected: u64) -> u64 {
        for _ in 0..300 {
            if self.get() >= expected {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.get()
    }
}

/// Sending half of the notification channel, cloned into every handler.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: mpsc::Sender<()>,
}

impl Notifier {
    /// Signal one new connection.
    ///
    /// Suspends while the channel is full. The tracker never exits while a
    /// sender is alive, so a failed send only happens if the runtime is
    /// tearing down.
    pub async fn notify(&self) {
        if self.sender.send(()).await.is_err() {
            warn!("Connection tracker is gone, notification dropped");
        }
    }
}

/// Start the tracker task and return the handle handlers notify through.
pub fn spawn(counter: Arc<ConnectionCounter>) -> Notifier {
    let (sender, receiver) = mpsc::channel(NOTIFY_CAPACITY);
    tokio::spawn(track_connections(receiver, counter));
    Notifier { sender }
}

/// Consume notifications until every sender is dropped.
async fn track_connections(mut receiver: mpsc::Receiver<()>, counter: Arc<ConnectionCounter>) {
    while receiver.recv().await.is_some() {
        let total = counter.increment();
        info!(total, "New connection received");
    }
}
