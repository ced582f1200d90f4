//! Shutdown handling for the command-line tools
//!
//! # Design Principles (KISS)
//! - One function sets up the Ctrl+C handler with a broadcast channel
//! - Producer and viewer tasks each take a receiver (`resubscribe`)

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shutdown channel sender
pub type ShutdownSender = broadcast::Sender<()>;

/// Shutdown channel receiver
pub type ShutdownReceiver = broadcast::Receiver<()>;

/// Setup shutdown handling with Ctrl+C signal
///
/// # Example
/// ```ignore
/// let (_shutdown_tx, shutdown_rx) = setup_shutdown();
/// let (task, display) = spawn_viewer(config, frames, shutdown_rx.resubscribe());
/// ```
pub fn setup_shutdown() -> (ShutdownSender, ShutdownReceiver) {
    let (tx, rx) = broadcast::channel(1);

    let tx_clone = tx.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Ctrl+C received, initiating shutdown");
        let _ = tx_clone.send(());
    });

    (tx, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_subscribers_see_shutdown() {
        let (tx, mut rx) = setup_shutdown();
        let mut other = rx.resubscribe();

        tx.send(()).unwrap();
        assert!(rx.recv().await.is_ok());
        assert!(other.recv().await.is_ok());
    }
}
