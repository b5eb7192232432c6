//! Signal handling for graceful shutdown.

use tokio::sync::mpsc;
use tracing::info;

/// Set up signal handlers for graceful shutdown.
///
/// Returns a receiver that gets a message on SIGTERM (Unix) or Ctrl+C.
pub fn setup_signal_handlers() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);

    #[cfg(unix)]
    {
        let tx_term = tx.clone();
        tokio::spawn(async move {
            if let Ok(mut stream) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                stream.recv().await;
                info!("Received SIGTERM");
                let _ = tx_term.send(()).await;
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
            let _ = tx.send(()).await;
        }
    });

    rx
}
