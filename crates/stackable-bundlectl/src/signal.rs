use tokio::sync::watch;
use tracing::warn;

/// Flips to `true` once Ctrl-C is received and hands the flag out to any number of consumers.
pub struct CancelWatcher {
    watch_rx: watch::Receiver<bool>,
}

impl CancelWatcher {
    /// Watches for Ctrl-C in a background task. Must be called within a runtime.
    pub fn ctrl_c() -> Self {
        let (watch_tx, watch_rx) = watch::channel(false);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    watch_tx.send(true).ok();
                }
                Err(error) => {
                    warn!(%error, "failed to listen for Ctrl-C, the run cannot be cancelled");
                    // keep the sender alive so that receivers never observe a closed channel
                    std::future::pending::<()>().await;
                }
            }
        });

        Self { watch_rx }
    }

    /// The raw flag, for synchronous checks between units of work.
    pub fn receiver(&self) -> &watch::Receiver<bool> {
        &self.watch_rx
    }

    /// Completes once cancellation was requested.
    pub fn cancelled(&self) -> impl Future<Output = ()> + use<> {
        let mut watch_rx = self.watch_rx.clone();

        async move {
            if watch_rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
