use tokio::sync::oneshot;
use tracing::warn;

pub struct ShutdownSender(oneshot::Sender<()>);
pub struct ShutdownReceiver(oneshot::Receiver<()>);

pub fn new() -> (ShutdownSender, ShutdownReceiver) {
    let (tx, rx) = oneshot::channel();
    (ShutdownSender(tx), ShutdownReceiver(rx))
}

impl ShutdownSender {
    pub fn shutdown(self) {
        self.0.send(()).unwrap_or_else(|_| {
            warn!("Shutdown receiver already gone");
        });
    }
}

impl ShutdownReceiver {
    /// Resolves on shutdown, or when the sender is dropped
    pub async fn wait(&mut self) {
        let inner = &mut self.0;
        let _ = inner.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_resolves_after_shutdown() {
        let (tx, mut rx) = new();
        tx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), rx.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_also_releases_waiter() {
        let (tx, mut rx) = new();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), rx.wait()).await.unwrap();
    }
}
