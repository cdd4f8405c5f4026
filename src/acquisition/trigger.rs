//! Operator trigger channel for software-triggered acquisitions.

use tokio::sync::mpsc;

/// Fires software triggers. Dropping every sender ends the acquisition
/// at its next trigger wait.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::UnboundedSender<()>,
}

/// Receives software triggers inside the session loop.
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::UnboundedReceiver<()>,
}

/// Create a connected trigger sender and receiver.
pub fn trigger_channel() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TriggerSender { tx }, TriggerReceiver { rx })
}

impl TriggerSender {
    /// Queue one trigger. Returns false when the session is gone.
    pub fn fire(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

impl TriggerReceiver {
    /// A receiver whose sender is already gone; for internally triggered runs.
    pub fn closed() -> Self {
        let (_, rx) = trigger_channel();
        rx
    }

    /// Wait for the next trigger. Returns false once every sender is dropped
    /// and no triggers are queued.
    pub async fn next(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_triggers_survive_sender_drop() {
        let (tx, mut rx) = trigger_channel();
        assert!(tx.fire());
        drop(tx);
        assert!(rx.next().await);
        assert!(!rx.next().await);
    }

    #[tokio::test]
    async fn closed_receiver_ends_immediately() {
        let mut rx = TriggerReceiver::closed();
        assert!(!rx.next().await);
    }
}
