//! Stop barrier between the engine and its accept loop.
//!
//! The engine keeps a [`ShutdownTrigger`]; the accept loop owns the matching
//! [`ShutdownSignal`]. Triggering sends a [`StopAck`] to the loop and waits for
//! the loop to complete it, which it does only after closing the listener.

use tokio::sync::oneshot;

/// Create a connected trigger/signal pair.
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = oneshot::channel();
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Held by the engine; consumed by a stop.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: oneshot::Sender<StopAck>,
}

impl ShutdownTrigger {
    /// Ask the loop to stop and wait until it has.
    ///
    /// Returns immediately if the loop is already gone; a dropped ack counts
    /// as completion.
    pub async fn trigger(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(StopAck { tx: ack_tx }).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

/// Held by the accept loop.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: oneshot::Receiver<StopAck>,
}

impl ShutdownSignal {
    /// Wait for a stop request.
    ///
    /// `None` means the trigger was dropped without a stop (the engine went
    /// away). Cancel-safe: a pending stop survives a dropped call.
    pub async fn recv(&mut self) -> Option<StopAck> {
        (&mut self.rx).await.ok()
    }
}

/// Completion token for one stop request.
#[derive(Debug)]
pub struct StopAck {
    tx: oneshot::Sender<()>,
}

impl StopAck {
    /// Release the waiting stopper.
    pub fn complete(self) {
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_waits_for_completion() {
        let (trigger, mut signal) = channel();
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();

        tokio::spawn(async move {
            let ack = signal.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.store(true, Ordering::SeqCst);
            ack.complete();
        });

        trigger.trigger().await;
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn trigger_returns_when_loop_is_gone() {
        let (trigger, signal) = channel();
        drop(signal);
        tokio::time::timeout(Duration::from_secs(1), trigger.trigger())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_trigger_reads_as_none() {
        let (trigger, mut signal) = channel();
        drop(trigger);
        assert!(signal.recv().await.is_none());
    }
}
