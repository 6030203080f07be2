//! Session cancellation: an external signal (SIGINT/SIGTERM, or a scripted call in
//! tests) propagates down through the orchestrator to any in-flight worker
//! subprocess, per the external-cancel -> SIGTERM -> grace period -> SIGKILL chain.
//!
//! Built on a `tokio::sync::watch` channel rather than a dedicated cancellation
//! crate, the same "smallest tool that already ships in the stack" choice the
//! rest of the orchestrator makes for its other signaling needs.

use tokio::sync::watch;

/// The triggering side, held by whatever observes the external signal (a signal
/// handler in `main`, or a test).
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The observing side, cloned into the orchestrator and every component that
/// needs to notice a cancellation mid-operation.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation fires. Never resolves if the paired
    /// `CancelHandle` is dropped without cancelling first, since the watch
    /// channel then has no more senders and `changed()` returns an error forever;
    /// callers select! this against real work, so that's fine.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Paired CancelHandle dropped without ever cancelling: this signal
                // will never fire, so park here rather than spuriously resolving.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Builds a fresh, never-cancelled pair.
pub fn channel() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// A signal that can never fire, for callers that don't wire up cancellation.
pub fn never() -> CancelSignal {
    let (_handle, signal) = channel();
    signal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let (handle, mut signal) = channel();
        assert!(!signal.is_cancelled());
        handle.cancel();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn never_is_never_cancelled_even_after_await_races() {
        let signal = never();
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn clone_observes_the_same_cancellation() {
        let (handle, signal) = channel();
        let mut clone = signal.clone();
        handle.cancel();
        clone.cancelled().await;
        assert!(signal.is_cancelled());
    }
}
