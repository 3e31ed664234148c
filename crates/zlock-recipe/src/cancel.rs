//! Cancellation signal for in-flight acquisitions

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

/// Cloneable signal that aborts every acquisition observing it.
///
/// Cancellation is sticky: waiters that start listening after `cancel()` was
/// called still observe it.
#[derive(Clone)]
pub struct CancelSignal {
    sender: broadcast::Sender<()>,
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trigger cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the signal has been cancelled
    pub async fn cancelled(&self) {
        // subscribe before checking the flag so a concurrent cancel is not missed
        let mut receiver = self.sender.subscribe();
        if self.is_cancelled() {
            return;
        }
        let _ = receiver.recv().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
