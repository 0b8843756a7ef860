use tokio::sync::{broadcast, mpsc};

use crate::ProgressEvent;

/// Receiver of TWAP progress events.
///
/// Called from the execution loop, so implementations must not block.
/// The loop never waits on a consumer; a slow or absent reader loses events
/// rather than stalling the run.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

impl ProgressSink for broadcast::Sender<ProgressEvent> {
    fn publish(&self, event: ProgressEvent) {
        // No active receivers is fine
        let _ = self.send(event);
    }
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn publish(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _event: ProgressEvent) {}
}
