//! Progress reporting for long-running analyses.
//!
//! Sinks are fire-and-forget: delivery failure must never abort the
//! pipeline, so `report` takes `&self`, returns nothing, and swallows
//! errors. Implementations must be `Send + Sync`, since chunk tasks report
//! concurrently from spawned tasks.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Receives `(percent, message)` milestones over the lifetime of one
/// orchestration call.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8, message: &str);
}

/// Default sink for callers that don't track progress.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _percent: u8, _message: &str) {}
}

/// A progress event as shipped over a channel sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub percent: u8,
    pub message: String,
}

/// Publishes events into a bounded channel, dropping on full.
///
/// Decouples the pipeline from slow consumers: if nobody is draining the
/// channel, events are discarded rather than blocking a remote-call task.
pub struct ChannelProgress {
    tx: tokio::sync::mpsc::Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, percent: u8, message: &str) {
        let event = ProgressEvent {
            percent,
            message: message.to_string(),
        };
        if self.tx.try_send(event).is_err() {
            // Full or closed: drop the event, never block the pipeline.
            debug!("Progress channel full/closed, dropping {}% update", percent);
        }
    }
}

/// Wraps a sink and clamps percentages so observers always see a
/// monotonically non-decreasing sequence, even when concurrent chunk
/// tasks report out of order.
pub struct MonotonicProgress {
    inner: Arc<dyn ProgressSink>,
    last: AtomicU8,
}

impl MonotonicProgress {
    pub fn new(inner: Arc<dyn ProgressSink>) -> Self {
        Self {
            inner,
            last: AtomicU8::new(0),
        }
    }
}

impl ProgressSink for MonotonicProgress {
    fn report(&self, percent: u8, message: &str) {
        let percent = percent.min(100);
        let prev = self.last.fetch_max(percent, Ordering::SeqCst);
        self.inner.report(percent.max(prev), message);
    }
}


#[cfg(test)]
mod tests {
    use super::test_sink::RecordingSink;
    use super::*;

    #[test]
    fn noop_sink_does_not_panic() {
        NoopProgress.report(10, "starting");
        NoopProgress.report(100, "done");
    }

    #[test]
    fn channel_sink_drops_on_full_without_blocking() {
        let (sink, mut rx) = ChannelProgress::new(2);
        sink.report(10, "a");
        sink.report(20, "b");
        sink.report(30, "dropped");

        assert_eq!(rx.try_recv().unwrap().percent, 10);
        assert_eq!(rx.try_recv().unwrap().percent, 20);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelProgress::new(2);
        drop(rx);
        sink.report(50, "nobody listening");
    }

    #[test]
    fn monotonic_wrapper_never_goes_backwards() {
        let recorder = Arc::new(RecordingSink::default());
        let sink = MonotonicProgress::new(recorder.clone());
        sink.report(10, "start");
        sink.report(40, "upload");
        sink.report(20, "late chunk update");
        sink.report(90, "merge");

        assert_eq!(recorder.percents(), vec![10, 40, 40, 90]);
    }

    #[test]
    fn monotonic_wrapper_caps_at_100() {
        let recorder = Arc::new(RecordingSink::default());
        let sink = MonotonicProgress::new(recorder.clone());
        sink.report(120, "overflow");
        assert_eq!(recorder.percents(), vec![100]);
    }
}
