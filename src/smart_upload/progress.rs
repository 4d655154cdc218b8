//! Progress event fan-out.
//!
//! Events are fire-and-forget: a job never blocks or fails because nobody is
//! listening. Subscribers that fall behind lose the oldest events, which is
//! acceptable for a progress feed.

use super::models::{ProgressEvent, ProgressStep};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, session_id: &str, step: ProgressStep, percent: u8, message: impl Into<String>) {
        let event = ProgressEvent {
            session_id: session_id.to_string(),
            step,
            percent: percent.min(100),
            message: message.into(),
        };
        debug!(
            session_id = %event.session_id,
            step = step.as_str(),
            percent = event.percent,
            "{}",
            event.message
        );
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = ProgressBus::new();
        let mut receiver = bus.subscribe();

        bus.emit("s-1", ProgressStep::Starting, 0, "starting");
        bus.emit("s-1", ProgressStep::Downloading, 5, "downloading");

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.step, ProgressStep::Starting);
        assert_eq!(second.step, ProgressStep::Downloading);
        assert!(first.percent <= second.percent);
    }

    #[test]
    fn emitting_without_subscribers_does_not_panic() {
        let bus = ProgressBus::new();
        bus.emit("s-1", ProgressStep::Complete, 100, "done");
    }
}
