//! Progress events published while starting and stopping the stack.
//!
//! Orchestration always logs through `tracing`. Callers that want to render
//! their own progress (a spinner, a TUI) can additionally subscribe to a
//! stream of [`StackEvent`]s.

use std::pin::Pin;

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ResourceOp;
use crate::registry::Tier;

/// Type alias for a boxed async stream of events.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Default channel capacity for [`progress_channel`].
pub const DEFAULT_PROGRESS_BUFFER: usize = 100;

/// One step of a start or stop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// A batch of services is about to be started.
    Starting { tier: Tier, services: usize },
    ResourceStarting { id: String },
    /// Every resource of the batch was started; readiness polling begins.
    WaitingForReady { tier: Tier },
    ResourceWaiting { id: String },
    ResourceReady { id: String },
    ResourceFailed { id: String, op: ResourceOp },
    Stopping { services: usize },
    ResourceStopping { id: String },
    /// The run finished without error.
    Done,
}

/// Non-blocking sender for [`StackEvent`]s.
///
/// Events are dropped rather than awaited when the receiver lags behind or
/// is gone, so a slow consumer can never stall orchestration.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<StackEvent>,
}

impl ProgressSender {
    pub fn new(tx: mpsc::Sender<StackEvent>) -> Self {
        Self { tx }
    }

    /// Publish an event, dropping it if the channel is full or closed.
    ///
    /// Returns whether the event was queued.
    pub fn emit(&self, event: StackEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    /// Check if the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a progress sender and the stream receiving its events.
///
/// # Example
///
/// ```rust
/// use devstack::{progress_channel, StackEvent};
/// use futures::StreamExt;
///
/// # async fn example() {
/// let (sender, mut events) = progress_channel(16);
/// sender.emit(StackEvent::Done);
/// drop(sender);
///
/// assert_eq!(events.next().await, Some(StackEvent::Done));
/// assert_eq!(events.next().await, None);
/// # }
/// ```
pub fn progress_channel(buffer: usize) -> (ProgressSender, EventStream<StackEvent>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let stream: EventStream<StackEvent> = Box::pin(ReceiverStream::new(rx));
    (ProgressSender::new(tx), stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_progress_channel_delivers_in_order() {
        let (sender, stream) = progress_channel(DEFAULT_PROGRESS_BUFFER);

        sender.emit(StackEvent::Stopping { services: 1 });
        sender.emit(StackEvent::ResourceStopping {
            id: "db".to_string(),
        });
        sender.emit(StackEvent::Done);
        drop(sender);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(
            events,
            vec![
                StackEvent::Stopping { services: 1 },
                StackEvent::ResourceStopping {
                    id: "db".to_string()
                },
                StackEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_full_channel_drops_events() {
        let (sender, stream) = progress_channel(1);

        assert!(sender.emit(StackEvent::Done));
        assert!(!sender.emit(StackEvent::Done));
        drop(sender);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel_drops_events() {
        let (sender, stream) = progress_channel(4);
        drop(stream);

        assert!(sender.is_closed());
        assert!(!sender.emit(StackEvent::Done));
    }
}
