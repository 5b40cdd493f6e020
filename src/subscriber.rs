//! Subscriber-side view of a session's output channel

use crate::events::MarketDataEvent;

/// Finite stream of replayed events for one subscriber.
///
/// Ends (returns `None`) once the session terminates and the buffered
/// tail has been drained. A stream obtained by re-subscribing joins
/// mid-replay: events already handed to the previous channel are not
/// redelivered.
pub struct EventStream {
    receiver: flume::Receiver<MarketDataEvent>,
}

impl EventStream {
    pub(crate) fn new(receiver: flume::Receiver<MarketDataEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event, waiting until one is emitted.
    ///
    /// `None` means the replay completed; the stream never yields again
    /// after that.
    pub async fn recv(&mut self) -> Option<MarketDataEvent> {
        self.receiver.recv_async().await.ok()
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Option<MarketDataEvent> {
        self.receiver.try_recv().ok()
    }

    /// Number of emitted events waiting to be drained
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }

    /// Drain whatever has been emitted so far, then return.
    ///
    /// Keeps pulling while the stream is still open only until the
    /// buffer runs dry; useful for polling consumers.
    pub fn drain(&mut self) -> Vec<MarketDataEvent> {
        let mut drained = Vec::new();
        while let Some(event) = self.try_recv() {
            drained.push(event);
        }
        drained
    }
}
