//! Replay session state machine and emission loop
//!
//! A session owns a cursor into the shared [`EventSequence`], a
//! [`VirtualClock`], a speed multiplier and a bounded output channel.
//! While running, a timer-driven loop wakes once per tick, emits every
//! event whose timestamp the virtual clock has passed, then advances
//! the clock by `speed * tick`. Batching emissions per tick bounds
//! scheduling overhead to one wake-up per tick regardless of how dense
//! the event stream is, while keeping timestamp order within the batch.
//!
//! Control calls (`stop`, `rewind`, `jump_to_event`, `forward`,
//! `set_speed`) mutate cursor and clock together under one lock, so the
//! loop always observes a consistent pair at the next tick boundary.
//! Stopping is cooperative: the batch already decided for the current
//! tick is still delivered.

use crate::clock::VirtualClock;
use crate::error::ReplayError;
use crate::events::{EventSequence, MarketDataEvent};
use crate::subscriber::EventStream;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

/// Mutable per-session state. One mutex, no cross-session locks.
struct SessionState {
    /// Index of the next not-yet-emitted event, `0 ..= sequence.len()`
    cursor: usize,
    clock: VirtualClock,
    /// Replay speed: 1.0 => original pace, 2.0 => double, 0.5 => half
    speed: f64,
    running: bool,
    terminated: bool,
    /// Guards against spawning a second emission loop
    looping: bool,
    subscribed: bool,
    /// Producer side of the output channel; `None` once the stream
    /// completed or the session was shut down
    tx: Option<flume::Sender<MarketDataEvent>>,
    /// Consumer side held until handed out by `subscribe`
    rx: Option<flume::Receiver<MarketDataEvent>>,
}

/// One independent replay of the shared event sequence.
///
/// Created by the registry, driven by its own emission loop, controlled
/// concurrently from caller tasks. Once the cursor passes the end of
/// the sequence while running, the session terminates: the stream
/// completes and every further operation fails with
/// [`ReplayError::SessionTerminated`].
pub struct ReplaySession {
    session_id: String,
    created: DateTime<Utc>,
    /// Emission loop tick interval
    publish_timer: Duration,
    channel_capacity: usize,
    sequence: Arc<EventSequence>,
    state: Mutex<SessionState>,
}

impl ReplaySession {
    pub fn new(
        session_id: String,
        sequence: Arc<EventSequence>,
        publish_timer: Duration,
        channel_capacity: usize,
    ) -> Self {
        let (tx, rx) = flume::bounded(channel_capacity);
        let state = SessionState {
            cursor: 0,
            clock: VirtualClock::at(sequence.first_timestamp().unwrap_or(0)),
            speed: 1.0,
            running: false,
            terminated: false,
            looping: false,
            subscribed: false,
            tx: Some(tx),
            rx: Some(rx),
        };
        Self {
            session_id,
            created: Utc::now(),
            publish_timer,
            channel_capacity,
            sequence,
            state: Mutex::new(state),
        }
    }

    /// Start or resume replay.
    ///
    /// Launches the emission loop unless one is already ticking; calling
    /// `start` on a running session only re-affirms the running flag.
    pub fn start(self: &Arc<Self>) -> Result<(), ReplayError> {
        let mut state = self.lock_live()?;
        trace!("start session: {}", self.session_id);
        state.running = true;
        if !state.looping {
            state.looping = true;
            tokio::spawn(emission_loop(Arc::clone(self)));
        }
        Ok(())
    }

    /// Pause replay. The loop observes the flag at the next tick
    /// boundary and idles without completing the stream.
    pub fn stop(&self) -> Result<(), ReplayError> {
        let mut state = self.lock_live()?;
        trace!("stop session: {}", self.session_id);
        state.running = false;
        Ok(())
    }

    /// Reset the cursor to the head of the sequence and the clock to the
    /// first event's timestamp (zero for an empty sequence).
    pub fn rewind(&self) -> Result<(), ReplayError> {
        let mut state = self.lock_live()?;
        trace!("rewind session: {}", self.session_id);
        state.cursor = 0;
        state
            .clock
            .reset_to(self.sequence.first_timestamp().unwrap_or(0));
        Ok(())
    }

    /// Jump to the event with the given id.
    ///
    /// An unknown id fails with [`ReplayError::InvalidEventId`] and
    /// leaves cursor and clock untouched.
    pub fn jump_to_event(&self, event_id: u32) -> Result<(), ReplayError> {
        let mut state = self.lock_live()?;
        trace!("jump to event: {}, session: {}", event_id, self.session_id);
        let index = self
            .sequence
            .index_of(event_id)
            .ok_or(ReplayError::InvalidEventId(event_id))?;
        self.seek(&mut state, index);
        Ok(())
    }

    /// Skip the next `skip_count` events.
    ///
    /// Skipping past the end clamps the cursor to the sequence length
    /// and leaves the clock unchanged; a running session then terminates
    /// naturally on its next tick. No wraparound.
    pub fn forward(&self, skip_count: usize) -> Result<(), ReplayError> {
        let mut state = self.lock_live()?;
        if skip_count == 0 {
            return Err(ReplayError::InvalidSkipCount(skip_count));
        }
        trace!("forward: {}, session: {}", skip_count, self.session_id);
        let target = state.cursor.saturating_add(skip_count);
        if target >= self.sequence.len() {
            trace!(
                "forward: {}, session: {} - reached end of events",
                skip_count,
                self.session_id
            );
            self.seek(&mut state, self.sequence.len());
        } else {
            self.seek(&mut state, target);
        }
        Ok(())
    }

    /// Replace the speed multiplier; takes effect on the next tick.
    pub fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        let mut state = self.lock_live()?;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ReplayError::InvalidSpeed(speed));
        }
        trace!("set replay speed: {} on session: {}", speed, self.session_id);
        state.speed = speed;
        Ok(())
    }

    /// Obtain the session's event stream.
    ///
    /// The first call hands out the channel created with the session, so
    /// events emitted before anyone subscribed are still buffered and
    /// delivered. A later call swaps in a fresh channel: the new
    /// consumer joins mid-stream and never sees events already routed to
    /// the previous one.
    pub fn subscribe(&self) -> Result<EventStream, ReplayError> {
        let mut state = self.lock_live()?;
        trace!("subscribe to session: {}", self.session_id);
        let receiver = match &state.rx {
            Some(rx) if !state.subscribed => rx.clone(),
            _ => {
                let (tx, rx) = flume::bounded(self.channel_capacity);
                state.tx = Some(tx);
                state.rx = Some(rx.clone());
                rx
            }
        };
        state.subscribed = true;
        Ok(EventStream::new(receiver))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    /// Index of the next event due for emission
    pub fn cursor(&self) -> usize {
        self.state.lock().cursor
    }

    /// Current virtual clock reading in milliseconds
    pub fn clock_ms(&self) -> f64 {
        self.state.lock().clock.current()
    }

    /// Cancel the session from the registry side (eviction).
    ///
    /// Marks the session terminated and releases both channel ends held
    /// here; the emission loop exits at its next tick boundary.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        trace!("shutdown session: {}", self.session_id);
        state.running = false;
        state.terminated = true;
        state.tx = None;
        state.rx = None;
    }

    /// Move the cursor; the clock follows the event at the new position.
    /// At `index == len` there is no event to read a timestamp from and
    /// the clock stays where it was.
    fn seek(&self, state: &mut SessionState, index: usize) {
        state.cursor = index;
        if let Some(event) = self.sequence.get(index) {
            state.clock.reset_to(event.timestamp);
        }
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, SessionState>, ReplayError> {
        let state = self.state.lock();
        if state.terminated {
            return Err(ReplayError::SessionTerminated(self.session_id.clone()));
        }
        Ok(state)
    }
}

impl std::fmt::Debug for ReplaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySession")
            .field("session_id", &self.session_id)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

/// Timer-driven emission loop, one task per running session.
///
/// Exits when the session is stopped (idles, stream stays open) or when
/// the cursor reaches the end of the sequence (completes the stream and
/// terminates the session for good). All state access happens in a
/// short critical section per tick; channel sends await outside it so
/// backpressure never blocks control calls.
async fn emission_loop(session: Arc<ReplaySession>) {
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + session.publish_timer,
        session.publish_timer,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let (batch, sender, finished) = {
            let mut state = session.state.lock();
            if state.terminated || !state.running {
                // Exit decision and flag clear under the same lock that
                // `start` takes, so a concurrent restart either sees the
                // loop still alive or spawns a new one.
                state.looping = false;
                trace!("emission loop idle, session: {}", session.session_id);
                return;
            }

            let mut batch = Vec::new();
            while let Some(event) = session.sequence.get(state.cursor) {
                if !state.clock.is_due(event.timestamp) {
                    break;
                }
                batch.push(event.clone());
                state.cursor += 1;
            }

            let speed = state.speed;
            state.clock.advance(speed, session.publish_timer);

            let finished = state.cursor >= session.sequence.len();
            let sender = if finished {
                trace!("stop and terminate session: {}", session.session_id);
                state.running = false;
                state.terminated = true;
                state.looping = false;
                state.rx = None;
                // Take the last producer handle so the batch still goes
                // out below; dropping it completes the stream.
                state.tx.take()
            } else {
                state.tx.clone()
            };
            (batch, sender, finished)
        };

        if let Some(tx) = sender {
            for event in batch {
                trace!(
                    "replay event: {} on session: {}",
                    event.id,
                    session.session_id
                );
                if tx.send_async(event).await.is_err() {
                    // Every receiver is gone; nothing left to deliver to.
                    warn!(
                        "subscriber channel disconnected, session: {}",
                        session.session_id
                    );
                    break;
                }
            }
        }

        if finished {
            debug!(
                "replay complete for session: {} after {:?}",
                session.session_id,
                started.elapsed()
            );
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support;
    use tokio::time::{sleep, timeout, Instant};

    const TICK: Duration = Duration::from_millis(100);

    fn session_with_capacity(pairs: &[(u32, u64)], capacity: usize) -> Arc<ReplaySession> {
        Arc::new(ReplaySession::new(
            "test-session".to_string(),
            Arc::new(test_support::sequence(pairs)),
            TICK,
            capacity,
        ))
    }

    fn three_event_session() -> Arc<ReplaySession> {
        session_with_capacity(&[(1, 1000), (2, 2000), (3, 3000)], 16)
    }

    async fn collect_ids(stream: &mut EventStream) -> Vec<u32> {
        let mut ids = Vec::new();
        while let Some(event) = stream.recv().await {
            ids.push(event.id);
        }
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn test_replays_all_events_in_order_then_terminates() {
        let session = three_event_session();
        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();

        assert_eq!(collect_ids(&mut stream).await, vec![1, 2, 3]);
        assert!(session.is_terminated());
        assert!(!session.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_operations_fail_after_termination() {
        let session = three_event_session();
        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();
        collect_ids(&mut stream).await;

        let id = session.session_id().to_string();
        let terminated = ReplayError::SessionTerminated(id);
        assert_eq!(session.start().unwrap_err(), terminated);
        assert_eq!(session.stop().unwrap_err(), terminated);
        assert_eq!(session.rewind().unwrap_err(), terminated);
        assert_eq!(session.jump_to_event(1).unwrap_err(), terminated);
        assert_eq!(session.forward(1).unwrap_err(), terminated);
        assert_eq!(session.set_speed(2.0).unwrap_err(), terminated);
        assert!(session.subscribe().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jump_right_after_start_replays_suffix_only() {
        let session = three_event_session();
        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();
        // Lands before the first tick fires
        session.jump_to_event(3).unwrap();

        assert_eq!(collect_ids(&mut stream).await, vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_skips_events() {
        let session = three_event_session();
        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();
        session.forward(1).unwrap();

        assert_eq!(collect_ids(&mut stream).await, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewind_after_jump_replays_from_the_beginning() {
        let session = three_event_session();
        session.jump_to_event(2).unwrap();
        assert_eq!(session.cursor(), 1);
        assert_eq!(session.clock_ms(), 2000.0);

        session.rewind().unwrap();
        assert_eq!(session.cursor(), 0);
        assert_eq!(session.clock_ms(), 1000.0);

        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();
        assert_eq!(collect_ids(&mut stream).await, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jump_to_unknown_id_leaves_state_untouched() {
        let session = three_event_session();
        session.forward(1).unwrap();
        let cursor = session.cursor();
        let clock = session.clock_ms();

        assert_eq!(
            session.jump_to_event(99).unwrap_err(),
            ReplayError::InvalidEventId(99)
        );
        assert_eq!(session.cursor(), cursor);
        assert_eq!(session.clock_ms(), clock);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_past_end_clamps_without_wrapping() {
        let session = three_event_session();
        session.forward(10).unwrap();

        // Cursor clamps to the sequence length, clock keeps its value
        assert_eq!(session.cursor(), 3);
        assert_eq!(session.clock_ms(), 1000.0);

        // A subsequent run terminates on the first tick, emitting nothing
        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();
        assert_eq!(collect_ids(&mut stream).await, Vec::<u32>::new());
        assert!(session.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_control_arguments() {
        let session = three_event_session();
        assert_eq!(
            session.set_speed(0.0).unwrap_err(),
            ReplayError::InvalidSpeed(0.0)
        );
        assert_eq!(
            session.set_speed(-2.0).unwrap_err(),
            ReplayError::InvalidSpeed(-2.0)
        );
        assert!(session.set_speed(f64::NAN).is_err());
        assert_eq!(
            session.forward(0).unwrap_err(),
            ReplayError::InvalidSkipCount(0)
        );

        session.set_speed(2.5).unwrap();
        assert_eq!(session.speed(), 2.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_pauses_and_start_resumes_from_cursor() {
        let session = three_event_session();
        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();

        assert_eq!(stream.recv().await.unwrap().id, 1);
        session.stop().unwrap();
        assert!(!session.is_running());

        // Paused: nothing arrives while stopped
        assert!(timeout(Duration::from_secs(2), stream.recv()).await.is_err());
        assert_eq!(session.cursor(), 1);

        // Resume picks up where the cursor left off, not from the start
        session.start().unwrap();
        assert_eq!(stream.recv().await.unwrap().id, 2);
        assert_eq!(stream.recv().await.unwrap().id, 3);
        assert!(stream.recv().await.is_none());
        assert!(session.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_idempotent() {
        let session = three_event_session();
        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();
        session.start().unwrap();

        // A second loop would emit duplicates
        assert_eq!(collect_ids(&mut stream).await, vec![1, 2, 3]);
    }

    async fn paused_time_between_first_two_events(speed: f64) -> Duration {
        let session = three_event_session();
        let mut stream = session.subscribe().unwrap();
        session.set_speed(speed).unwrap();
        session.start().unwrap();

        stream.recv().await.unwrap();
        let first_seen = Instant::now();
        stream.recv().await.unwrap();
        first_seen.elapsed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_doubling_speed_halves_the_gap_between_emissions() {
        // Events 1000ms apart, tick 100ms
        let normal = paused_time_between_first_two_events(1.0).await;
        let double = paused_time_between_first_two_events(2.0).await;

        assert!(normal >= Duration::from_millis(900) && normal <= Duration::from_millis(1100));
        assert!(double >= Duration::from_millis(400) && double <= Duration::from_millis(600));
        let ratio = normal.as_secs_f64() / double.as_secs_f64();
        assert!((ratio - 2.0).abs() < 0.25, "gap ratio was {ratio}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_sequence_terminates_on_first_tick() {
        let session = session_with_capacity(&[], 16);
        assert_eq!(session.clock_ms(), 0.0);

        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();
        assert!(stream.recv().await.is_none());
        assert!(session.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_joins_mid_stream() {
        let session = three_event_session();
        let mut first = session.subscribe().unwrap();
        session.start().unwrap();

        // Let events 1 and 2 go out to the first (undrained) subscriber
        sleep(Duration::from_millis(1150)).await;
        session.stop().unwrap();

        let mut second = session.subscribe().unwrap();
        session.start().unwrap();

        // The new consumer only sees what is emitted from here on
        assert_eq!(collect_ids(&mut second).await, vec![3]);
        // The abandoned channel kept its backlog and closed on the swap
        assert_eq!(collect_ids(&mut first).await, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_blocks_producer_without_dropping() {
        let session = session_with_capacity(
            &[(1, 1000), (2, 1000), (3, 1000), (4, 1000), (5, 1000)],
            2,
        );
        let mut stream = session.subscribe().unwrap();
        session.start().unwrap();

        // All five events are due on the first tick but only two fit in
        // the buffer; the producer must wait for the consumer.
        sleep(Duration::from_secs(1)).await;
        assert_eq!(collect_ids(&mut stream).await, vec![1, 2, 3, 4, 5]);
        assert!(session.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_subscriber_receives_events_emitted_before_subscribing() {
        let session = three_event_session();
        session.start().unwrap();

        // Two events emitted with nobody listening yet
        sleep(Duration::from_millis(1150)).await;
        session.stop().unwrap();

        // The session's original channel buffered them
        let mut stream = session.subscribe().unwrap();
        assert_eq!(stream.drain().iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
    }
}
