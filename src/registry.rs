//! Session registry with idle eviction
//!
//! Creates replay sessions over one shared [`EventSequence`], routes
//! id-keyed control calls to them, and evicts entries that have not
//! been touched within the configured TTL. Eviction ignores session
//! state: a running session nobody controls or drains is reclaimed
//! like any other.

use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::events::EventSequence;
use crate::session::ReplaySession;
use crate::subscriber::EventStream;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct SessionEntry {
    session: Arc<ReplaySession>,
    /// Refreshed on every control dispatch and subscription
    last_access: Mutex<Instant>,
}

impl SessionEntry {
    fn new(session: Arc<ReplaySession>) -> Self {
        Self {
            session,
            last_access: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) -> Arc<ReplaySession> {
        *self.last_access.lock() = Instant::now();
        Arc::clone(&self.session)
    }

    fn idle(&self) -> std::time::Duration {
        self.last_access.lock().elapsed()
    }
}

/// Replay service: session factory, lookup table and eviction sweep.
///
/// All sessions share one immutable event sequence by reference; the
/// registry map is the only structure mutated by unrelated callers.
/// Construction spawns the background sweep, which holds only a weak
/// handle and dies with the service.
pub struct ReplayService {
    sequence: Arc<EventSequence>,
    config: ReplayConfig,
    sessions: DashMap<String, SessionEntry>,
}

impl ReplayService {
    /// Build the service over an already-loaded sequence and start the
    /// eviction sweep. Must be called from within a tokio runtime.
    pub fn new(sequence: Arc<EventSequence>, config: ReplayConfig) -> Arc<Self> {
        info!(
            "replay service: {} events, tick {:?}, session ttl {:?}",
            sequence.len(),
            config.publish_timer(),
            config.session_ttl()
        );
        let service = Arc::new(Self {
            sequence,
            config,
            sessions: DashMap::new(),
        });
        Self::spawn_eviction_sweep(&service);
        service
    }

    /// Create a new session bound to the shared sequence and return its id.
    pub fn create_session(&self) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(ReplaySession::new(
            session_id.clone(),
            Arc::clone(&self.sequence),
            self.config.publish_timer(),
            self.config.channel_capacity,
        ));
        self.sessions
            .insert(session_id.clone(), SessionEntry::new(session));
        info!("create session: {}", session_id);
        session_id
    }

    /// Whether a session with this id currently exists (not evicted)
    pub fn is_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Look up a session, refreshing its idle timer.
    pub fn get(&self, session_id: &str) -> Result<Arc<ReplaySession>, ReplayError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.touch())
            .ok_or_else(|| ReplayError::SessionNotFound(session_id.to_string()))
    }

    pub fn start(&self, session_id: &str) -> Result<(), ReplayError> {
        self.get(session_id)?.start()
    }

    pub fn stop(&self, session_id: &str) -> Result<(), ReplayError> {
        self.get(session_id)?.stop()
    }

    pub fn rewind(&self, session_id: &str) -> Result<(), ReplayError> {
        self.get(session_id)?.rewind()
    }

    pub fn jump_to_event(&self, session_id: &str, event_id: u32) -> Result<(), ReplayError> {
        self.get(session_id)?.jump_to_event(event_id)
    }

    pub fn forward(&self, session_id: &str, skip_count: usize) -> Result<(), ReplayError> {
        self.get(session_id)?.forward(skip_count)
    }

    pub fn set_speed(&self, session_id: &str, speed: f64) -> Result<(), ReplayError> {
        self.get(session_id)?.set_speed(speed)
    }

    pub fn subscribe(&self, session_id: &str) -> Result<EventStream, ReplayError> {
        self.get(session_id)?.subscribe()
    }

    /// Remove every entry idle past the TTL, shutting its session down.
    /// Returns how many were evicted.
    pub fn evict_idle(&self) -> usize {
        let ttl = self.config.session_ttl();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.idle() > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for session_id in expired {
            // Re-check under removal: a control call may have refreshed
            // the entry between the scan and now.
            let removed = self
                .sessions
                .remove_if(&session_id, |_, entry| entry.idle() > ttl);
            if let Some((_, entry)) = removed {
                if entry.session.is_running() {
                    warn!("evicting running session: {}", session_id);
                } else {
                    debug!("evicting idle session: {}", session_id);
                }
                entry.session.shutdown();
                evicted += 1;
            }
        }
        evicted
    }

    fn spawn_eviction_sweep(this: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let interval = this.config.eviction_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(service) = weak.upgrade() else { break };
                let evicted = service.evict_idle();
                if evicted > 0 {
                    debug!("eviction sweep removed {} sessions", evicted);
                }
            }
        });
    }
}
