//! Event type definitions for the replay engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// One market data record in the replay sequence.
///
/// The engine only ever looks at `id` and `timestamp`; the remaining
/// fields are opaque payload carried through to subscribers. Two-sided
/// records fill both price/share/exchange groups, one-sided records
/// leave the second group zeroed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataEvent {
    /// Unique event ID (positive, not necessarily contiguous)
    pub id: u32,

    /// Event timestamp in milliseconds, non-decreasing across the sequence
    pub timestamp: u64,

    /// Record kind tag (e.g. trade, quote)
    pub event: String,

    pub price1: f64,
    pub shares1: u32,
    pub xchg1: String,

    pub price2: f64,
    pub shares2: u32,
    pub xchg2: String,
}

/// Sequence construction errors
#[derive(Debug, Error, PartialEq)]
pub enum SequenceError {
    #[error("timestamp regression at index {index}: {timestamp} < {previous}")]
    TimestampRegression {
        index: usize,
        timestamp: u64,
        previous: u64,
    },

    #[error("duplicate event id {id} at index {index}")]
    DuplicateId { id: u32, index: usize },
}

/// Immutable, timestamp-ordered event sequence shared by all sessions.
///
/// Built once at startup and handed out behind an `Arc`. Carries an
/// id-to-index map so `jump_to_event` resolves in O(1).
#[derive(Debug)]
pub struct EventSequence {
    events: Vec<MarketDataEvent>,
    index_by_id: HashMap<u32, usize>,
}

impl EventSequence {
    /// Build a sequence from already-ordered events.
    ///
    /// Validates that timestamps never regress (ties are fine, original
    /// order is kept) and that ids are unique.
    pub fn new(events: Vec<MarketDataEvent>) -> Result<Self, SequenceError> {
        let mut index_by_id = HashMap::with_capacity(events.len());
        let mut previous: Option<u64> = None;

        for (index, event) in events.iter().enumerate() {
            if let Some(prev) = previous {
                if event.timestamp < prev {
                    return Err(SequenceError::TimestampRegression {
                        index,
                        timestamp: event.timestamp,
                        previous: prev,
                    });
                }
            }
            previous = Some(event.timestamp);

            if index_by_id.insert(event.id, index).is_some() {
                return Err(SequenceError::DuplicateId {
                    id: event.id,
                    index,
                });
            }
        }

        Ok(Self {
            events,
            index_by_id,
        })
    }

    /// Number of events in the sequence
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Event at `index`, if in range
    pub fn get(&self, index: usize) -> Option<&MarketDataEvent> {
        self.events.get(index)
    }

    /// Index of the event with the given id
    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.index_by_id.get(&id).copied()
    }

    /// Timestamp of the first event, if any
    pub fn first_timestamp(&self) -> Option<u64> {
        self.events.first().map(|e| e.timestamp)
    }

    /// Timestamp of the last event, if any
    pub fn last_timestamp(&self) -> Option<u64> {
        self.events.last().map(|e| e.timestamp)
    }

    /// All events, in sequence order
    pub fn events(&self) -> &[MarketDataEvent] {
        &self.events
    }
}
