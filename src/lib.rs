//! # Market Replay
//!
//! Market data replay engine: streams a recorded, timestamp-ordered
//! event sequence to subscribers at a controllable virtual speed.
//!
//! ## Features
//!
//! - **Sessions**: any number of independent replays over one shared,
//!   read-only event sequence
//! - **Virtual time**: per-session simulated clock, speed multipliers
//!   from slow motion to fast forward
//! - **Random access**: pause/resume, rewind, jump to an event id,
//!   forward-skip
//! - **Backpressure**: bounded per-session channels, the producer waits
//!   instead of dropping events
//! - **Idle eviction**: sessions nobody touches past a TTL are reclaimed
//!
//! ## Example
//!
//! ```rust,no_run
//! use market_replay::{load_events, ReplayConfig, ReplayService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReplayConfig::default();
//!     let sequence = Arc::new(load_events(&config.data_path)?);
//!     let service = ReplayService::new(sequence, config);
//!
//!     let session_id = service.create_session();
//!     let mut stream = service.subscribe(&session_id)?;
//!     service.set_speed(&session_id, 2.0)?;
//!     service.start(&session_id)?;
//!
//!     while let Some(event) = stream.recv().await {
//!         println!("{} @ {}", event.id, event.timestamp);
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod loader;
pub mod registry;
pub mod session;
pub mod subscriber;

// Re-exports
pub use clock::VirtualClock;
pub use config::{ConfigError, ReplayConfig};
pub use error::ReplayError;
pub use events::{EventSequence, MarketDataEvent, SequenceError};
pub use loader::{load_events, read_events, LoadError};
pub use registry::ReplayService;
pub use session::ReplaySession;
pub use subscriber::EventStream;
