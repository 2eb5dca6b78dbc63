//! # Round Sync
//!
//! Round synchronization engine for timed prediction games. A single
//! WebSocket feed pushes short text frames; this crate turns them into an
//! accurate countdown and result feed for several concurrent game variants.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ROUND SYNC                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Pure primitives (no I/O, no clock)       │
//! │  ├── period.rs    - 14-digit period id codec                 │
//! │  ├── stamp.rs     - Boundary stamp parser                    │
//! │  ├── clock.rs     - Remaining-seconds reconciler             │
//! │  └── outcome.rs   - Colour and size badges                   │
//! │                                                              │
//! │  game/            - Round state (async, no I/O)              │
//! │  ├── variant.rs   - Variant catalogue                        │
//! │  ├── state.rs     - Per-variant state store                  │
//! │  ├── history.rs   - Bounded result history                   │
//! │  ├── timer.rs     - Drift-free 1 Hz countdowns               │
//! │  └── engine.rs    - Serialized frame consumer                │
//! │                                                              │
//! │  network/         - I/O                                      │
//! │  ├── protocol.rs  - Frame classifier                         │
//! │  ├── supervisor.rs- Connection, readiness, reconnect         │
//! │  ├── history.rs   - HTTP history seeding                     │
//! │  ├── refresh.rs   - Periodic refresh, lost-result lookup     │
//! │  └── feed.rs      - Wiring and shutdown                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Countdown Guarantee
//!
//! The remaining time is never decremented in place. Every tick recomputes
//! it from the round's anchor and the wall clock, so a stalled or throttled
//! tick corrects itself on the next one and a reconnect needs no catch-up.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::{compute_remaining, Clock, Color, Outcome, PeriodId, Size, SystemClock};
pub use game::{GameVariant, RoundEngine, RoundResult, VariantCatalogue, VariantState};
pub use network::{FeedConfig, FeedHandle, RoundFeed};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
