//! Round State Module
//!
//! Per-variant round tracking fed by classified frames.
//!
//! ## Module Structure
//!
//! - `variant`: Catalogue of game variants and their round lengths
//! - `state`: Round state store, one watch slot per variant
//! - `history`: Bounded per-variant result history
//! - `timer`: Drift-free per-variant countdown tasks
//! - `engine`: Serialized frame consumer owning store and timers

pub mod variant;
pub mod state;
pub mod history;
pub mod timer;
pub mod engine;

// Re-export key types
pub use variant::{GameVariant, VariantCatalogue, VariantCode, CatalogueError};
pub use state::{
    RoundStore, VariantState, RoundAnnouncement, RoundResult,
    AnnouncementOutcome, ResultOutcome, TickOutcome,
};
pub use history::{ResultHistory, HistorySeed};
pub use timer::{TimerSet, TimerSpec, VariantTimer, TICK_PERIOD};
pub use engine::{RoundEngine, EngineConfig, FrameOutcome};
