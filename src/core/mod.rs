//! Core primitives.
//!
//! Pure functions over wire tokens and instants. Nothing in this module reads
//! the system clock directly; callers pass `now` in or go through [`Clock`].

pub mod period;
pub mod stamp;
pub mod clock;
pub mod outcome;

// Re-export core types
pub use period::{PeriodId, CodecError, PERIOD_ID_LEN};
pub use stamp::{parse_stamp, parse_stamp_parts};
pub use clock::{compute_remaining, Clock, SystemClock};
#[cfg(any(test, feature = "test-util"))]
pub use clock::ManualClock;
pub use outcome::{derive_color_and_size, Color, Outcome, Size};
