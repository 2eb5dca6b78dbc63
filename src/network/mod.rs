//! Network Layer
//!
//! Everything that touches a socket: the feed connection, the frame grammar,
//! the HTTP history endpoint and the feed wiring. Round state itself lives
//! in `game/` and never performs I/O.

pub mod protocol;
pub mod supervisor;
pub mod history;
pub mod refresh;
pub mod feed;

pub use protocol::{classify, Frame, Rejection};
pub use supervisor::{
    Backoff, ConnectionSupervisor, Readiness, SupervisorConfig, SupervisorError,
    READINESS_TIMEOUT,
};
pub use history::{HistoryClient, HistoryConfig, HistoryError};
pub use refresh::{HistoryRefresher, RefreshConfig};
pub use feed::{FeedConfig, FeedError, FeedHandle, RoundFeed};
