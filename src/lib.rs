//! In-memory reservation engine for capacity-bounded exam schedules.
//!
//! State lives in a sharded map of schedules, each guarded by its own
//! async RwLock. Every mutation is appended to a write-ahead log before
//! it is applied, so a restart replays the log and reconstructs exact
//! state, confirmed-seat counters included.

pub mod compactor;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
