//! Trilha daemon library - progression engine, storage and read model.
//!
//! `ProgressionEngine` is the entry point the controller talks to. It owns
//! no globals: storage, cache and clock are injected by the composition root.

pub mod cache;
pub mod clock;
pub mod engine;
pub mod error;
pub mod snapshot;
pub mod storage;
pub mod supervisor;

pub use cache::{LruReadCache, ReadCache};
pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{ProgressionEngine, ProgressionResult};
pub use error::{ProgressionError, StoreError};
pub use snapshot::{ProgressionSnapshot, StatsView, Timeframe, TimeframeStats, UnlockedBadge};
pub use storage::{MemoryStore, ProgressionStore, SqliteStore, StoreTransaction, TxMode};
