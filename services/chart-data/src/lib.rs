//! Chart Data Service
//!
//! Consumes price and volume samples decoded from on-chain activity and
//! maintains multi-resolution OHLCV candles for four domains (markets,
//! yield vaults, farm pools, treasuries) behind one generic engine.
//!
//! Provides:
//! - Bucket derivation over a configured resolution set (1m .. 30d)
//! - Carry-forward opens across gaps
//! - Atomic per-bucket upserts with optional event de-duplication
//! - Nearest-time snapshots for "value N seconds ago"
//! - Lazy, restartable range reads and latest-bucket reads
//! - Trailing-window change summaries
//!
//! # Architecture
//!
//! ```text
//!  Market / Vault / Farm / Treasury samples
//!        │
//!   ┌────▼──────┐
//!   │Observation│  ← Maps domain values to close + volume, validates
//!   └────┬──────┘
//!        │
//!   ┌────▼───┐      ┌──────────┐
//!   │ Engine │─────▶│Continuity│  ← Prior close per resolution
//!   └────┬───┘      └────┬─────┘
//!        │ upsert        │ find_one
//!   ┌────▼───────────────▼─────┐
//!   │   CandleStore (shared)   │
//!   └────┬──────────────┬──────┘
//!        │              │
//!   ┌────▼───┐     ┌────▼────┐
//!   │ Query  │     │Snapshot │
//!   └────┬───┘     └────┬────┘
//!        └──────┬───────┘
//!          ┌────▼────┐
//!          │ Summary │
//!          └─────────┘
//! ```

pub mod candle;
pub mod config;
pub mod continuity;
pub mod engine;
pub mod metrics;
pub mod observation;
pub mod query;
pub mod resolution;
pub mod snapshot;
pub mod store;
pub mod summary;

pub use candle::{Candle, CandleKey, SeriesKey, Volume};
pub use config::{ConfigError, EngineConfig};
pub use engine::{ApplyReport, BucketOutcome, CandleEngine};
pub use observation::{IngestError, Observation, PriceEvent};
pub use query::{CandleSeries, ReadError, SeriesReader};
pub use resolution::{Resolution, ResolutionSet};
pub use snapshot::{SnapshotQuery, SnapshotResolver};
pub use store::{CandleStore, MemoryCandleStore, StoreError};
pub use summary::{ChangeSummary, SummaryCalculator};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
