//! Candle persistence contract
//!
//! The store is shared by every instrument and resolution. Its only
//! consistency boundary is the single-document upsert: set close, raise
//! high, lower low, set open on insert, and increment volume as one atomic
//! step. Callers hold no in-process lock across any of these calls.

mod memory;

pub use memory::MemoryCandleStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::EventId;

use crate::candle::{Candle, CandleKey, SeriesKey, Volume};

/// Storage failures. Not-found is never an error; reads return `Option`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0} ms")]
    Timeout(u64),

    #[error("conflicting document for {key}: {detail}")]
    Conflict { key: String, detail: String },

    #[error("corrupt document for {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

impl StoreError {
    /// Timeouts and outages; the caller may retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Run one store call under `limit`; an elapsed timer becomes
/// [`StoreError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64)),
    }
}

/// One insert-or-update command for a single bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleUpsert {
    pub key: CandleKey,
    /// Becomes the close; folded into high and low.
    pub close: Decimal,
    /// Written only when the bucket is created.
    pub open_on_insert: Decimal,
    /// Added to the bucket volume.
    pub volume: Volume,
    /// When set, the update is skipped if this id was already applied to
    /// the bucket.
    pub event_id: Option<EventId>,
}

/// What a single upsert did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The bucket did not exist and was created by this call.
    Created(Candle),
    /// An existing bucket was updated.
    Updated(Candle),
    /// The event id had already been applied; nothing changed.
    Duplicate(Candle),
}

impl UpsertOutcome {
    pub fn candle(&self) -> &Candle {
        match self {
            UpsertOutcome::Created(c)
            | UpsertOutcome::Updated(c)
            | UpsertOutcome::Duplicate(c) => c,
        }
    }
}

/// Bound for a single-record lookup within one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    /// Latest bucket with time strictly before `t` (descending).
    Before(i64),
    /// Latest bucket with time at or before `t` (descending).
    AtOrBefore(i64),
    /// Earliest bucket with time at or after `t` (ascending).
    AtOrAfter(i64),
    /// Latest bucket in the series (descending).
    Latest,
}

/// Shared candle store.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Atomically insert or update one bucket.
    async fn upsert(&self, command: CandleUpsert) -> Result<UpsertOutcome, StoreError>;

    /// Fetch the single bucket nearest to `bound` in its sort direction.
    async fn find_one(
        &self,
        series: &SeriesKey,
        bound: TimeBound,
    ) -> Result<Option<Candle>, StoreError>;

    /// Up to `limit` buckets with time strictly greater than `after`
    /// (or from the start when `None`), ascending by bucket time.
    async fn page(
        &self,
        series: &SeriesKey,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, StoreError>;
}

#[async_trait]
impl<S: CandleStore + ?Sized> CandleStore for std::sync::Arc<S> {
    async fn upsert(&self, command: CandleUpsert) -> Result<UpsertOutcome, StoreError> {
        (**self).upsert(command).await
    }

    async fn find_one(
        &self,
        series: &SeriesKey,
        bound: TimeBound,
    ) -> Result<Option<Candle>, StoreError> {
        (**self).find_one(series, bound).await
    }

    async fn page(
        &self,
        series: &SeriesKey,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, StoreError> {
        (**self).page(series, after, limit).await
    }
}
