//! Carry-forward open resolution
//!
//! A new bucket opens at the close of the latest earlier bucket in the same
//! series, so price stays continuous across gaps with no events.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::debug;

use crate::candle::CandleKey;
use crate::store::{bounded, CandleStore, StoreError, TimeBound};

/// Looks up the carry-forward open for a bucket.
pub struct ContinuityResolver<S> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S: CandleStore> ContinuityResolver<S> {
    pub fn new(store: Arc<S>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Close of the latest bucket strictly before `key.bucket_time`.
    ///
    /// `Ok(None)` means the series has no prior bucket; the caller opens the
    /// bucket at the event's own close.
    pub async fn resolve_open(&self, key: &CandleKey) -> Result<Option<Decimal>, StoreError> {
        let prior = bounded(
            self.timeout,
            self.store.find_one(&key.series, TimeBound::Before(key.bucket_time)),
        )
        .await?;

        match prior {
            Some(candle) => {
                debug!(
                    series = %key.series,
                    bucket_time = key.bucket_time,
                    prior_bucket = candle.bucket_time,
                    open = %candle.close,
                    "Carrying forward prior close"
                );
                Ok(Some(candle.close))
            }
            None => Ok(None),
        }
    }

    /// Open for a bucket created by an event closing at `close`.
    pub async fn open_for(&self, key: &CandleKey, close: Decimal) -> Result<Decimal, StoreError> {
        Ok(self.resolve_open(key).await?.unwrap_or(close))
    }
}
