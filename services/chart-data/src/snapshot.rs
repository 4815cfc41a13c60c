//! Nearest-time snapshot lookups
//!
//! Answers "what was the value at time T" for change and delta metrics.
//! Both neighbours of T are fetched concurrently and the closer one wins.
//! On equal distance the bucket at or before T is returned, since it is a
//! closed historical state rather than a bucket still in progress.
//!
//! Buckets may be sparse; the nearest existing bucket is returned however
//! far it lies from T.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;
use types::ids::InstrumentKey;

use crate::candle::{Candle, SeriesKey};
use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::query::{record_read_error, ReadError};
use crate::resolution::Resolution;
use crate::store::{bounded, CandleStore, TimeBound};

/// Ephemeral nearest-time lookup request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotQuery {
    pub instrument: InstrumentKey,
    pub resolution: Resolution,
    /// Epoch seconds.
    pub target_time: i64,
}

impl SnapshotQuery {
    pub fn new(instrument: InstrumentKey, resolution: Resolution, target_time: i64) -> Self {
        Self {
            instrument,
            resolution,
            target_time,
        }
    }

    pub fn series(&self) -> SeriesKey {
        SeriesKey::new(self.instrument.clone(), self.resolution)
    }
}

/// Pick the candidate closest to `target`; ties go to `at_or_before`.
pub fn nearest(
    target: i64,
    at_or_after: Option<Candle>,
    at_or_before: Option<Candle>,
) -> Option<Candle> {
    match (at_or_after, at_or_before) {
        (Some(after), Some(before)) => {
            let after_distance = (after.bucket_time - target).unsigned_abs();
            let before_distance = (target - before.bucket_time).unsigned_abs();
            if after_distance < before_distance {
                Some(after)
            } else {
                Some(before)
            }
        }
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

/// Nearest-time resolver over a shared store.
pub struct SnapshotResolver<S> {
    store: Arc<S>,
    timeout: Duration,
    metrics: Arc<EngineMetrics>,
}

impl<S: CandleStore> SnapshotResolver<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            store,
            timeout: config.store_timeout(),
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Bucket whose time is closest to `target_time`.
    ///
    /// `Ok(None)` means the series has no buckets at all.
    pub async fn snapshot_at(
        &self,
        series: &SeriesKey,
        target_time: i64,
    ) -> Result<Option<Candle>, ReadError> {
        let (after, before) = tokio::join!(
            bounded(
                self.timeout,
                self.store.find_one(series, TimeBound::AtOrAfter(target_time))
            ),
            bounded(
                self.timeout,
                self.store.find_one(series, TimeBound::AtOrBefore(target_time))
            ),
        );

        let (after, before) = match (after, before) {
            (Ok(after), Ok(before)) => (after, before),
            (Err(err), _) | (_, Err(err)) => {
                let err = ReadError::from_store(series, err);
                record_read_error(&self.metrics, series, &err);
                return Err(err);
            }
        };

        let picked = nearest(target_time, after, before);
        debug!(
            series = %series,
            target_time,
            bucket_time = ?picked.as_ref().map(|c| c.bucket_time),
            "Snapshot resolved"
        );
        Ok(picked)
    }

    pub async fn snapshot(&self, query: &SnapshotQuery) -> Result<Option<Candle>, ReadError> {
        self.snapshot_at(&query.series(), query.target_time).await
    }

    /// Resolve the same target time for several instruments concurrently.
    ///
    /// Results are returned in input order; one failed lookup does not
    /// affect the others.
    pub async fn snapshot_many(
        &self,
        instruments: &[InstrumentKey],
        resolution: Resolution,
        target_time: i64,
    ) -> Vec<(InstrumentKey, Result<Option<Candle>, ReadError>)> {
        let lookups = instruments.iter().map(|instrument| async move {
            let series = SeriesKey::new(instrument.clone(), resolution);
            (instrument.clone(), self.snapshot_at(&series, target_time).await)
        });
        join_all(lookups).await
    }
}
