//! Trailing-window change summaries
//!
//! Combines a "latest" read, a nearest-time snapshot at `now - window`, and
//! a range read over the window into the figures dashboards show next to a
//! chart: current value, change versus the reference, and the window's
//! high, low, and volume.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use types::time::SECONDS_PER_DAY;

use crate::candle::{Candle, SeriesKey, Volume};
use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::query::{ReadError, SeriesReader};
use crate::snapshot::SnapshotResolver;
use crate::store::CandleStore;

/// Change figures for one series over a trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub series: SeriesKey,
    pub window_secs: i64,
    /// Close of the latest bucket.
    pub current: Decimal,
    /// Close of the bucket nearest to `now - window`, when it is an earlier
    /// bucket than the latest one.
    pub reference: Option<Decimal>,
    pub change: Option<Decimal>,
    /// Percentage change; `None` when the reference is zero or missing.
    pub change_pct: Option<Decimal>,
    /// Envelope and volume of buckets starting inside the window.
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    /// `None` when the window total cannot be represented.
    pub volume: Option<Volume>,
}

/// Computes [`ChangeSummary`] values from the shared store.
pub struct SummaryCalculator<S> {
    reader: SeriesReader<S>,
    snapshots: SnapshotResolver<S>,
    window_secs: i64,
}

impl<S: CandleStore> SummaryCalculator<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            reader: SeriesReader::new(Arc::clone(&store), config),
            snapshots: SnapshotResolver::new(store, config),
            window_secs: SECONDS_PER_DAY,
        }
    }

    pub fn with_window(mut self, window_secs: i64) -> Self {
        self.window_secs = window_secs;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.reader = self.reader.with_metrics(Arc::clone(&metrics));
        self.snapshots = self.snapshots.with_metrics(metrics);
        self
    }

    /// Summary as of `now`. `Ok(None)` when the series has no buckets.
    pub async fn summarize(
        &self,
        series: &SeriesKey,
        now: i64,
    ) -> Result<Option<ChangeSummary>, ReadError> {
        let Some(latest) = self.reader.latest(series).await? else {
            return Ok(None);
        };

        let window_start = now - self.window_secs;
        let reference = self
            .snapshots
            .snapshot_at(series, window_start)
            .await?
            .filter(|candle| candle.bucket_time < latest.bucket_time)
            .map(|candle| candle.close);

        let in_window = self.reader.range_from(series.clone(), window_start).collect_all().await?;

        let current = latest.close;
        let change = reference.and_then(|reference| current.checked_sub(reference));
        let change_pct = match (change, reference) {
            (Some(change), Some(reference)) if !reference.is_zero() => change
                .checked_div(reference)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED)),
            _ => None,
        };

        Ok(Some(ChangeSummary {
            series: series.clone(),
            window_secs: self.window_secs,
            current,
            reference,
            change,
            change_pct,
            high: in_window.iter().map(|c| c.high).max(),
            low: in_window.iter().map(|c| c.low).min(),
            volume: window_volume(series, &in_window),
        }))
    }
}

fn window_volume(series: &SeriesKey, candles: &[Candle]) -> Option<Volume> {
    let mut total = Volume::zero_for(series.instrument.domain);
    for candle in candles {
        match total.checked_add(&candle.volume) {
            Some(sum) => total = sum,
            None => {
                warn!(
                    series = %series,
                    bucket_time = candle.bucket_time,
                    "Window volume overflowed, omitting it"
                );
                return None;
            }
        }
    }
    Some(total)
}
