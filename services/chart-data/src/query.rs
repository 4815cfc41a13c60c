//! Read-only series queries
//!
//! `latest` serves "current price" displays and range queries feed charts.
//! Reads take no locks beyond a single store call, so they never block
//! writers; a range read may observe buckets written after it started.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tracing::warn;

use crate::candle::{Candle, SeriesKey};
use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::store::{bounded, CandleStore, StoreError, TimeBound};

/// Read-path failure. Distinct from "no data", which reads return as
/// `Ok(None)` or an empty page.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("read of {series} timed out after {timeout_ms} ms")]
    Timeout { series: String, timeout_ms: u64 },

    #[error("read of {series} failed: {source}")]
    Store {
        series: String,
        #[source]
        source: StoreError,
    },
}

impl ReadError {
    pub(crate) fn from_store(series: &SeriesKey, err: StoreError) -> Self {
        match err {
            StoreError::Timeout(timeout_ms) => ReadError::Timeout {
                series: series.to_string(),
                timeout_ms,
            },
            source => ReadError::Store {
                series: series.to_string(),
                source,
            },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ReadError::Timeout { .. })
    }
}

pub(crate) fn record_read_error(metrics: &EngineMetrics, series: &SeriesKey, err: &ReadError) {
    metrics.record_read_failure(err.is_timeout());
    warn!(series = %series, error = %err, "Read failed");
}

/// Entry point for "latest" and range reads.
pub struct SeriesReader<S> {
    store: Arc<S>,
    timeout: Duration,
    page_size: usize,
    metrics: Arc<EngineMetrics>,
}

impl<S: CandleStore> SeriesReader<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            store,
            timeout: config.store_timeout(),
            page_size: config.page_size,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Most recent bucket of the series.
    pub async fn latest(&self, series: &SeriesKey) -> Result<Option<Candle>, ReadError> {
        bounded(self.timeout, self.store.find_one(series, TimeBound::Latest))
            .await
            .map_err(|err| {
                let err = ReadError::from_store(series, err);
                record_read_error(&self.metrics, series, &err);
                err
            })
    }

    /// All buckets of the series, ascending by bucket time.
    pub fn range(&self, series: SeriesKey) -> CandleSeries<S> {
        CandleSeries {
            store: Arc::clone(&self.store),
            series,
            start: None,
            cursor: None,
            page_size: self.page_size,
            timeout: self.timeout,
            exhausted: false,
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Buckets at or after `start`, ascending by bucket time.
    pub fn range_from(&self, series: SeriesKey, start: i64) -> CandleSeries<S> {
        let mut candles = self.range(series);
        candles.start = Some(start);
        candles
    }
}

/// Lazy, finite, restartable cursor over one series.
///
/// Pages are fetched on demand in ascending bucket order. The cursor
/// resumes strictly after the last bucket it returned, so a page boundary
/// never yields a bucket twice.
pub struct CandleSeries<S> {
    store: Arc<S>,
    series: SeriesKey,
    start: Option<i64>,
    cursor: Option<i64>,
    page_size: usize,
    timeout: Duration,
    exhausted: bool,
    metrics: Arc<EngineMetrics>,
}

impl<S: CandleStore> CandleSeries<S> {
    pub fn series(&self) -> &SeriesKey {
        &self.series
    }

    /// Next page, or `None` once the series is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Candle>>, ReadError> {
        if self.exhausted {
            return Ok(None);
        }

        let after = self
            .cursor
            .or_else(|| self.start.map(|start| start.saturating_sub(1)));

        let page = bounded(
            self.timeout,
            self.store.page(&self.series, after, self.page_size),
        )
        .await
        .map_err(|err| {
            let err = ReadError::from_store(&self.series, err);
            record_read_error(&self.metrics, &self.series, &err);
            err
        })?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => {
                self.cursor = Some(last.bucket_time);
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    /// Rewind to the first bucket.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    /// Drain every remaining page.
    pub async fn collect_all(&mut self) -> Result<Vec<Candle>, ReadError> {
        let mut candles = Vec::new();
        while let Some(page) = self.next_page().await? {
            candles.extend(page);
        }
        Ok(candles)
    }

    /// One candle at a time. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Candle, ReadError>> {
        stream::unfold(
            (self, VecDeque::<Candle>::new(), false),
            |(mut cursor, mut buffered, failed)| async move {
                if failed {
                    return None;
                }
                loop {
                    if let Some(candle) = buffered.pop_front() {
                        return Some((Ok(candle), (cursor, buffered, false)));
                    }
                    match cursor.next_page().await {
                        Ok(Some(page)) => buffered.extend(page),
                        Ok(None) => return None,
                        Err(err) => return Some((Err(err), (cursor, buffered, true))),
                    }
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Volume;
    use crate::resolution::Resolution;
    use crate::store::{CandleUpsert, MemoryCandleStore};
    use futures::StreamExt;
    use rust_decimal::Decimal;
    use types::ids::InstrumentKey;

    fn series() -> SeriesKey {
        SeriesKey::new(InstrumentKey::treasury("10", "0xT").unwrap(), Resolution::H1)
    }

    async fn seeded(buckets: &[i64]) -> Arc<MemoryCandleStore> {
        let store = Arc::new(MemoryCandleStore::new());
        for &t in buckets {
            store
                .upsert(CandleUpsert {
                    key: series().bucket_for(t),
                    close: Decimal::from(t),
                    open_on_insert: Decimal::from(t),
                    volume: Volume::single(Decimal::ONE),
                    event_id: None,
                })
                .await
                .unwrap();
        }
        store
    }

    fn reader(store: Arc<MemoryCandleStore>, page_size: usize) -> SeriesReader<MemoryCandleStore> {
        let config = EngineConfig {
            page_size,
            ..EngineConfig::default()
        };
        SeriesReader::new(store, &config)
    }

    fn times(candles: &[Candle]) -> Vec<i64> {
        candles.iter().map(|c| c.bucket_time).collect()
    }

    #[tokio::test]
    async fn test_latest() {
        let reader = reader(seeded(&[3600, 10800, 7200]).await, 10);
        let latest = reader.latest(&series()).await.unwrap().unwrap();
        assert_eq!(latest.bucket_time, 10800);

        let other = InstrumentKey::treasury("10", "0xother").unwrap();
        let empty = SeriesKey::new(other, Resolution::H1);
        assert_eq!(reader.latest(&empty).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pages_do_not_overlap() {
        let reader = reader(seeded(&[0, 3600, 7200, 10800, 14400]).await, 2);
        let mut candles = reader.range(series());

        assert_eq!(times(&candles.next_page().await.unwrap().unwrap()), vec![0, 3600]);
        assert_eq!(times(&candles.next_page().await.unwrap().unwrap()), vec![7200, 10800]);
        assert_eq!(times(&candles.next_page().await.unwrap().unwrap()), vec![14400]);
        assert_eq!(candles.next_page().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restart_and_start_bound() {
        let reader = reader(seeded(&[0, 3600, 7200]).await, 2);

        let mut candles = reader.range(series());
        let first = candles.collect_all().await.unwrap();
        candles.restart();
        let second = candles.collect_all().await.unwrap();
        assert_eq!(times(&first), vec![0, 3600, 7200]);
        assert_eq!(first, second);

        let mut tail = reader.range_from(series(), 3600);
        assert_eq!(times(&tail.collect_all().await.unwrap()), vec![3600, 7200]);
        tail.restart();
        assert_eq!(times(&tail.collect_all().await.unwrap()), vec![3600, 7200]);
    }

    #[tokio::test]
    async fn test_stream_yields_ascending() {
        let reader = reader(seeded(&[7200, 0, 3600]).await, 1);
        let streamed: Vec<i64> = reader
            .range(series())
            .into_stream()
            .map(|c| c.unwrap().bucket_time)
            .collect()
            .await;
        assert_eq!(streamed, vec![0, 3600, 7200]);
    }

    #[tokio::test]
    async fn test_read_failure_is_not_none() {
        let store = seeded(&[0]).await;
        store.set_available(false);
        let reader = reader(store, 10);

        let err = reader.latest(&series()).await.unwrap_err();
        assert!(matches!(err, ReadError::Store { source: StoreError::Unavailable(_), .. }));

        let mut stream = Box::pin(reader.range(series()).into_stream());
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let store = Arc::new(MemoryCandleStore::new().with_latency(Duration::from_secs(10)));
        let config = EngineConfig {
            store_timeout_ms: 50,
            ..EngineConfig::default()
        };
        let metrics = Arc::new(EngineMetrics::new());
        let reader = SeriesReader::new(store, &config).with_metrics(Arc::clone(&metrics));

        let err = reader.latest(&series()).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(metrics.snapshot().store_timeouts, 1);
    }
}
