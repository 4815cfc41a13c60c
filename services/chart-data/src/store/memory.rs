//! In-memory candle store
//!
//! One collection per domain. Each collection maps a series to a
//! `BTreeMap` ordered by bucket time, which doubles as the descending-time
//! index used by "latest" and nearest-time lookups. An upsert runs while
//! holding the shard lock for its series and nothing else, which makes each
//! bucket update atomic without serializing unrelated instruments.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tracing::{debug, info};
use types::ids::{Domain, EventId};

use super::{CandleStore, CandleUpsert, StoreError, TimeBound, UpsertOutcome};
use crate::candle::{Candle, SeriesKey};
use crate::resolution::Resolution;

#[derive(Debug, Clone)]
struct Document {
    candle: Candle,
    applied: HashSet<EventId>,
}

type Collection = DashMap<SeriesKey, BTreeMap<i64, Document>>;

/// Candle store backed by process memory.
pub struct MemoryCandleStore {
    collections: HashMap<Domain, Collection>,
    /// Artificial latency added to every call.
    latency: Option<Duration>,
    available: AtomicBool,
    /// Resolutions whose writes fail with `Unavailable`.
    failing_resolutions: DashSet<Resolution>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        let collections = Domain::all()
            .iter()
            .map(|domain| (*domain, Collection::new()))
            .collect();

        info!(
            collections = ?Domain::all().iter().map(|d| d.collection()).collect::<Vec<_>>(),
            "MemoryCandleStore initialized"
        );

        Self {
            collections,
            latency: None,
            available: AtomicBool::new(true),
            failing_resolutions: DashSet::new(),
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make writes for one resolution fail until `restore_resolution`.
    pub fn fail_resolution(&self, resolution: Resolution) {
        self.failing_resolutions.insert(resolution);
    }

    pub fn restore_resolution(&self, resolution: Resolution) {
        self.failing_resolutions.remove(&resolution);
    }

    /// Total number of candles in one domain's collection.
    pub fn candle_count(&self, domain: Domain) -> usize {
        self.collection(domain)
            .iter()
            .map(|series| series.value().len())
            .sum()
    }

    /// Number of candles in one series.
    pub fn series_len(&self, series: &SeriesKey) -> usize {
        self.collection(series.instrument.domain)
            .get(series)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    fn collection(&self, domain: Domain) -> &Collection {
        // Every domain is inserted in `new`.
        &self.collections[&domain]
    }

    async fn before_call(&self) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn upsert_document(&self, command: CandleUpsert) -> Result<UpsertOutcome, StoreError> {
        let CandleUpsert {
            key,
            close,
            open_on_insert,
            volume,
            event_id,
        } = command;

        if self.failing_resolutions.contains(&key.series.resolution) {
            return Err(StoreError::Unavailable(format!(
                "writes for {} disabled",
                key.series.resolution
            )));
        }

        let domain = key.series.instrument.domain;
        if !volume.matches_domain(domain) {
            return Err(StoreError::Conflict {
                key: key.series.to_string(),
                detail: "volume shape does not match domain".to_string(),
            });
        }

        let mut series = self.collection(domain).entry(key.series.clone()).or_default();

        if let Some(doc) = series.get_mut(&key.bucket_time) {
            if let Some(id) = &event_id {
                if doc.applied.contains(id) {
                    debug!(
                        series = %key.series,
                        bucket_time = key.bucket_time,
                        event_id = %id,
                        "Event already applied"
                    );
                    return Ok(UpsertOutcome::Duplicate(doc.candle.clone()));
                }
            }
            if !doc.candle.apply(close, &volume) {
                return Err(StoreError::Corrupt {
                    key: key.series.to_string(),
                    detail: format!("bucket {} rejected volume update", key.bucket_time),
                });
            }
            if let Some(id) = event_id {
                doc.applied.insert(id);
            }
            return Ok(UpsertOutcome::Updated(doc.candle.clone()));
        }

        let candle = Candle::open_bucket(&key, open_on_insert, close, volume);
        let mut applied = HashSet::new();
        if let Some(id) = event_id {
            applied.insert(id);
        }
        series.insert(
            key.bucket_time,
            Document {
                candle: candle.clone(),
                applied,
            },
        );
        Ok(UpsertOutcome::Created(candle))
    }

    fn find_document(&self, series: &SeriesKey, bound: TimeBound) -> Option<Candle> {
        let buckets = self.collection(series.instrument.domain).get(series)?;
        let doc = match bound {
            TimeBound::Before(t) => buckets.range(..t).next_back(),
            TimeBound::AtOrBefore(t) => buckets.range(..=t).next_back(),
            TimeBound::AtOrAfter(t) => buckets.range(t..).next(),
            TimeBound::Latest => buckets.iter().next_back(),
        };
        doc.map(|(_, doc)| doc.candle.clone())
    }

    fn page_documents(&self, series: &SeriesKey, after: Option<i64>, limit: usize) -> Vec<Candle> {
        let Some(buckets) = self.collection(series.instrument.domain).get(series) else {
            return Vec::new();
        };
        let lower = match after {
            Some(t) => Bound::Excluded(t),
            None => Bound::Unbounded,
        };
        let candles: Vec<Candle> = buckets
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, doc)| doc.candle.clone())
            .collect();
        candles
    }
}

impl Default for MemoryCandleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn upsert(&self, command: CandleUpsert) -> Result<UpsertOutcome, StoreError> {
        self.before_call().await?;
        self.upsert_document(command)
    }

    async fn find_one(
        &self,
        series: &SeriesKey,
        bound: TimeBound,
    ) -> Result<Option<Candle>, StoreError> {
        self.before_call().await?;
        Ok(self.find_document(series, bound))
    }

    async fn page(
        &self,
        series: &SeriesKey,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, StoreError> {
        self.before_call().await?;
        Ok(self.page_documents(series, after, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::{CandleKey, Volume};
    use rust_decimal::Decimal;
    use types::ids::InstrumentKey;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn series() -> SeriesKey {
        SeriesKey::new(InstrumentKey::vault("1", "0xv").unwrap(), Resolution::M1)
    }

    fn upsert(bucket_time: i64, close: i64, open: i64, volume: i64) -> CandleUpsert {
        CandleUpsert {
            key: CandleKey {
                series: series(),
                bucket_time,
            },
            close: d(close),
            open_on_insert: d(open),
            volume: Volume::single(d(volume)),
            event_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_then_update() {
        let store = MemoryCandleStore::new();

        let created = store.upsert(upsert(60, 10, 8, 1)).await.unwrap();
        assert!(matches!(created, UpsertOutcome::Created(_)));
        assert_eq!(created.candle().open, d(8));

        // open_on_insert is ignored for an existing bucket
        let updated = store.upsert(upsert(60, 12, 99, 2)).await.unwrap();
        let candle = match updated {
            UpsertOutcome::Updated(c) => c,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(candle.open, d(8));
        assert_eq!(candle.high, d(12));
        assert_eq!(candle.low, d(10));
        assert_eq!(candle.close, d(12));
        assert_eq!(candle.volume, Volume::single(d(3)));
        assert_eq!(store.candle_count(Domain::Vault), 1);
        assert_eq!(store.candle_count(Domain::Market), 0);
    }

    #[tokio::test]
    async fn test_find_one_bounds() {
        let store = MemoryCandleStore::new();
        for t in [60, 180, 300] {
            store.upsert(upsert(t, t, t, 0)).await.unwrap();
        }
        let s = series();
        let time_of = |c: Option<Candle>| c.map(|c| c.bucket_time);

        assert_eq!(time_of(store.find_one(&s, TimeBound::Before(180)).await.unwrap()), Some(60));
        let at_or_before = store.find_one(&s, TimeBound::AtOrBefore(180)).await.unwrap();
        assert_eq!(time_of(at_or_before), Some(180));
        let at_or_after = store.find_one(&s, TimeBound::AtOrAfter(181)).await.unwrap();
        assert_eq!(time_of(at_or_after), Some(300));
        assert_eq!(time_of(store.find_one(&s, TimeBound::Latest).await.unwrap()), Some(300));
        assert_eq!(time_of(store.find_one(&s, TimeBound::Before(60)).await.unwrap()), None);
        assert_eq!(time_of(store.find_one(&s, TimeBound::AtOrAfter(301)).await.unwrap()), None);
    }

    #[tokio::test]
    async fn test_page_is_ascending_and_exclusive() {
        let store = MemoryCandleStore::new();
        for t in [300, 60, 180, 120] {
            store.upsert(upsert(t, 1, 1, 0)).await.unwrap();
        }
        let s = series();
        let times = |page: Vec<Candle>| page.iter().map(|c| c.bucket_time).collect::<Vec<i64>>();
        let first = times(store.page(&s, None, 2).await.unwrap());
        assert_eq!(first, vec![60, 120]);
        let rest = times(store.page(&s, Some(120), 10).await.unwrap());
        assert_eq!(rest, vec![180, 300]);
    }

    #[tokio::test]
    async fn test_duplicate_event_id_skipped() {
        let store = MemoryCandleStore::new();
        let mut cmd = upsert(60, 10, 10, 5);
        cmd.event_id = Some(EventId::new("0xtx:1"));

        store.upsert(cmd.clone()).await.unwrap();
        let again = store.upsert(cmd).await.unwrap();
        assert!(matches!(again, UpsertOutcome::Duplicate(_)));
        assert_eq!(again.candle().volume, Volume::single(d(5)));
        assert_eq!(again.candle().event_count, 1);
    }

    #[tokio::test]
    async fn test_shape_conflict_rejected() {
        let store = MemoryCandleStore::new();
        let mut cmd = upsert(60, 10, 10, 5);
        cmd.volume = Volume::pair(d(1), d(1));
        let err = store.upsert(cmd).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.series_len(&series()), 0);
    }

    #[tokio::test]
    async fn test_outage_and_failing_resolution() {
        let store = MemoryCandleStore::new();
        store.set_available(false);
        let err = store.upsert(upsert(60, 1, 1, 1)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.find_one(&series(), TimeBound::Latest).await.is_err());

        store.set_available(true);
        store.fail_resolution(Resolution::M1);
        assert!(store.upsert(upsert(60, 1, 1, 1)).await.is_err());
        store.restore_resolution(Resolution::M1);
        assert!(store.upsert(upsert(60, 1, 1, 1)).await.is_ok());
    }
}
