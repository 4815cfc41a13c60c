//! Candle upsert engine
//!
//! Applies one event to every configured resolution. Each resolution is
//! independent: resolve the carry-forward open, then issue a single atomic
//! upsert. A failure on one resolution is logged and recorded in the
//! report; the remaining resolutions still run.
//!
//! The carry-forward open is resolved for every event, not only for the
//! first one in a bucket, and is handed to the store as a set-on-insert
//! value. Whether the bucket already exists is decided by the store inside
//! the upsert, so two concurrent first events never both create it.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::candle::{Candle, CandleKey, SeriesKey};
use crate::config::EngineConfig;
use crate::continuity::ContinuityResolver;
use crate::metrics::EngineMetrics;
use crate::observation::{IngestError, Observation, PriceEvent};
use crate::resolution::Resolution;
use crate::store::{bounded, CandleStore, CandleUpsert, StoreError, UpsertOutcome};
use types::ids::InstrumentKey;

/// Result of applying one event to one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketOutcome {
    Created(Candle),
    Updated(Candle),
    /// The event id was already applied to this bucket.
    Duplicate(Candle),
    /// The update for this resolution was dropped.
    Failed(StoreError),
}

impl BucketOutcome {
    pub fn candle(&self) -> Option<&Candle> {
        match self {
            BucketOutcome::Created(c)
            | BucketOutcome::Updated(c)
            | BucketOutcome::Duplicate(c) => Some(c),
            BucketOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BucketOutcome::Failed(_))
    }
}

impl From<UpsertOutcome> for BucketOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Created(c) => BucketOutcome::Created(c),
            UpsertOutcome::Updated(c) => BucketOutcome::Updated(c),
            UpsertOutcome::Duplicate(c) => BucketOutcome::Duplicate(c),
        }
    }
}

/// Per-resolution outcomes for one applied event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub instrument: InstrumentKey,
    pub event_time: i64,
    /// One entry per configured resolution, finest first.
    pub outcomes: Vec<(Resolution, BucketOutcome)>,
}

impl ApplyReport {
    pub fn outcome(&self, resolution: Resolution) -> Option<&BucketOutcome> {
        self.outcomes
            .iter()
            .find(|(r, _)| *r == resolution)
            .map(|(_, outcome)| outcome)
    }

    pub fn candle(&self, resolution: Resolution) -> Option<&Candle> {
        self.outcome(resolution).and_then(BucketOutcome::candle)
    }

    /// True when every resolution was written or skipped as a duplicate.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| !outcome.is_failed())
    }

    pub fn failures(&self) -> impl Iterator<Item = (Resolution, &StoreError)> {
        self.outcomes.iter().filter_map(|(r, outcome)| match outcome {
            BucketOutcome::Failed(err) => Some((*r, err)),
            _ => None,
        })
    }

    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, BucketOutcome::Created(_)))
            .count()
    }
}

/// Multi-resolution candle writer shared by every event-delivery path.
///
/// Holds no lock across store calls; concurrent callers for the same
/// bucket are serialized only by the store's per-document upsert.
pub struct CandleEngine<S> {
    store: Arc<S>,
    continuity: ContinuityResolver<S>,
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
}

impl<S: CandleStore> CandleEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        info!(
            resolutions = config.resolutions.len(),
            store_timeout_ms = config.store_timeout_ms,
            dedup_events = config.dedup_events,
            "CandleEngine initialized"
        );

        Self {
            continuity: ContinuityResolver::new(Arc::clone(&store), config.store_timeout()),
            store,
            config,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Share a metrics registry with other components.
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Apply a domain observation.
    pub async fn apply<O: Observation + ?Sized>(
        &self,
        observation: &O,
    ) -> Result<ApplyReport, IngestError> {
        self.apply_event(&observation.to_price_event()).await
    }

    /// Apply one event to every configured resolution.
    ///
    /// Returns `Err` only for malformed input, in which case nothing is
    /// written. Store failures are per resolution and reported in the
    /// returned [`ApplyReport`].
    pub async fn apply_event(&self, event: &PriceEvent) -> Result<ApplyReport, IngestError> {
        self.metrics.record_event_received();

        if let Err(err) = event.validate() {
            self.metrics.record_event_rejected();
            warn!(
                instrument = %event.instrument,
                event_time = event.event_time,
                error = %err,
                "Rejected malformed event"
            );
            return Err(err);
        }

        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(self.config.resolutions.len());

        for resolution in self.config.resolutions.iter() {
            let key =
                SeriesKey::new(event.instrument.clone(), resolution).bucket_for(event.event_time);
            let outcome = match self.apply_bucket(&key, event).await {
                Ok(outcome) => {
                    self.record_outcome(&key, &outcome);
                    BucketOutcome::from(outcome)
                }
                Err(err) => {
                    self.metrics
                        .record_bucket_failure(matches!(err, StoreError::Timeout(_)));
                    warn!(
                        series = %key.series,
                        bucket_time = key.bucket_time,
                        event_time = event.event_time,
                        error = %err,
                        "Dropped resolution update"
                    );
                    BucketOutcome::Failed(err)
                }
            };
            outcomes.push((resolution, outcome));
        }

        let report = ApplyReport {
            instrument: event.instrument.clone(),
            event_time: event.event_time,
            outcomes,
        };

        if !report.is_complete() {
            self.metrics.record_partial_apply();
        }
        self.metrics
            .record_apply_latency(started.elapsed().as_micros() as u64);

        Ok(report)
    }

    /// Apply events one at a time, in the order given.
    pub async fn apply_batch<I>(&self, events: I) -> Vec<Result<ApplyReport, IngestError>>
    where
        I: IntoIterator<Item = PriceEvent>,
    {
        let mut results = Vec::new();
        for event in events {
            results.push(self.apply_event(&event).await);
        }
        results
    }

    async fn apply_bucket(
        &self,
        key: &CandleKey,
        event: &PriceEvent,
    ) -> Result<UpsertOutcome, StoreError> {
        let open_on_insert = self.continuity.open_for(key, event.close).await?;

        let event_id = if self.config.dedup_events {
            event.event_id.clone()
        } else {
            None
        };

        let command = CandleUpsert {
            key: key.clone(),
            close: event.close,
            open_on_insert,
            volume: event.volume,
            event_id,
        };

        bounded(self.config.store_timeout(), self.store.upsert(command)).await
    }

    fn record_outcome(&self, key: &CandleKey, outcome: &UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created(candle) => {
                self.metrics.record_bucket_created();
                debug!(
                    series = %key.series,
                    bucket_time = key.bucket_time,
                    open = %candle.open,
                    close = %candle.close,
                    "Bucket created"
                );
            }
            UpsertOutcome::Updated(candle) => {
                self.metrics.record_bucket_updated();
                debug!(
                    series = %key.series,
                    bucket_time = key.bucket_time,
                    close = %candle.close,
                    events = candle.event_count,
                    "Bucket updated"
                );
            }
            UpsertOutcome::Duplicate(_) => {
                self.metrics.record_bucket_duplicate();
                debug!(
                    series = %key.series,
                    bucket_time = key.bucket_time,
                    "Skipped already applied event"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Volume;
    use crate::resolution::ResolutionSet;
    use crate::store::MemoryCandleStore;
    use rust_decimal::Decimal;
    use std::sync::atomic::Ordering;
    use types::ids::EventId;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn vault() -> InstrumentKey {
        InstrumentKey::vault("1", "0xVault").unwrap()
    }

    fn engine(resolutions: &[Resolution]) -> CandleEngine<MemoryCandleStore> {
        let config = EngineConfig {
            resolutions: ResolutionSet::new(resolutions.to_vec()).unwrap(),
            ..EngineConfig::default()
        };
        CandleEngine::new(Arc::new(MemoryCandleStore::new()), config)
    }

    fn event(time: i64, close: i64, volume: i64) -> PriceEvent {
        PriceEvent::new(vault(), time, d(close), Volume::single(d(volume)))
    }

    #[tokio::test]
    async fn test_event_touches_every_resolution() {
        let engine = CandleEngine::new(Arc::new(MemoryCandleStore::new()), EngineConfig::default());
        let report = engine.apply_event(&event(1_700_000_123, 5, 1)).await.unwrap();

        assert_eq!(report.outcomes.len(), 10);
        assert_eq!(report.created(), 10);
        assert!(report.is_complete());
        let daily = report.candle(Resolution::D1).unwrap();
        assert_eq!(daily.bucket_time, 1_700_000_123 / 86_400 * 86_400);
        assert_eq!(engine.store().candle_count(types::ids::Domain::Vault), 10);
    }

    #[tokio::test]
    async fn test_second_event_updates_same_bucket() {
        let engine = engine(&[Resolution::M1]);
        engine.apply_event(&event(60, 5, 1)).await.unwrap();
        let report = engine.apply_event(&event(119, 8, 2)).await.unwrap();

        let outcome = report.outcome(Resolution::M1).unwrap();
        assert!(matches!(outcome, BucketOutcome::Updated(_)));
        let candle = outcome.candle().unwrap();
        assert_eq!(candle.open, d(5));
        assert_eq!(candle.close, d(8));
        assert_eq!(candle.volume, Volume::single(d(3)));
    }

    #[tokio::test]
    async fn test_new_bucket_opens_at_prior_close() {
        let engine = engine(&[Resolution::M1]);
        engine.apply_event(&event(0, 5, 1)).await.unwrap();
        engine.apply_event(&event(30, 6, 1)).await.unwrap();
        let report = engine.apply_event(&event(600, 9, 1)).await.unwrap();

        let candle = report.candle(Resolution::M1).unwrap();
        assert_eq!(candle.open, d(6));
        assert_eq!(candle.high, d(9));
        assert_eq!(candle.low, d(9));
    }

    #[tokio::test]
    async fn test_malformed_event_writes_nothing() {
        let engine = engine(&[Resolution::M1, Resolution::H1]);
        let bad = event(60, -1, 1);

        assert!(engine.apply_event(&bad).await.is_err());
        assert_eq!(engine.store().candle_count(types::ids::Domain::Vault), 0);
        assert_eq!(engine.metrics().events_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_dedup_only_when_enabled() {
        let id = EventId::from_log("0xabc", 0);

        let plain = engine(&[Resolution::M1]);
        for _ in 0..2 {
            plain
                .apply_event(&event(60, 5, 4).with_event_id(id.clone()))
                .await
                .unwrap();
        }
        let series = SeriesKey::new(vault(), Resolution::M1);
        let candle = plain
            .store()
            .find_one(&series, crate::store::TimeBound::Latest)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(candle.volume, Volume::single(d(8)));

        let mut config = plain.config().clone();
        config.dedup_events = true;
        let dedup = CandleEngine::new(Arc::new(MemoryCandleStore::new()), config);
        dedup
            .apply_event(&event(60, 5, 4).with_event_id(id.clone()))
            .await
            .unwrap();
        let again = dedup
            .apply_event(&event(60, 5, 4).with_event_id(id))
            .await
            .unwrap();
        let outcome = again.outcome(Resolution::M1).unwrap();
        assert!(matches!(outcome, BucketOutcome::Duplicate(_)));
        assert_eq!(outcome.candle().unwrap().volume, Volume::single(d(4)));
        assert_eq!(dedup.metrics().buckets_duplicate.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_failed_resolution_does_not_stop_others() {
        let engine = engine(&[Resolution::M1, Resolution::M5, Resolution::H1]);
        engine.store().fail_resolution(Resolution::M5);

        let report = engine.apply_event(&event(60, 5, 1)).await.unwrap();
        assert!(!report.is_complete());
        assert!(matches!(report.outcome(Resolution::M1), Some(BucketOutcome::Created(_))));
        assert!(matches!(report.outcome(Resolution::H1), Some(BucketOutcome::Created(_))));
        let failures: Vec<Resolution> = report.failures().map(|(r, _)| r).collect();
        assert_eq!(failures, vec![Resolution::M5]);

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.bucket_failures, 1);
        assert_eq!(snapshot.events_partially_applied, 1);
    }

    #[tokio::test]
    async fn test_apply_observation_and_batch() {
        let engine = engine(&[Resolution::M1]);
        let trade = crate::observation::VaultExchange {
            vault: vault(),
            time: 60,
            exchange_rate: d(2),
            amount: d(10),
            tx_id: None,
        };
        engine.apply(&trade).await.unwrap();

        let results = engine
            .apply_batch(vec![event(61, 3, 1), event(-1, 3, 1), event(62, 4, 1)])
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        let last = results[2].as_ref().unwrap().candle(Resolution::M1).unwrap();
        assert_eq!(last.open, d(2));
        assert_eq!(last.close, d(4));
        assert_eq!(last.volume, Volume::single(d(12)));
        assert_eq!(last.event_count, 3);
    }
}
