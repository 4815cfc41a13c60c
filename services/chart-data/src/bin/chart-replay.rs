//! Replay NDJSON samples through the candle engine, then print the latest
//! candle of every touched series and a 24h change summary per instrument
//! as of its last event.
//!
//! Usage: `chart-replay <events.ndjson> [config.toml]`
//!
//! Each line is either a decoded `PriceEvent` or a `RawSample` with
//! on-chain fixed-point amounts.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use anyhow::{bail, Context};
use chart_data::observation::RawSample;
use chart_data::{
    CandleEngine, EngineConfig, MemoryCandleStore, PriceEvent, SeriesKey, SeriesReader,
    SummaryCalculator,
};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::ids::InstrumentKey;
use types::time::format_epoch;

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Decoded(PriceEvent),
    Raw(RawSample),
}

/// Apply one event and, if the engine accepted it, advance the
/// instrument's last event time.
async fn replay_event(
    engine: &CandleEngine<MemoryCandleStore>,
    instruments: &mut BTreeMap<InstrumentKey, i64>,
    event: &PriceEvent,
) -> bool {
    // Rejections and dropped resolutions are logged by the engine.
    if engine.apply_event(event).await.is_err() {
        return false;
    }
    instruments
        .entry(event.instrument.clone())
        .and_modify(|last| *last = (*last).max(event.event_time))
        .or_insert(event.event_time);
    true
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(events_path) = args.next() else {
        bail!("usage: chart-replay <events.ndjson> [config.toml]");
    };
    let config = match args.next() {
        Some(path) => EngineConfig::from_file(&path)?,
        None => EngineConfig::default(),
    };

    let store = Arc::new(MemoryCandleStore::new());
    let engine = CandleEngine::new(Arc::clone(&store), config.clone());
    let reader =
        SeriesReader::new(Arc::clone(&store), &config).with_metrics(Arc::clone(engine.metrics()));
    let summaries =
        SummaryCalculator::new(store, &config).with_metrics(Arc::clone(engine.metrics()));

    let file = File::open(&events_path).with_context(|| format!("opening {}", events_path))?;
    // Last accepted event time per instrument.
    let mut instruments: BTreeMap<InstrumentKey, i64> = BTreeMap::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", events_path))?;
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<ReplayLine>(&line) {
            Ok(ReplayLine::Decoded(event)) => event,
            Ok(ReplayLine::Raw(raw)) => match raw.decode() {
                Ok(event) => event,
                Err(err) => {
                    warn!(line = index + 1, error = %err, "Skipping undecodable sample");
                    continue;
                }
            },
            Err(err) => {
                warn!(line = index + 1, error = %err, "Skipping unparseable line");
                continue;
            }
        };

        replay_event(&engine, &mut instruments, &event).await;
    }

    for (instrument, last_time) in &instruments {
        for resolution in config.resolutions.iter() {
            let series = SeriesKey::new(instrument.clone(), resolution);
            if let Some(candle) = reader.latest(&series).await? {
                println!("{}", serde_json::to_string(&candle)?);
            }
        }

        let finest = SeriesKey::new(instrument.clone(), config.resolutions.finest());
        if let Some(summary) = summaries.summarize(&finest, *last_time).await? {
            let as_of = format_epoch(*last_time).unwrap_or_default();
            info!(instrument = %instrument, as_of = %as_of, "24h summary");
            println!("{}", serde_json::to_string(&summary)?);
        }
    }

    let metrics = engine.metrics().snapshot();
    info!(
        events = metrics.events_received,
        rejected = metrics.events_rejected,
        created = metrics.buckets_created,
        updated = metrics.buckets_updated,
        failures = metrics.bucket_failures,
        "Replay finished"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chart_data::Volume;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_rejected_event_does_not_move_last_time() {
        let store = Arc::new(MemoryCandleStore::new());
        let engine = CandleEngine::new(store, EngineConfig::default());
        let vault = InstrumentKey::vault("1", "0xvault").unwrap();
        let mut instruments = BTreeMap::new();

        let one = Volume::single(Decimal::ONE);
        let accepted = PriceEvent::new(vault.clone(), 600, Decimal::ONE, one.clone());
        assert!(replay_event(&engine, &mut instruments, &accepted).await);

        let rejected = PriceEvent::new(vault.clone(), 9_000, -Decimal::ONE, one.clone());
        assert!(!replay_event(&engine, &mut instruments, &rejected).await);

        let earlier = PriceEvent::new(vault.clone(), 300, Decimal::TWO, one);
        assert!(replay_event(&engine, &mut instruments, &earlier).await);

        assert_eq!(instruments.get(&vault), Some(&600));
    }
}
