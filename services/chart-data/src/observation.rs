//! Incoming samples and the domain value-extraction contract
//!
//! The event source decodes blockchain transactions into samples. Each
//! domain means something different by "close" and "volume" (a trade
//! price, a vault exchange rate, a farm share value, a treasury total);
//! the [`Observation`] trait maps every domain onto the one generic
//! [`PriceEvent`] the engine consumes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::errors::NumericError;
use types::ids::{EventId, InstrumentKey};
use types::numeric::{from_fixed_point, Price, Quantity};

use crate::candle::Volume;

/// Value-extraction contract implemented by every domain sample.
pub trait Observation {
    fn instrument(&self) -> InstrumentKey;

    /// Unix epoch seconds of the observed update.
    fn event_time(&self) -> i64;

    /// Value that becomes the bucket close.
    fn close(&self) -> Decimal;

    /// Amount added to the bucket volume.
    fn volume(&self) -> Volume;

    /// Idempotency key, when the source can supply one.
    fn event_id(&self) -> Option<EventId> {
        None
    }

    fn to_price_event(&self) -> PriceEvent {
        PriceEvent {
            instrument: self.instrument(),
            event_time: self.event_time(),
            close: self.close(),
            volume: self.volume(),
            event_id: self.event_id(),
        }
    }
}

/// Generic sample: one close and one volume delta for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub instrument: InstrumentKey,
    /// Unix epoch seconds.
    pub event_time: i64,
    pub close: Decimal,
    pub volume: Volume,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
}

impl PriceEvent {
    pub fn new(instrument: InstrumentKey, event_time: i64, close: Decimal, volume: Volume) -> Self {
        Self {
            instrument,
            event_time,
            close,
            volume,
            event_id: None,
        }
    }

    /// Price-only update: zero volume in the instrument's shape.
    pub fn price_only(instrument: InstrumentKey, event_time: i64, close: Decimal) -> Self {
        let volume = Volume::zero_for(instrument.domain);
        Self::new(instrument, event_time, close, volume)
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Check the sample before anything is persisted.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.event_time < 0 {
            return Err(IngestError::NegativeTimestamp {
                instrument: self.instrument.to_string(),
                event_time: self.event_time,
            });
        }
        if self.close.is_sign_negative() && !self.close.is_zero() {
            return Err(IngestError::NegativeClose {
                instrument: self.instrument.to_string(),
                event_time: self.event_time,
                close: self.close.to_string(),
            });
        }
        if self.volume.is_negative() {
            return Err(IngestError::NegativeVolume {
                instrument: self.instrument.to_string(),
                event_time: self.event_time,
            });
        }
        if !self.volume.matches_domain(self.instrument.domain) {
            return Err(IngestError::VolumeShapeMismatch {
                instrument: self.instrument.to_string(),
                event_time: self.event_time,
                paired: self.volume.is_paired(),
            });
        }
        Ok(())
    }
}

impl Observation for PriceEvent {
    fn instrument(&self) -> InstrumentKey {
        self.instrument.clone()
    }

    fn event_time(&self) -> i64 {
        self.event_time
    }

    fn close(&self) -> Decimal {
        self.close
    }

    fn volume(&self) -> Volume {
        self.volume
    }

    fn event_id(&self) -> Option<EventId> {
        self.event_id.clone()
    }

    fn to_price_event(&self) -> PriceEvent {
        self.clone()
    }
}

/// Rejections of malformed input. Nothing is written for a rejected event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("negative event time {event_time} for {instrument}")]
    NegativeTimestamp { instrument: String, event_time: i64 },

    #[error("negative close {close} for {instrument} at {event_time}")]
    NegativeClose {
        instrument: String,
        event_time: i64,
        close: String,
    },

    #[error("negative volume for {instrument} at {event_time}")]
    NegativeVolume { instrument: String, event_time: i64 },

    #[error("volume shape (paired={paired}) does not match domain of {instrument} at {event_time}")]
    VolumeShapeMismatch {
        instrument: String,
        event_time: i64,
        paired: bool,
    },

    #[error("malformed amount for {instrument} at {event_time}: {source}")]
    Numeric {
        instrument: String,
        event_time: i64,
        #[source]
        source: NumericError,
    },

    #[error("expected 1 or 2 volume amounts for {instrument} at {event_time}, got {parts}")]
    VolumeArity {
        instrument: String,
        event_time: i64,
        parts: usize,
    },
}

/// An on-chain integer amount with its token decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPoint {
    pub raw: String,
    pub decimals: u32,
}

impl FixedPoint {
    pub fn new(raw: impl Into<String>, decimals: u32) -> Self {
        Self {
            raw: raw.into(),
            decimals,
        }
    }
}

/// Sample as decoded from a log, before fixed-point conversion.
///
/// `volume` holds one amount for single-volume domains or `[base, quote]`
/// for markets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    pub instrument: InstrumentKey,
    pub event_time: i64,
    pub close: FixedPoint,
    pub volume: Vec<FixedPoint>,
    #[serde(default)]
    pub event_id: Option<EventId>,
}

impl RawSample {
    /// Convert the raw amounts into a [`PriceEvent`].
    pub fn decode(&self) -> Result<PriceEvent, IngestError> {
        let numeric = |source: NumericError| IngestError::Numeric {
            instrument: self.instrument.to_string(),
            event_time: self.event_time,
            source,
        };

        let close = from_fixed_point(&self.close.raw, self.close.decimals)
            .and_then(Price::try_new)
            .map_err(numeric)?;

        let amounts = self
            .volume
            .iter()
            .map(|amount| {
                Quantity::from_fixed_point(&amount.raw, amount.decimals).map(|q| q.as_decimal())
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(numeric)?;

        let volume = match amounts.as_slice() {
            [single] => Volume::single(*single),
            [base, quote] => Volume::pair(*base, *quote),
            _ => {
                return Err(IngestError::VolumeArity {
                    instrument: self.instrument.to_string(),
                    event_time: self.event_time,
                    parts: amounts.len(),
                })
            }
        };

        Ok(PriceEvent {
            instrument: self.instrument.clone(),
            event_time: self.event_time,
            close: close.as_decimal(),
            volume,
            event_id: self.event_id.clone(),
        })
    }
}

/// A swap on a market pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTrade {
    pub market: InstrumentKey,
    pub time: i64,
    /// Quote per base.
    pub price: Decimal,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    #[serde(default)]
    pub tx_id: Option<EventId>,
}

impl Observation for MarketTrade {
    fn instrument(&self) -> InstrumentKey {
        self.market.clone()
    }

    fn event_time(&self) -> i64 {
        self.time
    }

    fn close(&self) -> Decimal {
        self.price
    }

    fn volume(&self) -> Volume {
        Volume::pair(self.base_amount, self.quote_amount)
    }

    fn event_id(&self) -> Option<EventId> {
        self.tx_id.clone()
    }
}

/// A deposit or withdrawal on a yield vault, priced at its exchange rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultExchange {
    pub vault: InstrumentKey,
    pub time: i64,
    /// Underlying value per vault token.
    pub exchange_rate: Decimal,
    /// Amount moved in or out, as an absolute value.
    pub amount: Decimal,
    #[serde(default)]
    pub tx_id: Option<EventId>,
}

impl Observation for VaultExchange {
    fn instrument(&self) -> InstrumentKey {
        self.vault.clone()
    }

    fn event_time(&self) -> i64 {
        self.time
    }

    fn close(&self) -> Decimal {
        self.exchange_rate
    }

    fn volume(&self) -> Volume {
        Volume::single(self.amount)
    }

    fn event_id(&self) -> Option<EventId> {
        self.tx_id.clone()
    }
}

/// A stake or unstake on a farm pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmValue {
    pub farm: InstrumentKey,
    pub time: i64,
    /// Value of one pool share.
    pub share_value: Decimal,
    pub staked_amount: Decimal,
    #[serde(default)]
    pub tx_id: Option<EventId>,
}

impl Observation for FarmValue {
    fn instrument(&self) -> InstrumentKey {
        self.farm.clone()
    }

    fn event_time(&self) -> i64 {
        self.time
    }

    fn close(&self) -> Decimal {
        self.share_value
    }

    fn volume(&self) -> Volume {
        Volume::single(self.staked_amount)
    }

    fn event_id(&self) -> Option<EventId> {
        self.tx_id.clone()
    }
}

/// A treasury valuation update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryValue {
    pub treasury: InstrumentKey,
    pub time: i64,
    /// Total value locked.
    pub total_value: Decimal,
    /// Value traded through the treasury by this update.
    pub traded_value: Decimal,
    #[serde(default)]
    pub tx_id: Option<EventId>,
}

impl Observation for TreasuryValue {
    fn instrument(&self) -> InstrumentKey {
        self.treasury.clone()
    }

    fn event_time(&self) -> i64 {
        self.time
    }

    fn close(&self) -> Decimal {
        self.total_value
    }

    fn volume(&self) -> Volume {
        Volume::single(self.traded_value)
    }

    fn event_id(&self) -> Option<EventId> {
        self.tx_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn test_market_trade_maps_to_paired_volume() {
        let trade = MarketTrade {
            market: InstrumentKey::market("1", "0xPAIR").unwrap(),
            time: 1_700_000_000,
            price: d(2000),
            base_amount: d(2),
            quote_amount: d(4000),
            tx_id: Some(EventId::from_log("0xabc", 3)),
        };
        let event = trade.to_price_event();
        assert_eq!(event.close, d(2000));
        assert_eq!(event.volume, Volume::pair(d(2), d(4000)));
        assert_eq!(event.event_id.unwrap().as_str(), "0xabc:3");
        assert_eq!(event.instrument.address.as_str(), "0xpair");
        assert!(trade.to_price_event().validate().is_ok());
    }

    #[test]
    fn test_single_volume_domains() {
        let vault = VaultExchange {
            vault: InstrumentKey::vault("1", "0xv").unwrap(),
            time: 10,
            exchange_rate: d(1),
            amount: d(50),
            tx_id: None,
        };
        let farm = FarmValue {
            farm: InstrumentKey::farm("1", "0xf").unwrap(),
            time: 10,
            share_value: d(3),
            staked_amount: d(7),
            tx_id: None,
        };
        let treasury = TreasuryValue {
            treasury: InstrumentKey::treasury("1", "0xt").unwrap(),
            time: 10,
            total_value: d(1_000_000),
            traded_value: d(25),
            tx_id: None,
        };
        assert_eq!(vault.volume(), Volume::single(d(50)));
        assert_eq!(farm.close(), d(3));
        assert_eq!(treasury.volume(), Volume::single(d(25)));
        for event in [
            vault.to_price_event(),
            farm.to_price_event(),
            treasury.to_price_event(),
        ] {
            assert!(event.validate().is_ok());
            assert!(event.event_id.is_none());
        }
    }

    #[test]
    fn test_validate_rejects_negative_close() {
        let event = PriceEvent::price_only(InstrumentKey::vault("1", "0xv").unwrap(), 100, d(-1));
        assert!(matches!(
            event.validate(),
            Err(IngestError::NegativeClose { event_time: 100, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_volume() {
        let event = PriceEvent::new(
            InstrumentKey::market("1", "0xm").unwrap(),
            100,
            d(1),
            Volume::pair(d(1), d(-1)),
        );
        assert!(matches!(
            event.validate(),
            Err(IngestError::NegativeVolume { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_volume_shape() {
        let event = PriceEvent::new(
            InstrumentKey::market("1", "0xm").unwrap(),
            100,
            d(1),
            Volume::single(d(1)),
        );
        let err = event.validate().unwrap_err();
        assert!(err.to_string().contains("market:1/0xm"));
    }

    #[test]
    fn test_validate_rejects_negative_time() {
        let event = PriceEvent::price_only(InstrumentKey::farm("1", "0xf").unwrap(), -5, d(1));
        assert!(matches!(
            event.validate(),
            Err(IngestError::NegativeTimestamp { event_time: -5, .. })
        ));
    }

    #[test]
    fn test_price_only_uses_domain_shape() {
        let event = PriceEvent::price_only(InstrumentKey::market("1", "0xm").unwrap(), 0, d(1));
        assert_eq!(event.volume, Volume::pair(d(0), d(0)));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_raw_sample_decodes_wei_amounts() {
        let raw = RawSample {
            instrument: InstrumentKey::market("1", "0xm").unwrap(),
            event_time: 100,
            close: FixedPoint::new("1500000000000000000", 18),
            volume: vec![
                FixedPoint::new("2000000000000000000", 18),
                FixedPoint::new("3000000", 6),
            ],
            event_id: None,
        };
        let event = raw.decode().unwrap();
        assert_eq!(event.close, Decimal::new(15, 1));
        assert_eq!(event.volume, Volume::pair(d(2), d(3)));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_raw_sample_rejects_garbage() {
        let mut raw = RawSample {
            instrument: InstrumentKey::vault("1", "0xv").unwrap(),
            event_time: 100,
            close: FixedPoint::new("12abc", 18),
            volume: vec![FixedPoint::new("1", 0)],
            event_id: None,
        };
        assert!(matches!(raw.decode(), Err(IngestError::Numeric { event_time: 100, .. })));

        raw.close = FixedPoint::new("1", 0);
        raw.volume.clear();
        assert!(matches!(raw.decode(), Err(IngestError::VolumeArity { parts: 0, .. })));
    }

    #[test]
    fn test_price_event_json() {
        let json = r#"{
            "instrument": {"chain_id": "1", "address": "0xABC", "domain": "vault"},
            "event_time": 1700000000,
            "close": "1.05",
            "volume": "10"
        }"#;
        let event: PriceEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.instrument.address.as_str(), "0xabc");
        assert_eq!(event.volume, Volume::single(d(10)));
        assert!(event.event_id.is_none());
        assert!(event.validate().is_ok());
    }
}
