//! OHLCV candle model
//!
//! A candle is one bucket of one series: an instrument at a resolution,
//! starting at an epoch-aligned bucket time. High and low are derived only
//! from the sequence of closes applied to the bucket; there is no separate
//! tick stream.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{Domain, InstrumentKey};

use crate::resolution::Resolution;

/// Volume accumulator.
///
/// Markets track base and quote volume; vaults, farms, and treasuries track
/// a single amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Volume {
    Pair { base: Decimal, quote: Decimal },
    Single(Decimal),
}

impl Volume {
    pub fn single(amount: Decimal) -> Self {
        Volume::Single(amount)
    }

    pub fn pair(base: Decimal, quote: Decimal) -> Self {
        Volume::Pair { base, quote }
    }

    /// Zero volume in the shape used by `domain`.
    pub fn zero_for(domain: Domain) -> Self {
        if domain.has_paired_volume() {
            Volume::Pair {
                base: Decimal::ZERO,
                quote: Decimal::ZERO,
            }
        } else {
            Volume::Single(Decimal::ZERO)
        }
    }

    /// Whether this volume has the shape `domain` expects.
    pub fn matches_domain(&self, domain: Domain) -> bool {
        matches!(self, Volume::Pair { .. }) == domain.has_paired_volume()
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, Volume::Pair { .. })
    }

    /// Add another volume of the same shape. Returns `None` on a shape
    /// mismatch or decimal overflow.
    pub fn checked_add(&self, other: &Volume) -> Option<Volume> {
        match (self, other) {
            (Volume::Single(a), Volume::Single(b)) => a.checked_add(*b).map(Volume::Single),
            (
                Volume::Pair { base, quote },
                Volume::Pair {
                    base: other_base,
                    quote: other_quote,
                },
            ) => Some(Volume::Pair {
                base: base.checked_add(*other_base)?,
                quote: quote.checked_add(*other_quote)?,
            }),
            _ => None,
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Volume::Single(amount) => amount.is_sign_negative() && !amount.is_zero(),
            Volume::Pair { base, quote } => {
                (base.is_sign_negative() && !base.is_zero())
                    || (quote.is_sign_negative() && !quote.is_zero())
            }
        }
    }
}

/// One series: an instrument at one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub instrument: InstrumentKey,
    pub resolution: Resolution,
}

impl SeriesKey {
    pub fn new(instrument: InstrumentKey, resolution: Resolution) -> Self {
        Self {
            instrument,
            resolution,
        }
    }

    /// Key of the bucket in this series containing `event_time`.
    pub fn bucket_for(&self, event_time: i64) -> CandleKey {
        CandleKey {
            series: self.clone(),
            bucket_time: self.resolution.bucket_time(event_time),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.instrument, self.resolution)
    }
}

/// Unique key of one candle: (instrument, resolution, bucket time).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandleKey {
    pub series: SeriesKey,
    pub bucket_time: i64,
}

/// A single persisted OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: InstrumentKey,
    pub resolution: Resolution,
    /// Epoch seconds, aligned to `resolution`.
    pub bucket_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Volume,
    /// Number of events applied to this bucket.
    pub event_count: u64,
}

impl Candle {
    /// Create a bucket from its first applied event.
    ///
    /// `open` is the carried-forward close of the previous bucket, or the
    /// event's own close when the series has no earlier bucket.
    pub fn open_bucket(key: &CandleKey, open: Decimal, close: Decimal, volume: Volume) -> Self {
        Self {
            instrument: key.series.instrument.clone(),
            resolution: key.series.resolution,
            bucket_time: key.bucket_time,
            open,
            high: close,
            low: close,
            close,
            volume,
            event_count: 1,
        }
    }

    /// Fold one more close and volume delta into the bucket.
    ///
    /// Returns `false` without modifying the candle if the volume shape
    /// does not match or the addition overflows.
    pub fn apply(&mut self, close: Decimal, volume: &Volume) -> bool {
        let Some(total) = self.volume.checked_add(volume) else {
            return false;
        };
        if close > self.high {
            self.high = close;
        }
        if close < self.low {
            self.low = close;
        }
        self.close = close;
        self.volume = total;
        self.event_count += 1;
        true
    }

    pub fn series(&self) -> SeriesKey {
        SeriesKey::new(self.instrument.clone(), self.resolution)
    }

    /// End of the bucket (exclusive).
    pub fn end_time(&self) -> i64 {
        self.bucket_time + i64::from(self.resolution.as_secs())
    }

    /// Validate candle integrity.
    ///
    /// The open is excluded from the high/low envelope: a carried-forward
    /// open may lie outside the range of closes seen in the bucket.
    pub fn is_valid(&self) -> bool {
        self.high >= self.close
            && self.high >= self.low
            && self.low <= self.close
            && !self.volume.is_negative()
            && self.volume.matches_domain(self.instrument.domain)
            && self.bucket_time == self.resolution.bucket_time(self.bucket_time)
    }
}
