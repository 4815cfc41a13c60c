//! Chart resolutions and bucket derivation
//!
//! A resolution is the width of a candle bucket in seconds. Bucket
//! boundaries are aligned to the Unix epoch, so a 1h bucket always starts
//! on the hour and a 1d bucket at 00:00 UTC.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Width of one candle bucket, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resolution(u32);

impl Resolution {
    pub const M1: Resolution = Resolution(60);
    pub const M5: Resolution = Resolution(300);
    pub const M15: Resolution = Resolution(900);
    pub const M30: Resolution = Resolution(1_800);
    pub const H1: Resolution = Resolution(3_600);
    pub const H2: Resolution = Resolution(7_200);
    pub const H4: Resolution = Resolution(14_400);
    pub const D1: Resolution = Resolution(86_400);
    pub const W1: Resolution = Resolution(604_800);
    pub const D30: Resolution = Resolution(2_592_000);

    /// The standard chart resolutions, 1m through 30d.
    pub const STANDARD: [Resolution; 10] = [
        Resolution::M1,
        Resolution::M5,
        Resolution::M15,
        Resolution::M30,
        Resolution::H1,
        Resolution::H2,
        Resolution::H4,
        Resolution::D1,
        Resolution::W1,
        Resolution::D30,
    ];

    /// Create a resolution; zero-width buckets are rejected.
    pub fn from_secs(secs: u32) -> Option<Self> {
        (secs > 0).then_some(Self(secs))
    }

    pub fn as_secs(&self) -> u32 {
        self.0
    }

    /// Start of the bucket containing `event_time` (floor division).
    pub fn bucket_time(&self, event_time: i64) -> i64 {
        derive_bucket_time(event_time, *self)
    }

    /// Start of the bucket following the one that contains `event_time`.
    pub fn next_bucket_time(&self, event_time: i64) -> i64 {
        self.bucket_time(event_time) + i64::from(self.0)
    }

    /// Short label such as `5m`, `4h`, `1w`.
    pub fn label(&self) -> String {
        let secs = self.0;
        if secs % 604_800 == 0 {
            format!("{}w", secs / 604_800)
        } else if secs % 86_400 == 0 {
            format!("{}d", secs / 86_400)
        } else if secs % 3_600 == 0 {
            format!("{}h", secs / 3_600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Parse `30s`, `5m`, `4h`, `1d`, `1w`, or a bare number of seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let (num, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
            Some((idx, _)) => s.split_at(idx),
            None => (s.as_str(), "s"),
        };
        let n: u32 = num
            .parse()
            .map_err(|_| format!("invalid resolution: {s}"))?;
        let mult: u32 = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "w" => 604_800,
            _ => return Err(format!("invalid resolution unit: {s}")),
        };
        n.checked_mul(mult)
            .and_then(Resolution::from_secs)
            .ok_or_else(|| format!("invalid resolution: {s}"))
    }
}

/// `floor(event_time / resolution) * resolution`.
///
/// Any timestamp inside `[bucket, bucket + resolution)` maps back to
/// `bucket`. Saturates at `i64::MIN` for the few times whose floor is not
/// representable.
pub fn derive_bucket_time(event_time: i64, resolution: Resolution) -> i64 {
    let width = i64::from(resolution.0);
    event_time.div_euclid(width).saturating_mul(width)
}

/// Ordered, de-duplicated, non-empty set of resolutions.
///
/// Process-wide configuration injected into the engine at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Resolution>", into = "Vec<Resolution>")]
pub struct ResolutionSet(Vec<Resolution>);

impl ResolutionSet {
    pub fn new(resolutions: impl IntoIterator<Item = Resolution>) -> Result<Self, String> {
        let mut v: Vec<Resolution> = resolutions.into_iter().collect();
        if v.iter().any(|r| r.0 == 0) {
            return Err("resolution must be greater than zero".to_string());
        }
        v.sort();
        v.dedup();
        if v.is_empty() {
            return Err("resolution set must not be empty".to_string());
        }
        Ok(Self(v))
    }

    /// The ten standard resolutions.
    pub fn standard() -> Self {
        Self(Resolution::STANDARD.to_vec())
    }

    pub fn iter(&self) -> impl Iterator<Item = Resolution> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, resolution: Resolution) -> bool {
        self.0.binary_search(&resolution).is_ok()
    }

    /// Finest resolution in the set.
    pub fn finest(&self) -> Resolution {
        self.0[0]
    }

    pub fn as_slice(&self) -> &[Resolution] {
        &self.0
    }
}

impl Default for ResolutionSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<Resolution>> for ResolutionSet {
    type Error = String;

    fn try_from(value: Vec<Resolution>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResolutionSet> for Vec<Resolution> {
    fn from(set: ResolutionSet) -> Self {
        set.0
    }
}
