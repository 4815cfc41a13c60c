//! Identifier types for chart series
//!
//! An instrument is scoped to a chain and identified by its contract address.
//! Addresses are case-normalized to lowercase on construction so that
//! checksummed and lowercase spellings of the same contract land in the
//! same series.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::IdError;

/// Chain identifier (e.g. "1", "42161", "sepolia")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId(String);

impl ChainId {
    /// Create a ChainId, rejecting empty values.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(IdError::EmptyChainId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChainId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChainId> for String {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract address of an instrument, always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create an Address, trimming whitespace and lowercasing.
    pub fn new(address: impl AsRef<str>) -> Result<Self, IdError> {
        let trimmed = address.as_ref().trim();
        if trimmed.is_empty() {
            return Err(IdError::EmptyAddress);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(IdError::InvalidAddress(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data domain an instrument belongs to.
///
/// Each domain is persisted in its own collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Market pair (base/quote)
    Market,
    /// Yield-vault token
    Vault,
    /// Farm pool
    Farm,
    /// Treasury asset
    Treasury,
}

impl Domain {
    pub fn all() -> &'static [Domain] {
        &[Domain::Market, Domain::Vault, Domain::Farm, Domain::Treasury]
    }

    /// Name of the collection holding this domain's candles.
    pub fn collection(&self) -> &'static str {
        match self {
            Domain::Market => "market_chart",
            Domain::Vault => "vault_chart",
            Domain::Farm => "farm_chart",
            Domain::Treasury => "treasury_chart",
        }
    }

    /// Whether candles in this domain track base and quote volume separately.
    pub fn has_paired_volume(&self) -> bool {
        matches!(self, Domain::Market)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Vault => "vault",
            Domain::Farm => "farm",
            Domain::Treasury => "treasury",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of a series family: chain + address + domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub chain_id: ChainId,
    pub address: Address,
    pub domain: Domain,
}

impl InstrumentKey {
    pub fn new(chain_id: ChainId, address: Address, domain: Domain) -> Self {
        Self {
            chain_id,
            address,
            domain,
        }
    }

    /// Build a key from raw strings, normalizing the address.
    pub fn parse(chain_id: &str, address: &str, domain: Domain) -> Result<Self, IdError> {
        Ok(Self::new(ChainId::new(chain_id)?, Address::new(address)?, domain))
    }

    pub fn market(chain_id: &str, address: &str) -> Result<Self, IdError> {
        Self::parse(chain_id, address, Domain::Market)
    }

    pub fn vault(chain_id: &str, address: &str) -> Result<Self, IdError> {
        Self::parse(chain_id, address, Domain::Vault)
    }

    pub fn farm(chain_id: &str, address: &str) -> Result<Self, IdError> {
        Self::parse(chain_id, address, Domain::Farm)
    }

    pub fn treasury(chain_id: &str, address: &str) -> Result<Self, IdError> {
        Self::parse(chain_id, address, Domain::Treasury)
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.domain, self.chain_id, self.address)
    }
}

/// Per-event idempotency key supplied by the event source.
///
/// Typically `txHash:logIndex` for on-chain events; `EventId::generate`
/// produces a UUID v7 when the source has nothing better.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh time-sortable id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Key for a log entry within a transaction.
    pub fn from_log(tx_hash: &str, log_index: u64) -> Self {
        Self(format!("{}:{}", tx_hash.to_lowercase(), log_index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
