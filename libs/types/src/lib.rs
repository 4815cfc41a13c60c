//! Types library for on-chain chart services
//!
//! Shared identifier, numeric, and error types used by the chart
//! aggregation service and its collaborators.
//!
//! # Modules
//! - `ids`: Instrument identity (ChainId, Address, Domain, InstrumentKey, EventId)
//! - `numeric`: Validated decimal types (Price, Quantity) and fixed-point conversion
//! - `time`: Epoch-second helpers
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod time;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::time::*;
    pub use crate::errors::*;
}
