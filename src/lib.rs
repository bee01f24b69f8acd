//! Pricefeeder Library
//!
//! Oracle price feeder: watches the chain for voting periods and submits
//! aggregated prices through the commit-reveal protocol.

pub mod config;
pub mod error;
pub mod eventstream;
pub mod feeder;
pub mod metrics;
pub mod priceposter;
pub mod priceprovider;
pub mod types;

mod shutdown;
