//! Risk Engine for Fortress transfers
//!
//! Scores a transfer before any money moves and decides which OTP challenge,
//! if any, the client must pass. Scoring is fail-open: an unreachable
//! profile service degrades to an empty profile, never to an error.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod types;
pub mod limits;
pub mod profile;
pub mod scoring;

pub use error::{Error, Result};
pub use types::*;
pub use limits::{LimitChecker, LimitConfig};
pub use profile::{ProfileLookup, ProfileOutcome, RiskProfileSource, StaticProfileSource};
pub use scoring::{RiskAssessor, RiskConfig, RiskScorer};
