//! Wire-level data model for the apex agent commerce protocol.
//!
//! Everything in this crate maps 1:1 onto JSON exchanged between buyers and
//! sellers. Domain logic lives in the `negotiation`, `estimation` and
//! `payments` crates; this crate only knows how the protocol looks on the
//! wire.

pub mod estimate;
pub mod negotiation;
pub mod pricing;
pub mod rpc;

pub use pricing::{Fixed, InvalidPricing, Negotiated, Pricing, Strategy};

/// Currency used when a request does not specify one.
pub const DEFAULT_CURRENCY: &str = "USDC";

pub(crate) fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
