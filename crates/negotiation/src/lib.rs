//! Seller-side negotiation: the exponential concession curve, the
//! hash-chained transcript and the per-job engine that binds them together.

pub mod curve;
pub mod engine;
pub mod transcript;

pub use engine::{Counter, Engine, Error, State, TaskContext};
