//! On-ledger payments: network parameters, the agent wallet and settlement
//! verification.
//!
//! Payments move USDC on an EVM chain. The buyer transfers the agreed amount
//! to the seller's address and hands over a [`PaymentProof`]; the seller
//! reconstructs the transfer from the public ledger and checks it against the
//! negotiated terms.

pub mod network;
pub mod settlement;
pub mod wallet;

pub use {
    network::{Network, USDC_DECIMALS},
    settlement::{Payment, PaymentManager, PaymentProof, PaymentResult, verify},
    wallet::{TransferResult, Wallet},
};

use {
    alloy::{primitives::U256, sol},
    rust_decimal::{Decimal, prelude::ToPrimitive},
};

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function transfer(address to, uint256 value) external returns (bool);
    }
}

/// Converts a human amount to raw token units, e.g. 12.50 USDC to 12_500_000
/// at 6 decimals. `None` for negative amounts or amounts out of range.
pub fn to_token_units(amount: Decimal, decimals: u32) -> Option<U256> {
    if amount.is_sign_negative() {
        return None;
    }
    let raw = (amount * Decimal::from(10u64.pow(decimals))).trunc();
    raw.to_u128().map(U256::from)
}

/// Converts raw token units back to a human amount. Saturates for values
/// beyond 128 bits, which no token balance of interest reaches.
pub fn from_token_units(raw: U256, decimals: u32) -> Decimal {
    match u128::try_from(raw) {
        Ok(raw) => Decimal::from_i128_with_scale(i128::try_from(raw).unwrap_or(i128::MAX), decimals),
        Err(_) => Decimal::MAX,
    }
}
