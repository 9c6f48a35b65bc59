//! Wire form of `apex/estimate` results.

use {
    chrono::{DateTime, Utc},
    rust_decimal::Decimal,
    serde::{Deserialize, Serialize},
};

/// Result of `apex/estimate`: a priced, time-limited quote for a task
/// together with the negotiation bounds it implies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Estimated {
    #[serde(default = "estimated_status")]
    pub status: String,
    pub estimate_id: String,
    pub expires_at: DateTime<Utc>,
    pub estimate: Quote,
    pub negotiation: Bounds,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub factors: Vec<Factor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quote {
    pub amount: Decimal,
    pub minimum: Decimal,
    #[serde(default = "crate::default_currency")]
    pub currency: String,
}

/// Seller-side (target, floor) interval the estimate parameterizes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bounds {
    pub target: Decimal,
    pub floor: Decimal,
}

/// One named input to the estimate, e.g. the base rate or the multiplier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    pub value: String,
}

fn estimated_status() -> String {
    "estimated".to_string()
}
