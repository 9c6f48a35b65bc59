//! Parameter and result payloads for the negotiation methods.

use {
    crate::pricing::Pricing,
    rust_decimal::Decimal,
    serde::{Deserialize, Serialize},
};

/// A priced offer as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub amount: Decimal,
    #[serde(default = "crate::default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl Offer {
    pub fn new(amount: Decimal) -> Self {
        Self {
            amount,
            currency: crate::default_currency(),
            network: None,
        }
    }
}

/// The agreed price once a negotiation completes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Terms {
    pub amount: Decimal,
    #[serde(default = "crate::default_currency")]
    pub currency: String,
}

/// `apex/propose` parameters: the buyer's opening offer for a job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposeParams {
    pub capability: String,
    #[serde(default)]
    pub input: serde_json::Value,
    pub job_id: String,
    pub offer: Offer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_id: Option<String>,
}

/// `apex/counter` parameters: the buyer responding to a seller counter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterParams {
    pub job_id: String,
    pub offer: Offer,
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// `apex/accept` parameters: the buyer taking the seller's last counter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcceptParams {
    pub job_id: String,
    pub terms: Terms,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// `apex/estimate` parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EstimateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Result of `propose`/`counter`/`accept`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    /// Terms agreed and the task has been executed.
    Completed {
        job_id: String,
        terms: Terms,
        output: serde_json::Value,
    },
    /// The seller counters; the ball is back in the buyer's court.
    Counter {
        job_id: String,
        offer: Offer,
        round: u32,
        max_rounds: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Result of `apex/discover`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Discovery {
    pub agent: AgentInfo,
    pub capabilities: Vec<Capability>,
    pub payment: PaymentInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub name: String,
    pub pricing: Pricing,
}

/// Where and how the seller wants to be paid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub networks: Vec<String>,
    pub currencies: Vec<String>,
    pub address: String,
}
