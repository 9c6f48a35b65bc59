//! LLM-based task pricing.
//!
//! The seller publishes a human-chosen base rate; per task, the estimator
//! asks the model for a complexity multiplier and derives the negotiation
//! bounds from the product. The model is advisory only: the multiplier is
//! clamped to a fixed band and every fault degrades to the 1.0x standard
//! estimate.

pub mod cache;

pub use cache::Cache;

use {
    chrono::{DateTime, Utc},
    llm::Completions,
    model::estimate::{Bounds, Estimated, Factor, Quote},
    rand::RngCore,
    rust_decimal::{Decimal, RoundingStrategy},
    rust_decimal_macros::dec,
};

/// Estimates are honored for this long after issuance.
pub const ESTIMATE_TTL_SECS: i64 = 300;

const MULTIPLIER_GUIDE: &str = "\
Multiplier guide:
- 0.25x: Trivial (simple lookup, basic question)
- 0.5x: Simple (straightforward task, clear scope)
- 1.0x: Standard (typical task for this capability)
- 1.5x: Moderate (multiple sources, some synthesis)
- 2.0x: Complex (cross-domain, significant analysis)
- 3.0x: Hard (deep research, many dimensions)
- 4.0x: Very hard (novel territory, extensive work)";

/// Priced estimate for one task.
#[derive(Clone, Debug)]
pub struct TaskEstimate {
    /// The model's fair-value estimate, `base * multiplier`.
    pub amount: Decimal,
    /// Seller's negotiation floor, 80% of the amount.
    pub minimum: Decimal,
    pub currency: String,
    pub multiplier: Decimal,
    pub reasoning: Option<String>,
}

/// Full estimate as cached and returned over the protocol.
#[derive(Clone, Debug)]
pub struct EstimateResult {
    pub estimate_id: String,
    pub estimate: TaskEstimate,
    pub expires_at: DateTime<Utc>,
    /// Negotiation target derived from the estimate.
    pub target: Decimal,
    /// Negotiation floor derived from the estimate.
    pub floor: Decimal,
    pub factors: Vec<Factor>,
    pub reasoning: Option<String>,
}

impl EstimateResult {
    pub fn expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn to_wire(&self) -> Estimated {
        Estimated {
            status: "estimated".to_string(),
            estimate_id: self.estimate_id.clone(),
            expires_at: self.expires_at,
            estimate: Quote {
                amount: self.estimate.amount,
                minimum: self.estimate.minimum,
                currency: self.estimate.currency.clone(),
            },
            negotiation: Bounds {
                target: self.target,
                floor: self.floor,
            },
            factors: self.factors.clone(),
            reasoning: self.reasoning.clone(),
        }
    }
}

/// Prices a task: asks the model for a multiplier on the base rate, derives
/// the (target, floor) bounds and allocates a cacheable estimate id.
pub async fn estimate_task(
    base: Decimal,
    input: &serde_json::Value,
    oracle: &dyn Completions,
    instructions: &[String],
    capability: Option<&str>,
) -> EstimateResult {
    let system = estimation_prompt(base, instructions, capability);
    let user = format!("Task: {}", task_description(input));

    let (multiplier, reasoning) = match oracle.complete(&system, &user, 0.1).await {
        Ok(text) => parse_estimation(&text),
        Err(err) => {
            tracing::debug!(?err, "estimation LLM fault, using standard multiplier");
            (Decimal::ONE, "Standard complexity estimate.".to_string())
        }
    };

    let multiplier = multiplier.clamp(dec!(0.25), dec!(4.0));
    let amount = round2(base * multiplier);
    let minimum = round2(amount * dec!(0.80));

    EstimateResult {
        estimate_id: new_estimate_id(),
        estimate: TaskEstimate {
            amount,
            minimum,
            currency: model::DEFAULT_CURRENCY.to_string(),
            multiplier,
            reasoning: Some(reasoning.clone()),
        },
        expires_at: Utc::now() + chrono::Duration::seconds(ESTIMATE_TTL_SECS),
        target: amount,
        floor: minimum,
        factors: vec![
            Factor {
                name: "base_rate".to_string(),
                value: format!("${base:.2}"),
            },
            Factor {
                name: "multiplier".to_string(),
                value: format!("{multiplier:.2}x"),
            },
        ],
        reasoning: Some(reasoning),
    }
}

fn estimation_prompt(base: Decimal, instructions: &[String], capability: Option<&str>) -> String {
    let capability = capability
        .map(|name| format!("Capability: {name}\n"))
        .unwrap_or_default();
    let instructions = if instructions.is_empty() {
        String::new()
    } else {
        let lines = instructions
            .iter()
            .map(|hint| format!("- {hint}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Complexity guidelines:\n{lines}\n\n")
    };
    format!(
        "You are a PRICING ESTIMATOR. Your ONLY job is to analyze task complexity and output a \
         JSON object.\n\nDO NOT negotiate. DO NOT write conversational text. ONLY output \
         JSON.\n\nBase rate: ${base:.2}\n{capability}\n{instructions}{MULTIPLIER_GUIDE}\n\n\
         Analyze the task complexity and respond with ONLY this JSON format:\n{{\"multiplier\": \
         1.0, \"reasoning\": \"Brief explanation of complexity\"}}\n\nRules:\n- multiplier: 0.25 \
         (trivial) to 4.0 (very complex)\n- reasoning: 1 sentence explaining why this \
         multiplier\n\nRESPOND WITH JSON ONLY. NO OTHER TEXT."
    )
}

/// Pulls a task description out of arbitrary input by probing the fields
/// callers conventionally use, falling back to the raw JSON.
pub fn task_description(input: &serde_json::Value) -> String {
    for field in ["topic", "query", "task"] {
        if let Some(description) = input.get(field).and_then(|value| value.as_str()) {
            return description.to_string();
        }
    }
    input.to_string()
}

fn parse_estimation(text: &str) -> (Decimal, String) {
    #[derive(serde::Deserialize)]
    struct Wire {
        multiplier: Option<Decimal>,
        reasoning: Option<String>,
    }

    let wire: Wire = match llm::extract_json(text) {
        Ok(wire) => wire,
        Err(err) => {
            tracing::debug!(?err, "unparseable estimation response");
            return (Decimal::ONE, "Standard complexity estimate.".to_string());
        }
    };
    let multiplier = wire.multiplier.unwrap_or(Decimal::ONE);
    let reasoning = match wire.reasoning.filter(|reasoning| !reasoning.is_empty()) {
        Some(reasoning) => reasoning,
        None => default_reasoning(multiplier).to_string(),
    };
    (multiplier, reasoning)
}

/// Canned reasoning per multiplier band for models that return a bare number.
fn default_reasoning(multiplier: Decimal) -> &'static str {
    if multiplier < dec!(0.5) {
        "Quick factual lookup - minimal research required."
    } else if multiplier < dec!(1.0) {
        "Straightforward task with limited scope."
    } else if multiplier < dec!(1.5) {
        "Standard research task requiring synthesis."
    } else if multiplier < dec!(2.5) {
        "Complex analysis requiring multiple sources and deep synthesis."
    } else {
        "Comprehensive cross-domain research with high complexity."
    }
}

fn new_estimate_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("est-{}", hex::encode(bytes))
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}
