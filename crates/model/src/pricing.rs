use {
    rust_decimal::Decimal,
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// Default number of offer/response exchanges before a negotiation is cut off.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// How a seller prices a capability.
///
/// This is a closed set: the dispatcher matches exhaustively on it, so adding
/// a variant requires touching every call site that routes on pricing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum Pricing {
    Fixed(Fixed),
    Negotiated(Negotiated),
}

impl Pricing {
    pub fn currency(&self) -> &str {
        match self {
            Self::Fixed(fixed) => &fixed.currency,
            Self::Negotiated(negotiated) => &negotiated.currency,
        }
    }
}

/// Exact price, take it or leave it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fixed {
    pub amount: Decimal,
    #[serde(default = "crate::default_currency")]
    pub currency: String,
}

impl Fixed {
    pub fn new(amount: Decimal) -> Result<Self, InvalidPricing> {
        if amount.is_sign_negative() {
            return Err(InvalidPricing::NegativeAmount);
        }
        Ok(Self {
            amount,
            currency: crate::default_currency(),
        })
    }
}

/// Dynamic pricing settled through a bounded negotiation.
///
/// Two modes. In base-rate mode the seller publishes a `base` rate and the
/// (target, minimum) bounds are derived per task by the estimator. In legacy
/// mode the bounds are fixed up front as `target_amount`/`min_amount`.
/// Exactly one of the two modes must be configured; [`Negotiated::validate`]
/// rejects everything else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Negotiated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Decimal>,
    #[serde(
        default,
        rename = "target_amount",
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<Decimal>,
    #[serde(default, rename = "min_amount", skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Decimal>,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "crate::default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    /// LLM used for negotiation dialogue and, in base-rate mode, estimation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,
    /// Advertised on the wire so buyers know to request an estimate first.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_estimation: bool,
}

impl Negotiated {
    /// Base-rate mode: bounds are resolved per task by the estimator.
    pub fn base(base: Decimal) -> Result<Self, InvalidPricing> {
        if base <= Decimal::ZERO {
            return Err(InvalidPricing::NegativeAmount);
        }
        Ok(Self {
            base: Some(base),
            target: None,
            minimum: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            currency: crate::default_currency(),
            strategy: None,
            model: None,
            base_url: None,
            instructions: Vec::new(),
            requires_estimation: true,
        })
    }

    /// Legacy mode with explicit bounds.
    pub fn bounds(target: Decimal, minimum: Decimal) -> Result<Self, InvalidPricing> {
        let negotiated = Self {
            base: None,
            target: Some(target),
            minimum: Some(minimum),
            max_rounds: DEFAULT_MAX_ROUNDS,
            currency: crate::default_currency(),
            strategy: None,
            model: None,
            base_url: None,
            instructions: Vec::new(),
            requires_estimation: false,
        };
        negotiated.validate()?;
        Ok(negotiated)
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_instructions(mut self, instructions: Vec<String>) -> Self {
        self.instructions = instructions;
        self
    }

    /// True when the (target, minimum) bounds have to come from an estimate.
    pub fn uses_estimation(&self) -> bool {
        self.base.is_some()
    }

    /// The strategy to negotiate with. Configuring a model without a strategy
    /// implies full LLM control; otherwise the moderate default applies.
    pub fn effective_strategy(&self) -> Strategy {
        match (self.strategy, &self.model) {
            (Some(strategy), _) => strategy,
            (None, Some(_)) => Strategy::Llm,
            (None, None) => Strategy::Balanced,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidPricing> {
        match (self.base, self.target, self.minimum) {
            (Some(base), None, None) => {
                if base <= Decimal::ZERO {
                    return Err(InvalidPricing::NegativeAmount);
                }
            }
            (None, Some(target), Some(minimum)) => {
                if minimum.is_sign_negative() {
                    return Err(InvalidPricing::NegativeAmount);
                }
                if target < minimum {
                    return Err(InvalidPricing::TargetBelowMinimum { target, minimum });
                }
            }
            (Some(_), _, _) => return Err(InvalidPricing::AmbiguousBounds),
            _ => return Err(InvalidPricing::MissingBounds),
        }
        if self.max_rounds < 1 {
            return Err(InvalidPricing::NoRounds);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Holds near target, minimal concessions.
    Firm,
    /// Moderate concessions, the default.
    Balanced,
    /// Faster concessions, prioritizes closing a deal.
    Flexible,
    /// Price and dialogue both come from the LLM, clamped by hard bounds.
    Llm,
}

impl Strategy {
    /// Risk tolerance driving the exponential concession curve. The llm
    /// strategy concedes like `Balanced` whenever it falls back to the curve.
    pub fn risk(self) -> f64 {
        match self {
            Self::Firm => 0.3,
            Self::Balanced | Self::Llm => 0.6,
            Self::Flexible => 0.85,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InvalidPricing {
    #[error("negotiated pricing requires either a base rate or target and minimum bounds")]
    MissingBounds,
    #[error("a base rate and explicit bounds are mutually exclusive")]
    AmbiguousBounds,
    #[error("target {target} is below minimum {minimum}")]
    TargetBelowMinimum { target: Decimal, minimum: Decimal },
    #[error("at least one negotiation round is required")]
    NoRounds,
    #[error("price amounts must be positive")]
    NegativeAmount,
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

#[cfg(test)]
mod tests {
    use {super::*, rust_decimal_macros::dec};

    #[test]
    fn wire_format_fixed() {
        let pricing = Pricing::Fixed(Fixed::new(dec!(5)).unwrap());
        let json = serde_json::to_value(&pricing).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "fixed", "amount": 5.0, "currency": "USDC"})
        );
    }

    #[test]
    fn wire_format_negotiated_base_mode() {
        let pricing = Pricing::Negotiated(Negotiated::base(dec!(20)).unwrap());
        let json = serde_json::to_value(&pricing).unwrap();
        assert_eq!(json["model"], "negotiated");
        assert_eq!(json["base"], 20.0);
        assert_eq!(json["requires_estimation"], true);
        assert!(json.get("target_amount").is_none());
    }

    #[test]
    fn wire_format_negotiated_legacy_mode() {
        let pricing = Pricing::Negotiated(Negotiated::bounds(dec!(25), dec!(15)).unwrap());
        let json = serde_json::to_value(&pricing).unwrap();
        assert_eq!(json["target_amount"], 25.0);
        assert_eq!(json["min_amount"], 15.0);
        assert!(json.get("requires_estimation").is_none());
    }

    #[test]
    fn round_trips() {
        for pricing in [
            Pricing::Fixed(Fixed::new(dec!(5.00)).unwrap()),
            Pricing::Negotiated(Negotiated::base(dec!(20)).unwrap()),
            Pricing::Negotiated(
                Negotiated::bounds(dec!(25), dec!(15))
                    .unwrap()
                    .with_strategy(Strategy::Firm)
                    .with_max_rounds(3),
            ),
        ] {
            let json = serde_json::to_string(&pricing).unwrap();
            let parsed: Pricing = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, pricing);
        }
    }

    #[test]
    fn rejects_invalid_configurations() {
        assert_eq!(
            Negotiated::bounds(dec!(10), dec!(15)).unwrap_err(),
            InvalidPricing::TargetBelowMinimum {
                target: dec!(10),
                minimum: dec!(15)
            },
        );
        assert_eq!(
            Negotiated::base(dec!(0)).unwrap_err(),
            InvalidPricing::NegativeAmount
        );

        let mut no_rounds = Negotiated::bounds(dec!(10), dec!(5)).unwrap();
        no_rounds.max_rounds = 0;
        assert_eq!(no_rounds.validate().unwrap_err(), InvalidPricing::NoRounds);

        let json = serde_json::json!({"base": null, "max_rounds": 5});
        let parsed: Negotiated = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.validate().unwrap_err(), InvalidPricing::MissingBounds);
    }

    #[test]
    fn strategy_defaults() {
        let legacy = Negotiated::bounds(dec!(25), dec!(15)).unwrap();
        assert_eq!(legacy.effective_strategy(), Strategy::Balanced);

        let with_model = legacy.clone().with_model("gpt-4o-mini");
        assert_eq!(with_model.effective_strategy(), Strategy::Llm);

        let explicit = with_model.with_strategy(Strategy::Firm);
        assert_eq!(explicit.effective_strategy(), Strategy::Firm);
    }
}
