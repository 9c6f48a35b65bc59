//! Offer sizing and counter decisions for the buyer.

use {
    crate::Buyer,
    model::{estimate::Estimated, pricing::Strategy},
    rust_decimal::{Decimal, RoundingStrategy, prelude::FromPrimitive},
    rust_decimal_macros::dec,
};

/// The buyer's response to a seller counter.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Accept,
    Counter { price: Decimal },
    Reject,
}

impl Buyer {
    /// Opening offer from the budget alone: start low and leave room to
    /// climb.
    pub(crate) fn initial_offer(&self) -> Decimal {
        let pct = match self.strategy {
            Strategy::Firm => dec!(0.50),
            Strategy::Flexible => dec!(0.75),
            Strategy::Balanced | Strategy::Llm => self.initial_offer_pct,
        };
        round2(self.budget * pct)
    }

    /// Opening offer anchored on the seller's estimate. Undercutting the
    /// seller's floor is pointless, so the offer never starts below 90% of
    /// it, and never above the budget.
    pub(crate) fn offer_from_estimate(&self, estimate: &Estimated) -> Decimal {
        let amount = estimate.estimate.amount;
        let minimum = estimate.estimate.minimum;
        let pct = match self.strategy {
            Strategy::Firm => dec!(0.50),
            Strategy::Flexible => dec!(0.70),
            Strategy::Balanced | Strategy::Llm => dec!(0.55),
        };
        let mut offer = amount * pct;
        offer = offer.max(minimum * dec!(0.9));
        if offer > self.budget {
            offer = self.budget * dec!(0.6);
        }
        round2(offer.min(self.budget))
    }

    /// Responds to a seller counter: accept within budget subject to the
    /// strategy's rule, reject a terminal over-budget ask, otherwise climb
    /// along the concession curve.
    pub(crate) async fn decide(
        &self,
        my_offer: Decimal,
        seller_offer: Decimal,
        round: u32,
        max_rounds: u32,
    ) -> Decision {
        if self.strategy == Strategy::Llm {
            if let Some(oracle) = self.oracle.clone() {
                return self
                    .llm_decide(oracle.as_ref(), my_offer, seller_offer, round, max_rounds)
                    .await;
            }
        }

        if seller_offer <= self.budget {
            match self.strategy {
                Strategy::Flexible => return Decision::Accept,
                Strategy::Firm => {
                    if seller_offer <= my_offer * dec!(1.1) {
                        return Decision::Accept;
                    }
                }
                Strategy::Balanced | Strategy::Llm => {
                    let midpoint = (my_offer + seller_offer) / dec!(2);
                    if seller_offer <= midpoint * dec!(1.1) {
                        return Decision::Accept;
                    }
                }
            }
        }

        if round >= max_rounds && seller_offer > self.budget {
            return Decision::Reject;
        }

        Decision::Counter {
            price: self.curve_counter(my_offer, seller_offer, round, max_rounds),
        }
    }

    /// Exponential climb toward the seller, bounded above by the budget.
    pub(crate) fn curve_counter(
        &self,
        my_offer: Decimal,
        seller_offer: Decimal,
        round: u32,
        max_rounds: u32,
    ) -> Decimal {
        let room = self.budget.min(seller_offer) - my_offer;
        let progress = f64::from(round) / f64::from(max_rounds.max(1));
        let factor = 1.0 - (-self.strategy.risk() * progress * 3.0).exp();
        let concession = room * Decimal::from_f64(factor).unwrap_or(Decimal::ZERO);
        round2((my_offer + concession).min(self.budget))
    }

    /// Delegates the decision to the LLM with a suggested concession (25% to
    /// 75% of the gap as rounds progress). The returned price is clamped to
    /// [my_offer, budget]; any fault falls back to the suggestion.
    async fn llm_decide(
        &self,
        oracle: &dyn llm::Completions,
        my_offer: Decimal,
        seller_offer: Decimal,
        round: u32,
        max_rounds: u32,
    ) -> Decision {
        let gap = seller_offer - my_offer;
        let fraction = match round {
            0..=2 => dec!(0.25),
            3 => dec!(0.40),
            4 => dec!(0.55),
            _ => dec!(0.75),
        };
        let suggested = round2((my_offer + gap * fraction).min(self.budget));

        let system = self.decision_prompt(my_offer, seller_offer, suggested, round, max_rounds);
        let user = format!("Seller wants ${seller_offer:.2}. Round {round}/{max_rounds}.");

        #[derive(serde::Deserialize)]
        struct Wire {
            action: String,
            price: Option<Decimal>,
        }

        let decision = match oracle.complete(&system, &user, 0.9).await {
            Ok(text) => llm::extract_json::<Wire>(&text),
            Err(err) => Err(err),
        };
        match decision {
            Ok(wire) => match wire.action.as_str() {
                "accept" => Decision::Accept,
                "reject" => Decision::Reject,
                _ => Decision::Counter {
                    price: wire
                        .price
                        .unwrap_or(suggested)
                        .clamp(my_offer, self.budget),
                },
            },
            Err(err) => {
                tracing::debug!(?err, "buyer LLM fault, countering at suggestion");
                Decision::Counter { price: suggested }
            }
        }
    }

    fn decision_prompt(
        &self,
        my_offer: Decimal,
        seller_offer: Decimal,
        suggested: Decimal,
        round: u32,
        max_rounds: u32,
    ) -> String {
        let instructions = if self.instructions.is_empty() {
            String::new()
        } else {
            let lines = self
                .instructions
                .iter()
                .map(|instruction| format!("- {instruction}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("Instructions:\n{lines}\n\n")
        };
        let guidance = if round <= 2 {
            format!(
                "ROUND {round} - PUSH BACK:\n- Counter at ${suggested:.2} (don't accept \
                 yet!)\n- Question their pricing, ask for justification"
            )
        } else if round < max_rounds {
            format!(
                "ROUND {round} - NEGOTIATE:\n- Counter at ${suggested:.2}\n- Move toward middle \
                 ground"
            )
        } else {
            format!(
                "ROUND {round} (FINAL):\n- Accept if their price is within budget\n- Or make a \
                 final counter at ${suggested:.2}"
            )
        };
        format!(
            "You are buying a service. Negotiate smartly with varied responses.\n\nYOUR \
             POSITION:\n- Budget: ${budget:.2} (max)\n- Your last offer: ${my_offer:.2}\n- \
             Seller asking: ${seller_offer:.2}\n\n{guidance}\n\n{instructions}RULES:\n1. Your \
             counter must be ${suggested:.2} or higher (you're going UP)\n2. Never exceed your \
             budget\n3. Be conversational, not robotic\n\nRespond with ONLY \
             JSON:\n{{\"action\": \"counter\", \"price\": {suggested:.2}, \"reason\": \"Your \
             unique response\"}}\n{{\"action\": \"accept\", \"reason\": \"Brief \
             acceptance\"}}\n\nJSON ONLY:",
            budget = self.budget,
        )
    }
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        llm::Completions,
        model::estimate::{Bounds, Quote},
        std::sync::Arc,
    };

    struct Scripted(&'static str);

    #[async_trait]
    impl Completions for Scripted {
        async fn complete(&self, _: &str, _: &str, _: f64) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn buyer(strategy: Strategy) -> Buyer {
        Buyer::new(dec!(40)).with_strategy(strategy)
    }

    fn estimated(amount: Decimal, minimum: Decimal) -> Estimated {
        Estimated {
            status: "estimated".to_string(),
            estimate_id: "est-aa".to_string(),
            expires_at: chrono_now_plus(),
            estimate: Quote {
                amount,
                minimum,
                currency: "USDC".to_string(),
            },
            negotiation: Bounds {
                target: amount,
                floor: minimum,
            },
            factors: Vec::new(),
            reasoning: None,
        }
    }

    fn chrono_now_plus() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now() + chrono::Duration::seconds(300)
    }

    #[test]
    fn initial_offer_by_strategy() {
        assert_eq!(buyer(Strategy::Firm).initial_offer(), dec!(20.00));
        assert_eq!(buyer(Strategy::Balanced).initial_offer(), dec!(24.00));
        assert_eq!(buyer(Strategy::Flexible).initial_offer(), dec!(30.00));
        assert_eq!(buyer(Strategy::Llm).initial_offer(), dec!(24.00));
    }

    #[test]
    fn estimate_offer_never_undercuts_the_floor_badly() {
        let estimate = estimated(dec!(30), dec!(24));
        // 55% of 30 would be 16.50, but 90% of the floor wins.
        assert_eq!(
            buyer(Strategy::Balanced).offer_from_estimate(&estimate),
            dec!(21.60)
        );
        assert_eq!(
            buyer(Strategy::Firm).offer_from_estimate(&estimate),
            dec!(21.60)
        );
    }

    #[test]
    fn estimate_offer_is_capped_by_budget() {
        let buyer = Buyer::new(dec!(10));
        let estimate = estimated(dec!(30), dec!(24));
        let offer = buyer.offer_from_estimate(&estimate);
        assert!(offer <= dec!(10));
    }

    #[tokio::test]
    async fn flexible_accepts_anything_within_budget() {
        let decision = buyer(Strategy::Flexible)
            .decide(dec!(20), dec!(39), 1, 5)
            .await;
        assert_eq!(decision, Decision::Accept);
    }

    #[tokio::test]
    async fn firm_accepts_only_close_to_own_offer() {
        let buyer = buyer(Strategy::Firm);
        assert_eq!(buyer.decide(dec!(20), dec!(21), 1, 5).await, Decision::Accept);
        assert!(matches!(
            buyer.decide(dec!(20), dec!(30), 1, 5).await,
            Decision::Counter { .. }
        ));
    }

    #[tokio::test]
    async fn balanced_accepts_near_the_midpoint() {
        let buyer = buyer(Strategy::Balanced);
        // Midpoint of (20, 26) is 23; 26 > 23 * 1.1 so no accept yet.
        assert!(matches!(
            buyer.decide(dec!(20), dec!(26), 1, 5).await,
            Decision::Counter { .. }
        ));
        // Midpoint of (20, 22) is 21; 22 <= 23.1 accepts.
        assert_eq!(buyer.decide(dec!(20), dec!(22), 1, 5).await, Decision::Accept);
    }

    #[tokio::test]
    async fn rejects_over_budget_ask_in_final_round() {
        let decision = buyer(Strategy::Firm).decide(dec!(20), dec!(50), 5, 5).await;
        assert_eq!(decision, Decision::Reject);
    }

    #[tokio::test]
    async fn counters_climb_but_never_exceed_budget() {
        let buyer = buyer(Strategy::Balanced);
        let mut offer = dec!(20);
        for round in 1..=5 {
            match buyer.decide(offer, dec!(50), round, 6).await {
                Decision::Counter { price } => {
                    assert!(price >= offer, "round {round} went down");
                    assert!(price <= dec!(40), "round {round} blew the budget");
                    offer = price;
                }
                other => panic!("unexpected decision {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn llm_counter_is_clamped_to_budget() {
        let buyer = buyer(Strategy::Llm)
            .with_oracle(Arc::new(Scripted(r#"{"action": "counter", "price": 90.0}"#)));
        match buyer.decide(dec!(20), dec!(50), 1, 5).await {
            Decision::Counter { price } => assert_eq!(price, dec!(40)),
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[tokio::test]
    async fn llm_fault_counters_at_the_suggested_concession() {
        let buyer = buyer(Strategy::Llm).with_oracle(Arc::new(Scripted("no json here")));
        match buyer.decide(dec!(20), dec!(40), 1, 5).await {
            // 25% of the 20 gap.
            Decision::Counter { price } => assert_eq!(price, dec!(25.00)),
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[tokio::test]
    async fn llm_accept_is_honored() {
        let buyer = buyer(Strategy::Llm)
            .with_oracle(Arc::new(Scripted(r#"{"action": "accept", "reason": "fair"}"#)));
        assert_eq!(buyer.decide(dec!(20), dec!(30), 2, 5).await, Decision::Accept);
    }
}
