//! The seller-side negotiation state machine.

use {
    crate::{
        curve,
        transcript::{Action, Party, Transcript},
    },
    anyhow::Context as _,
    chrono::{DateTime, Utc},
    llm::Completions,
    model::pricing::{InvalidPricing, Negotiated, Strategy},
    rust_decimal::{Decimal, RoundingStrategy},
    rust_decimal_macros::dec,
    std::sync::Arc,
    thiserror::Error,
};

/// Wall-clock budget for a negotiation, measured from engine creation.
pub const NEGOTIATION_TTL_SECS: i64 = 300;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    InProgress,
    Accepted,
    Rejected,
    Expired,
}

impl State {
    pub fn is_terminal(self) -> bool {
        self != Self::InProgress
    }
}

/// Counter offer emitted by the seller.
#[derive(Clone, Debug, PartialEq)]
pub struct Counter {
    pub price: Decimal,
    pub round: u32,
    pub reason: Option<String>,
}

/// Task information forwarded to the LLM so counters can reference the
/// actual work being negotiated over.
#[derive(Clone, Debug, Default)]
pub struct TaskContext {
    pub description: Option<String>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Base-rate pricing carries no bounds of its own; the dispatcher has to
    /// resolve an estimate and construct the engine via
    /// [`Engine::with_bounds`].
    #[error("negotiation bounds must be resolved from an estimate first")]
    RequiresDynamicBounds,
    #[error(transparent)]
    InvalidPricing(#[from] InvalidPricing),
}

/// What the seller wants to do with the offer currently on the table.
#[derive(Debug)]
enum Decision {
    Accept,
    Reject,
    Counter {
        price: Decimal,
        reason: Option<String>,
    },
}

/// Per-job seller state machine. Not safe for concurrent use; the dispatcher
/// serializes access per job id.
pub struct Engine {
    target: Decimal,
    minimum: Decimal,
    max_rounds: u32,
    currency: String,
    strategy: Strategy,
    instructions: Vec<String>,
    task_context: TaskContext,
    oracle: Option<Arc<dyn Completions>>,
    deadline: DateTime<Utc>,
    state: State,
    round: u32,
    last_counter: Option<Decimal>,
    best_buyer_offer: Option<Decimal>,
    transcript: Transcript,
}

impl Engine {
    /// Builds an engine from legacy-mode pricing with explicit bounds.
    pub fn new(pricing: &Negotiated, task_context: TaskContext) -> Result<Self, Error> {
        pricing.validate()?;
        match (pricing.target, pricing.minimum) {
            (Some(target), Some(minimum)) => {
                Self::with_bounds(target, minimum, pricing, task_context)
            }
            _ => Err(Error::RequiresDynamicBounds),
        }
    }

    /// Builds an engine with bounds injected from an estimate. Used by the
    /// dispatcher for base-rate pricing.
    pub fn with_bounds(
        target: Decimal,
        minimum: Decimal,
        pricing: &Negotiated,
        task_context: TaskContext,
    ) -> Result<Self, Error> {
        if target < minimum {
            return Err(InvalidPricing::TargetBelowMinimum { target, minimum }.into());
        }
        if pricing.max_rounds < 1 {
            return Err(InvalidPricing::NoRounds.into());
        }
        Ok(Self {
            target,
            minimum,
            max_rounds: pricing.max_rounds,
            currency: pricing.currency.clone(),
            strategy: pricing.effective_strategy(),
            instructions: pricing.instructions.clone(),
            task_context,
            oracle: None,
            deadline: Utc::now() + chrono::Duration::seconds(NEGOTIATION_TTL_SECS),
            state: State::InProgress,
            round: 0,
            last_counter: None,
            best_buyer_offer: None,
            transcript: Transcript::default(),
        })
    }

    /// Attaches the LLM used for dialogue and, with the llm strategy, for the
    /// pricing decision itself.
    pub fn with_oracle(mut self, oracle: Arc<dyn Completions>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn last_counter(&self) -> Option<Decimal> {
        self.last_counter
    }

    pub fn best_buyer_offer(&self) -> Option<Decimal> {
        self.best_buyer_offer
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Processes a buyer offer. This is the engine's only mutator; every call
    /// appends to the transcript and advances the state machine.
    pub async fn receive_offer(&mut self, price: Decimal) -> (State, Option<Counter>) {
        if Utc::now() > self.deadline {
            self.transcript.record(Party::System, Action::Expired, None);
            self.state = State::Expired;
            return (self.state, None);
        }

        self.round += 1;
        self.transcript.record(Party::Buyer, Action::Offer, Some(price));
        if self.best_buyer_offer.is_none_or(|best| price > best) {
            self.best_buyer_offer = Some(price);
        }

        if self.round > self.max_rounds {
            self.transcript.record(Party::System, Action::Reject, None);
            self.state = State::Rejected;
            return (self.state, None);
        }

        let mut decision = match (self.strategy, self.oracle.clone()) {
            (Strategy::Llm, Some(oracle)) => self.llm_decide(oracle.as_ref(), price).await,
            _ => self.curve_decide(price).await,
        };

        // Floor protection: an offer at or above the floor is economically
        // acceptable, so rejecting it inside the round budget is never
        // allowed. Coerce to a counter at the floor instead.
        if matches!(decision, Decision::Reject) && price >= self.minimum {
            decision = Decision::Counter {
                price: self.minimum,
                reason: Some("Let's find a middle ground.".to_string()),
            };
        }

        match decision {
            Decision::Accept => {
                self.transcript.record(Party::Seller, Action::Accept, Some(price));
                self.state = State::Accepted;
                (self.state, None)
            }
            Decision::Reject => {
                self.transcript.record(Party::Seller, Action::Reject, None);
                self.state = State::Rejected;
                (self.state, None)
            }
            Decision::Counter { price, reason } => {
                let mut counter = round2(price);
                // The counter sequence must never rise. The curve preserves
                // this on its own; LLM output has to be forced down.
                if let Some(last) = self.last_counter {
                    if counter > last {
                        counter = round2(last * dec!(0.98)).max(self.minimum);
                    }
                }
                let counter = counter.clamp(self.minimum, self.target);
                self.last_counter = Some(counter);
                self.transcript.record(Party::Seller, Action::Counter, Some(counter));
                (
                    State::InProgress,
                    Some(Counter {
                        price: counter,
                        round: self.round,
                        reason,
                    }),
                )
            }
        }
    }

    /// Algorithmic decision: accept anything at or above the current curve
    /// price, otherwise counter at it.
    async fn curve_decide(&self, offer: Decimal) -> Decision {
        if offer >= self.target {
            return Decision::Accept;
        }
        let counter = curve::concession(
            self.target,
            self.minimum,
            self.round,
            self.max_rounds,
            self.strategy.risk(),
        );
        if offer >= counter {
            return Decision::Accept;
        }
        let reason = match &self.oracle {
            Some(oracle) => self.counter_reason(oracle.as_ref(), offer, counter).await,
            None => None,
        };
        Decision::Counter {
            price: counter,
            reason,
        }
    }

    /// LLM decision: price and dialogue both come from the model. Falls back
    /// to the curve on any fault; hard bounds are enforced by the caller.
    async fn llm_decide(&self, oracle: &dyn Completions, offer: Decimal) -> Decision {
        if self.round == 1 && offer >= self.target {
            return Decision::Accept;
        }
        let suggested = self.suggested_counter(offer);
        let system = self.decision_prompt(offer, suggested);
        let user = format!(
            "Buyer offers ${offer:.2}. Round {}/{}.",
            self.round, self.max_rounds
        );

        let decision = match oracle.complete(&system, &user, 0.9).await {
            Ok(text) => self.parse_decision(&text),
            Err(err) => Err(err),
        };
        match decision {
            Ok(decision) => decision,
            Err(err) => {
                tracing::debug!(?err, "negotiation LLM fault, falling back to curve");
                self.curve_decide(offer).await
            }
        }
    }

    /// Concession schedule suggested to the LLM: hold the target in round 1,
    /// then close 25/40/55/75% of the gap to the buyer, never rising and
    /// never dipping below the floor.
    fn suggested_counter(&self, offer: Decimal) -> Decimal {
        if self.round <= 1 {
            return self.target;
        }
        let ceiling = self.last_counter.unwrap_or(self.target);
        let fraction = match self.round {
            2 => dec!(0.25),
            3 => dec!(0.40),
            4 => dec!(0.55),
            _ => dec!(0.75),
        };
        let mut suggested = ceiling - (ceiling - offer) * fraction;
        suggested = suggested.max(self.minimum);
        if let Some(last) = self.last_counter {
            if suggested >= last {
                suggested = (last * dec!(0.97)).max(self.minimum);
            }
        }
        round2(suggested)
    }

    fn parse_decision(&self, text: &str) -> anyhow::Result<Decision> {
        #[derive(serde::Deserialize)]
        struct Wire {
            action: String,
            price: Option<Decimal>,
            reason: Option<String>,
        }

        let wire: Wire = llm::extract_json(text)?;
        match wire.action.as_str() {
            "accept" => Ok(Decision::Accept),
            "reject" => Ok(Decision::Reject),
            "counter" => {
                let price = wire.price.context("counter decision without price")?;
                Ok(Decision::Counter {
                    price: price.clamp(self.minimum, self.target),
                    reason: wire.reason,
                })
            }
            other => anyhow::bail!("unknown negotiation action {other:?}"),
        }
    }

    fn decision_prompt(&self, offer: Decimal, suggested: Decimal) -> String {
        let last_counter = self
            .last_counter
            .map_or_else(|| "N/A".to_string(), |last| format!("${last:.2}"));

        let mut task_section = String::new();
        if let Some(description) = &self.task_context.description {
            task_section.push_str(&format!("\nTASK: {description}\n"));
        }
        if let Some(reasoning) = &self.task_context.reasoning {
            task_section.push_str(&format!("WORK INVOLVED: {reasoning}\n"));
        }

        let guidance = if self.round <= 2 {
            format!(
                "ROUND {round} - ESTABLISH VALUE:\n- Counter at ${suggested:.2} or lower\n- \
                 Explain WHY your work is worth this price",
                round = self.round
            )
        } else if self.round < self.max_rounds {
            format!(
                "ROUND {round} - FIND MIDDLE GROUND:\n- Move down to ${suggested:.2}\n- Show \
                 willingness to compromise, keep it collaborative",
                round = self.round
            )
        } else {
            format!(
                "ROUND {round} (FINAL) - CLOSE OR WALK:\n- Accept if they're at ${floor:.2} or \
                 above\n- Or make a final offer at/near ${floor:.2}",
                round = self.round,
                floor = self.minimum
            )
        };

        format!(
            "You are negotiating to sell a service. Be professional and varied in your \
             responses.\n\nYOUR POSITION:\n- Target: ${target:.2}\n- Floor: ${floor:.2}\n- Their \
             offer: ${offer:.2}\n- Last counter: {last_counter}\n{task_section}\n{guidance}\n\n\
             {instructions}CRITICAL RULES:\n1. Your price MUST be ${suggested:.2} or LOWER \
             (never higher than your last counter!)\n2. Vary your dialogue - don't repeat the \
             same phrases\n3. Reference the actual work involved\n\nRespond with ONLY \
             JSON:\n{{\"action\": \"counter\", \"price\": {suggested:.2}, \"reason\": \"Your \
             unique 1-2 sentence response\"}}\n{{\"action\": \"accept\", \"reason\": \"Brief \
             acceptance\"}}\n\nJSON ONLY:",
            target = self.target,
            floor = self.minimum,
            instructions = self.format_instructions(),
        )
    }

    /// Asks the LLM for a one-line justification of a curve-decided counter.
    /// The price is already fixed; only the dialogue is delegated.
    async fn counter_reason(
        &self,
        oracle: &dyn Completions,
        offer: Decimal,
        counter: Decimal,
    ) -> Option<String> {
        let mut task_info = String::new();
        if let Some(description) = &self.task_context.description {
            task_info.push_str(&format!("Task: {description}\n"));
        }
        if let Some(reasoning) = &self.task_context.reasoning {
            task_info.push_str(&format!("Why this price: {reasoning}\n"));
        }
        let prompt = format!(
            "Generate a 1-2 sentence negotiation response justifying your price.\n\nYou are \
             countering their ${offer:.2} with ${counter:.2}.\nRound {round} of \
             {max_rounds}.\n\n{task_info}{instructions}\nJustify based on the work involved. Be \
             brief and natural.",
            round = self.round,
            max_rounds = self.max_rounds,
            instructions = self.format_instructions(),
        );
        match oracle.complete(&prompt, "Your response:", 0.9).await {
            Ok(text) => Some(text.trim().to_string()),
            Err(err) => {
                tracing::debug!(?err, "reason generation failed, countering without one");
                None
            }
        }
    }

    fn format_instructions(&self) -> String {
        if self.instructions.is_empty() {
            return String::new();
        }
        let lines = self
            .instructions
            .iter()
            .map(|instruction| format!("- {instruction}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Instructions:\n{lines}\n\n")
    }
}

fn round2(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::transcript,
        async_trait::async_trait,
        model::pricing::Negotiated,
    };

    /// Oracle that always replies with the same completion.
    struct Scripted(&'static str);

    #[async_trait]
    impl Completions for Scripted {
        async fn complete(&self, _: &str, _: &str, _: f64) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    /// Oracle that replays a fixed sequence of completions.
    struct Sequence(std::sync::Mutex<std::vec::IntoIter<&'static str>>);

    impl Sequence {
        fn new(replies: Vec<&'static str>) -> Self {
            Self(std::sync::Mutex::new(replies.into_iter()))
        }
    }

    #[async_trait]
    impl Completions for Sequence {
        async fn complete(&self, _: &str, _: &str, _: f64) -> anyhow::Result<String> {
            let mut replies = self.0.lock().unwrap();
            replies
                .next()
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    fn engine(target: Decimal, minimum: Decimal, strategy: Strategy) -> Engine {
        let pricing = Negotiated::bounds(target, minimum)
            .unwrap()
            .with_strategy(strategy);
        Engine::new(&pricing, TaskContext::default()).unwrap()
    }

    #[tokio::test]
    async fn accepts_offer_at_target_in_round_one() {
        let mut engine = engine(dec!(25), dec!(15), Strategy::Balanced);
        let (state, counter) = engine.receive_offer(dec!(25)).await;
        assert_eq!(state, State::Accepted);
        assert!(counter.is_none());
        assert_eq!(engine.round(), 1);
    }

    #[tokio::test]
    async fn balanced_counters_follow_the_curve() {
        let mut engine = engine(dec!(25), dec!(15), Strategy::Balanced);

        let mut counters = Vec::new();
        for offer in [dec!(12), dec!(16), dec!(20), dec!(22)] {
            let (state, counter) = engine.receive_offer(offer).await;
            assert_eq!(state, State::InProgress);
            counters.push(counter.unwrap().price);
        }
        assert_eq!(counters, vec![dec!(24.25), dec!(23.56), dec!(22.91), dec!(22.32)]);

        // Strictly non-increasing and inside the bounds (I2).
        for pair in counters.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        assert!(counters.iter().all(|c| *c >= dec!(15) && *c <= dec!(25)));

        // Offering the standing counter closes the deal.
        let (state, _) = engine.receive_offer(dec!(22.32)).await;
        assert_eq!(state, State::Accepted);
        assert!(engine.transcript().verify());
    }

    #[tokio::test]
    async fn rejects_when_round_budget_is_exhausted() {
        let pricing = Negotiated::bounds(dec!(25), dec!(15))
            .unwrap()
            .with_max_rounds(2);
        let mut engine = Engine::new(&pricing, TaskContext::default()).unwrap();

        engine.receive_offer(dec!(1)).await;
        engine.receive_offer(dec!(2)).await;
        let (state, counter) = engine.receive_offer(dec!(3)).await;
        assert_eq!(state, State::Rejected);
        assert!(counter.is_none());
        let last = engine.transcript().entries().last().unwrap();
        assert_eq!(last.party, transcript::Party::System);
        assert_eq!(last.action, transcript::Action::Reject);
    }

    #[tokio::test]
    async fn expires_past_the_deadline() {
        let mut engine = engine(dec!(25), dec!(15), Strategy::Balanced);
        engine.deadline = Utc::now() - chrono::Duration::seconds(1);
        let (state, counter) = engine.receive_offer(dec!(25)).await;
        assert_eq!(state, State::Expired);
        assert!(counter.is_none());
        assert_eq!(engine.round(), 0);
    }

    #[tokio::test]
    async fn floor_protection_overrides_llm_reject() {
        let pricing = Negotiated::bounds(dec!(10), dec!(5))
            .unwrap()
            .with_strategy(Strategy::Llm)
            .with_model("gpt-4o-mini");
        let mut engine = Engine::new(&pricing, TaskContext::default())
            .unwrap()
            .with_oracle(Arc::new(Scripted(r#"{"action": "reject"}"#)));

        let (state, counter) = engine.receive_offer(dec!(6)).await;
        assert_eq!(state, State::InProgress);
        assert_eq!(counter.unwrap().price, dec!(5.00));
    }

    #[tokio::test]
    async fn llm_reject_below_floor_stands() {
        let pricing = Negotiated::bounds(dec!(10), dec!(5))
            .unwrap()
            .with_strategy(Strategy::Llm)
            .with_model("gpt-4o-mini");
        let mut engine = Engine::new(&pricing, TaskContext::default())
            .unwrap()
            .with_oracle(Arc::new(Scripted(r#"{"action": "reject"}"#)));

        let (state, _) = engine.receive_offer(dec!(3)).await;
        assert_eq!(state, State::Rejected);
    }

    #[tokio::test]
    async fn llm_counter_above_last_counter_is_forced_down() {
        let pricing = Negotiated::bounds(dec!(25), dec!(15))
            .unwrap()
            .with_strategy(Strategy::Llm)
            .with_model("gpt-4o-mini");
        let mut engine = Engine::new(&pricing, TaskContext::default())
            .unwrap()
            .with_oracle(Arc::new(Sequence::new(vec![
                r#"{"action": "counter", "price": 24.00, "reason": "firm"}"#,
                r#"{"action": "counter", "price": 24.80, "reason": "I changed my mind"}"#,
            ])));

        let (_, first) = engine.receive_offer(dec!(12)).await;
        let first = first.unwrap().price;
        assert_eq!(first, dec!(24.00));

        // The oracle asks for more than its own last counter; the engine must
        // force the price down instead.
        let (_, second) = engine.receive_offer(dec!(14)).await;
        let second = second.unwrap().price;
        assert_eq!(second, round2(first * dec!(0.98)).max(dec!(15)));
        assert!(second < first);
    }

    #[tokio::test]
    async fn llm_fault_falls_back_to_curve() {
        let pricing = Negotiated::bounds(dec!(25), dec!(15))
            .unwrap()
            .with_strategy(Strategy::Llm)
            .with_model("gpt-4o-mini");
        let mut engine = Engine::new(&pricing, TaskContext::default())
            .unwrap()
            .with_oracle(Arc::new(Scripted("the dog ate my JSON")));

        let (state, counter) = engine.receive_offer(dec!(12)).await;
        assert_eq!(state, State::InProgress);
        // Balanced-risk curve price at round 1, the llm fallback.
        assert_eq!(counter.unwrap().price, dec!(24.25));
    }

    #[tokio::test]
    async fn offer_at_floor_in_final_round_is_not_rejected() {
        let pricing = Negotiated::bounds(dec!(25), dec!(15))
            .unwrap()
            .with_strategy(Strategy::Firm)
            .with_max_rounds(3);
        let mut engine = Engine::new(&pricing, TaskContext::default()).unwrap();

        engine.receive_offer(dec!(5)).await;
        engine.receive_offer(dec!(10)).await;
        let (state, counter) = engine.receive_offer(dec!(15)).await;
        match state {
            State::InProgress => assert!(counter.unwrap().price >= dec!(15)),
            State::Accepted => {}
            other => panic!("floor offer must not terminate as {other:?}"),
        }
    }

    #[tokio::test]
    async fn base_mode_pricing_requires_resolved_bounds() {
        let pricing = Negotiated::base(dec!(20)).unwrap();
        assert!(matches!(
            Engine::new(&pricing, TaskContext::default()),
            Err(Error::RequiresDynamicBounds)
        ));
        assert!(
            Engine::with_bounds(dec!(30), dec!(24), &pricing, TaskContext::default()).is_ok()
        );
    }
}
