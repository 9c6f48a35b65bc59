//! The buyer side of the protocol: discovers a seller, optionally obtains an
//! estimate, then drives the offer/counter loop within a budget and settles
//! payment when configured to.

mod decision;

pub use decision::Decision;

use {
    alloy::primitives::{Address, B256},
    anyhow::{Context, Result},
    llm::Completions,
    model::{
        DEFAULT_CURRENCY,
        estimate::Estimated,
        negotiation::{Discovery, Offer, Outcome, Terms},
        pricing::{Pricing, Strategy},
        rpc,
    },
    payments::{Payment, Wallet},
    rand::RngCore,
    rust_decimal::Decimal,
    rust_decimal_macros::dec,
    serde_json::{Value, json},
    std::{sync::Arc, time::Duration},
};

/// One side's offer at some round, as recorded in the result history.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub party: &'static str,
    pub amount: Decimal,
    pub round: u32,
}

/// What came out of a negotiation, successful or not.
#[derive(Debug, Default)]
pub struct NegotiationResult {
    pub success: bool,
    pub final_price: Option<Decimal>,
    pub output: Option<Value>,
    pub rounds: u32,
    pub history: Vec<HistoryEntry>,
    pub error: Option<String>,
    pub estimate: Option<Estimated>,
    pub estimate_id: Option<String>,
    pub tx_hash: Option<B256>,
    pub explorer_url: Option<String>,
    pub payment_verified: bool,
}

impl NegotiationResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Auto-negotiating buyer. The budget is a hard ceiling: no offer, counter
/// or acceptance ever exceeds it.
pub struct Buyer {
    budget: Decimal,
    strategy: Strategy,
    instructions: Vec<String>,
    initial_offer_pct: Decimal,
    oracle: Option<Arc<dyn Completions>>,
    wallet: Option<Wallet>,
    auto_pay: bool,
    http: reqwest::Client,
    mock_address: String,
}

impl Buyer {
    pub fn new(budget: Decimal) -> Self {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            budget,
            strategy: Strategy::Balanced,
            instructions: Vec::new(),
            initial_offer_pct: dec!(0.60),
            oracle: None,
            wallet: None,
            auto_pay: false,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client"),
            mock_address: format!("0x{}", hex::encode(bytes)),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Model driving the llm strategy's decisions.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.oracle = Some(Arc::new(llm::Client::new(model)));
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn Completions>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_instructions(mut self, instructions: Vec<String>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Opening offer as a fraction of the budget, for the balanced strategies.
    pub fn with_initial_offer_pct(mut self, pct: Decimal) -> Self {
        self.initial_offer_pct = pct;
        self
    }

    pub fn with_wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Pay the seller automatically once a negotiation succeeds. Requires a
    /// wallet.
    pub fn auto_pay(mut self, auto_pay: bool) -> Self {
        self.auto_pay = auto_pay;
        self
    }

    /// The buyer's payment address: the wallet's when configured, otherwise a
    /// throwaway identity.
    pub fn address(&self) -> String {
        match &self.wallet {
            Some(wallet) => wallet.address().to_string(),
            None => self.mock_address.clone(),
        }
    }

    /// Calls a capability on a seller, negotiating the price up to
    /// `max_rounds`. Transport failures are errors; protocol outcomes,
    /// including rejection, are reported through the result.
    pub async fn call(
        &self,
        url: &str,
        capability: &str,
        input: &Value,
        max_rounds: u32,
    ) -> Result<NegotiationResult> {
        let job_id = random_id();
        let mut history = Vec::new();

        let discovery = self.discover(url).await.ok();
        let seller_address = discovery
            .as_ref()
            .map(|discovery| discovery.payment.address.clone());
        let requires_estimation = discovery
            .as_ref()
            .is_some_and(|discovery| {
                discovery.capabilities.iter().any(|capability| {
                    matches!(&capability.pricing, Pricing::Negotiated(negotiated) if negotiated.uses_estimation())
                })
            });

        let mut estimate = None;
        let mut estimate_id = None;
        let mut offer = self.initial_offer();
        if requires_estimation {
            match self.estimate(url, capability, input).await {
                Ok(estimated) => {
                    let floor = estimated.negotiation.floor;
                    if floor > self.budget {
                        return Ok(NegotiationResult {
                            estimate_id: Some(estimated.estimate_id.clone()),
                            estimate: Some(estimated),
                            ..NegotiationResult::failure(format!(
                                "Budget insufficient: minimum {floor:.2}, budget {:.2}",
                                self.budget
                            ))
                        });
                    }
                    offer = self.offer_from_estimate(&estimated);
                    estimate_id = Some(estimated.estimate_id.clone());
                    estimate = Some(estimated);
                }
                Err(err) => {
                    tracing::debug!(?err, "estimation failed, falling back to budget offer");
                }
            }
        }

        for round in 1..=max_rounds {
            tracing::debug!(round, %offer, "sending offer");
            let response = if round == 1 {
                self.propose(url, capability, input, offer, &job_id, estimate_id.as_deref())
                    .await?
            } else {
                self.counter(url, &job_id, offer, round, input).await?
            };
            history.push(HistoryEntry {
                party: "buyer",
                amount: offer,
                round,
            });

            if let Some(error) = response.error {
                return Ok(NegotiationResult {
                    rounds: round,
                    history,
                    estimate,
                    estimate_id,
                    ..NegotiationResult::failure(error.message)
                });
            }
            let outcome: Outcome =
                serde_json::from_value(response.result.context("response without result")?)?;

            match outcome {
                Outcome::Completed { terms, output, .. } => {
                    return Ok(self
                        .completed(terms.amount, output, round, history, estimate, estimate_id, &job_id, seller_address.as_deref())
                        .await);
                }
                Outcome::Counter {
                    offer: seller_offer,
                    reason,
                    ..
                } => {
                    tracing::debug!(amount = %seller_offer.amount, ?reason, "seller countered");
                    history.push(HistoryEntry {
                        party: "seller",
                        amount: seller_offer.amount,
                        round,
                    });

                    match self
                        .decide(offer, seller_offer.amount, round, max_rounds)
                        .await
                    {
                        Decision::Accept => {
                            let response = self
                                .accept(url, &job_id, seller_offer.amount, input)
                                .await?;
                            if let Some(error) = response.error {
                                return Ok(NegotiationResult {
                                    rounds: round,
                                    history,
                                    estimate,
                                    estimate_id,
                                    ..NegotiationResult::failure(error.message)
                                });
                            }
                            let output = response
                                .result
                                .and_then(|result| serde_json::from_value::<Outcome>(result).ok())
                                .and_then(|outcome| match outcome {
                                    Outcome::Completed { output, .. } => Some(output),
                                    Outcome::Counter { .. } => None,
                                });
                            return Ok(self
                                .completed(
                                    seller_offer.amount,
                                    output.unwrap_or(Value::Null),
                                    round,
                                    history,
                                    estimate,
                                    estimate_id,
                                    &job_id,
                                    seller_address.as_deref(),
                                )
                                .await);
                        }
                        Decision::Counter { price } => offer = price,
                        Decision::Reject => {
                            return Ok(NegotiationResult {
                                rounds: round,
                                history,
                                estimate,
                                estimate_id,
                                ..NegotiationResult::failure("Buyer rejected - price too high")
                            });
                        }
                    }
                }
            }
        }

        Ok(NegotiationResult {
            rounds: max_rounds,
            history,
            estimate,
            estimate_id,
            ..NegotiationResult::failure("Max rounds exceeded")
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn completed(
        &self,
        final_price: Decimal,
        output: Value,
        rounds: u32,
        history: Vec<HistoryEntry>,
        estimate: Option<Estimated>,
        estimate_id: Option<String>,
        job_id: &str,
        seller_address: Option<&str>,
    ) -> NegotiationResult {
        let mut result = NegotiationResult {
            success: true,
            final_price: Some(final_price),
            output: Some(output),
            rounds,
            history,
            estimate,
            estimate_id,
            ..Default::default()
        };

        if self.auto_pay {
            if let (Some(wallet), Some(seller)) = (&self.wallet, seller_address) {
                match seller.parse::<Address>() {
                    Ok(seller) => {
                        let payment = Payment::new(job_id, final_price, seller)
                            .execute(wallet)
                            .await;
                        result.tx_hash = payment.tx_hash;
                        result.explorer_url = payment.explorer_url;
                        result.payment_verified = payment.success;
                        if let Some(error) = payment.error {
                            tracing::warn!(%error, "payment incomplete");
                        }
                    }
                    Err(err) => tracing::warn!(?err, seller, "unusable seller address"),
                }
            }
        }
        result
    }

    async fn rpc(&self, url: &str, method: &str, params: Value) -> Result<rpc::Response> {
        let request = rpc::Request::new(json!(random_id()), method, params);
        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    async fn discover(&self, url: &str) -> Result<Discovery> {
        let response = self.rpc(url, "apex/discover", json!({})).await?;
        serde_json::from_value(response.result.context("discover without result")?)
            .context("malformed discovery")
    }

    async fn estimate(&self, url: &str, capability: &str, input: &Value) -> Result<Estimated> {
        let response = self
            .rpc(
                url,
                "apex/estimate",
                json!({"capability": capability, "input": input}),
            )
            .await?;
        serde_json::from_value(response.result.context("estimate without result")?)
            .context("malformed estimate")
    }

    async fn propose(
        &self,
        url: &str,
        capability: &str,
        input: &Value,
        offer: Decimal,
        job_id: &str,
        estimate_id: Option<&str>,
    ) -> Result<rpc::Response> {
        let mut params = json!({
            "capability": capability,
            "input": input,
            "job_id": job_id,
            "offer": wire_offer(offer),
            "buyer_address": self.address(),
        });
        if let Some(estimate_id) = estimate_id {
            params["estimate_id"] = json!(estimate_id);
        }
        self.rpc(url, "apex/propose", params).await
    }

    async fn counter(
        &self,
        url: &str,
        job_id: &str,
        offer: Decimal,
        round: u32,
        input: &Value,
    ) -> Result<rpc::Response> {
        self.rpc(
            url,
            "apex/counter",
            json!({
                "job_id": job_id,
                "offer": wire_offer(offer),
                "round": round,
                "input": input,
            }),
        )
        .await
    }

    async fn accept(
        &self,
        url: &str,
        job_id: &str,
        amount: Decimal,
        input: &Value,
    ) -> Result<rpc::Response> {
        self.rpc(
            url,
            "apex/accept",
            json!({
                "job_id": job_id,
                "terms": Terms {
                    amount,
                    currency: DEFAULT_CURRENCY.to_string(),
                },
                "input": input,
            }),
        )
        .await
    }
}

fn wire_offer(amount: Decimal) -> Offer {
    Offer {
        amount,
        currency: DEFAULT_CURRENCY.to_string(),
        network: Some("base".to_string()),
    }
}

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
