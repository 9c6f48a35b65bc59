//! Maps incoming JSON-RPC requests onto the negotiation engine, the
//! estimator and the handler.

use {
    crate::Agent,
    model::{
        negotiation::{
            AcceptParams, AgentInfo, Capability, CounterParams, Discovery, EstimateParams, Offer,
            Outcome, PaymentInfo, ProposeParams, Terms,
        },
        pricing::{Negotiated, Pricing},
        rpc::{self, Request, Response, code},
    },
    negotiation::{Engine, State, TaskContext},
    rust_decimal::Decimal,
    serde::de::DeserializeOwned,
    serde_json::Value,
    std::sync::Arc,
};

impl Agent {
    /// Dispatches one protocol request. Infallible on the transport level:
    /// every fault becomes a JSON-RPC error response.
    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id.clone();
        tracing::debug!(method = %request.method, "handling request");

        let result = match request.method.as_str() {
            "apex/discover" => to_value(self.discover()),
            "apex/estimate" => match parse(request.params) {
                Ok(params) => self.estimate(params).await,
                Err(error) => Err(error),
            },
            "apex/propose" => match parse(request.params) {
                Ok(params) => self.propose(params).await,
                Err(error) => Err(error),
            },
            "apex/counter" => match parse(request.params) {
                Ok(params) => self.counter(params).await,
                Err(error) => Err(error),
            },
            "apex/accept" => match parse(request.params) {
                Ok(params) => self.accept(params).await,
                Err(error) => Err(error),
            },
            other => Err(err(
                code::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };

        match result {
            Ok(value) => Response::ok(id, value),
            Err(error) => Response::error(id, error.code, error.message),
        }
    }

    fn discover(&self) -> Discovery {
        let inner = self.inner();
        Discovery {
            agent: AgentInfo {
                id: inner.id.clone(),
                name: inner.name.clone(),
                description: inner.description.clone(),
            },
            capabilities: inner
                .capabilities
                .iter()
                .map(|id| Capability {
                    id: id.clone(),
                    name: id.clone(),
                    pricing: inner.pricing.clone(),
                })
                .collect(),
            payment: PaymentInfo {
                networks: inner.networks.clone(),
                currencies: vec![inner.pricing.currency().to_string()],
                address: inner.payment_address.clone(),
            },
        }
    }

    async fn estimate(&self, params: EstimateParams) -> Result<Value, rpc::Error> {
        let inner = self.inner();
        let Pricing::Negotiated(negotiated) = &inner.pricing else {
            return Err(err(code::NOT_NEGOTIABLE, "Pricing is not negotiable"));
        };
        let Some(base) = negotiated.base else {
            return Err(err(
                code::INTERNAL_ERROR,
                "capability does not use estimation",
            ));
        };
        let Some(oracle) = &inner.oracle else {
            return Err(err(code::INTERNAL_ERROR, "estimation unavailable"));
        };

        let result = estimation::estimate_task(
            base,
            &params.input,
            oracle.as_ref(),
            &negotiated.instructions,
            params.capability.as_deref(),
        )
        .await;
        inner.estimates.store(result.clone());
        to_value(result.to_wire())
    }

    async fn propose(&self, params: ProposeParams) -> Result<Value, rpc::Error> {
        let inner = self.inner();
        match &inner.pricing {
            Pricing::Fixed(fixed) => {
                if params.offer.amount >= fixed.amount {
                    let output = self.run_handler(params.input).await?;
                    to_value(Outcome::Completed {
                        job_id: params.job_id,
                        terms: Terms {
                            amount: fixed.amount,
                            currency: fixed.currency.clone(),
                        },
                        output,
                    })
                } else {
                    Err(err(
                        code::BELOW_FIXED_PRICE,
                        format!("Price is {} {}", fixed.amount, fixed.currency),
                    ))
                }
            }
            Pricing::Negotiated(negotiated) => {
                // Engines are created lazily on the first propose for a job
                // id; later proposes for the same job keep negotiating.
                let engine = match inner.jobs.get(&params.job_id).map(|entry| entry.value().clone()) {
                    Some(engine) => engine,
                    None => {
                        let engine = self.create_engine(negotiated, &params).await?;
                        inner
                            .jobs
                            .entry(params.job_id.clone())
                            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(engine)))
                            .value()
                            .clone()
                    }
                };
                self.drive(&params.job_id, engine, params.offer.amount, params.input)
                    .await
            }
        }
    }

    async fn counter(&self, params: CounterParams) -> Result<Value, rpc::Error> {
        let inner = self.inner();
        if matches!(inner.pricing, Pricing::Fixed(_)) {
            return Err(err(code::NOT_NEGOTIABLE, "Pricing is not negotiable"));
        }
        let Some(engine) = inner.jobs.get(&params.job_id).map(|entry| entry.value().clone())
        else {
            return Err(err(code::UNKNOWN_JOB, "Unknown job_id"));
        };
        self.drive(&params.job_id, engine, params.offer.amount, params.input)
            .await
    }

    async fn accept(&self, params: AcceptParams) -> Result<Value, rpc::Error> {
        let inner = self.inner();
        if matches!(inner.pricing, Pricing::Fixed(_)) {
            return Err(err(code::NOT_NEGOTIABLE, "Pricing is not negotiable"));
        }
        if inner.jobs.remove(&params.job_id).is_none() {
            return Err(err(code::UNKNOWN_JOB, "Unknown job_id"));
        }
        let output = self.run_handler(params.input).await?;
        to_value(Outcome::Completed {
            job_id: params.job_id,
            terms: params.terms,
            output,
        })
    }

    /// Feeds an offer to the engine and translates the resulting state to the
    /// wire. Terminal engines are removed from the job map before the handler
    /// runs so the per-job lock is never held across task execution.
    async fn drive(
        &self,
        job_id: &str,
        engine: Arc<tokio::sync::Mutex<Engine>>,
        amount: Decimal,
        input: Value,
    ) -> Result<Value, rpc::Error> {
        let (state, counter, currency, max_rounds) = {
            let mut engine = engine.lock().await;
            let (state, counter) = engine.receive_offer(amount).await;
            (
                state,
                counter,
                engine.currency().to_string(),
                engine.max_rounds(),
            )
        };
        if state.is_terminal() {
            self.inner().jobs.remove(job_id);
        }

        match (state, counter) {
            (State::Accepted, _) => {
                let output = self.run_handler(input).await?;
                to_value(Outcome::Completed {
                    job_id: job_id.to_string(),
                    terms: Terms { amount, currency },
                    output,
                })
            }
            (State::Rejected, _) => Err(err(code::OFFER_REJECTED, "Offer rejected")),
            (State::Expired, _) => Err(err(code::NEGOTIATION_EXPIRED, "Negotiation expired")),
            (State::InProgress, Some(counter)) => to_value(Outcome::Counter {
                job_id: job_id.to_string(),
                offer: Offer {
                    amount: counter.price,
                    currency,
                    network: None,
                },
                round: counter.round,
                max_rounds,
                reason: counter.reason,
            }),
            (State::InProgress, None) => {
                Err(err(code::INTERNAL_ERROR, "negotiation yielded no counter"))
            }
        }
    }

    /// Builds the engine for a new job. Base-rate pricing resolves its
    /// bounds from the referenced estimate, or prices the task on the spot
    /// when the buyer skipped the estimate step.
    async fn create_engine(
        &self,
        negotiated: &Negotiated,
        params: &ProposeParams,
    ) -> Result<Engine, rpc::Error> {
        let inner = self.inner();
        let mut task_context = TaskContext {
            description: Some(estimation::task_description(&params.input)),
            reasoning: None,
        };

        let engine = if negotiated.uses_estimation() {
            let estimate = match &params.estimate_id {
                Some(estimate_id) => inner.estimates.get(estimate_id).ok_or_else(|| {
                    err(code::INTERNAL_ERROR, "unknown or expired estimate_id")
                })?,
                None => {
                    let Some(oracle) = &inner.oracle else {
                        return Err(err(code::INTERNAL_ERROR, "estimation unavailable"));
                    };
                    let base = negotiated.base.unwrap_or_default();
                    let result = estimation::estimate_task(
                        base,
                        &params.input,
                        oracle.as_ref(),
                        &negotiated.instructions,
                        Some(params.capability.as_str()),
                    )
                    .await;
                    inner.estimates.store(result.clone());
                    result
                }
            };
            task_context.reasoning = estimate.reasoning.clone();
            Engine::with_bounds(estimate.target, estimate.floor, negotiated, task_context)
        } else {
            Engine::new(negotiated, task_context)
        }
        .map_err(|error| err(code::INTERNAL_ERROR, error.to_string()))?;

        Ok(match &inner.oracle {
            Some(oracle) => engine.with_oracle(oracle.clone()),
            None => engine,
        })
    }

    async fn run_handler(&self, input: Value) -> Result<Value, rpc::Error> {
        let inner = self.inner();
        match tokio::time::timeout(inner.handler_timeout, inner.handler.run(input)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => {
                tracing::warn!(?error, "handler failed");
                Err(err(code::INTERNAL_ERROR, format!("{error:#}")))
            }
            Err(_) => Err(err(code::INTERNAL_ERROR, "handler timed out")),
        }
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, rpc::Error> {
    serde_json::from_value(params)
        .map_err(|error| err(code::INTERNAL_ERROR, format!("invalid params: {error}")))
}

fn to_value(value: impl serde::Serialize) -> Result<Value, rpc::Error> {
    serde_json::to_value(value).map_err(|error| err(code::INTERNAL_ERROR, error.to_string()))
}

fn err(code: i32, message: impl Into<String>) -> rpc::Error {
    rpc::Error {
        code,
        message: message.into(),
    }
}
