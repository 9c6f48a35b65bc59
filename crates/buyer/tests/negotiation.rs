//! End-to-end negotiations between a buyer and an in-process seller.

use {
    agent::{Agent, FnHandler},
    async_trait::async_trait,
    buyer::Buyer,
    llm::Completions,
    model::pricing::{Fixed, Negotiated, Pricing, Strategy},
    rust_decimal_macros::dec,
    serde_json::json,
    std::sync::Arc,
};

struct Scripted(&'static str);

#[async_trait]
impl Completions for Scripted {
    async fn complete(&self, _: &str, _: &str, _: f64) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

/// Serves the agent on an ephemeral port and returns its endpoint URL.
async fn spawn_agent(agent: Agent) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, agent::api::router(agent))
            .await
            .expect("serve");
    });
    format!("http://{addr}/apex")
}

fn echo_agent(pricing: Pricing) -> agent::Builder {
    Agent::builder("Research Agent", pricing)
        .capability("research")
        .handler(Arc::new(FnHandler(|input| async move {
            Ok(json!({"result": "ok", "echo": input}))
        })))
}

#[tokio::test]
async fn fixed_price_deal_completes_in_one_round() {
    let url = spawn_agent(echo_agent(Pricing::Fixed(Fixed::new(dec!(5.00)).unwrap())).build()).await;

    let buyer = Buyer::new(dec!(10)).with_strategy(Strategy::Flexible);
    let result = buyer
        .call(&url, "research", &json!({"topic": "fees"}), 5)
        .await
        .unwrap();

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.final_price, Some(dec!(5.00)));
    assert_eq!(result.rounds, 1);
    assert_eq!(result.output.unwrap()["result"], "ok");
}

#[tokio::test]
async fn fixed_price_underbid_reports_the_required_amount() {
    let url = spawn_agent(echo_agent(Pricing::Fixed(Fixed::new(dec!(5.00)).unwrap())).build()).await;

    // A firm buyer with a 4.00 budget opens at 2.00 and can never reach 5.00.
    let buyer = Buyer::new(dec!(4)).with_strategy(Strategy::Firm);
    let result = buyer
        .call(&url, "research", &json!({"topic": "fees"}), 5)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains('5'));
}

#[tokio::test]
async fn negotiated_deal_converges_within_bounds() {
    let pricing = Negotiated::bounds(dec!(25), dec!(15))
        .unwrap()
        .with_strategy(Strategy::Balanced);
    let url = spawn_agent(echo_agent(Pricing::Negotiated(pricing)).build()).await;

    let buyer = Buyer::new(dec!(30)).with_strategy(Strategy::Balanced);
    let result = buyer
        .call(&url, "research", &json!({"topic": "agent protocols"}), 5)
        .await
        .unwrap();

    assert!(result.success, "error: {:?}", result.error);
    let price = result.final_price.unwrap();
    assert!(price >= dec!(15) && price <= dec!(25), "price {price}");
    assert!(result.rounds <= 5);
    assert!(!result.history.is_empty());
    assert_eq!(result.output.unwrap()["result"], "ok");
}

#[tokio::test]
async fn estimate_driven_deal_settles_between_floor_and_target() {
    let pricing = Negotiated::base(dec!(20)).unwrap();
    let agent = echo_agent(Pricing::Negotiated(pricing))
        .oracle(Arc::new(Scripted(
            r#"{"multiplier": 1.5, "reasoning": "multi-source synthesis"}"#,
        )))
        .build();
    let url = spawn_agent(agent).await;

    let buyer = Buyer::new(dec!(32)).with_strategy(Strategy::Balanced);
    let result = buyer
        .call(&url, "research", &json!({"topic": "agent protocols"}), 5)
        .await
        .unwrap();

    assert!(result.success, "error: {:?}", result.error);
    let estimate = result.estimate.unwrap();
    assert_eq!(estimate.estimate.amount, dec!(30.00));
    assert_eq!(estimate.estimate.minimum, dec!(24.00));
    assert!(result.estimate_id.unwrap().starts_with("est-"));

    let price = result.final_price.unwrap();
    assert!(price >= dec!(24) && price <= dec!(30), "price {price}");
}

#[tokio::test]
async fn budget_below_estimated_floor_short_circuits() {
    let pricing = Negotiated::base(dec!(20)).unwrap();
    let agent = echo_agent(Pricing::Negotiated(pricing))
        .oracle(Arc::new(Scripted(r#"{"multiplier": 1.5}"#)))
        .build();
    let url = spawn_agent(agent).await;

    // Floor is 24.00, budget only 20.00; no offer is ever sent.
    let buyer = Buyer::new(dec!(20)).with_strategy(Strategy::Balanced);
    let result = buyer
        .call(&url, "research", &json!({"topic": "agent protocols"}), 5)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.rounds, 0);
    assert!(result.history.is_empty());
    assert!(result.error.unwrap().contains("Budget insufficient"));
}

#[tokio::test]
async fn stingy_buyer_runs_out_of_rounds() {
    let pricing = Negotiated::bounds(dec!(100), dec!(90))
        .unwrap()
        .with_strategy(Strategy::Firm);
    let url = spawn_agent(echo_agent(Pricing::Negotiated(pricing)).build()).await;

    // Budget far below the floor: the seller never comes down to it and the
    // firm buyer never reaches 90.
    let buyer = Buyer::new(dec!(30)).with_strategy(Strategy::Firm);
    let result = buyer
        .call(&url, "research", &json!({"topic": "agent protocols"}), 3)
        .await
        .unwrap();

    assert!(!result.success);
}

#[tokio::test]
async fn health_endpoint_reports_agent_name() {
    let url = spawn_agent(echo_agent(Pricing::Fixed(Fixed::new(dec!(1)).unwrap())).build()).await;
    let health_url = url.replace("/apex", "/health");

    let response: serde_json::Value = reqwest::get(&health_url)
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["status"], "ok");
    assert_eq!(response["agent"], "Research Agent");
}
