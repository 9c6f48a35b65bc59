//! Demo seller serving a single echo capability, priced from the command
//! line.

use {
    agent::{Agent, FnHandler},
    clap::Parser,
    model::pricing::{Fixed, Negotiated, Pricing, Strategy},
    rust_decimal::Decimal,
    std::{net::SocketAddr, sync::Arc, time::Duration},
};

#[derive(Debug, Parser)]
struct Arguments {
    #[clap(long, env, default_value = "0.0.0.0:8001")]
    bind_address: SocketAddr,

    #[clap(long, env, default_value = "Echo Agent")]
    agent_name: String,

    /// Fixed price for the capability. Mutually exclusive with the
    /// negotiation options below.
    #[clap(long, env)]
    fixed_price: Option<Decimal>,

    /// Base rate for estimate-driven pricing.
    #[clap(long, env)]
    base_rate: Option<Decimal>,

    /// Negotiation target; requires --minimum-price.
    #[clap(long, env)]
    target_price: Option<Decimal>,

    /// Negotiation floor; requires --target-price.
    #[clap(long, env)]
    minimum_price: Option<Decimal>,

    #[clap(long, env, value_enum)]
    strategy: Option<StrategyArg>,

    /// LLM used for estimation and negotiation dialogue.
    #[clap(long, env)]
    model: Option<String>,

    /// Address buyers should pay. Without it a throwaway address is used.
    #[clap(long, env)]
    payment_address: Option<String>,

    #[clap(
        long,
        env,
        default_value = "2m",
        value_parser = humantime::parse_duration,
    )]
    handler_timeout: Duration,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum StrategyArg {
    Firm,
    Balanced,
    Flexible,
    Llm,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Firm => Self::Firm,
            StrategyArg::Balanced => Self::Balanced,
            StrategyArg::Flexible => Self::Flexible,
            StrategyArg::Llm => Self::Llm,
        }
    }
}

impl Arguments {
    fn pricing(&self) -> anyhow::Result<Pricing> {
        let mut negotiated = match (self.fixed_price, self.base_rate, self.target_price) {
            (Some(amount), None, None) => return Ok(Pricing::Fixed(Fixed::new(amount)?)),
            (None, Some(base), None) => Negotiated::base(base)?,
            (None, None, Some(target)) => {
                let minimum = self
                    .minimum_price
                    .ok_or_else(|| anyhow::anyhow!("--target-price requires --minimum-price"))?;
                Negotiated::bounds(target, minimum)?
            }
            _ => anyhow::bail!(
                "configure exactly one of --fixed-price, --base-rate or --target-price"
            ),
        };
        if let Some(strategy) = self.strategy {
            negotiated = negotiated.with_strategy(strategy.into());
        }
        if let Some(model) = &self.model {
            negotiated = negotiated.with_model(model.clone());
        }
        Ok(Pricing::Negotiated(negotiated))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();
    observe::tracing::initialize("agent=debug,info");
    observe::panic_hook::install();
    tracing::info!("running agent with {args:#?}");

    let pricing = args.pricing()?;
    let mut builder = Agent::builder(args.agent_name, pricing)
        .handler_timeout(args.handler_timeout)
        .handler(Arc::new(FnHandler(|input| async move {
            Ok(serde_json::json!({"result": "ok", "echo": input}))
        })));
    if let Some(address) = args.payment_address {
        builder = builder.payment_address(address);
    }
    let agent = builder.build();
    tracing::info!(
        id = agent.id(),
        address = agent.payment_address(),
        "agent ready"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown_tx.send(()).ok();
    });

    agent::api::serve(agent, args.bind_address, shutdown_rx).await?;
    Ok(())
}
