//! The seller side of the protocol: an agent advertising priced
//! capabilities, negotiating jobs and executing them through a user-supplied
//! handler.

pub mod api;
mod dispatch;
pub mod handler;

pub use handler::{FnHandler, Handler};

use {
    dashmap::DashMap,
    estimation::Cache,
    llm::Completions,
    model::Pricing,
    negotiation::Engine,
    rand::RngCore,
    std::{sync::Arc, time::Duration},
};

/// Default cap on a single handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(120);

/// A configured seller agent. Cheap to clone; all clones share the job map
/// and estimate cache.
#[derive(Clone)]
pub struct Agent(Arc<Inner>);

struct Inner {
    id: String,
    name: String,
    description: Option<String>,
    capabilities: Vec<String>,
    pricing: Pricing,
    payment_address: String,
    networks: Vec<String>,
    handler: Arc<dyn Handler>,
    handler_timeout: Duration,
    oracle: Option<Arc<dyn Completions>>,
    /// Active negotiations. The dispatcher owns this map exclusively and
    /// serializes engine access through the per-job mutex.
    jobs: DashMap<String, Arc<tokio::sync::Mutex<Engine>>>,
    estimates: Cache,
}

impl Agent {
    pub fn builder(name: impl Into<String>, pricing: Pricing) -> Builder {
        Builder {
            name: name.into(),
            pricing,
            description: None,
            capabilities: Vec::new(),
            payment_address: None,
            handler: None,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            oracle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn payment_address(&self) -> &str {
        &self.0.payment_address
    }

    pub fn pricing(&self) -> &Pricing {
        &self.0.pricing
    }

    fn inner(&self) -> &Inner {
        &self.0
    }
}

pub struct Builder {
    name: String,
    pricing: Pricing,
    description: Option<String>,
    capabilities: Vec<String>,
    payment_address: Option<String>,
    handler: Option<Arc<dyn Handler>>,
    handler_timeout: Duration,
    oracle: Option<Arc<dyn Completions>>,
}

impl Builder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn capability(mut self, id: impl Into<String>) -> Self {
        self.capabilities.push(id.into());
        self
    }

    /// Where buyers should send payment. Defaults to a throwaway address so
    /// unpaid demo agents work out of the box.
    pub fn payment_address(mut self, address: impl Into<String>) -> Self {
        self.payment_address = Some(address.into());
        self
    }

    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Overrides the LLM used for estimation and negotiation dialogue. When
    /// unset, one is constructed from the pricing's `model` field.
    pub fn oracle(mut self, oracle: Arc<dyn Completions>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn build(self) -> Agent {
        let slug = slugify(&self.name);
        let mut suffix = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut suffix);

        let capabilities = if self.capabilities.is_empty() {
            vec![slug.clone()]
        } else {
            self.capabilities
        };

        let oracle = self.oracle.or_else(|| default_oracle(&self.pricing));

        Agent(Arc::new(Inner {
            id: format!("{slug}-{}", hex::encode(suffix)),
            name: self.name,
            description: self.description,
            capabilities,
            pricing: self.pricing,
            payment_address: self.payment_address.unwrap_or_else(mock_address),
            networks: vec!["base".to_string()],
            handler: self.handler.unwrap_or_else(|| Arc::new(NoHandler)),
            handler_timeout: self.handler_timeout,
            oracle,
            jobs: DashMap::new(),
            estimates: Cache::default(),
        }))
    }
}

/// Constructs the completion client implied by the pricing configuration.
/// Base-rate pricing needs an estimator even when no model is configured, so
/// it falls back to the default mini model.
fn default_oracle(pricing: &Pricing) -> Option<Arc<dyn Completions>> {
    let Pricing::Negotiated(negotiated) = pricing else {
        return None;
    };
    let model = match (&negotiated.model, negotiated.uses_estimation()) {
        (Some(model), _) => model.clone(),
        (None, true) => "gpt-4o-mini".to_string(),
        (None, false) => return None,
    };
    let mut client = llm::Client::new(model);
    if let Some(base_url) = &negotiated.base_url {
        if let Ok(url) = base_url.parse() {
            client = client.with_base_url(url);
        }
    }
    Some(Arc::new(client))
}

fn slugify(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

fn mock_address() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

struct NoHandler;

#[async_trait::async_trait]
impl Handler for NoHandler {
    async fn run(&self, _: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        anyhow::bail!("no handler configured")
    }
}
