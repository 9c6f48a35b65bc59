use {async_trait::async_trait, serde_json::Value};

/// The task logic a seller executes once terms are agreed.
///
/// Implementations are opaque to the dispatcher: the input is the buyer's
/// `input` payload verbatim and the output is embedded verbatim in the
/// response. Errors surface to the buyer as an internal JSON-RPC error;
/// execution time is capped by the agent's handler timeout.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(&self, input: Value) -> anyhow::Result<Value>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn run(&self, input: Value) -> anyhow::Result<Value> {
        (self.0)(input).await
    }
}
