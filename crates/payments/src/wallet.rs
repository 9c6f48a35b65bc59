//! Key management and token transfers for agent wallets.

use {
    crate::{IERC20, Network, USDC_DECIMALS, from_token_units, to_token_units},
    alloy::{
        network::EthereumWallet,
        primitives::{Address, B256},
        providers::{Provider, ProviderBuilder},
        signers::local::PrivateKeySigner,
    },
    anyhow::{Context, Result, bail},
    rust_decimal::Decimal,
    std::{sync::Mutex, time::Duration},
};

/// Default environment variable holding the wallet's private key.
pub const PRIVATE_KEY_ENV_VAR: &str = "APEX_PRIVATE_KEY";

/// How long to wait for a transfer receipt before reporting the transaction
/// as submitted-but-pending.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Gas limit for an ERC-20 transfer; actual usage is around 50k.
const TRANSFER_GAS_LIMIT: u64 = 100_000;

#[derive(Clone, Debug, Default)]
pub struct TransferResult {
    pub success: bool,
    pub tx_hash: Option<B256>,
    pub explorer_url: Option<String>,
    pub error: Option<String>,
    pub gas_used: Option<u64>,
}

impl TransferResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Signing wallet bound to one network.
pub struct Wallet {
    signer: PrivateKeySigner,
    network: Network,
    /// Highest nonce handed out by this wallet. The chain's "pending" count
    /// lags when transfers are issued in quick succession, so the local
    /// high-water mark takes precedence once it catches up.
    last_nonce: Mutex<Option<u64>>,
}

impl Wallet {
    pub fn new(signer: PrivateKeySigner, network: Network) -> Self {
        Self {
            signer,
            network,
            last_nonce: Mutex::new(None),
        }
    }

    /// Generates a fresh random wallet. The key only lives in this process.
    pub fn generate(network: Network) -> Self {
        Self::new(PrivateKeySigner::random(), network)
    }

    /// Loads a wallet from a hex private key, with or without `0x` prefix.
    pub fn from_private_key(private_key: &str, network: Network) -> Result<Self> {
        let key = private_key.strip_prefix("0x").unwrap_or(private_key);
        let signer = key.parse().context("invalid private key")?;
        Ok(Self::new(signer, network))
    }

    /// Loads the key from an environment variable and the network from
    /// `APEX_NETWORK`.
    pub fn from_env(var_name: &str) -> Result<Self> {
        let key =
            std::env::var(var_name).with_context(|| format!("{var_name} not set"))?;
        Self::from_private_key(&key, Network::from_env())
    }

    /// Checksummed account address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn provider(&self) -> impl Provider {
        ProviderBuilder::new()
            .wallet(EthereumWallet::from(self.signer.clone()))
            .connect_http(self.network.rpc_url())
    }

    /// Token balance in human units.
    pub async fn balance(&self, token: &str) -> Result<Decimal> {
        if token != "USDC" {
            bail!("unsupported token {token:?}, only USDC is supported");
        }
        let provider = self.provider();
        let usdc = IERC20::new(self.network.usdc(), &provider);
        let raw = usdc.balanceOf(self.address()).call().await?;
        Ok(from_token_units(raw, USDC_DECIMALS))
    }

    /// Native balance, for keeping an eye on gas.
    pub async fn eth_balance(&self) -> Result<Decimal> {
        let raw = self.provider().get_balance(self.address()).await?;
        Ok(from_token_units(raw, 18))
    }

    /// Transfers tokens to `to`. Errors are folded into the result rather
    /// than propagated; a receipt timeout still counts as success with the
    /// transaction hash attached, since the transfer is merely unconfirmed.
    pub async fn transfer(&self, to: Address, amount: Decimal, token: &str) -> TransferResult {
        match self.try_transfer(to, amount, token).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(?err, %to, %amount, "transfer failed");
                TransferResult::failure(format!("{err:#}"))
            }
        }
    }

    async fn try_transfer(
        &self,
        to: Address,
        amount: Decimal,
        token: &str,
    ) -> Result<TransferResult> {
        if token != "USDC" {
            bail!("unsupported token {token:?}, only USDC is supported");
        }
        let raw = to_token_units(amount, USDC_DECIMALS).context("amount out of range")?;

        let provider = self.provider();
        let usdc = IERC20::new(self.network.usdc(), &provider);

        let balance = usdc.balanceOf(self.address()).call().await?;
        if balance < raw {
            return Ok(TransferResult::failure(format!(
                "insufficient balance: have {}, need {amount:.2}",
                from_token_units(balance, USDC_DECIMALS)
            )));
        }

        let nonce = self.reserve_nonce(&provider).await?;
        // Bump the suggestion by 20% so quick successive transfers don't get
        // stuck behind each other as underpriced replacements.
        let gas_price = provider.get_gas_price().await?;
        let gas_price = gas_price + gas_price / 5;

        let pending = usdc
            .transfer(to, raw)
            .nonce(nonce)
            .gas_price(gas_price)
            .gas(TRANSFER_GAS_LIMIT)
            .send()
            .await?;
        let tx_hash = *pending.tx_hash();
        let explorer_url = self.network.explorer_tx_url(tx_hash);
        tracing::info!(%tx_hash, nonce, "submitted transfer");

        match pending
            .with_timeout(Some(RECEIPT_TIMEOUT))
            .get_receipt()
            .await
        {
            Ok(receipt) if receipt.status() => Ok(TransferResult {
                success: true,
                tx_hash: Some(tx_hash),
                explorer_url: Some(explorer_url),
                error: None,
                gas_used: Some(receipt.gas_used),
            }),
            Ok(_) => Ok(TransferResult {
                success: false,
                tx_hash: Some(tx_hash),
                explorer_url: Some(explorer_url),
                error: Some("transaction reverted".to_string()),
                gas_used: None,
            }),
            Err(err) => {
                // Still in the mempool. The caller treats this as submitted,
                // not yet confirmed.
                tracing::debug!(?err, %tx_hash, "no receipt within timeout");
                Ok(TransferResult {
                    success: true,
                    tx_hash: Some(tx_hash),
                    explorer_url: Some(explorer_url),
                    error: Some("pending confirmation".to_string()),
                    gas_used: None,
                })
            }
        }
    }

    /// Picks the next nonce: the chain's pending count, unless this wallet
    /// has already issued transactions past it. The chosen nonce is recorded
    /// immediately so concurrent transfers never collide.
    async fn reserve_nonce(&self, provider: &impl Provider) -> Result<u64> {
        let chain_nonce = provider
            .get_transaction_count(self.address())
            .pending()
            .await?;
        let mut last = self.last_nonce.lock().unwrap();
        let nonce = match *last {
            Some(last_nonce) if last_nonce >= chain_nonce => last_nonce + 1,
            _ => chain_nonce,
        };
        *last = Some(nonce);
        Ok(nonce)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // First dev account of the standard test mnemonic.
    const KNOWN_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const KNOWN_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn derives_address_from_private_key() {
        let wallet = Wallet::from_private_key(KNOWN_KEY, Network::BaseSepolia).unwrap();
        assert_eq!(wallet.address().to_string(), KNOWN_ADDRESS);

        // The 0x prefix is optional.
        let bare = Wallet::from_private_key(&KNOWN_KEY[2..], Network::BaseSepolia).unwrap();
        assert_eq!(bare.address(), wallet.address());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(Wallet::from_private_key("0xnotakey", Network::BaseSepolia).is_err());
    }

    #[test]
    fn generated_wallets_are_distinct() {
        let a = Wallet::generate(Network::BaseSepolia);
        let b = Wallet::generate(Network::BaseSepolia);
        assert_ne!(a.address(), b.address());
    }
}
