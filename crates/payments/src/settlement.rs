//! Settlement: executing a payment after a successful negotiation and
//! verifying a claimed payment against the public ledger.

use {
    crate::{IERC20, Network, USDC_DECIMALS, Wallet, from_token_units},
    alloy::{
        consensus::Transaction as _,
        network::TransactionResponse,
        primitives::{Address, B256, U256},
        providers::{Provider, ProviderBuilder},
        sol_types::SolCall,
    },
    chrono::{DateTime, Utc},
    rust_decimal::Decimal,
    rust_decimal_macros::dec,
    serde::{Deserialize, Serialize},
    std::{collections::HashMap, sync::Mutex},
};

/// Accepted deviation between the proof amount and the on-chain amount, in
/// currency units. Covers decimal truncation on either side.
pub fn default_tolerance() -> Decimal {
    dec!(0.01)
}

/// The buyer's claim that an on-ledger transfer satisfies the negotiated
/// terms. Interchanged out-of-band; the seller verifies it before releasing
/// the result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentProof {
    pub job_id: String,
    pub tx_hash: B256,
    pub network: String,
    pub amount: Decimal,
    pub currency: String,
    pub from_address: Address,
    pub to_address: Address,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct PaymentResult {
    pub success: bool,
    pub proof: Option<PaymentProof>,
    pub tx_hash: Option<B256>,
    pub explorer_url: Option<String>,
    pub error: Option<String>,
    pub gas_used: Option<u64>,
}

impl PaymentResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// A single payment from buyer to seller for one job.
#[derive(Clone, Debug)]
pub struct Payment {
    pub job_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub network: Network,
    pub seller_address: Address,
}

impl Payment {
    pub fn new(job_id: impl Into<String>, amount: Decimal, seller_address: Address) -> Self {
        Self {
            job_id: job_id.into(),
            amount,
            currency: "USDC".to_string(),
            network: Network::from_env(),
            seller_address,
        }
    }

    /// Runs the transfer through the buyer's wallet and builds the proof the
    /// buyer hands to the seller.
    pub async fn execute(&self, wallet: &Wallet) -> PaymentResult {
        if self.currency != "USDC" {
            return PaymentResult::failure(format!("unsupported currency: {}", self.currency));
        }

        let transfer = wallet
            .transfer(self.seller_address, self.amount, &self.currency)
            .await;
        if !transfer.success {
            return PaymentResult {
                success: false,
                proof: None,
                tx_hash: transfer.tx_hash,
                explorer_url: transfer.explorer_url,
                error: transfer.error,
                gas_used: None,
            };
        }
        let Some(tx_hash) = transfer.tx_hash else {
            return PaymentResult::failure("transfer reported success without a hash");
        };

        PaymentResult {
            success: true,
            proof: Some(PaymentProof {
                job_id: self.job_id.clone(),
                tx_hash,
                network: self.network.to_string(),
                amount: self.amount,
                currency: self.currency.clone(),
                from_address: wallet.address(),
                to_address: self.seller_address,
                timestamp: Utc::now(),
            }),
            tx_hash: Some(tx_hash),
            explorer_url: transfer.explorer_url,
            error: transfer.error,
            gas_used: transfer.gas_used,
        }
    }
}

/// Verifies a payment proof against the ledger.
///
/// The transfer is reconstructed from the transaction itself: the receipt
/// must exist and be successful, the transaction must call `transfer` on the
/// network's USDC contract, and the decoded (from, to, value) must match the
/// proof within `tolerance`. Any failure, including RPC trouble, verifies as
/// false; the caller learns nothing beyond the boolean.
pub async fn verify(
    proof: &PaymentProof,
    expected_seller: Option<Address>,
    tolerance: Decimal,
) -> bool {
    match reconstruct_and_match(proof, expected_seller, tolerance).await {
        Ok(verified) => verified,
        Err(err) => {
            tracing::warn!(?err, tx = %proof.tx_hash, "payment verification error");
            false
        }
    }
}

/// A token transfer as reconstructed from the chain.
struct TokenTransfer {
    token: Address,
    from: Address,
    to: Address,
    value: U256,
}

async fn reconstruct_and_match(
    proof: &PaymentProof,
    expected_seller: Option<Address>,
    tolerance: Decimal,
) -> anyhow::Result<bool> {
    let Ok(network) = proof.network.parse::<Network>() else {
        return Ok(false);
    };
    let provider = ProviderBuilder::new().connect_http(network.rpc_url());

    // Absent receipt covers both unknown and still-pending transactions.
    let Some(receipt) = provider.get_transaction_receipt(proof.tx_hash).await? else {
        return Ok(false);
    };
    if !receipt.status() {
        return Ok(false);
    }
    let Some(tx) = provider.get_transaction_by_hash(proof.tx_hash).await? else {
        return Ok(false);
    };
    let Some(token) = tx.to() else {
        return Ok(false);
    };
    let Ok(call) = IERC20::transferCall::abi_decode(tx.input()) else {
        return Ok(false);
    };

    let transfer = TokenTransfer {
        token,
        from: tx.from(),
        to: call.to,
        value: call.value,
    };
    Ok(transfer_matches(proof, expected_seller, tolerance, &transfer, network.usdc()))
}

fn transfer_matches(
    proof: &PaymentProof,
    expected_seller: Option<Address>,
    tolerance: Decimal,
    transfer: &TokenTransfer,
    expected_token: Address,
) -> bool {
    if transfer.token != expected_token {
        return false;
    }
    if expected_seller.is_some_and(|seller| transfer.to != seller) {
        return false;
    }
    if transfer.to != proof.to_address {
        return false;
    }
    let amount = from_token_units(transfer.value, USDC_DECIMALS);
    if (amount - proof.amount).abs() > tolerance {
        return false;
    }
    transfer.from == proof.from_address
}

/// Per-agent payment ledger: what this agent paid out and what it verifiably
/// received, keyed by job id.
pub struct PaymentManager {
    wallet: Wallet,
    payments_made: Mutex<HashMap<String, PaymentResult>>,
    payments_received: Mutex<HashMap<String, PaymentProof>>,
}

impl PaymentManager {
    pub fn new(wallet: Wallet) -> Self {
        Self {
            wallet,
            payments_made: Mutex::new(HashMap::new()),
            payments_received: Mutex::new(HashMap::new()),
        }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub async fn pay(
        &self,
        job_id: impl Into<String>,
        amount: Decimal,
        seller_address: Address,
    ) -> PaymentResult {
        let job_id = job_id.into();
        let result = Payment::new(job_id.clone(), amount, seller_address)
            .execute(&self.wallet)
            .await;
        if result.success {
            self.payments_made
                .lock()
                .unwrap()
                .insert(job_id, result.clone());
        }
        result
    }

    /// Verifies an incoming proof, expecting this agent's own address as the
    /// recipient, and records it when it checks out.
    pub async fn verify_payment(&self, proof: &PaymentProof) -> bool {
        let verified = verify(proof, Some(self.wallet.address()), default_tolerance()).await;
        if verified {
            self.payments_received
                .lock()
                .unwrap()
                .insert(proof.job_id.clone(), proof.clone());
        }
        verified
    }

    pub async fn balance(&self) -> anyhow::Result<Decimal> {
        self.wallet.balance("USDC").await
    }

    pub fn payment_made(&self, job_id: &str) -> Option<PaymentResult> {
        self.payments_made.lock().unwrap().get(job_id).cloned()
    }

    pub fn payment_received(&self, job_id: &str) -> Option<PaymentProof> {
        self.payments_received.lock().unwrap().get(job_id).cloned()
    }

    pub fn total_paid(&self) -> Decimal {
        self.payments_made
            .lock()
            .unwrap()
            .values()
            .filter_map(|payment| payment.proof.as_ref())
            .map(|proof| proof.amount)
            .sum()
    }

    pub fn total_received(&self) -> Decimal {
        self.payments_received
            .lock()
            .unwrap()
            .values()
            .map(|proof| proof.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::to_token_units};

    fn seller() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn buyer() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn proof(amount: Decimal) -> PaymentProof {
        PaymentProof {
            job_id: "job-1".to_string(),
            tx_hash: B256::repeat_byte(0x11),
            network: "base".to_string(),
            amount,
            currency: "USDC".to_string(),
            from_address: buyer(),
            to_address: seller(),
            timestamp: Utc::now(),
        }
    }

    fn transfer(value: U256) -> TokenTransfer {
        TokenTransfer {
            token: Network::Base.usdc(),
            from: buyer(),
            to: seller(),
            value,
        }
    }

    #[test]
    fn matching_transfer_verifies() {
        let transfer = transfer(U256::from(12_500_000u64));
        assert!(transfer_matches(
            &proof(dec!(12.50)),
            Some(seller()),
            default_tolerance(),
            &transfer,
            Network::Base.usdc(),
        ));
    }

    #[test]
    fn amount_within_tolerance_verifies() {
        let transfer = transfer(U256::from(12_495_000u64));
        assert!(transfer_matches(
            &proof(dec!(12.50)),
            None,
            default_tolerance(),
            &transfer,
            Network::Base.usdc(),
        ));
    }

    #[test]
    fn any_mismatched_field_fails() {
        let reference = proof(dec!(12.50));
        let good = transfer(U256::from(12_500_000u64));
        let token = Network::Base.usdc();
        let tolerance = default_tolerance();

        // Amount off by more than the tolerance.
        let off = transfer(U256::from(12_600_000u64));
        assert!(!transfer_matches(&reference, None, tolerance, &off, token));

        // Wrong recipient.
        let mut wrong_to = proof(dec!(12.50));
        wrong_to.to_address = Address::repeat_byte(0xcc);
        assert!(!transfer_matches(&wrong_to, None, tolerance, &good, token));

        // Wrong sender.
        let mut wrong_from = proof(dec!(12.50));
        wrong_from.from_address = Address::repeat_byte(0xcc);
        assert!(!transfer_matches(&wrong_from, None, tolerance, &good, token));

        // Transaction targeting a different contract than the token.
        assert!(!transfer_matches(
            &reference,
            None,
            tolerance,
            &good,
            Address::repeat_byte(0xdd),
        ));

        // Seller expectation not met.
        assert!(!transfer_matches(
            &reference,
            Some(Address::repeat_byte(0xcc)),
            tolerance,
            &good,
            token,
        ));
    }

    #[test]
    fn transfer_calldata_round_trips() {
        let call = IERC20::transferCall {
            to: seller(),
            value: to_token_units(dec!(12.50), USDC_DECIMALS).unwrap(),
        };
        let decoded = IERC20::transferCall::abi_decode(&call.abi_encode()).unwrap();
        assert_eq!(decoded.to, seller());
        assert_eq!(from_token_units(decoded.value, USDC_DECIMALS), dec!(12.50));
    }

    #[test]
    fn proof_serialization_round_trips() {
        let proof = proof(dec!(12.50));
        let json = serde_json::to_string(&proof).unwrap();
        let parsed: PaymentProof = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, proof);
    }

    #[tokio::test]
    async fn unknown_network_verifies_false() {
        let mut proof = proof(dec!(12.50));
        proof.network = "polygon".to_string();
        assert!(!verify(&proof, None, default_tolerance()).await);
    }
}
