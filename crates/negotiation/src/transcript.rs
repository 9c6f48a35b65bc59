//! Append-only negotiation log with chained digests.
//!
//! The chain is local to a single job and lives only in memory. Its job is
//! tamper evidence within one negotiation: reordering or redacting any past
//! entry invalidates every hash after it.

use {
    chrono::{DateTime, Utc},
    rust_decimal::Decimal,
    serde::Serialize,
    sha2::{Digest, Sha256},
    std::fmt,
};

/// Hash of the empty chain, fed into the first entry.
pub const GENESIS: &str = "0";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Buyer,
    Seller,
    System,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Offer,
    Counter,
    Accept,
    Reject,
    Expired,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::System => "system",
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Offer => "offer",
            Self::Counter => "counter",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Expired => "expired",
        })
    }
}

/// Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Entry {
    pub party: Party,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
}

#[derive(Clone, Debug, Default)]
pub struct Transcript(Vec<Entry>);

impl Transcript {
    pub fn record(&mut self, party: Party, action: Action, price: Option<Decimal>) {
        let prev = self.0.last().map_or(GENESIS, |entry| entry.hash.as_str());
        let timestamp = Utc::now();
        let hash = chain_hash(prev, party, action, price, timestamp);
        self.0.push(Entry {
            party,
            action,
            price,
            timestamp,
            hash,
        });
    }

    pub fn entries(&self) -> &[Entry] {
        &self.0
    }

    /// Recomputes every digest from the recorded fields and checks it against
    /// the stored chain.
    pub fn verify(&self) -> bool {
        let mut prev = GENESIS.to_string();
        for entry in &self.0 {
            let expected =
                chain_hash(&prev, entry.party, entry.action, entry.price, entry.timestamp);
            if entry.hash != expected {
                return false;
            }
            prev = expected;
        }
        true
    }
}

/// First 16 hex characters of the SHA-256 over the previous hash and the
/// entry fields, joined with `:`. Absent prices hash as the empty string.
pub fn chain_hash(
    prev: &str,
    party: Party,
    action: Action,
    price: Option<Decimal>,
    timestamp: DateTime<Utc>,
) -> String {
    let price = price.map(|price| price.to_string()).unwrap_or_default();
    let payload = format!("{prev}:{party}:{action}:{price}:{}", timestamp.to_rfc3339());
    let digest = hex::encode(Sha256::digest(payload.as_bytes()));
    digest[..16].to_string()
}
