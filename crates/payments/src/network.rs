use {
    alloy::primitives::{Address, B256, address},
    std::{fmt, str::FromStr},
    thiserror::Error,
    url::Url,
};

/// USDC uses 6 decimals on every supported network.
pub const USDC_DECIMALS: u32 = 6;

/// Environment variable selecting the default network.
pub const NETWORK_ENV_VAR: &str = "APEX_NETWORK";

/// Networks payments can settle on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Base,
    BaseSepolia,
    Sepolia,
}

impl Network {
    /// Chain ID as defined by EIP-155.
    pub fn id(&self) -> u64 {
        match self {
            Self::Base => 8453,
            Self::BaseSepolia => 84532,
            Self::Sepolia => 11155111,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Base => "Base",
            Self::BaseSepolia => "Base Sepolia (Testnet)",
            Self::Sepolia => "Ethereum Sepolia (Testnet)",
        }
    }

    pub fn rpc_url(&self) -> Url {
        let url = match self {
            Self::Base => "https://mainnet.base.org",
            Self::BaseSepolia => "https://sepolia.base.org",
            Self::Sepolia => "https://ethereum-sepolia-rpc.publicnode.com",
        };
        url.parse().unwrap()
    }

    /// Canonical USDC deployment on the network.
    pub fn usdc(&self) -> Address {
        match self {
            Self::Base => address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            Self::BaseSepolia => address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
            Self::Sepolia => address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
        }
    }

    pub fn explorer_url(&self) -> &'static str {
        match self {
            Self::Base => "https://basescan.org",
            Self::BaseSepolia => "https://sepolia.basescan.org",
            Self::Sepolia => "https://sepolia.etherscan.io",
        }
    }

    pub fn explorer_tx_url(&self, tx_hash: B256) -> String {
        format!("{}/tx/{tx_hash}", self.explorer_url())
    }

    pub fn is_testnet(&self) -> bool {
        !matches!(self, Self::Base)
    }

    /// The network selected through `APEX_NETWORK`, defaulting to the Base
    /// testnet so misconfigured agents never move real funds.
    pub fn from_env() -> Self {
        std::env::var(NETWORK_ENV_VAR)
            .ok()
            .and_then(|name| name.parse().ok())
            .unwrap_or(Self::BaseSepolia)
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "base" => Ok(Self::Base),
            "base-sepolia" => Ok(Self::BaseSepolia),
            "sepolia" => Ok(Self::Sepolia),
            _ => Err(Error::UnknownNetwork(value.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Base => "base",
            Self::BaseSepolia => "base-sepolia",
            Self::Sepolia => "sepolia",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown network {0:?}")]
    UnknownNetwork(String),
}
