//! Network definitions

use serde::{Deserialize, Serialize};

/// Default gap limit for HD address chains
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Default number of blocks the safe block must advance before a new
/// UTXO safe point is materialized
pub const DEFAULT_SAFE_POINT_INTERVAL: u64 = 2_160;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkType {
    /// Mainnet
    Mainnet,
    /// Public testnet
    Testnet,
    /// Pre-production network
    Preprod,
}

impl NetworkType {
    /// Parse from a lowercase name
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "preprod" => Ok(Self::Preprod),
            other => Err(crate::Error::InvalidNetwork(other.to_string())),
        }
    }
}

/// Native token descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultToken {
    /// Token identifier (empty for the native currency)
    pub identifier: &'static str,
    /// Display ticker
    pub ticker: &'static str,
    /// Number of decimals
    pub decimals: u32,
}

/// Network configuration
#[derive(Debug, Clone)]
pub struct Network {
    /// Network type
    pub network_type: NetworkType,
    /// Human-readable name
    pub name: &'static str,
    /// Native currency
    pub default_token: DefaultToken,
    /// Address gap limit per HD chain
    pub gap_limit: u32,
    /// Blocks between UTXO safe points
    pub safe_point_interval: u64,
    /// Default remote indexer endpoint
    pub default_indexer_url: &'static str,
}

impl Network {
    /// Get mainnet parameters
    pub const fn mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            name: "mainnet",
            default_token: DefaultToken {
                identifier: "",
                ticker: "ADA",
                decimals: 6,
            },
            gap_limit: DEFAULT_GAP_LIMIT,
            safe_point_interval: DEFAULT_SAFE_POINT_INTERVAL,
            default_indexer_url: "https://api.indexer.example.org",
        }
    }

    /// Get testnet parameters
    pub const fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            name: "testnet",
            default_token: DefaultToken {
                identifier: "",
                ticker: "TADA",
                decimals: 6,
            },
            gap_limit: DEFAULT_GAP_LIMIT,
            safe_point_interval: 360,
            default_indexer_url: "https://testnet.indexer.example.org",
        }
    }

    /// Get pre-production parameters
    pub const fn preprod() -> Self {
        Self {
            network_type: NetworkType::Preprod,
            name: "preprod",
            default_token: DefaultToken {
                identifier: "",
                ticker: "TADA",
                decimals: 6,
            },
            gap_limit: DEFAULT_GAP_LIMIT,
            safe_point_interval: 360,
            default_indexer_url: "https://preprod.indexer.example.org",
        }
    }

    /// Get network by type
    pub const fn from_type(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
            NetworkType::Preprod => Self::preprod(),
        }
    }

    /// Format a raw default-token amount using the network's decimals
    pub fn format_default_amount(&self, amount: u128) -> String {
        let decimals = self.default_token.decimals;
        if decimals == 0 {
            return amount.to_string();
        }
        let scale = 10u128.pow(decimals);
        format!(
            "{}.{:0width$}",
            amount / scale,
            amount % scale,
            width = decimals as usize
        )
    }
}
