use serde::{Deserialize, Serialize};

/// Chains the consolidation engine can route between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Base,
    Arbitrum,
    Polygon,
    Optimism,
    Bsc,
    Linea,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
            Chain::Polygon => "polygon",
            Chain::Optimism => "optimism",
            Chain::Bsc => "bsc",
            Chain::Linea => "linea",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ethereum" | "eth" => Some(Chain::Ethereum),
            "base" => Some(Chain::Base),
            "arbitrum" | "arb" => Some(Chain::Arbitrum),
            "polygon" | "matic" => Some(Chain::Polygon),
            "optimism" | "op" => Some(Chain::Optimism),
            "bsc" | "bnb" => Some(Chain::Bsc),
            "linea" => Some(Chain::Linea),
            _ => None,
        }
    }

    /// EVM chain id used by bridge APIs and calldata.
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Base => 8453,
            Chain::Arbitrum => 42161,
            Chain::Polygon => 137,
            Chain::Optimism => 10,
            Chain::Bsc => 56,
            Chain::Linea => 59144,
        }
    }

    pub fn from_chain_id(id: u64) -> Option<Self> {
        match id {
            1 => Some(Chain::Ethereum),
            8453 => Some(Chain::Base),
            42161 => Some(Chain::Arbitrum),
            137 => Some(Chain::Polygon),
            10 => Some(Chain::Optimism),
            56 => Some(Chain::Bsc),
            59144 => Some(Chain::Linea),
            _ => None,
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token metadata attached to quotes and plans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    pub chain: Chain,
}

/// Current wall-clock time in milliseconds since epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generates a `{prefix}-{timestamp}-{random}` identifier. Timestamp plus a
/// random suffix keeps concurrent writers from ever colliding on a cache key.
pub fn generate_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, now_ms(), &suffix[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_round_trips_through_str() {
        for chain in [
            Chain::Ethereum,
            Chain::Base,
            Chain::Arbitrum,
            Chain::Polygon,
            Chain::Optimism,
            Chain::Bsc,
            Chain::Linea,
        ] {
            assert_eq!(Chain::from_str(chain.as_str()), Some(chain));
            assert_eq!(Chain::from_chain_id(chain.chain_id()), Some(chain));
        }
        assert_eq!(Chain::from_str("solana"), None);
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = generate_id("plan");
        let b = generate_id("plan");
        assert!(a.starts_with("plan-"));
        assert_ne!(a, b);
    }
}
