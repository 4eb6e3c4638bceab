use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::types::Chain;

/// How long an issued quote stays usable.
pub const QUOTE_TTL_SECONDS: u64 = 300;

/// Default slippage tolerance (0.5%).
pub const DEFAULT_SLIPPAGE: f64 = 0.005;

/// Sentinel address bridges use for the chain's native asset.
pub const NATIVE_TOKEN_ADDRESS: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

/// Canonical USDC per chain.
pub static USDC_ADDRESSES: Lazy<HashMap<Chain, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (Chain::Ethereum, "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        (Chain::Base, "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        (Chain::Arbitrum, "0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
        (Chain::Polygon, "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174"),
        (Chain::Optimism, "0x7F5c764cBc14f9669B88837ca1490cCa17c31607"),
        (Chain::Bsc, "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d"),
        (Chain::Linea, "0x176211869cA2b568f2A7D4EE941E073a821EE1ff"),
    ])
});

/// Canonical wrapped-native token per chain.
pub static WETH_ADDRESSES: Lazy<HashMap<Chain, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (Chain::Ethereum, "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
        (Chain::Base, "0x4200000000000000000000000000000000000006"),
        (Chain::Arbitrum, "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1"),
        (Chain::Polygon, "0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619"),
        (Chain::Optimism, "0x4200000000000000000000000000000000000006"),
        (Chain::Bsc, "0x2170Ed0880ac9A755fd29B2688956BD959F933F8"),
        (Chain::Linea, "0xe5D7C2a44FfDDf6b295A15c148167daaAf5Cf34f"),
    ])
});

/// Canonical USDT per chain (subset; not every chain carries it).
pub static USDT_ADDRESSES: Lazy<HashMap<Chain, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (Chain::Ethereum, "0xdAC17F958D2ee523a2206206994597C13D831ec7"),
        (Chain::Arbitrum, "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9"),
        (Chain::Polygon, "0xc2132D05D31c914a87C6611C10748AEb04B58e8F"),
        (Chain::Optimism, "0x94b008aA00579c1307B0EF2c499aD98a8ce58e58"),
        (Chain::Bsc, "0x55d398326f99059fF775485246999027B3197955"),
    ])
});

pub fn usdc_address(chain: Chain) -> Option<&'static str> {
    USDC_ADDRESSES.get(&chain).copied()
}

pub fn weth_address(chain: Chain) -> Option<&'static str> {
    WETH_ADDRESSES.get(&chain).copied()
}

/// Resolves the symbol of a well-known bridgeable token from its address.
/// Providers only route the stable set, so an unknown address means the
/// token first has to be swapped into one of these.
pub fn known_token_symbol(chain: Chain, address: &str) -> Option<&'static str> {
    let address = address.to_lowercase();
    if address == NATIVE_TOKEN_ADDRESS {
        return Some("ETH");
    }
    if usdc_address(chain).map(str::to_lowercase) == Some(address.clone()) {
        return Some("USDC");
    }
    if weth_address(chain).map(str::to_lowercase) == Some(address.clone()) {
        return Some("WETH");
    }
    if USDT_ADDRESSES.get(&chain).map(|a| a.to_lowercase()) == Some(address) {
        return Some("USDT");
    }
    None
}

pub fn token_decimals(symbol: &str) -> u8 {
    match symbol {
        "USDC" | "USDT" => 6,
        _ => 18,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_tokens_case_insensitively() {
        let usdc = usdc_address(Chain::Base).unwrap();
        assert_eq!(known_token_symbol(Chain::Base, usdc), Some("USDC"));
        assert_eq!(
            known_token_symbol(Chain::Base, &usdc.to_uppercase().replace("0X", "0x")),
            Some("USDC")
        );
        assert_eq!(known_token_symbol(Chain::Base, "0xdeadbeef"), None);
        assert_eq!(
            known_token_symbol(Chain::Arbitrum, NATIVE_TOKEN_ADDRESS),
            Some("ETH")
        );
    }

    #[test]
    fn decimals_match_token_standards() {
        assert_eq!(token_decimals("USDC"), 6);
        assert_eq!(token_decimals("USDT"), 6);
        assert_eq!(token_decimals("WETH"), 18);
        assert_eq!(token_decimals("ETH"), 18);
    }
}
