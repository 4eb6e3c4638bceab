//! Across Protocol V3 adapter. Quotes come from the public suggested-fees
//! API; transactions call `depositV3` on the per-chain SpokePool.

use async_trait::async_trait;
use ethereum_types::{H160, U256};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::cache::{cache_get, cache_set, Cache};
use crate::types::{now_ms, Chain, TokenInfo};

use super::abi::{encode_call_hex, parse_address, AbiToken};
use super::config::{
    known_token_symbol, token_decimals, usdc_address, weth_address, DEFAULT_SLIPPAGE,
    NATIVE_TOKEN_ADDRESS, QUOTE_TTL_SECONDS,
};
use super::{
    apply_slippage, BridgeError, BridgeProvider, BridgeQuote, BridgeQuoteRequest, BridgeReceipt,
    BridgeRoute, BridgeStatus, BridgeTransaction, ApprovalRequirement, FeeBreakdown, QuoteContext,
    RouteStep,
};

/// Across V3 SpokePool contract addresses.
static SPOKE_POOLS: Lazy<HashMap<Chain, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (Chain::Ethereum, "0x5c7BCd6E7De5423a257D81B442095A1a6ced35C5"),
        (Chain::Base, "0x09aea4b2242abC8bb4BB78D537A67a245A7bEC64"),
        (Chain::Arbitrum, "0xe35e9842fceaCA96570B734083f4a58e8F7C5f2A"),
        (Chain::Polygon, "0x9295ee1d8C5b022Be115A2AD3c30C72E34e7F096"),
        (Chain::Optimism, "0x6f26Bf09B1C792e3228e5467807a900A503c0281"),
        (Chain::Linea, "0x7E63A5f1a8F0B4d0934B2f2327DAED3F6bb2ee75"),
    ])
});

const DEPOSIT_V3_SIGNATURE: &str =
    "depositV3(address,address,address,address,uint256,uint256,uint256,address,uint32,uint32,uint32,bytes)";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AcrossFee {
    total: String,
    pct: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcrossQuoteResponse {
    total_relay_fee: AcrossFee,
    relayer_capital_fee: AcrossFee,
    relayer_gas_fee: AcrossFee,
    lp_fee: AcrossFee,
    timestamp: String,
    is_amount_too_low: bool,
    #[serde(default)]
    exclusive_relayer: Option<String>,
    #[serde(default)]
    exclusivity_deadline: Option<String>,
    #[serde(default)]
    expected_fill_time_sec: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcrossLimitsResponse {
    max_deposit: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcrossStatusResponse {
    status: String,
    #[serde(default)]
    fill_tx: Option<String>,
    #[serde(default)]
    destination_chain_id: Option<u64>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    output_amount: Option<String>,
}

pub struct AcrossProvider {
    client: reqwest::Client,
    api_url: String,
    cache: Arc<dyn Cache>,
}

impl AcrossProvider {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self::with_api_url("https://app.across.to/api", cache)
    }

    pub fn with_api_url(api_url: &str, cache: Arc<dyn Cache>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            cache,
        }
    }

    fn spoke_pool(chain: Chain) -> Option<&'static str> {
        SPOKE_POOLS.get(&chain).copied()
    }

    async fn fetch_limits(
        &self,
        source_chain: Chain,
        destination_chain: Chain,
        token: &str,
    ) -> Result<AcrossLimitsResponse, BridgeError> {
        let response = self
            .client
            .get(format!("{}/limits", self.api_url))
            .query(&[
                ("token", token.to_string()),
                ("originChainId", source_chain.chain_id().to_string()),
                ("destinationChainId", destination_chain.chain_id().to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BridgeError::InvalidParameters(format!(
                "limits request failed with HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    fn parse_units(value: &str) -> Result<U256, BridgeError> {
        U256::from_dec_str(value)
            .map_err(|e| BridgeError::InvalidParameters(format!("bad amount {}: {:?}", value, e)))
    }

    fn token_info(chain: Chain, address: &str) -> TokenInfo {
        let symbol = known_token_symbol(chain, address).unwrap_or("TOKEN");
        TokenInfo {
            address: address.to_string(),
            symbol: symbol.to_string(),
            decimals: token_decimals(symbol),
            chain,
        }
    }

    /// Approximate USD value of fee units when the bridged token is a dollar
    /// stable. Other tokens need a price feed this core does not carry.
    fn fee_usd(symbol: &str, units: U256) -> f64 {
        match symbol {
            "USDC" | "USDT" => units.low_u128() as f64 / 1e6,
            _ => 0.0,
        }
    }

    /// Fast fills are available for USDC and WETH under provider thresholds.
    fn is_fast_fill_eligible(&self, chain: Chain, token: &str, amount: U256) -> bool {
        let token = token.to_lowercase();
        let is_usdc = usdc_address(chain).map(str::to_lowercase) == Some(token.clone());
        let is_weth = weth_address(chain).map(str::to_lowercase) == Some(token);
        if !is_usdc && !is_weth {
            return false;
        }
        let max_amount = if is_usdc {
            U256::from(250_000u64) * U256::exp10(6)
        } else {
            U256::from(100u64) * U256::exp10(18)
        };
        amount <= max_amount
    }
}

#[async_trait]
impl BridgeProvider for AcrossProvider {
    fn name(&self) -> &'static str {
        "across"
    }

    async fn supports_route(
        &self,
        source: Chain,
        destination: Chain,
        token: &str,
    ) -> Result<bool, BridgeError> {
        if Self::spoke_pool(source).is_none() || Self::spoke_pool(destination).is_none() {
            return Ok(false);
        }

        let cache_key = format!("across:routes:{}:{}:{}", source, destination, token.to_lowercase());
        if let Ok(Some(cached)) = cache_get::<bool>(self.cache.as_ref(), &cache_key).await {
            return Ok(cached);
        }

        match self.fetch_limits(source, destination, token).await {
            Ok(limits) => {
                let supported = Self::parse_units(&limits.max_deposit)
                    .map(|max| max > U256::zero())
                    .unwrap_or(false);
                let _ = cache_set(self.cache.as_ref(), &cache_key, &supported, 3600).await;
                Ok(supported)
            }
            Err(e) => {
                warn!("Across limits probe failed for {} -> {}: {}", source, destination, e);
                let _ = cache_set(self.cache.as_ref(), &cache_key, &false, 300).await;
                Ok(false)
            }
        }
    }

    async fn get_quote(
        &self,
        request: &BridgeQuoteRequest,
    ) -> Result<Option<QuoteContext>, BridgeError> {
        let spoke_pool = match Self::spoke_pool(request.source_chain) {
            Some(address) => address,
            None => return Ok(None),
        };
        if Self::spoke_pool(request.destination_chain).is_none() {
            return Ok(None);
        }

        let response = self
            .client
            .get(format!("{}/suggested-fees", self.api_url))
            .query(&[
                ("inputToken", request.source_token.clone()),
                ("outputToken", request.destination_token.clone()),
                ("originChainId", request.source_chain.chain_id().to_string()),
                (
                    "destinationChainId",
                    request.destination_chain.chain_id().to_string(),
                ),
                ("amount", request.amount.to_string()),
                ("recipient", request.recipient.clone()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("Across quote request failed: HTTP {}", response.status());
            return Ok(None);
        }

        let data: AcrossQuoteResponse = response.json().await?;
        if data.is_amount_too_low {
            return Err(BridgeError::AmountTooLow);
        }

        let total_fee = Self::parse_units(&data.total_relay_fee.total)?;
        if total_fee >= request.amount {
            return Err(BridgeError::AmountTooLow);
        }
        let output_amount = request.amount - total_fee;

        let slippage = request.slippage.unwrap_or(DEFAULT_SLIPPAGE);
        let min_output_amount = apply_slippage(output_amount, slippage);

        let source_token = Self::token_info(request.source_chain, &request.source_token);
        let destination_token =
            Self::token_info(request.destination_chain, &request.destination_token);

        let is_fast_fill = self.is_fast_fill_eligible(
            request.source_chain,
            &request.source_token,
            output_amount,
        );
        let estimated_time_seconds = if is_fast_fill {
            60
        } else {
            data.expected_fill_time_sec.unwrap_or(900)
        };

        let quote = BridgeQuote {
            provider: self.name().to_string(),
            source_chain: request.source_chain,
            destination_chain: request.destination_chain,
            source_token: source_token.clone(),
            destination_token,
            input_amount: request.amount,
            output_amount,
            min_output_amount,
            fees: FeeBreakdown {
                bridge_fee: Self::parse_units(&data.lp_fee.total)?,
                gas_fee: Self::parse_units(&data.relayer_gas_fee.total)?,
                relayer_fee: Self::parse_units(&data.relayer_capital_fee.total)?,
                total_fee_usd: Self::fee_usd(&source_token.symbol, total_fee),
            },
            estimated_time_seconds,
            route: BridgeRoute {
                steps: vec![RouteStep {
                    protocol: "Across V3".to_string(),
                    chain: request.source_chain,
                    from_token: request.source_token.clone(),
                    to_token: request.destination_token.clone(),
                    from_amount: request.amount,
                    to_amount: output_amount,
                }],
                total_gas_estimate: U256::from(150_000u64),
                requires_approval: request.source_token.to_lowercase() != NATIVE_TOKEN_ADDRESS,
                approval_address: Some(spoke_pool.to_string()),
            },
            expires_at: now_ms() + (QUOTE_TTL_SECONDS as i64) * 1000,
            quote_id: crate::types::generate_id("across"),
            max_slippage: slippage,
        };

        Ok(Some(QuoteContext {
            quote,
            request: request.clone(),
            provider_data: serde_json::to_value(&data)?,
        }))
    }

    async fn build_transaction(
        &self,
        context: &QuoteContext,
    ) -> Result<BridgeTransaction, BridgeError> {
        let data: AcrossQuoteResponse = serde_json::from_value(context.provider_data.clone())?;
        let quote = &context.quote;
        let request = &context.request;

        let spoke_pool = Self::spoke_pool(quote.source_chain)
            .ok_or_else(|| BridgeError::InvalidParameters(format!(
                "no SpokePool on {}",
                quote.source_chain
            )))?;

        let quote_timestamp: u64 = data
            .timestamp
            .parse()
            .map_err(|_| BridgeError::InvalidParameters("bad quote timestamp".into()))?;
        let exclusivity_deadline: u64 = data
            .exclusivity_deadline
            .as_deref()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0);
        let exclusive_relayer = data
            .exclusive_relayer
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(parse_address)
            .transpose()?
            .unwrap_or_else(H160::zero);

        // Fill deadline is relative to now, not the original quote time.
        let fill_deadline = (now_ms() / 1000) as u64 + 3600;

        let calldata = encode_call_hex(
            DEPOSIT_V3_SIGNATURE,
            &[
                AbiToken::Address(parse_address(&request.sender)?),
                AbiToken::Address(parse_address(&request.recipient)?),
                AbiToken::Address(parse_address(&request.source_token)?),
                AbiToken::Address(parse_address(&request.destination_token)?),
                AbiToken::Uint(quote.input_amount),
                AbiToken::Uint(quote.min_output_amount),
                AbiToken::Uint(U256::from(quote.destination_chain.chain_id())),
                AbiToken::Address(exclusive_relayer),
                AbiToken::Uint(U256::from(quote_timestamp)),
                AbiToken::Uint(U256::from(fill_deadline)),
                AbiToken::Uint(U256::from(exclusivity_deadline)),
                AbiToken::Bytes(Vec::new()),
            ],
        );

        let is_native = request.source_token.to_lowercase() == NATIVE_TOKEN_ADDRESS;

        Ok(BridgeTransaction {
            provider: self.name().to_string(),
            quote_id: quote.quote_id.clone(),
            source_chain: quote.source_chain,
            destination_chain: quote.destination_chain,
            to: spoke_pool.to_string(),
            data: calldata,
            value: if is_native { quote.input_amount } else { U256::zero() },
            gas_limit: U256::from(200_000u64),
            approval: if is_native {
                None
            } else {
                Some(ApprovalRequirement {
                    token: request.source_token.clone(),
                    spender: spoke_pool.to_string(),
                    amount: quote.input_amount,
                })
            },
        })
    }

    async fn get_status(
        &self,
        source_tx_hash: &str,
        source_chain: Chain,
    ) -> Result<BridgeReceipt, BridgeError> {
        let response = self
            .client
            .get(format!("{}/deposit/status", self.api_url))
            .query(&[
                ("originChainId", source_chain.chain_id().to_string()),
                ("depositTxHash", source_tx_hash.to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            // Deposit may simply not be indexed yet
            return Ok(BridgeReceipt::pending(source_tx_hash, source_chain, None));
        }

        let data: AcrossStatusResponse = response.json().await.map_err(|e| {
            error!("Across status response parse failed: {}", e);
            BridgeError::InvalidParameters("unparseable status response".into())
        })?;

        let status = match data.status.as_str() {
            "filled" => BridgeStatus::Completed,
            "expired" => BridgeStatus::Failed,
            _ => BridgeStatus::Bridging,
        };

        Ok(BridgeReceipt {
            provider: self.name().to_string(),
            status,
            source_tx_hash: source_tx_hash.to_string(),
            source_chain,
            source_confirmations: 12,
            destination_tx_hash: data.fill_tx,
            destination_chain: data.destination_chain_id.and_then(Chain::from_chain_id),
            destination_confirmations: if status == BridgeStatus::Completed {
                Some(1)
            } else {
                None
            },
            input_amount: data
                .amount
                .as_deref()
                .and_then(|a| U256::from_dec_str(a).ok())
                .unwrap_or_default(),
            output_amount: data
                .output_amount
                .as_deref()
                .and_then(|a| U256::from_dec_str(a).ok()),
            initiated_at: now_ms(),
            completed_at: if status == BridgeStatus::Completed {
                Some(now_ms())
            } else {
                None
            },
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn fast_fill_respects_token_and_threshold() {
        let provider = AcrossProvider::new(Arc::new(MemoryCache::new()));
        let usdc = usdc_address(Chain::Base).unwrap();

        assert!(provider.is_fast_fill_eligible(Chain::Base, usdc, U256::from(1_000_000u64)));
        assert!(!provider.is_fast_fill_eligible(
            Chain::Base,
            usdc,
            U256::from(300_000u64) * U256::exp10(6)
        ));
        assert!(!provider.is_fast_fill_eligible(Chain::Base, "0xdeadbeef", U256::from(1u64)));
    }

    #[tokio::test]
    async fn unsupported_chains_short_circuit_without_network() {
        let provider = AcrossProvider::new(Arc::new(MemoryCache::new()));
        let supported = provider
            .supports_route(Chain::Bsc, Chain::Base, "0xToken")
            .await
            .unwrap();
        assert!(!supported);
    }
}
