//! Hop Protocol adapter. Bonder-network bridging between Ethereum and the
//! major L2s; per-token bridge contracts, L1 and L2 entrypoints differ.

use async_trait::async_trait;
use ethereum_types::{H160, U256};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::Cache;
use crate::types::{now_ms, Chain, TokenInfo};

use super::abi::{encode_call_hex, parse_address, AbiToken};
use super::config::{known_token_symbol, token_decimals, DEFAULT_SLIPPAGE, QUOTE_TTL_SECONDS};
use super::{
    apply_slippage, ApprovalRequirement, BridgeError, BridgeProvider, BridgeQuote,
    BridgeQuoteRequest, BridgeReceipt, BridgeRoute, BridgeStatus, BridgeTransaction, FeeBreakdown,
    QuoteContext, RouteStep,
};

/// Hop bridge contracts per chain/token. L1 entries are the L1_Bridge, L2
/// entries the L2_AmmWrapper.
static HOP_BRIDGES: Lazy<HashMap<Chain, HashMap<&'static str, &'static str>>> = Lazy::new(|| {
    HashMap::from([
        (
            Chain::Ethereum,
            HashMap::from([
                ("ETH", "0xb8901acB165ed027E32754E0FFe830802919727f"),
                ("USDC", "0x3666f603Cc164936C1b87e207F36BEBa4AC5f18a"),
                ("USDT", "0x3E4a3a4796d16c0Cd582C382691998f7c06420B6"),
            ]),
        ),
        (
            Chain::Arbitrum,
            HashMap::from([
                ("ETH", "0x33ceb27b39d2Bb7D2e61F7564d3Df29344020417"),
                ("USDC", "0xe22D2beDb3Eca35E6397e0C6D62857094aA26F52"),
                ("USDT", "0xCB0a4177E0A60247C0ad18Be87f8eDfF6DD30283"),
            ]),
        ),
        (
            Chain::Optimism,
            HashMap::from([
                ("ETH", "0x86cA30bEF97fB651b8d866D45503684b90cb3312"),
                ("USDC", "0x2ad09850b0CA4c7c1B33f5AcD6cBAbCFB1dEa0d3"),
                ("USDT", "0x46ae9BaB8CEA96610807a275EBD36f8e916b5C61"),
            ]),
        ),
        (
            Chain::Polygon,
            HashMap::from([
                ("ETH", "0xb98454270065A31D71Bf635F6F7Ee6A518dFb849"),
                ("USDC", "0x76b22b8C1079A44F1211c807996254e9F1d0c1ea"),
                ("USDT", "0x8741Ba6225A6BF91f9D73531A98A89807857a2B3"),
            ]),
        ),
    ])
});

const SEND_TO_L2_SIGNATURE: &str =
    "sendToL2(uint256,address,uint256,uint256,uint256,address,uint256)";
const SWAP_AND_SEND_SIGNATURE: &str =
    "swapAndSend(uint256,address,uint256,uint256,uint256,uint256,uint256,uint256)";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HopQuoteResponse {
    amount_out: String,
    #[serde(default)]
    bonder_fee: Option<String>,
    #[serde(default)]
    destination_tx_fee: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HopTransferStatusResponse {
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    destination_chain_id: Option<u64>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    bond_transaction_hash: Option<String>,
    #[serde(default)]
    bonded: bool,
    #[serde(default)]
    received_timestamp: Option<i64>,
}

pub struct HopProvider {
    client: reqwest::Client,
    api_url: String,
    // Held for parity with the other adapters; Hop's support probe is static.
    _cache: Arc<dyn Cache>,
}

impl HopProvider {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self::with_api_url("https://api.hop.exchange/v1", cache)
    }

    pub fn with_api_url(api_url: &str, cache: Arc<dyn Cache>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            _cache: cache,
        }
    }

    fn bridge_address(chain: Chain, symbol: &str) -> Option<&'static str> {
        HOP_BRIDGES.get(&chain)?.get(symbol).copied()
    }

    fn parse_units(value: &str) -> Result<U256, BridgeError> {
        U256::from_dec_str(value)
            .map_err(|e| BridgeError::InvalidParameters(format!("bad amount {}: {:?}", value, e)))
    }
}

#[async_trait]
impl BridgeProvider for HopProvider {
    fn name(&self) -> &'static str {
        "hop"
    }

    async fn supports_route(
        &self,
        source: Chain,
        destination: Chain,
        token: &str,
    ) -> Result<bool, BridgeError> {
        let symbol = match known_token_symbol(source, token) {
            Some(symbol) => symbol,
            None => return Ok(false),
        };
        // WETH bridges through the ETH contracts
        let symbol = if symbol == "WETH" { "ETH" } else { symbol };
        Ok(Self::bridge_address(source, symbol).is_some()
            && Self::bridge_address(destination, symbol).is_some())
    }

    async fn get_quote(
        &self,
        request: &BridgeQuoteRequest,
    ) -> Result<Option<QuoteContext>, BridgeError> {
        let symbol = match known_token_symbol(request.source_chain, &request.source_token) {
            Some(symbol) => symbol,
            None => return Ok(None),
        };
        let symbol = if symbol == "WETH" { "ETH" } else { symbol };

        let bridge_address = match Self::bridge_address(request.source_chain, symbol) {
            Some(address) => address,
            None => return Ok(None),
        };
        if Self::bridge_address(request.destination_chain, symbol).is_none() {
            return Ok(None);
        }

        let slippage = request.slippage.unwrap_or(DEFAULT_SLIPPAGE);
        let response = self
            .client
            .get(format!("{}/quote", self.api_url))
            .query(&[
                ("amount", request.amount.to_string()),
                ("token", symbol.to_string()),
                ("fromChain", request.source_chain.as_str().to_string()),
                ("toChain", request.destination_chain.as_str().to_string()),
                ("slippage", (slippage * 100.0).to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("Hop quote request failed: HTTP {}", response.status());
            return Ok(None);
        }

        let data: HopQuoteResponse = response.json().await?;
        let output_amount = Self::parse_units(&data.amount_out)?;
        if output_amount.is_zero() {
            return Err(BridgeError::AmountTooLow);
        }
        let min_output_amount = apply_slippage(output_amount, slippage);
        let bonder_fee = data
            .bonder_fee
            .as_deref()
            .map(Self::parse_units)
            .transpose()?
            .unwrap_or_default();
        let destination_tx_fee = data
            .destination_tx_fee
            .as_deref()
            .map(Self::parse_units)
            .transpose()?
            .unwrap_or_default();

        let decimals = token_decimals(symbol);
        let fee_usd = if decimals == 6 {
            (bonder_fee + destination_tx_fee).low_u128() as f64 / 1e6
        } else {
            0.0
        };

        let quote = BridgeQuote {
            provider: self.name().to_string(),
            source_chain: request.source_chain,
            destination_chain: request.destination_chain,
            source_token: TokenInfo {
                address: request.source_token.clone(),
                symbol: symbol.to_string(),
                decimals,
                chain: request.source_chain,
            },
            destination_token: TokenInfo {
                address: request.destination_token.clone(),
                symbol: symbol.to_string(),
                decimals,
                chain: request.destination_chain,
            },
            input_amount: request.amount,
            output_amount,
            min_output_amount,
            fees: FeeBreakdown {
                bridge_fee: bonder_fee,
                gas_fee: destination_tx_fee,
                relayer_fee: U256::zero(),
                total_fee_usd: fee_usd,
            },
            estimated_time_seconds: 180,
            route: BridgeRoute {
                steps: vec![RouteStep {
                    protocol: "Hop Protocol".to_string(),
                    chain: request.source_chain,
                    from_token: request.source_token.clone(),
                    to_token: request.destination_token.clone(),
                    from_amount: request.amount,
                    to_amount: output_amount,
                }],
                total_gas_estimate: U256::from(250_000u64),
                requires_approval: symbol != "ETH",
                approval_address: Some(bridge_address.to_string()),
            },
            expires_at: now_ms() + (QUOTE_TTL_SECONDS as i64) * 1000,
            quote_id: crate::types::generate_id("hop"),
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
        let data: HopQuoteResponse = serde_json::from_value(context.provider_data.clone())?;
        let quote = &context.quote;
        let request = &context.request;

        let symbol = quote.source_token.symbol.as_str();
        let bridge_address = Self::bridge_address(quote.source_chain, symbol)
            .ok_or_else(|| BridgeError::InvalidParameters(format!(
                "no Hop bridge for {} on {}",
                symbol, quote.source_chain
            )))?;

        let recipient = parse_address(&request.recipient)?;
        let destination_chain_id = U256::from(quote.destination_chain.chain_id());

        // Deadlines are relative to now, not the original quote time
        let deadline = (now_ms() / 1000) as u64 + 1800;
        let destination_deadline = deadline + 3600;

        let calldata = if quote.source_chain == Chain::Ethereum {
            encode_call_hex(
                SEND_TO_L2_SIGNATURE,
                &[
                    AbiToken::Uint(destination_chain_id),
                    AbiToken::Address(recipient),
                    AbiToken::Uint(quote.input_amount),
                    AbiToken::Uint(quote.min_output_amount),
                    AbiToken::Uint(U256::from(deadline)),
                    AbiToken::Address(H160::zero()),
                    AbiToken::Uint(U256::zero()),
                ],
            )
        } else {
            let bonder_fee = data
                .bonder_fee
                .as_deref()
                .map(Self::parse_units)
                .transpose()?
                .unwrap_or_default();
            encode_call_hex(
                SWAP_AND_SEND_SIGNATURE,
                &[
                    AbiToken::Uint(destination_chain_id),
                    AbiToken::Address(recipient),
                    AbiToken::Uint(quote.input_amount),
                    AbiToken::Uint(bonder_fee),
                    AbiToken::Uint(quote.min_output_amount),
                    AbiToken::Uint(U256::from(deadline)),
                    AbiToken::Uint(quote.min_output_amount),
                    AbiToken::Uint(U256::from(destination_deadline)),
                ],
            )
        };

        let is_native = symbol == "ETH";

        Ok(BridgeTransaction {
            provider: self.name().to_string(),
            quote_id: quote.quote_id.clone(),
            source_chain: quote.source_chain,
            destination_chain: quote.destination_chain,
            to: bridge_address.to_string(),
            data: calldata,
            value: if is_native { quote.input_amount } else { U256::zero() },
            gas_limit: U256::from(300_000u64),
            approval: if is_native {
                None
            } else {
                Some(ApprovalRequirement {
                    token: request.source_token.clone(),
                    spender: bridge_address.to_string(),
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
            .get(format!("{}/transfer-status", self.api_url))
            .query(&[("transactionHash", source_tx_hash.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(BridgeReceipt::pending(source_tx_hash, source_chain, None));
        }

        let data: HopTransferStatusResponse = response.json().await?;

        let status = if data.bonded && data.bond_transaction_hash.is_some() {
            BridgeStatus::Completed
        } else if data.transaction_hash.is_some() {
            BridgeStatus::Bridging
        } else {
            BridgeStatus::Pending
        };

        Ok(BridgeReceipt {
            provider: self.name().to_string(),
            status,
            source_tx_hash: source_tx_hash.to_string(),
            source_chain,
            source_confirmations: if data.transaction_hash.is_some() { 1 } else { 0 },
            destination_tx_hash: data.bond_transaction_hash,
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
            output_amount: None,
            initiated_at: now_ms(),
            completed_at: data.received_timestamp.map(|t| t * 1000),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridges::config::usdc_address;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn supports_usdc_between_hop_chains_only() {
        let provider = HopProvider::new(Arc::new(MemoryCache::new()));
        let usdc_arb = usdc_address(Chain::Arbitrum).unwrap();

        assert!(provider
            .supports_route(Chain::Arbitrum, Chain::Optimism, usdc_arb)
            .await
            .unwrap());
        // Base has no Hop bridge in the table
        assert!(!provider
            .supports_route(Chain::Arbitrum, Chain::Base, usdc_arb)
            .await
            .unwrap());
        // Unknown token cannot be routed
        assert!(!provider
            .supports_route(Chain::Arbitrum, Chain::Optimism, "0xUnknownToken")
            .await
            .unwrap());
    }
}
