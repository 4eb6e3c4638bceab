use async_trait::async_trait;
use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Chain, TokenInfo};

pub mod abi;
pub mod across;
pub mod aggregator;
pub mod config;
pub mod hop;

pub use across::AcrossProvider;
pub use aggregator::{select_best_quote, AggregatorConfig, BridgeAggregator};
pub use hop::HopProvider;

/// Priority used when picking between competing bridge quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgePriority {
    /// Maximize output after fees.
    Cost,
    /// Minimize estimated completion time.
    Speed,
}

impl Default for BridgePriority {
    fn default() -> Self {
        BridgePriority::Cost
    }
}

/// Observed lifecycle of one bridge leg. Transitions only move toward a
/// terminal state (Completed, Failed, Refunded) and never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    Pending,
    Bridging,
    Completed,
    Failed,
    Refunded,
}

impl BridgeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BridgeStatus::Completed | BridgeStatus::Failed | BridgeStatus::Refunded
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeQuoteRequest {
    pub source_chain: Chain,
    pub destination_chain: Chain,
    pub source_token: String,
    pub destination_token: String,
    pub amount: U256,
    pub sender: String,
    pub recipient: String,
    pub slippage: Option<f64>,
    pub priority: Option<BridgePriority>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub bridge_fee: U256,
    pub gas_fee: U256,
    pub relayer_fee: U256,
    pub total_fee_usd: f64,
}

impl FeeBreakdown {
    /// Sum of all fee components in source-token units.
    pub fn total_units(&self) -> U256 {
        self.bridge_fee
            .saturating_add(self.gas_fee)
            .saturating_add(self.relayer_fee)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStep {
    pub protocol: String,
    pub chain: Chain,
    pub from_token: String,
    pub to_token: String,
    pub from_amount: U256,
    pub to_amount: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRoute {
    pub steps: Vec<RouteStep>,
    pub total_gas_estimate: U256,
    pub requires_approval: bool,
    pub approval_address: Option<String>,
}

/// Normalized quote shape every provider response is mapped into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeQuote {
    pub provider: String,
    pub source_chain: Chain,
    pub destination_chain: Chain,
    pub source_token: TokenInfo,
    pub destination_token: TokenInfo,
    pub input_amount: U256,
    pub output_amount: U256,
    pub min_output_amount: U256,
    pub fees: FeeBreakdown,
    pub estimated_time_seconds: u64,
    pub route: BridgeRoute,
    /// Absolute expiry, milliseconds since epoch.
    pub expires_at: i64,
    pub quote_id: String,
    pub max_slippage: f64,
}

impl BridgeQuote {
    /// Seconds of validity left on this quote, zero if already expired.
    pub fn remaining_ttl_seconds(&self) -> u64 {
        let remaining_ms = self.expires_at - crate::types::now_ms();
        if remaining_ms <= 0 {
            0
        } else {
            (remaining_ms / 1000) as u64
        }
    }
}

/// Applies a slippage tolerance (fraction) to an output amount, rounding the
/// reduction down in basis points.
pub fn apply_slippage(output_amount: U256, slippage: f64) -> U256 {
    let bps = U256::from((slippage * 10_000.0).floor() as u64);
    output_amount.saturating_sub(output_amount.saturating_mul(bps) / U256::from(10_000u64))
}

/// Pre-approval a spender needs before the bridge call can move tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequirement {
    pub token: String,
    pub spender: String,
    pub amount: U256,
}

/// Ready-to-sign transaction resolved from a still-valid quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTransaction {
    pub provider: String,
    pub quote_id: String,
    pub source_chain: Chain,
    pub destination_chain: Chain,
    pub to: String,
    pub data: String,
    pub value: U256,
    pub gas_limit: U256,
    pub approval: Option<ApprovalRequirement>,
}

/// On-chain progress for one bridge leg, normalized across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeReceipt {
    pub provider: String,
    pub status: BridgeStatus,
    pub source_tx_hash: String,
    pub source_chain: Chain,
    pub source_confirmations: u32,
    pub destination_tx_hash: Option<String>,
    pub destination_chain: Option<Chain>,
    pub destination_confirmations: Option<u32>,
    pub input_amount: U256,
    pub output_amount: Option<U256>,
    pub initiated_at: i64,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
}

impl BridgeReceipt {
    /// Best-effort receipt used when no provider can report progress yet.
    pub fn pending(source_tx_hash: &str, source_chain: Chain, error: Option<String>) -> Self {
        Self {
            provider: String::new(),
            status: BridgeStatus::Pending,
            source_tx_hash: source_tx_hash.to_string(),
            source_chain,
            source_confirmations: 0,
            destination_tx_hash: None,
            destination_chain: None,
            destination_confirmations: None,
            input_amount: U256::zero(),
            output_amount: None,
            initiated_at: crate::types::now_ms(),
            completed_at: None,
            error,
        }
    }
}

/// Everything needed to later build a transaction from a quote: the quote
/// itself, the request it answered and whatever provider-specific payload the
/// adapter stashed away (API responses, contract addresses).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteContext {
    pub quote: BridgeQuote,
    pub request: BridgeQuoteRequest,
    pub provider_data: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported route")]
    UnsupportedRoute,
    #[error("Amount too low to bridge")]
    AmountTooLow,
    #[error("Quote expired or not found")]
    QuoteExpired,
    #[error("Provider {0} not available")]
    ProviderUnavailable(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Cache error: {0}")]
    Cache(String),
}

/// Capability contract every bridge protocol adapter implements. The
/// aggregator depends only on this trait; concrete protocols register as
/// trait objects.
#[async_trait]
pub trait BridgeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this provider can move `token` from `source` to `destination`.
    /// May require a network round trip (e.g. fetching transfer limits).
    async fn supports_route(
        &self,
        source: Chain,
        destination: Chain,
        token: &str,
    ) -> Result<bool, BridgeError>;

    /// Quotes the route. `Ok(None)` means the provider has no route for this
    /// request; errors are isolated per provider by the aggregator.
    async fn get_quote(
        &self,
        request: &BridgeQuoteRequest,
    ) -> Result<Option<QuoteContext>, BridgeError>;

    /// Encodes the on-chain call from a previously issued quote context.
    /// Time-sensitive fields (fill deadlines) are recomputed from current
    /// time, not the original quote time.
    async fn build_transaction(
        &self,
        context: &QuoteContext,
    ) -> Result<BridgeTransaction, BridgeError>;

    /// Queries observed progress for a source transaction.
    async fn get_status(
        &self,
        source_tx_hash: &str,
        source_chain: Chain,
    ) -> Result<BridgeReceipt, BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_reduction_matches_quote_invariant() {
        let output = U256::from(1_000_000u64);
        let min = apply_slippage(output, 0.005);
        // output - min == output * slippage, within basis-point rounding
        assert_eq!(output - min, U256::from(5_000u64));

        let zero = apply_slippage(output, 0.0);
        assert_eq!(zero, output);
    }

    #[test]
    fn fee_total_saturates_instead_of_overflowing() {
        let fees = FeeBreakdown {
            bridge_fee: U256::MAX,
            gas_fee: U256::from(1u64),
            relayer_fee: U256::zero(),
            total_fee_usd: 0.0,
        };
        assert_eq!(fees.total_units(), U256::MAX);
    }

    #[test]
    fn terminal_statuses() {
        assert!(BridgeStatus::Completed.is_terminal());
        assert!(BridgeStatus::Failed.is_terminal());
        assert!(BridgeStatus::Refunded.is_terminal());
        assert!(!BridgeStatus::Pending.is_terminal());
        assert!(!BridgeStatus::Bridging.is_terminal());
    }
}
