use ethereum_types::U256;
use serde::{Deserialize, Serialize};

use crate::bridges::{BridgePriority, BridgeQuote, BridgeStatus};
use crate::types::Chain;

pub mod engine;
pub mod optimizer;
pub mod status_tracker;

pub use engine::{ConsolidationEngine, ConsolidationEngineConfig};
pub use optimizer::{ConsolidationOptimizer, OptimizationResult, Profitability};
pub use status_tracker::StatusTracker;

/// Aggregate state of a dispatched consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStatus {
    Pending,
    Executing,
    Completed,
    PartialSuccess,
    Failed,
}

/// Per-chain leg state. Same-chain legs skip the bridging stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainOperationStatus {
    Pending,
    Swapping,
    SwapComplete,
    Bridging,
    BridgeComplete,
    Completed,
    Skipped,
    Failed,
}

impl ChainOperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChainOperationStatus::Completed
                | ChainOperationStatus::Skipped
                | ChainOperationStatus::Failed
        )
    }
}

/// One dust token on a source chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenHolding {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    pub amount: U256,
    pub value_usd: f64,
}

/// One chain's dust, with the values the optimizer works from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationSource {
    pub chain: Chain,
    pub tokens: Vec<TokenHolding>,
    pub total_value_usd: f64,
    pub estimated_output_usd: f64,
    pub needs_bridge: bool,
}

/// Bridge leg attached to a chain plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBridgePlan {
    pub provider: String,
    pub quote: BridgeQuote,
    pub fee_usd: f64,
    pub estimated_time_seconds: u64,
}

/// One chain's contribution to the overall plan. `bridge` is absent when the
/// chain already holds the destination token's chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConsolidationPlan {
    pub chain: Chain,
    pub swap_input_value_usd: f64,
    pub swap_fee_usd: f64,
    pub swap_gas_estimate_usd: f64,
    pub bridge: Option<ChainBridgePlan>,
    pub expected_output_usd: f64,
}

/// The full, costed, multi-chain consolidation route before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationPlan {
    pub id: String,
    pub user_id: String,
    pub user_address: String,
    pub sources: Vec<ConsolidationSource>,
    pub chain_plans: Vec<ChainConsolidationPlan>,
    pub destination_chain: Chain,
    pub destination_token: String,
    pub total_input_value_usd: f64,
    pub total_swap_fees_usd: f64,
    pub total_bridge_fees_usd: f64,
    pub total_gas_fees_usd: f64,
    pub total_fees_usd: f64,
    pub expected_output_value_usd: f64,
    pub fee_percentage: f64,
    pub estimated_total_time_seconds: u64,
    pub created_at: i64,
    pub expires_at: i64,
    pub optimization_strategy: BridgePriority,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestToken {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    /// Raw integer amount as a decimal string; on-chain amounts exceed u64.
    pub amount: String,
    pub value_usd: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSource {
    pub chain: Chain,
    pub tokens: Vec<RequestToken>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationQuoteRequest {
    pub user_id: String,
    pub user_address: String,
    pub sources: Vec<RequestSource>,
    pub destination_chain: Chain,
    pub destination_token: String,
    #[serde(default)]
    pub priority: Option<BridgePriority>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationQuoteResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ConsolidationPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

impl ConsolidationQuoteResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            plan: None,
            error: Some(error.into()),
            warnings: None,
        }
    }

    pub fn failure_with_warnings(error: impl Into<String>, warnings: Vec<String>) -> Self {
        Self {
            success: false,
            plan: None,
            error: Some(error.into()),
            warnings: if warnings.is_empty() {
                None
            } else {
                Some(warnings)
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationExecuteRequest {
    pub plan_id: String,
    pub user_id: String,
    pub user_address: String,
    #[serde(default)]
    pub permit_signatures: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationExecuteResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consolidation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConsolidationStatusDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConsolidationExecuteResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            consolidation_id: None,
            status: None,
            error: Some(error.into()),
        }
    }
}

/// Stage a chain operation failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStage {
    Swap,
    Bridge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainOperationError {
    pub chain: Chain,
    pub stage: OperationStage,
    pub error: String,
}

/// Live view of one chain's leg during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainOperationDetail {
    pub chain: Chain,
    pub status: ChainOperationStatus,
    pub input_value_usd: f64,
    #[serde(default)]
    pub swap_tx_hash: Option<String>,
    #[serde(default)]
    pub swap_confirmed: bool,
    #[serde(default)]
    pub bridge_tx_hash: Option<String>,
    #[serde(default)]
    pub bridge_provider: Option<String>,
    #[serde(default)]
    pub bridge_status: Option<BridgeStatus>,
    #[serde(default)]
    pub bridge_destination_tx_hash: Option<String>,
    #[serde(default)]
    pub output_amount: Option<U256>,
    #[serde(default)]
    pub output_value_usd: Option<f64>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChainOperationDetail {
    pub fn pending(chain: Chain, input_value_usd: f64) -> Self {
        Self {
            chain,
            status: ChainOperationStatus::Pending,
            input_value_usd,
            swap_tx_hash: None,
            swap_confirmed: false,
            bridge_tx_hash: None,
            bridge_provider: None,
            bridge_status: None,
            bridge_destination_tx_hash: None,
            output_amount: None,
            output_value_usd: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Execution-time status keyed by the consolidation id (distinct from the
/// plan id it was minted from).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationStatusDetail {
    pub id: String,
    pub user_id: String,
    pub status: ConsolidationStatus,
    pub chain_operations: Vec<ChainOperationDetail>,
    pub completed_chains: usize,
    pub total_chains: usize,
    pub progress_percent: u8,
    pub total_input_value_usd: f64,
    pub total_output_value_usd: f64,
    pub actual_fees_usd: f64,
    #[serde(default)]
    pub final_output_amount: Option<U256>,
    pub destination_chain: Chain,
    pub destination_token: String,
    pub created_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    pub errors: Vec<ChainOperationError>,
}

/// Job descriptor handed to the external worker through the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationJobData {
    pub consolidation_id: String,
    pub plan_id: String,
    pub user_id: String,
    pub user_address: String,
    pub chain_plans: Vec<ChainConsolidationPlan>,
    pub destination_chain: Chain,
    pub destination_token: String,
    #[serde(default)]
    pub permit_signatures: Option<Vec<String>>,
}

/// Per-chain view of a dry run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSimulation {
    pub chain: Chain,
    pub can_swap: bool,
    pub can_bridge: bool,
    pub estimated_output_usd: f64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationSimulation {
    pub chains: Vec<ChainSimulation>,
    pub total_expected_output: f64,
    pub all_routes_available: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<ConsolidationSimulation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Event appended to an execution's capped event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub consolidation_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<Chain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: i64,
}
