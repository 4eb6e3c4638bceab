//! Orchestration façade over the optimizer, status tracker and cache.
//! Boundary methods always return a structured result instead of an error:
//! unexpected failures are caught here and surfaced with their message.

use ethereum_types::U256;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bridges::{BridgeAggregator, BridgePriority};
use crate::cache::{cache_get, cache_set, Cache};
use crate::types::{generate_id, now_ms};

use super::optimizer::ConsolidationOptimizer;
use super::status_tracker::StatusTracker;
use super::{
    ChainSimulation, ConsolidationExecuteRequest, ConsolidationExecuteResult, ConsolidationJobData,
    ConsolidationPlan, ConsolidationQuoteRequest, ConsolidationQuoteResult, ConsolidationSimulation,
    ConsolidationSource, ConsolidationStatusDetail, SimulationResult, TokenHolding,
};

const JOB_PREFIX: &str = "consolidation:job";

/// Extra wall-clock added on top of the slowest bridge leg when estimating
/// total completion time.
const TIME_BUFFER_SECONDS: u64 = 300;

/// Post-swap output estimate applied when typing request sources, matching
/// the optimizer's approximate swap fee.
const SWAP_OUTPUT_RATIO: f64 = 0.997;

#[derive(Debug, Clone)]
pub struct ConsolidationEngineConfig {
    /// Chains below this USD value are skipped with a warning.
    pub min_value_usd: f64,
    pub max_chains_per_consolidation: usize,
    pub default_priority: BridgePriority,
    /// Lifetime of a quoted plan.
    pub plan_ttl_seconds: u64,
    /// Lifetime of the plan and job descriptor once execution starts.
    pub execution_ttl_seconds: u64,
}

impl Default for ConsolidationEngineConfig {
    fn default() -> Self {
        Self {
            min_value_usd: 1.0,
            max_chains_per_consolidation: 10,
            default_priority: BridgePriority::Cost,
            plan_ttl_seconds: 30 * 60,
            execution_ttl_seconds: 3600,
        }
    }
}

pub struct ConsolidationEngine {
    config: ConsolidationEngineConfig,
    optimizer: ConsolidationOptimizer,
    status_tracker: StatusTracker,
    cache: Arc<dyn Cache>,
}

impl ConsolidationEngine {
    pub fn new(
        config: ConsolidationEngineConfig,
        aggregator: Arc<BridgeAggregator>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            config,
            optimizer: ConsolidationOptimizer::new(aggregator),
            status_tracker: StatusTracker::new(Arc::clone(&cache)),
            cache,
        }
    }

    /// Engine over the standard provider set.
    pub fn with_default_providers(cache: Arc<dyn Cache>) -> Self {
        let aggregator = Arc::new(BridgeAggregator::with_default_providers(Arc::clone(&cache)));
        Self::new(ConsolidationEngineConfig::default(), aggregator, cache)
    }

    /// Builds, prices and persists a consolidation plan for the request.
    pub async fn get_quote(&self, request: &ConsolidationQuoteRequest) -> ConsolidationQuoteResult {
        let mut warnings = Vec::new();
        match self.quote_inner(request, &mut warnings).await {
            Ok(result) => result,
            Err(e) => {
                error!("Quote generation failed: {:#}", e);
                ConsolidationQuoteResult::failure_with_warnings(e.to_string(), warnings)
            }
        }
    }

    async fn quote_inner(
        &self,
        request: &ConsolidationQuoteRequest,
        warnings: &mut Vec<String>,
    ) -> anyhow::Result<ConsolidationQuoteResult> {
        if let Err(message) = self.validate_request(request) {
            return Ok(ConsolidationQuoteResult::failure(message));
        }

        let sources = match Self::parse_request_sources(request) {
            Ok(sources) => sources,
            Err(message) => return Ok(ConsolidationQuoteResult::failure(message)),
        };

        let (viable, skipped): (Vec<ConsolidationSource>, Vec<ConsolidationSource>) = sources
            .into_iter()
            .partition(|s| s.total_value_usd >= self.config.min_value_usd);

        if viable.is_empty() {
            return Ok(ConsolidationQuoteResult::failure(format!(
                "No chains have sufficient value (minimum ${})",
                self.config.min_value_usd
            )));
        }
        if !skipped.is_empty() {
            let names: Vec<&str> = skipped.iter().map(|s| s.chain.as_str()).collect();
            warnings.push(format!(
                "Skipped {} chains with value below ${}: {}",
                skipped.len(),
                self.config.min_value_usd,
                names.join(", ")
            ));
        }

        let priority = request.priority.unwrap_or(self.config.default_priority);

        let optimization = self
            .optimizer
            .optimize(
                &viable,
                request.destination_chain,
                &request.destination_token,
                &request.user_address,
                priority,
            )
            .await;
        let chain_plans = self.optimizer.build_chain_plans(&viable, &optimization);

        if chain_plans.is_empty() {
            return Ok(ConsolidationQuoteResult::failure_with_warnings(
                "No viable consolidation routes found",
                warnings.clone(),
            ));
        }

        let total_input_value_usd: f64 = viable.iter().map(|s| s.total_value_usd).sum();
        let total_swap_fees_usd: f64 = chain_plans.iter().map(|cp| cp.swap_fee_usd).sum();
        let total_bridge_fees_usd: f64 = chain_plans
            .iter()
            .filter_map(|cp| cp.bridge.as_ref())
            .map(|b| b.fee_usd)
            .sum();
        let total_gas_fees_usd: f64 = chain_plans.iter().map(|cp| cp.swap_gas_estimate_usd).sum();
        let total_fees_usd = total_swap_fees_usd + total_bridge_fees_usd + total_gas_fees_usd;
        let expected_output_value_usd: f64 =
            chain_plans.iter().map(|cp| cp.expected_output_usd).sum();

        let fee_percentage = if total_input_value_usd > 0.0 {
            total_fees_usd / total_input_value_usd * 100.0
        } else {
            0.0
        };

        let estimated_total_time_seconds = chain_plans
            .iter()
            .filter_map(|cp| cp.bridge.as_ref())
            .map(|b| b.estimated_time_seconds)
            .max()
            .unwrap_or(0)
            + TIME_BUFFER_SECONDS;

        let created_at = now_ms();
        let plan = ConsolidationPlan {
            id: generate_id("plan"),
            user_id: request.user_id.clone(),
            user_address: request.user_address.clone(),
            sources: viable,
            chain_plans,
            destination_chain: request.destination_chain,
            destination_token: request.destination_token.clone(),
            total_input_value_usd,
            total_swap_fees_usd,
            total_bridge_fees_usd,
            total_gas_fees_usd,
            total_fees_usd,
            expected_output_value_usd,
            fee_percentage,
            estimated_total_time_seconds,
            created_at,
            expires_at: created_at + (self.config.plan_ttl_seconds as i64) * 1000,
            optimization_strategy: priority,
        };

        self.status_tracker.store_plan(&plan).await?;

        let profitability = self.optimizer.is_profitable(
            total_input_value_usd,
            expected_output_value_usd,
            total_fees_usd,
        );
        if !profitability.profitable {
            warnings.push(format!(
                "Low profitability: only {:.1}% of input value expected as output",
                profitability.ratio * 100.0
            ));
        }

        info!(
            "Quote {} generated: ${:.2} -> ${:.2} ({:.1}% fees)",
            plan.id, total_input_value_usd, expected_output_value_usd, fee_percentage
        );

        Ok(ConsolidationQuoteResult {
            success: true,
            plan: Some(plan),
            error: None,
            warnings: if warnings.is_empty() {
                None
            } else {
                Some(warnings.clone())
            },
        })
    }

    /// Dispatches a quoted plan: mints an execution id, seeds status tracking,
    /// extends the plan's lifetime and caches the job descriptor for the
    /// external worker. Returns without waiting for any bridging to happen.
    pub async fn execute(
        &self,
        request: &ConsolidationExecuteRequest,
    ) -> ConsolidationExecuteResult {
        match self.execute_inner(request).await {
            Ok(result) => result,
            Err(e) => {
                error!("Execution failed: {:#}", e);
                ConsolidationExecuteResult::failure(e.to_string())
            }
        }
    }

    async fn execute_inner(
        &self,
        request: &ConsolidationExecuteRequest,
    ) -> anyhow::Result<ConsolidationExecuteResult> {
        let Some(plan) = self.status_tracker.get_plan(&request.plan_id).await? else {
            return Ok(ConsolidationExecuteResult::failure(
                "Consolidation plan not found or expired",
            ));
        };

        if plan.expires_at < now_ms() {
            return Ok(ConsolidationExecuteResult::failure(
                "Consolidation plan has expired. Please get a new quote.",
            ));
        }
        if plan.user_id != request.user_id {
            return Ok(ConsolidationExecuteResult::failure("User ID mismatch"));
        }

        let consolidation_id = generate_id("cons");
        let status = self
            .status_tracker
            .initialize_status(&plan, &consolidation_id)
            .await?;

        self.status_tracker
            .extend_plan_ttl(&request.plan_id, self.config.execution_ttl_seconds)
            .await?;

        let job_data = ConsolidationJobData {
            consolidation_id: consolidation_id.clone(),
            plan_id: request.plan_id.clone(),
            user_id: request.user_id.clone(),
            user_address: request.user_address.clone(),
            chain_plans: plan.chain_plans.clone(),
            destination_chain: plan.destination_chain,
            destination_token: plan.destination_token.clone(),
            permit_signatures: request.permit_signatures.clone(),
        };
        cache_set(
            self.cache.as_ref(),
            &format!("{}:{}", JOB_PREFIX, consolidation_id),
            &job_data,
            self.config.execution_ttl_seconds,
        )
        .await?;

        info!(
            "Consolidation {} initialized with {} chains",
            consolidation_id,
            plan.chain_plans.len()
        );

        Ok(ConsolidationExecuteResult {
            success: true,
            consolidation_id: Some(consolidation_id),
            status: Some(status),
            error: None,
        })
    }

    pub async fn get_status(&self, consolidation_id: &str) -> Option<ConsolidationStatusDetail> {
        match self.status_tracker.get_status(consolidation_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Status lookup failed for {}: {}", consolidation_id, e);
                None
            }
        }
    }

    pub async fn get_user_history(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Vec<ConsolidationStatusDetail> {
        match self
            .status_tracker
            .get_user_history(user_id, limit, offset)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!("History lookup failed for {}: {}", user_id, e);
                Vec::new()
            }
        }
    }

    pub async fn get_plan(&self, plan_id: &str) -> Option<ConsolidationPlan> {
        match self.status_tracker.get_plan(plan_id).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Plan lookup failed for {}: {}", plan_id, e);
                None
            }
        }
    }

    pub async fn get_job_data(&self, consolidation_id: &str) -> Option<ConsolidationJobData> {
        let key = format!("{}:{}", JOB_PREFIX, consolidation_id);
        match cache_get(self.cache.as_ref(), &key).await {
            Ok(job) => job,
            Err(e) => {
                warn!("Job data lookup failed for {}: {}", consolidation_id, e);
                None
            }
        }
    }

    /// Dry-run view of a quote: per chain, whether a swap and bridge route
    /// look available. Mutates no execution state beyond the quote itself.
    pub async fn simulate(&self, request: &ConsolidationQuoteRequest) -> SimulationResult {
        let quote = self.get_quote(request).await;
        let Some(plan) = quote.plan else {
            return SimulationResult {
                success: false,
                simulation: None,
                error: quote.error,
            };
        };

        let chains: Vec<ChainSimulation> = plan
            .chain_plans
            .iter()
            .map(|cp| ChainSimulation {
                chain: cp.chain,
                can_swap: true,
                can_bridge: cp.bridge.is_some() || cp.chain == plan.destination_chain,
                estimated_output_usd: cp.expected_output_usd,
                errors: Vec::new(),
            })
            .collect();
        let all_routes_available = chains.iter().all(|c| c.can_swap && c.can_bridge);

        SimulationResult {
            success: true,
            simulation: Some(ConsolidationSimulation {
                chains,
                total_expected_output: plan.expected_output_value_usd,
                all_routes_available,
            }),
            error: None,
        }
    }

    /// Structural checks, all performed before any network call.
    fn validate_request(&self, request: &ConsolidationQuoteRequest) -> Result<(), String> {
        if request.sources.is_empty() {
            return Err("No source chains provided".into());
        }
        if request.sources.len() > self.config.max_chains_per_consolidation {
            return Err(format!(
                "Too many source chains: {} > {}",
                request.sources.len(),
                self.config.max_chains_per_consolidation
            ));
        }
        if request.destination_token.is_empty() {
            return Err("Destination token is required".into());
        }
        if request.user_address.is_empty() {
            return Err("User address is required".into());
        }
        for source in &request.sources {
            if source.tokens.is_empty() {
                return Err(format!("No tokens provided for chain {}", source.chain));
            }
        }
        Ok(())
    }

    fn parse_request_sources(
        request: &ConsolidationQuoteRequest,
    ) -> Result<Vec<ConsolidationSource>, String> {
        request
            .sources
            .iter()
            .map(|source| {
                let tokens = source
                    .tokens
                    .iter()
                    .map(|t| {
                        let amount = U256::from_dec_str(&t.amount).map_err(|_| {
                            format!(
                                "Invalid amount {} for token {} on {}",
                                t.amount, t.symbol, source.chain
                            )
                        })?;
                        Ok(TokenHolding {
                            address: t.address.clone(),
                            symbol: t.symbol.clone(),
                            decimals: t.decimals,
                            amount,
                            value_usd: t.value_usd,
                        })
                    })
                    .collect::<Result<Vec<TokenHolding>, String>>()?;

                let total_value_usd: f64 = tokens.iter().map(|t| t.value_usd).sum();
                Ok(ConsolidationSource {
                    chain: source.chain,
                    tokens,
                    total_value_usd,
                    estimated_output_usd: total_value_usd * SWAP_OUTPUT_RATIO,
                    needs_bridge: source.chain != request.destination_chain,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::consolidation::{RequestSource, RequestToken};
    use crate::types::Chain;

    fn engine() -> ConsolidationEngine {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let aggregator = Arc::new(BridgeAggregator::new(
            Vec::new(),
            Arc::clone(&cache),
            Default::default(),
        ));
        ConsolidationEngine::new(ConsolidationEngineConfig::default(), aggregator, cache)
    }

    fn request(sources: Vec<RequestSource>) -> ConsolidationQuoteRequest {
        ConsolidationQuoteRequest {
            user_id: "user-1".into(),
            user_address: "0xabc0000000000000000000000000000000000001".into(),
            sources,
            destination_chain: Chain::Base,
            destination_token: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".into(),
            priority: None,
        }
    }

    fn token(value_usd: f64) -> RequestToken {
        RequestToken {
            address: "0x1111111111111111111111111111111111111111".into(),
            symbol: "DUST".into(),
            decimals: 18,
            amount: "1000000000000000000".into(),
            value_usd,
        }
    }

    #[test]
    fn validation_rejects_structural_problems() {
        let engine = engine();

        assert_eq!(
            engine.validate_request(&request(Vec::new())),
            Err("No source chains provided".into())
        );

        let many: Vec<RequestSource> = (0..11)
            .map(|_| RequestSource {
                chain: Chain::Polygon,
                tokens: vec![token(5.0)],
            })
            .collect();
        assert!(engine
            .validate_request(&request(many))
            .unwrap_err()
            .starts_with("Too many source chains"));

        let empty_tokens = request(vec![RequestSource {
            chain: Chain::Polygon,
            tokens: Vec::new(),
        }]);
        assert_eq!(
            engine.validate_request(&empty_tokens),
            Err("No tokens provided for chain polygon".into())
        );

        let mut missing_user = request(vec![RequestSource {
            chain: Chain::Polygon,
            tokens: vec![token(5.0)],
        }]);
        missing_user.user_address = String::new();
        assert_eq!(
            engine.validate_request(&missing_user),
            Err("User address is required".into())
        );
    }

    #[test]
    fn source_parsing_rejects_bad_amounts() {
        let mut req = request(vec![RequestSource {
            chain: Chain::Polygon,
            tokens: vec![token(5.0)],
        }]);
        req.sources[0].tokens[0].amount = "not-a-number".into();
        let err = ConsolidationEngine::parse_request_sources(&req).unwrap_err();
        assert!(err.starts_with("Invalid amount"));
    }

    #[test]
    fn source_parsing_totals_and_flags_bridging() {
        let req = request(vec![
            RequestSource {
                chain: Chain::Base,
                tokens: vec![token(30.0), token(20.0)],
            },
            RequestSource {
                chain: Chain::Polygon,
                tokens: vec![token(5.0)],
            },
        ]);
        let sources = ConsolidationEngine::parse_request_sources(&req).unwrap();
        assert_eq!(sources.len(), 2);
        assert!((sources[0].total_value_usd - 50.0).abs() < 1e-9);
        assert!(!sources[0].needs_bridge);
        assert!(sources[1].needs_bridge);
        assert!((sources[1].estimated_output_usd - 4.985).abs() < 1e-9);
    }
}
