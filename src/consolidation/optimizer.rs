//! Per-chain route selection for a consolidation. Chains are optimized
//! independently (greedy per leg); there is deliberately no cross-chain
//! trade-off search.

use ethereum_types::U256;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::bridges::config::{known_token_symbol, usdc_address};
use crate::bridges::{BridgeAggregator, BridgePriority, BridgeQuote, BridgeQuoteRequest};
use crate::types::Chain;

use super::{ChainBridgePlan, ChainConsolidationPlan, ConsolidationSource};

/// Approximate DEX fee applied to a chain's dust swap. Actual swap routing is
/// an external collaborator, so the cost is estimated rather than quoted.
const SWAP_FEE_RATIO: f64 = 0.003;

/// Output/input ratio below which a plan is flagged as low-profitability.
const PROFITABILITY_THRESHOLD: f64 = 0.9;

/// Typical USD cost of the swap transaction on each chain.
pub fn estimated_gas_usd(chain: Chain) -> f64 {
    match chain {
        Chain::Ethereum => 15.0,
        Chain::Bsc => 0.2,
        Chain::Arbitrum | Chain::Linea => 0.1,
        Chain::Base | Chain::Optimism => 0.05,
        Chain::Polygon => 0.01,
    }
}

/// Routing decisions for one optimization pass.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Same-chain legs first, then bridging legs by ascending gas cost.
    pub execution_order: Vec<Chain>,
    pub strategy: BridgePriority,
    pub routes: HashMap<Chain, BridgeQuote>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profitability {
    pub profitable: bool,
    pub ratio: f64,
    pub net_value_usd: f64,
}

pub struct ConsolidationOptimizer {
    aggregator: Arc<BridgeAggregator>,
}

impl ConsolidationOptimizer {
    pub fn new(aggregator: Arc<BridgeAggregator>) -> Self {
        Self { aggregator }
    }

    /// Picks the best bridge route for every chain that needs one. Route
    /// lookups run concurrently; a chain with no viable route simply has no
    /// entry in `routes`.
    pub async fn optimize(
        &self,
        sources: &[ConsolidationSource],
        destination_chain: Chain,
        destination_token: &str,
        user_address: &str,
        priority: BridgePriority,
    ) -> OptimizationResult {
        let lookups = sources
            .iter()
            .filter(|s| s.needs_bridge)
            .filter_map(|source| {
                let request = self.bridge_request(
                    source,
                    destination_chain,
                    destination_token,
                    user_address,
                    priority,
                )?;
                Some(async move {
                    let quote = self.aggregator.get_quote(&request).await;
                    (request.source_chain, quote)
                })
            });

        let mut routes = HashMap::new();
        for (chain, quote) in join_all(lookups).await {
            match quote {
                Some(quote) => {
                    debug!(
                        "Route for {}: {} in {}s",
                        chain, quote.provider, quote.estimated_time_seconds
                    );
                    routes.insert(chain, quote);
                }
                None => debug!("No route from {} to {}", chain, destination_chain),
            }
        }

        let mut same_chain: Vec<Chain> = sources
            .iter()
            .filter(|s| !s.needs_bridge)
            .map(|s| s.chain)
            .collect();
        let mut bridging: Vec<Chain> = sources
            .iter()
            .filter(|s| s.needs_bridge && routes.contains_key(&s.chain))
            .map(|s| s.chain)
            .collect();
        bridging.sort_by(|a, b| {
            estimated_gas_usd(*a)
                .partial_cmp(&estimated_gas_usd(*b))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        same_chain.extend(bridging);

        info!(
            "Optimized {} chains: {} routed, order {:?}",
            sources.len(),
            routes.len(),
            same_chain
        );

        OptimizationResult {
            execution_order: same_chain,
            strategy: priority,
            routes,
        }
    }

    /// Quote request for the asset a chain's dust ends up in before bridging.
    /// When the dominant holding is already a bridgeable token it is routed
    /// directly with its raw amount; otherwise the dust is swapped into the
    /// source chain's USDC first and the post-swap USD estimate is routed.
    fn bridge_request(
        &self,
        source: &ConsolidationSource,
        destination_chain: Chain,
        destination_token: &str,
        user_address: &str,
        priority: BridgePriority,
    ) -> Option<BridgeQuoteRequest> {
        let dominant = source.tokens.iter().max_by(|a, b| {
            a.value_usd
                .partial_cmp(&b.value_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;

        let (source_token, amount) =
            if known_token_symbol(source.chain, &dominant.address).is_some() {
                (dominant.address.clone(), dominant.amount)
            } else {
                let usdc = usdc_address(source.chain)?;
                let units = (source.estimated_output_usd * 1e6) as u64;
                (usdc.to_string(), U256::from(units))
            };

        if amount.is_zero() {
            return None;
        }

        Some(BridgeQuoteRequest {
            source_chain: source.chain,
            destination_chain,
            source_token,
            destination_token: destination_token.to_string(),
            amount,
            sender: user_address.to_string(),
            recipient: user_address.to_string(),
            slippage: None,
            priority: Some(priority),
        })
    }

    /// Assembles each chain's plan fragment from its routing decision. Chains
    /// that need a bridge but got no route are omitted; whether an empty
    /// result is fatal is the engine's call.
    pub fn build_chain_plans(
        &self,
        sources: &[ConsolidationSource],
        optimization: &OptimizationResult,
    ) -> Vec<ChainConsolidationPlan> {
        sources
            .iter()
            .filter_map(|source| {
                let bridge = if source.needs_bridge {
                    match optimization.routes.get(&source.chain) {
                        Some(quote) => Some(ChainBridgePlan {
                            provider: quote.provider.clone(),
                            fee_usd: quote.fees.total_fee_usd,
                            estimated_time_seconds: quote.estimated_time_seconds,
                            quote: quote.clone(),
                        }),
                        None => {
                            debug!("Omitting {}: no viable bridge route", source.chain);
                            return None;
                        }
                    }
                } else {
                    None
                };

                let swap_fee_usd = source.total_value_usd * SWAP_FEE_RATIO;
                let bridge_fee_usd = bridge.as_ref().map(|b| b.fee_usd).unwrap_or(0.0);
                let expected_output_usd =
                    (source.total_value_usd - swap_fee_usd - bridge_fee_usd).max(0.0);

                Some(ChainConsolidationPlan {
                    chain: source.chain,
                    swap_input_value_usd: source.total_value_usd,
                    swap_fee_usd,
                    swap_gas_estimate_usd: estimated_gas_usd(source.chain),
                    bridge,
                    expected_output_usd,
                })
            })
            .collect()
    }

    /// A ratio below the threshold is flagged, not blocked; it becomes a
    /// user-facing warning.
    pub fn is_profitable(
        &self,
        total_input_usd: f64,
        expected_output_usd: f64,
        total_fees_usd: f64,
    ) -> Profitability {
        let ratio = if total_input_usd > 0.0 {
            expected_output_usd / total_input_usd
        } else {
            0.0
        };
        Profitability {
            profitable: ratio > PROFITABILITY_THRESHOLD,
            ratio,
            net_value_usd: expected_output_usd - total_fees_usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridges::{BridgeRoute, FeeBreakdown};
    use crate::cache::MemoryCache;
    use crate::types::TokenInfo;

    fn optimizer() -> ConsolidationOptimizer {
        let cache = Arc::new(MemoryCache::new());
        let aggregator = Arc::new(BridgeAggregator::new(
            Vec::new(),
            cache,
            Default::default(),
        ));
        ConsolidationOptimizer::new(aggregator)
    }

    fn source(chain: Chain, value_usd: f64, needs_bridge: bool) -> ConsolidationSource {
        ConsolidationSource {
            chain,
            tokens: vec![super::super::TokenHolding {
                address: "0x1111111111111111111111111111111111111111".into(),
                symbol: "DUST".into(),
                decimals: 18,
                amount: U256::from(1_000_000u64),
                value_usd,
            }],
            total_value_usd: value_usd,
            estimated_output_usd: value_usd * 0.997,
            needs_bridge,
        }
    }

    fn quote(chain: Chain, fee_usd: f64, time: u64) -> BridgeQuote {
        let token = TokenInfo {
            address: "0x2222222222222222222222222222222222222222".into(),
            symbol: "USDC".into(),
            decimals: 6,
            chain,
        };
        BridgeQuote {
            provider: "mock".into(),
            source_chain: chain,
            destination_chain: Chain::Base,
            source_token: token.clone(),
            destination_token: token,
            input_amount: U256::from(50_000_000u64),
            output_amount: U256::from(49_000_000u64),
            min_output_amount: U256::from(48_000_000u64),
            fees: FeeBreakdown {
                bridge_fee: U256::from(1_000_000u64),
                gas_fee: U256::zero(),
                relayer_fee: U256::zero(),
                total_fee_usd: fee_usd,
            },
            estimated_time_seconds: time,
            route: BridgeRoute {
                steps: Vec::new(),
                total_gas_estimate: U256::zero(),
                requires_approval: false,
                approval_address: None,
            },
            expires_at: crate::types::now_ms() + 300_000,
            quote_id: format!("mock-{}", chain),
            max_slippage: 0.005,
        }
    }

    #[test]
    fn profitability_fixtures() {
        let opt = optimizer();

        let good = opt.is_profitable(100.0, 95.0, 3.0);
        assert!(good.profitable);
        assert!((good.ratio - 0.95).abs() < 1e-9);
        assert!((good.net_value_usd - 92.0).abs() < 1e-9);

        let bad = opt.is_profitable(10.0, 7.0, 5.0);
        assert!(!bad.profitable);

        let empty = opt.is_profitable(0.0, 0.0, 0.0);
        assert!(!empty.profitable);
        assert_eq!(empty.ratio, 0.0);
    }

    #[test]
    fn chain_plans_price_in_swap_and_bridge_fees() {
        let opt = optimizer();
        let sources = vec![source(Chain::Base, 50.0, false), source(Chain::Polygon, 20.0, true)];
        let optimization = OptimizationResult {
            execution_order: vec![Chain::Base, Chain::Polygon],
            strategy: BridgePriority::Cost,
            routes: HashMap::from([(Chain::Polygon, quote(Chain::Polygon, 0.4, 120))]),
        };

        let plans = opt.build_chain_plans(&sources, &optimization);
        assert_eq!(plans.len(), 2);

        let base = plans.iter().find(|p| p.chain == Chain::Base).unwrap();
        assert!(base.bridge.is_none());
        assert!((base.swap_fee_usd - 0.15).abs() < 1e-9);
        assert!((base.expected_output_usd - 49.85).abs() < 1e-9);

        let polygon = plans.iter().find(|p| p.chain == Chain::Polygon).unwrap();
        assert_eq!(polygon.bridge.as_ref().unwrap().provider, "mock");
        assert!((polygon.expected_output_usd - (20.0 - 0.06 - 0.4)).abs() < 1e-9);
    }

    #[test]
    fn chains_without_routes_are_omitted() {
        let opt = optimizer();
        let sources = vec![source(Chain::Polygon, 20.0, true)];
        let optimization = OptimizationResult {
            execution_order: Vec::new(),
            strategy: BridgePriority::Cost,
            routes: HashMap::new(),
        };
        assert!(opt.build_chain_plans(&sources, &optimization).is_empty());
    }

    #[tokio::test]
    async fn execution_order_puts_same_chain_first_then_cheapest_gas() {
        let opt = optimizer();
        // No providers registered, so bridging chains get no routes and the
        // order only contains the same-chain legs.
        let sources = vec![
            source(Chain::Ethereum, 30.0, true),
            source(Chain::Base, 50.0, false),
        ];
        let result = opt
            .optimize(&sources, Chain::Base, "0xdest", "0xuser", BridgePriority::Cost)
            .await;
        assert_eq!(result.execution_order, vec![Chain::Base]);
        assert!(result.routes.is_empty());
    }

    #[test]
    fn gas_table_orders_chains_as_expected() {
        assert!(estimated_gas_usd(Chain::Polygon) < estimated_gas_usd(Chain::Base));
        assert!(estimated_gas_usd(Chain::Base) < estimated_gas_usd(Chain::Arbitrum));
        assert!(estimated_gas_usd(Chain::Arbitrum) < estimated_gas_usd(Chain::Ethereum));
    }
}
