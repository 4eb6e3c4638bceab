use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::{cache_get, cache_set, Cache};
use crate::types::Chain;

use super::{
    AcrossProvider, BridgeError, BridgePriority, BridgeProvider, BridgeQuote, BridgeQuoteRequest,
    BridgeReceipt, BridgeTransaction, HopProvider, QuoteContext,
};

const CACHE_PREFIX: &str = "bridge:aggregator";

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Independent timeout applied to each provider call.
    pub provider_timeout_seconds: u64,
    /// How long a positive route-support answer is memoized.
    pub route_support_ttl_seconds: u64,
    /// How long a negative answer is memoized. Much shorter than the positive
    /// TTL so a transient provider outage does not blacklist a route for long.
    pub route_failure_ttl_seconds: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            provider_timeout_seconds: 10,
            route_support_ttl_seconds: 300,
            route_failure_ttl_seconds: 60,
        }
    }
}

/// Fans quote requests out to every registered provider, normalizes the
/// responses and picks a winner by the requested priority. Providers are
/// injected explicitly; registration order is the deterministic tie-breaker.
pub struct BridgeAggregator {
    providers: Vec<Arc<dyn BridgeProvider>>,
    cache: Arc<dyn Cache>,
    config: AggregatorConfig,
}

impl BridgeAggregator {
    pub fn new(
        providers: Vec<Arc<dyn BridgeProvider>>,
        cache: Arc<dyn Cache>,
        config: AggregatorConfig,
    ) -> Self {
        info!("Bridge aggregator initialized with {} providers", providers.len());
        Self {
            providers,
            cache,
            config,
        }
    }

    /// Standard provider set. Tests inject their own list via [`new`].
    pub fn with_default_providers(cache: Arc<dyn Cache>) -> Self {
        let providers: Vec<Arc<dyn BridgeProvider>> = vec![
            Arc::new(AcrossProvider::new(Arc::clone(&cache))),
            Arc::new(HopProvider::new(Arc::clone(&cache))),
        ];
        Self::new(providers, cache, AggregatorConfig::default())
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    fn provider(&self, name: &str) -> Option<&Arc<dyn BridgeProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Names of providers whose own support probe accepts this route.
    pub async fn supported_providers(
        &self,
        source_chain: Chain,
        destination_chain: Chain,
        token: &str,
    ) -> Vec<String> {
        let cache_key = format!(
            "{}:supported:{}:{}:{}",
            CACHE_PREFIX,
            source_chain,
            destination_chain,
            token.to_lowercase()
        );
        match cache_get::<Vec<String>>(self.cache.as_ref(), &cache_key).await {
            Ok(Some(cached)) => return cached,
            Ok(None) => {}
            Err(e) => warn!("Route support cache read failed: {}", e),
        }

        let per_call = Duration::from_secs(self.config.provider_timeout_seconds);
        let checks = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let token = token.to_string();
            async move {
                match timeout(per_call, provider.supports_route(source_chain, destination_chain, &token))
                    .await
                {
                    Ok(Ok(true)) => Some(provider.name().to_string()),
                    Ok(Ok(false)) => None,
                    Ok(Err(e)) => {
                        warn!("Provider {} route check failed: {}", provider.name(), e);
                        None
                    }
                    Err(_) => {
                        warn!("Provider {} route check timed out", provider.name());
                        None
                    }
                }
            }
        });

        let supported: Vec<String> = join_all(checks).await.into_iter().flatten().collect();

        let ttl = if supported.is_empty() {
            self.config.route_failure_ttl_seconds
        } else {
            self.config.route_support_ttl_seconds
        };
        if let Err(e) = cache_set(self.cache.as_ref(), &cache_key, &supported, ttl).await {
            warn!("Route support cache write failed: {}", e);
        }

        supported
    }

    /// A route is supported when at least one provider accepts it.
    pub async fn supports_route(
        &self,
        source_chain: Chain,
        destination_chain: Chain,
        token: &str,
    ) -> bool {
        !self
            .supported_providers(source_chain, destination_chain, token)
            .await
            .is_empty()
    }

    /// Concurrently quotes every supporting provider, each under its own
    /// timeout, and returns the usable candidates in registration order.
    async fn gather_candidates(&self, request: &BridgeQuoteRequest) -> Vec<QuoteContext> {
        let supported = self
            .supported_providers(request.source_chain, request.destination_chain, &request.source_token)
            .await;

        if supported.is_empty() {
            warn!(
                "No providers support route {} -> {}",
                request.source_chain, request.destination_chain
            );
            return Vec::new();
        }

        let per_call = Duration::from_secs(self.config.provider_timeout_seconds);
        let tasks = self
            .providers
            .iter()
            .filter(|p| supported.iter().any(|name| name == p.name()))
            .map(|provider| {
                let provider = Arc::clone(provider);
                let request = request.clone();
                async move {
                    match timeout(per_call, provider.get_quote(&request)).await {
                        Ok(Ok(Some(context))) => {
                            debug!(
                                "Provider {} quoted {} -> {}",
                                provider.name(),
                                context.quote.input_amount,
                                context.quote.output_amount
                            );
                            Some(context)
                        }
                        Ok(Ok(None)) => None,
                        Ok(Err(e)) => {
                            warn!("Provider {} quote failed: {}", provider.name(), e);
                            None
                        }
                        Err(_) => {
                            warn!("Provider {} quote timed out", provider.name());
                            None
                        }
                    }
                }
            });

        join_all(tasks).await.into_iter().flatten().collect()
    }

    /// Best quote for the request, or `None` when no provider produced a
    /// usable one. The winning quote and its provider context are cached
    /// under the quote id for the quote's remaining validity window.
    pub async fn get_quote(&self, request: &BridgeQuoteRequest) -> Option<BridgeQuote> {
        let candidates = self.gather_candidates(request).await;
        if candidates.is_empty() {
            return None;
        }

        let priority = request.priority.unwrap_or_default();
        let chosen = select_best_quote(priority, &candidates)?;
        let context = &candidates[chosen];

        let ttl = context.quote.remaining_ttl_seconds();
        if ttl > 0 {
            let key = format!("{}:quote:{}", CACHE_PREFIX, context.quote.quote_id);
            if let Err(e) = cache_set(self.cache.as_ref(), &key, context, ttl).await {
                warn!("Failed to cache quote context {}: {}", context.quote.quote_id, e);
            }
        } else {
            warn!(
                "Provider {} issued an already-expired quote {}",
                context.quote.provider, context.quote.quote_id
            );
        }

        info!(
            "Selected {} quote {} for {} -> {} ({} candidates)",
            context.quote.provider,
            context.quote.quote_id,
            request.source_chain,
            request.destination_chain,
            candidates.len()
        );
        Some(context.quote.clone())
    }

    /// Every usable quote, ordered by the requested priority.
    pub async fn get_all_quotes(&self, request: &BridgeQuoteRequest) -> Vec<BridgeQuote> {
        let candidates = self.gather_candidates(request).await;
        let priority = request.priority.unwrap_or_default();

        let mut quotes: Vec<BridgeQuote> = candidates.into_iter().map(|c| c.quote).collect();
        match priority {
            BridgePriority::Cost => quotes.sort_by(|a, b| {
                let net_a = a.output_amount.saturating_sub(a.fees.total_units());
                let net_b = b.output_amount.saturating_sub(b.fees.total_units());
                net_b.cmp(&net_a)
            }),
            BridgePriority::Speed => {
                quotes.sort_by_key(|q| q.estimated_time_seconds);
            }
        }
        quotes
    }

    /// Resolves a previously issued quote into a ready-to-sign transaction.
    /// Fails once the quote context has expired from the cache, forcing the
    /// caller to re-quote instead of signing a stale payload.
    pub async fn build_transaction(
        &self,
        quote: &BridgeQuote,
    ) -> Result<BridgeTransaction, BridgeError> {
        let key = format!("{}:quote:{}", CACHE_PREFIX, quote.quote_id);
        let context: QuoteContext = cache_get(self.cache.as_ref(), &key)
            .await
            .map_err(|e| BridgeError::Cache(e.to_string()))?
            .ok_or(BridgeError::QuoteExpired)?;

        let provider = self
            .provider(&context.quote.provider)
            .ok_or_else(|| BridgeError::ProviderUnavailable(context.quote.provider.clone()))?;

        provider.build_transaction(&context).await
    }

    /// Normalized status for a source transaction. A provider hint routes the
    /// query directly; otherwise every provider able to observe the chain is
    /// probed. Provider errors degrade to a best-effort pending receipt so a
    /// polling caller never breaks on a transient failure.
    pub async fn get_status(
        &self,
        source_tx_hash: &str,
        source_chain: Chain,
        provider_hint: Option<&str>,
    ) -> BridgeReceipt {
        if let Some(name) = provider_hint {
            return match self.provider(name) {
                Some(provider) => match provider.get_status(source_tx_hash, source_chain).await {
                    Ok(receipt) => receipt,
                    Err(e) => {
                        warn!("Provider {} status query failed: {}", name, e);
                        BridgeReceipt::pending(source_tx_hash, source_chain, Some(e.to_string()))
                    }
                },
                None => BridgeReceipt::pending(
                    source_tx_hash,
                    source_chain,
                    Some(format!("Provider {} not available", name)),
                ),
            };
        }

        let mut last_error = None;
        for provider in &self.providers {
            match provider.get_status(source_tx_hash, source_chain).await {
                Ok(receipt) if receipt.status != super::BridgeStatus::Pending => return receipt,
                Ok(_) => {}
                Err(e) => {
                    debug!("Provider {} has no status for {}: {}", provider.name(), source_tx_hash, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        BridgeReceipt::pending(source_tx_hash, source_chain, last_error)
    }
}

/// Picks the winning candidate for a priority. Pure so selection policy can
/// be tested without any network access. Ties go to the earliest-registered
/// provider (candidates arrive in registration order).
pub fn select_best_quote(priority: BridgePriority, candidates: &[QuoteContext]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let mut best = 0usize;
    for (i, candidate) in candidates.iter().enumerate().skip(1) {
        let better = match priority {
            BridgePriority::Cost => {
                let net = |c: &QuoteContext| {
                    c.quote
                        .output_amount
                        .saturating_sub(c.quote.fees.total_units())
                };
                net(candidate) > net(&candidates[best])
            }
            BridgePriority::Speed => {
                candidate.quote.estimated_time_seconds
                    < candidates[best].quote.estimated_time_seconds
            }
        };
        if better {
            best = i;
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridges::{BridgeRoute, FeeBreakdown};
    use crate::types::TokenInfo;
    use ethereum_types::U256;

    fn context(provider: &str, output: u64, fee: u64, time: u64) -> QuoteContext {
        let token = TokenInfo {
            address: "0x0000000000000000000000000000000000000001".into(),
            symbol: "USDC".into(),
            decimals: 6,
            chain: Chain::Base,
        };
        QuoteContext {
            quote: BridgeQuote {
                provider: provider.to_string(),
                source_chain: Chain::Arbitrum,
                destination_chain: Chain::Base,
                source_token: token.clone(),
                destination_token: token,
                input_amount: U256::from(output + fee),
                output_amount: U256::from(output),
                min_output_amount: U256::from(output),
                fees: FeeBreakdown {
                    bridge_fee: U256::from(fee),
                    gas_fee: U256::zero(),
                    relayer_fee: U256::zero(),
                    total_fee_usd: 0.0,
                },
                estimated_time_seconds: time,
                route: BridgeRoute {
                    steps: Vec::new(),
                    total_gas_estimate: U256::zero(),
                    requires_approval: false,
                    approval_address: None,
                },
                expires_at: crate::types::now_ms() + 300_000,
                quote_id: format!("{}-quote", provider),
                max_slippage: 0.005,
            },
            request: BridgeQuoteRequest {
                source_chain: Chain::Arbitrum,
                destination_chain: Chain::Base,
                source_token: "0x1".into(),
                destination_token: "0x2".into(),
                amount: U256::from(output + fee),
                sender: "0xsender".into(),
                recipient: "0xsender".into(),
                slippage: None,
                priority: None,
            },
            provider_data: serde_json::Value::Null,
        }
    }

    #[test]
    fn cost_priority_maximizes_net_output() {
        let candidates = vec![
            context("a", 1_000, 100, 60),   // net 900
            context("b", 1_050, 50, 600),   // net 1000
            context("c", 1_040, 100, 30),   // net 940
        ];
        assert_eq!(select_best_quote(BridgePriority::Cost, &candidates), Some(1));
    }

    #[test]
    fn speed_priority_minimizes_time() {
        let candidates = vec![
            context("a", 1_000, 100, 60),
            context("b", 1_050, 50, 600),
            context("c", 1_040, 100, 30),
        ];
        assert_eq!(select_best_quote(BridgePriority::Speed, &candidates), Some(2));
    }

    #[test]
    fn ties_break_by_registration_order() {
        let candidates = vec![
            context("first", 1_000, 100, 120),
            context("second", 1_000, 100, 120),
        ];
        assert_eq!(select_best_quote(BridgePriority::Cost, &candidates), Some(0));
        assert_eq!(select_best_quote(BridgePriority::Speed, &candidates), Some(0));
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert_eq!(select_best_quote(BridgePriority::Cost, &[]), None);
    }
}
