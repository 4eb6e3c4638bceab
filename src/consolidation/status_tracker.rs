//! Cache-backed store for consolidation plans, execution status and the
//! per-execution event log. TTL expiry is the only destruction mechanism;
//! there is no explicit delete path.

use ethereum_types::U256;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{cache_get, cache_set, Cache};
use crate::types::{now_ms, Chain};

use super::{
    ChainOperationDetail, ChainOperationError, ChainOperationStatus, ConsolidationEvent,
    ConsolidationPlan, ConsolidationStatus, ConsolidationStatusDetail, OperationStage,
};

const STATUS_PREFIX: &str = "consolidation:status";
const PLAN_PREFIX: &str = "consolidation:plan";
const EVENTS_PREFIX: &str = "consolidation:events";
const USER_PREFIX: &str = "consolidation:user";

const STATUS_TTL_SECONDS: u64 = 7 * 24 * 3600;
const PLAN_TTL_SECONDS: u64 = 30 * 60;
const EVENTS_TTL_SECONDS: u64 = 24 * 3600;
const USER_HISTORY_TTL_SECONDS: u64 = 90 * 24 * 3600;

const MAX_EVENTS: usize = 100;
const MAX_HISTORY_ENTRIES: usize = 500;

/// Aggregate state derived from the per-chain operations.
pub fn derive_overall_status(operations: &[ChainOperationDetail]) -> ConsolidationStatus {
    let has_active = operations.iter().any(|op| {
        matches!(
            op.status,
            ChainOperationStatus::Swapping | ChainOperationStatus::Bridging
        )
    });
    let has_failed = operations
        .iter()
        .any(|op| op.status == ChainOperationStatus::Failed);
    let all_terminal = operations.iter().all(|op| op.status.is_terminal());
    let all_pending = operations
        .iter()
        .all(|op| op.status == ChainOperationStatus::Pending);

    if all_pending {
        return ConsolidationStatus::Pending;
    }
    if has_active {
        return ConsolidationStatus::Executing;
    }
    if all_terminal {
        if has_failed {
            let succeeded = operations.iter().any(|op| {
                matches!(
                    op.status,
                    ChainOperationStatus::Completed | ChainOperationStatus::Skipped
                )
            });
            return if succeeded {
                ConsolidationStatus::PartialSuccess
            } else {
                ConsolidationStatus::Failed
            };
        }
        return ConsolidationStatus::Completed;
    }
    ConsolidationStatus::Executing
}

/// Floor of the mean per-chain progress. Failed legs count as done so a
/// partially failed run still reaches 100.
pub fn calculate_progress(operations: &[ChainOperationDetail]) -> u8 {
    if operations.is_empty() {
        return 100;
    }
    let total: u32 = operations
        .iter()
        .map(|op| match op.status {
            ChainOperationStatus::Pending => 0u32,
            ChainOperationStatus::Swapping => 25,
            ChainOperationStatus::SwapComplete => 50,
            ChainOperationStatus::Bridging => 75,
            ChainOperationStatus::BridgeComplete
            | ChainOperationStatus::Completed
            | ChainOperationStatus::Skipped
            | ChainOperationStatus::Failed => 100,
        })
        .sum();
    (total / operations.len() as u32) as u8
}

pub struct StatusTracker {
    cache: Arc<dyn Cache>,
}

impl StatusTracker {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub async fn store_plan(&self, plan: &ConsolidationPlan) -> anyhow::Result<()> {
        let key = format!("{}:{}", PLAN_PREFIX, plan.id);
        cache_set(self.cache.as_ref(), &key, plan, PLAN_TTL_SECONDS).await
    }

    /// `None` once the TTL has elapsed, never a stale value.
    pub async fn get_plan(&self, plan_id: &str) -> anyhow::Result<Option<ConsolidationPlan>> {
        let key = format!("{}:{}", PLAN_PREFIX, plan_id);
        cache_get(self.cache.as_ref(), &key).await
    }

    /// Resets the plan's cache lifetime, used when execution starts and the
    /// plan will be referenced for longer than a quote normally lives.
    pub async fn extend_plan_ttl(&self, plan_id: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        let key = format!("{}:{}", PLAN_PREFIX, plan_id);
        self.cache.expire(&key, ttl_seconds).await
    }

    /// Creates the execution-time status record under `consolidation_id`,
    /// seeding one pending operation per chain plan.
    pub async fn initialize_status(
        &self,
        plan: &ConsolidationPlan,
        consolidation_id: &str,
    ) -> anyhow::Result<ConsolidationStatusDetail> {
        let status = ConsolidationStatusDetail {
            id: consolidation_id.to_string(),
            user_id: plan.user_id.clone(),
            status: ConsolidationStatus::Pending,
            chain_operations: plan
                .chain_plans
                .iter()
                .map(|cp| ChainOperationDetail::pending(cp.chain, cp.swap_input_value_usd))
                .collect(),
            completed_chains: 0,
            total_chains: plan.chain_plans.len(),
            progress_percent: 0,
            total_input_value_usd: plan.total_input_value_usd,
            total_output_value_usd: 0.0,
            actual_fees_usd: 0.0,
            final_output_amount: None,
            destination_chain: plan.destination_chain,
            destination_token: plan.destination_token.clone(),
            created_at: now_ms(),
            completed_at: None,
            errors: Vec::new(),
        };

        self.save_status(&status).await?;
        self.add_to_user_history(&plan.user_id, consolidation_id)
            .await?;
        self.emit_event(ConsolidationEvent {
            event_type: "consolidation_started".into(),
            consolidation_id: consolidation_id.to_string(),
            user_id: plan.user_id.clone(),
            chain: None,
            tx_hash: None,
            error: None,
            data: None,
            timestamp: now_ms(),
        })
        .await?;

        Ok(status)
    }

    pub async fn get_status(
        &self,
        consolidation_id: &str,
    ) -> anyhow::Result<Option<ConsolidationStatusDetail>> {
        let key = format!("{}:{}", STATUS_PREFIX, consolidation_id);
        cache_get(self.cache.as_ref(), &key).await
    }

    async fn save_status(&self, status: &ConsolidationStatusDetail) -> anyhow::Result<()> {
        let key = format!("{}:{}", STATUS_PREFIX, status.id);
        cache_set(self.cache.as_ref(), &key, status, STATUS_TTL_SECONDS).await
    }

    /// Applies a mutation to one chain's operation, then re-derives the
    /// aggregate status, completed count and progress.
    async fn update_chain<F>(
        &self,
        consolidation_id: &str,
        chain: Chain,
        apply: F,
    ) -> anyhow::Result<Option<ConsolidationStatusDetail>>
    where
        F: FnOnce(&mut ChainOperationDetail),
    {
        let Some(mut status) = self.get_status(consolidation_id).await? else {
            return Ok(None);
        };

        match status.chain_operations.iter_mut().find(|op| op.chain == chain) {
            Some(op) => apply(op),
            None => {
                warn!(
                    "Chain {} not found in consolidation {}",
                    chain, consolidation_id
                );
                return Ok(Some(status));
            }
        }

        status.completed_chains = status
            .chain_operations
            .iter()
            .filter(|op| {
                matches!(
                    op.status,
                    ChainOperationStatus::Completed | ChainOperationStatus::Skipped
                )
            })
            .count();
        status.status = derive_overall_status(&status.chain_operations);
        status.progress_percent = calculate_progress(&status.chain_operations);
        if matches!(
            status.status,
            ConsolidationStatus::Completed
                | ConsolidationStatus::PartialSuccess
                | ConsolidationStatus::Failed
        ) && status.completed_at.is_none()
        {
            status.completed_at = Some(now_ms());
        }

        self.save_status(&status).await?;
        Ok(Some(status))
    }

    /// Recomputes the running output/fee totals from the chain operations.
    async fn refresh_totals(
        &self,
        status: &mut ConsolidationStatusDetail,
    ) -> anyhow::Result<()> {
        let total_output: f64 = status
            .chain_operations
            .iter()
            .filter_map(|op| op.output_value_usd)
            .sum();
        status.total_output_value_usd = total_output;
        status.actual_fees_usd = status.total_input_value_usd - total_output;
        self.save_status(status).await
    }

    pub async fn mark_swap_started(
        &self,
        consolidation_id: &str,
        chain: Chain,
        tx_hash: Option<&str>,
    ) -> anyhow::Result<()> {
        let updated = self
            .update_chain(consolidation_id, chain, |op| {
                op.status = ChainOperationStatus::Swapping;
                op.swap_tx_hash = tx_hash.map(str::to_string);
                op.started_at = Some(now_ms());
            })
            .await?;

        if let Some(status) = updated {
            self.emit_event(ConsolidationEvent {
                event_type: "chain_swap_started".into(),
                consolidation_id: consolidation_id.to_string(),
                user_id: status.user_id,
                chain: Some(chain),
                tx_hash: tx_hash.map(str::to_string),
                error: None,
                data: None,
                timestamp: now_ms(),
            })
            .await?;
        }
        Ok(())
    }

    pub async fn mark_swap_completed(
        &self,
        consolidation_id: &str,
        chain: Chain,
        tx_hash: &str,
        output_amount: U256,
        output_value_usd: f64,
    ) -> anyhow::Result<()> {
        let updated = self
            .update_chain(consolidation_id, chain, |op| {
                op.status = ChainOperationStatus::SwapComplete;
                op.swap_tx_hash = Some(tx_hash.to_string());
                op.swap_confirmed = true;
                op.output_amount = Some(output_amount);
                op.output_value_usd = Some(output_value_usd);
            })
            .await?;

        if let Some(status) = updated {
            self.emit_event(ConsolidationEvent {
                event_type: "chain_swap_completed".into(),
                consolidation_id: consolidation_id.to_string(),
                user_id: status.user_id,
                chain: Some(chain),
                tx_hash: Some(tx_hash.to_string()),
                error: None,
                data: Some(serde_json::json!({
                    "outputAmount": output_amount.to_string(),
                    "outputValueUsd": output_value_usd,
                })),
                timestamp: now_ms(),
            })
            .await?;
        }
        Ok(())
    }

    pub async fn mark_bridge_started(
        &self,
        consolidation_id: &str,
        chain: Chain,
        provider: &str,
        tx_hash: &str,
    ) -> anyhow::Result<()> {
        let updated = self
            .update_chain(consolidation_id, chain, |op| {
                op.status = ChainOperationStatus::Bridging;
                op.bridge_tx_hash = Some(tx_hash.to_string());
                op.bridge_provider = Some(provider.to_string());
                op.bridge_status = Some(crate::bridges::BridgeStatus::Pending);
            })
            .await?;

        if let Some(status) = updated {
            self.emit_event(ConsolidationEvent {
                event_type: "chain_bridge_started".into(),
                consolidation_id: consolidation_id.to_string(),
                user_id: status.user_id,
                chain: Some(chain),
                tx_hash: Some(tx_hash.to_string()),
                error: None,
                data: Some(serde_json::json!({ "provider": provider })),
                timestamp: now_ms(),
            })
            .await?;
        }
        Ok(())
    }

    pub async fn mark_bridge_completed(
        &self,
        consolidation_id: &str,
        chain: Chain,
        destination_tx_hash: &str,
        output_amount: U256,
        output_value_usd: f64,
    ) -> anyhow::Result<()> {
        let updated = self
            .update_chain(consolidation_id, chain, |op| {
                op.status = ChainOperationStatus::Completed;
                op.bridge_status = Some(crate::bridges::BridgeStatus::Completed);
                op.bridge_destination_tx_hash = Some(destination_tx_hash.to_string());
                op.output_amount = Some(output_amount);
                op.output_value_usd = Some(output_value_usd);
                op.completed_at = Some(now_ms());
            })
            .await?;

        let Some(mut status) = updated else {
            return Ok(());
        };
        self.refresh_totals(&mut status).await?;

        self.emit_event(ConsolidationEvent {
            event_type: "chain_bridge_completed".into(),
            consolidation_id: consolidation_id.to_string(),
            user_id: status.user_id.clone(),
            chain: Some(chain),
            tx_hash: Some(destination_tx_hash.to_string()),
            error: None,
            data: Some(serde_json::json!({
                "outputAmount": output_amount.to_string(),
                "outputValueUsd": output_value_usd,
            })),
            timestamp: now_ms(),
        })
        .await?;

        if status.completed_chains == status.total_chains {
            self.finalize(consolidation_id).await?;
        }
        Ok(())
    }

    /// Same-chain legs complete after the swap, with no bridge stage.
    pub async fn mark_same_chain_completed(
        &self,
        consolidation_id: &str,
        chain: Chain,
        tx_hash: &str,
        output_amount: U256,
        output_value_usd: f64,
    ) -> anyhow::Result<()> {
        let updated = self
            .update_chain(consolidation_id, chain, |op| {
                op.status = ChainOperationStatus::Completed;
                op.swap_tx_hash = Some(tx_hash.to_string());
                op.swap_confirmed = true;
                op.output_amount = Some(output_amount);
                op.output_value_usd = Some(output_value_usd);
                op.completed_at = Some(now_ms());
            })
            .await?;

        let Some(mut status) = updated else {
            return Ok(());
        };
        self.refresh_totals(&mut status).await?;

        if status.completed_chains == status.total_chains {
            self.finalize(consolidation_id).await?;
        }
        Ok(())
    }

    pub async fn mark_chain_failed(
        &self,
        consolidation_id: &str,
        chain: Chain,
        stage: OperationStage,
        error: &str,
    ) -> anyhow::Result<()> {
        let updated = self
            .update_chain(consolidation_id, chain, |op| {
                op.status = ChainOperationStatus::Failed;
                op.error = Some(error.to_string());
            })
            .await?;

        if let Some(mut status) = updated {
            status.errors.push(ChainOperationError {
                chain,
                stage,
                error: error.to_string(),
            });
            self.save_status(&status).await?;

            self.emit_event(ConsolidationEvent {
                event_type: "chain_failed".into(),
                consolidation_id: consolidation_id.to_string(),
                user_id: status.user_id,
                chain: Some(chain),
                tx_hash: None,
                error: Some(error.to_string()),
                data: Some(serde_json::json!({ "stage": stage })),
                timestamp: now_ms(),
            })
            .await?;
        }
        Ok(())
    }

    pub async fn mark_consolidation_failed(
        &self,
        consolidation_id: &str,
        error: &str,
    ) -> anyhow::Result<()> {
        let Some(mut status) = self.get_status(consolidation_id).await? else {
            return Ok(());
        };

        status.status = ConsolidationStatus::Failed;
        status.completed_at = Some(now_ms());
        self.save_status(&status).await?;

        self.emit_event(ConsolidationEvent {
            event_type: "consolidation_failed".into(),
            consolidation_id: consolidation_id.to_string(),
            user_id: status.user_id,
            chain: None,
            tx_hash: None,
            error: Some(error.to_string()),
            data: None,
            timestamp: now_ms(),
        })
        .await
    }

    /// Seals the run once every chain reached a success state: sums the final
    /// output amounts, derives actual fees and emits the terminal event.
    async fn finalize(&self, consolidation_id: &str) -> anyhow::Result<()> {
        let Some(mut status) = self.get_status(consolidation_id).await? else {
            return Ok(());
        };

        let has_failures = status
            .chain_operations
            .iter()
            .any(|op| op.status == ChainOperationStatus::Failed);
        let final_output_amount = status
            .chain_operations
            .iter()
            .filter_map(|op| op.output_amount)
            .fold(U256::zero(), |sum, amount| sum.saturating_add(amount));

        status.status = if has_failures {
            ConsolidationStatus::PartialSuccess
        } else {
            ConsolidationStatus::Completed
        };
        status.final_output_amount = Some(final_output_amount);
        status.completed_at = Some(now_ms());
        status.progress_percent = 100;
        self.save_status(&status).await?;

        info!(
            "Consolidation {} finished: {:?}, ${:.2} out",
            consolidation_id, status.status, status.total_output_value_usd
        );

        self.emit_event(ConsolidationEvent {
            event_type: if has_failures {
                "consolidation_failed".into()
            } else {
                "consolidation_completed".into()
            },
            consolidation_id: consolidation_id.to_string(),
            user_id: status.user_id.clone(),
            chain: None,
            tx_hash: None,
            error: None,
            data: Some(serde_json::json!({
                "finalOutputAmount": final_output_amount.to_string(),
                "totalOutputValueUsd": status.total_output_value_usd,
                "hasFailures": has_failures,
            })),
            timestamp: now_ms(),
        })
        .await
    }

    async fn emit_event(&self, event: ConsolidationEvent) -> anyhow::Result<()> {
        let key = format!("{}:{}", EVENTS_PREFIX, event.consolidation_id);
        let raw = serde_json::to_string(&event)?;
        self.cache
            .list_push_front(&key, &raw, MAX_EVENTS, EVENTS_TTL_SECONDS)
            .await
    }

    /// Most recent events first.
    pub async fn get_events(
        &self,
        consolidation_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ConsolidationEvent>> {
        let key = format!("{}:{}", EVENTS_PREFIX, consolidation_id);
        let raw = self.cache.list_range(&key, 0, limit).await?;
        Ok(raw
            .iter()
            .filter_map(|e| serde_json::from_str(e).ok())
            .collect())
    }

    async fn add_to_user_history(
        &self,
        user_id: &str,
        consolidation_id: &str,
    ) -> anyhow::Result<()> {
        let key = format!("{}:{}:history", USER_PREFIX, user_id.to_lowercase());
        self.cache
            .list_push_front(
                &key,
                consolidation_id,
                MAX_HISTORY_ENTRIES,
                USER_HISTORY_TTL_SECONDS,
            )
            .await
    }

    /// Most-recent-first page of a user's executions. Entries whose status
    /// record has already expired are dropped from the page.
    pub async fn get_user_history(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<ConsolidationStatusDetail>> {
        let key = format!("{}:{}:history", USER_PREFIX, user_id.to_lowercase());
        let ids = self.cache.list_range(&key, offset, limit).await?;

        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(status) = self.get_status(&id).await? {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(status: ChainOperationStatus) -> ChainOperationDetail {
        let mut detail = ChainOperationDetail::pending(Chain::Base, 10.0);
        detail.status = status;
        detail
    }

    #[test]
    fn overall_status_derivation() {
        use ChainOperationStatus as Op;

        assert_eq!(
            derive_overall_status(&[op(Op::Pending), op(Op::Pending)]),
            ConsolidationStatus::Pending
        );
        assert_eq!(
            derive_overall_status(&[op(Op::Swapping), op(Op::Pending)]),
            ConsolidationStatus::Executing
        );
        assert_eq!(
            derive_overall_status(&[op(Op::Completed), op(Op::Completed)]),
            ConsolidationStatus::Completed
        );
        assert_eq!(
            derive_overall_status(&[op(Op::Completed), op(Op::Failed)]),
            ConsolidationStatus::PartialSuccess
        );
        assert_eq!(
            derive_overall_status(&[op(Op::Failed), op(Op::Failed)]),
            ConsolidationStatus::Failed
        );
        // Mixed terminal and waiting legs count as executing
        assert_eq!(
            derive_overall_status(&[op(Op::SwapComplete), op(Op::Completed)]),
            ConsolidationStatus::Executing
        );
    }

    #[test]
    fn progress_is_floor_of_mean() {
        use ChainOperationStatus as Op;

        assert_eq!(calculate_progress(&[]), 100);
        assert_eq!(calculate_progress(&[op(Op::Pending)]), 0);
        assert_eq!(calculate_progress(&[op(Op::Swapping)]), 25);
        assert_eq!(calculate_progress(&[op(Op::Bridging)]), 75);
        assert_eq!(calculate_progress(&[op(Op::Completed), op(Op::Swapping)]), 62);
        assert_eq!(calculate_progress(&[op(Op::Failed)]), 100);
    }
}
