#![allow(dead_code)]

//! Scriptable bridge provider used by the integration tests.

use async_trait::async_trait;
use ethereum_types::U256;
use std::sync::atomic::{AtomicUsize, Ordering};

use dustsweep_backend::bridges::{
    BridgeError, BridgeProvider, BridgeQuote, BridgeQuoteRequest, BridgeReceipt, BridgeRoute,
    BridgeStatus, BridgeTransaction, FeeBreakdown, QuoteContext, RouteStep,
};
use dustsweep_backend::types::{generate_id, now_ms, Chain, TokenInfo};

pub struct MockProvider {
    name: &'static str,
    supports: bool,
    fail_calls: bool,
    fee_units: u64,
    fee_usd: f64,
    time_seconds: u64,
    quote_validity_ms: i64,
    support_calls: AtomicUsize,
    quote_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            supports: true,
            fail_calls: false,
            fee_units: 1_000,
            fee_usd: 0.25,
            time_seconds: 120,
            quote_validity_ms: 300_000,
            support_calls: AtomicUsize::new(0),
            quote_calls: AtomicUsize::new(0),
        }
    }

    /// Route probe always answers no.
    pub fn unsupported(mut self) -> Self {
        self.supports = false;
        self
    }

    /// Quote and status calls error out.
    pub fn failing(mut self) -> Self {
        self.fail_calls = true;
        self
    }

    pub fn with_fees(mut self, fee_units: u64, fee_usd: f64) -> Self {
        self.fee_units = fee_units;
        self.fee_usd = fee_usd;
        self
    }

    pub fn with_time(mut self, seconds: u64) -> Self {
        self.time_seconds = seconds;
        self
    }

    pub fn with_quote_validity_ms(mut self, ms: i64) -> Self {
        self.quote_validity_ms = ms;
        self
    }

    pub fn support_calls(&self) -> usize {
        self.support_calls.load(Ordering::SeqCst)
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    fn token(chain: Chain, address: &str) -> TokenInfo {
        TokenInfo {
            address: address.to_string(),
            symbol: "USDC".to_string(),
            decimals: 6,
            chain,
        }
    }
}

#[async_trait]
impl BridgeProvider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn supports_route(
        &self,
        _source: Chain,
        _destination: Chain,
        _token: &str,
    ) -> Result<bool, BridgeError> {
        self.support_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.supports)
    }

    async fn get_quote(
        &self,
        request: &BridgeQuoteRequest,
    ) -> Result<Option<QuoteContext>, BridgeError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_calls {
            return Err(BridgeError::ProviderUnavailable(self.name.to_string()));
        }

        let output_amount = request.amount.saturating_sub(U256::from(self.fee_units));
        let quote = BridgeQuote {
            provider: self.name.to_string(),
            source_chain: request.source_chain,
            destination_chain: request.destination_chain,
            source_token: Self::token(request.source_chain, &request.source_token),
            destination_token: Self::token(request.destination_chain, &request.destination_token),
            input_amount: request.amount,
            output_amount,
            min_output_amount: output_amount,
            fees: FeeBreakdown {
                bridge_fee: U256::from(self.fee_units),
                gas_fee: U256::zero(),
                relayer_fee: U256::zero(),
                total_fee_usd: self.fee_usd,
            },
            estimated_time_seconds: self.time_seconds,
            route: BridgeRoute {
                steps: vec![RouteStep {
                    protocol: self.name.to_string(),
                    chain: request.source_chain,
                    from_token: request.source_token.clone(),
                    to_token: request.destination_token.clone(),
                    from_amount: request.amount,
                    to_amount: output_amount,
                }],
                total_gas_estimate: U256::from(100_000u64),
                requires_approval: false,
                approval_address: None,
            },
            expires_at: now_ms() + self.quote_validity_ms,
            quote_id: generate_id(self.name),
            max_slippage: request.slippage.unwrap_or(0.005),
        };

        Ok(Some(QuoteContext {
            quote,
            request: request.clone(),
            provider_data: serde_json::json!({ "provider": self.name }),
        }))
    }

    async fn build_transaction(
        &self,
        context: &QuoteContext,
    ) -> Result<BridgeTransaction, BridgeError> {
        if self.fail_calls {
            return Err(BridgeError::ProviderUnavailable(self.name.to_string()));
        }
        Ok(BridgeTransaction {
            provider: self.name.to_string(),
            quote_id: context.quote.quote_id.clone(),
            source_chain: context.quote.source_chain,
            destination_chain: context.quote.destination_chain,
            to: "0x00000000000000000000000000000000000000b1".to_string(),
            data: format!("0x{}", hex::encode(context.quote.quote_id.as_bytes())),
            value: U256::zero(),
            gas_limit: U256::from(100_000u64),
            approval: None,
        })
    }

    async fn get_status(
        &self,
        source_tx_hash: &str,
        source_chain: Chain,
    ) -> Result<BridgeReceipt, BridgeError> {
        if self.fail_calls {
            return Err(BridgeError::ProviderUnavailable(self.name.to_string()));
        }
        Ok(BridgeReceipt {
            provider: self.name.to_string(),
            status: BridgeStatus::Bridging,
            source_tx_hash: source_tx_hash.to_string(),
            source_chain,
            source_confirmations: 3,
            destination_tx_hash: None,
            destination_chain: None,
            destination_confirmations: None,
            input_amount: U256::from(1_000_000u64),
            output_amount: None,
            initiated_at: now_ms(),
            completed_at: None,
            error: None,
        })
    }
}
