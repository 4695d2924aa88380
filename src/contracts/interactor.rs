//! Method invocation against deployed contracts.
//!
//! Read-only methods go straight to the driver and touch no registry state.
//! State-changing methods are estimated, submitted and recorded as a
//! `pending` [`ContractTransaction`], then optionally confirmed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{CallOutcome, ContractError, ContractResult, TxOutcome};
use crate::config::LifecycleConfig;
use crate::driver::codec::{encode_arguments, has_static_layout};
use crate::driver::{Driver, LedgerDriver, MethodCall, Receipt, TxRequest};
use crate::registry::{ContractRegistry, ContractTransaction, ContractVersion};
use crate::types::{AbiItem, Address, RecordId};

/// Per-call options
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Sender (driver default when unset)
    pub from: Option<String>,
    /// Explicit gas limit (estimated when unset)
    pub gas_limit: Option<u64>,
    /// Wait for a receipt before returning
    pub wait: bool,
    /// How long to wait (configured deployment timeout when unset)
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Submit and wait for confirmation
    #[must_use]
    pub fn waiting() -> Self {
        Self {
            wait: true,
            ..Self::default()
        }
    }

    /// Set the sender
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Use a fixed gas limit
    #[must_use]
    pub const fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    /// Bound the confirmation wait
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Invokes contract methods and tracks their transactions
#[derive(Clone, Debug)]
pub struct Interactor {
    driver: Driver,
    registry: ContractRegistry,
    config: Arc<LifecycleConfig>,
    poll_interval: Duration,
}

impl Interactor {
    /// Create an interactor polling at the configured interval
    #[must_use]
    pub fn new(driver: Driver, registry: ContractRegistry, config: Arc<LifecycleConfig>) -> Self {
        let poll_interval = config.deployment.poll_interval();
        Self {
            driver,
            registry,
            config,
            poll_interval,
        }
    }

    /// Override the receipt polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The ledger driver
    #[must_use]
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Find `method` in the contract's ABI and check the argument count.
    ///
    /// # Errors
    /// `AbiUnavailable`, `InvalidAbi`, `MethodNotFound` or
    /// `ParameterCountMismatch`
    pub fn resolve_method(
        contract: &ContractVersion,
        method: &str,
        arg_count: usize,
    ) -> ContractResult<AbiItem> {
        let abi = contract
            .parsed_abi()
            .ok_or_else(|| ContractError::AbiUnavailable(contract.full_identifier()))??;
        let function = abi
            .function(method)
            .ok_or_else(|| ContractError::MethodNotFound {
                method: method.to_string(),
                contract: contract.full_identifier(),
            })?;
        if function.inputs.len() != arg_count {
            return Err(ContractError::ParameterCountMismatch {
                method: method.to_string(),
                expected: function.inputs.len(),
                actual: arg_count,
            });
        }
        Ok(function.clone())
    }

    /// Call a method: reads return a value, writes return a transaction
    pub async fn call(
        &self,
        contract: &ContractVersion,
        method: &str,
        params: Vec<Value>,
        options: &CallOptions,
    ) -> ContractResult<CallOutcome> {
        let function = Self::resolve_method(contract, method, params.len())?;

        if function.is_state_changing() {
            return self
                .transact(contract, &function, params, options, method, None)
                .await
                .map(CallOutcome::Transaction);
        }

        let address = require_address(contract)?;
        let abi = contract.abi.as_deref().unwrap_or("[]");
        debug!(contract = %contract.full_identifier(), %method, "read call");
        let value = self
            .driver
            .call_contract(address, abi, method, &params)
            .await
            .map_err(|e| ContractError::driver(format!("call {method}"), e))?;
        Ok(CallOutcome::Value(value))
    }

    /// Submit a state-changing call and record it under `label`
    pub(crate) async fn transact(
        &self,
        contract: &ContractVersion,
        function: &AbiItem,
        params: Vec<Value>,
        options: &CallOptions,
        label: &str,
        rollback_id: Option<RecordId>,
    ) -> ContractResult<TxOutcome> {
        let address = require_address(contract)?;
        let method = function.name.clone().unwrap_or_default();
        let from = options.from.clone().or_else(|| self.driver.default_account());

        let mut request = build_request(contract, address, function, &params, from.clone())?;
        request.gas = Some(self.gas_limit_for(&request, options).await);

        let hash = self
            .driver
            .send_transaction(&request)
            .await
            .map_err(|e| ContractError::driver(format!("send {method}"), e))?;

        let mut record = ContractTransaction::pending(contract.id, &hash, label);
        record.parameters = params;
        record.from_address = from;
        record.to_address = Some(address.to_string());
        record.rollback_id = rollback_id;
        let record = self.registry.insert_transaction(record)?;
        info!(
            contract = %contract.full_identifier(),
            %method,
            tx_hash = %hash,
            "transaction submitted"
        );

        if !options.wait {
            return Ok(TxOutcome::Submitted {
                transaction_hash: hash,
                record,
            });
        }
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.config.deployment.timeout());
        self.confirm(record, timeout).await
    }

    /// Raw driver estimate for a method call.
    ///
    /// The sender defaults to the zero address.
    pub async fn estimate_gas(
        &self,
        contract: &ContractVersion,
        method: &str,
        params: &[Value],
        options: &CallOptions,
    ) -> ContractResult<u64> {
        let function = Self::resolve_method(contract, method, params.len())?;
        let address = require_address(contract)?;
        let from = options
            .from
            .clone()
            .unwrap_or_else(|| Address::ZERO.to_hex());
        let request = build_request(contract, address, &function, params, Some(from))?;
        self.driver
            .estimate_gas(&request)
            .await
            .map_err(|e| ContractError::driver(format!("estimate gas for {method}"), e))
    }

    /// Explicit limit, else estimate times the multiplier, else the default
    async fn gas_limit_for(&self, request: &TxRequest, options: &CallOptions) -> u64 {
        if let Some(limit) = options.gas_limit {
            return limit;
        }
        let mut estimate_request = request.clone();
        if estimate_request.from.is_none() {
            estimate_request.from = Some(Address::ZERO.to_hex());
        }
        match self.driver.estimate_gas(&estimate_request).await {
            Ok(estimate) => self.config.gas.apply_multiplier(estimate),
            Err(e) => {
                let fallback = self.config.gas.default_limit;
                warn!(method = ?request.method(), error = %e, fallback, "gas estimation failed, using default limit");
                fallback
            }
        }
    }

    /// Poll for a mined receipt until `timeout` elapses.
    ///
    /// Returns `None` on timeout. Driver errors while polling are logged
    /// and polling continues. Dropping the future stops polling.
    pub async fn wait_for_confirmation(&self, hash: &str, timeout: Duration) -> Option<Receipt> {
        let poll = async {
            loop {
                match self.driver.get_transaction_receipt(hash).await {
                    Ok(Some(receipt)) if receipt.block_number.is_some() => return receipt,
                    Ok(_) => {}
                    Err(e) => debug!(tx_hash = %hash, error = %e, "receipt lookup failed"),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.ok()
    }

    /// [`Self::wait_for_confirmation`] that also gives up when `cancel` resolves
    pub async fn wait_for_confirmation_or_cancel(
        &self,
        hash: &str,
        timeout: Duration,
        cancel: impl Future<Output = ()>,
    ) -> Option<Receipt> {
        tokio::select! {
            receipt = self.wait_for_confirmation(hash, timeout) => receipt,
            () = cancel => {
                debug!(tx_hash = %hash, "confirmation wait cancelled");
                None
            }
        }
    }

    /// Wait for `record`'s receipt and store the outcome
    pub async fn confirm(
        &self,
        mut record: ContractTransaction,
        timeout: Duration,
    ) -> ContractResult<TxOutcome> {
        let Some(receipt) = self
            .wait_for_confirmation(&record.transaction_hash, timeout)
            .await
        else {
            warn!(
                tx_hash = %record.transaction_hash,
                timeout_secs = timeout.as_secs(),
                "no receipt before timeout, transaction left pending"
            );
            return Ok(TxOutcome::Submitted {
                transaction_hash: record.transaction_hash.clone(),
                record,
            });
        };

        record.resource_used = receipt.resource_used;
        record.resource_price = receipt.effective_gas_price;
        record.block_number = receipt.block_number;
        if receipt.status {
            record.mark_successful();
        } else {
            record.mark_failed("transaction reverted");
        }
        self.registry.update_transaction(&record)?;
        info!(
            tx_hash = %record.transaction_hash,
            status = %record.status,
            block = ?record.block_number,
            "transaction confirmed"
        );
        Ok(TxOutcome::Confirmed { receipt, record })
    }
}

fn require_address(contract: &ContractVersion) -> ContractResult<&str> {
    contract
        .address
        .as_deref()
        .ok_or_else(|| ContractError::MissingAddress(contract.full_identifier()))
}

/// Calldata is the selector plus the encoded arguments; the structured call
/// rides along for drivers that encode themselves.
///
/// Word-sized arguments that fail to encode are rejected here. Methods with
/// dynamic inputs carry the selector alone and leave encoding to the driver.
fn build_request(
    contract: &ContractVersion,
    address: &str,
    function: &AbiItem,
    params: &[Value],
    from: Option<String>,
) -> ContractResult<TxRequest> {
    let method = function.name.clone().unwrap_or_default();
    let mut data = function.selector_hex();
    if has_static_layout(&function.inputs) {
        let args = encode_arguments(&function.inputs, params)
            .map_err(|e| ContractError::driver(format!("encode arguments for {method}"), e))?;
        data.push_str(&hex::encode(args));
    } else {
        debug!(%method, "dynamic inputs, calldata carries the selector only");
    }
    Ok(TxRequest {
        to: Some(address.to_string()),
        from,
        data,
        gas: None,
        call: Some(MethodCall {
            abi: contract.abi.clone().unwrap_or_default(),
            method,
            params: params.to_vec(),
        }),
    })
}
