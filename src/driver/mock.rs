//! In-process simulated ledger.
//!
//! Deployments and transactions are "mined" instantly into an in-memory
//! block sequence. Knobs let tests withhold receipts, fail or stall
//! deployments, fail gas estimates, revert specific methods and script call
//! results.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    random_hash, DeployReceipt, DeployRequest, DriverError, DriverResult, LedgerDriver, Receipt,
    TxRequest,
};
use crate::types::Address;

/// Base cost of any transaction
const BASE_GAS: u64 = 21_000;
/// Extra cost of contract creation
const CREATE_GAS: u64 = 32_000;
/// Cost per calldata byte
const DATA_BYTE_GAS: u64 = 16;
/// Default gas price: 1 gwei
const DEFAULT_GAS_PRICE: u64 = 1_000_000_000;

#[derive(Debug)]
struct MockContract {
    implementation: Option<String>,
}

#[derive(Debug)]
struct MockLedger {
    available: bool,
    withhold_receipts: bool,
    deploy_failure: Option<String>,
    stall_deployments: bool,
    fail_estimates: bool,
    gas_price: u64,
    reverting: HashSet<String>,
    call_results: HashMap<String, Value>,
    block_number: u64,
    contracts: HashMap<String, MockContract>,
    receipts: HashMap<String, Receipt>,
    withheld: HashMap<String, Receipt>,
    sent: Vec<TxRequest>,
    deployments: usize,
    calls: usize,
    estimates: usize,
    account: String,
}

impl MockLedger {
    fn new() -> Self {
        Self {
            available: true,
            withhold_receipts: false,
            deploy_failure: None,
            stall_deployments: false,
            fail_estimates: false,
            gas_price: DEFAULT_GAS_PRICE,
            reverting: HashSet::new(),
            call_results: HashMap::new(),
            block_number: 0,
            contracts: HashMap::new(),
            receipts: HashMap::new(),
            withheld: HashMap::new(),
            sent: Vec::new(),
            deployments: 0,
            calls: 0,
            estimates: 0,
            account: Address::random().to_hex(),
        }
    }

    fn ensure_available(&self) -> DriverResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(DriverError::Unavailable("mock ledger is offline".to_string()))
        }
    }

    fn mine(&mut self, mut receipt: Receipt) {
        self.block_number += 1;
        receipt.block_number = Some(self.block_number);
        if self.withhold_receipts {
            self.withheld.insert(receipt.transaction_hash.clone(), receipt);
        } else {
            self.receipts.insert(receipt.transaction_hash.clone(), receipt);
        }
    }
}

fn intrinsic_gas(data: &str, creation: bool) -> u64 {
    let bytes = data.strip_prefix("0x").unwrap_or(data).len() as u64 / 2;
    BASE_GAS + if creation { CREATE_GAS } else { 0 } + bytes * DATA_BYTE_GAS
}

fn canned_result(method: &str) -> Value {
    match method {
        "balanceOf" | "totalSupply" => json!("1000000000000000000"),
        "name" => json!("Mock Token"),
        "symbol" => json!("MOCK"),
        "decimals" => json!(18),
        _ => json!(true),
    }
}

/// Simulated ledger shared between clones
#[derive(Clone, Debug)]
pub struct MockDriver {
    network: String,
    state: Arc<Mutex<MockLedger>>,
}

impl MockDriver {
    /// A fresh simulated ledger for `network`
    #[must_use]
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
            state: Arc::new(Mutex::new(MockLedger::new())),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, MockLedger> {
        // a panicked test thread must not wedge the others
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The simulated sender account
    #[must_use]
    pub fn default_account(&self) -> String {
        self.ledger().account.clone()
    }

    /// Take the ledger on- or offline
    pub fn set_available(&self, available: bool) {
        self.ledger().available = available;
    }

    /// Stop (or resume) publishing receipts
    pub fn withhold_receipts(&self, withhold: bool) {
        self.ledger().withhold_receipts = withhold;
    }

    /// Publish every withheld receipt
    pub fn release_receipts(&self) {
        let mut ledger = self.ledger();
        let withheld: Vec<_> = ledger.withheld.drain().collect();
        ledger.receipts.extend(withheld);
    }

    /// Make deployments fail with `reason` (`None` to clear)
    pub fn fail_deployments(&self, reason: Option<&str>) {
        self.ledger().deploy_failure = reason.map(ToString::to_string);
    }

    /// Accept deployments but never mine them
    pub fn stall_deployments(&self, stall: bool) {
        self.ledger().stall_deployments = stall;
    }

    /// Make gas estimation fail
    pub fn fail_gas_estimates(&self, fail: bool) {
        self.ledger().fail_estimates = fail;
    }

    /// Set the quoted gas price
    pub fn set_gas_price(&self, price: u64) {
        self.ledger().gas_price = price;
    }

    /// Transactions invoking `method` will revert
    pub fn revert_method(&self, method: &str) {
        self.ledger().reverting.insert(method.to_string());
    }

    /// Script the result of read calls to `method`
    pub fn set_call_result(&self, method: &str, value: Value) {
        self.ledger().call_results.insert(method.to_string(), value);
    }

    /// Number of deployments performed
    #[must_use]
    pub fn deployment_count(&self) -> usize {
        self.ledger().deployments
    }

    /// Transactions submitted so far
    #[must_use]
    pub fn sent_transactions(&self) -> Vec<TxRequest> {
        self.ledger().sent.clone()
    }

    /// Number of read calls served
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.ledger().calls
    }

    /// Number of gas estimates served
    #[must_use]
    pub fn estimate_count(&self) -> usize {
        self.ledger().estimates
    }

    /// Every interaction that touched the ledger (deploys, sends, calls)
    #[must_use]
    pub fn ledger_interactions(&self) -> usize {
        let ledger = self.ledger();
        ledger.deployments + ledger.sent.len() + ledger.calls
    }

    /// Current implementation pointer of a simulated proxy
    #[must_use]
    pub fn implementation_of(&self, proxy: &str) -> Option<String> {
        self.ledger()
            .contracts
            .get(&proxy.to_lowercase())
            .and_then(|c| c.implementation.clone())
    }
}

impl LedgerDriver for MockDriver {
    async fn deploy_contract(&self, request: &DeployRequest) -> DriverResult<DeployReceipt> {
        let mut ledger = self.ledger();
        ledger.ensure_available()?;
        if let Some(reason) = &ledger.deploy_failure {
            return Err(DriverError::Rejected(reason.clone()));
        }
        if ledger.stall_deployments {
            ledger.deployments += 1;
            return Err(DriverError::ReceiptTimeout {
                hash: random_hash(),
                waited: Duration::ZERO,
            });
        }

        let address = Address::random().to_hex();
        let transaction_hash = random_hash();
        let from = request.from.clone().unwrap_or_else(|| ledger.account.clone());
        let gas = intrinsic_gas(&request.bytecode, true);

        // proxies take their implementation as the first constructor argument
        let implementation = request
            .constructor_params
            .first()
            .and_then(Value::as_str)
            .filter(|s| Address::from_hex(s).is_ok())
            .map(str::to_lowercase);
        ledger
            .contracts
            .insert(address.clone(), MockContract { implementation });
        ledger.deployments += 1;

        // deployments always publish their receipt; the address is needed now
        ledger.block_number += 1;
        let receipt = Receipt {
            transaction_hash: transaction_hash.clone(),
            block_number: Some(ledger.block_number),
            contract_address: Some(address.clone()),
            resource_used: Some(gas),
            effective_gas_price: Some(ledger.gas_price),
            status: true,
            from: Some(from.clone()),
            to: None,
        };
        ledger.receipts.insert(transaction_hash.clone(), receipt);

        debug!(network = %self.network, %address, "mock deployment");
        Ok(DeployReceipt {
            address,
            transaction_hash,
            resource_used: Some(gas),
            from: Some(from),
        })
    }

    async fn call_contract(
        &self,
        address: &str,
        _abi: &str,
        method: &str,
        _params: &[Value],
    ) -> DriverResult<Value> {
        let mut ledger = self.ledger();
        ledger.ensure_available()?;
        ledger.calls += 1;

        if method == "implementation" {
            if let Some(current) = ledger
                .contracts
                .get(&address.to_lowercase())
                .and_then(|c| c.implementation.clone())
            {
                return Ok(Value::String(current));
            }
        }
        Ok(ledger
            .call_results
            .get(method)
            .cloned()
            .unwrap_or_else(|| canned_result(method)))
    }

    async fn estimate_gas(&self, request: &TxRequest) -> DriverResult<u64> {
        let mut ledger = self.ledger();
        ledger.ensure_available()?;
        if ledger.fail_estimates {
            return Err(DriverError::Rpc {
                code: -32000,
                message: "gas required exceeds allowance".to_string(),
            });
        }
        ledger.estimates += 1;
        Ok(intrinsic_gas(&request.data, request.to.is_none()))
    }

    async fn get_transaction_receipt(&self, hash: &str) -> DriverResult<Option<Receipt>> {
        let ledger = self.ledger();
        ledger.ensure_available()?;
        Ok(ledger.receipts.get(hash).cloned())
    }

    async fn get_gas_price(&self) -> DriverResult<u64> {
        let ledger = self.ledger();
        ledger.ensure_available()?;
        Ok(ledger.gas_price)
    }

    async fn send_transaction(&self, request: &TxRequest) -> DriverResult<String> {
        let mut ledger = self.ledger();
        ledger.ensure_available()?;

        let hash = random_hash();
        let method = request.method().unwrap_or_default().to_string();
        let reverted = ledger.reverting.contains(&method);

        if !reverted && method == "upgradeTo" {
            let target = request
                .call
                .as_ref()
                .and_then(|c| c.params.first())
                .and_then(Value::as_str)
                .map(str::to_lowercase);
            if let (Some(to), Some(target)) = (&request.to, target) {
                if let Some(proxy) = ledger.contracts.get_mut(&to.to_lowercase()) {
                    proxy.implementation = Some(target);
                }
            }
        }

        let receipt = Receipt {
            transaction_hash: hash.clone(),
            block_number: None,
            contract_address: None,
            resource_used: Some(intrinsic_gas(&request.data, false)),
            effective_gas_price: Some(ledger.gas_price),
            status: !reverted,
            from: request.from.clone().or_else(|| Some(ledger.account.clone())),
            to: request.to.clone(),
        };
        ledger.sent.push(request.clone());
        ledger.mine(receipt);
        Ok(hash)
    }

    async fn get_balance(&self, _address: &str) -> DriverResult<String> {
        self.ledger().ensure_available()?;
        Ok("1000000000000000000".to_string())
    }

    async fn is_available(&self) -> bool {
        self.ledger().available
    }

    async fn driver_info(&self) -> Map<String, Value> {
        let ledger = self.ledger();
        let mut info = Map::new();
        info.insert("type".into(), json!("mock"));
        info.insert("network".into(), json!(self.network));
        info.insert("block_number".into(), json!(ledger.block_number));
        info.insert("contracts".into(), json!(ledger.contracts.len()));
        info.insert("default_account".into(), json!(ledger.account));
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MethodCall;

    fn upgrade_request(proxy: &str, implementation: &str) -> TxRequest {
        TxRequest {
            to: Some(proxy.to_string()),
            data: "0x3659cfe6".to_string(),
            call: Some(MethodCall {
                abi: "[]".to_string(),
                method: "upgradeTo".to_string(),
                params: vec![json!(implementation)],
            }),
            ..TxRequest::default()
        }
    }

    #[tokio::test]
    async fn test_deploy_and_receipt() {
        let driver = MockDriver::new("test");
        let receipt = driver
            .deploy_contract(&DeployRequest {
                bytecode: "0x6080".to_string(),
                ..DeployRequest::default()
            })
            .await
            .unwrap();
        assert!(Address::from_hex(&receipt.address).is_ok());
        assert_eq!(receipt.resource_used, Some(BASE_GAS + CREATE_GAS + 2 * DATA_BYTE_GAS));

        let mined = driver
            .get_transaction_receipt(&receipt.transaction_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mined.contract_address, Some(receipt.address));
        assert_eq!(driver.deployment_count(), 1);
    }

    #[tokio::test]
    async fn test_withheld_receipts() {
        let driver = MockDriver::new("test");
        driver.withhold_receipts(true);
        let hash = driver.send_transaction(&TxRequest::default()).await.unwrap();
        assert!(driver.get_transaction_receipt(&hash).await.unwrap().is_none());

        driver.release_receipts();
        let receipt = driver.get_transaction_receipt(&hash).await.unwrap().unwrap();
        assert!(receipt.block_number.is_some());
    }

    #[tokio::test]
    async fn test_upgrade_moves_pointer_unless_reverted() {
        let driver = MockDriver::new("test");
        let v1 = Address::random().to_hex();
        let v2 = Address::random().to_hex();
        let proxy = driver
            .deploy_contract(&DeployRequest {
                constructor_params: vec![json!(v1)],
                ..DeployRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(driver.implementation_of(&proxy.address), Some(v1.clone()));

        driver.send_transaction(&upgrade_request(&proxy.address, &v2)).await.unwrap();
        assert_eq!(driver.implementation_of(&proxy.address), Some(v2.clone()));

        driver.revert_method("upgradeTo");
        let hash = driver
            .send_transaction(&upgrade_request(&proxy.address, &v1))
            .await
            .unwrap();
        let receipt = driver.get_transaction_receipt(&hash).await.unwrap().unwrap();
        assert!(!receipt.status);
        assert_eq!(driver.implementation_of(&proxy.address), Some(v2));
    }

    #[tokio::test]
    async fn test_knobs() {
        let driver = MockDriver::new("test");
        driver.fail_gas_estimates(true);
        assert!(driver.estimate_gas(&TxRequest::default()).await.is_err());

        driver.fail_deployments(Some("out of gas"));
        let err = driver.deploy_contract(&DeployRequest::default()).await.unwrap_err();
        assert!(err.to_string().contains("out of gas"));
        assert!(err.transaction_hash().is_none());

        driver.fail_deployments(None);
        driver.stall_deployments(true);
        let err = driver.deploy_contract(&DeployRequest::default()).await.unwrap_err();
        assert!(matches!(err, DriverError::ReceiptTimeout { .. }));
        assert!(err.transaction_hash().is_some_and(|h| h.starts_with("0x")));
        driver.stall_deployments(false);

        assert_eq!(
            driver.call_contract("0x00", "[]", "symbol", &[]).await.unwrap(),
            json!("MOCK")
        );
        driver.set_call_result("symbol", json!("TKN"));
        assert_eq!(
            driver.call_contract("0x00", "[]", "symbol", &[]).await.unwrap(),
            json!("TKN")
        );

        driver.set_available(false);
        assert!(matches!(
            driver.get_gas_price().await,
            Err(DriverError::Unavailable(_))
        ));
    }
}
