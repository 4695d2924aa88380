//! Ethereum JSON-RPC driver.
//!
//! Transactions are sent with `eth_sendTransaction`, so the node signs with
//! an account it manages. Deployments poll for the receipt to learn the
//! contract address.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use super::codec::{decode_outputs, encode_arguments, parse_quantity, parse_quantity_u64, to_quantity};
use super::{DeployReceipt, DeployRequest, DriverError, DriverResult, LedgerDriver, Receipt, TxRequest};
use crate::config::{DeploymentConfig, NetworkConfig};
use crate::types::Abi;

/// Per-request HTTP timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC client for one EVM network
#[derive(Clone, Debug)]
pub struct EvmDriver {
    network: String,
    rpc_url: String,
    chain_id: Option<u64>,
    default_account: Option<String>,
    client: reqwest::Client,
    deploy_timeout: Duration,
    poll_interval: Duration,
    next_id: Arc<AtomicU64>,
}

impl EvmDriver {
    /// Create a driver for a configured network
    pub fn new(
        network: &str,
        config: &NetworkConfig,
        deployment: &DeploymentConfig,
    ) -> DriverResult<Self> {
        let rpc_url = config
            .rpc_url
            .clone()
            .ok_or_else(|| DriverError::Unavailable(format!("network {network} has no rpc_url")))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DriverError::Transport(e.to_string()))?;
        Ok(Self {
            network: network.to_string(),
            rpc_url,
            chain_id: config.chain_id,
            default_account: config.default_account.clone(),
            client,
            deploy_timeout: deployment.timeout(),
            poll_interval: deployment.poll_interval(),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Configured sender account
    #[must_use]
    pub fn default_account(&self) -> Option<&str> {
        self.default_account.as_deref()
    }

    async fn rpc(&self, method: &str, params: Value) -> DriverResult<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        debug!(%method, url = %self.rpc_url, "rpc request");

        let response = timeout(REQUEST_TIMEOUT, self.client.post(&self.rpc_url).json(&payload).send())
            .await
            .map_err(|_| DriverError::Timeout(format!("{method} after {REQUEST_TIMEOUT:?}")))??;
        let body: Value = response.json().await?;

        if let Some(err) = body.get("error") {
            return Err(DriverError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown rpc error")
                    .to_string(),
            });
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| DriverError::InvalidResponse(format!("{method}: missing `result`")))
    }

    /// Sender for a request, falling back to the first node account
    async fn sender(&self, from: Option<&str>) -> DriverResult<String> {
        if let Some(from) = from.or(self.default_account.as_deref()) {
            return Ok(from.to_string());
        }
        let accounts = self.rpc("eth_accounts", json!([])).await?;
        accounts
            .get(0)
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| DriverError::Rejected("no sender given and node manages no accounts".to_string()))
    }

    /// Full calldata for a request
    fn calldata(request: &TxRequest) -> DriverResult<String> {
        let Some(call) = &request.call else {
            return Ok(request.data.clone());
        };
        let abi = Abi::parse(&call.abi).map_err(|e| DriverError::Encoding(e.to_string()))?;
        let function = abi
            .function(&call.method)
            .ok_or_else(|| DriverError::Encoding(format!("method {} not in ABI", call.method)))?;
        let args = encode_arguments(&function.inputs, &call.params)?;
        Ok(format!(
            "0x{}{}",
            hex::encode(function.selector()),
            hex::encode(args)
        ))
    }

    fn parse_receipt(value: &Value) -> DriverResult<Receipt> {
        let field = |name: &str| value.get(name).filter(|v| !v.is_null());
        let quantity = |name: &str| field(name).map(parse_quantity_u64).transpose();
        let text = |name: &str| field(name).and_then(Value::as_str).map(ToString::to_string);

        Ok(Receipt {
            transaction_hash: text("transactionHash")
                .ok_or_else(|| DriverError::InvalidResponse("receipt without hash".to_string()))?,
            block_number: quantity("blockNumber")?,
            contract_address: text("contractAddress"),
            resource_used: quantity("gasUsed")?,
            effective_gas_price: quantity("effectiveGasPrice")?,
            status: field("status").map_or(Ok(true), |s| parse_quantity(s).map(|n| n == 1))?,
            from: text("from"),
            to: text("to"),
        })
    }

    async fn wait_for_receipt(&self, hash: &str) -> DriverResult<Receipt> {
        let deadline = Instant::now() + self.deploy_timeout;
        loop {
            match self.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) if receipt.block_number.is_some() => return Ok(receipt),
                Ok(_) => {}
                Err(e) => warn!(tx_hash = %hash, error = %e, "receipt lookup failed"),
            }
            if Instant::now() >= deadline {
                return Err(DriverError::ReceiptTimeout {
                    hash: hash.to_string(),
                    waited: self.deploy_timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}

impl LedgerDriver for EvmDriver {
    async fn deploy_contract(&self, request: &DeployRequest) -> DriverResult<DeployReceipt> {
        let abi = Abi::parse(&request.abi).map_err(|e| DriverError::Encoding(e.to_string()))?;
        let inputs = abi.constructor().map(|c| c.inputs.clone()).unwrap_or_default();
        let args = encode_arguments(&inputs, &request.constructor_params)?;
        let bytecode = request.bytecode.strip_prefix("0x").unwrap_or(&request.bytecode);
        let from = self.sender(request.from.as_deref()).await?;

        let mut tx = json!({
            "from": from,
            "data": format!("0x{bytecode}{}", hex::encode(args)),
        });
        if let Some(gas) = request.gas_limit {
            tx["gas"] = json!(to_quantity(gas));
        }

        let hash = self
            .rpc("eth_sendTransaction", json!([tx]))
            .await?
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| DriverError::InvalidResponse("transaction hash is not a string".to_string()))?;

        let receipt = self.wait_for_receipt(&hash).await?;
        if !receipt.status {
            return Err(DriverError::Rejected(format!("deployment {hash} reverted")));
        }
        let address = receipt
            .contract_address
            .ok_or_else(|| DriverError::InvalidResponse(format!("receipt for {hash} has no contract address")))?;

        Ok(DeployReceipt {
            address,
            transaction_hash: hash,
            resource_used: receipt.resource_used,
            from: Some(from),
        })
    }

    async fn call_contract(
        &self,
        address: &str,
        abi: &str,
        method: &str,
        params: &[Value],
    ) -> DriverResult<Value> {
        let parsed = Abi::parse(abi).map_err(|e| DriverError::Encoding(e.to_string()))?;
        let function = parsed
            .function(method)
            .ok_or_else(|| DriverError::Encoding(format!("method {method} not in ABI")))?;
        let args = encode_arguments(&function.inputs, params)?;
        let data = format!("0x{}{}", hex::encode(function.selector()), hex::encode(args));

        let result = self
            .rpc("eth_call", json!([{ "to": address, "data": data }, "latest"]))
            .await?;
        let raw = result
            .as_str()
            .ok_or_else(|| DriverError::InvalidResponse("eth_call result is not a string".to_string()))?;
        let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
            .map_err(|e| DriverError::InvalidResponse(e.to_string()))?;
        Ok(decode_outputs(&function.outputs, &bytes))
    }

    async fn estimate_gas(&self, request: &TxRequest) -> DriverResult<u64> {
        let mut tx = json!({ "data": Self::calldata(request)? });
        if let Some(to) = &request.to {
            tx["to"] = json!(to);
        }
        if let Some(from) = &request.from {
            tx["from"] = json!(from);
        }
        parse_quantity_u64(&self.rpc("eth_estimateGas", json!([tx])).await?)
    }

    async fn get_transaction_receipt(&self, hash: &str) -> DriverResult<Option<Receipt>> {
        let result = self.rpc("eth_getTransactionReceipt", json!([hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        Self::parse_receipt(&result).map(Some)
    }

    async fn get_gas_price(&self) -> DriverResult<u64> {
        parse_quantity_u64(&self.rpc("eth_gasPrice", json!([])).await?)
    }

    async fn send_transaction(&self, request: &TxRequest) -> DriverResult<String> {
        let from = self.sender(request.from.as_deref()).await?;
        let mut tx = json!({
            "from": from,
            "data": Self::calldata(request)?,
        });
        if let Some(to) = &request.to {
            tx["to"] = json!(to);
        }
        if let Some(gas) = request.gas {
            tx["gas"] = json!(to_quantity(gas));
        }
        self.rpc("eth_sendTransaction", json!([tx]))
            .await?
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| DriverError::InvalidResponse("transaction hash is not a string".to_string()))
    }

    async fn get_balance(&self, address: &str) -> DriverResult<String> {
        let result = self.rpc("eth_getBalance", json!([address, "latest"])).await?;
        Ok(parse_quantity(&result)?.to_string())
    }

    async fn is_available(&self) -> bool {
        self.rpc("eth_blockNumber", json!([])).await.is_ok()
    }

    async fn driver_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("type".into(), json!("evm"));
        info.insert("network".into(), json!(self.network));
        info.insert("rpc_url".into(), json!(self.rpc_url));
        info.insert("configured_chain_id".into(), json!(self.chain_id));
        if let Ok(chain) = self.rpc("eth_chainId", json!([])).await {
            info.insert(
                "chain_id".into(),
                parse_quantity_u64(&chain).map_or(Value::Null, |n| json!(n)),
            );
        }
        if let Ok(block) = self.rpc("eth_blockNumber", json!([])).await {
            info.insert(
                "block_number".into(),
                parse_quantity_u64(&block).map_or(Value::Null, |n| json!(n)),
            );
        }
        if let Some(account) = &self.default_account {
            info.insert("default_account".into(), json!(account));
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkKind;
    use crate::driver::MethodCall;

    fn local_config() -> NetworkConfig {
        NetworkConfig {
            kind: NetworkKind::Evm,
            // nothing listens on the discard port
            rpc_url: Some("http://127.0.0.1:9".to_string()),
            chain_id: Some(1337),
            explorer_url: None,
            ledger_path: None,
            default_account: Some("0x00000000000000000000000000000000000000aa".to_string()),
        }
    }

    #[test]
    fn test_requires_rpc_url() {
        let mut config = local_config();
        config.rpc_url = None;
        assert!(EvmDriver::new("local", &config, &DeploymentConfig::default()).is_err());
    }

    #[test]
    fn test_calldata_encodes_selector_and_args() {
        let request = TxRequest {
            data: "0xa9059cbb".to_string(),
            call: Some(MethodCall {
                abi: r#"[{"type":"function","name":"transfer","inputs":[
                    {"name":"to","type":"address"},{"name":"value","type":"uint256"}]}]"#
                    .to_string(),
                method: "transfer".to_string(),
                params: vec![json!("0x00000000000000000000000000000000000000bb"), json!(5)],
            }),
            ..TxRequest::default()
        };
        let data = EvmDriver::calldata(&request).unwrap();
        assert!(data.starts_with("0xa9059cbb"));
        assert_eq!(data.len(), 2 + 8 + 128);
        assert!(data.ends_with("05"));

        let raw = TxRequest {
            data: "0xdeadbeef".to_string(),
            ..TxRequest::default()
        };
        assert_eq!(EvmDriver::calldata(&raw).unwrap(), "0xdeadbeef");
    }

    #[test]
    fn test_parse_receipt() {
        let receipt = EvmDriver::parse_receipt(&json!({
            "transactionHash": "0xabc",
            "blockNumber": "0x10",
            "contractAddress": null,
            "gasUsed": "0x5208",
            "status": "0x0",
            "from": "0x01",
            "to": "0x02"
        }))
        .unwrap();
        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.resource_used, Some(21_000));
        assert!(!receipt.status);
        assert!(receipt.contract_address.is_none());

        assert!(EvmDriver::parse_receipt(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_node_reports_unavailable() {
        let driver = EvmDriver::new("local", &local_config(), &DeploymentConfig::default()).unwrap();
        assert!(!driver.is_available().await);
        assert!(driver.get_gas_price().await.is_err());
        let info = driver.driver_info().await;
        assert_eq!(info["type"], "evm");
        assert!(!info.contains_key("block_number"));
    }
}
