//! Ledger drivers.
//!
//! A driver is the only component that talks to a ledger. The set of
//! backends is closed: [`Driver`] is an enum over the concrete
//! implementations and dispatches each [`LedgerDriver`] call by match.
//!
//! Drivers see primitive identifiers only (addresses, hashes, ABI text),
//! never registry records.

pub mod codec;
pub mod evm;
pub mod journal;
pub mod mock;

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use evm::EvmDriver;
pub use journal::JournalDriver;
pub use mock::MockDriver;

use crate::config::{LifecycleConfig, NetworkKind};

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// A contract deployment request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeployRequest {
    /// ABI JSON text (used to encode constructor arguments)
    pub abi: String,
    /// Creation bytecode, 0x-prefixed hex
    pub bytecode: String,
    /// Constructor arguments
    pub constructor_params: Vec<Value>,
    /// Sender; drivers fall back to their default account
    pub from: Option<String>,
    /// Gas limit; drivers pick one when unset
    pub gas_limit: Option<u64>,
}

/// Result of a completed deployment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReceipt {
    /// Address of the new contract
    pub address: String,
    /// Deployment transaction hash
    pub transaction_hash: String,
    /// Gas used, when reported
    pub resource_used: Option<u64>,
    /// Sender, when known
    pub from: Option<String>,
}

/// The method a transaction invokes, for drivers that encode calldata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    /// ABI JSON text of the target contract
    pub abi: String,
    /// Method name
    pub method: String,
    /// Arguments
    pub params: Vec<Value>,
}

/// A transaction (or estimation) request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TxRequest {
    /// Recipient; `None` for contract creation
    pub to: Option<String>,
    /// Sender
    pub from: Option<String>,
    /// Calldata: at least the 4-byte method selector, 0x-prefixed
    pub data: String,
    /// Gas limit
    pub gas: Option<u64>,
    /// Structured call, when the caller resolved one
    pub call: Option<MethodCall>,
}

impl TxRequest {
    /// Method name, when the request carries a structured call
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.call.as_ref().map(|c| c.method.as_str())
    }
}

/// A transaction receipt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction hash
    pub transaction_hash: String,
    /// Including block; `None` while unmined
    pub block_number: Option<u64>,
    /// Created contract, for deployments
    pub contract_address: Option<String>,
    /// Gas used
    pub resource_used: Option<u64>,
    /// Effective gas price, when reported
    pub effective_gas_price: Option<u64>,
    /// Execution succeeded
    pub status: bool,
    /// Sender
    pub from: Option<String>,
    /// Recipient
    pub to: Option<String>,
}

/// Operations every ledger backend provides.
///
/// Futures are `Send` so drivers can be used from spawned tasks.
pub trait LedgerDriver {
    /// Deploy a contract and wait until its address is known
    fn deploy_contract(
        &self,
        request: &DeployRequest,
    ) -> impl Future<Output = DriverResult<DeployReceipt>> + Send;

    /// Execute a read-only method and return its decoded result
    fn call_contract(
        &self,
        address: &str,
        abi: &str,
        method: &str,
        params: &[Value],
    ) -> impl Future<Output = DriverResult<Value>> + Send;

    /// Estimate gas for a transaction
    fn estimate_gas(&self, request: &TxRequest) -> impl Future<Output = DriverResult<u64>> + Send;

    /// Look up a receipt; `None` while the transaction is unknown or unmined
    fn get_transaction_receipt(
        &self,
        hash: &str,
    ) -> impl Future<Output = DriverResult<Option<Receipt>>> + Send;

    /// Current gas price in the ledger's smallest unit
    fn get_gas_price(&self) -> impl Future<Output = DriverResult<u64>> + Send;

    /// Submit a transaction and return its hash
    fn send_transaction(
        &self,
        request: &TxRequest,
    ) -> impl Future<Output = DriverResult<String>> + Send;

    /// Balance of an account as a decimal string
    fn get_balance(&self, address: &str) -> impl Future<Output = DriverResult<String>> + Send;

    /// Can the backend be reached?
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Descriptive key/value information
    fn driver_info(&self) -> impl Future<Output = Map<String, Value>> + Send;
}

/// The closed set of ledger backends
#[derive(Clone, Debug)]
pub enum Driver {
    /// In-process simulated chain
    Mock(MockDriver),
    /// Ethereum JSON-RPC node
    Evm(EvmDriver),
    /// Local append-only audit ledger
    Journal(JournalDriver),
}

impl Driver {
    /// Build the driver for a configured network
    pub fn connect(network: &str, config: &LifecycleConfig) -> DriverResult<Self> {
        let net = config
            .network(network)
            .map_err(|e| DriverError::Unavailable(e.to_string()))?;
        Ok(match net.kind {
            NetworkKind::Mock => Self::Mock(MockDriver::new(network)),
            NetworkKind::Evm => Self::Evm(EvmDriver::new(network, net, &config.deployment)?),
            NetworkKind::Journal => {
                let path = net
                    .ledger_path
                    .clone()
                    .unwrap_or_else(|| crate::config::data_dir().join("journal").join(network));
                Self::Journal(JournalDriver::open(network, &path)?)
            }
        })
    }

    /// Backend family tag stored on contract records
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Mock(_) => "mock",
            Self::Evm(_) => "evm",
            Self::Journal(_) => "journal",
        }
    }

    /// Account used when a request names no sender
    #[must_use]
    pub fn default_account(&self) -> Option<String> {
        match self {
            Self::Mock(d) => Some(d.default_account()),
            Self::Evm(d) => d.default_account().map(ToString::to_string),
            Self::Journal(_) => None,
        }
    }
}

impl LedgerDriver for Driver {
    async fn deploy_contract(&self, request: &DeployRequest) -> DriverResult<DeployReceipt> {
        match self {
            Self::Mock(d) => d.deploy_contract(request).await,
            Self::Evm(d) => d.deploy_contract(request).await,
            Self::Journal(d) => d.deploy_contract(request).await,
        }
    }

    async fn call_contract(
        &self,
        address: &str,
        abi: &str,
        method: &str,
        params: &[Value],
    ) -> DriverResult<Value> {
        match self {
            Self::Mock(d) => d.call_contract(address, abi, method, params).await,
            Self::Evm(d) => d.call_contract(address, abi, method, params).await,
            Self::Journal(d) => d.call_contract(address, abi, method, params).await,
        }
    }

    async fn estimate_gas(&self, request: &TxRequest) -> DriverResult<u64> {
        match self {
            Self::Mock(d) => d.estimate_gas(request).await,
            Self::Evm(d) => d.estimate_gas(request).await,
            Self::Journal(d) => d.estimate_gas(request).await,
        }
    }

    async fn get_transaction_receipt(&self, hash: &str) -> DriverResult<Option<Receipt>> {
        match self {
            Self::Mock(d) => d.get_transaction_receipt(hash).await,
            Self::Evm(d) => d.get_transaction_receipt(hash).await,
            Self::Journal(d) => d.get_transaction_receipt(hash).await,
        }
    }

    async fn get_gas_price(&self) -> DriverResult<u64> {
        match self {
            Self::Mock(d) => d.get_gas_price().await,
            Self::Evm(d) => d.get_gas_price().await,
            Self::Journal(d) => d.get_gas_price().await,
        }
    }

    async fn send_transaction(&self, request: &TxRequest) -> DriverResult<String> {
        match self {
            Self::Mock(d) => d.send_transaction(request).await,
            Self::Evm(d) => d.send_transaction(request).await,
            Self::Journal(d) => d.send_transaction(request).await,
        }
    }

    async fn get_balance(&self, address: &str) -> DriverResult<String> {
        match self {
            Self::Mock(d) => d.get_balance(address).await,
            Self::Evm(d) => d.get_balance(address).await,
            Self::Journal(d) => d.get_balance(address).await,
        }
    }

    async fn is_available(&self) -> bool {
        match self {
            Self::Mock(d) => d.is_available().await,
            Self::Evm(d) => d.is_available().await,
            Self::Journal(d) => d.is_available().await,
        }
    }

    async fn driver_info(&self) -> Map<String, Value> {
        match self {
            Self::Mock(d) => d.driver_info().await,
            Self::Evm(d) => d.driver_info().await,
            Self::Journal(d) => d.driver_info().await,
        }
    }
}

/// Random 32-byte hash, 0x-prefixed (simulated ledgers)
pub(crate) fn random_hash() -> String {
    format!("0x{}", hex::encode(rand::random::<[u8; 32]>()))
}

/// Driver errors
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Backend cannot be reached
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// Request failed in transit
    #[error("transport error: {0}")]
    Transport(String),

    /// Node returned a JSON-RPC error object
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },

    /// Response did not have the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Backend does not support this operation
    #[error("{driver} driver does not support {operation}")]
    Unsupported {
        /// Backend name
        driver: &'static str,
        /// Operation attempted
        operation: String,
    },

    /// Arguments could not be encoded
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Ledger rejected the request
    #[error("rejected: {0}")]
    Rejected(String),

    /// Waited too long for the ledger
    #[error("timed out: {0}")]
    Timeout(String),

    /// Submitted, but no receipt arrived in time
    #[error("timed out: no receipt for {hash} within {waited:?}")]
    ReceiptTimeout {
        /// Hash of the submitted transaction
        hash: String,
        /// How long the driver waited
        waited: Duration,
    },

    /// Local ledger storage failed
    #[error("storage error: {0}")]
    Storage(String),
}

impl DriverError {
    /// Hash of a transaction that reached the ledger before the failure
    #[must_use]
    pub fn transaction_hash(&self) -> Option<&str> {
        match self {
            Self::ReceiptTimeout { hash, .. } => Some(hash),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DriverError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Unavailable(e.to_string())
        } else if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<sled::Error> for DriverError {
    fn from(e: sled::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_by_network_kind() {
        let config = LifecycleConfig::default();
        let driver = Driver::connect("mock", &config).unwrap();
        assert_eq!(driver.kind(), "mock");
        assert!(driver.default_account().is_some());

        let driver = Driver::connect("local", &config).unwrap();
        assert_eq!(driver.kind(), "evm");

        assert!(matches!(
            Driver::connect("nowhere", &config),
            Err(DriverError::Unavailable(_))
        ));
    }

    #[test]
    fn test_record_kind_tags() {
        let config = LifecycleConfig::default();
        let mock = Driver::connect("mock", &config).unwrap();
        assert_eq!(mock.kind(), NetworkKind::Mock.as_str());
        let evm = Driver::connect("local", &config).unwrap();
        assert_eq!(evm.kind(), NetworkKind::Evm.as_str());

        let tags: Vec<_> = [NetworkKind::Evm, NetworkKind::Journal, NetworkKind::Mock]
            .into_iter()
            .map(NetworkKind::as_str)
            .collect();
        assert_eq!(tags, ["evm", "journal", "mock"]);
    }

    #[test]
    fn test_receipt_timeout_names_hash() {
        let err = DriverError::ReceiptTimeout {
            hash: "0xabc".to_string(),
            waited: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "timed out: no receipt for 0xabc within 300s");
        assert_eq!(err.transaction_hash(), Some("0xabc"));
        assert_eq!(DriverError::Timeout("rpc".to_string()).transaction_hash(), None);
    }

    #[tokio::test]
    async fn test_dispatch_reaches_backend() {
        let mock = MockDriver::new("unit");
        let driver = Driver::Mock(mock.clone());
        assert!(driver.is_available().await);
        let info = driver.driver_info().await;
        assert_eq!(info["type"], "mock");

        mock.set_available(false);
        assert!(!driver.is_available().await);
    }

    #[test]
    fn test_random_hash_shape() {
        let hash = random_hash();
        assert_eq!(hash.len(), 66);
        assert!(hash.starts_with("0x"));
    }
}
