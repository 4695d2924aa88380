//! Registry value records: contract versions and their transactions.
//!
//! Proxy and implementation links are plain record ids into the same
//! table, never in-memory references.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RegistryError, RegistryResult};
use crate::types::{now, Abi, AbiError, RecordId, Timestamp};

/// Deployment status of a contract version
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    /// Created, not yet on the ledger
    Pending,
    /// Live on the ledger
    Deployed,
    /// Superseded or retired
    Deprecated,
    /// Deployment failed
    Failed,
    /// Replaced by a newer implementation, kept for rollback
    Upgraded,
}

impl ContractStatus {
    /// Statuses under which the record must carry an address
    #[must_use]
    pub const fn has_address(self) -> bool {
        matches!(self, Self::Deployed | Self::Upgraded | Self::Deprecated)
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deployed => "deployed",
            Self::Deprecated => "deprecated",
            Self::Failed => "failed",
            Self::Upgraded => "upgraded",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deployed (or attempted) version of a logical contract
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractVersion {
    /// Registry id (0 until inserted)
    pub id: RecordId,
    /// Logical contract name
    pub name: String,
    /// Version label
    pub version: String,
    /// Backend family tag (`evm`, `journal`, `mock`, ...)
    pub kind: String,
    /// Ledger address once deployed
    pub address: Option<String>,
    /// Network name
    pub network: String,
    /// Account that submitted the deployment
    pub deployer_address: Option<String>,
    /// ABI JSON text
    pub abi: Option<String>,
    /// SHA-256 of the deployed bytecode
    pub bytecode_hash: Option<String>,
    /// Constructor arguments as submitted
    pub constructor_params: Vec<Value>,
    /// When the deployment landed
    pub deployed_at: Option<Timestamp>,
    /// Deployment transaction hash
    pub transaction_hash: Option<String>,
    /// Gas used by the deployment
    pub resource_used: Option<u64>,
    /// Lifecycle status
    pub status: ContractStatus,
    /// Whether this version sits behind a proxy
    pub is_upgradeable: bool,
    /// The proxy this implementation belongs to
    pub proxy_contract_id: Option<RecordId>,
    /// Set on proxy records: the current implementation
    pub implementation_of: Option<RecordId>,
    /// Free-form annotations
    pub metadata: BTreeMap<String, String>,
    /// Creation time
    pub created_at: Timestamp,
    /// Last update time
    pub updated_at: Timestamp,
}

impl ContractVersion {
    /// A new pending record, not yet inserted
    #[must_use]
    pub fn pending(name: &str, version: &str, kind: &str, network: &str) -> Self {
        let at = now();
        Self {
            id: 0,
            name: name.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            address: None,
            network: network.to_string(),
            deployer_address: None,
            abi: None,
            bytecode_hash: None,
            constructor_params: Vec::new(),
            deployed_at: None,
            transaction_hash: None,
            resource_used: None,
            status: ContractStatus::Pending,
            is_upgradeable: false,
            proxy_contract_id: None,
            implementation_of: None,
            metadata: BTreeMap::new(),
            created_at: at,
            updated_at: at,
        }
    }

    /// `name@version`
    #[must_use]
    pub fn full_identifier(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Is this record a proxy?
    #[must_use]
    pub fn is_proxy(&self) -> bool {
        self.implementation_of.is_some()
    }

    /// Deployed or kept for rollback
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            ContractStatus::Deployed | ContractStatus::Upgraded
        )
    }

    /// Parse the stored ABI, if any
    pub fn parsed_abi(&self) -> Option<Result<Abi, AbiError>> {
        self.abi.as_deref().map(Abi::parse)
    }

    /// Record a successful deployment
    pub fn mark_deployed(
        &mut self,
        address: &str,
        transaction_hash: &str,
        resource_used: Option<u64>,
    ) {
        self.address = Some(address.to_string());
        self.transaction_hash = Some(transaction_hash.to_string());
        self.resource_used = resource_used;
        self.deployed_at = Some(now());
        self.status = ContractStatus::Deployed;
    }

    /// Record a failed deployment
    pub fn mark_failed(&mut self, reason: &str) {
        self.status = ContractStatus::Failed;
        self.metadata.insert("error".to_string(), reason.to_string());
    }

    /// Retire this version
    pub fn deprecate(&mut self) {
        self.status = ContractStatus::Deprecated;
    }

    /// Check record-level invariants
    ///
    /// # Errors
    /// Returns `InvariantViolation` naming the broken rule
    pub fn validate(&self) -> RegistryResult<()> {
        if self.status.has_address() != self.address.is_some() {
            return Err(RegistryError::InvariantViolation(format!(
                "{} is {} but address is {}",
                self.full_identifier(),
                self.status,
                if self.address.is_some() { "set" } else { "unset" }
            )));
        }
        if self.is_proxy() && self.id != 0 && self.proxy_contract_id == Some(self.id) {
            return Err(RegistryError::InvariantViolation(format!(
                "proxy {} references itself",
                self.full_identifier()
            )));
        }
        Ok(())
    }
}

/// Outcome status of a ledger transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Submitted, not confirmed
    Pending,
    /// Confirmed and executed
    Success,
    /// Confirmed with failure
    Failed,
    /// Reverted during execution
    Reverted,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Reverted => "reverted",
        };
        f.write_str(s)
    }
}

/// A state-changing call submitted against a contract
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractTransaction {
    /// Registry id (0 until inserted)
    pub id: RecordId,
    /// Ledger transaction hash
    pub transaction_hash: String,
    /// Target contract record
    pub contract_id: RecordId,
    /// Method invoked (or workflow label, e.g. `rollback`)
    pub method_name: String,
    /// Call arguments
    pub parameters: Vec<Value>,
    /// Decoded return values, when known
    pub return_values: Option<Value>,
    /// Gas used
    pub resource_used: Option<u64>,
    /// Effective gas price
    pub resource_price: Option<u64>,
    /// Sender
    pub from_address: Option<String>,
    /// Recipient (contract address)
    pub to_address: Option<String>,
    /// Status
    pub status: TransactionStatus,
    /// Failure description
    pub error_message: Option<String>,
    /// The upgrade transaction this one undoes
    pub rollback_id: Option<RecordId>,
    /// Block (or journal sequence) that included it
    pub block_number: Option<u64>,
    /// When the outcome was observed
    pub confirmed_at: Option<Timestamp>,
    /// Creation time
    pub created_at: Timestamp,
}

impl ContractTransaction {
    /// A new pending transaction, not yet inserted
    #[must_use]
    pub fn pending(contract_id: RecordId, transaction_hash: &str, method_name: &str) -> Self {
        Self {
            id: 0,
            transaction_hash: transaction_hash.to_string(),
            contract_id,
            method_name: method_name.to_string(),
            parameters: Vec::new(),
            return_values: None,
            resource_used: None,
            resource_price: None,
            from_address: None,
            to_address: None,
            status: TransactionStatus::Pending,
            error_message: None,
            rollback_id: None,
            block_number: None,
            confirmed_at: None,
            created_at: now(),
        }
    }

    /// Mark confirmed and successful
    pub fn mark_successful(&mut self) {
        self.status = TransactionStatus::Success;
        self.confirmed_at = Some(now());
    }

    /// Mark confirmed with a failure
    pub fn mark_failed(&mut self, message: &str) {
        self.status = TransactionStatus::Failed;
        self.error_message = Some(message.to_string());
        self.confirmed_at = Some(now());
    }

    /// Fee paid, when both gas and price are known
    #[must_use]
    pub fn total_cost(&self) -> Option<u128> {
        Some(u128::from(self.resource_used?) * u128::from(self.resource_price?))
    }

    /// Has an outcome been observed?
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// Still awaiting confirmation?
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// Confirmed and successful?
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status == TransactionStatus::Success
    }

    /// Confirmed with failure or revert?
    #[must_use]
    pub fn has_failed(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Failed | TransactionStatus::Reverted
        )
    }

    /// Check record-level invariants
    ///
    /// # Errors
    /// Returns `InvariantViolation` naming the broken rule
    pub fn validate(&self) -> RegistryResult<()> {
        if self.is_pending() == self.confirmed_at.is_some() {
            return Err(RegistryError::InvariantViolation(format!(
                "transaction {} is {} but confirmed_at is {}",
                self.transaction_hash,
                self.status,
                if self.confirmed_at.is_some() { "set" } else { "unset" }
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_contract_is_valid() {
        let record = ContractVersion::pending("Token", "1.0.0", "mock", "local");
        assert_eq!(record.full_identifier(), "Token@1.0.0");
        assert!(record.validate().is_ok());
        assert!(!record.is_active());
    }

    #[test]
    fn test_address_invariant() {
        let mut record = ContractVersion::pending("Token", "1.0.0", "mock", "local");
        record.status = ContractStatus::Deployed;
        assert!(record.validate().is_err());

        record.mark_deployed("0xabc", "0xdef", Some(21_000));
        assert!(record.validate().is_ok());
        assert!(record.deployed_at.is_some());

        record.deprecate();
        assert!(record.validate().is_ok());

        let mut failed = ContractVersion::pending("Token", "1.0.1", "mock", "local");
        failed.mark_failed("out of gas");
        assert!(failed.validate().is_ok());
        assert_eq!(failed.metadata["error"], "out of gas");
    }

    #[test]
    fn test_proxy_self_reference_rejected() {
        let mut proxy = ContractVersion::pending("TokenProxy", "1.0.0", "mock", "local");
        proxy.id = 7;
        proxy.implementation_of = Some(3);
        proxy.proxy_contract_id = Some(7);
        assert!(proxy.validate().is_err());

        proxy.proxy_contract_id = None;
        assert!(proxy.validate().is_ok());
        assert!(proxy.is_proxy());
    }

    #[test]
    fn test_transaction_confirmation_invariant() {
        let mut tx = ContractTransaction::pending(1, "0xaa", "transfer");
        assert!(tx.validate().is_ok());
        assert!(tx.is_pending());

        tx.status = TransactionStatus::Success;
        assert!(tx.validate().is_err());

        tx.mark_successful();
        assert!(tx.validate().is_ok());
        assert!(tx.is_successful());

        tx.mark_failed("reverted");
        assert!(tx.has_failed());
        assert_eq!(tx.error_message.as_deref(), Some("reverted"));
    }

    #[test]
    fn test_total_cost() {
        let mut tx = ContractTransaction::pending(1, "0xaa", "transfer");
        assert_eq!(tx.total_cost(), None);
        tx.resource_used = Some(21_000);
        tx.resource_price = Some(2_000_000_000);
        assert_eq!(tx.total_cost(), Some(42_000_000_000_000));
    }

    #[test]
    fn test_abi_parsing() {
        let mut record = ContractVersion::pending("Token", "1.0.0", "mock", "local");
        assert!(record.parsed_abi().is_none());
        record.abi = Some(r#"[{"type":"function","name":"x","inputs":[]}]"#.to_string());
        let abi = record.parsed_abi().unwrap().unwrap();
        assert!(abi.function("x").is_some());
    }
}
