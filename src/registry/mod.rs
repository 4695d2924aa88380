//! Durable contract registry.
//!
//! Contract versions and transactions live in two sled trees keyed by
//! big-endian record ids, so iteration order is insertion order. Every write
//! is a single-record upsert; multi-step workflows above this layer are not
//! atomic and report the step that failed.

pub mod records;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use records::{ContractStatus, ContractTransaction, ContractVersion, TransactionStatus};

use crate::types::{now, RecordId};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

const CONTRACTS_TREE: &str = "contracts";
const TRANSACTIONS_TREE: &str = "transactions";

/// Predicate over contract records; unset fields match anything
#[derive(Clone, Debug, Default)]
pub struct ContractFilter {
    /// Logical name
    pub name: Option<String>,
    /// Version label
    pub version: Option<String>,
    /// Ledger address (case-insensitive)
    pub address: Option<String>,
    /// Network name
    pub network: Option<String>,
    /// Accepted statuses (empty = any)
    pub statuses: Vec<ContractStatus>,
}

impl ContractFilter {
    /// Match any record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a name
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Restrict to a version
    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    /// Restrict to an address
    #[must_use]
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    /// Restrict to a network
    #[must_use]
    pub fn network(mut self, network: &str) -> Self {
        self.network = Some(network.to_string());
        self
    }

    /// Accept a status (repeatable)
    #[must_use]
    pub fn status(mut self, status: ContractStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Does `record` satisfy the filter?
    #[must_use]
    pub fn matches(&self, record: &ContractVersion) -> bool {
        self.name.as_ref().map_or(true, |n| *n == record.name)
            && self.version.as_ref().map_or(true, |v| *v == record.version)
            && self.network.as_ref().map_or(true, |n| *n == record.network)
            && self.address.as_ref().map_or(true, |a| {
                record
                    .address
                    .as_ref()
                    .is_some_and(|own| own.eq_ignore_ascii_case(a))
            })
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
    }
}

/// Registry of contract versions and their transactions
#[derive(Clone)]
pub struct ContractRegistry {
    db: sled::Db,
    contracts: sled::Tree,
    transactions: sled::Tree,
}

impl std::fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRegistry")
            .field("contracts", &self.contracts.len())
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

impl ContractRegistry {
    /// Open (or create) a registry at `path`
    pub fn open(path: &Path) -> RegistryResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// A throwaway registry removed on drop
    pub fn temporary() -> RegistryResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> RegistryResult<Self> {
        let contracts = db.open_tree(CONTRACTS_TREE)?;
        let transactions = db.open_tree(TRANSACTIONS_TREE)?;
        Ok(Self {
            db,
            contracts,
            transactions,
        })
    }

    fn next_id(&self) -> RegistryResult<RecordId> {
        // sled ids start at zero; zero marks an uninserted record
        Ok(self.db.generate_id()? + 1)
    }

    // ── contracts ──────────────────────────────────────────────────────

    /// Insert a new contract version, assigning its id
    pub fn insert_contract(&self, mut record: ContractVersion) -> RegistryResult<ContractVersion> {
        record.id = self.next_id()?;
        record.validate()?;
        put(&self.contracts, record.id, &record)?;
        Ok(record)
    }

    /// Persist changes to an existing contract version
    pub fn update_contract(&self, record: &mut ContractVersion) -> RegistryResult<()> {
        if !self.contracts.contains_key(record.id.to_be_bytes())? {
            return Err(RegistryError::ContractNotFound(record.id));
        }
        record.updated_at = now();
        record.validate()?;
        put(&self.contracts, record.id, record)
    }

    /// Fetch a contract version by id
    pub fn contract(&self, id: RecordId) -> RegistryResult<Option<ContractVersion>> {
        get(&self.contracts, id)
    }

    /// Fetch a contract version that must exist
    pub fn require_contract(&self, id: RecordId) -> RegistryResult<ContractVersion> {
        self.contract(id)?.ok_or(RegistryError::ContractNotFound(id))
    }

    /// Remove a contract version
    pub fn remove_contract(&self, id: RecordId) -> RegistryResult<bool> {
        Ok(self.contracts.remove(id.to_be_bytes())?.is_some())
    }

    /// All contract versions matching `filter`, in id order
    pub fn find_contracts(&self, filter: &ContractFilter) -> RegistryResult<Vec<ContractVersion>> {
        let mut out = Vec::new();
        for entry in self.contracts.iter() {
            let (_, bytes) = entry?;
            let record: ContractVersion = decode(&bytes)?;
            if filter.matches(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// The most recently created match, ordered by `(created_at, id)`
    pub fn latest_contract(&self, filter: &ContractFilter) -> RegistryResult<Option<ContractVersion>> {
        Ok(self
            .find_contracts(filter)?
            .into_iter()
            .max_by_key(|c| (c.created_at, c.id)))
    }

    /// Number of contract versions
    #[must_use]
    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }

    /// Resolve a user-supplied identifier.
    ///
    /// Accepts `name@version`, an address, or a bare name; for addresses and
    /// bare names a deployed record is preferred, newest first.
    pub fn resolve(
        &self,
        identifier: &str,
        network: Option<&str>,
    ) -> RegistryResult<Option<ContractVersion>> {
        let scoped = |filter: ContractFilter| match network {
            Some(n) => filter.network(n),
            None => filter,
        };

        if let Some((name, version)) = identifier.split_once('@') {
            return self.latest_contract(&scoped(ContractFilter::new().name(name).version(version)));
        }

        for filter in [
            ContractFilter::new().address(identifier),
            ContractFilter::new().name(identifier),
        ] {
            let deployed = scoped(filter.clone()).status(ContractStatus::Deployed);
            if let Some(found) = self.latest_contract(&deployed)? {
                return Ok(Some(found));
            }
            if let Some(found) = self.latest_contract(&scoped(filter))? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    // ── transactions ───────────────────────────────────────────────────

    /// Insert a new transaction, assigning its id
    pub fn insert_transaction(
        &self,
        mut record: ContractTransaction,
    ) -> RegistryResult<ContractTransaction> {
        record.id = self.next_id()?;
        record.validate()?;
        put(&self.transactions, record.id, &record)?;
        Ok(record)
    }

    /// Persist changes to an existing transaction
    pub fn update_transaction(&self, record: &ContractTransaction) -> RegistryResult<()> {
        if !self.transactions.contains_key(record.id.to_be_bytes())? {
            return Err(RegistryError::TransactionNotFound(record.id));
        }
        record.validate()?;
        put(&self.transactions, record.id, record)
    }

    /// Fetch a transaction by id
    pub fn transaction(&self, id: RecordId) -> RegistryResult<Option<ContractTransaction>> {
        get(&self.transactions, id)
    }

    /// Fetch a transaction by ledger hash
    pub fn transaction_by_hash(&self, hash: &str) -> RegistryResult<Option<ContractTransaction>> {
        Ok(self
            .scan_transactions(|tx| tx.transaction_hash.eq_ignore_ascii_case(hash))?
            .pop())
    }

    /// All transactions against a contract, oldest first
    pub fn transactions_for(&self, contract_id: RecordId) -> RegistryResult<Vec<ContractTransaction>> {
        self.scan_transactions(|tx| tx.contract_id == contract_id)
    }

    /// The `limit` most recent transactions against a contract, newest first
    pub fn recent_transactions(
        &self,
        contract_id: RecordId,
        limit: usize,
    ) -> RegistryResult<Vec<ContractTransaction>> {
        let mut txs = self.transactions_for(contract_id)?;
        txs.reverse();
        txs.truncate(limit);
        Ok(txs)
    }

    /// Number of transactions
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    fn scan_transactions(
        &self,
        keep: impl Fn(&ContractTransaction) -> bool,
    ) -> RegistryResult<Vec<ContractTransaction>> {
        let mut out = Vec::new();
        for entry in self.transactions.iter() {
            let (_, bytes) = entry?;
            let record: ContractTransaction = decode(&bytes)?;
            if keep(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> RegistryResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn put<T: Serialize>(tree: &sled::Tree, id: RecordId, record: &T) -> RegistryResult<()> {
    let bytes = serde_json::to_vec(record).map_err(|e| RegistryError::Serialization(e.to_string()))?;
    tree.insert(id.to_be_bytes(), bytes)?;
    Ok(())
}

fn get<T: DeserializeOwned>(tree: &sled::Tree, id: RecordId) -> RegistryResult<Option<T>> {
    tree.get(id.to_be_bytes())?
        .map(|bytes| decode(&bytes))
        .transpose()
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> RegistryResult<T> {
    serde_json::from_slice(bytes).map_err(|e| RegistryError::Serialization(e.to_string()))
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Storage engine failure
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No contract version with this id
    #[error("contract record #{0} not found")]
    ContractNotFound(RecordId),

    /// No transaction with this id
    #[error("transaction record #{0} not found")]
    TransactionNotFound(RecordId),

    /// A write would break a record invariant
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployed(registry: &ContractRegistry, name: &str, version: &str, address: &str) -> ContractVersion {
        let mut record = ContractVersion::pending(name, version, "mock", "local");
        record.mark_deployed(address, "0xhash", Some(100));
        registry.insert_contract(record).unwrap()
    }

    #[test]
    fn test_insert_assigns_monotonic_ids() {
        let registry = ContractRegistry::temporary().unwrap();
        let a = deployed(&registry, "Token", "1.0.0", "0x01");
        let b = deployed(&registry, "Token", "1.0.1", "0x02");
        assert!(a.id > 0);
        assert!(b.id > a.id);
        assert_eq!(registry.contract_count(), 2);
        assert_eq!(registry.contract(a.id).unwrap().unwrap(), a);
    }

    #[test]
    fn test_update_requires_existing_and_valid() {
        let registry = ContractRegistry::temporary().unwrap();
        let mut record = ContractVersion::pending("Token", "1.0.0", "mock", "local");
        record.id = 99;
        assert!(matches!(
            registry.update_contract(&mut record),
            Err(RegistryError::ContractNotFound(99))
        ));

        let mut stored = registry
            .insert_contract(ContractVersion::pending("Token", "1.0.0", "mock", "local"))
            .unwrap();
        stored.status = ContractStatus::Deployed;
        assert!(matches!(
            registry.update_contract(&mut stored),
            Err(RegistryError::InvariantViolation(_))
        ));
        // the rejected write left the stored row untouched
        assert_eq!(
            registry.contract(stored.id).unwrap().unwrap().status,
            ContractStatus::Pending
        );
    }

    #[test]
    fn test_filters() {
        let registry = ContractRegistry::temporary().unwrap();
        deployed(&registry, "Token", "1.0.0", "0xAA");
        deployed(&registry, "Token", "1.0.1", "0xBB");
        deployed(&registry, "Vault", "1.0.0", "0xCC");

        let tokens = registry.find_contracts(&ContractFilter::new().name("Token")).unwrap();
        assert_eq!(tokens.len(), 2);

        let by_address = registry
            .find_contracts(&ContractFilter::new().address("0xbb"))
            .unwrap();
        assert_eq!(by_address[0].version, "1.0.1");

        let none = registry
            .find_contracts(&ContractFilter::new().network("sepolia"))
            .unwrap();
        assert!(none.is_empty());

        let latest = registry
            .latest_contract(&ContractFilter::new().name("Token"))
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, "1.0.1");
    }

    #[test]
    fn test_resolve_identifier() {
        let registry = ContractRegistry::temporary().unwrap();
        let v1 = deployed(&registry, "Token", "1.0.0", "0xAA");
        let mut v2 = deployed(&registry, "Token", "1.0.1", "0xBB");
        v2.deprecate();
        registry.update_contract(&mut v2).unwrap();

        assert_eq!(registry.resolve("Token@1.0.1", None).unwrap().unwrap().id, v2.id);
        // bare names prefer a deployed record over a newer deprecated one
        assert_eq!(registry.resolve("Token", None).unwrap().unwrap().id, v1.id);
        assert_eq!(registry.resolve("0xbb", Some("local")).unwrap().unwrap().id, v2.id);
        assert!(registry.resolve("Token", Some("mainnet")).unwrap().is_none());
        assert!(registry.resolve("Missing@1.0.0", None).unwrap().is_none());
    }

    #[test]
    fn test_transactions() {
        let registry = ContractRegistry::temporary().unwrap();
        let contract = deployed(&registry, "Token", "1.0.0", "0xAA");

        let first = registry
            .insert_transaction(ContractTransaction::pending(contract.id, "0x01", "transfer"))
            .unwrap();
        let mut second = registry
            .insert_transaction(ContractTransaction::pending(contract.id, "0x02", "approve"))
            .unwrap();
        registry
            .insert_transaction(ContractTransaction::pending(contract.id + 100, "0x03", "x"))
            .unwrap();

        assert_eq!(registry.transactions_for(contract.id).unwrap().len(), 2);
        let recent = registry.recent_transactions(contract.id, 1).unwrap();
        assert_eq!(recent[0].id, second.id);

        second.mark_successful();
        second.block_number = Some(12);
        registry.update_transaction(&second).unwrap();
        let fetched = registry.transaction_by_hash("0x02").unwrap().unwrap();
        assert!(fetched.is_successful());
        assert_eq!(fetched.block_number, Some(12));
        assert!(registry.transaction(first.id).unwrap().unwrap().is_pending());
    }

    #[test]
    fn test_reopen_persists() {
        let dir = std::env::temp_dir().join(format!("ledgerops-registry-{}", rand::random::<u64>()));
        let id = {
            let registry = ContractRegistry::open(&dir).unwrap();
            let record = deployed(&registry, "Token", "1.0.0", "0xAA");
            registry.flush().unwrap();
            record.id
        };
        let registry = ContractRegistry::open(&dir).unwrap();
        assert_eq!(registry.contract(id).unwrap().unwrap().name, "Token");
        drop(registry);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
