//! Append-only journal ledger.
//!
//! A centralized audit ledger kept in a local sled database. Every
//! deployment or transaction becomes an immutable entry whose sequence
//! number acts as its block number. Nothing executes, so gas is free and
//! read calls are unsupported.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{DeployReceipt, DeployRequest, DriverError, DriverResult, LedgerDriver, Receipt, TxRequest};
use crate::types::{now, Timestamp};

const ENTRIES_TREE: &str = "entries";
const HASH_INDEX_TREE: &str = "by_hash";

/// One immutable journal entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal, starting at 1
    pub sequence: u64,
    /// `deploy` or `transaction`
    pub kind: String,
    /// Entry digest, used as the transaction hash
    pub hash: String,
    /// Recorded content
    pub payload: Value,
    /// Sender, when known
    pub from: Option<String>,
    /// Recipient, when known
    pub to: Option<String>,
    /// Append time
    pub recorded_at: Timestamp,
}

/// Journal ledger backed by sled
#[derive(Clone)]
pub struct JournalDriver {
    name: String,
    path: Option<PathBuf>,
    db: sled::Db,
    entries: sled::Tree,
    by_hash: sled::Tree,
}

impl std::fmt::Debug for JournalDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalDriver")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl JournalDriver {
    /// Open (or create) the journal at `path`
    pub fn open(name: &str, path: &Path) -> DriverResult<Self> {
        let db = sled::open(path).map_err(|e| DriverError::Unavailable(e.to_string()))?;
        Self::from_db(name, Some(path.to_path_buf()), db)
    }

    /// A throwaway journal removed on drop
    pub fn temporary(name: &str) -> DriverResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(name, None, db)
    }

    fn from_db(name: &str, path: Option<PathBuf>, db: sled::Db) -> DriverResult<Self> {
        Ok(Self {
            name: name.to_string(),
            path,
            entries: db.open_tree(ENTRIES_TREE)?,
            by_hash: db.open_tree(HASH_INDEX_TREE)?,
            db,
        })
    }

    fn append(
        &self,
        kind: &str,
        payload: Value,
        from: Option<String>,
        to: Option<String>,
    ) -> DriverResult<JournalEntry> {
        let sequence = self.db.generate_id()? + 1;
        let recorded_at = now();

        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(sequence.to_be_bytes());
        hasher.update(payload.to_string().as_bytes());
        hasher.update(recorded_at.to_rfc3339().as_bytes());
        let hash = format!("0x{}", hex::encode(hasher.finalize()));

        let entry = JournalEntry {
            sequence,
            kind: kind.to_string(),
            hash: hash.clone(),
            payload,
            from,
            to,
            recorded_at,
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| DriverError::Storage(e.to_string()))?;
        self.entries.insert(sequence.to_be_bytes(), bytes)?;
        self.by_hash.insert(hash.as_bytes(), sequence.to_be_bytes().to_vec())?;
        debug!(journal = %self.name, sequence, %kind, "journal entry appended");
        Ok(entry)
    }

    /// Look up an entry by its hash
    pub fn entry(&self, hash: &str) -> DriverResult<Option<JournalEntry>> {
        let Some(seq) = self.by_hash.get(hash.as_bytes())? else {
            return Ok(None);
        };
        let Some(bytes) = self.entries.get(seq)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| DriverError::Storage(e.to_string()))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the journal empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LedgerDriver for JournalDriver {
    async fn deploy_contract(&self, request: &DeployRequest) -> DriverResult<DeployReceipt> {
        let bytecode_hash = hex::encode(Sha256::digest(request.bytecode.as_bytes()));
        let entry = self.append(
            "deploy",
            json!({
                "bytecode_hash": bytecode_hash,
                "constructor_params": request.constructor_params,
            }),
            request.from.clone(),
            None,
        )?;
        Ok(DeployReceipt {
            address: format!("journal:{}:{}", self.name, entry.sequence),
            transaction_hash: entry.hash,
            resource_used: Some(0),
            from: entry.from,
        })
    }

    async fn call_contract(
        &self,
        _address: &str,
        _abi: &str,
        method: &str,
        _params: &[Value],
    ) -> DriverResult<Value> {
        Err(DriverError::Unsupported {
            driver: "journal",
            operation: format!("read call `{method}`"),
        })
    }

    async fn estimate_gas(&self, _request: &TxRequest) -> DriverResult<u64> {
        Ok(0)
    }

    async fn get_transaction_receipt(&self, hash: &str) -> DriverResult<Option<Receipt>> {
        Ok(self.entry(hash)?.map(|entry| Receipt {
            transaction_hash: entry.hash,
            block_number: Some(entry.sequence),
            contract_address: (entry.kind == "deploy")
                .then(|| format!("journal:{}:{}", self.name, entry.sequence)),
            resource_used: Some(0),
            effective_gas_price: Some(0),
            status: true,
            from: entry.from,
            to: entry.to,
        }))
    }

    async fn get_gas_price(&self) -> DriverResult<u64> {
        Ok(0)
    }

    async fn send_transaction(&self, request: &TxRequest) -> DriverResult<String> {
        let payload = match &request.call {
            Some(call) => json!({ "method": call.method, "params": call.params, "data": request.data }),
            None => json!({ "data": request.data }),
        };
        let entry = self.append("transaction", payload, request.from.clone(), request.to.clone())?;
        Ok(entry.hash)
    }

    async fn get_balance(&self, _address: &str) -> DriverResult<String> {
        Ok("0".to_string())
    }

    async fn is_available(&self) -> bool {
        self.db.size_on_disk().is_ok()
    }

    async fn driver_info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("type".into(), json!("journal"));
        info.insert("ledger".into(), json!(self.name));
        info.insert("entries".into(), json!(self.len()));
        if let Some(path) = &self.path {
            info.insert("path".into(), json!(path.display().to_string()));
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deploy_is_journaled() {
        let journal = JournalDriver::temporary("audit").unwrap();
        let receipt = journal
            .deploy_contract(&DeployRequest {
                bytecode: "0x6080".to_string(),
                from: Some("ops".to_string()),
                ..DeployRequest::default()
            })
            .await
            .unwrap();
        assert!(receipt.address.starts_with("journal:audit:"));
        assert_eq!(receipt.resource_used, Some(0));

        let mined = journal
            .get_transaction_receipt(&receipt.transaction_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mined.contract_address, Some(receipt.address));
        assert_eq!(mined.from.as_deref(), Some("ops"));
        assert_eq!(journal.len(), 1);
    }

    #[tokio::test]
    async fn test_sequences_increase() {
        let journal = JournalDriver::temporary("audit").unwrap();
        let a = journal.send_transaction(&TxRequest::default()).await.unwrap();
        let b = journal.send_transaction(&TxRequest::default()).await.unwrap();
        assert_ne!(a, b);

        let first = journal.get_transaction_receipt(&a).await.unwrap().unwrap();
        let second = journal.get_transaction_receipt(&b).await.unwrap().unwrap();
        assert!(second.block_number > first.block_number);
        assert!(journal.get_transaction_receipt("0xmissing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_execution() {
        let journal = JournalDriver::temporary("audit").unwrap();
        assert!(matches!(
            journal.call_contract("x", "[]", "balanceOf", &[]).await,
            Err(DriverError::Unsupported { .. })
        ));
        assert_eq!(journal.estimate_gas(&TxRequest::default()).await.unwrap(), 0);
        assert_eq!(journal.get_gas_price().await.unwrap(), 0);
        assert!(journal.is_available().await);
    }
}
