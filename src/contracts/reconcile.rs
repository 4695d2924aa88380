//! Registry consistency checks.
//!
//! Upgrade and rollback span several single-record writes. When a workflow
//! stops half way the registry can drift from the ledger; [`reconcile`]
//! lists what an operator has to repair.

use std::fmt;

use serde::Serialize;

use crate::registry::{
    ContractFilter, ContractRegistry, ContractStatus, ContractVersion, RegistryResult,
};
use crate::types::RecordId;

/// One inconsistency
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// A proxy points at a record that does not exist
    MissingImplementation {
        /// Proxy record
        proxy: RecordId,
        /// Dangling implementation id
        implementation: RecordId,
    },
    /// A proxy's current implementation is neither deployed nor upgraded
    InactiveImplementation {
        /// Proxy record
        proxy: RecordId,
        /// Implementation record
        implementation: RecordId,
        /// Its status
        status: ContractStatus,
    },
    /// The current implementation names a different proxy
    BacklinkMismatch {
        /// Proxy record
        proxy: RecordId,
        /// Implementation record
        implementation: RecordId,
        /// The proxy the implementation names
        backlink: Option<RecordId>,
    },
    /// A deployment never recorded its outcome
    StalePending {
        /// Contract record
        contract: RecordId,
        /// `name@version`
        identifier: String,
    },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingImplementation {
                proxy,
                implementation,
            } => write!(f, "proxy #{proxy} points at missing record #{implementation}"),
            Self::InactiveImplementation {
                proxy,
                implementation,
                status,
            } => write!(f, "proxy #{proxy} points at #{implementation} which is {status}"),
            Self::BacklinkMismatch {
                proxy,
                implementation,
                backlink,
            } => match backlink {
                Some(other) => write!(f, "#{implementation} is current for proxy #{proxy} but links to proxy #{other}"),
                None => write!(f, "#{implementation} is current for proxy #{proxy} but has no proxy link"),
            },
            Self::StalePending {
                contract,
                identifier,
            } => write!(f, "{identifier} (#{contract}) is still pending"),
        }
    }
}

/// Scan the registry for drift between proxies and implementations
pub fn reconcile(registry: &ContractRegistry) -> RegistryResult<Vec<Finding>> {
    let records = registry.find_contracts(&ContractFilter::new())?;
    let mut findings = Vec::new();

    for record in &records {
        if record.status == ContractStatus::Pending {
            findings.push(Finding::StalePending {
                contract: record.id,
                identifier: record.full_identifier(),
            });
        }
        if let Some(implementation) = record.implementation_of {
            check_proxy(record, implementation, &records, &mut findings);
        }
    }
    Ok(findings)
}

fn check_proxy(
    proxy: &ContractVersion,
    implementation: RecordId,
    records: &[ContractVersion],
    findings: &mut Vec<Finding>,
) {
    let Some(current) = records.iter().find(|r| r.id == implementation) else {
        findings.push(Finding::MissingImplementation {
            proxy: proxy.id,
            implementation,
        });
        return;
    };
    if !current.is_active() {
        findings.push(Finding::InactiveImplementation {
            proxy: proxy.id,
            implementation,
            status: current.status,
        });
    }
    if current.proxy_contract_id != Some(proxy.id) {
        findings.push(Finding::BacklinkMismatch {
            proxy: proxy.id,
            implementation,
            backlink: current.proxy_contract_id,
        });
    }
}
