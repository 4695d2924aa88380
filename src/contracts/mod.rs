//! Contract lifecycle orchestration.
//!
//! ## Components
//!
//! 1. **Deployer**: resolves an artifact, records a pending version, submits
//!    the deployment and records the outcome
//! 2. **Interactor**: resolves a method against the ABI, serves reads
//!    directly and turns writes into tracked transactions
//! 3. **Upgrader**: proxy-based upgrades and rollbacks built on the two above
//!
//! ## Failure model
//!
//! Registry writes are single-record upserts. Workflows that span the ledger
//! and several records are not atomic: once the ledger has been changed, a
//! failing registry step surfaces as [`ContractError::UpgradeIncomplete`]
//! naming the step, and [`reconcile`] can find the resulting drift.

pub mod deployer;
pub mod interactor;
pub mod params;
pub mod proxy;
pub mod reconcile;
pub mod upgrader;
pub mod watch;

use std::fmt;

use serde::Serialize;
use serde_json::Value;

pub use deployer::{ContractSource, DeployParams, Deployer, Deployment, DeploymentPreview};
pub use interactor::{CallOptions, Interactor};
pub use params::{format_return_value, parse_parameters};
pub use reconcile::{reconcile, Finding};
pub use upgrader::{
    increment_version, Migration, RollbackOptions, RollbackOutcome, UpgradeOptions,
    UpgradeOutcome, UpgradeablePair, Upgrader,
};

use crate::compiler::CompilerError;
use crate::driver::{DriverError, Receipt};
use crate::registry::{ContractTransaction, RegistryError};
use crate::types::{AbiError, RecordId};

/// Result type for lifecycle operations
pub type ContractResult<T> = Result<T, ContractError>;

/// Outcome of a state-changing call
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TxOutcome {
    /// Submitted; no receipt observed (fire-and-forget or wait timed out)
    Submitted {
        /// Ledger transaction hash
        transaction_hash: String,
        /// The pending registry record
        record: ContractTransaction,
    },
    /// Receipt observed; `receipt.status` tells success from failure
    Confirmed {
        /// The receipt
        receipt: Receipt,
        /// The updated registry record
        record: ContractTransaction,
    },
}

impl TxOutcome {
    /// Ledger transaction hash
    #[must_use]
    pub fn transaction_hash(&self) -> &str {
        match self {
            Self::Submitted {
                transaction_hash, ..
            } => transaction_hash,
            Self::Confirmed { receipt, .. } => &receipt.transaction_hash,
        }
    }

    /// The registry record
    #[must_use]
    pub fn record(&self) -> &ContractTransaction {
        match self {
            Self::Submitted { record, .. } | Self::Confirmed { record, .. } => record,
        }
    }

    /// Was a receipt observed?
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// `Some(success)` once confirmed, `None` while pending
    #[must_use]
    pub fn succeeded(&self) -> Option<bool> {
        match self {
            Self::Submitted { .. } => None,
            Self::Confirmed { receipt, .. } => Some(receipt.status),
        }
    }
}

/// Outcome of [`Interactor::call`]
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "lowercase")]
pub enum CallOutcome {
    /// A read-only call's decoded return value
    Value(Value),
    /// A state-changing call
    Transaction(TxOutcome),
}

/// Workflow step that failed after the ledger was already changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeStep {
    /// Linking the implementation back to its proxy
    LinkImplementation,
    /// Confirming the proxy repoint transaction
    Repoint,
    /// Recording the proxy's new current implementation
    RecordProxyPointer,
    /// Marking the superseded implementation `upgraded`
    MarkPreviousUpgraded,
    /// Restoring the rollback target to `deployed`
    RestoreTarget,
    /// Deprecating the rolled-back-from version
    RetirePrevious,
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LinkImplementation => "link implementation to proxy",
            Self::Repoint => "repoint proxy",
            Self::RecordProxyPointer => "record proxy implementation",
            Self::MarkPreviousUpgraded => "mark previous version upgraded",
            Self::RestoreTarget => "restore rollback target",
            Self::RetirePrevious => "deprecate rolled-back version",
        };
        f.write_str(s)
    }
}

/// Lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// No explicit artifact, no source, and nothing stored
    #[error("no artifact found for {name}@{version}")]
    ArtifactNotFound {
        /// Contract name
        name: String,
        /// Version label
        version: String,
    },

    /// Source could not be compiled
    #[error("compilation failed: {0}")]
    CompilationFailed(#[source] CompilerError),

    /// Artifact store could not be read
    #[error("artifact store error: {0}")]
    ArtifactStore(#[source] CompilerError),

    /// No registry record matches the identifier
    #[error("contract not found: {0}")]
    UnknownContract(String),

    /// The contract record carries no ABI
    #[error("no ABI recorded for {0}")]
    AbiUnavailable(String),

    /// The recorded ABI is malformed
    #[error("invalid ABI: {0}")]
    InvalidAbi(#[from] AbiError),

    /// Method is not a function in the ABI
    #[error("method '{method}' not found in ABI of {contract}")]
    MethodNotFound {
        /// Requested method
        method: String,
        /// Contract identifier
        contract: String,
    },

    /// Argument count differs from the method's inputs
    #[error("method '{method}' expects {expected} parameters, got {actual}")]
    ParameterCountMismatch {
        /// Method name
        method: String,
        /// Declared input count
        expected: usize,
        /// Supplied argument count
        actual: usize,
    },

    /// The contract record has no ledger address
    #[error("{0} has no ledger address")]
    MissingAddress(String),

    /// The driver failed to deploy
    #[error("deployment of {contract} failed: {source}")]
    DeploymentFailed {
        /// Contract identifier
        contract: String,
        /// Driver failure
        #[source]
        source: DriverError,
    },

    /// Contract is not behind a proxy
    #[error("{0} is not upgradeable")]
    NotUpgradeable(String),

    /// Upgradeable contract has no proxy link
    #[error("no proxy recorded for {0}")]
    NoProxyFound(String),

    /// Proxy link points at a missing record
    #[error("proxy record #{0} not found")]
    ProxyNotFound(RecordId),

    /// Nothing older to roll back to
    #[error("no previous version found for {0}")]
    NoPreviousVersionFound(String),

    /// Requested rollback target does not exist
    #[error("version {version} of {name} not found")]
    TargetVersionNotFound {
        /// Contract name
        name: String,
        /// Requested version
        version: String,
    },

    /// The ledger could not be reached
    #[error("ledger unavailable during {operation}: {reason}")]
    DriverUnavailable {
        /// What was being attempted
        operation: String,
        /// Driver message
        reason: String,
    },

    /// Any other driver failure
    #[error("{operation} failed: {source}")]
    Driver {
        /// What was being attempted
        operation: String,
        /// Driver failure
        #[source]
        source: DriverError,
    },

    /// A multi-step workflow stopped after changing the ledger
    #[error("upgrade incomplete at step '{step}': {reason}")]
    UpgradeIncomplete {
        /// Failed step
        step: UpgradeStep,
        /// Cause
        reason: String,
    },

    /// Registry failure
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ContractError {
    /// Wrap a driver failure with the operation being attempted
    pub(crate) fn driver(operation: impl Into<String>, source: DriverError) -> Self {
        match source {
            DriverError::Unavailable(reason) => Self::DriverUnavailable {
                operation: operation.into(),
                reason,
            },
            source => Self::Driver {
                operation: operation.into(),
                source,
            },
        }
    }

    /// Attribute a failure to a workflow step
    pub(crate) fn at_step(step: UpgradeStep) -> impl FnOnce(RegistryError) -> Self {
        move |e| Self::UpgradeIncomplete {
            step,
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures: a mock ledger, a temporary registry and a seeded
    //! artifact store.

    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::compiler::artifact::tests::{sample_artifact, temp_store};
    use crate::compiler::ContractCompiler;
    use crate::config::{CompilerConfig, LifecycleConfig};
    use crate::driver::{Driver, MockDriver};
    use crate::registry::ContractRegistry;

    pub(crate) struct Harness {
        pub mock: MockDriver,
        pub registry: ContractRegistry,
        pub deployer: Deployer,
        pub interactor: Interactor,
        pub upgrader: Upgrader,
    }

    impl Harness {
        pub fn new() -> Self {
            let mock = MockDriver::new("local");
            let driver = Driver::Mock(mock.clone());
            let registry = ContractRegistry::temporary().unwrap();
            let store = temp_store();
            for version in ["1.0.0", "1.0.1", "1.0.2"] {
                store.store(&sample_artifact("Token", version)).unwrap();
            }
            let compiler = ContractCompiler::new(CompilerConfig::default(), store.root());
            let config = Arc::new(LifecycleConfig::default());

            let deployer = Deployer::new(driver.clone(), compiler, registry.clone(), config.clone());
            let interactor = Interactor::new(driver, registry.clone(), config)
                .with_poll_interval(Duration::from_millis(20));
            let upgrader = Upgrader::new(deployer.clone(), interactor.clone());
            Self {
                mock,
                registry,
                deployer,
                interactor,
                upgrader,
            }
        }

        pub fn params(&self, version: &str) -> DeployParams {
            DeployParams::new("Token", version, "local")
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(self.deployer.compiler().store().root());
        }
    }
}
