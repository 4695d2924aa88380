//! # `ledgerops`
//!
//! Contract lifecycle orchestration over pluggable ledger backends.
//!
//! ## Architecture
//!
//! Leaves first:
//! - **Compiler**: `solc` wrapper plus a versioned artifact store
//! - **Driver**: the only component talking to a ledger (`mock`, `evm`, `journal`)
//! - **Registry**: durable contract versions and their transactions
//! - **Deployer / Interactor / Upgrader**: the lifecycle workflows
//!
//! ## Upgrade model
//!
//! - Upgradeable contracts sit behind a fixed delegate-forwarding proxy
//! - Upgrading deploys a new implementation and repoints the proxy
//! - Rollback repoints the proxy at an older implementation
//! - Registry links are record ids, never in-memory references

#![forbid(unsafe_code)]
#![deny(clippy::all, rust_2018_idioms)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::future_not_send,
    clippy::too_many_lines,
    clippy::too_many_arguments,
    // Gas and byte counts are bounded
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    // Const fn not always beneficial for complex types
    clippy::missing_const_for_fn,
    // must_use on every fn is excessive
    clippy::must_use_candidate,
    // Pass by value is fine for small Copy types
    clippy::needless_pass_by_value,
    // Field naming matches domain terminology
    clippy::struct_field_names,
    // Match arms with same body are sometimes clearer separate
    clippy::match_same_arms
)]

pub mod compiler;
pub mod config;
pub mod contracts;
pub mod driver;
pub mod manager;
pub mod registry;
pub mod types;

pub use compiler::{Artifact, ArtifactStore, CompilerError, ContractCompiler};
pub use config::{ConfigError, LifecycleConfig, NetworkConfig, NetworkKind};
pub use contracts::{
    CallOptions, CallOutcome, ContractError, ContractResult, ContractSource, DeployParams,
    Deployer, Deployment, DeploymentPreview, Interactor, Migration, RollbackOptions,
    RollbackOutcome, TxOutcome, UpgradeOptions, UpgradeOutcome, UpgradeablePair, Upgrader,
};
pub use driver::{Driver, DriverError, LedgerDriver, Receipt};
pub use manager::{LifecycleManager, ManagerError};
pub use registry::{
    ContractFilter, ContractRegistry, ContractStatus, ContractTransaction, ContractVersion,
    RegistryError, TransactionStatus,
};
pub use types::{Abi, Address, RecordId};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
