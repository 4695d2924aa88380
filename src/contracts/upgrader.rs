//! Proxy-based upgrades and rollbacks.
//!
//! An upgradeable contract is a pair of records: the implementation, whose
//! `proxy_contract_id` names its proxy, and the proxy, whose
//! `implementation_of` names the implementation it currently forwards to.
//! Upgrading deploys a new implementation and repoints the proxy; rolling
//! back repoints it at an older implementation.
//!
//! Everything that can fail without touching the ledger (proxy resolution,
//! target lookup) is checked first. After the repoint, each registry step
//! reports itself through [`ContractError::UpgradeIncomplete`].
//!
//! A migration runs after the repoint. It is not compensated: a failing
//! migration is reported in [`UpgradeOutcome::migration_error`] while the
//! proxy keeps pointing at the new implementation.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use super::deployer::{ContractSource, DeployParams, Deployer};
use super::interactor::{CallOptions, Interactor};
use super::proxy::{proxy_artifact, proxy_name, UPGRADE_METHOD};
use super::{ContractError, ContractResult, TxOutcome, UpgradeStep};
use crate::registry::{ContractFilter, ContractRegistry, ContractStatus, ContractVersion};
use crate::types::RecordId;

/// Workflow label recorded on rollback transactions
pub const ROLLBACK_LABEL: &str = "rollback";

/// Step run after a successful upgrade, given `(old, new)`
pub enum Migration {
    /// In-process callback
    Callback(Box<dyn FnOnce(&ContractVersion, &ContractVersion) -> Result<(), String> + Send>),
    /// External executable; receives both versions through the environment
    Script(PathBuf),
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Migration::Callback(..)"),
            Self::Script(path) => f.debug_tuple("Migration::Script").field(path).finish(),
        }
    }
}

impl Migration {
    /// Wrap a callback
    pub fn callback(
        f: impl FnOnce(&ContractVersion, &ContractVersion) -> Result<(), String> + Send + 'static,
    ) -> Self {
        Self::Callback(Box::new(f))
    }

    async fn run(self, old: &ContractVersion, new: &ContractVersion) -> Result<(), String> {
        match self {
            Self::Callback(f) => f(old, new),
            Self::Script(path) => {
                let status = Command::new(&path)
                    .env("LEDGEROPS_CONTRACT", &new.name)
                    .env("LEDGEROPS_NETWORK", &new.network)
                    .env("LEDGEROPS_OLD_VERSION", &old.version)
                    .env("LEDGEROPS_NEW_VERSION", &new.version)
                    .env("LEDGEROPS_OLD_ADDRESS", old.address.as_deref().unwrap_or_default())
                    .env("LEDGEROPS_NEW_ADDRESS", new.address.as_deref().unwrap_or_default())
                    .status()
                    .await
                    .map_err(|e| format!("{}: {e}", path.display()))?;
                if status.success() {
                    Ok(())
                } else {
                    Err(format!("{} exited with {status}", path.display()))
                }
            }
        }
    }
}

/// Upgrade options
#[derive(Debug, Default)]
pub struct UpgradeOptions {
    /// Sender for the deployment and the repoint
    pub from: Option<String>,
    /// Constructor arguments for the new implementation
    pub constructor_params: Vec<Value>,
    /// Source to compile for the new version
    pub source: Option<ContractSource>,
    /// Gas limit for the deployment and the repoint
    pub gas_limit: Option<u64>,
    /// Confirmation timeout for the repoint
    pub timeout: Option<Duration>,
    /// Post-upgrade migration
    pub migration: Option<Migration>,
}

/// Rollback options
#[derive(Clone, Debug, Default)]
pub struct RollbackOptions {
    /// Sender for the repoint
    pub from: Option<String>,
    /// Gas limit for the repoint
    pub gas_limit: Option<u64>,
    /// Confirmation timeout for the repoint
    pub timeout: Option<Duration>,
}

/// A freshly created proxy and its first implementation
#[derive(Clone, Debug, Serialize)]
pub struct UpgradeablePair {
    /// The proxy record
    pub proxy: ContractVersion,
    /// The implementation record
    pub implementation: ContractVersion,
}

/// Result of [`Upgrader::upgrade`]
#[derive(Clone, Debug, Serialize)]
pub struct UpgradeOutcome {
    /// Superseded implementation, now `upgraded`
    pub old_contract: ContractVersion,
    /// New implementation
    pub new_contract: ContractVersion,
    /// Proxy, now pointing at `new_contract`
    pub proxy: ContractVersion,
    /// The repoint transaction
    pub transaction: TxOutcome,
    /// Set when the migration failed; the upgrade itself stands
    pub migration_error: Option<String>,
}

/// Result of [`Upgrader::rollback`]
#[derive(Clone, Debug, Serialize)]
pub struct RollbackOutcome {
    /// Implementation the proxy points at again
    pub restored_contract: ContractVersion,
    /// Implementation that was retired
    pub rolled_back_from: ContractVersion,
    /// Proxy, now pointing at `restored_contract`
    pub proxy: ContractVersion,
    /// The repoint transaction, recorded as `rollback`
    pub transaction: TxOutcome,
    /// The upgrade transaction this rollback undoes
    pub rollback_of: Option<RecordId>,
}

/// Upgrades and rolls back proxied contracts
#[derive(Clone, Debug)]
pub struct Upgrader {
    deployer: Deployer,
    interactor: Interactor,
    registry: ContractRegistry,
}

impl Upgrader {
    /// Create an upgrader sharing the deployer's registry
    #[must_use]
    pub fn new(deployer: Deployer, interactor: Interactor) -> Self {
        let registry = deployer.registry().clone();
        Self {
            deployer,
            interactor,
            registry,
        }
    }

    /// Deploy an implementation behind a fresh proxy and link the two
    pub async fn create_upgradeable_contract(
        &self,
        params: DeployParams,
    ) -> ContractResult<UpgradeablePair> {
        let name = params.name.clone();
        let version = params.version.clone();
        let network = params.network.clone();
        let from = params.from.clone();
        let gas_limit = params.gas_limit;

        let mut implementation = self.deployer.deploy(params.upgradeable(true)).await?.contract;
        let address = require_address(&implementation)?.to_string();

        let mut proxy_params = DeployParams::new(&proxy_name(&name), &version, &network)
            .artifact(proxy_artifact())
            .constructor_params(vec![json!(address)])
            .metadata("proxy_for", implementation.full_identifier());
        proxy_params.implementation_of = Some(implementation.id);
        proxy_params.from = from;
        proxy_params.gas_limit = gas_limit;
        let proxy = self.deployer.deploy(proxy_params).await?.contract;

        implementation.proxy_contract_id = Some(proxy.id);
        implementation.is_upgradeable = true;
        self.registry
            .update_contract(&mut implementation)
            .map_err(ContractError::at_step(UpgradeStep::LinkImplementation))?;

        info!(
            contract = %implementation.full_identifier(),
            proxy = ?proxy.address,
            "upgradeable contract created"
        );
        Ok(UpgradeablePair {
            proxy,
            implementation,
        })
    }

    /// Deploy `new_version` and repoint `old`'s proxy at it
    ///
    /// # Errors
    /// `NotUpgradeable`, `NoProxyFound` and `ProxyNotFound` are raised before
    /// anything is deployed.
    pub async fn upgrade(
        &self,
        old: &ContractVersion,
        new_version: &str,
        options: UpgradeOptions,
    ) -> ContractResult<UpgradeOutcome> {
        if !old.is_upgradeable {
            return Err(ContractError::NotUpgradeable(old.full_identifier()));
        }
        require_address(old)?;
        let mut proxy = self.resolve_proxy(old)?;

        let mut params = DeployParams::new(&old.name, new_version, &old.network)
            .upgradeable(true)
            .constructor_params(options.constructor_params)
            .metadata("upgraded_from", old.full_identifier());
        params.proxy_contract_id = Some(proxy.id);
        params.from.clone_from(&options.from);
        params.source = options.source;
        params.gas_limit = options.gas_limit;
        let new_contract = self.deployer.deploy(params).await?.contract;

        let call_options = CallOptions {
            from: options.from,
            gas_limit: options.gas_limit,
            wait: true,
            timeout: options.timeout,
        };
        let transaction = self
            .repoint(&proxy, &new_contract, &call_options, UPGRADE_METHOD, None)
            .await?;

        proxy.implementation_of = Some(new_contract.id);
        self.registry
            .update_contract(&mut proxy)
            .map_err(ContractError::at_step(UpgradeStep::RecordProxyPointer))?;

        let mut old_contract = self
            .registry
            .require_contract(old.id)
            .map_err(ContractError::at_step(UpgradeStep::MarkPreviousUpgraded))?;
        old_contract.status = ContractStatus::Upgraded;
        self.registry
            .update_contract(&mut old_contract)
            .map_err(ContractError::at_step(UpgradeStep::MarkPreviousUpgraded))?;

        info!(
            from = %old_contract.full_identifier(),
            to = %new_contract.full_identifier(),
            tx_hash = %transaction.transaction_hash(),
            "contract upgraded"
        );

        let migration_error = match options.migration {
            Some(migration) => match migration.run(&old_contract, &new_contract).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(contract = %new_contract.full_identifier(), error = %e, "migration failed, proxy stays upgraded");
                    Some(e)
                }
            },
            None => None,
        };

        Ok(UpgradeOutcome {
            old_contract,
            new_contract,
            proxy,
            transaction,
            migration_error,
        })
    }

    /// Repoint `contract`'s proxy at an older implementation.
    ///
    /// Without `target_version` the newest implementation created strictly
    /// before `contract` is chosen.
    ///
    /// # Errors
    /// `NotUpgradeable`, `TargetVersionNotFound`, `NoPreviousVersionFound`,
    /// `NoProxyFound` and `ProxyNotFound` are raised before the ledger is
    /// touched.
    pub async fn rollback(
        &self,
        contract: &ContractVersion,
        target_version: Option<&str>,
        options: &RollbackOptions,
    ) -> ContractResult<RollbackOutcome> {
        if !contract.is_upgradeable {
            return Err(ContractError::NotUpgradeable(contract.full_identifier()));
        }
        let mut target = self.find_rollback_target(contract, target_version)?;
        let mut proxy = self.resolve_proxy(contract)?;
        let rollback_of = self.last_upgrade_transaction(proxy.id)?;

        let call_options = CallOptions {
            from: options.from.clone(),
            gas_limit: options.gas_limit,
            wait: true,
            timeout: options.timeout,
        };
        let transaction = self
            .repoint(&proxy, &target, &call_options, ROLLBACK_LABEL, rollback_of)
            .await?;

        proxy.implementation_of = Some(target.id);
        self.registry
            .update_contract(&mut proxy)
            .map_err(ContractError::at_step(UpgradeStep::RecordProxyPointer))?;

        target.status = ContractStatus::Deployed;
        target.proxy_contract_id = Some(proxy.id);
        self.registry
            .update_contract(&mut target)
            .map_err(ContractError::at_step(UpgradeStep::RestoreTarget))?;

        let mut rolled_back_from = self
            .registry
            .require_contract(contract.id)
            .map_err(ContractError::at_step(UpgradeStep::RetirePrevious))?;
        rolled_back_from.deprecate();
        self.registry
            .update_contract(&mut rolled_back_from)
            .map_err(ContractError::at_step(UpgradeStep::RetirePrevious))?;

        info!(
            from = %rolled_back_from.full_identifier(),
            to = %target.full_identifier(),
            tx_hash = %transaction.transaction_hash(),
            "contract rolled back"
        );
        Ok(RollbackOutcome {
            restored_contract: target,
            rolled_back_from,
            proxy,
            transaction,
            rollback_of,
        })
    }

    /// The implementation a rollback of `contract` would restore
    pub fn find_rollback_target(
        &self,
        contract: &ContractVersion,
        target_version: Option<&str>,
    ) -> ContractResult<ContractVersion> {
        let candidates = self
            .registry
            .find_contracts(
                &ContractFilter::new()
                    .name(&contract.name)
                    .network(&contract.network),
            )?
            .into_iter()
            .filter(|c| {
                c.id != contract.id
                    && !c.is_proxy()
                    && c.address.is_some()
                    && c.is_upgradeable
                    && c.proxy_contract_id == contract.proxy_contract_id
            });

        match target_version {
            Some(version) => candidates
                .filter(|c| c.version == version)
                .max_by_key(|c| (c.created_at, c.id))
                .ok_or_else(|| ContractError::TargetVersionNotFound {
                    name: contract.name.clone(),
                    version: version.to_string(),
                }),
            None => {
                let current = (contract.created_at, contract.id);
                candidates
                    .filter(|c| (c.created_at, c.id) < current)
                    .max_by_key(|c| (c.created_at, c.id))
                    .ok_or_else(|| ContractError::NoPreviousVersionFound(contract.full_identifier()))
            }
        }
    }

    /// The proxy record fronting `contract`
    pub fn resolve_proxy(&self, contract: &ContractVersion) -> ContractResult<ContractVersion> {
        let proxy_id = contract
            .proxy_contract_id
            .ok_or_else(|| ContractError::NoProxyFound(contract.full_identifier()))?;
        self.registry
            .contract(proxy_id)?
            .ok_or(ContractError::ProxyNotFound(proxy_id))
    }

    /// Most recent successful `upgradeTo` transaction against the proxy
    fn last_upgrade_transaction(&self, proxy_id: RecordId) -> ContractResult<Option<RecordId>> {
        Ok(self
            .registry
            .transactions_for(proxy_id)?
            .into_iter()
            .filter(|tx| tx.method_name == UPGRADE_METHOD && tx.is_successful())
            .map(|tx| tx.id)
            .last())
    }

    /// Call `upgradeTo(target)` on the proxy and require a successful receipt
    async fn repoint(
        &self,
        proxy: &ContractVersion,
        target: &ContractVersion,
        options: &CallOptions,
        label: &str,
        rollback_id: Option<RecordId>,
    ) -> ContractResult<TxOutcome> {
        let function = Interactor::resolve_method(proxy, UPGRADE_METHOD, 1)?;
        let address = require_address(target)?;
        let outcome = self
            .interactor
            .transact(proxy, &function, vec![json!(address)], options, label, rollback_id)
            .await?;

        match outcome.succeeded() {
            Some(true) => Ok(outcome),
            Some(false) => Err(ContractError::UpgradeIncomplete {
                step: UpgradeStep::Repoint,
                reason: format!("transaction {} reverted", outcome.transaction_hash()),
            }),
            None => Err(ContractError::UpgradeIncomplete {
                step: UpgradeStep::Repoint,
                reason: format!(
                    "no receipt for {} before timeout",
                    outcome.transaction_hash()
                ),
            }),
        }
    }
}

fn require_address(contract: &ContractVersion) -> ContractResult<&str> {
    contract
        .address
        .as_deref()
        .ok_or_else(|| ContractError::MissingAddress(contract.full_identifier()))
}

/// Bump the last dot-separated component: `1.0.0` becomes `1.0.1`.
///
/// A component without leading digits counts as zero.
#[must_use]
pub fn increment_version(version: &str) -> String {
    let mut parts: Vec<String> = version.split('.').map(ToString::to_string).collect();
    if let Some(last) = parts.last_mut() {
        let digits: String = last.chars().take_while(char::is_ascii_digit).collect();
        let next = digits.parse::<u64>().unwrap_or(0).saturating_add(1);
        *last = next.to_string();
    }
    parts.join(".")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::contracts::testing::Harness;

    async fn upgradeable(h: &Harness) -> UpgradeablePair {
        h.upgrader
            .create_upgradeable_contract(h.params("1.0.0"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_links_proxy_and_implementation() {
        let h = Harness::new();
        let pair = upgradeable(&h).await;

        assert_eq!(pair.proxy.name, "TokenProxy");
        assert_eq!(pair.proxy.implementation_of, Some(pair.implementation.id));
        assert_eq!(pair.implementation.proxy_contract_id, Some(pair.proxy.id));
        assert!(pair.implementation.is_upgradeable);
        assert_eq!(
            h.mock.implementation_of(pair.proxy.address.as_deref().unwrap()),
            pair.implementation.address
        );

        let stored = h.registry.contract(pair.implementation.id).unwrap().unwrap();
        assert_eq!(stored.proxy_contract_id, Some(pair.proxy.id));
    }

    #[tokio::test]
    async fn test_token_upgrade_then_rollback() {
        let h = Harness::new();
        let pair = upgradeable(&h).await;
        let proxy_address = pair.proxy.address.clone().unwrap();

        let upgrade = h
            .upgrader
            .upgrade(&pair.implementation, "1.0.1", UpgradeOptions::default())
            .await
            .unwrap();
        let v1 = h.registry.contract(pair.implementation.id).unwrap().unwrap();
        let v2 = upgrade.new_contract.clone();
        let proxy = h.registry.contract(pair.proxy.id).unwrap().unwrap();

        assert_eq!(proxy.implementation_of, Some(v2.id));
        assert_eq!(v1.status, ContractStatus::Upgraded);
        assert_eq!(v2.proxy_contract_id, Some(proxy.id));
        assert!(v2.is_upgradeable);
        assert_eq!(upgrade.transaction.succeeded(), Some(true));
        assert_eq!(h.mock.implementation_of(&proxy_address), v2.address);
        assert!(upgrade.migration_error.is_none());

        let rollback = h
            .upgrader
            .rollback(&v2, None, &RollbackOptions::default())
            .await
            .unwrap();
        let proxy = h.registry.contract(pair.proxy.id).unwrap().unwrap();
        assert_eq!(proxy.implementation_of, Some(v1.id));
        assert_eq!(rollback.restored_contract.id, v1.id);
        assert_eq!(rollback.restored_contract.status, ContractStatus::Deployed);
        assert_eq!(
            h.registry.contract(v2.id).unwrap().unwrap().status,
            ContractStatus::Deprecated
        );
        assert_eq!(h.mock.implementation_of(&proxy_address), v1.address);

        let upgrade_tx = h
            .registry
            .transaction_by_hash(upgrade.transaction.transaction_hash())
            .unwrap()
            .unwrap();
        let rollback_tx = h
            .registry
            .transaction_by_hash(rollback.transaction.transaction_hash())
            .unwrap()
            .unwrap();
        assert_eq!(rollback_tx.method_name, ROLLBACK_LABEL);
        assert_eq!(rollback_tx.rollback_id, Some(upgrade_tx.id));
        assert_eq!(rollback.rollback_of, Some(upgrade_tx.id));
        assert!(rollback_tx.is_successful());
    }

    #[tokio::test]
    async fn test_rollback_picks_latest_strictly_older() {
        let h = Harness::new();
        let pair = upgradeable(&h).await;
        let v2 = h
            .upgrader
            .upgrade(&pair.implementation, "1.0.1", UpgradeOptions::default())
            .await
            .unwrap()
            .new_contract;
        let v3 = h
            .upgrader
            .upgrade(&v2, "1.0.2", UpgradeOptions::default())
            .await
            .unwrap()
            .new_contract;

        let target = h.upgrader.find_rollback_target(&v3, None).unwrap();
        assert_eq!(target.id, v2.id);

        let rollback = h
            .upgrader
            .rollback(&v3, None, &RollbackOptions::default())
            .await
            .unwrap();
        assert_eq!(rollback.restored_contract.version, "1.0.1");

        let explicit = h.upgrader.find_rollback_target(&v3, Some("1.0.0")).unwrap();
        assert_eq!(explicit.id, pair.implementation.id);
    }

    #[tokio::test]
    async fn test_rollback_ignores_unrelated_deployments_of_same_name() {
        let h = Harness::new();
        let pair = upgradeable(&h).await;
        let v2 = h
            .upgrader
            .upgrade(&pair.implementation, "1.0.1", UpgradeOptions::default())
            .await
            .unwrap()
            .new_contract;

        // a throwaway plain deployment, as left behind by `test` or `watch`
        let mut throwaway = h.deployer.deploy(h.params("1.0.2")).await.unwrap().contract;
        throwaway.deprecate();
        h.registry.update_contract(&mut throwaway).unwrap();
        // and an implementation behind another proxy
        let other = upgradeable(&h).await;

        let v3 = h
            .upgrader
            .upgrade(&v2, "1.0.2", UpgradeOptions::default())
            .await
            .unwrap()
            .new_contract;

        let target = h.upgrader.find_rollback_target(&v3, None).unwrap();
        assert_eq!(target.id, v2.id);

        let explicit = h.upgrader.find_rollback_target(&v3, Some("1.0.0")).unwrap();
        assert_eq!(explicit.id, pair.implementation.id);
        assert_ne!(explicit.id, other.implementation.id);

        let err = h
            .upgrader
            .find_rollback_target(&other.implementation, None)
            .unwrap_err();
        assert!(matches!(err, ContractError::NoPreviousVersionFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_rollback_target_touches_nothing() {
        let h = Harness::new();
        let pair = upgradeable(&h).await;
        let v2 = h
            .upgrader
            .upgrade(&pair.implementation, "1.0.1", UpgradeOptions::default())
            .await
            .unwrap()
            .new_contract;

        let before_contracts = h.registry.find_contracts(&ContractFilter::new()).unwrap();
        let before_txs = h.registry.transaction_count();
        let before_ledger = h.mock.ledger_interactions();

        let err = h
            .upgrader
            .rollback(&v2, Some("0.9.0"), &RollbackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::TargetVersionNotFound { .. }));

        assert_eq!(h.registry.find_contracts(&ContractFilter::new()).unwrap(), before_contracts);
        assert_eq!(h.registry.transaction_count(), before_txs);
        assert_eq!(h.mock.ledger_interactions(), before_ledger);
    }

    #[tokio::test]
    async fn test_rollback_of_first_version_has_no_target() {
        let h = Harness::new();
        let pair = upgradeable(&h).await;
        let err = h
            .upgrader
            .rollback(&pair.implementation, None, &RollbackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::NoPreviousVersionFound(_)));
    }

    #[tokio::test]
    async fn test_upgrade_requires_upgradeable() {
        let h = Harness::new();
        let plain = h.deployer.deploy(h.params("1.0.0")).await.unwrap().contract;
        let rows = h.registry.contract_count();

        let err = h
            .upgrader
            .upgrade(&plain, "1.0.1", UpgradeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::NotUpgradeable(_)));
        assert_eq!(h.registry.contract_count(), rows);
        assert_eq!(h.mock.deployment_count(), 1);

        let err = h
            .upgrader
            .rollback(&plain, None, &RollbackOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::NotUpgradeable(_)));
    }

    #[tokio::test]
    async fn test_missing_proxy_checked_before_deploying() {
        let h = Harness::new();
        let mut orphan = h
            .deployer
            .deploy(h.params("1.0.0").upgradeable(true))
            .await
            .unwrap()
            .contract;
        let rows = h.registry.contract_count();

        let err = h
            .upgrader
            .upgrade(&orphan, "1.0.1", UpgradeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::NoProxyFound(_)));

        orphan.proxy_contract_id = Some(9_999);
        let err = h
            .upgrader
            .upgrade(&orphan, "1.0.1", UpgradeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::ProxyNotFound(9_999)));
        assert_eq!(h.registry.contract_count(), rows);
    }

    #[tokio::test]
    async fn test_reverted_repoint_is_reported_not_recorded() {
        let h = Harness::new();
        let pair = upgradeable(&h).await;
        h.mock.revert_method(UPGRADE_METHOD);

        let err = h
            .upgrader
            .upgrade(&pair.implementation, "1.0.1", UpgradeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContractError::UpgradeIncomplete { step: UpgradeStep::Repoint, .. }
        ));
        let proxy = h.registry.contract(pair.proxy.id).unwrap().unwrap();
        assert_eq!(proxy.implementation_of, Some(pair.implementation.id));
        assert_eq!(
            h.registry.contract(pair.implementation.id).unwrap().unwrap().status,
            ContractStatus::Deployed
        );
    }

    #[tokio::test]
    async fn test_migration_runs_and_failure_is_reported() {
        let h = Harness::new();
        let pair = upgradeable(&h).await;
        let ran = Arc::new(AtomicBool::new(false));
        let seen = ran.clone();

        let outcome = h
            .upgrader
            .upgrade(
                &pair.implementation,
                "1.0.1",
                UpgradeOptions {
                    migration: Some(Migration::callback(move |old, new| {
                        seen.store(true, Ordering::SeqCst);
                        assert_eq!(old.status, ContractStatus::Upgraded);
                        Err(format!("cannot migrate {} to {}", old.version, new.version))
                    })),
                    ..UpgradeOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(
            outcome.migration_error.as_deref(),
            Some("cannot migrate 1.0.0 to 1.0.1")
        );
        // the repoint stands
        let proxy = h.registry.contract(pair.proxy.id).unwrap().unwrap();
        assert_eq!(proxy.implementation_of, Some(outcome.new_contract.id));
    }

    #[tokio::test]
    async fn test_missing_migration_script_is_reported() {
        let h = Harness::new();
        let pair = upgradeable(&h).await;
        let outcome = h
            .upgrader
            .upgrade(
                &pair.implementation,
                "1.0.1",
                UpgradeOptions {
                    migration: Some(Migration::Script(PathBuf::from("/nonexistent/migrate.sh"))),
                    ..UpgradeOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.migration_error.unwrap().contains("migrate.sh"));
    }

    #[test]
    fn test_increment_version() {
        assert_eq!(increment_version("1.0.0"), "1.0.1");
        assert_eq!(increment_version("2.3.9"), "2.3.10");
        assert_eq!(increment_version("7"), "8");
        assert_eq!(increment_version("1.0.beta"), "1.0.1");
        assert_eq!(increment_version("1.0.2-rc1"), "1.0.3");
    }
}
