//! One-stop wiring of the lifecycle components for a network.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::compiler::{Artifact, ContractCompiler};
use crate::config::LifecycleConfig;
use crate::compiler::compare_versions;
use crate::contracts::watch::{HotReloader, DEV_VERSION_PREFIX};
use crate::contracts::{
    ContractError, ContractResult, ContractSource, DeployParams, Deployer, Interactor, Upgrader,
};
use crate::driver::{Driver, DriverError};
use crate::registry::{ContractRegistry, ContractTransaction, ContractVersion, RegistryError};
use crate::types::now_secs;

/// Transactions shown by [`LifecycleManager::status`]
const STATUS_TRANSACTIONS: usize = 5;

/// Version label prefix of [`LifecycleManager::test_deployment`] runs
pub const TEST_VERSION_PREFIX: &str = "test-";

/// Everything needed to manage contracts on one network
#[derive(Clone, Debug)]
pub struct LifecycleManager {
    config: Arc<LifecycleConfig>,
    network: String,
    registry: ContractRegistry,
    deployer: Deployer,
    interactor: Interactor,
    upgrader: Upgrader,
}

/// Record plus recent activity
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    /// The contract
    pub contract: ContractVersion,
    /// Its proxy, when upgradeable
    pub proxy: Option<ContractVersion>,
    /// Most recent transactions, newest first
    pub transactions: Vec<ContractTransaction>,
}

/// One smoke-test check
#[derive(Clone, Debug, Serialize)]
pub struct TestCheck {
    /// Check name
    pub name: &'static str,
    /// Outcome
    pub passed: bool,
}

/// Result of [`LifecycleManager::test_deployment`]
#[derive(Clone, Debug, Serialize)]
pub struct TestReport {
    /// The throwaway deployment, deprecated afterwards
    pub contract: ContractVersion,
    /// Checks run against it
    pub checks: Vec<TestCheck>,
}

impl TestReport {
    /// Did every check pass?
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

impl LifecycleManager {
    /// Open the registry and connect the driver for `network`
    /// (the configured default when `None`)
    pub fn from_config(config: LifecycleConfig, network: Option<&str>) -> Result<Self, ManagerError> {
        let network = config.network_name(network).to_string();
        let driver = Driver::connect(&network, &config)?;
        let registry = ContractRegistry::open(&config.registry_path)?;
        info!(%network, driver = driver.kind(), registry = %config.registry_path.display(), "lifecycle manager ready");
        Ok(Self::with_parts(config, &network, driver, registry))
    }

    /// Assemble from an existing driver and registry
    pub fn with_parts(
        config: LifecycleConfig,
        network: &str,
        driver: Driver,
        registry: ContractRegistry,
    ) -> Self {
        let config = Arc::new(config);
        let compiler = ContractCompiler::new(config.compiler.clone(), config.storage_path.clone());
        let deployer = Deployer::new(driver.clone(), compiler, registry.clone(), config.clone());
        let interactor = Interactor::new(driver, registry.clone(), config.clone());
        let upgrader = Upgrader::new(deployer.clone(), interactor.clone());
        Self {
            config,
            network: network.to_string(),
            registry,
            deployer,
            interactor,
            upgrader,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Network this manager targets
    pub fn network(&self) -> &str {
        &self.network
    }

    /// The ledger driver
    pub fn driver(&self) -> &Driver {
        self.deployer.driver()
    }

    /// The compiler
    pub fn compiler(&self) -> &ContractCompiler {
        self.deployer.compiler()
    }

    /// The registry
    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// The deployer
    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    /// The interactor
    pub fn interactor(&self) -> &Interactor {
        &self.interactor
    }

    /// The upgrader
    pub fn upgrader(&self) -> &Upgrader {
        &self.upgrader
    }

    /// Deployment parameters on this network
    pub fn deploy_params(&self, name: &str, version: &str) -> DeployParams {
        DeployParams::new(name, version, &self.network)
    }

    /// Look up `name`, `name@version` or an address on this network
    pub fn resolve(&self, identifier: &str) -> ContractResult<ContractVersion> {
        self.registry
            .resolve(identifier, Some(&self.network))?
            .ok_or_else(|| ContractError::UnknownContract(identifier.to_string()))
    }

    /// A contract with its proxy and recent transactions
    pub fn status(&self, identifier: &str) -> ContractResult<StatusReport> {
        let contract = self.resolve(identifier)?;
        let proxy = match contract.proxy_contract_id {
            Some(id) => self.registry.contract(id)?,
            None => None,
        };
        let transactions = self
            .registry
            .recent_transactions(contract.id, STATUS_TRANSACTIONS)?;
        Ok(StatusReport {
            contract,
            proxy,
            transactions,
        })
    }

    /// Deploy a throwaway `test-<ts>` version, check it, then deprecate it.
    ///
    /// Without a source the highest stored release artifact of `name` is
    /// deployed under the test label; `dev-` and `test-` artifacts are skipped.
    pub async fn test_deployment(
        &self,
        name: &str,
        source: Option<ContractSource>,
    ) -> ContractResult<TestReport> {
        let version = format!("{TEST_VERSION_PREFIX}{}", now_secs());
        let mut params = self.deploy_params(name, &version);
        match source {
            Some(source) => params.source = Some(source),
            None => params.artifact = Some(self.latest_artifact(name)?),
        }
        let mut contract = self.deployer.deploy(params).await?.contract;

        let abi_ok = contract
            .parsed_abi()
            .is_some_and(|abi| abi.is_ok_and(|abi| !abi.items().is_empty()));
        let checks = vec![
            TestCheck {
                name: "deployment",
                passed: contract.address.is_some(),
            },
            TestCheck {
                name: "abi_validation",
                passed: abi_ok,
            },
        ];

        contract.deprecate();
        self.registry.update_contract(&mut contract)?;
        Ok(TestReport { contract, checks })
    }

    fn latest_artifact(&self, name: &str) -> ContractResult<Artifact> {
        let store = self.compiler().store();
        let not_found = || ContractError::ArtifactNotFound {
            name: name.to_string(),
            version: "*".to_string(),
        };
        let version = store
            .versions(name)
            .map_err(ContractError::ArtifactStore)?
            .into_iter()
            .filter(|v| !v.starts_with(DEV_VERSION_PREFIX) && !v.starts_with(TEST_VERSION_PREFIX))
            .max_by(|a, b| compare_versions(a, b))
            .ok_or_else(not_found)?;
        store
            .load(name, &version)
            .map_err(ContractError::ArtifactStore)?
            .ok_or_else(not_found)
    }

    /// A source watcher deploying to this network
    pub fn hot_reloader(&self) -> HotReloader {
        HotReloader::new(self.deployer.clone(), &self.network, &self.config.hot_reload)
    }
}

/// Errors while assembling a manager
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Driver could not be built
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Registry could not be opened
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::artifact::tests::sample_artifact;
    use crate::driver::MockDriver;
    use crate::registry::ContractStatus;

    fn manager() -> LifecycleManager {
        let storage = std::env::temp_dir().join(format!("ledgerops-manager-{}", rand::random::<u64>()));
        let config = LifecycleConfig {
            storage_path: storage,
            ..LifecycleConfig::default()
        };
        LifecycleManager::with_parts(
            config,
            "mock",
            Driver::Mock(MockDriver::new("mock")),
            ContractRegistry::temporary().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_status_and_resolve() {
        let m = manager();
        let artifact = sample_artifact("Token", "1.0.0");
        let deployed = m
            .deployer()
            .deploy(m.deploy_params("Token", "1.0.0").artifact(artifact))
            .await
            .unwrap()
            .contract;

        let report = m.status("Token").unwrap();
        assert_eq!(report.contract.id, deployed.id);
        assert!(report.proxy.is_none());
        assert!(report.transactions.is_empty());

        assert_eq!(m.resolve(deployed.address.as_deref().unwrap()).unwrap().id, deployed.id);
        assert!(matches!(m.resolve("Vault"), Err(ContractError::UnknownContract(_))));
    }

    #[tokio::test]
    async fn test_test_deployment_is_deprecated_afterwards() {
        let m = manager();
        let err = m.test_deployment("Token", None).await.unwrap_err();
        assert!(matches!(err, ContractError::ArtifactNotFound { .. }));

        m.compiler()
            .store_artifact(&sample_artifact("Token", "1.0.0"))
            .unwrap();
        let report = m.test_deployment("Token", None).await.unwrap();
        assert!(report.passed());
        assert!(report.contract.version.starts_with("test-"));
        assert_eq!(report.contract.status, ContractStatus::Deprecated);
        assert_eq!(
            m.registry().contract(report.contract.id).unwrap().unwrap().status,
            ContractStatus::Deprecated
        );
        let _ = std::fs::remove_dir_all(&m.config().storage_path);
    }

    #[test]
    fn test_latest_artifact_orders_numerically_and_skips_scratch_labels() {
        let m = manager();
        for version in ["1.0.9", "1.0.10", "dev-1700000000", "test-1700000000"] {
            m.compiler()
                .store_artifact(&sample_artifact("Token", version))
                .unwrap();
        }
        assert_eq!(m.latest_artifact("Token").unwrap().version, "1.0.10");

        let _ = std::fs::remove_dir_all(&m.config().storage_path);
    }

    #[test]
    fn test_from_config_rejects_unknown_network() {
        let err = LifecycleManager::from_config(LifecycleConfig::default(), Some("nowhere")).unwrap_err();
        assert!(matches!(err, ManagerError::Driver(_)));
    }
}
