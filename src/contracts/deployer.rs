//! Contract deployment.
//!
//! A deployment resolves an artifact, records a `pending` version, submits
//! the creation transaction and records the outcome on the same row.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{ContractError, ContractResult};
use crate::compiler::{read_source, Artifact, ContractCompiler};
use crate::config::LifecycleConfig;
use crate::driver::codec::{encode_arguments, has_static_layout};
use crate::driver::{DeployRequest, Driver, LedgerDriver, TxRequest};
use crate::registry::{ContractRegistry, ContractVersion};
use crate::types::RecordId;

/// Wei per native unit
const WEI_PER_UNIT: u128 = 1_000_000_000_000_000_000;

/// Fresh source to compile before deploying
#[derive(Clone, Debug)]
pub enum ContractSource {
    /// Path to a source file
    File(PathBuf),
    /// Source text
    Code(String),
}

/// What to deploy and how
#[derive(Clone, Debug)]
pub struct DeployParams {
    /// Logical contract name
    pub name: String,
    /// Version label
    pub version: String,
    /// Target network
    pub network: String,
    /// Constructor arguments
    pub constructor_params: Vec<Value>,
    /// Sender (driver default when unset)
    pub from: Option<String>,
    /// Source to compile and store under `(name, version)`
    pub source: Option<ContractSource>,
    /// Pre-resolved artifact, takes precedence over everything else
    pub artifact: Option<Artifact>,
    /// Explicit gas limit (estimated when unset)
    pub gas_limit: Option<u64>,
    /// Record the version as upgradeable
    pub is_upgradeable: bool,
    /// Proxy fronting this implementation
    pub proxy_contract_id: Option<RecordId>,
    /// For proxies: the implementation they point at
    pub implementation_of: Option<RecordId>,
    /// Extra annotations stored on the record
    pub metadata: BTreeMap<String, String>,
}

impl DeployParams {
    /// Deploy `name@version` on `network` from the stored artifact
    #[must_use]
    pub fn new(name: &str, version: &str, network: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            network: network.to_string(),
            constructor_params: Vec::new(),
            from: None,
            source: None,
            artifact: None,
            gas_limit: None,
            is_upgradeable: false,
            proxy_contract_id: None,
            implementation_of: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set constructor arguments
    #[must_use]
    pub fn constructor_params(mut self, params: Vec<Value>) -> Self {
        self.constructor_params = params;
        self
    }

    /// Set the sender
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Compile this source first
    #[must_use]
    pub fn source(mut self, source: ContractSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Deploy this artifact as-is
    #[must_use]
    pub fn artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Use a fixed gas limit
    #[must_use]
    pub const fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    /// Mark as upgradeable
    #[must_use]
    pub const fn upgradeable(mut self, upgradeable: bool) -> Self {
        self.is_upgradeable = upgradeable;
        self
    }

    /// Attach an annotation
    #[must_use]
    pub fn metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A completed deployment
#[derive(Clone, Debug, Serialize)]
pub struct Deployment {
    /// The deployed version record
    pub contract: ContractVersion,
    /// Creation transaction hash
    pub transaction_hash: String,
}

/// Dry-run cost estimate
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeploymentPreview {
    /// Contract name
    pub contract_name: String,
    /// Version label
    pub version: String,
    /// Target network
    pub network: String,
    /// Sender, when known
    pub from: Option<String>,
    /// Gas limit the deployment would use
    pub gas_limit: u64,
    /// Quoted gas price
    pub gas_price: u64,
    /// `gas_limit * gas_price`
    pub estimated_cost_wei: u128,
    /// Cost in whole native units, decimal
    pub estimated_cost_native: String,
    /// Creation bytecode size in bytes
    pub bytecode_size: usize,
}

/// Deploys contracts and records them
#[derive(Clone, Debug)]
pub struct Deployer {
    driver: Driver,
    compiler: ContractCompiler,
    registry: ContractRegistry,
    config: Arc<LifecycleConfig>,
}

impl Deployer {
    /// Create a deployer
    #[must_use]
    pub fn new(
        driver: Driver,
        compiler: ContractCompiler,
        registry: ContractRegistry,
        config: Arc<LifecycleConfig>,
    ) -> Self {
        Self {
            driver,
            compiler,
            registry,
            config,
        }
    }

    /// The ledger driver
    #[must_use]
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// The compiler
    #[must_use]
    pub fn compiler(&self) -> &ContractCompiler {
        &self.compiler
    }

    /// The registry
    #[must_use]
    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Deploy a contract version.
    ///
    /// # Errors
    /// `ArtifactNotFound` / `CompilationFailed` and constructor arguments that
    /// do not encode fail before anything is recorded; `DeploymentFailed`
    /// after the row has been marked `failed`.
    pub async fn deploy(&self, params: DeployParams) -> ContractResult<Deployment> {
        let artifact = self.resolve_artifact(&params, true).await?;
        let data = creation_data(&artifact, &params)?;
        let abi = artifact.abi_json();

        let mut record = ContractVersion::pending(
            &params.name,
            &params.version,
            self.driver.kind(),
            &params.network,
        );
        record.abi = Some(abi.clone());
        record.bytecode_hash = Some(artifact.bytecode_hash());
        record.constructor_params = params.constructor_params.clone();
        record.is_upgradeable = params.is_upgradeable;
        record.proxy_contract_id = params.proxy_contract_id;
        record.implementation_of = params.implementation_of;
        record.metadata = params.metadata.clone();
        record.metadata.insert(
            "retry_attempts".to_string(),
            self.config.deployment.retry_attempts.to_string(),
        );
        record
            .metadata
            .insert("bytecode_size".to_string(), artifact.bytecode_size().to_string());
        if let Some(version) = &artifact.compiler_version {
            record
                .metadata
                .insert("compiler_version".to_string(), version.clone());
        }
        let mut record = self.registry.insert_contract(record)?;

        let from = params.from.clone().or_else(|| self.driver.default_account());
        let gas_limit = self.resolve_gas_limit(data, &params, from.as_deref()).await;
        let request = DeployRequest {
            abi,
            bytecode: artifact.bytecode.clone(),
            constructor_params: params.constructor_params.clone(),
            from: from.clone(),
            gas_limit: Some(gas_limit),
        };

        info!(
            contract = %record.full_identifier(),
            network = %params.network,
            gas_limit,
            "deploying contract"
        );

        match self.driver.deploy_contract(&request).await {
            Ok(receipt) => {
                record.deployer_address = receipt.from.clone().or(from);
                record.mark_deployed(&receipt.address, &receipt.transaction_hash, receipt.resource_used);
                self.registry.update_contract(&mut record)?;
                info!(
                    contract = %record.full_identifier(),
                    address = %receipt.address,
                    tx_hash = %receipt.transaction_hash,
                    "contract deployed"
                );
                Ok(Deployment {
                    contract: record,
                    transaction_hash: receipt.transaction_hash,
                })
            }
            Err(e) => {
                record.transaction_hash = e.transaction_hash().map(ToString::to_string);
                record.mark_failed(&e.to_string());
                if let Err(update) = self.registry.update_contract(&mut record) {
                    warn!(contract = %record.full_identifier(), error = %update, "could not record failed deployment");
                }
                error!(contract = %record.full_identifier(), error = %e, "deployment failed");
                Err(ContractError::DeploymentFailed {
                    contract: record.full_identifier(),
                    source: e,
                })
            }
        }
    }

    /// Estimate a deployment without recording or submitting anything.
    ///
    /// Uses the same gas-limit path as [`Self::deploy`]; source is compiled
    /// but not stored.
    pub async fn preview_deployment(&self, params: &DeployParams) -> ContractResult<DeploymentPreview> {
        let artifact = self.resolve_artifact(params, false).await?;
        let data = creation_data(&artifact, params)?;
        let from = params.from.clone().or_else(|| self.driver.default_account());
        let gas_limit = self.resolve_gas_limit(data, params, from.as_deref()).await;
        let gas_price = self
            .driver
            .get_gas_price()
            .await
            .map_err(|e| ContractError::driver("get gas price", e))?;
        let estimated_cost_wei = u128::from(gas_limit) * u128::from(gas_price);

        Ok(DeploymentPreview {
            contract_name: params.name.clone(),
            version: params.version.clone(),
            network: params.network.clone(),
            from,
            gas_limit,
            gas_price,
            estimated_cost_wei,
            estimated_cost_native: format_native(estimated_cost_wei),
            bytecode_size: artifact.bytecode_size(),
        })
    }

    /// Explicit artifact, else fresh source, else the stored `(name, version)`
    async fn resolve_artifact(&self, params: &DeployParams, store: bool) -> ContractResult<Artifact> {
        if let Some(artifact) = &params.artifact {
            return Ok(artifact.clone());
        }

        if let Some(source) = &params.source {
            let text = match source {
                ContractSource::File(path) => read_source(path)
                    .await
                    .map_err(ContractError::CompilationFailed)?,
                ContractSource::Code(code) => code.clone(),
            };
            let compiled = if store {
                self.compiler
                    .compile_and_store(&text, &params.name, &params.version)
                    .await
            } else {
                self.compiler.compile(&text, &params.name, &params.version).await
            };
            return compiled.map_err(ContractError::CompilationFailed);
        }

        match self.compiler.load_artifact(&params.name, &params.version) {
            Ok(Some(artifact)) => Ok(artifact),
            Ok(None) => Err(ContractError::ArtifactNotFound {
                name: params.name.clone(),
                version: params.version.clone(),
            }),
            Err(e) => Err(ContractError::ArtifactStore(e)),
        }
    }

    /// Explicit limit, else estimate times the multiplier, else the default
    async fn resolve_gas_limit(
        &self,
        data: String,
        params: &DeployParams,
        from: Option<&str>,
    ) -> u64 {
        if let Some(limit) = params.gas_limit {
            return limit;
        }

        let request = TxRequest {
            to: None,
            from: from.map(ToString::to_string),
            data,
            gas: None,
            call: None,
        };

        match self.driver.estimate_gas(&request).await {
            Ok(estimate) => self.config.gas.apply_multiplier(estimate),
            Err(e) => {
                let fallback = self.config.gas.default_limit;
                warn!(contract = %params.name, error = %e, fallback, "gas estimation failed, using default limit");
                fallback
            }
        }
    }
}

/// Bytecode followed by the encoded constructor arguments.
///
/// Constructors with dynamic inputs are encoded by the driver, so the
/// estimate covers the bytecode alone.
fn creation_data(artifact: &Artifact, params: &DeployParams) -> ContractResult<String> {
    let mut data = artifact.bytecode.clone();
    let inputs = artifact
        .parsed_abi()
        .ok()
        .and_then(|abi| abi.constructor().map(|c| c.inputs.clone()))
        .unwrap_or_default();
    if !has_static_layout(&inputs) {
        debug!(contract = %params.name, "constructor has dynamic inputs, estimating on bytecode alone");
        return Ok(data);
    }
    let args = encode_arguments(&inputs, &params.constructor_params)
        .map_err(|e| ContractError::driver(format!("encode constructor arguments for {}", params.name), e))?;
    data.push_str(&hex::encode(args));
    Ok(data)
}

/// Render wei as a decimal amount of the native unit
fn format_native(wei: u128) -> String {
    let whole = wei / WEI_PER_UNIT;
    let frac = wei % WEI_PER_UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:018}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerError;
    use crate::contracts::testing::Harness;
    use crate::contracts::proxy::proxy_artifact;
    use crate::registry::ContractStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_deploy_records_deployed_version() {
        let h = Harness::new();
        let deployment = h.deployer.deploy(h.params("1.0.0")).await.unwrap();
        let contract = &deployment.contract;

        assert_eq!(contract.status, ContractStatus::Deployed);
        assert!(contract.address.is_some());
        assert_eq!(contract.transaction_hash.as_deref(), Some(deployment.transaction_hash.as_str()));
        assert_eq!(contract.kind, "mock");
        assert_eq!(contract.metadata["retry_attempts"], "3");
        assert!(contract.abi.as_deref().unwrap().contains("balanceOf"));

        let stored = h.registry.contract(contract.id).unwrap().unwrap();
        assert_eq!(&stored, contract);
        assert_eq!(h.mock.deployment_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_records_nothing() {
        let h = Harness::new();
        let err = h.deployer.deploy(h.params("9.9.9")).await.unwrap_err();
        assert!(matches!(err, ContractError::ArtifactNotFound { .. }));
        assert_eq!(h.registry.contract_count(), 0);
        assert_eq!(h.mock.ledger_interactions(), 0);
    }

    #[tokio::test]
    async fn test_driver_failure_marks_row_failed() {
        let h = Harness::new();
        h.mock.fail_deployments(Some("insufficient funds"));
        let err = h.deployer.deploy(h.params("1.0.0")).await.unwrap_err();
        assert!(matches!(err, ContractError::DeploymentFailed { .. }));

        let rows = h.registry.find_contracts(&Default::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ContractStatus::Failed);
        assert!(rows[0].address.is_none());
        assert!(rows[0].metadata["error"].contains("insufficient funds"));
        assert!(rows[0].transaction_hash.is_none());
    }

    #[tokio::test]
    async fn test_stalled_deployment_keeps_submitted_hash() {
        let h = Harness::new();
        h.mock.stall_deployments(true);
        let err = h.deployer.deploy(h.params("1.0.0")).await.unwrap_err();
        let ContractError::DeploymentFailed { source, .. } = &err else {
            panic!("expected DeploymentFailed, got {err}");
        };
        let hash = source.transaction_hash().unwrap().to_string();

        let rows = h.registry.find_contracts(&Default::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ContractStatus::Failed);
        assert!(rows[0].address.is_none());
        assert_eq!(rows[0].transaction_hash.as_deref(), Some(hash.as_str()));
        assert!(rows[0].metadata["error"].contains(&hash));
    }

    #[tokio::test]
    async fn test_bad_constructor_arguments_record_nothing() {
        let h = Harness::new();
        let params = DeployParams::new("TokenProxy", "1.0.0", "local")
            .artifact(proxy_artifact())
            .constructor_params(vec![json!("nowhere")]);
        let err = h.deployer.deploy(params.clone()).await.unwrap_err();
        assert!(matches!(err, ContractError::Driver { .. }));

        let err = h
            .deployer
            .preview_deployment(&params.constructor_params(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::Driver { .. }));

        assert_eq!(h.registry.contract_count(), 0);
        assert_eq!(h.mock.ledger_interactions(), 0);
        assert_eq!(h.mock.estimate_count(), 0);
    }

    #[tokio::test]
    async fn test_estimate_failure_falls_back_to_default_limit() {
        let h = Harness::new();
        h.mock.fail_gas_estimates(true);
        let preview = h.deployer.preview_deployment(&h.params("1.0.0")).await.unwrap();
        assert_eq!(preview.gas_limit, 3_000_000);

        let deployment = h.deployer.deploy(h.params("1.0.0")).await.unwrap();
        assert_eq!(deployment.contract.status, ContractStatus::Deployed);
    }

    #[tokio::test]
    async fn test_explicit_gas_limit_skips_estimation() {
        let h = Harness::new();
        let preview = h
            .deployer
            .preview_deployment(&h.params("1.0.0").gas_limit(500_000))
            .await
            .unwrap();
        assert_eq!(preview.gas_limit, 500_000);
        assert_eq!(h.mock.estimate_count(), 0);
    }

    #[tokio::test]
    async fn test_preview_is_idempotent_and_writes_nothing() {
        let h = Harness::new();
        let params = h.params("1.0.0");
        let first = h.deployer.preview_deployment(&params).await.unwrap();
        let second = h.deployer.preview_deployment(&params).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.bytecode_size, 5);
        // 21000 + 32000 + 5 * 16, times 1.1
        assert_eq!(first.gas_limit, 58_388);
        assert_eq!(first.estimated_cost_wei, 58_388 * 1_000_000_000);
        assert_eq!(first.estimated_cost_native, "0.000058388");
        assert_eq!(h.registry.contract_count(), 0);
        assert_eq!(h.mock.deployment_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_file_is_compilation_failure() {
        let h = Harness::new();
        let params = h
            .params("2.0.0")
            .source(ContractSource::File(PathBuf::from("/nonexistent/Token.sol")));
        let err = h.deployer.deploy(params).await.unwrap_err();
        assert!(matches!(err, ContractError::CompilationFailed(CompilerError::SourceNotFound(_))));
        assert_eq!(h.registry.contract_count(), 0);
    }

    #[test]
    fn test_format_native() {
        assert_eq!(format_native(0), "0");
        assert_eq!(format_native(WEI_PER_UNIT), "1");
        assert_eq!(format_native(1_500_000_000_000_000_000), "1.5");
        assert_eq!(format_native(1), "0.000000000000000001");
    }
}
