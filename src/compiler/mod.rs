//! Solidity compilation through an external `solc` process.

pub mod artifact;

use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info};

pub use artifact::{compare_versions, Artifact, ArtifactStore};

use crate::config::CompilerConfig;
use crate::types::{now, Abi};

/// Result type for compiler operations
pub type CompilerResult<T> = Result<T, CompilerError>;

/// ABI, bytecode and source fingerprint for one contract
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledContract {
    /// ABI as JSON
    pub abi: Value,
    /// Creation bytecode, 0x-prefixed
    pub bytecode: String,
    /// Runtime bytecode, 0x-prefixed
    pub deployed_bytecode: String,
}

/// Wrapper around the `solc` toolchain plus the artifact store
#[derive(Clone, Debug)]
pub struct ContractCompiler {
    config: CompilerConfig,
    store: ArtifactStore,
}

impl ContractCompiler {
    /// Create a compiler storing artifacts under `storage_path`
    #[must_use]
    pub fn new(config: CompilerConfig, storage_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            store: ArtifactStore::new(storage_path),
        }
    }

    /// The artifact store
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Compile source text into an artifact labelled `(name, version)`.
    ///
    /// Nothing is written to the artifact store; see [`Self::compile_and_store`].
    pub async fn compile(&self, source: &str, name: &str, version: &str) -> CompilerResult<Artifact> {
        let source_file =
            std::env::temp_dir().join(format!("ledgerops-{}-{}.sol", name, rand::random::<u64>()));
        tokio::fs::write(&source_file, source).await?;

        let result = self.run_solc(&source_file).await;
        let _ = tokio::fs::remove_file(&source_file).await;
        let stdout = result?;

        let compiled = parse_compiler_output(&stdout, name)?;
        Ok(Artifact {
            name: name.to_string(),
            version: version.to_string(),
            compiled_at: Some(now()),
            compiler_version: Some(self.compiler_version().await),
            optimization_enabled: self.config.optimize,
            optimization_runs: self.config.optimize_runs,
            abi: compiled.abi,
            bytecode: compiled.bytecode,
            deployed_bytecode: compiled.deployed_bytecode,
            source_hash: Some(source_hash(source)),
        })
    }

    /// Compile and persist the artifact
    pub async fn compile_and_store(
        &self,
        source: &str,
        name: &str,
        version: &str,
    ) -> CompilerResult<Artifact> {
        let artifact = self.compile(source, name, version).await?;
        let path = self.store.store(&artifact)?;
        info!(contract = %name, %version, path = %path.display(), "artifact stored");
        Ok(artifact)
    }

    /// Read a source file and compile it
    pub async fn compile_file(&self, path: &Path, name: &str, version: &str) -> CompilerResult<Artifact> {
        let source = read_source(path).await?;
        self.compile(&source, name, version).await
    }

    /// Load a stored artifact
    pub fn load_artifact(&self, name: &str, version: &str) -> CompilerResult<Option<Artifact>> {
        self.store.load(name, version)
    }

    /// Persist an artifact
    pub fn store_artifact(&self, artifact: &Artifact) -> CompilerResult<PathBuf> {
        self.store.store(artifact)
    }

    /// Version reported by `solc --version`, or `unknown`
    pub async fn compiler_version(&self) -> String {
        let Ok(output) = Command::new(&self.config.solc_path).arg("--version").output().await else {
            return "unknown".to_string();
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find_map(|line| line.split_once("Version:").map(|(_, v)| v.trim().to_string()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    async fn run_solc(&self, source_file: &Path) -> CompilerResult<String> {
        let mut command = Command::new(&self.config.solc_path);
        command.arg("--combined-json").arg("abi,bin,bin-runtime");
        if self.config.optimize {
            command
                .arg("--optimize")
                .arg("--optimize-runs")
                .arg(self.config.optimize_runs.to_string());
        }
        if !self.config.evm_version.is_empty() {
            command.arg("--evm-version").arg(&self.config.evm_version);
        }
        command.arg(source_file);
        debug!(solc = %self.config.solc_path.display(), file = %source_file.display(), "running compiler");

        let output = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CompilerError::ToolchainMissing(self.config.solc_path.clone())
            } else {
                CompilerError::Io(e)
            }
        })?;
        if !output.status.success() {
            let mut message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if message.is_empty() {
                message = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(CompilerError::Failed(message));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Read a source file, mapping a missing file to `SourceNotFound`
pub async fn read_source(path: &Path) -> CompilerResult<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(source) => Ok(source),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(CompilerError::SourceNotFound(path.to_path_buf()))
        }
        Err(e) => Err(CompilerError::Io(e)),
    }
}

/// SHA-256 of source text, hex
#[must_use]
pub fn source_hash(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Extract one contract from `solc --combined-json` output.
///
/// Entries are keyed `<file>:<Contract>`; the one named `name` wins,
/// otherwise the first entry is used.
pub fn parse_compiler_output(output: &str, name: &str) -> CompilerResult<CompiledContract> {
    let start = output
        .find('{')
        .ok_or_else(|| CompilerError::InvalidOutput("no JSON in compiler output".to_string()))?;
    let data: Value = serde_json::from_str(&output[start..])
        .map_err(|e| CompilerError::InvalidOutput(e.to_string()))?;
    let contracts = data
        .get("contracts")
        .and_then(Value::as_object)
        .ok_or_else(|| CompilerError::InvalidOutput("missing `contracts`".to_string()))?;

    let suffix = format!(":{name}");
    let entry = contracts
        .iter()
        .find(|(key, _)| key.ends_with(&suffix) || key.as_str() == name)
        .or_else(|| contracts.iter().next())
        .map(|(_, v)| v)
        .ok_or_else(|| CompilerError::InvalidOutput("no contracts in compiler output".to_string()))?;

    // older solc releases emit the ABI as a JSON string
    let abi = match entry.get("abi") {
        Some(Value::String(text)) => {
            serde_json::from_str(text).map_err(|e| CompilerError::InvalidOutput(e.to_string()))?
        }
        Some(value) => value.clone(),
        None => Value::Array(Vec::new()),
    };
    let hex_field = |field: &str| {
        format!(
            "0x{}",
            entry.get(field).and_then(Value::as_str).unwrap_or_default()
        )
    };

    Ok(CompiledContract {
        abi,
        bytecode: hex_field("bin"),
        deployed_bytecode: hex_field("bin-runtime"),
    })
}

/// Is `abi` an array of entries with known kinds?
#[must_use]
pub fn validate_abi(abi: &Value) -> bool {
    let Some(items) = abi.as_array() else {
        return false;
    };
    items.iter().all(|item| item.get("type").is_some()) && Abi::from_value(abi).is_ok_and(|a| a.is_well_formed())
}

/// Compiler errors
#[derive(Debug, thiserror::Error)]
pub enum CompilerError {
    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source file does not exist
    #[error("contract source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The compiler executable could not be started
    #[error("compiler not found: {}", .0.display())]
    ToolchainMissing(PathBuf),

    /// The compiler reported errors
    #[error("compilation failed: {0}")]
    Failed(String),

    /// Compiler output or a stored artifact could not be understood
    #[error("invalid compiler output: {0}")]
    InvalidOutput(String),
}
