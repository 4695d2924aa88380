//! Compiled contract artifacts and their on-disk store.
//!
//! Layout: `<root>/<name>/<version>/artifact.json`.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{CompilerError, CompilerResult};
use crate::types::{Abi, Timestamp};

const ARTIFACT_FILE: &str = "artifact.json";

/// A compiled, versioned contract
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Contract name
    pub name: String,
    /// Version label
    pub version: String,
    /// When it was compiled
    pub compiled_at: Option<Timestamp>,
    /// Compiler version string
    pub compiler_version: Option<String>,
    /// Optimizer enabled
    #[serde(default)]
    pub optimization_enabled: bool,
    /// Optimizer runs
    #[serde(default)]
    pub optimization_runs: u32,
    /// ABI as JSON
    pub abi: Value,
    /// Creation bytecode, 0x-prefixed
    pub bytecode: String,
    /// Runtime bytecode, 0x-prefixed
    #[serde(default)]
    pub deployed_bytecode: String,
    /// SHA-256 of the source text
    pub source_hash: Option<String>,
}

impl Artifact {
    /// ABI as JSON text
    #[must_use]
    pub fn abi_json(&self) -> String {
        self.abi.to_string()
    }

    /// Parsed ABI
    pub fn parsed_abi(&self) -> CompilerResult<Abi> {
        Abi::from_value(&self.abi).map_err(|e| CompilerError::InvalidOutput(e.to_string()))
    }

    /// SHA-256 of the creation bytecode, hex
    #[must_use]
    pub fn bytecode_hash(&self) -> String {
        hex::encode(Sha256::digest(self.bytecode.as_bytes()))
    }

    /// Size of the creation bytecode in bytes
    #[must_use]
    pub fn bytecode_size(&self) -> usize {
        self.bytecode.strip_prefix("0x").unwrap_or(&self.bytecode).len() / 2
    }
}

/// Directory of stored artifacts
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `root` (created lazily)
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact for `(name, version)` lives
    #[must_use]
    pub fn path_for(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(version).join(ARTIFACT_FILE)
    }

    /// Persist an artifact, replacing any previous one
    pub fn store(&self, artifact: &Artifact) -> CompilerResult<PathBuf> {
        let path = self.path_for(&artifact.name, &artifact.version);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(artifact)
            .map_err(|e| CompilerError::InvalidOutput(e.to_string()))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Load the artifact for `(name, version)`, if stored
    pub fn load(&self, name: &str, version: &str) -> CompilerResult<Option<Artifact>> {
        let path = self.path_for(name, version);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CompilerError::InvalidOutput(format!("{}: {e}", path.display())))
    }

    /// Versions stored for `name`, in [`compare_versions`] order
    pub fn versions(&self, name: &str) -> CompilerResult<Vec<String>> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().join(ARTIFACT_FILE).is_file() {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum VersionPart<'a> {
    Number(u64),
    Text(&'a str),
}

/// Order version labels part by part, numbers numerically.
///
/// `1.0.9 < 1.0.10`; a numeric part sorts before a textual one.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    version_parts(a)
        .cmp(&version_parts(b))
        .then_with(|| a.cmp(b))
}

fn version_parts(version: &str) -> Vec<VersionPart<'_>> {
    version
        .split(['.', '-'])
        .map(|part| part.parse().map_or(VersionPart::Text(part), VersionPart::Number))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_artifact(name: &str, version: &str) -> Artifact {
        Artifact {
            name: name.to_string(),
            version: version.to_string(),
            compiled_at: None,
            compiler_version: Some("0.8.24".to_string()),
            optimization_enabled: true,
            optimization_runs: 200,
            abi: json!([
                {"type": "constructor", "inputs": []},
                {"type": "function", "name": "balanceOf", "stateMutability": "view",
                 "inputs": [{"name": "owner", "type": "address"}],
                 "outputs": [{"name": "", "type": "uint256"}]},
                {"type": "function", "name": "transfer", "stateMutability": "nonpayable",
                 "inputs": [{"name": "to", "type": "address"}, {"name": "value", "type": "uint256"}],
                 "outputs": [{"name": "", "type": "bool"}]}
            ]),
            bytecode: "0x6080604052".to_string(),
            deployed_bytecode: "0x6080".to_string(),
            source_hash: None,
        }
    }

    pub(crate) fn temp_store() -> ArtifactStore {
        ArtifactStore::new(
            std::env::temp_dir().join(format!("ledgerops-artifacts-{}", rand::random::<u64>())),
        )
    }

    #[test]
    fn test_store_and_load() {
        let store = temp_store();
        let artifact = sample_artifact("Token", "1.0.0");
        let path = store.store(&artifact).unwrap();
        assert!(path.ends_with("Token/1.0.0/artifact.json"));

        let loaded = store.load("Token", "1.0.0").unwrap().unwrap();
        assert_eq!(loaded, artifact);
        assert!(store.load("Token", "9.9.9").unwrap().is_none());

        store.store(&sample_artifact("Token", "1.0.10")).unwrap();
        store.store(&sample_artifact("Token", "1.0.9")).unwrap();
        assert_eq!(store.versions("Token").unwrap(), vec!["1.0.0", "1.0.9", "1.0.10"]);
        assert!(store.versions("Other").unwrap().is_empty());

        let _ = std::fs::remove_dir_all(store.root());
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0.9", "1.0.10"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.0", "dev-1700000000"), Ordering::Less);
    }

    #[test]
    fn test_derived_fields() {
        let artifact = sample_artifact("Token", "1.0.0");
        assert_eq!(artifact.bytecode_size(), 5);
        assert_eq!(artifact.bytecode_hash().len(), 64);
        assert!(artifact.parsed_abi().unwrap().function("transfer").is_some());
        assert!(artifact.abi_json().starts_with('['));
    }
}
