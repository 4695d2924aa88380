//! Hot reload: redeploy contract sources when they change on disk.
//!
//! The first scan only records fingerprints. Afterwards every `*.sol` file
//! whose SHA-256 changed is redeployed as `<file stem>@dev-<unix seconds>`.
//! New files are picked up silently and redeployed on their next change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::deployer::{ContractSource, DeployParams, Deployer, Deployment};
use super::ContractResult;
use crate::config::HotReloadConfig;
use crate::types::now_secs;

const SOURCE_EXTENSION: &str = "sol";

/// Version label prefix of hot-reload deployments
pub const DEV_VERSION_PREFIX: &str = "dev-";

/// Polls source directories and redeploys changed contracts
#[derive(Debug)]
pub struct HotReloader {
    deployer: Deployer,
    network: String,
    paths: Vec<PathBuf>,
    interval: Duration,
    fingerprints: HashMap<PathBuf, String>,
}

impl HotReloader {
    /// Watch the configured paths, deploying to `network`
    #[must_use]
    pub fn new(deployer: Deployer, network: &str, config: &HotReloadConfig) -> Self {
        Self {
            deployer,
            network: network.to_string(),
            paths: config.watch_paths.clone(),
            interval: Duration::from_millis(config.poll_interval_ms),
            fingerprints: HashMap::new(),
        }
    }

    /// Override the poll interval
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Files whose content changed since the previous scan
    pub fn scan(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for file in self.paths.iter().flat_map(|dir| source_files(dir)) {
            let Some(hash) = fingerprint(&file) else {
                continue;
            };
            match self.fingerprints.insert(file.clone(), hash.clone()) {
                Some(previous) if previous != hash => changed.push(file),
                _ => {}
            }
        }
        changed
    }

    /// Deploy `file` as a fresh development version
    pub async fn redeploy(&self, file: &Path) -> ContractResult<Deployment> {
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let params = DeployParams::new(&name, &format!("{DEV_VERSION_PREFIX}{}", now_secs()), &self.network)
            .source(ContractSource::File(file.to_path_buf()));
        self.deployer.deploy(params).await
    }

    /// Poll until `shutdown` flips to `true` (or its sender goes away).
    ///
    /// Returns the number of successful redeployments.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        info!(paths = ?self.paths, network = %self.network, "watching for contract changes");
        let mut redeployed = 0;
        loop {
            for file in self.scan() {
                info!(file = %file.display(), "change detected");
                match self.redeploy(&file).await {
                    Ok(deployment) => {
                        redeployed += 1;
                        info!(
                            contract = %deployment.contract.full_identifier(),
                            address = ?deployment.contract.address,
                            "redeployed"
                        );
                    }
                    Err(e) => error!(file = %file.display(), error = %e, "redeploy failed"),
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(redeployed, "watcher stopped");
        redeployed
    }
}

/// `*.sol` files directly inside `dir`, sorted
fn source_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION))
        .collect();
    files.sort();
    files
}

fn fingerprint(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::testing::Harness;

    fn watch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ledgerops-watch-{}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn reloader(h: &Harness, dir: &Path) -> HotReloader {
        let config = HotReloadConfig {
            enabled: true,
            watch_paths: vec![dir.to_path_buf()],
            poll_interval_ms: 10,
        };
        HotReloader::new(h.deployer.clone(), "local", &config)
    }

    #[test]
    fn test_scan_reports_only_changes() {
        let h = Harness::new();
        let dir = watch_dir();
        std::fs::write(dir.join("Token.sol"), "contract Token {}").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut reloader = reloader(&h, &dir);
        assert!(reloader.scan().is_empty());
        assert!(reloader.scan().is_empty());

        std::fs::write(dir.join("Token.sol"), "contract Token { uint x; }").unwrap();
        std::fs::write(dir.join("Vault.sol"), "contract Vault {}").unwrap();
        assert_eq!(reloader.scan(), vec![dir.join("Token.sol")]);

        std::fs::write(dir.join("Vault.sol"), "contract Vault { uint y; }").unwrap();
        assert_eq!(reloader.scan(), vec![dir.join("Vault.sol")]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_directory_is_skipped() {
        let h = Harness::new();
        let mut reloader = reloader(&h, Path::new("/nonexistent/ledgerops-contracts"));
        assert!(reloader.scan().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = Harness::new();
        let dir = watch_dir();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(reloader(&h, &dir).with_interval(Duration::from_millis(10)).run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let redeployed = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redeployed, 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
