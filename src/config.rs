//! TOML configuration for the lifecycle orchestrator.
//!
//! Every key has a default, so an empty file (or no file at all) yields a
//! working setup pointed at a local development node. Each component
//! receives the whole `LifecycleConfig` at construction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Get the default data directory
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ledgerops")
}

/// Default config file location
#[must_use]
pub fn default_config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Ledger backend family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Ethereum JSON-RPC node
    Evm,
    /// Local append-only audit ledger
    Journal,
    /// In-process simulated chain
    Mock,
}

impl NetworkKind {
    /// Tag stored on contract records
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Journal => "journal",
            Self::Mock => "mock",
        }
    }
}

/// One configured network
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Backend family
    #[serde(rename = "type", default = "default_network_kind")]
    pub kind: NetworkKind,
    /// JSON-RPC endpoint (evm)
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Expected chain id (evm)
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Block explorer base URL
    #[serde(default)]
    pub explorer_url: Option<String>,
    /// Ledger directory (journal)
    #[serde(default)]
    pub ledger_path: Option<PathBuf>,
    /// Sender used when a command does not name one
    #[serde(default)]
    pub default_account: Option<String>,
}

fn default_network_kind() -> NetworkKind {
    NetworkKind::Evm
}

impl NetworkConfig {
    fn evm(rpc_url: &str, chain_id: u64, explorer_url: Option<&str>) -> Self {
        Self {
            kind: NetworkKind::Evm,
            rpc_url: Some(rpc_url.to_string()),
            chain_id: Some(chain_id),
            explorer_url: explorer_url.map(ToString::to_string),
            ledger_path: None,
            default_account: None,
        }
    }

    fn of_kind(kind: NetworkKind) -> Self {
        Self {
            kind,
            rpc_url: None,
            chain_id: None,
            explorer_url: None,
            ledger_path: None,
            default_account: None,
        }
    }
}

/// Compiler toolchain settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Path to the `solc` executable
    #[serde(default = "default_solc_path")]
    pub solc_path: PathBuf,
    /// Enable the optimizer
    #[serde(default = "default_true")]
    pub optimize: bool,
    /// Optimizer runs
    #[serde(default = "default_optimize_runs")]
    pub optimize_runs: u32,
    /// Target EVM version
    #[serde(default = "default_evm_version")]
    pub evm_version: String,
}

fn default_solc_path() -> PathBuf {
    PathBuf::from("solc")
}

fn default_true() -> bool {
    true
}

fn default_optimize_runs() -> u32 {
    200
}

fn default_evm_version() -> String {
    "paris".to_string()
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            solc_path: default_solc_path(),
            optimize: true,
            optimize_runs: default_optimize_runs(),
            evm_version: default_evm_version(),
        }
    }
}

/// Gas / fee defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GasConfig {
    /// Limit used when estimation fails (default: 3,000,000)
    #[serde(default = "default_gas_limit")]
    pub default_limit: u64,
    /// Safety multiplier applied to estimates (default: 1.1)
    #[serde(default = "default_price_multiplier")]
    pub price_multiplier: f64,
    /// Max priority fee in wei (default: 2 gwei)
    #[serde(default = "default_max_priority_fee")]
    pub max_priority_fee: u64,
    /// Max fee per gas in wei (default: 100 gwei)
    #[serde(default = "default_max_fee_per_gas")]
    pub max_fee_per_gas: u64,
}

fn default_gas_limit() -> u64 {
    3_000_000
}

fn default_price_multiplier() -> f64 {
    1.1
}

fn default_max_priority_fee() -> u64 {
    2_000_000_000
}

fn default_max_fee_per_gas() -> u64 {
    100_000_000_000
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            default_limit: default_gas_limit(),
            price_multiplier: default_price_multiplier(),
            max_priority_fee: default_max_priority_fee(),
            max_fee_per_gas: default_max_fee_per_gas(),
        }
    }
}

impl GasConfig {
    /// Apply the safety multiplier to an estimate
    #[must_use]
    pub fn apply_multiplier(&self, estimate: u64) -> u64 {
        (estimate as f64 * self.price_multiplier).floor() as u64
    }
}

/// Deployment and confirmation behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Verify sources on the explorer after deploying (not performed locally)
    #[serde(default)]
    pub auto_verify: bool,
    /// Blocks to wait before treating a receipt as final
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    /// Confirmation timeout in seconds (default: 300)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Advisory retry count, recorded on deployments; never acted on
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Receipt polling interval in seconds (default: 2)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_confirmation_blocks() -> u64 {
    2
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_poll_interval_secs() -> u64 {
    2
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            auto_verify: false,
            confirmation_blocks: default_confirmation_blocks(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl DeploymentConfig {
    /// Confirmation timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Receipt polling interval
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Source watcher settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HotReloadConfig {
    /// Allow `watch` to run
    #[serde(default)]
    pub enabled: bool,
    /// Directories scanned for `.sol` files
    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<PathBuf>,
    /// Scan interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_watch_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("contracts")]
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            watch_paths: default_watch_paths(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Network used when a command does not name one
    #[serde(default = "default_network_name")]
    pub default_network: String,
    /// Artifact store root
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Registry database directory
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    /// Configured networks by name
    #[serde(default = "default_networks")]
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Compiler settings
    #[serde(default)]
    pub compiler: CompilerConfig,
    /// Gas defaults
    #[serde(default)]
    pub gas: GasConfig,
    /// Deployment defaults
    #[serde(default)]
    pub deployment: DeploymentConfig,
    /// Watcher settings
    #[serde(default)]
    pub hot_reload: HotReloadConfig,
}

fn default_network_name() -> String {
    "local".to_string()
}

fn default_networks() -> BTreeMap<String, NetworkConfig> {
    let mut networks = BTreeMap::new();
    networks.insert(
        "mainnet".to_string(),
        NetworkConfig::evm(
            "https://ethereum-rpc.publicnode.com",
            1,
            Some("https://etherscan.io"),
        ),
    );
    networks.insert(
        "sepolia".to_string(),
        NetworkConfig::evm(
            "https://ethereum-sepolia-rpc.publicnode.com",
            11_155_111,
            Some("https://sepolia.etherscan.io"),
        ),
    );
    networks.insert(
        "local".to_string(),
        NetworkConfig::evm("http://localhost:8545", 1337, None),
    );
    networks.insert("journal".to_string(), NetworkConfig::of_kind(NetworkKind::Journal));
    networks.insert("mock".to_string(), NetworkConfig::of_kind(NetworkKind::Mock));
    networks
}

fn default_storage_path() -> PathBuf {
    data_dir().join("artifacts")
}

fn default_registry_path() -> PathBuf {
    data_dir().join("registry")
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_network: default_network_name(),
            storage_path: default_storage_path(),
            registry_path: default_registry_path(),
            networks: default_networks(),
            compiler: CompilerConfig::default(),
            gas: GasConfig::default(),
            deployment: DeploymentConfig::default(),
            hot_reload: HotReloadConfig::default(),
        }
    }
}

impl LifecycleConfig {
    /// Load from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save to a TOML file
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Look up a network by name
    pub fn network(&self, name: &str) -> ConfigResult<&NetworkConfig> {
        self.networks
            .get(name)
            .ok_or_else(|| ConfigError::UnknownNetwork(name.to_string()))
    }

    /// Resolve an optional network name against the default
    #[must_use]
    pub fn network_name<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.default_network)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed or rendered
    #[error("config parse error: {0}")]
    Parse(String),

    /// Network name not present in `networks`
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: LifecycleConfig = toml::from_str("").unwrap();
        assert_eq!(config.default_network, "local");
        assert_eq!(config.gas.default_limit, 3_000_000);
        assert!((config.gas.price_multiplier - 1.1).abs() < f64::EPSILON);
        assert_eq!(config.deployment.timeout_secs, 300);
        assert_eq!(config.deployment.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.compiler.optimize_runs, 200);
        assert!(!config.hot_reload.enabled);

        let local = config.network("local").unwrap();
        assert_eq!(local.kind, NetworkKind::Evm);
        assert_eq!(local.chain_id, Some(1337));
    }

    #[test]
    fn test_partial_override() {
        let config: LifecycleConfig = toml::from_str(
            r#"
            default_network = "dev"

            [networks.dev]
            type = "journal"
            ledger_path = "/tmp/dev-ledger"

            [gas]
            price_multiplier = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.network("dev").unwrap().kind, NetworkKind::Journal);
        assert!(config.network("sepolia").is_err());
        assert_eq!(config.gas.default_limit, 3_000_000);
        assert_eq!(config.gas.apply_multiplier(100_000), 150_000);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = LifecycleConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: LifecycleConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.networks.len(), config.networks.len());
        assert_eq!(deserialized.compiler.evm_version, "paris");
    }

    #[test]
    fn test_multiplier_floors() {
        let gas = GasConfig::default();
        assert_eq!(gas.apply_multiplier(21_000), 23_100);
        assert_eq!(gas.apply_multiplier(0), 0);
    }
}
