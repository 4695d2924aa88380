//! The fixed delegate-forwarding proxy used for upgradeable contracts.
//!
//! Storage follows EIP-1967: the implementation address lives in slot
//! `keccak256("eip1967.proxy.implementation") - 1` and the admin (the
//! deployer) in `keccak256("eip1967.proxy.admin") - 1`, so the proxy never
//! collides with the implementation's own storage layout.
//!
//! Runtime dispatch:
//! - `upgradeTo(address)`: admin only, rewrites the implementation slot
//! - `implementation()` / `admin()`: return the stored slot
//! - anything else: `DELEGATECALL` to the implementation, bubbling return
//!   data and reverts

use serde_json::{json, Value};

use crate::compiler::Artifact;

/// Artifact name under which the proxy is recorded
pub const PROXY_ARTIFACT_NAME: &str = "DelegateProxy";

/// Proxy artifact version
pub const PROXY_ARTIFACT_VERSION: &str = "1.0.0";

/// Method that repoints the proxy
pub const UPGRADE_METHOD: &str = "upgradeTo";

/// Creation code: stores the trailing constructor word as implementation,
/// the caller as admin, then returns the runtime below.
const PROXY_INIT_CODE: &str = concat!(
    "60208038036000396000517f",
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc",
    "55337f",
    "b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103",
    "556101198061005d6000396000f3",
);

const PROXY_RUNTIME_CODE: &str = concat!(
    "60003560e01c80633659cfe61461006c5780635c60da1b146100c1578063f851a440",
    "146100ed5750366000600037600060003660007f",
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc",
    "545af43d600060003e610067573d6000fd5b3d6000f35b507f",
    "b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103",
    "54331461009a57600080fd5b6004357f",
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc",
    "55005b507f",
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc",
    "5460005260206000f35b507f",
    "b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103",
    "5460005260206000f3",
);

/// Proxy ABI
#[must_use]
pub fn proxy_abi() -> Value {
    json!([
        {
            "type": "constructor",
            "inputs": [{"name": "implementation", "type": "address"}],
            "stateMutability": "nonpayable"
        },
        {
            "type": "function",
            "name": "upgradeTo",
            "inputs": [{"name": "newImplementation", "type": "address"}],
            "outputs": [],
            "stateMutability": "nonpayable"
        },
        {
            "type": "function",
            "name": "implementation",
            "inputs": [],
            "outputs": [{"name": "", "type": "address"}],
            "stateMutability": "view"
        },
        {
            "type": "function",
            "name": "admin",
            "inputs": [],
            "outputs": [{"name": "", "type": "address"}],
            "stateMutability": "view"
        }
    ])
}

/// The proxy as a deployable artifact
#[must_use]
pub fn proxy_artifact() -> Artifact {
    Artifact {
        name: PROXY_ARTIFACT_NAME.to_string(),
        version: PROXY_ARTIFACT_VERSION.to_string(),
        compiled_at: None,
        compiler_version: Some("hand-assembled".to_string()),
        optimization_enabled: false,
        optimization_runs: 0,
        abi: proxy_abi(),
        bytecode: format!("0x{PROXY_INIT_CODE}{PROXY_RUNTIME_CODE}"),
        deployed_bytecode: format!("0x{PROXY_RUNTIME_CODE}"),
        source_hash: None,
    }
}

/// Registry name for the proxy fronting `name`
#[must_use]
pub fn proxy_name(name: &str) -> String {
    format!("{name}Proxy")
}
