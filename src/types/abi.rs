//! Contract ABI model.
//!
//! Only the parts needed to select a method are modelled: entry kind, name,
//! input/output parameter types and state mutability. Binary argument
//! encoding is the ledger driver's job.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Entry kinds accepted in a well-formed ABI.
pub const VALID_ENTRY_KINDS: &[&str] =
    &["function", "constructor", "event", "fallback", "receive", "error"];

/// One parameter of a function, constructor or event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    /// Parameter name (may be empty)
    #[serde(default)]
    pub name: String,
    /// Canonical Solidity type, e.g. `uint256`
    #[serde(rename = "type")]
    pub kind: String,
}

/// How a function interacts with ledger state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMutability {
    /// Reads nothing from state
    Pure,
    /// Reads but does not modify state
    View,
    /// Modifies state, rejects value
    #[default]
    Nonpayable,
    /// Modifies state, accepts value
    Payable,
}

impl StateMutability {
    /// Whether a call can be served without a transaction
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Pure | Self::View)
    }
}

/// A single ABI entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbiItem {
    /// Entry kind (`function`, `constructor`, `event`, ...)
    #[serde(rename = "type", default = "default_entry_kind")]
    pub kind: String,
    /// Entry name; absent for constructors and fallbacks
    #[serde(default)]
    pub name: Option<String>,
    /// Input parameters
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    /// Output parameters
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
    /// Declared mutability
    #[serde(rename = "stateMutability", default)]
    pub state_mutability: Option<StateMutability>,
    /// Pre-0.5 compilers flag read-only functions with `constant`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<bool>,
}

fn default_entry_kind() -> String {
    "function".to_string()
}

impl AbiItem {
    /// Is this a callable function entry?
    #[must_use]
    pub fn is_function(&self) -> bool {
        self.kind == "function"
    }

    /// Effective mutability, defaulting to nonpayable
    #[must_use]
    pub fn mutability(&self) -> StateMutability {
        match (self.state_mutability, self.constant) {
            (Some(m), _) => m,
            (None, Some(true)) => StateMutability::View,
            _ => StateMutability::Nonpayable,
        }
    }

    /// Whether invoking this entry needs a transaction
    #[must_use]
    pub fn is_state_changing(&self) -> bool {
        !self.mutability().is_read_only()
    }

    /// Canonical signature, e.g. `transfer(address,uint256)`
    #[must_use]
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.inputs.iter().map(|p| p.kind.as_str()).collect();
        format!(
            "{}({})",
            self.name.as_deref().unwrap_or_default(),
            types.join(",")
        )
    }

    /// First four bytes of Keccak-256 over the signature
    #[must_use]
    pub fn selector(&self) -> [u8; 4] {
        selector(&self.signature())
    }

    /// Selector as a 0x-prefixed hex string
    #[must_use]
    pub fn selector_hex(&self) -> String {
        format!("0x{}", hex::encode(self.selector()))
    }
}

/// Compute the 4-byte method selector for a canonical signature
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// A parsed contract ABI
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Abi {
    items: Vec<AbiItem>,
}

impl Abi {
    /// Parse an ABI from its JSON text
    ///
    /// # Errors
    /// Returns error if the text is not a JSON array of ABI entries
    pub fn parse(json: &str) -> Result<Self, AbiError> {
        serde_json::from_str(json).map_err(|e| AbiError::Malformed(e.to_string()))
    }

    /// Parse an ABI from an already decoded JSON value
    ///
    /// # Errors
    /// Returns error if the value is not an array of ABI entries
    pub fn from_value(value: &serde_json::Value) -> Result<Self, AbiError> {
        serde_json::from_value(value.clone()).map_err(|e| AbiError::Malformed(e.to_string()))
    }

    /// All entries
    #[must_use]
    pub fn items(&self) -> &[AbiItem] {
        &self.items
    }

    /// Find a function entry by name
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&AbiItem> {
        self.items
            .iter()
            .find(|item| item.is_function() && item.name.as_deref() == Some(name))
    }

    /// The constructor entry, if declared
    #[must_use]
    pub fn constructor(&self) -> Option<&AbiItem> {
        self.items.iter().find(|item| item.kind == "constructor")
    }

    /// Names of all function entries
    #[must_use]
    pub fn function_names(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| item.is_function())
            .filter_map(|item| item.name.as_deref())
            .collect()
    }

    /// Check that every entry has a known kind
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.items
            .iter()
            .all(|item| VALID_ENTRY_KINDS.contains(&item.kind.as_str()))
    }
}

/// ABI errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AbiError {
    /// The ABI text could not be decoded
    #[error("malformed ABI: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERC20_FRAGMENT: &str = r#"[
        {"type":"constructor","inputs":[{"name":"supply","type":"uint256"}]},
        {"type":"function","name":"balanceOf","inputs":[{"name":"owner","type":"address"}],
         "outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
        {"type":"function","name":"transfer","inputs":[{"name":"to","type":"address"},
         {"name":"value","type":"uint256"}],"outputs":[{"name":"","type":"bool"}]},
        {"type":"event","name":"Transfer","inputs":[]},
        {"name":"legacyTotal","constant":true,"inputs":[],"outputs":[{"name":"","type":"uint256"}]}
    ]"#;

    #[test]
    fn test_find_function_ignores_events() {
        let abi = Abi::parse(ERC20_FRAGMENT).unwrap();
        assert!(abi.function("balanceOf").is_some());
        assert!(abi.function("Transfer").is_none());
        assert!(abi.function("missing").is_none());
        assert_eq!(abi.constructor().unwrap().inputs.len(), 1);
    }

    #[test]
    fn test_mutability_defaults() {
        let abi = Abi::parse(ERC20_FRAGMENT).unwrap();
        assert!(!abi.function("balanceOf").unwrap().is_state_changing());
        assert!(abi.function("transfer").unwrap().is_state_changing());
        // entries without a type are functions; `constant` means view
        assert!(!abi.function("legacyTotal").unwrap().is_state_changing());
    }

    #[test]
    fn test_signature_and_selector() {
        let abi = Abi::parse(ERC20_FRAGMENT).unwrap();
        let transfer = abi.function("transfer").unwrap();
        assert_eq!(transfer.signature(), "transfer(address,uint256)");
        assert_eq!(transfer.selector_hex(), "0xa9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
        assert_eq!(hex::encode(selector("upgradeTo(address)")), "3659cfe6");
    }

    #[test]
    fn test_well_formed() {
        let abi = Abi::parse(ERC20_FRAGMENT).unwrap();
        assert!(abi.is_well_formed());
        assert_eq!(abi.function_names(), vec!["balanceOf", "transfer", "legacyTotal"]);

        let odd = Abi::parse(r#"[{"type":"storage"}]"#).unwrap();
        assert!(!odd.is_well_formed());
        assert!(Abi::parse(r#"{"type":"function"}"#).is_err());
    }
}
