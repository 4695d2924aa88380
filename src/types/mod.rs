//! Core value types shared across the crate.

pub mod abi;
pub mod address;

pub use abi::{Abi, AbiError, AbiItem, AbiParam, StateMutability};
pub use address::{Address, AddressError};

/// Registry record identifier (monotonic, assigned by the registry)
pub type RecordId = u64;

/// Wall-clock timestamp (UTC)
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current time
#[must_use]
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Current time as unix seconds
#[must_use]
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
