//! Decoded block content as served by the node's `reef_getDecodedBlock` method.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One block with its extrinsics and events already decoded into JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub number: i64,
    pub hash: String,
    #[serde(default)]
    pub parent_hash: Option<String>,
    /// `timestamp.now` in unix milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Empty when the block was requested without extrinsics.
    #[serde(default)]
    pub extrinsics: Vec<RawExtrinsic>,
    #[serde(default)]
    pub events: Vec<RawEvent>,
    #[serde(default)]
    pub current_era: Option<u32>,
    /// Validator exposures, present on era-boundary blocks.
    #[serde(default)]
    pub validators: Vec<RawValidatorExposure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExtrinsic {
    pub hash: String,
    pub section: String,
    pub method: String,
    #[serde(default)]
    pub signer: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub tip: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventPhase {
    ApplyExtrinsic(u32),
    Initialization,
    Finalization,
}

impl EventPhase {
    #[must_use]
    pub const fn extrinsic_index(self) -> Option<u32> {
        match self {
            Self::ApplyExtrinsic(index) => Some(index),
            Self::Initialization | Self::Finalization => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub section: String,
    pub method: String,
    #[serde(default)]
    pub data: Vec<Value>,
    pub phase: EventPhase,
}

impl RawEvent {
    #[must_use]
    pub fn is(&self, section: &str, method: &str) -> bool {
        self.section == section && self.method == method
    }
}

/// The first argument of an `evm.Log` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvmLog {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawValidatorExposure {
    pub address: String,
    pub total: Value,
    pub own: Value,
    #[serde(default)]
    pub nominators_count: u32,
    /// Perbill.
    #[serde(default)]
    pub commission: Option<u64>,
    #[serde(default)]
    pub blocked: bool,
}

/// Renders a decoded scalar argument as a string without JSON quoting.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
