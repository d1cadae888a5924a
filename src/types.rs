use crate::errors::{IndexerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// A block height in the canonical chain, validated to be non-negative
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockHeight(i64);

impl BlockHeight {
    /// Creates a new `BlockHeight` with validation
    pub fn new(value: i64) -> Result<Self> {
        if value < 0 {
            return Err(IndexerError::invalid_format(
                "block_height",
                &format!("Block height cannot be negative: {value}"),
            ));
        }
        if value > i64::MAX - 1000 {
            return Err(IndexerError::invalid_format(
                "block_height",
                &format!("Block height too large: {value}"),
            ));
        }
        Ok(Self(value))
    }

    /// Creates a `BlockHeight` without validation (for trusted sources)
    #[must_use]
    pub const fn from_trusted(value: i64) -> Self {
        Self(value)
    }

    /// Gets the inner value
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Creates a `BlockHeight` from a hex string, as returned in substrate headers
    pub fn from_hex(hex: &str) -> Result<Self> {
        let cleaned = hex.strip_prefix("0x").unwrap_or(hex);
        let value = i64::from_str_radix(cleaned, 16).map_err(|e| {
            IndexerError::invalid_format(
                "block_height",
                &format!("Invalid hex block height '{hex}': {e}"),
            )
        })?;
        Self::new(value)
    }

    /// Subtraction clamped at genesis
    #[must_use]
    pub const fn saturating_sub(self, other: i64) -> Self {
        let value = self.0 - other;
        if value < 0 {
            Self(0)
        } else {
            Self(value)
        }
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<BlockHeight> for i64 {
    fn from(height: BlockHeight) -> Self {
        height.0
    }
}

impl FromStr for BlockHeight {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self> {
        let value = s.parse::<i64>().map_err(|e| {
            IndexerError::invalid_format(
                "block_height",
                &format!("Invalid block height '{s}': {e}"),
            )
        })?;
        Self::new(value)
    }
}

impl Add<i64> for BlockHeight {
    type Output = Self;

    fn add(self, other: i64) -> Self {
        Self::from_trusted(self.0 + other)
    }
}

impl Sub<i64> for BlockHeight {
    type Output = Self;

    fn sub(self, other: i64) -> Self {
        Self::from_trusted(self.0 - other)
    }
}

impl Sub<Self> for BlockHeight {
    type Output = i64;

    fn sub(self, other: Self) -> i64 {
        self.0 - other.0
    }
}

/// A 32-byte block hash in 0x-prefixed hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(String);

impl BlockHash {
    /// Placeholder recorded for a height that was visited but whose content could not be parsed.
    pub const ZERO: &'static str =
        "0x0000000000000000000000000000000000000000000000000000000000000000";

    /// Creates a new `BlockHash` with validation
    pub fn new(value: String) -> Result<Self> {
        Self::validate_hex_hash(&value, "block_hash")?;
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Creates a `BlockHash` without validation (for trusted sources)
    #[must_use]
    pub const fn from_trusted(value: String) -> Self {
        Self(value)
    }

    /// The sentinel zero hash
    #[must_use]
    pub fn zero() -> Self {
        Self(Self::ZERO.to_string())
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO
    }

    /// Gets the inner value
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }

    /// Gets the inner value as owned String
    #[must_use]
    pub fn into_value(self) -> String {
        self.0
    }

    /// The first five hex characters after the prefix, used in record ids.
    #[must_use]
    pub fn short(&self) -> &str {
        let cleaned = self.0.strip_prefix("0x").unwrap_or(&self.0);
        cleaned.get(..5).unwrap_or(cleaned)
    }

    fn validate_hex_hash(value: &str, field_name: &str) -> Result<()> {
        let cleaned = value.strip_prefix("0x").unwrap_or(value);

        if cleaned.len() != 64 {
            return Err(IndexerError::invalid_format(
                field_name,
                &format!(
                    "Hash must be 64 hex characters (got {}): {}",
                    cleaned.len(),
                    value
                ),
            ));
        }

        if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IndexerError::invalid_format(
                field_name,
                &format!("Hash contains non-hex characters: {value}"),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<BlockHash> for String {
    fn from(block_hash: BlockHash) -> Self {
        block_hash.0
    }
}

impl FromStr for BlockHash {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s.to_string())
    }
}

/// An EVM (H160) address, normalized to lowercase
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvmAddress(String);

impl EvmAddress {
    /// The all-zero address used as the sender of mints.
    pub const ZERO: &'static str = "0x0000000000000000000000000000000000000000";

    /// Creates a new address with validation
    pub fn new(value: &str) -> Result<Self> {
        let cleaned = value.strip_prefix("0x").ok_or_else(|| {
            IndexerError::invalid_format("address", &format!("Missing 0x prefix: {value}"))
        })?;

        if cleaned.len() != 40 {
            return Err(IndexerError::invalid_format(
                "address",
                &format!(
                    "Address must be 40 hex characters (got {}): {}",
                    cleaned.len(),
                    value
                ),
            ));
        }

        if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IndexerError::invalid_format(
                "address",
                &format!("Address contains non-hex characters: {value}"),
            ));
        }

        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Takes the low 20 bytes of a 32-byte indexed log topic.
    pub fn from_topic(topic: &str) -> Result<Self> {
        let cleaned = topic.strip_prefix("0x").unwrap_or(topic);
        let start = cleaned.len().checked_sub(40).ok_or_else(|| {
            IndexerError::invalid_format("topic", &format!("Topic too short: {topic}"))
        })?;
        let tail = cleaned.get(start..).ok_or_else(|| IndexerError::invalid_hex(topic))?;
        Self::new(&format!("0x{tail}"))
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> String {
        self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted progress marker: the height a traversal has reached and the hash it saw there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub height: BlockHeight,
    pub hash: BlockHash,
}

impl Cursor {
    #[must_use]
    pub const fn new(height: BlockHeight, hash: BlockHash) -> Self {
        Self { height, hash }
    }

    /// A cursor for a height whose content was never resolved.
    #[must_use]
    pub fn unresolved(height: BlockHeight) -> Self {
        Self::new(height, BlockHash::zero())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.height, self.hash)
    }
}

/// Traversal direction of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending, live sync toward the finalized head
    Forward,
    /// Descending, historical backfill toward the floor
    Backward,
}

impl Direction {
    /// The signed step between consecutive heights.
    #[must_use]
    pub const fn step(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
        }
    }

    /// The log tag used by everything running on this track.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backfill",
        }
    }

    /// Materializes the inclusive range `from..=to` in this direction's visiting order.
    #[must_use]
    pub fn ordered_heights(self, from: BlockHeight, to: BlockHeight) -> Vec<BlockHeight> {
        let range = from.value()..=to.value();
        match self {
            Self::Forward => range.map(BlockHeight::from_trusted).collect(),
            Self::Backward => range.rev().map(BlockHeight::from_trusted).collect(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
