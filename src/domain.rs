//! # Domain Records
//!
//! The typed records produced by parsing one block. A [`DomainBatch`] is self-contained:
//! every record in it is tagged with, and only refers to, the block it came from.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BlockHash, BlockHeight};

/// Address of the native REEF currency in its ERC20 representation.
pub const REEF_CONTRACT: &str = "0x0000000000000000000000000000000001000000";

/// The kind of a registered contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractKind {
    Erc20,
    Erc721,
    Erc1155,
    /// A contract seen only as an `evm.call` target.
    Contract,
}

impl ContractKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Erc20 => "ERC20",
            Self::Erc721 => "ERC721",
            Self::Erc1155 => "ERC1155",
            Self::Contract => "Contract",
        }
    }

    #[must_use]
    pub const fn is_nft(self) -> bool {
        matches!(self, Self::Erc721 | Self::Erc1155)
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contract discovered in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub name: String,
    pub kind: ContractKind,
    pub data: Option<serde_json::Value>,
}

/// A well-known contract that must exist before transfers refer to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedContract {
    pub id: String,
    pub symbol: String,
    pub kind: ContractKind,
    pub metadata: serde_json::Value,
}

impl VerifiedContract {
    /// The REEF native token entry created at startup.
    #[must_use]
    pub fn reef() -> Self {
        Self {
            id: REEF_CONTRACT.to_string(),
            symbol: "REEF".to_string(),
            kind: ContractKind::Erc20,
            metadata: serde_json::json!({
                "name": "REEF",
                "symbol": "REEF",
                "decimals": 18,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Native,
    Erc20,
    Erc721,
    Erc1155,
}

impl TransferKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "Native",
            Self::Erc20 => "ERC20",
            Self::Erc721 => "ERC721",
            Self::Erc1155 => "ERC1155",
        }
    }

    #[must_use]
    pub const fn is_nft(self) -> bool {
        matches!(self, Self::Erc721 | Self::Erc1155)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub block_height: BlockHeight,
    pub block_hash: BlockHash,
    pub extrinsic_id: String,
    pub extrinsic_index: u32,
    pub event_index: u32,
    pub from_id: String,
    pub to_id: String,
    pub token_id: String,
    pub from_evm_address: Option<String>,
    pub to_evm_address: Option<String>,
    pub kind: TransferKind,
    /// Set to `Some("Swap")` when the transfer is one leg of a detected swap.
    pub swap_action: Option<String>,
    /// uint256 amount in decimal.
    pub amount: String,
    /// `contract-tokenId` for NFT transfers.
    pub nft_id: Option<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingKind {
    Reward,
    Slash,
    Bonded,
    Unbonded,
    Withdrawn,
}

impl StakingKind {
    /// Maps a `staking` pallet event name onto the stored kind.
    #[must_use]
    pub fn from_event(method: &str) -> Option<Self> {
        match method {
            "Rewarded" | "Reward" => Some(Self::Reward),
            "Slashed" | "Slash" => Some(Self::Slash),
            "Bonded" => Some(Self::Bonded),
            "Unbonded" => Some(Self::Unbonded),
            "Withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reward => "Reward",
            Self::Slash => "Slash",
            Self::Bonded => "Bonded",
            Self::Unbonded => "Unbonded",
            Self::Withdrawn => "Withdrawn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingRecord {
    pub id: String,
    pub block_height: BlockHeight,
    pub signer_id: String,
    pub kind: StakingKind,
    pub amount: String,
    pub era: Option<u32>,
    pub validator_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EraValidatorRecord {
    pub id: String,
    pub block_height: BlockHeight,
    pub era: u32,
    pub address: String,
    pub total: String,
    pub own: String,
    pub nominators_count: u32,
    /// Percent, converted from Perbill.
    pub commission: Option<f64>,
    pub blocked: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftRecord {
    /// `contract-tokenId`
    pub id: String,
    pub block_height: BlockHeight,
    pub contract_id: String,
    pub token_id: String,
    pub owner_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCallRecord {
    pub id: String,
    pub block_height: BlockHeight,
    pub extrinsic_id: String,
    pub from_id: String,
    pub to_id: String,
    pub value: String,
    pub gas_limit: Option<String>,
    /// Method selector only (`0x` + 4 bytes).
    pub input: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtrinsicRecord {
    pub id: String,
    pub block_height: BlockHeight,
    pub block_hash: BlockHash,
    pub extrinsic_index: u32,
    pub hash: String,
    pub signer_id: Option<String>,
    pub section: String,
    pub method: String,
    pub signature: Option<String>,
    pub nonce: Option<u64>,
    pub tip: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Everything extracted from one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainBatch {
    pub height: BlockHeight,
    pub hash: BlockHash,
    pub timestamp: DateTime<Utc>,
    /// Touched accounts: native address to EVM address, when known.
    pub accounts: BTreeMap<String, Option<String>>,
    /// Contract registrations keyed by lowercase address.
    pub contracts: BTreeMap<String, ContractInfo>,
    pub transfers: Vec<TransferRecord>,
    pub staking_events: Vec<StakingRecord>,
    pub era_validators: Vec<EraValidatorRecord>,
    pub nfts: Vec<NftRecord>,
    pub contract_calls: Vec<ContractCallRecord>,
    pub extrinsics: Vec<ExtrinsicRecord>,
}

impl DomainBatch {
    #[must_use]
    pub const fn empty(height: BlockHeight, hash: BlockHash, timestamp: DateTime<Utc>) -> Self {
        Self {
            height,
            hash,
            timestamp,
            accounts: BTreeMap::new(),
            contracts: BTreeMap::new(),
            transfers: Vec::new(),
            staking_events: Vec::new(),
            era_validators: Vec::new(),
            nfts: Vec::new(),
            contract_calls: Vec::new(),
            extrinsics: Vec::new(),
        }
    }

    /// True when the block carries no account, contract or transfer activity.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.transfers.is_empty() && self.accounts.is_empty() && self.contracts.is_empty()
    }

    /// Records an account touch; a known EVM address is never overwritten with `None`.
    pub fn touch_account(&mut self, id: impl Into<String>, evm_address: Option<String>) {
        let entry = self.accounts.entry(id.into()).or_insert(None);
        if evm_address.is_some() {
            *entry = evm_address;
        }
    }
}

/// Zero-padded block height used as the prefix of every record id.
#[must_use]
pub fn pad_height(height: BlockHeight) -> String {
    format!("{:010}", height.value())
}
