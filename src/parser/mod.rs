//! # Block Parser
//!
//! Turns one decoded [`RawBlock`] into a [`DomainBatch`]. Parsing is pure: no I/O and no state
//! carried between blocks, so any two blocks can be parsed concurrently and in any order.

mod evm;
mod swap;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    domain::{
        pad_height, ContractCallRecord, ContractInfo, ContractKind, DomainBatch,
        EraValidatorRecord, ExtrinsicRecord, NftRecord, StakingKind, StakingRecord, TransferKind,
        TransferRecord, REEF_CONTRACT,
    },
    errors::{IndexerError, Result},
    types::{BlockHash, BlockHeight, EvmAddress},
};

pub use crate::rpc::{EventPhase, RawBlock, RawEvent, RawEvmLog, RawExtrinsic, RawValidatorExposure};
pub use evm::{decode_token_log, parse_u256_hex, TokenLog, TRANSFER_SINGLE_TOPIC, TRANSFER_TOPIC};
pub use swap::{mark_swaps, SWAP_ACTION};

/// Extrinsic sections that are block inherents rather than user activity.
const INHERENT_SECTIONS: [&str; 3] = ["timestamp", "parachainSystem", "authorship"];

/// Staking events that open a new era and carry a validator snapshot.
const ERA_BOUNDARY_EVENTS: [&str; 3] = ["EraPaid", "EraPayout", "StakersElected"];

/// Perbill to percent.
const PERBILL_PER_PERCENT: f64 = 10_000_000.0;

/// Pure transformation from a decoded block into domain records.
pub trait BlockParser: Send + Sync {
    /// `skip_extrinsics` drops extrinsic and contract-call records; `skip_events` drops staking
    /// events and validator snapshots. Transfers are always extracted.
    fn parse(&self, raw: &RawBlock, skip_extrinsics: bool, skip_events: bool)
        -> Result<DomainBatch>;
}

/// Parser for Reef chain blocks: native balances, EVM token logs and staking.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReefBlockParser;

impl ReefBlockParser {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone)]
struct Outcome {
    success: bool,
    error_message: Option<String>,
}

impl Default for Outcome {
    fn default() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }
}

/// Per-block state threaded through the extraction passes.
struct BlockContext {
    batch: DomainBatch,
    prefix: String,
    outcomes: HashMap<u32, Outcome>,
    transfer_index: u32,
}

impl BlockContext {
    fn extrinsic_id(&self, index: u32) -> String {
        format!("{}-{:03}", self.prefix, index)
    }

    fn next_transfer_id(&mut self) -> (String, u32) {
        let index = self.transfer_index;
        self.transfer_index += 1;
        (
            format!("{}-{}-{:03}", self.prefix, self.batch.hash.short(), index),
            index,
        )
    }

    fn outcome(&self, extrinsic_index: u32) -> Outcome {
        self.outcomes
            .get(&extrinsic_index)
            .cloned()
            .unwrap_or_default()
    }

    #[allow(clippy::too_many_arguments)]
    fn push_transfer(
        &mut self,
        extrinsic_index: u32,
        from_id: String,
        to_id: String,
        token_id: String,
        kind: TransferKind,
        amount: String,
        nft_id: Option<String>,
    ) {
        let (id, event_index) = self.next_transfer_id();
        let evm = kind != TransferKind::Native;
        self.batch.transfers.push(TransferRecord {
            id,
            block_height: self.batch.height,
            block_hash: self.batch.hash.clone(),
            extrinsic_id: self.extrinsic_id(extrinsic_index),
            extrinsic_index,
            event_index,
            from_evm_address: evm.then(|| from_id.clone()),
            to_evm_address: evm.then(|| to_id.clone()),
            from_id,
            to_id,
            token_id,
            kind,
            swap_action: None,
            amount,
            nft_id,
            success: true,
            timestamp: self.batch.timestamp,
        });
    }

    fn register_contract(&mut self, address: &EvmAddress, kind: ContractKind) {
        let name = format!("{}-{}", kind.as_str(), address.value().get(..8).unwrap_or_default());
        let entry = self.batch.contracts.get(address.value());
        let replace = match entry {
            None => true,
            // An NFT registration wins over a fungible one for the same address.
            Some(existing) => existing.kind == ContractKind::Erc20 && kind == ContractKind::Erc721,
        };
        if replace {
            self.batch.contracts.insert(
                address.value().to_string(),
                ContractInfo {
                    name,
                    kind,
                    data: None,
                },
            );
        }
    }
}

fn arg_string(values: &[Value], index: usize) -> Option<String> {
    values
        .get(index)
        .map(crate::rpc::value_to_string)
        .filter(|s| !s.is_empty())
}

impl BlockParser for ReefBlockParser {
    fn parse(
        &self,
        raw: &RawBlock,
        skip_extrinsics: bool,
        skip_events: bool,
    ) -> Result<DomainBatch> {
        let height = BlockHeight::new(raw.number)
            .map_err(|e| IndexerError::block_parse(raw.number, e.to_string()))?;
        let hash = BlockHash::new(raw.hash.clone())
            .map_err(|e| IndexerError::block_parse(raw.number, e.to_string()))?;

        let timestamp = match raw.timestamp {
            Some(ms) => DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
                IndexerError::block_parse(raw.number, format!("timestamp out of range: {ms}"))
            })?,
            None if skip_events => DateTime::<Utc>::UNIX_EPOCH,
            None => return Err(IndexerError::block_parse(raw.number, "missing timestamp")),
        };

        let mut ctx = BlockContext {
            batch: DomainBatch::empty(height, hash, timestamp),
            prefix: pad_height(height),
            outcomes: extrinsic_outcomes(&raw.events),
            transfer_index: 0,
        };

        if !skip_extrinsics {
            for (index, extrinsic) in raw.extrinsics.iter().enumerate() {
                let index = u32::try_from(index).map_err(|_| {
                    IndexerError::block_parse(raw.number, "extrinsic index overflow")
                })?;
                parse_extrinsic(&mut ctx, index, extrinsic);
            }
        }

        let mut staking_index = 0_u32;
        let mut era_boundary = false;
        for event in &raw.events {
            let extrinsic_index = event.phase.extrinsic_index().unwrap_or(0);

            if event.is("balances", "Transfer") {
                parse_native_transfer(&mut ctx, extrinsic_index, event);
            } else if event.is("evm", "Log") {
                parse_evm_log(&mut ctx, extrinsic_index, event);
            } else if event.section == "staking" && !skip_events {
                if ERA_BOUNDARY_EVENTS.contains(&event.method.as_str()) {
                    era_boundary = true;
                } else if let Some(record) =
                    parse_staking_event(&ctx, event, staking_index, raw.current_era)
                {
                    ctx.batch.touch_account(record.signer_id.clone(), None);
                    ctx.batch.staking_events.push(record);
                    staking_index += 1;
                }
            }
        }

        if era_boundary {
            if let Some(era) = raw.current_era.filter(|era| *era > 0) {
                for exposure in &raw.validators {
                    let record = era_validator(&ctx, era, exposure);
                    ctx.batch.touch_account(record.address.clone(), None);
                    ctx.batch.era_validators.push(record);
                }
            }
        }

        mark_swaps(&mut ctx.batch.transfers);
        Ok(ctx.batch)
    }
}

fn extrinsic_outcomes(events: &[RawEvent]) -> HashMap<u32, Outcome> {
    let mut outcomes = HashMap::new();
    for event in events {
        let Some(index) = event.phase.extrinsic_index() else {
            continue;
        };
        if event.is("system", "ExtrinsicSuccess") {
            outcomes.insert(index, Outcome::default());
        } else if event.is("system", "ExtrinsicFailed") {
            let message = arg_string(&event.data, 0).unwrap_or_else(|| "Unknown error".to_string());
            outcomes.insert(
                index,
                Outcome {
                    success: false,
                    error_message: Some(message),
                },
            );
        }
    }
    outcomes
}

fn parse_extrinsic(ctx: &mut BlockContext, index: u32, extrinsic: &RawExtrinsic) {
    if INHERENT_SECTIONS.contains(&extrinsic.section.as_str()) {
        return;
    }

    let outcome = ctx.outcome(index);
    let signed = extrinsic.signer.is_some();
    ctx.batch.extrinsics.push(ExtrinsicRecord {
        id: ctx.extrinsic_id(index),
        block_height: ctx.batch.height,
        block_hash: ctx.batch.hash.clone(),
        extrinsic_index: index,
        hash: extrinsic.hash.clone(),
        signer_id: extrinsic.signer.clone(),
        section: extrinsic.section.clone(),
        method: extrinsic.method.clone(),
        signature: extrinsic.signature.clone(),
        nonce: extrinsic.nonce,
        tip: if signed {
            extrinsic.tip.clone().unwrap_or_else(|| "0".to_string())
        } else {
            "0".to_string()
        },
        success: outcome.success,
        error_message: outcome.error_message.clone(),
        timestamp: ctx.batch.timestamp,
    });

    let Some(signer) = extrinsic.signer.clone() else {
        return;
    };
    ctx.batch.touch_account(signer.clone(), None);

    if extrinsic.section != "evm" || extrinsic.method != "call" {
        return;
    }

    // evm.call(target, input, value, gas_limit, ...)
    let Some(target) = arg_string(&extrinsic.args, 0).and_then(|t| EvmAddress::new(&t).ok())
    else {
        return;
    };
    ctx.register_contract(&target, ContractKind::Contract);
    ctx.batch.contract_calls.push(ContractCallRecord {
        id: format!("{}-call", ctx.extrinsic_id(index)),
        block_height: ctx.batch.height,
        extrinsic_id: ctx.extrinsic_id(index),
        from_id: signer,
        to_id: target.into_value(),
        value: arg_string(&extrinsic.args, 2).unwrap_or_else(|| "0".to_string()),
        gas_limit: arg_string(&extrinsic.args, 3),
        input: arg_string(&extrinsic.args, 1).map(|input| input.chars().take(10).collect()),
        success: outcome.success,
        error_message: outcome.error_message,
        timestamp: ctx.batch.timestamp,
    });
}

fn parse_native_transfer(ctx: &mut BlockContext, extrinsic_index: u32, event: &RawEvent) {
    let (Some(from), Some(to), Some(amount)) = (
        arg_string(&event.data, 0),
        arg_string(&event.data, 1),
        arg_string(&event.data, 2),
    ) else {
        return;
    };

    ctx.batch.touch_account(from.clone(), None);
    ctx.batch.touch_account(to.clone(), None);
    ctx.push_transfer(
        extrinsic_index,
        from,
        to,
        REEF_CONTRACT.to_string(),
        TransferKind::Native,
        amount,
        None,
    );
}

fn parse_evm_log(ctx: &mut BlockContext, extrinsic_index: u32, event: &RawEvent) {
    let Some(log) = event
        .data
        .first()
        .and_then(|value| serde_json::from_value::<RawEvmLog>(value.clone()).ok())
    else {
        return;
    };
    let Some(token_log) = decode_token_log(&log) else {
        return;
    };

    let (contract, from, to, kind, amount, token_id) = match token_log {
        TokenLog::Erc20 {
            contract,
            from,
            to,
            amount,
        } => (contract, from, to, ContractKind::Erc20, amount, None),
        TokenLog::Erc721 {
            contract,
            from,
            to,
            token_id,
        } => (
            contract,
            from,
            to,
            ContractKind::Erc721,
            alloy_primitives::U256::from(1_u8),
            Some(token_id),
        ),
        TokenLog::Erc1155 {
            contract,
            from,
            to,
            token_id,
            amount,
        } => (contract, from, to, ContractKind::Erc1155, amount, Some(token_id)),
    };

    ctx.batch
        .touch_account(from.value(), Some(from.value().to_string()));
    ctx.batch.touch_account(to.value(), Some(to.value().to_string()));
    ctx.register_contract(&contract, kind);

    let transfer_kind = match kind {
        ContractKind::Erc721 => TransferKind::Erc721,
        ContractKind::Erc1155 => TransferKind::Erc1155,
        ContractKind::Erc20 | ContractKind::Contract => TransferKind::Erc20,
    };

    let nft_id = token_id.map(|token_id| {
        let nft_id = format!("{}-{}", contract.value(), token_id);
        ctx.batch.nfts.push(NftRecord {
            id: nft_id.clone(),
            block_height: ctx.batch.height,
            contract_id: contract.value().to_string(),
            token_id: token_id.to_string(),
            owner_id: to.value().to_string(),
            timestamp: ctx.batch.timestamp,
        });
        nft_id
    });

    ctx.push_transfer(
        extrinsic_index,
        from.into_value(),
        to.into_value(),
        contract.into_value(),
        transfer_kind,
        amount.to_string(),
        nft_id,
    );
}

fn parse_staking_event(
    ctx: &BlockContext,
    event: &RawEvent,
    index: u32,
    current_era: Option<u32>,
) -> Option<StakingRecord> {
    let kind = StakingKind::from_event(&event.method)?;
    let signer_id = arg_string(&event.data, 0)?;
    Some(StakingRecord {
        id: format!("{}-stk-{:03}", ctx.prefix, index),
        block_height: ctx.batch.height,
        signer_id,
        kind,
        amount: arg_string(&event.data, 1).unwrap_or_else(|| "0".to_string()),
        era: current_era.filter(|era| *era > 0),
        validator_id: None,
        timestamp: ctx.batch.timestamp,
    })
}

fn era_validator(ctx: &BlockContext, era: u32, exposure: &RawValidatorExposure) -> EraValidatorRecord {
    #[allow(clippy::cast_precision_loss)]
    let commission = exposure
        .commission
        .map(|perbill| perbill as f64 / PERBILL_PER_PERCENT);
    EraValidatorRecord {
        id: format!("{era}-{}", exposure.address),
        block_height: ctx.batch.height,
        era,
        address: exposure.address.clone(),
        total: crate::rpc::value_to_string(&exposure.total),
        own: crate::rpc::value_to_string(&exposure.own),
        nominators_count: exposure.nominators_count,
        commission,
        blocked: exposure.blocked,
        timestamp: ctx.batch.timestamp,
    }
}
