//! Swap detection over the ERC-20 legs of a block.

use std::collections::BTreeMap;

use alloy_primitives::U256;

use crate::domain::{TransferKind, TransferRecord};

pub const SWAP_ACTION: &str = "Swap";

fn amount_of(transfer: &TransferRecord) -> U256 {
    U256::from_str_radix(&transfer.amount, 10).unwrap_or(U256::ZERO)
}

fn largest<'a>(legs: impl Iterator<Item = &'a TransferRecord>) -> Option<&'a TransferRecord> {
    legs.fold(None, |max: Option<&'a TransferRecord>, leg| match max {
        Some(current) if amount_of(leg) <= amount_of(current) => Some(current),
        _ => Some(leg),
    })
}

/// Returns true when `group` looks like a token swap.
///
/// Some address must both send and receive within the group, and its largest outgoing and
/// largest incoming legs must move different tokens.
fn is_swap(group: &[&TransferRecord]) -> bool {
    if group.len() < 2 {
        return false;
    }

    let mut tokens: Vec<String> = group.iter().map(|t| t.token_id.to_lowercase()).collect();
    tokens.sort_unstable();
    tokens.dedup();
    if tokens.len() < 2 {
        return false;
    }

    // Addresses in first-seen order so the pick is deterministic.
    let mut addresses: Vec<String> = Vec::new();
    for leg in group {
        for address in [leg.from_id.to_lowercase(), leg.to_id.to_lowercase()] {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
    }

    let Some(user) = addresses.iter().find(|address| {
        group.iter().any(|t| t.from_id.eq_ignore_ascii_case(address))
            && group.iter().any(|t| t.to_id.eq_ignore_ascii_case(address))
    }) else {
        return false;
    };

    let max_out = largest(group.iter().copied().filter(|t| t.from_id.eq_ignore_ascii_case(user)));
    let max_in = largest(group.iter().copied().filter(|t| t.to_id.eq_ignore_ascii_case(user)));

    match (max_out, max_in) {
        (Some(out_leg), Some(in_leg)) => !out_leg.token_id.eq_ignore_ascii_case(&in_leg.token_id),
        _ => false,
    }
}

/// Marks every ERC-20 leg of each detected swap, grouping legs by extrinsic index.
pub fn mark_swaps(transfers: &mut [TransferRecord]) {
    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (position, transfer) in transfers.iter().enumerate() {
        if transfer.kind == TransferKind::Erc20 {
            groups.entry(transfer.extrinsic_index).or_default().push(position);
        }
    }

    for positions in groups.values() {
        let group: Vec<&TransferRecord> = positions.iter().map(|&p| &transfers[p]).collect();
        if is_swap(&group) {
            for &position in positions {
                transfers[position].swap_action = Some(SWAP_ACTION.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::types::{BlockHash, BlockHeight};

    fn leg(extrinsic_index: u32, from: &str, to: &str, token: &str, amount: &str) -> TransferRecord {
        TransferRecord {
            id: format!("{extrinsic_index}-{from}-{to}"),
            block_height: BlockHeight::from_trusted(1),
            block_hash: BlockHash::zero(),
            extrinsic_id: String::new(),
            extrinsic_index,
            event_index: 0,
            from_id: from.to_string(),
            to_id: to.to_string(),
            token_id: token.to_string(),
            from_evm_address: Some(from.to_string()),
            to_evm_address: Some(to.to_string()),
            kind: TransferKind::Erc20,
            swap_action: None,
            amount: amount.to_string(),
            nft_id: None,
            success: true,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_two_token_round_trip_is_swap() {
        let mut transfers = vec![
            leg(1, "user", "pool", "tokenA", "100"),
            leg(1, "pool", "user", "tokenB", "250"),
        ];
        mark_swaps(&mut transfers);
        assert!(transfers.iter().all(|t| t.swap_action.as_deref() == Some("Swap")));
    }

    #[test]
    fn test_same_token_is_not_swap() {
        let mut transfers = vec![
            leg(1, "user", "pool", "tokenA", "100"),
            leg(1, "pool", "user", "tokenA", "90"),
        ];
        mark_swaps(&mut transfers);
        assert!(transfers.iter().all(|t| t.swap_action.is_none()));
    }

    #[test]
    fn test_legs_in_different_extrinsics_are_not_grouped() {
        let mut transfers = vec![
            leg(1, "user", "pool", "tokenA", "100"),
            leg(2, "pool", "user", "tokenB", "250"),
        ];
        mark_swaps(&mut transfers);
        assert!(transfers.iter().all(|t| t.swap_action.is_none()));
    }

    #[test]
    fn test_native_legs_are_ignored() {
        let mut native = leg(1, "pool", "user", "tokenB", "250");
        native.kind = TransferKind::Native;
        let mut transfers = vec![leg(1, "user", "pool", "tokenA", "100"), native];
        mark_swaps(&mut transfers);
        assert!(transfers.iter().all(|t| t.swap_action.is_none()));
    }

    #[test]
    fn test_no_round_trip_address_is_not_swap() {
        let mut transfers = vec![
            leg(3, "a", "b", "tokenA", "1"),
            leg(3, "c", "d", "tokenB", "1"),
        ];
        mark_swaps(&mut transfers);
        assert!(transfers.iter().all(|t| t.swap_action.is_none()));
    }
}
