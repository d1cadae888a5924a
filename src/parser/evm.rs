//! Decoding of the token transfer logs emitted through `evm.Log`.

use alloy_primitives::U256;

use crate::{rpc::RawEvmLog, types::EvmAddress};

/// `Transfer(address,address,uint256)`, shared by ERC-20 (3 topics) and ERC-721 (4 topics).
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// `TransferSingle(address,address,address,uint256,uint256)` from ERC-1155.
pub const TRANSFER_SINGLE_TOPIC: &str =
    "0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62";

/// A token movement recovered from a single log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLog {
    Erc20 {
        contract: EvmAddress,
        from: EvmAddress,
        to: EvmAddress,
        amount: U256,
    },
    Erc721 {
        contract: EvmAddress,
        from: EvmAddress,
        to: EvmAddress,
        token_id: U256,
    },
    Erc1155 {
        contract: EvmAddress,
        from: EvmAddress,
        to: EvmAddress,
        token_id: U256,
        amount: U256,
    },
}

/// Parses a hex quantity, with or without `0x`, into a uint256.
pub fn parse_u256_hex(hex: &str) -> Option<U256> {
    let cleaned = hex.strip_prefix("0x").unwrap_or(hex);
    if cleaned.is_empty() {
        return None;
    }
    U256::from_str_radix(cleaned, 16).ok()
}

/// Returns `None` for anything that is not a well-formed token transfer log.
pub fn decode_token_log(log: &RawEvmLog) -> Option<TokenLog> {
    let topic0 = log.topics.first()?.to_ascii_lowercase();
    let contract = EvmAddress::new(log.address.as_deref()?).ok()?;

    if topic0 == TRANSFER_TOPIC && log.topics.len() == 4 {
        return Some(TokenLog::Erc721 {
            contract,
            from: EvmAddress::from_topic(&log.topics[1]).ok()?,
            to: EvmAddress::from_topic(&log.topics[2]).ok()?,
            token_id: parse_u256_hex(&log.topics[3])?,
        });
    }

    if topic0 == TRANSFER_TOPIC && log.topics.len() == 3 {
        return Some(TokenLog::Erc20 {
            contract,
            from: EvmAddress::from_topic(&log.topics[1]).ok()?,
            to: EvmAddress::from_topic(&log.topics[2]).ok()?,
            amount: parse_u256_hex(log.data.as_deref().unwrap_or("0x0"))?,
        });
    }

    if topic0 == TRANSFER_SINGLE_TOPIC && log.topics.len() >= 4 {
        // data = abi.encode(uint256 id, uint256 value)
        let data = log.data.as_deref()?;
        if data.len() < 130 {
            return None;
        }
        return Some(TokenLog::Erc1155 {
            contract,
            from: EvmAddress::from_topic(&log.topics[2]).ok()?,
            to: EvmAddress::from_topic(&log.topics[3]).ok()?,
            token_id: parse_u256_hex(data.get(2..66)?)?,
            amount: parse_u256_hex(data.get(66..130)?)?,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const BOB: &str = "0x000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const TOKEN: &str = "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC";

    fn log(topics: &[&str], data: Option<&str>) -> RawEvmLog {
        RawEvmLog {
            address: Some(TOKEN.to_string()),
            topics: topics.iter().map(ToString::to_string).collect(),
            data: data.map(ToString::to_string),
        }
    }

    #[test]
    fn test_decode_erc20_transfer() {
        let decoded = decode_token_log(&log(
            &[TRANSFER_TOPIC, ALICE, BOB],
            Some("0x00000000000000000000000000000000000000000000000000000000000003e8"),
        ));
        let Some(TokenLog::Erc20 { contract, from, to, amount }) = decoded else {
            panic!("expected an ERC20 transfer, got {decoded:?}");
        };
        assert_eq!(contract.value(), TOKEN.to_ascii_lowercase());
        assert_eq!(from.value(), "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(to.value(), "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        assert_eq!(amount, U256::from(1000_u64));
    }

    #[test]
    fn test_decode_erc721_transfer() {
        let decoded = decode_token_log(&log(&[TRANSFER_TOPIC, ALICE, BOB, "0x2a"], None));
        assert!(matches!(
            decoded,
            Some(TokenLog::Erc721 { token_id, .. }) if token_id == U256::from(42_u64)
        ));
    }

    #[test]
    fn test_decode_erc1155_transfer_single() {
        let data = format!("0x{:064x}{:064x}", 7, 3);
        let decoded = decode_token_log(&log(
            &[TRANSFER_SINGLE_TOPIC, ALICE, ALICE, BOB],
            Some(&data),
        ));
        let Some(TokenLog::Erc1155 { from, to, token_id, amount, .. }) = decoded else {
            panic!("expected an ERC1155 transfer, got {decoded:?}");
        };
        assert_eq!(from.value(), "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(to.value(), "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        assert_eq!(token_id, U256::from(7_u64));
        assert_eq!(amount, U256::from(3_u64));
    }

    #[test]
    fn test_malformed_logs_are_ignored() {
        // short ERC1155 payload
        assert!(decode_token_log(&log(
            &[TRANSFER_SINGLE_TOPIC, ALICE, ALICE, BOB],
            Some("0x01")
        ))
        .is_none());
        // unknown topic
        assert!(decode_token_log(&log(&["0x1234", ALICE, BOB], None)).is_none());
        // bad contract address
        let mut bad = log(&[TRANSFER_TOPIC, ALICE, BOB], Some("0x01"));
        bad.address = Some("reef".to_string());
        assert!(decode_token_log(&bad).is_none());
        // no topics
        assert!(decode_token_log(&log(&[], None)).is_none());
    }

    #[test]
    fn test_parse_u256_hex() {
        assert_eq!(parse_u256_hex("0xff"), Some(U256::from(255_u64)));
        assert_eq!(parse_u256_hex("0x"), None);
        assert_eq!(parse_u256_hex("0xzz"), None);
    }
}
