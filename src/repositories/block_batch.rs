use sqlx::{Postgres, Transaction};
use tracing::debug;

use crate::{
    domain::{
        ContractCallRecord, DomainBatch, EraValidatorRecord, ExtrinsicRecord, NftRecord,
        StakingRecord, TransferRecord,
    },
    errors::{IndexerError, Result},
    types::EvmAddress,
};

type PgTx<'c> = Transaction<'c, Postgres>;

fn query_failed(table: &str, id: &str, err: &sqlx::Error) -> IndexerError {
    IndexerError::database_query(format!("Failed to write {table} {id}: {err}"))
}

/// Writes one block's records inside `tx`, in dependency order.
pub async fn insert_block_batch(tx: &mut PgTx<'_>, batch: &DomainBatch) -> Result<()> {
    insert_block(tx, batch).await?;

    for (id, evm_address) in &batch.accounts {
        upsert_account(tx, id, evm_address.as_deref()).await?;
    }
    for (address, contract) in &batch.contracts {
        upsert_contract(tx, address, &contract.name, contract.kind.as_str(), contract.data.as_ref())
            .await?;
    }
    for transfer in &batch.transfers {
        let inserted = insert_transfer(tx, transfer).await?;
        if inserted && transfer.success {
            apply_holder_deltas(tx, transfer).await?;
        }
    }
    for staking in &batch.staking_events {
        insert_staking(tx, staking).await?;
    }
    for nft in &batch.nfts {
        upsert_nft(tx, nft).await?;
    }
    for validator in &batch.era_validators {
        upsert_era_validator(tx, validator).await?;
    }
    for call in &batch.contract_calls {
        insert_contract_call(tx, call).await?;
    }
    for extrinsic in &batch.extrinsics {
        insert_extrinsic(tx, extrinsic).await?;
    }

    debug!(
        "[db] Block #{} written: {} transfers, {} accounts",
        batch.height,
        batch.transfers.len(),
        batch.accounts.len()
    );
    Ok(())
}

async fn insert_block(tx: &mut PgTx<'_>, batch: &DomainBatch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO block (height, hash, timestamp, processor_timestamp)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (height) DO UPDATE SET
            hash = EXCLUDED.hash,
            processor_timestamp = NOW()
        "#,
    )
    .bind(batch.height.value())
    .bind(batch.hash.value())
    .bind(batch.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("block", &batch.height.to_string(), &e))?;
    Ok(())
}

async fn upsert_account(tx: &mut PgTx<'_>, id: &str, evm_address: Option<&str>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO account (id, evm_address, timestamp)
        VALUES ($1, $2, NOW())
        ON CONFLICT (id) DO UPDATE SET
            evm_address = COALESCE(EXCLUDED.evm_address, account.evm_address)
        "#,
    )
    .bind(id)
    .bind(evm_address)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("account", id, &e))?;
    Ok(())
}

/// An NFT kind replaces an existing ERC20 registration; anything else keeps the first one.
async fn upsert_contract(
    tx: &mut PgTx<'_>,
    address: &str,
    name: &str,
    kind: &str,
    data: Option<&serde_json::Value>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO verified_contract (id, name, type, contract_data, timestamp)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (id) DO UPDATE SET
            type = CASE
                WHEN EXCLUDED.type IN ('ERC721', 'ERC1155') AND verified_contract.type = 'ERC20'
                THEN EXCLUDED.type
                ELSE verified_contract.type
            END,
            name = CASE
                WHEN EXCLUDED.type IN ('ERC721', 'ERC1155') AND verified_contract.type = 'ERC20'
                THEN EXCLUDED.name
                ELSE verified_contract.name
            END
        "#,
    )
    .bind(address)
    .bind(name)
    .bind(kind)
    .bind(data)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("contract", address, &e))?;
    Ok(())
}

/// Returns `false` when the transfer was already stored, so its balance change is not applied
/// twice when a block is written again.
async fn insert_transfer(tx: &mut PgTx<'_>, t: &TransferRecord) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO transfer (
            id, block_height, block_hash, extrinsic_id, extrinsic_index, event_index,
            from_id, to_id, token_id, from_evm_address, to_evm_address,
            type, reefswap_action, amount, nft_id, success, timestamp
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14::numeric, $15, $16, $17)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&t.id)
    .bind(t.block_height.value())
    .bind(t.block_hash.value())
    .bind(&t.extrinsic_id)
    .bind(i64::from(t.extrinsic_index))
    .bind(i64::from(t.event_index))
    .bind(&t.from_id)
    .bind(&t.to_id)
    .bind(&t.token_id)
    .bind(&t.from_evm_address)
    .bind(&t.to_evm_address)
    .bind(t.kind.as_str())
    .bind(&t.swap_action)
    .bind(&t.amount)
    .bind(&t.nft_id)
    .bind(t.success)
    .bind(t.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("transfer", &t.id, &e))?;
    Ok(result.rows_affected() == 1)
}

/// Credits the receiver and debits the sender. Balances never go below zero and mints from
/// the zero address debit nobody.
async fn apply_holder_deltas(tx: &mut PgTx<'_>, t: &TransferRecord) -> Result<()> {
    let nft_suffix = if t.kind.is_nft() {
        t.nft_id
            .as_deref()
            .and_then(|id| id.rsplit_once('-'))
            .map_or("0", |(_, token_id)| token_id)
    } else {
        "0"
    };
    let nft_column = t.kind.is_nft().then_some(nft_suffix);

    let to_holder = format!("{}-{}-{}", t.token_id, t.to_id, nft_suffix);
    sqlx::query(
        r#"
        INSERT INTO token_holder (id, token_id, signer_id, evm_address, nft_id, type, balance, timestamp)
        VALUES ($1, $2, $3, $4, $5, 'Account', $6::numeric, $7)
        ON CONFLICT (id) DO UPDATE SET
            balance = token_holder.balance + $6::numeric,
            timestamp = EXCLUDED.timestamp
        "#,
    )
    .bind(&to_holder)
    .bind(&t.token_id)
    .bind(&t.to_id)
    .bind(&t.to_evm_address)
    .bind(nft_column)
    .bind(&t.amount)
    .bind(t.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("token_holder", &to_holder, &e))?;

    if t.from_id == EvmAddress::ZERO {
        return Ok(());
    }

    let from_holder = format!("{}-{}-{}", t.token_id, t.from_id, nft_suffix);
    sqlx::query(
        r#"
        INSERT INTO token_holder (id, token_id, signer_id, evm_address, nft_id, type, balance, timestamp)
        VALUES ($1, $2, $3, $4, $5, 'Account', 0, $7)
        ON CONFLICT (id) DO UPDATE SET
            balance = GREATEST(0, token_holder.balance - $6::numeric),
            timestamp = EXCLUDED.timestamp
        "#,
    )
    .bind(&from_holder)
    .bind(&t.token_id)
    .bind(&t.from_id)
    .bind(&t.from_evm_address)
    .bind(nft_column)
    .bind(&t.amount)
    .bind(t.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("token_holder", &from_holder, &e))?;

    Ok(())
}

async fn insert_staking(tx: &mut PgTx<'_>, s: &StakingRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO staking (id, block_height, signer_id, type, amount, era, validator_id, timestamp)
        VALUES ($1, $2, $3, $4, $5::numeric, $6, $7, $8)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&s.id)
    .bind(s.block_height.value())
    .bind(&s.signer_id)
    .bind(s.kind.as_str())
    .bind(&s.amount)
    .bind(s.era.map(i64::from))
    .bind(&s.validator_id)
    .bind(s.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("staking", &s.id, &e))?;
    Ok(())
}

async fn upsert_nft(tx: &mut PgTx<'_>, nft: &NftRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO nft_metadata (id, contract_id, token_id, owner_id, last_transfer, timestamp)
        VALUES ($1, $2, $3, $4, $5, $5)
        ON CONFLICT (id) DO UPDATE SET
            owner_id = EXCLUDED.owner_id,
            last_transfer = EXCLUDED.last_transfer
        "#,
    )
    .bind(&nft.id)
    .bind(&nft.contract_id)
    .bind(&nft.token_id)
    .bind(&nft.owner_id)
    .bind(nft.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("nft_metadata", &nft.id, &e))?;
    Ok(())
}

async fn upsert_era_validator(tx: &mut PgTx<'_>, v: &EraValidatorRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO era_validator_info (
            id, block_height, era, address, total, own, nominators_count, commission, blocked, timestamp
        )
        VALUES ($1, $2, $3, $4, $5::numeric, $6::numeric, $7, $8, $9, $10)
        ON CONFLICT (id) DO UPDATE SET
            total = EXCLUDED.total,
            own = EXCLUDED.own,
            nominators_count = EXCLUDED.nominators_count,
            commission = EXCLUDED.commission,
            blocked = EXCLUDED.blocked,
            timestamp = EXCLUDED.timestamp
        "#,
    )
    .bind(&v.id)
    .bind(v.block_height.value())
    .bind(i64::from(v.era))
    .bind(&v.address)
    .bind(&v.total)
    .bind(&v.own)
    .bind(i64::from(v.nominators_count))
    .bind(v.commission)
    .bind(v.blocked)
    .bind(v.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("era_validator_info", &v.id, &e))?;
    Ok(())
}

async fn insert_contract_call(tx: &mut PgTx<'_>, c: &ContractCallRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO contract_call (
            id, block_height, extrinsic_id, from_id, to_id, value, gas_limit, input,
            success, error_message, timestamp
        )
        VALUES ($1, $2, $3, $4, $5, $6::numeric, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&c.id)
    .bind(c.block_height.value())
    .bind(&c.extrinsic_id)
    .bind(&c.from_id)
    .bind(&c.to_id)
    .bind(&c.value)
    .bind(&c.gas_limit)
    .bind(&c.input)
    .bind(c.success)
    .bind(&c.error_message)
    .bind(c.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("contract_call", &c.id, &e))?;
    Ok(())
}

async fn insert_extrinsic(tx: &mut PgTx<'_>, x: &ExtrinsicRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO extrinsic (
            id, block_height, block_hash, extrinsic_index, hash, signer_id, section, method,
            signature, nonce, tip, success, error_message, timestamp
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::numeric, $12, $13, $14)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&x.id)
    .bind(x.block_height.value())
    .bind(x.block_hash.value())
    .bind(i64::from(x.extrinsic_index))
    .bind(&x.hash)
    .bind(&x.signer_id)
    .bind(&x.section)
    .bind(&x.method)
    .bind(&x.signature)
    .bind(x.nonce.and_then(|n| i64::try_from(n).ok()))
    .bind(&x.tip)
    .bind(x.success)
    .bind(&x.error_message)
    .bind(x.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| query_failed("extrinsic", &x.id, &e))?;
    Ok(())
}
