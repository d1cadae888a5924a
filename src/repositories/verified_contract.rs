use sqlx::PgPool;

use crate::{domain::VerifiedContract, errors::Result};

/// Inserts the contract, or refreshes its metadata when it already exists.
pub async fn upsert_verified_contract(pool: &PgPool, contract: &VerifiedContract) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO verified_contract (id, name, type, contract_data, timestamp)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            type = EXCLUDED.type,
            contract_data = EXCLUDED.contract_data
        "#,
    )
    .bind(&contract.id)
    .bind(&contract.symbol)
    .bind(contract.kind.as_str())
    .bind(&contract.metadata)
    .execute(pool)
    .await?;

    Ok(())
}
