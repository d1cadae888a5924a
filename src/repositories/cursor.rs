use sqlx::{PgPool, Postgres};

use crate::{
    errors::{IndexerError, Result},
    types::{BlockHash, BlockHeight, Cursor},
};

pub const FORWARD_CURSOR_ID: &str = "main";
pub const BACKFILL_CURSOR_ID: &str = "backfill";

#[derive(Debug, sqlx::FromRow)]
struct CursorDto {
    height: i64,
    hash: String,
}

pub async fn get_cursor(pool: &PgPool, id: &str) -> Result<Option<Cursor>> {
    let row: Option<CursorDto> =
        sqlx::query_as::<Postgres, CursorDto>("SELECT height, hash FROM indexer_cursor WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    row.map(|row| {
        Ok(Cursor::new(
            BlockHeight::new(row.height)?,
            BlockHash::new(row.hash)?,
        ))
    })
    .transpose()
}

pub async fn set_cursor(pool: &PgPool, id: &str, cursor: &Cursor) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO indexer_cursor (id, height, hash, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (id) DO UPDATE SET
            height = EXCLUDED.height,
            hash = EXCLUDED.hash,
            updated_at = NOW()
        "#,
    )
    .bind(id)
    .bind(cursor.height.value())
    .bind(cursor.hash.value())
    .execute(pool)
    .await?;

    if result.rows_affected() != 1 {
        return Err(IndexerError::database_query(format!(
            "Cursor '{id}' update affected {} rows",
            result.rows_affected()
        )));
    }

    Ok(())
}
