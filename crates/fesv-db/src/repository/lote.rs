//! # Lote Repository
//!
//! Batch submissions of signed documents.
//!
//! ```text
//! pending ──(submit_batch ok)──► submitted ──(all docs terminal)──► completed
//!                                   │  ▲
//!                                   └──┘ poll_batch, last_polled_at
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::document::link_event_to_lote_in;
use super::{new_id, retry_with_new_id};
use crate::error::{DbError, DbResult};
use fesv_core::{Ambiente, Lote};

#[derive(Debug, Clone)]
pub struct NewLote {
    pub event_id: String,
    pub period_id: String,
    pub company_id: String,
    pub ambiente: Ambiente,
    pub dte_count: i64,
}

/// Repository for lotes.
#[derive(Debug, Clone)]
pub struct LoteRepository {
    pool: SqlitePool,
    max_id_attempts: u32,
}

impl LoteRepository {
    pub fn new(pool: SqlitePool, max_id_attempts: u32) -> Self {
        LoteRepository {
            pool,
            max_id_attempts,
        }
    }

    /// Creates the lote of an accepted event and links the event's documents.
    pub async fn create_for_event(&self, lote: &NewLote) -> DbResult<Lote> {
        let mut tx = self.pool.begin().await?;

        let stored = insert_in(&mut tx, lote, self.max_id_attempts).await?;
        let linked = link_event_to_lote_in(&mut tx, &lote.event_id, &stored.id).await?;

        tx.commit().await?;

        info!(
            lote_id = %stored.id,
            event_id = %stored.event_id,
            linked,
            "Lote created"
        );
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Lote>> {
        let lote = sqlx::query_as::<_, Lote>("SELECT * FROM lotes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lote)
    }

    /// The lote created for an event, if any.
    pub async fn for_event(&self, event_id: &str) -> DbResult<Option<Lote>> {
        let lote = sqlx::query_as::<_, Lote>("SELECT * FROM lotes WHERE event_id = ?1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lote)
    }

    /// Records a successful batch submission.
    pub async fn mark_submitted(&self, id: &str, id_envio: &str, codigo_lote: &str) -> DbResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE lotes SET
                status = 'submitted',
                id_envio = ?2,
                codigo_lote = ?3,
                submitted_at = ?4,
                updated_at = ?4
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(id_envio)
        .bind(codigo_lote)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("pending Lote", id));
        }

        info!(lote_id = %id, codigo_lote = %codigo_lote, "Lote submitted");
        Ok(())
    }

    pub async fn touch_polled(&self, id: &str) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query("UPDATE lotes SET last_polled_at = ?2, updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn complete(&self, id: &str) -> DbResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE lotes SET
                status = 'completed',
                completed_at = ?2,
                updated_at = ?2
            WHERE id = ?1 AND status = 'submitted'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let completed = result.rows_affected() > 0;
        if completed {
            info!(lote_id = %id, "Lote completed");
        }
        Ok(completed)
    }
}

/// Stores a new pending lote in the caller's transaction.
pub async fn insert_in(
    conn: &mut SqliteConnection,
    lote: &NewLote,
    max_id_attempts: u32,
) -> DbResult<Lote> {
    let mut attempt = 1;
    loop {
        let now = Utc::now();
        let result: DbResult<Lote> = sqlx::query_as::<_, Lote>(
            r#"
            INSERT INTO lotes (
                id, event_id, period_id, company_id, ambiente,
                dte_count, status, processing, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?7)
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(&lote.event_id)
        .bind(&lote.period_id)
        .bind(&lote.company_id)
        .bind(lote.ambiente)
        .bind(lote.dte_count)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(Into::into);

        match result {
            Err(err) if retry_with_new_id(&err, "lote", attempt, max_id_attempts) => {
                attempt += 1;
            }
            other => return other,
        }
    }
}
