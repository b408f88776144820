//! # Event Repository
//!
//! Eventos de contingencia: the signed payload, its submission state and the
//! authority's answer.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use super::document::link_to_event_in;
use super::{new_id, retry_with_new_id};
use crate::error::{DbError, DbResult};
use fesv_core::{ContingencyEvent, EventEstado};

/// A built and signed event about to be stored.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub period_id: String,
    pub company_id: String,
    pub codigo_generacion: String,
    pub event_unsigned: String,
    pub event_signed: String,
    pub dte_count: i64,
}

/// Repository for contingency events.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
    max_id_attempts: u32,
}

impl EventRepository {
    pub fn new(pool: SqlitePool, max_id_attempts: u32) -> Self {
        EventRepository {
            pool,
            max_id_attempts,
        }
    }

    /// Stores an event and links its documents in one transaction.
    pub async fn create_with_documents(
        &self,
        event: &NewEvent,
        document_ids: &[String],
    ) -> DbResult<ContingencyEvent> {
        let mut tx = self.pool.begin().await?;

        let stored = insert_in(&mut tx, event, self.max_id_attempts).await?;
        let linked = link_to_event_in(&mut tx, document_ids, &stored.id).await?;

        tx.commit().await?;

        if linked as usize != document_ids.len() {
            warn!(
                event_id = %stored.id,
                linked,
                expected = document_ids.len(),
                "Some documents were already linked to another event"
            );
        }
        info!(
            event_id = %stored.id,
            period_id = %stored.period_id,
            dte_count = stored.dte_count,
            "Contingency event stored"
        );
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<ContingencyEvent>> {
        let event =
            sqlx::query_as::<_, ContingencyEvent>("SELECT * FROM contingency_events WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(event)
    }

    /// All events of a period, oldest first.
    pub async fn for_period(&self, period_id: &str) -> DbResult<Vec<ContingencyEvent>> {
        let events = sqlx::query_as::<_, ContingencyEvent>(
            "SELECT * FROM contingency_events WHERE period_id = ?1 ORDER BY created_at ASC",
        )
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    /// Records the authority's receipt for an event.
    ///
    /// `accepted_at` is stamped once, when the event is first received.
    pub async fn record_response(
        &self,
        id: &str,
        estado: EventEstado,
        sello_recibido: Option<&str>,
        hacienda_response: &str,
    ) -> DbResult<()> {
        let now = Utc::now();
        let accepted_at = (estado == EventEstado::Recibido).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE contingency_events SET
                estado = ?2,
                sello_recibido = COALESCE(?3, sello_recibido),
                hacienda_response = ?4,
                submitted_at = ?5,
                accepted_at = COALESCE(accepted_at, ?6)
            WHERE id = ?1 AND estado = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(estado)
        .bind(sello_recibido)
        .bind(hacienda_response)
        .bind(now)
        .bind(accepted_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("pending ContingencyEvent", id));
        }

        info!(event_id = %id, estado = %estado, "Contingency event response recorded");
        Ok(())
    }
}

/// Stores a new event in the caller's transaction (estado `PENDING`).
pub async fn insert_in(
    conn: &mut SqliteConnection,
    event: &NewEvent,
    max_id_attempts: u32,
) -> DbResult<ContingencyEvent> {
    let mut attempt = 1;
    loop {
        let result: DbResult<ContingencyEvent> = sqlx::query_as::<_, ContingencyEvent>(
            r#"
            INSERT INTO contingency_events (
                id, period_id, company_id, codigo_generacion,
                event_unsigned, event_signed, estado, dte_count, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING', ?7, ?8)
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(&event.period_id)
        .bind(&event.company_id)
        .bind(&event.codigo_generacion)
        .bind(&event.event_unsigned)
        .bind(&event.event_signed)
        .bind(event.dte_count)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await
        .map_err(Into::into);

        match result {
            Err(err) if retry_with_new_id(&err, "contingency_event", attempt, max_id_attempts) => {
                attempt += 1;
            }
            other => return other,
        }
    }
}
