//! # Document Repository
//!
//! Documents (DTEs) as they move through contingency.
//!
//! ## Who Writes What
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Writer                  Columns                                        │
//! │  ──────────────────────  ───────────────────────────────────────────    │
//! │  invoicing flow          insert (status = pending)                      │
//! │  queue intake            period link, status, payloads, failure_kind    │
//! │  signature retry         dte_signed, status, signature_retry_count      │
//! │  event reporting         contingency_event_id                           │
//! │  lote creation           lote_id                                        │
//! │  lote polling            status, estado, sello, fh_procesamiento,       │
//! │                          observaciones                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every status-changing statement is guarded by the states it may leave, so
//! a terminal document is never touched again.

use chrono::{NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use super::{new_id, retry_with_new_id};
use crate::error::{DbError, DbResult};
use fesv_core::authority::{parse_authority_timestamp, DocumentResult, LOCAL_DATE_FORMAT};
use fesv_core::{Document, NewDocument, TransmissionStatus};

// =============================================================================
// Filters and Inputs
// =============================================================================

/// Typed document listing filter.
///
/// ## Example
/// ```rust,ignore
/// let filter = DocumentFilter::for_company(&company_id)
///     .between(Some(desde), Some(hasta))
///     .with_statuses(&TransmissionStatus::TERMINAL);
/// let docs = db.documents().list(&filter).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub company_id: Option<String>,
    pub statuses: Vec<TransmissionStatus>,
    /// Inclusive lower bound on `fecha_emision`.
    pub fecha_desde: Option<NaiveDate>,
    /// Inclusive upper bound on `fecha_emision`.
    pub fecha_hasta: Option<NaiveDate>,
    pub codigo_generacion: Option<String>,
    pub contingency_period_id: Option<String>,
    pub limit: Option<i64>,
}

impl DocumentFilter {
    pub fn for_company(company_id: impl Into<String>) -> Self {
        DocumentFilter {
            company_id: Some(company_id.into()),
            ..Default::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[TransmissionStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn between(mut self, desde: Option<NaiveDate>, hasta: Option<NaiveDate>) -> Self {
        self.fecha_desde = desde;
        self.fecha_hasta = hasta;
        self
    }

    pub fn codigo(mut self, codigo_generacion: impl Into<String>) -> Self {
        self.codigo_generacion = Some(codigo_generacion.into());
        self
    }

    pub fn period(mut self, period_id: impl Into<String>) -> Self {
        self.contingency_period_id = Some(period_id.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// What queue intake writes onto a document.
#[derive(Debug, Clone)]
pub struct QueueUpdate {
    pub period_id: String,
    pub status: TransmissionStatus,
    pub failure_kind: String,
    pub dte_unsigned: String,
    pub dte_signed: Option<String>,
}

/// Scope, status and contingency links of a document, read under the
/// write lock.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentScope {
    pub company_id: String,
    pub establishment_id: String,
    pub point_of_sale_id: String,
    pub transmission_status: TransmissionStatus,
    pub contingency_period_id: Option<String>,
    pub contingency_event_id: Option<String>,
}

impl DocumentScope {
    /// The period that already declared this document in an event.
    pub fn reported_period(&self) -> Option<&str> {
        match (&self.contingency_period_id, &self.contingency_event_id) {
            (Some(period_id), Some(_)) => Some(period_id.as_str()),
            _ => None,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for document operations.
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
    max_id_attempts: u32,
}

impl DocumentRepository {
    pub fn new(pool: SqlitePool, max_id_attempts: u32) -> Self {
        DocumentRepository {
            pool,
            max_id_attempts,
        }
    }

    /// Registers a finalized document (status `pending`).
    pub async fn insert(&self, doc: &NewDocument) -> DbResult<Document> {
        let mut attempt = 1;
        loop {
            let now = Utc::now();
            let result: DbResult<Document> = sqlx::query_as::<_, Document>(
                r#"
                INSERT INTO documents (
                    id, company_id, establishment_id, point_of_sale_id,
                    codigo_generacion, numero_control, tipo_dte, fecha_emision,
                    transmission_status, signature_retry_count,
                    finalized_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 0, ?9, ?10, ?10)
                RETURNING *
                "#,
            )
            .bind(new_id())
            .bind(&doc.company_id)
            .bind(&doc.establishment_id)
            .bind(&doc.point_of_sale_id)
            .bind(doc.codigo_generacion.to_uppercase())
            .bind(&doc.numero_control)
            .bind(&doc.tipo_dte)
            .bind(&doc.fecha_emision)
            .bind(doc.finalized_at)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into);

            match result {
                Err(err) if retry_with_new_id(&err, "document", attempt, self.max_id_attempts) => {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    pub async fn get_by_codigo(&self, codigo_generacion: &str) -> DbResult<Option<Document>> {
        let doc =
            sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE codigo_generacion = ?1")
                .bind(codigo_generacion.to_uppercase())
                .fetch_optional(&self.pool)
                .await?;
        Ok(doc)
    }

    /// Lists documents matching `filter`, newest emission date first.
    pub async fn list(&self, filter: &DocumentFilter) -> DbResult<Vec<Document>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM documents WHERE 1 = 1");

        if let Some(company_id) = &filter.company_id {
            qb.push(" AND company_id = ").push_bind(company_id.clone());
        }
        if !filter.statuses.is_empty() {
            qb.push(" AND transmission_status IN (");
            let mut statuses = qb.separated(", ");
            for status in &filter.statuses {
                statuses.push_bind(*status);
            }
            statuses.push_unseparated(")");
        }
        if let Some(desde) = filter.fecha_desde {
            qb.push(" AND fecha_emision >= ")
                .push_bind(desde.format(LOCAL_DATE_FORMAT).to_string());
        }
        if let Some(hasta) = filter.fecha_hasta {
            qb.push(" AND fecha_emision <= ")
                .push_bind(hasta.format(LOCAL_DATE_FORMAT).to_string());
        }
        if let Some(codigo) = &filter.codigo_generacion {
            qb.push(" AND codigo_generacion = ").push_bind(codigo.to_uppercase());
        }
        if let Some(period_id) = &filter.contingency_period_id {
            qb.push(" AND contingency_period_id = ").push_bind(period_id.clone());
        }

        qb.push(" ORDER BY fecha_emision DESC, finalized_at DESC");

        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let docs = qb.build_query_as::<Document>().fetch_all(&self.pool).await?;
        Ok(docs)
    }

    /// Documents of a period not yet carried by any event, oldest first.
    pub async fn unreported_for_period(&self, period_id: &str, limit: i64) -> DbResult<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents
            WHERE contingency_period_id = ?1
              AND contingency_event_id IS NULL
              AND transmission_status NOT IN ('pending', 'procesado', 'rechazado')
            ORDER BY finalized_at ASC
            LIMIT ?2
            "#,
        )
        .bind(period_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    /// Unsigned documents still below the retry cap, oldest first.
    pub async fn pending_signature(&self, max_retries: i64, limit: i64) -> DbResult<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents
            WHERE transmission_status = 'pending_signature'
              AND signature_retry_count < ?1
            ORDER BY finalized_at ASC
            LIMIT ?2
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    pub async fn for_lote(&self, lote_id: &str) -> DbResult<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE lote_id = ?1 ORDER BY finalized_at ASC",
        )
        .bind(lote_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    /// Stores the signature and moves the document to `contingency_queued`.
    ///
    /// Resets the retry counter. Returns `false` when the document is not in
    /// an unsigned contingency state.
    pub async fn update_signature(&self, id: &str, dte_signed: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET
                dte_signed = ?2,
                transmission_status = 'contingency_queued',
                signature_retry_count = 0,
                updated_at = ?3
            WHERE id = ?1
              AND transmission_status IN ('pending_signature', 'failed_retry')
            "#,
        )
        .bind(id)
        .bind(dte_signed)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts one more failed signature attempt.
    ///
    /// Returns the new count, or `None` when the document no longer awaits a
    /// signature.
    pub async fn increment_retry_count(&self, id: &str) -> DbResult<Option<i64>> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE documents SET
                signature_retry_count = signature_retry_count + 1,
                updated_at = ?2
            WHERE id = ?1
              AND transmission_status IN ('pending_signature', 'failed_retry')
            RETURNING signature_retry_count
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(count)
    }

    /// Applies one per-document verdict of a lote poll.
    ///
    /// Only a document of this lote with this generation code and a
    /// non-terminal status is updated.
    pub async fn apply_authority_result(
        &self,
        lote_id: &str,
        result: &DocumentResult,
        status: TransmissionStatus,
    ) -> DbResult<bool> {
        let fh_procesamiento = result
            .fh_procesamiento
            .as_deref()
            .and_then(parse_authority_timestamp);
        if result.fh_procesamiento.is_some() && fh_procesamiento.is_none() {
            warn!(
                codigo_generacion = %result.codigo_generacion,
                fh_procesamiento = ?result.fh_procesamiento,
                "Unparseable fhProcesamiento in lote result"
            );
        }

        let observaciones = serde_json::to_string(&result.observaciones)
            .map_err(|e| DbError::Internal(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE documents SET
                transmission_status = ?3,
                hacienda_estado = ?4,
                sello_recibido = COALESCE(?5, sello_recibido),
                fh_procesamiento = COALESCE(?6, fh_procesamiento),
                observaciones = ?7,
                updated_at = ?8
            WHERE lote_id = ?1
              AND codigo_generacion = ?2
              AND transmission_status NOT IN ('procesado', 'rechazado')
            "#,
        )
        .bind(lote_id)
        .bind(result.codigo_generacion.to_uppercase())
        .bind(status)
        .bind(&result.estado)
        .bind(result.sello_recibido.as_deref().filter(|s| !s.is_empty()))
        .bind(fh_procesamiento)
        .bind(observaciones)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let applied = updated.rows_affected() > 0;
        if !applied {
            debug!(
                lote_id = %lote_id,
                codigo_generacion = %result.codigo_generacion,
                "Lote result matched no open document"
            );
        }
        Ok(applied)
    }

    /// True when every document of the lote is terminal.
    pub async fn lote_is_complete(&self, lote_id: &str) -> DbResult<bool> {
        let open: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM documents
            WHERE lote_id = ?1
              AND transmission_status NOT IN ('procesado', 'rechazado')
            "#,
        )
        .bind(lote_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(open == 0)
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Stamps `updated_at` and returns scope, status and contingency links.
///
/// Used as the first statement of queue intake so the transaction holds the
/// write lock before anything is read.
pub async fn touch_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<DocumentScope>> {
    let scope = sqlx::query_as::<_, DocumentScope>(
        r#"
        UPDATE documents SET updated_at = ?2
        WHERE id = ?1
        RETURNING company_id, establishment_id, point_of_sale_id, transmission_status,
                  contingency_period_id, contingency_event_id
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(scope)
}

/// Writes queue intake onto a document.
///
/// The retry counter is left as is.
pub async fn mark_queued_in(
    conn: &mut SqliteConnection,
    id: &str,
    update: &QueueUpdate,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE documents SET
            contingency_period_id = ?2,
            transmission_status = ?3,
            failure_kind = ?4,
            dte_unsigned = ?5,
            dte_signed = COALESCE(?6, dte_signed),
            updated_at = ?7
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(&update.period_id)
    .bind(update.status)
    .bind(&update.failure_kind)
    .bind(&update.dte_unsigned)
    .bind(&update.dte_signed)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Links documents to an event. Already-linked documents are skipped.
pub async fn link_to_event_in(
    conn: &mut SqliteConnection,
    document_ids: &[String],
    event_id: &str,
) -> DbResult<u64> {
    if document_ids.is_empty() {
        return Ok(0);
    }

    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE documents SET contingency_event_id = ");
    qb.push_bind(event_id.to_string());
    qb.push(", updated_at = ").push_bind(Utc::now());
    qb.push(" WHERE contingency_event_id IS NULL AND id IN (");
    let mut ids = qb.separated(", ");
    for id in document_ids {
        ids.push_bind(id.clone());
    }
    ids.push_unseparated(")");

    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Links every document of an event to its lote.
pub async fn link_event_to_lote_in(
    conn: &mut SqliteConnection,
    event_id: &str,
    lote_id: &str,
) -> DbResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE documents SET lote_id = ?2, updated_at = ?3
        WHERE contingency_event_id = ?1 AND lote_id IS NULL
        "#,
    )
    .bind(event_id)
    .bind(lote_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================
