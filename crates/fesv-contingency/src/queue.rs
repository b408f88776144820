//! # Contingency Queue
//!
//! Entry point for the submission pipeline when a DTE could not be signed or
//! transmitted in real time.
//!
//! ## Queue Intake
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  queue_document (one transaction)                       │
//! │                                                                         │
//! │  1. touch document ──────────► write lock held, scope + status read    │
//! │  2. status check ────────────► procesado / rechazado refused           │
//! │  3. classify failure ────────► (tipo contingencia, motivo)             │
//! │  4. find or create period ───► first failure of the outage wins        │
//! │     (already in an event ────► stays in the period that declared it)   │
//! │  5. mark document            ► pending_signature  (no signature)       │
//! │                                failed_retry       (signed)             │
//! │  6. commit                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Queueing the same document twice links it to the same active period and
//! leaves it in the same state.

use std::time::Duration;

use tracing::{info, warn};

use fesv_core::{Ambiente, ContingencyPeriod, FailureKind, PeriodScope, TransmissionStatus};
use fesv_db::repository::document::{mark_queued_in, touch_in};
use fesv_db::repository::period::{find_or_create_active_in, get_in};
use fesv_db::{Database, QueueUpdate};

use crate::clock::LocalClock;
use crate::config::ContingencyConfig;
use crate::deadline;
use crate::error::{ContingencyError, ContingencyResult};

/// A document the pipeline failed to submit.
#[derive(Debug, Clone)]
pub struct QueueRequest {
    pub document_id: String,
    pub failure_kind: FailureKind,
    pub dte_unsigned: String,
    /// Present when signing succeeded and only transmission failed.
    pub dte_signed: Option<String>,
    pub ambiente: Ambiente,
}

#[derive(Debug, Clone)]
pub struct QueuedDocument {
    pub document_id: String,
    pub status: TransmissionStatus,
    pub period: ContingencyPeriod,
}

#[derive(Debug, Clone)]
pub struct ContingencyQueue {
    db: Database,
    clock: LocalClock,
    store_timeout: Duration,
}

impl ContingencyQueue {
    pub fn new(db: Database, clock: LocalClock, store_timeout: Duration) -> Self {
        ContingencyQueue {
            db,
            clock,
            store_timeout,
        }
    }

    pub fn from_config(db: Database, config: &ContingencyConfig) -> ContingencyResult<Self> {
        Ok(Self::new(db, LocalClock::from_config(config)?, config.store_timeout()))
    }

    /// Same queue with a caller-supplied deadline for each operation.
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        ContingencyQueue {
            store_timeout: deadline,
            ..self.clone()
        }
    }

    /// Queues a document in contingency.
    ///
    /// ## Errors
    /// - [`ContingencyError::NotFound`] when the document does not exist
    /// - [`ContingencyError::Domain`] when the document is already terminal
    /// - [`ContingencyError::StoreTimeout`] when the deadline passes; nothing
    ///   is written
    pub async fn queue_document(&self, request: &QueueRequest) -> ContingencyResult<QueuedDocument> {
        let queued = deadline::store(self.store_timeout, "queue_document", self.queue_in_tx(request))
            .await?;

        info!(
            document_id = %queued.document_id,
            period_id = %queued.period.id,
            status = %queued.status,
            failure_kind = %request.failure_kind,
            "Document queued in contingency"
        );
        Ok(queued)
    }

    async fn queue_in_tx(&self, request: &QueueRequest) -> ContingencyResult<QueuedDocument> {
        let document_id = request.document_id.as_str();
        let mut tx = self.db.pool().begin().await?;

        let scope = touch_in(&mut tx, document_id)
            .await?
            .ok_or_else(|| ContingencyError::not_found("Document", document_id))?;

        let status = if request.dte_signed.is_some() {
            TransmissionStatus::FailedRetry
        } else {
            TransmissionStatus::PendingSignature
        };
        scope.transmission_status.ensure_transition(document_id, status)?;

        let period = match scope.reported_period() {
            // Its event and lote belong to that period; moving it would
            // orphan them.
            Some(period_id) => get_in(&mut tx, period_id)
                .await?
                .ok_or_else(|| ContingencyError::not_found("ContingencyPeriod", period_id))?,
            None => {
                let (tipo, motivo) = request.failure_kind.classify();
                let period_scope = PeriodScope {
                    company_id: scope.company_id.clone(),
                    establishment_id: scope.establishment_id.clone(),
                    point_of_sale_id: scope.point_of_sale_id.clone(),
                    ambiente: request.ambiente,
                };
                find_or_create_active_in(
                    &mut tx,
                    &period_scope,
                    tipo,
                    &motivo,
                    self.clock.now_local(),
                    self.db.max_id_attempts(),
                )
                .await?
            }
        };

        mark_queued_in(
            &mut tx,
            document_id,
            &QueueUpdate {
                period_id: period.id.clone(),
                status,
                failure_kind: request.failure_kind.to_string(),
                dte_unsigned: request.dte_unsigned.clone(),
                dte_signed: request.dte_signed.clone(),
            },
        )
        .await?;

        tx.commit().await?;

        Ok(QueuedDocument {
            document_id: document_id.to_string(),
            status,
            period,
        })
    }

    /// Records a late signature: `contingency_queued`, retry counter reset.
    pub async fn update_signature(&self, document_id: &str, dte_signed: &str) -> ContingencyResult<()> {
        let documents = self.db.documents();
        let updated = deadline::store(self.store_timeout, "update_signature", async {
            Ok::<_, ContingencyError>(documents.update_signature(document_id, dte_signed).await?)
        })
        .await?;

        if !updated {
            return Err(self
                .refused(document_id, TransmissionStatus::ContingencyQueued)
                .await);
        }

        info!(document_id = %document_id, "Document signed, queued for lote");
        Ok(())
    }

    /// Counts a failed signature attempt and returns the new count.
    pub async fn increment_retry_count(&self, document_id: &str) -> ContingencyResult<i64> {
        let documents = self.db.documents();
        let count = deadline::store(self.store_timeout, "increment_retry_count", async {
            Ok::<_, ContingencyError>(documents.increment_retry_count(document_id).await?)
        })
        .await?;

        match count {
            Some(count) => Ok(count),
            None => Err(self
                .refused(document_id, TransmissionStatus::ContingencyQueued)
                .await),
        }
    }

    /// Explains why a guarded update changed nothing.
    async fn refused(&self, document_id: &str, next: TransmissionStatus) -> ContingencyError {
        match self.db.documents().get(document_id).await {
            Ok(Some(doc)) => {
                warn!(
                    document_id = %document_id,
                    status = %doc.transmission_status,
                    "Document does not await a signature"
                );
                match doc.transmission_status.ensure_transition(document_id, next) {
                    Err(e) => e.into(),
                    Ok(()) => ContingencyError::Internal(format!(
                        "document {document_id} update matched no row"
                    )),
                }
            }
            Ok(None) => ContingencyError::not_found("Document", document_id),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{finalized_document, memory_db, morning_clock, seed_outlet};
    use fesv_core::{PeriodStatus, TipoContingencia};
    use fesv_db::NewEvent;

    fn request(document_id: &str, kind: &str, signed: Option<&str>) -> QueueRequest {
        QueueRequest {
            document_id: document_id.to_string(),
            failure_kind: FailureKind::from(kind),
            dte_unsigned: r#"{"identificacion":{}}"#.to_string(),
            dte_signed: signed.map(str::to_string),
            ambiente: Ambiente::Test,
        }
    }

    fn queue(db: &Database) -> ContingencyQueue {
        ContingencyQueue::new(db.clone(), morning_clock(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_queue_unsigned_document_opens_period() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let doc = finalized_document(&db, &outlet).await;

        let queued = queue(&db)
            .queue_document(&request(&doc.id, "firmador_failed", None))
            .await
            .unwrap();

        assert_eq!(queued.status, TransmissionStatus::PendingSignature);
        assert_eq!(queued.period.status, PeriodStatus::Active);
        assert_eq!(queued.period.tipo_contingencia, TipoContingencia::Other);
        assert_eq!(queued.period.f_inicio, "2025-03-15");
        assert_eq!(queued.period.h_inicio, "08:00:00");

        let stored = db.documents().get(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.transmission_status, TransmissionStatus::PendingSignature);
        assert_eq!(stored.contingency_period_id.as_deref(), Some(queued.period.id.as_str()));
        assert_eq!(stored.failure_kind.as_deref(), Some("firmador_failed"));
        assert!(stored.dte_signed.is_none());
    }

    #[tokio::test]
    async fn test_signed_document_is_failed_retry() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let doc = finalized_document(&db, &outlet).await;

        let queued = queue(&db)
            .queue_document(&request(&doc.id, "hacienda_timeout", Some("eyJhbGciOi.signed")))
            .await
            .unwrap();

        assert_eq!(queued.status, TransmissionStatus::FailedRetry);
        assert_eq!(queued.period.tipo_contingencia, TipoContingencia::AuthorityDown);

        let stored = db.documents().get(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.dte_signed.as_deref(), Some("eyJhbGciOi.signed"));
    }

    #[tokio::test]
    async fn test_first_failure_classification_wins() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let first = finalized_document(&db, &outlet).await;
        let second = finalized_document(&db, &outlet).await;
        let queue = queue(&db);

        let a = queue
            .queue_document(&request(&first.id, "internet_outage", None))
            .await
            .unwrap();
        let b = queue
            .queue_document(&request(&second.id, "power_outage", None))
            .await
            .unwrap();

        assert_eq!(a.period.id, b.period.id);
        assert_eq!(b.period.tipo_contingencia, TipoContingencia::InternetOutage);
    }

    #[tokio::test]
    async fn test_queue_is_idempotent() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let doc = finalized_document(&db, &outlet).await;
        let queue = queue(&db);
        let req = request(&doc.id, "hacienda_auth_failed", None);

        let first = queue.queue_document(&req).await.unwrap();
        let second = queue.queue_document(&req).await.unwrap();

        assert_eq!(first.period.id, second.period.id);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn test_reported_document_stays_in_its_period() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let doc = finalized_document(&db, &outlet).await;
        let queue = queue(&db);

        let first = queue
            .queue_document(&request(&doc.id, "hacienda_timeout", Some("signed.jws")))
            .await
            .unwrap();
        db.periods()
            .close(&first.period.id, morning_clock().now_local())
            .await
            .unwrap();
        let event = db
            .events()
            .create_with_documents(
                &NewEvent {
                    period_id: first.period.id.clone(),
                    company_id: outlet.company.id.clone(),
                    codigo_generacion: fesv_core::new_generation_code(),
                    event_unsigned: "{}".to_string(),
                    event_signed: "signed.event".to_string(),
                    dte_count: 1,
                },
                &[doc.id.clone()],
            )
            .await
            .unwrap();

        let again = queue
            .queue_document(&request(&doc.id, "internet_outage", Some("resigned.jws")))
            .await
            .unwrap();

        assert_eq!(again.period.id, first.period.id);
        assert_eq!(again.period.status, PeriodStatus::Reporting);
        let scope = PeriodScope {
            company_id: outlet.company.id.clone(),
            establishment_id: outlet.establishment.id.clone(),
            point_of_sale_id: outlet.point_of_sale.id.clone(),
            ambiente: Ambiente::Test,
        };
        assert!(db.periods().active_for_scope(&scope).await.unwrap().is_none());

        let stored = db.documents().get(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.contingency_period_id.as_deref(), Some(first.period.id.as_str()));
        assert_eq!(stored.contingency_event_id.as_deref(), Some(event.id.as_str()));
        assert_eq!(stored.dte_signed.as_deref(), Some("resigned.jws"));
    }

    #[tokio::test]
    async fn test_unclassified_failure_keeps_raw_kind() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let doc = finalized_document(&db, &outlet).await;

        let queued = queue(&db)
            .queue_document(&request(&doc.id, "disk_full", None))
            .await
            .unwrap();

        assert_eq!(queued.period.tipo_contingencia, TipoContingencia::Other);
        assert_eq!(
            queued.period.motivo_contingencia.as_deref(),
            Some("Error no clasificado: disk_full")
        );
    }

    #[tokio::test]
    async fn test_expired_caller_deadline_writes_nothing() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let doc = finalized_document(&db, &outlet).await;

        // Another caller holds the only connection.
        let busy = db.pool().begin().await.unwrap();
        let err = queue(&db)
            .with_deadline(Duration::from_millis(50))
            .queue_document(&request(&doc.id, "hacienda_timeout", Some("signed.jws")))
            .await
            .unwrap_err();
        assert!(matches!(err, ContingencyError::StoreTimeout(_)));
        assert!(err.is_retryable());
        busy.rollback().await.unwrap();

        let periods: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contingency_periods")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(periods, 0);

        let stored = db.documents().get(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.transmission_status, doc.transmission_status);
        assert!(stored.contingency_period_id.is_none());
        assert!(stored.failure_kind.is_none());
        assert!(stored.dte_signed.is_none());
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let db = memory_db().await;
        let err = queue(&db)
            .queue_document(&request("NOPE", "firmador_failed", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ContingencyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_signature_and_retry_count() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let doc = finalized_document(&db, &outlet).await;
        let queue = queue(&db);

        queue
            .queue_document(&request(&doc.id, "firmador_failed", None))
            .await
            .unwrap();
        assert_eq!(queue.increment_retry_count(&doc.id).await.unwrap(), 1);
        assert_eq!(queue.increment_retry_count(&doc.id).await.unwrap(), 2);

        queue.update_signature(&doc.id, "signed.jws").await.unwrap();

        let stored = db.documents().get(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.transmission_status, TransmissionStatus::ContingencyQueued);
        assert_eq!(stored.signature_retry_count, 0);

        // No longer waiting for a signature.
        let err = queue.update_signature(&doc.id, "again.jws").await.unwrap_err();
        assert!(matches!(err, ContingencyError::Domain(_)));
        assert!(queue.increment_retry_count(&doc.id).await.is_err());
    }
}
