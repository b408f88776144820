//! # Reconciliation Engine
//!
//! Audits the local ledger against the authority's canonical record.
//!
//! ```text
//! ReconcileFilter ──► documents (emission date desc)
//!                          │
//!                          ▼  authenticate once
//!              ┌───────────────────────────┐
//!              │ query_document × N        │  at most `concurrency`
//!              │ (NIT without dashes,      │  in flight, results kept
//!              │  tipo_dte, codigo)        │  in input order
//!              └─────────────┬─────────────┘
//!                            ▼
//!        Ok ► compared   NotFound ► not_found   Err ► query_failed
//!                            │
//!                            ▼
//!                 summary over every record
//!                 records: mismatches and warnings (all with include_matches)
//! ```
//!
//! A discrepancy is output, never an error. One failed query never aborts
//! the run.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fesv_core::reconcile::{ReconciliationRecord, ReconciliationSummary};
use fesv_core::validation::nit_without_dashes;
use fesv_core::Document;
use fesv_db::{Database, DocumentFilter};

use crate::config::ContingencyConfig;
use crate::deadline;
use crate::error::{ContingencyError, ContingencyResult};
use crate::gateway::AuthorityGateway;

/// Selects the documents to audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileFilter {
    pub company_id: String,
    /// Inclusive.
    pub fecha_desde: Option<NaiveDate>,
    /// Inclusive.
    pub fecha_hasta: Option<NaiveDate>,
    pub codigo_generacion: Option<String>,
    /// Also return records that matched cleanly.
    pub include_matches: bool,
}

impl ReconcileFilter {
    pub fn for_company(company_id: impl Into<String>) -> Self {
        ReconcileFilter {
            company_id: company_id.into(),
            ..Default::default()
        }
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

    pub fn include_matches(mut self, include: bool) -> Self {
        self.include_matches = include;
        self
    }

    fn document_filter(&self) -> DocumentFilter {
        let filter =
            DocumentFilter::for_company(&self.company_id).between(self.fecha_desde, self.fecha_hasta);
        match &self.codigo_generacion {
            Some(codigo) => filter.codigo(codigo),
            None => filter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub records: Vec<ReconciliationRecord>,
    /// Counts every audited document, returned or not.
    pub summary: ReconciliationSummary,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    db: Database,
    gateway: AuthorityGateway,
    concurrency: usize,
    tolerance: chrono::Duration,
    store_timeout: Duration,
}

impl ReconciliationEngine {
    pub fn new(db: Database, gateway: AuthorityGateway, config: &ContingencyConfig) -> Self {
        ReconciliationEngine {
            db,
            gateway,
            concurrency: config.reconcile.concurrency.max(1),
            tolerance: config.tolerance(),
            store_timeout: config.store_timeout(),
        }
    }

    /// Same engine with a caller-supplied store deadline.
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        ReconciliationEngine {
            store_timeout: deadline,
            ..self.clone()
        }
    }

    /// Audits every document matched by `filter`.
    ///
    /// ## Errors
    ///
    /// Fails only when the company is unknown, the store cannot be read or
    /// the authority refuses authentication. Per-document query failures
    /// become `error` records.
    pub async fn reconcile(&self, filter: &ReconcileFilter) -> ContingencyResult<ReconciliationReport> {
        let company = deadline::store(self.store_timeout, "company", async {
            Ok::<_, ContingencyError>(self.db.outlets().company(&filter.company_id).await?)
        })
        .await?
        .ok_or_else(|| ContingencyError::not_found("Company", &filter.company_id))?;

        let documents = deadline::store(self.store_timeout, "list_documents", async {
            Ok::<_, ContingencyError>(self.db.documents().list(&filter.document_filter()).await?)
        })
        .await?;

        let mut summary = ReconciliationSummary::default();
        if documents.is_empty() {
            debug!(company_id = %company.id, "No documents to reconcile");
            return Ok(ReconciliationReport {
                records: Vec::new(),
                summary,
            });
        }

        info!(
            company_id = %company.id,
            count = documents.len(),
            concurrency = self.concurrency,
            "Reconciling documents"
        );

        let token = self.gateway.authenticate(&company.id).await?;
        let nit = nit_without_dashes(&company.nit);

        let audited: Vec<ReconciliationRecord> = stream::iter(documents.iter())
            .map(|doc| self.audit(&token, &nit, doc))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut records = Vec::new();
        for record in audited {
            summary.tally(&record);
            if filter.include_matches || record.needs_review() {
                records.push(record);
            }
        }

        info!(
            company_id = %company.id,
            total = summary.total_records,
            matched = summary.matched_records,
            mismatched = summary.mismatched_records,
            not_found = summary.not_found_in_hacienda,
            errors = summary.query_errors,
            "Reconciliation finished"
        );

        Ok(ReconciliationReport { records, summary })
    }

    /// Audits a single document by its codigo de generación.
    ///
    /// Returns the record whether or not it matched.
    pub async fn reconcile_single(
        &self,
        company_id: &str,
        codigo_generacion: &str,
    ) -> ContingencyResult<ReconciliationRecord> {
        let filter = ReconcileFilter::for_company(company_id)
            .codigo(codigo_generacion)
            .include_matches(true);

        self.reconcile(&filter)
            .await?
            .records
            .into_iter()
            .next()
            .ok_or_else(|| ContingencyError::not_found("Document", codigo_generacion))
    }

    async fn audit(&self, token: &str, nit: &str, doc: &Document) -> ReconciliationRecord {
        let result = self
            .gateway
            .query_document(token, nit, &doc.tipo_dte, &doc.codigo_generacion)
            .await;
        let queried_at = Utc::now();

        match result {
            Ok(authority) => {
                let record = ReconciliationRecord::compared(doc, &authority, self.tolerance, queried_at);
                if !record.matches {
                    warn!(
                        codigo_generacion = %doc.codigo_generacion,
                        discrepancies = ?record.discrepancies,
                        "Reconciliation discrepancy"
                    );
                }
                record
            }
            Err(e) if e.is_not_found() => {
                warn!(codigo_generacion = %doc.codigo_generacion, "DTE not found in Hacienda");
                ReconciliationRecord::not_found(doc, queried_at)
            }
            Err(e) => {
                warn!(codigo_generacion = %doc.codigo_generacion, error = %e, "Hacienda query failed");
                ReconciliationRecord::query_failed(doc, e.to_string(), queried_at)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        AuthorityClient, AuthorityError, CredentialError, CredentialStore, Credentials,
    };
    use crate::test_support::{finalized_document, memory_db, seed_outlet};
    use async_trait::async_trait;
    use fesv_core::authority::{BatchReceipt, BatchResult, DocumentRecord, EventReceipt};
    use fesv_core::event::LoteEnvelope;
    use fesv_core::reconcile::QueryStatus;
    use fesv_core::Ambiente;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct LedgerAuthority {
        records: Mutex<HashMap<String, DocumentRecord>>,
        failing: Mutex<Vec<String>>,
        logins: AtomicUsize,
        queried_nits: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuthorityClient for LedgerAuthority {
        async fn authenticate(&self, _: &Credentials) -> Result<String, AuthorityError> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            Ok("token".to_string())
        }

        async fn submit_event(&self, _: &str, _: Ambiente, _: &str) -> Result<EventReceipt, AuthorityError> {
            Err(AuthorityError::Unavailable("not used".into()))
        }

        async fn submit_batch(&self, _: &str, _: &LoteEnvelope) -> Result<BatchReceipt, AuthorityError> {
            Err(AuthorityError::Unavailable("not used".into()))
        }

        async fn poll_batch(&self, _: &str, _: &str) -> Result<BatchResult, AuthorityError> {
            Err(AuthorityError::Unavailable("not used".into()))
        }

        async fn query_document(
            &self,
            _: &str,
            nit: &str,
            _: &str,
            codigo_generacion: &str,
        ) -> Result<DocumentRecord, AuthorityError> {
            self.queried_nits.lock().unwrap().push(nit.to_string());
            if self.failing.lock().unwrap().iter().any(|c| c == codigo_generacion) {
                return Err(AuthorityError::Unavailable("503".into()));
            }
            self.records
                .lock()
                .unwrap()
                .get(codigo_generacion)
                .cloned()
                .ok_or_else(|| AuthorityError::NotFound {
                    codigo_generacion: codigo_generacion.to_string(),
                })
        }
    }

    struct AnyCredentials;

    #[async_trait]
    impl CredentialStore for AnyCredentials {
        async fn credentials(&self, _: &str) -> Result<Credentials, CredentialError> {
            Ok(Credentials {
                nit: "06141203901025".into(),
                password: "secret".into(),
            })
        }
    }

    fn engine(db: &Database, authority: Arc<LedgerAuthority>) -> ReconciliationEngine {
        let gateway = AuthorityGateway::new(authority, Arc::new(AnyCredentials));
        ReconciliationEngine::new(db.clone(), gateway, &ContingencyConfig::default())
    }

    async fn mark_processed(db: &Database, doc: &Document, sello: &str) {
        sqlx::query(
            "UPDATE documents SET transmission_status = 'procesado', hacienda_estado = 'PROCESADO', sello_recibido = ?1 WHERE id = ?2",
        )
        .bind(sello)
        .bind(&doc.id)
        .execute(db.pool())
        .await
        .unwrap();
    }

    fn processed(codigo: &str, sello: &str) -> DocumentRecord {
        DocumentRecord {
            estado: "PROCESADO".to_string(),
            codigo_generacion: codigo.to_string(),
            sello_recibido: Some(sello.to_string()),
            fecha_emision: Some("15/03/2025".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reconcile_outcomes_and_summary() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let clean = finalized_document(&db, &outlet).await;
        let drifted = finalized_document(&db, &outlet).await;
        let missing = finalized_document(&db, &outlet).await;
        let broken = finalized_document(&db, &outlet).await;
        for doc in [&clean, &drifted, &missing, &broken] {
            mark_processed(&db, doc, "SELLO-LOCAL").await;
        }

        let authority = Arc::new(LedgerAuthority::default());
        {
            let mut records = authority.records.lock().unwrap();
            records.insert(clean.codigo_generacion.clone(), processed(&clean.codigo_generacion, "SELLO-LOCAL"));
            let mut rejected = processed(&drifted.codigo_generacion, "SELLO-LOCAL");
            rejected.estado = "RECHAZADO".to_string();
            records.insert(drifted.codigo_generacion.clone(), rejected);
        }
        authority.failing.lock().unwrap().push(broken.codigo_generacion.clone());

        let report = engine(&db, authority.clone())
            .reconcile(&ReconcileFilter::for_company(&outlet.company.id))
            .await
            .unwrap();

        assert_eq!(report.summary.total_records, 4);
        assert_eq!(report.summary.matched_records, 1);
        assert_eq!(report.summary.mismatched_records, 1);
        assert_eq!(report.summary.not_found_in_hacienda, 1);
        assert_eq!(report.summary.query_errors, 1);

        // clean match is left out
        assert_eq!(report.records.len(), 3);
        assert!(report
            .records
            .iter()
            .all(|r| r.codigo_generacion != clean.codigo_generacion));

        let not_found = report
            .records
            .iter()
            .find(|r| r.codigo_generacion == missing.codigo_generacion)
            .unwrap();
        assert_eq!(not_found.query_status, QueryStatus::NotFound);
        assert!(!not_found.matches);

        assert_eq!(authority.logins.load(Ordering::SeqCst), 1);
        assert!(authority
            .queried_nits
            .lock()
            .unwrap()
            .iter()
            .all(|nit| nit == "06141203901025"));
    }

    #[tokio::test]
    async fn test_include_matches_keeps_input_order() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let authority = Arc::new(LedgerAuthority::default());

        let mut expected = Vec::new();
        for _ in 0..6 {
            let doc = finalized_document(&db, &outlet).await;
            mark_processed(&db, &doc, "S").await;
            authority
                .records
                .lock()
                .unwrap()
                .insert(doc.codigo_generacion.clone(), processed(&doc.codigo_generacion, "S"));
            expected.push(doc);
        }

        let listed = db
            .documents()
            .list(&DocumentFilter::for_company(&outlet.company.id))
            .await
            .unwrap();

        let report = engine(&db, authority)
            .reconcile(&ReconcileFilter::for_company(&outlet.company.id).include_matches(true))
            .await
            .unwrap();

        assert_eq!(report.summary.matched_records, 6);
        let order: Vec<_> = report.records.iter().map(|r| r.document_id.clone()).collect();
        let listed: Vec<_> = listed.into_iter().map(|d| d.id).collect();
        assert_eq!(order, listed);
    }

    #[tokio::test]
    async fn test_reconcile_single() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let doc = finalized_document(&db, &outlet).await;
        finalized_document(&db, &outlet).await;
        mark_processed(&db, &doc, "S").await;

        let authority = Arc::new(LedgerAuthority::default());
        authority
            .records
            .lock()
            .unwrap()
            .insert(doc.codigo_generacion.clone(), processed(&doc.codigo_generacion, "S"));
        let engine = engine(&db, authority);

        let record = engine
            .reconcile_single(&outlet.company.id, &doc.codigo_generacion.to_lowercase())
            .await
            .unwrap();
        assert!(record.matches);
        assert_eq!(record.document_id, doc.id);

        let err = engine
            .reconcile_single(&outlet.company.id, "00000000-0000-0000-0000-000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, ContingencyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_caller_deadline_bounds_store_reads() {
        let db = memory_db().await;
        let outlet = seed_outlet(&db).await;
        let authority = Arc::new(LedgerAuthority::default());
        let engine = engine(&db, authority.clone()).with_deadline(Duration::from_millis(50));

        let busy = db.pool().begin().await.unwrap();
        let err = engine
            .reconcile(&ReconcileFilter::for_company(&outlet.company.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ContingencyError::StoreTimeout(_)));
        assert_eq!(authority.logins.load(Ordering::SeqCst), 0);
        busy.rollback().await.unwrap();

        let report = engine
            .reconcile(&ReconcileFilter::for_company(&outlet.company.id))
            .await
            .unwrap();
        assert_eq!(report.summary.total_records, 0);
    }

    #[tokio::test]
    async fn test_unknown_company() {
        let db = memory_db().await;
        let err = engine(&db, Arc::new(LedgerAuthority::default()))
            .reconcile(&ReconcileFilter::for_company("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContingencyError::NotFound { .. }));
    }
}
