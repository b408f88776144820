//! # Contingency Worker
//!
//! Background job that drives queued documents to a verdict. Any number of
//! worker processes may run against the same store; periods and lotes are
//! claimed before they are touched.
//!
//! ## Worker Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      ContingencyWorker::run                             │
//! │                                                                         │
//! │  every 5 min   retry_signatures                                        │
//! │                pending_signature ──sign──► contingency_queued          │
//! │                                  ──fail──► retry count + 1             │
//! │                                                                         │
//! │  every 2 min   process_periods (claim active | reporting)              │
//! │                active ──authenticate ok──► close ──► reporting         │
//! │                reporting:                                              │
//! │                  1. resubmit PENDING events, lote for RECIBIDO ones    │
//! │                  2. signed, unreported documents (≤ 1000)              │
//! │                  3. build event ► sign ► store + link documents        │
//! │                  4. submit event ► record response                     │
//! │                  5. RECIBIDO ► create lote, link documents             │
//! │                  nothing left and all terminal ► completed             │
//! │                                                                         │
//! │  every 1 min   submit_lotes (claim pending)                            │
//! │                envelope ► submit_batch ► submitted + codigoLote        │
//! │                                                                         │
//! │  every 30 s    poll_lotes (claim submitted)                            │
//! │                poll_batch ► procesado / rechazado per document         │
//! │                all terminal ► lote completed ► period completed        │
//! │                                                                         │
//! │  every 5 min   sweep_stale_claims                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every pass logs and continues per unit; one bad period never blocks the
//! others. Claims are released on every path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use fesv_core::{
    ContingencyEvent, ContingencyPeriod, Document, EventEstado, Lote, LoteStatus, PeriodStatus,
    TransmissionStatus,
};
use fesv_db::{Database, DbResult, NewEvent, NewLote, StaleClaimSweep};

use crate::clock::LocalClock;
use crate::collaborators::{AuthorityError, Credentials, Signer, SignerError};
use crate::config::{ContingencyConfig, WorkerSettings};
use crate::deadline;
use crate::error::{ContingencyError, ContingencyResult};
use crate::event_builder::EventBuilder;
use crate::gateway::AuthorityGateway;
use crate::queue::ContingencyQueue;

// =============================================================================
// Pass Reports
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureRetryReport {
    pub attempted: usize,
    pub signed: usize,
    pub failed: usize,
    /// Documents that reached the retry cap during this pass.
    pub exhausted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodReport {
    pub claimed: usize,
    pub closed: usize,
    pub events_created: usize,
    pub events_submitted: usize,
    pub events_accepted: usize,
    pub lotes_created: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoteSubmitReport {
    pub claimed: usize,
    pub submitted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LotePollReport {
    pub claimed: usize,
    pub polled: usize,
    pub documents_updated: usize,
    pub lotes_completed: usize,
    pub periods_completed: usize,
    pub failed: usize,
}

// =============================================================================
// Worker Handle
// =============================================================================

/// Handle for stopping a running [`ContingencyWorker`].
///
/// Dropping every handle also stops the worker.
#[derive(Clone)]
pub struct ContingencyWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ContingencyWorkerHandle {
    /// Triggers graceful shutdown after the pass in progress.
    pub async fn shutdown(&self) -> ContingencyResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|e| ContingencyError::ChannelError(e.to_string()))
    }
}

// =============================================================================
// Contingency Worker
// =============================================================================

pub struct ContingencyWorker {
    db: Database,
    gateway: AuthorityGateway,
    signer: Arc<dyn Signer>,
    queue: ContingencyQueue,
    builder: EventBuilder,
    clock: LocalClock,
    settings: WorkerSettings,
    store_timeout: Duration,
    request_timeout: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

impl ContingencyWorker {
    pub fn new(
        db: Database,
        gateway: AuthorityGateway,
        signer: Arc<dyn Signer>,
        config: &ContingencyConfig,
    ) -> ContingencyResult<(Self, ContingencyWorkerHandle)> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let clock = LocalClock::from_config(config)?;

        let worker = ContingencyWorker {
            queue: ContingencyQueue::new(db.clone(), clock, config.store_timeout()),
            builder: EventBuilder::new(db.clone(), clock),
            db,
            gateway,
            signer,
            clock,
            settings: config.worker.clone(),
            store_timeout: config.store_timeout(),
            request_timeout: config.request_timeout(),
            shutdown_rx,
        };

        Ok((worker, ContingencyWorkerHandle { shutdown_tx }))
    }

    /// Replaces the clock used for period close and event stamps.
    pub fn with_clock(mut self, clock: LocalClock) -> Self {
        self.clock = clock;
        self.queue = ContingencyQueue::new(self.db.clone(), clock, self.store_timeout);
        self.builder = EventBuilder::new(self.db.clone(), clock);
        self
    }

    /// Runs every pass on its own interval until shutdown.
    pub async fn run(mut self) {
        info!("Contingency worker starting");

        let mut signatures = ticker(self.settings.signature_retry_interval_secs);
        let mut periods = ticker(self.settings.period_check_interval_secs);
        let mut submits = ticker(self.settings.lote_submit_interval_secs);
        let mut polls = ticker(self.settings.lote_poll_interval_secs);
        let mut sweeps = ticker(self.settings.stale_sweep_interval_secs);

        loop {
            tokio::select! {
                _ = signatures.tick() => {
                    if let Err(e) = self.retry_signatures().await {
                        error!(?e, "Signature retry pass failed");
                    }
                }
                _ = periods.tick() => {
                    if let Err(e) = self.process_periods().await {
                        error!(?e, "Period pass failed");
                    }
                }
                _ = submits.tick() => {
                    if let Err(e) = self.submit_lotes().await {
                        error!(?e, "Lote submit pass failed");
                    }
                }
                _ = polls.tick() => {
                    if let Err(e) = self.poll_lotes().await {
                        error!(?e, "Lote poll pass failed");
                    }
                }
                _ = sweeps.tick() => {
                    if let Err(e) = self.sweep_stale_claims().await {
                        error!(?e, "Stale claim sweep failed");
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Contingency worker shutting down");
                    break;
                }
            }
        }

        info!("Contingency worker stopped");
    }

    // =========================================================================
    // Signature Retry
    // =========================================================================

    /// Signs documents queued without a signature.
    pub async fn retry_signatures(&self) -> ContingencyResult<SignatureRetryReport> {
        let mut report = SignatureRetryReport::default();
        let max_retries = self.settings.max_signature_retries;

        let documents = self
            .store(
                "pending_signature",
                self.db
                    .documents()
                    .pending_signature(max_retries, self.settings.signature_batch_size),
            )
            .await?;

        if documents.is_empty() {
            debug!("No unsigned documents to retry");
            return Ok(report);
        }

        info!(count = documents.len(), "Retrying signatures");

        for doc in &documents {
            report.attempted += 1;

            let signed = match self.sign_document(doc).await {
                Ok(signed) => signed,
                Err(e) => {
                    report.failed += 1;
                    warn!(document_id = %doc.id, error = %e, "Signature retry failed");
                    match self.queue.increment_retry_count(&doc.id).await {
                        Ok(count) if count >= max_retries => {
                            report.exhausted += 1;
                            warn!(
                                document_id = %doc.id,
                                retries = count,
                                "Signature retries exhausted, manual intervention required"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(?e, document_id = %doc.id, "Failed to count signature retry"),
                    }
                    continue;
                }
            };

            match self.queue.update_signature(&doc.id, &signed).await {
                Ok(()) => report.signed += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(?e, document_id = %doc.id, "Failed to save signature");
                }
            }
        }

        Ok(report)
    }

    async fn sign_document(&self, doc: &Document) -> ContingencyResult<String> {
        let unsigned = doc.dte_unsigned.as_deref().ok_or_else(|| {
            ContingencyError::Internal(format!("document {} has no unsigned payload", doc.id))
        })?;
        let credentials = self.gateway.credentials(&doc.company_id).await?;
        self.sign(&credentials, unsigned).await
    }

    async fn sign(&self, credentials: &Credentials, payload: &str) -> ContingencyResult<String> {
        match timeout(self.request_timeout, self.signer.sign(credentials, payload)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SignerError::Timeout(self.request_timeout).into()),
        }
    }

    // =========================================================================
    // Periods
    // =========================================================================

    /// Closes recovered periods and reports their documents.
    pub async fn process_periods(&self) -> ContingencyResult<PeriodReport> {
        let mut report = PeriodReport::default();

        let periods = self
            .store(
                "claim_periods",
                self.db.claims().claim_periods(
                    &[PeriodStatus::Active, PeriodStatus::Reporting],
                    self.settings.period_claim_limit,
                ),
            )
            .await?;

        if periods.is_empty() {
            debug!("No periods to process");
            return Ok(report);
        }

        report.claimed = periods.len();
        info!(count = periods.len(), "Processing contingency periods");

        for period in &periods {
            if let Err(e) = self.process_period(period, &mut report).await {
                report.failed += 1;
                error!(?e, period_id = %period.id, "Failed to process period");
            }
            if let Err(e) = self.db.claims().release_period(&period.id).await {
                error!(?e, period_id = %period.id, "Failed to release period claim");
            }
        }

        Ok(report)
    }

    async fn process_period(
        &self,
        period: &ContingencyPeriod,
        report: &mut PeriodReport,
    ) -> ContingencyResult<()> {
        let period = match period.status {
            PeriodStatus::Active => {
                if let Err(e) = self.gateway.authenticate(&period.company_id).await {
                    info!(
                        period_id = %period.id,
                        error = %e,
                        "Authority still unavailable, period stays active"
                    );
                    return Ok(());
                }

                let periods = self.db.periods();
                if self
                    .store("close_period", periods.close(&period.id, self.clock.now_local()))
                    .await?
                {
                    report.closed += 1;
                }
                self.store("get_period", periods.get(&period.id))
                    .await?
                    .ok_or_else(|| ContingencyError::not_found("ContingencyPeriod", &period.id))?
            }
            PeriodStatus::Reporting => period.clone(),
            PeriodStatus::Completed => return Ok(()),
        };

        self.report_period(&period, report).await
    }

    async fn report_period(
        &self,
        period: &ContingencyPeriod,
        report: &mut PeriodReport,
    ) -> ContingencyResult<()> {
        let events = self
            .store("events_for_period", self.db.events().for_period(&period.id))
            .await?;
        for event in &events {
            match event.estado {
                EventEstado::Pending => self.submit_event(period, event, report).await?,
                EventEstado::Recibido => {
                    if self.ensure_lote(period, event).await? {
                        report.lotes_created += 1;
                    }
                }
                EventEstado::Rechazado => {}
            }
        }

        let documents = self
            .store(
                "unreported_for_period",
                self.db
                    .documents()
                    .unreported_for_period(&period.id, self.settings.max_documents_per_event as i64),
            )
            .await?;

        if documents.is_empty() {
            let periods = self.db.periods();
            if self
                .store("check_completion", periods.check_completion(&period.id))
                .await?
                && self.store("complete_period", periods.complete(&period.id)).await?
            {
                report.completed += 1;
            }
            return Ok(());
        }

        let signed: Vec<Document> = documents.into_iter().filter(Document::is_signed).collect();
        if signed.is_empty() {
            debug!(period_id = %period.id, "No signed documents ready for an event");
            return Ok(());
        }

        let built = self.builder.build_event(period, &signed).await?;
        let credentials = self.gateway.credentials(&period.company_id).await?;
        let event_signed = self.sign(&credentials, &built.json).await?;

        let event = self
            .store(
                "create_event",
                self.db.events().create_with_documents(
                    &NewEvent {
                        period_id: period.id.clone(),
                        company_id: period.company_id.clone(),
                        codigo_generacion: built.codigo_generacion.clone(),
                        event_unsigned: built.json.clone(),
                        event_signed,
                        dte_count: built.document_ids.len() as i64,
                    },
                    &built.document_ids,
                ),
            )
            .await?;
        report.events_created += 1;

        self.submit_event(period, &event, report).await
    }

    /// Submits a pending event and records the authority's verdict.
    ///
    /// A failed submission leaves the event `PENDING` for the next pass.
    async fn submit_event(
        &self,
        period: &ContingencyPeriod,
        event: &ContingencyEvent,
        report: &mut PeriodReport,
    ) -> ContingencyResult<()> {
        let token = self.gateway.authenticate(&period.company_id).await?;
        let events = self.db.events();

        let receipt = match self
            .gateway
            .submit_event(&token, period.ambiente, &event.event_signed)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Event submission failed, will resubmit");
                let response = serde_json::json!({ "error": e.to_string() }).to_string();
                self.store(
                    "record_event_error",
                    events.record_response(&event.id, EventEstado::Pending, None, &response),
                )
                .await?;
                return Ok(());
            }
        };
        report.events_submitted += 1;

        let estado = EventEstado::from_authority(&receipt.estado);
        let response = serde_json::to_string(&receipt)?;
        self.store(
            "record_event_response",
            events.record_response(&event.id, estado, receipt.sello_recibido.as_deref(), &response),
        )
        .await?;

        match estado {
            EventEstado::Recibido => {
                report.events_accepted += 1;
                info!(
                    event_id = %event.id,
                    sello = ?receipt.sello_recibido,
                    "Contingency event accepted"
                );
                if self.ensure_lote(period, event).await? {
                    report.lotes_created += 1;
                }
            }
            EventEstado::Rechazado => {
                error!(
                    event_id = %event.id,
                    codigo_msg = ?receipt.codigo_msg,
                    descripcion_msg = ?receipt.descripcion_msg,
                    observaciones = ?receipt.observaciones,
                    "Contingency event rejected by the authority"
                );
            }
            EventEstado::Pending => {
                warn!(
                    event_id = %event.id,
                    estado = %receipt.estado,
                    "Authority did not confirm the event, will resubmit"
                );
            }
        }

        Ok(())
    }

    /// Creates the lote of an accepted event unless it exists. Returns
    /// whether a lote was created.
    async fn ensure_lote(
        &self,
        period: &ContingencyPeriod,
        event: &ContingencyEvent,
    ) -> ContingencyResult<bool> {
        let lotes = self.db.lotes();
        if self
            .store("lote_for_event", lotes.for_event(&event.id))
            .await?
            .is_some()
        {
            return Ok(false);
        }

        self.store(
            "create_lote",
            lotes.create_for_event(&NewLote {
                event_id: event.id.clone(),
                period_id: period.id.clone(),
                company_id: period.company_id.clone(),
                ambiente: period.ambiente,
                dte_count: event.dte_count,
            }),
        )
        .await?;
        Ok(true)
    }

    // =========================================================================
    // Lote Submission
    // =========================================================================

    /// Submits pending lotes.
    pub async fn submit_lotes(&self) -> ContingencyResult<LoteSubmitReport> {
        let mut report = LoteSubmitReport::default();

        let lotes = self
            .store(
                "claim_pending_lotes",
                self.db
                    .claims()
                    .claim_lotes(&[LoteStatus::Pending], self.settings.lote_submit_limit),
            )
            .await?;

        if lotes.is_empty() {
            debug!("No pending lotes");
            return Ok(report);
        }

        report.claimed = lotes.len();
        info!(count = lotes.len(), "Submitting lotes");

        for lote in &lotes {
            match self.submit_lote(lote).await {
                Ok(()) => report.submitted += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(?e, lote_id = %lote.id, "Failed to submit lote");
                }
            }
            if let Err(e) = self.db.claims().release_lote(&lote.id).await {
                error!(?e, lote_id = %lote.id, "Failed to release lote claim");
            }
        }

        Ok(report)
    }

    async fn submit_lote(&self, lote: &Lote) -> ContingencyResult<()> {
        let documents = self
            .store("documents_for_lote", self.db.documents().for_lote(&lote.id))
            .await?;
        let signed: Vec<String> = documents
            .into_iter()
            .filter_map(|doc| doc.dte_signed)
            .filter(|jws| !jws.is_empty())
            .collect();

        let company = self
            .store("company", self.db.outlets().company(&lote.company_id))
            .await?
            .ok_or_else(|| ContingencyError::not_found("Company", &lote.company_id))?;

        let built = self
            .builder
            .build_lote_payload(lote.ambiente, &company.nit, signed)?;

        let token = self.gateway.authenticate(&lote.company_id).await?;
        let receipt = self.gateway.submit_batch(&token, &built.envelope).await?;

        if receipt.codigo_lote.trim().is_empty() {
            return Err(AuthorityError::InvalidResponse(format!(
                "batch receipt without codigoLote (estado {})",
                receipt.estado
            ))
            .into());
        }

        self.store(
            "mark_lote_submitted",
            self.db
                .lotes()
                .mark_submitted(&lote.id, &built.id_envio, &receipt.codigo_lote),
        )
        .await?;

        info!(
            lote_id = %lote.id,
            codigo_lote = %receipt.codigo_lote,
            dte_count = built.envelope.documentos.len(),
            "Lote submitted"
        );
        Ok(())
    }

    // =========================================================================
    // Lote Polling
    // =========================================================================

    /// Polls submitted lotes and applies per-document verdicts.
    pub async fn poll_lotes(&self) -> ContingencyResult<LotePollReport> {
        let mut report = LotePollReport::default();

        let lotes = self
            .store(
                "claim_submitted_lotes",
                self.db
                    .claims()
                    .claim_lotes(&[LoteStatus::Submitted], self.settings.lote_poll_limit),
            )
            .await?;

        if lotes.is_empty() {
            debug!("No submitted lotes to poll");
            return Ok(report);
        }

        report.claimed = lotes.len();

        for lote in &lotes {
            if let Err(e) = self.poll_lote(lote, &mut report).await {
                report.failed += 1;
                error!(?e, lote_id = %lote.id, "Failed to poll lote");
            }
            if let Err(e) = self.db.claims().release_lote(&lote.id).await {
                error!(?e, lote_id = %lote.id, "Failed to release lote claim");
            }
        }

        Ok(report)
    }

    async fn poll_lote(&self, lote: &Lote, report: &mut LotePollReport) -> ContingencyResult<()> {
        let Some(codigo_lote) = lote.codigo_lote.as_deref() else {
            warn!(lote_id = %lote.id, "Submitted lote has no codigoLote, skipping");
            return Ok(());
        };

        let token = self.gateway.authenticate(&lote.company_id).await?;
        let result = self.gateway.poll_batch(&token, codigo_lote).await?;
        report.polled += 1;

        let documents = self.db.documents();
        self.store("touch_polled", self.db.lotes().touch_polled(&lote.id))
            .await?;

        for verdict in &result.procesados {
            if self
                .store(
                    "apply_procesado",
                    documents.apply_authority_result(&lote.id, verdict, TransmissionStatus::Procesado),
                )
                .await?
            {
                report.documents_updated += 1;
            }
        }
        for verdict in &result.rechazados {
            warn!(
                lote_id = %lote.id,
                codigo_generacion = %verdict.codigo_generacion,
                codigo_msg = ?verdict.codigo_msg,
                descripcion_msg = ?verdict.descripcion_msg,
                "DTE rejected in lote"
            );
            if self
                .store(
                    "apply_rechazado",
                    documents.apply_authority_result(&lote.id, verdict, TransmissionStatus::Rechazado),
                )
                .await?
            {
                report.documents_updated += 1;
            }
        }

        if !self
            .store("lote_is_complete", documents.lote_is_complete(&lote.id))
            .await?
        {
            debug!(lote_id = %lote.id, "Lote still has open documents");
            return Ok(());
        }

        if self.store("complete_lote", self.db.lotes().complete(&lote.id)).await? {
            report.lotes_completed += 1;
        }

        let periods = self.db.periods();
        if self
            .store("check_completion", periods.check_completion(&lote.period_id))
            .await?
            && self.store("complete_period", periods.complete(&lote.period_id)).await?
        {
            report.periods_completed += 1;
        }

        Ok(())
    }

    // =========================================================================
    // Stale Claims
    // =========================================================================

    /// Releases claims left behind by crashed workers.
    pub async fn sweep_stale_claims(&self) -> ContingencyResult<StaleClaimSweep> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::seconds(self.settings.stale_claim_after_secs as i64);
        let swept = self
            .store("release_stale_claims", self.db.claims().release_stale_claims(cutoff))
            .await?;

        if swept.periods > 0 || swept.lotes > 0 {
            warn!(periods = swept.periods, lotes = swept.lotes, "Released stale claims");
        }
        Ok(swept)
    }

    async fn store<T, F>(&self, operation: &'static str, fut: F) -> ContingencyResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        deadline::store(self.store_timeout, operation, async move {
            fut.await.map_err(ContingencyError::from)
        })
        .await
    }
}

fn ticker(secs: u64) -> Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
