//! # fesv-contingency: Contingency Engine for DTE Emission
//!
//! When the signer or the tax authority is unreachable, finalized documents
//! are queued under a contingency period. Once service recovers they are
//! signed, declared in an evento de contingencia, shipped in a lote and
//! driven to a verdict. The reconciliation engine later audits the local
//! ledger against the authority's record.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Contingency Engine                                  │
//! │                                                                         │
//! │  emission failure                                                       │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌──────────────────┐     ┌──────────────────────────────────────────┐ │
//! │  │ ContingencyQueue │     │           ContingencyWorker              │ │
//! │  │                  │     │                                          │ │
//! │  │ classify failure │     │ retry_signatures   submit_lotes          │ │
//! │  │ find/open period │────►│ process_periods    poll_lotes            │ │
//! │  │ mark queued      │     │ sweep_stale_claims                       │ │
//! │  └──────────────────┘     └───────────┬──────────────────────────────┘ │
//! │                                       │                                 │
//! │            ┌──────────────┐   ┌───────▼────────┐   ┌────────────────┐  │
//! │            │ EventBuilder │   │AuthorityGateway│   │ Reconciliation │  │
//! │            │ evento + lote│   │ timeout,backoff│◄──│ Engine         │  │
//! │            └──────────────┘   └───────┬────────┘   └────────────────┘  │
//! │                                       │                                 │
//! │             Signer / AuthorityClient / CredentialStore (host-provided)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`queue`] - Failure intake and the signature mutators
//! - [`event_builder`] - Evento de contingencia and lote payloads
//! - [`worker`] - Background passes and their handle
//! - [`reconcile`] - Ledger audit against the authority
//! - [`report`] - CSV reconciliation sheets in local time
//! - [`gateway`] - Timeouts and authentication backoff around the authority
//! - [`collaborators`] - Signer, authority and credential traits
//! - [`config`] - TOML + environment configuration
//! - [`clock`] - San Salvador local time
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fesv_contingency::{AuthorityGateway, ContingencyConfig, ContingencyWorker};
//! use fesv_db::Database;
//!
//! let config = ContingencyConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//! let gateway = AuthorityGateway::from_config(client, credentials, &config);
//!
//! let (worker, handle) = ContingencyWorker::new(db, gateway, signer, &config)?;
//! tokio::spawn(worker.run());
//! // ...
//! handle.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod event_builder;
pub mod gateway;
pub mod queue;
pub mod reconcile;
pub mod report;
pub mod worker;

mod deadline;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use clock::LocalClock;
pub use collaborators::{
    AuthorityClient, AuthorityError, CredentialError, CredentialStore, Credentials, Signer,
    SignerError,
};
pub use config::ContingencyConfig;
pub use error::{ContingencyError, ContingencyResult};
pub use event_builder::{BuiltEvent, BuiltLote, EventBuilder};
pub use gateway::AuthorityGateway;
pub use queue::{ContingencyQueue, QueueRequest, QueuedDocument};
pub use reconcile::{ReconcileFilter, ReconciliationEngine, ReconciliationReport};
pub use report::ReportWriter;
pub use worker::{
    ContingencyWorker, ContingencyWorkerHandle, LotePollReport, LoteSubmitReport, PeriodReport,
    SignatureRetryReport,
};
