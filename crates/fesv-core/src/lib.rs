//! # fesv-core: Pure Domain Logic for DTE Contingency
//!
//! Every rule of the contingency lifecycle that can be expressed without
//! touching the database, the signer or the tax authority lives here.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Contingency Engine Layers                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          fesv-contingency (queue, workers, reconciliation)      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fesv-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌────────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ numero_    │  │   event   │  │ reconcile │  │   │
//! │  │   │ statuses  │  │ control    │  │ evento +  │  │ field     │  │   │
//! │  │   │ entities  │  │ DTE-01-..  │  │ lote      │  │ diffing   │  │   │
//! │  │   └───────────┘  └────────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 fesv-db (SQLite repositories)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Statuses, outage classification and entity rows
//! - [`numero_control`] - Build/parse the 31-character document-control number
//! - [`event`] - Evento de contingencia (schema v3) and lote envelope
//! - [`authority`] - Tax authority response DTOs and date formats
//! - [`reconcile`] - Local-vs-authority record comparison
//! - [`validation`] - Input validation rules
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod authority;
pub mod error;
pub mod event;
pub mod numero_control;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use numero_control::NumeroControl;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum documents the authority accepts in one contingency event.
pub const MAX_DOCUMENTS_PER_EVENT: usize = 1000;

/// Schema version of the evento de contingencia.
pub const EVENT_SCHEMA_VERSION: u32 = 3;

/// Version field of the lote envelope.
pub const LOTE_ENVELOPE_VERSION: u32 = 1;

/// Generates a new codigo de generación.
///
/// The authority only accepts the upper-case canonical UUID form, and every
/// identifier the engine creates (periods, events, lotes) uses the same shape.
pub fn new_generation_code() -> String {
    uuid::Uuid::new_v4().to_string().to_uppercase()
}
