//! # fesv-db: Database Layer for the Contingency Engine
//!
//! Store access for the contingency lifecycle. SQLite with sqlx; every
//! component receives a [`Database`] handle at construction.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Contingency Data Flow                               │
//! │                                                                         │
//! │  ContingencyQueue / ContingencyWorker / ReconciliationEngine           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     fesv-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ Sequence      │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Period        │    │ 001_conting- │  │   │
//! │  │   │ busy_timeout  │    │ Document      │    │ ency_schema  │  │   │
//! │  │   │ WAL           │    │ Event / Lote  │    │              │  │   │
//! │  │   └───────────────┘    │ Outlet, Claim │    └──────────────┘  │   │
//! │  │                        └───────────────┘                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fesv_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("contingency.db")).await?;
//! let numero = db.sequences().allocate_numero_control(&pos_id, "01").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::claim::{StaleClaimSweep, WorkerClaimer};
pub use repository::document::{DocumentFilter, DocumentRepository, QueueUpdate};
pub use repository::event::{EventRepository, NewEvent};
pub use repository::lote::{LoteRepository, NewLote};
pub use repository::outlet::{NewCompany, NewEstablishment, NewPointOfSale, OutletRepository};
pub use repository::period::PeriodRepository;
pub use repository::sequence::SequenceRepository;
