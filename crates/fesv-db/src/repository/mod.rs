//! # Repository Module
//!
//! One repository per table family, each holding a pool clone.
//!
//! ## Available Repositories
//!
//! - [`sequence::SequenceRepository`] - Numero de control allocation
//! - [`period::PeriodRepository`] - Contingency period lifecycle
//! - [`document::DocumentRepository`] - Documents queued in contingency
//! - [`event::EventRepository`] - Eventos de contingencia
//! - [`lote::LoteRepository`] - Batch submissions
//! - [`outlet::OutletRepository`] - Companies, establishments, points of sale
//! - [`claim::WorkerClaimer`] - Cross-process work claiming
//!
//! ## Generated Keys
//! ```text
//! insert(id = new_id())
//!     │
//!     ├── Ok ──────────────────────────► done
//!     ├── UniqueViolation, attempts left ► new id, insert again
//!     └── anything else / exhausted ────► error
//! ```

pub mod claim;
pub mod document;
pub mod event;
pub mod lote;
pub mod outlet;
pub mod period;
pub mod sequence;

use tracing::warn;

use crate::error::DbError;

/// New upper-case UUID primary key.
pub fn new_id() -> String {
    fesv_core::new_generation_code()
}

/// Whether an insert should be attempted again with a fresh key.
pub(crate) fn retry_with_new_id(err: &DbError, entity: &str, attempt: u32, max: u32) -> bool {
    if err.is_unique_violation() && attempt < max {
        warn!(entity, attempt, error = %err, "Generated key collided, retrying");
        true
    } else {
        false
    }
}
