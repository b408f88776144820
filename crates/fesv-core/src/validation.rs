//! # Validation Module
//!
//! Input rules checked before anything is written or sent.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── Outlet codes present and 4 characters                             │
//! │  ├── Tipo DTE is two digits                                            │
//! │  └── Generation codes are upper-case UUIDs                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Database (SQLite)                                            │
//! │  ├── CHECK constraints on statuses and counts                          │
//! │  ├── UNIQUE codigo_generacion / numero_control                         │
//! │  └── Partial UNIQUE index: one active period per scope                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{ValidationError, ValidationResult};

/// Validates a document type code (`01` factura, `03` CCF, ...).
pub fn validate_tipo_dte(tipo_dte: &str) -> ValidationResult<()> {
    if tipo_dte.len() != 2 || !tipo_dte.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "tipo_dte".to_string(),
            reason: format!("expected two digits, got '{tipo_dte}'"),
        });
    }
    Ok(())
}

/// Validates an authority-assigned outlet code and returns it.
///
/// Establishment and point-of-sale codes are both 4 upper-case
/// alphanumerics (`M001`, `P001`, `0000`).
pub fn validate_outlet_code<'a>(field: &str, code: Option<&'a str>) -> ValidationResult<&'a str> {
    let code = code
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ValidationError::Required {
            field: field.to_string(),
        })?;

    if code.len() != 4
        || !code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("expected 4 upper-case alphanumerics, got '{code}'"),
        });
    }

    Ok(code)
}

/// Validates a codigo de generación (upper-case UUID).
pub fn validate_generation_code(code: &str) -> ValidationResult<()> {
    if uuid::Uuid::parse_str(code).is_err() || code.len() != 36 || code != code.to_uppercase() {
        return Err(ValidationError::InvalidFormat {
            field: "codigo_generacion".to_string(),
            reason: format!("expected an upper-case UUID, got '{code}'"),
        });
    }
    Ok(())
}

/// NIT as the authority's query endpoint expects it (no separators).
pub fn nit_without_dashes(nit: &str) -> String {
    nit.chars().filter(|c| *c != '-').collect()
}
