//! # Reconciliation Diffing
//!
//! Compares one local document with the authority's canonical record.
//!
//! ## Field Rules
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────────┐
//! │ Field                │ Rule                                             │
//! ├──────────────────────┼──────────────────────────────────────────────────┤
//! │ estado               │ any difference is a discrepancy                  │
//! │ sello recibido       │ compared only when both sides are non-empty      │
//! │ fecha emisión        │ DD/MM/YYYY vs YYYY-MM-DD, calendar day equality, │
//! │                      │ also tallied as a date mismatch                  │
//! │ fh procesamiento     │ both UTC, |Δ| ≤ tolerance matches                │
//! └──────────────────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! A date or timestamp that cannot be parsed is neither a match nor a
//! mismatch: it becomes a warning on the record, so "can't tell" never
//! inflates `mismatched_records`. Only an unparseable emission date is
//! counted under `date_unparseable`.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::authority::{
    parse_authority_date, parse_authority_timestamp, DocumentRecord, AUTHORITY_TIMESTAMP_FORMAT,
    LOCAL_DATE_FORMAT,
};
use crate::types::Document;

/// Discrepancy recorded when the authority has no such document.
pub const NOT_FOUND_DISCREPANCY: &str = "DTE does not exist in Hacienda's system";

/// Outcome of the authority query for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    NotFound,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Success => "success",
            QueryStatus::NotFound => "not_found",
            QueryStatus::Error => "error",
        }
    }
}

/// Result of comparing one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldCheck {
    Match,
    Mismatch(String),
    /// The comparison could not be made (unparseable input).
    Unknown(String),
}

// =============================================================================
// Record
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub codigo_generacion: String,
    pub document_id: String,
    pub numero_control: String,
    pub tipo_dte: String,
    pub fecha_emision: String,
    pub internal_estado: Option<String>,
    pub internal_sello: Option<String>,
    pub internal_fh_procesamiento: Option<DateTime<Utc>>,

    pub hacienda_estado: Option<String>,
    pub hacienda_sello: Option<String>,
    pub hacienda_fh_procesamiento: Option<String>,
    pub hacienda_codigo_msg: Option<String>,
    pub hacienda_descripcion_msg: Option<String>,
    pub hacienda_observaciones: Vec<String>,

    pub matches: bool,
    /// `None` when either date could not be parsed.
    pub fecha_emision_matches: Option<bool>,
    pub discrepancies: Vec<String>,
    pub warnings: Vec<String>,
    pub query_status: QueryStatus,
    pub error_message: Option<String>,
    pub queried_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    fn base(doc: &Document, query_status: QueryStatus, queried_at: DateTime<Utc>) -> Self {
        ReconciliationRecord {
            codigo_generacion: doc.codigo_generacion.clone(),
            document_id: doc.id.clone(),
            numero_control: doc.numero_control.clone(),
            tipo_dte: doc.tipo_dte.clone(),
            fecha_emision: doc.fecha_emision.clone(),
            internal_estado: doc.hacienda_estado.clone(),
            internal_sello: doc.sello_recibido.clone(),
            internal_fh_procesamiento: doc.fh_procesamiento,
            hacienda_estado: None,
            hacienda_sello: None,
            hacienda_fh_procesamiento: None,
            hacienda_codigo_msg: None,
            hacienda_descripcion_msg: None,
            hacienda_observaciones: Vec::new(),
            matches: false,
            fecha_emision_matches: None,
            discrepancies: Vec::new(),
            warnings: Vec::new(),
            query_status,
            error_message: None,
            queried_at,
        }
    }

    /// The authority does not know the document.
    pub fn not_found(doc: &Document, queried_at: DateTime<Utc>) -> Self {
        let mut record = Self::base(doc, QueryStatus::NotFound, queried_at);
        record.fecha_emision_matches = Some(false);
        record.error_message = Some("DTE not found in Hacienda".to_string());
        record.discrepancies.push(NOT_FOUND_DISCREPANCY.to_string());
        record
    }

    /// The query itself failed; nothing is known about the document.
    pub fn query_failed(doc: &Document, message: String, queried_at: DateTime<Utc>) -> Self {
        let mut record = Self::base(doc, QueryStatus::Error, queried_at);
        record.error_message = Some(message);
        record
    }

    /// Compares the local document with the authority's record.
    pub fn compared(
        doc: &Document,
        authority: &DocumentRecord,
        tolerance: Duration,
        queried_at: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::base(doc, QueryStatus::Success, queried_at);
        record.hacienda_estado = Some(authority.estado.clone());
        record.hacienda_sello = authority.sello_recibido.clone();
        record.hacienda_fh_procesamiento = authority.fh_procesamiento.clone();
        record.hacienda_codigo_msg = authority.codigo_msg.clone();
        record.hacienda_descripcion_msg = authority.descripcion_msg.clone();
        record.hacienda_observaciones = authority.observaciones.clone();

        let internal_estado = doc.hacienda_estado.as_deref().unwrap_or("");
        if internal_estado != authority.estado {
            record.discrepancies.push(format!(
                "Estado mismatch: internal='{}' hacienda='{}'",
                internal_estado, authority.estado
            ));
        }

        let internal_sello = doc.sello_recibido.as_deref().unwrap_or("");
        let hacienda_sello = authority.sello_recibido.as_deref().unwrap_or("");
        if !internal_sello.is_empty() && !hacienda_sello.is_empty() && internal_sello != hacienda_sello
        {
            record.discrepancies.push(format!(
                "Sello mismatch: internal='{internal_sello}' hacienda='{hacienda_sello}'"
            ));
        }

        match compare_emission_date(&doc.fecha_emision, authority.fecha_emision.as_deref()) {
            FieldCheck::Match => record.fecha_emision_matches = Some(true),
            FieldCheck::Mismatch(msg) => {
                record.fecha_emision_matches = Some(false);
                record.discrepancies.push(msg);
            }
            FieldCheck::Unknown(msg) => record.warnings.push(msg),
        }

        match compare_processing_time(
            doc.fh_procesamiento,
            authority.fh_procesamiento.as_deref(),
            tolerance,
        ) {
            FieldCheck::Match => {}
            FieldCheck::Mismatch(msg) => record.discrepancies.push(msg),
            FieldCheck::Unknown(msg) => record.warnings.push(msg),
        }

        record.matches = record.discrepancies.is_empty();
        record
    }

    /// Whether an operator needs to look at this record.
    pub fn needs_review(&self) -> bool {
        !self.matches || !self.warnings.is_empty()
    }
}

// =============================================================================
// Field Comparisons
// =============================================================================

/// Compares `YYYY-MM-DD` (local) against `DD/MM/YYYY` (authority).
///
/// An absent authority date is not compared.
pub fn compare_emission_date(local: &str, authority: Option<&str>) -> FieldCheck {
    let Some(authority) = authority.map(str::trim).filter(|s| !s.is_empty()) else {
        return FieldCheck::Match;
    };

    let Some(authority_date) = parse_authority_date(authority) else {
        return FieldCheck::Unknown(format!(
            "Unparseable Hacienda fecha emisión '{authority}'"
        ));
    };
    let Ok(local_date) = NaiveDate::parse_from_str(local.trim(), LOCAL_DATE_FORMAT) else {
        return FieldCheck::Unknown(format!("Unparseable internal fecha emisión '{local}'"));
    };

    if local_date == authority_date {
        FieldCheck::Match
    } else {
        FieldCheck::Mismatch(format!(
            "Fecha emisión mismatch: internal='{local}' hacienda='{authority}'"
        ))
    }
}

/// Compares two processing instants with a clock-skew tolerance.
///
/// Differences up to and including `tolerance` match.
pub fn compare_processing_time(
    local: Option<DateTime<Utc>>,
    authority: Option<&str>,
    tolerance: Duration,
) -> FieldCheck {
    let (Some(local), Some(authority)) = (local, authority.filter(|s| !s.trim().is_empty())) else {
        return FieldCheck::Match;
    };

    let Some(authority_ts) = parse_authority_timestamp(authority) else {
        return FieldCheck::Unknown(format!(
            "Unparseable Hacienda fh procesamiento '{authority}'"
        ));
    };

    let diff_ms = (local - authority_ts).num_milliseconds().abs();
    if diff_ms > tolerance.num_milliseconds() {
        FieldCheck::Mismatch(format!(
            "Fecha procesamiento mismatch: internal='{}' hacienda='{}' (diff: {}s)",
            local.format(AUTHORITY_TIMESTAMP_FORMAT),
            authority_ts.format(AUTHORITY_TIMESTAMP_FORMAT),
            diff_ms / 1000
        ))
    } else {
        FieldCheck::Match
    }
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub total_records: u64,
    pub matched_records: u64,
    pub mismatched_records: u64,
    pub date_mismatches: u64,
    pub date_unparseable: u64,
    pub not_found_in_hacienda: u64,
    pub query_errors: u64,
}

impl ReconciliationSummary {
    pub fn tally(&mut self, record: &ReconciliationRecord) {
        self.total_records += 1;

        match record.query_status {
            QueryStatus::Success => {
                if record.matches {
                    self.matched_records += 1;
                } else {
                    self.mismatched_records += 1;
                }
                if record.fecha_emision_matches == Some(false) {
                    self.date_mismatches += 1;
                }
                if record.fecha_emision_matches.is_none() {
                    self.date_unparseable += 1;
                }
            }
            QueryStatus::NotFound => self.not_found_in_hacienda += 1,
            QueryStatus::Error => self.query_errors += 1,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
