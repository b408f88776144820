//! # Authority DTOs
//!
//! Shapes of the tax authority responses the engine consumes. Only the
//! fields the contingency lifecycle and reconciliation read are modelled.
//!
//! The authority reports dates as `dd/MM/yyyy` and processing timestamps as
//! `dd/MM/yyyy HH:mm:ss` in UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// `fechaEmision` format used by the authority.
pub const AUTHORITY_DATE_FORMAT: &str = "%d/%m/%Y";

/// `fhProcesamiento` format used by the authority.
pub const AUTHORITY_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Local `fecha_emision` format.
pub const LOCAL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses an authority processing timestamp as a UTC instant.
pub fn parse_authority_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), AUTHORITY_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parses an authority calendar date.
pub fn parse_authority_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), AUTHORITY_DATE_FORMAT).ok()
}

/// Receipt for a submitted evento de contingencia.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventReceipt {
    pub estado: String,
    pub sello_recibido: Option<String>,
    pub fh_procesamiento: Option<String>,
    pub codigo_msg: Option<String>,
    pub descripcion_msg: Option<String>,
    pub observaciones: Vec<String>,
}

/// Receipt for a submitted lote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchReceipt {
    pub estado: String,
    pub id_envio: String,
    pub codigo_lote: String,
    pub fh_procesamiento: Option<String>,
    pub codigo_msg: Option<String>,
    pub descripcion_msg: Option<String>,
}

/// Outcome of polling a lote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchResult {
    pub procesados: Vec<DocumentResult>,
    pub rechazados: Vec<DocumentResult>,
}

/// Per-document verdict inside a [`BatchResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentResult {
    pub estado: String,
    pub codigo_generacion: String,
    pub sello_recibido: Option<String>,
    pub fh_procesamiento: Option<String>,
    pub codigo_msg: Option<String>,
    pub descripcion_msg: Option<String>,
    pub observaciones: Vec<String>,
}

/// The authority's canonical record of one document (consulta DTE).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentRecord {
    pub estado: String,
    pub codigo_generacion: String,
    pub sello_recibido: Option<String>,
    pub fh_procesamiento: Option<String>,
    pub fecha_emision: Option<String>,
    pub codigo_msg: Option<String>,
    pub descripcion_msg: Option<String>,
    pub observaciones: Vec<String>,
}
