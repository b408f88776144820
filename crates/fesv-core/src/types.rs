//! # Domain Types
//!
//! Statuses, outage classification and the rows the contingency engine owns.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Document     │   │ContingencyPeriod│   │ContingencyEvent │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  codigo_gen     │──►│  scope tuple    │◄──│  codigo_gen     │       │
//! │  │  numero_control │   │  f/h inicio+fin │   │  signed payload │       │
//! │  │  status         │   │  tipo (1..5)    │   │  estado         │       │
//! │  │  retry_count    │   │  status         │   │  dte_count ≤1000│       │
//! │  └────────┬────────┘   └─────────────────┘   └────────▲────────┘       │
//! │           │                                           │                 │
//! │           │            ┌─────────────────┐            │                 │
//! │           └───────────►│      Lote       │────────────┘                 │
//! │                        │  codigo_lote    │                              │
//! │                        │  status         │                              │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every identifier is an upper-case UUID. Rows are never deleted; all
//! transitions are forward-only status changes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Ambiente
// =============================================================================

/// Authority environment a document or period belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
pub enum Ambiente {
    /// Pruebas.
    #[serde(rename = "00")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "00"))]
    Test,
    /// Producción.
    #[serde(rename = "01")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "01"))]
    Production,
}

impl Ambiente {
    pub fn code(&self) -> &'static str {
        match self {
            Ambiente::Test => "00",
            Ambiente::Production => "01",
        }
    }
}

impl fmt::Display for Ambiente {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Ambiente {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "00" => Ok(Ambiente::Test),
            "01" => Ok(Ambiente::Production),
            other => Err(format!("unknown ambiente '{other}', expected 00 or 01")),
        }
    }
}

// =============================================================================
// Transmission Status
// =============================================================================

/// Where a document stands on its way to the tax authority.
///
/// ## State Machine
/// ```text
/// pending ──(queue, unsigned)──► pending_signature ──(signed)──┐
///    │                               │  ▲                       │
///    │                               │  └─ retry fails (+1)     ▼
///    └──(queue, signed)────────► failed_retry ──(signed)──► contingency_queued
///                                    │                          │
///                                    └──────(lote result)───────┤
///                                                               ▼
///                                              procesado ║ rechazado (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TransmissionStatus {
    /// Owned by the normal submission pipeline.
    Pending,
    /// Queued in contingency, signer was unavailable.
    PendingSignature,
    /// Signed and ready to ride in a lote.
    ContingencyQueued,
    /// Queued in contingency with a signature, authority was unavailable.
    FailedRetry,
    /// Accepted by the authority.
    Procesado,
    /// Rejected by the authority.
    Rechazado,
}

impl TransmissionStatus {
    /// Statuses a document never leaves.
    pub const TERMINAL: [TransmissionStatus; 2] =
        [TransmissionStatus::Procesado, TransmissionStatus::Rechazado];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransmissionStatus::Pending => "pending",
            TransmissionStatus::PendingSignature => "pending_signature",
            TransmissionStatus::ContingencyQueued => "contingency_queued",
            TransmissionStatus::FailedRetry => "failed_retry",
            TransmissionStatus::Procesado => "procesado",
            TransmissionStatus::Rechazado => "rechazado",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransmissionStatus::Procesado | TransmissionStatus::Rechazado
        )
    }

    /// True for the two states a signature moves a document out of.
    pub fn awaits_signature(&self) -> bool {
        matches!(
            self,
            TransmissionStatus::PendingSignature | TransmissionStatus::FailedRetry
        )
    }

    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: TransmissionStatus) -> bool {
        use TransmissionStatus::*;

        if self.is_terminal() {
            return false;
        }

        match next {
            // Queue intake re-associates any live document with a period.
            PendingSignature | FailedRetry => true,
            ContingencyQueued => self.awaits_signature(),
            Procesado | Rechazado => true,
            Pending => false,
        }
    }

    /// Returns an [`CoreError::InvalidTransition`] when the edge is missing.
    pub fn ensure_transition(
        &self,
        document_id: &str,
        next: TransmissionStatus,
    ) -> CoreResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                document_id: document_id.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for TransmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Period / Event / Lote Statuses
// =============================================================================

/// Lifecycle of a contingency period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum PeriodStatus {
    /// Outage ongoing, new failures join this period.
    Active,
    /// Outage over, documents being reported.
    Reporting,
    /// Every document reached a terminal status.
    Completed,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Active => "active",
            PeriodStatus::Reporting => "reporting",
            PeriodStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission state of a contingency event at the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum EventEstado {
    Pending,
    Recibido,
    Rechazado,
}

impl EventEstado {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventEstado::Pending => "PENDING",
            EventEstado::Recibido => "RECIBIDO",
            EventEstado::Rechazado => "RECHAZADO",
        }
    }

    /// Maps the `estado` string of an authority receipt.
    ///
    /// Anything other than an explicit verdict leaves the event pending so
    /// it is submitted again.
    pub fn from_authority(estado: &str) -> Self {
        match estado.trim().to_uppercase().as_str() {
            "RECIBIDO" | "PROCESADO" => EventEstado::Recibido,
            "RECHAZADO" => EventEstado::Rechazado,
            _ => EventEstado::Pending,
        }
    }
}

impl fmt::Display for EventEstado {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a lote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum LoteStatus {
    Pending,
    Submitted,
    Completed,
}

impl LoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoteStatus::Pending => "pending",
            LoteStatus::Submitted => "submitted",
            LoteStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for LoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Outage Classification
// =============================================================================

/// Outage type code reported in the `motivo` block of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum TipoContingencia {
    /// No disponibilidad de sistema del MH.
    AuthorityDown = 1,
    /// No disponibilidad de sistema del emisor.
    EmitterSystemDown = 2,
    /// Falla en el suministro de servicio de Internet del emisor.
    InternetOutage = 3,
    /// Falla en el suministro de energía eléctrica del emisor.
    PowerOutage = 4,
    /// Otro motivo, requires `motivoContingencia`.
    Other = 5,
}

impl TipoContingencia {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Only "other" carries a free-text reason in the event payload.
    pub fn requires_reason(&self) -> bool {
        matches!(self, TipoContingencia::Other)
    }
}

/// Why the real-time submission failed, as reported by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureKind {
    FirmadorFailed,
    HaciendaAuthFailed,
    HaciendaTimeout,
    HaciendaRejected,
    InternetOutage,
    PowerOutage,
    /// Anything the pipeline could not classify, kept verbatim.
    Unknown(String),
}

impl FailureKind {
    pub fn as_str(&self) -> &str {
        match self {
            FailureKind::FirmadorFailed => "firmador_failed",
            FailureKind::HaciendaAuthFailed => "hacienda_auth_failed",
            FailureKind::HaciendaTimeout => "hacienda_timeout",
            FailureKind::HaciendaRejected => "hacienda_rejected",
            FailureKind::InternetOutage => "internet_outage",
            FailureKind::PowerOutage => "power_outage",
            FailureKind::Unknown(raw) => raw,
        }
    }

    /// Outage type and human-readable reason for this failure.
    pub fn classify(&self) -> (TipoContingencia, String) {
        match self {
            FailureKind::FirmadorFailed => (
                TipoContingencia::Other,
                "Falla en servicio de firmador - no se pudo firmar el DTE".to_string(),
            ),
            FailureKind::HaciendaAuthFailed => (
                TipoContingencia::AuthorityDown,
                "No fue posible autenticarse con el sistema del MH".to_string(),
            ),
            FailureKind::HaciendaTimeout => (
                TipoContingencia::AuthorityDown,
                "No disponibilidad de sistema del MH - timeout después de reintentos"
                    .to_string(),
            ),
            FailureKind::HaciendaRejected => (
                TipoContingencia::AuthorityDown,
                "Error en recepción del MH".to_string(),
            ),
            FailureKind::InternetOutage => (
                TipoContingencia::InternetOutage,
                "Falla en el suministro de servicio de Internet".to_string(),
            ),
            FailureKind::PowerOutage => (
                TipoContingencia::PowerOutage,
                "Falla en el suministro de energía eléctrica".to_string(),
            ),
            FailureKind::Unknown(raw) => (
                TipoContingencia::Other,
                format!("Error no clasificado: {raw}"),
            ),
        }
    }
}

impl From<&str> for FailureKind {
    fn from(s: &str) -> Self {
        match s {
            "firmador_failed" => FailureKind::FirmadorFailed,
            "hacienda_auth_failed" => FailureKind::HaciendaAuthFailed,
            "hacienda_timeout" => FailureKind::HaciendaTimeout,
            "hacienda_rejected" => FailureKind::HaciendaRejected,
            "internet_outage" => FailureKind::InternetOutage,
            "power_outage" => FailureKind::PowerOutage,
            other => FailureKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Outlets
// =============================================================================

/// (company, establishment, point of sale, environment) a period covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodScope {
    pub company_id: String,
    pub establishment_id: String,
    pub point_of_sale_id: String,
    pub ambiente: Ambiente,
}

/// Emitter metadata for the `emisor` block of the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct EmitterInfo {
    pub nit: String,
    pub nombre: String,
    pub nombre_comercial: Option<String>,
    pub telefono: String,
    pub correo: String,
    pub tipo_establecimiento: String,
    pub cod_establecimiento: Option<String>,
    pub cod_punto_venta: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Company {
    pub id: String,
    pub nit: String,
    pub nombre: String,
    pub nombre_comercial: Option<String>,
    pub telefono: String,
    pub correo: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Establishment {
    pub id: String,
    pub company_id: String,
    pub tipo_establecimiento: String,
    /// Code assigned by the authority (4 characters).
    pub cod_establecimiento: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PointOfSale {
    pub id: String,
    pub establishment_id: String,
    /// Code assigned by the authority (4 characters).
    pub cod_punto_venta: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Document
// =============================================================================

/// A DTE tracked through contingency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Document {
    pub id: String,
    pub company_id: String,
    pub establishment_id: String,
    pub point_of_sale_id: String,
    pub codigo_generacion: String,
    pub numero_control: String,
    pub tipo_dte: String,
    /// Emission date, `YYYY-MM-DD`.
    pub fecha_emision: String,
    pub transmission_status: TransmissionStatus,
    /// Unsigned DTE JSON.
    pub dte_unsigned: Option<String>,
    /// Signed DTE (compact JWS as returned by the signer).
    pub dte_signed: Option<String>,
    pub sello_recibido: Option<String>,
    /// Last estado the authority reported for this document.
    pub hacienda_estado: Option<String>,
    pub fh_procesamiento: Option<DateTime<Utc>>,
    /// Authority observations, JSON array.
    pub observaciones: Option<String>,
    pub failure_kind: Option<String>,
    pub signature_retry_count: i64,
    pub contingency_period_id: Option<String>,
    pub contingency_event_id: Option<String>,
    pub lote_id: Option<String>,
    pub finalized_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn is_signed(&self) -> bool {
        self.dte_signed.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A finalized document handed over by the invoicing flow.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub company_id: String,
    pub establishment_id: String,
    pub point_of_sale_id: String,
    pub codigo_generacion: String,
    pub numero_control: String,
    pub tipo_dte: String,
    pub fecha_emision: String,
    pub finalized_at: DateTime<Utc>,
}

// =============================================================================
// Contingency Period / Event / Lote
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ContingencyPeriod {
    pub id: String,
    pub company_id: String,
    pub establishment_id: String,
    pub point_of_sale_id: String,
    pub ambiente: Ambiente,
    /// Local start date, `YYYY-MM-DD`.
    pub f_inicio: String,
    /// Local start time, `HH:MM:SS`.
    pub h_inicio: String,
    pub f_fin: Option<String>,
    pub h_fin: Option<String>,
    pub tipo_contingencia: TipoContingencia,
    pub motivo_contingencia: Option<String>,
    pub status: PeriodStatus,
    pub processing: bool,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContingencyPeriod {
    pub fn scope(&self) -> PeriodScope {
        PeriodScope {
            company_id: self.company_id.clone(),
            establishment_id: self.establishment_id.clone(),
            point_of_sale_id: self.point_of_sale_id.clone(),
            ambiente: self.ambiente,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.f_fin.is_some() && self.h_fin.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ContingencyEvent {
    pub id: String,
    pub period_id: String,
    pub company_id: String,
    pub codigo_generacion: String,
    pub event_unsigned: String,
    pub event_signed: String,
    pub estado: EventEstado,
    pub sello_recibido: Option<String>,
    /// Raw authority response (or error) as JSON.
    pub hacienda_response: Option<String>,
    pub dte_count: i64,
    pub submitted_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Lote {
    pub id: String,
    pub event_id: String,
    pub period_id: String,
    pub company_id: String,
    pub ambiente: Ambiente,
    /// idEnvio sent with the envelope.
    pub id_envio: Option<String>,
    /// codigoLote assigned by the authority.
    pub codigo_lote: Option<String>,
    pub dte_count: i64,
    pub status: LoteStatus,
    pub processing: bool,
    pub claimed_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================
