//! # Evento de Contingencia & Lote Envelope
//!
//! Pure assembly of the two documents the engine sends after an outage.
//!
//! ## Evento de Contingencia (schema v3)
//! ```text
//! {
//!   "identificacion": { version: 3, ambiente, codigoGeneracion,
//!                       fTransmision, hTransmision },
//!   "emisor":         { nit, nombre, nombreComercial?, tipoEstablecimiento,
//!                       codEstablecimiento, codPuntoVenta, telefono, correo },
//!   "detalleDTE":     [ { noItem: 1.., codigoGeneracion, tipoDoc }, ... ],
//!   "motivo":         { fInicio, fFin, hInicio, hFin, tipoContingencia,
//!                       motivoContingencia? (only when tipo = 5) }
//! }
//! ```
//!
//! ## Lote Envelope
//! ```text
//! { ambiente, idEnvio, version: 1, nitEmisor, documentos: [signed, ...] }
//! ```
//!
//! Neither builder signs anything: the payload goes to the signer as is.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationResult};
use crate::types::{Ambiente, ContingencyPeriod, EmitterInfo};
use crate::validation::validate_outlet_code;
use crate::{new_generation_code, EVENT_SCHEMA_VERSION, LOTE_ENVELOPE_VERSION, MAX_DOCUMENTS_PER_EVENT};

// =============================================================================
// Payload Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContingencyEventPayload {
    pub identificacion: EventIdentificacion,
    pub emisor: EventEmisor,
    #[serde(rename = "detalleDTE")]
    pub detalle_dte: Vec<EventDetalle>,
    pub motivo: EventMotivo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventIdentificacion {
    pub version: u32,
    pub ambiente: Ambiente,
    pub codigo_generacion: String,
    pub f_transmision: String,
    pub h_transmision: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEmisor {
    pub nit: String,
    pub nombre: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nombre_comercial: Option<String>,
    pub tipo_establecimiento: String,
    pub cod_establecimiento: String,
    pub cod_punto_venta: String,
    pub telefono: String,
    pub correo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetalle {
    pub no_item: u32,
    pub codigo_generacion: String,
    pub tipo_doc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMotivo {
    pub f_inicio: String,
    pub f_fin: String,
    pub h_inicio: String,
    pub h_fin: String,
    pub tipo_contingencia: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivo_contingencia: Option<String>,
}

/// One document line as the event builder needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDocumentRef {
    pub codigo_generacion: String,
    pub tipo_dte: String,
}

/// Batch envelope carrying signed documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoteEnvelope {
    pub ambiente: Ambiente,
    pub id_envio: String,
    pub version: u32,
    pub nit_emisor: String,
    pub documentos: Vec<String>,
}

// =============================================================================
// Builders
// =============================================================================

/// Assembles the evento de contingencia for a closed period.
///
/// `transmitted_at` is the local wall-clock time of transmission. Documents
/// keep their input order, so callers pass them sorted by finalize time.
///
/// ## Errors
/// - [`ValidationError::Empty`] / [`ValidationError::TooMany`] on the document count
/// - [`ValidationError::PeriodNotClosed`] when the period has no end stamp
/// - [`ValidationError::Required`] when an outlet code is missing
pub fn build_event_payload(
    period: &ContingencyPeriod,
    emitter: &EmitterInfo,
    documents: &[EventDocumentRef],
    transmitted_at: NaiveDateTime,
) -> ValidationResult<(ContingencyEventPayload, String)> {
    if documents.is_empty() {
        return Err(ValidationError::Empty {
            field: "documents".to_string(),
        });
    }
    if documents.len() > MAX_DOCUMENTS_PER_EVENT {
        return Err(ValidationError::TooMany {
            field: "documents".to_string(),
            max: MAX_DOCUMENTS_PER_EVENT,
            actual: documents.len(),
        });
    }

    let (Some(f_fin), Some(h_fin)) = (period.f_fin.as_ref(), period.h_fin.as_ref()) else {
        return Err(ValidationError::PeriodNotClosed {
            period_id: period.id.clone(),
        });
    };

    let cod_establecimiento =
        validate_outlet_code("cod_establecimiento", emitter.cod_establecimiento.as_deref())?;
    let cod_punto_venta =
        validate_outlet_code("cod_punto_venta", emitter.cod_punto_venta.as_deref())?;

    let codigo_generacion = new_generation_code();

    let detalle_dte = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| EventDetalle {
            no_item: (i + 1) as u32,
            codigo_generacion: doc.codigo_generacion.to_uppercase(),
            tipo_doc: doc.tipo_dte.clone(),
        })
        .collect();

    let motivo_contingencia = if period.tipo_contingencia.requires_reason() {
        period.motivo_contingencia.clone()
    } else {
        None
    };

    let payload = ContingencyEventPayload {
        identificacion: EventIdentificacion {
            version: EVENT_SCHEMA_VERSION,
            ambiente: period.ambiente,
            codigo_generacion: codigo_generacion.clone(),
            f_transmision: transmitted_at.format("%Y-%m-%d").to_string(),
            h_transmision: transmitted_at.format("%H:%M:%S").to_string(),
        },
        emisor: EventEmisor {
            nit: emitter.nit.clone(),
            nombre: emitter.nombre.clone(),
            nombre_comercial: emitter.nombre_comercial.clone(),
            tipo_establecimiento: emitter.tipo_establecimiento.clone(),
            cod_establecimiento: cod_establecimiento.to_string(),
            cod_punto_venta: cod_punto_venta.to_string(),
            telefono: emitter.telefono.clone(),
            correo: emitter.correo.clone(),
        },
        detalle_dte,
        motivo: EventMotivo {
            f_inicio: period.f_inicio.clone(),
            f_fin: f_fin.clone(),
            h_inicio: period.h_inicio.clone(),
            h_fin: h_fin.clone(),
            tipo_contingencia: period.tipo_contingencia.code(),
            motivo_contingencia,
        },
    };

    Ok((payload, codigo_generacion))
}

/// Wraps signed documents in a lote envelope with a fresh `idEnvio`.
pub fn build_lote_envelope(
    ambiente: Ambiente,
    nit_emisor: &str,
    signed_documents: Vec<String>,
) -> (LoteEnvelope, String) {
    let id_envio = new_generation_code();
    let envelope = LoteEnvelope {
        ambiente,
        id_envio: id_envio.clone(),
        version: LOTE_ENVELOPE_VERSION,
        nit_emisor: nit_emisor.to_string(),
        documentos: signed_documents,
    };
    (envelope, id_envio)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PeriodStatus, TipoContingencia};
    use chrono::{NaiveDate, Utc};

    fn closed_period(tipo: TipoContingencia) -> ContingencyPeriod {
        let now = Utc::now();
        ContingencyPeriod {
            id: "PERIOD-1".to_string(),
            company_id: "COMPANY-1".to_string(),
            establishment_id: "EST-1".to_string(),
            point_of_sale_id: "POS-1".to_string(),
            ambiente: Ambiente::Test,
            f_inicio: "2025-03-15".to_string(),
            h_inicio: "08:00:00".to_string(),
            f_fin: Some("2025-03-15".to_string()),
            h_fin: Some("09:30:00".to_string()),
            tipo_contingencia: tipo,
            motivo_contingencia: Some("Falla en servicio de firmador".to_string()),
            status: PeriodStatus::Reporting,
            processing: true,
            claimed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn emitter() -> EmitterInfo {
        EmitterInfo {
            nit: "06141203901025".to_string(),
            nombre: "Comercial Demo S.A. de C.V.".to_string(),
            nombre_comercial: None,
            telefono: "22223333".to_string(),
            correo: "facturacion@demo.sv".to_string(),
            tipo_establecimiento: "01".to_string(),
            cod_establecimiento: Some("M001".to_string()),
            cod_punto_venta: Some("P001".to_string()),
        }
    }

    fn docs(n: usize) -> Vec<EventDocumentRef> {
        (0..n)
            .map(|i| EventDocumentRef {
                codigo_generacion: format!("{:08x}-0000-4000-8000-000000000000", i),
                tipo_dte: "01".to_string(),
            })
            .collect()
    }

    fn transmitted_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 15)
            .unwrap()
            .and_hms_opt(10, 15, 0)
            .unwrap()
    }

    #[test]
    fn test_build_event_lines_follow_input_order() {
        let (payload, codigo) = build_event_payload(
            &closed_period(TipoContingencia::AuthorityDown),
            &emitter(),
            &docs(2),
            transmitted_at(),
        )
        .unwrap();

        assert_eq!(payload.identificacion.codigo_generacion, codigo);
        assert_eq!(payload.identificacion.version, 3);
        assert_eq!(payload.identificacion.f_transmision, "2025-03-15");
        assert_eq!(payload.identificacion.h_transmision, "10:15:00");
        assert_eq!(payload.detalle_dte.len(), 2);
        assert_eq!(payload.detalle_dte[0].no_item, 1);
        assert_eq!(payload.detalle_dte[1].no_item, 2);
        assert_eq!(
            payload.detalle_dte[1].codigo_generacion,
            "00000001-0000-4000-8000-000000000000"
        );
        assert_eq!(payload.motivo.tipo_contingencia, 1);
        assert!(payload.motivo.motivo_contingencia.is_none());
    }

    #[test]
    fn test_reason_only_for_other() {
        let (payload, _) = build_event_payload(
            &closed_period(TipoContingencia::Other),
            &emitter(),
            &docs(1),
            transmitted_at(),
        )
        .unwrap();
        assert_eq!(payload.motivo.tipo_contingencia, 5);
        assert!(payload.motivo.motivo_contingencia.is_some());

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["detalleDTE"].is_array());
        assert_eq!(json["identificacion"]["ambiente"], "00");
        assert!(json["emisor"].get("nombreComercial").is_none());
    }

    #[test]
    fn test_rejects_empty_and_oversized_input() {
        let period = closed_period(TipoContingencia::AuthorityDown);
        assert!(matches!(
            build_event_payload(&period, &emitter(), &[], transmitted_at()),
            Err(ValidationError::Empty { .. })
        ));
        assert!(matches!(
            build_event_payload(&period, &emitter(), &docs(1001), transmitted_at()),
            Err(ValidationError::TooMany { actual: 1001, .. })
        ));
        assert!(build_event_payload(&period, &emitter(), &docs(1000), transmitted_at()).is_ok());
    }

    #[test]
    fn test_rejects_open_period_and_missing_codes() {
        let mut open = closed_period(TipoContingencia::AuthorityDown);
        open.f_fin = None;
        assert!(matches!(
            build_event_payload(&open, &emitter(), &docs(1), transmitted_at()),
            Err(ValidationError::PeriodNotClosed { .. })
        ));

        let mut no_pos = emitter();
        no_pos.cod_punto_venta = None;
        assert!(matches!(
            build_event_payload(
                &closed_period(TipoContingencia::AuthorityDown),
                &no_pos,
                &docs(1),
                transmitted_at()
            ),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_lote_envelope_shape() {
        let (envelope, id_envio) = build_lote_envelope(
            Ambiente::Production,
            "06141203901025",
            vec!["jws-1".to_string(), "jws-2".to_string()],
        );
        assert_eq!(envelope.id_envio, id_envio);
        assert_eq!(id_envio, id_envio.to_uppercase());

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["ambiente"], "01");
        assert_eq!(json["nitEmisor"], "06141203901025");
        assert_eq!(json["documentos"].as_array().unwrap().len(), 2);
    }
}
