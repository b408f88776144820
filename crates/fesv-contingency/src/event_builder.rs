//! # Event Builder
//!
//! Assembles the evento de contingencia for a closed period and the lote
//! envelope that carries the period's signed documents.
//!
//! ```text
//! period (closed) + documents (1..=1000)
//!        │
//!        ├── emitter lookup (company, establishment, point of sale)
//!        ├── codigo de generación (new, upper case)
//!        ├── detalleDTE: one line per document, input order
//!        └── motivo: fInicio/fFin/hInicio/hFin/tipoContingencia
//!                    (+ motivoContingencia for tipo 5)
//! ```

use fesv_core::event::{
    build_event_payload, build_lote_envelope, ContingencyEventPayload, EventDocumentRef,
    LoteEnvelope,
};
use fesv_core::validation::nit_without_dashes;
use fesv_core::{Ambiente, ContingencyPeriod, Document, ValidationError, MAX_DOCUMENTS_PER_EVENT};
use fesv_db::Database;
use tracing::debug;

use crate::clock::LocalClock;
use crate::error::{ContingencyError, ContingencyResult};

/// An event ready to be signed and stored.
#[derive(Debug, Clone)]
pub struct BuiltEvent {
    pub payload: ContingencyEventPayload,
    pub codigo_generacion: String,
    /// Serialized payload, the input to the signer.
    pub json: String,
    /// Ids of the documents listed in `detalleDTE`, same order.
    pub document_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuiltLote {
    pub envelope: LoteEnvelope,
    pub id_envio: String,
}

#[derive(Debug, Clone)]
pub struct EventBuilder {
    db: Database,
    clock: LocalClock,
}

impl EventBuilder {
    pub fn new(db: Database, clock: LocalClock) -> Self {
        EventBuilder { db, clock }
    }

    /// Builds the event payload for `documents` of `period`.
    ///
    /// Nothing is written. Fails with a validation error on an empty list,
    /// more than 1000 documents, an open period or missing outlet codes.
    pub async fn build_event(
        &self,
        period: &ContingencyPeriod,
        documents: &[Document],
    ) -> ContingencyResult<BuiltEvent> {
        check_document_count(documents.len())?;

        let emitter = self
            .db
            .outlets()
            .emitter_info(&period.establishment_id, &period.point_of_sale_id)
            .await?
            .ok_or_else(|| ContingencyError::not_found("PointOfSale", &period.point_of_sale_id))?;

        let refs: Vec<EventDocumentRef> = documents
            .iter()
            .map(|doc| EventDocumentRef {
                codigo_generacion: doc.codigo_generacion.clone(),
                tipo_dte: doc.tipo_dte.clone(),
            })
            .collect();

        let (payload, codigo_generacion) =
            build_event_payload(period, &emitter, &refs, self.clock.now_local())?;
        let json = serde_json::to_string(&payload)?;

        debug!(
            period_id = %period.id,
            codigo_generacion = %codigo_generacion,
            dte_count = refs.len(),
            "Contingency event built"
        );

        Ok(BuiltEvent {
            payload,
            codigo_generacion,
            json,
            document_ids: documents.iter().map(|d| d.id.clone()).collect(),
        })
    }

    /// Wraps signed documents in a lote envelope. Pure.
    pub fn build_lote_payload(
        &self,
        ambiente: Ambiente,
        nit: &str,
        signed_documents: Vec<String>,
    ) -> ContingencyResult<BuiltLote> {
        check_document_count(signed_documents.len())?;

        let (envelope, id_envio) =
            build_lote_envelope(ambiente, &nit_without_dashes(nit), signed_documents);
        Ok(BuiltLote { envelope, id_envio })
    }
}

fn check_document_count(count: usize) -> Result<(), ValidationError> {
    if count == 0 {
        return Err(ValidationError::Empty {
            field: "documents".to_string(),
        });
    }
    if count > MAX_DOCUMENTS_PER_EVENT {
        return Err(ValidationError::TooMany {
            field: "documents".to_string(),
            max: MAX_DOCUMENTS_PER_EVENT,
            actual: count,
        });
    }
    Ok(())
}
