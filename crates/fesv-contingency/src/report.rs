//! # Reconciliation Report
//!
//! Renders reconciliation results as a CSV sheet for operator review.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RESUMEN DE RECONCILIACIÓN DE DTEs            │  summary block
//! │ Zona Horaria: America/El_Salvador            │  (batch runs only)
//! │ Total de Registros, 12                       │
//! │ ...                                          │
//! ├──────────────────────────────────────────────┤
//! │ Código Generación, No. Control, ...          │  one header row
//! │ 0D3A1B7C-..., DTE-01-M001P001-..., ...       │  one row per record
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Both processing timestamps are shown in the clock's local zone so they
//! can be compared side by side. `Consultado En` stays in UTC.

use std::io;

use chrono::{DateTime, SecondsFormat, Utc};
use csv::WriterBuilder;

use fesv_core::authority::{parse_authority_timestamp, AUTHORITY_TIMESTAMP_FORMAT};
use fesv_core::reconcile::{ReconciliationRecord, ReconciliationSummary};

use crate::clock::LocalClock;
use crate::error::{ContingencyError, ContingencyResult};
use crate::reconcile::ReconciliationReport;

const COLUMNS: [&str; 17] = [
    "Código Generación",
    "No. Control",
    "Tipo DTE",
    "Fecha Emisión",
    "Estado Interno",
    "Estado Hacienda",
    "Sello Interno",
    "Sello Hacienda",
    "Fecha Proc. Interno (local)",
    "Fecha Proc. Hacienda (local)",
    "Coincide",
    "Fecha Emisión Coincide",
    "Estado Consulta",
    "Discrepancias",
    "Advertencias",
    "Mensaje Error",
    "Consultado En",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportWriter {
    clock: LocalClock,
}

impl ReportWriter {
    pub fn new(clock: LocalClock) -> Self {
        ReportWriter { clock }
    }

    /// Summary block followed by every returned record.
    pub fn report_csv(&self, report: &ReconciliationReport) -> ContingencyResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_csv(&report.records, Some(&report.summary), &mut out)?;
        Ok(out)
    }

    /// A single record, without the summary block.
    pub fn record_csv(&self, record: &ReconciliationRecord) -> ContingencyResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_csv(std::slice::from_ref(record), None, &mut out)?;
        Ok(out)
    }

    pub fn write_csv<W: io::Write>(
        &self,
        records: &[ReconciliationRecord],
        summary: Option<&ReconciliationSummary>,
        out: W,
    ) -> ContingencyResult<()> {
        // Summary rows are shorter than record rows.
        let mut writer = WriterBuilder::new().flexible(true).from_writer(out);

        if let Some(summary) = summary {
            let zone = format!("Zona Horaria: {}", self.clock.timezone().name());
            writer.write_record(["RESUMEN DE RECONCILIACIÓN DE DTEs"])?;
            writer.write_record([zone.as_str()])?;
            writer.write_record([""])?;
            for (label, value) in [
                ("Total de Registros", summary.total_records),
                ("Registros Coincidentes", summary.matched_records),
                ("Registros con Discrepancias", summary.mismatched_records),
                ("Discrepancias de Fecha", summary.date_mismatches),
                ("Fechas Ilegibles", summary.date_unparseable),
                ("No Encontrados en Hacienda", summary.not_found_in_hacienda),
                ("Errores de Consulta", summary.query_errors),
            ] {
                writer.write_record([label, value.to_string().as_str()])?;
            }
            writer.write_record([""])?;
        }

        writer.write_record(COLUMNS)?;
        for record in records {
            writer.write_record(self.row(record))?;
        }

        writer
            .flush()
            .map_err(|e| ContingencyError::Report(e.to_string()))
    }

    fn row(&self, record: &ReconciliationRecord) -> [String; 17] {
        [
            record.codigo_generacion.clone(),
            record.numero_control.clone(),
            record.tipo_dte.clone(),
            record.fecha_emision.clone(),
            record.internal_estado.clone().unwrap_or_default(),
            record.hacienda_estado.clone().unwrap_or_default(),
            record.internal_sello.clone().unwrap_or_default(),
            record.hacienda_sello.clone().unwrap_or_default(),
            record
                .internal_fh_procesamiento
                .map(|instant| self.local_timestamp(instant))
                .unwrap_or_default(),
            record
                .hacienda_fh_procesamiento
                .as_deref()
                .map(|raw| match parse_authority_timestamp(raw) {
                    Some(instant) => self.local_timestamp(instant),
                    None => raw.to_string(),
                })
                .unwrap_or_default(),
            yes_no(record.matches).to_string(),
            match record.fecha_emision_matches {
                Some(matches) => yes_no(matches).to_string(),
                None => "N/D".to_string(),
            },
            record.query_status.as_str().to_string(),
            record.discrepancies.join("; "),
            record.warnings.join("; "),
            record.error_message.clone().unwrap_or_default(),
            record.queried_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ]
    }

    fn local_timestamp(&self, instant: DateTime<Utc>) -> String {
        self.clock
            .to_local(instant)
            .format(AUTHORITY_TIMESTAMP_FORMAT)
            .to_string()
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "SÍ"
    } else {
        "NO"
    }
}
