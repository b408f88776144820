//! # Numero de Control
//!
//! The document-control identifier the authority requires on every DTE.
//!
//! ```text
//!   DTE-01-M001P001-000000000000042
//!   │   │  │   │    └── sequence, 15 digits, zero padded
//!   │   │  │   └─────── point-of-sale code (4)
//!   │   │  └─────────── establishment code (4)
//!   │   └────────────── tipo DTE (2)
//!   └────────────────── fixed prefix
//!
//!   Total length: 31 characters
//! ```
//!
//! The sequence comes from the per-(point-of-sale, tipo DTE) counter in the
//! store, so two documents can never share a numero de control.

use std::fmt;
use std::str::FromStr;

use crate::error::{ValidationError, ValidationResult};
use crate::validation::{validate_outlet_code, validate_tipo_dte};

const PREFIX: &str = "DTE";
const LENGTH: usize = 31;
const SEQUENCE_DIGITS: usize = 15;
const MAX_SEQUENCE: i64 = 999_999_999_999_999;

/// A parsed or freshly built numero de control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumeroControl {
    tipo_dte: String,
    cod_establecimiento: String,
    cod_punto_venta: String,
    sequence: i64,
}

impl NumeroControl {
    /// Builds a numero de control from its components.
    pub fn new(
        tipo_dte: &str,
        cod_establecimiento: &str,
        cod_punto_venta: &str,
        sequence: i64,
    ) -> ValidationResult<Self> {
        validate_tipo_dte(tipo_dte)?;
        let cod_establecimiento =
            validate_outlet_code("cod_establecimiento", Some(cod_establecimiento))?;
        let cod_punto_venta = validate_outlet_code("cod_punto_venta", Some(cod_punto_venta))?;

        if !(1..=MAX_SEQUENCE).contains(&sequence) {
            return Err(ValidationError::OutOfRange {
                field: "sequence".to_string(),
                min: 1,
                max: MAX_SEQUENCE,
            });
        }

        Ok(NumeroControl {
            tipo_dte: tipo_dte.to_string(),
            cod_establecimiento: cod_establecimiento.to_string(),
            cod_punto_venta: cod_punto_venta.to_string(),
            sequence,
        })
    }

    /// Parses and validates `DTE-XX-XXXXXXXX-XXXXXXXXXXXXXXX`.
    pub fn parse(value: &str) -> ValidationResult<Self> {
        let invalid = |reason: String| ValidationError::InvalidFormat {
            field: "numero_control".to_string(),
            reason,
        };

        if value.len() != LENGTH {
            return Err(invalid(format!(
                "must be exactly {LENGTH} characters, got {}",
                value.len()
            )));
        }

        let parts: Vec<&str> = value.split('-').collect();
        let [prefix, tipo, outlet, sequence] = parts.as_slice() else {
            return Err(invalid("expected 4 dash-separated parts".to_string()));
        };

        if *prefix != PREFIX {
            return Err(invalid(format!("prefix must be {PREFIX}")));
        }
        if outlet.len() != 8 || !outlet.is_ascii() {
            return Err(invalid("outlet segment must be 8 characters".to_string()));
        }
        if sequence.len() != SEQUENCE_DIGITS || !sequence.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(format!("sequence must be {SEQUENCE_DIGITS} digits")));
        }

        let sequence: i64 = sequence
            .parse()
            .map_err(|e| invalid(format!("invalid sequence: {e}")))?;
        let (establecimiento, punto_venta) = outlet.split_at(4);

        NumeroControl::new(tipo, establecimiento, punto_venta, sequence)
    }

    pub fn tipo_dte(&self) -> &str {
        &self.tipo_dte
    }

    pub fn cod_establecimiento(&self) -> &str {
        &self.cod_establecimiento
    }

    pub fn cod_punto_venta(&self) -> &str {
        &self.cod_punto_venta
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }
}

impl fmt::Display for NumeroControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PREFIX}-{}-{}{}-{:0width$}",
            self.tipo_dte,
            self.cod_establecimiento,
            self.cod_punto_venta,
            self.sequence,
            width = SEQUENCE_DIGITS
        )
    }
}

impl FromStr for NumeroControl {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NumeroControl::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_formats_31_characters() {
        let numero = NumeroControl::new("01", "M001", "P001", 42).unwrap();
        let text = numero.to_string();
        assert_eq!(text, "DTE-01-M001P001-000000000000042");
        assert_eq!(text.len(), 31);
    }

    #[test]
    fn test_parse_splits_components() {
        let numero: NumeroControl = "DTE-03-00010002-000000000001234".parse().unwrap();
        assert_eq!(numero.tipo_dte(), "03");
        assert_eq!(numero.cod_establecimiento(), "0001");
        assert_eq!(numero.cod_punto_venta(), "0002");
        assert_eq!(numero.sequence(), 1234);
    }

    #[test]
    fn test_rejects_malformed_values() {
        assert!(NumeroControl::parse("DTE-01-M001P001-42").is_err());
        assert!(NumeroControl::parse("XYZ-01-M001P001-000000000000042").is_err());
        assert!(NumeroControl::parse("DTE-0A-M001P001-000000000000042").is_err());
        assert!(NumeroControl::parse("DTE-01-m001p001-000000000000042").is_err());
        assert!(NumeroControl::parse("DTE-01-M001P001-000000000000000").is_err());
    }

    #[test]
    fn test_rejects_bad_components() {
        assert!(NumeroControl::new("1", "M001", "P001", 1).is_err());
        assert!(NumeroControl::new("01", "M01", "P001", 1).is_err());
        assert!(NumeroControl::new("01", "M001", "P001", 0).is_err());
        assert!(NumeroControl::new("01", "M001", "P001", MAX_SEQUENCE + 1).is_err());
    }
}
