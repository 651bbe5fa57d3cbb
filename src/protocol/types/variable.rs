//! Typed value slots for bind parameters.

use super::oracle_type::OracleDataType;
use crate::protocol::constants::TNS_MAX_STRING_SIZE_EXTENDED;
use bytes::Bytes;

/// A typed value slot bound to a statement placeholder.
///
/// Values are pre-encoded wire bytes; the user-facing encode API lives in an
/// external collaborator, mirroring how result rows stay raw on the way out.
#[derive(Debug, Clone)]
pub struct Variable {
    pub db_type: OracleDataType,
    pub buffer_size: u32,
    pub precision: u8,
    pub scale: i8,
    pub is_array: bool,
    pub nulls_allowed: bool,
    /// One entry per element; a single-value variable has exactly one.
    pub values: Vec<Option<Bytes>>,
}

impl Variable {
    /// A single string value.
    pub fn from_str(value: &str) -> Self {
        let bytes = Bytes::copy_from_slice(value.as_bytes());
        Self::with_value(OracleDataType::Varchar, Some(bytes))
    }

    /// A single raw byte value.
    pub fn from_bytes(value: &[u8]) -> Self {
        Self::with_value(OracleDataType::Raw, Some(Bytes::copy_from_slice(value)))
    }

    /// A single pre-encoded value of an explicit type.
    pub fn with_value(db_type: OracleDataType, value: Option<Bytes>) -> Self {
        let len = value.as_ref().map(|v| v.len() as u32).unwrap_or(0);
        Self {
            db_type,
            buffer_size: db_type.buffer_size(len.max(1)),
            precision: 0,
            scale: 0,
            is_array: false,
            nulls_allowed: true,
            values: vec![value],
        }
    }

    /// A NULL of the given type.
    pub fn null(db_type: OracleDataType) -> Self {
        Self::with_value(db_type, None)
    }

    /// An array variable for batch DML.
    pub fn array(db_type: OracleDataType, values: Vec<Option<Bytes>>) -> Self {
        let max_len = values
            .iter()
            .filter_map(|v| v.as_ref().map(|b| b.len() as u32))
            .max()
            .unwrap_or(0);
        Self {
            db_type,
            buffer_size: db_type.buffer_size(max_len.max(1)),
            precision: 0,
            scale: 0,
            is_array: true,
            nulls_allowed: true,
            values,
        }
    }

    pub fn element_count(&self) -> u32 {
        self.values.len() as u32
    }

    /// Largest element size in bytes.
    pub fn max_value_len(&self) -> usize {
        self.values
            .iter()
            .filter_map(|v| v.as_ref().map(|b| b.len()))
            .max()
            .unwrap_or(0)
    }

    /// The LOB type this variable must be upgraded to for PL/SQL, if any.
    ///
    /// PL/SQL cannot take string or raw binds above 32767 bytes; such values
    /// travel as temporary LOBs instead: raw bytes become a BLOB, NCHAR-form
    /// strings an NCLOB, and everything else a CLOB.
    pub fn plsql_lob_upgrade(&self) -> Option<OracleDataType> {
        if self.max_value_len() <= TNS_MAX_STRING_SIZE_EXTENDED as usize {
            return None;
        }
        match self.db_type {
            OracleDataType::Raw | OracleDataType::LongRaw => Some(OracleDataType::Blob),
            t if t.csfrm() == crate::protocol::constants::TNS_CS_NCHAR => {
                Some(OracleDataType::Nclob)
            }
            _ => Some(OracleDataType::Clob),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value() {
        let var = Variable::from_str("hello");
        assert_eq!(var.db_type, OracleDataType::Varchar);
        assert_eq!(var.element_count(), 1);
        assert!(!var.is_array);
        assert_eq!(var.max_value_len(), 5);
    }

    #[test]
    fn test_array_variable() {
        let var = Variable::array(
            OracleDataType::Number,
            vec![
                Some(Bytes::from_static(&[0xc1, 0x02])),
                None,
                Some(Bytes::from_static(&[0xc1, 0x03])),
            ],
        );
        assert!(var.is_array);
        assert_eq!(var.element_count(), 3);
    }

    #[test]
    fn test_plsql_lob_upgrade_rules() {
        let small = Variable::from_str("short");
        assert!(small.plsql_lob_upgrade().is_none());

        let big_string = Variable::with_value(
            OracleDataType::Varchar,
            Some(Bytes::from(vec![b'a'; 40_000])),
        );
        assert_eq!(big_string.plsql_lob_upgrade(), Some(OracleDataType::Clob));

        let big_nstring = Variable::with_value(
            OracleDataType::Nvarchar,
            Some(Bytes::from(vec![b'a'; 40_000])),
        );
        assert_eq!(big_nstring.plsql_lob_upgrade(), Some(OracleDataType::Nclob));

        let big_raw =
            Variable::with_value(OracleDataType::Raw, Some(Bytes::from(vec![0u8; 40_000])));
        assert_eq!(big_raw.plsql_lob_upgrade(), Some(OracleDataType::Blob));
    }
}
