//! Per-column metadata from DESCRIBE_INFO.

use super::oracle_type::OracleDataType;

/// One column of a query result set, as described by the server.
///
/// Stored once per statement; the row decoder in external collaborators
/// consults it to interpret the raw cell bytes.
#[derive(Debug, Clone)]
pub struct OracleColumn {
    /// Column name.
    pub name: String,
    /// Resolved logical data type.
    pub data_type: OracleDataType,
    /// Declared size (characters or bytes depending on the type).
    pub size: u32,
    /// Server-advertised buffer size.
    pub buffer_size: u32,
    /// Numeric precision.
    pub precision: i8,
    /// Numeric scale.
    pub scale: i8,
    /// Whether NULLs are allowed.
    pub nullable: bool,
}

impl OracleColumn {
    /// Character-set form, derived from the data type.
    pub fn csfrm(&self) -> u8 {
        self.data_type.csfrm()
    }
}
