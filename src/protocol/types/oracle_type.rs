//! The closed set of logical Oracle data types the driver handles.
//!
//! Each variant carries its on-wire type number, character-set form, default
//! size, and buffer-size factor. The pair `(type_number, csfrm)` is the
//! lookup key for column metadata arriving in DESCRIBE_INFO.

use crate::error::{Error, Result};
use crate::protocol::constants::*;

/// A logical Oracle data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleDataType {
    Varchar,
    Nvarchar,
    Char,
    Nchar,
    Number,
    BinaryInteger,
    BinaryFloat,
    BinaryDouble,
    Boolean,
    Raw,
    Long,
    LongRaw,
    LongNvarchar,
    Date,
    Timestamp,
    TimestampTz,
    TimestampLtz,
    IntervalDs,
    IntervalYm,
    Blob,
    Clob,
    Nclob,
    Bfile,
    Json,
    Vector,
    Cursor,
    Rowid,
    Urowid,
    Object,
    Unknown,
}

impl OracleDataType {
    /// On-wire type number.
    pub const fn type_num(self) -> u16 {
        match self {
            Self::Varchar | Self::Nvarchar => ORA_TYPE_NUM_VARCHAR,
            Self::Char | Self::Nchar => ORA_TYPE_NUM_CHAR,
            Self::Number => ORA_TYPE_NUM_NUMBER,
            Self::BinaryInteger => ORA_TYPE_NUM_BINARY_INTEGER,
            Self::BinaryFloat => ORA_TYPE_NUM_BINARY_FLOAT,
            Self::BinaryDouble => ORA_TYPE_NUM_BINARY_DOUBLE,
            Self::Boolean => ORA_TYPE_NUM_BOOLEAN,
            Self::Raw => ORA_TYPE_NUM_RAW,
            Self::Long | Self::LongNvarchar => ORA_TYPE_NUM_LONG,
            Self::LongRaw => ORA_TYPE_NUM_LONG_RAW,
            Self::Date => ORA_TYPE_NUM_DATE,
            Self::Timestamp => ORA_TYPE_NUM_TIMESTAMP,
            Self::TimestampTz => ORA_TYPE_NUM_TIMESTAMP_TZ,
            Self::TimestampLtz => ORA_TYPE_NUM_TIMESTAMP_LTZ,
            Self::IntervalDs => ORA_TYPE_NUM_INTERVAL_DS,
            Self::IntervalYm => ORA_TYPE_NUM_INTERVAL_YM,
            Self::Blob => ORA_TYPE_NUM_BLOB,
            Self::Clob | Self::Nclob => ORA_TYPE_NUM_CLOB,
            Self::Bfile => ORA_TYPE_NUM_BFILE,
            Self::Json => ORA_TYPE_NUM_JSON,
            Self::Vector => ORA_TYPE_NUM_VECTOR,
            Self::Cursor => ORA_TYPE_NUM_CURSOR,
            Self::Rowid => ORA_TYPE_NUM_ROWID,
            Self::Urowid => ORA_TYPE_NUM_UROWID,
            Self::Object => ORA_TYPE_NUM_OBJECT,
            Self::Unknown => 0,
        }
    }

    /// Character-set form: 0 none, 1 implicit (database charset), 2 NCHAR.
    pub const fn csfrm(self) -> u8 {
        match self {
            Self::Varchar | Self::Char | Self::Long | Self::Clob => TNS_CS_IMPLICIT,
            Self::Nvarchar | Self::Nchar | Self::LongNvarchar | Self::Nclob => TNS_CS_NCHAR,
            _ => 0,
        }
    }

    /// Default declared size for sized types.
    pub const fn default_size(self) -> u32 {
        match self {
            Self::Varchar | Self::Nvarchar | Self::Raw => 4000,
            Self::Char | Self::Nchar => 2000,
            Self::Urowid => TNS_MAX_UROWID_LENGTH,
            Self::Rowid => 18,
            _ => 0,
        }
    }

    /// Bytes of buffer per unit of declared size; 0 for fixed-width types.
    pub const fn buffer_size_factor(self) -> u32 {
        match self {
            // UTF-8 worst case per character
            Self::Varchar | Self::Nvarchar | Self::Char | Self::Nchar => 4,
            Self::Raw | Self::Long | Self::LongRaw | Self::LongNvarchar => 1,
            _ => 0,
        }
    }

    /// Fixed buffer size for types without a size factor.
    pub const fn fixed_buffer_size(self) -> u32 {
        match self {
            Self::Number | Self::BinaryInteger => 22,
            Self::BinaryFloat => 4,
            Self::BinaryDouble => 8,
            Self::Boolean => 4,
            Self::Date => 7,
            Self::Timestamp | Self::TimestampLtz => 11,
            Self::TimestampTz => 13,
            Self::IntervalDs => 11,
            Self::IntervalYm => 5,
            Self::Rowid => 18,
            Self::Cursor => 4,
            // LOB types carry locators
            Self::Blob | Self::Clob | Self::Nclob | Self::Bfile => 40,
            _ => 0,
        }
    }

    /// Buffer size for a declared size in size units.
    pub const fn buffer_size(self, size: u32) -> u32 {
        match self.buffer_size_factor() {
            0 => self.fixed_buffer_size(),
            factor => size.saturating_mul(factor),
        }
    }

    /// The `(csfrm, type_number)` lookup key used for describe metadata.
    pub const fn lookup_key(self) -> u32 {
        (self.csfrm() as u32) * 256 + self.type_num() as u32
    }

    /// Whether row values of this type may arrive as multiple chunks.
    pub const fn uses_chunked_read(self) -> bool {
        matches!(
            self,
            Self::Long
                | Self::LongRaw
                | Self::LongNvarchar
                | Self::Json
                | Self::Vector
                | Self::Clob
                | Self::Nclob
                | Self::Blob
        )
    }

    /// Whether this type is a large object carried by locator.
    pub const fn is_lob(self) -> bool {
        matches!(self, Self::Blob | Self::Clob | Self::Nclob | Self::Bfile)
    }

    /// Resolve a describe-info `(type_number, csfrm)` pair.
    pub fn from_type_info(type_num: u16, csfrm: u8) -> Result<Self> {
        let resolved = match (type_num, csfrm) {
            (ORA_TYPE_NUM_VARCHAR, TNS_CS_NCHAR) => Self::Nvarchar,
            (ORA_TYPE_NUM_VARCHAR, _) => Self::Varchar,
            (ORA_TYPE_NUM_CHAR, TNS_CS_NCHAR) => Self::Nchar,
            (ORA_TYPE_NUM_CHAR, _) => Self::Char,
            (ORA_TYPE_NUM_NUMBER, _) => Self::Number,
            (ORA_TYPE_NUM_BINARY_INTEGER, _) => Self::BinaryInteger,
            (ORA_TYPE_NUM_BINARY_FLOAT, _) => Self::BinaryFloat,
            (ORA_TYPE_NUM_BINARY_DOUBLE, _) => Self::BinaryDouble,
            (ORA_TYPE_NUM_BOOLEAN, _) => Self::Boolean,
            (ORA_TYPE_NUM_RAW, _) => Self::Raw,
            (ORA_TYPE_NUM_LONG, TNS_CS_NCHAR) => Self::LongNvarchar,
            (ORA_TYPE_NUM_LONG, _) => Self::Long,
            (ORA_TYPE_NUM_LONG_RAW, _) => Self::LongRaw,
            (ORA_TYPE_NUM_DATE, _) => Self::Date,
            (ORA_TYPE_NUM_TIMESTAMP, _) => Self::Timestamp,
            (ORA_TYPE_NUM_TIMESTAMP_TZ, _) => Self::TimestampTz,
            (ORA_TYPE_NUM_TIMESTAMP_LTZ, _) => Self::TimestampLtz,
            (ORA_TYPE_NUM_INTERVAL_DS, _) => Self::IntervalDs,
            (ORA_TYPE_NUM_INTERVAL_YM, _) => Self::IntervalYm,
            (ORA_TYPE_NUM_BLOB, _) => Self::Blob,
            (ORA_TYPE_NUM_CLOB, TNS_CS_NCHAR) => Self::Nclob,
            (ORA_TYPE_NUM_CLOB, _) => Self::Clob,
            (ORA_TYPE_NUM_BFILE, _) => Self::Bfile,
            (ORA_TYPE_NUM_JSON, _) => Self::Json,
            (ORA_TYPE_NUM_VECTOR, _) => Self::Vector,
            (ORA_TYPE_NUM_CURSOR, _) => Self::Cursor,
            (ORA_TYPE_NUM_ROWID, _) => Self::Rowid,
            (ORA_TYPE_NUM_UROWID, _) => Self::Urowid,
            (ORA_TYPE_NUM_OBJECT, _) => Self::Object,
            _ => {
                return Err(Error::decoding(format!(
                    "unknown data type number {} (csfrm {})",
                    type_num, csfrm
                )))
            }
        };
        Ok(resolved)
    }
}

impl std::fmt::Display for OracleDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Varchar => "VARCHAR2",
            Self::Nvarchar => "NVARCHAR2",
            Self::Char => "CHAR",
            Self::Nchar => "NCHAR",
            Self::Number => "NUMBER",
            Self::BinaryInteger => "BINARY_INTEGER",
            Self::BinaryFloat => "BINARY_FLOAT",
            Self::BinaryDouble => "BINARY_DOUBLE",
            Self::Boolean => "BOOLEAN",
            Self::Raw => "RAW",
            Self::Long => "LONG",
            Self::LongRaw => "LONG RAW",
            Self::LongNvarchar => "LONG NVARCHAR",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::TimestampTz => "TIMESTAMP WITH TIME ZONE",
            Self::TimestampLtz => "TIMESTAMP WITH LOCAL TIME ZONE",
            Self::IntervalDs => "INTERVAL DAY TO SECOND",
            Self::IntervalYm => "INTERVAL YEAR TO MONTH",
            Self::Blob => "BLOB",
            Self::Clob => "CLOB",
            Self::Nclob => "NCLOB",
            Self::Bfile => "BFILE",
            Self::Json => "JSON",
            Self::Vector => "VECTOR",
            Self::Cursor => "CURSOR",
            Self::Rowid => "ROWID",
            Self::Urowid => "UROWID",
            Self::Object => "OBJECT",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}
