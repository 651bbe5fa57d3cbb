//! SQL statement analysis: classification and bind discovery.
//!
//! Classification looks at the first keyword after stripping comments and
//! string literals, so `/* hint */ (SELECT ...` and `select` classify the
//! same. Bind placeholders are found with a hand-rolled scanner; the same
//! comment/literal state machine guarantees a `:name` inside a string is
//! never taken for a bind.

use crate::error::{Error, Result};
use crate::protocol::types::{OracleColumn, OracleDataType, Variable};

/// Statement classification.
///
/// `Returning` is a DML statement with a `RETURNING ... INTO` clause; it
/// executes like DML but delivers out-binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Dml,
    Plsql,
    Ddl,
    Returning,
    Unknown,
}

/// Direction of a bind variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindDirection {
    Input,
    Output,
    InputOutput,
}

/// Metadata for one bind placeholder.
#[derive(Debug, Clone)]
pub struct BindInfo {
    /// Placeholder name, uppercased unless it was quoted.
    pub name: String,
    /// Zero-based bind position (order of first occurrence).
    pub position: usize,
    pub direction: BindDirection,
    /// Whether the bind receives a RETURNING ... INTO value.
    pub is_return_bind: bool,
    pub db_type: OracleDataType,
    pub csfrm: u8,
    /// Declared size in size units.
    pub size: u32,
    /// Buffer size (size times the per-type factor).
    pub buffer_size: u32,
    pub precision: u8,
    pub scale: i8,
    pub is_array: bool,
    pub max_array_size: u32,
    pub array_count: u32,
    /// The bound value; required before execute.
    pub variable: Option<Variable>,
}

impl BindInfo {
    fn new(name: String, position: usize, is_return_bind: bool) -> Self {
        Self {
            name,
            position,
            direction: if is_return_bind {
                BindDirection::Output
            } else {
                BindDirection::Input
            },
            is_return_bind,
            db_type: OracleDataType::Varchar,
            csfrm: OracleDataType::Varchar.csfrm(),
            size: 0,
            buffer_size: 0,
            precision: 0,
            scale: 0,
            is_array: false,
            max_array_size: 0,
            array_count: 0,
            variable: None,
        }
    }

    /// Absorb the shape of a bound variable into the metadata.
    fn set_variable(&mut self, var: Variable) {
        self.db_type = var.db_type;
        self.csfrm = var.db_type.csfrm();
        self.size = var.max_value_len() as u32;
        self.buffer_size = var.buffer_size;
        self.precision = var.precision;
        self.scale = var.scale;
        self.is_array = var.is_array;
        self.array_count = var.element_count();
        if var.is_array {
            self.max_array_size = var.element_count();
        }
        self.variable = Some(var);
    }
}

/// Shape of a bind at execute time, used to detect metadata changes between
/// executions of the same cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindSignature {
    db_type: OracleDataType,
    size: u32,
    buffer_size: u32,
    precision: u8,
    scale: i8,
    is_array: bool,
    array_count: u32,
    csfrm: u8,
}

/// The analyzed form of one SQL string.
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    base_kind: StatementKind,
    has_returning: bool,
    binds: Vec<BindInfo>,
    /// Server-assigned cursor, 0 until the first execute.
    pub(crate) cursor_id: u16,
    pub(crate) requires_full_execute: bool,
    pub(crate) requires_define: bool,
    /// Column metadata cached from DESCRIBE_INFO.
    pub(crate) columns: Vec<OracleColumn>,
    pub(crate) last_bind_signature: Option<Vec<BindSignature>>,
}

impl Statement {
    /// Analyze a SQL string.
    pub fn parse(sql: &str) -> Result<Self> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(Error::malformed("empty statement"));
        }

        let stripped = strip_comments_and_literals(trimmed);
        let base_kind = classify(&stripped);
        let has_returning = base_kind == StatementKind::Dml && detect_returning(&stripped);

        let return_boundary = if has_returning {
            returning_into_offset(&stripped)
        } else {
            None
        };
        let binds = scan_binds(trimmed, &stripped, return_boundary);

        Ok(Self {
            sql: trimmed.to_string(),
            base_kind,
            has_returning,
            binds,
            cursor_id: 0,
            requires_full_execute: false,
            requires_define: false,
            columns: Vec::new(),
            last_bind_signature: None,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Statement length in bytes.
    pub fn sql_length(&self) -> u32 {
        self.sql.len() as u32
    }

    /// Statement length in characters, for servers that count characters.
    pub fn char_length(&self) -> u32 {
        self.sql.chars().count() as u32
    }

    pub fn kind(&self) -> StatementKind {
        if self.has_returning {
            StatementKind::Returning
        } else {
            self.base_kind
        }
    }

    pub fn is_query(&self) -> bool {
        self.base_kind == StatementKind::Query
    }

    pub fn is_plsql(&self) -> bool {
        self.base_kind == StatementKind::Plsql
    }

    pub fn is_dml(&self) -> bool {
        self.base_kind == StatementKind::Dml
    }

    pub fn is_ddl(&self) -> bool {
        self.base_kind == StatementKind::Ddl
    }

    pub fn has_returning(&self) -> bool {
        self.has_returning
    }

    pub fn binds(&self) -> &[BindInfo] {
        &self.binds
    }

    pub fn columns(&self) -> &[OracleColumn] {
        &self.columns
    }

    /// Bind a variable by position (zero-based).
    pub fn bind(&mut self, position: usize, var: Variable) -> Result<()> {
        let info = self
            .binds
            .get_mut(position)
            .ok_or_else(|| Error::malformed(format!("no bind at position {}", position)))?;
        info.set_variable(var);
        Ok(())
    }

    /// Bind a variable by placeholder name.
    pub fn bind_by_name(&mut self, name: &str, var: Variable) -> Result<()> {
        let wanted = name.to_uppercase();
        let info = self
            .binds
            .iter_mut()
            .find(|b| b.name == wanted || b.name == name)
            .ok_or_else(|| Error::malformed(format!("no bind named :{}", name)))?;
        info.set_variable(var);
        Ok(())
    }

    /// Bind variables positionally, one per placeholder.
    pub fn bind_all(&mut self, vars: Vec<Variable>) -> Result<()> {
        for (position, var) in vars.into_iter().enumerate() {
            self.bind(position, var)?;
        }
        Ok(())
    }

    /// Validate binds and derive the execute shape.
    ///
    /// A bind entry with no variable fails here; a metadata change relative
    /// to the previous execution forces a full EXECUTE instead of REEXECUTE.
    pub fn prepare_for_execute(&mut self) -> Result<()> {
        let mut signature = Vec::with_capacity(self.binds.len());
        for info in &self.binds {
            let var = info.variable.as_ref().ok_or(Error::MissingBindValue {
                position: info.position,
                name: info.name.clone(),
            })?;
            signature.push(BindSignature {
                db_type: var.db_type,
                size: info.size,
                buffer_size: info.buffer_size,
                precision: info.precision,
                scale: info.scale,
                is_array: info.is_array,
                array_count: info.array_count,
                csfrm: info.csfrm,
            });
        }

        self.requires_full_execute = self.cursor_id == 0
            || self.is_ddl()
            || self
                .last_bind_signature
                .as_ref()
                .map(|prev| *prev != signature)
                .unwrap_or(true);
        self.last_bind_signature = Some(signature);
        Ok(())
    }
}

/// Replace comments and single-quoted literals with spaces.
///
/// Byte offsets are preserved so positions computed on the stripped text
/// remain valid in the original.
fn strip_comments_and_literals(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = vec![b' '; bytes.len()];
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'-' if i + 1 < bytes.len() && bytes[i + 1] == b'-' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b'\'' => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        // '' is an escaped quote inside the literal
                        if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
            }
            b'q' | b'Q' if i + 2 < bytes.len() && bytes[i + 1] == b'\'' => {
                // q'X ... X' alternative quoting
                let open = bytes[i + 2];
                let close = match open {
                    b'[' => b']',
                    b'{' => b'}',
                    b'(' => b')',
                    b'<' => b'>',
                    c => c,
                };
                i += 3;
                while i + 1 < bytes.len() && !(bytes[i] == close && bytes[i + 1] == b'\'') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            c => {
                out[i] = c;
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// First-keyword classification over the stripped text.
fn classify(stripped: &str) -> StatementKind {
    let keyword: String = stripped
        .chars()
        .skip_while(|c| c.is_whitespace() || *c == '(')
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" => StatementKind::Query,
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" => StatementKind::Dml,
        "DECLARE" | "BEGIN" | "CALL" => StatementKind::Plsql,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" => StatementKind::Ddl,
        _ => StatementKind::Unknown,
    }
}

fn keyword_positions(stripped: &str, keyword: &str) -> Vec<usize> {
    // ASCII-only case folding keeps byte offsets aligned with the input
    let upper = stripped.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut positions = Vec::new();
    let mut start = 0;
    while let Some(found) = upper[start..].find(keyword) {
        let pos = start + found;
        let before_ok = pos == 0 || !bytes[pos - 1].is_ascii_alphanumeric() && bytes[pos - 1] != b'_';
        let after = pos + keyword.len();
        let after_ok =
            after >= bytes.len() || !bytes[after].is_ascii_alphanumeric() && bytes[after] != b'_';
        if before_ok && after_ok {
            positions.push(pos);
        }
        start = pos + keyword.len();
    }
    positions
}

/// Whether a DML statement carries `RETURNING ... INTO`.
fn detect_returning(stripped: &str) -> bool {
    returning_into_offset(stripped).is_some()
}

/// Byte offset just past the INTO of the RETURNING clause, if present.
fn returning_into_offset(stripped: &str) -> Option<usize> {
    let returning = keyword_positions(stripped, "RETURNING");
    let intos = keyword_positions(stripped, "INTO");
    for r in returning {
        if let Some(i) = intos.iter().find(|&&i| i > r) {
            return Some(i + "INTO".len());
        }
    }
    None
}

/// Scan for bind placeholders outside comments and literals.
///
/// A bind is `:` followed by digits (positional), a double-quoted identifier
/// (name kept verbatim), or an identifier run (uppercased). Duplicate names
/// collapse to one entry; the first occurrence fixes the position.
fn scan_binds(sql: &str, stripped: &str, return_boundary: Option<usize>) -> Vec<BindInfo> {
    let bytes = stripped.as_bytes();
    let orig = sql.as_bytes();
    let mut binds: Vec<BindInfo> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b':' {
            i += 1;
            continue;
        }
        // := is PL/SQL assignment, not a bind
        if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
            i += 2;
            continue;
        }
        let start = i;
        i += 1;
        // whitespace is permitted between the colon and the name
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let name = match bytes[i] {
            b'0'..=b'9' => {
                let from = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                Some(String::from_utf8_lossy(&orig[from..i]).into_owned())
            }
            b'"' => {
                let from = i + 1;
                i += 1;
                while i < bytes.len() && orig[i] != b'"' {
                    i += 1;
                }
                let name = String::from_utf8_lossy(&orig[from..i]).into_owned();
                i = (i + 1).min(bytes.len());
                Some(name)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let from = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
                {
                    i += 1;
                }
                Some(String::from_utf8_lossy(&orig[from..i]).to_uppercase())
            }
            _ => None,
        };

        let Some(name) = name else { continue };
        if name.is_empty() {
            continue;
        }
        if binds.iter().any(|b| b.name == name) {
            continue;
        }
        let is_return = return_boundary.map(|b| start > b).unwrap_or(false);
        let position = binds.len();
        binds.push(BindInfo::new(name, position, is_return));
    }

    binds
}
