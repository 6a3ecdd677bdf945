//! Native session capability traits.
//!
//! A [`NativeSession`] is one physical server session: it performs the wire
//! protocol, TLS and authentication, and exposes execute/fetch/ping
//! primitives. Connections and cursors are built on top of this seam by
//! composition, so test doubles can stand in for a real server.

use crate::config::ConnectConfig;
use crate::error::Result;
use crate::value::Value;

/// Column type codes as reported in result-set metadata.
///
/// These are the `MYSQL_TYPE_*` constants from the server protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeCode {
    /// DECIMAL
    Decimal = 0x00,
    /// TINYINT
    Tiny = 0x01,
    /// SMALLINT
    Short = 0x02,
    /// INT
    Long = 0x03,
    /// FLOAT
    Float = 0x04,
    /// DOUBLE
    Double = 0x05,
    /// NULL
    Null = 0x06,
    /// TIMESTAMP
    Timestamp = 0x07,
    /// BIGINT
    LongLong = 0x08,
    /// MEDIUMINT
    Int24 = 0x09,
    /// DATE
    Date = 0x0A,
    /// TIME
    Time = 0x0B,
    /// DATETIME
    DateTime = 0x0C,
    /// YEAR
    Year = 0x0D,
    /// VARCHAR
    VarChar = 0x0F,
    /// BIT
    Bit = 0x10,
    /// JSON
    Json = 0xF5,
    /// NEWDECIMAL
    NewDecimal = 0xF6,
    /// ENUM
    Enum = 0xF7,
    /// SET
    Set = 0xF8,
    /// TINYBLOB
    TinyBlob = 0xF9,
    /// MEDIUMBLOB
    MediumBlob = 0xFA,
    /// LONGBLOB
    LongBlob = 0xFB,
    /// BLOB
    Blob = 0xFC,
    /// VARCHAR (VAR_STRING)
    VarString = 0xFD,
    /// CHAR
    String = 0xFE,
    /// GEOMETRY
    Geometry = 0xFF,
}

impl TypeCode {
    /// Parse a type code from the metadata byte.
    ///
    /// Unknown codes are treated as `String`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => TypeCode::Decimal,
            0x01 => TypeCode::Tiny,
            0x02 => TypeCode::Short,
            0x03 => TypeCode::Long,
            0x04 => TypeCode::Float,
            0x05 => TypeCode::Double,
            0x06 => TypeCode::Null,
            0x07 => TypeCode::Timestamp,
            0x08 => TypeCode::LongLong,
            0x09 => TypeCode::Int24,
            0x0A => TypeCode::Date,
            0x0B => TypeCode::Time,
            0x0C => TypeCode::DateTime,
            0x0D => TypeCode::Year,
            0x0F => TypeCode::VarChar,
            0x10 => TypeCode::Bit,
            0xF5 => TypeCode::Json,
            0xF6 => TypeCode::NewDecimal,
            0xF7 => TypeCode::Enum,
            0xF8 => TypeCode::Set,
            0xF9 => TypeCode::TinyBlob,
            0xFA => TypeCode::MediumBlob,
            0xFB => TypeCode::LongBlob,
            0xFC => TypeCode::Blob,
            0xFD => TypeCode::VarString,
            0xFF => TypeCode::Geometry,
            _ => TypeCode::String,
        }
    }

    /// Check if this is an integer type.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            TypeCode::Tiny | TypeCode::Short | TypeCode::Long | TypeCode::Int24 | TypeCode::LongLong
        )
    }

    /// Check if this is a string type.
    pub const fn is_string(self) -> bool {
        matches!(self, TypeCode::VarChar | TypeCode::VarString | TypeCode::String)
    }

    /// Check if this is a date/time type.
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            TypeCode::Date | TypeCode::Time | TypeCode::DateTime | TypeCode::Timestamp | TypeCode::Year
        )
    }
}

/// One entry of a result-set description.
///
/// Mirrors the DB-API description tuple: name, type code, display size,
/// internal size, precision, scale and nullability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    /// Column (alias) name
    pub name: String,
    /// Wire type of the column
    pub type_code: TypeCode,
    /// Maximum display width, if known
    pub display_size: Option<u32>,
    /// Size of the column on the server, if known
    pub internal_size: Option<u32>,
    /// Numeric precision, if applicable
    pub precision: Option<u32>,
    /// Numeric scale, if applicable
    pub scale: Option<u32>,
    /// Whether the column accepts NULL
    pub nullable: bool,
    /// UNSIGNED flag for numeric columns
    pub unsigned: bool,
}

impl ColumnDesc {
    /// Create a description entry with only name and type set.
    pub fn new(name: impl Into<String>, type_code: TypeCode) -> Self {
        Self {
            name: name.into(),
            type_code,
            display_size: None,
            internal_size: None,
            precision: None,
            scale: None,
            nullable: true,
            unsigned: false,
        }
    }
}

/// Outcome of one statement execution on a native session.
///
/// An empty `columns` vector means the statement produced no result set.
#[derive(Debug, Clone, Default)]
pub struct ExecReply {
    /// Result-set metadata; empty for non-result statements
    pub columns: Vec<ColumnDesc>,
    /// Rows affected by the statement
    pub affected_rows: u64,
    /// Auto-generated id of the last inserted row
    pub last_insert_id: u64,
    /// Warning count reported by the server
    pub warnings: u16,
}

impl ExecReply {
    /// Create a no-result reply with an affected-row count.
    pub fn affected(rows: u64) -> Self {
        Self {
            affected_rows: rows,
            ..Self::default()
        }
    }

    /// Create a result-set reply from column metadata.
    pub fn result_set(columns: Vec<ColumnDesc>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }
}

/// Server capabilities relevant to statement dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCapabilities {
    /// Server supports native bulk (array-bound) execution
    pub bulk_operations: bool,
    /// Server accepts multiple statements in one execution
    pub multi_statements: bool,
}

/// Handle for a server-side prepared statement.
pub type StatementId = u64;

/// One physical session with the database server.
///
/// Implementations perform the actual network I/O and wire encoding.
/// Statement results are consumed through [`NativeSession::fetch_row`]
/// until it returns `None`; multi-statement responses advance through
/// [`NativeSession::next_result`].
pub trait NativeSession: Send {
    /// Execute a statement through the text protocol.
    fn execute_text(&mut self, sql: &str) -> Result<ExecReply>;

    /// Prepare a statement for binary execution.
    fn prepare(&mut self, sql: &str) -> Result<StatementId>;

    /// Execute a prepared statement with out-of-band parameter values.
    fn execute_prepared(&mut self, statement: StatementId, params: &[Value]) -> Result<ExecReply>;

    /// Execute a prepared statement once over a whole set of parameter rows.
    ///
    /// Only valid when [`SessionCapabilities::bulk_operations`] is set.
    fn execute_bulk(&mut self, statement: StatementId, rows: &[Vec<Value>]) -> Result<ExecReply>;

    /// Fetch the next row of the current result set.
    fn fetch_row(&mut self) -> Result<Option<Vec<Value>>>;

    /// Advance to the next pending result set, if any.
    fn next_result(&mut self) -> Result<Option<ExecReply>>;

    /// Check server liveness.
    fn ping(&mut self) -> Result<()>;

    /// Reset session state (rolls back open work, clears locks and
    /// session variables).
    fn reset(&mut self) -> Result<()>;

    /// Escape a string for splicing into text-protocol SQL, using the
    /// session's active character set.
    fn escape_string(&self, input: &str) -> String;

    /// Capabilities negotiated with the server.
    fn capabilities(&self) -> SessionCapabilities;

    /// Server version string as reported at handshake.
    fn server_version(&self) -> String;

    /// Close the session.
    fn close(&mut self) -> Result<()>;
}

/// Factory opening native sessions from connection configuration.
///
/// Injected wherever connections are created (directly or by a pool), so
/// tests can substitute scripted sessions.
pub trait SessionConnector: Send + Sync {
    /// Open a new session for the given configuration.
    fn connect(&self, config: &ConnectConfig) -> Result<Box<dyn NativeSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_code_round_trip() {
        assert_eq!(TypeCode::from_u8(0x03), TypeCode::Long);
        assert_eq!(TypeCode::from_u8(0xF5), TypeCode::Json);
        assert_eq!(TypeCode::from_u8(0xFE), TypeCode::String);
        // unknown codes degrade to String
        assert_eq!(TypeCode::from_u8(0x42), TypeCode::String);
    }

    #[test]
    fn type_code_categories() {
        assert!(TypeCode::LongLong.is_integer());
        assert!(TypeCode::VarString.is_string());
        assert!(TypeCode::Timestamp.is_temporal());
        assert!(!TypeCode::Blob.is_integer());
    }

    #[test]
    fn exec_reply_constructors() {
        let ok = ExecReply::affected(3);
        assert!(ok.columns.is_empty());
        assert_eq!(ok.affected_rows, 3);

        let rs = ExecReply::result_set(vec![ColumnDesc::new("id", TypeCode::Long)]);
        assert_eq!(rs.columns.len(), 1);
        assert_eq!(rs.columns[0].name, "id");
    }
}
