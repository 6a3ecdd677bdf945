//! Core types and traits for Mariner.
//!
//! This crate provides the foundational abstractions shared by the Mariner
//! client layer:
//!
//! - The error taxonomy for all client operations
//! - `Value` for dynamically-typed parameters and results
//! - `Row` for name- and index-addressable result rows
//! - `ConnectConfig` / `PoolOptions` for connection and pooling settings
//! - The `NativeSession` capability trait, the seam behind which the wire
//!   protocol, TLS and authentication live

pub mod config;
pub mod error;
pub mod row;
pub mod session;
pub mod value;

pub use config::{ConnectConfig, MAX_POOL_NAME_LEN, MAX_POOL_SIZE, PoolOptions, SslConfig};
pub use error::{
    ConfigError, DataError, DatabaseError, DatabaseErrorKind, Error, InterfaceError, PoolError,
    PoolErrorKind, ProgrammingError, Result,
};
pub use row::{ColumnInfo, Row};
pub use session::{
    ColumnDesc, ExecReply, NativeSession, SessionCapabilities, SessionConnector, StatementId,
    TypeCode,
};
pub use value::Value;
