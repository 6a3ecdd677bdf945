//! Mariner - MariaDB and MySQL client connectivity for Rust.
//!
//! Mariner manages connections to a MariaDB or MySQL server, multiplexes
//! them across callers through named connection pools, and executes SQL
//! through a cursor that picks the text or binary wire protocol per
//! statement. The wire protocol itself lives behind the
//! [`NativeSession`](mariner_core::NativeSession) capability trait and is
//! supplied by a session connector, so the whole layer runs unchanged
//! against test doubles.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mariner::{ConnectConfig, Params, PoolOptions, Value, connect};
//!
//! let config = ConnectConfig::new()
//!     .host("db.example.com")
//!     .user("app")
//!     .password("secret")
//!     .database("inventory");
//!
//! // pooled: the pool "app_pool" is created and filled on first use
//! let conn = connect(config, Some(PoolOptions::new("app_pool").size(4)), connector)?;
//!
//! let mut cursor = conn.cursor();
//! cursor.execute("SELECT name FROM parts WHERE id=?", [Value::Int(7)])?;
//! while let Some(row) = cursor.fetchone()? {
//!     println!("{:?}", row);
//! }
//!
//! // returns the connection to its pool
//! conn.close()?;
//! ```
//!
//! # Transactions
//!
//! Plain transactions use [`Connection::commit`] and
//! [`Connection::rollback`]. Distributed transactions go through the XA
//! (`tpc_*`) family: `tpc_begin` / `tpc_prepare` / `tpc_commit`, with
//! single-phase commit when `tpc_commit` is called before `tpc_prepare`.

pub mod connection;
pub mod cursor;
pub mod pool;
pub mod statement;
pub mod testing;

pub use mariner_core::{
    ColumnDesc, ColumnInfo, ConnectConfig, Error, ExecReply, NativeSession, PoolOptions, Result,
    Row, SessionCapabilities, SessionConnector, SslConfig, TypeCode, Value,
};

pub use connection::{Connection, ConverterFn, TpcState, Xid};
pub use cursor::{Cursor, CursorOptions, ProtocolMode, ResultShape, ScrollMode, ShapedRow};
pub use pool::{ConnectionPool, PoolRegistry, connect};
pub use statement::{ParamStyle, Params, ParsedStatement};
