//! Database connections.
//!
//! A [`Connection`] owns exactly one native session and layers autocommit
//! bookkeeping, per-type result converters and the XA/TPC transaction state
//! machine on top of it. Cursors borrow the connection and serialize their
//! statement traffic through its session lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use mariner_core::{
    ConnectConfig, Error, ExecReply, NativeSession, Result, SessionConnector, TypeCode, Value,
};

use crate::cursor::{Cursor, CursorOptions};
use crate::pool::ConnectionPool;
use crate::statement::Params;

/// Maximum length of a TPC transaction id component, in bytes.
pub const MAX_XID_SIZE: usize = 64;

/// A per-type conversion applied to fetched column values.
pub type ConverterFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// TPC transaction state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpcState {
    /// No TPC transaction is active
    None,
    /// `XA BEGIN` has been issued
    Xid,
    /// `XA PREPARE` has been issued
    Prepare,
}

/// A transaction id for the `tpc_*` family of methods.
///
/// Construct through [`Connection::xid`], which validates component
/// lengths and defaults a zero format id to 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xid {
    format_id: u32,
    transaction_id: String,
    branch_qualifier: String,
}

impl Xid {
    pub(crate) fn new(
        format_id: u32,
        transaction_id: impl Into<String>,
        branch_qualifier: impl Into<String>,
    ) -> Result<Self> {
        let transaction_id = transaction_id.into();
        let branch_qualifier = branch_qualifier.into();
        if transaction_id.len() > MAX_XID_SIZE {
            return Err(Error::programming(
                "Maximum length of transaction_id exceeded",
            ));
        }
        if branch_qualifier.len() > MAX_XID_SIZE {
            return Err(Error::programming(
                "Maximum length of branch_qualifier exceeded",
            ));
        }
        Ok(Self {
            format_id: if format_id == 0 { 1 } else { format_id },
            transaction_id,
            branch_qualifier,
        })
    }

    /// Format id of this transaction.
    pub fn format_id(&self) -> u32 {
        self.format_id
    }

    /// Global transaction id component.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Branch qualifier component.
    pub fn branch_qualifier(&self) -> &str {
        &self.branch_qualifier
    }
}

impl fmt::Display for Xid {
    /// Renders the XA command argument form: `'gtrid','bqual',formatId`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}','{}',{}",
            self.transaction_id, self.branch_qualifier, self.format_id
        )
    }
}

struct TpcContext {
    state: TpcState,
    xid: Option<Xid>,
}

impl TpcContext {
    /// A failed XA step leaves no client-side transaction identity behind.
    fn reset(&mut self) {
        self.state = TpcState::None;
        self.xid = None;
    }
}

/// A connection to the database server.
///
/// Wraps one native session. Multiple cursors may share a connection, but
/// they must not interleave statement execution mid-result; the session
/// lock serializes individual protocol exchanges only.
pub struct Connection {
    session: Mutex<Box<dyn NativeSession>>,
    autocommit: AtomicBool,
    converters: Mutex<HashMap<TypeCode, ConverterFn>>,
    tpc: Mutex<TpcContext>,
    pool: Mutex<Option<Weak<ConnectionPool>>>,
    closed: AtomicBool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("autocommit", &self.autocommit.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a connection through the given session connector.
    ///
    /// Runs the configured `init_command` and establishes the requested
    /// autocommit mode before returning.
    pub fn connect(connector: &dyn SessionConnector, config: &ConnectConfig) -> Result<Self> {
        let session = connector.connect(config)?;
        let conn = Self {
            session: Mutex::new(session),
            autocommit: AtomicBool::new(false),
            converters: Mutex::new(HashMap::new()),
            tpc: Mutex::new(TpcContext {
                state: TpcState::None,
                xid: None,
            }),
            pool: Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        if let Some(init) = &config.init_command {
            conn.execute_command(init)?;
        }
        if let Some(mode) = config.autocommit {
            conn.set_autocommit(mode)?;
        }
        Ok(conn)
    }

    /// Wrap an already-open native session.
    pub fn from_session(session: Box<dyn NativeSession>) -> Self {
        Self {
            session: Mutex::new(session),
            autocommit: AtomicBool::new(false),
            converters: Mutex::new(HashMap::new()),
            tpc: Mutex::new(TpcContext {
                state: TpcState::None,
                xid: None,
            }),
            pool: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, Box<dyn NativeSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tpc(&self) -> MutexGuard<'_, TpcContext> {
        self.tpc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::interface("connection is closed"));
        }
        Ok(())
    }

    /// Execute a plain command statement on the session.
    pub(crate) fn execute_command(&self, sql: &str) -> Result<ExecReply> {
        self.ensure_open()?;
        self.session().execute_text(sql)
    }

    /// Create a cursor with default options.
    pub fn cursor(&self) -> Cursor<'_> {
        self.cursor_with(CursorOptions::default())
    }

    /// Create a cursor with the given options.
    pub fn cursor_with(&self, options: CursorOptions) -> Cursor<'_> {
        Cursor::new(self, options)
    }

    /// Commit the current transaction.
    ///
    /// Not allowed while a TPC transaction is active.
    pub fn commit(&self) -> Result<()> {
        let tpc = self.tpc();
        if tpc.state != TpcState::None {
            return Err(Error::programming(
                "commit() is not allowed if a TPC transaction is active",
            ));
        }
        self.execute_command("COMMIT").map(drop)
    }

    /// Roll back the current transaction.
    ///
    /// Not allowed while a TPC transaction is active.
    pub fn rollback(&self) -> Result<()> {
        let tpc = self.tpc();
        if tpc.state != TpcState::None {
            return Err(Error::programming(
                "rollback() is not allowed if a TPC transaction is active",
            ));
        }
        self.execute_command("ROLLBACK").map(drop)
    }

    /// Current autocommit mode.
    pub fn autocommit(&self) -> bool {
        self.autocommit.load(Ordering::SeqCst)
    }

    /// Change the autocommit mode, issuing `SET AUTOCOMMIT` when it
    /// actually changes.
    pub fn set_autocommit(&self, mode: bool) -> Result<()> {
        if mode == self.autocommit() {
            return Ok(());
        }
        self.execute_command(&format!("SET AUTOCOMMIT={}", u8::from(mode)))?;
        self.autocommit.store(mode, Ordering::SeqCst);
        Ok(())
    }

    /// Register a converter applied to fetched values of the given column
    /// type.
    pub fn register_converter(&self, type_code: TypeCode, converter: ConverterFn) {
        self.converters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_code, converter);
    }

    pub(crate) fn converter_for(&self, type_code: TypeCode) -> Option<ConverterFn> {
        self.converters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_code)
            .cloned()
    }

    /// Escape a string using the session's active character set.
    pub fn escape_string(&self, input: &str) -> String {
        self.session().escape_string(input)
    }

    /// Check server liveness.
    pub fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        self.session().ping()
    }

    /// Reset the session state.
    pub fn reset(&self) -> Result<()> {
        self.ensure_open()?;
        self.session().reset()
    }

    /// Terminate the server thread with the given id.
    pub fn kill(&self, thread_id: u64) -> Result<()> {
        self.execute_command(&format!("KILL {}", thread_id)).map(drop)
    }

    /// Server version string as reported at handshake.
    pub fn server_version(&self) -> String {
        self.session().server_version()
    }

    /// Server version as a `(major, minor, patch)` triple.
    pub fn server_version_info(&self) -> (u32, u32, u32) {
        let version = self.server_version();
        let mut parts = version
            .split(|c: char| !c.is_ascii_digit())
            .filter_map(|p| p.parse::<u32>().ok());
        (
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        )
    }

    /// Create a transaction id for the `tpc_*` methods.
    pub fn xid(
        &self,
        format_id: u32,
        transaction_id: impl Into<String>,
        branch_qualifier: impl Into<String>,
    ) -> Result<Xid> {
        Xid::new(format_id, transaction_id, branch_qualifier)
    }

    /// Current TPC state.
    pub fn tpc_state(&self) -> TpcState {
        self.tpc().state
    }

    /// Begin a TPC transaction with the given transaction id.
    ///
    /// Must be called outside of any transaction. While the TPC
    /// transaction is active, `commit()` and `rollback()` are rejected.
    pub fn tpc_begin(&self, xid: Xid) -> Result<()> {
        let mut tpc = self.tpc();
        if tpc.state != TpcState::None {
            return Err(Error::programming(
                "tpc_begin() is not allowed if a TPC transaction is active",
            ));
        }
        self.execute_command(&format!("XA BEGIN {}", xid))?;
        tracing::debug!(xid = %xid, "TPC transaction started");
        tpc.state = TpcState::Xid;
        tpc.xid = Some(xid);
        Ok(())
    }

    /// Perform the first commit phase of the active TPC transaction.
    ///
    /// A failure at either XA step clears the client-side transaction
    /// state; the caller must treat the server-side outcome as unknown.
    pub fn tpc_prepare(&self) -> Result<()> {
        let mut tpc = self.tpc();
        match tpc.state {
            TpcState::None => return Err(Error::programming("Transaction not started")),
            TpcState::Prepare => {
                return Err(Error::programming(
                    "Transaction is already in prepared state",
                ));
            }
            TpcState::Xid => {}
        }
        let xid = match tpc.xid.clone() {
            Some(xid) => xid,
            None => return Err(Error::programming("Transaction not started")),
        };
        for stmt in [format!("XA END {}", xid), format!("XA PREPARE {}", xid)] {
            if let Err(err) = self.execute_command(&stmt) {
                tracing::warn!(xid = %xid, error = %err, "TPC prepare failed, clearing state");
                tpc.reset();
                return Err(err);
            }
        }
        tpc.state = TpcState::Prepare;
        Ok(())
    }

    /// Commit a TPC transaction.
    ///
    /// Without an explicit `xid` the stored one is used. When the
    /// transaction has not been prepared yet, a single-phase
    /// `XA COMMIT ... ONE PHASE` is issued after ending the branch.
    /// The client-side state is cleared whether the commit succeeds or
    /// fails.
    pub fn tpc_commit(&self, xid: Option<Xid>) -> Result<()> {
        self.tpc_finish(xid, "COMMIT")
    }

    /// Roll back a TPC transaction; symmetric to [`Connection::tpc_commit`].
    pub fn tpc_rollback(&self, xid: Option<Xid>) -> Result<()> {
        self.tpc_finish(xid, "ROLLBACK")
    }

    fn tpc_finish(&self, xid: Option<Xid>, action: &str) -> Result<()> {
        let mut tpc = self.tpc();
        if tpc.state == TpcState::None {
            return Err(Error::programming("Transaction not started"));
        }
        let xid = match xid.or_else(|| tpc.xid.clone()) {
            Some(xid) => xid,
            None => return Err(Error::programming("Transaction is not prepared")),
        };
        let one_phase = tpc.state != TpcState::Prepare;
        if one_phase {
            if let Err(err) = self.execute_command(&format!("XA END {}", xid)) {
                tracing::warn!(xid = %xid, error = %err, "XA END failed, clearing state");
                tpc.reset();
                return Err(err);
            }
        }
        let stmt = if action == "COMMIT" && one_phase {
            format!("XA COMMIT {} ONE PHASE", xid)
        } else {
            format!("XA {} {}", action, xid)
        };
        let result = self.execute_command(&stmt);
        if let Err(err) = &result {
            tracing::warn!(xid = %xid, error = %err, "TPC completion failed, clearing state");
        } else {
            tracing::debug!(xid = %xid, action, "TPC transaction finished");
        }
        tpc.reset();
        result.map(drop)
    }

    /// List transactions in prepared state, as reported by `XA RECOVER`.
    ///
    /// Does not alter the connection's TPC state.
    pub fn tpc_recover(&self) -> Result<Vec<Vec<Value>>> {
        let mut cursor = self.cursor();
        cursor.execute("XA RECOVER", Params::None)?;
        let mut pending = Vec::new();
        while let Some(row) = cursor.fetchone()? {
            pending.push(row.into_values());
        }
        Ok(pending)
    }

    /// Close the connection.
    ///
    /// A pooled connection is returned to its pool instead of being
    /// closed; an unpooled connection closes its native session.
    pub fn close(&self) -> Result<()> {
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(pool) = pool.and_then(|weak| weak.upgrade()) {
            return pool.release(self);
        }
        self.really_close()
    }

    /// Close the native session regardless of pooling.
    pub(crate) fn really_close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.session().close()
    }

    /// Whether the native session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn attach_pool(&self, pool: &Arc<ConnectionPool>) {
        *self.pool.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(pool));
    }

    pub(crate) fn detach_pool(&self) {
        *self.pool.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSession;

    fn connection() -> (Connection, crate::testing::MockHandle) {
        let (session, handle) = MockSession::new();
        (Connection::from_session(Box::new(session)), handle)
    }

    #[test]
    fn xid_validation() {
        let (conn, _) = connection();
        let xid = conn.xid(0, "gtrid", "bqual").unwrap();
        assert_eq!(xid.format_id(), 1);
        assert_eq!(format!("{}", xid), "'gtrid','bqual',1");

        let too_long = "x".repeat(MAX_XID_SIZE + 1);
        assert!(conn.xid(1, too_long.clone(), "b").is_err());
        assert!(conn.xid(1, "a", too_long).is_err());
    }

    #[test]
    fn commit_rejected_during_tpc() {
        let (conn, _) = connection();
        let xid = conn.xid(1, "t1", "b1").unwrap();
        conn.tpc_begin(xid).unwrap();

        assert!(matches!(conn.commit(), Err(Error::Programming(_))));
        assert!(matches!(conn.rollback(), Err(Error::Programming(_))));

        conn.tpc_rollback(None).unwrap();
        assert_eq!(conn.tpc_state(), TpcState::None);
        conn.commit().unwrap();
    }

    #[test]
    fn tpc_one_phase_commit_commands() {
        let (conn, handle) = connection();
        let xid = conn.xid(1, "t1", "b1").unwrap();
        conn.tpc_begin(xid).unwrap();
        assert_eq!(conn.tpc_state(), TpcState::Xid);

        conn.tpc_commit(None).unwrap();
        assert_eq!(conn.tpc_state(), TpcState::None);

        let log = handle.executed();
        assert_eq!(log[0], "XA BEGIN 't1','b1',1");
        assert_eq!(log[1], "XA END 't1','b1',1");
        assert_eq!(log[2], "XA COMMIT 't1','b1',1 ONE PHASE");
    }

    #[test]
    fn tpc_two_phase_commit_commands() {
        let (conn, handle) = connection();
        let xid = conn.xid(1, "t2", "b2").unwrap();
        conn.tpc_begin(xid).unwrap();
        conn.tpc_prepare().unwrap();
        assert_eq!(conn.tpc_state(), TpcState::Prepare);

        // preparing twice is an error
        assert!(matches!(conn.tpc_prepare(), Err(Error::Programming(_))));

        conn.tpc_commit(None).unwrap();
        let log = handle.executed();
        assert_eq!(
            log,
            vec![
                "XA BEGIN 't2','b2',1".to_string(),
                "XA END 't2','b2',1".to_string(),
                "XA PREPARE 't2','b2',1".to_string(),
                "XA COMMIT 't2','b2',1".to_string(),
            ]
        );
    }

    #[test]
    fn tpc_step_failure_resets_state() {
        let (conn, handle) = connection();
        let xid = conn.xid(1, "t3", "b3").unwrap();
        conn.tpc_begin(xid).unwrap();

        handle.fail_next_execute("server exploded");
        assert!(conn.tpc_prepare().is_err());
        assert_eq!(conn.tpc_state(), TpcState::None);

        // the stored xid is gone too
        assert!(matches!(conn.tpc_commit(None), Err(Error::Programming(_))));
    }

    #[test]
    fn tpc_methods_require_active_transaction() {
        let (conn, _) = connection();
        assert!(matches!(conn.tpc_prepare(), Err(Error::Programming(_))));
        assert!(matches!(conn.tpc_commit(None), Err(Error::Programming(_))));
        assert!(matches!(
            conn.tpc_rollback(None),
            Err(Error::Programming(_))
        ));
    }

    #[test]
    fn tpc_begin_rejected_while_active() {
        let (conn, _) = connection();
        let xid = conn.xid(1, "t4", "b4").unwrap();
        conn.tpc_begin(xid.clone()).unwrap();
        assert!(matches!(conn.tpc_begin(xid), Err(Error::Programming(_))));
    }

    #[test]
    fn autocommit_issues_command_once() {
        let (conn, handle) = connection();
        assert!(!conn.autocommit());
        conn.set_autocommit(true).unwrap();
        conn.set_autocommit(true).unwrap();
        assert!(conn.autocommit());
        let log = handle.executed();
        assert_eq!(log, vec!["SET AUTOCOMMIT=1".to_string()]);
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, handle) = connection();
        conn.close().unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
        assert_eq!(handle.close_count(), 1);
        assert!(matches!(conn.ping(), Err(Error::Interface(_))));
    }

    #[test]
    fn server_version_info_parses_triple() {
        let (conn, handle) = connection();
        handle.set_server_version("10.6.14-MariaDB");
        assert_eq!(conn.server_version_info(), (10, 6, 14));
    }
}
