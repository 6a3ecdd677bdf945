//! Scripted test doubles for the native-session seam.
//!
//! [`MockSession`] implements [`NativeSession`] against an in-memory
//! script of result sets, and [`MockConnector`] opens such sessions for
//! pool and connection tests. Every created session stays inspectable
//! through its [`MockHandle`]: executed SQL, bound parameters, call
//! counters and failure injection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use mariner_core::{
    ColumnDesc, ConnectConfig, Error, ExecReply, NativeSession, Result, SessionCapabilities,
    SessionConnector, StatementId, TypeCode, Value,
};

/// One scripted result set: metadata plus rows.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Column metadata; empty means a no-result statement
    pub columns: Vec<ColumnDesc>,
    /// Rows returned for this set
    pub rows: Vec<Vec<Value>>,
    /// Affected-row count to report
    pub affected_rows: u64,
    /// Last-insert id to report
    pub last_insert_id: u64,
    /// Warning count to report
    pub warnings: u16,
}

/// Build a result set from column names and rows, inferring type codes
/// from the first row.
pub fn result_set(names: &[&str], rows: Vec<Vec<Value>>) -> ResultSet {
    let columns = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let type_code = rows
                .first()
                .and_then(|row| row.get(i))
                .map_or(TypeCode::VarString, type_code_for);
            ColumnDesc::new(*name, type_code)
        })
        .collect();
    ResultSet {
        columns,
        rows,
        ..ResultSet::default()
    }
}

/// Build a no-result reply with an affected-row count.
pub fn ok_reply(affected: u64) -> ResultSet {
    ResultSet {
        affected_rows: affected,
        ..ResultSet::default()
    }
}

fn type_code_for(value: &Value) -> TypeCode {
    match value {
        Value::TinyInt(_) | Value::Bool(_) => TypeCode::Tiny,
        Value::SmallInt(_) => TypeCode::Short,
        Value::Int(_) => TypeCode::Long,
        Value::BigInt(_) | Value::UBigInt(_) => TypeCode::LongLong,
        Value::Float(_) => TypeCode::Float,
        Value::Double(_) => TypeCode::Double,
        Value::Decimal(_) => TypeCode::NewDecimal,
        Value::Bytes(_) => TypeCode::Blob,
        Value::Date(_) => TypeCode::Date,
        Value::Time(_) => TypeCode::Time,
        Value::DateTime(_) => TypeCode::DateTime,
        Value::Json(_) => TypeCode::Json,
        _ => TypeCode::VarString,
    }
}

#[derive(Default)]
struct MockState {
    /// Each entry is one statement's response: one or more result sets
    script: VecDeque<Vec<ResultSet>>,
    current_rows: VecDeque<Vec<Value>>,
    pending_sets: VecDeque<ResultSet>,

    executed: Vec<String>,
    params_log: Vec<Vec<Value>>,
    inserted_rows: Vec<Vec<Value>>,
    statements: HashMap<StatementId, String>,
    next_statement_id: StatementId,

    prepare_count: usize,
    execute_count: usize,
    bulk_count: usize,
    ping_count: usize,
    reset_count: usize,
    close_count: usize,

    fail_next_execute: Option<String>,
    fail_ping: bool,
    fail_reset: bool,
    bulk_support: bool,
    server_version: String,
    closed: bool,
}

impl MockState {
    fn take_reply(&mut self, default_affected: u64) -> Result<ExecReply> {
        if let Some(message) = self.fail_next_execute.take() {
            return Err(Error::operational(message));
        }
        let mut sets = self
            .script
            .pop_front()
            .unwrap_or_else(|| vec![ok_reply(default_affected)]);
        let first = if sets.is_empty() {
            ok_reply(default_affected)
        } else {
            sets.remove(0)
        };
        self.current_rows = first.rows.clone().into();
        self.pending_sets = sets.into();
        Ok(ExecReply {
            columns: first.columns,
            affected_rows: first.affected_rows,
            last_insert_id: first.last_insert_id,
            warnings: first.warnings,
        })
    }
}

/// A scripted native session.
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
}

/// Inspection and scripting handle for a [`MockSession`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    /// Create a session and its inspection handle.
    pub fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            bulk_support: true,
            server_version: "10.11.6-MariaDB".to_string(),
            ..MockState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new().0
    }
}

fn lock(state: &Arc<Mutex<MockState>>) -> std::sync::MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockHandle {
    /// Queue a single result set for the next statement.
    pub fn push_result(&self, set: ResultSet) {
        lock(&self.state).script.push_back(vec![set]);
    }

    /// Queue a multi-result response for the next statement.
    pub fn push_results(&self, sets: Vec<ResultSet>) {
        lock(&self.state).script.push_back(sets);
    }

    /// Make the next execute (text, prepared or bulk) fail.
    pub fn fail_next_execute(&self, message: impl Into<String>) {
        lock(&self.state).fail_next_execute = Some(message.into());
    }

    /// Make every subsequent ping fail or succeed.
    pub fn set_ping_failure(&self, fail: bool) {
        lock(&self.state).fail_ping = fail;
    }

    /// Make every subsequent reset fail or succeed.
    pub fn set_reset_failure(&self, fail: bool) {
        lock(&self.state).fail_reset = fail;
    }

    /// Toggle the bulk-operations capability.
    pub fn set_bulk_support(&self, enabled: bool) {
        lock(&self.state).bulk_support = enabled;
    }

    /// Set the reported server version.
    pub fn set_server_version(&self, version: impl Into<String>) {
        lock(&self.state).server_version = version.into();
    }

    /// All SQL text executed through the text protocol, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state).executed.clone()
    }

    /// Parameters bound by the most recent prepared execution.
    pub fn last_params(&self) -> Option<Vec<Value>> {
        lock(&self.state).params_log.last().cloned()
    }

    /// Every parameter row received through prepared or bulk execution.
    pub fn inserted_rows(&self) -> Vec<Vec<Value>> {
        lock(&self.state).inserted_rows.clone()
    }

    /// Number of `prepare` calls.
    pub fn prepare_count(&self) -> usize {
        lock(&self.state).prepare_count
    }

    /// Number of statement executions (text + prepared).
    pub fn execute_count(&self) -> usize {
        lock(&self.state).execute_count
    }

    /// Number of bulk executions.
    pub fn bulk_count(&self) -> usize {
        lock(&self.state).bulk_count
    }

    /// Number of pings received.
    pub fn ping_count(&self) -> usize {
        lock(&self.state).ping_count
    }

    /// Number of resets received.
    pub fn reset_count(&self) -> usize {
        lock(&self.state).reset_count
    }

    /// Number of close calls received.
    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }

    /// Whether the session was closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

impl NativeSession for MockSession {
    fn execute_text(&mut self, sql: &str) -> Result<ExecReply> {
        let mut state = lock(&self.state);
        state.executed.push(sql.to_string());
        state.execute_count += 1;
        state.take_reply(0)
    }

    fn prepare(&mut self, sql: &str) -> Result<StatementId> {
        let mut state = lock(&self.state);
        state.prepare_count += 1;
        state.next_statement_id += 1;
        let id = state.next_statement_id;
        state.statements.insert(id, sql.to_string());
        Ok(id)
    }

    fn execute_prepared(&mut self, statement: StatementId, params: &[Value]) -> Result<ExecReply> {
        let mut state = lock(&self.state);
        if let Some(sql) = state.statements.get(&statement).cloned() {
            state.executed.push(sql);
        }
        state.execute_count += 1;
        state.params_log.push(params.to_vec());
        state.inserted_rows.push(params.to_vec());
        state.take_reply(1)
    }

    fn execute_bulk(&mut self, statement: StatementId, rows: &[Vec<Value>]) -> Result<ExecReply> {
        let mut state = lock(&self.state);
        if !state.bulk_support {
            return Err(Error::operational("bulk operations not supported"));
        }
        if let Some(sql) = state.statements.get(&statement).cloned() {
            state.executed.push(sql);
        }
        state.bulk_count += 1;
        for row in rows {
            state.inserted_rows.push(row.clone());
        }
        state.take_reply(rows.len() as u64)
    }

    fn fetch_row(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(lock(&self.state).current_rows.pop_front())
    }

    fn next_result(&mut self) -> Result<Option<ExecReply>> {
        let mut state = lock(&self.state);
        match state.pending_sets.pop_front() {
            Some(set) => {
                state.current_rows = set.rows.clone().into();
                Ok(Some(ExecReply {
                    columns: set.columns,
                    affected_rows: set.affected_rows,
                    last_insert_id: set.last_insert_id,
                    warnings: set.warnings,
                }))
            }
            None => Ok(None),
        }
    }

    fn ping(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.ping_count += 1;
        if state.fail_ping {
            return Err(Error::operational("server has gone away"));
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.reset_count += 1;
        if state.fail_reset {
            return Err(Error::operational("reset failed"));
        }
        state.current_rows.clear();
        state.pending_sets.clear();
        Ok(())
    }

    fn escape_string(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for ch in input.chars() {
            match ch {
                '\'' => out.push_str("''"),
                '\\' => out.push_str("\\\\"),
                '\0' => out.push_str("\\0"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\x1a' => out.push_str("\\Z"),
                _ => out.push(ch),
            }
        }
        out
    }

    fn capabilities(&self) -> SessionCapabilities {
        SessionCapabilities {
            bulk_operations: lock(&self.state).bulk_support,
            multi_statements: true,
        }
    }

    fn server_version(&self) -> String {
        lock(&self.state).server_version.clone()
    }

    fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.close_count += 1;
        state.closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct ConnectorState {
    handles: Vec<MockHandle>,
    created: usize,
    fail_after: Option<usize>,
    bulk_support: bool,
}

/// A [`SessionConnector`] producing [`MockSession`]s.
pub struct MockConnector {
    state: Mutex<ConnectorState>,
}

impl MockConnector {
    /// Create a connector whose sessions support bulk operations.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectorState {
                bulk_support: true,
                ..ConnectorState::default()
            }),
        }
    }

    /// Fail every connect attempt after `n` successful ones.
    pub fn fail_after(&self, n: usize) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_after = Some(n);
    }

    /// Handles of every session opened so far, in creation order.
    pub fn sessions(&self) -> Vec<MockHandle> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handles
            .clone()
    }

    /// Number of sessions opened so far.
    pub fn created(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .created
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConnector for MockConnector {
    fn connect(&self, _config: &ConnectConfig) -> Result<Box<dyn NativeSession>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(limit) = state.fail_after {
            if state.created >= limit {
                return Err(Error::operational("connection refused"));
            }
        }
        state.created += 1;
        let (session, handle) = MockSession::new();
        handle.set_bulk_support(state.bulk_support);
        state.handles.push(handle);
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_results_flow_in_order() {
        let (mut session, handle) = MockSession::new();
        handle.push_result(result_set(&["n"], vec![vec![Value::Int(1)]]));

        let reply = session.execute_text("SELECT n FROM t").unwrap();
        assert_eq!(reply.columns.len(), 1);
        assert_eq!(session.fetch_row().unwrap(), Some(vec![Value::Int(1)]));
        assert_eq!(session.fetch_row().unwrap(), None);
        assert_eq!(handle.execute_count(), 1);
    }

    #[test]
    fn connector_fail_after() {
        let connector = MockConnector::new();
        connector.fail_after(2);
        let config = ConnectConfig::default();
        assert!(connector.connect(&config).is_ok());
        assert!(connector.connect(&config).is_ok());
        assert!(connector.connect(&config).is_err());
        assert_eq!(connector.created(), 2);
        assert_eq!(connector.sessions().len(), 2);
    }
}
