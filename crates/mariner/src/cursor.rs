//! Cursors and the statement-execution engine.
//!
//! A cursor drives one statement at a time over its connection's native
//! session: it scans and caches the statement, validates the supplied
//! parameters before any I/O, picks the text or binary protocol, and
//! exposes the DB-API fetch surface over the open result set. Buffered
//! cursors slurp the whole result set at execute time, which enables
//! `scroll()` and an exact `rowcount`.

use std::collections::HashMap;
use std::sync::Arc;

use mariner_core::{ColumnDesc, ColumnInfo, Error, ExecReply, Result, Row, StatementId, Value};

use crate::connection::Connection;
use crate::statement::{self, Params, ParsedStatement};

/// How fetched rows are presented to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultShape {
    /// Plain values in column order
    #[default]
    Tuple,
    /// A [`Row`] with name-based access
    Named,
    /// A map keyed by column name
    Dictionary,
}

/// Wire protocol used for the last execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolMode {
    /// `COM_QUERY` with client-side parameter substitution
    #[default]
    Text,
    /// Server-side prepare with out-of-band parameters
    Binary,
}

/// Addressing mode for [`Cursor::scroll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollMode {
    /// Offset from the current row number
    Relative,
    /// Absolute row number
    Absolute,
}

/// Options fixed at cursor creation.
#[derive(Debug, Clone)]
pub struct CursorOptions {
    /// Result shape for fetched rows
    pub result_shape: ResultShape,
    /// Buffer whole result sets client-side
    pub buffered: bool,
    /// Keep the server-side prepared statement across executions
    pub prepared: bool,
    /// Protocol override: `Some(true)` forces binary, `Some(false)`
    /// forces text, `None` selects automatically
    pub binary: Option<bool>,
    /// Default row count for `fetchmany`
    pub array_size: usize,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            result_shape: ResultShape::Tuple,
            buffered: false,
            prepared: false,
            binary: None,
            array_size: 1,
        }
    }
}

impl CursorOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result shape.
    pub fn result_shape(mut self, shape: ResultShape) -> Self {
        self.result_shape = shape;
        self
    }

    /// Enable client-side result buffering.
    pub fn buffered(mut self, enabled: bool) -> Self {
        self.buffered = enabled;
        self
    }

    /// Keep the prepared statement across executions.
    pub fn prepared(mut self, enabled: bool) -> Self {
        self.prepared = enabled;
        self
    }

    /// Force the text (`Some(false)`) or binary (`Some(true)`) protocol.
    pub fn binary(mut self, enabled: bool) -> Self {
        self.binary = Some(enabled);
        self
    }

    /// Set the default `fetchmany` row count.
    pub fn array_size(mut self, size: usize) -> Self {
        self.array_size = size;
        self
    }
}

/// A fetched row in the shape selected at cursor creation.
#[derive(Debug, Clone)]
pub enum ShapedRow {
    /// Values in column order
    Tuple(Vec<Value>),
    /// Row with name-based access
    Named(Row),
    /// Values keyed by column name
    Dictionary(HashMap<String, Value>),
}

impl ShapedRow {
    /// Consume the row, returning its values.
    ///
    /// Dictionary rows yield their values in arbitrary order.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            ShapedRow::Tuple(values) => values,
            ShapedRow::Named(row) => row.into_values(),
            ShapedRow::Dictionary(map) => map.into_values().collect(),
        }
    }

    /// Get a value by column index (tuple and named shapes).
    pub fn get(&self, index: usize) -> Option<&Value> {
        match self {
            ShapedRow::Tuple(values) => values.get(index),
            ShapedRow::Named(row) => row.get(index),
            ShapedRow::Dictionary(_) => None,
        }
    }
}

/// A cursor over one connection.
///
/// Cursors are cheap; a connection can hand out many, but statement
/// execution on one connection must not interleave mid-result.
pub struct Cursor<'conn> {
    conn: &'conn Connection,
    shape: ResultShape,
    buffered: bool,
    prepared: bool,
    binary: Option<bool>,
    array_size: usize,

    parsed: Option<ParsedStatement>,
    prev_statement: Option<String>,
    statement_id: Option<StatementId>,
    protocol: ProtocolMode,

    description: Vec<ColumnDesc>,
    column_info: Option<Arc<ColumnInfo>>,
    rows: Option<Vec<Vec<Value>>>,
    row_number: usize,
    fetched: u64,

    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    closed: bool,
    parse_count: usize,
}

impl<'conn> Cursor<'conn> {
    pub(crate) fn new(conn: &'conn Connection, options: CursorOptions) -> Self {
        Self {
            conn,
            shape: options.result_shape,
            buffered: options.buffered,
            prepared: options.prepared,
            binary: options.binary,
            array_size: options.array_size.max(1),
            parsed: None,
            prev_statement: None,
            statement_id: None,
            protocol: ProtocolMode::Text,
            description: Vec::new(),
            column_info: None,
            rows: None,
            row_number: 0,
            fetched: 0,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            closed: false,
            parse_count: 0,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::interface("cursor is closed"));
        }
        Ok(())
    }

    /// Re-scan only when the statement text changed since the last
    /// execution; a re-scan invalidates the prepared-statement handle.
    fn prepare_statement(&mut self, statement: &str) -> Result<bool> {
        let changed = self.prev_statement.as_deref() != Some(statement);
        if changed {
            self.parsed = Some(statement::parse(statement)?);
            self.parse_count += 1;
            self.prev_statement = Some(statement.to_string());
            self.statement_id = None;
        }
        Ok(changed)
    }

    /// Drain an unbuffered result set left open by a previous execution.
    fn discard_pending(&mut self) -> Result<()> {
        if !self.description.is_empty() && self.rows.is_none() {
            let mut session = self.conn.session();
            while session.fetch_row()?.is_some() {}
        }
        self.description.clear();
        self.column_info = None;
        self.rows = None;
        Ok(())
    }

    fn apply_reply(&mut self, reply: ExecReply) -> Result<()> {
        self.description = reply.columns;
        self.affected_rows = reply.affected_rows;
        self.last_insert_id = reply.last_insert_id;
        self.warnings = reply.warnings;
        self.column_info = None;
        self.rows = None;
        self.row_number = 0;
        self.fetched = 0;
        if self.buffered && !self.description.is_empty() {
            let mut rows = Vec::new();
            let mut session = self.conn.session();
            while let Some(row) = session.fetch_row()? {
                rows.push(row);
            }
            self.rows = Some(rows);
        }
        Ok(())
    }

    /// Execute a statement.
    ///
    /// Parameterless statements that are not procedure calls run over the
    /// text protocol; everything else is prepared and executed in binary
    /// mode, unless the cursor's protocol override says otherwise.
    pub fn execute(&mut self, statement: &str, params: impl Into<Params>) -> Result<()> {
        let params = params.into();
        self.ensure_open()?;
        self.conn.ensure_open()?;
        self.discard_pending()?;
        let changed = self.prepare_statement(statement)?;

        let parsed = match &self.parsed {
            Some(parsed) => parsed,
            None => return Err(Error::programming("empty statement")),
        };
        let ordered = statement::ordered_values(parsed, &params)?;

        let text_mode = match self.binary {
            Some(true) => false,
            Some(false) => true,
            None => parsed.param_count() == 0 && !parsed.is_call(),
        };

        let reply = {
            let mut session = self.conn.session();
            if text_mode {
                self.protocol = ProtocolMode::Text;
                let sql = if ordered.is_empty() {
                    parsed.text().to_string()
                } else {
                    statement::substitute_text(parsed, &ordered, |s| session.escape_string(s))
                };
                session.execute_text(&sql)?
            } else {
                self.protocol = ProtocolMode::Binary;
                let id = match self.statement_id {
                    Some(id) if self.prepared && !changed => id,
                    _ => session.prepare(parsed.text())?,
                };
                self.statement_id = Some(id);
                session.execute_prepared(id, &ordered)?
            }
        };
        self.apply_reply(reply)
    }

    /// Execute a statement once per parameter row.
    ///
    /// When the server advertises bulk operations the whole row set goes
    /// out in a single round trip; otherwise execution degrades to a
    /// per-row loop with the same observable effect.
    pub fn executemany<I>(&mut self, statement: &str, rows: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        self.ensure_open()?;
        self.conn.ensure_open()?;
        let rows: Vec<Params> = rows.into_iter().map(Into::into).collect();
        if rows.is_empty() {
            return Err(Error::programming(
                "executemany requires at least one parameter row",
            ));
        }

        self.discard_pending()?;
        let changed = self.prepare_statement(statement)?;
        let parsed = match &self.parsed {
            Some(parsed) => parsed,
            None => return Err(Error::programming("empty statement")),
        };

        // validate every row up front, before anything reaches the server
        let mut resolved = Vec::with_capacity(rows.len());
        for row in &rows {
            resolved.push(statement::ordered_values(parsed, row)?);
        }

        let bulk = self.conn.session().capabilities().bulk_operations;
        if bulk {
            let reply = {
                let mut session = self.conn.session();
                let id = match self.statement_id {
                    Some(id) if self.prepared && !changed => id,
                    _ => session.prepare(parsed.text())?,
                };
                self.statement_id = Some(id);
                session.execute_bulk(id, &resolved)?
            };
            self.protocol = ProtocolMode::Binary;
            self.apply_reply(reply)
        } else {
            tracing::debug!(
                rows = rows.len(),
                "server lacks bulk capability, executing row by row"
            );
            let mut total = 0;
            for row in rows {
                self.execute(statement, row)?;
                total += self.affected_rows;
            }
            self.affected_rows = total;
            Ok(())
        }
    }

    fn next_raw_row(&mut self) -> Result<Option<Vec<Value>>> {
        if let Some(rows) = &self.rows {
            if self.row_number < rows.len() {
                let row = rows[self.row_number].clone();
                self.row_number += 1;
                Ok(Some(row))
            } else {
                Ok(None)
            }
        } else {
            let row = self.conn.session().fetch_row()?;
            if row.is_some() {
                self.row_number += 1;
                self.fetched += 1;
            }
            Ok(row)
        }
    }

    fn shape_row(&mut self, values: Vec<Value>) -> ShapedRow {
        match self.shape {
            ResultShape::Tuple => ShapedRow::Tuple(values),
            ResultShape::Named => {
                let columns = self.column_info.get_or_insert_with(|| {
                    Arc::new(ColumnInfo::new(
                        self.description.iter().map(|c| c.name.clone()).collect(),
                    ))
                });
                ShapedRow::Named(Row::with_columns(Arc::clone(columns), values))
            }
            ResultShape::Dictionary => ShapedRow::Dictionary(
                self.description
                    .iter()
                    .map(|c| c.name.clone())
                    .zip(values)
                    .collect(),
            ),
        }
    }

    /// Fetch the next row of the open result set.
    pub fn fetchone(&mut self) -> Result<Option<ShapedRow>> {
        self.ensure_open()?;
        if self.description.is_empty() {
            return Err(Error::programming("Cursor doesn't have a result set"));
        }
        let Some(mut values) = self.next_raw_row()? else {
            return Ok(None);
        };
        for (column, value) in self.description.iter().zip(values.iter_mut()) {
            if let Some(convert) = self.conn.converter_for(column.type_code) {
                let raw = std::mem::replace(value, Value::Null);
                *value = convert(raw);
            }
        }
        Ok(Some(self.shape_row(values)))
    }

    /// Fetch up to `size` rows; without a size the cursor's `array_size`
    /// applies.
    pub fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<ShapedRow>> {
        let count = match size {
            Some(0) | None => self.array_size,
            Some(n) => n,
        };
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            match self.fetchone()? {
                Some(row) => out.push(row),
                None => break,
            }
        }
        Ok(out)
    }

    /// Fetch all remaining rows.
    pub fn fetchall(&mut self) -> Result<Vec<ShapedRow>> {
        let mut out = Vec::new();
        while let Some(row) = self.fetchone()? {
            out.push(row);
        }
        Ok(out)
    }

    /// Move the row position of a buffered result set.
    ///
    /// Relative offsets of zero and any resulting position outside the
    /// result set are data errors.
    pub fn scroll(&mut self, value: i64, mode: ScrollMode) -> Result<()> {
        self.ensure_open()?;
        if self.description.is_empty() {
            return Err(Error::programming("Cursor doesn't have a result set"));
        }
        let Some(rows) = &self.rows else {
            return Err(Error::programming(
                "scroll() is only available for cursors with a buffered result set",
            ));
        };
        if mode == ScrollMode::Relative && value == 0 {
            return Err(Error::data("Invalid position value 0"));
        }
        let position = match mode {
            ScrollMode::Relative => self.row_number as i64 + value,
            ScrollMode::Absolute => value,
        };
        if position < 0 || position >= rows.len() as i64 {
            return Err(Error::data("Position value is out of range"));
        }
        self.row_number = position as usize;
        Ok(())
    }

    /// Advance to the next result set of a multi-result statement.
    ///
    /// Returns `false` when no result set remains. Result-set metadata is
    /// refreshed on every advance.
    pub fn nextset(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if self.description.is_empty() {
            return Err(Error::programming("Cursor doesn't have a result set"));
        }
        let reply = { self.conn.session().next_result()? };
        match reply {
            Some(reply) => {
                self.apply_reply(reply)?;
                Ok(true)
            }
            None => {
                self.description.clear();
                self.column_info = None;
                self.rows = None;
                Ok(false)
            }
        }
    }

    /// Close the cursor. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if !self.description.is_empty() && self.rows.is_none() && !self.conn.is_closed() {
            // drain what the server still has queued for this statement
            let mut session = self.conn.session();
            while let Ok(Some(_)) = session.fetch_row() {}
        }
        self.closed = true;
    }

    /// Whether the cursor has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Result-set description, if a result set is open.
    pub fn description(&self) -> Option<&[ColumnDesc]> {
        if self.description.is_empty() {
            None
        } else {
            Some(&self.description)
        }
    }

    /// Number of columns in the open result set.
    pub fn field_count(&self) -> usize {
        self.description.len()
    }

    /// Row count of the last operation: buffered result-set size, rows
    /// fetched so far for unbuffered sets, affected rows otherwise.
    /// `-1` before any statement ran.
    pub fn rowcount(&self) -> i64 {
        if self.prev_statement.is_none() {
            return -1;
        }
        if !self.description.is_empty() {
            return match &self.rows {
                Some(rows) => rows.len() as i64,
                None => self.fetched as i64,
            };
        }
        self.affected_rows as i64
    }

    /// Auto-generated id of the last inserted row.
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Warning count reported for the last statement.
    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Protocol used by the last execution.
    pub fn protocol(&self) -> ProtocolMode {
        self.protocol
    }

    /// Default row count for `fetchmany`.
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Change the default row count for `fetchmany`.
    pub fn set_array_size(&mut self, size: usize) {
        self.array_size = size.max(1);
    }

    #[cfg(test)]
    pub(crate) fn parse_count(&self) -> usize {
        self.parse_count
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
