//! SQL statement scanning and client-side parameter binding.
//!
//! Statements are scanned once to locate parameter placeholders and to
//! classify their style. Scanning is a pure pass over the text: string
//! literals (single-, double- and backtick-quoted) and all three comment
//! styles are skipped, so placeholder characters inside them are left
//! untouched. `%s`/`%d` and `%(name)s` markers are normalized to `?` in the
//! stored text, matching what the server-side prepare expects.

use std::collections::HashMap;

use mariner_core::{Error, Result, Value};

/// Placeholder syntax convention used by a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `?` positional placeholders
    Qmark,
    /// `%s` / `%d` positional placeholders
    Format,
    /// `%(name)s` named placeholders
    Pyformat,
}

/// Parameter values supplied to `execute`.
#[derive(Debug, Clone, Default)]
pub enum Params {
    /// No parameters
    #[default]
    None,
    /// Ordered values for `?` / `%s` placeholders
    Positional(Vec<Value>),
    /// Named values for `%(name)s` placeholders
    Named(HashMap<String, Value>),
}

impl Params {
    /// Number of supplied values.
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
            Params::Named(values) => values.len(),
        }
    }

    /// Check if no values were supplied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<HashMap<String, Value>> for Params {
    fn from(values: HashMap<String, Value>) -> Self {
        Params::Named(values)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Params::Positional(values.to_vec())
    }
}

/// A scanned statement: normalized text, placeholder offsets and style.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    /// Statement text with every placeholder normalized to `?`
    text: String,
    /// Byte offsets of the placeholders within `text`, in order
    positions: Vec<usize>,
    /// Key per placeholder for named style (empty otherwise)
    keys: Vec<String>,
    /// Placeholder style of the statement
    style: ParamStyle,
    /// Statement invokes a stored procedure
    is_call: bool,
}

impl ParsedStatement {
    /// The normalized statement text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of placeholders found.
    pub fn param_count(&self) -> usize {
        self.positions.len()
    }

    /// Placeholder byte offsets in the normalized text.
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Placeholder style.
    pub fn style(&self) -> ParamStyle {
        self.style
    }

    /// Named-placeholder keys in placeholder order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether the statement is a stored-procedure call.
    pub fn is_call(&self) -> bool {
        self.is_call
    }
}

/// Scan a statement, locating placeholders and classifying their style.
pub fn parse(statement: &str) -> Result<ParsedStatement> {
    if statement.trim().is_empty() {
        return Err(Error::programming("empty statement"));
    }

    let bytes = statement.as_bytes();
    let mut text: Vec<u8> = Vec::with_capacity(statement.len());
    let mut positions = Vec::new();
    let mut keys: Vec<String> = Vec::new();
    let mut has_format = false;
    let mut has_named = false;
    let mut has_qmark = false;
    let mut seen_keyword = false;
    let mut is_call = false;
    let mut last: u8 = 0;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        // block comment
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let close = find_subslice(&bytes[i + 2..], b"*/").map(|p| i + 2 + p + 2);
            let end = close.unwrap_or(bytes.len());
            text.extend_from_slice(&bytes[i..end]);
            i = end;
            last = b' ';
            continue;
        }
        // end-of-line comments: `# ...` and `-- ...`
        if c == b'#' || (c == b'-' && bytes.get(i + 1) == Some(&b'-') && bytes.get(i + 2) == Some(&b' ')) {
            let end = bytes[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(bytes.len(), |p| i + p + 1);
            text.extend_from_slice(&bytes[i..end]);
            i = end;
            last = b' ';
            continue;
        }
        // quoted literals and identifiers
        if c == b'\'' || c == b'"' || c == b'`' {
            let end = skip_quoted(bytes, i, c);
            text.extend_from_slice(&bytes[i..end]);
            i = end;
            last = c;
            continue;
        }
        // qmark placeholder
        if c == b'?' {
            has_qmark = true;
            positions.push(text.len());
            keys.push(String::new());
            text.push(b'?');
            i += 1;
            last = c;
            continue;
        }
        // format / pyformat placeholders
        if c == b'%' && last != b'\\' {
            match bytes.get(i + 1) {
                Some(b's' | b'd') => {
                    has_format = true;
                    positions.push(text.len());
                    keys.push(String::new());
                    text.push(b'?');
                    i += 2;
                    last = b'?';
                    continue;
                }
                Some(b'(') => {
                    if let Some(rel) = find_subslice(&bytes[i + 2..], b")s") {
                        let key = &statement[i + 2..i + 2 + rel];
                        has_named = true;
                        positions.push(text.len());
                        keys.push(key.to_string());
                        text.push(b'?');
                        i += 2 + rel + 2;
                        last = b'?';
                        continue;
                    }
                }
                _ => {}
            }
        }
        // first keyword decides whether this is a procedure call
        if !seen_keyword && c.is_ascii_alphabetic() {
            seen_keyword = true;
            is_call = keyword_at(bytes, i, "CALL");
        }

        text.push(c);
        last = c;
        i += 1;
    }

    if has_named && (has_qmark || has_format) {
        return Err(Error::programming(
            "mixed named and positional parameter placeholders",
        ));
    }

    let style = if has_named {
        ParamStyle::Pyformat
    } else if has_format {
        ParamStyle::Format
    } else {
        ParamStyle::Qmark
    };

    // structural characters are ASCII and multi-byte runs are copied whole,
    // so the normalized text is valid UTF-8 whenever the input was
    let text = String::from_utf8(text)
        .map_err(|_| Error::programming("statement is not valid UTF-8"))?;

    Ok(ParsedStatement {
        text,
        positions,
        keys,
        style,
        is_call,
    })
}

/// Resolve supplied parameters against a scanned statement, producing the
/// values in placeholder order.
///
/// Shape errors (sequence vs. mapping) are programming errors; count and
/// missing-key errors are data errors, raised before any I/O happens.
pub fn ordered_values(parsed: &ParsedStatement, params: &Params) -> Result<Vec<Value>> {
    match parsed.style() {
        ParamStyle::Qmark | ParamStyle::Format => {
            let values: &[Value] = match params {
                Params::None => &[],
                Params::Positional(values) => values,
                Params::Named(_) => {
                    return Err(Error::programming(
                        "parameters must be a sequence for positional placeholders",
                    ));
                }
            };
            if values.len() != parsed.param_count() {
                return Err(Error::data(format!(
                    "Number of parameters in statement ({}) doesn't match the number of supplied values ({})",
                    parsed.param_count(),
                    values.len()
                )));
            }
            Ok(values.to_vec())
        }
        ParamStyle::Pyformat => {
            let map = match params {
                Params::Named(map) => map,
                _ => {
                    return Err(Error::programming(
                        "parameters must be a mapping for named placeholders",
                    ));
                }
            };
            parsed
                .keys()
                .iter()
                .map(|key| {
                    map.get(key).cloned().ok_or_else(|| {
                        Error::data(format!("missing value for parameter '{}'", key))
                    })
                })
                .collect()
        }
    }
}

/// Splice literal values into the statement text at the recorded
/// placeholder offsets.
///
/// Each substitution shifts every later offset, so a running delta tracks
/// the growth of the text since the original scan.
pub fn substitute_text(
    parsed: &ParsedStatement,
    values: &[Value],
    escape: impl Fn(&str) -> String,
) -> String {
    let mut out = parsed.text().to_string();
    let mut delta = 0_isize;
    for (position, value) in parsed.positions().iter().zip(values) {
        let literal = render_literal(value, &escape);
        let at = usize::try_from(*position as isize + delta).unwrap_or(0);
        out.replace_range(at..=at, &literal);
        delta += literal.len() as isize - 1;
    }
    out
}

/// Render a value as a SQL literal for the text protocol.
///
/// NULL stays NULL, numbers are unquoted, byte strings become hex
/// literals, and everything else is quoted with server-side escaping.
fn render_literal(value: &Value, escape: &impl Fn(&str) -> String) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::TinyInt(i) => i.to_string(),
        Value::SmallInt(i) => i.to_string(),
        Value::Int(i) => i.to_string(),
        Value::BigInt(i) => i.to_string(),
        Value::UBigInt(i) => i.to_string(),
        Value::Float(f) => render_float(f64::from(*f)),
        Value::Double(f) => render_float(*f),
        Value::Decimal(s) => s.clone(),
        Value::Text(s) => format!("'{}'", escape(s)),
        Value::Bytes(b) => hex_literal(b),
        Value::Date(s) | Value::Time(s) | Value::DateTime(s) => format!("'{}'", s),
        Value::Json(j) => format!("'{}'", escape(&j.to_string())),
    }
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        "NULL".to_string()
    } else if f.is_infinite() {
        if f.is_sign_positive() {
            "1e308".to_string()
        } else {
            "-1e308".to_string()
        }
    } else {
        f.to_string()
    }
}

fn hex_literal(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2 + 3);
    out.push_str("X'");
    for byte in data {
        out.push_str(&format!("{byte:02X}"));
    }
    out.push('\'');
    out
}

/// Advance past a quoted region starting at `start` (which holds `quote`),
/// honoring doubled-quote and backslash escapes. Returns the index just
/// past the closing quote.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' && quote != b'`' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn keyword_at(bytes: &[u8], at: usize, keyword: &str) -> bool {
    let end = at + keyword.len();
    if end > bytes.len() {
        return false;
    }
    if !bytes[at..end].eq_ignore_ascii_case(keyword.as_bytes()) {
        return false;
    }
    // must end at a word boundary
    bytes
        .get(end)
        .is_none_or(|&b| !(b.is_ascii_alphanumeric() || b == b'_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_escape(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn qmark_positions() {
        let parsed = parse("SELECT ?, ?").unwrap();
        assert_eq!(parsed.style(), ParamStyle::Qmark);
        assert_eq!(parsed.param_count(), 2);
        assert_eq!(parsed.positions(), &[7, 10]);
        assert_eq!(parsed.text(), "SELECT ?, ?");
    }

    #[test]
    fn format_markers_normalize_to_qmark() {
        let parsed = parse("INSERT INTO t VALUES (%s, %d)").unwrap();
        assert_eq!(parsed.style(), ParamStyle::Format);
        assert_eq!(parsed.param_count(), 2);
        assert_eq!(parsed.text(), "INSERT INTO t VALUES (?, ?)");
    }

    #[test]
    fn pyformat_keys_recorded_in_order() {
        let parsed = parse("UPDATE t SET a=%(alpha)s WHERE id=%(id)s").unwrap();
        assert_eq!(parsed.style(), ParamStyle::Pyformat);
        assert_eq!(parsed.keys(), &["alpha".to_string(), "id".to_string()]);
        assert_eq!(parsed.text(), "UPDATE t SET a=? WHERE id=?");
    }

    #[test]
    fn placeholders_inside_literals_ignored() {
        let parsed = parse("SELECT '?', \"%s\", `w?ird`, ? FROM t").unwrap();
        assert_eq!(parsed.param_count(), 1);
        assert_eq!(parsed.style(), ParamStyle::Qmark);
    }

    #[test]
    fn placeholders_inside_comments_ignored() {
        let parsed = parse("SELECT /* ? %s */ 1, ? -- trailing ?\n FROM t").unwrap();
        assert_eq!(parsed.param_count(), 1);

        let parsed = parse("SELECT 1 # comment with ?\n , ?").unwrap();
        assert_eq!(parsed.param_count(), 1);
    }

    #[test]
    fn doubled_quotes_stay_in_literal() {
        let parsed = parse("SELECT 'it''s ?', ?").unwrap();
        assert_eq!(parsed.param_count(), 1);
    }

    #[test]
    fn empty_statement_rejected() {
        assert!(matches!(parse(""), Err(Error::Programming(_))));
        assert!(matches!(parse("   "), Err(Error::Programming(_))));
    }

    #[test]
    fn mixed_styles_rejected() {
        let err = parse("SELECT ?, %(a)s").unwrap_err();
        assert!(matches!(err, Error::Programming(_)));
    }

    #[test]
    fn call_detection() {
        assert!(parse("CALL stats_refresh(?)").unwrap().is_call());
        assert!(parse("  call p()").unwrap().is_call());
        assert!(!parse("SELECT called FROM t").unwrap().is_call());
        assert!(!parse("SELECT * FROM calls").unwrap().is_call());
    }

    #[test]
    fn ordered_values_positional() {
        let parsed = parse("SELECT ?, ?").unwrap();
        let values =
            ordered_values(&parsed, &Params::from(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn ordered_values_count_mismatch() {
        let parsed = parse("SELECT ?, ?").unwrap();
        let err = ordered_values(&parsed, &Params::from(vec![Value::Int(1)])).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
        assert!(err.to_string().contains("(2)"));
        assert!(err.to_string().contains("(1)"));

        let parsed = parse("SELECT ?").unwrap();
        let err = ordered_values(&parsed, &Params::from(vec![Value::Int(1), Value::Int(2)]))
            .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn ordered_values_named() {
        let parsed = parse("SELECT %(b)s, %(a)s").unwrap();
        let mut map = HashMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::Int(2));
        let values = ordered_values(&parsed, &Params::from(map)).unwrap();
        assert_eq!(values, vec![Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn ordered_values_missing_key() {
        let parsed = parse("SELECT %(a)s").unwrap();
        let err = ordered_values(&parsed, &Params::from(HashMap::new())).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn ordered_values_wrong_shape() {
        let parsed = parse("SELECT %(a)s").unwrap();
        let err = ordered_values(&parsed, &Params::from(vec![Value::Int(1)])).unwrap_err();
        assert!(matches!(err, Error::Programming(_)));

        let parsed = parse("SELECT ?").unwrap();
        let err = ordered_values(&parsed, &Params::Named(HashMap::new())).unwrap_err();
        assert!(matches!(err, Error::Programming(_)));
    }

    #[test]
    fn substitution_tracks_offset_shift() {
        let parsed = parse("INSERT INTO t VALUES (?, ?, ?)").unwrap();
        let values = vec![
            Value::Null,
            Value::Text("o'clock".to_string()),
            Value::Int(42),
        ];
        let sql = substitute_text(&parsed, &values, |s| s.replace('\'', "''"));
        assert_eq!(sql, "INSERT INTO t VALUES (NULL, 'o''clock', 42)");
    }

    #[test]
    fn substitution_literals() {
        let parsed = parse("SELECT ?, ?, ?, ?").unwrap();
        let values = vec![
            Value::Bool(true),
            Value::Double(1.5),
            Value::Bytes(vec![0xDE, 0xAD]),
            Value::Date("2024-05-01".to_string()),
        ];
        let sql = substitute_text(&parsed, &values, no_escape);
        assert_eq!(sql, "SELECT TRUE, 1.5, X'DEAD', '2024-05-01'");
    }

    #[test]
    fn nan_becomes_null() {
        let parsed = parse("SELECT ?").unwrap();
        let sql = substitute_text(&parsed, &[Value::Double(f64::NAN)], no_escape);
        assert_eq!(sql, "SELECT NULL");
    }
}
