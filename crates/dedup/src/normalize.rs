//! Key normalization: the only place raw text becomes a comparable key fragment.

use rusqlite::types::ValueRef;

/// Trim, collapse internal whitespace runs to one space, lowercase.
/// Absent input normalizes to the empty string.
pub fn normalize_key(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    let mut out = String::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.to_lowercase()
}

/// Normalize a stored SQLite value used as a text key component.
///
/// Numbers are rendered to text first so that a name stored as `42` and one
/// stored as `"42"` compare equal. Returns the name of the offending storage
/// class when the value cannot be used as text.
pub fn normalize_value(value: ValueRef<'_>) -> Result<String, &'static str> {
    match value {
        ValueRef::Null => Ok(String::new()),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|s| normalize_key(Some(s)))
            .map_err(|_| "non-UTF-8 text"),
        ValueRef::Integer(i) => Ok(i.to_string()),
        ValueRef::Real(f) => Ok(normalize_key(Some(&real_text(f)))),
        ValueRef::Blob(_) => Err("a blob"),
    }
}

/// Shortest round-trip rendering with a fractional digit (`1.0`, not `1`)
/// and a signed two-digit exponent (`1e+16`, `1.5e-05`).
fn real_text(f: f64) -> String {
    let text = format!("{f:?}");
    let Some((mantissa, exp)) = text.split_once('e') else {
        return text;
    };
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exp),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

/// Read a foreign-key column as a raw identity. NULL stays `None`.
pub fn reference_value(value: ValueRef<'_>) -> Result<Option<i64>, &'static str> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(i)),
        ValueRef::Real(_) => Err("a real number"),
        ValueRef::Text(_) => Err("text"),
        ValueRef::Blob(_) => Err("a blob"),
    }
}
