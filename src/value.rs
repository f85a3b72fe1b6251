//! Tagged cell values and string coercion.
//!
//! Every CSV cell is coerced into a [`Value`] when the row is read.
//! Coercion is explicit and ordered: integer, date, float, then trimmed
//! string; empty cells become [`Value::Absent`]. A reader-level user
//! converter can short-circuit the ladder (see
//! [`crate::reader::CsvSource::set_converter`]).

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Strictly positive decimal integers; a leading zero keeps the cell a
/// string so identifiers like `007` survive untouched.
static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[1-9]\d*$").unwrap());

/// `12.`, `.5`, `3.25` - a digit is required on at least one side.
static FLOAT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+\.\d*|\d*\.\d+)$").unwrap());

/// `Jan 5, 1999` / `January 5 1999`
static MONTH_FIRST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]{3,})\.?,?\s+(\d{1,2}),?\s+(\d{4})$").unwrap());

/// `5-Jan-99` / `05-Jan-1999`
static DAY_MONTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})-([A-Za-z]{3})-(\d{2}|\d{4})$").unwrap());

/// `1999-01-05` / `1999/1/5`
static YMD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})$").unwrap());

/// `5-1-1999` / `5/1/1999` (day first)
static DMY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[-/](\d{1,2})[-/](\d{4})$").unwrap());

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// A single coerced cell value.
///
/// `Absent` stands for an empty cell or a value a filter erased; it is
/// distinct from an empty string, which coercion never produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Absent,
    Str(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Bool(bool),
}

impl Value {
    /// Coerce a raw cell string.
    ///
    /// Applies, in order: blank to `Absent`; integer; date; float;
    /// otherwise the trimmed string.
    pub fn coerce(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Absent;
        }
        if INTEGER_RE.is_match(trimmed) {
            if let Ok(n) = trimmed.parse::<i64>() {
                return Value::Int(n);
            }
        }
        if let Some(date) = parse_date(trimmed) {
            return Value::Date(date);
        }
        if FLOAT_RE.is_match(trimmed) {
            if let Ok(f) = trimmed.parse::<f64>() {
                return Value::Float(f);
            }
        }
        Value::Str(trimmed.to_string())
    }

    /// Parse a boolean token, case-insensitive. `None` when the token is
    /// not recognizably boolean.
    pub fn parse_bool(raw: &str) -> Option<bool> {
        match raw.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Canonical string form for writing back out; `Absent` renders as
    /// the empty string, dates as ISO `YYYY-MM-DD`.
    pub fn render(&self) -> String {
        match self {
            Value::Absent => String::new(),
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Bool(b) => b.to_string(),
        }
    }

    /// Strip trailing whitespace of string values; other variants pass
    /// through. Applied to mapped cells before filtering.
    pub fn rstrip(self) -> Value {
        match self {
            Value::Str(s) => Value::Str(s.trim_end().to_string()),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// Try the recognized date layouts; `None` when nothing matches or the
/// calendar rejects the components.
fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Some(caps) = MONTH_FIRST_RE.captures(s) {
        let month = month_number(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Some(caps) = DAY_MONTH_RE.captures(s) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year = expand_year(&caps[3])?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Some(caps) = YMD_RE.captures(s) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Some(caps) = DMY_RE.captures(s) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    None
}

/// Map the first three letters of a month token to 1..=12.
fn month_number(token: &str) -> Option<u32> {
    let key = token.get(..3)?.to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == key)
        .map(|i| (i + 1) as u32)
}

/// Two-digit years follow the `%y` convention: 00-68 map to the 2000s,
/// 69-99 to the 1900s. Four-digit years pass through.
fn expand_year(token: &str) -> Option<i32> {
    let n: i32 = token.parse().ok()?;
    if token.len() == 4 {
        return Some(n);
    }
    Some(if n <= 68 { 2000 + n } else { 1900 + n })
}
