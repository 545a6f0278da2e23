//! Cell values and the canonical value semantics shared by every stage of the
//! pipeline.
//!
//! A dataset cell is one of four scalar shapes ([`CellValue`]). Whether a cell
//! counts as "truthy", which number it carries and which calendar date it
//! denotes is decided here and nowhere else: the capability detector, the
//! aggregation engine, the auditor and the insights engine all call into
//! [`is_truthy`], [`to_number`] and [`parse_date`].

use std::{borrow::Cow, collections::HashMap, fmt};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Strings (case-insensitive) that evaluate truthy. Positive numbers and the
/// boolean `true` are truthy as well.
pub const TRUTHY_VALUES: &[&str] = &[
    "1",
    "true",
    "sim",
    "s",
    "yes",
    "y",
    "ok",
    "x",
    "on",
    "ativo",
    "realizado",
    "agendado",
    "ganho",
    "concluido",
    "fechado",
];

/// Tokens accepted as "boolean-looking" when deciding whether a column is a
/// stage flag. Broader than [`TRUTHY_VALUES`] because falsy spellings count too.
const BOOLEAN_LIKE_VALUES: &[&str] = &[
    "true",
    "false",
    "t",
    "f",
    "yes",
    "no",
    "y",
    "n",
    "1",
    "0",
    "sim",
    "não",
    "nao",
    "s",
    "verdadeiro",
    "falso",
];

/// Numbers at or above this magnitude are read as millisecond timestamps.
const MILLISECOND_TIMESTAMP_THRESHOLD: f64 = 1e11;

const DAY_FIRST_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y"];
const FALLBACK_DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%d.%m.%Y", "%Y%m%d", "%d %b %Y", "%b %d, %Y"];
const FALLBACK_DATETIME_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

pub type Row = HashMap<String, CellValue>;

/// Shared null cell returned for absent keys.
pub static NULL_CELL: CellValue = CellValue::Null;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Coerces a raw text field (as read from a CSV record) into a cell.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return CellValue::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return CellValue::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return CellValue::Bool(false);
        }
        if looks_like_plain_number(trimmed)
            && let Ok(parsed) = trimmed.parse::<f64>()
            && parsed.is_finite()
        {
            return CellValue::Number(parsed);
        }
        CellValue::Text(trimmed.to_string())
    }

    pub fn is_null(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    /// Stable textual key used for grouping, distinct counts and frequency
    /// tables.
    pub fn display_key(&self) -> Cow<'_, str> {
        match self {
            CellValue::Null => Cow::Borrowed(""),
            CellValue::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            CellValue::Number(n) => Cow::Owned(format_number(*n)),
            CellValue::Text(text) => Cow::Borrowed(text.as_str()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_key())
    }
}

impl From<JsonValue> for CellValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => CellValue::Null,
            JsonValue::Bool(b) => CellValue::Bool(b),
            JsonValue::Number(n) => n.as_f64().map_or(CellValue::Null, CellValue::Number),
            JsonValue::String(s) => CellValue::Text(s),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl From<CellValue> for JsonValue {
    fn from(value: CellValue) -> Self {
        match value {
            CellValue::Null => JsonValue::Null,
            CellValue::Bool(b) => JsonValue::Bool(b),
            CellValue::Number(n) => serde_json::Number::from_f64(n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            CellValue::Text(s) => JsonValue::String(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

pub fn is_truthy(value: &CellValue) -> bool {
    match value {
        CellValue::Null => false,
        CellValue::Bool(b) => *b,
        CellValue::Number(n) => n.is_finite() && *n > 0.0,
        CellValue::Text(text) => {
            let lowered = text.trim().to_lowercase();
            !lowered.is_empty() && TRUTHY_VALUES.contains(&lowered.as_str())
        }
    }
}

pub fn is_boolean_like(value: &CellValue) -> bool {
    match value {
        CellValue::Null => false,
        CellValue::Bool(_) => true,
        CellValue::Number(n) => *n == 0.0 || *n == 1.0,
        CellValue::Text(text) => {
            let lowered = text.trim().to_lowercase();
            BOOLEAN_LIKE_VALUES.contains(&lowered.as_str())
        }
    }
}

/// Finite numeric reading of a cell. Booleans read as 1/0; text is parsed with
/// currency symbols, percent signs and thousands separators stripped.
pub fn to_number(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Null => None,
        CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        CellValue::Number(n) => n.is_finite().then_some(*n),
        CellValue::Text(text) => parse_number_token(text),
    }
}

pub fn parse_number_token(raw: &str) -> Option<f64> {
    let mut body = raw.trim();
    if body.is_empty() {
        return None;
    }
    let mut negative = false;
    if body.starts_with('(') && body.ends_with(')') && body.len() > 2 {
        negative = true;
        body = &body[1..body.len() - 1];
    }
    for symbol in ["R$", "US$", "$", "€", "£"] {
        if let Some(rest) = body.strip_prefix(symbol) {
            body = rest.trim_start();
            break;
        }
    }
    let body = body.strip_suffix('%').unwrap_or(body).trim();
    if body.is_empty() || !body.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+' | ' ' | 'e' | 'E'))
    {
        return None;
    }
    let compact: String = body.chars().filter(|c| *c != ' ').collect();
    let normalized = normalize_separators(&compact);
    let parsed = normalized.parse::<f64>().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(if negative { -parsed } else { parsed })
}

fn normalize_separators(token: &str) -> String {
    let last_dot = token.rfind('.');
    let last_comma = token.rfind(',');
    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => token.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => token.replace(',', ""),
        (None, Some(_)) if token.matches(',').count() == 1 => token.replace(',', "."),
        (None, Some(_)) => token.replace(',', ""),
        _ => token.to_string(),
    }
}

fn looks_like_plain_number(token: &str) -> bool {
    let body = token.strip_prefix(['-', '+']).unwrap_or(token);
    !body.is_empty()
        && body.chars().next().is_some_and(|c| c.is_ascii_digit())
        && body.chars().all(|c| c.is_ascii_digit() || c == '.')
        && body.matches('.').count() <= 1
}

pub fn parse_date(value: &CellValue) -> Option<NaiveDate> {
    match value {
        CellValue::Number(n) => timestamp_to_date(*n),
        CellValue::Text(text) => parse_date_str(text),
        CellValue::Null | CellValue::Bool(_) => None,
    }
}

/// Parses a date string trying ISO `YYYY-MM-DD[...]`, `DD/MM/YYYY`,
/// `DD-MM-YYYY` and then a set of generic layouts. Purely numeric strings are
/// read as Unix timestamps.
pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(prefix) = iso_date_prefix(trimmed) {
        return NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok();
    }
    let head = trimmed.split_whitespace().next().unwrap_or(trimmed);
    for fmt in DAY_FIRST_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(head, fmt) {
            return Some(parsed);
        }
    }
    parse_generic_date(trimmed)
}

fn parse_generic_date(value: &str) -> Option<NaiveDate> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.date_naive());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.date_naive());
    }
    for fmt in FALLBACK_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed.date());
        }
    }
    for fmt in FALLBACK_DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Some(parsed);
        }
    }
    if looks_like_plain_number(value) {
        return value.parse::<f64>().ok().and_then(timestamp_to_date);
    }
    None
}

fn timestamp_to_date(value: f64) -> Option<NaiveDate> {
    if !value.is_finite() {
        return None;
    }
    let parsed = if value.abs() < MILLISECOND_TIMESTAMP_THRESHOLD {
        DateTime::from_timestamp(value.trunc() as i64, 0)
    } else {
        DateTime::from_timestamp_millis(value.trunc() as i64)
    };
    parsed.map(|dt| dt.date_naive())
}

/// Returns the leading `YYYY-MM-DD` slice when the value starts with one.
pub fn iso_date_prefix(value: &str) -> Option<&str> {
    let prefix = value.get(..10)?;
    let bytes = prefix.as_bytes();
    let shaped = bytes.iter().enumerate().all(|(idx, b)| match idx {
        4 | 7 => *b == b'-',
        _ => b.is_ascii_digit(),
    });
    shaped.then_some(prefix)
}

pub fn looks_like_iso_date(value: &CellValue) -> bool {
    match value {
        CellValue::Text(text) => iso_date_prefix(text.trim()).is_some() && parse_date(value).is_some(),
        _ => false,
    }
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.4}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_coerces_common_shapes() {
        assert_eq!(CellValue::from_raw("  "), CellValue::Null);
        assert_eq!(CellValue::from_raw("TRUE"), CellValue::Bool(true));
        assert_eq!(CellValue::from_raw("42"), CellValue::Number(42.0));
        assert_eq!(CellValue::from_raw("-3.5"), CellValue::Number(-3.5));
        assert_eq!(
            CellValue::from_raw("2024-03-05"),
            CellValue::Text("2024-03-05".to_string())
        );
        assert_eq!(CellValue::from_raw("NaN"), CellValue::Text("NaN".to_string()));
    }

    #[test]
    fn truthy_vocabulary_matches_case_insensitively() {
        assert!(is_truthy(&CellValue::from("SIM")));
        assert!(is_truthy(&CellValue::from("Realizado")));
        assert!(is_truthy(&CellValue::Number(2.0)));
        assert!(is_truthy(&CellValue::Bool(true)));
        assert!(!is_truthy(&CellValue::from("0")));
        assert!(!is_truthy(&CellValue::from("")));
        assert!(!is_truthy(&CellValue::Null));
        assert!(!is_truthy(&CellValue::Number(-1.0)));
        assert!(!is_truthy(&CellValue::from("não")));
    }

    #[test]
    fn boolean_like_accepts_localized_spellings() {
        assert!(is_boolean_like(&CellValue::from("NÃO")));
        assert!(is_boolean_like(&CellValue::from("Sim")));
        assert!(is_boolean_like(&CellValue::Number(0.0)));
        assert!(!is_boolean_like(&CellValue::Number(7.0)));
        assert!(!is_boolean_like(&CellValue::from("maybe")));
    }

    #[test]
    fn parse_number_token_handles_locale_separators() {
        assert_eq!(parse_number_token("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_number_token("$1,234.50"), Some(1234.5));
        assert_eq!(parse_number_token("12,5"), Some(12.5));
        assert_eq!(parse_number_token("45%"), Some(45.0));
        assert_eq!(parse_number_token("(10)"), Some(-10.0));
        assert_eq!(parse_number_token("abc"), None);
        assert_eq!(parse_number_token("inf"), None);
    }

    #[test]
    fn date_formats_agree_on_calendar_day() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(parse_date_str("2024-03-05"), expected);
        assert_eq!(parse_date_str("05/03/2024"), expected);
        assert_eq!(parse_date_str("05-03-2024"), expected);
        assert_eq!(parse_date_str("2024-03-05T23:59:59Z"), expected);
        assert_eq!(parse_date_str("2024/03/05"), expected);
        assert_eq!(parse_date_str("n/a"), None);
        assert_eq!(parse_date_str(""), None);
    }

    #[test]
    fn numeric_dates_are_unix_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(parse_date(&CellValue::Number(1_709_640_000.0)), expected);
        assert_eq!(parse_date(&CellValue::Number(1_709_640_000_000.0)), expected);
        assert_eq!(parse_date(&CellValue::Number(f64::NAN)), None);
    }

    #[test]
    fn json_round_trip_keeps_scalar_shapes() {
        let json = serde_json::json!({"a": 1.5, "b": "x", "c": null, "d": true});
        let row: Row = serde_json::from_value(json).expect("row from json");
        assert_eq!(row["a"], CellValue::Number(1.5));
        assert_eq!(row["c"], CellValue::Null);
        let back = serde_json::to_value(&row).expect("row to json");
        assert_eq!(back["d"], serde_json::Value::Bool(true));
    }
}
