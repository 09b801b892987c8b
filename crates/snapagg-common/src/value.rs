//! Metric value parsing and canonical formatting.
//!
//! Report cells arrive as display text: `151`, `1,234`, `9.51%`,
//! `(90.49)`, `102 tickets`, `01:23:45`. Parsing normalizes them to `f64`;
//! durations become seconds. Anything without a number is rejected rather
//! than coerced to zero.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Why a cell could not be read as a metric value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("value is empty")]
    Empty,

    #[error("value {0:?} is not numeric")]
    NotNumeric(String),

    #[error("value {0:?} is not a finite number")]
    NonFinite(String),
}

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+):([0-5]\d)(?::([0-5]\d))?$").expect("duration regex is valid")
    })
}

fn number_with_unit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([+-]?(?:\d+(?:\.\d*)?|\.\d+))\s*[A-Za-z][A-Za-z /]*$")
            .expect("number-with-unit regex is valid")
    })
}

/// Parse a metric value from display text.
pub fn parse_metric_value(text: &str) -> Result<f64, ValueError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValueError::Empty);
    }

    if let Some(caps) = duration_pattern().captures(trimmed) {
        let first: f64 = caps[1].parse().map_err(|_| not_numeric(text))?;
        let second: f64 = caps[2].parse().map_err(|_| not_numeric(text))?;
        return Ok(match caps.get(3) {
            // HH:MM:SS
            Some(s) => {
                let secs: f64 = s.as_str().parse().map_err(|_| not_numeric(text))?;
                first * 3600.0 + second * 60.0 + secs
            }
            // MM:SS
            None => first * 60.0 + second,
        });
    }

    let mut cleaned = trimmed;
    if let Some(inner) = cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        cleaned = inner.trim();
    }
    let cleaned = cleaned.trim_end_matches('%').trim().replace(',', "");
    if cleaned.is_empty() {
        return Err(not_numeric(text));
    }

    let parsed = match cleaned.parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            let caps = number_with_unit_pattern()
                .captures(&cleaned)
                .ok_or_else(|| not_numeric(text))?;
            caps[1].parse::<f64>().map_err(|_| not_numeric(text))?
        }
    };

    if !parsed.is_finite() {
        return Err(ValueError::NonFinite(text.to_string()));
    }
    Ok(parsed)
}

/// Render a value for the persisted table.
///
/// Integral values are written without a fractional part (`47`, not `47.0`).
pub fn format_metric_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn not_numeric(text: &str) -> ValueError {
    ValueError::NotNumeric(text.to_string())
}
