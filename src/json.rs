use crate::error::{Diagnostic, Position};
use crate::tree::Value;
use crate::validate::ValidationError;
use serde::Serialize;

/// Serialize a Value to a compact JSON string (no whitespace).
pub fn to_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Serialize a Value to a pretty-printed JSON string (2-space indent).
pub fn to_json_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Serialize a Value to YAML.
pub fn to_yaml(value: &Value) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(value)
}

#[derive(Serialize)]
struct PositionRecord {
    line: usize,
    column: usize,
    offset: usize,
}

impl From<&Position> for PositionRecord {
    fn from(pos: &Position) -> Self {
        PositionRecord {
            line: pos.line,
            column: pos.column,
            offset: pos.offset,
        }
    }
}

#[derive(Serialize)]
struct DiagnosticRecord<'a> {
    code: &'a str,
    message: &'a str,
    begin: PositionRecord,
    end: PositionRecord,
}

#[derive(Serialize)]
struct ValidationRecord<'a> {
    code: &'a str,
    message: &'a str,
    path: &'a [String],
}

/// Serialize lexical diagnostics to a JSON array string.
pub fn diagnostics_to_json(diagnostics: &[Diagnostic]) -> String {
    let records: Vec<DiagnosticRecord> = diagnostics
        .iter()
        .map(|d| DiagnosticRecord {
            code: &d.code,
            message: &d.message,
            begin: (&d.begin).into(),
            end: (&d.end).into(),
        })
        .collect();
    serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string())
}

/// Serialize resource validation errors to a JSON array string.
pub fn validation_errors_to_json(errors: &[ValidationError]) -> String {
    let records: Vec<ValidationRecord> = errors
        .iter()
        .map(|e| ValidationRecord {
            code: e.code,
            message: &e.message,
            path: &e.path,
        })
        .collect();
    serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string())
}
