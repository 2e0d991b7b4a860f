use crate::tree::*;
use crate::types::{Type, TypeSet};
use regex::Regex;
use std::collections::BTreeMap;

/// An error found while checking a value against a type.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub message: String,
    /// Path in the value where the error was found (e.g. `["[0]", "metadata", "name"]`).
    pub path: Vec<String>,
    /// Machine-readable error code.
    pub code: &'static str,
}

// ── Resource validation ─────────────────────────────────────────────

/// Check that every emitted resource carries string `apiVersion` and
/// `kind` fields. A top-level sequence is checked element by element;
/// unit (nothing emitted) is valid.
///
/// Returns an empty vec when every resource is valid.
pub fn validate_resources(root: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut path = Vec::new();
    match root {
        Value::Unit => {}
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                path.push(format!("[{}]", i));
                check(item, &Type::KubernetesResource, &mut path, &mut errors);
                path.pop();
            }
        }
        other => check(other, &Type::KubernetesResource, &mut path, &mut errors),
    }
    errors
}

// ── Type conformance ────────────────────────────────────────────────

/// Check a value against a type, reporting every mismatch with its path.
/// Struct fields are required; fields the type does not mention are allowed.
pub fn validate_type(value: &Value, ty: &Type) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut path = Vec::new();
    check(value, ty, &mut path, &mut errors);
    errors
}

fn check(value: &Value, ty: &Type, path: &mut Vec<String>, errors: &mut Vec<ValidationError>) {
    match (ty, value) {
        (Type::Any | Type::Unresolved, _) => {}
        (Type::String { pattern }, Value::String(s)) => {
            if let Some(pattern) = pattern {
                check_pattern(s, pattern, path, errors);
            }
        }
        (Type::Number { min, max }, Value::Number(n)) => {
            let below = min.is_some_and(|m| *n < m);
            let above = max.is_some_and(|m| *n > m);
            if below || above {
                errors.push(ValidationError {
                    message: format!("Value {} is outside the range {}", n, ty),
                    path: path.clone(),
                    code: "out-of-range",
                });
            }
        }
        (Type::Struct(fields), Value::Struct(values)) => {
            check_fields(fields, values, path, errors);
        }
        (Type::KubernetesResource, Value::Struct(values)) => {
            let required: BTreeMap<String, TypeSet> = ["apiVersion", "kind"]
                .into_iter()
                .map(|name| (name.to_string(), TypeSet::single(Type::string())))
                .collect();
            check_fields(&required, values, path, errors);
        }
        (Type::Vector(elements), Value::Array(items)) => {
            if elements.is_empty() {
                return;
            }
            for (i, item) in items.iter().enumerate() {
                path.push(format!("[{}]", i));
                check_any(item, elements, path, errors);
                path.pop();
            }
        }
        (Type::Union(members), _) => check_any(value, members, path, errors),
        _ if ty.admits(value) => {}
        _ => errors.push(wrong_type(ty, value, path)),
    }
}

fn check_fields(
    fields: &BTreeMap<String, TypeSet>,
    values: &BTreeMap<String, Value>,
    path: &mut Vec<String>,
    errors: &mut Vec<ValidationError>,
) {
    for (name, types) in fields {
        path.push(name.clone());
        match values.get(name) {
            Some(value) => check_any(value, types, path, errors),
            None => errors.push(ValidationError {
                message: format!("Missing required field \"{}\"", name),
                path: path.clone(),
                code: "missing-required",
            }),
        }
        path.pop();
    }
}

/// Check against a set of alternatives. If none matches, report the
/// errors of a sole alternative as-is, or one `wrong-type` error.
fn check_any(
    value: &Value,
    types: &TypeSet,
    path: &mut Vec<String>,
    errors: &mut Vec<ValidationError>,
) {
    if types.iter().any(|t| t.admits(value)) {
        return;
    }
    match types.to_type() {
        Type::Union(members) => errors.push(wrong_type(&Type::Union(members), value, path)),
        single => check(value, &single, path, errors),
    }
}

fn check_pattern(s: &str, pattern: &str, path: &[String], errors: &mut Vec<ValidationError>) {
    match Regex::new(pattern) {
        Ok(re) => {
            if !re.is_match(s) {
                errors.push(ValidationError {
                    message: format!("Value \"{}\" does not match pattern \"{}\"", s, pattern),
                    path: path.to_vec(),
                    code: "pattern-mismatch",
                });
            }
        }
        Err(e) => errors.push(ValidationError {
            message: format!("Invalid regex pattern \"{}\": {}", pattern, e),
            path: path.to_vec(),
            code: "invalid-type",
        }),
    }
}

fn wrong_type(ty: &Type, value: &Value, path: &[String]) -> ValidationError {
    ValidationError {
        message: format!("Expected {} but found {}", ty, value.kind_name()),
        path: path.to_vec(),
        code: "wrong-type",
    }
}
