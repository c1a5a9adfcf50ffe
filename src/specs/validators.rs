//! Runtime validation of constraints against agent outputs.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::specs::ast::{
    AgentSpecification, Comparator, Condition, Constraint, PathExpr, Quantifier, SpecValue,
    TypeCheck,
};

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    // scheme://host, host must be non-empty and contain no whitespace
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://[^\s/]+\S*$").expect("Invalid regex")
});
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("Invalid regex")
});

/// Result of validating a single constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub constraint: Option<String>,
    pub path: Option<String>,
    pub errors: Vec<String>,
    pub value: Option<Value>,
}

impl ValidationResult {
    pub fn pass(path: Option<String>, value: Option<Value>) -> Self {
        Self {
            valid: true,
            constraint: None,
            path,
            errors: Vec::new(),
            value,
        }
    }

    pub fn fail(constraint: &str, path: Option<String>, error: String) -> Self {
        Self {
            valid: false,
            constraint: Some(constraint.to_string()),
            path,
            errors: vec![error],
            value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// Right-hand side of a comparison after resolution.
enum Resolved {
    Json(Value),
    Date(DateTime<Utc>),
}

/// Validates constraints against output data.
#[derive(Debug, Clone, Default)]
pub struct ConstraintValidator;

impl ConstraintValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a constraint against data with an environment of quantified
    /// variables.
    pub fn validate(
        &self,
        constraint: &Constraint,
        data: &Value,
        env: &HashMap<String, Value>,
    ) -> ValidationResult {
        match constraint {
            Constraint::Comparison {
                path,
                comparator,
                value,
            } => self.validate_comparison(path, *comparator, value, data, env),
            Constraint::Type { path, check } => self.validate_type(path, *check, data, env),
            Constraint::Range { path, min, max } => {
                self.validate_range(path, *min, *max, data, env)
            }
            Constraint::InList { path, values } => self.validate_in_list(path, values, data, env),
            Constraint::Not { inner } => {
                let inner_result = self.validate(inner, data, env);
                if inner_result.valid {
                    ValidationResult::fail(
                        "not",
                        None,
                        "NOT constraint failed: inner constraint was satisfied".to_string(),
                    )
                } else {
                    ValidationResult::pass(None, None)
                }
            }
            Constraint::And { left, right } => {
                let left_result = self.validate(left, data, env);
                if !left_result.valid {
                    return left_result;
                }
                self.validate(right, data, env)
            }
            Constraint::Or { left, right } => {
                let left_result = self.validate(left, data, env);
                if left_result.valid {
                    return left_result;
                }
                let right_result = self.validate(right, data, env);
                if right_result.valid {
                    return right_result;
                }
                let mut errors = left_result.errors;
                errors.extend(right_result.errors);
                ValidationResult {
                    valid: false,
                    constraint: Some("or".to_string()),
                    path: None,
                    errors,
                    value: None,
                }
            }
            Constraint::Quantified {
                quantifier,
                variable,
                path,
                inner,
            } => self.validate_quantified(*quantifier, variable, path, inner, data, env),
            Constraint::Conditional {
                condition,
                consequence,
            } => {
                if self.evaluate_condition(condition, data, env) {
                    self.validate(consequence, data, env)
                } else {
                    // Condition not met: vacuously valid
                    ValidationResult::pass(None, None)
                }
            }
        }
    }

    /// Validate all of a spec's constraints.
    pub fn validate_all(&self, constraints: &[Constraint], data: &Value) -> Vec<ValidationResult> {
        let env = HashMap::new();
        constraints
            .iter()
            .map(|c| self.validate(c, data, &env))
            .collect()
    }

    fn validate_comparison(
        &self,
        path: &PathExpr,
        comparator: Comparator,
        value: &SpecValue,
        data: &Value,
        env: &HashMap<String, Value>,
    ) -> ValidationResult {
        let actual = match self.resolve_path(path, data, env) {
            Some(actual) => actual,
            None => {
                // A comparison against NULL may legitimately target a
                // missing path
                if matches!(value, SpecValue::Null) {
                    return if comparator == Comparator::Eq {
                        ValidationResult::pass(Some(path.to_string()), None)
                    } else {
                        ValidationResult::fail(
                            "comparison",
                            Some(path.to_string()),
                            format!(
                                "Expected {} {} NULL but path is missing",
                                path,
                                comparator.as_str()
                            ),
                        )
                    };
                }
                return ValidationResult::fail(
                    "comparison",
                    Some(path.to_string()),
                    format!("Path '{}' not found in data", path),
                );
            }
        };

        let expected = self.resolve_value(value, data, env);
        if compare(&actual, comparator, &expected) {
            ValidationResult::pass(Some(path.to_string()), Some(actual))
        } else {
            ValidationResult::fail(
                "comparison",
                Some(path.to_string()),
                format!(
                    "Expected {} {} {}, got {}",
                    path,
                    comparator.as_str(),
                    describe_resolved(&expected),
                    actual
                ),
            )
            .with_value(actual)
        }
    }

    fn validate_type(
        &self,
        path: &PathExpr,
        check: TypeCheck,
        data: &Value,
        env: &HashMap<String, Value>,
    ) -> ValidationResult {
        let actual = self.resolve_path(path, data, env);

        if actual.is_none() && check != TypeCheck::NotEmpty {
            return ValidationResult::fail(
                "type",
                Some(path.to_string()),
                format!("Path '{}' not found", path),
            );
        }

        let value = actual.unwrap_or(Value::Null);
        if check_type(&value, check) {
            ValidationResult::pass(Some(path.to_string()), Some(value))
        } else {
            ValidationResult::fail(
                "type",
                Some(path.to_string()),
                format!(
                    "Expected {} IS {}, got {}",
                    path,
                    check.as_str(),
                    type_name(&value)
                ),
            )
            .with_value(value)
        }
    }

    fn validate_range(
        &self,
        path: &PathExpr,
        min: f64,
        max: f64,
        data: &Value,
        env: &HashMap<String, Value>,
    ) -> ValidationResult {
        let actual = match self.resolve_path(path, data, env) {
            Some(actual) => actual,
            None => {
                return ValidationResult::fail(
                    "range",
                    Some(path.to_string()),
                    format!("Path '{}' not found", path),
                )
            }
        };

        let number = match coerce_number(&actual) {
            Some(number) => number,
            None => {
                return ValidationResult::fail(
                    "range",
                    Some(path.to_string()),
                    format!("Cannot convert {} to number", actual),
                )
                .with_value(actual)
            }
        };

        if number >= min && number <= max {
            ValidationResult::pass(Some(path.to_string()), Some(actual))
        } else {
            ValidationResult::fail(
                "range",
                Some(path.to_string()),
                format!("Expected {} in [{:?}, {:?}], got {}", path, min, max, number),
            )
            .with_value(actual)
        }
    }

    fn validate_in_list(
        &self,
        path: &PathExpr,
        values: &[SpecValue],
        data: &Value,
        env: &HashMap<String, Value>,
    ) -> ValidationResult {
        let actual = match self.resolve_path(path, data, env) {
            Some(actual) => actual,
            None => {
                return ValidationResult::fail(
                    "in_list",
                    Some(path.to_string()),
                    format!("Path '{}' not found", path),
                )
            }
        };

        let matched = values.iter().any(|candidate| {
            let resolved = self.resolve_value(candidate, data, env);
            compare(&actual, Comparator::Eq, &resolved)
        });

        if matched {
            ValidationResult::pass(Some(path.to_string()), Some(actual))
        } else {
            let allowed: Vec<String> = values.iter().map(describe_spec_value).collect();
            ValidationResult::fail(
                "in_list",
                Some(path.to_string()),
                format!("Expected {} in [{}], got {}", path, allowed.join(", "), actual),
            )
            .with_value(actual)
        }
    }

    fn validate_quantified(
        &self,
        quantifier: Quantifier,
        variable: &str,
        path: &PathExpr,
        inner: &Constraint,
        data: &Value,
        env: &HashMap<String, Value>,
    ) -> ValidationResult {
        let collection = match self.resolve_path(path, data, env) {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => Vec::new(),
        };

        match quantifier {
            Quantifier::Forall => {
                for (index, item) in collection.into_iter().enumerate() {
                    let mut item_env = env.clone();
                    item_env.insert(variable.to_string(), item);
                    let mut result = self.validate(inner, data, &item_env);
                    if !result.valid {
                        result
                            .errors
                            .insert(0, format!("forall failed at index {}", index));
                        return result;
                    }
                }
                ValidationResult::pass(Some(path.to_string()), None)
            }
            Quantifier::Exists => {
                for item in collection {
                    let mut item_env = env.clone();
                    item_env.insert(variable.to_string(), item);
                    if self.validate(inner, data, &item_env).valid {
                        return ValidationResult::pass(Some(path.to_string()), None);
                    }
                }
                ValidationResult::fail(
                    "exists",
                    Some(path.to_string()),
                    format!("No item in {} satisfies the constraint", path),
                )
            }
        }
    }

    /// Evaluate a condition to a boolean.
    pub fn evaluate_condition(
        &self,
        condition: &Condition,
        data: &Value,
        env: &HashMap<String, Value>,
    ) -> bool {
        match condition {
            Condition::Comparison {
                path,
                comparator,
                value,
            } => match self.resolve_path(path, data, env) {
                Some(actual) => {
                    let expected = self.resolve_value(value, data, env);
                    compare(&actual, *comparator, &expected)
                }
                None => *comparator == Comparator::Eq && matches!(value, SpecValue::Null),
            },
            Condition::Type { path, check } => {
                let value = self.resolve_path(path, data, env).unwrap_or(Value::Null);
                check_type(&value, *check)
            }
            Condition::Count {
                path,
                comparator,
                value,
            } => {
                let count = match self.resolve_path(path, data, env) {
                    Some(Value::Array(items)) => items.len() as i64,
                    _ => 0,
                };
                compare(
                    &Value::from(count),
                    *comparator,
                    &Resolved::Json(Value::from(*value)),
                )
            }
        }
    }

    /// Resolve a path, checking the quantifier environment first.
    fn resolve_path(
        &self,
        path: &PathExpr,
        data: &Value,
        env: &HashMap<String, Value>,
    ) -> Option<Value> {
        if let Some(root) = env.get(&path.parts[0]) {
            if path.parts.len() == 1 {
                return Some(root.clone());
            }
            let rest = PathExpr {
                parts: path.parts[1..].to_vec(),
            };
            return rest.evaluate(root).cloned();
        }
        path.evaluate(data).cloned()
    }

    fn resolve_value(
        &self,
        value: &SpecValue,
        data: &Value,
        env: &HashMap<String, Value>,
    ) -> Resolved {
        match value {
            SpecValue::Str { value } => Resolved::Json(Value::String(value.clone())),
            SpecValue::Number { value } => {
                Resolved::Json(serde_json::Number::from_f64(*value).map(Value::Number).unwrap_or(Value::Null))
            }
            SpecValue::Bool { value } => Resolved::Json(Value::Bool(*value)),
            SpecValue::Null => Resolved::Json(Value::Null),
            SpecValue::Date { expr } => Resolved::Date(expr.evaluate()),
            SpecValue::Path { path } => Resolved::Json(
                self.resolve_path(path, data, env).unwrap_or(Value::Null),
            ),
        }
    }
}

fn describe_resolved(resolved: &Resolved) -> String {
    match resolved {
        Resolved::Json(value) => value.to_string(),
        Resolved::Date(date) => date.to_rfc3339(),
    }
}

fn describe_spec_value(value: &SpecValue) -> String {
    match value {
        SpecValue::Str { value } => format!("\"{}\"", value),
        SpecValue::Number { value } => value.to_string(),
        SpecValue::Bool { value } => value.to_string(),
        SpecValue::Null => "NULL".to_string(),
        SpecValue::Date { .. } => "TODAY".to_string(),
        SpecValue::Path { path } => path.to_string(),
    }
}

/// Comparison semantics: null participates in ==/!= only; numbers compare
/// numerically; strings lexically; dates after parsing; mixed types fail.
fn compare(actual: &Value, op: Comparator, expected: &Resolved) -> bool {
    match expected {
        Resolved::Date(expected_date) => {
            let actual_date = match actual.as_str().and_then(parse_datetime) {
                Some(actual_date) => actual_date,
                None => return false,
            };
            ordered_compare(actual_date.cmp(expected_date), op)
        }
        Resolved::Json(expected) => {
            if actual.is_null() || expected.is_null() {
                return match op {
                    Comparator::Eq => actual == expected,
                    Comparator::Ne => actual != expected,
                    _ => false,
                };
            }

            match (actual, expected) {
                (Value::Number(_), Value::Number(_)) => {
                    let a = actual.as_f64().unwrap_or(f64::NAN);
                    let b = expected.as_f64().unwrap_or(f64::NAN);
                    match op {
                        Comparator::Eq => a == b,
                        Comparator::Ne => a != b,
                        Comparator::Lt => a < b,
                        Comparator::Gt => a > b,
                        Comparator::Le => a <= b,
                        Comparator::Ge => a >= b,
                    }
                }
                (Value::String(a), Value::String(b)) => ordered_compare(a.cmp(b), op),
                (Value::Bool(a), Value::Bool(b)) => match op {
                    Comparator::Eq => a == b,
                    Comparator::Ne => a != b,
                    _ => false,
                },
                _ => match op {
                    Comparator::Eq => actual == expected,
                    Comparator::Ne => actual != expected,
                    _ => false,
                },
            }
        }
    }
}

fn ordered_compare(ordering: std::cmp::Ordering, op: Comparator) -> bool {
    use std::cmp::Ordering::*;
    match op {
        Comparator::Eq => ordering == Equal,
        Comparator::Ne => ordering != Equal,
        Comparator::Lt => ordering == Less,
        Comparator::Gt => ordering == Greater,
        Comparator::Le => ordering != Greater,
        Comparator::Ge => ordering != Less,
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn check_type(value: &Value, check: TypeCheck) -> bool {
    match check {
        TypeCheck::ValidUrl => value.as_str().is_some_and(|s| URL_RE.is_match(s)),
        TypeCheck::ValidEmail => value.as_str().is_some_and(|s| EMAIL_RE.is_match(s)),
        TypeCheck::ValidDate => value.as_str().is_some_and(|s| is_valid_date(s)),
        TypeCheck::String => value.is_string(),
        TypeCheck::Number => value.is_number(),
        TypeCheck::Boolean => value.is_boolean(),
        TypeCheck::List => value.is_array(),
        TypeCheck::Object => value.is_object(),
        TypeCheck::NotEmpty => match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            _ => true,
        },
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00")) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

fn is_valid_date(s: &str) -> bool {
    parse_datetime(s).is_some()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Validates agent output against a complete specification.
#[derive(Debug, Clone)]
pub struct SpecificationValidator {
    spec: AgentSpecification,
    constraint_validator: ConstraintValidator,
}

impl SpecificationValidator {
    pub fn new(spec: AgentSpecification) -> Self {
        Self {
            spec,
            constraint_validator: ConstraintValidator::new(),
        }
    }

    pub fn spec(&self) -> &AgentSpecification {
        &self.spec
    }

    /// Strict validation: all results on success, a `SpecViolation` error
    /// carrying the failing results otherwise.
    pub fn validate(&self, output: &Value) -> Result<Vec<ValidationResult>> {
        let results = self.validate_soft(output);
        let violations: Vec<ValidationResult> =
            results.iter().filter(|r| !r.valid).cloned().collect();

        if violations.is_empty() {
            Ok(results)
        } else {
            let summary = violations
                .iter()
                .flat_map(|v| v.errors.iter().cloned())
                .collect::<Vec<_>>()
                .join("; ");
            Err(Error::SpecViolation {
                spec_name: self.spec.agent_name.clone(),
                summary,
                violations,
            })
        }
    }

    /// Soft validation: every result returned, failures included.
    pub fn validate_soft(&self, output: &Value) -> Vec<ValidationResult> {
        self.constraint_validator
            .validate_all(&self.spec.output_constraints, output)
    }
}
