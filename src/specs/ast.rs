//! Abstract syntax tree for the agent specification DSL.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Agent tier levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TierLevel {
    Opus,
    #[default]
    Sonnet,
    Haiku,
}

impl TierLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Sonnet => "sonnet",
            Self::Haiku => "haiku",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "opus" => Some(Self::Opus),
            "sonnet" => Some(Self::Sonnet),
            "haiku" => Some(Self::Haiku),
            _ => None,
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Le),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }
}

/// Type validation checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCheck {
    ValidUrl,
    ValidEmail,
    ValidDate,
    String,
    Number,
    Boolean,
    List,
    Object,
    NotEmpty,
}

impl TypeCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidUrl => "valid_url",
            Self::ValidEmail => "valid_email",
            Self::ValidDate => "valid_date",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Object => "object",
            Self::NotEmpty => "not_empty",
        }
    }

    /// Parse the DSL's uppercase keyword; unknown checks fall back to
    /// NOT_EMPTY.
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "VALID_URL" => Self::ValidUrl,
            "VALID_EMAIL" => Self::ValidEmail,
            "VALID_DATE" => Self::ValidDate,
            "STRING" => Self::String,
            "NUMBER" => Self::Number,
            "BOOLEAN" => Self::Boolean,
            "LIST" => Self::List,
            "OBJECT" => Self::Object,
            _ => Self::NotEmpty,
        }
    }
}

/// Quantifiers for constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    Forall,
    Exists,
}

/// Dotted path expression like `output.claims.source.url`.
///
/// Numeric segments index into arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathExpr {
    pub parts: Vec<String>,
}

impl PathExpr {
    pub fn parse(path: &str) -> Self {
        Self {
            parts: path.split('.').map(|p| p.to_string()).collect(),
        }
    }

    /// Evaluate against a JSON value, returning None when any segment is
    /// missing.
    pub fn evaluate<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        let mut current = data;
        for part in &self.parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => {
                    let index: usize = part.parse().ok()?;
                    items.get(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

/// Time unit for date offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DAYS" => Some(Self::Days),
            "HOURS" => Some(Self::Hours),
            "MINUTES" => Some(Self::Minutes),
            "SECONDS" => Some(Self::Seconds),
            _ => None,
        }
    }
}

/// Date expression like `TODAY - 90 DAYS`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateExpr {
    pub offset_value: i64,
    pub offset_unit: TimeUnit,
}

impl DateExpr {
    pub fn today() -> Self {
        Self {
            offset_value: 0,
            offset_unit: TimeUnit::Days,
        }
    }

    /// Evaluate relative to the current time.
    pub fn evaluate(&self) -> DateTime<Utc> {
        let delta = match self.offset_unit {
            TimeUnit::Days => Duration::days(self.offset_value),
            TimeUnit::Hours => Duration::hours(self.offset_value),
            TimeUnit::Minutes => Duration::minutes(self.offset_value),
            TimeUnit::Seconds => Duration::seconds(self.offset_value),
        };
        Utc::now() + delta
    }
}

/// A literal or path value on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpecValue {
    Str { value: String },
    Number { value: f64 },
    Bool { value: bool },
    Null,
    Date { expr: DateExpr },
    Path { path: PathExpr },
}

impl SpecValue {
    /// Parse a value token: quoted strings, TRUE/FALSE/NULL, TODAY with an
    /// optional offset, numbers, bare strings.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();

        if (token.starts_with('"') && token.ends_with('"') && token.len() >= 2)
            || (token.starts_with('\'') && token.ends_with('\'') && token.len() >= 2)
        {
            return Self::Str {
                value: token[1..token.len() - 1].to_string(),
            };
        }
        match token {
            "TRUE" => return Self::Bool { value: true },
            "FALSE" => return Self::Bool { value: false },
            "NULL" => return Self::Null,
            "TODAY" => {
                return Self::Date {
                    expr: DateExpr::today(),
                }
            }
            _ => {}
        }

        // TODAY +/- N UNIT
        if let Some(rest) = token.strip_prefix("TODAY") {
            let rest = rest.trim();
            if let Some((sign, rest)) = rest
                .strip_prefix('+')
                .map(|r| (1i64, r))
                .or_else(|| rest.strip_prefix('-').map(|r| (-1i64, r)))
            {
                let mut parts = rest.split_whitespace();
                if let (Some(value), Some(unit)) = (parts.next(), parts.next()) {
                    if let (Ok(value), Some(unit)) = (value.parse::<i64>(), TimeUnit::parse(unit)) {
                        return Self::Date {
                            expr: DateExpr {
                                offset_value: sign * value,
                                offset_unit: unit,
                            },
                        };
                    }
                }
            }
        }

        if let Ok(value) = token.parse::<f64>() {
            return Self::Number { value };
        }

        Self::Str {
            value: token.to_string(),
        }
    }
}

/// Output constraint; evaluated recursively against the output and an
/// environment of quantified variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    Comparison {
        path: PathExpr,
        comparator: Comparator,
        value: SpecValue,
    },
    Type {
        path: PathExpr,
        check: TypeCheck,
    },
    Range {
        path: PathExpr,
        min: f64,
        max: f64,
    },
    InList {
        path: PathExpr,
        values: Vec<SpecValue>,
    },
    Not {
        inner: Box<Constraint>,
    },
    And {
        left: Box<Constraint>,
        right: Box<Constraint>,
    },
    Or {
        left: Box<Constraint>,
        right: Box<Constraint>,
    },
    Quantified {
        quantifier: Quantifier,
        variable: String,
        path: PathExpr,
        inner: Box<Constraint>,
    },
    Conditional {
        condition: Condition,
        consequence: Box<Constraint>,
    },
}

/// Condition guarding a conditional constraint or WHEN rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Comparison {
        path: PathExpr,
        comparator: Comparator,
        value: SpecValue,
    },
    Type {
        path: PathExpr,
        check: TypeCheck,
    },
    Count {
        path: PathExpr,
        comparator: Comparator,
        value: i64,
    },
}

/// Behavioral rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BehaviorRule {
    Prefer { preferred: String, over: String },
    Never { action: String },
    Always { action: String },
    When { condition: Condition, action: String },
}

/// Complete parsed agent specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AgentSpecification {
    pub agent_name: String,
    pub tier: TierLevel,
    pub tools: Vec<String>,
    pub output_constraints: Vec<Constraint>,
    pub behavior_rules: Vec<BehaviorRule>,
    pub limits: HashMap<String, i64>,
    pub raw_text: String,
}
