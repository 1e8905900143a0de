//! Flat equality/range filters accepted by `query`.
//!
//! Wire shape (a JSON object):
//!
//! ```json
//! { "status": "open", "priority": { "$gte": 2, "$lt": 5 }, "archived_at": null }
//! ```
//!
//! A scalar value means equality (`null` matches a missing or null field).
//! An object value holds one or more comparison operators. Anything else is
//! rejected by [`Filters::parse`] before a backend is touched.

use crate::FieldMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors produced while validating filters, cursors, or limits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filters must be a JSON object")]
    NotAnObject,

    #[error("invalid field name {0:?}: use letters, digits and underscores")]
    InvalidFieldName(String),

    #[error("unsupported filter shape for field {field:?}: {reason}")]
    UnsupportedShape { field: String, reason: String },

    #[error("unknown filter operator {operator:?} on field {field:?}")]
    UnknownOperator { field: String, operator: String },

    #[error("invalid limit {limit}: must be between 1 and {max}")]
    InvalidLimit { limit: usize, max: usize },

    #[error("invalid cursor")]
    InvalidCursor,
}

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    fn from_operator(op: &str) -> Option<Self> {
        match op {
            "$eq" => Some(FilterOp::Eq),
            "$ne" => Some(FilterOp::Ne),
            "$gt" => Some(FilterOp::Gt),
            "$gte" => Some(FilterOp::Gte),
            "$lt" => Some(FilterOp::Lt),
            "$lte" => Some(FilterOp::Lte),
            _ => None,
        }
    }

    /// Whether the operator orders values rather than comparing for identity.
    pub fn is_range(&self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte)
    }

    /// SQL spelling of the operator.
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "IS",
            FilterOp::Ne => "IS NOT",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "$eq",
            FilterOp::Ne => "$ne",
            FilterOp::Gt => "$gt",
            FilterOp::Gte => "$gte",
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
        };
        f.write_str(s)
    }
}

/// One validated predicate on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: FilterOp,
    /// Always a scalar: string, number, bool, or null (null only for Eq/Ne).
    pub value: Value,
}

impl Condition {
    /// Evaluates the condition against a field map.
    pub fn matches(&self, fields: &FieldMap) -> bool {
        let actual = fields.get(&self.field).unwrap_or(&Value::Null);
        // Type mismatches never match a range bound.
        let ord = || scalar_cmp(actual, &self.value);
        match self.op {
            FilterOp::Eq => scalar_eq(actual, &self.value),
            FilterOp::Ne => !scalar_eq(actual, &self.value),
            FilterOp::Gt => ord() == Some(Ordering::Greater),
            FilterOp::Gte => matches!(ord(), Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::Lt => ord() == Some(Ordering::Less),
            FilterOp::Lte => matches!(ord(), Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

/// A validated, conjunctive set of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    conditions: Vec<Condition>,
}

impl Filters {
    /// No conditions: matches every entity of the type.
    pub fn none() -> Self {
        Self::default()
    }

    /// Single equality condition, used for link lookups.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            conditions: vec![Condition {
                field: field.into(),
                op: FilterOp::Eq,
                value: value.into(),
            }],
        }
    }

    /// Parses and validates the wire shape. `null` is accepted as "no filters".
    pub fn parse(value: &Value) -> Result<Self, FilterError> {
        match value {
            Value::Null => Ok(Self::none()),
            Value::Object(map) => Self::parse_map(map),
            _ => Err(FilterError::NotAnObject),
        }
    }

    pub fn parse_map(map: &FieldMap) -> Result<Self, FilterError> {
        let mut conditions = Vec::with_capacity(map.len());
        for (field, criterion) in map {
            validate_field_name(field)?;
            match criterion {
                Value::Array(_) => {
                    return Err(FilterError::UnsupportedShape {
                        field: field.clone(),
                        reason: "arrays are not supported".into(),
                    });
                }
                Value::Object(ops) => {
                    if ops.is_empty() {
                        return Err(FilterError::UnsupportedShape {
                            field: field.clone(),
                            reason: "empty operator object".into(),
                        });
                    }
                    for (operator, operand) in ops {
                        let op = FilterOp::from_operator(operator).ok_or_else(|| {
                            FilterError::UnknownOperator {
                                field: field.clone(),
                                operator: operator.clone(),
                            }
                        })?;
                        validate_operand(field, op, operand)?;
                        conditions.push(Condition {
                            field: field.clone(),
                            op,
                            value: operand.clone(),
                        });
                    }
                }
                scalar => conditions.push(Condition {
                    field: field.clone(),
                    op: FilterOp::Eq,
                    value: scalar.clone(),
                }),
            }
        }
        Ok(Self { conditions })
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// True when every condition holds.
    pub fn matches(&self, fields: &FieldMap) -> bool {
        self.conditions.iter().all(|c| c.matches(fields))
    }
}

/// Field names end up inside JSON paths on the relational backend, so they
/// are restricted to a conservative identifier alphabet.
pub fn validate_field_name(field: &str) -> Result<(), FilterError> {
    let valid = !field.is_empty()
        && field.len() <= 64
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(FilterError::InvalidFieldName(field.to_string()))
    }
}

fn validate_operand(field: &str, op: FilterOp, operand: &Value) -> Result<(), FilterError> {
    let shape_err = |reason: &str| FilterError::UnsupportedShape {
        field: field.to_string(),
        reason: reason.to_string(),
    };
    match operand {
        Value::Array(_) | Value::Object(_) => Err(shape_err("operands must be scalars")),
        Value::Null | Value::Bool(_) if op.is_range() => {
            Err(shape_err("range operators need a number or string"))
        }
        _ => Ok(()),
    }
}

fn scalar_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn scalar_cmp(actual: &Value, bound: &Value) -> Option<Ordering> {
    match (actual, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
