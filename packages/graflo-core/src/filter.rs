//! Filter expressions: logical formulae attached to vertex types.
//!
//! Expressions arrive from schema files in a compact mapping form
//! (`{AND: [...]}`, `{OR: [...]}`, `{NOT: ...}`, `{IF_THEN: [cond, then]}`,
//! leaf `{field, cmp_operator, value}`) and are evaluated two ways: in-memory
//! against a record before a vertex is emitted, or rendered to a backend
//! filter language through a [`FilterDialect`] supplied by the sink.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::errors::{GrafloError, Result};
use crate::onto::Doc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    IsNull,
}

impl ComparisonOperator {
    pub fn parse(s: &str) -> Result<Self> {
        let op = match s {
            "==" | "__eq__" => Self::Eq,
            "!=" | "__ne__" => Self::Ne,
            ">" | "__gt__" => Self::Gt,
            ">=" | "__ge__" => Self::Ge,
            "<" | "__lt__" => Self::Lt,
            "<=" | "__le__" => Self::Le,
            "IS_NULL" => Self::IsNull,
            other => {
                return Err(GrafloError::Validation(format!(
                    "unknown comparison operator: {other}"
                )))
            }
        };
        Ok(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::IsNull => "IS_NULL",
        }
    }
}

/// A single comparison clause against one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub field: String,
    pub operator: ComparisonOperator,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    And(Vec<FilterExpression>),
    Or(Vec<FilterExpression>),
    Not(Box<FilterExpression>),
    /// Material implication: `cond => then`.
    IfThen(Box<FilterExpression>, Box<FilterExpression>),
    Clause(FilterClause),
}

/// Rendering strategy for a backend's native filter language.
///
/// The core only knows the tree shape; a sink implements the leaves and
/// connectives in its own syntax.
pub trait FilterDialect {
    fn clause(&self, field: &str, operator: ComparisonOperator, value: Option<&Value>) -> String;

    fn connect(&self, connective: &str, parts: Vec<String>) -> String {
        format!("({})", parts.join(&format!(" {connective} ")))
    }

    fn negate(&self, inner: String) -> String {
        format!("NOT {inner}")
    }
}

fn cmp_values(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

impl FilterExpression {
    /// Evaluate against an in-memory record. A missing field satisfies only
    /// `IS_NULL`; incomparable values make the clause false.
    pub fn evaluate(&self, doc: &Doc) -> bool {
        match self {
            Self::And(parts) => parts.iter().all(|e| e.evaluate(doc)),
            Self::Or(parts) => parts.iter().any(|e| e.evaluate(doc)),
            Self::Not(inner) => !inner.evaluate(doc),
            Self::IfThen(cond, then) => !cond.evaluate(doc) || then.evaluate(doc),
            Self::Clause(clause) => {
                let current = doc.get(&clause.field).filter(|v| !v.is_null());
                if clause.operator == ComparisonOperator::IsNull {
                    return current.is_none();
                }
                let (Some(current), Some(expected)) = (current, clause.value.as_ref()) else {
                    return false;
                };
                use std::cmp::Ordering::*;
                match cmp_values(current, expected) {
                    Some(ord) => match clause.operator {
                        ComparisonOperator::Eq => ord == Equal,
                        ComparisonOperator::Ne => ord != Equal,
                        ComparisonOperator::Gt => ord == Greater,
                        ComparisonOperator::Ge => ord != Less,
                        ComparisonOperator::Lt => ord == Less,
                        ComparisonOperator::Le => ord != Greater,
                        ComparisonOperator::IsNull => unreachable!(),
                    },
                    None => clause.operator == ComparisonOperator::Ne,
                }
            }
        }
    }

    /// Render through a backend dialect.
    pub fn render(&self, dialect: &dyn FilterDialect) -> String {
        match self {
            Self::And(parts) => {
                dialect.connect("AND", parts.iter().map(|e| e.render(dialect)).collect())
            }
            Self::Or(parts) => {
                dialect.connect("OR", parts.iter().map(|e| e.render(dialect)).collect())
            }
            Self::Not(inner) => dialect.negate(inner.render(dialect)),
            Self::IfThen(cond, then) => {
                // cond => then  ≡  NOT cond OR then
                let negated = dialect.negate(cond.render(dialect));
                dialect.connect("OR", vec![negated, then.render(dialect)])
            }
            Self::Clause(clause) => dialect.clause(
                &clause.field,
                clause.operator,
                clause.value.as_ref(),
            ),
        }
    }

    /// Parse from the compact mapping form used in schema files.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            GrafloError::Validation(format!("filter expression must be a mapping, got {value}"))
        })?;

        if let Some(parts) = obj.get("AND") {
            return Ok(Self::And(Self::list_from(parts)?));
        }
        if let Some(parts) = obj.get("OR") {
            return Ok(Self::Or(Self::list_from(parts)?));
        }
        if let Some(inner) = obj.get("NOT") {
            let inner = match inner {
                Value::Array(items) if items.len() == 1 => &items[0],
                other => other,
            };
            return Ok(Self::Not(Box::new(Self::from_value(inner)?)));
        }
        if let Some(pair) = obj.get("IF_THEN") {
            let items = pair.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                GrafloError::Validation("IF_THEN takes exactly [condition, consequence]".into())
            })?;
            return Ok(Self::IfThen(
                Box::new(Self::from_value(&items[0])?),
                Box::new(Self::from_value(&items[1])?),
            ));
        }

        let field = obj
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| GrafloError::Validation(format!("filter clause needs a field: {value}")))?;
        let op_token = obj
            .get("cmp_operator")
            .or_else(|| obj.get("foo"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GrafloError::Validation(format!("filter clause needs cmp_operator: {value}"))
            })?;
        Ok(Self::Clause(FilterClause {
            field: field.to_string(),
            operator: ComparisonOperator::parse(op_token)?,
            value: obj.get("value").cloned(),
        }))
    }

    fn list_from(value: &Value) -> Result<Vec<Self>> {
        let items = value.as_array().ok_or_else(|| {
            GrafloError::Validation("AND/OR take a list of sub-expressions".into())
        })?;
        items.iter().map(Self::from_value).collect()
    }

    fn to_value(&self) -> Value {
        match self {
            Self::And(parts) => {
                json!({ "AND": parts.iter().map(Self::to_value).collect::<Vec<_>>() })
            }
            Self::Or(parts) => {
                json!({ "OR": parts.iter().map(Self::to_value).collect::<Vec<_>>() })
            }
            Self::Not(inner) => json!({ "NOT": inner.to_value() }),
            Self::IfThen(cond, then) => {
                json!({ "IF_THEN": [cond.to_value(), then.to_value()] })
            }
            Self::Clause(clause) => {
                let mut obj = serde_json::Map::new();
                obj.insert("field".into(), Value::String(clause.field.clone()));
                obj.insert(
                    "cmp_operator".into(),
                    Value::String(clause.operator.as_str().to_string()),
                );
                if let Some(v) = &clause.value {
                    obj.insert("value".into(), v.clone());
                }
                Value::Object(obj)
            }
        }
    }
}

impl Serialize for FilterExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(D::Error::custom)
    }
}
