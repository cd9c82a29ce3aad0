use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error, PartialEq)]
pub enum ScopeExpressionError {
    #[error("Scope expression rule is empty")]
    EmptyRule,
    #[error("Scope expression vocabulary is empty")]
    EmptyData,
    #[error("Unknown operator in scope expression: {0}")]
    UnknownOperator(String),
    #[error("Malformed scope expression rule")]
    MalformedRule,
    #[error("Scope expression references index {0} outside its vocabulary")]
    IndexOutOfRange(usize),
    #[error("Scope expression cannot be satisfied by its own vocabulary")]
    Unsatisfiable,
}

/// Boolean expression over a scope vocabulary.
///
/// `rule` is a nested object of `and` / `or` / `not` operators whose leaves
/// are `{"var": i}` references indexing into `data`. A leaf is true when
/// the scope it names has been granted.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct ScopeExpression {
    #[schema(value_type = Object)]
    pub rule: Value,
    pub data: Vec<String>,
}

impl ScopeExpression {
    /// Check the expression is well formed: non-empty rule and vocabulary,
    /// known operators only, every `var` index inside the vocabulary, and
    /// the rule satisfiable when every vocabulary scope is granted.
    pub fn validate(&self) -> Result<(), ScopeExpressionError> {
        if self.rule.is_null() {
            return Err(ScopeExpressionError::EmptyRule);
        }
        if self.data.is_empty() {
            return Err(ScopeExpressionError::EmptyData);
        }
        let all: HashSet<&str> = self.data.iter().map(String::as_str).collect();
        if !self.evaluate_against(&all)? {
            return Err(ScopeExpressionError::Unsatisfiable);
        }
        Ok(())
    }

    /// Evaluate the rule against a set of granted scopes
    pub fn evaluate(&self, granted: &[String]) -> Result<bool, ScopeExpressionError> {
        let granted: HashSet<&str> = granted.iter().map(String::as_str).collect();
        self.evaluate_against(&granted)
    }

    /// The scopes to request in a permission ticket: the full vocabulary,
    /// so the AS can grant any combination the rule might accept
    pub fn ticket_scopes(&self) -> Vec<String> {
        self.data.clone()
    }

    fn evaluate_against(&self, granted: &HashSet<&str>) -> Result<bool, ScopeExpressionError> {
        eval(&self.rule, &self.data, granted)
    }
}

fn eval(rule: &Value, data: &[String], granted: &HashSet<&str>) -> Result<bool, ScopeExpressionError> {
    match rule {
        Value::Bool(value) => Ok(*value),
        Value::Object(map) if map.len() == 1 => {
            // single-operator object, checked above
            let (operator, argument) = match map.iter().next() {
                Some(entry) => entry,
                None => return Err(ScopeExpressionError::MalformedRule),
            };
            match operator.as_str() {
                "and" => {
                    let operands = operands(argument)?;
                    for operand in operands {
                        if !eval(operand, data, granted)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                "or" => {
                    let operands = operands(argument)?;
                    for operand in operands {
                        if eval(operand, data, granted)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                "not" | "!" => {
                    let operand = match argument {
                        Value::Array(items) if items.len() == 1 => &items[0],
                        Value::Array(_) => return Err(ScopeExpressionError::MalformedRule),
                        other => other,
                    };
                    Ok(!eval(operand, data, granted)?)
                }
                "var" => {
                    let index = argument
                        .as_u64()
                        .map(|raw| raw as usize)
                        .ok_or(ScopeExpressionError::MalformedRule)?;
                    let scope = data
                        .get(index)
                        .ok_or(ScopeExpressionError::IndexOutOfRange(index))?;
                    Ok(granted.contains(scope.as_str()))
                }
                other => Err(ScopeExpressionError::UnknownOperator(other.to_string())),
            }
        }
        _ => Err(ScopeExpressionError::MalformedRule),
    }
}

fn operands(argument: &Value) -> Result<&Vec<Value>, ScopeExpressionError> {
    match argument {
        Value::Array(items) if !items.is_empty() => Ok(items),
        _ => Err(ScopeExpressionError::MalformedRule),
    }
}
