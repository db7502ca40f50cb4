//! Result mergers.
//!
//! A [`Merger`] reduces the ordered values gathered from a fan-out into one
//! logical value. Implementations are registered by name in the runtime's
//! merger registry; the automatic path picks one from the shape of the
//! first value when the configured strategy is the implicit default.

use serde_json::{Map, Value};

use crate::error::{Result, RpcError};

/// Strategy names treated as "pick a merger automatically".
pub fn is_default_strategy(name: &str) -> bool {
    name.eq_ignore_ascii_case("true") || name.eq_ignore_ascii_case("default")
}

/// Merger name derived from the shape of a value, for automatic resolution.
pub fn merger_name_for(value: &Value) -> Option<&'static str> {
    match value {
        Value::Array(_) => Some("list"),
        Value::Object(_) => Some("map"),
        _ => None,
    }
}

pub trait Merger: Send + Sync {
    /// `values` follows the candidate listing order.
    fn merge(&self, values: Vec<Value>) -> Result<Value>;
}

/// Concatenates arrays in listing order.
pub struct ListMerger;

impl Merger for ListMerger {
    fn merge(&self, values: Vec<Value>) -> Result<Value> {
        let mut merged = Vec::new();
        for value in values {
            match value {
                Value::Array(items) => merged.extend(items),
                Value::Null => {}
                other => {
                    return Err(RpcError::unsupported(format!(
                        "list merger cannot merge a {}",
                        kind_name(&other)
                    )));
                }
            }
        }
        Ok(Value::Array(merged))
    }
}

/// Array union preserving first-seen order.
pub struct SetMerger;

impl Merger for SetMerger {
    fn merge(&self, values: Vec<Value>) -> Result<Value> {
        let mut merged: Vec<Value> = Vec::new();
        for value in values {
            match value {
                Value::Array(items) => {
                    for item in items {
                        if !merged.contains(&item) {
                            merged.push(item);
                        }
                    }
                }
                Value::Null => {}
                other => {
                    return Err(RpcError::unsupported(format!(
                        "set merger cannot merge a {}",
                        kind_name(&other)
                    )));
                }
            }
        }
        Ok(Value::Array(merged))
    }
}

/// Object merge; on key collision the later candidate wins.
pub struct MapMerger;

impl Merger for MapMerger {
    fn merge(&self, values: Vec<Value>) -> Result<Value> {
        let mut merged = Map::new();
        for value in values {
            match value {
                Value::Object(entries) => merged.extend(entries),
                Value::Null => {}
                other => {
                    return Err(RpcError::unsupported(format!(
                        "map merger cannot merge a {}",
                        kind_name(&other)
                    )));
                }
            }
        }
        Ok(Value::Object(merged))
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
