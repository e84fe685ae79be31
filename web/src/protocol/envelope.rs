//! Self-describing response envelopes.
//!
//! | node | envelope |
//! |------|----------|
//! | object | `{$id, $hash, $ref, $type, ...members[, $prototype]}` |
//! | scalar, array, date | `{$ref, $path: "payload", $type, payload}` |
//! | function | `{$ref, $type: "Function", $method: "post", $args, ...props}` |
//! | nothing | `{$ref, $path: "payload", $type: "undefined"}` |

use super::hash::stamp;
use super::path::is_private;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use svchost_core::{Description, Exposed, Function, Layer, Node, Result};

/// Nesting depth at which exposed objects inside an envelope are cut off.
pub const MAX_SNAPSHOT_DEPTH: usize = 8;

/// Envelope for `node`, addressed by `reference`.
///
/// # Errors
///
/// Propagates content-hash failures for object envelopes.
pub fn encode(node: &Node, reference: &str) -> Result<Value> {
    Ok(match node {
        Node::Undefined => json!({
            "$ref": reference,
            "$path": "payload",
            "$type": "undefined",
        }),
        Node::Data(Value::Object(map)) => encode_data_object(map, reference)?,
        Node::Data(value) => scalar(value.clone(), data_type(value), reference),
        Node::Date(date) => scalar(date_value(date), "Date", reference),
        Node::Function(function) => function_descriptor(function, reference),
        Node::Object(object) => encode_object(object, reference)?,
    })
}

/// `$ref` of member `name` below `reference`.
#[must_use]
pub fn member_ref(reference: &str, name: &str) -> String {
    format!(
        "{}/{}",
        reference.trim_end_matches('/'),
        urlencoding::encode(name)
    )
}

/// Descriptor telling clients how to call `function`.
#[must_use]
pub fn function_descriptor(function: &Function, reference: &str) -> Value {
    let mut body = Map::new();
    for (name, value) in function.properties() {
        if !is_private(name) {
            body.insert(name.clone(), value.clone());
        }
    }
    body.insert("$ref".to_string(), json!(reference));
    body.insert("$type".to_string(), json!("Function"));
    body.insert("$method".to_string(), json!("post"));
    body.insert("$args".to_string(), json!(function.params()));
    Value::Object(body)
}

fn scalar(payload: Value, type_name: &str, reference: &str) -> Value {
    json!({
        "$ref": reference,
        "$path": "payload",
        "$type": type_name,
        "payload": payload,
    })
}

const fn data_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

fn date_value(date: &DateTime<Utc>) -> Value {
    Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn encode_data_object(map: &Map<String, Value>, reference: &str) -> Result<Value> {
    let mut body: Map<String, Value> = map
        .iter()
        .filter(|(name, _)| !is_private(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    body.insert("$ref".to_string(), json!(reference));
    body.insert("$type".to_string(), json!("Object"));
    stamp(&mut body)?;
    Ok(Value::Object(body))
}

fn encode_object(object: &Arc<dyn Exposed>, reference: &str) -> Result<Value> {
    let type_names = object.type_names();
    let description = Arc::clone(object).describe();

    let mut body = Map::new();
    for (name, node) in description.members() {
        if is_private(name) {
            continue;
        }
        let value = match node {
            Node::Function(function) => Some(function_descriptor(function, &member_ref(reference, name))),
            other => snapshot(other, MAX_SNAPSHOT_DEPTH),
        };
        if let Some(value) = value {
            body.insert(name.clone(), value);
        }
    }
    body.insert("$ref".to_string(), json!(reference));
    body.insert("$type".to_string(), type_value(&type_names));
    stamp(&mut body)?;

    if let Some(prototype) = prototype(description.layers(), reference)? {
        body.insert("$prototype".to_string(), prototype);
    }
    Ok(Value::Object(body))
}

/// `$type` is a bare string for a single name, otherwise the chain.
fn type_value(names: &[String]) -> Value {
    match names {
        [single] => json!(single),
        many => json!(many),
    }
}

/// Prototype envelope for the first layer, chaining the rest below it.
fn prototype(layers: &[Layer], reference: &str) -> Result<Option<Value>> {
    let Some((layer, rest)) = layers.split_first() else {
        return Ok(None);
    };

    let mut body = Map::new();
    for (name, function) in layer.methods() {
        if !is_private(name) {
            body.insert(name.clone(), function_descriptor(function, &member_ref(reference, name)));
        }
    }
    body.insert("$ref".to_string(), json!(reference));
    body.insert("$name".to_string(), json!(layer.name()));
    body.insert(
        "$type".to_string(),
        json!(layers.iter().map(Layer::name).collect::<Vec<_>>()),
    );
    stamp(&mut body)?;

    if let Some(parent) = prototype(rest, reference)? {
        body.insert("$prototype".to_string(), parent);
    }
    Ok(Some(Value::Object(body)))
}

/// Plain data view of a member. Functions and missing values are skipped.
fn snapshot(node: &Node, depth: usize) -> Option<Value> {
    match node {
        Node::Undefined | Node::Function(_) => None,
        Node::Data(value) => Some(value.clone()),
        Node::Date(date) => Some(date_value(date)),
        Node::Object(_) if depth == 0 => Some(Value::Null),
        Node::Object(object) => Some(snapshot_description(&Arc::clone(object).describe(), depth - 1)),
    }
}

fn snapshot_description(description: &Description, depth: usize) -> Value {
    Value::Object(
        description
            .members()
            .iter()
            .filter(|(name, _)| !is_private(name))
            .filter_map(|(name, node)| snapshot(node, depth).map(|value| (name.clone(), value)))
            .collect(),
    )
}
