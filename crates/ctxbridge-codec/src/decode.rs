//! Entity document → value tree.
//!
//! Decoding never consults the type registry: structured attributes become
//! [`ValueTree::Node`]s tagged with the store-side type, sequences become
//! [`ValueTree::Seq`], everything else is kept as a raw JSON leaf.  Binding
//! the tree to a concrete message type is [`instantiate`][crate::instantiate]'s
//! job.

use std::collections::BTreeMap;

use ctxbridge_types::{BridgeError, ValueTree};
use serde_json::{Map, Value};
use tracing::debug;

use crate::entity::{entity_id_to_topic, entity_type_to_type, ARRAY_TAG};

/// A store entity decoded back into topic/type form.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEntity {
    /// Topic path, e.g. `/robot1/pose`.
    pub topic: String,
    /// Native type name, e.g. `geometry_msgs/Pose`.
    pub type_name: String,
    /// Root node; its `type_name` equals [`DecodedEntity::type_name`].
    pub value: ValueTree,
}

/// Decode one entity document.
///
/// The `id`/`type` envelope is stripped and rewritten into path form; every
/// other member is decoded as an attribute.
///
/// # Errors
///
/// [`BridgeError::MalformedNotification`] when the document is not an object
/// or lacks a string `id` / `type`.
pub fn decode(document: &Value) -> Result<DecodedEntity, BridgeError> {
    let obj = document
        .as_object()
        .ok_or_else(|| BridgeError::MalformedNotification("entity is not a JSON object".into()))?;
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::MalformedNotification("entity has no string id".into()))?;
    let entity_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::MalformedNotification(format!("entity {id} has no string type")))?;

    let type_name = entity_type_to_type(entity_type);
    let fields = obj
        .iter()
        .filter(|(name, _)| name.as_str() != "id" && name.as_str() != "type")
        .map(|(name, attr)| (name.clone(), decode_attribute(attr)))
        .collect();

    Ok(DecodedEntity {
        topic: entity_id_to_topic(id),
        value: ValueTree::Node {
            type_name: type_name.clone(),
            fields,
        },
        type_name,
    })
}

fn decode_attribute(attr: &Value) -> ValueTree {
    let Some(obj) = attr.as_object() else {
        // Bare primitives show up inside arrays written by other producers.
        return ValueTree::Leaf(decode_primitive(attr));
    };
    let (Some(attr_type), Some(value)) = (obj.get("type").and_then(Value::as_str), obj.get("value"))
    else {
        debug!(attribute = %attr, "attribute without type/value pair, decoding as empty");
        return ValueTree::empty("");
    };

    match value {
        Value::Array(items) if attr_type == ARRAY_TAG => {
            ValueTree::Seq(items.iter().map(decode_attribute).collect())
        }
        Value::Object(members) => ValueTree::Node {
            type_name: entity_type_to_type(attr_type),
            fields: decode_members(members),
        },
        other => ValueTree::Leaf(decode_primitive(other)),
    }
}

fn decode_members(members: &Map<String, Value>) -> BTreeMap<String, ValueTree> {
    members
        .iter()
        .map(|(name, attr)| (name.clone(), decode_attribute(attr)))
        .collect()
}

fn decode_primitive(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(unescape(s)),
        other => other.clone(),
    }
}

/// Inverse of the encoder's escaping.  Strings that are not valid
/// percent-encoding are returned unchanged.
pub(crate) fn unescape(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }
    urlencoding::decode(s)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| s.to_string())
}
