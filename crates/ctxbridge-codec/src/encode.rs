//! Message → entity document.

use std::collections::BTreeMap;

use ctxbridge_types::{FieldValue, Message, MessageShape, Primitive, TypeShape};
use serde_json::Value;

use crate::entity::{
    topic_to_entity_id, type_to_entity_type, Attribute, AttributeValue, EntityDocument, ARRAY_TAG,
};

/// Characters the store refuses inside attribute values.
const FORBIDDEN_CHARS: &[char] = &['<', '>', '"', '\'', '=', ';', '(', ')'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Emit the `id` member.  Attribute updates address the entity by URL and
    /// leave it out.
    pub include_id: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { include_id: true }
    }
}

/// Encode `message`, published on `topic`, into an entity document.
///
/// Only fields declared in `shape` are emitted, in declaration order; fields
/// the instance does not carry are skipped.  Nested messages become
/// structured attributes typed after the nested message, sequences become
/// `array` attributes.
pub fn encode(
    topic: &str,
    message: &Message,
    shape: &MessageShape,
    options: EncodeOptions,
) -> EntityDocument {
    EntityDocument {
        id: options.include_id.then(|| topic_to_entity_id(topic)),
        entity_type: type_to_entity_type(&shape.type_name),
        attributes: encode_fields(message, Some(shape)),
    }
}

fn encode_fields(message: &Message, shape: Option<&MessageShape>) -> BTreeMap<String, Attribute> {
    match shape {
        Some(shape) => shape
            .fields
            .iter()
            .filter_map(|field| {
                let value = message.fields.get(&field.name)?;
                Some((field.name.clone(), encode_value(value, Some(&field.shape))))
            })
            .collect(),
        // The runtime value disagrees with the declared shape: fall back to
        // the instance's own layout.
        None => message
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), encode_value(value, None)))
            .collect(),
    }
}

fn encode_value(value: &FieldValue, shape: Option<&TypeShape>) -> Attribute {
    match value {
        FieldValue::Message(nested) => {
            let nested_shape = match shape {
                Some(TypeShape::Message(s)) => Some(s),
                _ => None,
            };
            Attribute {
                attr_type: type_to_entity_type(&nested.type_name),
                value: AttributeValue::Structured(encode_fields(nested, nested_shape)),
            }
        }
        FieldValue::Array(items) => {
            let element_shape = match shape {
                Some(TypeShape::Array(element)) => Some(element.as_ref()),
                _ => None,
            };
            Attribute {
                attr_type: ARRAY_TAG.to_string(),
                value: AttributeValue::Array(
                    items.iter().map(|item| encode_value(item, element_shape)).collect(),
                ),
            }
        }
        FieldValue::Primitive(p) => Attribute {
            attr_type: p.kind().store_tag().to_string(),
            value: AttributeValue::Primitive(encode_primitive(p)),
        },
    }
}

fn encode_primitive(p: &Primitive) -> Value {
    match p {
        Primitive::String(s) => Value::String(escape(s)),
        other => other.to_json(),
    }
}

/// Percent-encode a string if it carries anything the store would reject.
/// Strings containing `%` are always encoded so that decoding is lossless.
pub(crate) fn escape(s: &str) -> String {
    if s.contains('%') || s.contains(FORBIDDEN_CHARS) {
        urlencoding::encode(s).into_owned()
    } else {
        s.to_string()
    }
}
