//! Store-side entity documents (NGSIv2 shape).
//!
//! ```json
//! { "id": ".robot1.pose", "type": "geometry_msgs.Pose",
//!   "position": { "type": "geometry_msgs.Point",
//!                 "value": { "x": { "type": "float", "value": 1.0 }, … } } }
//! ```

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Attribute `type` tag marking a sequence.
pub const ARRAY_TAG: &str = "array";

/// Separator the store accepts inside entity ids and types.
const STORE_DELIMITER: char = '.';
const PATH_DELIMITER: char = '/';
const LEGACY_ENCODED_DELIMITER: &str = "%2F";

/// `/robot1/pose` → `.robot1.pose`
pub fn topic_to_entity_id(topic: &str) -> String {
    topic.replace(PATH_DELIMITER, &STORE_DELIMITER.to_string())
}

/// `geometry_msgs/Pose` → `geometry_msgs.Pose`
pub fn type_to_entity_type(type_name: &str) -> String {
    type_name.replace(PATH_DELIMITER, &STORE_DELIMITER.to_string())
}

/// Inverse of [`topic_to_entity_id`].
pub fn entity_id_to_topic(id: &str) -> String {
    to_path_form(id)
}

/// Inverse of [`type_to_entity_type`].  Also accepts `%2F` separators.
pub fn entity_type_to_type(entity_type: &str) -> String {
    to_path_form(entity_type)
}

fn to_path_form(s: &str) -> String {
    s.replace(LEGACY_ENCODED_DELIMITER, "/")
        .replace(STORE_DELIMITER, &PATH_DELIMITER.to_string())
}

/// One entity as exchanged with the store.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDocument {
    /// Omitted for attribute updates, which address the entity by URL.
    pub id: Option<String>,
    pub entity_type: String,
    pub attributes: BTreeMap<String, Attribute>,
}

impl EntityDocument {
    /// Full document: `id`, `type` and every attribute.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(id) = &self.id {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        map.insert("type".to_string(), Value::String(self.entity_type.clone()));
        for (name, attr) in &self.attributes {
            map.insert(name.clone(), attr.to_json());
        }
        Value::Object(map)
    }

    /// Attributes only, as expected by `POST /v2/entities/{id}/attrs`.
    pub fn attributes_json(&self) -> Value {
        Value::Object(
            self.attributes
                .iter()
                .map(|(name, attr)| (name.clone(), attr.to_json()))
                .collect(),
        )
    }
}

impl Serialize for EntityDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// A typed attribute: `{ "type": …, "value": … }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub attr_type: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Primitive(Value),
    Structured(BTreeMap<String, Attribute>),
    Array(Vec<Attribute>),
}

impl Attribute {
    pub fn to_json(&self) -> Value {
        let value = match &self.value {
            AttributeValue::Primitive(v) => v.clone(),
            AttributeValue::Structured(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, attr)| (name.clone(), attr.to_json()))
                    .collect(),
            ),
            AttributeValue::Array(items) => Value::Array(items.iter().map(Attribute::to_json).collect()),
        };
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(self.attr_type.clone()));
        map.insert("value".to_string(), value);
        Value::Object(map)
    }
}
