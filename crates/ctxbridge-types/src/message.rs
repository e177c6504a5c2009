//! Native message instances and decoded value trees.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shape::{MessageShape, PrimitiveKind, TypeShape};

/// A primitive field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl Primitive {
    /// Zero value of `kind`.
    pub fn zero(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Bool => Primitive::Bool(false),
            PrimitiveKind::Int => Primitive::Int(0),
            PrimitiveKind::UInt => Primitive::UInt(0),
            PrimitiveKind::Float => Primitive::Float(0.0),
            PrimitiveKind::String => Primitive::String(String::new()),
        }
    }

    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Bool(_) => PrimitiveKind::Bool,
            Primitive::Int(_) => PrimitiveKind::Int,
            Primitive::UInt(_) => PrimitiveKind::UInt,
            Primitive::Float(_) => PrimitiveKind::Float,
            Primitive::String(_) => PrimitiveKind::String,
        }
    }

    /// JSON rendering.  Non-finite floats have no JSON number form and are
    /// written as the strings `"inf"`, `"-inf"` and `"NaN"`, which parse back
    /// with `str::parse::<f64>`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Primitive::Bool(b) => serde_json::Value::Bool(*b),
            Primitive::Int(i) => serde_json::Value::from(*i),
            Primitive::UInt(u) => serde_json::Value::from(*u),
            Primitive::Float(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => serde_json::Value::Number(n),
                None if f.is_nan() => serde_json::Value::String("NaN".to_string()),
                None if *f > 0.0 => serde_json::Value::String("inf".to_string()),
                None => serde_json::Value::String("-inf".to_string()),
            },
            Primitive::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Value held by one message field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Primitive(Primitive),
    Message(Message),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    /// Zero/default value for a field of the given shape.
    pub fn default_for(shape: &TypeShape) -> Self {
        match shape {
            TypeShape::Primitive(kind) => FieldValue::Primitive(Primitive::zero(*kind)),
            TypeShape::Message(nested) => FieldValue::Message(Message::default_for(nested)),
            TypeShape::Array(_) => FieldValue::Array(Vec::new()),
        }
    }
}

impl From<Primitive> for FieldValue {
    fn from(p: Primitive) -> Self {
        FieldValue::Primitive(p)
    }
}

impl From<Message> for FieldValue {
    fn from(m: Message) -> Self {
        FieldValue::Message(m)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Primitive(Primitive::Float(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Primitive(Primitive::Int(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Primitive(Primitive::Bool(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Primitive(Primitive::String(v.to_string()))
    }
}

/// A native message instance as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub type_name: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Message {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Set a field (builder-style).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// An instance of `shape` with every field at its zero value.
    pub fn default_for(shape: &MessageShape) -> Self {
        let fields = shape
            .fields
            .iter()
            .map(|f| (f.name.clone(), FieldValue::default_for(&f.shape)))
            .collect();
        Self {
            type_name: shape.type_name.clone(),
            fields,
        }
    }

    /// Follow a dotted field path, e.g. `["pose", "position", "x"]`.
    pub fn path(&self, path: &[&str]) -> Option<&FieldValue> {
        let (first, rest) = path.split_first()?;
        let mut current = self.fields.get(*first)?;
        for name in rest {
            match current {
                FieldValue::Message(m) => current = m.fields.get(*name)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

// ---------------------------------------------------------------------------
// ValueTree
// ---------------------------------------------------------------------------

/// Decoded store document, before it is bound to a concrete native type.
///
/// Internal nodes carry the store-side type tag so that instantiation can
/// later pick the right native type; leaves carry raw JSON primitives.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTree {
    Leaf(serde_json::Value),
    Node {
        type_name: String,
        fields: BTreeMap<String, ValueTree>,
    },
    Seq(Vec<ValueTree>),
}

impl ValueTree {
    /// An internal node without any attributes.
    pub fn empty(type_name: impl Into<String>) -> Self {
        ValueTree::Node {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            ValueTree::Node { type_name, .. } => Some(type_name),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ValueTree> {
        match self {
            ValueTree::Node { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    pub fn path(&self, path: &[&str]) -> Option<&ValueTree> {
        path.iter().try_fold(self, |node, name| node.get(name))
    }

    /// Numeric view of a leaf; numeric strings such as `"1.0"` are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ValueTree::Leaf(serde_json::Value::Number(n)) => n.as_f64(),
            ValueTree::Leaf(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ValueTree::Leaf(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::StaticTypeResolver;
    use crate::transport::TypeResolver;

    #[test]
    fn non_finite_floats_render_as_parsable_strings() {
        assert_eq!(Primitive::Float(f64::INFINITY).to_json(), serde_json::json!("inf"));
        assert_eq!(Primitive::Float(f64::NEG_INFINITY).to_json(), serde_json::json!("-inf"));
        assert_eq!(Primitive::Float(f64::NAN).to_json(), serde_json::json!("NaN"));
        assert_eq!(Primitive::Float(0.5).to_json(), serde_json::json!(0.5));
        assert_eq!("-inf".parse::<f64>(), Ok(f64::NEG_INFINITY));
        assert!("NaN".parse::<f64>().is_ok_and(f64::is_nan));
    }

    #[test]
    fn default_for_fills_every_field() {
        let shape = StaticTypeResolver::common().resolve("geometry_msgs/Pose").unwrap();
        let msg = Message::default_for(&shape);
        assert_eq!(msg.type_name, "geometry_msgs/Pose");
        assert_eq!(
            msg.path(&["orientation", "w"]),
            Some(&FieldValue::Primitive(Primitive::Float(0.0)))
        );
        match msg.get("position") {
            Some(FieldValue::Message(p)) => assert_eq!(p.type_name, "geometry_msgs/Point"),
            other => panic!("expected nested message, got {other:?}"),
        }
    }

    #[test]
    fn default_array_is_empty() {
        let shape = StaticTypeResolver::common().resolve("geometry_msgs/PoseArray").unwrap();
        let msg = Message::default_for(&shape);
        assert_eq!(msg.get("poses"), Some(&FieldValue::Array(Vec::new())));
    }

    #[test]
    fn value_tree_numeric_strings_parse() {
        let leaf = ValueTree::Leaf(serde_json::json!("1.0"));
        assert_eq!(leaf.as_f64(), Some(1.0));
        let leaf = ValueTree::Leaf(serde_json::json!(2));
        assert_eq!(leaf.as_f64(), Some(2.0));
        assert_eq!(ValueTree::empty("x").as_f64(), None);
    }

    #[test]
    fn value_tree_path_walks_nodes() {
        let mut inner = BTreeMap::new();
        inner.insert("x".to_string(), ValueTree::Leaf(serde_json::json!(3.0)));
        let mut outer = BTreeMap::new();
        outer.insert(
            "position".to_string(),
            ValueTree::Node { type_name: "geometry_msgs.Point".into(), fields: inner },
        );
        let tree = ValueTree::Node { type_name: "geometry_msgs.Pose".into(), fields: outer };
        assert_eq!(tree.path(&["position", "x"]).and_then(ValueTree::as_f64), Some(3.0));
        assert!(tree.path(&["position", "y"]).is_none());
    }
}
