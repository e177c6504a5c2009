//! Value tree → concrete message, guided by the bound type's shape.

use ctxbridge_types::{FieldValue, Message, MessageShape, Primitive, PrimitiveKind, TypeShape, ValueTree};
use serde_json::Value;

/// Build a [`Message`] of type `shape` from a decoded tree.
///
/// The walk is driven by the shape: structured fields recurse, array fields
/// instantiate each element, primitive fields are coerced into their declared
/// kind.  Fields missing from the tree (or of the wrong form) keep their zero
/// value.
pub fn instantiate(tree: &ValueTree, shape: &MessageShape) -> Message {
    let mut message = Message::default_for(shape);
    for field in &shape.fields {
        if let Some(node) = tree.get(&field.name) {
            message
                .fields
                .insert(field.name.clone(), instantiate_value(node, &field.shape));
        }
    }
    message
}

fn instantiate_value(node: &ValueTree, shape: &TypeShape) -> FieldValue {
    match shape {
        TypeShape::Message(nested) => FieldValue::Message(instantiate(node, nested)),
        TypeShape::Array(element) => match node {
            ValueTree::Seq(items) => {
                FieldValue::Array(items.iter().map(|item| instantiate_value(item, element)).collect())
            }
            // Plain JSON arrays of primitives.
            ValueTree::Leaf(Value::Array(items)) => FieldValue::Array(
                items
                    .iter()
                    .map(|item| instantiate_value(&ValueTree::Leaf(item.clone()), element))
                    .collect(),
            ),
            _ => FieldValue::Array(Vec::new()),
        },
        TypeShape::Primitive(kind) => FieldValue::Primitive(coerce(*kind, node)),
    }
}

/// Coerce a leaf into `kind`.  Numeric and boolean strings are parsed; a
/// value that cannot be represented yields the zero value.
pub fn coerce(kind: PrimitiveKind, node: &ValueTree) -> Primitive {
    let ValueTree::Leaf(value) = node else {
        return Primitive::zero(kind);
    };
    let coerced = match kind {
        PrimitiveKind::Bool => match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|i| i != 0),
            Value::String(s) => match s.trim() {
                "true" | "True" | "1" => Some(true),
                "false" | "False" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
        .map(Primitive::Bool),
        PrimitiveKind::Int => match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(Primitive::Int),
        PrimitiveKind::UInt => match value {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(Primitive::UInt),
        PrimitiveKind::Float => match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(Primitive::Float),
        PrimitiveKind::String => match value {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
        .map(Primitive::String),
    };
    coerced.unwrap_or_else(|| Primitive::zero(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, encode, EncodeOptions};
    use ctxbridge_types::{StaticTypeResolver, TypeResolver};
    use serde_json::json;

    fn resolver() -> StaticTypeResolver {
        StaticTypeResolver::common()
    }

    fn pose(x: f64, w: f64) -> Message {
        Message::new("geometry_msgs/Pose")
            .with(
                "position",
                Message::new("geometry_msgs/Point").with("x", x).with("y", -2.5).with("z", 0.25),
            )
            .with(
                "orientation",
                Message::new("geometry_msgs/Quaternion")
                    .with("x", 0.0)
                    .with("y", 0.0)
                    .with("z", 0.7071)
                    .with("w", w),
            )
    }

    #[test]
    fn encode_decode_instantiate_reconstructs_the_message() {
        let shape = resolver().resolve("geometry_msgs/Pose").unwrap();
        let original = pose(1.0, 0.7071);

        let wire = encode("/robot1/pose", &original, &shape, EncodeOptions::default()).to_json();
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded.topic, "/robot1/pose");
        assert_eq!(decoded.type_name, shape.type_name);

        let rebuilt = instantiate(&decoded.value, &shape);
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn arrays_and_strings_survive_the_trip() {
        let shape = resolver().resolve("geometry_msgs/PoseArray").unwrap();
        let original = Message::new("geometry_msgs/PoseArray")
            .with(
                "header",
                Message::new("std_msgs/Header")
                    .with(
                        "stamp",
                        Message::new("builtin_interfaces/Time")
                            .with("sec", 1_700_000_000_i64)
                            .with("nanosec", FieldValue::Primitive(Primitive::UInt(42))),
                    )
                    .with("frame_id", "map (local); a=b"),
            )
            .with("poses", FieldValue::Array(vec![pose(1.0, 1.0).into(), pose(3.0, 0.5).into()]));

        let wire = encode("/fleet/poses", &original, &shape, EncodeOptions::default()).to_json();
        let decoded = decode(&wire).unwrap();
        assert_eq!(instantiate(&decoded.value, &shape), original);
    }

    #[test]
    fn non_finite_floats_survive_the_trip() {
        let shape = resolver().resolve("std_msgs/Float64").unwrap();
        let rebuild = |data: f64| {
            let original = Message::new("std_msgs/Float64").with("data", data);
            let wire = encode("/sonar/range", &original, &shape, EncodeOptions::default()).to_json();
            let decoded = decode(&wire).unwrap();
            match instantiate(&decoded.value, &shape).get("data") {
                Some(FieldValue::Primitive(Primitive::Float(f))) => *f,
                other => panic!("unexpected data field: {other:?}"),
            }
        };
        assert_eq!(rebuild(f64::INFINITY), f64::INFINITY);
        assert_eq!(rebuild(f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert!(rebuild(f64::NAN).is_nan());
    }

    #[test]
    fn missing_fields_keep_zero_values() {
        let shape = resolver().resolve("geometry_msgs/Pose").unwrap();
        let decoded = decode(&json!({
            "id": "robot1.pose",
            "type": "geometry_msgs.Pose",
            "position": {"type": "StructuredPoint", "value": {"x": {"type": "float", "value": "1.0"}}}
        }))
        .unwrap();
        let msg = instantiate(&decoded.value, &shape);
        assert_eq!(msg.path(&["position", "x"]), Some(&FieldValue::Primitive(Primitive::Float(1.0))));
        assert_eq!(msg.path(&["position", "y"]), Some(&FieldValue::Primitive(Primitive::Float(0.0))));
        assert_eq!(msg.path(&["orientation", "w"]), Some(&FieldValue::Primitive(Primitive::Float(0.0))));
    }

    #[test]
    fn coerce_parses_strings_and_falls_back_to_zero() {
        let leaf = |v: Value| ValueTree::Leaf(v);
        assert_eq!(coerce(PrimitiveKind::Int, &leaf(json!("17"))), Primitive::Int(17));
        assert_eq!(coerce(PrimitiveKind::UInt, &leaf(json!(-3))), Primitive::UInt(0));
        assert_eq!(coerce(PrimitiveKind::Bool, &leaf(json!("true"))), Primitive::Bool(true));
        assert_eq!(coerce(PrimitiveKind::Float, &leaf(json!("abc"))), Primitive::Float(0.0));
        assert_eq!(coerce(PrimitiveKind::String, &leaf(json!(5))), Primitive::String("5".into()));
        assert_eq!(coerce(PrimitiveKind::Float, &ValueTree::empty("x")), Primitive::Float(0.0));
    }

    #[test]
    fn primitive_arrays_accept_plain_json_lists() {
        let shape = MessageShape::new("custom/Ranges")
            .with_field("ranges", TypeShape::array_of(PrimitiveKind::Float.into()));
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("ranges".to_string(), ValueTree::Leaf(json!([1.5, "2.5"])));
        let tree = ValueTree::Node { type_name: "custom/Ranges".into(), fields };
        let msg = instantiate(&tree, &shape);
        assert_eq!(
            msg.get("ranges"),
            Some(&FieldValue::Array(vec![
                FieldValue::Primitive(Primitive::Float(1.5)),
                FieldValue::Primitive(Primitive::Float(2.5)),
            ]))
        );
    }
}
