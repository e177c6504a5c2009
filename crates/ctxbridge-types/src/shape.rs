//! Type shape descriptors.
//!
//! A [`MessageShape`] mirrors the field layout of one native message type.
//! Shapes are recursive: a field is either a primitive, a nested message or
//! an array of one of those.  They are built once per type name (see
//! `ShapeRegistry` in `ctxbridge-middleware`) and never change afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::transport::TypeResolver;
use crate::BridgeError;

/// Leaf kinds a message field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Bool,
    Int,
    UInt,
    Float,
    String,
}

impl PrimitiveKind {
    /// Map a native slot type (`"float64"`, `"uint8"`, …) to its kind.
    pub fn from_native(slot_type: &str) -> Option<Self> {
        match slot_type {
            "bool" => Some(PrimitiveKind::Bool),
            "int8" | "int16" | "int32" | "int64" | "byte" => Some(PrimitiveKind::Int),
            "uint8" | "uint16" | "uint32" | "uint64" | "char" => Some(PrimitiveKind::UInt),
            "float32" | "float64" => Some(PrimitiveKind::Float),
            "string" => Some(PrimitiveKind::String),
            _ => None,
        }
    }

    /// Attribute `type` tag used on the store side.
    pub fn store_tag(self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "boolean",
            PrimitiveKind::Int | PrimitiveKind::UInt => "int",
            PrimitiveKind::Float => "float",
            PrimitiveKind::String => "string",
        }
    }
}

/// Shape of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "lowercase")]
pub enum TypeShape {
    Primitive(PrimitiveKind),
    Message(MessageShape),
    Array(Box<TypeShape>),
}

impl TypeShape {
    pub fn array_of(element: TypeShape) -> Self {
        TypeShape::Array(Box::new(element))
    }
}

impl From<PrimitiveKind> for TypeShape {
    fn from(kind: PrimitiveKind) -> Self {
        TypeShape::Primitive(kind)
    }
}

impl From<MessageShape> for TypeShape {
    fn from(shape: MessageShape) -> Self {
        TypeShape::Message(shape)
    }
}

/// A named field inside a [`MessageShape`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldShape {
    pub name: String,
    pub shape: TypeShape,
}

/// Field layout of one native message type, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageShape {
    /// Fully qualified type name, e.g. `"geometry_msgs/Pose"`.
    pub type_name: String,
    pub fields: Vec<FieldShape>,
}

impl MessageShape {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field (builder-style).
    pub fn with_field(mut self, name: impl Into<String>, shape: impl Into<TypeShape>) -> Self {
        self.fields.push(FieldShape {
            name: name.into(),
            shape: shape.into(),
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&TypeShape> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.shape)
    }

    /// Top-level field names, in declaration order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// StaticTypeResolver
// ---------------------------------------------------------------------------

/// A [`TypeResolver`] backed by an in-memory table of shapes.
///
/// [`StaticTypeResolver::common`] pre-registers the handful of standard
/// message types the bridge is usually pointed at; deployments with custom
/// messages call [`register`][Self::register] for each of them.
#[derive(Debug, Clone, Default)]
pub struct StaticTypeResolver {
    types: HashMap<String, MessageShape>,
}

impl StaticTypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the shape for `shape.type_name`.
    pub fn register(&mut self, shape: MessageShape) -> &mut Self {
        self.types.insert(shape.type_name.clone(), shape);
        self
    }

    /// Resolver pre-loaded with common `std_msgs` / `geometry_msgs` types.
    pub fn common() -> Self {
        use PrimitiveKind::*;

        let time = MessageShape::new("builtin_interfaces/Time")
            .with_field("sec", Int)
            .with_field("nanosec", UInt);
        let header = MessageShape::new("std_msgs/Header")
            .with_field("stamp", time.clone())
            .with_field("frame_id", String);
        let vector3 = MessageShape::new("geometry_msgs/Vector3")
            .with_field("x", Float)
            .with_field("y", Float)
            .with_field("z", Float);
        let point = MessageShape::new("geometry_msgs/Point")
            .with_field("x", Float)
            .with_field("y", Float)
            .with_field("z", Float);
        let quaternion = MessageShape::new("geometry_msgs/Quaternion")
            .with_field("x", Float)
            .with_field("y", Float)
            .with_field("z", Float)
            .with_field("w", Float);
        let pose = MessageShape::new("geometry_msgs/Pose")
            .with_field("position", point.clone())
            .with_field("orientation", quaternion.clone());
        let pose_stamped = MessageShape::new("geometry_msgs/PoseStamped")
            .with_field("header", header.clone())
            .with_field("pose", pose.clone());
        let pose_array = MessageShape::new("geometry_msgs/PoseArray")
            .with_field("header", header.clone())
            .with_field("poses", TypeShape::array_of(pose.clone().into()));
        let twist = MessageShape::new("geometry_msgs/Twist")
            .with_field("linear", vector3.clone())
            .with_field("angular", vector3.clone());

        let mut resolver = Self::new();
        resolver
            .register(MessageShape::new("std_msgs/String").with_field("data", String))
            .register(MessageShape::new("std_msgs/Bool").with_field("data", Bool))
            .register(MessageShape::new("std_msgs/Int32").with_field("data", Int))
            .register(MessageShape::new("std_msgs/Float64").with_field("data", Float))
            .register(time)
            .register(header)
            .register(vector3)
            .register(point)
            .register(quaternion)
            .register(pose)
            .register(pose_stamped)
            .register(pose_array)
            .register(twist);
        resolver
    }
}

impl TypeResolver for StaticTypeResolver {
    fn resolve(&self, type_name: &str) -> Result<MessageShape, BridgeError> {
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownType(type_name.to_string()))
    }
}
