//! `ctxbridge-codec` – the structural converter.
//!
//! Translates between native [`Message`][ctxbridge_types::Message] instances
//! and the generic attribute/value documents understood by the context
//! broker, in both directions:
//!
//! ```text
//!   Message ──encode──▶ EntityDocument ──JSON──▶ store
//!   store ──JSON──▶ decode ──▶ ValueTree ──instantiate(shape)──▶ Message
//! ```
//!
//! # Modules
//!
//! - [`entity`] – the store document model and identifier rewrites.
//! - [`encode`] – [`encode`][encode::encode]: message → entity document.
//! - [`decode`] – [`decode`][decode::decode]: entity JSON → value tree.
//! - [`instantiate`] – [`instantiate`][instantiate::instantiate]: value tree
//!   bound against a [`MessageShape`][ctxbridge_types::MessageShape].

pub mod decode;
pub mod encode;
pub mod entity;
pub mod instantiate;

pub use decode::{decode, DecodedEntity};
pub use encode::{encode, EncodeOptions};
pub use entity::{
    entity_id_to_topic, entity_type_to_type, topic_to_entity_id, type_to_entity_type, Attribute,
    AttributeValue, EntityDocument, ARRAY_TAG,
};
pub use instantiate::instantiate;
