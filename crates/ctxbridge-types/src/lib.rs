//! `ctxbridge-types` – shared vocabulary of the bridge.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here:
//!
//! - [`shape`] – [`MessageShape`] / [`TypeShape`]: the recursive field layout
//!   of a native message type.
//! - [`message`] – [`Message`] (a native message instance), and [`ValueTree`]
//!   (a decoded store notification waiting to be instantiated).
//! - [`transport`] – the [`Transport`] and [`TypeResolver`] seams behind which
//!   the robot's publish/subscribe runtime lives.
//! - [`config`] – [`BridgeConfig`], the values consumed by the bridge core.

pub mod config;
pub mod message;
pub mod shape;
pub mod transport;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::{BridgeConfig, BrokerConfig, EndpointConfig, SubscriptionConfig};
pub use message::{FieldValue, Message, Primitive, ValueTree};
pub use shape::{FieldShape, MessageShape, PrimitiveKind, StaticTypeResolver, TypeShape};
pub use transport::{
    MessageCallback, PublisherOptions, Transport, TransportPublisher, TransportSubscription,
    TypeResolver,
};

/// Direction a whitelisted topic is bridged in.
///
/// The naming follows the bridge's own point of view on the transport:
/// a `Publisher` topic is one the bridge *publishes onto* (store → robot),
/// a `Subscriber` topic is one the bridge *subscribes to* (robot → store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicRole {
    Publisher,
    Subscriber,
}

impl std::fmt::Display for TopicRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicRole::Publisher => write!(f, "publisher"),
            TopicRole::Subscriber => write!(f, "subscriber"),
        }
    }
}

/// Error type shared by the whole bridge.
///
/// None of these are fatal to the process: callers log them and keep the
/// owning loop alive.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Store integration is disabled because no broker was configured.
    #[error("Context broker not configured: {0}")]
    ConfigurationAbsent(String),

    /// The transport could not resolve a type or register a handle.
    #[error("Transport unavailable for {topic}: {reason}")]
    TransportUnavailable { topic: String, reason: String },

    /// The store answered with a non-success status, or could not be reached.
    #[error("Store {operation} failed for {target} (status {status:?}): {detail}")]
    StoreRequestFailed {
        operation: &'static str,
        target: String,
        status: Option<u16>,
        detail: String,
    },

    /// An inbound notification carries a type other than the bound one.
    #[error("Type mismatch on {topic}: bound to {expected}, received {received}")]
    TypeMismatch {
        topic: String,
        expected: String,
        received: String,
    },

    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid whitelist pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notification server error: {0}")]
    Server(String),
}

impl BridgeError {
    /// HTTP status carried by a [`BridgeError::StoreRequestFailed`], if any.
    pub fn store_status(&self) -> Option<u16> {
        match self {
            BridgeError::StoreRequestFailed { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_role_serializes_lowercase() {
        let json = serde_json::to_string(&TopicRole::Publisher).unwrap();
        assert_eq!(json, "\"publisher\"");
        let back: TopicRole = serde_json::from_str("\"subscriber\"").unwrap();
        assert_eq!(back, TopicRole::Subscriber);
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::TypeMismatch {
            topic: "/robot1/pose".to_string(),
            expected: "geometry_msgs/Pose".to_string(),
            received: "std_msgs/String".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("/robot1/pose"));
        assert!(text.contains("geometry_msgs/Pose"));

        let err = BridgeError::StoreRequestFailed {
            operation: "create",
            target: "robot1.pose".to_string(),
            status: Some(422),
            detail: "Already Exists".to_string(),
        };
        assert_eq!(err.store_status(), Some(422));
        assert!(err.to_string().contains("robot1.pose"));
    }

    #[test]
    fn store_status_is_none_for_other_variants() {
        let err = BridgeError::UnknownType("foo/Bar".to_string());
        assert_eq!(err.store_status(), None);
    }
}
