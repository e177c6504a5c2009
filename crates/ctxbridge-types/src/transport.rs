//! Seams to the robot's native publish/subscribe runtime.
//!
//! The bridge never talks to a concrete transport directly.  It is handed an
//! `Arc<dyn Transport>` that can enumerate topics, resolve their types and
//! create publisher/subscriber handles, and an `Arc<dyn TypeResolver>` that
//! knows the field layout of each message type.

use std::sync::Arc;

use crate::message::Message;
use crate::shape::MessageShape;
use crate::BridgeError;

/// Callback invoked by the transport for every inbound message on a topic.
///
/// Implementations must return quickly; they run on the transport's delivery
/// path.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Options for a transport publisher handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherOptions {
    pub queue_size: usize,
    /// Keep the last published message and hand it to late subscribers.
    pub latch: bool,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            queue_size: 10,
            latch: true,
        }
    }
}

/// A registered transport publisher.
pub trait TransportPublisher: Send + Sync {
    fn publish(&self, message: Message) -> Result<(), BridgeError>;

    /// Release the handle.  Publishing afterwards is an error.
    fn unregister(&self);
}

/// A registered transport subscription.
pub trait TransportSubscription: Send + Sync {
    /// Stop delivering messages to the callback.
    fn unregister(&self);
}

/// The native message transport.
pub trait Transport: Send + Sync {
    /// Names of every topic that currently has at least one publisher.
    fn published_topics(&self) -> Result<Vec<String>, BridgeError>;

    /// Message type name bound to `topic`.
    fn topic_type(&self, topic: &str) -> Result<String, BridgeError>;

    fn advertise(
        &self,
        topic: &str,
        type_name: &str,
        options: PublisherOptions,
    ) -> Result<Box<dyn TransportPublisher>, BridgeError>;

    fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
        queue_size: usize,
        callback: MessageCallback,
    ) -> Result<Box<dyn TransportSubscription>, BridgeError>;
}

/// Looks up (or synthesises) the shape of a native message type by name.
pub trait TypeResolver: Send + Sync {
    fn resolve(&self, type_name: &str) -> Result<MessageShape, BridgeError>;
}
