//! `ctxbridge-middleware` – the bridge core.
//!
//! Decides which transport topics are bridged, in which direction, and keeps
//! one live binding per topic.
//!
//! # Modules
//!
//! - [`bus`] – [`LocalTransport`], an in-process topic transport built on
//!   Tokio broadcast channels.  Used by the binary's loopback mode and by
//!   tests.
//! - [`whitelist`] – named groups of topic patterns and the
//!   [`TopicMatcher`] that resolves them against the live topic list.
//! - [`shapes`] – per-type message shape cache.
//! - [`topic_handler`] – [`BridgeRegistry`], owner of every topic binding,
//!   the control topics and the bridge shutdown sequence.

pub mod bus;
pub mod shapes;
pub mod topic_handler;
pub mod whitelist;

pub use bus::{LocalTransport, TopicReceiver};
pub use shapes::ShapeRegistry;
pub use topic_handler::{BridgeRegistry, TopicBinding};
pub use whitelist::{resolve, TopicMatcher, TopicSpec, Whitelist, WhitelistGroup, WhitelistRule};
