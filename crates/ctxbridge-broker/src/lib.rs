//! `ctxbridge-broker` – everything that talks to the context broker.
//!
//! # Modules
//!
//! - [`client`] – [`StoreClient`], the NGSIv2 REST client, and the
//!   [`SubscriptionRequest`] body.
//! - [`publisher`] – [`EntityPublisher`]: robot → store, with the per-topic
//!   create/update gate.
//! - [`subscriber`] – [`SubscriptionManager`]: per-topic subscription refresh
//!   loops and the lifecycle of the notification endpoint.
//! - [`server`] – [`NotificationServer`], the axum webhook, and the
//!   [`NotificationSink`] trait through which decoded notifications leave
//!   this crate.

pub mod client;
pub mod publisher;
pub mod server;
pub mod subscriber;

pub use client::{StoreClient, SubscriptionRequest};
pub use publisher::EntityPublisher;
pub use server::{build_router, parse_notification, NotificationServer, NotificationSink};
pub use subscriber::{SubscriptionManager, SubscriptionRecord};
