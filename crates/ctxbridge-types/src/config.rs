//! Configuration values consumed by the bridge core.
//!
//! Loading them from disk is the binary's job (`ctxbridge-cli`); this module
//! only defines the shape and the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Node name; namespaces the `<node_name>/connect` and
    /// `<node_name>/disconnect` control topics.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Queue depth for transport handles and per-topic forwarding queues.
    #[serde(default = "default_queue")]
    pub ros_subscriber_queue: usize,

    /// Minimum interval between two forwarded messages of the same topic,
    /// in milliseconds.  `0` disables rate limiting.
    #[serde(default)]
    pub pub_frequency_ms: u64,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Context broker settings.  `None` runs the bridge transport-only.
    #[serde(default)]
    pub contextbroker: Option<BrokerConfig>,
}

fn default_node_name() -> String {
    "ctxbridge".to_string()
}
fn default_queue() -> usize {
    10
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            ros_subscriber_queue: default_queue(),
            pub_frequency_ms: 0,
            endpoint: EndpointConfig::default(),
            contextbroker: None,
        }
    }
}

impl BridgeConfig {
    pub fn connect_topic(&self) -> String {
        format!("{}/connect", self.node_name)
    }

    pub fn disconnect_topic(&self) -> String {
        format!("{}/disconnect", self.node_name)
    }

    /// Rate-limit interval, `None` when disabled.
    pub fn rate_limit(&self) -> Option<Duration> {
        (self.pub_frequency_ms > 0).then(|| Duration::from_millis(self.pub_frequency_ms))
    }
}

/// Where the embedded notification endpoint listens, and how the store
/// reaches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Host advertised to the store in subscription callback URLs.
    #[serde(default = "default_endpoint_address")]
    pub address: String,

    /// Listening port; an ephemeral port is picked when absent.
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_endpoint_address() -> String {
    "127.0.0.1".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: default_endpoint_address(),
            port: None,
        }
    }
}

/// Context broker (entity store) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub address: String,
    pub port: u16,

    /// Timeout applied to every store request, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub subscription: SubscriptionConfig,
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl BrokerConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            request_timeout_ms: default_request_timeout_ms(),
            subscription: SubscriptionConfig::default(),
        }
    }

    /// `http://<address>:<port>`.  An address that already carries a scheme
    /// is used as is.
    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            format!("{}:{}", self.address.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Store-side subscription lifetime and refresh policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Minimum seconds between two notifications for the same entity.
    #[serde(default)]
    pub throttling: u64,

    /// Subscription lifetime in seconds, clamped by [`Self::lifetime`].
    #[serde(default = "default_subscription_length")]
    pub subscription_length: u64,

    /// Fraction of the lifetime after which a subscription is renewed.
    #[serde(default = "default_refresh_delay")]
    pub subscription_refresh_delay: f64,
}

/// Shortest subscription lifetime in seconds.
pub const MIN_SUBSCRIPTION_LENGTH: u64 = 1;
/// Longest subscription lifetime in seconds (one year).
pub const MAX_SUBSCRIPTION_LENGTH: u64 = 365 * 24 * 60 * 60;

fn default_subscription_length() -> u64 {
    300
}
fn default_refresh_delay() -> f64 {
    0.9
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            throttling: 0,
            subscription_length: default_subscription_length(),
            subscription_refresh_delay: default_refresh_delay(),
        }
    }
}

impl SubscriptionConfig {
    /// `subscription_length` clamped into
    /// [`MIN_SUBSCRIPTION_LENGTH`, `MAX_SUBSCRIPTION_LENGTH`].
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(
            self.subscription_length
                .clamp(MIN_SUBSCRIPTION_LENGTH, MAX_SUBSCRIPTION_LENGTH),
        )
    }

    /// `lifetime × refresh_delay`, with the fraction clamped into (0, 1).
    ///
    /// Out-of-range fractions fall back to the default of 0.9.
    pub fn refresh_interval(&self) -> Duration {
        let fraction = if self.subscription_refresh_delay > 0.0 && self.subscription_refresh_delay < 1.0 {
            self.subscription_refresh_delay
        } else {
            default_refresh_delay()
        };
        let millis = (self.lifetime().as_secs_f64() * 1000.0 * fraction).round() as u64;
        Duration::from_millis(millis.max(1))
    }
}
