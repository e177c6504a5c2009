//! HTTP client for the context broker's NGSIv2 API.
//!
//! | Operation | Request |
//! |---|---|
//! | create entity | `POST {base}/v2/entities/` |
//! | update attributes | `POST {base}/v2/entities/{id}/attrs` |
//! | delete entity | `DELETE {base}/v2/entities/{id}` |
//! | create subscription | `POST {base}/v2/subscriptions` (id returned in `Location`) |
//! | delete subscription | `DELETE {base}{subscription_id}` |

use chrono::{DateTime, SecondsFormat, Utc};
use ctxbridge_codec::{topic_to_entity_id, type_to_entity_type, EntityDocument};
use ctxbridge_types::{BridgeError, BrokerConfig};
use reqwest::header::LOCATION;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Subscription request body
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRequest {
    pub subject: Subject,
    pub notification: Notification,
    /// ISO-8601 UTC expiry.
    pub expires: String,
    pub throttling: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subject {
    pub entities: Vec<EntityRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRef {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub http: HttpTarget,
    pub attrs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpTarget {
    pub url: String,
}

impl SubscriptionRequest {
    /// Subscribe `callback_url` to changes of `topic`'s entity.
    pub fn new(
        topic: &str,
        type_name: &str,
        callback_url: impl Into<String>,
        attrs: Vec<String>,
        expires: DateTime<Utc>,
        throttling: u64,
    ) -> Self {
        Self {
            subject: Subject {
                entities: vec![EntityRef {
                    id: topic_to_entity_id(topic),
                    entity_type: type_to_entity_type(type_name),
                }],
            },
            notification: Notification {
                http: HttpTarget { url: callback_url.into() },
                attrs,
            },
            expires: expires.to_rfc3339_opts(SecondsFormat::Millis, true),
            throttling,
        }
    }
}

// ---------------------------------------------------------------------------
// StoreClient
// ---------------------------------------------------------------------------

/// Thin async client over the store's REST API.
///
/// Every request carries the configured timeout.  Non-2xx answers and
/// transport failures are both reported as
/// [`BridgeError::StoreRequestFailed`].
#[derive(Debug, Clone)]
pub struct StoreClient {
    base_url: String,
    http: reqwest::Client,
}

impl StoreClient {
    pub fn new(config: &BrokerConfig) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BridgeError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create_entity(&self, document: &EntityDocument) -> Result<(), BridgeError> {
        let target = document.id.clone().unwrap_or_default();
        let response = self
            .http
            .post(format!("{}/v2/entities/", self.base_url))
            .json(&document.to_json())
            .send()
            .await;
        check("create entity", &target, response).await.map(|_| ())
    }

    pub async fn update_attributes(
        &self,
        entity_id: &str,
        document: &EntityDocument,
    ) -> Result<(), BridgeError> {
        let response = self
            .http
            .post(format!("{}/v2/entities/{}/attrs", self.base_url, entity_id))
            .json(&document.attributes_json())
            .send()
            .await;
        check("update attributes", entity_id, response).await.map(|_| ())
    }

    pub async fn delete_entity(&self, entity_id: &str) -> Result<(), BridgeError> {
        let response = self
            .http
            .delete(format!("{}/v2/entities/{}", self.base_url, entity_id))
            .send()
            .await;
        check("delete entity", entity_id, response).await.map(|_| ())
    }

    /// Register a subscription and return its identifier (the `Location`
    /// header, e.g. `/v2/subscriptions/5f…`).
    pub async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<String, BridgeError> {
        let target = request
            .subject
            .entities
            .first()
            .map(|e| e.id.clone())
            .unwrap_or_default();
        let response = self
            .http
            .post(format!("{}/v2/subscriptions", self.base_url))
            .json(request)
            .send()
            .await;
        let response = check("create subscription", &target, response).await?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| BridgeError::StoreRequestFailed {
                operation: "create subscription",
                target,
                status: Some(response.status().as_u16()),
                detail: "response carries no Location header".to_string(),
            })
    }

    pub async fn delete_subscription(&self, subscription_id: &str) -> Result<(), BridgeError> {
        let response = self
            .http
            .delete(format!("{}{}", self.base_url, subscription_id))
            .send()
            .await;
        check("delete subscription", subscription_id, response).await.map(|_| ())
    }
}

async fn check(
    operation: &'static str,
    target: &str,
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<reqwest::Response, BridgeError> {
    let response = response.map_err(|e| BridgeError::StoreRequestFailed {
        operation,
        target: target.to_string(),
        status: e.status().map(|s| s.as_u16()),
        detail: e.to_string(),
    })?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(BridgeError::StoreRequestFailed {
        operation,
        target: target.to_string(),
        status: Some(status.as_u16()),
        detail,
    })
}
