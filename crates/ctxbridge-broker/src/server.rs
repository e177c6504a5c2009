//! [`NotificationServer`] – embedded webhook receiving store notifications.
//!
//! The store POSTs `{"subscriptionId": …, "data": [ <entity> ]}` to the
//! callback URL registered by the subscription manager.  Each entity is
//! decoded with [`ctxbridge_codec::decode`] and handed to the
//! [`NotificationSink`] (the bridge registry).
//!
//! The endpoint always answers `204 No Content` to a POST, even when the
//! body is malformed or routing fails, so that the store does not retry.
//! Other methods are ignored with an empty `200 OK`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::Router;
use ctxbridge_codec::{decode, DecodedEntity};
use ctxbridge_types::BridgeError;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Receiver of decoded notifications.
pub trait NotificationSink: Send + Sync {
    fn route(&self, entity: DecodedEntity) -> Result<(), BridgeError>;
}

/// Build the webhook router.  Every path is accepted; the store is given the
/// bare `http://host:port` as callback URL.
pub fn build_router(sink: Arc<dyn NotificationSink>) -> Router {
    Router::new().fallback(handle_request).with_state(sink)
}

async fn handle_request(
    State(sink): State<Arc<dyn NotificationSink>>,
    method: Method,
    body: Bytes,
) -> StatusCode {
    if method != Method::POST {
        debug!(method = %method, "ignoring non-POST request");
        return StatusCode::OK;
    }
    for entity in parse_notification(&body) {
        let topic = entity.topic.clone();
        if let Err(e) = sink.route(entity) {
            warn!(topic = %topic, error = %e, "notification not routed");
        }
    }
    StatusCode::NO_CONTENT
}

/// Decode every entity of a notification body.  Problems are logged and the
/// offending entity skipped.
pub fn parse_notification(body: &[u8]) -> Vec<DecodedEntity> {
    let json: Value = match serde_json::from_slice(body) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "notification body is not JSON");
            return Vec::new();
        }
    };
    let Some(data) = json.get("data").and_then(Value::as_array) else {
        warn!("notification carries no data array");
        return Vec::new();
    };
    data.iter()
        .filter_map(|doc| match decode(doc) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!(error = %e, "dropping undecodable entity");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// NotificationServer
// ---------------------------------------------------------------------------

/// A bound, not yet serving, webhook endpoint.
///
/// Binding happens in [`bind`][Self::bind], so once it returns the port is
/// listening and can be advertised to the store.
pub struct NotificationServer {
    listener: TcpListener,
    router: Router,
}

impl NotificationServer {
    /// Bind on `addr` (port `0` picks an ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Server`] if the listener cannot be bound.
    pub async fn bind(addr: SocketAddr, sink: Arc<dyn NotificationSink>) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Server(format!("bind error on {addr}: {e}")))?;
        Ok(Self {
            listener,
            router: build_router(sink),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BridgeError> {
        self.listener
            .local_addr()
            .map_err(|e| BridgeError::Server(format!("cannot read local address: {e}")))
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(addr = %addr, "listening for context broker notifications");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| BridgeError::Server(format!("serve error on {addr}: {e}")))?;
        info!(addr = %addr, "notification endpoint stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        routed: Mutex<Vec<DecodedEntity>>,
    }

    impl NotificationSink for Recorder {
        fn route(&self, entity: DecodedEntity) -> Result<(), BridgeError> {
            self.routed.lock().unwrap().push(entity);
            Ok(())
        }
    }

    struct Rejecting;

    impl NotificationSink for Rejecting {
        fn route(&self, entity: DecodedEntity) -> Result<(), BridgeError> {
            Err(BridgeError::TypeMismatch {
                topic: entity.topic,
                expected: "std_msgs/String".into(),
                received: entity.type_name,
            })
        }
    }

    async fn spawn_server(sink: Arc<dyn NotificationSink>) -> (String, tokio::sync::oneshot::Sender<()>) {
        let server = NotificationServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)), sink)
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(server.serve(async move {
            let _ = rx.await;
        }));
        (format!("http://127.0.0.1:{port}"), tx)
    }

    #[tokio::test]
    async fn post_routes_decoded_entity() {
        let recorder = Arc::new(Recorder::default());
        let (base, _stop) = spawn_server(recorder.clone()).await;

        let body = r#"{"data":[{"id":"robot1.pose","type":"geometry_msgs.Pose","position":{"type":"StructuredPoint","value":{"x":{"type":"float","value":"1.0"}}}}]}"#;
        let resp = reqwest::Client::new()
            .post(&base)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);

        let routed = recorder.routed.lock().unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].topic, "robot1/pose");
        assert_eq!(routed[0].type_name, "geometry_msgs/Pose");
        let x = routed[0].value.path(&["position", "x"]).and_then(|v| v.as_f64());
        assert_eq!(x, Some(1.0));
    }

    #[tokio::test]
    async fn get_is_ignored_but_answered() {
        let recorder = Arc::new(Recorder::default());
        let (base, _stop) = spawn_server(recorder.clone()).await;

        let resp = reqwest::get(&base).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.text().await.unwrap().is_empty());
        assert!(recorder.routed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_still_gets_no_content() {
        let recorder = Arc::new(Recorder::default());
        let (base, _stop) = spawn_server(recorder.clone()).await;

        let client = reqwest::Client::new();
        for body in ["not json", r#"{"nodata":true}"#, r#"{"data":[{"type":"x"}]}"#] {
            let resp = client.post(&base).body(body).send().await.unwrap();
            assert_eq!(resp.status(), 204, "body {body:?}");
        }
        assert!(recorder.routed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn routing_failure_still_gets_no_content() {
        let (base, _stop) = spawn_server(Arc::new(Rejecting)).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/any/path"))
            .body(r#"{"data":[{"id":".chatter","type":"std_msgs.Bool","data":{"type":"boolean","value":true}}]}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
    }

    #[tokio::test]
    async fn server_stops_on_shutdown_signal() {
        let server = NotificationServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Arc::new(Recorder::default()),
        )
        .await
        .unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(async move {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server must stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
