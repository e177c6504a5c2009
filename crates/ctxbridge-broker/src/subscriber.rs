//! [`SubscriptionManager`] – store-side subscriptions for store → robot topics.
//!
//! For every topic the bridge publishes onto the transport, the store must be
//! told to push changes of the matching entity to our webhook.  Store
//! subscriptions expire, so each topic gets a refresh loop:
//!
//! ```text
//!   create subscription ──▶ record new id ──▶ delete previous id
//!          ▲                                        │
//!          └──── sleep(lifetime × refresh_delay) ◀──┘
//! ```
//!
//! The loops and the embedded [`NotificationServer`] all watch one shutdown
//! signal; [`SubscriptionManager::unsubscribe`] raises it, waits for every
//! task to finish, then deletes the remaining subscriptions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ctxbridge_types::{BridgeConfig, BridgeError, EndpointConfig, MessageShape, SubscriptionConfig};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{StoreClient, SubscriptionRequest};
use crate::server::{NotificationServer, NotificationSink};

/// One live store subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub topic: String,
    pub subscription_id: String,
    pub expires_at: DateTime<Utc>,
}

struct EndpointHandle {
    callback_url: String,
    task: JoinHandle<Result<(), BridgeError>>,
}

struct Inner {
    client: Option<StoreClient>,
    subscription: SubscriptionConfig,
    endpoint: EndpointConfig,
    sink: Arc<dyn NotificationSink>,
    records: RwLock<HashMap<String, SubscriptionRecord>>,
    loops: Mutex<HashMap<String, JoinHandle<()>>>,
    server: Mutex<Option<EndpointHandle>>,
    shutdown: watch::Sender<bool>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Without a broker configuration the manager never contacts the store
    /// and never starts the endpoint.
    pub fn new(config: &BridgeConfig, sink: Arc<dyn NotificationSink>) -> Self {
        let client = match &config.contextbroker {
            None => {
                debug!("context broker not configured, store subscriptions disabled");
                None
            }
            Some(broker) => match StoreClient::new(broker) {
                Ok(client) => Some(client),
                Err(e) => {
                    error!(error = %e, "store client unavailable, store subscriptions disabled");
                    None
                }
            },
        };
        let subscription = config
            .contextbroker
            .as_ref()
            .map(|b| b.subscription.clone())
            .unwrap_or_default();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                client,
                subscription,
                endpoint: config.endpoint.clone(),
                sink,
                records: RwLock::new(HashMap::new()),
                loops: Mutex::new(HashMap::new()),
                server: Mutex::new(None),
                shutdown,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.client.is_some()
    }

    /// Sleep between two refreshes of the same topic.
    pub fn refresh_interval(&self) -> Duration {
        self.inner.subscription.refresh_interval()
    }

    /// Start a refresh loop for every topic not already being refreshed.
    ///
    /// The notification endpoint is bound on first use; this returns only once
    /// it is listening.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Server`] if the endpoint cannot be bound.
    pub async fn subscribe(&self, topics: &[(String, Arc<MessageShape>)]) -> Result<(), BridgeError> {
        let Some(client) = &self.inner.client else {
            return Ok(());
        };
        if topics.is_empty() {
            return Ok(());
        }
        let callback_url = self.ensure_endpoint().await?;

        let mut loops = self.inner.loops.lock().await;
        for (topic, shape) in topics {
            if loops.get(topic).is_some_and(|handle| !handle.is_finished()) {
                debug!(topic = %topic, "refresh loop already running");
                continue;
            }
            info!(topic = %topic, callback = %callback_url, "starting subscription refresh loop");
            let handle = tokio::spawn(refresh_loop(
                self.inner.clone(),
                client.clone(),
                topic.clone(),
                shape.clone(),
                callback_url.clone(),
                self.inner.shutdown.subscribe(),
            ));
            loops.insert(topic.clone(), handle);
        }
        Ok(())
    }

    async fn ensure_endpoint(&self) -> Result<String, BridgeError> {
        let mut server = self.inner.server.lock().await;
        if let Some(endpoint) = server.as_ref() {
            return Ok(endpoint.callback_url.clone());
        }

        let bind_addr = SocketAddr::from(([0, 0, 0, 0], self.inner.endpoint.port.unwrap_or(0)));
        let notification_server = NotificationServer::bind(bind_addr, self.inner.sink.clone()).await?;
        let port = notification_server.local_addr()?.port();
        let callback_url = format!("http://{}:{}", self.inner.endpoint.address, port);

        let mut stop = self.inner.shutdown.subscribe();
        let task = tokio::spawn(notification_server.serve(async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        }));
        *server = Some(EndpointHandle {
            callback_url: callback_url.clone(),
            task,
        });
        Ok(callback_url)
    }

    /// Callback URL advertised to the store, once the endpoint is up.
    pub async fn callback_url(&self) -> Option<String> {
        self.inner
            .server
            .lock()
            .await
            .as_ref()
            .map(|endpoint| endpoint.callback_url.clone())
    }

    /// Current store subscription id for `topic`.
    pub async fn subscription_id(&self, topic: &str) -> Option<String> {
        self.inner
            .records
            .read()
            .await
            .get(topic)
            .map(|record| record.subscription_id.clone())
    }

    pub async fn record(&self, topic: &str) -> Option<SubscriptionRecord> {
        self.inner.records.read().await.get(topic).cloned()
    }

    /// Stop every refresh loop and the endpoint, then delete every recorded
    /// subscription from the store.  Each deletion is attempted once;
    /// failures are logged as warnings.
    ///
    /// The manager can subscribe again afterwards.
    pub async fn unsubscribe(&self) {
        self.inner.shutdown.send_replace(true);

        let loops: Vec<(String, JoinHandle<()>)> = self.inner.loops.lock().await.drain().collect();
        for (topic, handle) in loops {
            if let Err(e) = handle.await {
                warn!(topic = %topic, error = %e, "refresh loop ended abnormally");
            }
        }

        let endpoint = self.inner.server.lock().await.take();
        if let Some(endpoint) = endpoint {
            match endpoint.task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "notification endpoint failed"),
                Err(e) => warn!(error = %e, "notification endpoint task ended abnormally"),
            }
        }

        let records: Vec<SubscriptionRecord> =
            self.inner.records.write().await.drain().map(|(_, record)| record).collect();
        if let Some(client) = &self.inner.client {
            for record in records {
                match client.delete_subscription(&record.subscription_id).await {
                    Ok(()) => info!(topic = %record.topic, subscription = %record.subscription_id, "subscription deleted"),
                    Err(e) => warn!(topic = %record.topic, error = %e, "subscription delete failed"),
                }
            }
        }

        self.inner.shutdown.send_replace(false);
    }
}

async fn refresh_loop(
    inner: Arc<Inner>,
    client: StoreClient,
    topic: String,
    shape: Arc<MessageShape>,
    callback_url: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = inner.subscription.refresh_interval();
    loop {
        if *shutdown.borrow() {
            break;
        }
        refresh_once(&inner, &client, &topic, &shape, &callback_url).await;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = async { let _ = shutdown.wait_for(|stopped| *stopped).await; } => break,
        }
    }
    debug!(topic = %topic, "refresh loop stopped");
}

async fn refresh_once(
    inner: &Inner,
    client: &StoreClient,
    topic: &str,
    shape: &MessageShape,
    callback_url: &str,
) {
    let lifetime = inner.subscription.lifetime();
    let Some(expires_at) = chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
    else {
        error!(topic = %topic, lifetime = ?lifetime, "subscription expiry out of range");
        return;
    };
    let request = SubscriptionRequest::new(
        topic,
        &shape.type_name,
        callback_url,
        shape.field_names(),
        expires_at,
        inner.subscription.throttling,
    );

    let subscription_id = match client.create_subscription(&request).await {
        Ok(id) => id,
        Err(e) => {
            error!(topic = %topic, error = %e, "subscription create failed, retrying next cycle");
            return;
        }
    };
    debug!(topic = %topic, subscription = %subscription_id, expires = %request.expires, "subscription registered");

    let previous = inner.records.write().await.insert(
        topic.to_string(),
        SubscriptionRecord {
            topic: topic.to_string(),
            subscription_id: subscription_id.clone(),
            expires_at,
        },
    );
    if let Some(previous) = previous.filter(|p| p.subscription_id != subscription_id) {
        if let Err(e) = client.delete_subscription(&previous.subscription_id).await {
            warn!(topic = %topic, error = %e, "stale subscription delete failed");
        }
    }
}
