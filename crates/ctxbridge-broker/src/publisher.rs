//! [`EntityPublisher`] – pushes transport messages into the store.
//!
//! Each topic has one slot holding the last message the store accepted.  An
//! empty slot means the next push is a create, a filled one means an
//! attribute update.  The slot is an async mutex held across the HTTP call,
//! so two pushes for the same topic can never both decide to create.

use std::collections::HashMap;
use std::sync::Arc;

use ctxbridge_codec::{encode, topic_to_entity_id, EncodeOptions};
use ctxbridge_types::{BrokerConfig, Message, MessageShape};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::StoreClient;

type PostedSlot = Arc<Mutex<Option<Message>>>;

const STATUS_NOT_FOUND: u16 = 404;
const STATUS_UNPROCESSABLE: u16 = 422;

pub struct EntityPublisher {
    client: Option<StoreClient>,
    posted: Mutex<HashMap<String, PostedSlot>>,
}

impl EntityPublisher {
    /// Build a publisher for the configured store.  Without a broker
    /// configuration every operation is a no-op; this is logged once here.
    pub fn new(config: Option<&BrokerConfig>) -> Self {
        let client = match config {
            None => {
                warn!("context broker not configured, entities will not be published");
                None
            }
            Some(cfg) => match StoreClient::new(cfg) {
                Ok(client) => Some(client),
                Err(e) => {
                    error!(error = %e, "store client unavailable, entities will not be published");
                    None
                }
            },
        };
        Self {
            client,
            posted: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_client(client: StoreClient) -> Self {
        Self {
            client: Some(client),
            posted: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    async fn slot(&self, topic: &str) -> PostedSlot {
        let mut posted = self.posted.lock().await;
        posted.entry(topic.to_string()).or_default().clone()
    }

    /// Push `message` received on `topic` to the store.
    ///
    /// Failures are logged, never returned: a failed create leaves the slot
    /// empty so the next message retries the create.
    pub async fn push(&self, topic: &str, message: Message, shape: &MessageShape) {
        let Some(client) = &self.client else {
            return;
        };
        let slot = self.slot(topic).await;
        let mut record = slot.lock().await;
        let entity_id = topic_to_entity_id(topic);

        if record.is_some() {
            let document = encode(topic, &message, shape, EncodeOptions { include_id: false });
            match client.update_attributes(&entity_id, &document).await {
                Ok(()) => {
                    debug!(topic = %topic, entity_id = %entity_id, "entity updated");
                    *record = Some(message);
                }
                Err(e) if e.store_status() == Some(STATUS_NOT_FOUND) => {
                    warn!(topic = %topic, entity_id = %entity_id, "entity no longer in the store, re-creating on next message");
                    *record = None;
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "entity update failed");
                    *record = Some(message);
                }
            }
            return;
        }

        let document = encode(topic, &message, shape, EncodeOptions::default());
        match client.create_entity(&document).await {
            Ok(()) => {
                info!(topic = %topic, entity_id = %entity_id, "entity created");
                *record = Some(message);
            }
            Err(e) if e.store_status() == Some(STATUS_UNPROCESSABLE) => {
                // Left over from an earlier run.
                let update = encode(topic, &message, shape, EncodeOptions { include_id: false });
                if let Err(e) = client.update_attributes(&entity_id, &update).await {
                    error!(topic = %topic, error = %e, "update of pre-existing entity failed");
                } else {
                    info!(topic = %topic, entity_id = %entity_id, "entity already existed, updated");
                }
                *record = Some(message);
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "entity create failed, retrying on next message");
            }
        }
    }

    /// Whether `topic` currently holds a posted record.
    pub async fn is_posted(&self, topic: &str) -> bool {
        let slot = {
            let posted = self.posted.lock().await;
            posted.get(topic).cloned()
        };
        match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Last message accepted by the store for `topic`.
    pub async fn last_posted(&self, topic: &str) -> Option<Message> {
        let slot = self.posted.lock().await.get(topic).cloned()?;
        let record = slot.lock().await;
        record.clone()
    }

    /// Topics with a posted record, sorted.
    pub async fn posted_topics(&self) -> Vec<String> {
        let slots: Vec<(String, PostedSlot)> = self
            .posted
            .lock()
            .await
            .iter()
            .map(|(topic, slot)| (topic.clone(), slot.clone()))
            .collect();
        let mut topics = Vec::new();
        for (topic, slot) in slots {
            if slot.lock().await.is_some() {
                topics.push(topic);
            }
        }
        topics.sort();
        topics
    }

    /// Delete every posted entity from the store and forget all records.
    /// Every deletion is attempted; failures are logged as warnings.
    pub async fn unpublish(&self) {
        let slots: Vec<(String, PostedSlot)> = self.posted.lock().await.drain().collect();
        let Some(client) = &self.client else {
            return;
        };
        for (topic, slot) in slots {
            let mut record = slot.lock().await;
            if record.take().is_none() {
                continue;
            }
            let entity_id = topic_to_entity_id(&topic);
            match client.delete_entity(&entity_id).await {
                Ok(()) => info!(topic = %topic, entity_id = %entity_id, "entity deleted"),
                Err(e) => warn!(topic = %topic, error = %e, "entity delete failed"),
            }
        }
    }
}
