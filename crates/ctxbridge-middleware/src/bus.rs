//! In-process message transport.
//!
//! [`LocalTransport`] implements [`Transport`] on top of
//! [`tokio::sync::broadcast`] channels, one per topic, so every subscriber
//! receives every message without a slow subscriber blocking the others.
//! The bridge binary uses it in loopback mode; the integration tests use it
//! as a stand-in for the robot.
//!
//! Callbacks registered through [`Transport::subscribe`] run on a dedicated
//! Tokio task per subscription, so they are invoked one message at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ctxbridge_types::{
    BridgeError, Message, MessageCallback, PublisherOptions, Transport, TransportPublisher,
    TransportSubscription,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

struct TopicChannel {
    type_name: String,
    sender: broadcast::Sender<Message>,
    /// Live publisher handles.
    publishers: usize,
    /// Last message of a latched publisher.
    latched: Option<Message>,
}

struct Topics {
    capacity: usize,
    channels: Mutex<HashMap<String, TopicChannel>>,
}

impl Topics {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get or create the channel for `topic`, enforcing one type per topic.
    fn channel<'a>(
        &self,
        channels: &'a mut HashMap<String, TopicChannel>,
        topic: &str,
        type_name: &str,
    ) -> Result<&'a mut TopicChannel, BridgeError> {
        let channel = channels.entry(topic.to_string()).or_insert_with(|| TopicChannel {
            type_name: type_name.to_string(),
            sender: broadcast::channel(self.capacity).0,
            publishers: 0,
            latched: None,
        });
        if channel.type_name != type_name {
            return Err(BridgeError::TransportUnavailable {
                topic: topic.to_string(),
                reason: format!("topic carries {}, not {type_name}", channel.type_name),
            });
        }
        Ok(channel)
    }
}

/// Shared in-process transport.  Clone it cheaply – all clones share the same
/// topic channels.
#[derive(Clone)]
pub struct LocalTransport {
    topics: Arc<Topics>,
}

impl LocalTransport {
    /// Create a transport with the given per-topic channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Topics {
                capacity: capacity.max(1),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Receive every message published on `topic` from now on, plus the
    /// latched one if any.
    pub fn listen(&self, topic: &str, type_name: &str) -> Result<TopicReceiver, BridgeError> {
        let mut channels = self.topics.lock();
        let channel = self.topics.channel(&mut channels, topic, type_name)?;
        Ok(TopicReceiver {
            topic: topic.to_string(),
            pending: channel.latched.clone(),
            receiver: channel.sender.subscribe(),
        })
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Transport for LocalTransport {
    fn published_topics(&self) -> Result<Vec<String>, BridgeError> {
        let channels = self.topics.lock();
        let mut topics: Vec<String> = channels
            .iter()
            .filter(|(_, channel)| channel.publishers > 0)
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        Ok(topics)
    }

    fn topic_type(&self, topic: &str) -> Result<String, BridgeError> {
        self.topics
            .lock()
            .get(topic)
            .map(|channel| channel.type_name.clone())
            .ok_or_else(|| BridgeError::TransportUnavailable {
                topic: topic.to_string(),
                reason: "unknown topic".to_string(),
            })
    }

    fn advertise(
        &self,
        topic: &str,
        type_name: &str,
        options: PublisherOptions,
    ) -> Result<Box<dyn TransportPublisher>, BridgeError> {
        let mut channels = self.topics.lock();
        let channel = self.topics.channel(&mut channels, topic, type_name)?;
        channel.publishers += 1;
        debug!(topic = %topic, type_name = %type_name, latch = options.latch, "publisher advertised");
        Ok(Box::new(LocalPublisher {
            topic: topic.to_string(),
            sender: channel.sender.clone(),
            topics: self.topics.clone(),
            latch: options.latch,
            active: AtomicBool::new(true),
        }))
    }

    fn subscribe(
        &self,
        topic: &str,
        type_name: &str,
        _queue_size: usize,
        callback: MessageCallback,
    ) -> Result<Box<dyn TransportSubscription>, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            BridgeError::TransportUnavailable {
                topic: topic.to_string(),
                reason: format!("no async runtime: {e}"),
            }
        })?;
        let mut receiver = self.listen(topic, type_name)?;
        let task = runtime.spawn(async move {
            while let Some(message) = receiver.recv().await {
                callback(message);
            }
        });
        Ok(Box::new(LocalSubscription { task }))
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

struct LocalPublisher {
    topic: String,
    sender: broadcast::Sender<Message>,
    topics: Arc<Topics>,
    latch: bool,
    active: AtomicBool,
}

impl TransportPublisher for LocalPublisher {
    fn publish(&self, message: Message) -> Result<(), BridgeError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(BridgeError::TransportUnavailable {
                topic: self.topic.clone(),
                reason: "publisher unregistered".to_string(),
            });
        }
        if self.latch
            && let Some(channel) = self.topics.lock().get_mut(&self.topic)
        {
            channel.latched = Some(message.clone());
        }
        // No receivers is a normal condition.
        let _ = self.sender.send(message);
        Ok(())
    }

    fn unregister(&self) {
        if self.active.swap(false, Ordering::SeqCst)
            && let Some(channel) = self.topics.lock().get_mut(&self.topic)
        {
            channel.publishers = channel.publishers.saturating_sub(1);
            debug!(topic = %self.topic, "publisher unregistered");
        }
    }
}

impl Drop for LocalPublisher {
    fn drop(&mut self) {
        self.unregister();
    }
}

struct LocalSubscription {
    task: JoinHandle<()>,
}

impl TransportSubscription for LocalSubscription {
    fn unregister(&self) {
        self.task.abort();
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single topic.
///
/// Obtained via [`LocalTransport::listen`].
pub struct TopicReceiver {
    topic: String,
    pending: Option<Message>,
    receiver: broadcast::Receiver<Message>,
}

impl TopicReceiver {
    /// Wait for the next message.  Returns `None` once the topic is gone.
    ///
    /// A receiver that falls behind skips the messages it missed.
    pub async fn recv(&mut self) -> Option<Message> {
        if let Some(message) = self.pending.take() {
            return Some(message);
        }
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "topic receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
