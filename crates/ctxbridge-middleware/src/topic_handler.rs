//! [`BridgeRegistry`] – the live topic ↔ store mapping.
//!
//! The registry owns one [`TopicBinding`] per whitelisted topic:
//!
//! | Role | Direction | Transport handle |
//! |---|---|---|
//! | [`TopicRole::Subscriber`] | robot → store | subscription feeding a per-topic forwarding queue |
//! | [`TopicRole::Publisher`] | store → robot | latched publisher fed by [`BridgeRegistry::route`] |
//!
//! Transport callbacks never block: they check the shutdown flag and the
//! per-topic rate limiter, then `try_send` into a bounded queue drained by
//! one task per topic, which pushes to the [`EntityPublisher`].  Pushes for
//! one topic are therefore serialised.
//!
//! Two control topics are also watched: `<node_name>/disconnect` drops the
//! binding of the topic named in the payload, `<node_name>/connect` re-binds
//! every whitelisted topic.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ctxbridge_broker::{EntityPublisher, NotificationSink, SubscriptionManager};
use ctxbridge_codec::{instantiate, DecodedEntity};
use ctxbridge_types::{
    BridgeConfig, BridgeError, FieldValue, Message, MessageCallback, MessageShape, Primitive,
    PublisherOptions, TopicRole, Transport, TransportPublisher, TransportSubscription, TypeResolver,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::shapes::ShapeRegistry;
use crate::whitelist::{TopicMatcher, TopicSpec};

const CONTROL_TYPE: &str = "std_msgs/String";

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

enum BindingHandle {
    Publisher(Box<dyn TransportPublisher>),
    Subscriber {
        subscription: Box<dyn TransportSubscription>,
        forwarder: Option<JoinHandle<()>>,
    },
}

/// The live association of a topic with its role, type and transport handle.
pub struct TopicBinding {
    pub topic: String,
    pub role: TopicRole,
    pub type_name: String,
    pub shape: Arc<MessageShape>,
    handle: BindingHandle,
}

impl TopicBinding {
    /// Wait for the forwarding task to finish its in-flight push.
    async fn drain(&mut self) {
        if let BindingHandle::Subscriber { forwarder, .. } = &mut self.handle
            && let Some(task) = forwarder.take()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            warn!(topic = %self.topic, error = %e, "forwarding task ended abnormally");
        }
    }

    fn release(self) {
        match self.handle {
            BindingHandle::Publisher(publisher) => publisher.unregister(),
            BindingHandle::Subscriber { subscription, forwarder } => {
                subscription.unregister();
                if let Some(task) = forwarder {
                    task.abort();
                }
            }
        }
        debug!(topic = %self.topic, role = %self.role, "binding released");
    }
}

enum ControlCommand {
    Connect(String),
    Disconnect(String),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegistryInner {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    shapes: ShapeRegistry,
    matcher: Mutex<TopicMatcher>,
    bindings: Mutex<HashMap<String, TopicBinding>>,
    publisher: Arc<EntityPublisher>,
    subscriptions: SubscriptionManager,
    shutdown: Arc<AtomicBool>,
    stop_forwarders: watch::Sender<bool>,
    control: Mutex<Vec<Box<dyn TransportSubscription>>>,
    control_task: Mutex<Option<JoinHandle<()>>>,
}

impl RegistryInner {
    fn bindings(&self) -> MutexGuard<'_, HashMap<String, TopicBinding>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn matcher(&self) -> MutexGuard<'_, TopicMatcher> {
        self.matcher.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Routes notifications to a registry without keeping it alive.
struct RegistrySink(Weak<RegistryInner>);

impl NotificationSink for RegistrySink {
    fn route(&self, entity: DecodedEntity) -> Result<(), BridgeError> {
        match self.0.upgrade() {
            Some(inner) => BridgeRegistry { inner }.route(entity),
            None => Err(BridgeError::Server("bridge registry dropped".to_string())),
        }
    }
}

/// Owner of every topic binding.  Clone it cheaply – clones share state.
#[derive(Clone)]
pub struct BridgeRegistry {
    inner: Arc<RegistryInner>,
}

impl BridgeRegistry {
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn TypeResolver>,
        matcher: TopicMatcher,
    ) -> Self {
        let publisher = Arc::new(EntityPublisher::new(config.contextbroker.as_ref()));
        let inner = Arc::new_cyclic(|weak: &Weak<RegistryInner>| {
            let sink: Arc<dyn NotificationSink> = Arc::new(RegistrySink(weak.clone()));
            RegistryInner {
                subscriptions: SubscriptionManager::new(&config, sink),
                config,
                transport,
                shapes: ShapeRegistry::new(resolver),
                matcher: Mutex::new(matcher),
                bindings: Mutex::new(HashMap::new()),
                publisher,
                shutdown: Arc::new(AtomicBool::new(false)),
                stop_forwarders: watch::channel(false).0,
                control: Mutex::new(Vec::new()),
                control_task: Mutex::new(None),
            }
        });
        Self { inner }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn publisher(&self) -> &Arc<EntityPublisher> {
        &self.inner.publisher
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    /// Run `f` against the whitelist matcher, e.g. to add or remove groups
    /// before the next [`connect`][Self::connect].
    pub fn with_matcher<R>(&self, f: impl FnOnce(&mut TopicMatcher) -> R) -> R {
        f(&mut self.inner.matcher())
    }

    /// Watch the control topics, then bind every whitelisted topic.
    pub async fn start(&self) -> Result<BTreeMap<String, TopicSpec>, BridgeError> {
        self.listen_for_control()?;
        self.load_handlers().await
    }

    /// Resolve the whitelist against the live topics, bind every match, and
    /// start store subscriptions for the store → robot topics.
    ///
    /// Topics that fail to bind are logged and skipped.  Returns the bound
    /// topics.
    pub async fn load_handlers(&self) -> Result<BTreeMap<String, TopicSpec>, BridgeError> {
        let topics = self.inner.matcher().system_topics(true, false)?;
        info!(count = topics.len(), "generating topic handlers");
        for (topic, spec) in &topics {
            if let Err(e) = self.bind(topic, &spec.type_name, spec.role) {
                error!(topic = %topic, error = %e, "topic not bound");
            }
        }

        let store_topics: Vec<(String, Arc<MessageShape>)> = self
            .inner
            .bindings()
            .values()
            .filter(|b| b.role == TopicRole::Publisher)
            .map(|b| (b.topic.clone(), b.shape.clone()))
            .collect();
        if let Err(e) = self.inner.subscriptions.subscribe(&store_topics).await {
            error!(error = %e, "store subscriptions not started");
        }
        Ok(self.bound_topics())
    }

    /// Create the binding for `topic`.  An identical existing binding is
    /// kept; one with a different role or type is replaced once the new
    /// handle exists.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownType`] when the type has no known shape, and
    /// [`BridgeError::TransportUnavailable`] when the transport refuses the
    /// handle.  Either way an existing binding stays in place.
    pub fn bind(&self, topic: &str, type_name: &str, role: TopicRole) -> Result<(), BridgeError> {
        let unchanged = self
            .inner
            .bindings()
            .get(topic)
            .is_some_and(|b| b.role == role && b.type_name == type_name);
        if unchanged {
            return Ok(());
        }

        let shape = self.inner.shapes.get(type_name)?;
        let handle = match role {
            TopicRole::Publisher => {
                let options = PublisherOptions {
                    queue_size: self.inner.config.ros_subscriber_queue,
                    latch: true,
                };
                BindingHandle::Publisher(self.inner.transport.advertise(topic, type_name, options)?)
            }
            TopicRole::Subscriber => self.subscribe_forwarding(topic, type_name, shape.clone())?,
        };
        info!(topic = %topic, role = %role, type_name = %type_name, "topic bound");

        let binding = TopicBinding {
            topic: topic.to_string(),
            role,
            type_name: type_name.to_string(),
            shape,
            handle,
        };
        let replaced = self.inner.bindings().insert(topic.to_string(), binding);
        if let Some(replaced) = replaced {
            replaced.release();
        }
        Ok(())
    }

    fn subscribe_forwarding(
        &self,
        topic: &str,
        type_name: &str,
        shape: Arc<MessageShape>,
    ) -> Result<BindingHandle, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| BridgeError::TransportUnavailable {
            topic: topic.to_string(),
            reason: format!("no async runtime: {e}"),
        })?;
        let capacity = self.inner.config.ros_subscriber_queue.max(1);
        let (tx, rx) = mpsc::channel::<Message>(capacity);

        let limiter: Option<DefaultDirectRateLimiter> = self
            .inner
            .config
            .rate_limit()
            .and_then(Quota::with_period)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        let shutdown = self.inner.shutdown.clone();
        let callback_topic = topic.to_string();
        let callback: MessageCallback = Arc::new(move |message: Message| {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            if let Some(limiter) = &limiter
                && limiter.check().is_err()
            {
                trace!(topic = %callback_topic, "rate limited, message dropped");
                return;
            }
            if tx.try_send(message).is_err() {
                warn!(topic = %callback_topic, "forwarding queue full, message dropped");
            }
        });

        let subscription = self
            .inner
            .transport
            .subscribe(topic, type_name, self.inner.config.ros_subscriber_queue, callback)?;
        let forwarder = runtime.spawn(forward(
            topic.to_string(),
            shape,
            self.inner.publisher.clone(),
            self.inner.shutdown.clone(),
            rx,
            self.inner.stop_forwarders.subscribe(),
        ));
        Ok(BindingHandle::Subscriber {
            subscription,
            forwarder: Some(forwarder),
        })
    }

    /// Deliver a decoded store notification onto the transport.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::TransportUnavailable`] when `entity.topic` has no
    ///   store → robot binding or the publish fails.
    /// - [`BridgeError::TypeMismatch`] when the notification's type differs
    ///   from the bound type; the notification is dropped.
    pub fn route(&self, entity: DecodedEntity) -> Result<(), BridgeError> {
        let bindings = self.inner.bindings();
        let Some(binding) = bindings.get(&entity.topic) else {
            return Err(BridgeError::TransportUnavailable {
                topic: entity.topic,
                reason: "topic is not bridged".to_string(),
            });
        };
        let BindingHandle::Publisher(publisher) = &binding.handle else {
            return Err(BridgeError::TransportUnavailable {
                topic: entity.topic,
                reason: "topic is bridged robot → store only".to_string(),
            });
        };
        if binding.type_name != entity.type_name {
            return Err(BridgeError::TypeMismatch {
                topic: entity.topic,
                expected: binding.type_name.clone(),
                received: entity.type_name,
            });
        }
        let message = instantiate(&entity.value, &binding.shape);
        publisher.publish(message)?;
        debug!(topic = %entity.topic, "notification delivered to transport");
        Ok(())
    }

    /// Drop the binding of `topic`, whatever its role.  Returns whether a
    /// binding existed.
    pub fn disconnect(&self, topic: &str) -> bool {
        let removed = self.inner.bindings().remove(topic);
        self.inner.matcher().forget(topic);
        match removed {
            Some(binding) => {
                info!(topic = %topic, role = %binding.role, "topic disconnected");
                binding.release();
                true
            }
            None => {
                debug!(topic = %topic, "disconnect for unbound topic ignored");
                false
            }
        }
    }

    /// Re-bind every whitelisted topic against a fresh topic list.
    pub async fn connect(&self) -> Result<BTreeMap<String, TopicSpec>, BridgeError> {
        self.load_handlers().await
    }

    pub fn bound_topics(&self) -> BTreeMap<String, TopicSpec> {
        self.inner
            .bindings()
            .values()
            .map(|b| {
                (
                    b.topic.clone(),
                    TopicSpec {
                        type_name: b.type_name.clone(),
                        role: b.role,
                    },
                )
            })
            .collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Tear the bridge down.
    ///
    /// Order: raise the shutdown flag so callbacks stop forwarding, let
    /// every forwarder finish its in-flight push, delete store
    /// subscriptions, delete posted entities, then unregister every
    /// transport handle.
    pub async fn shutdown_all(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.stop_forwarders.send_replace(true);
        info!("shutting down bridge");

        let control_task = self
            .inner
            .control_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = control_task {
            task.abort();
        }

        let mut bindings: Vec<TopicBinding> = self.inner.bindings().drain().map(|(_, b)| b).collect();
        for binding in &mut bindings {
            binding.drain().await;
        }

        self.inner.subscriptions.unsubscribe().await;
        self.inner.publisher.unpublish().await;

        info!("unsubscribing topics");
        let control: Vec<Box<dyn TransportSubscription>> = self
            .inner
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for subscription in control {
            subscription.unregister();
        }
        for binding in bindings {
            binding.release();
        }
        info!("bridge shut down");
    }

    // -----------------------------------------------------------------------
    // Control topics
    // -----------------------------------------------------------------------

    /// Subscribe `<node_name>/connect` and `<node_name>/disconnect`.
    pub fn listen_for_control(&self) -> Result<(), BridgeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| BridgeError::TransportUnavailable {
            topic: self.inner.config.connect_topic(),
            reason: format!("no async runtime: {e}"),
        })?;
        let (tx, rx) = mpsc::unbounded_channel::<ControlCommand>();

        let mut handles = Vec::with_capacity(2);
        for (topic, connect) in [
            (self.inner.config.disconnect_topic(), false),
            (self.inner.config.connect_topic(), true),
        ] {
            let tx = tx.clone();
            let callback: MessageCallback = Arc::new(move |message: Message| {
                let payload = control_payload(&message);
                let command = if connect {
                    ControlCommand::Connect(payload)
                } else {
                    ControlCommand::Disconnect(payload)
                };
                let _ = tx.send(command);
            });
            handles.push(self.inner.transport.subscribe(
                &topic,
                CONTROL_TYPE,
                self.inner.config.ros_subscriber_queue,
                callback,
            )?);
            debug!(topic = %topic, "listening for control messages");
        }
        self.inner
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        let task = runtime.spawn(control_loop(Arc::downgrade(&self.inner), rx));
        let previous = self
            .inner
            .control_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }
}

impl NotificationSink for BridgeRegistry {
    fn route(&self, entity: DecodedEntity) -> Result<(), BridgeError> {
        BridgeRegistry::route(self, entity)
    }
}

fn control_payload(message: &Message) -> String {
    match message.get("data") {
        Some(FieldValue::Primitive(Primitive::String(s))) => s.clone(),
        _ => String::new(),
    }
}

async fn control_loop(registry: Weak<RegistryInner>, mut rx: mpsc::UnboundedReceiver<ControlCommand>) {
    while let Some(command) = rx.recv().await {
        let Some(inner) = registry.upgrade() else {
            break;
        };
        let registry = BridgeRegistry { inner };
        if registry.is_shutting_down() {
            break;
        }
        match command {
            ControlCommand::Disconnect(topic) => {
                registry.disconnect(&topic);
            }
            ControlCommand::Connect(robot) => {
                info!(robot = %robot, "connect requested, re-binding topics");
                if let Err(e) = registry.connect().await {
                    error!(error = %e, "re-binding failed");
                }
            }
        }
    }
}

async fn forward(
    topic: String,
    shape: Arc<MessageShape>,
    publisher: Arc<EntityPublisher>,
    shutdown: Arc<AtomicBool>,
    mut rx: mpsc::Receiver<Message>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = async { let _ = stop.wait_for(|stopped| *stopped).await; } => break,
            message = rx.recv() => {
                let Some(message) = message else { break };
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                publisher.push(&topic, message, &shape).await;
            }
        }
    }
    trace!(topic = %topic, "forwarder stopped");
}
