// Process-wide topic registry and broker API surface.
//
// The registry is an explicit object constructed once at startup and
// threaded through the transport layer; there is no ambient global. The
// registry lock guards only the name -> topic map; per-topic state is
// guarded by each topic's own locks, and the registry lock is always
// released before a topic lock is taken.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use courier_common::{Draft, Message};
use serde::Serialize;
use tokio::sync::{watch, Notify, RwLock};

use crate::config::Config;
use crate::error::{RegistryError, Result};
use crate::subscriber::{Enqueue, Subscription};
use crate::topic::Topic;

/// Per-topic listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub subscribers: usize,
}

/// Per-topic statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TopicStats {
    pub messages: usize,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub topics: HashMap<String, TopicStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub uptime_sec: u64,
    pub topics: usize,
    pub subscribers: usize,
}

// Tracks detached replay tasks so stop() can wait for them to quiesce.
#[derive(Debug, Default)]
struct Inflight {
    active: AtomicUsize,
    idle: Notify,
}

impl Inflight {
    fn begin(self: &Arc<Self>) -> InflightGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        InflightGuard {
            inflight: Arc::clone(self),
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InflightGuard {
    inflight: Arc<Inflight>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.inflight.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inflight.idle.notify_waiters();
        }
    }
}

/// Topic registry and broker entry point.
///
/// ```
/// use courier_broker::{Config, Registry};
/// use courier_common::Draft;
///
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let registry = Registry::new(Config::default());
///     registry.create_topic("orders").await.expect("create");
///     let mut sub = registry.subscribe("orders", "c1", 0).await.expect("subscribe");
///     registry
///         .publish("orders", Draft::new("m1", serde_json::json!({"x": 1})))
///         .await
///         .expect("publish");
///     let event = sub.recv().await.expect("event");
///     assert_eq!(event.id, "m1");
/// });
/// ```
#[derive(Debug)]
pub struct Registry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    config: Config,
    started_at: Mutex<Option<Instant>>,
    shutdown_tx: watch::Sender<bool>,
    inflight: Arc<Inflight>,
}

impl Registry {
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            topics: RwLock::new(HashMap::new()),
            config,
            started_at: Mutex::new(None),
            shutdown_tx,
            inflight: Arc::new(Inflight::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Record the service start time.
    pub fn start(&self) {
        *self.started_at.lock().expect("started_at lock") = Some(Instant::now());
        tracing::info!("registry started");
    }

    /// Signal shutdown and wait up to the graceful timeout for detached
    /// replay work to quiesce. Returns even if the timeout elapses.
    pub async fn stop(&self) {
        tracing::info!("stopping registry");
        let _ = self.shutdown_tx.send(true);
        let drained = tokio::time::timeout(
            self.config.graceful_shutdown_timeout,
            self.inflight.wait_idle(),
        )
        .await;
        match drained {
            Ok(()) => tracing::info!("registry stopped gracefully"),
            Err(_) => tracing::warn!("registry shutdown timeout exceeded"),
        }
    }

    pub async fn create_topic(&self, name: &str) -> Result<()> {
        let mut topics = self.topics.write().await;
        if topics.contains_key(name) {
            return Err(RegistryError::TopicExists(name.to_string()));
        }
        let topic = Arc::new(Topic::new(name, self.config.ring_buffer_size));
        topics.insert(name.to_string(), topic);
        metrics::counter!("courier_topics_created_total").increment(1);
        tracing::info!(topic = %name, "created topic");
        Ok(())
    }

    /// Remove a topic and disconnect every subscriber by closing its queue.
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        let topic = {
            let mut topics = self.topics.write().await;
            topics
                .remove(name)
                .ok_or_else(|| RegistryError::TopicNotFound(name.to_string()))?
        };
        for client_id in topic.drain_all().await {
            tracing::info!(topic = %name, client_id = %client_id, "disconnected subscriber");
        }
        metrics::counter!("courier_topics_deleted_total").increment(1);
        tracing::info!(topic = %name, "deleted topic");
        Ok(())
    }

    pub async fn list_topics(&self) -> Vec<TopicInfo> {
        let topics: Vec<Arc<Topic>> = self.topics.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(topics.len());
        for topic in topics {
            infos.push(TopicInfo {
                name: topic.name().to_string(),
                subscribers: topic.subscriber_count().await,
            });
        }
        infos
    }

    /// Attach a subscriber. With `last_n > 0` the ring tail is replayed into
    /// the new queue by a detached task so subscribe returns promptly; replay
    /// uses the same drop-if-full policy as live fan-out.
    pub async fn subscribe(
        &self,
        topic_name: &str,
        client_id: &str,
        last_n: usize,
    ) -> Result<Subscription> {
        let topic = self.resolve(topic_name).await?;
        let (subscription, sender) = topic
            .attach(client_id, self.config.channel_buffer_size)
            .await?;

        if last_n > 0 {
            let history = topic.tail_n(last_n);
            if !history.is_empty() {
                let guard = self.inflight.begin();
                let shutdown_rx = self.shutdown_tx.subscribe();
                let client_id = client_id.to_string();
                let topic_name = topic_name.to_string();
                tokio::spawn(async move {
                    let _guard = guard;
                    for msg in history {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                        match sender.try_send(msg) {
                            Ok(()) => {}
                            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                                metrics::counter!("courier_replay_dropped_total").increment(1);
                                tracing::warn!(
                                    client_id = %client_id,
                                    topic = %topic_name,
                                    "dropped replay message for full queue"
                                );
                            }
                            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => return,
                        }
                    }
                });
            }
        }

        tracing::info!(client_id = %client_id, topic = %topic_name, last_n, "client subscribed");
        Ok(subscription)
    }

    pub async fn unsubscribe(&self, topic_name: &str, client_id: &str) -> Result<()> {
        let topic = self.resolve(topic_name).await?;
        topic.detach(client_id).await?;
        tracing::info!(client_id = %client_id, topic = %topic_name, "client unsubscribed");
        Ok(())
    }

    /// Stamp the draft and fan it out to every current subscriber.
    ///
    /// The ring append and subscriber snapshot happen under the topic's
    /// locks; the enqueue loop runs outside all locks and never blocks on a
    /// slow consumer. A full queue drops the message for that subscriber
    /// only; the publish still succeeds.
    pub async fn publish(&self, topic_name: &str, draft: Draft) -> Result<()> {
        let topic = self.resolve(topic_name).await?;

        let id = if draft.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            draft.id
        };
        let msg = Arc::new(Message {
            id,
            payload: draft.payload,
            topic: topic_name.to_string(),
            timestamp: chrono::Utc::now(),
        });

        topic.add_to_ring(&msg);
        let subscribers = topic.snapshot_subscribers().await;
        let fanout = subscribers.len();
        for subscriber in subscribers {
            match subscriber.offer(Arc::clone(&msg)) {
                Enqueue::Delivered => {}
                Enqueue::Dropped => {
                    metrics::counter!("courier_slow_consumer_dropped_total").increment(1);
                    tracing::warn!(
                        client_id = %subscriber.client_id,
                        topic = %topic_name,
                        "dropped message for slow consumer"
                    );
                }
                // Subscriber is mid-detach; nothing to deliver to.
                Enqueue::Closed => {}
            }
        }

        metrics::counter!("courier_publish_total").increment(1);
        tracing::debug!(topic = %topic_name, message_id = %msg.id, fanout, "published message");
        Ok(())
    }

    pub async fn stats(&self) -> Stats {
        let topics: Vec<Arc<Topic>> = self.topics.read().await.values().cloned().collect();
        let mut stats = Stats {
            topics: HashMap::with_capacity(topics.len()),
        };
        for topic in topics {
            stats.topics.insert(
                topic.name().to_string(),
                TopicStats {
                    messages: topic.message_count(),
                    subscribers: topic.subscriber_count().await,
                },
            );
        }
        stats
    }

    pub async fn health(&self) -> Health {
        let topics: Vec<Arc<Topic>> = self.topics.read().await.values().cloned().collect();
        let mut subscribers = 0;
        for topic in &topics {
            subscribers += topic.subscriber_count().await;
        }
        let uptime_sec = self
            .started_at
            .lock()
            .expect("started_at lock")
            .map(|at| at.elapsed().as_secs())
            .unwrap_or(0);
        Health {
            uptime_sec,
            topics: topics.len(),
            subscribers,
        }
    }

    async fn resolve(&self, name: &str) -> Result<Arc<Topic>> {
        self.topics
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::TopicNotFound(name.to_string()))
    }
}
