// Named aggregate owning one replay ring and a keyed subscriber set.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use courier_common::Message;
use tokio::sync::RwLock;

use crate::error::{RegistryError, Result};
use crate::ring::ReplayRing;
use crate::subscriber::{Subscriber, Subscription};

// Lock order: the registry lock is always released before these are taken,
// and neither is held across fan-out. The ring mutex is never held across
// an await point.
#[derive(Debug)]
pub(crate) struct Topic {
    name: String,
    created_at: DateTime<Utc>,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    ring: Mutex<ReplayRing>,
}

impl Topic {
    pub(crate) fn new(name: &str, ring_capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            subscribers: RwLock::new(HashMap::new()),
            ring: Mutex::new(ReplayRing::new(ring_capacity)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Register a subscriber, enforcing one per client id.
    pub(crate) async fn attach(
        &self,
        client_id: &str,
        queue_capacity: usize,
    ) -> Result<(Subscription, tokio::sync::mpsc::Sender<Arc<Message>>)> {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.contains_key(client_id) {
            return Err(RegistryError::AlreadySubscribed {
                client_id: client_id.to_string(),
                topic: self.name.clone(),
            });
        }
        let (subscriber, subscription) = Subscriber::attach(client_id, &self.name, queue_capacity);
        let sender = subscriber.sender();
        subscribers.insert(client_id.to_string(), subscriber);
        Ok((subscription, sender))
    }

    /// Remove a subscriber; dropping its record closes the delivery queue.
    pub(crate) async fn detach(&self, client_id: &str) -> Result<()> {
        let mut subscribers = self.subscribers.write().await;
        match subscribers.remove(client_id) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotSubscribed {
                client_id: client_id.to_string(),
                topic: self.name.clone(),
            }),
        }
    }

    /// Copy of the subscriber records; the caller fans out outside the lock.
    pub(crate) async fn snapshot_subscribers(&self) -> Vec<Subscriber> {
        self.subscribers.read().await.values().cloned().collect()
    }

    /// Remove every subscriber, closing all queues. Returns the detached
    /// client ids so the caller can log the disconnects.
    pub(crate) async fn drain_all(&self) -> Vec<String> {
        let mut subscribers = self.subscribers.write().await;
        subscribers.drain().map(|(client_id, _)| client_id).collect()
    }

    pub(crate) async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub(crate) fn add_to_ring(&self, msg: &Arc<Message>) {
        self.ring.lock().expect("ring lock").add(Arc::clone(msg));
    }

    pub(crate) fn tail_n(&self, n: usize) -> Vec<Arc<Message>> {
        self.ring.lock().expect("ring lock").tail_n(n)
    }

    pub(crate) fn message_count(&self) -> usize {
        self.ring.lock().expect("ring lock").count()
    }
}
