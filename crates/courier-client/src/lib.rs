// Client for the courier broker protocol.
//
// One TCP connection per client. A background reader task routes ack-style
// responses to their callers by request id and forwards event frames into a
// bounded queue the caller drains with `next_event`.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use courier_common::{Draft, Message};
use courier_transport::Connection;
use courier_wire::{read_frame, write_request, Request, Response};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_frame_bytes: usize,
    /// How long to wait for the broker to answer one request.
    pub request_timeout: Duration,
    /// Capacity of the local event queue fed by the reader task.
    pub event_queue_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 1024 * 1024,
            request_timeout: Duration::from_secs(5),
            event_queue_depth: 256,
        }
    }
}

/// A delivered event frame.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub message: Message,
    pub ts: DateTime<Utc>,
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

pub struct Client {
    writer: OwnedWriteHalf,
    pending: Pending,
    events: mpsc::Receiver<Event>,
    client_id: String,
    config: ClientConfig,
    reader: JoinHandle<()>,
}

impl Client {
    /// Dial the broker and perform the connect handshake. The token is the
    /// opaque principal identifier; the broker echoes back the client id it
    /// derived from it.
    pub async fn connect(addr: SocketAddr, token: &str) -> Result<Self> {
        Self::connect_with_config(addr, token, ClientConfig::default()).await
    }

    pub async fn connect_with_config(
        addr: SocketAddr,
        token: &str,
        config: ClientConfig,
    ) -> Result<Self> {
        let connection = Connection::connect(addr).await?;
        let (mut read, mut write) = connection.into_split();

        let hello = Request::Connect {
            token: token.to_string(),
            request_id: Some(uuid::Uuid::new_v4().to_string()),
        };
        write_request(&mut write, &hello)
            .await
            .context("send connect")?;

        let mut scratch = BytesMut::new();
        let frame = read_frame(&mut read, config.max_frame_bytes, &mut scratch)
            .await
            .context("read connect response")?
            .ok_or_else(|| anyhow!("connection closed during handshake"))?;
        let client_id = match Response::decode(&frame).context("decode connect response")? {
            Response::Connected { client_id, .. } => client_id,
            Response::Error { error, .. } => {
                bail!("connect rejected: {:?} {}", error.code, error.message)
            }
            other => bail!("unexpected handshake response: {other:?}"),
        };

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(config.event_queue_depth);
        let reader = tokio::spawn(run_reader(
            read,
            config.max_frame_bytes,
            Arc::clone(&pending),
            event_tx,
        ));

        Ok(Self {
            writer: write,
            pending,
            events: event_rx,
            client_id,
            config,
            reader,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Send one request and wait for the correlated response. A generated
    /// request id overrides whatever the caller left in the envelope.
    pub async fn request(&mut self, mut request: Request) -> Result<Response> {
        let request_id = uuid::Uuid::new_v4().to_string();
        match &mut request {
            Request::Connect { request_id: slot, .. }
            | Request::Subscribe { request_id: slot, .. }
            | Request::Unsubscribe { request_id: slot, .. }
            | Request::Publish { request_id: slot, .. }
            | Request::Ping { request_id: slot } => *slot = Some(request_id.clone()),
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock")
            .insert(request_id.clone(), tx);

        if let Err(err) = write_request(&mut self.writer, &request).await {
            self.pending
                .lock()
                .expect("pending lock")
                .remove(&request_id);
            return Err(err).context("send request");
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => bail!("connection closed before the broker replied"),
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending lock")
                    .remove(&request_id);
                bail!("timed out waiting for broker response")
            }
        }
    }

    pub async fn subscribe(&mut self, topic: &str, last_n: i64) -> Result<()> {
        let response = self
            .request(Request::Subscribe {
                topic: topic.to_string(),
                last_n,
                request_id: None,
            })
            .await?;
        expect_ack(response)
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        let response = self
            .request(Request::Unsubscribe {
                topic: topic.to_string(),
                request_id: None,
            })
            .await?;
        expect_ack(response)
    }

    pub async fn publish(&mut self, topic: &str, message: Draft) -> Result<()> {
        let response = self
            .request(Request::Publish {
                topic: topic.to_string(),
                message,
                request_id: None,
            })
            .await?;
        expect_ack(response)
    }

    pub async fn ping(&mut self) -> Result<DateTime<Utc>> {
        let response = self.request(Request::Ping { request_id: None }).await?;
        match response {
            Response::Pong { ts, .. } => Ok(ts),
            other => bail!("expected pong, got {other:?}"),
        }
    }

    /// Next event frame, in arrival order across all subscriptions.
    /// Returns `None` once the connection is gone.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn expect_ack(response: Response) -> Result<()> {
    match response {
        Response::Ack { .. } => Ok(()),
        Response::Error { error, .. } => {
            bail!("broker error: {:?} {}", error.code, error.message)
        }
        other => bail!("expected ack, got {other:?}"),
    }
}


async fn run_reader(
    mut read: OwnedReadHalf,
    max_frame_bytes: usize,
    pending: Pending,
    events: mpsc::Sender<Event>,
) {
    let mut scratch = BytesMut::new();
    loop {
        let frame = match read_frame(&mut read, max_frame_bytes, &mut scratch).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "client reader failed");
                break;
            }
        };
        let response = match Response::decode(&frame) {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = %err, "client failed to decode response");
                break;
            }
        };
        match response {
            Response::Event { topic, message, ts } => {
                if events.send(Event { topic, message, ts }).await.is_err() {
                    break;
                }
            }
            Response::Connected { ref request_id, .. }
            | Response::Ack { ref request_id, .. }
            | Response::Pong { ref request_id, .. }
            | Response::Error { ref request_id, .. } => {
                let Some(request_id) = request_id.clone() else {
                    tracing::debug!("dropping uncorrelated response");
                    continue;
                };
                let waiter = pending.lock().expect("pending lock").remove(&request_id);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(response);
                }
            }
        }
    }
    // Wake every in-flight caller with a closed-channel error.
    pending.lock().expect("pending lock").clear();
}
