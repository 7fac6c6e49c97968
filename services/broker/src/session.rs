// Per-connection session engine.
//
// Each session runs three kinds of tasks:
//   1) The read loop (this module's entry point): reads frames, decodes the
//      JSON envelope, dispatches verbs, and enqueues replies.
//   2) A single writer task that owns the write half and drains a bounded
//      outbound queue. The read loop and forwarders never touch the wire
//      directly, so response and event frames cannot interleave mid-write.
//   3) One forwarder task per subscription, parked on the subscriber queue.
//      Events flow queue -> outbound -> wire in FIFO order per subscription;
//      an idle forwarder costs nothing, so no subscription can starve
//      another.
//
// The subscriber queue returning end-of-stream means the topic detached us
// (topic deletion or broker shutdown); the forwarder then drops the entry
// from the session's subscription map.
//
// Teardown is cooperative: a failed write, peer EOF, or a directory-wide
// shutdown all flip the cancel watch, and the read loop runs the single
// teardown path: detach every subscription from the registry, then
// deregister from the directory.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use bytes::BytesMut;
use courier_broker::{Registry, RegistryError, Subscription};
use courier_common::Draft;
use courier_transport::ConnectionId;
use courier_wire::{ErrorCode, Request, Response, read_frame, write_response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::PrincipalAuth;
use crate::directory::SessionDirectory;

#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<Registry>,
    pub directory: Arc<SessionDirectory>,
    pub auth: PrincipalAuth,
    pub max_frame_bytes: usize,
    pub outbound_queue_depth: usize,
}

// Keyed by topic. The token identifies which forwarder owns the entry, so a
// forwarder that ends late cannot remove a newer subscription to the same
// topic name.
struct SubscriptionEntry {
    token: u64,
    forwarder: JoinHandle<()>,
}

type Subscriptions = Arc<Mutex<HashMap<String, SubscriptionEntry>>>;

/// Drive one client connection to completion.
pub async fn run_session<R, W>(
    read: R,
    write: W,
    connection: ConnectionId,
    ctx: SessionContext,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut read = read;
    let mut scratch = BytesMut::new();

    // Session establishment: the first frame must be a connect carrying the
    // principal token. UNAUTHORIZED is only ever produced here.
    let frame = match read_frame(&mut read, ctx.max_frame_bytes, &mut scratch).await? {
        Some(frame) => frame,
        None => return Ok(()),
    };
    let (client_id, connect_request_id) = match Request::decode(&frame) {
        Ok(Request::Connect { token, request_id }) => match ctx.auth.authenticate(&token) {
            Ok(client_id) => (client_id, request_id),
            Err(err) => {
                let mut write = write;
                let reply = Response::error(request_id, ErrorCode::Unauthorized, err.to_string());
                let _ = write_response(&mut write, &reply).await;
                return Ok(());
            }
        },
        Ok(other) => {
            let mut write = write;
            let reply = Response::error(
                request_id_of(&other),
                ErrorCode::Unauthorized,
                "connect required before any other request",
            );
            let _ = write_response(&mut write, &reply).await;
            return Ok(());
        }
        Err(err) => {
            let mut write = write;
            let reply = Response::error(
                None,
                ErrorCode::BadRequest,
                format!("invalid connect frame: {err}"),
            );
            let _ = write_response(&mut write, &reply).await;
            return Ok(());
        }
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (outbound_tx, outbound_rx) = mpsc::channel(ctx.outbound_queue_depth);
    let writer = tokio::spawn(run_writer(
        write,
        outbound_rx,
        cancel_tx.clone(),
        cancel_rx.clone(),
    ));

    ctx.directory
        .register(&client_id, connection, cancel_tx.clone())
        .await;
    metrics::counter!("courier_sessions_total").increment(1);
    tracing::info!(client_id = %client_id, connection = ?connection, "session established");

    let session = Session {
        client_id: client_id.clone(),
        registry: Arc::clone(&ctx.registry),
        outbound: outbound_tx,
        subscriptions: Arc::new(Mutex::new(HashMap::new())),
        next_subscription: AtomicU64::new(1),
    };
    if session
        .outbound
        .send(Response::connected(client_id.as_str(), connect_request_id))
        .await
        .is_err()
    {
        // Writer already failed; fall through to teardown.
    } else {
        session.read_loop(&mut read, &mut scratch, ctx.max_frame_bytes, cancel_rx).await;
    }

    // Teardown: runs exactly once, after the read loop has exited.
    let _ = cancel_tx.send(true);
    let mut subscriptions = session.subscriptions.lock().await;
    for (topic, entry) in subscriptions.drain() {
        entry.forwarder.abort();
        if let Err(err) = ctx.registry.unsubscribe(&topic, &client_id).await {
            tracing::debug!(
                client_id = %client_id,
                topic = %topic,
                error = %err,
                "cleanup unsubscribe failed"
            );
        }
    }
    drop(subscriptions);
    ctx.directory.remove(&client_id, connection).await;
    let _ = writer.await;
    tracing::info!(client_id = %client_id, "session closed");
    Ok(())
}

struct Session {
    client_id: String,
    registry: Arc<Registry>,
    outbound: mpsc::Sender<Response>,
    subscriptions: Subscriptions,
    next_subscription: AtomicU64,
}

impl Session {
    async fn read_loop<R>(
        &self,
        read: &mut R,
        scratch: &mut BytesMut,
        max_frame_bytes: usize,
        mut cancel_rx: watch::Receiver<bool>,
    ) where
        R: AsyncRead + Unpin,
    {
        loop {
            // Stay responsive to cancellation while blocked on the wire.
            let frame = tokio::select! {
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        return;
                    }
                    continue;
                }
                frame = read_frame(read, max_frame_bytes, scratch) => match frame {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return,
                    Err(err) => {
                        tracing::warn!(client_id = %self.client_id, error = %err, "frame read failed");
                        return;
                    }
                },
            };

            // Decode in two steps so a malformed envelope can still echo the
            // request id it carried.
            let value: serde_json::Value = match serde_json::from_slice(&frame.payload) {
                Ok(value) => value,
                Err(err) => {
                    let reply = Response::error(
                        None,
                        ErrorCode::BadRequest,
                        format!("malformed JSON: {err}"),
                    );
                    if self.outbound.send(reply).await.is_err() {
                        return;
                    }
                    continue;
                }
            };
            let request_id = value
                .get("request_id")
                .and_then(|id| id.as_str())
                .map(str::to_string);
            let request: Request = match serde_json::from_value(value) {
                Ok(request) => request,
                Err(err) => {
                    let reply = Response::error(
                        request_id,
                        ErrorCode::BadRequest,
                        format!("invalid request: {err}"),
                    );
                    if self.outbound.send(reply).await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            let reply = self.dispatch(request).await;
            if self.outbound.send(reply).await.is_err() {
                return;
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Connect { request_id, .. } => Response::error(
                request_id,
                ErrorCode::BadRequest,
                "session already established",
            ),
            Request::Subscribe {
                topic,
                last_n,
                request_id,
            } => self.handle_subscribe(topic, last_n, request_id).await,
            Request::Unsubscribe { topic, request_id } => {
                self.handle_unsubscribe(topic, request_id).await
            }
            Request::Publish {
                topic,
                message,
                request_id,
            } => self.handle_publish(topic, message, request_id).await,
            Request::Ping { request_id } => Response::pong(request_id),
        }
    }

    async fn handle_subscribe(
        &self,
        topic: String,
        last_n: i64,
        request_id: Option<String>,
    ) -> Response {
        if topic.is_empty() {
            return Response::error(
                request_id,
                ErrorCode::BadRequest,
                "topic is required for subscribe",
            );
        }
        let last_n = last_n.max(0) as usize;
        match self
            .registry
            .subscribe(&topic, &self.client_id, last_n)
            .await
        {
            Ok(subscription) => {
                // Hold the map lock across the spawn so the forwarder cannot
                // observe the map before its own entry is inserted.
                let mut subscriptions = self.subscriptions.lock().await;
                let token = self.next_subscription.fetch_add(1, Ordering::Relaxed);
                let forwarder = tokio::spawn(forward_events(
                    subscription,
                    self.outbound.clone(),
                    Arc::clone(&self.subscriptions),
                    self.client_id.clone(),
                    token,
                ));
                subscriptions.insert(topic.clone(), SubscriptionEntry { token, forwarder });
                drop(subscriptions);
                Response::ack(request_id, Some(topic))
            }
            Err(err) => wire_error(request_id, &err),
        }
    }

    async fn handle_unsubscribe(&self, topic: String, request_id: Option<String>) -> Response {
        if topic.is_empty() {
            return Response::error(
                request_id,
                ErrorCode::BadRequest,
                "topic is required for unsubscribe",
            );
        }
        match self.registry.unsubscribe(&topic, &self.client_id).await {
            Ok(()) => {
                if let Some(entry) = self.subscriptions.lock().await.remove(&topic) {
                    entry.forwarder.abort();
                }
                Response::ack(request_id, Some(topic))
            }
            Err(err) => wire_error(request_id, &err),
        }
    }

    async fn handle_publish(
        &self,
        topic: String,
        message: Draft,
        request_id: Option<String>,
    ) -> Response {
        if topic.is_empty() {
            return Response::error(
                request_id,
                ErrorCode::BadRequest,
                "topic is required for publish",
            );
        }
        if message.id.is_empty() {
            return Response::error(request_id, ErrorCode::BadRequest, "message.id is required");
        }
        match self.registry.publish(&topic, message).await {
            Ok(()) => Response::ack(request_id, Some(topic)),
            Err(err) => wire_error(request_id, &err),
        }
    }
}

// Single-writer response path: everything written to the wire goes through
// here. A write failure cancels the whole session.
async fn run_writer<W>(
    mut write: W,
    mut outbound: mpsc::Receiver<Response>,
    cancel_tx: watch::Sender<bool>,
    mut cancel_rx: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    return;
                }
            }
            next = outbound.recv() => {
                let Some(response) = next else { return };
                if let Err(err) = write_response(&mut write, &response).await {
                    tracing::debug!(error = %err, "session write failed");
                    let _ = cancel_tx.send(true);
                    return;
                }
            }
        }
    }
}

// One per subscription: queue -> outbound, FIFO. End-of-stream means the
// topic detached us; drop the session's map entry so a later subscribe to
// the same topic starts clean.
async fn forward_events(
    mut subscription: Subscription,
    outbound: mpsc::Sender<Response>,
    subscriptions: Subscriptions,
    client_id: String,
    token: u64,
) {
    let topic = subscription.topic().to_string();
    while let Some(msg) = subscription.recv().await {
        if outbound.send(Response::event(&msg)).await.is_err() {
            return;
        }
    }
    let mut subscriptions = subscriptions.lock().await;
    if subscriptions
        .get(&topic)
        .is_some_and(|entry| entry.token == token)
    {
        subscriptions.remove(&topic);
        tracing::info!(client_id = %client_id, topic = %topic, "subscription closed by broker");
    }
}

fn request_id_of(request: &Request) -> Option<String> {
    match request {
        Request::Connect { request_id, .. }
        | Request::Subscribe { request_id, .. }
        | Request::Unsubscribe { request_id, .. }
        | Request::Publish { request_id, .. }
        | Request::Ping { request_id } => request_id.clone(),
    }
}

fn wire_error(request_id: Option<String>, err: &RegistryError) -> Response {
    let code = match err {
        RegistryError::TopicNotFound(_) => ErrorCode::TopicNotFound,
        // The wire code set is closed; everything else is INTERNAL with the
        // registry's message text.
        _ => ErrorCode::Internal,
    };
    Response::error(request_id, code, err.to_string())
}
