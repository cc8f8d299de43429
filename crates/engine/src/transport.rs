// VTrace - JavaScript Value Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Inspector transport: one websocket connection multiplexed into many
//! logical exchanges.
//!
//! Requests are correlated with their responses by id. Every inbound frame,
//! response or notification, is additionally offered to the registered
//! subscriptions in registration order:
//!
//! - one-shot subscriptions ([`Transport::subscribe`]) resolve an
//!   [`EventWaiter`] with the first matching frame and are removed at once;
//!   dropping the waiter removes a subscription that never matched,
//! - persistent subscriptions ([`Transport::on`]) observe every notification
//!   of one method until explicitly removed with [`Transport::off`],
//! - malformed-frame observers ([`Transport::on_malformed`]) see frames that
//!   could not be parsed; such frames are otherwise ignored.
//!
//! When the connection ends, every pending request and every outstanding
//! waiter fails with [`TransportError::ConnectionClosed`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::{
    error::TransportError,
    protocol::{InboundMessage, MalformedFrame, Notification, Request, RequestId},
};

/// How long [`Transport::close`] waits for the peer to acknowledge the close frame.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

type Predicate = Box<dyn Fn(&InboundMessage) -> bool + Send + Sync>;
type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;
type MalformedHandler = Arc<dyn Fn(&str, &MalformedFrame) + Send + Sync>;

/// Transport settings.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// Upper bound for a single request/response round-trip; `None` waits forever
    pub request_timeout: Option<Duration>,
}

/// Handle identifying a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Predicate matching notifications of one method.
pub fn method_is(
    method: impl Into<String>,
) -> impl Fn(&InboundMessage) -> bool + Send + Sync + 'static {
    let method = method.into();
    move |message| message.method() == Some(method.as_str())
}

enum Subscriber {
    Once { predicate: Predicate, tx: oneshot::Sender<InboundMessage> },
    Persistent { method: String, handler: NotificationHandler },
    Malformed { handler: MalformedHandler },
}

struct Subscription {
    id: SubscriptionId,
    subscriber: Subscriber,
}

struct PendingRequest {
    method: String,
    tx: oneshot::Sender<Result<Value, TransportError>>,
}

#[derive(Default)]
struct Registry {
    pending: HashMap<RequestId, PendingRequest>,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
    closed: bool,
}

impl Registry {
    fn register(&mut self, subscriber: Subscriber) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscriptions.push(Subscription { id, subscriber });
        id
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|subscription| subscription.id != id);
        before != self.subscriptions.len()
    }
}

/// State shared between the transport handle and its I/O tasks.
struct Shared {
    registry: Mutex<Registry>,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    fn new() -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self { registry: Mutex::new(Registry::default()), closed_tx }
    }

    fn handle_text(&self, text: &str) {
        match InboundMessage::parse(text) {
            Ok(message) => {
                match &message {
                    InboundMessage::Notification(notification) => {
                        trace!(method = %notification.method, "Received notification")
                    }
                    InboundMessage::Response(response) => {
                        trace!(id = response.id, "Received response")
                    }
                }
                self.dispatch(message);
            }
            Err(error) => {
                warn!(%error, "Ignoring malformed frame from debuggee");
                let handlers: Vec<MalformedHandler> = self
                    .registry
                    .lock()
                    .subscriptions
                    .iter()
                    .filter_map(|subscription| match &subscription.subscriber {
                        Subscriber::Malformed { handler } => Some(Arc::clone(handler)),
                        _ => None,
                    })
                    .collect();
                for handler in handlers {
                    handler(text, &error);
                }
            }
        }
    }

    /// Route a frame to its pending request (if any), then to the subscriptions.
    ///
    /// One-shot predicates run under the registry lock and must not call back
    /// into the transport; persistent handlers run after the lock is released.
    fn dispatch(&self, message: InboundMessage) {
        let mut handlers = Vec::new();
        {
            let mut registry = self.registry.lock();

            if let InboundMessage::Response(response) = &message {
                match registry.pending.remove(&response.id) {
                    Some(pending) => {
                        let result = response
                            .clone()
                            .into_result()
                            .map_err(|body| TransportError::protocol(&pending.method, body));
                        // The requester may have given up (timeout or cancellation)
                        let _ = pending.tx.send(result);
                    }
                    None => debug!(id = response.id, "Response for unknown request"),
                }
            }

            let mut index = 0;
            while index < registry.subscriptions.len() {
                match &registry.subscriptions[index].subscriber {
                    Subscriber::Once { predicate, .. } if predicate(&message) => {
                        let subscription = registry.subscriptions.remove(index);
                        if let Subscriber::Once { tx, .. } = subscription.subscriber {
                            let _ = tx.send(message.clone());
                        }
                        continue;
                    }
                    Subscriber::Persistent { method, handler }
                        if message.method() == Some(method.as_str()) =>
                    {
                        handlers.push(Arc::clone(handler));
                    }
                    _ => {}
                }
                index += 1;
            }
        }

        if let Some(notification) = message.as_notification() {
            for handler in handlers {
                handler(notification);
            }
        }
    }

    fn forget(&self, id: RequestId) {
        self.registry.lock().pending.remove(&id);
    }

    fn remove_subscription(&self, id: SubscriptionId) -> bool {
        self.registry.lock().remove(id)
    }

    /// Fail everything outstanding. Idempotent.
    fn mark_closed(&self) {
        let (pending, once) = {
            let mut registry = self.registry.lock();
            if registry.closed {
                return;
            }
            registry.closed = true;
            let pending: Vec<PendingRequest> =
                registry.pending.drain().map(|(_, pending)| pending).collect();
            // Dropping the one-shot senders wakes their waiters with `ConnectionClosed`
            let (once, rest): (Vec<Subscription>, Vec<Subscription>) =
                registry.subscriptions.drain(..).partition(|subscription| {
                    matches!(subscription.subscriber, Subscriber::Once { .. })
                });
            registry.subscriptions = rest;
            (pending, once)
        };

        if !pending.is_empty() {
            debug!(count = pending.len(), "Failing pending requests on close");
        }
        for request in pending {
            let _ = request.tx.send(Err(TransportError::ConnectionClosed));
        }
        drop(once);
        self.closed_tx.send_replace(true);
    }
}

/// Waiter for the first inbound frame matching a predicate.
///
/// Dropping the waiter removes its subscription if it has not fired yet.
pub struct EventWaiter {
    id: SubscriptionId,
    rx: oneshot::Receiver<InboundMessage>,
    shared: Weak<Shared>,
}

impl std::fmt::Debug for EventWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWaiter").field("id", &self.id).finish()
    }
}

impl EventWaiter {
    /// Identifier of the underlying subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the matching frame.
    pub async fn recv(&mut self) -> Result<InboundMessage, TransportError> {
        (&mut self.rx).await.map_err(|_| TransportError::ConnectionClosed)
    }

    /// Take the matching frame if it has already arrived.
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove_subscription(self.id);
        }
    }
}

/// Connection to a debuggee's inspector endpoint.
pub struct Transport {
    endpoint: String,
    config: TransportConfig,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Message>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Transport {
    /// Open the websocket connection. Returns once the handshake completed.
    pub async fn connect(endpoint: &str, config: TransportConfig) -> Result<Self, TransportError> {
        debug!(endpoint, "Connecting to inspector");
        let (stream, _) = tokio_tungstenite::connect_async(endpoint).await.map_err(|e| {
            TransportError::Connect { endpoint: endpoint.to_string(), reason: e.to_string() }
        })?;
        let (mut sink, mut stream) = stream.split();

        let shared = Arc::new(Shared::new());
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer_shared = Arc::clone(&shared);
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "Failed to write to inspector connection");
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = sink.close().await;
            writer_shared.mark_closed();
        });

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => reader_shared.handle_text(text.as_str()),
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => reader_shared.handle_text(text),
                        Err(e) => warn!(error = %e, "Ignoring non UTF-8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Inspector closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Inspector connection failed");
                        break;
                    }
                }
            }
            reader_shared.mark_closed();
        });

        info!(endpoint, "Connected to debuggee inspector");
        Ok(Self {
            endpoint: endpoint.to_string(),
            config,
            shared,
            outbound,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        })
    }

    /// Endpoint this transport is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Issue a request and wait for its response.
    ///
    /// Fails with [`TransportError::Protocol`] when the debuggee answers with
    /// an error, [`TransportError::Timeout`] when the configured bound elapses
    /// and [`TransportError::ConnectionClosed`] when the connection ends first.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text =
            serde_json::to_string(&Request::new(id, method, params)).map_err(TransportError::Encode)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut registry = self.shared.registry.lock();
            if registry.closed {
                return Err(TransportError::ConnectionClosed);
            }
            registry.pending.insert(id, PendingRequest { method: method.to_string(), tx });
        }

        debug!(id, method, "Sending request");
        if self.outbound.send(Message::Text(text.into())).is_err() {
            self.shared.forget(id);
            return Err(TransportError::ConnectionClosed);
        }

        let outcome = match self.config.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.shared.forget(id);
                    warn!(id, method, ?timeout, "Request timed out");
                    return Err(TransportError::Timeout { method: method.to_string(), id, timeout });
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionClosed),
        }
    }

    /// Issue a request with typed parameters and decode its typed result.
    pub async fn send_typed<P, R>(&self, method: &str, params: &P) -> Result<R, TransportError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(TransportError::Encode)?;
        let result = self.send(method, Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|source| TransportError::Decode { method: method.to_string(), source })
    }

    /// Register a one-shot subscription resolved by the first matching inbound frame.
    ///
    /// The predicate runs on the connection's reader task and must not call
    /// back into the transport.
    pub fn subscribe<F>(&self, predicate: F) -> EventWaiter
    where
        F: Fn(&InboundMessage) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.shared.registry.lock();
        let id = if registry.closed {
            // Dropping `tx` makes the waiter report `ConnectionClosed`
            registry.next_subscription += 1;
            SubscriptionId(registry.next_subscription)
        } else {
            registry.register(Subscriber::Once { predicate: Box::new(predicate), tx })
        };
        EventWaiter { id, rx, shared: Arc::downgrade(&self.shared) }
    }

    /// Shorthand for a one-shot subscription on a notification method.
    pub fn wait_for_method(&self, method: &str) -> EventWaiter {
        self.subscribe(method_is(method))
    }

    /// Register a persistent observer of every notification of `method`.
    pub fn on<F>(&self, method: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared
            .registry
            .lock()
            .register(Subscriber::Persistent { method: method.into(), handler: Arc::new(handler) })
    }

    /// Register a persistent observer of frames that failed to parse.
    pub fn on_malformed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str, &MalformedFrame) + Send + Sync + 'static,
    {
        self.shared.registry.lock().register(Subscriber::Malformed { handler: Arc::new(handler) })
    }

    /// Remove a subscription. Returns whether it was still registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.remove_subscription(id)
    }

    /// Number of live subscriptions of any kind.
    pub fn subscription_count(&self) -> usize {
        self.shared.registry.lock().subscriptions.len()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.registry.lock().pending.len()
    }

    /// Whether the connection has ended.
    pub fn is_closed(&self) -> bool {
        *self.shared.closed_tx.borrow()
    }

    /// Resolve once the connection has ended, for whatever reason.
    pub async fn closed(&self) {
        let mut closed_rx = self.shared.closed_tx.subscribe();
        // The sender lives in `self.shared`, so this cannot fail while we hold `self`
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }

    /// Close the connection and fail everything still outstanding.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        debug!(endpoint = %self.endpoint, "Closing inspector connection");
        if self.outbound.send(Message::Close(None)).is_ok() {
            let _ = tokio::time::timeout(CLOSE_GRACE, self.closed()).await;
        }
        self.shared.mark_closed();
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{
        future::Future,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;

    type ServerSocket = WebSocketStream<TcpStream>;

    /// Accept one websocket client and hand it to `handler`.
    async fn spawn_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            handler(socket).await;
        });
        format!("ws://{addr}")
    }

    async fn read_request(socket: &mut ServerSocket) -> Value {
        loop {
            match socket.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                _ => continue,
            }
        }
    }

    async fn write_json(socket: &mut ServerSocket, value: Value) {
        socket.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    async fn connect(endpoint: &str) -> Transport {
        vtrace_common::logging::ensure_test_logging(None);
        Transport::connect(endpoint, TransportConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_responses_are_correlated_out_of_order() {
        let endpoint = spawn_server(|mut socket| async move {
            let first = read_request(&mut socket).await;
            let second = read_request(&mut socket).await;
            write_json(&mut socket, json!({"id": second["id"], "result": {"which": second["method"]}}))
                .await;
            write_json(&mut socket, json!({"id": first["id"], "result": {"which": first["method"]}}))
                .await;
            let _ = socket.next().await;
        })
        .await;
        let transport = connect(&endpoint).await;

        let (a, b) = tokio::join!(transport.send("A.one", None), transport.send("B.two", None));
        assert_eq!(a.unwrap()["which"], "A.one");
        assert_eq!(b.unwrap()["which"], "B.two");
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_response_becomes_protocol_error() {
        let endpoint = spawn_server(|mut socket| async move {
            let request = read_request(&mut socket).await;
            write_json(
                &mut socket,
                json!({"id": request["id"], "error": {"code": -32000, "message": "nope"}}),
            )
            .await;
            let _ = socket.next().await;
        })
        .await;
        let transport = connect(&endpoint).await;

        match transport.send("Debugger.setBreakpointByUrl", Some(json!({}))).await {
            Err(TransportError::Protocol { method, code, message }) => {
                assert_eq!(method, "Debugger.setBreakpointByUrl");
                assert_eq!(code, -32000);
                assert_eq!(message, "nope");
            }
            other => panic!("Expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_one_shot_subscription_fires_once_and_deregisters() {
        let endpoint = spawn_server(|mut socket| async move {
            let request = read_request(&mut socket).await;
            write_json(&mut socket, json!({"method": "Debugger.paused", "params": {"n": 1}})).await;
            write_json(&mut socket, json!({"method": "Debugger.paused", "params": {"n": 2}})).await;
            write_json(&mut socket, json!({"id": request["id"], "result": {}})).await;
            let _ = socket.next().await;
        })
        .await;
        let transport = connect(&endpoint).await;

        let mut paused = transport.wait_for_method("Debugger.paused");
        assert_eq!(transport.subscription_count(), 1);
        transport.send("Test.emit", None).await.unwrap();

        let message = paused.recv().await.unwrap();
        assert_eq!(message.as_notification().unwrap().params["n"], 1);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_response_satisfies_request_and_predicate() {
        let endpoint = spawn_server(|mut socket| async move {
            let request = read_request(&mut socket).await;
            write_json(&mut socket, json!({"id": request["id"], "result": {"ok": true}})).await;
            let _ = socket.next().await;
        })
        .await;
        let transport = connect(&endpoint).await;

        let mut observer = transport.subscribe(|message| message.id() == Some(1));
        let result = transport.send("Runtime.enable", None).await.unwrap();
        assert_eq!(result["ok"], true);
        let observed = observer.recv().await.unwrap();
        assert_eq!(observed.id(), Some(1));
    }

    #[tokio::test]
    async fn test_dropping_waiter_removes_subscription() {
        let endpoint = spawn_server(|mut socket| async move {
            let _ = socket.next().await;
        })
        .await;
        let transport = connect(&endpoint).await;

        let waiter = transport.wait_for_method("Runtime.executionContextDestroyed");
        let other = transport.wait_for_method("Debugger.paused");
        assert_eq!(transport.subscription_count(), 2);
        drop(waiter);
        assert_eq!(transport.subscription_count(), 1);
        drop(other);
        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_persistent_handlers_all_observe_and_can_be_removed() {
        let endpoint = spawn_server(|mut socket| async move {
            let request = read_request(&mut socket).await;
            for n in 0..3 {
                write_json(&mut socket, json!({"method": "Debugger.scriptParsed", "params": {"n": n}}))
                    .await;
            }
            write_json(&mut socket, json!({"id": request["id"], "result": {}})).await;
            let _ = socket.next().await;
        })
        .await;
        let transport = connect(&endpoint).await;

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&first);
        let first_id = transport.on("Debugger.scriptParsed", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second);
        transport.on("Debugger.scriptParsed", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        transport.send("Debugger.enable", None).await.unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 3);
        assert!(transport.off(first_id));
        assert!(!transport.off(first_id));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_reported_and_ignored() {
        let endpoint = spawn_server(|mut socket| async move {
            let request = read_request(&mut socket).await;
            socket.send(Message::Text("{not json".to_string().into())).await.unwrap();
            write_json(&mut socket, json!({"params": {}})).await;
            write_json(&mut socket, json!({"id": request["id"], "result": {"still": "alive"}})).await;
            let _ = socket.next().await;
        })
        .await;
        let transport = connect(&endpoint).await;

        let malformed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&malformed);
        transport.on_malformed(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = transport.send("Runtime.evaluate", None).await.unwrap();
        assert_eq!(result["still"], "alive");
        assert_eq!(malformed.load(Ordering::SeqCst), 2);
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn test_connection_close_fails_pending_requests_and_waiters() {
        let endpoint = spawn_server(|mut socket| async move {
            let _ = read_request(&mut socket).await;
            let _ = socket.close(None).await;
        })
        .await;
        let transport = connect(&endpoint).await;

        let mut paused = transport.wait_for_method("Debugger.paused");
        let result = transport.send("Debugger.resume", None).await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert!(matches!(paused.recv().await, Err(TransportError::ConnectionClosed)));

        transport.closed().await;
        assert!(transport.is_closed());
        assert!(matches!(
            transport.send("Debugger.resume", None).await,
            Err(TransportError::ConnectionClosed)
        ));
        let mut late = transport.wait_for_method("Debugger.paused");
        assert!(matches!(late.recv().await, Err(TransportError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let endpoint = spawn_server(|mut socket| async move {
            let _ = read_request(&mut socket).await;
            let _ = socket.next().await;
        })
        .await;
        vtrace_common::logging::ensure_test_logging(None);
        let transport = Transport::connect(
            &endpoint,
            TransportConfig { request_timeout: Some(Duration::from_millis(100)) },
        )
        .await
        .unwrap();

        match transport.send("Debugger.enable", None).await {
            Err(TransportError::Timeout { method, id, .. }) => {
                assert_eq!(method, "Debugger.enable");
                assert_eq!(id, 1);
            }
            other => panic!("Expected timeout, got {other:?}"),
        }
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_typed_request_decodes_result() {
        let endpoint = spawn_server(|mut socket| async move {
            let request = read_request(&mut socket).await;
            assert_eq!(request["params"]["lineNumber"], 4);
            write_json(
                &mut socket,
                json!({"id": request["id"], "result": {"breakpointId": "bp-1", "locations": []}}),
            )
            .await;
            let _ = socket.next().await;
        })
        .await;
        let transport = connect(&endpoint).await;

        let result: crate::protocol::cdp::SetBreakpointByUrlResult = transport
            .send_typed(
                "Debugger.setBreakpointByUrl",
                &crate::protocol::cdp::SetBreakpointByUrlParams {
                    line_number: 4,
                    url: "file:///tmp/a.js".into(),
                    column_number: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.breakpoint_id, "bp-1");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let endpoint = spawn_server(|mut socket| async move {
            while let Some(Ok(_)) = socket.next().await {}
        })
        .await;
        let transport = connect(&endpoint).await;
        transport.close().await;
        assert!(transport.is_closed());
        transport.close().await;
    }
}
