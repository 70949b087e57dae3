//! Connection handlers for the chat server.
//!
//! Each WebSocket connection runs in its own task. The task decodes request
//! frames, drives them into the [`Hub`], and forwards the events of the
//! session it joined (if any) back to the socket.
//!
//! Connection tasks are tracked so shutdown can wait for them: the hub is
//! shut down first, letting joined connections flush their feeds, then the
//! cancellation token ends the rest.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use chitchat_core::{Event, Hub, PublishAck, Subscription};
use chitchat_protocol::{codes, EventKind, Frame, FrameCodec, Version};
use chitchat_transport::ConnectionId;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

type WsSender = SplitSink<WebSocket, Message>;

/// Shared server state.
pub struct AppState {
    /// The session lifecycle controller.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    /// Frame codec sized from the limits section.
    pub codec: FrameCodec,
    connections: AtomicUsize,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Hub::with_config(config.hub_config()),
            codec: FrameCodec::with_max_frame_size(config.limits.max_frame_size),
            config,
            connections: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Shut the hub down and wait up to `timeout` for every connection task.
    ///
    /// Returns `false` if tasks were still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.hub.shutdown();
        self.shutdown.cancel();
        self.tasks.close();
        tokio::time::timeout(timeout, self.tasks.wait())
            .await
            .is_ok()
    }
}

/// Reserved connection slot, released on drop.
struct ConnectionSlot(Arc<AppState>);

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(state)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or fails while serving.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not listen on {}", addr))?;

    info!("ChitChat server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let served = axum::serve(listener, app(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Upgraded sockets outlive `serve`.
    if !state.drain(config.shutdown_timeout()).await {
        warn!(
            remaining = state.tasks.len(),
            "Connections still open after shutdown timeout"
        );
    }
    metrics::set_hub_stats(state.hub.stats());

    served.context("Server failed")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("Shutdown signal received, stopping...");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": chitchat_protocol::PROTOCOL_VERSION.to_string(),
        "clock": stats.clock,
        "sessions": stats.sessions,
        "connections": state.connection_count(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!("Connection limit reached, rejecting upgrade");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let tracked = state.tasks.token();
    ws.on_upgrade(move |socket| async move {
        handle_websocket(socket, state, slot).await;
        drop(tracked);
    })
}

/// Wait for the next event of the joined session; pending while not joined.
async fn next_event(feed: &mut Option<Subscription>) -> Option<Arc<Event>> {
    match feed {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut read_buffer = BytesMut::with_capacity(4096);
    let mut feed: Option<Subscription> = None;

    loop {
        tokio::select! {
            biased;

            event = next_event(&mut feed) => {
                let Some(event) = event else {
                    debug!(connection = %connection_id, "Event feed closed");
                    break;
                };
                if send_frame(&mut sender, &state.codec, &event.to_frame()).await.is_err() {
                    break;
                }
            }

            () = state.shutdown.cancelled() => {
                debug!(connection = %connection_id, "Server shutting down");
                break;
            }

            msg = receiver.next() => {
                let data = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Text(_))) => {
                        warn!(connection = %connection_id, "Text message rejected");
                        metrics::record_error("text_message");
                        let reply = Frame::error(
                            0,
                            codes::UNEXPECTED_FRAME,
                            "text messages are not supported",
                        );
                        if send_frame(&mut sender, &state.codec, &reply).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                };

                metrics::record_frame(data.len(), "inbound");
                read_buffer.extend_from_slice(&data);

                if let Err(e) = process_inbound(
                    &mut read_buffer,
                    &connection_id,
                    &state,
                    &mut feed,
                    &mut sender,
                )
                .await
                {
                    warn!(connection = %connection_id, error = %e, "Closing connection");
                    break;
                }
            }
        }
    }

    // Implicit disconnect: no LEAVE event.
    if let Some(subscription) = feed.take() {
        state
            .hub
            .disconnect(subscription.client_id(), subscription.generation());
    }
    metrics::set_hub_stats(state.hub.stats());

    let _ = sender.close().await;
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Decode and answer every complete frame in `read_buffer`.
async fn process_inbound(
    read_buffer: &mut BytesMut,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
    feed: &mut Option<Subscription>,
    sender: &mut WsSender,
) -> Result<()> {
    loop {
        let frame = match state.codec.decode_from(read_buffer) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                metrics::record_error("protocol");
                let _ = send_frame(
                    sender,
                    &state.codec,
                    &Frame::error(0, codes::UNEXPECTED_FRAME, e.to_string()),
                )
                .await;
                return Err(e.into());
            }
        };

        let start = Instant::now();
        if let Some(response) = handle_frame(&frame, connection_id, state, feed) {
            send_frame(sender, &state.codec, &response).await?;
        }
        metrics::record_latency(start.elapsed().as_secs_f64());
    }
}

/// Handle a decoded frame, returning the response to send back.
fn handle_frame(
    frame: &Frame,
    connection_id: &ConnectionId,
    state: &AppState,
    feed: &mut Option<Subscription>,
) -> Option<Frame> {
    match frame {
        Frame::Join {
            id,
            client_id,
            version,
        } => {
            debug!(connection = %connection_id, client = %client_id, "Join request");

            if let Err(reason) = Version::check_peer(*version) {
                warn!(connection = %connection_id, client = %client_id, "{}", reason);
                return Some(Frame::error(*id, codes::UNSUPPORTED_VERSION, reason));
            }

            let response = match state.hub.join(client_id) {
                Ok(subscription) => {
                    if let Some(previous) = feed.replace(subscription) {
                        state
                            .hub
                            .disconnect(previous.client_id(), previous.generation());
                    }
                    metrics::record_event(EventKind::Join);
                    Frame::ack(*id)
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Join rejected");
                    Frame::error(*id, codes::JOIN_REJECTED, e.to_string())
                }
            };
            metrics::set_hub_stats(state.hub.stats());
            Some(response)
        }

        Frame::Publish {
            id,
            client_id,
            text,
        } => {
            let response = match state.hub.publish_ack(client_id, text) {
                PublishAck { accepted: true, .. } => {
                    metrics::record_event(EventKind::Chat);
                    Frame::ack(*id)
                }
                PublishAck { error, .. } => {
                    metrics::record_rejected_publish();
                    Frame::error(*id, codes::INVALID_MESSAGE, error.unwrap_or_default())
                }
            };
            metrics::set_hub_stats(state.hub.stats());
            Some(response)
        }

        Frame::Leave { id, client_id } => {
            state.hub.leave(client_id);
            metrics::record_event(EventKind::Leave);
            metrics::set_hub_stats(state.hub.stats());
            Some(Frame::ack(*id))
        }

        Frame::Ping { timestamp } => Some(Frame::pong(*timestamp)),

        Frame::Pong { .. } => None,

        Frame::Event { .. } | Frame::Ack { .. } | Frame::Error { .. } => {
            warn!(connection = %connection_id, frame_type = ?frame.frame_type(), "Unexpected frame type");
            Some(Frame::error(
                frame.request_id().unwrap_or(0),
                codes::UNEXPECTED_FRAME,
                "frame is not a request",
            ))
        }
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut WsSender, codec: &FrameCodec, frame: &Frame) -> Result<()> {
    let data = codec.encode(frame)?;
    metrics::record_frame(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chitchat_transport::{Connection, WebSocketConnection};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_tungstenite::{tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

    const TIMEOUT: Duration = Duration::from_secs(5);

    type RawClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn state() -> AppState {
        AppState::new(Config::default())
    }

    /// Serve `app(state)` on an ephemeral port. Sending on the returned
    /// channel starts graceful shutdown.
    async fn start(
        state: Arc<AppState>,
    ) -> (String, oneshot::Sender<()>, JoinHandle<std::io::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app(state))
                .with_graceful_shutdown(async {
                    let _ = stopped.await;
                })
                .await
        });
        (url, stop, server)
    }

    async fn recv(conn: &mut WebSocketConnection) -> Frame {
        timeout(TIMEOUT, conn.recv())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed")
    }

    async fn recv_closed(conn: &mut WebSocketConnection) {
        let next = timeout(TIMEOUT, conn.recv()).await.unwrap().unwrap();
        assert_eq!(next, None);
    }

    async fn next_binary(ws: &mut RawClient) -> Vec<u8> {
        timeout(TIMEOUT, async {
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Binary(data))) => return data,
                    Some(Ok(_)) => continue,
                    other => panic!("Expected a binary message, got {:?}", other),
                }
            }
        })
        .await
        .unwrap()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_join_publish_leave_frames() {
        let state = state();
        let conn = ConnectionId::generate();
        let mut feed = None;

        let resp = handle_frame(&Frame::join(1, "alice"), &conn, &state, &mut feed);
        assert_eq!(resp, Some(Frame::ack(1)));
        assert!(feed.is_some());

        let resp = handle_frame(&Frame::publish(2, "alice", b"hi".to_vec()), &conn, &state, &mut feed);
        assert_eq!(resp, Some(Frame::ack(2)));

        let resp = handle_frame(&Frame::leave(3, "alice"), &conn, &state, &mut feed);
        assert_eq!(resp, Some(Frame::ack(3)));
        assert_eq!(state.hub.clock(), 3);

        let sub = feed.as_mut().unwrap();
        let stamps: Vec<_> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| e.to_frame())
            .collect();
        assert_eq!(
            stamps,
            vec![
                Frame::event(EventKind::Join, "alice", "alice joined the chat", 1),
                Frame::event(EventKind::Chat, "alice", "hi", 2),
            ]
        );
    }

    #[test]
    fn test_publish_rejection_is_an_error_frame() {
        let state = state();
        let conn = ConnectionId::generate();
        let mut feed = None;

        let long = "a".repeat(129);
        let resp = handle_frame(&Frame::publish(5, "alice", long.into_bytes()), &conn, &state, &mut feed);
        assert_eq!(
            resp,
            Some(Frame::error(
                5,
                codes::INVALID_MESSAGE,
                "message too long (max 128 chars)"
            ))
        );

        let resp = handle_frame(&Frame::publish(6, "alice", vec![0xc3, 0x28]), &conn, &state, &mut feed);
        assert_eq!(
            resp,
            Some(Frame::error(6, codes::INVALID_MESSAGE, "message is not valid UTF-8"))
        );
        assert_eq!(state.hub.clock(), 0);
    }

    #[test]
    fn test_join_rejections() {
        let state = state();
        let conn = ConnectionId::generate();
        let mut feed = None;

        let resp = handle_frame(&Frame::join(1, ""), &conn, &state, &mut feed);
        assert!(matches!(
            resp,
            Some(Frame::Error { id: 1, code: codes::JOIN_REJECTED, .. })
        ));

        let old = Frame::Join {
            id: 2,
            client_id: "alice".into(),
            version: Version::new(0, 1),
        };
        let resp = handle_frame(&old, &conn, &state, &mut feed);
        assert!(matches!(
            resp,
            Some(Frame::Error { id: 2, code: codes::UNSUPPORTED_VERSION, .. })
        ));
        assert!(feed.is_none());
        assert_eq!(state.hub.clock(), 0);
    }

    #[test]
    fn test_rejoin_on_same_connection_drops_previous_session() {
        let state = state();
        let conn = ConnectionId::generate();
        let mut feed = None;

        handle_frame(&Frame::join(1, "alice"), &conn, &state, &mut feed);
        handle_frame(&Frame::join(2, "alicia"), &conn, &state, &mut feed);

        assert!(!state.hub.is_joined("alice"));
        assert!(state.hub.is_joined("alicia"));
        assert_eq!(feed.as_ref().map(Subscription::client_id), Some("alicia"));
    }

    #[test]
    fn test_unexpected_and_keepalive_frames() {
        let state = state();
        let conn = ConnectionId::generate();
        let mut feed = None;

        assert_eq!(
            handle_frame(&Frame::Ping { timestamp: Some(9) }, &conn, &state, &mut feed),
            Some(Frame::pong(Some(9)))
        );
        assert_eq!(handle_frame(&Frame::pong(None), &conn, &state, &mut feed), None);
        assert!(matches!(
            handle_frame(&Frame::ack(4), &conn, &state, &mut feed),
            Some(Frame::Error { id: 4, code: codes::UNEXPECTED_FRAME, .. })
        ));
    }

    #[test]
    fn test_connection_slots() {
        let mut config = Config::default();
        config.limits.max_connections = 1;
        let state = Arc::new(AppState::new(config));

        let first = ConnectionSlot::acquire(&state);
        assert!(first.is_some());
        assert!(ConnectionSlot::acquire(&state).is_none());
        assert_eq!(state.connection_count(), 1);

        drop(first);
        assert_eq!(state.connection_count(), 0);
        assert!(ConnectionSlot::acquire(&state).is_some());
    }

    #[tokio::test]
    async fn test_socket_session_lifecycle() {
        let state = Arc::new(state());
        let (url, _stop, _server) = start(Arc::clone(&state)).await;

        let mut alice = WebSocketConnection::connect(&url).await.unwrap();
        let mut bob = WebSocketConnection::connect(&url).await.unwrap();

        alice.send(Frame::join(1, "alice")).await.unwrap();
        assert_eq!(recv(&mut alice).await, Frame::ack(1));
        assert_eq!(
            recv(&mut alice).await,
            Frame::event(EventKind::Join, "alice", "alice joined the chat", 1)
        );

        bob.send(Frame::join(1, "bob")).await.unwrap();
        assert_eq!(recv(&mut bob).await, Frame::ack(1));
        let bob_joined = Frame::event(EventKind::Join, "bob", "bob joined the chat", 2);
        assert_eq!(recv(&mut bob).await, bob_joined);
        assert_eq!(recv(&mut alice).await, bob_joined);

        // Invalid UTF-8 is a rejected request, not a transport fault.
        alice
            .send(Frame::publish(2, "alice", vec![0xc3, 0x28]))
            .await
            .unwrap();
        assert_eq!(
            recv(&mut alice).await,
            Frame::error(2, codes::INVALID_MESSAGE, "message is not valid UTF-8")
        );
        assert_eq!(state.hub.clock(), 2);

        // Implicit disconnect: no LEAVE, no tick.
        bob.close().await.unwrap();
        eventually(|| !state.hub.is_joined("bob")).await;
        assert_eq!(state.hub.session_count(), 1);
        assert_eq!(state.hub.clock(), 2);

        alice
            .send(Frame::publish(3, "alice", b"hi".to_vec()))
            .await
            .unwrap();
        assert_eq!(recv(&mut alice).await, Frame::ack(3));
        assert_eq!(
            recv(&mut alice).await,
            Frame::event(EventKind::Chat, "alice", "hi", 3)
        );

        alice.send(Frame::leave(4, "alice")).await.unwrap();
        assert_eq!(recv(&mut alice).await, Frame::ack(4));
        recv_closed(&mut alice).await;
        assert_eq!(state.hub.clock(), 4);
        assert_eq!(state.hub.session_count(), 0);
        eventually(|| state.connection_count() == 0).await;
    }

    #[tokio::test]
    async fn test_text_and_undecodable_messages() {
        let state = Arc::new(state());
        let (url, _stop, _server) = start(Arc::clone(&state)).await;
        let codec = FrameCodec::new();

        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        ws.send(WsMessage::Text("hello".into())).await.unwrap();
        let reply = codec.decode(&next_binary(&mut ws).await).unwrap();
        assert!(matches!(
            reply,
            Frame::Error { id: 0, code: codes::UNEXPECTED_FRAME, .. }
        ));

        // Still open after a text message.
        let ping = codec.encode(&Frame::Ping { timestamp: Some(7) }).unwrap();
        ws.send(WsMessage::Binary(ping.to_vec())).await.unwrap();
        assert_eq!(
            codec.decode(&next_binary(&mut ws).await).unwrap(),
            Frame::pong(Some(7))
        );

        // Length prefix past the frame limit.
        ws.send(WsMessage::Binary(vec![0xff, 0xff, 0xff, 0xff, 0x00]))
            .await
            .unwrap();
        let reply = codec.decode(&next_binary(&mut ws).await).unwrap();
        assert!(matches!(
            reply,
            Frame::Error { code: codes::UNEXPECTED_FRAME, .. }
        ));

        let closed = timeout(TIMEOUT, async {
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok());
        eventually(|| state.connection_count() == 0).await;
        assert_eq!(state.hub.clock(), 0);
    }

    #[tokio::test]
    async fn test_drain_ends_connection_tasks() {
        let state = Arc::new(state());
        let (url, stop, server) = start(Arc::clone(&state)).await;

        let mut joined = WebSocketConnection::connect(&url).await.unwrap();
        let mut idle = WebSocketConnection::connect(&url).await.unwrap();

        joined.send(Frame::join(1, "alice")).await.unwrap();
        assert_eq!(recv(&mut joined).await, Frame::ack(1));
        eventually(|| state.connection_count() == 2).await;

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();

        assert!(state.drain(TIMEOUT).await);
        assert!(state.tasks.is_empty());
        assert_eq!(state.connection_count(), 0);
        assert_eq!(state.hub.session_count(), 0);

        assert_eq!(
            recv(&mut joined).await,
            Frame::event(EventKind::Join, "alice", "alice joined the chat", 1)
        );
        recv_closed(&mut joined).await;
        recv_closed(&mut idle).await;
    }
}
