//! [`ConnectionEngine`] — the single-threaded actor that owns one
//! [`ConnectionState`] exclusively and drives it through its full
//! lifecycle: dial, upgrade, framed messaging, reconnection.
//!
//! One `tokio::spawn`ed task runs [`ConnectionEngine::run`]; every other
//! piece of the crate (and the façade crate) talks to it only through an
//! [`EngineHandle`], which is cheap to clone and communicates over an
//! `mpsc` channel. No lock is ever taken on `ConnectionState` from outside
//! this task — that exclusivity is what lets the stale-event filter below
//! be correct without synchronization.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use http::HeaderMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use wsconn_core::{
    ConfigOptions, ConnectionHandler, ConnectionState, DisconnectOutcome, EngineEvent, ErrorValue,
    Frame, Handle, HandlerBindings, HandlerOutcome, MonitorToken, RateLimiter, RateLimiterConfig,
    RequestCorrelator, RequestCost, StateMachine, Status, StreamKind, StreamRef, SubscriberHandle,
    TransitionContext, TransportKind,
};
use wsconn_transport::{TransportDriver, TransportEvent, TransportOpts};

use crate::error::{EngineError, EngineResult, ReconnectExhausted};
use crate::reconnect::{PolicyOutcome, ReconnectionPolicy};

/// A command sent to a running [`ConnectionEngine`]. Variants prefixed with
/// an underscore-free doc note "(internal)" are never constructed outside
/// this module; they exist on the same enum so the engine can select over
/// one channel instead of two.
pub enum EngineCommand {
    Upgrade {
        path: String,
        headers: HeaderMap,
        reply: oneshot::Sender<EngineResult<StreamRef>>,
    },
    SendFrame {
        stream: StreamRef,
        frame: Frame,
        cost: RequestCost,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Close,
    TransferOwnership {
        new_owner: SubscriberHandle,
        reply: oneshot::Sender<EngineResult<HandleSnapshot>>,
    },
    /// Counterpart to `TransferOwnership`: adopts a handle and state bundle
    /// handed over by another engine's `TransferOwnership` call, claiming
    /// the handle with the driver instead of dialing it fresh.
    ReceiveOwnership {
        handle: Handle,
        state: ConnectionStateSnapshot,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    /// Test-only: force a status without going through the state machine's
    /// normal triggers, to set up scenarios.
    SetStatus(Status),
    GetState {
        reply: oneshot::Sender<ConnectionStateSnapshot>,
    },
    RegisterCallback {
        subscriber: SubscriberHandle,
        reply: oneshot::Sender<u64>,
    },
    UnregisterCallback(u64),
    /// Reserves the next correlator request id.
    NextRequestId {
        reply: oneshot::Sender<u64>,
    },
    /// Awaits a correlated reply for `request_id`, optionally with a custom
    /// matcher. Lives on the engine only because the correlator itself
    /// does; the wait itself happens on the caller's task via the returned
    /// oneshot-backed future, not by blocking the engine loop.
    Correlator {
        reply: oneshot::Sender<RequestCorrelator>,
    },
    /// (internal) fired by the reconnect timer.
    ReconnectNow { attempt: u32 },
    /// (internal) fired on every `process_interval` to drain the rate
    /// limiter's queue.
    RateLimiterTick,
}

/// A frozen snapshot of transport-only state, handed across an ownership
/// transfer or returned by `GetState`.
#[derive(Debug, Clone)]
pub struct ConnectionStateSnapshot {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub status: Status,
    pub transport_handle: Option<Handle>,
    pub active_streams: Vec<(StreamRef, StreamKind)>,
    pub last_error: Option<ErrorValue>,
    pub reconnect_attempts: u32,
}

/// What a new owner receives after `TransferOwnership` completes.
#[derive(Debug, Clone)]
pub struct HandleSnapshot {
    pub handle: Handle,
    pub state: ConnectionStateSnapshot,
}

/// Cheaply-clonable reference to a running engine task.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub async fn upgrade(&self, path: impl Into<String>, headers: HeaderMap) -> EngineResult<StreamRef> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Upgrade {
                path: path.into(),
                headers,
                reply: tx,
            })
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)?
    }

    pub async fn send_frame(&self, stream: StreamRef, frame: Frame, cost: RequestCost) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::SendFrame {
                stream,
                frame,
                cost,
                reply: tx,
            })
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)?
    }

    pub fn close(&self) {
        let _ = self.commands.send(EngineCommand::Close);
    }

    pub async fn transfer_ownership(&self, new_owner: SubscriberHandle) -> EngineResult<HandleSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::TransferOwnership { new_owner, reply: tx })
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)?
    }

    pub async fn receive_ownership(&self, handle: Handle, state: ConnectionStateSnapshot) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::ReceiveOwnership { handle, state, reply: tx })
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)?
    }

    pub async fn get_state(&self) -> EngineResult<ConnectionStateSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::GetState { reply: tx })
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)
    }

    pub async fn register_callback(&self, subscriber: SubscriberHandle) -> EngineResult<u64> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::RegisterCallback { subscriber, reply: tx })
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)
    }

    pub fn unregister_callback(&self, id: u64) {
        let _ = self.commands.send(EngineCommand::UnregisterCallback(id));
    }

    pub async fn next_request_id(&self) -> EngineResult<u64> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::NextRequestId { reply: tx })
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)
    }

    pub async fn correlator(&self) -> EngineResult<RequestCorrelator> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Correlator { reply: tx })
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn set_status_for_test(&self, status: Status) {
        let _ = self.commands.send(EngineCommand::SetStatus(status));
    }

    /// Builds a handle around a raw command sender without spawning an
    /// engine task — used by unit tests that only exercise pure helper
    /// functions (e.g. [`crate::state_sync`]) and need a `ClientConn` to
    /// hold *something*, never actually driving the channel.
    #[cfg(any(test, feature = "test-util"))]
    pub fn for_test(commands: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { commands }
    }
}

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// The actor itself. Constructed and immediately `spawn`ed by
/// [`ConnectionEngine::spawn`]; nothing outside this module ever touches a
/// `ConnectionEngine` value directly again.
pub struct ConnectionEngine {
    state: ConnectionState,
    driver: Arc<dyn TransportDriver>,
    opts: TransportOpts,
    upgrade_headers: HeaderMap,
    correlator: RequestCorrelator,
    rate_limiter: RateLimiter,
    policy: ReconnectionPolicy,
    commands_rx: mpsc::UnboundedReceiver<EngineCommand>,
    self_tx: mpsc::UnboundedSender<EngineCommand>,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    callbacks: HashMap<u64, SubscriberHandle>,
    closing: bool,
}

impl ConnectionEngine {
    /// Builds the engine and spawns its task, returning the handle used to
    /// drive it. The initial dial happens inside the task, not here.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        transport_kind: TransportKind,
        options: ConfigOptions,
        handlers: HandlerBindings,
        driver: Arc<dyn TransportDriver>,
    ) -> EngineHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let opts = TransportOpts {
            tls: matches!(transport_kind, TransportKind::Tls),
            connect_timeout: options.timeout(),
        };
        let max_reconnect_attempts = options.get_u64("max_reconnect_attempts").map(|n| n as u32);
        let policy = ReconnectionPolicy::new(handlers.error.clone(), max_reconnect_attempts);
        let rate_limiter = RateLimiter::new(RateLimiterConfig::from_options(&options), handlers.rate_limit.clone());
        let tick_interval = rate_limiter.process_interval();

        let state = ConnectionState::new(host, port, path, transport_kind, options, handlers);

        let engine = ConnectionEngine {
            state,
            driver,
            opts,
            upgrade_headers: HeaderMap::new(),
            correlator: RequestCorrelator::new(),
            rate_limiter,
            policy,
            commands_rx,
            self_tx: commands_tx.clone(),
            transport_rx,
            transport_tx,
            callbacks: HashMap::new(),
            closing: false,
        };

        let ticker = commands_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                if ticker.send(EngineCommand::RateLimiterTick).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(engine.run());
        EngineHandle { commands: commands_tx }
    }

    async fn run(mut self) {
        self.dial().await;

        loop {
            if self.closing {
                break;
            }
            tokio::select! {
                Some(cmd) = self.commands_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }
                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport_event(event).await;
                }
                else => break,
            }
        }

        if let Some(handle) = self.state.transport_handle.clone() {
            self.driver.close(&handle).await;
        }
        info!(host = %self.state.host, "connection engine terminated");
    }

    async fn dial(&mut self) {
        self.transition(Status::Connecting, None);
        match self.driver.open(&self.state.host, self.state.port, &self.opts, self.transport_tx.clone()).await {
            Ok(handle) => {
                if let Some(old_monitor) = self.state.transport_monitor.take() {
                    old_monitor.fire();
                }
                self.state = self.state.clone().update_handle(Some(handle));
                self.state = self.state.clone().update_monitor(Some(MonitorToken::new()));
            }
            Err(err) => {
                self.fail(ErrorValue::new("connect_failed", err.to_string())).await;
            }
        }
    }

    async fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Upgrade { path, headers, reply } => {
                self.upgrade_headers = headers.clone();
                let result = self.do_upgrade(&path, headers).await;
                let _ = reply.send(result);
            }
            EngineCommand::SendFrame { stream, frame, cost, reply } => {
                let result = self.do_send(stream, frame, cost).await;
                let _ = reply.send(result);
            }
            EngineCommand::Close => {
                if let Some(handle) = self.state.transport_handle.clone() {
                    self.driver.close(&handle).await;
                }
                self.closing = true;
                return false;
            }
            EngineCommand::TransferOwnership { new_owner, reply } => {
                let result = self.do_transfer_ownership(new_owner).await;
                let _ = reply.send(result);
            }
            EngineCommand::ReceiveOwnership { handle, state, reply } => {
                let result = self.do_receive_ownership(handle, state).await;
                let _ = reply.send(result);
            }
            EngineCommand::SetStatus(status) => {
                self.transition(status, Some("test override".into()));
            }
            EngineCommand::GetState { reply } => {
                let _ = reply.send(self.snapshot());
            }
            EngineCommand::RegisterCallback { subscriber, reply } => {
                let id = NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
                self.callbacks.insert(id, subscriber);
                let _ = reply.send(id);
            }
            EngineCommand::UnregisterCallback(id) => {
                self.callbacks.remove(&id);
            }
            EngineCommand::NextRequestId { reply } => {
                let _ = reply.send(self.correlator.next_request_id());
            }
            EngineCommand::Correlator { reply } => {
                let _ = reply.send(self.correlator.clone());
            }
            EngineCommand::ReconnectNow { attempt } => {
                debug!(attempt, "reconnect timer fired");
                self.dial().await;
            }
            EngineCommand::RateLimiterTick => {
                self.rate_limiter.tick();
            }
        }
        true
    }

    fn snapshot(&self) -> ConnectionStateSnapshot {
        ConnectionStateSnapshot {
            host: self.state.host.clone(),
            port: self.state.port,
            path: self.state.path.clone(),
            status: self.state.status,
            transport_handle: self.state.transport_handle.clone(),
            active_streams: self.state.active_streams.iter().map(|(k, v)| (*k, *v)).collect(),
            last_error: self.state.last_error.clone(),
            reconnect_attempts: self.state.reconnect_attempts,
        }
    }

    async fn do_upgrade(&mut self, path: &str, headers: HeaderMap) -> EngineResult<StreamRef> {
        let handle = self.state.transport_handle.clone().ok_or(EngineError::NoHandle)?;
        let stream = self.driver.upgrade(&handle, path, headers).await?;
        self.state = self.state.clone().update_stream(stream, StreamKind::Upgrading);
        Ok(stream)
    }

    async fn do_send(&mut self, stream: StreamRef, frame: Frame, cost: RequestCost) -> EngineResult<()> {
        let handle = self.state.transport_handle.clone().ok_or(EngineError::NoHandle)?;
        let driver = Arc::clone(&self.driver);
        let handle_for_send = handle.clone();
        let outcome = self.rate_limiter.check(cost, move || {
            let driver = Arc::clone(&driver);
            let handle = handle_for_send.clone();
            let frame = frame.clone();
            tokio::spawn(async move {
                let _ = driver.send(&handle, stream, frame).await;
            });
        });
        outcome.map_err(EngineError::from)
    }

    async fn do_transfer_ownership(&mut self, new_owner: SubscriberHandle) -> EngineResult<HandleSnapshot> {
        let handle = self.state.transport_handle.clone().ok_or(EngineError::NoHandle)?;
        self.driver.set_owner(&handle, self.transport_tx.clone()).await?;
        if let Some(old_monitor) = self.state.transport_monitor.take() {
            old_monitor.fire();
        }
        self.state = self.state.clone().update_monitor(Some(MonitorToken::new()));
        let _ = new_owner.send(EngineEvent::ConnectionUp);
        Ok(HandleSnapshot {
            handle,
            state: self.snapshot(),
        })
    }

    /// Receiving-side counterpart to `do_transfer_ownership`: claims `handle`
    /// with the driver, installs a fresh monitor, and restores the
    /// transport-only fields from `state` so this engine resumes driving the
    /// handle in place of the engine it was handed from.
    async fn do_receive_ownership(&mut self, handle: Handle, state: ConnectionStateSnapshot) -> EngineResult<()> {
        self.driver.set_owner(&handle, self.transport_tx.clone()).await?;
        if let Some(old_monitor) = self.state.transport_monitor.take() {
            old_monitor.fire();
        }
        self.state = self
            .state
            .clone()
            .update_handle(Some(handle))
            .update_monitor(Some(MonitorToken::new()));
        for (stream, kind) in state.active_streams {
            self.state = self.state.clone().update_stream(stream, kind);
        }
        if state.status != self.state.status {
            self.transition(state.status, Some("ownership received".into()));
        }
        self.fanout(EngineEvent::ConnectionUp);
        Ok(())
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let event_handle = match &event {
            TransportEvent::Up { handle, .. }
            | TransportEvent::Down { handle, .. }
            | TransportEvent::Upgraded { handle, .. }
            | TransportEvent::Frame { handle, .. }
            | TransportEvent::StreamError { handle, .. }
            | TransportEvent::OwnerDown { handle } => handle.clone(),
        };
        if self.state.transport_handle.as_ref() != Some(&event_handle) {
            debug!(?event_handle, current = ?self.state.transport_handle, "ignoring stale transport event");
            return;
        }

        match event {
            TransportEvent::Up { protocol, .. } => {
                info!(protocol, "transport up");
                self.transition(Status::Connected, None);
                let path = self.state.path.clone();
                let headers = self.upgrade_headers.clone();
                if let Err(err) = self.do_upgrade(&path, headers).await {
                    self.fail(ErrorValue::new("upgrade_failed", err.to_string())).await;
                }
            }
            TransportEvent::Down { reason, .. } => {
                self.fail(ErrorValue::new("transport_down", reason)).await;
            }
            TransportEvent::Upgraded { stream, .. } => {
                self.transition(Status::WebsocketConnected, None);
                self.state = self.state.clone().update_stream(stream, StreamKind::WebSocket);
                self.on_websocket_connected(stream).await;
            }
            TransportEvent::Frame { stream, frame, .. } => {
                self.on_frame(stream, frame).await;
            }
            TransportEvent::StreamError { stream, reason, .. } => {
                warn!(?stream, reason, "stream error");
                self.fanout(EngineEvent::StreamError(stream, reason));
            }
            TransportEvent::OwnerDown { .. } => {
                self.fail(ErrorValue::new("owner_down", "previous owner task ended")).await;
            }
        }
    }

    async fn on_websocket_connected(&mut self, stream: StreamRef) {
        let was_reconnect = self.state.reconnect_attempts > 0;
        self.state = self.state.clone().reset_reconnect_attempts();

        let outcome = self
            .state
            .handlers
            .connection
            .handle_connect(stream, &self.state.options)
            .await;
        if let HandlerOutcome::Reply(frame) = outcome {
            let _ = self.do_send(stream, frame, RequestCost::Auth).await;
        }

        if was_reconnect {
            info!("reconnected, resubscribing");
            let results = self.state.handlers.subscription.resubscribe_after_reconnect().await;
            for result in results {
                if result.ok {
                    let _ = self.do_send(stream, result.frame, RequestCost::Subscription).await;
                }
            }
            self.fanout(EngineEvent::Reconnected);
        } else {
            self.fanout(EngineEvent::ConnectionUp);
        }
    }

    async fn on_frame(&mut self, stream: StreamRef, frame: Frame) {
        if let Frame::Ping | Frame::PingData(_) = &frame {
            let _ = self.do_send(stream, Frame::Pong, RequestCost::Default).await;
        }

        let mut consumed_by_correlator = false;
        if let Frame::Text(text) = &frame
            && let Ok(value) = serde_json::from_str::<Value>(text)
        {
            consumed_by_correlator = self.correlator.dispatch(&value);
        }

        if !consumed_by_correlator {
            let _ = self.state.handlers.message.handle_message(&frame).await;
            self.fanout(EngineEvent::Frame(stream, frame));
        }
    }

    async fn fail(&mut self, error: ErrorValue) {
        self.state = self.state.clone().record_error(error.clone()).clear_all_streams();
        self.transition(Status::Disconnected, Some(error.reason.clone()));
        self.policy.log_error(&error);

        let disconnect_outcome = self.state.handlers.connection.handle_disconnect(&error).await;
        if matches!(disconnect_outcome, DisconnectOutcome::Ok) {
            self.transition(Status::Error, Some("handler declined reconnect".into()));
            self.fanout(EngineEvent::ConnectionDown(error));
            return;
        }

        match self.policy.decide(&error, self.state.reconnect_attempts) {
            PolicyOutcome::GiveUp => {
                self.transition(Status::Error, Some(error.reason.clone()));
                self.fanout(EngineEvent::ConnectionDown(error));
            }
            PolicyOutcome::Exhausted { attempts } => {
                self.transition(Status::Error, Some("reconnect attempts exhausted".into()));
                let exhausted = ReconnectExhausted { attempts };
                self.fanout(EngineEvent::ConnectionDown(ErrorValue::new(
                    "reconnect_exhausted",
                    exhausted.to_string(),
                )));
            }
            PolicyOutcome::Retry { delay, attempt } => {
                self.state = self.state.clone().increment_reconnect_attempts();
                self.transition(Status::Reconnecting, Some(error.reason.clone()));
                self.fanout(EngineEvent::ConnectionDown(error));

                let self_tx = self.self_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = self_tx.send(EngineCommand::ReconnectNow { attempt });
                });
            }
        }
    }

    fn transition(&mut self, target: Status, reason: Option<String>) {
        let from = self.state.status;
        let ctx = TransitionContext { reason };
        match StateMachine::transition_to(from, target, &ctx) {
            Ok(new_status) => {
                self.state = self.state.clone().update_status(new_status);
            }
            Err(err) => {
                warn!(%err, "invalid state transition rejected");
            }
        }
    }

    fn fanout(&self, event: EngineEvent) {
        for subscriber in self.callbacks.values() {
            let _ = subscriber.send(event.clone());
        }
        if let Some(subscriber) = &self.state.callback_subscriber {
            let _ = subscriber.send(event.clone());
        }
    }
}
