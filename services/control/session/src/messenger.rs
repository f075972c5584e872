//! Control messenger: request correlation, session identity, keep-alive,
//! and update dispatch over a [`Communication`] channel.
//!
//! Requests are registered under a random transaction id before they are
//! sent; [`Inner::message_handler`] routes each incoming packet to the
//! pending request it answers or to the handler registered for its update
//! path. A periodic keep-alive request detects a silently dead connection
//! and stops the transport after [`KEEP_ALIVE_FAILURE_THRESHOLD`]
//! consecutive failures.

use crate::error::ControlError;
use crate::keepalive::{KeepAliveCounter, KEEP_ALIVE_FAILURE_THRESHOLD};
use crate::registry::{Completion, ContextGuard, PendingResponse, RequestContextRegistry};
use crate::runner::AsyncRequestRunner;
use crate::timer::{TimerCallback, TimerHandle, TimerManager, TokioTimerManager};
use crate::transport::{Communication, TcpCommunication};
use crate::updates::{UpdateDispatch, UpdateHandlerRegistry};
use bytes::Bytes;
use control_wire::control::{
    AbortRecordingTake, EmptyResponse, GetServerInformation, GetState, GetTakeList,
    GetTakeMetadata, KeepAlive, ServerInfoResponse, StartRecordingTake, StartSession,
    StateResponse, StopRecordingTake, StopSession, Subscribe, TakeMetadata, Unsubscribe,
};
use control_wire::{
    decode_body, decode_message, encode_message, ControlMessage, ControlRequest, ControlUpdate,
    MessageType, StatusCode, DEFAULT_MAX_PACKET_SIZE,
};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Session id value meaning no session has been established
pub const NO_SESSION_ID: &str = "";

/// Reason passed to disconnect handlers when the connection ends
pub const DISCONNECT_REASON: &str = "Connection to the control server was lost";

/// Callback invoked with a human-readable reason when the connection ends
pub type DisconnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration for a control messenger
#[derive(Clone, Debug)]
pub struct MessengerConfig {
    /// Interval between keep-alive requests
    pub keep_alive_interval: Duration,
    /// Delay before the first keep-alive after a session starts
    pub keep_alive_initial_delay: Duration,
    /// Upper bound on waiting for a response; `None` waits until disconnect
    pub request_timeout: Option<Duration>,
    /// Largest packet accepted or produced
    pub max_packet_size: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(5),
            keep_alive_initial_delay: Duration::from_secs(5),
            request_timeout: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

struct Inner {
    config: MessengerConfig,
    span: Span,
    communication: Arc<dyn Communication>,
    timers: Arc<dyn TimerManager>,
    contexts: RequestContextRegistry,
    updates: UpdateHandlerRegistry,
    runner: AsyncRequestRunner,
    keep_alive: KeepAliveCounter,
    keep_alive_timer: Mutex<Option<TimerHandle>>,
    session_id: RwLock<String>,
    disconnect_handlers: RwLock<Vec<DisconnectCallback>>,
}

/// Client side of the control protocol.
///
/// Cloning is cheap; all clones share one connection and session.
#[derive(Clone)]
pub struct ControlMessenger {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ControlMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlMessenger")
            .field("config", &self.inner.config)
            .field("running", &self.inner.communication.is_running())
            .field("session_id", &self.session_id())
            .field("pending_requests", &self.inner.contexts.len())
            .finish()
    }
}

impl ControlMessenger {
    /// Create a messenger over the given transport and timer facility
    pub fn new(
        config: MessengerConfig,
        communication: Arc<dyn Communication>,
        timers: Arc<dyn TimerManager>,
    ) -> Result<Self, ControlError> {
        Self::with_span(config, communication, timers, info_span!("control_messenger"))
    }

    /// Create a messenger whose log events are recorded inside `span`
    pub fn with_span(
        config: MessengerConfig,
        communication: Arc<dyn Communication>,
        timers: Arc<dyn TimerManager>,
        span: Span,
    ) -> Result<Self, ControlError> {
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                span,
                communication,
                timers,
                contexts: RequestContextRegistry::new(),
                updates: UpdateHandlerRegistry::new(),
                runner: AsyncRequestRunner::new()?,
                keep_alive: KeepAliveCounter::new(),
                keep_alive_timer: Mutex::new(None),
                session_id: RwLock::new(NO_SESSION_ID.to_string()),
                disconnect_handlers: RwLock::new(Vec::new()),
            }),
        })
    }

    /// Create a messenger over TCP with tokio timers
    pub fn tcp(config: MessengerConfig) -> Result<Self, ControlError> {
        let communication = Arc::new(TcpCommunication::with_max_packet_size(config.max_packet_size));
        Self::new(config, communication, Arc::new(TokioTimerManager::new()))
    }

    /// Connect to the control server; a no-op if already connected
    pub async fn start(&self, server_address: &str, server_port: u16) -> Result<(), ControlError> {
        let communication = &self.inner.communication;
        if communication.is_running() {
            debug!("Messenger already running");
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        communication.set_receive_handler(Arc::new(move |packet| {
            if let Some(inner) = weak.upgrade() {
                inner.message_handler(packet);
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        communication.set_disconnect_handler(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_disconnect();
            }
        }));

        communication
            .start(server_address, server_port)
            .instrument(self.inner.span.clone())
            .await?;
        info!("Messenger started for {}:{}", server_address, server_port);
        Ok(())
    }

    /// Close the connection; a no-op if not connected
    pub fn stop(&self) {
        if self.inner.communication.is_running() {
            info!("Stopping messenger");
            self.inner.communication.stop();
        }
    }

    /// Whether the transport is connected
    pub fn is_running(&self) -> bool {
        self.inner.communication.is_running()
    }

    /// Establish a session and (re)start the keep-alive heartbeat when the
    /// session id changes
    pub async fn start_session(&self) -> Result<(), ControlError> {
        let response = self.send_request(StartSession {}).await?;

        {
            let mut current = self.inner.session_id.write();
            if *current == response.session_id {
                debug!("Session {} unchanged", response.session_id);
                return Ok(());
            }
            current.clone_from(&response.session_id);
        }

        // The heartbeat is restarted without the session lock held
        Inner::restart_keep_alive(&self.inner);
        info!("Session established: {}", response.session_id);
        Ok(())
    }

    /// End the current session and its heartbeat
    pub async fn stop_session(&self) -> Result<(), ControlError> {
        self.send_request(StopSession {}).await?;
        self.inner.stop_keep_alive();
        *self.inner.session_id.write() = NO_SESSION_ID.to_string();
        info!("Session stopped");
        Ok(())
    }

    /// Current session id, if a session is established
    pub fn session_id(&self) -> Option<String> {
        self.inner.current_session_id()
    }

    /// Consecutive keep-alive failures not yet cleared
    pub fn keep_alive_failures(&self) -> u32 {
        self.inner.keep_alive.value()
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.inner.contexts.len()
    }

    /// Route updates on `address_path` to `handler`, replacing any previous
    /// handler for that path
    pub fn register_update_handler<F>(&self, address_path: &str, handler: F)
    where
        F: Fn(ControlUpdate) + Send + Sync + 'static,
    {
        self.inner.updates.register(address_path, Arc::new(handler));
    }

    /// Stop routing updates on `address_path`
    pub fn unregister_update_handler(&self, address_path: &str) -> bool {
        self.inner.updates.unregister(address_path)
    }

    /// Add a callback run once per disconnection
    pub fn register_disconnect_handler<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.disconnect_handlers.write().push(Arc::new(handler));
    }

    /// Send `request` and wait for its response
    pub async fn send_request<R: ControlRequest>(&self, request: R) -> Result<R::Response, ControlError> {
        let body = serialize_request(&request)?;
        let response = self
            .inner
            .round_trip(R::ADDRESS_PATH, body)
            .instrument(self.inner.span.clone())
            .await?;
        decode_response(R::ADDRESS_PATH, response)
    }

    /// Send `request` without waiting; `on_complete` runs later on the async
    /// request runner with the outcome
    pub fn send_async_request<R, F>(&self, request: R, on_complete: F)
    where
        R: ControlRequest,
        F: FnOnce(Result<R::Response, ControlError>) + Send + 'static,
    {
        let body = match serialize_request(&request) {
            Ok(body) => body,
            Err(e) => {
                self.inner.runner.enqueue(move || on_complete(Err(e)));
                return;
            }
        };

        let inner = Arc::clone(&self.inner);
        let span = self.inner.span.clone();
        self.inner.runner.run_when_ready(
            async move { inner.round_trip(R::ADDRESS_PATH, body).await }.instrument(span),
            move |outcome| {
                on_complete(outcome.and_then(|response| decode_response(R::ADDRESS_PATH, response)))
            },
        );
    }

    /// Server identity and software versions
    pub async fn get_server_information(&self) -> Result<ServerInfoResponse, ControlError> {
        self.send_request(GetServerInformation {}).await
    }

    /// Start receiving update messages
    pub async fn subscribe(&self) -> Result<(), ControlError> {
        self.send_request(Subscribe {}).await.map(drop_empty)
    }

    /// Stop receiving update messages
    pub async fn unsubscribe(&self) -> Result<(), ControlError> {
        self.send_request(Unsubscribe {}).await.map(drop_empty)
    }

    /// Current device state
    pub async fn get_state(&self) -> Result<StateResponse, ControlError> {
        self.send_request(GetState {}).await
    }

    /// Begin recording a take
    pub async fn start_recording_take(
        &self,
        slate_name: &str,
        take_number: u32,
        description: Option<String>,
    ) -> Result<(), ControlError> {
        self.send_request(StartRecordingTake {
            slate_name: slate_name.to_string(),
            take_number,
            description,
        })
        .await
        .map(drop_empty)
    }

    /// Finish recording; returns the stored take name
    pub async fn stop_recording_take(&self) -> Result<String, ControlError> {
        self.send_request(StopRecordingTake {})
            .await
            .map(|response| response.take_name)
    }

    /// Discard the take being recorded
    pub async fn abort_recording_take(&self) -> Result<(), ControlError> {
        self.send_request(AbortRecordingTake {}).await.map(drop_empty)
    }

    /// Names of the takes stored on the device
    pub async fn get_take_list(&self) -> Result<Vec<String>, ControlError> {
        self.send_request(GetTakeList {})
            .await
            .map(|response| response.names)
    }

    /// Metadata for the named takes
    pub async fn get_take_metadata(&self, names: Vec<String>) -> Result<Vec<TakeMetadata>, ControlError> {
        self.send_request(GetTakeMetadata { names })
            .await
            .map(|response| response.takes)
    }
}

impl Inner {
    fn current_session_id(&self) -> Option<String> {
        let session_id = self.session_id.read();
        if *session_id == NO_SESSION_ID {
            None
        } else {
            Some(session_id.clone())
        }
    }

    /// Register, serialize, and send a request. The returned guard retires
    /// the context if the caller stops waiting before the response arrives.
    async fn dispatch_request(
        &self,
        address_path: &str,
        body: Bytes,
    ) -> Result<(ContextGuard<'_>, PendingResponse), ControlError> {
        if !self.communication.is_running() {
            return Err(ControlError::NotRunning);
        }

        let request = ControlMessage::request(address_path, 0, body)
            .with_session_id(self.current_session_id());
        let (outgoing, pending) = self.contexts.register(&request);
        let guard = self.contexts.guard(outgoing.transaction_id);

        let packet = encode_message(&outgoing, self.config.max_packet_size)?;
        self.communication.send_message(packet).await?;

        debug!("Sent request {} ({})", address_path, guard.transaction_id());
        Ok((guard, pending))
    }

    async fn round_trip(&self, address_path: &str, body: Bytes) -> Result<ControlMessage, ControlError> {
        let (guard, pending) = self.dispatch_request(address_path, body).await?;

        let outcome = match self.config.request_timeout {
            None => pending.await,
            Some(timeout) => match tokio::time::timeout(timeout, pending).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        "Request {} ({}) timed out after {:?}",
                        address_path,
                        guard.transaction_id(),
                        timeout
                    );
                    return Err(ControlError::Timeout {
                        path: address_path.to_string(),
                    });
                }
            },
        };

        // The context left the registry when the response or the disconnect
        // resolved the slot
        guard.disarm();

        // A closed slot means the registry was cleared by a disconnect
        outcome.map_err(|_| ControlError::Disconnected)
    }

    /// Route one raw packet from the transport. Never fails: problems are
    /// logged and the packet dropped.
    fn message_handler(&self, packet: Bytes) {
        let _entered = self.span.enter();
        let message = match decode_message(packet) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed packet: {}", e);
                return;
            }
        };

        match message.message_type {
            MessageType::Request => {
                error!(
                    "Dropping request {} ({}): inbound requests are not supported",
                    message.address_path, message.transaction_id
                );
            }
            MessageType::Response => {
                let transaction_id = message.transaction_id;
                let address_path = message.address_path.clone();
                match self.contexts.complete(message) {
                    Completion::Fulfilled => {}
                    Completion::Unknown => {
                        debug!("Ignoring response {} ({}) with no pending request", address_path, transaction_id);
                    }
                    Completion::Abandoned => {
                        debug!("Response {} ({}) arrived after its caller gave up", address_path, transaction_id);
                    }
                    Completion::AddressMismatch { expected } => {
                        warn!(
                            "Response {} does not match request {} for transaction {}",
                            address_path, expected, transaction_id
                        );
                    }
                }
            }
            MessageType::Update => match self.updates.dispatch(&message) {
                UpdateDispatch::Delivered => debug!("Delivered update {}", message.address_path),
                UpdateDispatch::NoHandler => {}
                UpdateDispatch::Invalid(e) => warn!("Dropping update: {}", e),
            },
        }
    }

    fn restart_keep_alive(this: &Arc<Self>) {
        let mut timer = this.keep_alive_timer.lock();
        if let Some(handle) = timer.take() {
            this.timers.remove_timer(handle);
        }
        this.keep_alive.reset();

        let weak = Arc::downgrade(this);
        let callback: TimerCallback = Arc::new(move || Self::send_keep_alive(&weak));
        *timer = Some(this.timers.add_periodic_timer(
            callback,
            this.config.keep_alive_interval,
            true,
            this.config.keep_alive_initial_delay,
        ));
        debug!("Keep-alive every {:?}", this.config.keep_alive_interval);
    }

    fn stop_keep_alive(&self) {
        if let Some(handle) = self.keep_alive_timer.lock().take() {
            self.timers.remove_timer(handle);
            debug!("Keep-alive stopped");
        }
    }

    fn send_keep_alive(weak: &Weak<Self>) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let messenger = ControlMessenger { inner };
        let weak = weak.clone();
        messenger.send_async_request(KeepAlive {}, move |outcome| {
            if let Some(inner) = weak.upgrade() {
                inner.on_keep_alive_complete(outcome);
            }
        });
    }

    fn on_keep_alive_complete(&self, outcome: Result<EmptyResponse, ControlError>) {
        let _entered = self.span.enter();
        match outcome {
            Ok(_) => self.keep_alive.reset(),
            Err(e) => {
                self.keep_alive.increment();
                warn!("Keep-alive failed ({} consecutive): {}", self.keep_alive.value(), e);
                if self.keep_alive.has_reached(KEEP_ALIVE_FAILURE_THRESHOLD) {
                    error!(
                        "No keep-alive answered {} times in a row, closing connection",
                        KEEP_ALIVE_FAILURE_THRESHOLD
                    );
                    self.communication.stop();
                }
            }
        }
    }

    fn on_disconnect(&self) {
        let _entered = self.span.enter();
        self.stop_keep_alive();
        *self.session_id.write() = NO_SESSION_ID.to_string();

        let abandoned = self.contexts.clear();
        if abandoned > 0 {
            warn!("Disconnected with {} requests still pending", abandoned);
        }

        let handlers = self.disconnect_handlers.read().clone();
        for handler in handlers {
            handler(DISCONNECT_REASON);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_keep_alive();
        if self.communication.is_running() {
            self.communication.stop();
        }
    }
}

fn serialize_request<R: ControlRequest>(request: &R) -> Result<Bytes, ControlError> {
    serde_json::to_vec(request)
        .map(Bytes::from)
        .map_err(|source| ControlError::Serialize {
            path: R::ADDRESS_PATH.to_string(),
            source,
        })
}

fn decode_response<T: DeserializeOwned>(address_path: &str, response: ControlMessage) -> Result<T, ControlError> {
    if response.status != StatusCode::Ok {
        return Err(ControlError::Server {
            path: address_path.to_string(),
            code: response.status,
            message: response.error.unwrap_or_default(),
        });
    }

    decode_body(&response.body).map_err(|source| ControlError::Deserialize {
        path: address_path.to_string(),
        source,
    })
}

fn drop_empty(_: EmptyResponse) {}
