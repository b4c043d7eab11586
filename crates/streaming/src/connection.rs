// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Reconnecting WebSocket connection with atomic state transitions.
//!
//! **Key features**:
//! - Connection state tracking (DISCONNECTED/CONNECTING/CONNECTED/RECONNECTING)
//! - Bounded exponential backoff with a give-up threshold
//! - Stability detection before the retry counter resets
//! - Split read/write architecture
//!
//! **Design**:
//! - Every dial starts a new session; callbacks from older sessions are dropped
//! - Read half runs in a dedicated task and reports frames, closes, and failures
//! - Write half runs in a dedicated task fed by an unbounded channel
//! - Reconnect and stability timers run on the [`ReconnectScheduler`] and
//!   [`StabilityDetector`] respectively
//!
//! All transitions are compare-and-set operations keyed on the expected prior state:
//!
//! | From                        | To           | Trigger                                    |
//! |-----------------------------|--------------|--------------------------------------------|
//! | Disconnected                | Connecting   | `connect()`                                |
//! | Reconnecting                | Connecting   | scheduled retry fires                      |
//! | Connecting                  | Connected    | transport open                             |
//! | Connected, Connecting       | Reconnecting | close/failure, reconnect enabled, budget left |
//! | Connected, Connecting       | Disconnected | close/failure, reconnect disabled or exhausted |
//! | any                         | Disconnected | `close()`                                  |

use std::{
    fmt::Debug,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt, stream::SplitStream};
use tokio::{
    net::TcpStream,
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error, Message,
        client::IntoClientRequest,
        http::{HeaderName, HeaderValue},
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

use crate::{
    config::StreamConfig,
    consts::{CLOSE_CODE_ABNORMAL, CLOSE_CODE_NO_STATUS, CLOSE_CODE_NORMAL, CLOSE_REASON_CLIENT},
    error::{StreamError, StreamResult},
    logging::{log_task_aborted, log_task_started, log_task_stopped},
    messages::ControlMessage,
    provider::{Frame, UrlProvider},
    reconnect::{ReconnectDecision, ReconnectScheduler},
    runtime,
    stability::StabilityDetector,
    state::{AtomicConnectionState, ConnectionState},
    subscription::ControlSink,
    tls::ensure_crypto_provider,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type MessageReader = SplitStream<WsStream>;

/// Lifecycle callbacks from a [`ReconnectingConnection`].
///
/// Called from transport and timer tasks, so implementations must not block.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// The transport opened. `is_reconnect` is `false` only for the first open of the
    /// connection's lifetime.
    fn on_open(&self, sink: &dyn ControlSink, is_reconnect: bool);

    /// An application frame arrived.
    fn on_frame(&self, frame: Frame);

    /// An established connection closed or failed.
    fn on_close(&self, code: u16, reason: &str);

    /// A reconnect attempt is scheduled.
    fn on_reconnecting(&self, attempt: u32, delay: Duration);

    /// A transport error occurred, or reconnection gave up (terminal).
    fn on_error(&self, error: StreamError);
}

/// Represents a command for the writer task.
#[derive(Debug)]
enum WriterCommand {
    /// Send message to the server.
    Send(Message),
    /// Send a close frame and shut the writer down.
    Close { code: u16, reason: String },
}

#[derive(Debug, Default)]
struct SessionTasks {
    dial: Option<JoinHandle<()>>,
    read: Option<JoinHandle<()>>,
    write: Option<JoinHandle<()>>,
}

fn abort_task(handle: Option<JoinHandle<()>>, name: &str) {
    if let Some(handle) = handle
        && !handle.is_finished()
    {
        handle.abort();
        log_task_aborted(name);
    }
}

struct ConnectionShared {
    config: StreamConfig,
    url_provider: Arc<dyn UrlProvider>,
    handler: Arc<dyn ConnectionHandler>,
    state: AtomicConnectionState,
    scheduler: ReconnectScheduler,
    stability: StabilityDetector,
    auto_reconnect: AtomicBool,
    closed: AtomicBool,
    has_connected: AtomicBool,
    session: AtomicU64,
    writer_tx: Mutex<Option<UnboundedSender<WriterCommand>>>,
    tasks: Mutex<SessionTasks>,
}

impl ConnectionShared {
    fn is_current(&self, session: u64) -> bool {
        self.session.load(Ordering::SeqCst) == session
    }

    fn set_writer(&self, writer_tx: Option<UnboundedSender<WriterCommand>>) {
        *self
            .writer_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = writer_tx;
    }

    fn send_command(&self, command: WriterCommand) -> bool {
        let guard = self
            .writer_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match guard.as_ref() {
            Some(tx) => match tx.send(command) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Error sending message: {e}");
                    false
                }
            },
            None => false,
        }
    }

    fn send_message(&self, message: Message) -> bool {
        if !self.state.load().is_connected() {
            tracing::debug!("Cannot send data - connection not active");
            return false;
        }
        self.send_command(WriterCommand::Send(message))
    }

    /// Starts a new session and spawns the dial task.
    ///
    /// The caller must have moved the state to `Connecting`.
    fn dial(self: &Arc<Self>) {
        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        self.stability.disarm();
        self.set_writer(None);

        tracing::debug!("Dialing (session {session})");

        let shared = Arc::clone(self);
        let handle = runtime::spawn(async move {
            let provider = Arc::clone(&shared.url_provider);
            let url = match tokio::task::spawn_blocking(move || provider.connection_url()).await
            {
                Ok(Ok(url)) => url,
                Ok(Err(e)) => {
                    shared.handle_failure(session, StreamError::UrlProvider(e.to_string()));
                    return;
                }
                Err(e) => {
                    shared.handle_failure(session, StreamError::UrlProvider(e.to_string()));
                    return;
                }
            };

            match url::Url::parse(&url) {
                Ok(parsed) if parsed.scheme() == "wss" => {
                    ensure_crypto_provider();
                }
                Ok(_) => {}
                Err(e) => {
                    let error = StreamError::UrlProvider(format!("{url}: {e}"));
                    shared.handle_failure(session, error);
                    return;
                }
            }

            let timeout = shared.config.connect_timeout();
            match tokio::time::timeout(
                timeout,
                connect_with_server(&url, shared.config.headers.clone()),
            )
            .await
            {
                Ok(Ok(stream)) => shared.handle_open(session, stream),
                Ok(Err(e)) => shared.handle_failure(session, StreamError::from(e)),
                Err(_) => shared.handle_failure(
                    session,
                    StreamError::Transport(format!(
                        "connection timed out after {}s",
                        timeout.as_secs_f64()
                    )),
                ),
            }
        });

        let previous = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dial
            .replace(handle);
        abort_task(previous, "dial");
    }

    fn handle_open(self: &Arc<Self>, session: u64, stream: WsStream) {
        if !self.is_current(session) || self.closed.load(Ordering::SeqCst) {
            tracing::debug!("Dropping stale connection (session {session})");
            return;
        }

        let (writer, reader) = stream.split();
        let (writer_tx, writer_rx) = tokio::sync::mpsc::unbounded_channel();
        let write_task = spawn_write_task(writer, writer_rx);

        // The writer must be in place before anyone can observe `Connected`
        self.set_writer(Some(writer_tx));

        if !self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            tracing::debug!("Dropping connection opened in state {}", self.state.load());
            // Dropping the sender lets the write task close the transport
            self.set_writer(None);
            return;
        }

        let generation = self.stability.arm_on_open();
        let read_task = Self::spawn_read_task(Arc::clone(self), reader, session, generation);

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            abort_task(tasks.read.replace(read_task), "read");
            // The old writer ends once its channel sender is dropped
            tasks.write = Some(write_task);
        }

        // close() may have run between the state transition and storing the tasks
        if self.closed.load(Ordering::SeqCst) || !self.is_current(session) {
            tracing::debug!("Connection closed while opening (session {session})");
            self.shutdown_session();
            return;
        }

        let shared = Arc::clone(self);
        self.stability.start_timer(generation, move |generation| {
            let still_connected = shared.is_current(session) && shared.state.load().is_connected();
            if shared.stability.check_timeout(generation, still_connected) {
                tracing::debug!("Connection stable after {:?} window", shared.stability.window());
                shared.scheduler.reset();
            }
        });

        let is_reconnect = self.has_connected.swap(true, Ordering::SeqCst);
        tracing::info!(
            "{} (session {session})",
            if is_reconnect { "Reconnected" } else { "Connected" }
        );

        self.handler.on_open(&**self, is_reconnect);
    }

    /// Sends a normal close frame on the live transport and stops its tasks.
    fn shutdown_session(&self) {
        let writer_tx = self
            .writer_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = writer_tx {
            _ = tx.send(WriterCommand::Close {
                code: CLOSE_CODE_NORMAL,
                reason: CLOSE_REASON_CLIENT.to_string(),
            });
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        abort_task(tasks.dial.take(), "dial");
        abort_task(tasks.read.take(), "read");
        // The writer finishes on its own after the close frame
        tasks.write = None;
    }

    fn handle_frame(&self, session: u64, generation: u64, frame: Frame) {
        if !self.is_current(session) {
            return;
        }

        if self.stability.on_frame_received(generation) {
            tracing::debug!("Connection stable after first frame");
            self.scheduler.reset();
        }

        self.handler.on_frame(frame);
    }

    fn handle_failure(self: &Arc<Self>, session: u64, error: StreamError) {
        if !self.is_current(session) || self.closed.load(Ordering::SeqCst) {
            return;
        }

        tracing::warn!("Connection failure: {error}");
        let reason = error.to_string();
        self.handler.on_error(error);
        self.handle_close(session, CLOSE_CODE_ABNORMAL, &reason);
    }

    fn handle_close(self: &Arc<Self>, session: u64, code: u16, reason: &str) {
        if !self.is_current(session) {
            tracing::debug!("Ignoring close from stale session {session}");
            return;
        }

        // An idle connection closing inside the window never proves stability
        self.stability.disarm();
        self.set_writer(None);

        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let live = [ConnectionState::Connected, ConnectionState::Connecting];
        let was_connected = self.state.load().is_connected();

        if !self.auto_reconnect.load(Ordering::SeqCst) {
            if self
                .state
                .transition_any(&live, ConnectionState::Disconnected)
                .is_some()
            {
                tracing::info!("Disconnected: code={code}, reason={reason}");
                if was_connected {
                    self.handler.on_close(code, reason);
                }
            }
            return;
        }

        match self.scheduler.on_connection_lost() {
            ReconnectDecision::Retry { attempt, delay } => {
                if self
                    .state
                    .transition_any(&live, ConnectionState::Reconnecting)
                    .is_none()
                {
                    return;
                }

                tracing::warn!(
                    "Connection lost (code={code}, reason={reason}), attempt {attempt}/{} in {}s",
                    self.scheduler.max_attempts(),
                    delay.as_secs_f64()
                );

                if was_connected {
                    self.handler.on_close(code, reason);
                }
                self.handler.on_reconnecting(attempt, delay);
                self.schedule_retry(delay);
            }
            ReconnectDecision::GiveUp { attempts } => {
                if self
                    .state
                    .transition_any(&live, ConnectionState::Disconnected)
                    .is_none()
                {
                    return;
                }

                tracing::error!("Max reconnection attempts ({attempts}) exceeded, giving up");

                if was_connected {
                    self.handler.on_close(code, reason);
                }
                self.handler
                    .on_error(StreamError::ReconnectExhausted { attempts });
            }
            ReconnectDecision::Exhausted => {
                if self
                    .state
                    .transition_any(&live, ConnectionState::Disconnected)
                    .is_some()
                    && was_connected
                {
                    self.handler.on_close(code, reason);
                }
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        let shared = Arc::clone(self);
        self.scheduler.schedule(delay, async move {
            if shared.closed.load(Ordering::SeqCst) || !shared.auto_reconnect.load(Ordering::SeqCst)
            {
                tracing::debug!("Scheduled reconnect skipped, reconnection disabled");
                return;
            }

            if shared
                .state
                .transition(ConnectionState::Reconnecting, ConnectionState::Connecting)
            {
                shared.dial();
            } else {
                tracing::debug!("Scheduled reconnect skipped in state {}", shared.state.load());
            }
        });
    }

    fn spawn_read_task(
        shared: Arc<Self>,
        mut reader: MessageReader,
        session: u64,
        generation: u64,
    ) -> JoinHandle<()> {
        runtime::spawn(async move {
            log_task_started("read");

            loop {
                match reader.next().await {
                    Some(Ok(Message::Text(data))) => {
                        tracing::trace!("Received message: {data}");
                        let frame = Frame::Text(data.as_str().to_string());
                        shared.handle_frame(session, generation, frame);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::trace!("Received message <binary> {} bytes", data.len());
                        shared.handle_frame(session, generation, Frame::Binary(data));
                    }
                    Some(Ok(Message::Ping(ping))) => {
                        // Pong replies are queued by tungstenite itself
                        tracing::trace!("Received ping: {ping:?}");
                    }
                    Some(Ok(Message::Pong(_))) => {
                        tracing::trace!("Received pong");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (CLOSE_CODE_NO_STATUS, String::new()),
                            |frame| (u16::from(frame.code), frame.reason.as_str().to_string()),
                        );
                        tracing::debug!("Received close message - terminating");
                        shared.handle_close(session, code, &reason);
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::error!("Received error message - terminating: {e}");
                        shared.handle_failure(session, StreamError::from(e));
                        break;
                    }
                    // Internally tungstenite considers the connection closed when polling
                    // for the next message in the stream returns None.
                    None => {
                        tracing::debug!("No message received - terminating");
                        shared.handle_close(
                            session,
                            CLOSE_CODE_ABNORMAL,
                            "Connection closed without close frame",
                        );
                        break;
                    }
                }
            }

            log_task_stopped("read");
        })
    }
}

impl ControlSink for ConnectionShared {
    fn is_connected(&self) -> bool {
        self.state.load().is_connected()
    }

    fn send_control(&self, message: &ControlMessage) -> bool {
        match encode_control(message, self.config.control_frame_binary) {
            Ok(frame) => self.send_message(frame),
            Err(e) => {
                tracing::error!("Failed to encode control message: {e}");
                false
            }
        }
    }
}

/// Encodes a control message as UTF-8 JSON in a binary or text frame.
fn encode_control(message: &ControlMessage, binary: bool) -> StreamResult<Message> {
    let json = message.to_json()?;
    tracing::debug!("Sending control message: {json}");

    Ok(if binary {
        Message::Binary(json.into_bytes().into())
    } else {
        Message::Text(json.into())
    })
}

/// Connects with the server creating a tokio-tungstenite websocket stream.
async fn connect_with_server(url: &str, headers: Vec<(String, String)>) -> Result<WsStream, Error> {
    let mut request = url.into_client_request()?;
    let req_headers = request.headers_mut();

    for (key, val) in headers {
        let header_value = HeaderValue::from_str(&val)?;
        let header_name: HeaderName = key.parse()?;
        req_headers.insert(header_name, header_value);
    }

    connect_async(request).await.map(|(stream, _response)| stream)
}

fn spawn_write_task(
    mut writer: futures_util::stream::SplitSink<WsStream, Message>,
    mut writer_rx: UnboundedReceiver<WriterCommand>,
) -> JoinHandle<()> {
    runtime::spawn(async move {
        log_task_started("write");

        while let Some(command) = writer_rx.recv().await {
            match command {
                WriterCommand::Send(msg) => {
                    if let Err(e) = writer.send(msg).await {
                        // The read task observes the broken connection and drives recovery
                        tracing::error!("Failed to send message: {e}");
                    }
                }
                WriterCommand::Close { code, reason } => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = writer.send(Message::Close(Some(frame))).await {
                        tracing::debug!("Failed to send close frame: {e}");
                    }
                    break;
                }
            }
        }

        // Attempt to close the writer gracefully before exiting,
        // we ignore any error as the writer may already be closed.
        _ = writer.close().await;

        log_task_stopped("write");
    })
}

/// A single logical WebSocket connection that reconnects with bounded backoff.
///
/// Lifecycle events are reported to a [`ConnectionHandler`]. The connection is usable
/// until [`ReconnectingConnection::close`]; a closed connection cannot be reconnected.
pub struct ReconnectingConnection {
    shared: Arc<ConnectionShared>,
}

impl Debug for ReconnectingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(ReconnectingConnection))
            .field("state", &self.state())
            .field("retry_count", &self.retry_count())
            .field("closed", &self.is_closed())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl ReconnectingConnection {
    /// Creates a new disconnected connection.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        config: StreamConfig,
        url_provider: Arc<dyn UrlProvider>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> StreamResult<Self> {
        config.validate()?;

        let scheduler = ReconnectScheduler::new(config.backoff()?, config.reconnect_max_attempts);
        let stability = StabilityDetector::new(config.stability_window());
        let auto_reconnect = AtomicBool::new(config.auto_reconnect);

        Ok(Self {
            shared: Arc::new(ConnectionShared {
                config,
                url_provider,
                handler,
                state: AtomicConnectionState::default(),
                scheduler,
                stability,
                auto_reconnect,
                closed: AtomicBool::new(false),
                has_connected: AtomicBool::new(false),
                session: AtomicU64::new(0),
                writer_tx: Mutex::new(None),
                tasks: Mutex::new(SessionTasks::default()),
            }),
        })
    }

    /// Starts connecting in the background.
    ///
    /// Returns `false` without side effects if the connection is closed or not currently
    /// `Disconnected`. Otherwise cancels any outstanding retry, resets the retry counter,
    /// and dials.
    pub fn connect(&self, auto_reconnect: bool) -> bool {
        let shared = &self.shared;

        if shared.closed.load(Ordering::SeqCst) {
            tracing::warn!("Cannot connect - client closed");
            return false;
        }

        if !shared
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            tracing::debug!("Connect ignored in state {}", shared.state.load());
            return false;
        }

        shared.scheduler.cancel();
        shared.scheduler.reset();
        shared.auto_reconnect.store(auto_reconnect, Ordering::SeqCst);

        tracing::debug!("Connecting");
        shared.dial();
        true
    }

    /// Closes the connection for good.
    ///
    /// Disables reconnection and cancels the reconnect timer before returning. Sends a
    /// normal close frame (1000, "Client disconnect") when a transport is open.
    pub fn close(&self) {
        let shared = &self.shared;

        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!("Closing");

        shared.auto_reconnect.store(false, Ordering::SeqCst);
        shared.scheduler.cancel();
        shared.stability.disarm();
        shared.session.fetch_add(1, Ordering::SeqCst);

        shared.shutdown_session();

        let prior = shared.state.force(ConnectionState::Disconnected);
        tracing::info!("Closed (was {prior})");

        if prior.is_connected() {
            shared
                .handler
                .on_close(CLOSE_CODE_NORMAL, CLOSE_REASON_CLIENT);
        }
    }

    /// Sends a text frame, returning `true` if it was handed to the writer.
    pub fn send_text(&self, data: String) -> bool {
        self.shared.send_message(Message::Text(data.into()))
    }

    /// Sends a binary frame, returning `true` if it was handed to the writer.
    pub fn send_bytes(&self, data: Vec<u8>) -> bool {
        self.shared.send_message(Message::Binary(data.into()))
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Returns the current retry count.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.shared.scheduler.attempts()
    }

    /// Returns `true` if the current connection has been proven stable.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.shared.stability.is_stable()
    }

    /// Returns `true` if automatic reconnection is enabled.
    #[must_use]
    pub fn is_auto_reconnect(&self) -> bool {
        self.shared.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Returns `true` once [`ReconnectingConnection::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Returns `true` if a reconnect attempt is scheduled and has not fired yet.
    #[must_use]
    pub fn is_retry_scheduled(&self) -> bool {
        self.shared.scheduler.is_scheduled()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }
}

impl ControlSink for ReconnectingConnection {
    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    fn send_control(&self, message: &ControlMessage) -> bool {
        self.shared.send_control(message)
    }
}

impl Drop for ReconnectingConnection {
    fn drop(&mut self) {
        // Background tasks hold the shared state, so stop them explicitly
        self.close();
    }
}
