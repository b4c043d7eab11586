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

//! Provides the streaming client façade.
//!
//! [`StreamClient`] composes a [`ReconnectingConnection`], a [`SubscriptionLedger`], a
//! [`FrameDecoder`] and a [`ListenerSet`]. It restores subscriptions after a reconnect,
//! flushes subscriptions buffered while offline, and turns connection lifecycle callbacks
//! into [`StreamEvent`]s.

use std::{
    fmt::Debug,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use ahash::AHashMap;

use crate::{
    config::StreamConfig,
    connection::{ConnectionHandler, ReconnectingConnection},
    error::{StreamError, StreamResult},
    listener::{EventHandler, ListenerId, ListenerSet, StreamEvent},
    provider::{Frame, FrameDecoder, UrlProvider},
    state::ConnectionState,
    subscription::{ControlSink, SubscriptionLedger, SubscriptionMode},
};

/// State shared between the client and its connection callbacks.
struct ClientCore<D: FrameDecoder> {
    auto_resubscribe: bool,
    decoder: D,
    ledger: SubscriptionLedger,
    listeners: ListenerSet<D::Event>,
}

impl<D: FrameDecoder> ClientCore<D> {
    fn emit(&self, event: StreamEvent<D::Event>) {
        self.listeners.dispatch(&event);
    }
}

impl<D: FrameDecoder> ConnectionHandler for ClientCore<D> {
    fn on_open(&self, sink: &dyn ControlSink, is_reconnect: bool) {
        if is_reconnect {
            self.emit(StreamEvent::Reconnected);

            if self.auto_resubscribe {
                let sent = self.ledger.restore_after_reconnect(sink);
                tracing::debug!("Restored subscriptions with {sent} message(s)");
            }
        } else {
            self.emit(StreamEvent::Connected);
        }

        let flushed = self.ledger.flush_pending(sink);
        if flushed > 0 {
            tracing::debug!("Flushed pending subscriptions with {flushed} message(s)");
        }
    }

    fn on_frame(&self, frame: Frame) {
        match catch_unwind(AssertUnwindSafe(|| self.decoder.decode(&frame))) {
            Ok(Ok(events)) => {
                for event in events {
                    self.emit(StreamEvent::Data(event));
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to decode frame ({} bytes): {e}", frame.len());
                self.emit(StreamEvent::Error(StreamError::Decode(e.to_string())));
            }
            Err(_) => {
                tracing::error!("Decoder panicked on frame ({} bytes)", frame.len());
                self.emit(StreamEvent::Error(StreamError::Decode(
                    "decoder panicked".to_string(),
                )));
            }
        }
    }

    fn on_close(&self, code: u16, reason: &str) {
        self.emit(StreamEvent::Disconnected {
            code,
            reason: reason.to_string(),
        });
    }

    fn on_reconnecting(&self, attempt: u32, delay: Duration) {
        self.emit(StreamEvent::Reconnecting { attempt, delay });
    }

    fn on_error(&self, error: StreamError) {
        self.emit(StreamEvent::Error(error));
    }
}

/// A resilient streaming client.
///
/// All methods are non-blocking and safe to call from any thread, including from inside a
/// listener.
pub struct StreamClient<D: FrameDecoder> {
    core: Arc<ClientCore<D>>,
    connection: ReconnectingConnection,
}

impl<D: FrameDecoder> Debug for StreamClient<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(StreamClient))
            .field("connection", &self.connection)
            .field("subscriptions", &self.core.ledger.len())
            .field("listeners", &self.core.listeners.len())
            .finish()
    }
}

impl<D: FrameDecoder> StreamClient<D> {
    /// Creates a new [`StreamClient`] instance.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        config: StreamConfig,
        url_provider: impl UrlProvider,
        decoder: D,
    ) -> StreamResult<Self> {
        let core = Arc::new(ClientCore {
            auto_resubscribe: config.auto_resubscribe,
            decoder,
            ledger: SubscriptionLedger::new(),
            listeners: ListenerSet::new(),
        });

        let handler: Arc<dyn ConnectionHandler> = core.clone();
        let connection = ReconnectingConnection::new(config, Arc::new(url_provider), handler)?;

        Ok(Self { core, connection })
    }

    /// Connects using the configured reconnect policy.
    ///
    /// Returns `false` (no-op) if the client is closed or not disconnected.
    pub fn connect(&self) -> bool {
        self.connection
            .connect(self.connection.config().auto_reconnect)
    }

    /// Connects with an explicit reconnect policy.
    ///
    /// Returns `false` (no-op) if the client is closed or not disconnected.
    pub fn connect_with(&self, auto_reconnect: bool) -> bool {
        self.connection.connect(auto_reconnect)
    }

    /// Closes the client for good and clears all subscriptions.
    pub fn close(&self) {
        self.connection.close();
        self.core.ledger.clear();
    }

    /// Subscribes `keys` in `mode`.
    ///
    /// Returns `true` if a `sub` message was sent. While disconnected the keys are buffered
    /// and sent after the next open.
    pub fn subscribe<S: AsRef<str>>(&self, keys: &[S], mode: SubscriptionMode) -> bool {
        if self.connection.is_closed() {
            tracing::warn!("Cannot subscribe - client closed");
            return false;
        }
        self.core.ledger.subscribe(&self.connection, keys, mode)
    }

    /// Unsubscribes `keys`.
    ///
    /// Returns `true` if an `unsub` message was sent.
    pub fn unsubscribe<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        if self.connection.is_closed() {
            tracing::warn!("Cannot unsubscribe - client closed");
            return false;
        }
        self.core.ledger.unsubscribe(&self.connection, keys)
    }

    /// Unsubscribes every tracked and pending key.
    ///
    /// Returns `true` if an `unsub` message was sent.
    pub fn unsubscribe_all(&self) -> bool {
        if self.connection.is_closed() {
            return false;
        }
        self.core.ledger.unsubscribe_all(&self.connection)
    }

    /// Changes the mode of already subscribed `keys`.
    ///
    /// Returns `true` if a `change_mode` message was sent.
    pub fn change_mode<S: AsRef<str>>(&self, keys: &[S], mode: SubscriptionMode) -> bool {
        if self.connection.is_closed() {
            tracing::warn!("Cannot change mode - client closed");
            return false;
        }
        self.core.ledger.change_mode(&self.connection, keys, mode)
    }

    /// Sends a raw text frame outside the subscription protocol.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] after [`StreamClient::close`], [`StreamError::NotConnected`]
    /// while no connection is open, or [`StreamError::Send`] if the writer is gone.
    pub fn send_text(&self, data: impl Into<String>) -> StreamResult<()> {
        self.check_sendable()?;
        if self.connection.send_text(data.into()) {
            Ok(())
        } else {
            Err(StreamError::Send("writer unavailable".to_string()))
        }
    }

    /// Sends a raw binary frame outside the subscription protocol.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] after [`StreamClient::close`], [`StreamError::NotConnected`]
    /// while no connection is open, or [`StreamError::Send`] if the writer is gone.
    pub fn send_bytes(&self, data: Vec<u8>) -> StreamResult<()> {
        self.check_sendable()?;
        if self.connection.send_bytes(data) {
            Ok(())
        } else {
            Err(StreamError::Send("writer unavailable".to_string()))
        }
    }

    fn check_sendable(&self) -> StreamResult<()> {
        if self.connection.is_closed() {
            return Err(StreamError::Closed);
        }
        if !self.is_connected() {
            return Err(StreamError::NotConnected);
        }
        Ok(())
    }

    /// Registers an event listener.
    pub fn add_listener(&self, handler: EventHandler<D::Event>) -> ListenerId {
        self.core.listeners.add(handler)
    }

    /// Removes a listener, returning `true` if it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.listeners.remove(id)
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Returns `true` if the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.state().is_connected()
    }

    /// Returns `true` once [`StreamClient::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Returns the number of consecutive failed connections since the last stable one.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.connection.retry_count()
    }

    /// Returns the effective subscriptions, with buffered changes overlaid on the ledger.
    #[must_use]
    pub fn subscriptions(&self) -> AHashMap<String, SubscriptionMode> {
        self.core.ledger.snapshot()
    }

    /// Returns the subscriptions buffered while disconnected.
    #[must_use]
    pub fn pending_subscriptions(&self) -> AHashMap<String, SubscriptionMode> {
        self.core.ledger.pending_snapshot()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        self.connection.config()
    }

    /// Returns the underlying connection.
    #[must_use]
    pub fn connection(&self) -> &ReconnectingConnection {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;

    use super::*;
    use crate::provider::{RawFrameDecoder, StaticUrlProvider};

    #[derive(Debug)]
    struct CsvDecoder;

    impl FrameDecoder for CsvDecoder {
        type Event = String;

        fn decode(&self, frame: &Frame) -> anyhow::Result<Vec<String>> {
            let text = std::str::from_utf8(frame.as_bytes())?;
            if text == "panic" {
                panic!("bad frame");
            }
            Ok(text.split(',').map(str::to_string).collect())
        }
    }

    struct OfflineSink;

    impl ControlSink for OfflineSink {
        fn is_connected(&self) -> bool {
            false
        }

        fn send_control(&self, _message: &crate::messages::ControlMessage) -> bool {
            false
        }
    }

    fn core() -> (Arc<ClientCore<CsvDecoder>>, Arc<Mutex<Vec<StreamEvent<String>>>>) {
        let core = Arc::new(ClientCore {
            auto_resubscribe: true,
            decoder: CsvDecoder,
            ledger: SubscriptionLedger::new(),
            listeners: ListenerSet::new(),
        });
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        core.listeners
            .add(Arc::new(move |event: &StreamEvent<String>| {
                events_clone.lock().unwrap().push(event.clone());
            }));
        (core, events)
    }

    fn client() -> StreamClient<RawFrameDecoder> {
        StreamClient::new(
            StreamConfig::default(),
            StaticUrlProvider::new("ws://127.0.0.1:1"),
            RawFrameDecoder,
        )
        .unwrap()
    }

    #[rstest]
    fn test_frame_decodes_into_data_events() {
        let (core, events) = core();

        core.on_frame(Frame::Text("a,b".to_string()));

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                StreamEvent::Data("a".to_string()),
                StreamEvent::Data("b".to_string())
            ]
        );
    }

    #[rstest]
    fn test_decode_failure_is_non_fatal_error_event() {
        let (core, events) = core();

        core.on_frame(Frame::Binary(vec![0xff, 0xfe].into()));
        core.on_frame(Frame::Text("panic".to_string()));
        core.on_frame(Frame::Text("ok".to_string()));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StreamEvent::Error(StreamError::Decode(_))));
        assert_eq!(
            events[1],
            StreamEvent::Error(StreamError::Decode("decoder panicked".to_string()))
        );
        assert_eq!(events[2], StreamEvent::Data("ok".to_string()));
    }

    #[rstest]
    #[case(false, StreamEvent::Connected)]
    #[case(true, StreamEvent::Reconnected)]
    fn test_open_emits_connected_or_reconnected(
        #[case] is_reconnect: bool,
        #[case] expected: StreamEvent<String>,
    ) {
        let (core, events) = core();

        core.on_open(&OfflineSink, is_reconnect);

        assert_eq!(*events.lock().unwrap(), vec![expected]);
    }

    #[rstest]
    fn test_lifecycle_callbacks_map_to_events() {
        let (core, events) = core();

        core.on_close(1006, "gone");
        core.on_reconnecting(2, Duration::from_secs(2));
        core.on_error(StreamError::ReconnectExhausted { attempts: 10 });

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                StreamEvent::Disconnected {
                    code: 1006,
                    reason: "gone".to_string()
                },
                StreamEvent::Reconnecting {
                    attempt: 2,
                    delay: Duration::from_secs(2)
                },
                StreamEvent::Error(StreamError::ReconnectExhausted { attempts: 10 }),
            ]
        );
    }

    #[rstest]
    fn test_subscribe_while_disconnected_is_buffered() {
        let client = client();

        assert!(!client.subscribe(&["A", "B"], SubscriptionMode::Ltpc));

        let pending = client.pending_subscriptions();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.get("A"), Some(&SubscriptionMode::Ltpc));
        assert_eq!(client.subscriptions(), pending);
    }

    #[rstest]
    fn test_unsubscribe_while_disconnected_drops_buffered_keys() {
        let client = client();
        client.subscribe(&["A", "B"], SubscriptionMode::Full);

        assert!(!client.unsubscribe(&["A"]));

        let subscriptions = client.subscriptions();
        assert_eq!(subscriptions.len(), 1);
        assert!(subscriptions.contains_key("B"));
    }

    #[rstest]
    fn test_close_clears_subscriptions_and_rejects_further_calls() {
        let client = client();
        client.subscribe(&["A"], SubscriptionMode::Ltpc);

        client.close();

        assert!(client.is_closed());
        assert!(client.subscriptions().is_empty());
        assert!(!client.subscribe(&["B"], SubscriptionMode::Ltpc));
        assert!(client.subscriptions().is_empty());
        assert!(!client.connect());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[rstest]
    fn test_send_requires_open_connection() {
        let client = client();

        assert_eq!(client.send_text("ping"), Err(StreamError::NotConnected));

        client.close();

        assert_eq!(client.send_bytes(vec![1]), Err(StreamError::Closed));
    }

    #[rstest]
    fn test_listener_registration() {
        let client = client();
        let id = client.add_listener(Arc::new(|_: &StreamEvent<Frame>| {}));

        assert!(client.remove_listener(id));
        assert!(!client.remove_listener(id));
    }
}
