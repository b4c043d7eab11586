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

//! Typed events and the listener set that fans them out.

use std::{
    fmt::Debug,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::StreamError;

/// Event delivered to every registered listener.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent<E> {
    /// The first connection of this client opened.
    Connected,
    /// A later connection opened after a loss.
    Reconnected,
    /// The connection closed or failed.
    Disconnected { code: u16, reason: String },
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// An application event produced by the decoder.
    Data(E),
    /// A recoverable error, or a terminal one (see [`StreamError::is_terminal`]).
    Error(StreamError),
}

/// Function type for handling stream events.
pub type EventHandler<E> = Arc<dyn Fn(&StreamEvent<E>) + Send + Sync>;

/// Handle returned when registering a listener, used to remove it again.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Creates a channel-based event handler.
///
/// Returns a tuple containing the handler and a receiver for the events.
#[must_use]
pub fn channel_event_handler<E>() -> (EventHandler<E>, UnboundedReceiver<StreamEvent<E>>)
where
    E: Clone + Send + Sync + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let handler = Arc::new(move |event: &StreamEvent<E>| {
        if let Err(e) = tx.send(event.clone()) {
            tracing::debug!("Failed to send event to channel: {e}");
        }
    });
    (handler, rx)
}

/// An observer set where every listener receives every event.
///
/// Each dispatch is isolated: a listener that panics is logged and skipped without
/// affecting delivery to the others.
pub struct ListenerSet<E> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(ListenerId, EventHandler<E>)>>,
}

impl<E> Debug for ListenerSet<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(ListenerSet))
            .field("listeners", &self.len())
            .finish()
    }
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<E> ListenerSet<E> {
    /// Creates a new empty listener set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` and returns its id.
    pub fn add(&self, handler: EventHandler<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    /// Removes the listener with `id`, returning `true` if it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(listener_id, _)| *listener_id != id);
        handlers.len() != before
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every listener, returning how many of them panicked.
    pub fn dispatch(&self, event: &StreamEvent<E>) -> usize {
        // Snapshot so listeners may add or remove listeners while being called
        let handlers: Vec<(ListenerId, EventHandler<E>)> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = 0;
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                failures += 1;
                tracing::error!("Listener {id:?} panicked while handling event");
            }
        }
        failures
    }
}
