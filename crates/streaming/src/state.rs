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

//! Connection state for a streaming client and its atomic cell.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Lifecycle state of the single logical connection owned by a streaming client.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    Hash,
    PartialEq,
    Eq,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    /// No connection and no reconnect scheduled.
    #[default]
    Disconnected = 0,
    /// A dial is in flight (URL fetch, TCP connect, WebSocket handshake).
    Connecting = 1,
    /// The transport is open and frames are flowing.
    Connected = 2,
    /// The connection was lost and a reconnect attempt is scheduled.
    Reconnecting = 3,
}

impl ConnectionState {
    /// Convert a u8 to [`ConnectionState`], useful when loading from an `AtomicU8`.
    ///
    /// # Panics
    ///
    /// Panics if `value` does not correspond to a state.
    #[inline]
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            _ => panic!("Invalid `ConnectionState` value: {value}"),
        }
    }

    /// Convert a [`ConnectionState`] to a u8, useful when storing to an `AtomicU8`.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    #[inline]
    #[must_use]
    pub const fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    #[inline]
    #[must_use]
    pub const fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting)
    }
}

/// Atomic holder of a [`ConnectionState`].
///
/// Every change goes through [`AtomicConnectionState::transition`], a single
/// compare-and-set keyed on the expected prior state, so a stale callback can never
/// overwrite a state it did not observe.
#[derive(Debug, Default)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    /// Creates a new cell holding `state`.
    #[must_use]
    pub const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    /// Returns the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves from `from` to `to`, returning `true` if the cell held `from`.
    ///
    /// A failed precondition leaves the cell untouched.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Moves to `to` from whichever of `from` the cell currently holds.
    ///
    /// Returns the prior state on success.
    pub fn transition_any(
        &self,
        from: &[ConnectionState],
        to: ConnectionState,
    ) -> Option<ConnectionState> {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                from.contains(&ConnectionState::from_u8(current))
                    .then_some(to.as_u8())
            })
            .ok()
            .map(ConnectionState::from_u8)
    }

    /// Unconditionally stores `state`, returning the prior state.
    ///
    /// Reserved for the terminal `close()` path.
    pub fn force(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state.as_u8(), Ordering::SeqCst))
    }
}
