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

//! Error types for the streaming core.

use thiserror::Error;

/// Result alias for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Error type for streaming client failures.
///
/// Errors never cross thread boundaries as panics; background tasks convert them into
/// [`StreamEvent::Error`](crate::listener::StreamEvent::Error) for listeners.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The external URL provider failed to produce a connection URL.
    #[error("URL provider error: {0}")]
    UrlProvider(String),

    /// Underlying transport error from the WebSocket implementation.
    #[error("WebSocket transport error: {0}")]
    Transport(String),

    /// The external frame decoder rejected an inbound frame.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Failed to hand a frame to the writer task.
    #[error("WebSocket send error: {0}")]
    Send(String),

    /// The connection is not currently established.
    #[error("WebSocket not connected")]
    NotConnected,

    /// The client was explicitly closed and cannot be reused.
    #[error("Client closed")]
    Closed,

    /// Reconnection gave up after the configured number of attempts.
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to serialize a control message.
    #[error("JSON error: {0}")]
    Json(String),
}

impl StreamError {
    /// Returns `true` if this error ends the connection for good (no further retries).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. } | Self::Closed)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}
