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

//! Configuration for streaming clients.

use std::{fmt::Debug, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    backoff::ExponentialBackoff,
    consts::{
        DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RECONNECT_DELAY_INITIAL_MS,
        DEFAULT_RECONNECT_DELAY_MAX_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS,
        DEFAULT_STABILITY_WINDOW_MS,
    },
    error::{StreamError, StreamResult},
};

/// Configuration for a [`StreamClient`](crate::client::StreamClient).
///
/// Carried by each client instance; there is no process-wide configuration. Every field
/// has a default so a partial JSON or TOML document deserializes cleanly.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Reconnect automatically after a transient connection loss.
    pub auto_reconnect: bool,
    /// Restore the subscription ledger after a reconnect.
    pub auto_resubscribe: bool,
    /// The initial reconnection delay (milliseconds).
    pub reconnect_delay_initial_ms: u64,
    /// The maximum reconnect delay (milliseconds) for exponential backoff.
    pub reconnect_delay_max_ms: u64,
    /// The number of consecutive failed connections after which reconnection gives up.
    pub reconnect_max_attempts: u32,
    /// The maximum jitter (milliseconds) added to reconnection delays.
    pub reconnect_jitter_ms: u64,
    /// How long a fresh connection must stay up without data to be considered stable
    /// (milliseconds).
    pub stability_window_ms: u64,
    /// The timeout (milliseconds) for a single dial.
    pub connect_timeout_ms: u64,
    /// Additional handshake headers.
    pub headers: Vec<(String, String)>,
    /// Send control messages as binary frames (UTF-8 JSON) instead of text frames.
    pub control_frame_binary: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            auto_resubscribe: true,
            reconnect_delay_initial_ms: DEFAULT_RECONNECT_DELAY_INITIAL_MS,
            reconnect_delay_max_ms: DEFAULT_RECONNECT_DELAY_MAX_MS,
            reconnect_max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            reconnect_jitter_ms: 0,
            stability_window_ms: DEFAULT_STABILITY_WINDOW_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            headers: Vec::new(),
            control_frame_binary: true,
        }
    }
}

impl Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Header values may carry credentials
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();

        f.debug_struct(stringify!(StreamConfig))
            .field("auto_reconnect", &self.auto_reconnect)
            .field("auto_resubscribe", &self.auto_resubscribe)
            .field(
                "reconnect_delay_initial_ms",
                &self.reconnect_delay_initial_ms,
            )
            .field("reconnect_delay_max_ms", &self.reconnect_delay_max_ms)
            .field("reconnect_max_attempts", &self.reconnect_max_attempts)
            .field("reconnect_jitter_ms", &self.reconnect_jitter_ms)
            .field("stability_window_ms", &self.stability_window_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("headers", &header_names)
            .field("control_frame_binary", &self.control_frame_binary)
            .finish()
    }
}

impl StreamConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidConfig`] if the backoff bounds are inconsistent or the
    /// stability window or connect timeout is zero.
    pub fn validate(&self) -> StreamResult<()> {
        self.backoff()?;

        if self.stability_window_ms == 0 {
            return Err(StreamError::InvalidConfig(
                "stability_window_ms must be positive".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(StreamError::InvalidConfig(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Builds the reconnect backoff described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidConfig`] if the delay bounds are inconsistent.
    pub fn backoff(&self) -> StreamResult<ExponentialBackoff> {
        ExponentialBackoff::new(
            Duration::from_millis(self.reconnect_delay_initial_ms),
            Duration::from_millis(self.reconnect_delay_max_ms),
            self.reconnect_jitter_ms,
        )
        .map_err(|e| StreamError::InvalidConfig(e.to_string()))
    }

    /// Returns the stability window.
    #[must_use]
    pub const fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    /// Returns the dial timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
