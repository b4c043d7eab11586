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

//! Hooks for the external collaborators of a streaming client.
//!
//! The streaming core does not know how connection URLs are authorized or how payloads
//! are encoded. A [`UrlProvider`] hands out a fresh URL per connection attempt and a
//! [`FrameDecoder`] turns raw frames into application events.

use std::fmt::Debug;

use bytes::Bytes;

/// One discrete inbound message unit delivered by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Returns the frame payload as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Returns the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Supplies a fresh, single-use connection URL.
///
/// Called synchronously once per connection attempt, including every reconnect. The result
/// is never cached.
pub trait UrlProvider: Send + Sync + 'static {
    /// Returns the URL to dial for the next connection attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if no URL could be obtained (for example the authorization request failed).
    fn connection_url(&self) -> anyhow::Result<String>;
}

impl<F> UrlProvider for F
where
    F: Fn() -> anyhow::Result<String> + Send + Sync + 'static,
{
    fn connection_url(&self) -> anyhow::Result<String> {
        self()
    }
}

/// A [`UrlProvider`] that always returns the same URL.
#[derive(Clone, Debug)]
pub struct StaticUrlProvider {
    url: String,
}

impl StaticUrlProvider {
    /// Creates a new [`StaticUrlProvider`] instance.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl UrlProvider for StaticUrlProvider {
    fn connection_url(&self) -> anyhow::Result<String> {
        Ok(self.url.clone())
    }
}

/// Turns raw inbound frames into zero or more application events.
///
/// Decode errors are reported to listeners as non-fatal error events; they never fail the
/// connection.
pub trait FrameDecoder: Send + Sync + 'static {
    /// The application event produced by this decoder.
    type Event: Clone + Debug + Send + Sync + 'static;

    /// Decodes `frame`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be decoded.
    fn decode(&self, frame: &Frame) -> anyhow::Result<Vec<Self::Event>>;
}

/// A [`FrameDecoder`] passing every frame through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawFrameDecoder;

impl FrameDecoder for RawFrameDecoder {
    type Event = Frame;

    fn decode(&self, frame: &Frame) -> anyhow::Result<Vec<Self::Event>> {
        Ok(vec![frame.clone()])
    }
}
