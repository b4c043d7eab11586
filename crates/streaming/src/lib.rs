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

//! Resilient streaming-connection core for real-time feed clients.
//!
//! The `nautilus-streaming` crate manages a single long-lived WebSocket connection per
//! logical feed. It detects failure, reconnects with bounded exponential backoff, and
//! restores the caller's declared subscription set once the connection is back.
//!
//! **Components** (leaves first):
//! - [`state`]: atomic connection state with compare-and-set transitions.
//! - [`reconnect`]: retry counter and backoff scheduling on a single timer.
//! - [`stability`]: decides when a fresh connection is proven and the retry counter resets.
//! - [`subscription`]: the subscription ledger and the pending buffer.
//! - [`connection`]: the reconnecting connection state machine over `tokio-tungstenite`.
//! - [`client`]: the [`StreamClient`](client::StreamClient) façade fanning out typed events.
//!
//! Fetching connection URLs and decoding payloads are external concerns, plugged in through
//! the [`UrlProvider`](provider::UrlProvider) and [`FrameDecoder`](provider::FrameDecoder)
//! traits.

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod consts;
pub mod error;
pub mod listener;
pub mod logging;
pub mod messages;
pub mod provider;
pub mod reconnect;
pub mod runtime;
pub mod stability;
pub mod state;
pub mod subscription;
pub mod tls;

pub use crate::{
    client::StreamClient,
    config::StreamConfig,
    error::{StreamError, StreamResult},
    listener::{EventHandler, ListenerId, StreamEvent, channel_event_handler},
    provider::{FrameDecoder, UrlProvider},
    state::ConnectionState,
    subscription::SubscriptionMode,
};
