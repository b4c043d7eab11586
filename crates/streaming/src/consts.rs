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

//! Constants shared across the streaming core.

/// Close code sent on an explicit client-side close.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Close reason sent on an explicit client-side close.
pub const CLOSE_REASON_CLIENT: &str = "Client disconnect";

/// Close code reported when a close frame carried no status code.
pub const CLOSE_CODE_NO_STATUS: u16 = 1005;

/// Close code synthesized for transport failures where no close frame or HTTP response exists.
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;

/// Default initial reconnect delay (milliseconds).
pub const DEFAULT_RECONNECT_DELAY_INITIAL_MS: u64 = 1_000;

/// Default maximum reconnect delay (milliseconds).
pub const DEFAULT_RECONNECT_DELAY_MAX_MS: u64 = 30_000;

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// Default window a fresh connection must survive to be considered stable (milliseconds).
pub const DEFAULT_STABILITY_WINDOW_MS: u64 = 5_000;

/// Default bound on a single dial, TCP connect plus WebSocket handshake (milliseconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Largest exponent applied when doubling the reconnect delay.
pub const MAX_BACKOFF_SHIFT: u32 = 30;

/// Number of hex characters in a control message `guid`.
pub const GUID_LEN: usize = 10;
