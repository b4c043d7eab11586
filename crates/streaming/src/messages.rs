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

//! Subscription control messages sent to the feed server.
//!
//! The wire contract is fixed:
//!
//! ```json
//! {"guid":"3fa4c1b2e0","method":"sub","data":{"mode":"ltpc","instrumentKeys":["A","B"]}}
//! ```
//!
//! `unsub` messages carry `"mode": null`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{consts::GUID_LEN, subscription::SubscriptionMode};

/// Control message method.
#[derive(
    Clone, Copy, Debug, Display, Hash, PartialEq, Eq, AsRefStr, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ControlMethod {
    Sub,
    Unsub,
    ChangeMode,
}

/// Payload of a [`ControlMessage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlData {
    pub mode: Option<SubscriptionMode>,
    #[serde(rename = "instrumentKeys")]
    pub instrument_keys: Vec<String>,
}

/// A subscription control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub guid: String,
    pub method: ControlMethod,
    pub data: ControlData,
}

impl ControlMessage {
    fn new(method: ControlMethod, mode: Option<SubscriptionMode>, keys: Vec<String>) -> Self {
        Self {
            guid: generate_guid(),
            method,
            data: ControlData {
                mode,
                instrument_keys: keys,
            },
        }
    }

    /// Creates a `sub` message for `keys` in `mode`.
    #[must_use]
    pub fn subscribe(keys: Vec<String>, mode: SubscriptionMode) -> Self {
        Self::new(ControlMethod::Sub, Some(mode), keys)
    }

    /// Creates an `unsub` message for `keys`.
    #[must_use]
    pub fn unsubscribe(keys: Vec<String>) -> Self {
        Self::new(ControlMethod::Unsub, None, keys)
    }

    /// Creates a `change_mode` message moving `keys` to `mode`.
    #[must_use]
    pub fn change_mode(keys: Vec<String>, mode: SubscriptionMode) -> Self {
        Self::new(ControlMethod::ChangeMode, Some(mode), keys)
    }

    /// Serializes the message to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Generates a random request id of [`GUID_LEN`] lowercase hex characters.
#[must_use]
pub fn generate_guid() -> String {
    let value: u64 = rand::rng().random_range(0..(1u64 << (GUID_LEN * 4)));
    format!("{value:0width$x}", width = GUID_LEN)
}
