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

//! TLS setup for `wss://` feeds.
//!
//! rustls needs a process-wide crypto provider before the first handshake. Host applications
//! may install their own; otherwise the first secure dial installs `aws-lc-rs`.

use std::sync::OnceLock;

use rustls::crypto::{CryptoProvider, aws_lc_rs};

static PROVIDER_INSTALLED: OnceLock<bool> = OnceLock::new();

/// Ensures a rustls crypto provider is installed, returning `true` if this crate installed it.
///
/// The outcome of the first call is cached; later calls are free.
pub fn ensure_crypto_provider() -> bool {
    *PROVIDER_INSTALLED.get_or_init(|| {
        if CryptoProvider::get_default().is_some() {
            tracing::debug!("Using crypto provider installed by the host application");
            return false;
        }

        // Losing a race with another installer still leaves a usable default
        let installed = aws_lc_rs::default_provider().install_default().is_ok();
        tracing::debug!("Crypto provider for secure feeds ready (installed_here={installed})");
        installed
    })
}
