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

//! Decides when a freshly opened connection is proven stable.
//!
//! A handshake alone proves nothing: a connection that opens and immediately fails would
//! otherwise reset the backoff forever. A connection becomes stable on the first inbound
//! application frame, or when it is still connected once the stability window elapses,
//! whichever happens first. Only then is the retry counter reset.

use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;

use crate::{logging::log_task_aborted, runtime};

/// Tracks the "proven" flag of the current connection.
///
/// Each arm returns a generation token. Timers and frames carrying an older token are
/// ignored, so a window started for a dead connection cannot mark its successor stable.
#[derive(Debug)]
pub struct StabilityDetector {
    window: Duration,
    proven: AtomicBool,
    generation: AtomicU64,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl StabilityDetector {
    /// Creates a new detector with the given stability window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            proven: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            timer: Mutex::new(None),
        }
    }

    /// Returns the stability window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` if the current connection has been proven stable.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.proven.load(Ordering::SeqCst)
    }

    /// Starts tracking a newly opened connection and returns its generation token.
    pub fn arm_on_open(&self) -> u64 {
        self.proven.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records an inbound application frame for the connection of `generation`.
    ///
    /// Returns `true` only for the call that proves the connection stable.
    pub fn on_frame_received(&self, generation: u64) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }

        let proven_now = !self.proven.swap(true, Ordering::SeqCst);
        if proven_now {
            self.cancel_timer();
        }
        proven_now
    }

    /// Evaluates an elapsed stability window for the connection of `generation`.
    ///
    /// Returns `true` only if that connection is still current, still connected, and was
    /// not already proven.
    pub fn check_timeout(&self, generation: u64, still_connected: bool) -> bool {
        if !still_connected || self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }

        !self.proven.swap(true, Ordering::SeqCst)
    }

    /// Runs `on_expiry` with `generation` once the stability window elapses.
    ///
    /// Replaces any timer still running for an earlier connection.
    pub fn start_timer<F>(&self, generation: u64, on_expiry: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let window = self.window;
        let handle = runtime::spawn(async move {
            tokio::time::sleep(window).await;
            on_expiry(generation);
        });

        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);

        if let Some(previous) = previous
            && !previous.is_finished()
        {
            previous.abort();
            log_task_aborted("stability-timer");
        }
    }

    /// Invalidates the current generation and stops its timer.
    ///
    /// Called when a connection ends or a new attempt starts.
    pub fn disarm(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.proven.store(false, Ordering::SeqCst);
        self.cancel_timer();
    }

    fn cancel_timer(&self) {
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle
            && !handle.is_finished()
        {
            handle.abort();
            log_task_aborted("stability-timer");
        }
    }
}

impl Drop for StabilityDetector {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
