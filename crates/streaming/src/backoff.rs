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

//! Provides the bounded exponential backoff used to space reconnect attempts.
//!
//! The delay for a 1-based attempt `n` is `min(initial * 2^(n-1), max)`. The exponent is
//! capped at [`MAX_BACKOFF_SHIFT`] so large attempt numbers cannot overflow. Optional random
//! jitter may be added on top of the capped delay to avoid synchronized reconnection storms.

use std::time::Duration;

use rand::Rng;

use crate::consts::MAX_BACKOFF_SHIFT;

/// A bounded exponential backoff keyed on the attempt number.
///
/// Unlike an iterator-style backoff this holds no cursor; the caller owns the attempt
/// counter (see [`ReconnectScheduler`](crate::reconnect::ReconnectScheduler)) and asks for
/// the delay of a given attempt.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    /// The delay before the first attempt.
    delay_initial: Duration,
    /// The maximum delay to cap the backoff.
    delay_max: Duration,
    /// The maximum random jitter to add (in milliseconds).
    jitter_ms: u64,
}

impl ExponentialBackoff {
    /// Creates a new [`ExponentialBackoff`] instance.
    ///
    /// # Errors
    ///
    /// Returns an error if `delay_initial` is zero or `delay_max` is below `delay_initial`.
    pub fn new(
        delay_initial: Duration,
        delay_max: Duration,
        jitter_ms: u64,
    ) -> anyhow::Result<Self> {
        if delay_initial.is_zero() {
            anyhow::bail!("delay_initial must be positive");
        }

        if delay_max < delay_initial {
            anyhow::bail!(
                "delay_max ({}ms) must be >= delay_initial ({}ms)",
                delay_max.as_millis(),
                delay_initial.as_millis()
            );
        }

        Ok(Self {
            delay_initial,
            delay_max,
            jitter_ms,
        })
    }

    /// Returns the base delay (without jitter) for the 1-based `attempt`.
    ///
    /// Attempt `0` is treated as attempt `1`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        let multiplier = 1u32 << shift;
        self.delay_initial
            .checked_mul(multiplier)
            .map_or(self.delay_max, |delay| delay.min(self.delay_max))
    }

    /// Returns the delay for the 1-based `attempt` with jitter applied.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_ms == 0 {
            return base;
        }

        let jitter = rand::rng().random_range(0..=self.jitter_ms);
        base + Duration::from_millis(jitter)
    }

    /// Returns the initial delay.
    #[must_use]
    pub const fn delay_initial(&self) -> Duration {
        self.delay_initial
    }

    /// Returns the delay cap.
    #[must_use]
    pub const fn delay_max(&self) -> Duration {
        self.delay_max
    }
}
