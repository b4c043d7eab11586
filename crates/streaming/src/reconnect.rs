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

//! Reconnect scheduling: the retry counter, the give-up rule, and the single timer.

use std::{
    future::Future,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;

use crate::{backoff::ExponentialBackoff, logging::log_task_aborted, runtime};

/// Outcome of reporting a lost connection to the [`ReconnectScheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Retry after `delay`; `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// The attempt budget was just exceeded. Reported once per exhaustion.
    GiveUp { attempts: u32 },
    /// The scheduler already reported exhaustion and has not been reset since.
    Exhausted,
}

/// Computes reconnect delays and owns the single outstanding reconnect timer.
///
/// The retry counter is the only scheduler state touched from several threads: the
/// transport read task increments it, the stability timer and explicit connects reset it.
#[derive(Debug)]
pub struct ReconnectScheduler {
    backoff: ExponentialBackoff,
    max_attempts: u32,
    attempts: AtomicU32,
    exhausted: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectScheduler {
    /// Creates a new scheduler giving up after `max_attempts` consecutive failures.
    #[must_use]
    pub fn new(backoff: ExponentialBackoff, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
            attempts: AtomicU32::new(0),
            exhausted: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    /// Records a failed or ended connection and decides whether to retry.
    pub fn on_connection_lost(&self) -> ReconnectDecision {
        if self.exhausted.load(Ordering::SeqCst) {
            return ReconnectDecision::Exhausted;
        }

        let attempt = self
            .attempts
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);

        if attempt > self.max_attempts {
            if self.exhausted.swap(true, Ordering::SeqCst) {
                return ReconnectDecision::Exhausted;
            }
            return ReconnectDecision::GiveUp {
                attempts: self.max_attempts,
            };
        }

        ReconnectDecision::Retry {
            attempt,
            delay: self.backoff.delay(attempt),
        }
    }

    /// Returns the current retry count.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the configured attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff used for delays.
    #[must_use]
    pub const fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    /// Resets the retry counter to zero and clears exhaustion.
    pub fn reset(&self) {
        let previous = self.attempts.swap(0, Ordering::SeqCst);
        self.exhausted.store(false, Ordering::SeqCst);
        if previous > 0 {
            tracing::debug!("Reset reconnect attempts (was {previous})");
        }
    }

    /// Runs `task` after `delay`, replacing any attempt that is still outstanding.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = runtime::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
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
            log_task_aborted("reconnect-timer");
        }
    }

    /// Returns `true` if a scheduled attempt has not fired yet.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels any outstanding scheduled attempt.
    pub fn cancel(&self) {
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle
            && !handle.is_finished()
        {
            handle.abort();
            log_task_aborted("reconnect-timer");
        }
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use rstest::rstest;

    use super::*;

    fn scheduler(max_attempts: u32) -> ReconnectScheduler {
        let backoff = ExponentialBackoff::new(
            Duration::from_millis(1_000),
            Duration::from_millis(30_000),
            0,
        )
        .unwrap();
        ReconnectScheduler::new(backoff, max_attempts)
    }

    fn delay_ms(decision: ReconnectDecision) -> u128 {
        match decision {
            ReconnectDecision::Retry { delay, .. } => delay.as_millis(),
            other => panic!("Expected retry, was {other:?}"),
        }
    }

    #[rstest]
    fn test_delays_follow_backoff() {
        let scheduler = scheduler(10);
        let delays: Vec<u128> = (0..7)
            .map(|_| delay_ms(scheduler.on_connection_lost()))
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]
        );
        assert_eq!(scheduler.attempts(), 7);
    }

    #[rstest]
    fn test_gives_up_exactly_once() {
        let scheduler = scheduler(3);
        for expected in 1..=3 {
            match scheduler.on_connection_lost() {
                ReconnectDecision::Retry { attempt, .. } => assert_eq!(attempt, expected),
                other => panic!("Expected retry, was {other:?}"),
            }
        }

        assert_eq!(
            scheduler.on_connection_lost(),
            ReconnectDecision::GiveUp { attempts: 3 }
        );
        assert_eq!(scheduler.on_connection_lost(), ReconnectDecision::Exhausted);
        assert_eq!(scheduler.on_connection_lost(), ReconnectDecision::Exhausted);
    }

    #[rstest]
    fn test_zero_attempts_gives_up_immediately() {
        let scheduler = scheduler(0);
        assert_eq!(
            scheduler.on_connection_lost(),
            ReconnectDecision::GiveUp { attempts: 0 }
        );
    }

    #[rstest]
    fn test_reset_restarts_from_first_attempt() {
        let scheduler = scheduler(10);
        for _ in 0..3 {
            let _ = scheduler.on_connection_lost();
        }

        scheduler.reset();

        assert_eq!(scheduler.attempts(), 0);
        match scheduler.on_connection_lost() {
            ReconnectDecision::Retry { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_millis(1_000));
            }
            other => panic!("Expected retry, was {other:?}"),
        }
    }

    #[rstest]
    fn test_reset_clears_exhaustion() {
        let scheduler = scheduler(1);
        let _ = scheduler.on_connection_lost();
        let _ = scheduler.on_connection_lost();
        assert_eq!(scheduler.on_connection_lost(), ReconnectDecision::Exhausted);

        scheduler.reset();
        assert!(matches!(
            scheduler.on_connection_lost(),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_scheduled_task_fires() {
        let scheduler = scheduler(3);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        scheduler.schedule(Duration::from_millis(10), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_scheduled());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled());
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let scheduler = scheduler(3);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        scheduler.schedule(Duration::from_millis(50), async move {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_scheduled());
    }

    #[tokio::test]
    async fn test_only_one_outstanding_attempt() {
        let scheduler = scheduler(3);
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fired = fired.clone();
            scheduler.schedule(Duration::from_millis(50), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
