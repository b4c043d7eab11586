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

//! Subscription ledger for streaming clients.
//!
//! The ledger is the authoritative record of the subscriptions the caller wants active,
//! independent of the current connection. Requests made while disconnected land in a
//! pending buffer and are flushed once connected. At any instant a key lives in at most one
//! of {ledger, pending buffer}, and only in the ledger while connected.
//!
//! # Reconnection
//!
//! After a reconnect, [`SubscriptionLedger::restore_after_reconnect`] groups the ledger by
//! mode and sends one `sub` message per distinct mode rather than one per key.

use std::{collections::BTreeMap, sync::Arc};

use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use ustr::Ustr;

use crate::messages::ControlMessage;

/// Feed mode requested for an instrument key.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum SubscriptionMode {
    /// Last traded price and close.
    #[strum(serialize = "ltpc")]
    #[serde(rename = "ltpc")]
    Ltpc,
    /// Option greeks only.
    #[strum(serialize = "option_greeks")]
    #[serde(rename = "option_greeks")]
    OptionGreeks,
    /// Full market depth (5 levels).
    #[strum(serialize = "full")]
    #[serde(rename = "full")]
    Full,
    /// Full market depth (30 levels).
    #[strum(serialize = "full_d30")]
    #[serde(rename = "full_d30")]
    FullD30,
}

/// Outbound side of a connection as seen by the ledger.
///
/// Sending is fire-and-forget: the boolean result does not distinguish a failed write from
/// a connection that is not established.
pub trait ControlSink: Send + Sync {
    /// Returns `true` if the connection is currently established.
    fn is_connected(&self) -> bool;

    /// Sends `message` to the server, returning `true` if it was handed to the transport.
    fn send_control(&self, message: &ControlMessage) -> bool;
}

/// Thread-safe store of the desired subscription set (key to mode) plus the pending buffer.
///
/// Clones share the same underlying maps.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionLedger {
    /// Subscriptions sent (or to be restored) on the live connection.
    tracked: Arc<DashMap<Ustr, SubscriptionMode>>,
    /// Subscriptions requested while not connected.
    pending: Arc<DashMap<Ustr, SubscriptionMode>>,
}

/// Removes duplicate keys while keeping the caller's order.
fn dedup_keys<S: AsRef<str>>(keys: &[S]) -> Vec<Ustr> {
    let mut seen = AHashSet::with_capacity(keys.len());
    keys.iter()
        .map(|key| Ustr::from(key.as_ref()))
        .filter(|key| seen.insert(*key))
        .collect()
}

fn to_strings(keys: &[Ustr]) -> Vec<String> {
    keys.iter().map(ToString::to_string).collect()
}

/// Sends one `sub` message per mode group, returning the number handed to the transport.
fn send_grouped(sink: &dyn ControlSink, groups: BTreeMap<SubscriptionMode, Vec<Ustr>>) -> usize {
    let mut sent = 0;
    for (mode, mut keys) in groups {
        keys.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
        let message = ControlMessage::subscribe(to_strings(&keys), mode);
        if sink.send_control(&message) {
            sent += 1;
        } else {
            tracing::warn!("Failed to send subscription for mode {mode} ({} keys)", keys.len());
        }
    }
    sent
}

impl SubscriptionLedger {
    /// Creates a new empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `keys` in `mode`.
    ///
    /// When connected the keys are written to the ledger and one `sub` message is sent.
    /// Otherwise they are buffered and `false` is returned (buffered, not sent).
    pub fn subscribe<S: AsRef<str>>(
        &self,
        sink: &dyn ControlSink,
        keys: &[S],
        mode: SubscriptionMode,
    ) -> bool {
        let keys = dedup_keys(keys);
        if keys.is_empty() {
            return false;
        }

        if !sink.is_connected() {
            for key in &keys {
                self.tracked.remove(key);
                self.pending.insert(*key, mode);
            }
            if sink.is_connected() {
                // The transport opened (and flushed) between the check and the insert
                return self.flush_pending(sink) > 0;
            }
            tracing::debug!("Buffered {} subscription(s) in mode {mode}", keys.len());
            return false;
        }

        for key in &keys {
            self.pending.remove(key);
            self.tracked.insert(*key, mode);
        }

        sink.send_control(&ControlMessage::subscribe(to_strings(&keys), mode))
    }

    /// Unsubscribes `keys`.
    ///
    /// Keys are always removed from both the ledger and the pending buffer, so a later
    /// restore never re-sends them. An `unsub` message is sent only when connected.
    pub fn unsubscribe<S: AsRef<str>>(&self, sink: &dyn ControlSink, keys: &[S]) -> bool {
        let keys = dedup_keys(keys);
        if keys.is_empty() {
            return false;
        }

        for key in &keys {
            self.tracked.remove(key);
            self.pending.remove(key);
        }

        if !sink.is_connected() {
            return false;
        }

        sink.send_control(&ControlMessage::unsubscribe(to_strings(&keys)))
    }

    /// Unsubscribes every tracked and pending key.
    ///
    /// Sends a single `unsub` message with all removed keys when connected.
    pub fn unsubscribe_all(&self, sink: &dyn ControlSink) -> bool {
        let mut keys: Vec<Ustr> = self.tracked.iter().map(|entry| *entry.key()).collect();
        keys.extend(self.pending.iter().map(|entry| *entry.key()));
        self.tracked.clear();
        self.pending.clear();

        if keys.is_empty() || !sink.is_connected() {
            return false;
        }

        keys.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
        keys.dedup();
        sink.send_control(&ControlMessage::unsubscribe(to_strings(&keys)))
    }

    /// Changes the mode of already subscribed `keys`.
    ///
    /// Keys absent from both the ledger and the pending buffer are ignored; if none remain
    /// this is a no-op returning `false`. When connected a single `change_mode` message is
    /// sent for the ledger keys; otherwise the new mode is buffered.
    pub fn change_mode<S: AsRef<str>>(
        &self,
        sink: &dyn ControlSink,
        keys: &[S],
        mode: SubscriptionMode,
    ) -> bool {
        let keys = dedup_keys(keys);
        let connected = sink.is_connected();
        let mut changed = Vec::with_capacity(keys.len());

        for key in keys {
            if let Some(mut entry) = self.pending.get_mut(&key) {
                *entry = mode;
                continue;
            }

            if connected {
                if let Some(mut entry) = self.tracked.get_mut(&key) {
                    *entry = mode;
                    changed.push(key);
                }
            } else if self.tracked.remove(&key).is_some() {
                self.pending.insert(key, mode);
            }
        }

        if !connected {
            // Buffered entries would be stranded if the transport opened meanwhile
            return sink.is_connected() && self.flush_pending(sink) > 0;
        }

        if changed.is_empty() {
            return false;
        }

        sink.send_control(&ControlMessage::change_mode(to_strings(&changed), mode))
    }

    /// Re-sends every ledger entry after a reconnect, one `sub` message per distinct mode.
    ///
    /// Returns the number of messages handed to the transport.
    pub fn restore_after_reconnect(&self, sink: &dyn ControlSink) -> usize {
        if !sink.is_connected() {
            return 0;
        }

        let mut groups: BTreeMap<SubscriptionMode, Vec<Ustr>> = BTreeMap::new();
        for entry in self.tracked.iter() {
            groups.entry(*entry.value()).or_default().push(*entry.key());
        }

        if groups.is_empty() {
            return 0;
        }

        tracing::debug!("Restoring {} subscription(s)", self.tracked.len());
        send_grouped(sink, groups)
    }

    /// Moves the pending buffer into the ledger and sends one `sub` message per mode.
    ///
    /// Does nothing while disconnected. Returns the number of messages handed to the
    /// transport.
    pub fn flush_pending(&self, sink: &dyn ControlSink) -> usize {
        if !sink.is_connected() {
            return 0;
        }

        let keys: Vec<Ustr> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut groups: BTreeMap<SubscriptionMode, Vec<Ustr>> = BTreeMap::new();

        for key in keys {
            // Entries unsubscribed concurrently are skipped
            if let Some((key, mode)) = self.pending.remove(&key) {
                self.tracked.insert(key, mode);
                groups.entry(mode).or_default().push(key);
            }
        }

        if groups.is_empty() {
            return 0;
        }

        tracing::debug!("Flushing pending subscriptions for {} mode(s)", groups.len());
        send_grouped(sink, groups)
    }

    /// Returns the desired subscription set: ledger entries overlaid with pending entries.
    #[must_use]
    pub fn snapshot(&self) -> AHashMap<String, SubscriptionMode> {
        let mut snapshot = self.tracked_snapshot();
        snapshot.extend(self.pending_snapshot());
        snapshot
    }

    /// Returns the ledger entries only.
    #[must_use]
    pub fn tracked_snapshot(&self) -> AHashMap<String, SubscriptionMode> {
        self.tracked
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect()
    }

    /// Returns the pending buffer entries only.
    #[must_use]
    pub fn pending_snapshot(&self) -> AHashMap<String, SubscriptionMode> {
        self.pending
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect()
    }

    /// Returns the desired mode for `key`, if any.
    #[must_use]
    pub fn mode_of(&self, key: &str) -> Option<SubscriptionMode> {
        let key = Ustr::from(key);
        self.pending
            .get(&key)
            .map(|entry| *entry.value())
            .or_else(|| self.tracked.get(&key).map(|entry| *entry.value()))
    }

    /// Returns the number of desired subscriptions (ledger plus pending).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracked.len() + self.pending.len()
    }

    /// Returns `true` if nothing is tracked or pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty() && self.pending.is_empty()
    }

    /// Clears the ledger and the pending buffer.
    ///
    /// Only an explicit close clears the ledger; transient disconnects keep it for restore.
    pub fn clear(&self) {
        self.tracked.clear();
        self.pending.clear();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::{
        str::FromStr,
        sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
    };

    use rstest::rstest;

    use super::*;
    use crate::messages::ControlMethod;

    #[derive(Debug, Default)]
    struct RecordingSink {
        connected: AtomicBool,
        fail_sends: AtomicBool,
        sent: Mutex<Vec<ControlMessage>>,
    }

    impl RecordingSink {
        fn connected() -> Self {
            let sink = Self::default();
            sink.set_connected(true);
            sink
        }

        fn set_connected(&self, value: bool) {
            self.connected.store(value, Ordering::SeqCst);
        }

        fn take(&self) -> Vec<ControlMessage> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl ControlSink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send_control(&self, message: &ControlMessage) -> bool {
            if !self.is_connected() || self.fail_sends.load(Ordering::SeqCst) {
                return false;
            }
            self.sent.lock().unwrap().push(message.clone());
            true
        }
    }

    #[rstest]
    #[case(SubscriptionMode::Ltpc, "ltpc")]
    #[case(SubscriptionMode::OptionGreeks, "option_greeks")]
    #[case(SubscriptionMode::Full, "full")]
    #[case(SubscriptionMode::FullD30, "full_d30")]
    fn test_mode_names(#[case] mode: SubscriptionMode, #[case] expected: &str) {
        assert_eq!(mode.to_string(), expected);
        assert_eq!(SubscriptionMode::from_str(expected).unwrap(), mode);
        assert_eq!(serde_json::to_string(&mode).unwrap(), format!("\"{expected}\""));
    }

    #[rstest]
    fn test_subscribe_while_connected_sends_once() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();

        assert!(ledger.subscribe(&sink, &["A", "B", "A"], SubscriptionMode::Full));

        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, ControlMethod::Sub);
        assert_eq!(sent[0].data.mode, Some(SubscriptionMode::Full));
        assert_eq!(sent[0].data.instrument_keys, vec!["A", "B"]);
        assert_eq!(ledger.tracked_snapshot().len(), 2);
        assert!(ledger.pending_snapshot().is_empty());
    }

    #[rstest]
    fn test_subscribe_while_disconnected_buffers() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::default();

        assert!(!ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc));

        assert!(sink.take().is_empty());
        assert!(ledger.tracked_snapshot().is_empty());
        assert_eq!(
            ledger.pending_snapshot().get("A"),
            Some(&SubscriptionMode::Ltpc)
        );
    }

    #[rstest]
    fn test_subscribe_empty_keys_is_noop() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        let keys: [&str; 0] = [];

        assert!(!ledger.subscribe(&sink, &keys, SubscriptionMode::Ltpc));
        assert!(sink.take().is_empty());
    }

    #[rstest]
    fn test_flush_groups_by_mode() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::default();

        ledger.subscribe(&sink, &["B", "A"], SubscriptionMode::Ltpc);
        ledger.subscribe(&sink, &["C"], SubscriptionMode::Full);
        ledger.subscribe(&sink, &["D"], SubscriptionMode::Ltpc);

        sink.set_connected(true);
        assert_eq!(ledger.flush_pending(&sink), 2);

        let sent = sink.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].data.mode, Some(SubscriptionMode::Ltpc));
        assert_eq!(sent[0].data.instrument_keys, vec!["A", "B", "D"]);
        assert_eq!(sent[1].data.mode, Some(SubscriptionMode::Full));
        assert_eq!(sent[1].data.instrument_keys, vec!["C"]);

        assert!(ledger.pending_snapshot().is_empty());
        assert_eq!(ledger.tracked_snapshot().len(), 4);

        // Second flush has nothing left
        assert_eq!(ledger.flush_pending(&sink), 0);
        assert!(sink.take().is_empty());
    }

    #[rstest]
    fn test_flush_while_disconnected_keeps_buffer() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::default();
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc);

        assert_eq!(ledger.flush_pending(&sink), 0);
        assert_eq!(ledger.pending_snapshot().len(), 1);
    }

    #[rstest]
    fn test_last_write_wins() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::default();

        ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc);
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Full);

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.mode_of("A"), Some(SubscriptionMode::Full));
    }

    #[rstest]
    fn test_key_in_one_place_while_disconnected() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc);

        sink.set_connected(false);
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Full);

        assert!(!ledger.tracked_snapshot().contains_key("A"));
        assert_eq!(
            ledger.pending_snapshot().get("A"),
            Some(&SubscriptionMode::Full)
        );
    }

    #[rstest]
    fn test_unsubscribe_removes_from_both() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc);

        sink.set_connected(false);
        ledger.subscribe(&sink, &["B"], SubscriptionMode::Full);
        assert!(!ledger.unsubscribe(&sink, &["A", "B"]));
        assert!(ledger.is_empty());

        sink.set_connected(true);
        sink.take();
        assert_eq!(ledger.restore_after_reconnect(&sink), 0);
        assert_eq!(ledger.flush_pending(&sink), 0);
        assert!(sink.take().is_empty());
    }

    #[rstest]
    fn test_unsubscribe_while_connected_sends_null_mode() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc);
        sink.take();

        assert!(ledger.unsubscribe(&sink, &["A"]));

        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, ControlMethod::Unsub);
        assert_eq!(sent[0].data.mode, None);
        assert_eq!(sent[0].data.instrument_keys, vec!["A"]);
    }

    #[rstest]
    fn test_unsubscribe_all() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        ledger.subscribe(&sink, &["B"], SubscriptionMode::Ltpc);
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Full);
        sink.take();

        assert!(ledger.unsubscribe_all(&sink));
        assert!(ledger.is_empty());

        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, ControlMethod::Unsub);
        assert_eq!(sent[0].data.instrument_keys, vec!["A", "B"]);

        // Nothing left to unsubscribe
        assert!(!ledger.unsubscribe_all(&sink));
    }

    #[rstest]
    fn test_change_mode_connected() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        ledger.subscribe(&sink, &["A", "B"], SubscriptionMode::Ltpc);
        sink.take();

        assert!(ledger.change_mode(&sink, &["A", "Z"], SubscriptionMode::Full));

        let sent = sink.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, ControlMethod::ChangeMode);
        assert_eq!(sent[0].data.mode, Some(SubscriptionMode::Full));
        assert_eq!(sent[0].data.instrument_keys, vec!["A"]);
        assert_eq!(ledger.mode_of("A"), Some(SubscriptionMode::Full));
        assert_eq!(ledger.mode_of("B"), Some(SubscriptionMode::Ltpc));
        assert_eq!(ledger.mode_of("Z"), None);
    }

    #[rstest]
    fn test_change_mode_absent_key_is_noop() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();

        assert!(!ledger.change_mode(&sink, &["A"], SubscriptionMode::Full));
        assert!(sink.take().is_empty());
        assert!(ledger.is_empty());
    }

    #[rstest]
    fn test_change_mode_disconnected_buffers_new_mode() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc);
        sink.take();

        sink.set_connected(false);
        assert!(!ledger.change_mode(&sink, &["A"], SubscriptionMode::OptionGreeks));
        assert!(ledger.tracked_snapshot().is_empty());
        assert_eq!(
            ledger.pending_snapshot().get("A"),
            Some(&SubscriptionMode::OptionGreeks)
        );

        sink.set_connected(true);
        assert_eq!(ledger.flush_pending(&sink), 1);
        let sent = sink.take();
        assert_eq!(sent[0].data.mode, Some(SubscriptionMode::OptionGreeks));
    }

    #[rstest]
    fn test_restore_groups_by_mode() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc);
        ledger.subscribe(&sink, &["B"], SubscriptionMode::Full);
        ledger.subscribe(&sink, &["C"], SubscriptionMode::Ltpc);
        sink.take();

        assert_eq!(ledger.restore_after_reconnect(&sink), 2);

        let sent = sink.take();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|msg| msg.method == ControlMethod::Sub));
        assert_eq!(sent[0].data.instrument_keys, vec!["A", "C"]);
        assert_eq!(sent[1].data.instrument_keys, vec!["B"]);
    }

    #[rstest]
    fn test_failed_send_reports_not_sent() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        sink.fail_sends.store(true, Ordering::SeqCst);

        assert!(!ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc));
        // Still tracked so it is restored after reconnect
        assert_eq!(ledger.tracked_snapshot().len(), 1);
    }

    #[rstest]
    fn test_clones_share_state() {
        let ledger = SubscriptionLedger::new();
        let clone = ledger.clone();
        let sink = RecordingSink::default();

        ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc);
        assert_eq!(clone.len(), 1);

        clone.clear();
        assert!(ledger.is_empty());
    }

    #[rstest]
    fn test_snapshot_overlays_pending() {
        let ledger = SubscriptionLedger::new();
        let sink = RecordingSink::connected();
        ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc);
        sink.set_connected(false);
        ledger.subscribe(&sink, &["B"], SubscriptionMode::Full);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("A"), Some(&SubscriptionMode::Ltpc));
        assert_eq!(snapshot.get("B"), Some(&SubscriptionMode::Full));
    }

    /// A sink whose transport opens during the first connectivity check, running the
    /// open-time flush before the caller continues.
    #[derive(Debug)]
    struct OpeningSink {
        ledger: SubscriptionLedger,
        inner: RecordingSink,
        opened: AtomicBool,
    }

    impl OpeningSink {
        fn new(ledger: &SubscriptionLedger) -> Self {
            Self {
                ledger: ledger.clone(),
                inner: RecordingSink::default(),
                opened: AtomicBool::new(false),
            }
        }
    }

    impl ControlSink for OpeningSink {
        fn is_connected(&self) -> bool {
            if !self.opened.swap(true, Ordering::SeqCst) {
                self.inner.set_connected(true);
                self.ledger.flush_pending(self);
                return false;
            }
            self.inner.is_connected()
        }

        fn send_control(&self, message: &ControlMessage) -> bool {
            self.inner.send_control(message)
        }
    }

    #[rstest]
    fn test_subscribe_racing_open_is_flushed() {
        let ledger = SubscriptionLedger::new();
        let sink = OpeningSink::new(&ledger);

        assert!(ledger.subscribe(&sink, &["A"], SubscriptionMode::Ltpc));

        let sent = sink.inner.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, ControlMethod::Sub);
        assert_eq!(sent[0].data.instrument_keys, vec!["A"]);
        assert!(ledger.pending_snapshot().is_empty());
        assert_eq!(ledger.mode_of("A"), Some(SubscriptionMode::Ltpc));
    }

    #[rstest]
    fn test_change_mode_racing_open_is_flushed() {
        let ledger = SubscriptionLedger::new();
        ledger.subscribe(&RecordingSink::connected(), &["A"], SubscriptionMode::Ltpc);
        let sink = OpeningSink::new(&ledger);

        assert!(ledger.change_mode(&sink, &["A"], SubscriptionMode::Full));

        let sent = sink.inner.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data.mode, Some(SubscriptionMode::Full));
        assert!(ledger.pending_snapshot().is_empty());
        assert_eq!(
            ledger.tracked_snapshot().get("A"),
            Some(&SubscriptionMode::Full)
        );
    }
}
