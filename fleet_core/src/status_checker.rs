//! Status checker (C4): orders incoming statuses by monotonic counter and
//! tracks skipped values with per-gap timers.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use fleet_protocol::ExternalClient;

use crate::event::{EventSender, TimeoutKind};
use crate::timer::Timer;

/// The counter value a fresh checker expects before any status has reset it.
pub const DEFAULT_INIT_COUNTER: u32 = 1;

struct QueuedStatus {
    counter: u32,
    status: ExternalClient,
}

/// Orders incoming `Status` messages by their monotonic counter, dropping
/// stale duplicates and arming a timer for every gap in the sequence.
pub struct StatusChecker {
    timeout: Duration,
    events: EventSender,
    expected_counter: u32,
    received: BinaryHeap<Reverse<u32>>,
    received_bodies: Vec<QueuedStatus>,
    skipped: Vec<(u32, Timer)>,
    checked: VecDeque<ExternalClient>,
    allow_reset: bool,
}

impl StatusChecker {
    /// Build a checker that posts `TimeoutOccurred(Status)` after `timeout`
    /// elapses for any gap in the counter sequence.
    #[must_use]
    pub fn new(timeout: Duration, events: EventSender) -> Self {
        Self {
            timeout,
            events,
            expected_counter: DEFAULT_INIT_COUNTER,
            received: BinaryHeap::new(),
            received_bodies: Vec::new(),
            skipped: Vec::new(),
            checked: VecDeque::new(),
            allow_reset: true,
        }
    }

    /// Initialize `expected_counter` to `counter`, unless a status has
    /// already been observed (in which case this is a no-op).
    pub fn set_counter(&mut self, counter: u32) {
        if self.received.is_empty() && self.checked.is_empty() {
            self.expected_counter = counter;
            self.allow_reset = false;
        }
    }

    /// Permit the next `check` call to adopt its status's counter as the new
    /// `expected_counter`, one time only.
    pub fn allow_counter_reset(&mut self) {
        self.allow_reset = true;
    }

    /// The current expected counter value.
    #[must_use]
    pub fn expected_counter(&self) -> u32 {
        self.expected_counter
    }

    /// Check `status`'s counter and, if it advances the checked sequence,
    /// make the resulting run of statuses available via [`Self::get`].
    pub async fn check(&mut self, status: ExternalClient, counter: u32) {
        if counter < self.expected_counter {
            log::warn!(
                "status with counter {counter} smaller than expected value {} is ignored",
                self.expected_counter
            );
            return;
        }

        if self.allow_reset {
            self.expected_counter = counter;
            self.allow_reset = false;
        }

        self.received.push(Reverse(counter));
        self.received_bodies.push(QueuedStatus { counter, status });

        if counter == self.expected_counter {
            while self.received.peek() == Some(&Reverse(self.expected_counter)) {
                self.remove_oldest_skipped_and_stop_its_timer().await;
                self.received.pop();
                let idx = self
                    .received_bodies
                    .iter()
                    .position(|q| q.counter == self.expected_counter)
                    .expect("counter present in received_bodies");
                let oldest = self.received_bodies.remove(idx);
                self.checked.push_back(oldest.status);
                self.expected_counter += 1;
            }
        } else {
            self.store_skipped_counter_values(counter);
        }
    }

    /// Return the next checked status in order, if any.
    pub fn get(&mut self) -> Option<ExternalClient> {
        self.checked.pop_front()
    }

    /// The counters currently believed missing, in ascending order.
    #[must_use]
    pub fn skipped_counters(&self) -> Vec<u32> {
        let mut counters: Vec<u32> = self.skipped.iter().map(|(c, _)| *c).collect();
        counters.sort_unstable();
        counters
    }

    /// Clear all state, cancel every skipped-counter timer, and reset
    /// `expected_counter` to its default.
    pub async fn reset(&mut self) {
        self.clear_skipped_counters().await;
        self.received.clear();
        self.received_bodies.clear();
        self.checked.clear();
        self.expected_counter = DEFAULT_INIT_COUNTER;
    }

    async fn clear_skipped_counters(&mut self) {
        for (_, mut timer) in self.skipped.drain(..) {
            timer.cancel().await;
        }
    }

    async fn remove_oldest_skipped_and_stop_its_timer(&mut self) {
        if let Some((counter, _)) = self.skipped.first() {
            if *counter <= self.expected_counter {
                let (_, mut timer) = self.skipped.remove(0);
                timer.cancel().await;
            }
        }
    }

    fn store_skipped_counter_values(&mut self, status_counter: u32) {
        if let Some((last, _)) = self.skipped.last() {
            if status_counter <= *last {
                return;
            }
        }
        for c in self.expected_counter..status_counter {
            let already_skipped = self.skipped.last().is_some_and(|(last, _)| c <= *last);
            if !already_skipped {
                self.store_skipped_counter_and_start_timer(c);
            }
        }
    }

    fn store_skipped_counter_and_start_timer(&mut self, counter: u32) {
        let timer = Timer::start(self.timeout, TimeoutKind::Status, self.events.clone());
        self.skipped.push((counter, timer));
        log::warn!("status with counter {counter} is missing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::channel;
    use fleet_protocol::{Device, DeviceState};

    fn status(counter: u32) -> ExternalClient {
        ExternalClient::Status {
            session_id: "s".into(),
            device_state: DeviceState::Running,
            message_counter: counter,
            device_status: fleet_protocol::messages::DeviceStatus {
                device: Device::new(1, 1, "role"),
                status_data: vec![],
            },
            error_message: None,
        }
    }

    #[tokio::test]
    async fn in_order_statuses_become_immediately_checkable() {
        let (tx, _rx) = channel();
        let mut checker = StatusChecker::new(Duration::from_secs(5), tx);
        checker.set_counter(1);
        checker.check(status(1), 1).await;
        assert!(checker.get().is_some());
        assert!(checker.get().is_none());
    }

    #[tokio::test]
    async fn out_of_order_statuses_wait_for_the_gap_to_fill() {
        let (tx, _rx) = channel();
        let mut checker = StatusChecker::new(Duration::from_secs(5), tx);
        checker.set_counter(1);

        checker.check(status(3), 3).await;
        assert!(checker.get().is_none());
        assert_eq!(checker.skipped_counters(), vec![1, 2]);

        checker.check(status(1), 1).await;
        assert!(checker.get().is_some());
        assert!(checker.get().is_none());
        assert_eq!(checker.skipped_counters(), vec![2]);

        checker.check(status(2), 2).await;
        assert!(checker.get().is_some());
        assert!(checker.get().is_some());
        assert!(checker.skipped_counters().is_empty());
    }

    #[tokio::test]
    async fn counters_below_expected_are_dropped() {
        let (tx, _rx) = channel();
        let mut checker = StatusChecker::new(Duration::from_secs(5), tx);
        checker.set_counter(5);
        checker.check(status(2), 2).await;
        assert!(checker.get().is_none());
    }

    #[tokio::test]
    async fn allow_counter_reset_adopts_first_counter_once() {
        let (tx, _rx) = channel();
        let mut checker = StatusChecker::new(Duration::from_secs(5), tx);
        checker.check(status(41), 41).await;
        assert!(checker.get().is_some());
        assert_eq!(checker.expected_counter(), 42);

        checker.check(status(100), 100).await;
        assert!(checker.get().is_none());
        assert_eq!(checker.expected_counter(), 42);
    }

    #[tokio::test]
    async fn reset_restores_default_counter_and_clears_state() {
        let (tx, _rx) = channel();
        let mut checker = StatusChecker::new(Duration::from_secs(5), tx);
        checker.set_counter(10);
        checker.check(status(12), 12).await;
        checker.reset().await;
        assert_eq!(checker.expected_counter(), DEFAULT_INIT_COUNTER);
        assert!(checker.skipped_counters().is_empty());
    }
}
