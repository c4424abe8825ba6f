//! Outstanding-command tracker (C5): a FIFO of published commands awaiting
//! acknowledgement, each with its own response timer.

use std::collections::VecDeque;
use std::time::Duration;

use fleet_protocol::{Device, HandledCommand};

use crate::event::{EventSender, TimeoutKind};
use crate::timer::Timer;

struct QueuedCommand {
    command: HandledCommand,
    counter: u32,
    timer: Timer,
}

/// Tracks commands published to a car that have not yet been acknowledged
/// by a `CommandResponse`.
pub struct CommandTracker {
    timeout: Duration,
    events: EventSender,
    queue: VecDeque<QueuedCommand>,
    missed_acks: Vec<u32>,
    next_counter: u32,
}

impl CommandTracker {
    /// Build a tracker that posts `TimeoutOccurred(CommandResponse)` after
    /// `timeout` elapses without an acknowledgement for a given command.
    #[must_use]
    pub fn new(timeout: Duration, events: EventSender) -> Self {
        Self {
            timeout,
            events,
            queue: VecDeque::new(),
            missed_acks: Vec::new(),
            next_counter: 0,
        }
    }

    /// Assign `cmd.counter` from the per-car monotonic counter, arm its
    /// response timer, and enqueue it. Returns the assigned counter.
    pub fn add(&mut self, mut cmd: HandledCommand) -> u32 {
        let counter = self.next_counter;
        self.next_counter += 1;
        cmd.assign_counter(counter);
        let timer = Timer::start(self.timeout, TimeoutKind::CommandResponse, self.events.clone());
        self.queue.push_back(QueuedCommand {
            command: cmd,
            counter,
            timer,
        });
        counter
    }

    /// Acknowledge the command with `response_counter`.
    ///
    /// If the queue is empty or its head's counter doesn't match, the
    /// counter is recorded as a missed ack and an empty list is returned.
    /// Otherwise the head is dequeued along with every already-missed
    /// counter that has since become the new head, in dequeue order.
    pub async fn pop(&mut self, response_counter: u32) -> Vec<HandledCommand> {
        let head_matches = self
            .queue
            .front()
            .is_some_and(|q| q.counter == response_counter);
        if !head_matches {
            self.missed_acks.push(response_counter);
            log::warn!("command response received in wrong order, counter={response_counter}");
            return Vec::new();
        }

        let mut popped = Vec::new();
        let head = self.queue.pop_front().expect("checked non-empty above");
        popped.push(self.finish(head).await);
        log::info!(
            "received command response was acknowledged, counter={response_counter}"
        );

        while !self.missed_acks.is_empty() {
            let Some(counter) = self.queue.front().map(|q| q.counter) else {
                break;
            };
            if let Some(pos) = self.missed_acks.iter().position(|c| *c == counter) {
                let queued = self.queue.pop_front().expect("front checked above");
                popped.push(self.finish(queued).await);
                self.missed_acks.remove(pos);
                log::info!("older command response acknowledged, counter={counter}");
            } else {
                break;
            }
        }

        popped
    }

    async fn finish(&self, mut queued: QueuedCommand) -> HandledCommand {
        queued.timer.cancel().await;
        queued.command
    }

    /// Find the device targeted by the outstanding command with `counter`,
    /// if tracked (used for `DEVICE_NOT_CONNECTED` responses).
    #[must_use]
    pub fn command_device(&self, counter: u32) -> Option<&Device> {
        self.queue
            .iter()
            .find(|q| q.counter == counter)
            .map(|q| &q.command.device)
    }

    /// Cancel every timer and empty both the queue and the missed-ack list.
    pub async fn reset(&mut self) {
        while let Some(mut queued) = self.queue.pop_front() {
            queued.timer.cancel().await;
        }
        self.missed_acks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::channel;

    fn command() -> HandledCommand {
        HandledCommand::from_plugin(vec![1, 2, 3], Device::new(1, 1, "role"))
    }

    #[tokio::test]
    async fn pop_in_order_returns_single_command() {
        let (tx, _rx) = channel();
        let mut tracker = CommandTracker::new(Duration::from_secs(5), tx);
        tracker.add(command());
        let popped = tracker.pop(0).await;
        assert_eq!(popped.len(), 1);
    }

    #[tokio::test]
    async fn pop_out_of_order_returns_empty_then_drains_on_catch_up() {
        let (tx, _rx) = channel();
        let mut tracker = CommandTracker::new(Duration::from_secs(5), tx);
        tracker.add(command());
        tracker.add(command());
        tracker.add(command());

        assert!(tracker.pop(1).await.is_empty());
        assert!(tracker.pop(2).await.is_empty());

        let popped = tracker.pop(0).await;
        assert_eq!(popped.len(), 3);
    }

    #[tokio::test]
    async fn command_device_finds_outstanding_entry() {
        let (tx, _rx) = channel();
        let mut tracker = CommandTracker::new(Duration::from_secs(5), tx);
        let counter = tracker.add(command());
        assert!(tracker.command_device(counter).is_some());
        assert!(tracker.command_device(counter + 1).is_none());
    }

    #[tokio::test]
    async fn reset_clears_queue_and_missed_acks() {
        let (tx, _rx) = channel();
        let mut tracker = CommandTracker::new(Duration::from_secs(5), tx);
        tracker.add(command());
        tracker.pop(5).await;
        tracker.reset().await;
        assert!(tracker.pop(0).await.is_empty());
    }
}
