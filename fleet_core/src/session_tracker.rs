//! MQTT session tracker (C3): session id holder plus a restartable inactivity timer.

use std::time::Duration;

use thiserror::Error;

use crate::event::{EventSender, TimeoutKind};
use crate::timer::Timer;

/// The session id was empty.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("session id must not be empty")]
pub struct EmptySessionId;

/// Holds a car's current MQTT session id and its inactivity timer.
pub struct SessionTracker {
    id: String,
    timeout: Duration,
    events: EventSender,
    timer: Option<Timer>,
}

impl SessionTracker {
    /// Build a tracker with no session id yet set, using `timeout` (the
    /// configuration's `mqtt_timeout`) for the inactivity timer.
    #[must_use]
    pub fn new(timeout: Duration, events: EventSender) -> Self {
        Self {
            id: String::new(),
            timeout,
            events,
            timer: None,
        }
    }

    /// The currently installed session id, or empty if none has been set.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Install a new session id.
    ///
    /// # Errors
    /// Returns [`EmptySessionId`] if `id` is empty.
    pub fn set_id(&mut self, id: impl Into<String>) -> Result<(), EmptySessionId> {
        let id = id.into();
        if id.is_empty() {
            return Err(EmptySessionId);
        }
        log::info!("updating session id from {:?} to {:?}", self.id, id);
        self.id = id;
        Ok(())
    }

    /// Whether `id` matches the currently installed session id.
    #[must_use]
    pub fn is_valid(&self, id: &str) -> bool {
        id == self.id
    }

    /// Arm the inactivity timer if it is not already running.
    pub fn start(&mut self) {
        if self.timer.is_some() {
            log::warn!("timer already running for MQTT session {}", self.id);
            return;
        }
        self.timer = Some(Timer::start(
            self.timeout,
            TimeoutKind::Session,
            self.events.clone(),
        ));
        log::debug!("started timer for MQTT session {}", self.id);
    }

    /// Cancel the inactivity timer, if running.
    pub async fn stop(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            log::info!("stopping timer for MQTT session {}", self.id);
            timer.cancel().await;
        } else {
            log::debug!("no timer running for MQTT session {}", self.id);
        }
    }

    /// Equivalent to `stop()` followed by `start()`.
    pub async fn reset_timer(&mut self) {
        self.stop().await;
        self.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{channel, Event};

    #[tokio::test]
    async fn rejects_empty_session_id() {
        let (tx, _rx) = channel();
        let mut tracker = SessionTracker::new(Duration::from_secs(1), tx);
        assert_eq!(tracker.set_id(""), Err(EmptySessionId));
    }

    #[tokio::test]
    async fn is_valid_compares_against_installed_id() {
        let (tx, _rx) = channel();
        let mut tracker = SessionTracker::new(Duration::from_secs(1), tx);
        tracker.set_id("abc").unwrap();
        assert!(tracker.is_valid("abc"));
        assert!(!tracker.is_valid("xyz"));
    }

    #[tokio::test]
    async fn stop_cancels_timer_before_it_fires() {
        let (tx, mut rx) = channel();
        let mut tracker = SessionTracker::new(Duration::from_millis(20), tx);
        tracker.start();
        tracker.stop().await;

        let result = tokio::time::timeout(Duration::from_millis(60), rx.get()).await;
        assert!(result.is_err(), "no timeout event should have posted");
    }

    #[tokio::test]
    async fn fires_timeout_event_when_left_running() {
        let (tx, mut rx) = channel();
        let mut tracker = SessionTracker::new(Duration::from_millis(10), tx);
        tracker.start();

        let event = rx.get().await;
        assert!(matches!(
            event,
            Some(Event::TimeoutOccurred(TimeoutKind::Session))
        ));
    }
}
