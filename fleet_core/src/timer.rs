//! Timeout timer (C2): a one-shot timer that posts a `TimeoutOccurred` event
//! of a labelled kind, with synchronous cancel-with-join semantics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventSender, TimeoutKind};

/// A one-shot timer. `cancel` synchronously guarantees the callback will not
/// fire afterward — the system tolerates a callback that has already fired
/// before `cancel` runs; in that case the event is already queued and is
/// handled normally by dispatch.
pub struct Timer {
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    observed: Arc<AtomicBool>,
}

impl Timer {
    /// Start a timer that, after `duration` elapses uncancelled, posts
    /// `TimeoutOccurred(kind)` onto `events` and sets the "timeout observed" flag.
    #[must_use]
    pub fn start(duration: Duration, kind: TimeoutKind, events: EventSender) -> Self {
        let cancel_token = CancellationToken::new();
        let observed = Arc::new(AtomicBool::new(false));
        let task_token = cancel_token.clone();
        let task_observed = observed.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => {}
                () = tokio::time::sleep(duration) => {
                    task_observed.store(true, Ordering::SeqCst);
                    events.post(Event::TimeoutOccurred(kind)).await;
                }
            }
        });

        Self {
            cancel_token,
            handle: Some(handle),
            observed,
        }
    }

    /// Cancel the timer and wait for its callback task to finish, guaranteeing
    /// it will not fire after this call returns (it may have already fired).
    pub async fn cancel(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the timer's callback has fired (i.e. it elapsed uncancelled).
    #[must_use]
    pub fn observed(&self) -> bool {
        self.observed.load(Ordering::SeqCst)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::channel;

    #[tokio::test]
    async fn posts_timeout_event_after_duration() {
        let (tx, mut rx) = channel();
        let _timer = Timer::start(Duration::from_millis(10), TimeoutKind::Status, tx);
        let event = rx.get().await;
        assert!(matches!(
            event,
            Some(Event::TimeoutOccurred(TimeoutKind::Status))
        ));
    }

    #[tokio::test]
    async fn cancel_prevents_the_event_from_firing() {
        let (tx, mut rx) = channel();
        let mut timer = Timer::start(Duration::from_millis(50), TimeoutKind::Session, tx);
        timer.cancel().await;
        assert!(!timer.observed());

        let result =
            tokio::time::timeout(Duration::from_millis(100), rx.get()).await;
        assert!(result.is_err(), "no event should have been posted");
    }
}
