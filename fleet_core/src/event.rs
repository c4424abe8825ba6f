//! Event queue (C1): single-consumer FIFO of typed events driving a car's event loop.

use tokio::sync::mpsc;

/// The kind of timeout that fired, carried on a [`TimeoutOccurred`] event.
///
/// [`TimeoutOccurred`]: Event::TimeoutOccurred
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeoutKind {
    /// The MQTT session's inactivity timer fired.
    Session,
    /// A status checker gap timer fired.
    Status,
    /// An outstanding command's response timer fired.
    CommandResponse,
}

/// An event posted onto a car's event queue.
#[derive(Clone, Debug)]
pub enum Event {
    /// A new message is available on the MQTT adapter's incoming FIFO.
    CarMessageAvailable,
    /// A module's command poller has new commands available.
    CommandAvailable(u32),
    /// The MQTT transport reported an unexpected disconnect.
    MqttDisconnected,
    /// A timer of the given kind expired.
    TimeoutOccurred(TimeoutKind),
    /// The car server was asked to stop.
    ServerStopped,
}

/// The producing half of a car's event queue. Cloneable; every adapter
/// callback, module poller and timer holds its own clone.
#[derive(Clone)]
pub struct EventSender(mpsc::Sender<Event>);

/// The sole-consumer half of a car's event queue.
pub struct EventReceiver(mpsc::Receiver<Event>);

/// The capacity mandated for a car's event queue. Chosen generously above
/// the number of concurrently in-flight producers; a full queue indicates
/// the event loop is not keeping up rather than a normal backpressure case.
pub const QUEUE_CAPACITY: usize = 256;

/// Build a new bounded, multi-producer single-consumer event queue.
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (EventSender(tx), EventReceiver(rx))
}

impl EventSender {
    /// Post an event, waiting if the queue is momentarily full.
    ///
    /// Returns `false` if the receiving car server has already shut down
    /// and dropped its receiver; callers should treat this as a no-op.
    pub async fn post(&self, event: Event) -> bool {
        self.0.send(event).await.is_ok()
    }
}

impl EventReceiver {
    /// Block until the next event arrives, or return `None` once every
    /// [`EventSender`] has been dropped.
    pub async fn get(&mut self) -> Option<Event> {
        self.0.recv().await
    }

    /// Drain every currently queued event without otherwise consuming them
    /// (i.e. no handler runs for the drained events).
    pub fn clear(&mut self) {
        while self.0.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_events_in_fifo_order() {
        let (tx, mut rx) = channel();
        tx.post(Event::CarMessageAvailable).await;
        tx.post(Event::MqttDisconnected).await;

        assert!(matches!(rx.get().await, Some(Event::CarMessageAvailable)));
        assert!(matches!(rx.get().await, Some(Event::MqttDisconnected)));
    }

    #[tokio::test]
    async fn clear_drains_without_returning_events() {
        let (tx, mut rx) = channel();
        tx.post(Event::CarMessageAvailable).await;
        tx.post(Event::CarMessageAvailable).await;
        rx.clear();

        tx.post(Event::ServerStopped).await;
        assert!(matches!(rx.get().await, Some(Event::ServerStopped)));
    }

    #[tokio::test]
    async fn get_returns_none_once_every_sender_dropped() {
        let (tx, mut rx) = channel();
        drop(tx);
        assert!(rx.get().await.is_none());
    }
}
