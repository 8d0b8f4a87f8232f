//! Process-wide shutdown signalling.

use tokio::sync::broadcast;

/// Broadcasts a shutdown signal to all active tasks.
///
/// Any task that hits a fatal condition fires the bus; the first sender wins
/// and later sends are dropped. Each long-lived task holds a [`Shutdown`]
/// receiver, reaches a safe terminal state on receipt, and completes.
#[derive(Debug, Clone)]
pub struct ShutdownBus {
    notify: broadcast::Sender<()>,
}

impl ShutdownBus {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self { notify }
    }

    /// Sends a shutdown signal to all subscribed tasks. Non-blocking; a send
    /// with no live receivers is silently dropped.
    pub fn fire(&self) {
        let _ = self.notify.send(());
    }

    /// Returns a receiver handle for the shutdown signal.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown::new(self.notify.subscribe())
    }
}

impl Default for ShutdownBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Listens for the shutdown signal.
///
/// Only a single value is ever sent. The `Shutdown` struct tracks that the
/// signal has been received, so `recv` returns immediately on every call
/// after the first.
#[derive(Debug)]
pub struct Shutdown {
    shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Self {
        Self {
            shutdown: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        if self.shutdown {
            return;
        }
        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;
        self.shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_sender_wins_and_recv_is_sticky() {
        let bus = ShutdownBus::new();
        let mut rx = bus.subscribe();
        bus.fire();
        bus.fire();
        bus.fire();
        rx.recv().await;
        // sticky: completes again without a new send.
        rx.recv().await;
    }

    #[tokio::test]
    async fn fire_without_receivers_does_not_block() {
        let bus = ShutdownBus::new();
        bus.fire();
        let mut rx = bus.subscribe();
        bus.fire();
        rx.recv().await;
    }
}
