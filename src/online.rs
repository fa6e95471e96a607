use tokio::sync::watch;

/// Source of connectivity-restored signals.
///
/// Subscribers watch a bumped counter; every increment means the detector
/// observed the network coming back. How connectivity is sensed (browser
/// events, socket probes, user action) is the host's business.
pub trait OnlineDetector: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<u64>;

    fn notify_online(&self);

    fn dispose(&self);
}

/// Detector driven entirely by explicit [`notify_online`] calls. The
/// default when the host wires no platform detector.
///
/// [`notify_online`]: OnlineDetector::notify_online
#[derive(Debug)]
pub struct ManualOnlineDetector {
    signal: watch::Sender<u64>,
}

impl Default for ManualOnlineDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualOnlineDetector {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(0);
        Self { signal }
    }
}

impl OnlineDetector for ManualOnlineDetector {
    fn subscribe(&self) -> watch::Receiver<u64> {
        self.signal.subscribe()
    }

    fn notify_online(&self) {
        self.signal.send_modify(|generation| *generation += 1);
    }

    fn dispose(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notifications_reach_subscribers() {
        let detector = ManualOnlineDetector::new();
        let mut rx = detector.subscribe();
        assert_eq!(*rx.borrow(), 0);

        detector.notify_online();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        detector.notify_online();
        detector.notify_online();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 3);
    }
}
