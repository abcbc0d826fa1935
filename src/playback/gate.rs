use tokio::sync::Notify;

/// One-release-per-command gate for manual stepping
///
/// A release made while nobody is waiting is kept, but releases never stack:
/// two releases before the next acquire still let only one acquire through.
#[derive(Debug, Default)]
pub struct ManualGate {
    notify: Notify,
}

impl ManualGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the next (or currently waiting) manual pull through
    pub fn release(&self) {
        self.notify.notify_one();
    }

    /// Wait for a release and consume it
    ///
    /// Dropping the future after it was woken hands the release on, so a
    /// pull that gives up on the gate mid-wait does not lose it.
    pub(crate) async fn acquire(&self) {
        self.notify.notified().await;
    }
}
