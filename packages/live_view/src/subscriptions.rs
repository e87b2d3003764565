//! Ownership of the range subscriptions behind one live view.

use animal_watch_geohash::GeoHashRange;
use animal_watch_store::SubscriptionHandle;
use tokio::task::JoinHandle;

/// A running range subscription and the task forwarding its batches.
#[derive(Debug)]
pub struct ActiveSubscription {
    /// Subscribed hash range.
    pub range: GeoHashRange,
    /// Store-side cancellation handle.
    pub handle: SubscriptionHandle,
    /// Forwarding task.
    pub task: JoinHandle<()>,
}

impl ActiveSubscription {
    fn cancel(self) {
        self.handle.cancel();
        self.task.abort();
    }
}

/// The current generation of subscriptions, tagged with its epoch.
///
/// Replacing or dropping the manager cancels every subscription it holds.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    epoch: u64,
    active: Vec<ActiveSubscription>,
}

impl SubscriptionManager {
    /// Epoch of the installed generation.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no subscription is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Ranges of the live subscriptions.
    #[must_use]
    pub fn ranges(&self) -> Vec<GeoHashRange> {
        self.active.iter().map(|s| s.range.clone()).collect()
    }

    /// Cancels the current generation and installs `next` as `epoch`.
    pub fn replace(&mut self, epoch: u64, next: Vec<ActiveSubscription>) {
        let previous = std::mem::replace(&mut self.active, next);
        if !previous.is_empty() {
            log::debug!(
                "Cancelling {} subscription(s) of epoch {}",
                previous.len(),
                self.epoch
            );
        }
        for subscription in previous {
            subscription.cancel();
        }
        self.epoch = epoch;
    }

    /// Cancels every subscription.
    pub fn cancel_all(&mut self) {
        for subscription in self.active.drain(..) {
            subscription.cancel();
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(range: &str) -> (ActiveSubscription, SubscriptionHandle) {
        let handle = SubscriptionHandle::new();
        let task = tokio::spawn(std::future::pending::<()>());
        (
            ActiveSubscription {
                range: GeoHashRange::new(range, format!("{range}~")),
                handle: handle.clone(),
                task,
            },
            handle,
        )
    }

    #[tokio::test]
    async fn replace_cancels_previous_generation() {
        let mut manager = SubscriptionManager::default();
        let (first, first_handle) = subscription("u");
        manager.replace(1, vec![first]);
        assert_eq!(manager.epoch(), 1);
        assert_eq!(manager.len(), 1);

        let (second, second_handle) = subscription("v");
        manager.replace(2, vec![second]);
        assert!(first_handle.is_cancelled());
        assert!(!second_handle.is_cancelled());
        assert_eq!(manager.epoch(), 2);
        assert_eq!(manager.ranges()[0].start, "v");
    }

    #[tokio::test]
    async fn dropping_manager_cancels_everything() {
        let (sub, handle) = subscription("u");
        {
            let mut manager = SubscriptionManager::default();
            manager.replace(1, vec![sub]);
        }
        assert!(handle.is_cancelled());
    }
}
