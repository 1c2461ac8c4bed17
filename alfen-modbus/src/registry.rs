use std::fmt;
use std::sync::Arc;

use crate::snapshot::Snapshot;

/// Notification callback, invoked with the snapshot of the cycle that triggered it.
pub type Callback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Update subscribers, notified after every successful cycle, and refresh subscribers,
/// notified when a max-current setpoint is about to expire. Both in registration order.
#[derive(Default)]
pub struct Registry {
    next_id: u64,
    update: Vec<(SubscriptionId, Callback)>,
    refresh: Vec<(SubscriptionId, Callback)>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("update", &self.update.len())
            .field("refresh", &self.refresh.len())
            .finish()
    }
}

impl Registry {
    /// Register callbacks; the flag tells whether this is the first subscriber.
    pub fn subscribe(
        &mut self,
        on_update: Callback,
        on_refresh: Option<Callback>,
    ) -> (SubscriptionId, bool) {
        let first = self.update.is_empty();
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        self.update.push((id, on_update));
        if let Some(on_refresh) = on_refresh {
            self.refresh.push((id, on_refresh));
        }
        (id, first)
    }

    /// Remove both callbacks of `id`. `None` if unknown, otherwise whether the registry is now empty.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<bool> {
        let position = self.update.iter().position(|(entry, _)| *entry == id)?;
        self.update.remove(position);
        self.refresh.retain(|(entry, _)| *entry != id);
        Some(self.update.is_empty())
    }

    pub fn len(&self) -> usize {
        self.update.len()
    }

    pub fn is_empty(&self) -> bool {
        self.update.is_empty()
    }

    pub fn update_callbacks(&self) -> Vec<Callback> {
        self.update.iter().map(|(_, callback)| callback.clone()).collect()
    }

    pub fn refresh_callbacks(&self) -> Vec<Callback> {
        self.refresh.iter().map(|(_, callback)| callback.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Callback {
        let log = log.clone();
        Arc::new(move |_: &Snapshot| log.lock().push(label))
    }

    #[test]
    fn test_first_and_last_subscriber() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = Registry::default();

        let (a, first) = registry.subscribe(recorder(&log, "a"), None);
        assert!(first);
        let (b, first) = registry.subscribe(recorder(&log, "b"), Some(recorder(&log, "b-refresh")));
        assert!(!first);
        assert_ne!(a, b);

        assert_eq!(registry.unsubscribe(a), Some(false));
        assert_eq!(registry.unsubscribe(a), None);
        assert_eq!(registry.refresh_callbacks().len(), 1);
        assert_eq!(registry.unsubscribe(b), Some(true));
        assert!(registry.is_empty());
        assert!(registry.refresh_callbacks().is_empty());
    }

    #[test]
    fn test_notification_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = Registry::default();
        registry.subscribe(recorder(&log, "first"), Some(recorder(&log, "refresh-1")));
        registry.subscribe(recorder(&log, "second"), None);
        registry.subscribe(recorder(&log, "third"), Some(recorder(&log, "refresh-3")));

        let snapshot = Snapshot::default();
        for callback in registry.update_callbacks() {
            callback(&snapshot);
        }
        for callback in registry.refresh_callbacks() {
            callback(&snapshot);
        }
        assert_eq!(
            *log.lock(),
            ["first", "second", "third", "refresh-1", "refresh-3"]
        );
    }
}
