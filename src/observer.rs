use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

/// Registered callbacks for one notification category.
///
/// `notify` runs every observer behind `catch_unwind`, so a panicking
/// observer is logged and skipped instead of unwinding into the ingestion
/// loop or the dispatch path.
pub struct ObserverList<T: ?Sized> {
    name: &'static str,
    observers: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> ObserverList<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, observer: Arc<T>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke `call` once per observer; returns how many observers panicked.
    pub fn notify(&self, call: impl Fn(&T)) -> usize {
        // Clone the list so observers may register further observers
        let observers: Vec<Arc<T>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut panicked = 0;
        for observer in &observers {
            if catch_unwind(AssertUnwindSafe(|| call(observer.as_ref()))).is_err() {
                panicked += 1;
                warn!(observers = self.name, "Observer panicked, ignoring");
            }
        }
        panicked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Counter = dyn Fn(usize) + Send + Sync;

    #[test]
    fn test_notify_calls_every_observer() {
        let list: ObserverList<Counter> = ObserverList::new("test");
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = Arc::clone(&total);
            list.register(Arc::new(move |n: usize| {
                total.fetch_add(n, Ordering::SeqCst);
            }));
        }

        assert_eq!(list.notify(|observer| observer(2)), 0);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let list: ObserverList<Counter> = ObserverList::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        list.register(Arc::new(|_: usize| panic!("observer failure")));
        {
            let calls = Arc::clone(&calls);
            list.register(Arc::new(move |_: usize| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(list.notify(|observer| observer(1)), 1);
        // The observer after the panicking one still ran
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_list() {
        let list: ObserverList<Counter> = ObserverList::new("test");
        assert!(list.is_empty());
        assert_eq!(list.notify(|observer| observer(1)), 0);
    }
}
