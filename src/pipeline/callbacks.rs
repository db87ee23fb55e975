//! Ordered subscriber list with removal by token

use std::fmt;

/// Token returned by [`CallbackRegistry::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler<T> = Box<dyn FnMut(T) + Send>;

/// Handlers run synchronously in registration order. Each receives its own
/// clone of the value and may keep it.
pub struct CallbackRegistry<T> {
    handlers: Vec<(SubscriptionId, Handler<T>)>,
    next_id: u64,
}

impl<T> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T: Clone> CallbackRegistry<T> {
    pub fn add<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(T) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(sub, _)| *sub != id);
        self.handlers.len() != before
    }

    pub fn call(&mut self, value: &T) {
        for (_, handler) in &mut self.handlers {
            handler(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<T> fmt::Debug for CallbackRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::<u32>::default();
        for name in ["A", "B", "C"] {
            let log = Arc::clone(&log);
            registry.add(move |v| log.lock().unwrap().push(format!("{name}{v}")));
        }

        registry.call(&1);
        registry.call(&2);
        assert_eq!(
            *log.lock().unwrap(),
            ["A1", "B1", "C1", "A2", "B2", "C2"]
        );
    }

    #[test]
    fn removed_handler_is_not_called() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::<()>::default();
        let ids: Vec<_> = (0..3)
            .map(|i| {
                let hits = Arc::clone(&hits);
                registry.add(move |_| hits.lock().unwrap().push(i))
            })
            .collect();

        assert!(registry.remove(ids[1]));
        assert!(!registry.remove(ids[1]));
        registry.call(&());

        assert_eq!(*hits.lock().unwrap(), [0, 2]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn ids_are_not_reused() {
        let mut registry = CallbackRegistry::<()>::default();
        let a = registry.add(|_| {});
        registry.remove(a);
        let b = registry.add(|_| {});
        assert_ne!(a, b);
    }
}
