//! Explicit publish / subscribe for change notifications.
//!
//! Subscribers are invoked synchronously in subscription order. A subscriber may subscribe or
//! unsubscribe (itself or others) while being notified, the set of subscribers notified is fixed
//! when [`Notifier::notify`] is called.

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use derive_more::Display;

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("subscription {_0}")]
pub struct SubscriptionId(u64);

type Subscriber<E> = Rc<dyn Fn(&E)>;

pub struct Notifier<E> {
    next_id: Cell<u64>,
    subscribers: RefCell<Vec<(SubscriptionId, Subscriber<E>)>>,
}

impl<E> fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscribers.borrow().len())
            .finish()
    }
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self {
            next_id: Cell::new(0),
            subscribers: RefCell::new(Vec::new()),
        }
    }
}

impl<E> Notifier<E> {
    pub fn subscribe(&self, subscriber: impl Fn(&E) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers
            .borrow_mut()
            .push((id, Rc::new(subscriber)));
        id
    }

    /// Returns `false` if the subscription was not active.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let len_before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != len_before
    }

    pub fn notify(&self, event: &E) {
        let subscribers: Vec<Subscriber<E>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        for subscriber in subscribers {
            subscriber(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}
