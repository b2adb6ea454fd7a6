use crate::state::{ErrorEntry, Progress, SessionMetrics};
use crate::status::SessionStatus;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Event fired by a session mutation. Dispatch is synchronous, in
/// subscription order, on the same execution context as the mutation.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    ProgressUpdated(Progress),
    ErrorAdded(ErrorEntry),
    MetricsUpdated(SessionMetrics),
    Reset,
    Restored,
}

/// Which events a subscription wants. `All` is the `'*'` subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    StatusChanged,
    ProgressUpdated,
    ErrorAdded,
    MetricsUpdated,
    Reset,
    Restored,
}

impl EventFilter {
    #[must_use]
    pub fn matches(self, event: &SessionEvent) -> bool {
        match (self, event) {
            (EventFilter::All, _)
            | (EventFilter::StatusChanged, SessionEvent::StatusChanged { .. })
            | (EventFilter::ProgressUpdated, SessionEvent::ProgressUpdated(_))
            | (EventFilter::ErrorAdded, SessionEvent::ErrorAdded(_))
            | (EventFilter::MetricsUpdated, SessionEvent::MetricsUpdated(_))
            | (EventFilter::Reset, SessionEvent::Reset)
            | (EventFilter::Restored, SessionEvent::Restored) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, Default)]
pub struct ObserverConfig {
    /// Drop a subscription after its callback panics. Off by default: a
    /// panicking observer is logged and isolated but keeps its slot.
    pub remove_on_panic: bool,
}

type Callback = Box<dyn Fn(&SessionEvent) + Send>;

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    callback: Callback,
}

/// Registry of session observers with isolated synchronous dispatch.
pub(crate) struct ObserverRegistry {
    subscriptions: Vec<Subscription>,
    next_id: u64,
    config: ObserverConfig,
}

impl ObserverRegistry {
    pub(crate) fn new(config: ObserverConfig) -> Self {
        Self {
            subscriptions: Vec::new(),
            next_id: 0,
            config,
        }
    }

    pub(crate) fn config(&self) -> ObserverConfig {
        self.config
    }

    pub(crate) fn subscribe(
        &mut self,
        filter: EventFilter,
        callback: impl Fn(&SessionEvent) + Send + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            filter,
            callback: Box::new(callback),
        });
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    /// Notify matching subscribers in subscription order. A panicking
    /// callback is isolated and logged; it does not abort the mutating call.
    pub(crate) fn notify(&mut self, event: &SessionEvent) {
        let mut panicked: Vec<SubscriptionId> = Vec::new();
        for sub in &self.subscriptions {
            if !sub.filter.matches(event) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| (sub.callback)(event))).is_err() {
                log::warn!("session observer {:?} panicked during {event:?}", sub.id);
                if self.config.remove_on_panic {
                    panicked.push(sub.id);
                }
            }
        }
        for id in panicked {
            self.unsubscribe(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }
}
