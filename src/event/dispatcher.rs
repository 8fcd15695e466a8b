use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::core::{Error, Result};
use super::{Callback, Condition, Event, EventValue, SubscribeOptions, SubscriptionId};

enum Request {
    Publish(Event),
    Subscribe {
        id: SubscriptionId,
        condition: Condition,
        callback: Callback,
        options: SubscribeOptions,
    },
    Unsubscribe(SubscriptionId),
}

/// Front end of the dispatcher; cheap to clone and usable from any thread
///
/// Publish, subscribe and unsubscribe travel through the same FIFO queue, so
/// a subscription made before a publish always sees that event.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<Request>,
    next_id: Arc<AtomicU64>,
    /// Sender recorded on locally fired events
    local_addr: SocketAddr,
}

impl EventBus {
    /// Creates a bus and the dispatcher that must be run for it
    pub fn new(local_addr: SocketAddr) -> (EventBus, Dispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = EventBus {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
            local_addr,
        };
        (bus, Dispatcher::new(rx))
    }

    /// Fires an event originating from this process
    pub fn fire_event(
        &self,
        source: impl Into<String>,
        action: impl Into<String>,
        value: Option<EventValue>,
    ) -> Result<()> {
        self.publish(Event::new(source, action, value, self.local_addr))
    }

    /// Queues an event for dispatch
    pub fn publish(&self, event: Event) -> Result<()> {
        debug!("Firing event: {}", event);
        self.send(Request::Publish(event))
    }

    pub fn subscribe(
        &self,
        condition: Condition,
        callback: Callback,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.send(Request::Subscribe {
            id,
            condition,
            callback,
            options,
        })?;
        Ok(id)
    }

    /// Removing an unknown or already fired subscription is not an error
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.send(Request::Unsubscribe(id))
    }

    fn send(&self, request: Request) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| Error::dispatch("Event dispatcher is not running"))
    }
}

struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
    options: SubscribeOptions,
    /// Latest invocation
    task: Option<JoinHandle<()>>,
}

impl Subscriber {
    fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    fn label(&self) -> String {
        self.options
            .label
            .clone()
            .unwrap_or_else(|| format!("subscriber {}", self.id))
    }
}

/// Result of dispatching one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyStats {
    pub invoked: usize,
    /// Non-parallel subscribers still busy with a previous event
    pub skipped: usize,
}

/// Owns the subscriber registry and runs callbacks
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Request>,
    subscribers: HashMap<Condition, Vec<Subscriber>>,
    conditions: HashMap<SubscriptionId, Condition>,
}

impl Dispatcher {
    fn new(rx: mpsc::UnboundedReceiver<Request>) -> Self {
        Dispatcher {
            rx,
            subscribers: HashMap::new(),
            conditions: HashMap::new(),
        }
    }

    /// Processes requests until every [`EventBus`] is dropped
    pub async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            self.handle(request);
        }
        debug!("Event dispatcher stopped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Publish(event) => {
                self.notify_subscribers(&event);
            }
            Request::Subscribe {
                id,
                condition,
                callback,
                options,
            } => {
                trace!("Subscribing {} to {}", id, condition);
                self.conditions.insert(id, condition.clone());
                self.subscribers.entry(condition).or_default().push(Subscriber {
                    id,
                    callback,
                    options,
                    task: None,
                });
            }
            Request::Unsubscribe(id) => self.remove(id),
        }
    }

    fn remove(&mut self, id: SubscriptionId) {
        let Some(condition) = self.conditions.remove(&id) else {
            return;
        };
        if let Some(list) = self.subscribers.get_mut(&condition) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                self.subscribers.remove(&condition);
            }
        }
    }

    /// Starts every matching subscriber for `event`
    pub fn notify_subscribers(&mut self, event: &Event) -> NotifyStats {
        let mut stats = NotifyStats::default();
        let mut fired_once = Vec::new();

        for condition in Condition::candidates(event) {
            let Some(list) = self.subscribers.get_mut(&condition) else {
                continue;
            };

            for subscriber in list.iter_mut() {
                if !subscriber.options.allow_parallelism && subscriber.is_running() {
                    info!("Skipping {}: still running", subscriber.label());
                    stats.skipped += 1;
                    continue;
                }

                debug!("Event {} received by {}", event, subscriber.label());
                subscriber.task = Some(subscriber.callback.spawn(event.clone()));
                stats.invoked += 1;

                if subscriber.options.fire_once {
                    fired_once.push(subscriber.id);
                }
            }
        }

        for id in fired_once {
            self.remove(id);
        }
        stats
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.conditions.len()
    }
}
