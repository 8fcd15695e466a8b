//! Condition-keyed publish/subscribe
//!
//! Events are `(source, action, value)` triples. Subscribers register a
//! [`Condition`] where every part may be a wildcard; an event reaches every
//! subscriber whose condition matches any of its eight wildcard projections.

mod dispatcher;

pub use self::dispatcher::{Dispatcher, EventBus, NotifyStats};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinHandle;

/// Payload of an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventValue::Bool(v) => write!(f, "{}", v),
            EventValue::Int(v) => write!(f, "{}", v),
            EventValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for EventValue {
    fn from(v: bool) -> Self {
        EventValue::Bool(v)
    }
}

impl From<i64> for EventValue {
    fn from(v: i64) -> Self {
        EventValue::Int(v)
    }
}

impl From<u16> for EventValue {
    fn from(v: u16) -> Self {
        EventValue::Int(v as i64)
    }
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self {
        EventValue::Text(v.to_string())
    }
}

impl From<String> for EventValue {
    fn from(v: String) -> Self {
        EventValue::Text(v)
    }
}

/// Something that happened, immutable once fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Usually the device name
    pub source: String,
    pub action: String,
    pub value: Option<EventValue>,
    /// Where the triggering packet came from
    pub sender: SocketAddr,
    #[serde(serialize_with = "crate::core::serde::serialize_time")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_time")]
    pub timestamp: SystemTime,
}

impl Event {
    pub fn new(
        source: impl Into<String>,
        action: impl Into<String>,
        value: Option<EventValue>,
        sender: SocketAddr,
    ) -> Self {
        Event {
            source: source.into(),
            action: action.into(),
            value,
            sender,
            timestamp: SystemTime::now(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.action)?;
        if let Some(value) = &self.value {
            write!(f, " -> {}", value)?;
        }
        write!(f, " from {}", self.sender)
    }
}

/// Subscription key; `None` matches anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Condition {
    pub source: Option<String>,
    pub action: Option<String>,
    pub value: Option<EventValue>,
}

impl Condition {
    /// Matches every event
    pub fn any() -> Self {
        Condition::default()
    }

    /// Matches `action` events from `source` with any value
    pub fn new(source: impl Into<String>, action: impl Into<String>) -> Self {
        Condition::any().source(source).action(action)
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn value(mut self, value: impl Into<EventValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// All conditions an event matches, without duplicates
    pub fn candidates(event: &Event) -> Vec<Condition> {
        let mut out: Vec<Condition> = Vec::with_capacity(8);
        for mask in 0u8..8 {
            let condition = Condition {
                source: (mask & 0b100 == 0).then(|| event.source.clone()),
                action: (mask & 0b010 == 0).then(|| event.action.clone()),
                value: if mask & 0b001 == 0 { event.value.clone() } else { None },
            };
            if !out.contains(&condition) {
                out.push(condition);
            }
        }
        out
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |p: Option<String>| p.unwrap_or_else(|| "*".to_string());
        write!(
            f,
            "{} -> {} -> {}",
            part(self.source.clone()),
            part(self.action.clone()),
            part(self.value.as_ref().map(|v| v.to_string()))
        )
    }
}

type SyncFn = Arc<dyn Fn() + Send + Sync>;
type SyncEventFn = Arc<dyn Fn(Event) + Send + Sync>;
type AsyncFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
type AsyncEventFn = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Subscriber callback with its calling convention
///
/// Sync callbacks run on the blocking pool, async callbacks as tasks.
#[derive(Clone)]
pub enum Callback {
    Sync(SyncFn),
    SyncWithEvent(SyncEventFn),
    Async(AsyncFn),
    AsyncWithEvent(AsyncEventFn),
}

impl Callback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Callback::Sync(Arc::new(f))
    }

    pub fn sync_with_event<F>(f: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        Callback::SyncWithEvent(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Callback::Async(Arc::new(move || Box::pin(f())))
    }

    pub fn async_with_event<F, Fut>(f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Callback::AsyncWithEvent(Arc::new(move |event| Box::pin(f(event))))
    }

    /// Starts one invocation; must be called inside a runtime
    pub(crate) fn spawn(&self, event: Event) -> JoinHandle<()> {
        match self {
            Callback::Sync(f) => {
                let f = f.clone();
                tokio::task::spawn_blocking(move || f())
            }
            Callback::SyncWithEvent(f) => {
                let f = f.clone();
                tokio::task::spawn_blocking(move || f(event))
            }
            Callback::Async(f) => {
                let f = f.clone();
                tokio::spawn(async move { f().await })
            }
            Callback::AsyncWithEvent(f) => {
                let f = f.clone();
                tokio::spawn(async move { f(event).await })
            }
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Callback::Sync(_) => "Sync",
            Callback::SyncWithEvent(_) => "SyncWithEvent",
            Callback::Async(_) => "Async",
            Callback::AsyncWithEvent(_) => "AsyncWithEvent",
        };
        f.debug_tuple(kind).finish()
    }
}

/// How a subscriber is invoked
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Remove the subscription after its first invocation
    pub fire_once: bool,
    /// Start new invocations while a previous one is still running
    pub allow_parallelism: bool,
    /// Name used in log lines
    pub label: Option<String>,
}

impl SubscribeOptions {
    pub fn once() -> Self {
        SubscribeOptions {
            fire_once: true,
            ..Default::default()
        }
    }

    pub fn parallel() -> Self {
        SubscribeOptions {
            allow_parallelism: true,
            ..Default::default()
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Handle for removing a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(value: Option<EventValue>) -> Event {
        Event::new("button_1", "ButtonPressed", value, "127.0.0.1:6454".parse().unwrap())
    }

    #[test]
    fn test_candidates_with_value() {
        let candidates = Condition::candidates(&event(Some(true.into())));
        assert_eq!(candidates.len(), 8);
        assert_eq!(candidates[0], Condition::new("button_1", "ButtonPressed").value(true));
        assert_eq!(candidates[7], Condition::any());
        assert!(candidates.contains(&Condition::any().value(true)));
    }

    #[test]
    fn test_candidates_without_value_are_deduplicated() {
        let candidates = Condition::candidates(&event(None));
        assert_eq!(candidates.len(), 4);
        assert!(candidates.contains(&Condition::new("button_1", "ButtonPressed")));
        assert!(candidates.contains(&Condition::any().action("ButtonPressed")));
    }

    #[test]
    fn test_event_value_serde() {
        let values: Vec<EventValue> = serde_json::from_str(r#"[true, 42, "on"]"#).unwrap();
        assert_eq!(
            values,
            vec![EventValue::Bool(true), EventValue::Int(42), EventValue::Text("on".into())]
        );
    }

    #[test]
    fn test_event_json() {
        let mut fired = event(Some(EventValue::Int(512)));
        fired.timestamp = std::time::UNIX_EPOCH + std::time::Duration::from_secs(2);

        let json = serde_json::to_value(&fired).unwrap();
        assert_eq!(json["value"], 512);
        assert_eq!(json["sender"], "127.0.0.1:6454");
        assert_eq!(json["timestamp"], 2.0);

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, fired);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Condition::any().action("ValueRead").to_string(),
            "* -> ValueRead -> *"
        );
        assert_eq!(
            event(Some(false.into())).to_string(),
            "button_1 -> ButtonPressed -> false from 127.0.0.1:6454"
        );
    }
}
