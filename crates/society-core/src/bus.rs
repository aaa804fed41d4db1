//! Topic-routed, priority-ordered event bus.
//!
//! Publishing is synchronous: the event is queued for dispatch and appended
//! to the history log, or rejected with [`BusError::Backpressure`] when the
//! queue is full. The log sits behind its own lock so history queries never
//! hold up the dispatcher. A background dispatcher
//! task pops queued events (highest priority first, FIFO within a priority)
//! and copies each one into the mailbox of every matching subscription.
//!
//! Each subscription owns a bounded mailbox. A full mailbox drops events
//! according to its [`OverflowPolicy`], so a slow subscriber only loses its
//! own events and never stalls the dispatcher or other subscribers.
//!
//! Delivery rules for a subscription on topic `T`:
//!
//! - the event's topic is `T`;
//! - the subscriber is observer-scoped, or the event is a broadcast, or the
//!   subscriber's agent is in `affected_agents`;
//! - the subscription's filter, if any, accepts the event.

use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use society_types::{AgentId, Event, EventId, EventTopic};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::sync::{lock, read, write};

/// Events dispatched between cooperative yields of the dispatcher task.
const DISPATCH_BATCH: u32 = 64;

/// Errors returned by the event bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The dispatch queue is full. Retry later.
    #[error("event bus is full ({capacity} events queued)")]
    Backpressure {
        /// Queue capacity that was reached.
        capacity: usize,
    },

    /// The subscriber already holds a subscription for this topic.
    #[error("{subscriber} is already subscribed to {topic}")]
    AlreadySubscribed {
        /// The subscriber scope, rendered.
        subscriber: String,
        /// The duplicated topic.
        topic: EventTopic,
    },

    /// `subscribe_many` was called with no topics.
    #[error("a subscription needs at least one topic")]
    NoTopics,
}

impl BusError {
    /// Whether retrying the same call later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }
}

/// What a full mailbox does with a new event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the incoming event; the queued backlog is kept.
    #[default]
    DropNewest,
    /// Discard the oldest queued event to make room.
    DropOldest,
}

/// Runtime configuration of an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Events that may wait for dispatch before publish fails fast.
    pub queue_capacity: usize,
    /// Capacity of each subscription mailbox.
    pub mailbox_capacity: usize,
    /// Overflow behavior of subscription mailboxes.
    pub overflow: OverflowPolicy,
    /// Maximum events kept in the history log; `None` keeps everything.
    pub history_limit: Option<usize>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            mailbox_capacity: 256,
            overflow: OverflowPolicy::DropNewest,
            history_limit: None,
        }
    }
}

/// Who a subscription belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubscriberScope {
    /// An agent; receives broadcasts and events that affect it.
    Agent(AgentId),
    /// A named observer (dashboard, persistence, analytics); receives every
    /// event on its topics.
    Observer(String),
}

impl SubscriberScope {
    /// Whether an event passes the scope check.
    pub fn accepts(&self, event: &Event) -> bool {
        match self {
            Self::Agent(agent) => event.concerns(agent),
            Self::Observer(_) => true,
        }
    }
}

impl core::fmt::Display for SubscriberScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "agent:{id}"),
            Self::Observer(name) => write!(f, "observer:{name}"),
        }
    }
}

/// Optional per-subscription predicate.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Identifier of one (subscriber, topic) registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SubscriptionId(pub u64);

// ---------------------------------------------------------------------------
// Mailboxes
// ---------------------------------------------------------------------------

struct Mailbox {
    queue: Mutex<VecDeque<Arc<Event>>>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl Mailbox {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            policy,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an event. Returns `false` if an event was dropped.
    fn push(&self, event: Arc<Event>) -> bool {
        let mut kept_all = true;
        {
            let mut queue = lock(&self.queue);
            if queue.len() >= self.capacity {
                kept_all = false;
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match self.policy {
                    OverflowPolicy::DropNewest => return false,
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                    }
                }
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
        kept_all
    }

    fn pop(&self) -> Option<Arc<Event>> {
        lock(&self.queue).pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A live subscription. Only its owner drains it.
///
/// Dropping the subscription closes its mailbox; the dispatcher removes the
/// registration the next time it routes an event to it.
pub struct Subscription {
    scope: SubscriberScope,
    registrations: Vec<(EventTopic, SubscriptionId)>,
    mailbox: Arc<Mailbox>,
}

impl Subscription {
    /// The owning subscriber.
    pub const fn scope(&self) -> &SubscriberScope {
        &self.scope
    }

    /// Topics this subscription receives.
    pub fn topics(&self) -> Vec<EventTopic> {
        self.registrations.iter().map(|(topic, _)| *topic).collect()
    }

    /// Wait for the next event. Returns `None` once the subscription has
    /// been unsubscribed and its mailbox is empty.
    pub async fn recv(&self) -> Option<Arc<Event>> {
        loop {
            if let Some(event) = self.mailbox.pop() {
                return Some(event);
            }
            if self.mailbox.is_closed() {
                return None;
            }
            self.mailbox.notify.notified().await;
        }
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&self) -> Option<Arc<Event>> {
        self.mailbox.pop()
    }

    /// Take every queued event.
    pub fn drain(&self) -> Vec<Arc<Event>> {
        lock(&self.mailbox.queue).drain(..).collect()
    }

    /// Events discarded by the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped.load(Ordering::Relaxed)
    }

    /// A handle that can later be passed to [`EventBus::unsubscribe`].
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            registrations: self.registrations.clone(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.mailbox.close();
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("scope", &self.scope)
            .field("registrations", &self.registrations)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

/// Identifies the registrations of a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    registrations: Vec<(EventTopic, SubscriptionId)>,
}

#[derive(Clone)]
struct Registration {
    id: SubscriptionId,
    scope: SubscriberScope,
    filter: Option<EventFilter>,
    mailbox: Arc<Mailbox>,
}

impl Registration {
    fn wants(&self, event: &Event) -> bool {
        if !self.scope.accepts(event) {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        catch_unwind(AssertUnwindSafe(|| filter(event))).unwrap_or_else(|_| {
            warn!(subscriber = %self.scope, event_id = %event.id, "Subscription filter panicked");
            false
        })
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Selection over the event history log. All criteria are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only events on this topic.
    pub topic: Option<EventTopic>,
    /// Only events from this tick onwards.
    pub since_tick: Option<u64>,
    /// Only events an agent-scoped subscriber for this agent would see.
    pub agent: Option<AgentId>,
    /// Only the most recent N matches.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn matches(&self, event: &Event) -> bool {
        self.topic.is_none_or(|topic| event.topic == topic)
            && self.since_tick.is_none_or(|tick| event.tick >= tick)
            && self.agent.as_ref().is_none_or(|agent| event.concerns(agent))
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

struct Pending {
    priority: u32,
    seq: u64,
    event: Arc<Event>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Max-heap: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inbox {
    queue: BinaryHeap<Pending>,
    accepted: u64,
}

struct Dispatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Asynchronous publish/subscribe fabric.
pub struct EventBus {
    config: BusConfig,
    inbox: Mutex<Inbox>,
    inbox_notify: Notify,
    /// Taken only inside the inbox lock when writing, so log order is
    /// acceptance order.
    log: RwLock<VecDeque<Arc<Event>>>,
    subscribers: RwLock<BTreeMap<EventTopic, Vec<Registration>>>,
    next_subscription: AtomicU64,
    dispatched: watch::Sender<u64>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl EventBus {
    /// Create a bus. Call [`start`](Self::start) to begin dispatching.
    pub fn new(config: BusConfig) -> Self {
        let (dispatched, _) = watch::channel(0);
        Self {
            config,
            inbox: Mutex::new(Inbox {
                queue: BinaryHeap::new(),
                accepted: 0,
            }),
            inbox_notify: Notify::new(),
            log: RwLock::new(VecDeque::new()),
            subscribers: RwLock::new(BTreeMap::new()),
            next_subscription: AtomicU64::new(1),
            dispatched,
            dispatcher: Mutex::new(None),
        }
    }

    /// The bus configuration.
    pub const fn config(&self) -> &BusConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Append an event to the history log and queue it for dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Backpressure`] when the dispatch queue is full.
    /// A rejected event is not logged.
    pub fn publish(&self, event: Event) -> Result<EventId, BusError> {
        let id = event.id;
        let topic = event.topic;
        {
            let mut inbox = lock(&self.inbox);
            if inbox.queue.len() >= self.config.queue_capacity {
                return Err(BusError::Backpressure {
                    capacity: self.config.queue_capacity,
                });
            }
            let event = Arc::new(event);
            let seq = inbox.accepted;
            inbox.accepted = seq.saturating_add(1);
            {
                let mut log = write(&self.log);
                log.push_back(Arc::clone(&event));
                if let Some(limit) = self.config.history_limit {
                    while log.len() > limit {
                        log.pop_front();
                    }
                }
            }
            inbox.queue.push(Pending {
                priority: event.priority,
                seq,
                event,
            });
        }
        self.inbox_notify.notify_one();
        trace!(event_id = %id, topic = %topic, "Event published");
        Ok(id)
    }

    /// Events waiting for dispatch.
    pub fn pending(&self) -> usize {
        lock(&self.inbox).queue.len()
    }

    /// Wait until every event accepted so far has been dispatched.
    ///
    /// Only completes while the dispatcher is running.
    pub async fn flush(&self) {
        let target = lock(&self.inbox).accepted;
        let mut dispatched = self.dispatched.subscribe();
        if dispatched.wait_for(|count| *count >= target).await.is_err() {
            warn!("Dispatch counter closed while flushing");
        }
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Subscribe to one topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::AlreadySubscribed`] if `scope` already holds a
    /// live subscription for `topic`.
    pub fn subscribe(
        &self,
        scope: SubscriberScope,
        topic: EventTopic,
        filter: Option<EventFilter>,
    ) -> Result<Subscription, BusError> {
        self.subscribe_many(scope, &[topic], filter)
    }

    /// Subscribe to several topics with a single shared mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NoTopics`] for an empty topic list, or
    /// [`BusError::AlreadySubscribed`] if any topic is already held by
    /// `scope`; nothing is registered in that case.
    pub fn subscribe_many(
        &self,
        scope: SubscriberScope,
        topics: &[EventTopic],
        filter: Option<EventFilter>,
    ) -> Result<Subscription, BusError> {
        let topics: BTreeSet<EventTopic> = topics.iter().copied().collect();
        if topics.is_empty() {
            return Err(BusError::NoTopics);
        }
        let mailbox = Arc::new(Mailbox::new(
            self.config.mailbox_capacity,
            self.config.overflow,
        ));

        let mut table = write(&self.subscribers);
        for topic in &topics {
            let taken = table.get(topic).is_some_and(|registrations| {
                registrations
                    .iter()
                    .any(|r| r.scope == scope && !r.mailbox.is_closed())
            });
            if taken {
                return Err(BusError::AlreadySubscribed {
                    subscriber: scope.to_string(),
                    topic: *topic,
                });
            }
        }

        let mut registrations = Vec::with_capacity(topics.len());
        for topic in topics {
            let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
            let entries = table.entry(topic).or_default();
            entries.retain(|r| !(r.scope == scope && r.mailbox.is_closed()));
            entries.push(Registration {
                id,
                scope: scope.clone(),
                filter: filter.clone(),
                mailbox: Arc::clone(&mailbox),
            });
            registrations.push((topic, id));
        }
        drop(table);

        debug!(subscriber = %scope, topics = registrations.len(), "Subscribed");
        Ok(Subscription {
            scope,
            registrations,
            mailbox,
        })
    }

    /// Remove a subscription. Events already in its mailbox can still be
    /// received; afterwards `recv` returns `None`. Returns `false` if none of
    /// its registrations were still present.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut removed = false;
        let mut table = write(&self.subscribers);
        for (topic, id) in &handle.registrations {
            let Some(entries) = table.get_mut(topic) else {
                continue;
            };
            if let Some(index) = entries.iter().position(|r| r.id == *id) {
                let registration = entries.remove(index);
                registration.mailbox.close();
                removed = true;
            }
            if entries.is_empty() {
                table.remove(topic);
            }
        }
        removed
    }

    /// Live registrations on `topic`.
    pub fn subscriber_count(&self, topic: EventTopic) -> usize {
        read(&self.subscribers)
            .get(&topic)
            .map_or(0, |entries| entries.iter().filter(|r| !r.mailbox.is_closed()).count())
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Logged events matching `query`, oldest first.
    pub fn history(&self, query: &HistoryQuery) -> Vec<Arc<Event>> {
        let limit = query.limit.unwrap_or(usize::MAX);
        let mut matching: Vec<Arc<Event>> = read(&self.log)
            .iter()
            .rev()
            .filter(|event| query.matches(event))
            .take(limit)
            .cloned()
            .collect();
        matching.reverse();
        matching
    }

    /// The most recent `limit` events an agent would be shown: broadcasts
    /// and events that affect it, on any topic.
    pub fn recent_for_agent(&self, agent: &AgentId, limit: usize) -> Vec<Arc<Event>> {
        self.history(&HistoryQuery {
            agent: Some(agent.clone()),
            limit: Some(limit),
            ..HistoryQuery::default()
        })
    }

    /// Number of events in the history log.
    pub fn history_len(&self) -> usize {
        read(&self.log).len()
    }

    /// Empty the history log. Queued events are still dispatched.
    pub fn clear_history(&self) {
        write(&self.log).clear();
    }

    // -----------------------------------------------------------------------
    // Dispatcher
    // -----------------------------------------------------------------------

    /// Spawn the dispatcher task. Returns `false` if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut dispatcher = lock(&self.dispatcher);
        if dispatcher.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).dispatch_loop(cancel.clone()));
        *dispatcher = Some(Dispatcher { cancel, handle });
        info!("Event dispatcher started");
        true
    }

    /// Whether the dispatcher task is running.
    pub fn is_running(&self) -> bool {
        lock(&self.dispatcher)
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished())
    }

    /// Stop the dispatcher after it has delivered everything already queued.
    pub async fn shutdown(&self) {
        let dispatcher = lock(&self.dispatcher).take();
        let Some(dispatcher) = dispatcher else {
            return;
        };
        dispatcher.cancel.cancel();
        if let Err(err) = dispatcher.handle.await {
            warn!(error = %err, "Event dispatcher ended abnormally");
        }
        info!("Event dispatcher stopped");
    }

    async fn dispatch_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut batch: u32 = 0;
        loop {
            let next = lock(&self.inbox).queue.pop();
            if let Some(pending) = next {
                self.deliver(&pending.event);
                self.dispatched
                    .send_modify(|count| *count = count.saturating_add(1));
                batch = batch.saturating_add(1);
                if batch >= DISPATCH_BATCH {
                    batch = 0;
                    tokio::task::yield_now().await;
                }
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => {}
                () = self.inbox_notify.notified() => {}
            }
        }
    }

    fn deliver(&self, event: &Arc<Event>) {
        let targets: Vec<Registration> = read(&self.subscribers)
            .get(&event.topic)
            .cloned()
            .unwrap_or_default();

        let mut closed = Vec::new();
        for registration in &targets {
            if registration.mailbox.is_closed() {
                closed.push(registration.id);
                continue;
            }
            if !registration.wants(event) {
                continue;
            }
            if !registration.mailbox.push(Arc::clone(event)) {
                debug!(
                    subscriber = %registration.scope,
                    event_id = %event.id,
                    "Subscriber mailbox full, event dropped"
                );
            }
        }

        if !closed.is_empty() {
            let mut table = write(&self.subscribers);
            if let Some(entries) = table.get_mut(&event.topic) {
                entries.retain(|r| !closed.contains(&r.id));
                if entries.is_empty() {
                    table.remove(&event.topic);
                }
            }
        }
    }
}

impl core::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .field("history_len", &self.history_len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
