//! Long-lived per-(domain, queue) worker (§4.4). Grounded on the teacher's
//! `brokers/queues/actor.rs`: a single task owns the queue's state and
//! drains an mpsc command channel, with a `waiters` queue standing in for
//! blocked long-poll consumers instead of the teacher's batch waiters.
//!
//! Commands are processed one at a time inside the actor; publish fanout
//! (subscribers, routing) and retry/circuit-breaker bookkeeping run as
//! spawned tasks so a slow subscriber never stalls the next publish or
//! consume.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::groups::ConsumerGroupRegistry;
use crate::model::{Domain, Message, QueueConfig};
use crate::router::Router;
use crate::store::MessageStore;
use crate::subscriptions::{SubscriptionHandler, SubscriptionId, SubscriptionRegistry};

/// Options accepted by `ConsumeWithGroup` (§4.4).
pub struct ConsumeOptions {
    pub group_id: Option<String>,
    pub start_from_id: Option<String>,
    pub consumer_id: Option<String>,
    pub timeout: Duration,
    /// Cancelling this resolves a blocked long-poll with `nil` promptly
    /// (§4.4 "(c) `ctx` is cancelled", §5 "cancellation returns nil
    /// promptly"), e.g. wired to the HTTP request's disconnect signal.
    pub cancel: Option<CancellationToken>,
}

enum Command {
    Publish {
        message: Message,
        reply: oneshot::Sender<Result<String, ApiError>>,
    },
    Consume {
        waiter_id: u64,
        options: ConsumeOptions,
        reply: oneshot::Sender<Option<(i64, Message)>>,
    },
    AddConsumerGroup {
        group_id: String,
        consumer_id: Option<String>,
    },
    RemoveConsumerGroup {
        group_id: String,
    },
    RecordFanoutOutcome {
        success: bool,
    },
    CancelWaiter {
        waiter_id: u64,
    },
    Shutdown,
}

struct Waiter {
    id: u64,
    group_id: String,
    expires_at: Instant,
    reply: oneshot::Sender<Option<(i64, Message)>>,
}

/// Rolling-window circuit breaker guarding subscriber fanout (§4.4).
struct CircuitBreaker {
    error_threshold: f64,
    minimum_requests: u32,
    success_threshold: u32,
    open_timeout: Duration,
    state: BreakerState,
    window_total: u32,
    window_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreaker {
    fn new(policy: crate::model::CircuitBreakerPolicy) -> Self {
        Self {
            error_threshold: policy.error_threshold,
            minimum_requests: policy.minimum_requests,
            success_threshold: policy.success_threshold,
            open_timeout: policy.open_timeout,
            state: BreakerState::Closed,
            window_total: 0,
            window_failures: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }

    /// Whether fanout should be attempted right now.
    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_timeout {
                    self.state = BreakerState::HalfOpen;
                    self.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => true,
        }
    }

    fn record(&mut self, success: bool) {
        match self.state {
            BreakerState::HalfOpen => {
                if success {
                    self.half_open_successes += 1;
                    if self.half_open_successes >= self.success_threshold {
                        self.state = BreakerState::Closed;
                        self.window_total = 0;
                        self.window_failures = 0;
                    }
                } else {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Closed => {
                self.window_total += 1;
                if !success {
                    self.window_failures += 1;
                }
                if self.window_total >= self.minimum_requests
                    && (self.window_failures as f64 / self.window_total as f64) >= self.error_threshold
                {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}

struct QueueState {
    domain: String,
    queue: String,
    config: QueueConfig,
    schema: Arc<std::sync::Mutex<crate::model::Schema>>,
    store: Arc<MessageStore>,
    groups: Arc<ConsumerGroupRegistry>,
    subs: Arc<SubscriptionRegistry>,
    router: Arc<Router>,
    /// Callback the owning domain registry installs so a routing match can
    /// be forwarded onto a sibling queue without this actor holding a
    /// direct handle to it (actors never reach into each other directly).
    forward: Arc<dyn Fn(String, Message) + Send + Sync>,
    breaker: CircuitBreaker,
    round_robin_cursor: usize,
    waiters: VecDeque<Waiter>,
    anon_group_counter: AtomicU64,
    /// Handle back to this actor's own command channel, so spawned fanout
    /// tasks can report delivery outcomes through the actor loop instead of
    /// racing a side channel against the next poll.
    self_tx: mpsc::Sender<Command>,
}

impl QueueState {
    /// Next live, unexpired message at or after `group_id`'s position.
    /// Expired entries found along the way are physically deleted (§4.4
    /// TTL: "removes the message from both MessageStore and AckMatrix");
    /// deleting tombstones the slot so the next `get_range` call skips it.
    fn has_messages_for(&self, group_id: &str) -> Option<(i64, Message)> {
        let position = self.groups.get_position(&self.domain, &self.queue, group_id);
        loop {
            let mut batch = self.store.get_range(&self.domain, &self.queue, position, 1).ok()?;
            if batch.is_empty() {
                return None;
            }
            let (index, message) = batch.remove(0);
            if message.is_expired(self.config.ttl) {
                self.expire_message(&message.id);
                continue;
            }
            return Some((index, message));
        }
    }

    fn expire_message(&self, message_id: &str) {
        let _ = self.store.delete(&self.domain, &self.queue, message_id);
        self.store.ack_matrix_for(&self.domain, &self.queue).lock().forget_message(message_id);
    }

    /// Drops stale `index -> id` entries every live group has advanced
    /// past (§4.1 "opportunistic compaction invoked by the queue handler
    /// when all live groups have advanced past minIndex").
    fn compact(&self) {
        let groups = self.groups.list_for_queue(&self.domain, &self.queue);
        if let Some(min_position) = groups.iter().map(|g| g.position).min() {
            let _ = self.store.purge_indices_below(&self.domain, &self.queue, min_position);
        }
    }

    fn try_fulfill_waiters(&mut self) {
        let mut still_waiting = VecDeque::with_capacity(self.waiters.len());
        while let Some(waiter) = self.waiters.pop_front() {
            match self.has_messages_for(&waiter.group_id) {
                Some((index, message)) => {
                    self.groups.store_position(&self.domain, &self.queue, &waiter.group_id, index + 1);
                    self.groups.update_last_activity(&self.domain, &self.queue, &waiter.group_id);
                    acknowledge(self, &message.id, &waiter.group_id);
                    self.compact();
                    let _ = waiter.reply.send(Some((index, message)));
                }
                None => still_waiting.push_back(waiter),
            }
        }
        self.waiters = still_waiting;
    }

    fn expire_waiters(&mut self) {
        let now = Instant::now();
        let mut remaining = VecDeque::with_capacity(self.waiters.len());
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.expires_at <= now {
                let _ = waiter.reply.send(None);
            } else {
                remaining.push_back(waiter);
            }
        }
        self.waiters = remaining;
    }

    fn next_wakeup(&self) -> Instant {
        self.waiters
            .iter()
            .map(|w| w.expires_at)
            .min()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600))
    }

    /// Resolves a waiter with `nil` ahead of its timeout, e.g. on
    /// cancellation. No-op if the waiter already fired or expired.
    fn cancel_waiter(&mut self, waiter_id: u64) {
        if let Some(pos) = self.waiters.iter().position(|w| w.id == waiter_id) {
            let waiter = self.waiters.remove(pos).unwrap();
            let _ = waiter.reply.send(None);
        }
    }
}

/// Handle to a running queue actor. Cheap to clone; publishing and
/// consuming round-trip through the actor's command channel.
#[derive(Clone)]
pub struct QueueHandler {
    tx: mpsc::Sender<Command>,
    next_waiter_id: Arc<AtomicU64>,
}

impl QueueHandler {
    pub fn start(
        domain: Domain,
        queue_name: String,
        config: QueueConfig,
        store: Arc<MessageStore>,
        groups: Arc<ConsumerGroupRegistry>,
        subs: Arc<SubscriptionRegistry>,
        router: Arc<Router>,
        forward: Arc<dyn Fn(String, Message) + Send + Sync>,
    ) -> Self {
        store.declare_queue(&domain.name, &queue_name);
        let (tx, rx) = mpsc::channel(1024);

        let breaker = CircuitBreaker::new(config.breaker);
        let state = QueueState {
            domain: domain.name.clone(),
            queue: queue_name,
            config,
            schema: Arc::new(std::sync::Mutex::new(domain.schema)),
            store,
            groups,
            subs,
            router,
            forward,
            breaker,
            round_robin_cursor: 0,
            waiters: VecDeque::new(),
            anon_group_counter: AtomicU64::new(0),
            self_tx: tx.clone(),
        };

        tokio::spawn(run(state, rx));
        Self { tx, next_waiter_id: Arc::new(AtomicU64::new(0)) }
    }

    pub async fn publish(&self, message: Message) -> Result<String, ApiError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Publish { message, reply })
            .await
            .map_err(|_| ApiError::Internal("queue handler stopped".into()))?;
        rx.await.map_err(|_| ApiError::Internal("queue handler dropped reply".into()))?
    }

    pub async fn consume_with_group(&self, options: ConsumeOptions) -> Option<(i64, Message)> {
        let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let cancel = options.cancel.clone();

        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Consume { waiter_id, options, reply }).await.is_err() {
            return None;
        }

        match cancel {
            Some(token) => {
                let tx = self.tx.clone();
                tokio::select! {
                    result = rx => result.ok().flatten(),
                    _ = token.cancelled() => {
                        let _ = tx.send(Command::CancelWaiter { waiter_id }).await;
                        None
                    }
                }
            }
            None => rx.await.ok().flatten(),
        }
    }

    pub async fn add_consumer_group(&self, group_id: String, consumer_id: Option<String>) {
        let _ = self.tx.send(Command::AddConsumerGroup { group_id, consumer_id }).await;
    }

    pub async fn remove_consumer_group(&self, group_id: String) {
        let _ = self.tx.send(Command::RemoveConsumerGroup { group_id }).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

async fn run(mut state: QueueState, mut rx: mpsc::Receiver<Command>) {
    loop {
        let sleep_until = state.next_wakeup();
        tokio::select! {
            maybe_cmd = rx.recv() => {
                match maybe_cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => handle_command(&mut state, cmd).await,
                }
            }
            _ = tokio::time::sleep_until(sleep_until) => {
                state.expire_waiters();
            }
        }
    }
    // Drain remaining waiters with `nil` per §4.4 Shutdown semantics.
    state.expire_waiters();
    while let Some(waiter) = state.waiters.pop_front() {
        let _ = waiter.reply.send(None);
    }
}

async fn handle_command(state: &mut QueueState, cmd: Command) {
    match cmd {
        Command::Publish { message, reply } => {
            let result = do_publish(state, message).await;
            let _ = reply.send(result);
        }
        Command::Consume { waiter_id, options, reply } => do_consume(state, waiter_id, options, reply).await,
        Command::AddConsumerGroup { group_id, consumer_id } => {
            state.groups.register(&state.domain, &state.queue, &group_id, consumer_id.as_deref());
        }
        Command::RemoveConsumerGroup { group_id } => {
            let freed = state.store.ack_matrix_for(&state.domain, &state.queue).lock().remove_group(&group_id);
            for message_id in freed {
                let _ = state.store.delete(&state.domain, &state.queue, &message_id);
            }
        }
        Command::RecordFanoutOutcome { success } => state.breaker.record(success),
        Command::CancelWaiter { waiter_id } => state.cancel_waiter(waiter_id),
        Command::Shutdown => {}
    }
}

async fn do_publish(state: &mut QueueState, message: Message) -> Result<String, ApiError> {
    {
        let schema = state.schema.lock().unwrap();
        schema
            .validate(&message.payload)
            .map_err(ApiError::BadRequest)?;
    }

    if state.config.max_size > 0 {
        let current = state.store.len(&state.domain, &state.queue).unwrap_or(0);
        if current >= state.config.max_size {
            return Err(ApiError::QueueFull(format!("{}/{} is full", state.domain, state.queue)));
        }
    }

    let index = state
        .store
        .append(&state.domain, &state.queue, message.clone())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .store
        .ack_matrix_for(&state.domain, &state.queue)
        .lock()
        .register_message(&message.id);

    state.try_fulfill_waiters();

    dispatch_fanout(state, message.clone());
    evaluate_routing(state, message);

    let _ = index;
    Ok(message.id)
}

/// Spawns the subscriber fanout so publish returns immediately; applies the
/// configured delivery mode plus retry/circuit-breaker policy.
fn dispatch_fanout(state: &mut QueueState, message: Message) {
    use crate::model::DeliveryMode;

    if !state.breaker.allow() {
        return; // Breaker Open: publishes still enqueue, fanout is suppressed.
    }

    let handlers = state.subs.handlers(&state.domain, &state.queue);
    if handlers.is_empty() {
        return;
    }

    let targets: Vec<(SubscriptionId, Arc<dyn SubscriptionHandler>)> = match state.config.delivery_mode {
        DeliveryMode::Broadcast => handlers,
        DeliveryMode::SingleConsumer => vec![handlers[0].clone()],
        DeliveryMode::RoundRobin => {
            let idx = state.round_robin_cursor % handlers.len();
            state.round_robin_cursor = state.round_robin_cursor.wrapping_add(1);
            vec![handlers[idx].clone()]
        }
    };

    let retry = state.config.retry;
    let domain = state.domain.clone();
    let queue = state.queue.clone();
    // The breaker's counters live on the actor; outcomes are reported back
    // as a Command so they're applied by the actor loop itself, in order,
    // rather than raced against the next poll of a side channel.
    let self_tx = state.self_tx.clone();

    tokio::spawn(async move {
        let deliveries = targets.into_iter().map(|(id, handler)| {
            let message = message.clone();
            let domain = domain.clone();
            let queue = queue.clone();
            async move {
                let mut attempt = 0;
                loop {
                    match handler.handle(&message).await {
                        Ok(()) => return true,
                        Err(err) => {
                            if attempt >= retry.max_retries {
                                tracing::warn!(%domain, %queue, subscription = ?id, %err, "subscriber fanout exhausted retries");
                                return false;
                            }
                            tokio::time::sleep(retry.backoff(attempt)).await;
                            attempt += 1;
                        }
                    }
                }
            }
        });

        for success in futures::future::join_all(deliveries).await {
            let _ = self_tx.send(Command::RecordFanoutOutcome { success }).await;
        }
    });
}

/// Forwards a routed copy to every matched destination queue (§4.5, single
/// hop — the destination's own publish never re-evaluates the router).
/// Forwarding goes through the domain registry's callback so a slow or
/// missing destination queue cannot block this actor.
fn evaluate_routing(state: &QueueState, message: Message) {
    let destinations = state.router.evaluate(&state.domain, &state.queue, &message);
    for dest in destinations {
        tracing::debug!(domain = %state.domain, from = %state.queue, to = %dest, message = %message.id, "route matched");
        (state.forward)(dest, message.routed_copy());
    }
}

/// Acknowledges delivery of `message_id` for `group_id` and physically
/// deletes the message once every registered group has acknowledged it
/// (§4.2: a message is retained only while some live group still owes it
/// an acknowledgment).
fn acknowledge(state: &QueueState, message_id: &str, group_id: &str) {
    let freed = state.store.ack_matrix_for(&state.domain, &state.queue).lock().acknowledge(message_id, group_id);
    if freed {
        let _ = state.store.delete(&state.domain, &state.queue, message_id);
    }
}

async fn do_consume(state: &mut QueueState, waiter_id: u64, options: ConsumeOptions, reply: oneshot::Sender<Option<(i64, Message)>>) {
    let group_id = match &options.group_id {
        Some(g) => g.clone(),
        None => {
            let n = state.anon_group_counter.fetch_add(1, Ordering::Relaxed);
            format!("temp-{}-{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0), n)
        }
    };

    state.groups.register(&state.domain, &state.queue, &group_id, options.consumer_id.as_deref());

    if let Some(start_id) = &options.start_from_id {
        if let Ok(index) = state.store.index_of(&state.domain, &state.queue, start_id) {
            state.groups.store_position(&state.domain, &state.queue, &group_id, index);
        }
    }

    if let Some((index, message)) = state.has_messages_for(&group_id) {
        state.groups.store_position(&state.domain, &state.queue, &group_id, index + 1);
        state.groups.update_last_activity(&state.domain, &state.queue, &group_id);
        acknowledge(state, &message.id, &group_id);
        state.compact();
        let _ = reply.send(Some((index, message)));
        return;
    }

    if options.timeout.is_zero() {
        let _ = reply.send(None);
        return;
    }

    state.waiters.push_back(Waiter {
        id: waiter_id,
        group_id,
        expires_at: Instant::now() + options.timeout,
        reply,
    });
}
