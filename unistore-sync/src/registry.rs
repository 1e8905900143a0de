//! The sync hook registry.
//!
//! Events are admitted through a bounded queue per event type, stamped with
//! a per-entity sequence number, and appended to that entity's lane. A lane
//! is a channel drained by a single worker task, so events for one entity
//! are delivered strictly in sequence order while different entities are
//! delivered concurrently. A lane's worker exits once the channel is empty;
//! the next event for that entity starts a fresh one.
//!
//! Sequence counters outlive idle lanes, so numbering keeps increasing for
//! the whole life of an entity. A counter is dropped once an
//! `EntityDeleted` for its entity has been processed and no later event was
//! stamped in the meantime; a recreated id then starts again at 1.

use crate::config::SyncConfig;
use crate::dead_letter::{DeadLetter, DeadLetterId, DeadLetterQueue};
use crate::delivery::{self, DeliveryReport, DeliveryState};
use crate::error::{SyncError, SyncResult};
use crate::handler::{SyncHandler, handler_fn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot, watch};
use tracing::{debug, error, info};
use unistore_types::{EventId, SyncEvent, SyncEventType};

/// Returned by a successful emit. The event is queued; [`EmitHandle::wait`]
/// resolves once every handler reached a terminal state.
#[derive(Debug)]
pub struct EmitHandle {
    event: Arc<SyncEvent>,
    report: oneshot::Receiver<DeliveryReport>,
}

impl EmitHandle {
    pub fn event_id(&self) -> EventId {
        self.event.id
    }

    pub fn entity_id(&self) -> &str {
        &self.event.entity_id
    }

    pub fn sequence(&self) -> u64 {
        self.event.sequence
    }

    pub fn event_type(&self) -> SyncEventType {
        self.event.event_type
    }

    /// The event as stamped by the registry.
    pub fn event(&self) -> &SyncEvent {
        &self.event
    }

    pub async fn wait(self) -> SyncResult<DeliveryReport> {
        self.report.await.map_err(|_| SyncError::ReportDropped)
    }
}

struct Envelope {
    event: Arc<SyncEvent>,
    /// Restricts delivery to one handler (dead-letter replay).
    target: Option<String>,
    permit: OwnedSemaphorePermit,
    report: oneshot::Sender<DeliveryReport>,
}

#[derive(Default)]
struct LaneTable {
    lanes: HashMap<String, mpsc::UnboundedSender<Envelope>>,
    /// Last sequence stamped per entity.
    sequences: HashMap<String, u64>,
}

impl LaneTable {
    /// Forgets the entity's counter if `sequence` is still the last one
    /// stamped for it.
    fn retire(&mut self, entity_id: &str, sequence: u64) -> bool {
        if self.sequences.get(entity_id) == Some(&sequence) {
            self.sequences.remove(entity_id);
            true
        } else {
            false
        }
    }
}

struct Inner {
    config: SyncConfig,
    handlers: RwLock<HashMap<SyncEventType, Vec<Arc<dyn SyncHandler>>>>,
    queues: HashMap<SyncEventType, Arc<Semaphore>>,
    lanes: Mutex<LaneTable>,
    pending: watch::Sender<usize>,
    dead_letters: DeadLetterQueue,
    closed: AtomicBool,
}

/// Fan-out point for committed mutations.
///
/// Cloning is cheap; clones share handlers, lanes and dead letters.
#[derive(Clone)]
pub struct SyncHookRegistry {
    inner: Arc<Inner>,
}

impl SyncHookRegistry {
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let queues = SyncEventType::ALL
            .into_iter()
            .map(|t| (t, Arc::new(Semaphore::new(config.capacity_for(t)))))
            .collect();
        let (pending, _) = watch::channel(0usize);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                handlers: RwLock::new(HashMap::new()),
                queues,
                lanes: Mutex::new(LaneTable::default()),
                pending,
                dead_letters: DeadLetterQueue::default(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // ── Subscription ─────────────────────────────────────────────

    /// Subscribes `handler` to `event_type`. Handlers run in registration
    /// order for each event.
    pub fn register(&self, event_type: SyncEventType, handler: Arc<dyn SyncHandler>) {
        info!(event_type = %event_type, handler = handler.name(), "registered sync handler");
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Subscribes an async closure.
    pub fn register_fn<F, Fut>(&self, event_type: SyncEventType, name: impl Into<String>, f: F)
    where
        F: Fn(SyncEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(event_type, handler_fn(name, f));
    }

    pub fn handler_names(&self, event_type: SyncEventType) -> Vec<String> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_type)
            .map(|hs| hs.iter().map(|h| h.name().to_string()).collect())
            .unwrap_or_default()
    }

    // ── Emission ─────────────────────────────────────────────────

    /// Queues `event` for delivery.
    ///
    /// Any sequence number already on the event is replaced. Fails with
    /// [`SyncError::Backpressure`] when the event type's queue stays full
    /// for the configured enqueue wait.
    pub async fn emit(&self, mut event: SyncEvent) -> SyncResult<EmitHandle> {
        let permit = self.inner.acquire_slot(event.event_type).await?;
        let (tx, rx) = oneshot::channel();

        let event = {
            let mut table = self.inner.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            let next = table.sequences.entry(event.entity_id.clone()).or_insert(0);
            *next += 1;
            event.sequence = *next;

            let event = Arc::new(event);
            Inner::enqueue(&self.inner, &mut table, Envelope {
                event: Arc::clone(&event),
                target: None,
                permit,
                report: tx,
            });
            event
        };

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            entity_id = %event.entity_id,
            sequence = event.sequence,
            state = ?DeliveryState::Emitted,
            "sync event queued"
        );
        Ok(EmitHandle { event, report: rx })
    }

    /// Waits until no event is pending.
    pub async fn drain(&self, timeout: Duration) -> SyncResult<()> {
        let mut pending = self.inner.pending.subscribe();
        match tokio::time::timeout(timeout, pending.wait_for(|n| *n == 0)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SyncError::Closed),
            Err(_) => Err(SyncError::DrainTimeout {
                pending: self.pending(),
            }),
        }
    }

    /// Events queued or being delivered.
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Entities with a live sequence counter.
    pub fn tracked_entities(&self) -> usize {
        self.inner
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sequences
            .len()
    }

    /// Stops accepting events. Already-queued events are still delivered.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            for queue in self.inner.queues.values() {
                queue.close();
            }
            info!(pending = self.pending(), "sync registry closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ── Dead letters ─────────────────────────────────────────────

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.snapshot()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.inner.dead_letters.len()
    }

    /// Re-delivers a dead-lettered event to the handler that failed it,
    /// removing the entry. The event keeps its original sequence number.
    pub async fn retry_dead_letter(&self, id: DeadLetterId) -> SyncResult<EmitHandle> {
        let letter = self
            .inner
            .dead_letters
            .take(id)
            .ok_or(SyncError::DeadLetterNotFound(id))?;

        let permit = match self.inner.acquire_slot(letter.event.event_type).await {
            Ok(permit) => permit,
            Err(err) => {
                self.inner.dead_letters.restore(letter);
                return Err(err);
            }
        };

        info!(dead_letter = %id, handler = %letter.handler, event_id = %letter.event.id, "replaying dead letter");
        let (tx, rx) = oneshot::channel();
        let event = Arc::new(letter.event);
        {
            let mut table = self.inner.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            Inner::enqueue(&self.inner, &mut table, Envelope {
                event: Arc::clone(&event),
                target: Some(letter.handler),
                permit,
                report: tx,
            });
        }
        Ok(EmitHandle { event, report: rx })
    }
}

impl Inner {
    async fn acquire_slot(&self, event_type: SyncEventType) -> SyncResult<OwnedSemaphorePermit> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }
        let queue = self.queues.get(&event_type).ok_or(SyncError::Closed)?;
        let wait = self.config.enqueue_wait();

        match tokio::time::timeout(wait, Arc::clone(queue).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(SyncError::Closed),
            Err(_) => Err(SyncError::Backpressure {
                event_type,
                capacity: self.config.capacity_for(event_type),
                waited: wait,
            }),
        }
    }

    /// Appends to the entity's lane, starting a worker if it has none.
    /// Called with the lane table locked.
    fn enqueue(this: &Arc<Self>, table: &mut LaneTable, envelope: Envelope) {
        this.pending.send_modify(|n| *n += 1);
        let entity_id = envelope.event.entity_id.clone();

        let envelope = match table.lanes.get(&entity_id) {
            Some(lane) => match lane.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(envelope)) => envelope,
            },
            None => envelope,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // A fresh channel always has its receiver.
        let _ = tx.send(envelope);
        table.lanes.insert(entity_id.clone(), tx);
        tokio::spawn(Self::run_lane(Arc::clone(this), entity_id, rx));
    }

    async fn run_lane(self: Arc<Self>, entity_id: String, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        loop {
            let next = match rx.try_recv() {
                Ok(envelope) => Some(envelope),
                Err(_) => {
                    let mut table = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
                    match rx.try_recv() {
                        Ok(envelope) => Some(envelope),
                        Err(_) => {
                            table.lanes.remove(&entity_id);
                            None
                        }
                    }
                }
            };
            match next {
                Some(envelope) => self.process(envelope).await,
                None => break,
            }
        }
    }

    async fn process(&self, envelope: Envelope) {
        let Envelope {
            event,
            target,
            permit,
            report,
        } = envelope;

        let handlers: Vec<Arc<dyn SyncHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.event_type)
            .map(|hs| {
                hs.iter()
                    .filter(|h| target.as_deref().is_none_or(|t| t == h.name()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut outcomes = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let outcome = delivery::deliver(
                handler,
                Arc::clone(&event),
                &self.config.retry,
                self.config.handler_timeout(),
            )
            .await;

            if outcome.state == DeliveryState::DeadLettered {
                let last_error = outcome.last_error.clone().unwrap_or_default();
                let id = self
                    .dead_letters
                    .push((*event).clone(), &outcome.handler, outcome.attempts, last_error.clone());
                error!(
                    dead_letter = %id,
                    handler = %outcome.handler,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    entity_id = %event.entity_id,
                    sequence = event.sequence,
                    attempts = outcome.attempts,
                    error = %last_error,
                    "sync handler exhausted retries, event dead-lettered"
                );
            }
            outcomes.push(outcome);
        }

        // Replays never retire: the id may have been reused since.
        if event.event_type == SyncEventType::EntityDeleted && target.is_none() {
            let retired = self
                .lanes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retire(&event.entity_id, event.sequence);
            if retired {
                debug!(entity_id = %event.entity_id, sequence = event.sequence, "sequence counter retired");
            }
        }

        drop(permit);
        let _ = report.send(DeliveryReport {
            event_id: event.id,
            event_type: event.event_type,
            entity_id: event.entity_id.clone(),
            sequence: event.sequence,
            outcomes,
        });
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}
