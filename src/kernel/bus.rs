//! Typed publish/subscribe bus.
//!
//! Two delivery modes:
//! - `publish` queues one delivery per subscriber on an unbounded channel
//!   and returns immediately. The channel is drained by `dispatch_pending`,
//!   or by the task started with `spawn_dispatcher`, which takes over the
//!   receiving end. Ordering across subscribers is not guaranteed.
//! - `publish_sync` invokes handlers right away, in subscription order.
//!
//! Both modes append the (trace-injected) packet to a bounded history before
//! any handler runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::FeatureFlags;
use super::event::{EventPacket, PacketType};
use super::trace::TraceStack;

pub const HISTORY_CAPACITY: usize = 1_000;

pub type Handler = Arc<dyn Fn(&EventPacket) + Send + Sync>;

type SubscriberId = u64;

struct Delivery {
    packet: Arc<EventPacket>,
    handler: Handler,
}

struct BusInner {
    subscribers: Mutex<HashMap<PacketType, Vec<(SubscriberId, Handler)>>>,
    history: Mutex<VecDeque<EventPacket>>,
    queue: UnboundedSender<Delivery>,
    /// `None` once a dispatcher task owns the receiver.
    pending: Mutex<Option<UnboundedReceiver<Delivery>>>,
    next_subscriber: AtomicU64,
    flags: Mutex<FeatureFlags>,
    trace: TraceStack,
}

/// Cheap to clone; clones share subscribers, history and the deferred queue.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl EventBus {
    pub fn new(trace: TraceStack, flags: FeatureFlags) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
                queue,
                pending: Mutex::new(Some(pending)),
                next_subscriber: AtomicU64::new(1),
                flags: Mutex::new(flags),
                trace,
            }),
        }
    }

    pub fn trace(&self) -> &TraceStack {
        &self.inner.trace
    }

    pub fn flags(&self) -> FeatureFlags {
        *lock(&self.inner.flags)
    }

    pub fn set_flags(&self, flags: FeatureFlags) {
        *lock(&self.inner.flags) = flags;
    }

    pub fn subscribe<F>(&self, kind: PacketType, handler: F) -> Subscription
    where
        F: Fn(&EventPacket) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            bus: self.clone(),
            kind,
            id,
        }
    }

    /// Deferred delivery. Returns the packet as stored in history.
    pub fn publish(&self, packet: EventPacket) -> Arc<EventPacket> {
        let packet = self.admit(packet);
        for handler in self.handlers_for(packet.kind) {
            let delivery = Delivery {
                packet: Arc::clone(&packet),
                handler,
            };
            if self.inner.queue.send(delivery).is_err() {
                warn!(packet_id = %packet.id, "deferred delivery dropped: dispatcher stopped");
            }
        }
        packet
    }

    /// Immediate delivery in subscription order.
    pub fn publish_sync(&self, packet: EventPacket) -> Arc<EventPacket> {
        let packet = self.admit(packet);
        for handler in self.handlers_for(packet.kind) {
            self.invoke(&packet, &handler);
        }
        packet
    }

    /// Run every queued deferred delivery, including ones queued by handlers
    /// while draining. Returns how many handler calls were made. Always 0
    /// once a dispatcher task has been spawned.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        while let Some(delivery) = self.next_pending() {
            self.invoke(&delivery.packet, &delivery.handler);
            delivered += 1;
        }
        delivered
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).as_ref().map_or(0, UnboundedReceiver::len)
    }

    /// Drain deferred deliveries on a background task until aborted.
    /// The task takes the receiver, so only the first call starts one.
    pub fn spawn_dispatcher(&self) -> JoinHandle<()> {
        let bus = self.clone();
        let receiver = lock(&self.inner.pending).take();
        tokio::spawn(async move {
            let Some(mut receiver) = receiver else {
                warn!("bus dispatcher already running");
                return;
            };
            while let Some(delivery) = receiver.recv().await {
                bus.invoke(&delivery.packet, &delivery.handler);
            }
            debug!("bus dispatcher stopped");
        })
    }

    // The lock is released before the handler runs so handlers may publish.
    fn next_pending(&self) -> Option<Delivery> {
        lock(&self.inner.pending).as_mut()?.try_recv().ok()
    }

    pub fn history(&self) -> Vec<EventPacket> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    /// Drop history and queued deliveries. Subscriptions are kept.
    pub fn clear(&self) {
        lock(&self.inner.history).clear();
        while self.next_pending().is_some() {}
    }

    pub fn subscriber_count(&self, kind: PacketType) -> usize {
        lock(&self.inner.subscribers).get(&kind).map_or(0, Vec::len)
    }

    /// Trace injection plus history append. The returned packet is final.
    fn admit(&self, mut packet: EventPacket) -> Arc<EventPacket> {
        let flags = self.flags();
        if flags.trace_auto_inject && packet.trace_id.is_none() {
            packet.trace_id = self.inner.trace.current();
            if packet.trace_id.is_none() && flags.trace_external_ids {
                packet.trace_id = Some(self.inner.trace.generate_external_trace_id(packet.timestamp));
            }
        }

        let mut history = lock(&self.inner.history);
        if history.len() >= HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(packet.clone());
        drop(history);

        Arc::new(packet)
    }

    fn handlers_for(&self, kind: PacketType) -> Vec<Handler> {
        lock(&self.inner.subscribers)
            .get(&kind)
            .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    fn invoke(&self, packet: &EventPacket, handler: &Handler) {
        let _scope = match (&packet.trace_id, self.flags().trace_handler_scope) {
            (Some(id), true) => Some(self.inner.trace.enter(id.clone())),
            _ => None,
        };
        handler(packet);
    }

    fn unsubscribe(&self, kind: PacketType, id: SubscriberId) {
        if let Some(subs) = lock(&self.inner.subscribers).get_mut(&kind) {
            subs.retain(|(sid, _)| *sid != id);
        }
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the subscription alive.
pub struct Subscription {
    bus: EventBus,
    kind: PacketType,
    id: SubscriberId,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.bus.unsubscribe(self.kind, self.id);
    }
}
