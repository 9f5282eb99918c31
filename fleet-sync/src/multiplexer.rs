//! Per-vehicle publish/subscribe over one shared transport connection.
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!  Transport ───► │ Multiplexer                  │
//!  (one socket)   │   "DXB-AX-1" → [cb1, cb2]    │ ──► cb1(frame), cb2(frame)
//!                 │   "DXB-BX-7" → [cb3]         │ ──► cb3(frame)
//!                 └──────────────────────────────┘
//! ```
//!
//! - The first callback for a key sends `subscribeToVehicle`; removing the
//!   last one sends `unsubscribeFromVehicle`.
//! - Every `Connected` event resends `subscribeToVehicle` for every active key.
//!   The server treats repeats as no-ops.
//! - Frames for keys with no subscription are dropped silently. This is the
//!   expected race after an unsubscribe.
//! - Transport failures never reach callbacks. They are logged and counted.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::SyncResult;
use crate::protocol::{ControlFrame, DataFrame, EntityKey, TransportEvent};

/// Outbound half of a connection, as seen by the multiplexer.
pub trait Transport {
    /// Queue a control frame for sending.
    fn emit(&mut self, frame: ControlFrame) -> SyncResult<()>;

    /// Close the connection for good.
    fn close(&mut self);
}

/// Subscriber callback. Identity is the `Arc` allocation, so clone the same
/// `Arc` to re-subscribe idempotently.
pub type Callback = Arc<dyn Fn(&DataFrame) + Send + Sync>;

/// Opaque token identifying one callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

/// Counters for monitoring multiplexer health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiplexerStats {
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub control_frames_sent: u64,
    pub send_failures: u64,
    pub connects: u64,
}

struct Registration {
    handle: SubscriptionHandle,
    callback: Callback,
}

fn same_callback(a: &Callback, b: &Callback) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// The subscription multiplexer.
pub struct Multiplexer<T: Transport> {
    transport: T,
    /// Registrations per key, in registration order. Never holds an empty Vec.
    subscriptions: HashMap<EntityKey, Vec<Registration>>,
    connected: bool,
    stats: MultiplexerStats,
}

impl<T: Transport> Multiplexer<T> {
    /// Create a multiplexer with no subscriptions over `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            subscriptions: HashMap::new(),
            connected: false,
            stats: MultiplexerStats::default(),
        }
    }

    /// Register `callback` for frames addressed to `key`.
    ///
    /// Returns the existing handle if this exact callback is already
    /// registered for the key.
    pub fn subscribe(&mut self, key: EntityKey, callback: Callback) -> SubscriptionHandle {
        log::debug!("Subscribing to vehicle {key}");

        let registrations = match self.subscriptions.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let frame = ControlFrame::Subscribe(entry.key().clone());
                Self::send(&mut self.transport, &mut self.stats, frame);
                entry.insert(Vec::new())
            }
        };

        if let Some(existing) = registrations
            .iter()
            .find(|r| same_callback(&r.callback, &callback))
        {
            return existing.handle;
        }

        let handle = SubscriptionHandle(Uuid::new_v4());
        registrations.push(Registration { handle, callback });
        handle
    }

    /// Remove one registration (`Some(handle)`) or the whole subscription
    /// (`None`) for `key`.
    ///
    /// Returns `true` when the subscription for `key` was torn down and the
    /// unsubscribe frame sent.
    pub fn unsubscribe(&mut self, key: &EntityKey, handle: Option<SubscriptionHandle>) -> bool {
        log::debug!("Unsubscribing from vehicle {key}");

        let Some(registrations) = self.subscriptions.get_mut(key) else {
            return false;
        };
        if let Some(handle) = handle {
            registrations.retain(|r| r.handle != handle);
            if !registrations.is_empty() {
                return false;
            }
        }

        self.subscriptions.remove(key);
        Self::send(
            &mut self.transport,
            &mut self.stats,
            ControlFrame::Unsubscribe(key.clone()),
        );
        true
    }

    /// Feed one transport event through the multiplexer.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                log::info!(
                    "Connected; resubscribing {} vehicle(s)",
                    self.subscriptions.len()
                );
                self.connected = true;
                self.stats.connects += 1;
                self.resubscribe_all();
            }
            TransportEvent::Disconnected { reason } => {
                log::info!("Disconnected from server: {reason}");
                self.connected = false;
            }
            TransportEvent::Data(frame) => self.deliver(&frame),
        }
    }

    fn deliver(&mut self, frame: &DataFrame) {
        match self.subscriptions.get(&frame.entity_key) {
            Some(registrations) => {
                for registration in registrations {
                    (registration.callback)(frame);
                }
                self.stats.frames_delivered += 1;
            }
            None => {
                log::debug!("Dropping frame for unsubscribed vehicle {}", frame.entity_key);
                self.stats.frames_dropped += 1;
            }
        }
    }

    fn resubscribe_all(&mut self) {
        for key in self.subscriptions.keys() {
            Self::send(
                &mut self.transport,
                &mut self.stats,
                ControlFrame::Subscribe(key.clone()),
            );
        }
    }

    fn send(transport: &mut T, stats: &mut MultiplexerStats, frame: ControlFrame) {
        match transport.emit(frame) {
            Ok(()) => stats.control_frames_sent += 1,
            Err(e) => {
                // The next Connected resends every active subscription.
                log::warn!("Failed to send control frame: {e}");
                stats.send_failures += 1;
            }
        }
    }

    /// Close the transport. Subscriptions are kept.
    pub fn disconnect(&mut self) {
        self.transport.close();
        self.connected = false;
    }

    /// Whether `key` has at least one callback.
    pub fn is_subscribed(&self, key: &EntityKey) -> bool {
        self.subscriptions.contains_key(key)
    }

    /// Number of callbacks registered for `key`.
    pub fn subscriber_count(&self, key: &EntityKey) -> usize {
        self.subscriptions.get(key).map_or(0, Vec::len)
    }

    /// All keys with at least one callback.
    pub fn active_keys(&self) -> Vec<EntityKey> {
        self.subscriptions.keys().cloned().collect()
    }

    /// Whether the last transport event was `Connected`.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Delivery and control-frame counters.
    pub fn stats(&self) -> &MultiplexerStats {
        &self.stats
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
