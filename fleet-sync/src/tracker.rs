//! Binds the multiplexer and the update buffer to one event loop.
//!
//! ```text
//!   transport events ──┐
//!   commands ──────────┼──► Tracker::run (select!) ──► Multiplexer ──► inbox ──► UpdateBuffer ──► RenderSurface
//!   settle deadline ───┘
//! ```
//!
//! The tracker's own multiplexer callback only forwards frames into an
//! inbox, which is drained into the buffer in the same loop turn as the
//! transport event that carried them. Everything runs on one task, so the
//! buffer and surface need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::buffer::{BufferStats, MotionState, RenderSurface, UpdateBuffer, ViewportEvent};
use crate::config::BufferConfig;
use crate::error::{SyncError, SyncResult};
use crate::multiplexer::{Callback, Multiplexer, MultiplexerStats, SubscriptionHandle, Transport};
use crate::protocol::{DataFrame, EntityKey, PositionReport, TransportEvent};

/// Requests accepted by a running tracker.
#[derive(Debug)]
pub enum TrackerCommand {
    Toggle { key: EntityKey, enabled: bool },
    Viewport(ViewportEvent),
    Report {
        key: EntityKey,
        reply: oneshot::Sender<Option<PositionReport>>,
    },
    Snapshot { reply: oneshot::Sender<TrackerSnapshot> },
    Shutdown,
}

/// Point-in-time view of the tracker for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSnapshot {
    pub motion: MotionState,
    pub queued: usize,
    /// Tracked keys, sorted.
    pub tracked: Vec<EntityKey>,
    pub connected: bool,
    pub buffer: BufferStats,
    pub multiplexer: MultiplexerStats,
}

pub struct Tracker<T: Transport, S: RenderSurface> {
    multiplexer: Multiplexer<T>,
    buffer: UpdateBuffer<S>,
    handles: HashMap<EntityKey, SubscriptionHandle>,
    inbox_tx: mpsc::UnboundedSender<DataFrame>,
    inbox_rx: mpsc::UnboundedReceiver<DataFrame>,
}

impl<T: Transport, S: RenderSurface> Tracker<T, S> {
    /// Create a tracker over `transport` with no surface attached.
    pub fn new(transport: T, config: BufferConfig) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            multiplexer: Multiplexer::new(transport),
            buffer: UpdateBuffer::new(config),
            handles: HashMap::new(),
            inbox_tx,
            inbox_rx,
        }
    }

    /// Attach the map surface, returning the previous one.
    pub fn attach_surface(&mut self, surface: S) -> Option<S> {
        self.buffer.attach_surface(surface)
    }

    /// Detach the map surface. Fails if none is attached.
    pub fn detach_surface(&mut self) -> SyncResult<S> {
        self.buffer.detach_surface().ok_or(SyncError::SurfaceUnavailable)
    }

    /// Start or stop tracking `key`. Repeating the current state is a no-op.
    pub fn on_toggle_entity(&mut self, key: EntityKey, enabled: bool) {
        if enabled {
            if self.handles.contains_key(&key) {
                return;
            }
            log::info!("Tracking vehicle {key}");
            self.buffer.track(key.clone());
            let handle = self.multiplexer.subscribe(key.clone(), self.forwarder());
            self.handles.insert(key, handle);
        } else {
            let Some(handle) = self.handles.remove(&key) else {
                return;
            };
            log::info!("No longer tracking vehicle {key}");
            self.multiplexer.unsubscribe(&key, Some(handle));
            self.buffer.untrack(&key);
        }
    }

    fn forwarder(&self) -> Callback {
        let inbox = self.inbox_tx.clone();
        Arc::new(move |frame: &DataFrame| {
            // The receiver lives as long as the tracker.
            let _ = inbox.send(frame.clone());
        })
    }

    /// Route a transport event and apply any frames it delivered.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        self.multiplexer.handle_event(event);
        while let Ok(frame) = self.inbox_rx.try_recv() {
            self.buffer.on_frame(&frame);
        }
    }

    /// Forward a camera event to the buffer.
    pub fn handle_viewport_event(&mut self, event: ViewportEvent, now: Instant) {
        self.buffer.on_viewport(event, now);
    }

    /// Settle the buffer if its deadline has passed.
    pub fn poll_settle(&mut self, now: Instant) -> bool {
        self.buffer.poll_settle(now)
    }

    /// Latest report received for `key`.
    pub fn report(&self, key: &EntityKey) -> Option<&PositionReport> {
        self.buffer.latest_report(key)
    }

    /// Current motion, queue and counter state.
    pub fn snapshot(&self) -> TrackerSnapshot {
        let mut tracked: Vec<EntityKey> = self.handles.keys().cloned().collect();
        tracked.sort();
        TrackerSnapshot {
            motion: self.buffer.motion(),
            queued: self.buffer.queue_len(),
            tracked,
            connected: self.multiplexer.is_connected(),
            buffer: self.buffer.stats().clone(),
            multiplexer: self.multiplexer.stats().clone(),
        }
    }

    /// The multiplexer.
    pub fn multiplexer(&self) -> &Multiplexer<T> {
        &self.multiplexer
    }

    /// The update buffer.
    pub fn buffer(&self) -> &UpdateBuffer<S> {
        &self.buffer
    }

    fn handle_command(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Toggle { key, enabled } => self.on_toggle_entity(key, enabled),
            TrackerCommand::Viewport(event) => self.handle_viewport_event(event, Instant::now()),
            TrackerCommand::Report { key, reply } => {
                let _ = reply.send(self.report(&key).cloned());
            }
            TrackerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop.
            TrackerCommand::Shutdown => {}
        }
    }

    /// Drive the tracker until shutdown, then close the transport and hand
    /// the tracker back.
    ///
    /// Stops on `Shutdown`, when every command sender is gone, or when the
    /// transport event stream ends.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut commands: mpsc::Receiver<TrackerCommand>,
    ) -> Self {
        loop {
            let deadline = self.buffer.settle_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        log::info!("Transport event stream ended");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(TrackerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.poll_settle(Instant::now());
                }
            }
        }

        log::info!("Tracker shutting down");
        self.multiplexer.disconnect();
        self
    }
}

impl<T, S> Tracker<T, S>
where
    T: Transport + Send + 'static,
    S: RenderSurface + Send + 'static,
{
    /// Spawn [`Tracker::run`] on the current runtime.
    pub fn spawn(
        self,
        events: mpsc::Receiver<TransportEvent>,
        capacity: usize,
    ) -> (TrackerHandle, JoinHandle<Self>) {
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(self.run(events, rx));
        (TrackerHandle { commands: tx }, task)
    }
}

/// Cloneable sender side of a running tracker.
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<TrackerCommand>,
}

impl TrackerHandle {
    async fn send(&self, command: TrackerCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::ConnectionClosed)
    }

    /// Start (`enabled`) or stop tracking a vehicle.
    pub async fn toggle(&self, key: impl Into<EntityKey>, enabled: bool) -> SyncResult<()> {
        self.send(TrackerCommand::Toggle {
            key: key.into(),
            enabled,
        })
        .await
    }

    /// Signal that the camera started moving.
    pub async fn move_start(&self) -> SyncResult<()> {
        self.send(TrackerCommand::Viewport(ViewportEvent::MoveStart)).await
    }

    /// Signal that the camera stopped moving.
    pub async fn move_end(&self) -> SyncResult<()> {
        self.send(TrackerCommand::Viewport(ViewportEvent::MoveEnd)).await
    }

    /// Latest report received for `key`.
    pub async fn report(&self, key: impl Into<EntityKey>) -> SyncResult<Option<PositionReport>> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Report {
            key: key.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::ConnectionClosed)
    }

    /// Counters and state of the running tracker.
    pub async fn snapshot(&self) -> SyncResult<TrackerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| SyncError::ConnectionClosed)
    }

    /// Stop the tracker and close its transport.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(TrackerCommand::Shutdown).await
    }
}
