//! Motion-aware update buffer between live reports and the map surface.
//!
//! ## State machine
//!
//! ```text
//!              movestart                      settle deadline passes
//!   ┌──────┐ ───────────► ┌──────────┐ ──────────────────────────────► flush, Idle
//!   │ Idle │              │ InMotion │
//!   └──────┘ ◄─────────── └──────────┘ ◄── movestart cancels the deadline
//!      │                     │    ▲
//!      │ report: apply now   │    └── moveend (re)arms the deadline
//!      ▼                     ▼
//!   RenderSurface         queue.push(update)
//! ```
//!
//! While the camera animates, marker mutations are deferred so they never
//! fight the animation. When motion settles the queue is drained newest-first
//! and only the most recent update per vehicle reaches the surface. This is
//! last-received-wins, not largest-timestamp-wins.
//!
//! The settle timer is a single deadline slot. The owner of the buffer (see
//! [`crate::tracker`]) sleeps until [`UpdateBuffer::settle_deadline`] and then
//! calls [`UpdateBuffer::poll_settle`].

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tokio::time::Instant;

use crate::config::BufferConfig;
use crate::protocol::{DataFrame, EntityKey, LngLat, PositionReport, VehicleStatus};

// ───────────────────────────────────────────────────────────────────
// Render surface contract
// ───────────────────────────────────────────────────────────────────

/// Which marker of a vehicle a surface call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// The live position marker.
    Live,
    /// Pin at the first position reported after tracking started.
    Origin,
}

/// Map widget operations the buffer drives.
///
/// Every data-path change to a marker is exactly one call. Calls must be
/// idempotent: setting a marker to the state it already has is a visual no-op.
pub trait RenderSurface {
    /// Draw a new marker.
    fn create_marker(&mut self, key: &EntityKey, kind: MarkerKind, state: &MarkerState);

    /// Move the live marker to `state.position`.
    ///
    /// When `restyle` is set the icon must also be redrawn from `state`
    /// (arrow rotated to `state.angle` when moving, plain icon otherwise).
    fn update_marker(&mut self, key: &EntityKey, state: &MarkerState, restyle: bool);

    /// Remove a marker from the map.
    fn remove_marker(&mut self, key: &EntityKey, kind: MarkerKind);

    /// Move the camera. Surfaces without a camera can ignore this.
    fn center_on(&mut self, _position: LngLat, _zoom: f64) {}
}

/// Visual state of one marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerState {
    pub position: LngLat,
    pub status: VehicleStatus,
    pub angle: f64,
}

impl MarkerState {
    /// Same icon and heading.
    pub fn same_style(&self, other: &MarkerState) -> bool {
        self.status == other.status && self.angle == other.angle
    }

    /// Same position at comparison precision.
    pub fn same_position(&self, other: &MarkerState) -> bool {
        self.position.rounded() == other.position.rounded()
    }
}

impl From<&PositionReport> for MarkerState {
    fn from(report: &PositionReport) -> Self {
        Self {
            position: report.position(),
            status: report.status.clone(),
            angle: report.angle,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Buffer
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    InMotion,
}

/// Camera motion signals from the map widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportEvent {
    MoveStart,
    MoveEnd,
}

/// A deferred marker mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedUpdate {
    pub entity_key: EntityKey,
    pub marker: MarkerState,
}

/// Counters for monitoring the data path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Updates applied to the surface (immediately or by a flush)
    pub applied: u64,
    pub queued: u64,
    pub flushes: u64,
    /// Queue entries superseded by a newer update for the same vehicle
    pub discarded_stale: u64,
    /// Applications where neither style nor rounded position changed
    pub redundant: u64,
    pub dropped_malformed: u64,
    pub dropped_no_surface: u64,
    pub dropped_untracked: u64,
}

#[derive(Debug, Clone, Copy)]
struct Origin {
    position: LngLat,
    drawn: bool,
}

/// Defers surface mutations while the viewport moves.
pub struct UpdateBuffer<S: RenderSurface> {
    config: BufferConfig,
    surface: Option<S>,
    motion: MotionState,
    settle_deadline: Option<Instant>,
    queue: Vec<QueuedUpdate>,
    /// What the surface currently shows for each live marker.
    markers: HashMap<EntityKey, MarkerState>,
    origins: HashMap<EntityKey, Origin>,
    latest: HashMap<EntityKey, PositionReport>,
    tracked: HashSet<EntityKey>,
    centered: bool,
    stats: BufferStats,
}

impl<S: RenderSurface> UpdateBuffer<S> {
    /// Create an idle buffer with no surface and nothing tracked.
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            surface: None,
            motion: MotionState::Idle,
            settle_deadline: None,
            queue: Vec::new(),
            markers: HashMap::new(),
            origins: HashMap::new(),
            latest: HashMap::new(),
            tracked: HashSet::new(),
            centered: false,
            stats: BufferStats::default(),
        }
    }

    /// Attach the map surface, returning the previous one.
    ///
    /// Marker bookkeeping starts over: a new surface shows nothing yet.
    pub fn attach_surface(&mut self, surface: S) -> Option<S> {
        self.reset_render_state();
        self.surface.replace(surface)
    }

    /// Detach the surface. Queued updates are discarded with it.
    pub fn detach_surface(&mut self) -> Option<S> {
        self.reset_render_state();
        self.queue.clear();
        self.surface.take()
    }

    fn reset_render_state(&mut self) {
        self.markers.clear();
        for origin in self.origins.values_mut() {
            origin.drawn = false;
        }
        self.centered = false;
    }

    /// Accept reports for `key` from now on.
    pub fn track(&mut self, key: EntityKey) {
        self.tracked.insert(key);
    }

    /// Stop tracking `key` and remove everything it put on the surface.
    ///
    /// Takes effect immediately, also while the viewport is in motion.
    pub fn untrack(&mut self, key: &EntityKey) {
        self.tracked.remove(key);
        self.queue.retain(|update| &update.entity_key != key);
        self.latest.remove(key);

        let had_marker = self.markers.remove(key).is_some();
        let origin_drawn = self.origins.remove(key).is_some_and(|o| o.drawn);

        if let Some(surface) = self.surface.as_mut() {
            if had_marker {
                surface.remove_marker(key, MarkerKind::Live);
            }
            if origin_drawn {
                surface.remove_marker(key, MarkerKind::Origin);
            }
        }
    }

    /// Parse one routed frame and hand it to [`Self::on_report`].
    pub fn on_frame(&mut self, frame: &DataFrame) {
        if !self.tracked.contains(&frame.entity_key) {
            log::debug!("Ignoring frame for untracked vehicle {}", frame.entity_key);
            self.stats.dropped_untracked += 1;
            return;
        }
        match PositionReport::from_payload(frame.entity_key.clone(), &frame.payload) {
            Ok(report) => self.on_report(report),
            Err(e) => {
                log::warn!("Dropping report: {e}");
                self.stats.dropped_malformed += 1;
            }
        }
    }

    /// Apply a report now (Idle) or queue it (InMotion).
    pub fn on_report(&mut self, report: PositionReport) {
        let key = report.entity_key.clone();
        if !self.tracked.contains(&key) {
            self.stats.dropped_untracked += 1;
            return;
        }
        if self.surface.is_none() {
            log::debug!("Render surface not ready; dropping report for {key}");
            self.stats.dropped_no_surface += 1;
            return;
        }

        if self.config.show_origin_markers {
            self.origins.entry(key.clone()).or_insert(Origin {
                position: report.position(),
                drawn: false,
            });
        }

        let update = QueuedUpdate {
            entity_key: key.clone(),
            marker: MarkerState::from(&report),
        };
        self.latest.insert(key, report);

        match self.motion {
            MotionState::Idle => self.apply(update),
            MotionState::InMotion => {
                self.queue.push(update);
                self.stats.queued += 1;
            }
        }
    }

    /// Feed a camera signal. `now` is when the signal was observed.
    pub fn on_viewport(&mut self, event: ViewportEvent, now: Instant) {
        match event {
            ViewportEvent::MoveStart => {
                if self.settle_deadline.take().is_some() {
                    log::debug!("Motion resumed before settling");
                }
                self.motion = MotionState::InMotion;
            }
            ViewportEvent::MoveEnd => {
                if self.motion == MotionState::InMotion {
                    self.settle_deadline = Some(now + self.config.settle_delay());
                }
            }
        }
    }

    /// When the pending settle timer fires, if one is armed.
    pub fn settle_deadline(&self) -> Option<Instant> {
        self.settle_deadline
    }

    /// Settle and flush if the deadline has passed. Returns whether it did.
    pub fn poll_settle(&mut self, now: Instant) -> bool {
        match self.settle_deadline {
            Some(deadline) if deadline <= now => {
                self.settle_deadline = None;
                self.motion = MotionState::Idle;
                self.flush();
                true
            }
            _ => false,
        }
    }

    /// Apply queued updates, newest first, one per vehicle.
    ///
    /// The queue is taken before iterating; anything queued afterwards waits
    /// for the next flush. Returns the number of updates applied.
    pub fn flush(&mut self) -> usize {
        let pending = std::mem::take(&mut self.queue);
        let mut handled = HashSet::with_capacity(pending.len());
        let mut applied = 0;

        for update in pending.into_iter().rev() {
            if !handled.insert(update.entity_key.clone()) {
                self.stats.discarded_stale += 1;
                continue;
            }
            self.apply(update);
            applied += 1;
        }

        self.stats.flushes += 1;
        log::debug!("Flushed {applied} queued update(s)");
        applied
    }

    fn apply(&mut self, update: QueuedUpdate) {
        let Some(surface) = self.surface.as_mut() else {
            self.stats.dropped_no_surface += 1;
            return;
        };
        let QueuedUpdate { entity_key, marker } = update;

        if self.config.center_on_first_report && !self.centered {
            surface.center_on(marker.position, self.config.center_zoom);
            self.centered = true;
        }

        if let Some(origin) = self.origins.get_mut(&entity_key) {
            if !origin.drawn {
                let pin = MarkerState {
                    position: origin.position,
                    ..marker.clone()
                };
                surface.create_marker(&entity_key, MarkerKind::Origin, &pin);
                origin.drawn = true;
            }
        }

        match self.markers.entry(entity_key) {
            Entry::Vacant(entry) => {
                surface.create_marker(entry.key(), MarkerKind::Live, &marker);
                entry.insert(marker);
            }
            Entry::Occupied(mut entry) => {
                // Position is always pushed, style only when it changed.
                let current = entry.get();
                let restyle = !current.same_style(&marker);
                if !restyle && current.same_position(&marker) {
                    self.stats.redundant += 1;
                }
                surface.update_marker(entry.key(), &marker, restyle);
                entry.insert(marker);
            }
        }
        self.stats.applied += 1;
    }

    /// Whether the viewport is currently moving.
    pub fn motion(&self) -> MotionState {
        self.motion
    }

    /// Updates waiting for the next flush.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// What the surface shows for `key`'s live marker.
    pub fn marker(&self, key: &EntityKey) -> Option<&MarkerState> {
        self.markers.get(key)
    }

    /// Last report received for `key`, applied or still queued.
    pub fn latest_report(&self, key: &EntityKey) -> Option<&PositionReport> {
        self.latest.get(key)
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut S> {
        self.surface.as_mut()
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Create(EntityKey, MarkerKind, MarkerState),
        Update(EntityKey, MarkerState, bool),
        Remove(EntityKey, MarkerKind),
        Center(LngLat, f64),
    }

    #[derive(Default)]
    struct RecordingSurface {
        calls: Vec<Call>,
    }

    impl RenderSurface for RecordingSurface {
        fn create_marker(&mut self, key: &EntityKey, kind: MarkerKind, state: &MarkerState) {
            self.calls.push(Call::Create(key.clone(), kind, state.clone()));
        }

        fn update_marker(&mut self, key: &EntityKey, state: &MarkerState, restyle: bool) {
            self.calls.push(Call::Update(key.clone(), state.clone(), restyle));
        }

        fn remove_marker(&mut self, key: &EntityKey, kind: MarkerKind) {
            self.calls.push(Call::Remove(key.clone(), kind));
        }

        fn center_on(&mut self, position: LngLat, zoom: f64) {
            self.calls.push(Call::Center(position, zoom));
        }
    }

    fn report(key: &str, lat: f64, lng: f64, angle: f64, status: &str) -> PositionReport {
        PositionReport::from_payload(
            key.into(),
            &json!({
                "lat": lat,
                "lng": lng,
                "angle": angle,
                "speed": 40,
                "status": status,
                "timestamp": "2024-01-01T12:00:00Z",
            }),
        )
        .unwrap()
    }

    fn buffer_with(config: BufferConfig, keys: &[&str]) -> UpdateBuffer<RecordingSurface> {
        let mut buffer = UpdateBuffer::new(config);
        buffer.attach_surface(RecordingSurface::default());
        for key in keys {
            buffer.track((*key).into());
        }
        buffer
    }

    fn buffer(keys: &[&str]) -> UpdateBuffer<RecordingSurface> {
        buffer_with(BufferConfig::default(), keys)
    }

    fn state(lat: f64, lng: f64, angle: f64, status: VehicleStatus) -> MarkerState {
        MarkerState {
            position: LngLat::new(lng, lat),
            status,
            angle,
        }
    }

    fn calls(buffer: &UpdateBuffer<RecordingSurface>) -> &[Call] {
        &buffer.surface().unwrap().calls
    }

    fn clear_calls(buffer: &mut UpdateBuffer<RecordingSurface>) {
        buffer.surface_mut().unwrap().calls.clear();
    }

    fn key(k: &str) -> EntityKey {
        EntityKey::from(k)
    }

    #[test]
    fn test_idle_first_report_creates_marker() {
        let mut buffer = buffer(&["X-1"]);
        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving"));

        assert_eq!(
            calls(&buffer),
            &[Call::Create(
                key("X-1"),
                MarkerKind::Live,
                MarkerState {
                    position: LngLat::new(55.0, 25.0),
                    status: VehicleStatus::Moving,
                    angle: 90.0,
                }
            )]
        );
        assert_eq!(buffer.stats().applied, 1);
    }

    #[test]
    fn test_idle_update_sets_position_and_changed_style() {
        let mut buffer = buffer(&["X-1"]);
        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving"));
        clear_calls(&mut buffer);

        buffer.on_report(report("X-1", 25.1, 55.1, 90.0, "moving"));
        assert_eq!(
            calls(&buffer),
            &[Call::Update(key("X-1"), state(25.1, 55.1, 90.0, VehicleStatus::Moving), false)]
        );

        clear_calls(&mut buffer);
        buffer.on_report(report("X-1", 25.1, 55.1, 0.0, "stationary"));
        assert_eq!(
            calls(&buffer),
            &[Call::Update(key("X-1"), state(25.1, 55.1, 0.0, VehicleStatus::Stationary), true)]
        );
    }

    #[test]
    fn test_same_report_twice_is_single_position_call() {
        let mut buffer = buffer(&["X-1"]);
        let r = report("X-1", 25.0, 55.0, 90.0, "moving");
        buffer.on_report(r.clone());
        clear_calls(&mut buffer);

        buffer.on_report(r);
        assert_eq!(
            calls(&buffer),
            &[Call::Update(key("X-1"), state(25.0, 55.0, 90.0, VehicleStatus::Moving), false)]
        );
        assert_eq!(buffer.stats().redundant, 1);
    }

    #[test]
    fn test_in_motion_queues_without_mutation() {
        let mut buffer = buffer(&["X-1"]);
        let t0 = Instant::now();
        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving"));
        clear_calls(&mut buffer);

        buffer.on_viewport(ViewportEvent::MoveStart, t0);
        buffer.on_report(report("X-1", 25.1, 55.1, 100.0, "moving"));
        buffer.on_report(report("X-1", 25.2, 55.2, 110.0, "moving"));

        assert!(calls(&buffer).is_empty());
        assert_eq!(buffer.queue_len(), 2);
        assert_eq!(buffer.motion(), MotionState::InMotion);
        // Info for the panel is current even while markers are frozen.
        assert_eq!(buffer.latest_report(&key("X-1")).unwrap().lat, 25.2);
    }

    #[test]
    fn test_flush_last_write_wins_single_mutation() {
        let mut buffer = buffer(&["X-1"]);
        buffer.on_report(report("X-1", 24.0, 54.0, 0.0, "moving"));
        clear_calls(&mut buffer);

        buffer.on_viewport(ViewportEvent::MoveStart, Instant::now());
        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving")); // A
        buffer.on_report(report("X-1", 25.1, 55.1, 90.0, "moving")); // B

        // Position and heading both changed: still one call for the vehicle.
        assert_eq!(buffer.flush(), 1);
        assert_eq!(
            calls(&buffer),
            &[Call::Update(key("X-1"), state(25.1, 55.1, 90.0, VehicleStatus::Moving), true)]
        );
        assert_eq!(buffer.queue_len(), 0);
        assert_eq!(buffer.stats().discarded_stale, 1);
        assert_eq!(buffer.marker(&key("X-1")).unwrap().position, LngLat::new(55.1, 25.1));
    }

    #[test]
    fn test_flush_uses_arrival_order_not_timestamp() {
        let mut buffer = buffer(&["X-1"]);
        buffer.on_viewport(ViewportEvent::MoveStart, Instant::now());

        let mut newer = report("X-1", 25.0, 55.0, 0.0, "moving");
        newer.timestamp = newer.timestamp + chrono::Duration::seconds(10);
        let older = report("X-1", 26.0, 56.0, 0.0, "moving");
        buffer.on_report(newer);
        buffer.on_report(older);

        buffer.flush();
        assert_eq!(buffer.marker(&key("X-1")).unwrap().position, LngLat::new(56.0, 26.0));
    }

    #[test]
    fn test_flush_handles_many_vehicles() {
        let mut buffer = buffer(&["A", "B", "C"]);
        buffer.on_viewport(ViewportEvent::MoveStart, Instant::now());
        for i in 0..5 {
            for k in ["A", "B", "C"] {
                buffer.on_report(report(k, 25.0 + i as f64 * 0.01, 55.0, 0.0, "moving"));
            }
        }
        assert_eq!(buffer.queue_len(), 15);

        assert_eq!(buffer.flush(), 3);
        assert_eq!(calls(&buffer).len(), 3);
        for k in ["A", "B", "C"] {
            assert!((buffer.marker(&key(k)).unwrap().position.lat - 25.04).abs() < 1e-9);
        }
    }

    #[test]
    fn test_settle_after_delay() {
        let mut buffer = buffer(&["X-1"]);
        let t0 = Instant::now();
        buffer.on_viewport(ViewportEvent::MoveStart, t0);
        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving"));
        buffer.on_viewport(ViewportEvent::MoveEnd, t0);

        assert_eq!(buffer.settle_deadline(), Some(t0 + Duration::from_millis(150)));
        assert!(!buffer.poll_settle(t0 + Duration::from_millis(149)));
        assert_eq!(buffer.motion(), MotionState::InMotion);
        assert!(calls(&buffer).is_empty());

        assert!(buffer.poll_settle(t0 + Duration::from_millis(150)));
        assert_eq!(buffer.motion(), MotionState::Idle);
        assert_eq!(calls(&buffer).len(), 1);
        assert!(buffer.settle_deadline().is_none());
    }

    #[test]
    fn test_movestart_cancels_pending_settle() {
        let mut buffer = buffer(&["X-1"]);
        let t0 = Instant::now();
        buffer.on_viewport(ViewportEvent::MoveStart, t0);
        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving"));
        buffer.on_viewport(ViewportEvent::MoveEnd, t0);
        buffer.on_viewport(ViewportEvent::MoveStart, t0 + Duration::from_millis(50));

        assert!(buffer.settle_deadline().is_none());
        assert!(!buffer.poll_settle(t0 + Duration::from_secs(5)));
        assert_eq!(buffer.stats().flushes, 0);

        let t1 = t0 + Duration::from_millis(400);
        buffer.on_viewport(ViewportEvent::MoveEnd, t1);
        assert!(!buffer.poll_settle(t1 + Duration::from_millis(100)));
        assert!(buffer.poll_settle(t1 + Duration::from_millis(150)));
        assert_eq!(buffer.stats().flushes, 1);
    }

    #[test]
    fn test_moveend_rearms_deadline() {
        let mut buffer = buffer(&[]);
        let t0 = Instant::now();
        buffer.on_viewport(ViewportEvent::MoveStart, t0);
        buffer.on_viewport(ViewportEvent::MoveEnd, t0);
        buffer.on_viewport(ViewportEvent::MoveEnd, t0 + Duration::from_millis(100));
        assert_eq!(buffer.settle_deadline(), Some(t0 + Duration::from_millis(250)));
    }

    #[test]
    fn test_moveend_while_idle_is_ignored() {
        let mut buffer = buffer(&[]);
        buffer.on_viewport(ViewportEvent::MoveEnd, Instant::now());
        assert!(buffer.settle_deadline().is_none());
        assert_eq!(buffer.motion(), MotionState::Idle);
    }

    #[test]
    fn test_untrack_purges_queue_and_removes_marker() {
        let mut buffer = buffer(&["X-1", "Y-2"]);
        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving"));
        buffer.on_viewport(ViewportEvent::MoveStart, Instant::now());
        buffer.on_report(report("X-1", 25.1, 55.1, 90.0, "moving"));
        buffer.on_report(report("Y-2", 24.0, 54.0, 90.0, "moving"));
        clear_calls(&mut buffer);

        buffer.untrack(&key("X-1"));
        // Removed right away, even mid-motion.
        assert_eq!(calls(&buffer), &[Call::Remove(key("X-1"), MarkerKind::Live)]);
        assert_eq!(buffer.queue_len(), 1);
        assert!(buffer.latest_report(&key("X-1")).is_none());

        // Late frame for the untracked vehicle never reaches the surface.
        buffer.on_report(report("X-1", 26.0, 56.0, 90.0, "moving"));
        buffer.flush();
        assert!(buffer.marker(&key("X-1")).is_none());
        assert_eq!(buffer.stats().dropped_untracked, 1);
        assert!(buffer.marker(&key("Y-2")).is_some());
    }

    #[test]
    fn test_no_surface_drops_without_backlog() {
        let mut buffer: UpdateBuffer<RecordingSurface> = UpdateBuffer::new(BufferConfig::default());
        buffer.track(key("X-1"));
        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving"));
        assert_eq!(buffer.stats().dropped_no_surface, 1);

        buffer.attach_surface(RecordingSurface::default());
        assert!(calls(&buffer).is_empty());
        assert!(buffer.latest_report(&key("X-1")).is_none());
    }

    #[test]
    fn test_malformed_frame_dropped() {
        let mut buffer = buffer(&["X-1", "Y-2"]);
        buffer.on_frame(&DataFrame::new("X-1", json!({ "lat": 25.0 })));
        buffer.on_frame(&DataFrame::new(
            "Y-2",
            json!({
                "lat": 24.0, "lng": 54.0, "angle": 10, "speed": 0,
                "status": "stationary", "timestamp": "2024-01-01T12:00:00Z",
            }),
        ));

        assert_eq!(buffer.stats().dropped_malformed, 1);
        assert!(buffer.marker(&key("X-1")).is_none());
        assert!(buffer.marker(&key("Y-2")).is_some());
    }

    #[test]
    fn test_origin_marker_and_centering() {
        let config = BufferConfig {
            show_origin_markers: true,
            center_on_first_report: true,
            ..BufferConfig::default()
        };
        let mut buffer = buffer_with(config, &["X-1", "Y-2"]);

        buffer.on_viewport(ViewportEvent::MoveStart, Instant::now());
        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving"));
        buffer.on_report(report("X-1", 25.1, 55.1, 95.0, "moving"));
        assert!(calls(&buffer).is_empty());
        buffer.flush();

        let recorded = calls(&buffer).to_vec();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[0], Call::Center(LngLat::new(55.1, 25.1), 14.0));
        match &recorded[1] {
            Call::Create(k, MarkerKind::Origin, state) => {
                assert_eq!(k, &key("X-1"));
                assert_eq!(state.position, LngLat::new(55.0, 25.0));
            }
            other => panic!("Expected origin marker, got {other:?}"),
        }
        assert!(matches!(&recorded[2], Call::Create(_, MarkerKind::Live, _)));

        // Centering happens once.
        clear_calls(&mut buffer);
        buffer.on_report(report("Y-2", 24.0, 54.0, 0.0, "moving"));
        assert!(!calls(&buffer).iter().any(|c| matches!(c, Call::Center(..))));

        clear_calls(&mut buffer);
        buffer.untrack(&key("X-1"));
        assert_eq!(
            calls(&buffer),
            &[
                Call::Remove(key("X-1"), MarkerKind::Live),
                Call::Remove(key("X-1"), MarkerKind::Origin),
            ]
        );
    }

    #[test]
    fn test_scenario_move_then_settle() {
        let mut buffer = buffer(&["X-1"]);
        let t0 = Instant::now();

        buffer.on_report(report("X-1", 25.0, 55.0, 90.0, "moving"));
        assert_eq!(calls(&buffer).len(), 1);

        buffer.on_viewport(ViewportEvent::MoveStart, t0);
        buffer.on_report(report("X-1", 25.1, 55.1, 100.0, "moving"));
        assert_eq!(buffer.marker(&key("X-1")).unwrap().position, LngLat::new(55.0, 25.0));
        assert_eq!(buffer.queue_len(), 1);

        buffer.on_viewport(ViewportEvent::MoveEnd, t0);
        buffer.poll_settle(t0 + Duration::from_millis(150));

        let marker = buffer.marker(&key("X-1")).unwrap();
        assert_eq!(marker.position, LngLat::new(55.1, 25.1));
        assert_eq!(marker.angle, 100.0);
        assert_eq!(buffer.queue_len(), 0);
        // Create, then a single restyling update from the flush.
        assert_eq!(calls(&buffer).len(), 2);
        assert!(matches!(&calls(&buffer)[1], Call::Update(_, _, true)));
    }
}
