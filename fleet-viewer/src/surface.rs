//! Render surface that writes every marker mutation to the log.

use fleet_sync::{EntityKey, LngLat, MarkerKind, MarkerState, RenderSurface, VehicleStatus};
use log::info;

#[derive(Debug, Default)]
pub struct LogSurface {
    live_markers: usize,
    mutations: u64,
}

impl LogSurface {
    pub fn live_markers(&self) -> usize {
        self.live_markers
    }

    pub fn mutations(&self) -> u64 {
        self.mutations
    }
}

impl RenderSurface for LogSurface {
    fn create_marker(&mut self, key: &EntityKey, kind: MarkerKind, state: &MarkerState) {
        self.mutations += 1;
        match kind {
            MarkerKind::Live => {
                self.live_markers += 1;
                info!(
                    "[map] + {key} at {:.6}, {:.6} ({}, {}°)",
                    state.position.lat, state.position.lng, state.status, state.angle
                );
            }
            MarkerKind::Origin => info!(
                "[map] + start pin for {key} at {:.6}, {:.6}",
                state.position.lat, state.position.lng
            ),
        }
    }

    fn update_marker(&mut self, key: &EntityKey, state: &MarkerState, restyle: bool) {
        self.mutations += 1;
        let position = state.position;
        if !restyle {
            info!("[map] ~ {key} -> {:.6}, {:.6}", position.lat, position.lng);
        } else if state.status.is_moving() {
            info!(
                "[map] ~ {key} -> {:.6}, {:.6} arrow {}°",
                position.lat, position.lng, state.angle
            );
        } else {
            info!(
                "[map] ~ {key} -> {:.6}, {:.6} icon {}",
                position.lat, position.lng, state.status
            );
        }
    }

    fn remove_marker(&mut self, key: &EntityKey, kind: MarkerKind) {
        self.mutations += 1;
        if kind == MarkerKind::Live {
            self.live_markers = self.live_markers.saturating_sub(1);
        }
        info!("[map] - {kind:?} marker for {key}");
    }

    fn center_on(&mut self, position: LngLat, zoom: f64) {
        info!(
            "[map] center {:.6}, {:.6} zoom {zoom}",
            position.lat, position.lng
        );
    }
}
