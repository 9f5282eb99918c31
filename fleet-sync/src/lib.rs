//! # fleet-sync: Live vehicle tracking synchronization core
//!
//! Routes a multiplexed stream of position reports from one WebSocket
//! connection to per-vehicle markers on a map, without mutating the map while
//! its camera is moving.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  TransportEvent   ┌─────────────┐  DataFrame   ┌──────────────┐
//! │ WsTransport │ ────────────────► │ Multiplexer │ ───────────► │ UpdateBuffer │
//! │ (reconnect) │ ◄──────────────── │ (per plate) │   callback   │ (motion-     │
//! └─────────────┘   ControlFrame    └─────────────┘              │  aware)      │
//!                                                                └──────┬───────┘
//!                     movestart / moveend ─────────────────────────►    │
//!                                                                       ▼
//!                                                                ┌──────────────┐
//!                                                                │RenderSurface │
//!                                                                └──────────────┘
//! ```
//!
//! [`Tracker`] runs all of this on one task.
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire envelope, `PositionReport`, `EntityKey`
//! - [`multiplexer`]: Subscription fan-out with resubscribe on reconnect
//! - [`buffer`]: Motion-aware update buffer and the `RenderSurface` trait
//! - [`tracker`]: Event loop binding multiplexer, buffer and surface
//! - [`ws`]: tokio-tungstenite transport with fixed-delay reconnect
//! - [`config`]: JSON-loadable client configuration
//! - [`error`]: `SyncError`

pub mod buffer;
pub mod config;
pub mod error;
pub mod multiplexer;
pub mod protocol;
pub mod tracker;
pub mod ws;

// Re-exports for convenience
pub use buffer::{
    BufferStats, MarkerKind, MarkerState, MotionState, QueuedUpdate, RenderSurface,
    UpdateBuffer, ViewportEvent,
};
pub use config::{BufferConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use multiplexer::{Callback, Multiplexer, MultiplexerStats, SubscriptionHandle, Transport};
pub use protocol::{
    decode_inbound, ControlFrame, DataFrame, EntityKey, LngLat, PositionReport, ReportSummary,
    TransportEvent, VehicleStatus,
};
pub use tracker::{Tracker, TrackerCommand, TrackerHandle, TrackerSnapshot};
pub use ws::WsTransport;
