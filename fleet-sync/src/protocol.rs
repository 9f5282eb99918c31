//! Data model and JSON wire envelope for live vehicle tracking.
//!
//! Wire format (one JSON text frame per message):
//! ```text
//! client → server   {"event": "subscribeToVehicle",     "data": {"plate": "DXB-AX-36352"}}
//! client → server   {"event": "unsubscribeFromVehicle", "data": {"plate": "DXB-AX-36352"}}
//! server → client   {"event": "vehicleData",
//!                    "data": {"plate": "DXB-AX-36352",
//!                             "data": {"lat": 25.2, "lng": 55.27, "angle": 45,
//!                                      "speed": 60, "status": "moving",
//!                                      "timestamp": "2024-01-01T12:00:00Z"}}}
//! ```
//!
//! The multiplexer routes on `plate` only; the inner `data` object stays an
//! opaque [`serde_json::Value`] until the update buffer turns it into a
//! [`PositionReport`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{SyncError, SyncResult};

pub const SUBSCRIBE_EVENT: &str = "subscribeToVehicle";
pub const UNSUBSCRIBE_EVENT: &str = "unsubscribeFromVehicle";
pub const DATA_EVENT: &str = "vehicleData";

/// Positions are compared at 1e-6 degrees (~11cm at the equator).
const COORDINATE_SCALE: f64 = 1e6;

/// Opaque identifier of a tracked vehicle (its plate).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Vehicle status tag. Unknown wire values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VehicleStatus {
    Moving,
    Stationary,
    Other(String),
}

impl VehicleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Moving => "moving",
            Self::Stationary => "stationary",
            Self::Other(s) => s,
        }
    }

    /// Moving vehicles render a heading arrow; everything else a plain icon.
    pub fn is_moving(&self) -> bool {
        matches!(self, Self::Moving)
    }
}

impl From<String> for VehicleStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "moving" => Self::Moving,
            "stationary" => Self::Stationary,
            _ => Self::Other(s),
        }
    }
}

impl From<VehicleStatus> for String {
    fn from(status: VehicleStatus) -> Self {
        match status {
            VehicleStatus::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic coordinate in map order (longitude first).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Snap to the comparison grid used for redundant-update detection.
    pub fn rounded(&self) -> LngLat {
        LngLat {
            lng: (self.lng * COORDINATE_SCALE).round() / COORDINATE_SCALE,
            lat: (self.lat * COORDINATE_SCALE).round() / COORDINATE_SCALE,
        }
    }
}

/// Inner `data` object of a `vehicleData` frame.
#[derive(Debug, Deserialize)]
struct ReportFields {
    lat: f64,
    lng: f64,
    angle: f64,
    speed: f64,
    status: VehicleStatus,
    timestamp: DateTime<Utc>,
}

/// One live position report for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    pub entity_key: EntityKey,
    pub lat: f64,
    pub lng: f64,
    /// Heading in degrees, normalised to `[0, 360)`.
    pub angle: f64,
    /// Speed in km/h.
    pub speed: f64,
    pub status: VehicleStatus,
    pub timestamp: DateTime<Utc>,
}

impl PositionReport {
    /// Parse and validate the opaque payload of a data frame.
    pub fn from_payload(entity_key: EntityKey, payload: &Value) -> SyncResult<Self> {
        let fields = match ReportFields::deserialize(payload) {
            Ok(fields) => fields,
            Err(e) => {
                return Err(SyncError::MalformedReport {
                    key: entity_key,
                    reason: e.to_string(),
                })
            }
        };

        let reason = if !fields.lat.is_finite() || fields.lat.abs() > 90.0 {
            Some(format!("latitude {} out of range", fields.lat))
        } else if !fields.lng.is_finite() || fields.lng.abs() > 180.0 {
            Some(format!("longitude {} out of range", fields.lng))
        } else if !fields.angle.is_finite() {
            Some("angle is not finite".to_string())
        } else if !fields.speed.is_finite() {
            Some("speed is not finite".to_string())
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(SyncError::MalformedReport { key: entity_key, reason });
        }

        // rem_euclid rounds tiny negatives up to 360.0 itself.
        let angle = fields.angle.rem_euclid(360.0);
        let angle = if angle >= 360.0 { 0.0 } else { angle };

        Ok(Self {
            entity_key,
            lat: fields.lat,
            lng: fields.lng,
            angle,
            speed: fields.speed,
            status: fields.status,
            timestamp: fields.timestamp,
        })
    }

    pub fn position(&self) -> LngLat {
        LngLat::new(self.lng, self.lat)
    }

    pub fn summary(&self) -> ReportSummary<'_> {
        ReportSummary(self)
    }
}

/// Human-readable status line for an info panel.
pub struct ReportSummary<'a>(&'a PositionReport);

impl fmt::Display for ReportSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.0;
        write!(
            f,
            "{}: status {} | speed {} km/h | direction {}° | position {:.6}, {:.6} | time {}",
            r.entity_key,
            r.status,
            r.speed,
            r.angle,
            r.lat,
            r.lng,
            r.timestamp.format("%H:%M:%S"),
        )
    }
}

/// Subscription control message sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Subscribe(EntityKey),
    Unsubscribe(EntityKey),
}

impl ControlFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => SUBSCRIBE_EVENT,
            Self::Unsubscribe(_) => UNSUBSCRIBE_EVENT,
        }
    }

    pub fn entity_key(&self) -> &EntityKey {
        match self {
            Self::Subscribe(key) | Self::Unsubscribe(key) => key,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> String {
        json!({
            "event": self.event_name(),
            "data": { "plate": self.entity_key() },
        })
        .to_string()
    }
}

/// Inbound data for one entity, payload not yet interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    #[serde(rename = "plate")]
    pub entity_key: EntityKey,
    #[serde(rename = "data")]
    pub payload: Value,
}

impl DataFrame {
    pub fn new(entity_key: impl Into<EntityKey>, payload: Value) -> Self {
        Self {
            entity_key: entity_key.into(),
            payload,
        }
    }

    /// Serialize as a `vehicleData` text frame (server side, tests).
    pub fn encode(&self) -> String {
        json!({ "event": DATA_EVENT, "data": self }).to_string()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decode an inbound text frame.
///
/// Returns `Ok(None)` for well-formed envelopes of events this client does not
/// consume.
pub fn decode_inbound(text: &str) -> SyncResult<Option<DataFrame>> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| SyncError::MalformedFrame(e.to_string()))?;
    if envelope.event != DATA_EVENT {
        return Ok(None);
    }
    let frame = DataFrame::deserialize(envelope.data)
        .map_err(|e| SyncError::MalformedFrame(e.to_string()))?;
    Ok(Some(frame))
}

/// Lifecycle and data events produced by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Data(DataFrame),
}
