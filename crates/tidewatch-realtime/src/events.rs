//! Event names and payload shapes shared with the hazard server.

use serde::{Deserialize, Serialize};

/// Local event fired on every connect/disconnect with [`ConnectionStatus`].
pub const CONNECTION_STATUS: &str = "connection_status";
/// Local event fired when the transport cannot connect.
pub const CONNECTION_ERROR: &str = "connection_error";

/// A citizen or official filed a new hazard report.
pub const NEW_HAZARD_REPORT: &str = "new_hazard_report";
/// A report moved through verification.
pub const REPORT_STATUS_UPDATE: &str = "report_status_update";
/// Authority-issued emergency alert.
pub const EMERGENCY_ALERT: &str = "emergency_alert";
/// Hotspot clustering changed.
pub const HOTSPOT_UPDATE: &str = "hotspot_update";

/// Server-pushed domain events.
pub const SERVER_EVENTS: [&str; 4] = [
    NEW_HAZARD_REPORT,
    REPORT_STATUS_UPDATE,
    EMERGENCY_ALERT,
    HOTSPOT_UPDATE,
];

/// Join the room for a point and radius.
pub const JOIN_LOCATION_ROOM: &str = "join_location_room";
/// Leave a previously joined room.
pub const LEAVE_LOCATION_ROOM: &str = "leave_location_room";
/// Start receiving updates for a bounding box.
pub const SUBSCRIBE_AREA_UPDATES: &str = "subscribe_area_updates";
/// Stop area updates. Carries no payload.
pub const UNSUBSCRIBE_AREA_UPDATES: &str = "unsubscribe_area_updates";

/// Radius used by `join_location_room` when none is given.
pub const DEFAULT_ROOM_RADIUS: f64 = 10.0;

/// Payload of [`CONNECTION_STATUS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether the transport is connected.
    pub connected: bool,
}

/// Payload of [`JOIN_LOCATION_ROOM`].
///
/// Coordinates are forwarded unvalidated; the server decides what is valid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationRoom {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Radius in kilometres.
    pub radius: f64,
}

/// Payload of [`LEAVE_LOCATION_ROOM`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaveLocationRoom {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// A lat/lng bounding box for [`SUBSCRIBE_AREA_UPDATES`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AreaBounds {
    /// Northern edge, latitude in degrees.
    pub north: f64,
    /// Southern edge, latitude in degrees.
    pub south: f64,
    /// Eastern edge, longitude in degrees.
    pub east: f64,
    /// Western edge, longitude in degrees.
    pub west: f64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn location_room_wire_shape() {
        let room = LocationRoom {
            latitude: 19.076,
            longitude: 72.8777,
            radius: DEFAULT_ROOM_RADIUS,
        };
        assert_eq!(
            serde_json::to_value(room).unwrap(),
            json!({"latitude": 19.076, "longitude": 72.8777, "radius": 10.0})
        );
    }

    #[test]
    fn leave_room_has_no_radius() {
        let leave = LeaveLocationRoom {
            latitude: 13.08,
            longitude: 80.27,
        };
        let value = serde_json::to_value(leave).unwrap();
        assert!(value.get("radius").is_none());
    }

    #[test]
    fn connection_status_shape() {
        let v = serde_json::to_value(ConnectionStatus { connected: true }).unwrap();
        assert_eq!(v, json!({"connected": true}));
    }

    #[test]
    fn area_bounds_roundtrip_from_server_json() {
        let bounds: AreaBounds =
            serde_json::from_value(json!({"north": 20.0, "south": 18.5, "east": 73.2, "west": 72.6}))
                .unwrap();
        assert!((bounds.north - 20.0).abs() < f64::EPSILON);
        assert!((bounds.west - 72.6).abs() < f64::EPSILON);
    }
}
