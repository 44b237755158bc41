use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::geo;

/// Simulator session state, driven by the external camera-state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimState {
    #[default]
    Disconnected,
    /// Connected but not in a flight (menus, loading screens)
    Inactive,
    /// Flying, or a camera that counts as flying (drone, VR)
    Active,
}

/// Camera state reported by the simulator.
/// Only the variants that map to `SimState::Active` are named; everything
/// else (menus, loading, world map) is Inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Cockpit,
    Chase,
    Drone,
    Vr,
    Other(u32),
}

impl CameraState {
    /// Raw camera-state values used by the simulator
    pub fn from_raw(value: u32) -> Self {
        match value {
            2 | 3 => CameraState::Cockpit,
            4 | 5 => CameraState::Chase,
            6 | 7 => CameraState::Drone,
            8 | 9 => CameraState::Vr,
            other => CameraState::Other(other),
        }
    }

    pub fn sim_state(self) -> SimState {
        match self {
            CameraState::Cockpit | CameraState::Chase | CameraState::Drone | CameraState::Vr => {
                SimState::Active
            }
            CameraState::Other(_) => SimState::Inactive,
        }
    }
}

/// Flight stage derived from ground state, speed, and AGL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlightStage {
    #[default]
    Parked,
    Taxi,
    Hold,
    Airborne,
    Landing,
}

/// Determine the flight stage from ground state, ground speed and AGL.
///
/// On the ground: stationary is Parked, under 35 kt is Taxi, faster is a
/// takeoff or landing roll treated as Hold. Airborne below 500 ft AGL and
/// slow counts as Landing.
pub fn derive_flight_stage(on_ground: bool, ground_speed_kt: f64, agl_ft: f64) -> FlightStage {
    if on_ground {
        if ground_speed_kt < 2.0 {
            FlightStage::Parked
        } else if ground_speed_kt < 35.0 {
            FlightStage::Taxi
        } else {
            FlightStage::Hold
        }
    } else if agl_ft < 500.0 && ground_speed_kt < 100.0 {
        FlightStage::Landing
    } else {
        FlightStage::Airborne
    }
}

/// Autopilot summary surfaced for narration context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutopilotSummary {
    pub engaged: bool,
    pub target_altitude_ft: Option<f64>,
    pub target_heading_deg: Option<f64>,
}

/// A validated, normalized telemetry snapshot. Value type, copied freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Telemetry {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude above mean sea level, feet
    pub altitude_msl_ft: f64,
    /// Altitude above ground level, feet
    pub altitude_agl_ft: f64,
    /// True heading 0-360; replaced by the smoothed ground track when airborne
    pub heading_deg: f64,
    /// Ground speed, knots
    pub ground_speed_kt: f64,
    pub on_ground: bool,
    /// Position projected ahead along the track by the prediction window
    pub predicted_latitude: f64,
    pub predicted_longitude: f64,
    pub flight_stage: FlightStage,
    pub autopilot: Option<AutopilotSummary>,
}

impl Telemetry {
    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    pub fn predicted_position(&self) -> (f64, f64) {
        (self.predicted_latitude, self.predicted_longitude)
    }
}

/// Raw values as they arrive from the simulator, before validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_msl_ft: f64,
    pub altitude_agl_ft: f64,
    pub heading_deg: f64,
    pub ground_speed_kt: f64,
    pub on_ground: bool,
    pub camera_state: u32,
}

/// Why a raw sample was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Spurious equator / null-island glitch
    NullIsland,
    /// lat ~ 0 with |lon| ~ 90, another known glitch pattern
    EquatorNinety,
    /// On the ground but AGL above 1000 ft
    GroundAglMismatch,
    /// Coordinates outside the valid lat/lon ranges
    OutOfRange,
}

/// Validate a raw sample. Returns the reason if the sample must be dropped;
/// the previous snapshot then remains in effect.
pub fn validate_sample(sample: &RawSample) -> Option<RejectReason> {
    let lat = sample.latitude;
    let lon = sample.longitude;

    // Longitude is the half-open interval (-180, 180]: the antimeridian is
    // represented as +180, so exactly -180 is out of range
    if !(-90.0..=90.0).contains(&lat) || lon <= -180.0 || lon > 180.0 {
        return Some(RejectReason::OutOfRange);
    }
    if lat.abs() < 0.1 && lon.abs() < 0.1 {
        return Some(RejectReason::NullIsland);
    }
    if lat.abs() < 0.1 && (lon.abs() - 90.0).abs() < 0.1 {
        return Some(RejectReason::EquatorNinety);
    }
    if sample.on_ground && sample.altitude_agl_ft > 1000.0 {
        return Some(RejectReason::GroundAglMismatch);
    }
    None
}

/// Smooths the ground track over the last few positions.
///
/// Raw headings jitter at low speed and in turns; narration and beacon
/// placement want the direction the aircraft is actually tracking over the
/// ground. While airborne the smoother averages the bearings of successive
/// position segments; on the ground (or below 50 ft AGL) the buffer resets
/// and the raw heading passes through.
#[derive(Debug, Default)]
pub struct TrackSmoother {
    points: VecDeque<(f64, f64)>,
}

/// Ring capacity: 5 points -> up to 4 segment bearings averaged
const TRACK_BUFFER_CAPACITY: usize = 5;

impl TrackSmoother {
    pub fn new() -> Self {
        Self {
            points: VecDeque::with_capacity(TRACK_BUFFER_CAPACITY),
        }
    }

    /// Feed a position and get the heading to publish.
    pub fn smooth(
        &mut self,
        lat: f64,
        lon: f64,
        raw_heading_deg: f64,
        on_ground: bool,
        agl_ft: f64,
    ) -> f64 {
        if on_ground || agl_ft < 50.0 {
            self.points.clear();
            return raw_heading_deg;
        }

        if self.points.len() >= TRACK_BUFFER_CAPACITY {
            self.points.pop_front();
        }
        self.points.push_back((lat, lon));

        if self.points.len() < 2 {
            return raw_heading_deg;
        }

        // Average successive segment bearings as unit vectors so the
        // 359/1 degree wrap does not average to 180.
        let mut sum_sin = 0.0;
        let mut sum_cos = 0.0;
        let mut segments = 0usize;
        for ((lat1, lon1), (lat2, lon2)) in self.points.iter().zip(self.points.iter().skip(1)) {
            // Skip zero-length segments (stationary updates)
            if geo::haversine_distance_m(*lat1, *lon1, *lat2, *lon2) < 1.0 {
                continue;
            }
            let bearing = geo::initial_bearing_deg(*lat1, *lon1, *lat2, *lon2).to_radians();
            sum_sin += bearing.sin();
            sum_cos += bearing.cos();
            segments += 1;
        }

        if segments == 0 {
            return raw_heading_deg;
        }

        (sum_sin.atan2(sum_cos).to_degrees() + 360.0) % 360.0
    }

    pub fn reset(&mut self) {
        self.points.clear();
    }
}

/// Compute the predicted position for a sample.
pub fn predict_position(
    lat: f64,
    lon: f64,
    heading_deg: f64,
    ground_speed_kt: f64,
    prediction_window_secs: u64,
) -> (f64, f64) {
    let distance_m = ground_speed_kt * geo::MPS_PER_KNOT * prediction_window_secs as f64;
    if distance_m < 1.0 {
        return (lat, lon);
    }
    geo::destination_point(lat, lon, heading_deg, distance_m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lat: f64, lon: f64, on_ground: bool, agl: f64) -> RawSample {
        RawSample {
            latitude: lat,
            longitude: lon,
            altitude_msl_ft: 3000.0,
            altitude_agl_ft: agl,
            heading_deg: 90.0,
            ground_speed_kt: 120.0,
            on_ground,
            camera_state: 2,
        }
    }

    #[test]
    fn test_validation_rejects_null_island() {
        assert_eq!(
            validate_sample(&sample(0.05, 0.05, false, 3000.0)),
            Some(RejectReason::NullIsland)
        );
        assert_eq!(validate_sample(&sample(0.05, 10.0, false, 3000.0)), None);
    }

    #[test]
    fn test_validation_rejects_equator_ninety_pattern() {
        assert_eq!(
            validate_sample(&sample(0.02, 89.95, false, 3000.0)),
            Some(RejectReason::EquatorNinety)
        );
        assert_eq!(
            validate_sample(&sample(0.02, -90.05, false, 3000.0)),
            Some(RejectReason::EquatorNinety)
        );
    }

    #[test]
    fn test_validation_rejects_ground_agl_mismatch() {
        assert_eq!(
            validate_sample(&sample(45.0, -73.0, true, 1500.0)),
            Some(RejectReason::GroundAglMismatch)
        );
        assert_eq!(validate_sample(&sample(45.0, -73.0, true, 900.0)), None);
        assert_eq!(validate_sample(&sample(45.0, -73.0, false, 1500.0)), None);
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        assert_eq!(
            validate_sample(&sample(91.0, 0.0, false, 100.0)),
            Some(RejectReason::OutOfRange)
        );
        // Longitude convention is (-180, 180]: +180 is legal, -180 is not
        assert_eq!(
            validate_sample(&sample(45.0, -180.0, false, 3000.0)),
            Some(RejectReason::OutOfRange)
        );
        assert_eq!(validate_sample(&sample(45.0, 180.0, false, 3000.0)), None);
        assert_eq!(
            validate_sample(&sample(45.0, -180.5, false, 3000.0)),
            Some(RejectReason::OutOfRange)
        );
    }

    #[test]
    fn test_camera_state_mapping() {
        assert_eq!(CameraState::from_raw(2).sim_state(), SimState::Active);
        assert_eq!(CameraState::from_raw(6).sim_state(), SimState::Active);
        assert_eq!(CameraState::from_raw(9).sim_state(), SimState::Active);
        assert_eq!(CameraState::from_raw(11).sim_state(), SimState::Inactive);
        assert_eq!(CameraState::from_raw(0).sim_state(), SimState::Inactive);
    }

    #[test]
    fn test_flight_stage_taxonomy() {
        assert_eq!(derive_flight_stage(true, 0.0, 0.0), FlightStage::Parked);
        assert_eq!(derive_flight_stage(true, 15.0, 0.0), FlightStage::Taxi);
        assert_eq!(derive_flight_stage(true, 60.0, 0.0), FlightStage::Hold);
        assert_eq!(derive_flight_stage(false, 140.0, 8000.0), FlightStage::Airborne);
        assert_eq!(derive_flight_stage(false, 70.0, 300.0), FlightStage::Landing);
        // Fast and low is still airborne, not landing
        assert_eq!(derive_flight_stage(false, 250.0, 300.0), FlightStage::Airborne);
    }

    #[test]
    fn test_smoother_passes_heading_through_on_ground() {
        let mut smoother = TrackSmoother::new();
        assert_eq!(smoother.smooth(45.0, -73.0, 123.0, true, 0.0), 123.0);
        assert_eq!(smoother.smooth(45.0, -73.0, 124.0, false, 20.0), 124.0);
    }

    #[test]
    fn test_smoother_averages_track_airborne() {
        let mut smoother = TrackSmoother::new();
        // Fly due east in 0.01-degree longitude steps at 45N
        let mut heading = 0.0;
        for i in 0..5 {
            heading = smoother.smooth(45.0, -73.0 + 0.01 * i as f64, 45.0, false, 3000.0);
        }
        // Raw heading says 45 but the track is ~90
        assert!(
            (heading - 90.0).abs() < 1.0,
            "smoothed track should be ~90, got {}",
            heading
        );
    }

    #[test]
    fn test_smoother_resets_on_touchdown() {
        let mut smoother = TrackSmoother::new();
        for i in 0..5 {
            smoother.smooth(45.0, -73.0 + 0.01 * i as f64, 45.0, false, 3000.0);
        }
        // Touchdown resets the buffer and passes the raw heading through
        assert_eq!(smoother.smooth(45.0, -72.95, 45.0, true, 0.0), 45.0);
        // First airborne sample after reset has no segments yet
        assert_eq!(smoother.smooth(45.0, -72.94, 45.0, false, 3000.0), 45.0);
    }

    #[test]
    fn test_smoother_handles_north_wrap() {
        let mut smoother = TrackSmoother::new();
        // Track oscillating around due north must not average to south
        let track = [
            (45.00, -73.0005),
            (45.01, -73.0000),
            (45.02, -73.0005),
            (45.03, -73.0000),
            (45.04, -73.0005),
        ];
        let mut heading = 0.0;
        for (lat, lon) in track {
            heading = smoother.smooth(lat, lon, 0.0, false, 3000.0);
        }
        assert!(
            heading < 5.0 || heading > 355.0,
            "wrap-safe average should stay near north, got {}",
            heading
        );
    }

    #[test]
    fn test_predict_position_stationary() {
        let (lat, lon) = predict_position(45.0, -73.0, 90.0, 0.0, 60);
        assert_eq!((lat, lon), (45.0, -73.0));
    }

    #[test]
    fn test_predict_position_moves_along_heading() {
        // 120 kt for 60 s is ~3.7 km
        let (lat, lon) = predict_position(45.0, -73.0, 90.0, 120.0, 60);
        let d = crate::geo::haversine_distance_m(45.0, -73.0, lat, lon);
        assert!((d - 120.0 * 0.514444 * 60.0).abs() < 5.0, "distance {}", d);
        assert!(lon > -73.0, "moved east");
        assert!((lat - 45.0).abs() < 0.01, "stayed at latitude");
    }
}
