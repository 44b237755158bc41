use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::errors::SimResult;
use crate::geo;

use super::proto::{
    DEFINE_TELEMETRY, ObjectId, ObjectPose, REQUEST_TELEMETRY, Recv, RequestId, SimConnection,
    SimConnector, SimVarType, TelemetryFrame, UpdatePeriod,
};

/// Development connector that synthesizes a circular sightseeing flight.
///
/// Stands in for the native simulator library when none is present: frames
/// arrive at the requested cadence, spawns are confirmed with incrementing
/// object ids, and set-data calls are accepted. Lets the whole pipeline run
/// end to end on any machine.
pub struct LoopbackConnector {
    /// Circle center
    pub center_lat: f64,
    pub center_lon: f64,
    /// Circle radius, meters
    pub radius_m: f64,
    pub altitude_msl_ft: f64,
    pub altitude_agl_ft: f64,
    pub ground_speed_kt: f64,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        // Lap of the Montreal area at 5500 ft
        Self {
            center_lat: 45.5,
            center_lon: -73.6,
            radius_m: 15_000.0,
            altitude_msl_ft: 5_500.0,
            altitude_agl_ft: 5_400.0,
            ground_speed_kt: 140.0,
        }
    }
}

impl SimConnector for LoopbackConnector {
    fn open(&self, app_name: &str) -> SimResult<Box<dyn SimConnection>> {
        Ok(Box::new(LoopbackConnection {
            app_name: app_name.to_string(),
            opened: false,
            started: Instant::now(),
            last_frame: Mutex::new(None),
            frame_period: Duration::from_secs(1),
            next_object_id: AtomicU32::new(1000),
            pending_spawns: Mutex::new(Vec::new()),
            route: LoopbackConnector {
                center_lat: self.center_lat,
                center_lon: self.center_lon,
                radius_m: self.radius_m,
                altitude_msl_ft: self.altitude_msl_ft,
                altitude_agl_ft: self.altitude_agl_ft,
                ground_speed_kt: self.ground_speed_kt,
            },
        }))
    }
}

struct LoopbackConnection {
    app_name: String,
    opened: bool,
    started: Instant,
    last_frame: Mutex<Option<Instant>>,
    frame_period: Duration,
    next_object_id: AtomicU32,
    pending_spawns: Mutex<Vec<RequestId>>,
    route: LoopbackConnector,
}

impl LoopbackConnection {
    fn frame_at(&self, elapsed: Duration) -> TelemetryFrame {
        let route = &self.route;
        // Angular progress around the circle from ground speed
        let speed_mps = route.ground_speed_kt * geo::MPS_PER_KNOT;
        let circumference = 2.0 * std::f64::consts::PI * route.radius_m;
        let laps = speed_mps * elapsed.as_secs_f64() / circumference;
        let angle_deg = (laps * 360.0) % 360.0;

        let (lat, lon) = geo::destination_point(
            route.center_lat,
            route.center_lon,
            angle_deg,
            route.radius_m,
        );
        // Tangent heading for a clockwise lap
        let heading = (angle_deg + 90.0) % 360.0;

        TelemetryFrame {
            latitude: lat,
            longitude: lon,
            altitude_msl_ft: route.altitude_msl_ft,
            altitude_agl_ft: route.altitude_agl_ft,
            heading_deg: heading,
            ground_speed_kt: route.ground_speed_kt,
            on_ground: 0,
            camera_state: 2,
        }
    }
}

impl SimConnection for LoopbackConnection {
    fn add_to_data_definition(
        &mut self,
        _define_id: u32,
        _name: &str,
        _unit: &str,
        _var_type: SimVarType,
    ) -> SimResult<()> {
        Ok(())
    }

    fn request_data_on_sim_object(
        &mut self,
        _request_id: u32,
        _define_id: u32,
        _object_id: u32,
        period: UpdatePeriod,
    ) -> SimResult<()> {
        self.frame_period = match period {
            UpdatePeriod::Second => Duration::from_secs(1),
            UpdatePeriod::VisualFrame => Duration::from_millis(33),
        };
        Ok(())
    }

    fn subscribe_to_system_event(&mut self, _event_id: u32, _name: &str) -> SimResult<()> {
        Ok(())
    }

    fn get_next_dispatch(&mut self) -> SimResult<Recv> {
        if !self.opened {
            self.opened = true;
            return Ok(Recv::Open {
                app_name: self.app_name.clone(),
            });
        }

        if let Some(request_id) = self
            .pending_spawns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
        {
            return Ok(Recv::AssignedObjectId {
                request_id,
                object_id: self.next_object_id.fetch_add(1, Ordering::Relaxed),
            });
        }

        let mut last_frame = self.last_frame.lock().unwrap_or_else(|e| e.into_inner());
        let due = last_frame.map_or(true, |at| at.elapsed() >= self.frame_period);
        if !due {
            return Ok(Recv::Nothing);
        }
        *last_frame = Some(Instant::now());

        Ok(Recv::SimObjectData {
            request_id: REQUEST_TELEMETRY,
            define_id: DEFINE_TELEMETRY,
            data: self.frame_at(self.started.elapsed()).to_bytes(),
        })
    }

    fn set_data_on_sim_object(
        &mut self,
        _define_id: u32,
        _object_id: ObjectId,
        _data: &[u8],
    ) -> SimResult<()> {
        Ok(())
    }

    fn ai_create_non_atc_aircraft(
        &mut self,
        _title: &str,
        _tail_number: &str,
        _pose: &ObjectPose,
        request_id: RequestId,
    ) -> SimResult<()> {
        self.pending_spawns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request_id);
        Ok(())
    }

    fn ai_remove_object(&mut self, _object_id: ObjectId, _request_id: RequestId) -> SimResult<()> {
        Ok(())
    }
}
