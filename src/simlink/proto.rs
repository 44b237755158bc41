//! Native message-dispatch protocol surface.
//!
//! The simulator exposes one function table; every call returns a signed
//! status where negative means failure. Data definitions are registered as
//! an ordered list of named simvars, and the receive buffer for a sim object
//! is that same list serialized field-by-field in registration order. The
//! ordering is load-bearing: `TelemetryFrame::from_bytes` reads the buffer
//! in exactly the order `telemetry_data_definition()` registers it.

use crate::errors::{SimError, SimResult};

pub type ObjectId = u32;
pub type RequestId = u32;
pub type DefineId = u32;
pub type EventId = u32;

/// Data definition slot used for the aircraft telemetry frame
pub const DEFINE_TELEMETRY: DefineId = 1;
/// Data definition slot used for beacon object poses
pub const DEFINE_POSE: DefineId = 2;
/// Request slot for the per-second telemetry subscription
pub const REQUEST_TELEMETRY: RequestId = 1;
/// Client event id for the sim-stop system event
pub const EVENT_SIM_STOP: EventId = 1;

/// The user's aircraft in object-addressed calls
pub const OBJECT_USER: ObjectId = 0;

/// Value encoding for a registered simvar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimVarType {
    Float64,
    Int32,
}

/// One named simvar in a data definition. Registration order defines the
/// wire layout of the received buffer.
#[derive(Debug, Clone)]
pub struct SimVarDef {
    pub name: &'static str,
    pub unit: &'static str,
    pub var_type: SimVarType,
}

/// Update cadence for a sim-object data request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePeriod {
    Second,
    VisualFrame,
}

/// The telemetry data definition, in wire order.
pub fn telemetry_data_definition() -> Vec<SimVarDef> {
    vec![
        SimVarDef { name: "PLANE LATITUDE", unit: "Degrees", var_type: SimVarType::Float64 },
        SimVarDef { name: "PLANE LONGITUDE", unit: "Degrees", var_type: SimVarType::Float64 },
        SimVarDef { name: "PLANE ALTITUDE", unit: "Feet", var_type: SimVarType::Float64 },
        SimVarDef { name: "PLANE ALT ABOVE GROUND", unit: "Feet", var_type: SimVarType::Float64 },
        SimVarDef { name: "PLANE HEADING DEGREES TRUE", unit: "Degrees", var_type: SimVarType::Float64 },
        SimVarDef { name: "GROUND VELOCITY", unit: "Knots", var_type: SimVarType::Float64 },
        SimVarDef { name: "SIM ON GROUND", unit: "Bool", var_type: SimVarType::Int32 },
        SimVarDef { name: "CAMERA STATE", unit: "Enum", var_type: SimVarType::Int32 },
    ]
}

/// Received telemetry values, decoded from the packed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryFrame {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_msl_ft: f64,
    pub altitude_agl_ft: f64,
    pub heading_deg: f64,
    pub ground_speed_kt: f64,
    pub on_ground: i32,
    pub camera_state: i32,
}

/// 6 x f64 + 2 x i32, packed, no padding
pub const TELEMETRY_FRAME_SIZE: usize = 6 * 8 + 2 * 4;

impl TelemetryFrame {
    /// Decode from the packed little-endian receive buffer. The field order
    /// matches `telemetry_data_definition()` exactly.
    pub fn from_bytes(buf: &[u8]) -> SimResult<Self> {
        if buf.len() < TELEMETRY_FRAME_SIZE {
            return Err(SimError::ProtocolException { code: 0, send_id: 0 });
        }
        let mut cursor = Cursor::new(buf);
        Ok(Self {
            latitude: cursor.f64(),
            longitude: cursor.f64(),
            altitude_msl_ft: cursor.f64(),
            altitude_agl_ft: cursor.f64(),
            heading_deg: cursor.f64(),
            ground_speed_kt: cursor.f64(),
            on_ground: cursor.i32(),
            camera_state: cursor.i32(),
        })
    }

    /// Encode in wire order; used by tests and loopback links.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TELEMETRY_FRAME_SIZE);
        buf.extend_from_slice(&self.latitude.to_le_bytes());
        buf.extend_from_slice(&self.longitude.to_le_bytes());
        buf.extend_from_slice(&self.altitude_msl_ft.to_le_bytes());
        buf.extend_from_slice(&self.altitude_agl_ft.to_le_bytes());
        buf.extend_from_slice(&self.heading_deg.to_le_bytes());
        buf.extend_from_slice(&self.ground_speed_kt.to_le_bytes());
        buf.extend_from_slice(&self.on_ground.to_le_bytes());
        buf.extend_from_slice(&self.camera_state.to_le_bytes());
        buf
    }
}

/// Position and attitude written to a spawned sim object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObjectPose {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_ft: f64,
    pub pitch_deg: f64,
    pub bank_deg: f64,
    pub heading_deg: f64,
}

impl ObjectPose {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6 * 8);
        buf.extend_from_slice(&self.latitude.to_le_bytes());
        buf.extend_from_slice(&self.longitude.to_le_bytes());
        buf.extend_from_slice(&self.altitude_ft.to_le_bytes());
        buf.extend_from_slice(&self.pitch_deg.to_le_bytes());
        buf.extend_from_slice(&self.bank_deg.to_le_bytes());
        buf.extend_from_slice(&self.heading_deg.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> SimResult<Self> {
        if buf.len() < 6 * 8 {
            return Err(SimError::ProtocolException { code: 0, send_id: 0 });
        }
        let mut cursor = Cursor::new(buf);
        Ok(Self {
            latitude: cursor.f64(),
            longitude: cursor.f64(),
            altitude_ft: cursor.f64(),
            pitch_deg: cursor.f64(),
            bank_deg: cursor.f64(),
            heading_deg: cursor.f64(),
        })
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn f64(&mut self) -> f64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        f64::from_le_bytes(bytes)
    }

    fn i32(&mut self) -> i32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        i32::from_le_bytes(bytes)
    }
}

/// One message from the dispatch queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Recv {
    /// Queue empty this poll
    Nothing,
    /// Connection handshake completed
    Open { app_name: String },
    /// The simulator is shutting the connection down
    Quit,
    /// A subscribed system event fired
    Event { event_id: EventId },
    /// The simulator rejected an earlier request
    Exception { code: u32, send_id: u32 },
    /// Confirmation for an ai_create request
    AssignedObjectId { request_id: RequestId, object_id: ObjectId },
    /// Packed data for a sim-object data request
    SimObjectData { request_id: RequestId, define_id: DefineId, data: Vec<u8> },
}

/// One open connection to the simulator. Implementations own the native
/// handle and close it on drop; every method maps a negative native status
/// to an error.
pub trait SimConnection: Send {
    fn add_to_data_definition(
        &mut self,
        define_id: DefineId,
        name: &str,
        unit: &str,
        var_type: SimVarType,
    ) -> SimResult<()>;

    fn request_data_on_sim_object(
        &mut self,
        request_id: RequestId,
        define_id: DefineId,
        object_id: ObjectId,
        period: UpdatePeriod,
    ) -> SimResult<()>;

    fn subscribe_to_system_event(&mut self, event_id: EventId, name: &str) -> SimResult<()>;

    /// Poll the next pending message; `Recv::Nothing` when the queue is empty.
    fn get_next_dispatch(&mut self) -> SimResult<Recv>;

    fn set_data_on_sim_object(
        &mut self,
        define_id: DefineId,
        object_id: ObjectId,
        data: &[u8],
    ) -> SimResult<()>;

    fn ai_create_non_atc_aircraft(
        &mut self,
        title: &str,
        tail_number: &str,
        pose: &ObjectPose,
        request_id: RequestId,
    ) -> SimResult<()>;

    fn ai_remove_object(&mut self, object_id: ObjectId, request_id: RequestId) -> SimResult<()>;
}

/// Factory for connections. The native library load behind this is a
/// process-wide singleton; each successful `open` hands out an independent
/// connection.
pub trait SimConnector: Send + Sync {
    fn open(&self, app_name: &str) -> SimResult<Box<dyn SimConnection>>;
}
