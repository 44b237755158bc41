//! Connection to the external simulator: the native message-dispatch
//! protocol surface and the resilient client built on top of it.

pub mod client;
pub mod loopback;
pub mod proto;

pub use client::{SimClient, SimClientConfig};
pub use loopback::LoopbackConnector;
pub use proto::{
    ObjectId, ObjectPose, Recv, RequestId, SimConnection, SimConnector, SimVarType,
    TelemetryFrame, UpdatePeriod,
};
