//! skytour - in-flight, location-aware narration engine for a flight
//! simulator.
//!
//! A high-frequency telemetry stream drives a pipeline that discovers nearby
//! points of interest, continuously ranks them by geographic visibility and
//! content quality, selects one when conditions are right, and emits a
//! narrated audio clip while a beacon formation guides the pilot toward the
//! subject.

pub mod audio;
pub mod beacon;
pub mod config;
pub mod elevation;
pub mod errors;
pub mod geo;
pub mod jobs;
pub mod metrics;
pub mod narration;
pub mod poi;
pub mod poi_index;
pub mod scheduler;
pub mod scoring;
pub mod simlink;
pub mod state_store;
pub mod telemetry;
pub mod visibility;

pub use config::{CategoriesConfig, Config};
pub use errors::{SimError, SimResult};
pub use poi::{Badge, Poi, PoiDraft};
pub use poi_index::PoiIndex;
pub use scoring::{Scorer, ScoringInput};
pub use simlink::{SimClient, SimClientConfig};
pub use telemetry::{SimState, Telemetry};
