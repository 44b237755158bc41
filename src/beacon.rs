use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::BeaconConfig;
use crate::elevation::ElevationProvider;
use crate::errors::SimResult;
use crate::geo;
use crate::narration::BeaconControl;
use crate::simlink::{ObjectId, ObjectPose, RequestId, SimClient};
use crate::telemetry::Telemetry;

/// Vertical spacing between formation balloons, feet
const FORMATION_STEP_FT: f64 = 200.0;

/// Near-identical target coordinates are treated as the same target
const TARGET_EPSILON_DEG: f64 = 0.0001;

/// Symmetric formation altitude offsets centered on zero with a 200 ft step.
/// `n` is clamped to 1..=5.
pub fn compute_formation_offsets(n: usize) -> Vec<f64> {
    let n = n.clamp(1, 5);
    let center = (n as f64 - 1.0) / 2.0;
    (0..n)
        .map(|i| (i as f64 - center) * FORMATION_STEP_FT)
        .collect()
}

/// Sim-object operations the guidance loop needs; implemented by the
/// frame-cadence `SimClient` connection and mockable in tests.
#[async_trait]
pub trait GuidanceLink: Send + Sync {
    fn telemetry(&self) -> SimResult<Telemetry>;
    async fn spawn(&self, request_id: RequestId, title: &str, pose: &ObjectPose) -> SimResult<ObjectId>;
    async fn set_position(&self, object_id: ObjectId, pose: &ObjectPose) -> SimResult<()>;
    async fn remove(&self, object_id: ObjectId, request_id: RequestId) -> SimResult<()>;
}

#[async_trait]
impl GuidanceLink for SimClient {
    fn telemetry(&self) -> SimResult<Telemetry> {
        self.get_telemetry()
    }

    async fn spawn(&self, request_id: RequestId, title: &str, pose: &ObjectPose) -> SimResult<ObjectId> {
        self.spawn_object(request_id, title, &format!("BCN{request_id}"), pose)
            .await
    }

    async fn set_position(&self, object_id: ObjectId, pose: &ObjectPose) -> SimResult<()> {
        self.set_object_position(object_id, pose).await
    }

    async fn remove(&self, object_id: ObjectId, request_id: RequestId) -> SimResult<()> {
        self.remove_object(object_id, request_id).await
    }
}

/// One spawned guidance object.
#[derive(Debug, Clone)]
struct Beacon {
    object_id: ObjectId,
    is_target: bool,
    /// Vertical offset from the formation's base altitude, feet
    altitude_offset_ft: f64,
    target_lat: f64,
    target_lon: f64,
    /// Altitude the descent profile starts from, feet MSL
    base_alt_ft: f64,
}

#[derive(Debug, Default)]
struct GuidanceState {
    beacons: Vec<Beacon>,
    active: bool,
    /// Formation suppressed for the current target (low-AGL spawn)
    formation_suppressed: bool,
    /// Last valid MSL for the altitude hold, feet
    held_msl_ft: Option<f64>,
}

/// Spawns and steers guidance balloons toward the narration target on an
/// independent frame-cadence simulator connection.
pub struct BeaconGuidance {
    link: Arc<dyn GuidanceLink>,
    elevation: Option<Arc<dyn ElevationProvider>>,
    config: BeaconConfig,
    state: Mutex<GuidanceState>,
    next_request_id: AtomicU32,
}

impl BeaconGuidance {
    pub fn new(
        link: Arc<dyn GuidanceLink>,
        elevation: Option<Arc<dyn ElevationProvider>>,
        config: BeaconConfig,
    ) -> Self {
        Self {
            link,
            elevation,
            config,
            state: Mutex::new(GuidanceState::default()),
            next_request_id: AtomicU32::new(1),
        }
    }

    fn request_id(&self) -> RequestId {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn beacon_count(&self) -> usize {
        self.state.lock().await.beacons.len()
    }

    pub async fn target_count(&self) -> usize {
        self.state.lock().await.beacons.iter().filter(|b| b.is_target).count()
    }

    /// Point the guidance at a new subject.
    ///
    /// Idempotent for near-identical coordinates. On the ground nothing is
    /// spawned. Below the minimum spawn AGL the target is lifted above the
    /// aircraft and the formation suppressed; otherwise a target balloon at
    /// current MSL plus a formation ahead of the aircraft is spawned. Oldest
    /// targets are evicted beyond the quota.
    pub async fn point_at(&self, lat: f64, lon: f64) -> SimResult<()> {
        let telemetry = self.link.telemetry()?;
        let mut state = self.state.lock().await;

        // Same target again: nothing to do
        if state.beacons.iter().any(|b| {
            b.is_target
                && (b.target_lat - lat).abs() < TARGET_EPSILON_DEG
                && (b.target_lon - lon).abs() < TARGET_EPSILON_DEG
        }) {
            trace!("Target ({:.4}, {:.4}) already active", lat, lon);
            return Ok(());
        }

        // New subject: the old formation no longer points anywhere useful,
        // and a stale target at the same spot would duplicate the new one.
        let to_remove: Vec<Beacon> = state
            .beacons
            .iter()
            .filter(|b| {
                !b.is_target
                    || ((b.target_lat - lat).abs() < TARGET_EPSILON_DEG
                        && (b.target_lon - lon).abs() < TARGET_EPSILON_DEG)
            })
            .cloned()
            .collect();
        for beacon in &to_remove {
            self.despawn(beacon).await;
        }
        state
            .beacons
            .retain(|b| !to_remove.iter().any(|r| r.object_id == b.object_id));

        state.active = true;

        if telemetry.on_ground {
            debug!("On ground; target set without spawning");
            state.formation_suppressed = true;
            return Ok(());
        }

        let min_spawn_ft = self.config.min_spawn_altitude_m * geo::FEET_PER_METER;
        let (base_alt_ft, suppress_formation) = if telemetry.altitude_agl_ft < min_spawn_ft {
            // Too low: lift the target above the aircraft and lock the hold
            let lifted = telemetry.altitude_msl_ft + min_spawn_ft;
            state.held_msl_ft = Some(lifted);
            (lifted, true)
        } else {
            state.held_msl_ft = Some(telemetry.altitude_msl_ft);
            (telemetry.altitude_msl_ft, false)
        };
        state.formation_suppressed = suppress_formation;

        // Target balloon at the subject
        let target_pose = ObjectPose {
            latitude: lat,
            longitude: lon,
            altitude_ft: base_alt_ft,
            ..Default::default()
        };
        let object_id = self
            .link
            .spawn(self.request_id(), &self.config.object_title, &target_pose)
            .await?;
        state.beacons.push(Beacon {
            object_id,
            is_target: true,
            altitude_offset_ft: 0.0,
            target_lat: lat,
            target_lon: lon,
            base_alt_ft,
        });
        info!(
            "Spawned target beacon {} at ({:.4}, {:.4}) {} ft",
            object_id, lat, lon, base_alt_ft as i64
        );
        metrics::counter!("beacon.spawns_total").increment(1);

        if !suppress_formation {
            let bearing = geo::initial_bearing_deg(
                telemetry.latitude,
                telemetry.longitude,
                lat,
                lon,
            );
            let (flat, flon) = geo::destination_point(
                telemetry.latitude,
                telemetry.longitude,
                bearing,
                self.config.formation_distance_m,
            );
            for offset in compute_formation_offsets(self.config.formation_count) {
                let pose = ObjectPose {
                    latitude: flat,
                    longitude: flon,
                    altitude_ft: base_alt_ft + offset,
                    ..Default::default()
                };
                match self
                    .link
                    .spawn(self.request_id(), &self.config.object_title, &pose)
                    .await
                {
                    Ok(object_id) => {
                        state.beacons.push(Beacon {
                            object_id,
                            is_target: false,
                            altitude_offset_ft: offset,
                            target_lat: lat,
                            target_lon: lon,
                            base_alt_ft,
                        });
                        metrics::counter!("beacon.spawns_total").increment(1);
                    }
                    Err(e) => warn!("Formation spawn failed: {}", e),
                }
            }
        }

        // Quota: oldest targets go first
        while state.beacons.iter().filter(|b| b.is_target).count() > self.config.max_targets {
            if let Some(pos) = state.beacons.iter().position(|b| b.is_target) {
                let oldest = state.beacons.remove(pos);
                debug!("Target quota exceeded, evicting beacon {}", oldest.object_id);
                self.despawn(&oldest).await;
            }
        }

        metrics::gauge!("beacon.active").set(state.beacons.len() as f64);
        Ok(())
    }

    /// Remove every beacon and deactivate guidance.
    pub async fn clear_all(&self) {
        let mut state = self.state.lock().await;
        let beacons = std::mem::take(&mut state.beacons);
        for beacon in &beacons {
            self.despawn(beacon).await;
        }
        state.active = false;
        state.formation_suppressed = false;
        metrics::gauge!("beacon.active").set(0.0);
    }

    async fn despawn(&self, beacon: &Beacon) {
        if let Err(e) = self.link.remove(beacon.object_id, self.request_id()).await {
            debug!("Best-effort removal of beacon {} failed: {}", beacon.object_id, e);
        }
        metrics::counter!("beacon.despawns_total").increment(1);
    }

    /// Descent profile for a target beacon: ease quadratically from the base
    /// altitude down to a floor above the subject's terrain as the aircraft
    /// closes from `sink_distance_far` to `sink_distance_close`.
    pub fn calculate_target_altitude(
        &self,
        poi_lat: f64,
        poi_lon: f64,
        base_alt_ft: f64,
        distance_m: f64,
        telemetry: &Telemetry,
    ) -> f64 {
        let far = self.config.sink_distance_far_m;
        let close = self.config.sink_distance_close_m;
        let t = ((far - distance_m) / (far - close)).clamp(0.0, 1.0);
        let eased = t * t;

        let floor_ft = self
            .elevation
            .as_deref()
            .and_then(|provider| provider.get_elevation(poi_lat, poi_lon).ok().flatten())
            .map(|elev_m| (elev_m + self.config.target_floor_agl_m) * geo::FEET_PER_METER)
            .unwrap_or_else(|| {
                // Plane-relative heuristic when terrain data is missing
                telemetry.altitude_msl_ft - telemetry.altitude_agl_ft
                    + self.config.target_floor_agl_m * geo::FEET_PER_METER
            });

        if floor_ft >= base_alt_ft {
            return base_alt_ft;
        }
        base_alt_ft + (floor_ft - base_alt_ft) * eased
    }

    /// One guidance frame: cleanup, altitude hold, steer every beacon.
    pub async fn update(&self) {
        let Ok(telemetry) = self.link.telemetry() else {
            return;
        };
        let mut state = self.state.lock().await;
        if state.beacons.is_empty() {
            return;
        }

        // Altitude hold: track MSL while comfortably above ground
        if telemetry.altitude_agl_ft >= self.config.altitude_floor_ft {
            state.held_msl_ft = Some(telemetry.altitude_msl_ft);
        }
        let held_ft = state.held_msl_ft.unwrap_or(telemetry.altitude_msl_ft);

        // Formation cleanup on final approach to the target
        if state.active
            && let Some(target) = state.beacons.iter().find(|b| b.is_target).cloned()
        {
            let distance_m = geo::haversine_distance_m(
                telemetry.latitude,
                telemetry.longitude,
                target.target_lat,
                target.target_lon,
            );
            if distance_m < self.config.formation_distance_m * 1.5 {
                let formation: Vec<Beacon> = state
                    .beacons
                    .iter()
                    .filter(|b| !b.is_target)
                    .cloned()
                    .collect();
                if !formation.is_empty() {
                    debug!("Within formation range, despawning {} escorts", formation.len());
                }
                for beacon in &formation {
                    self.despawn(beacon).await;
                }
                state.beacons.retain(|b| b.is_target);
            }
        }

        let mut dropped: Vec<ObjectId> = Vec::new();
        let beacons = state.beacons.clone();
        let mut target_alt_ft = held_ft;

        for beacon in &beacons {
            let distance_m = geo::haversine_distance_m(
                telemetry.latitude,
                telemetry.longitude,
                beacon.target_lat,
                beacon.target_lon,
            );

            // Staleness: far away and behind is a leftover from an old leg
            let bearing_to = geo::initial_bearing_deg(
                telemetry.latitude,
                telemetry.longitude,
                beacon.target_lat,
                beacon.target_lon,
            );
            if distance_m > self.config.stale_distance_m
                && geo::angular_difference_deg(telemetry.heading_deg, bearing_to) > 90.0
            {
                debug!("Beacon {} stale ({:.0} km behind)", beacon.object_id, distance_m / 1000.0);
                self.despawn(beacon).await;
                dropped.push(beacon.object_id);
                continue;
            }

            let pose = if beacon.is_target {
                target_alt_ft = self.calculate_target_altitude(
                    beacon.target_lat,
                    beacon.target_lon,
                    held_ft,
                    distance_m,
                    &telemetry,
                );
                ObjectPose {
                    latitude: beacon.target_lat,
                    longitude: beacon.target_lon,
                    altitude_ft: target_alt_ft,
                    ..Default::default()
                }
            } else {
                // Formation rides ahead of the aircraft toward the target
                let (flat, flon) = geo::destination_point(
                    telemetry.latitude,
                    telemetry.longitude,
                    bearing_to,
                    self.config.formation_distance_m,
                );
                ObjectPose {
                    latitude: flat,
                    longitude: flon,
                    altitude_ft: target_alt_ft + beacon.altitude_offset_ft,
                    ..Default::default()
                }
            };

            if let Err(e) = self.link.set_position(beacon.object_id, &pose).await {
                debug!("Position update for beacon {} failed: {}", beacon.object_id, e);
                self.despawn(beacon).await;
                dropped.push(beacon.object_id);
            }
        }

        if !dropped.is_empty() {
            state.beacons.retain(|b| !dropped.contains(&b.object_id));
            metrics::gauge!("beacon.active").set(state.beacons.len() as f64);
        }
    }

    /// Frame-cadence update loop (at least 20 Hz).
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let frame = Duration::from_millis(self.config.frame_interval_ms);
        info!("Beacon guidance loop started ({:?} frame)", frame);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(frame) => {}
            }
            self.update().await;
        }
        self.clear_all().await;
        info!("Beacon guidance loop stopped");
    }
}

#[async_trait]
impl BeaconControl for BeaconGuidance {
    async fn set_target(&self, lat: f64, lon: f64) -> SimResult<()> {
        self.point_at(lat, lon).await
    }

    async fn clear(&self) {
        self.clear_all().await;
    }
}
