use dashmap::DashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::proto::{
    DEFINE_POSE, DEFINE_TELEMETRY, EVENT_SIM_STOP, OBJECT_USER, ObjectId, ObjectPose, REQUEST_TELEMETRY,
    Recv, RequestId, SimConnection, SimConnector, SimVarType, TelemetryFrame, UpdatePeriod,
    telemetry_data_definition,
};
use crate::errors::{SimError, SimResult};
use crate::telemetry::{
    CameraState, RawSample, SimState, Telemetry, TrackSmoother, derive_flight_stage,
    predict_position, validate_sample,
};

/// Pose data definition, in wire order. Registered alongside the telemetry
/// definition so spawned objects can be repositioned via set-data.
const POSE_VARS: [(&str, &str); 6] = [
    ("PLANE LATITUDE", "Degrees"),
    ("PLANE LONGITUDE", "Degrees"),
    ("PLANE ALTITUDE", "Feet"),
    ("PLANE PITCH DEGREES", "Degrees"),
    ("PLANE BANK DEGREES", "Degrees"),
    ("PLANE HEADING DEGREES TRUE", "Degrees"),
];

/// How long a spawn request waits for its AssignedObjectId confirmation
const SPAWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a simulator client connection
#[derive(Debug, Clone)]
pub struct SimClientConfig {
    /// Application name announced on open()
    pub app_name: String,
    /// Delay between reconnection attempts
    pub retry_interval: Duration,
    /// Sleep when the dispatch queue is empty
    pub idle_sleep: Duration,
    /// Disconnect when no message arrives for this long
    pub watchdog: Duration,
    /// Telemetry subscription cadence
    pub update_period: UpdatePeriod,
    /// Initial prediction window, seconds
    pub prediction_window_secs: u64,
}

impl SimClientConfig {
    /// Per-second telemetry connection (narration pipeline)
    pub fn telemetry(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            retry_interval: Duration::from_secs(5),
            idle_sleep: Duration::from_millis(10),
            watchdog: Duration::from_secs(5),
            update_period: UpdatePeriod::Second,
            prediction_window_secs: 60,
        }
    }

    /// Frame-cadence connection (beacon steering)
    pub fn frame(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            retry_interval: Duration::from_secs(60),
            idle_sleep: Duration::from_millis(2),
            watchdog: Duration::from_secs(5),
            update_period: UpdatePeriod::VisualFrame,
            prediction_window_secs: 60,
        }
    }
}

struct Shared {
    state: RwLock<SimState>,
    /// None until the first valid frame after (re)connect
    snapshot: RwLock<Option<Telemetry>>,
    prediction_window_secs: AtomicU64,
    /// Single-shot waiters for ai_create confirmations, keyed by request id
    spawn_waiters: DashMap<RequestId, oneshot::Sender<ObjectId>>,
    connection: Mutex<Option<Box<dyn SimConnection>>>,
}

impl Shared {
    fn set_state(&self, state: SimState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
        metrics::gauge!("simlink.connected")
            .set(if state == SimState::Disconnected { 0.0 } else { 1.0 });
    }

    fn invalidate_snapshot(&self) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Resilient client for one simulator connection.
///
/// Owns a background task that connects, dispatches messages, validates
/// telemetry and keeps a snapshot current. Callers read the snapshot and
/// issue object operations; they never see transient connection errors,
/// only `NotConnected` / `WaitingForTelemetry`.
pub struct SimClient {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl SimClient {
    /// Start the client. The background task runs until `close` or until the
    /// parent token is cancelled.
    pub fn start(
        connector: Arc<dyn SimConnector>,
        config: SimClientConfig,
        parent_cancel: &CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(SimState::Disconnected),
            snapshot: RwLock::new(None),
            prediction_window_secs: AtomicU64::new(config.prediction_window_secs),
            spawn_waiters: DashMap::new(),
            connection: Mutex::new(None),
        });
        let cancel = parent_cancel.child_token();

        let loop_shared = Arc::clone(&shared);
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            connection_loop(connector, config, loop_shared, loop_cancel).await;
        });

        Self { shared, cancel }
    }

    pub fn get_state(&self) -> SimState {
        *self.shared.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Latest validated snapshot. `WaitingForTelemetry` until the first
    /// valid frame after connect.
    pub fn get_telemetry(&self) -> SimResult<Telemetry> {
        if self.get_state() == SimState::Disconnected {
            return Err(SimError::NotConnected);
        }
        self.shared
            .snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SimError::WaitingForTelemetry)
    }

    pub fn set_prediction_window(&self, window: Duration) {
        self.shared
            .prediction_window_secs
            .store(window.as_secs(), Ordering::Relaxed);
    }

    /// Spawn a sim object and wait for its assigned object id.
    ///
    /// Registers a single-shot waiter under `request_id` before issuing the
    /// native create, so the confirmation cannot race past us. Concurrent
    /// spawns with distinct request ids do not interfere. Times out after
    /// 5 seconds; the waiter is removed on every exit path.
    pub async fn spawn_object(
        &self,
        request_id: RequestId,
        title: &str,
        tail_number: &str,
        pose: &ObjectPose,
    ) -> SimResult<ObjectId> {
        let (tx, rx) = oneshot::channel();
        self.shared.spawn_waiters.insert(request_id, tx);

        let create_result = {
            let mut guard = self.shared.connection.lock().await;
            match guard.as_mut() {
                Some(conn) => conn.ai_create_non_atc_aircraft(title, tail_number, pose, request_id),
                None => Err(SimError::NotConnected),
            }
        };
        if let Err(e) = create_result {
            self.shared.spawn_waiters.remove(&request_id);
            return Err(e);
        }

        let result = match timeout(SPAWN_TIMEOUT, rx).await {
            Ok(Ok(object_id)) => Ok(object_id),
            // Sender dropped: the connection went away
            Ok(Err(_)) => Err(SimError::NotConnected),
            Err(_) => Err(SimError::Timeout),
        };
        self.shared.spawn_waiters.remove(&request_id);
        result
    }

    /// Write a packed pose to a spawned object.
    pub async fn set_object_position(&self, object_id: ObjectId, pose: &ObjectPose) -> SimResult<()> {
        let mut guard = self.shared.connection.lock().await;
        match guard.as_mut() {
            Some(conn) => conn.set_data_on_sim_object(DEFINE_POSE, object_id, &pose.to_bytes()),
            None => Err(SimError::NotConnected),
        }
    }

    /// Remove a spawned object.
    pub async fn remove_object(&self, object_id: ObjectId, request_id: RequestId) -> SimResult<()> {
        let mut guard = self.shared.connection.lock().await;
        match guard.as_mut() {
            Some(conn) => conn.ai_remove_object(object_id, request_id),
            None => Err(SimError::NotConnected),
        }
    }

    /// Stop the background task and close the native handle.
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut guard = self.shared.connection.lock().await;
        // Handle closes on drop
        guard.take();
        self.shared.set_state(SimState::Disconnected);
        self.shared.invalidate_snapshot();
    }
}

/// Outer connect/retry loop.
async fn connection_loop(
    connector: Arc<dyn SimConnector>,
    config: SimClientConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        match open_and_prepare(connector.as_ref(), &config) {
            Ok(conn) => {
                info!("Connected to simulator as {}", config.app_name);
                metrics::counter!("simlink.connects_total").increment(1);
                *shared.connection.lock().await = Some(conn);
                shared.set_state(SimState::Inactive);
                shared.invalidate_snapshot();

                dispatch_loop(&config, &shared, &cancel).await;

                // Disconnected: drop the handle and invalidate state
                shared.connection.lock().await.take();
                shared.set_state(SimState::Disconnected);
                shared.invalidate_snapshot();
                // Drop all pending spawn waiters so callers fail fast
                shared.spawn_waiters.clear();
                metrics::counter!("simlink.disconnects_total").increment(1);
                if cancel.is_cancelled() {
                    break;
                }
            }
            Err(e) => {
                debug!(
                    "Simulator connection failed ({}), retrying in {:?}",
                    e, config.retry_interval
                );
                metrics::counter!("simlink.connect_failures_total").increment(1);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(config.retry_interval) => {}
        }
    }
    info!("Simulator connection loop stopped ({})", config.app_name);
}

/// Open a connection and register subscriptions and data definitions.
/// Registration order defines the wire layout of the received buffers.
fn open_and_prepare(
    connector: &dyn SimConnector,
    config: &SimClientConfig,
) -> SimResult<Box<dyn SimConnection>> {
    let mut conn = connector.open(&config.app_name)?;

    conn.subscribe_to_system_event(EVENT_SIM_STOP, "SimStop")?;

    for var in telemetry_data_definition() {
        conn.add_to_data_definition(DEFINE_TELEMETRY, var.name, var.unit, var.var_type)?;
    }
    for (name, unit) in POSE_VARS {
        conn.add_to_data_definition(DEFINE_POSE, name, unit, SimVarType::Float64)?;
    }

    conn.request_data_on_sim_object(
        REQUEST_TELEMETRY,
        DEFINE_TELEMETRY,
        OBJECT_USER,
        config.update_period,
    )?;

    Ok(conn)
}

/// Inner dispatch loop. Returns when the connection should be torn down:
/// sim stop, quit, dispatch error, watchdog expiry, or cancellation.
async fn dispatch_loop(config: &SimClientConfig, shared: &Arc<Shared>, cancel: &CancellationToken) {
    let mut smoother = TrackSmoother::new();
    let mut last_message = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let recv = {
            let mut guard = shared.connection.lock().await;
            let Some(conn) = guard.as_mut() else { return };
            match conn.get_next_dispatch() {
                Ok(recv) => recv,
                Err(e) => {
                    warn!("Dispatch error, disconnecting: {}", e);
                    return;
                }
            }
        };

        match recv {
            Recv::Nothing => {
                if last_message.elapsed() > config.watchdog {
                    warn!(
                        "No message for {:?}, watchdog disconnecting",
                        config.watchdog
                    );
                    metrics::counter!("simlink.watchdog_disconnects_total").increment(1);
                    return;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(config.idle_sleep) => {}
                }
                continue;
            }
            Recv::Open { app_name } => {
                last_message = Instant::now();
                info!("Simulator handshake complete for {}", app_name);
            }
            Recv::Quit => {
                last_message = Instant::now();
                info!("Simulator sent quit, disconnecting");
                return;
            }
            Recv::Event { event_id } if event_id == EVENT_SIM_STOP => {
                info!("Sim stop event, disconnecting");
                return;
            }
            Recv::Event { event_id } => {
                last_message = Instant::now();
                trace!("Unhandled system event {}", event_id);
            }
            Recv::Exception { code, send_id } => {
                last_message = Instant::now();
                warn!("Simulator exception code={} send_id={}", code, send_id);
                metrics::counter!("simlink.exceptions_total").increment(1);
            }
            Recv::AssignedObjectId { request_id, object_id } => {
                last_message = Instant::now();
                debug!(
                    "Assigned object id {} for spawn request {}",
                    object_id, request_id
                );
                if let Some((_, waiter)) = shared.spawn_waiters.remove(&request_id) {
                    // Receiver may have timed out already; nothing to do then
                    let _ = waiter.send(object_id);
                } else {
                    debug!("No waiter for spawn request {}", request_id);
                }
            }
            Recv::SimObjectData { request_id, define_id, data } => {
                last_message = Instant::now();
                if request_id != REQUEST_TELEMETRY || define_id != DEFINE_TELEMETRY {
                    trace!("Ignoring data for request {} define {}", request_id, define_id);
                    continue;
                }
                match TelemetryFrame::from_bytes(&data) {
                    Ok(frame) => handle_frame(shared, &mut smoother, frame),
                    Err(e) => {
                        warn!("Malformed telemetry frame: {}", e);
                        metrics::counter!("simlink.malformed_frames_total").increment(1);
                    }
                }
            }
        }
    }
}

/// Validate a received frame and derive the published snapshot.
fn handle_frame(shared: &Arc<Shared>, smoother: &mut TrackSmoother, frame: TelemetryFrame) {
    let sample = RawSample {
        latitude: frame.latitude,
        longitude: frame.longitude,
        altitude_msl_ft: frame.altitude_msl_ft,
        altitude_agl_ft: frame.altitude_agl_ft,
        heading_deg: frame.heading_deg,
        ground_speed_kt: frame.ground_speed_kt,
        on_ground: frame.on_ground != 0,
        camera_state: frame.camera_state.max(0) as u32,
    };

    if let Some(reason) = validate_sample(&sample) {
        trace!("Rejected telemetry sample: {:?}", reason);
        metrics::counter!("simlink.rejected_samples_total").increment(1);
        return;
    }

    let sim_state = CameraState::from_raw(sample.camera_state).sim_state();
    shared.set_state(sim_state);

    let heading = smoother.smooth(
        sample.latitude,
        sample.longitude,
        sample.heading_deg,
        sample.on_ground,
        sample.altitude_agl_ft,
    );

    let (predicted_latitude, predicted_longitude) = if sim_state == SimState::Active {
        let window = shared.prediction_window_secs.load(Ordering::Relaxed);
        predict_position(
            sample.latitude,
            sample.longitude,
            heading,
            sample.ground_speed_kt,
            window,
        )
    } else {
        (sample.latitude, sample.longitude)
    };

    let telemetry = Telemetry {
        latitude: sample.latitude,
        longitude: sample.longitude,
        altitude_msl_ft: sample.altitude_msl_ft,
        altitude_agl_ft: sample.altitude_agl_ft,
        heading_deg: heading,
        ground_speed_kt: sample.ground_speed_kt,
        on_ground: sample.on_ground,
        predicted_latitude,
        predicted_longitude,
        flight_stage: derive_flight_stage(
            sample.on_ground,
            sample.ground_speed_kt,
            sample.altitude_agl_ft,
        ),
        autopilot: None,
    };

    *shared.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(telemetry);
    metrics::counter!("simlink.frames_total").increment(1);
}
