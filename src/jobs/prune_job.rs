use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ScoringConfig;
use crate::scheduler::{IntervalGate, Job, JobLock};
use crate::poi_index::PoiIndex;
use crate::telemetry::{SimState, Telemetry};

/// Periodically evicts POIs that have fallen far behind the aircraft.
pub struct PruneJob {
    lock: JobLock,
    gate: IntervalGate,
    config: ScoringConfig,
    index: Arc<PoiIndex>,
}

impl PruneJob {
    pub fn new(config: ScoringConfig, index: Arc<PoiIndex>) -> Self {
        Self {
            lock: JobLock::new(),
            gate: IntervalGate::new(),
            config,
            index,
        }
    }
}

#[async_trait]
impl Job for PruneJob {
    fn name(&self) -> &'static str {
        "prune"
    }

    fn should_fire(&self, state: SimState, telemetry: Option<&Telemetry>) -> bool {
        state == SimState::Active
            && telemetry.is_some()
            && self
                .gate
                .due(Duration::from_secs(self.config.prune_interval_secs))
    }

    fn try_lock(&self) -> bool {
        self.lock.try_lock()
    }

    fn unlock(&self) {
        self.lock.unlock();
    }

    async fn run(&self, telemetry: Option<Telemetry>) {
        let Some(telemetry) = telemetry else { return };
        self.gate.mark();
        self.index.prune_by_distance(
            telemetry.latitude,
            telemetry.longitude,
            telemetry.heading_deg,
            self.config.prune_threshold_km,
            self.config.forward_prune_cap_km,
        );
    }
}
