use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::{FilterMode, ScoringConfig};
use crate::geo;
use crate::poi::Badge;
use crate::scheduler::{IntervalGate, Job, JobLock};
use crate::scoring::{BusyPredicate, Scorer, ScoringInput};
use crate::poi_index::PoiIndex;
use crate::state_store::{StateStore, boost_factor};
use crate::telemetry::{SimState, Telemetry};

/// Callback invoked after each completed pass, outside any index lock.
pub type ScoringCompleteFn = Arc<dyn Fn(&Telemetry, Option<f64>) + Send + Sync>;

/// A candidate whose geometry expires within this window gets the urgent
/// badge, seconds
const URGENT_WINDOW_SECS: f64 = 60.0;

/// Recomputes every tracked POI's score on a fixed cadence.
///
/// Phase 1 scores everything inside the search radius (plus padding); phase 2
/// runs the expensive deferral analysis only on the map-visible cut.
pub struct ScoringJob {
    lock: JobLock,
    gate: IntervalGate,
    config: ScoringConfig,
    scorer: Arc<Scorer>,
    index: Arc<PoiIndex>,
    store: Arc<dyn StateStore>,
    busy: Option<BusyPredicate>,
    on_complete: Option<ScoringCompleteFn>,
}

impl ScoringJob {
    pub fn new(
        config: ScoringConfig,
        scorer: Arc<Scorer>,
        index: Arc<PoiIndex>,
        store: Arc<dyn StateStore>,
        busy: Option<BusyPredicate>,
        on_complete: Option<ScoringCompleteFn>,
    ) -> Self {
        Self {
            lock: JobLock::new(),
            gate: IntervalGate::new(),
            config,
            scorer,
            index,
            store,
            busy,
            on_complete,
        }
    }

    /// Redundant-pass gate: parked or slow-taxiing aircraft with an
    /// unchanged POI set gains nothing from rescoring.
    fn moved_enough(&self, telemetry: &Telemetry) -> bool {
        let Some((last_lat, last_lon)) = self.index.last_scored() else {
            return true;
        };
        let displacement_m = geo::haversine_distance_m(
            last_lat,
            last_lon,
            telemetry.latitude,
            telemetry.longitude,
        );
        displacement_m >= self.config.min_movement_m
            || self.index.poi_count() != self.index.last_scored_count()
    }

    async fn run_pass(&self, telemetry: Telemetry) {
        if !self.moved_enough(&telemetry) {
            trace!("Aircraft barely moved and POI set unchanged, skipping pass");
            metrics::counter!("scoring.skipped_stationary_total").increment(1);
            return;
        }

        let start = Instant::now();
        let since = Utc::now() - ChronoDuration::seconds(self.config.history_window_secs as i64);
        let recent_categories: Vec<String> = match self.store.recent_played(since).await {
            Ok(records) => records.into_iter().map(|r| r.category).collect(),
            Err(e) => {
                debug!("Recent-played query failed, scoring without history: {}", e);
                Vec::new()
            }
        };
        let boost = boost_factor(self.store.as_ref()).await;

        let session = self.scorer.new_session(ScoringInput {
            telemetry: telemetry.clone(),
            recent_categories,
            repeat_ttl_secs: self.config.repeat_ttl_secs,
            boost_factor: boost,
            busy: self.busy.clone(),
        });

        // Phase 1: score everything inside the padded search radius
        let far_cut_nm = session.max_radius_nm() + self.config.radius_padding_nm;
        let tracked = self.index.tracked();
        let mut scored = 0usize;
        for poi in &tracked {
            let (lat, lon) = poi.position();
            let distance_nm = geo::distance_nm(
                telemetry.predicted_latitude,
                telemetry.predicted_longitude,
                lat,
                lon,
            );
            if distance_nm > far_cut_nm {
                // A mid-narration POI keeps its state even out here
                if self.busy.as_ref().is_some_and(|busy| busy(poi.qid())) {
                    continue;
                }
                poi.update_score(|s| {
                    s.is_visible = false;
                    s.score = 0.0;
                });
                continue;
            }
            session.calculate(poi);
            scored += 1;
        }

        // Phase 2: deferral only for the POIs the map would actually show
        let mut visible: Vec<_> = tracked
            .iter()
            .filter(|poi| {
                let s = poi.score_state();
                s.is_visible && s.score > 0.0
            })
            .collect();
        visible.sort_by(|a, b| {
            let sa = a.score_state();
            let sb = b.score_state();
            (sb.score * sb.visibility).total_cmp(&(sa.score * sa.visibility))
        });
        let cut = match self.config.filter_mode {
            FilterMode::Adaptive => self.config.target_poi_count.min(visible.len()),
            FilterMode::Fixed => visible
                .iter()
                .filter(|poi| poi.score_state().score >= self.config.min_score_threshold)
                .count(),
        };
        for poi in visible.iter().take(cut) {
            session.calculate_deferral(poi);
            // The scorer wipes `urgent` on every recompute; re-mark the
            // candidates whose viewing geometry is about to expire.
            let state = poi.score_state();
            if !state.deferred
                && state
                    .time_to_behind_secs
                    .is_some_and(|t| t < URGENT_WINDOW_SECS)
            {
                poi.update_score(|s| {
                    if !s.badges.contains(&Badge::Urgent) {
                        s.badges.push(Badge::Urgent);
                    }
                });
            }
        }

        self.index
            .set_last_scored(telemetry.latitude, telemetry.longitude, tracked.len());

        let lowest = session.lowest_elevation();
        drop(session);
        if let Some(on_complete) = &self.on_complete {
            on_complete(&telemetry, lowest);
        }

        metrics::histogram!("scoring.pass_duration_seconds").record(start.elapsed().as_secs_f64());
        metrics::gauge!("scoring.pois_scored").set(scored as f64);
        debug!(
            "Scoring pass over {} POIs ({} in radius) in {:?}",
            tracked.len(),
            scored,
            start.elapsed()
        );
    }
}

#[async_trait]
impl Job for ScoringJob {
    fn name(&self) -> &'static str {
        "scoring"
    }

    fn should_fire(&self, state: SimState, _telemetry: Option<&Telemetry>) -> bool {
        state == SimState::Active
            && self
                .gate
                .due(Duration::from_secs(self.config.scoring_interval_secs))
    }

    fn try_lock(&self) -> bool {
        self.lock.try_lock()
    }

    fn unlock(&self) {
        self.lock.unlock();
    }

    async fn run(&self, telemetry: Option<Telemetry>) {
        // Snapshot not valid yet: try again next tick
        let Some(telemetry) = telemetry else { return };
        self.gate.mark();
        self.run_pass(telemetry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoriesConfig, Config};
    use crate::poi::{PoiData, PoiDraft};
    use crate::state_store::MemoryStateStore;
    use crate::telemetry::{FlightStage, predict_position};
    use crate::visibility::VisibilityModel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn telemetry(lat: f64, lon: f64) -> Telemetry {
        let (plat, plon) = predict_position(lat, lon, 90.0, 120.0, 60);
        Telemetry {
            latitude: lat,
            longitude: lon,
            altitude_msl_ft: 5500.0,
            altitude_agl_ft: 5000.0,
            heading_deg: 90.0,
            ground_speed_kt: 120.0,
            on_ground: false,
            predicted_latitude: plat,
            predicted_longitude: plon,
            flight_stage: FlightStage::Airborne,
            autopilot: None,
        }
    }

    struct Fixture {
        job: ScoringJob,
        index: Arc<PoiIndex>,
        completions: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let config = Config::default();
        let categories = Arc::new(CategoriesConfig::default());
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let index = Arc::new(PoiIndex::new(&config, Arc::clone(&categories), Arc::clone(&store)));
        let scorer = Arc::new(Scorer::new(
            &config,
            categories,
            Arc::new(VisibilityModel::default()),
            None,
        ));
        let completions = Arc::new(AtomicUsize::new(0));
        let completions_cb = Arc::clone(&completions);
        let on_complete: ScoringCompleteFn = Arc::new(move |_telemetry, _lowest| {
            completions_cb.fetch_add(1, Ordering::SeqCst);
        });
        let job = ScoringJob::new(
            config.scoring.clone(),
            scorer,
            Arc::clone(&index),
            store,
            None,
            Some(on_complete),
        );
        Fixture {
            job,
            index,
            completions,
        }
    }

    async fn add_poi(index: &PoiIndex, qid: &str, lat: f64, lon: f64) {
        index
            .upsert(
                PoiDraft {
                    qid: qid.to_string(),
                    data: PoiData {
                        latitude: lat,
                        longitude: lon,
                        name_english: Some(format!("POI {qid}")),
                        category: "castle".to_string(),
                        article_length: 4000,
                        sitelinks: 4,
                        ..Default::default()
                    },
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pass_scores_near_and_cuts_far() {
        let f = fixture();
        add_poi(&f.index, "near", 45.0, -72.8).await;
        // ~3 degrees out: far beyond radius + padding
        add_poi(&f.index, "far", 45.0, -69.0).await;

        f.job.run(Some(telemetry(45.0, -73.0))).await;

        let near = f.index.get("near").await.unwrap().score_state();
        assert!(near.is_visible);
        assert!(near.score > 0.0);

        let far = f.index.get("far").await.unwrap().score_state();
        assert!(!far.is_visible);
        assert_eq!(far.score, 0.0);
        assert_eq!(f.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_movement_gate_skips_stationary_pass() {
        let f = fixture();
        add_poi(&f.index, "near", 45.0, -72.8).await;

        f.job.run(Some(telemetry(45.0, -73.0))).await;
        assert_eq!(f.completions.load(Ordering::SeqCst), 1);

        // Barely moved (~11 m), same POI count: no second pass
        f.job.run(Some(telemetry(45.0001, -73.0))).await;
        assert_eq!(f.completions.load(Ordering::SeqCst), 1);

        // POI count changed: pass runs even while stationary
        add_poi(&f.index, "new", 45.0, -72.9).await;
        f.job.run(Some(telemetry(45.0001, -73.0))).await;
        assert_eq!(f.completions.load(Ordering::SeqCst), 2);

        // Substantial movement: pass runs
        f.job.run(Some(telemetry(45.0, -72.9))).await;
        assert_eq!(f.completions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_telemetry_is_a_noop() {
        let f = fixture();
        add_poi(&f.index, "near", 45.0, -72.8).await;
        f.job.run(None).await;
        assert_eq!(f.completions.load(Ordering::SeqCst), 0);
        assert_eq!(f.index.last_scored(), None);
    }

    #[tokio::test]
    async fn test_deferral_bounded_by_target_count() {
        let f = fixture();
        // More visible POIs than the adaptive target count
        for i in 0..20 {
            add_poi(&f.index, &format!("Q{i}"), 45.0 + 0.01 * i as f64, -72.8).await;
        }
        f.job.run(Some(telemetry(45.0, -73.0))).await;

        let deferred = f
            .index
            .tracked()
            .iter()
            .filter(|poi| poi.score_state().deferred)
            .count();
        assert!(
            deferred <= f.job.config.target_poi_count,
            "deferral computed for at most the UI-visible cut ({} > {})",
            deferred,
            f.job.config.target_poi_count
        );
    }

    #[tokio::test]
    async fn test_should_fire_requires_active_state() {
        let f = fixture();
        let t = telemetry(45.0, -73.0);
        assert!(f.job.should_fire(SimState::Active, Some(&t)));
        assert!(!f.job.should_fire(SimState::Inactive, Some(&t)));
        assert!(!f.job.should_fire(SimState::Disconnected, None));
    }
}
