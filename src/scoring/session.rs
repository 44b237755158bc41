use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::trace;

use crate::config::{CategoriesConfig, Config, DeferralConfig, ScoringConfig, VarietyConfig};
use crate::elevation::ElevationProvider;
use crate::geo;
use crate::poi::{Badge, LosStatus, NarrationStrategy, Poi, PoiData};
use crate::telemetry::Telemetry;
use crate::visibility::VisibilityModel;

use super::content::{content_multiplier, is_stub};
use super::details::ScoreLog;
use super::geography::{terrain_los_blocked, visibility_from};
use super::variety::variety_multiplier;

/// Returns true while the POI is mid-narration and must not flicker
pub type BusyPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Everything one scoring pass needs, frozen at session construction.
#[derive(Clone)]
pub struct ScoringInput {
    pub telemetry: Telemetry,
    /// Played categories, oldest first
    pub recent_categories: Vec<String>,
    pub repeat_ttl_secs: u64,
    pub boost_factor: f64,
    pub busy: Option<BusyPredicate>,
}

/// Stateless multi-factor scorer. Holds configuration and models only; all
/// per-pass state lives in the session.
pub struct Scorer {
    scoring: ScoringConfig,
    variety: VarietyConfig,
    deferral: DeferralConfig,
    categories: Arc<CategoriesConfig>,
    visibility: Arc<VisibilityModel>,
    elevation: Option<Arc<dyn ElevationProvider>>,
}

impl Scorer {
    pub fn new(
        config: &Config,
        categories: Arc<CategoriesConfig>,
        visibility: Arc<VisibilityModel>,
        elevation: Option<Arc<dyn ElevationProvider>>,
    ) -> Self {
        Self {
            scoring: config.scoring.clone(),
            variety: config.variety.clone(),
            deferral: config.deferral.clone(),
            categories,
            visibility,
            elevation,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// Build a session for one pass: precompute the valley-floor estimate at
    /// the predicted position and the search radius, and freeze the input.
    pub fn new_session(&self, input: ScoringInput) -> ScoringSession<'_> {
        let max_radius_nm = self.visibility.max_radius_nm(input.telemetry.altitude_agl_ft);
        let lowest_elevation_m = self.elevation.as_ref().and_then(|provider| {
            provider
                .get_lowest_elevation(
                    input.telemetry.predicted_latitude,
                    input.telemetry.predicted_longitude,
                    max_radius_nm,
                )
                .unwrap_or_else(|e| {
                    trace!("Lowest-elevation lookup failed: {}", e);
                    None
                })
        });
        ScoringSession {
            scorer: self,
            now: Utc::now(),
            lowest_elevation_m,
            max_radius_nm,
            input,
        }
    }
}

/// Single-pass scoring context. Not shared across passes.
pub struct ScoringSession<'a> {
    scorer: &'a Scorer,
    input: ScoringInput,
    now: DateTime<Utc>,
    lowest_elevation_m: Option<f64>,
    max_radius_nm: f64,
}

impl ScoringSession<'_> {
    /// Valley-floor estimate at the predicted position, meters
    pub fn lowest_elevation(&self) -> Option<f64> {
        self.lowest_elevation_m
    }

    /// Search radius for this pass: the largest class range at current AGL
    pub fn max_radius_nm(&self) -> f64 {
        self.max_radius_nm
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.input.telemetry
    }

    fn is_busy(&self, qid: &str) -> bool {
        self.input
            .busy
            .as_ref()
            .is_some_and(|predicate| predicate(qid))
    }

    /// Badges derivable from the POI data alone. `urgent` is scheduler-owned
    /// and therefore never set here, which is exactly what wipes it on every
    /// recompute.
    fn stateless_badges(&self, data: &PoiData) -> Vec<Badge> {
        let mut badges = Vec::new();
        if data.article_length >= self.scorer.scoring.deep_dive_chars {
            badges.push(Badge::DeepDive);
        }
        if is_stub(&self.scorer.scoring, &self.scorer.categories, data) {
            badges.push(Badge::Stub);
        }
        if data.is_msfs_poi {
            badges.push(Badge::Msfs);
        }
        badges
    }

    /// Score one POI, writing the result into its score state.
    pub fn calculate(&self, poi: &Poi) {
        let data = poi.data();
        let badges = self.stateless_badges(&data);

        // Mid-narration: do not flicker the visible state; only refresh the
        // stateless badges (and thereby drop `urgent`).
        if self.is_busy(poi.qid()) {
            poi.update_score(|s| s.badges = badges);
            return;
        }

        if poi.is_on_cooldown(self.input.repeat_ttl_secs, self.now) {
            self.write_skip(poi, badges, "Skipped: cooldown");
            return;
        }
        if data.hidden {
            self.write_skip(poi, badges, "Skipped: hidden feature");
            return;
        }
        if data.user_deferred {
            self.write_skip(poi, badges, "Skipped: deferred by user");
            return;
        }

        let telemetry = &self.input.telemetry;
        let size = self.scorer.categories.size_class(&data.category);
        let mut log = ScoreLog::new();

        let geo_vis = visibility_from(
            &self.scorer.visibility,
            &self.scorer.scoring,
            size,
            telemetry.predicted_position(),
            telemetry.heading_deg,
            telemetry.altitude_agl_ft,
            telemetry.on_ground,
            (data.latitude, data.longitude),
            Some(&mut log),
        );

        if geo_vis.visibility <= 0.0 {
            let details = log.finish();
            poi.update_score(|s| {
                s.score = 0.0;
                s.visibility = 0.0;
                s.is_visible = false;
                s.badges = badges;
                s.details = details.clone();
                s.los_status = LosStatus::Unknown;
                s.strategy = None;
                s.time_to_cpa_secs = None;
                s.time_to_behind_secs = None;
                s.deferred = false;
            });
            return;
        }

        // Terrain line of sight, airborne only
        let mut los_status = LosStatus::Unknown;
        if self.scorer.scoring.terrain_los_enabled
            && !telemetry.on_ground
            && let Some(provider) = self.scorer.elevation.as_deref()
        {
            let aircraft_alt_m = telemetry.altitude_msl_ft / geo::FEET_PER_METER;
            let poi_ground_m = provider
                .get_elevation(data.latitude, data.longitude)
                .ok()
                .flatten()
                .unwrap_or_else(|| self.plane_relative_floor_m());
            match terrain_los_blocked(
                provider,
                telemetry.position(),
                aircraft_alt_m,
                (data.latitude, data.longitude),
                poi_ground_m + 30.0,
            ) {
                Some(true) => {
                    log.note("LOS: blocked by terrain");
                    let details = log.finish();
                    poi.update_score(|s| {
                        s.score = 0.0;
                        s.visibility = 0.0;
                        s.is_visible = false;
                        s.badges = badges;
                        s.details = details.clone();
                        s.los_status = LosStatus::Blocked;
                        s.strategy = None;
                        s.time_to_cpa_secs = None;
                        s.time_to_behind_secs = None;
                        s.deferred = false;
                    });
                    return;
                }
                Some(false) => los_status = LosStatus::Visible,
                None => los_status = LosStatus::Unknown,
            }
        }

        let mut score = geo_vis.visibility;

        if let Some(dimension) = data.dimension_multiplier
            && dimension > 0.0
        {
            log.factor("Dimension", "", dimension);
            score *= dimension;
        }

        score *= content_multiplier(
            &self.scorer.scoring,
            &self.scorer.categories,
            &data,
            self.input.boost_factor,
            &mut log,
        );

        score *= variety_multiplier(
            &self.scorer.variety,
            &self.scorer.categories,
            &data.category,
            &self.input.recent_categories,
            &mut log,
        );

        let score = score.max(0.0);
        let (time_to_cpa, time_to_behind) = self.passage_times(&data);
        let strategy = self.pick_strategy(&data, geo_vis.relative_bearing_deg);
        let details = log.finish();

        poi.update_score(|s| {
            s.score = score;
            s.visibility = geo_vis.visibility;
            s.is_visible = true;
            s.badges = badges;
            s.details = details.clone();
            s.los_status = los_status;
            s.strategy = Some(strategy);
            s.time_to_cpa_secs = time_to_cpa;
            s.time_to_behind_secs = time_to_behind;
            s.deferred = false;
        });
    }

    fn write_skip(&self, poi: &Poi, badges: Vec<Badge>, reason: &str) {
        poi.update_score(|s| {
            s.score = 0.0;
            s.visibility = 0.0;
            s.is_visible = false;
            s.badges = badges;
            s.details = reason.to_string();
            s.los_status = LosStatus::Unknown;
            s.strategy = None;
            s.time_to_cpa_secs = None;
            s.time_to_behind_secs = None;
            s.deferred = false;
        });
    }

    /// Plane-relative terrain heuristic for when elevation data is missing:
    /// the ground under the aircraft, in meters.
    fn plane_relative_floor_m(&self) -> f64 {
        let telemetry = &self.input.telemetry;
        (telemetry.altitude_msl_ft - telemetry.altitude_agl_ft) / geo::FEET_PER_METER
    }

    /// Time until the POI is abeam (closest point of approach) and until it
    /// falls 30 degrees behind abeam, from the current position and track.
    fn passage_times(&self, data: &PoiData) -> (Option<f64>, Option<f64>) {
        let telemetry = &self.input.telemetry;
        let speed_mps = telemetry.ground_speed_kt * geo::MPS_PER_KNOT;
        if speed_mps < 1.0 {
            return (None, None);
        }

        let distance_m = geo::haversine_distance_m(
            telemetry.latitude,
            telemetry.longitude,
            data.latitude,
            data.longitude,
        );
        let bearing = geo::initial_bearing_deg(
            telemetry.latitude,
            telemetry.longitude,
            data.latitude,
            data.longitude,
        );
        let relative = geo::relative_bearing_deg(telemetry.heading_deg, bearing).to_radians();

        let along_m = distance_m * relative.cos();
        let cross_m = distance_m * relative.sin().abs();

        let time_to_cpa = (along_m > 0.0).then_some(along_m / speed_mps);
        // Behind means 30 degrees past abeam
        let behind_at_m = along_m + cross_m * (30f64).to_radians().tan();
        let time_to_behind = Some((behind_at_m / speed_mps).max(0.0));

        (time_to_cpa, time_to_behind)
    }

    fn pick_strategy(&self, data: &PoiData, relative_bearing_deg: f64) -> NarrationStrategy {
        let telemetry = &self.input.telemetry;
        if telemetry.on_ground {
            return NarrationStrategy::OnGround;
        }
        let distance_m = geo::haversine_distance_m(
            telemetry.latitude,
            telemetry.longitude,
            data.latitude,
            data.longitude,
        );
        let cross_nm =
            distance_m * relative_bearing_deg.to_radians().sin().abs() / geo::METERS_PER_NM;
        if cross_nm < 1.0 {
            NarrationStrategy::Flyover
        } else {
            NarrationStrategy::PassingBy
        }
    }

    /// Phase-2 deferral: sample future positions along the track and, when a
    /// markedly better viewing geometry is imminent, shrink the score so the
    /// narration waits for it.
    ///
    /// Expensive; run only on the map-visible cut, never on every POI.
    pub fn calculate_deferral(&self, poi: &Poi) {
        let config = &self.scorer.deferral;
        if !config.enabled {
            return;
        }
        let state = poi.score_state();
        if !state.is_visible || state.score <= 0.0 || state.visibility <= 0.0 {
            return;
        }

        let telemetry = &self.input.telemetry;
        if telemetry.on_ground {
            return;
        }
        let data = poi.data();
        let size = self.scorer.categories.size_class(&data.category);
        let speed_mps = telemetry.ground_speed_kt * geo::MPS_PER_KNOT;
        if speed_mps < 1.0 {
            return;
        }

        let mut best_future = 0.0f64;
        for offset_secs in &config.sample_offsets_secs {
            let (lat, lon) = geo::destination_point(
                telemetry.latitude,
                telemetry.longitude,
                telemetry.heading_deg,
                speed_mps * *offset_secs as f64,
            );
            let future = visibility_from(
                &self.scorer.visibility,
                &self.scorer.scoring,
                size,
                (lat, lon),
                telemetry.heading_deg,
                telemetry.altitude_agl_ft,
                false,
                (data.latitude, data.longitude),
                None,
            );
            best_future = best_future.max(future.visibility);
        }

        // Being already close raises the bar for deferring
        let geo_now = visibility_from(
            &self.scorer.visibility,
            &self.scorer.scoring,
            size,
            telemetry.predicted_position(),
            telemetry.heading_deg,
            telemetry.altitude_agl_ft,
            false,
            (data.latitude, data.longitude),
            None,
        );
        let closeness = (1.0 - geo_now.distance_nm / geo_now.max_range_nm.max(0.001)).max(0.0);
        let effective_threshold =
            config.threshold * (1.0 + closeness.powf(config.proximity_boost_power));

        if best_future > effective_threshold * state.visibility {
            let multiplier = config.multiplier;
            poi.update_score(|s| {
                s.deferred = true;
                s.score *= multiplier;
                if !s.details.is_empty() {
                    s.details.push('\n');
                }
                s.details.push_str(&format!(
                    "Deferred: future visibility {:.2} vs {:.2} now -> x{:.2}",
                    best_future, s.visibility, multiplier
                ));
            });
        }
    }
}
