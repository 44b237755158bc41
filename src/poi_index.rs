use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, trace};

use crate::config::{CategoriesConfig, Config, FilterMode};
use crate::errors::{SimError, SimResult};
use crate::geo;
use crate::poi::{Poi, PoiDraft};
use crate::state_store::StateStore;

/// Keyword fallback for icon assignment when neither the icon table nor the
/// category spec names one.
const ICON_KEYWORDS: [(&str, &str); 9] = [
    ("castle", "castle"),
    ("church", "church"),
    ("cathedral", "church"),
    ("lake", "water"),
    ("river", "water"),
    ("mountain", "mountain"),
    ("peak", "mountain"),
    ("aerodrome", "airport"),
    ("bridge", "bridge"),
];

const ICON_DEFAULT: &str = "landmark";

fn fallback_icon(category: &str) -> &'static str {
    for (keyword, icon) in ICON_KEYWORDS {
        if category.contains(keyword) {
            return icon;
        }
    }
    ICON_DEFAULT
}

#[derive(Default)]
struct IndexInner {
    pois: HashMap<String, Arc<Poi>>,
    /// Aircraft position at the end of the last scoring pass
    last_scored: Option<(f64, f64)>,
    /// POI count at the end of the last scoring pass
    last_scored_count: usize,
}

/// The authoritative in-memory store of tracked POIs.
///
/// One read-write lock guards the map; the POIs themselves are pointer-stable
/// (`Arc`) with their own interior locks, so the scoring pass mutates them
/// without holding the index lock.
pub struct PoiIndex {
    inner: RwLock<IndexInner>,
    categories: Arc<CategoriesConfig>,
    /// Category -> icon overrides from the main config
    icons: HashMap<String, String>,
    store: Arc<dyn StateStore>,
    /// Known hand-crafted simulator landmark positions for the overlap check
    msfs_landmarks: RwLock<Vec<(f64, f64)>>,
}

impl PoiIndex {
    pub fn new(
        config: &Config,
        categories: Arc<CategoriesConfig>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
            categories,
            icons: config.icons.clone(),
            store,
            msfs_landmarks: RwLock::new(Vec::new()),
        }
    }

    /// Install the simulator landmark positions used by the overlap check.
    pub fn set_msfs_landmarks(&self, landmarks: Vec<(f64, f64)>) {
        *self
            .msfs_landmarks
            .write()
            .unwrap_or_else(|e| e.into_inner()) = landmarks;
    }

    fn is_msfs_overlap(&self, lat: f64, lon: f64, category: &str) -> bool {
        let radius_m = self.categories.size_class(category).overlap_radius_m();
        self.msfs_landmarks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|(llat, llon)| geo::haversine_distance_m(lat, lon, *llat, *llon) <= radius_m)
    }

    fn resolve_icon(&self, category: &str) -> String {
        if let Some(icon) = self.icons.get(category) {
            return icon.clone();
        }
        if let Some(spec) = self.categories.get(category)
            && let Some(icon) = &spec.icon
        {
            return icon.clone();
        }
        fallback_icon(category).to_string()
    }

    /// Insert or update a POI.
    ///
    /// Nameless drafts are silently dropped (success). Existing POIs are
    /// updated in place so readers holding the pointer keep observing the
    /// same object; `last_played`, `created_at` and a non-empty existing
    /// `trigger_qid` survive the update. With `persist` the draft is also
    /// written to the state store; a store failure surfaces as
    /// `StoreFailure` but the in-memory state still reflects the upsert.
    pub async fn upsert(&self, mut draft: PoiDraft, persist: bool) -> SimResult<()> {
        if !draft.has_any_name() {
            trace!("Dropping nameless POI {}", draft.qid);
            return Ok(());
        }

        draft.data.category = draft.data.category.to_lowercase();
        if draft.data.icon.is_none() {
            draft.data.icon = Some(self.resolve_icon(&draft.data.category));
        }
        draft.data.is_msfs_poi = draft.data.is_msfs_poi
            || self.is_msfs_overlap(draft.data.latitude, draft.data.longitude, &draft.data.category);

        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = inner.pois.get(&draft.qid) {
                let prior_trigger = existing.with_data(|d| d.trigger_qid.clone());
                let new_data = {
                    let mut data = draft.data.clone();
                    // Keep the previous trigger unless the draft names one
                    if data.trigger_qid.as_deref().is_none_or(str::is_empty) {
                        data.trigger_qid = prior_trigger;
                    }
                    data
                };
                existing.update_data(|d| *d = new_data);
                // A newer last-played wins; an absent one never clears it
                if let Some(played) = draft.last_played
                    && existing.last_played().is_none_or(|prev| played > prev)
                {
                    existing.set_last_played(played);
                }
                trace!("Updated POI {} in place", draft.qid);
            } else {
                let qid = draft.qid.clone();
                inner
                    .pois
                    .insert(qid.clone(), Arc::new(Poi::from_draft(draft.clone(), Utc::now())));
                debug!("Tracking new POI {}", qid);
            }
            metrics::gauge!("poi_index.tracked").set(inner.pois.len() as f64);
        }

        if persist {
            self.store.save_poi(&draft).await.map_err(|e| match e {
                SimError::StoreFailure(_) => e,
                other => SimError::StoreFailure(other.to_string()),
            })?;
        }
        Ok(())
    }

    /// Get a POI by id: the live pointer if tracked, else the state store.
    pub async fn get(&self, qid: &str) -> SimResult<Arc<Poi>> {
        if let Some(poi) = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .pois
            .get(qid)
        {
            return Ok(Arc::clone(poi));
        }
        match self.store.load_poi(qid).await? {
            Some(draft) => Ok(Arc::new(Poi::from_draft(draft, Utc::now()))),
            None => Err(SimError::NotFound(qid.to_string())),
        }
    }

    /// Snapshot of the current pointer list. Readers iterate without
    /// touching the index lock again.
    pub fn tracked(&self) -> Vec<Arc<Poi>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .pois
            .values()
            .cloned()
            .collect()
    }

    pub fn poi_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .pois
            .len()
    }

    pub fn last_scored(&self) -> Option<(f64, f64)> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last_scored
    }

    pub fn last_scored_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last_scored_count
    }

    pub fn set_last_scored(&self, lat: f64, lon: f64, count: usize) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.last_scored = Some((lat, lon));
        inner.last_scored_count = count;
    }

    /// Evict POIs that are both beyond the distance threshold and behind the
    /// aircraft. Ahead-of-aircraft POIs are retained regardless of distance
    /// unless `forward_cap_km` is non-zero.
    ///
    /// Returns the number of POIs evicted.
    pub fn prune_by_distance(
        &self,
        lat: f64,
        lon: f64,
        heading_deg: f64,
        threshold_km: f64,
        forward_cap_km: f64,
    ) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let before = inner.pois.len();
        inner.pois.retain(|qid, poi| {
            let (plat, plon) = poi.position();
            let distance_m = geo::haversine_distance_m(lat, lon, plat, plon);
            if distance_m <= threshold_km * 1000.0 {
                return true;
            }
            let bearing = geo::initial_bearing_deg(lat, lon, plat, plon);
            let behind = geo::angular_difference_deg(heading_deg, bearing) > 90.0;
            if behind {
                trace!("Pruning {} ({:.1} km behind)", qid, distance_m / 1000.0);
                return false;
            }
            if forward_cap_km > 0.0 && distance_m > forward_cap_km * 1000.0 {
                trace!("Pruning {} (beyond forward cap)", qid);
                return false;
            }
            true
        });
        let evicted = before - inner.pois.len();
        if evicted > 0 {
            debug!("Pruned {} distant POIs", evicted);
            metrics::counter!("poi_index.pruned_total").increment(evicted as u64);
            metrics::gauge!("poi_index.tracked").set(inner.pois.len() as f64);
        }
        evicted
    }

    /// Deterministic list for the map/UI layer.
    ///
    /// POIs on cooldown stay visible until the cooldown expires; visible
    /// POIs make the list when their score meets the threshold: the
    /// nth-ranked visible score in adaptive mode, `min_score` in fixed mode.
    /// Sorted by score descending, then id ascending for stable output.
    pub fn get_pois_for_ui(
        &self,
        filter_mode: FilterMode,
        target_count: usize,
        min_score: f64,
        repeat_ttl_secs: u64,
    ) -> Vec<Arc<Poi>> {
        let now = Utc::now();
        let tracked = self.tracked();

        let mut visible: Vec<(&Arc<Poi>, f64)> = tracked
            .iter()
            .filter_map(|poi| {
                let score = poi.score_state();
                (score.is_visible && score.score > 0.0).then_some((poi, score.score))
            })
            .collect();
        visible.sort_by(|a, b| b.1.total_cmp(&a.1));

        let threshold = match filter_mode {
            FilterMode::Adaptive => {
                if visible.len() >= target_count && target_count > 0 {
                    visible[target_count - 1].1
                } else {
                    0.0
                }
            }
            FilterMode::Fixed => min_score,
        };

        let mut result: Vec<Arc<Poi>> = Vec::new();
        for poi in &tracked {
            let on_cooldown = poi.is_on_cooldown(repeat_ttl_secs, now);
            let score = poi.score_state();
            let passes = score.is_visible && score.score > 0.0 && score.score >= threshold;
            if on_cooldown || passes {
                result.push(Arc::clone(poi));
            }
        }

        result.sort_by(|a, b| {
            b.score_state()
                .score
                .total_cmp(&a.score_state().score)
                .then_with(|| a.qid().cmp(b.qid()))
        });
        result
    }

    /// Strict candidate list for the narration picker: no cooldown, visible,
    /// above the score floor; on the ground only aerodromes qualify.
    pub fn get_narration_candidates(
        &self,
        limit: usize,
        min_score: f64,
        on_ground: bool,
        repeat_ttl_secs: u64,
    ) -> Vec<Arc<Poi>> {
        let now = Utc::now();
        let mut candidates: Vec<Arc<Poi>> = self
            .tracked()
            .into_iter()
            .filter(|poi| {
                if poi.is_on_cooldown(repeat_ttl_secs, now) {
                    return false;
                }
                let score = poi.score_state();
                if !score.is_visible || score.score < min_score {
                    return false;
                }
                if on_ground && poi.category() != "aerodrome" {
                    return false;
                }
                true
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score_state()
                .score
                .total_cmp(&a.score_state().score)
                .then_with(|| a.qid().cmp(b.qid()))
        });
        candidates.truncate(limit);
        candidates
    }

    /// Fully replace the map and zero the last-scored state. Persistence is
    /// untouched.
    pub fn reset_session(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.pois = HashMap::new();
        inner.last_scored = None;
        inner.last_scored_count = 0;
        metrics::gauge!("poi_index.tracked").set(0.0);
        debug!("POI index reset");
    }
}
