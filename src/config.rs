use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::errors::SimError;

/// Size class used to look up max visibility distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SizeClass {
    S,
    #[default]
    M,
    L,
    Xl,
}

impl SizeClass {
    pub const ALL: [SizeClass; 4] = [SizeClass::S, SizeClass::M, SizeClass::L, SizeClass::Xl];

    /// Radius used for MSFS-overlap matching at upsert, meters
    pub fn overlap_radius_m(self) -> f64 {
        match self {
            SizeClass::S => 250.0,
            SizeClass::M => 500.0,
            SizeClass::L => 1_500.0,
            SizeClass::Xl => 4_000.0,
        }
    }
}

/// Per-category configuration: weight/size/icon/pregrounding/group membership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySpec {
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub size: SizeClass,
    #[serde(default)]
    pub icon: Option<String>,
    /// Opt-in to the virtual article-length boost
    #[serde(default)]
    pub preground: bool,
    /// Variety group this category belongs to (e.g. "water" for lake/river)
    #[serde(default)]
    pub group: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

impl Default for CategorySpec {
    fn default() -> Self {
        Self {
            weight: 1.0,
            size: SizeClass::M,
            icon: None,
            preground: false,
            group: None,
        }
    }
}

/// Map of normalized (lowercase) category name to its spec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoriesConfig {
    #[serde(default)]
    pub categories: HashMap<String, CategorySpec>,
}

impl CategoriesConfig {
    pub fn get(&self, category: &str) -> Option<&CategorySpec> {
        self.categories.get(&category.to_lowercase())
    }

    pub fn size_class(&self, category: &str) -> SizeClass {
        self.get(category).map(|c| c.size).unwrap_or_default()
    }

    pub fn weight(&self, category: &str) -> f64 {
        self.get(category).map(|c| c.weight).unwrap_or(1.0)
    }

    pub fn pregrounded(&self, category: &str) -> bool {
        self.get(category).map(|c| c.preground).unwrap_or(false)
    }

    pub fn group(&self, category: &str) -> Option<&str> {
        self.get(category).and_then(|c| c.group.as_deref())
    }

    /// Two categories are in the same variety group if both name the same group
    pub fn same_group(&self, a: &str, b: &str) -> bool {
        match (self.group(a), self.group(b)) {
            (Some(ga), Some(gb)) => ga == gb,
            _ => false,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read categories file: {:?}", path.as_ref()))?;
        let config: CategoriesConfig =
            toml::from_str(&text).context("Failed to parse categories TOML")?;
        Ok(config)
    }
}

/// Simulator connection tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Application name announced on open()
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Reconnect interval for the telemetry connection, seconds
    #[serde(default = "default_retry_secs")]
    pub retry_interval_secs: u64,
    /// Reconnect interval for the beacon connection, seconds
    #[serde(default = "default_beacon_retry_secs")]
    pub beacon_retry_interval_secs: u64,
    /// Disconnect if no message arrives for this long, seconds
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,
    /// Look-ahead used for the predicted position, seconds
    #[serde(default = "default_prediction_window_secs")]
    pub prediction_window_secs: u64,
}

fn default_app_name() -> String {
    "skytour".to_string()
}
fn default_retry_secs() -> u64 {
    5
}
fn default_beacon_retry_secs() -> u64 {
    60
}
fn default_watchdog_secs() -> u64 {
    5
}
fn default_prediction_window_secs() -> u64 {
    60
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            retry_interval_secs: default_retry_secs(),
            beacon_retry_interval_secs: default_beacon_retry_secs(),
            watchdog_secs: default_watchdog_secs(),
            prediction_window_secs: default_prediction_window_secs(),
        }
    }
}

/// UI/candidate filter mode for the POI list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Adaptive,
    Fixed,
}

/// Scoring tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Minimum time between narrations of the same POI, seconds
    #[serde(default = "default_repeat_ttl_secs")]
    pub repeat_ttl_secs: u64,
    /// Window of played-category history fed to the variety penalty, seconds
    #[serde(default = "default_history_window_secs")]
    pub history_window_secs: u64,
    /// Scoring pass cadence, seconds
    #[serde(default = "default_scoring_interval_secs")]
    pub scoring_interval_secs: u64,
    /// Skip the pass if the aircraft moved less than this since the last one, meters
    #[serde(default = "default_min_movement_m")]
    pub min_movement_m: f64,
    /// Added to max_radius_nm for the phase-1 far cut, nautical miles
    #[serde(default = "default_radius_padding_nm")]
    pub radius_padding_nm: f64,
    #[serde(default)]
    pub filter_mode: FilterMode,
    /// Number of POIs shown in adaptive mode
    #[serde(default = "default_target_poi_count")]
    pub target_poi_count: usize,
    /// Score floor in fixed mode
    #[serde(default = "default_min_score_threshold")]
    pub min_score_threshold: f64,
    /// Narration candidate list length
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Article-length multiplier ceiling
    #[serde(default = "default_article_ceiling")]
    pub article_length_ceiling: f64,
    /// Virtual characters added inside the sqrt for pregrounded categories
    #[serde(default = "default_pregrounding_boost")]
    pub pregrounding_boost_chars: u32,
    #[serde(default = "default_true")]
    pub pregrounding_enabled: bool,
    /// Article length at or above which the deep_dive badge is set
    #[serde(default = "default_deep_dive_chars")]
    pub deep_dive_chars: u32,
    /// Article length below which the stub badge is set
    #[serde(default = "default_stub_chars")]
    pub stub_chars: u32,
    /// Enable terrain line-of-sight occlusion checks
    #[serde(default = "default_true")]
    pub terrain_los_enabled: bool,
    /// Blind-spot horizontal radius, nautical miles
    #[serde(default = "default_blind_spot_radius_nm")]
    pub blind_spot_radius_nm: f64,
    /// Minimum AGL for the blind spot to apply, feet
    #[serde(default = "default_blind_spot_min_agl_ft")]
    pub blind_spot_min_agl_ft: f64,
    /// Distance prune threshold, kilometers
    #[serde(default = "default_prune_threshold_km")]
    pub prune_threshold_km: f64,
    /// Optional forward prune cap, kilometers; 0 disables it and keeps
    /// ahead-of-aircraft POIs regardless of distance
    #[serde(default)]
    pub forward_prune_cap_km: f64,
    /// Prune pass cadence, seconds
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_repeat_ttl_secs() -> u64 {
    6 * 3600
}
fn default_history_window_secs() -> u64 {
    3600
}
fn default_scoring_interval_secs() -> u64 {
    5
}
fn default_min_movement_m() -> f64 {
    128.0
}
fn default_radius_padding_nm() -> f64 {
    5.0
}
fn default_target_poi_count() -> usize {
    12
}
fn default_min_score_threshold() -> f64 {
    1.0
}
fn default_candidate_limit() -> usize {
    5
}
fn default_article_ceiling() -> f64 {
    8.0
}
fn default_pregrounding_boost() -> u32 {
    4000
}
fn default_deep_dive_chars() -> u32 {
    20_000
}
fn default_stub_chars() -> u32 {
    1_500
}
fn default_blind_spot_radius_nm() -> f64 {
    0.8
}
fn default_blind_spot_min_agl_ft() -> f64 {
    2_000.0
}
fn default_prune_threshold_km() -> f64 {
    80.0
}
fn default_prune_interval_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            repeat_ttl_secs: default_repeat_ttl_secs(),
            history_window_secs: default_history_window_secs(),
            scoring_interval_secs: default_scoring_interval_secs(),
            min_movement_m: default_min_movement_m(),
            radius_padding_nm: default_radius_padding_nm(),
            filter_mode: FilterMode::default(),
            target_poi_count: default_target_poi_count(),
            min_score_threshold: default_min_score_threshold(),
            candidate_limit: default_candidate_limit(),
            article_length_ceiling: default_article_ceiling(),
            pregrounding_boost_chars: default_pregrounding_boost(),
            pregrounding_enabled: true,
            deep_dive_chars: default_deep_dive_chars(),
            stub_chars: default_stub_chars(),
            terrain_los_enabled: true,
            blind_spot_radius_nm: default_blind_spot_radius_nm(),
            blind_spot_min_agl_ft: default_blind_spot_min_agl_ft(),
            prune_threshold_km: default_prune_threshold_km(),
            forward_prune_cap_km: 0.0,
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

/// Variety penalty tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarietyConfig {
    /// Penalty multiplier for the newest history slot
    #[serde(default = "default_variety_first")]
    pub penalty_first: f64,
    /// Penalty multiplier at and beyond the last interpolated slot
    #[serde(default = "default_variety_last")]
    pub penalty_last: f64,
    /// Number of history slots the penalty interpolates over
    #[serde(default = "default_variety_num")]
    pub penalty_num: usize,
    /// Multiplier when the category shares a group with the most recent one
    #[serde(default = "default_group_penalty")]
    pub group_penalty: f64,
    /// Multiplier when no recent item shares the category
    #[serde(default = "default_novelty_boost")]
    pub novelty_boost: f64,
}

fn default_variety_first() -> f64 {
    0.25
}
fn default_variety_last() -> f64 {
    0.9
}
fn default_variety_num() -> usize {
    6
}
fn default_group_penalty() -> f64 {
    0.5
}
fn default_novelty_boost() -> f64 {
    1.3
}

impl Default for VarietyConfig {
    fn default() -> Self {
        Self {
            penalty_first: default_variety_first(),
            penalty_last: default_variety_last(),
            penalty_num: default_variety_num(),
            group_penalty: default_group_penalty(),
            novelty_boost: default_novelty_boost(),
        }
    }
}

/// Deferral tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferralConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// A future visibility must exceed threshold x current to defer
    #[serde(default = "default_deferral_threshold")]
    pub threshold: f64,
    /// Score multiplier applied to deferred POIs
    #[serde(default = "default_deferral_multiplier")]
    pub multiplier: f64,
    /// Dampens deferral when the POI is already close
    #[serde(default = "default_proximity_boost_power")]
    pub proximity_boost_power: f64,
    /// Future track sample offsets, seconds
    #[serde(default = "default_sample_offsets")]
    pub sample_offsets_secs: Vec<u64>,
}

fn default_deferral_threshold() -> f64 {
    1.4
}
fn default_deferral_multiplier() -> f64 {
    0.1
}
fn default_proximity_boost_power() -> f64 {
    2.0
}
fn default_sample_offsets() -> Vec<u64> {
    vec![30, 60, 90, 120, 150, 180, 240, 300, 360]
}

impl Default for DeferralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_deferral_threshold(),
            multiplier: default_deferral_multiplier(),
            proximity_boost_power: default_proximity_boost_power(),
            sample_offsets_secs: default_sample_offsets(),
        }
    }
}

/// Beacon guidance tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Sim object title used for spawned beacons
    #[serde(default = "default_beacon_title")]
    pub object_title: String,
    /// Number of formation balloons, clamped to 1..=5
    #[serde(default = "default_formation_count")]
    pub formation_count: usize,
    /// Forward distance of the formation, meters
    #[serde(default = "default_formation_distance_m")]
    pub formation_distance_m: f64,
    /// Below this AGL the target is lifted and the formation suppressed, meters
    #[serde(default = "default_min_spawn_altitude_m")]
    pub min_spawn_altitude_m: f64,
    /// AGL below which the altitude hold locks, feet
    #[serde(default = "default_altitude_floor_ft")]
    pub altitude_floor_ft: f64,
    /// Distance at which the target beacon starts sinking, meters
    #[serde(default = "default_sink_distance_far_m")]
    pub sink_distance_far_m: f64,
    /// Distance at which the target beacon reaches its floor, meters
    #[serde(default = "default_sink_distance_close_m")]
    pub sink_distance_close_m: f64,
    /// Height above terrain the target beacon sinks to, meters
    #[serde(default = "default_target_floor_agl_m")]
    pub target_floor_agl_m: f64,
    /// Maximum simultaneous targets before the oldest is evicted
    #[serde(default = "default_max_targets")]
    pub max_targets: usize,
    /// Target beacons farther than this and behind the aircraft are dropped, meters
    #[serde(default = "default_stale_distance_m")]
    pub stale_distance_m: f64,
    /// Update loop cadence, milliseconds
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

fn default_beacon_title() -> String {
    "Hot Air Balloon".to_string()
}
fn default_formation_count() -> usize {
    3
}
fn default_formation_distance_m() -> f64 {
    2_000.0
}
fn default_min_spawn_altitude_m() -> f64 {
    300.0
}
fn default_altitude_floor_ft() -> f64 {
    2_000.0
}
fn default_sink_distance_far_m() -> f64 {
    10_000.0
}
fn default_sink_distance_close_m() -> f64 {
    2_000.0
}
fn default_target_floor_agl_m() -> f64 {
    150.0
}
fn default_max_targets() -> usize {
    1
}
fn default_stale_distance_m() -> f64 {
    50_000.0
}
fn default_frame_interval_ms() -> u64 {
    50
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            object_title: default_beacon_title(),
            formation_count: default_formation_count(),
            formation_distance_m: default_formation_distance_m(),
            min_spawn_altitude_m: default_min_spawn_altitude_m(),
            altitude_floor_ft: default_altitude_floor_ft(),
            sink_distance_far_m: default_sink_distance_far_m(),
            sink_distance_close_m: default_sink_distance_close_m(),
            target_floor_agl_m: default_target_floor_agl_m(),
            max_targets: default_max_targets(),
            stale_distance_m: default_stale_distance_m(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

/// Narration tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationConfig {
    /// Quiet gap after a narration before the next may start, seconds
    #[serde(default = "default_pause_secs")]
    pub pause_between_narrations_secs: u64,
    /// Narration dispatch cadence, seconds
    #[serde(default = "default_narration_interval_secs")]
    pub dispatch_interval_secs: u64,
}

fn default_pause_secs() -> u64 {
    30
}
fn default_narration_interval_secs() -> u64 {
    10
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            pause_between_narrations_secs: default_pause_secs(),
            dispatch_interval_secs: default_narration_interval_secs(),
        }
    }
}

/// Elevation data tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevationConfig {
    /// Directory holding gzipped SRTM HGT tiles (N45/N45E009.hgt.gz layout)
    #[serde(default = "default_elevation_path")]
    pub data_path: String,
    #[serde(default = "default_elevation_cache")]
    pub result_cache_entries: u64,
    #[serde(default = "default_tile_cache")]
    pub tile_cache_entries: u64,
}

fn default_elevation_path() -> String {
    "/var/skytour/elevation".to_string()
}
fn default_elevation_cache() -> u64 {
    500_000
}
fn default_tile_cache() -> u64 {
    64
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            data_path: default_elevation_path(),
            result_cache_entries: default_elevation_cache(),
            tile_cache_entries: default_tile_cache(),
        }
    }
}

/// Top-level immutable configuration consumed by the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub variety: VarietyConfig,
    #[serde(default)]
    pub deferral: DeferralConfig,
    #[serde(default)]
    pub beacon: BeaconConfig,
    #[serde(default)]
    pub narration: NarrationConfig,
    #[serde(default)]
    pub elevation: ElevationConfig,
    /// Category name -> icon override, checked before the keyword fallback
    #[serde(default)]
    pub icons: HashMap<String, String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SimError::ConfigError(format!("read {:?}: {e}", path.as_ref())))?;
        toml::from_str(&text).map_err(|e| SimError::ConfigError(format!("parse TOML: {e}")))
    }
}
