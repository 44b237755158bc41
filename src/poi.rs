use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Short tags shown next to a POI. Recomputed on every scoring pass; none
/// are persistent except through recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    /// Long article worth an extended narration
    DeepDive,
    /// Article too short to say much
    Stub,
    /// Subject is also a hand-crafted simulator POI
    Msfs,
    /// Scheduler-owned: narrate now or lose the geometry
    Urgent,
}

impl Badge {
    pub fn as_str(self) -> &'static str {
        match self {
            Badge::DeepDive => "deep_dive",
            Badge::Stub => "stub",
            Badge::Msfs => "msfs",
            Badge::Urgent => "urgent",
        }
    }
}

/// Terrain line-of-sight verdict from the last scoring pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LosStatus {
    #[default]
    Unknown,
    Visible,
    Blocked,
}

/// How the narration script should frame the approach geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationStrategy {
    /// The track passes near-overhead
    Flyover,
    /// The subject stays abeam
    PassingBy,
    /// Narrated while parked or taxiing
    OnGround,
}

/// Descriptive fields, updated in place on upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoiData {
    pub latitude: f64,
    pub longitude: f64,
    pub name_english: Option<String>,
    pub name_local: Option<String>,
    /// User-preferred display name, wins over english and local
    pub name_user: Option<String>,
    /// Normalized lowercase category
    pub category: String,
    pub sitelinks: u32,
    pub article_length: u32,
    /// Physical-dimension score multiplier; ignored unless > 0
    pub dimension_multiplier: Option<f64>,
    /// Overlaps a hand-crafted simulator POI
    pub is_msfs_poi: bool,
    /// Excluded from scoring entirely
    pub hidden: bool,
    /// Deferred by the user: skip until they bring it back
    pub user_deferred: bool,
    pub icon: Option<String>,
    /// QID of the entity that caused this POI to be tracked
    pub trigger_qid: Option<String>,
}

/// Scoring outputs, rewritten by every pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreState {
    pub score: f64,
    /// Geographic visibility fraction, 0.0-1.0+
    pub visibility: f64,
    pub is_visible: bool,
    pub badges: Vec<Badge>,
    /// Human-readable audit trail of the factors behind `score`
    pub details: String,
    pub los_status: LosStatus,
    pub strategy: Option<NarrationStrategy>,
    pub time_to_cpa_secs: Option<f64>,
    pub time_to_behind_secs: Option<f64>,
    /// Score was reduced because a better viewing geometry is imminent
    pub deferred: bool,
}

/// Input value for an upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoiDraft {
    pub qid: String,
    pub data: PoiData,
    pub last_played: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PoiDraft {
    pub fn has_any_name(&self) -> bool {
        [
            &self.data.name_user,
            &self.data.name_english,
            &self.data.name_local,
        ]
        .iter()
        .any(|n| n.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}

/// A tracked point of interest.
///
/// Lives behind an `Arc` in the index from first upsert until session reset;
/// upserts mutate the field groups in place so every holder of the pointer
/// keeps observing the same object. The identity (`qid`) never changes.
#[derive(Debug)]
pub struct Poi {
    qid: String,
    created_at: RwLock<DateTime<Utc>>,
    last_played: RwLock<Option<DateTime<Utc>>>,
    data: RwLock<PoiData>,
    score: RwLock<ScoreState>,
}

impl Poi {
    pub fn from_draft(draft: PoiDraft, now: DateTime<Utc>) -> Self {
        Self {
            qid: draft.qid,
            created_at: RwLock::new(draft.created_at.unwrap_or(now)),
            last_played: RwLock::new(draft.last_played),
            data: RwLock::new(draft.data),
            score: RwLock::new(ScoreState::default()),
        }
    }

    pub fn qid(&self) -> &str {
        &self.qid
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        *self.created_at.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_played(&self) -> Option<DateTime<Utc>> {
        *self.last_played.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_last_played(&self, at: DateTime<Utc>) {
        *self.last_played.write().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    pub fn clear_last_played(&self) {
        *self.last_played.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Narrated within the repeat TTL?
    pub fn is_on_cooldown(&self, repeat_ttl_secs: u64, now: DateTime<Utc>) -> bool {
        match self.last_played() {
            Some(at) => {
                let elapsed = now.signed_duration_since(at);
                elapsed.num_seconds() >= 0 && (elapsed.num_seconds() as u64) < repeat_ttl_secs
            }
            None => false,
        }
    }

    pub fn data(&self) -> PoiData {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&PoiData) -> R) -> R {
        f(&self.data.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Replace descriptive fields in place, preserving identity.
    pub fn update_data(&self, f: impl FnOnce(&mut PoiData)) {
        f(&mut self.data.write().unwrap_or_else(|e| e.into_inner()));
    }

    pub fn score_state(&self) -> ScoreState {
        self.score.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_score<R>(&self, f: impl FnOnce(&mut ScoreState) -> R) -> R {
        f(&mut self.score.write().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn position(&self) -> (f64, f64) {
        self.with_data(|d| (d.latitude, d.longitude))
    }

    pub fn category(&self) -> String {
        self.with_data(|d| d.category.clone())
    }

    /// Display priority: user > english > local > qid
    pub fn display_name(&self) -> String {
        self.with_data(|d| {
            for name in [&d.name_user, &d.name_english, &d.name_local] {
                if let Some(name) = name.as_deref()
                    && !name.trim().is_empty()
                {
                    return name.to_string();
                }
            }
            self.qid.clone()
        })
    }
}
