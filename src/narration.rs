use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{AudioFormat, AudioPlayer};
use crate::errors::SimResult;
use crate::poi::NarrationStrategy;
use crate::poi_index::PoiIndex;
use crate::state_store::{PlayedRecord, StateStore};
use crate::telemetry::Telemetry;

/// Everything the external prompt/LLM layer needs to write a script.
/// Template rendering and the model call live outside the core.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub qid: String,
    pub display_name: String,
    pub category: String,
    pub strategy: Option<NarrationStrategy>,
    pub telemetry: Telemetry,
    pub manual: bool,
}

/// External script generation (prompt rendering + LLM).
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(&self, request: &ScriptRequest) -> SimResult<String>;
}

/// External text-to-speech.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, script: &str, base_name: &str) -> SimResult<(PathBuf, AudioFormat)>;
}

/// Beacon control surface the orchestrator drives. Implemented by
/// `BeaconGuidance`; narrow so tests can observe it.
#[async_trait]
pub trait BeaconControl: Send + Sync {
    async fn set_target(&self, lat: f64, lon: f64) -> SimResult<()>;
    async fn clear(&self);
}

/// Where the single in-flight narration currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NarrationPhase {
    #[default]
    Idle,
    Generating,
    Playing,
    CoolingDown,
}

/// Runs narrations one at a time.
///
/// The `active` flag is claimed by compare-and-swap before any work starts;
/// a second request during Generating/Playing/CoolingDown is rejected
/// without side effects. The phase mutex is held only for state reads and
/// writes, never across generator/synthesizer I/O.
pub struct NarrationOrchestrator {
    active: AtomicBool,
    phase: Mutex<NarrationPhase>,
    current_poi: Mutex<Option<String>>,
    index: Arc<PoiIndex>,
    store: Arc<dyn StateStore>,
    generator: Arc<dyn ScriptGenerator>,
    synthesizer: Arc<dyn Synthesizer>,
    player: Arc<dyn AudioPlayer>,
    beacons: Arc<dyn BeaconControl>,
    pause_between: Duration,
    cancel: CancellationToken,
}

impl NarrationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: Arc<PoiIndex>,
        store: Arc<dyn StateStore>,
        generator: Arc<dyn ScriptGenerator>,
        synthesizer: Arc<dyn Synthesizer>,
        player: Arc<dyn AudioPlayer>,
        beacons: Arc<dyn BeaconControl>,
        pause_between: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            active: AtomicBool::new(false),
            phase: Mutex::new(NarrationPhase::Idle),
            current_poi: Mutex::new(None),
            index,
            store,
            generator,
            synthesizer,
            player,
            beacons,
            pause_between,
            cancel,
        }
    }

    pub fn phase(&self) -> NarrationPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// True while `qid` is the subject of the in-flight narration. Fed to the
    /// scorer so a narrated POI does not flicker mid-playback.
    pub fn is_poi_busy(&self, qid: &str) -> bool {
        self.is_active()
            && self
                .current_poi
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_deref()
                == Some(qid)
    }

    fn set_phase(&self, phase: NarrationPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Narrate one POI end to end. Returns Ok(true) if the narration ran,
    /// Ok(false) if it was rejected (another narration active) or the POI
    /// vanished. Manual requests and automatic selections share this path.
    pub async fn play_poi(
        &self,
        qid: &str,
        manual: bool,
        telemetry: Telemetry,
        strategy: Option<NarrationStrategy>,
    ) -> SimResult<bool> {
        // Singleton claim; losing means another narration is in flight
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Narration already active, rejecting {}", qid);
            metrics::counter!("narration.rejected_busy_total").increment(1);
            return Ok(false);
        }

        let poi = match self.index.get(qid).await {
            Ok(poi) => poi,
            Err(e) => {
                warn!("Narration target {} not available: {}", qid, e);
                self.release();
                return Ok(false);
            }
        };
        *self.current_poi.lock().unwrap_or_else(|e| e.into_inner()) = Some(qid.to_string());

        let result = self.run(&poi, manual, telemetry, strategy).await;

        if let Err(e) = &result {
            warn!("Narration of {} failed: {}", qid, e);
            metrics::counter!("narration.failures_total").increment(1);
            self.beacons.clear().await;
        }

        // Quiet gap before the next narration may start
        self.set_phase(NarrationPhase::CoolingDown);
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = sleep(self.pause_between) => {}
        }
        self.release();

        result.map(|_| true)
    }

    fn release(&self) {
        self.set_phase(NarrationPhase::Idle);
        *self.current_poi.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.active.store(false, Ordering::Release);
    }

    async fn run(
        &self,
        poi: &crate::poi::Poi,
        manual: bool,
        telemetry: Telemetry,
        strategy: Option<NarrationStrategy>,
    ) -> SimResult<()> {
        let qid = poi.qid().to_string();
        let (lat, lon) = poi.position();

        info!("Narrating {} ({})", poi.display_name(), qid);
        metrics::counter!("narration.started_total").increment(1);

        if let Err(e) = self.beacons.set_target(lat, lon).await {
            // Guidance is best-effort; narration continues without it
            debug!("Beacon target for {} not set: {}", qid, e);
        }

        self.set_phase(NarrationPhase::Generating);
        let request = ScriptRequest {
            qid: qid.clone(),
            display_name: poi.display_name(),
            category: poi.category(),
            strategy: strategy.or(poi.score_state().strategy),
            telemetry,
            manual,
        };
        let script = self.generator.generate(&request).await?;
        let (audio_path, _format) = self.synthesizer.synthesize(&script, &qid).await?;

        // Synthesis succeeded: only now does the cooldown clock start
        let now = Utc::now();
        poi.set_last_played(now);
        let record = PlayedRecord {
            qid: qid.clone(),
            category: poi.category(),
            played_at: now,
        };
        if let Err(e) = self.store.record_played(&record).await {
            warn!("Failed to persist narration of {}: {}", qid, e);
        }
        if let Err(e) = self.store.record_seen(&qid).await {
            debug!("Failed to record seen entity {}: {}", qid, e);
        }

        self.set_phase(NarrationPhase::Playing);
        self.player.play(&audio_path, false)?;
        self.wait_for_playback().await;

        metrics::counter!("narration.completed_total").increment(1);
        Ok(())
    }

    /// Block until the player reports the clip done, or cancellation stops it.
    async fn wait_for_playback(&self) {
        loop {
            if self.cancel.is_cancelled() {
                self.player.stop();
                return;
            }
            match self.player.remaining() {
                Some(remaining) if !remaining.is_zero() => {
                    sleep(Duration::from_millis(200).min(remaining)).await;
                }
                _ => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoriesConfig, Config};
    use crate::errors::SimError;
    use crate::poi::{PoiData, PoiDraft};
    use crate::state_store::MemoryStateStore;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    struct StubGenerator {
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ScriptGenerator for StubGenerator {
        async fn generate(&self, request: &ScriptRequest) -> SimResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay).await;
            if self.fail {
                return Err(SimError::StoreFailure("llm unavailable".to_string()));
            }
            Ok(format!("About {}...", request.display_name))
        }
    }

    struct StubSynthesizer;

    #[async_trait]
    impl Synthesizer for StubSynthesizer {
        async fn synthesize(&self, _script: &str, base_name: &str) -> SimResult<(PathBuf, AudioFormat)> {
            Ok((PathBuf::from(format!("/tmp/{base_name}.wav")), AudioFormat::Wav))
        }
    }

    #[derive(Default)]
    struct StubPlayer {
        played: Mutex<Vec<PathBuf>>,
    }

    impl AudioPlayer for StubPlayer {
        fn play(&self, path: &Path, _start_paused: bool) -> SimResult<()> {
            self.played
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(path.to_path_buf());
            Ok(())
        }
        fn pause(&self) {}
        fn resume(&self) {}
        fn stop(&self) {}
        fn shutdown(&self) {}
        fn set_volume(&self, _volume: f64) {}
        fn position(&self) -> Option<Duration> {
            None
        }
        fn duration(&self) -> Option<Duration> {
            None
        }
        fn remaining(&self) -> Option<Duration> {
            None
        }
        fn replay_last(&self) -> SimResult<()> {
            Ok(())
        }
        fn last_played_path(&self) -> Option<PathBuf> {
            self.played
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .last()
                .cloned()
        }
    }

    #[derive(Default)]
    struct StubBeacons {
        targets: Mutex<Vec<(f64, f64)>>,
        cleared: AtomicUsize,
    }

    #[async_trait]
    impl BeaconControl for StubBeacons {
        async fn set_target(&self, lat: f64, lon: f64) -> SimResult<()> {
            self.targets
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((lat, lon));
            Ok(())
        }
        async fn clear(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        orchestrator: Arc<NarrationOrchestrator>,
        index: Arc<PoiIndex>,
        store: Arc<MemoryStateStore>,
        generator: Arc<StubGenerator>,
        player: Arc<StubPlayer>,
        beacons: Arc<StubBeacons>,
    }

    async fn fixture(generate_delay: Duration, generate_fails: bool) -> Fixture {
        let store = Arc::new(MemoryStateStore::new());
        let index = Arc::new(PoiIndex::new(
            &Config::default(),
            Arc::new(CategoriesConfig::default()),
            Arc::clone(&store) as Arc<dyn StateStore>,
        ));
        index
            .upsert(
                PoiDraft {
                    qid: "Q1".to_string(),
                    data: PoiData {
                        latitude: 45.0,
                        longitude: -72.8,
                        name_english: Some("Old Fort".to_string()),
                        category: "castle".to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap();

        let generator = Arc::new(StubGenerator {
            delay: generate_delay,
            fail: generate_fails,
            calls: AtomicUsize::new(0),
        });
        let player = Arc::new(StubPlayer::default());
        let beacons = Arc::new(StubBeacons::default());

        let orchestrator = Arc::new(NarrationOrchestrator::new(
            Arc::clone(&index),
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::clone(&generator) as Arc<dyn ScriptGenerator>,
            Arc::new(StubSynthesizer),
            Arc::clone(&player) as Arc<dyn AudioPlayer>,
            Arc::clone(&beacons) as Arc<dyn BeaconControl>,
            Duration::from_millis(50),
            CancellationToken::new(),
        ));

        Fixture {
            orchestrator,
            index,
            store,
            generator,
            player,
            beacons,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_narration_updates_last_played() {
        let f = fixture(Duration::from_millis(10), false).await;
        let started = f
            .orchestrator
            .play_poi("Q1", false, Telemetry::default(), None)
            .await
            .unwrap();
        assert!(started);

        let poi = f.index.get("Q1").await.unwrap();
        assert!(poi.last_played().is_some(), "cooldown clock started");
        assert_eq!(f.player.played.lock().unwrap().len(), 1);
        assert_eq!(f.beacons.targets.lock().unwrap().len(), 1);
        let history = f
            .store
            .recent_played(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].category, "castle");
        assert_eq!(f.orchestrator.phase(), NarrationPhase::Idle);
        assert!(!f.orchestrator.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_play_one_wins() {
        let f = fixture(Duration::from_millis(200), false).await;
        let a = {
            let orchestrator = Arc::clone(&f.orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .play_poi("Q1", false, Telemetry::default(), None)
                    .await
                    .unwrap()
            })
        };
        // Let the first request claim the flag
        sleep(Duration::from_millis(20)).await;
        let b = f
            .orchestrator
            .play_poi("Q1", true, Telemetry::default(), None)
            .await
            .unwrap();

        assert!(!b, "second request rejected immediately");
        assert!(a.await.unwrap(), "first request completes");
        assert_eq!(
            f.generator.calls.load(Ordering::SeqCst),
            1,
            "loser had no side effects"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_failure_leaves_poi_selectable() {
        let f = fixture(Duration::from_millis(10), true).await;
        let result = f
            .orchestrator
            .play_poi("Q1", false, Telemetry::default(), None)
            .await;
        assert!(result.is_err());

        let poi = f.index.get("Q1").await.unwrap();
        assert!(
            poi.last_played().is_none(),
            "failure must not start the cooldown"
        );
        assert!(f.player.played.lock().unwrap().is_empty());
        assert_eq!(
            f.beacons.cleared.load(Ordering::SeqCst),
            1,
            "beacons cleared on failure"
        );
        assert!(!f.orchestrator.is_active(), "active released after failure");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_poi_releases_immediately() {
        let f = fixture(Duration::from_millis(10), false).await;
        let started = f
            .orchestrator
            .play_poi("Q404", false, Telemetry::default(), None)
            .await
            .unwrap();
        assert!(!started);
        assert!(!f.orchestrator.is_active());
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_predicate_tracks_current_poi() {
        let f = fixture(Duration::from_millis(500), false).await;
        let orchestrator = Arc::clone(&f.orchestrator);
        let handle = tokio::spawn(async move {
            orchestrator
                .play_poi("Q1", false, Telemetry::default(), None)
                .await
                .unwrap()
        });
        sleep(Duration::from_millis(50)).await;
        assert!(f.orchestrator.is_poi_busy("Q1"));
        assert!(!f.orchestrator.is_poi_busy("Q2"));
        handle.await.unwrap();
        assert!(!f.orchestrator.is_poi_busy("Q1"), "released after completion");
    }
}
