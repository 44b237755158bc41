use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{NarrationConfig, ScoringConfig};
use crate::narration::NarrationOrchestrator;
use crate::scheduler::{IntervalGate, Job, JobLock};
use crate::poi_index::PoiIndex;
use crate::telemetry::{SimState, Telemetry};

/// Picks the top narration candidate and hands it to the orchestrator.
/// Automatic selections go through the same `play_poi` path as manual ones.
pub struct NarrateJob {
    lock: JobLock,
    gate: IntervalGate,
    scoring: ScoringConfig,
    narration: NarrationConfig,
    index: Arc<PoiIndex>,
    orchestrator: Arc<NarrationOrchestrator>,
}

impl NarrateJob {
    pub fn new(
        scoring: ScoringConfig,
        narration: NarrationConfig,
        index: Arc<PoiIndex>,
        orchestrator: Arc<NarrationOrchestrator>,
    ) -> Self {
        Self {
            lock: JobLock::new(),
            gate: IntervalGate::new(),
            scoring,
            narration,
            index,
            orchestrator,
        }
    }
}

#[async_trait]
impl Job for NarrateJob {
    fn name(&self) -> &'static str {
        "narrate"
    }

    fn should_fire(&self, state: SimState, telemetry: Option<&Telemetry>) -> bool {
        state == SimState::Active
            && telemetry.is_some()
            && !self.orchestrator.is_active()
            && self
                .gate
                .due(Duration::from_secs(self.narration.dispatch_interval_secs))
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

        let candidates = self.index.get_narration_candidates(
            self.scoring.candidate_limit,
            self.scoring.min_score_threshold,
            telemetry.on_ground,
            self.scoring.repeat_ttl_secs,
        );
        let Some(top) = candidates.first() else {
            return;
        };

        let qid = top.qid().to_string();
        let strategy = top.score_state().strategy;
        debug!(
            "Dispatching narration for {} (score {:.1})",
            qid,
            top.score_state().score
        );
        if let Err(e) = self
            .orchestrator
            .play_poi(&qid, false, telemetry, strategy)
            .await
        {
            debug!("Automatic narration of {} failed: {}", qid, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, AudioPlayer};
    use crate::config::{CategoriesConfig, Config};
    use crate::errors::SimResult;
    use crate::narration::{BeaconControl, ScriptGenerator, ScriptRequest, Synthesizer};
    use crate::poi::{PoiData, PoiDraft};
    use crate::state_store::{MemoryStateStore, StateStore};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ScriptGenerator for CountingGenerator {
        async fn generate(&self, request: &ScriptRequest) -> SimResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("script for {}", request.qid))
        }
    }

    struct NullSynthesizer;

    #[async_trait]
    impl Synthesizer for NullSynthesizer {
        async fn synthesize(&self, _script: &str, base: &str) -> SimResult<(PathBuf, AudioFormat)> {
            Ok((PathBuf::from(format!("/tmp/{base}.wav")), AudioFormat::Wav))
        }
    }

    struct NullPlayer;

    impl AudioPlayer for NullPlayer {
        fn play(&self, _path: &Path, _start_paused: bool) -> SimResult<()> {
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
            None
        }
    }

    struct NullBeacons;

    #[async_trait]
    impl BeaconControl for NullBeacons {
        async fn set_target(&self, _lat: f64, _lon: f64) -> SimResult<()> {
            Ok(())
        }
        async fn clear(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_top_candidate() {
        let config = Config::default();
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let index = Arc::new(PoiIndex::new(
            &config,
            Arc::new(CategoriesConfig::default()),
            Arc::clone(&store),
        ));
        for (qid, score) in [("Q1", 8.0), ("Q2", 12.0)] {
            index
                .upsert(
                    PoiDraft {
                        qid: qid.to_string(),
                        data: PoiData {
                            latitude: 45.0,
                            longitude: -72.8,
                            name_english: Some(qid.to_string()),
                            category: "castle".to_string(),
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                    false,
                )
                .await
                .unwrap();
            let poi = index.get(qid).await.unwrap();
            poi.update_score(|s| {
                s.score = score;
                s.is_visible = true;
            });
        }

        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Arc::new(NarrationOrchestrator::new(
            Arc::clone(&index),
            Arc::clone(&store),
            Arc::clone(&generator) as Arc<dyn ScriptGenerator>,
            Arc::new(NullSynthesizer),
            Arc::new(NullPlayer),
            Arc::new(NullBeacons),
            Duration::from_millis(10),
            CancellationToken::new(),
        ));
        let job = NarrateJob::new(
            config.scoring.clone(),
            config.narration.clone(),
            Arc::clone(&index),
            Arc::clone(&orchestrator),
        );

        let telemetry = Telemetry::default();
        assert!(job.should_fire(SimState::Active, Some(&telemetry)));
        job.run(Some(telemetry)).await;

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        // The higher-scored POI was narrated and is now on cooldown
        assert!(index.get("Q2").await.unwrap().last_played().is_some());
        assert!(index.get("Q1").await.unwrap().last_played().is_none());
    }
}
