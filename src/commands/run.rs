use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use skytour::audio::{AudioFormat, AudioPlayer};
use skytour::beacon::BeaconGuidance;
use skytour::config::{CategoriesConfig, Config};
use skytour::elevation::{ElevationProvider, ElevationService};
use skytour::errors::SimResult;
use skytour::jobs::{NarrateJob, PruneJob, ScoringJob};
use skytour::narration::{
    BeaconControl, NarrationOrchestrator, ScriptGenerator, ScriptRequest, Synthesizer,
};
use skytour::poi_index::PoiIndex;
use skytour::scheduler::Scheduler;
use skytour::scoring::{BusyPredicate, Scorer};
use skytour::simlink::{LoopbackConnector, SimClient, SimClientConfig, SimConnector};
use skytour::state_store::{MemoryStateStore, StateStore};
use skytour::visibility::VisibilityModel;

/// Script "generation" used when no LLM backend is wired in: a plain
/// description assembled from the request. The external generator replaces
/// this in a full deployment.
struct TemplateGenerator;

#[async_trait]
impl ScriptGenerator for TemplateGenerator {
    async fn generate(&self, request: &ScriptRequest) -> SimResult<String> {
        Ok(format!(
            "Coming up on your route: {} ({}).",
            request.display_name, request.category
        ))
    }
}

/// Synthesizer stand-in that writes the script text next to where audio
/// would land, so the pipeline is observable without a TTS backend.
struct FileSynthesizer {
    output_dir: PathBuf,
}

#[async_trait]
impl Synthesizer for FileSynthesizer {
    async fn synthesize(&self, script: &str, base_name: &str) -> SimResult<(PathBuf, AudioFormat)> {
        let path = self.output_dir.join(format!("{base_name}.txt"));
        tokio::fs::write(&path, script).await.map_err(|e| {
            skytour::SimError::StoreFailure(format!("write {path:?}: {e}"))
        })?;
        Ok((path, AudioFormat::Wav))
    }
}

/// Playback stand-in: logs what would play. A real backend implements the
/// same trait over an audio device.
struct LogPlayer;

impl AudioPlayer for LogPlayer {
    fn play(&self, path: &Path, start_paused: bool) -> SimResult<()> {
        info!("Would play {:?} (paused: {})", path, start_paused);
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

pub async fn handle_run(
    config_path: Option<PathBuf>,
    categories_path: Option<PathBuf>,
    demo: bool,
) -> Result<()> {
    let config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let categories = Arc::new(match &categories_path {
        Some(path) => CategoriesConfig::load(path)?,
        None => CategoriesConfig::default(),
    });

    skytour::metrics::init_metrics();
    skytour::metrics::initialize_core_metrics();

    let cancel = CancellationToken::new();

    // Elevation is optional: scoring and beacons fall back to the
    // plane-relative heuristic without it
    let elevation: Option<Arc<dyn ElevationProvider>> =
        match ElevationService::new(&config.elevation) {
            Ok(service) => Some(Arc::new(service)),
            Err(e) => {
                warn!("Elevation data unavailable ({}), using heuristics", e);
                None
            }
        };

    let connector: Arc<dyn SimConnector> = if demo {
        info!("Demo mode: synthesizing a circular flight");
        Arc::new(LoopbackConnector::default())
    } else {
        // The native simulator library binds here; until then the demo
        // connector keeps the pipeline alive for development
        warn!("No native simulator link configured; running the demo route");
        Arc::new(LoopbackConnector::default())
    };

    let telemetry_client = Arc::new(SimClient::start(
        Arc::clone(&connector),
        SimClientConfig {
            retry_interval: Duration::from_secs(config.sim.retry_interval_secs),
            watchdog: Duration::from_secs(config.sim.watchdog_secs),
            prediction_window_secs: config.sim.prediction_window_secs,
            ..SimClientConfig::telemetry(config.sim.app_name.clone())
        },
        &cancel,
    ));
    let beacon_client = Arc::new(SimClient::start(
        connector,
        SimClientConfig {
            retry_interval: Duration::from_secs(config.sim.beacon_retry_interval_secs),
            ..SimClientConfig::frame(format!("{}-beacon", config.sim.app_name))
        },
        &cancel,
    ));

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let index = Arc::new(PoiIndex::new(&config, Arc::clone(&categories), Arc::clone(&store)));
    let scorer = Arc::new(Scorer::new(
        &config,
        Arc::clone(&categories),
        Arc::new(VisibilityModel::default()),
        elevation.clone(),
    ));

    let guidance = Arc::new(BeaconGuidance::new(
        beacon_client,
        elevation,
        config.beacon.clone(),
    ));
    tokio::spawn(Arc::clone(&guidance).run(cancel.clone()));

    let output_dir = std::env::temp_dir().join("skytour");
    tokio::fs::create_dir_all(&output_dir).await?;
    let orchestrator = Arc::new(NarrationOrchestrator::new(
        Arc::clone(&index),
        Arc::clone(&store),
        Arc::new(TemplateGenerator),
        Arc::new(FileSynthesizer { output_dir }),
        Arc::new(LogPlayer),
        Arc::clone(&guidance) as Arc<dyn BeaconControl>,
        Duration::from_secs(config.narration.pause_between_narrations_secs),
        cancel.clone(),
    ));

    let busy: BusyPredicate = {
        let orchestrator = Arc::clone(&orchestrator);
        Arc::new(move |qid: &str| orchestrator.is_poi_busy(qid))
    };

    let mut scheduler = Scheduler::new(Arc::clone(&telemetry_client), Duration::from_secs(1));
    scheduler.add_job(Arc::new(ScoringJob::new(
        config.scoring.clone(),
        scorer,
        Arc::clone(&index),
        Arc::clone(&store),
        Some(busy),
        None,
    )));
    scheduler.add_job(Arc::new(PruneJob::new(
        config.scoring.clone(),
        Arc::clone(&index),
    )));
    scheduler.add_job(Arc::new(NarrateJob::new(
        config.scoring.clone(),
        config.narration.clone(),
        index,
        orchestrator,
    )));

    // Ctrl+C cancels every loop through the shared token
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, stopping");
                shutdown_cancel.cancel();
            }
            Err(e) => warn!("Unable to listen for shutdown signal: {}", e),
        }
    });

    scheduler.run(cancel.clone()).await;
    telemetry_client.close().await;
    info!("Shutdown complete");
    Ok(())
}
