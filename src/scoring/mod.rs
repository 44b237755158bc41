//! Multi-factor POI scoring: geographic visibility, terrain line of sight,
//! content quality, temporal variety, and look-ahead deferral.

mod content;
mod details;
mod geography;
mod session;
mod variety;

pub use details::ScoreLog;
pub use geography::{bearing_multiplier, terrain_los_blocked, visibility_from};
pub use session::{BusyPredicate, Scorer, ScoringInput, ScoringSession};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoriesConfig, Config};
    use crate::poi::{Badge, Poi, PoiData, PoiDraft};
    use crate::telemetry::{FlightStage, Telemetry, predict_position};
    use crate::visibility::VisibilityModel;
    use chrono::Utc;
    use std::sync::Arc;

    fn telemetry(lat: f64, lon: f64, heading: f64, agl: f64, speed_kt: f64) -> Telemetry {
        let (plat, plon) = predict_position(lat, lon, heading, speed_kt, 60);
        Telemetry {
            latitude: lat,
            longitude: lon,
            altitude_msl_ft: agl + 500.0,
            altitude_agl_ft: agl,
            heading_deg: heading,
            ground_speed_kt: speed_kt,
            on_ground: false,
            predicted_latitude: plat,
            predicted_longitude: plon,
            flight_stage: FlightStage::Airborne,
            autopilot: None,
        }
    }

    fn scorer() -> Scorer {
        let categories: CategoriesConfig = toml::from_str(
            r#"
            [categories.castle]
            size = "L"
            weight = 1.5
            "#,
        )
        .unwrap();
        Scorer::new(
            &Config::default(),
            Arc::new(categories),
            Arc::new(VisibilityModel::default()),
            None,
        )
    }

    fn input(telemetry: Telemetry, history: Vec<&str>) -> ScoringInput {
        ScoringInput {
            telemetry,
            recent_categories: history.into_iter().map(String::from).collect(),
            repeat_ttl_secs: 3600,
            boost_factor: 1.0,
            busy: None,
        }
    }

    fn poi(qid: &str, lat: f64, lon: f64, category: &str) -> Poi {
        Poi::from_draft(
            PoiDraft {
                qid: qid.to_string(),
                data: PoiData {
                    latitude: lat,
                    longitude: lon,
                    name_english: Some(format!("POI {qid}")),
                    category: category.to_string(),
                    article_length: 4000,
                    sitelinks: 5,
                    ..Default::default()
                },
                ..Default::default()
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_visible_poi_scores_positive() {
        let scorer = scorer();
        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]));
        // ~8.5 NM ahead, L class sees 25 NM at 5000 ft
        let target = poi("Q1", 45.0, -72.8, "castle");
        session.calculate(&target);

        let state = target.score_state();
        assert!(state.is_visible);
        assert!(state.score > 0.0);
        assert!(state.visibility > 0.0);
        assert!(!state.details.is_empty());
        assert!(state.time_to_cpa_secs.is_some());
        assert!(state.strategy.is_some());
    }

    #[test]
    fn test_out_of_range_poi_invisible() {
        let scorer = scorer();
        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]));
        // Two degrees of longitude out: ~85 NM
        let target = poi("Q1", 45.0, -71.0, "castle");
        session.calculate(&target);

        let state = target.score_state();
        assert!(!state.is_visible);
        assert_eq!(state.score, 0.0);
        assert!(state.details.contains("Invisible"));
    }

    #[test]
    fn test_cooldown_fast_path() {
        let scorer = scorer();
        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]));
        let target = poi("Q1", 45.0, -72.8, "castle");
        target.set_last_played(Utc::now());
        session.calculate(&target);

        let state = target.score_state();
        assert!(!state.is_visible);
        assert_eq!(state.score, 0.0);
        assert!(state.details.contains("cooldown"));
    }

    #[test]
    fn test_hidden_and_user_deferred_fast_paths() {
        let scorer = scorer();
        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]));

        let hidden = poi("Q1", 45.0, -72.8, "castle");
        hidden.update_data(|d| d.hidden = true);
        session.calculate(&hidden);
        assert_eq!(hidden.score_state().score, 0.0);
        assert!(hidden.score_state().details.contains("hidden"));

        let deferred = poi("Q2", 45.0, -72.8, "castle");
        deferred.update_data(|d| d.user_deferred = true);
        session.calculate(&deferred);
        assert_eq!(deferred.score_state().score, 0.0);
        assert!(deferred.score_state().details.contains("deferred"));
    }

    #[test]
    fn test_busy_poi_keeps_score_but_loses_urgent() {
        let scorer = scorer();
        let busy: BusyPredicate = Arc::new(|qid: &str| qid == "Q1");
        let mut in_ = input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]);
        in_.busy = Some(busy);
        let session = scorer.new_session(in_);

        let target = poi("Q1", 45.0, -72.8, "castle");
        target.update_score(|s| {
            s.score = 42.0;
            s.is_visible = true;
            s.details = "previous pass".to_string();
            s.badges = vec![Badge::Urgent, Badge::Msfs];
        });

        session.calculate(&target);
        let state = target.score_state();
        assert_eq!(state.score, 42.0, "score untouched while narrating");
        assert!(state.is_visible);
        assert_eq!(state.details, "previous pass");
        assert!(
            !state.badges.contains(&Badge::Urgent),
            "urgent wiped on every recompute"
        );
    }

    #[test]
    fn test_badges_recomputed_each_pass() {
        let scorer = scorer();
        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]));
        let target = poi("Q1", 45.0, -72.8, "castle");
        target.update_data(|d| {
            d.article_length = 50_000;
            d.is_msfs_poi = true;
        });
        // A stale urgent badge from the scheduler
        target.update_score(|s| s.badges = vec![Badge::Urgent]);

        session.calculate(&target);
        let badges = target.score_state().badges;
        assert!(badges.contains(&Badge::DeepDive));
        assert!(badges.contains(&Badge::Msfs));
        assert!(!badges.contains(&Badge::Urgent));
        assert!(!badges.contains(&Badge::Stub));

        target.update_data(|d| d.article_length = 100);
        session.calculate(&target);
        let badges = target.score_state().badges;
        assert!(!badges.contains(&Badge::DeepDive));
        assert!(badges.contains(&Badge::Stub));
    }

    #[test]
    fn test_variety_ordering_through_full_calculation() {
        let scorer = scorer();
        let fresh = poi("Qa", 45.0, -72.8, "castle");
        let repeat = poi("Qb", 45.0, -72.8, "castle");

        let session = scorer.new_session(input(
            telemetry(45.0, -73.0, 90.0, 5000.0, 120.0),
            vec!["lake"],
        ));
        session.calculate(&fresh);

        let session = scorer.new_session(input(
            telemetry(45.0, -73.0, 90.0, 5000.0, 120.0),
            vec!["castle"],
        ));
        session.calculate(&repeat);

        assert!(
            repeat.score_state().score < fresh.score_state().score,
            "newest-slot category must score strictly lower"
        );
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let scorer = scorer();
        let target = poi("Q1", 45.0, -72.8, "castle");

        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec!["lake"]));
        session.calculate(&target);
        let first = target.score_state();

        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec!["lake"]));
        session.calculate(&target);
        let second = target.score_state();

        assert_eq!(first, second, "identical input must give identical output");
    }

    #[test]
    fn test_deferral_shrinks_score_when_future_is_better() {
        let scorer = scorer();
        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]));
        // Far ahead on the track: much closer in a few minutes
        let target = poi("Q1", 45.0, -72.45, "castle");
        session.calculate(&target);
        let before = target.score_state();
        assert!(before.score > 0.0);
        assert!(!before.deferred);

        session.calculate_deferral(&target);
        let after = target.score_state();
        assert!(after.deferred, "better future geometry must defer");
        assert!(
            (after.score - before.score * 0.1).abs() < 1e-9,
            "deferral multiplier applied: {} -> {}",
            before.score,
            after.score
        );
        assert!(after.details.contains("Deferred"));
    }

    #[test]
    fn test_deferral_skips_abeam_poi() {
        let scorer = scorer();
        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]));
        // Just north of the aircraft: geometry only gets worse from here
        let target = poi("Q1", 45.05, -73.0, "castle");
        session.calculate(&target);
        assert!(target.score_state().score > 0.0);

        session.calculate_deferral(&target);
        assert!(!target.score_state().deferred);
    }

    #[test]
    fn test_deferral_ignores_invisible_pois() {
        let scorer = scorer();
        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]));
        let target = poi("Q1", 45.0, -71.0, "castle");
        session.calculate(&target);
        assert_eq!(target.score_state().score, 0.0);

        session.calculate_deferral(&target);
        assert!(!target.score_state().deferred);
    }

    #[test]
    fn test_session_precomputes_radius() {
        let scorer = scorer();
        let session = scorer.new_session(input(telemetry(45.0, -73.0, 90.0, 5000.0, 120.0), vec![]));
        // XL class at 5000 ft AGL dominates the radius
        assert_eq!(session.max_radius_nm(), 40.0);
        assert_eq!(session.lowest_elevation(), None, "no provider configured");
    }

    #[test]
    fn test_ground_override_uses_fixed_disc() {
        let scorer = scorer();
        let mut t = telemetry(45.0, -73.0, 90.0, 0.0, 0.0);
        t.on_ground = true;
        t.predicted_latitude = 45.0;
        t.predicted_longitude = -73.0;
        let session = scorer.new_session(input(t, vec![]));

        // L class ground disc is 5 NM; 3 NM away qualifies even behind
        let behind = poi("Q1", 45.0, -73.07, "castle");
        session.calculate(&behind);
        assert!(behind.score_state().is_visible);
        assert!(behind.score_state().score > 0.0);
    }
}
