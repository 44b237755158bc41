use crate::config::{ScoringConfig, SizeClass};
use crate::elevation::ElevationProvider;
use crate::geo;
use crate::visibility::VisibilityModel;

use super::details::ScoreLog;

/// Relative-bearing multiplier breakpoints, degrees off the nose.
/// Head-on is neutral, the off-axis window-seat arc gets a boost, and the
/// rear hemisphere is penalized down to almost nothing dead astern.
const BEARING_CURVE: [(f64, f64); 6] = [
    (0.0, 1.0),
    (30.0, 1.0),
    (60.0, 1.2),
    (90.0, 1.1),
    (135.0, 0.7),
    (180.0, 0.3),
];

/// Blind-spot multiplier for near-overhead subjects
const BLIND_SPOT_MULTIPLIER: f64 = 0.1;

/// Geographic visibility of one POI from one vantage point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoVisibility {
    /// 0.0 when out of range; otherwise the distance-decay base times the
    /// bearing and blind-spot multipliers (may exceed 1.0 inside the boost arc)
    pub visibility: f64,
    pub distance_nm: f64,
    pub max_range_nm: f64,
    /// Off-nose angle to the POI, [-180, 180]
    pub relative_bearing_deg: f64,
}

/// Compute visibility of `poi` from `vantage`.
///
/// Airborne: distance decay from the vantage point, then the bearing curve,
/// then the blind spot for near-overhead subjects. On the ground the fixed
/// AGL=0 disc applies and bearing/blind-spot logic is skipped.
#[allow(clippy::too_many_arguments)]
pub fn visibility_from(
    model: &VisibilityModel,
    config: &ScoringConfig,
    size: SizeClass,
    vantage: (f64, f64),
    heading_deg: f64,
    agl_ft: f64,
    on_ground: bool,
    poi: (f64, f64),
    mut log: Option<&mut ScoreLog>,
) -> GeoVisibility {
    let distance_nm = geo::distance_nm(vantage.0, vantage.1, poi.0, poi.1);
    let bearing = geo::initial_bearing_deg(vantage.0, vantage.1, poi.0, poi.1);
    let relative_bearing_deg = geo::relative_bearing_deg(heading_deg, bearing);

    let max_range_nm = if on_ground {
        model.ground_range_nm(size)
    } else {
        model.max_range_nm(size, agl_ft)
    };

    if max_range_nm <= 0.0 || distance_nm > max_range_nm {
        if let Some(log) = log.as_deref_mut() {
            log.note(format!(
                "Invisible: {:.1} NM beyond max {:.1} NM",
                distance_nm, max_range_nm
            ));
        }
        return GeoVisibility {
            visibility: 0.0,
            distance_nm,
            max_range_nm,
            relative_bearing_deg,
        };
    }

    let base = (1.0 - distance_nm / max_range_nm).max(0.0);
    if let Some(log) = log.as_deref_mut() {
        log.note(format!(
            "Geo: {:.1} NM of max {:.1} NM -> {:.2}",
            distance_nm, max_range_nm, base
        ));
    }

    if on_ground {
        return GeoVisibility {
            visibility: base,
            distance_nm,
            max_range_nm,
            relative_bearing_deg,
        };
    }

    let bearing_multiplier = bearing_multiplier(relative_bearing_deg);
    if let Some(log) = log.as_deref_mut()
        && bearing_multiplier != 1.0
    {
        log.factor(
            "Bearing",
            &format!("rel {:.0} deg", relative_bearing_deg),
            bearing_multiplier,
        );
    }
    let mut visibility = base * bearing_multiplier;

    // Airframe occlusion: very close and far below the aircraft
    if distance_nm < config.blind_spot_radius_nm && agl_ft > config.blind_spot_min_agl_ft {
        if let Some(log) = log.as_deref_mut() {
            log.factor(
                "Blind spot",
                &format!("{:.1} NM nearly below", distance_nm),
                BLIND_SPOT_MULTIPLIER,
            );
        }
        visibility *= BLIND_SPOT_MULTIPLIER;
    }

    GeoVisibility {
        visibility,
        distance_nm,
        max_range_nm,
        relative_bearing_deg,
    }
}

/// Piecewise-linear bearing curve on the absolute off-nose angle.
pub fn bearing_multiplier(relative_bearing_deg: f64) -> f64 {
    let angle = relative_bearing_deg.abs().min(180.0);
    for pair in BEARING_CURVE.windows(2) {
        let (lo_deg, lo_mult) = pair[0];
        let (hi_deg, hi_mult) = pair[1];
        if angle <= hi_deg {
            let t = (angle - lo_deg) / (hi_deg - lo_deg);
            return lo_mult + t * (hi_mult - lo_mult);
        }
    }
    BEARING_CURVE[BEARING_CURVE.len() - 1].1
}

/// Number of interior samples along the sight line for the terrain check
const LOS_SAMPLES: usize = 8;
/// Clearance below the sight line before terrain counts as blocking, meters
const LOS_MARGIN_M: f64 = 30.0;

/// Terrain occlusion along the straight sight line from the aircraft to the
/// POI. `None` when no elevation data is available anywhere on the path.
pub fn terrain_los_blocked(
    provider: &dyn ElevationProvider,
    from: (f64, f64),
    from_alt_m: f64,
    to: (f64, f64),
    to_alt_m: f64,
) -> Option<bool> {
    let total_m = geo::haversine_distance_m(from.0, from.1, to.0, to.1);
    if total_m < 100.0 {
        return Some(false);
    }
    let bearing = geo::initial_bearing_deg(from.0, from.1, to.0, to.1);

    let mut saw_data = false;
    for i in 1..=LOS_SAMPLES {
        let fraction = i as f64 / (LOS_SAMPLES + 1) as f64;
        let (lat, lon) = geo::destination_point(from.0, from.1, bearing, total_m * fraction);
        let sight_alt_m = from_alt_m + fraction * (to_alt_m - from_alt_m);
        match provider.get_elevation(lat, lon) {
            Ok(Some(terrain_m)) => {
                saw_data = true;
                if terrain_m > sight_alt_m + LOS_MARGIN_M {
                    return Some(true);
                }
            }
            Ok(None) => {}
            // Lookup failures fall back to the caller's heuristic
            Err(_) => return None,
        }
    }
    saw_data.then_some(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn config() -> ScoringConfig {
        ScoringConfig::default()
    }

    fn visibility(
        vantage: (f64, f64),
        heading: f64,
        agl: f64,
        on_ground: bool,
        poi: (f64, f64),
    ) -> GeoVisibility {
        visibility_from(
            &VisibilityModel::default(),
            &config(),
            SizeClass::M,
            vantage,
            heading,
            agl,
            on_ground,
            poi,
            None,
        )
    }

    #[test]
    fn test_bearing_curve_shape() {
        assert_eq!(bearing_multiplier(0.0), 1.0);
        assert_eq!(bearing_multiplier(15.0), 1.0);
        assert!((bearing_multiplier(60.0) - 1.2).abs() < 1e-9);
        assert!((bearing_multiplier(-60.0) - 1.2).abs() < 1e-9, "symmetric");
        assert_eq!(bearing_multiplier(180.0), 0.3);
        assert!(bearing_multiplier(150.0) < bearing_multiplier(100.0), "rear penalized");
    }

    #[test]
    fn test_out_of_range_is_invisible() {
        // M class at 5000 ft sees 15 NM; a POI 2 degrees east is ~85 NM out
        let v = visibility((45.0, -73.0), 90.0, 5000.0, false, (45.0, -71.0));
        assert_eq!(v.visibility, 0.0);
        assert!(v.distance_nm > v.max_range_nm);
    }

    #[test]
    fn test_distance_decay() {
        let near = visibility((45.0, -73.0), 90.0, 5000.0, false, (45.0, -72.9));
        let far = visibility((45.0, -73.0), 90.0, 5000.0, false, (45.0, -72.75));
        assert!(near.visibility > far.visibility);
        assert!(near.visibility > 0.0 && far.visibility > 0.0);
    }

    #[test]
    fn test_head_on_vs_astern() {
        let ahead = visibility((45.0, -73.0), 90.0, 5000.0, false, (45.0, -72.9));
        let astern = visibility((45.0, -73.0), 270.0, 5000.0, false, (45.0, -72.9));
        assert!(
            astern.visibility < ahead.visibility * 0.4,
            "astern {} vs ahead {}",
            astern.visibility,
            ahead.visibility
        );
    }

    #[test]
    fn test_blind_spot_near_overhead() {
        // ~0.5 NM ahead at 5000 ft AGL: inside the blind spot
        let below = visibility((45.0, -73.0), 90.0, 5000.0, false, (45.0, -72.9885));
        assert!(below.distance_nm < 0.8, "test geometry: {}", below.distance_nm);
        // Same geometry at low AGL: no blind spot
        let low = visibility((45.0, -73.0), 90.0, 1500.0, false, (45.0, -72.9885));
        assert!(below.visibility < low.visibility * 0.2);
    }

    #[test]
    fn test_ground_override_ignores_bearing() {
        let ahead = visibility((45.0, -73.0), 90.0, 0.0, true, (45.0, -72.97));
        let behind = visibility((45.0, -73.0), 270.0, 0.0, true, (45.0, -72.97));
        assert_eq!(ahead.visibility, behind.visibility);
        assert!(ahead.visibility > 0.0);
    }

    struct RidgeProvider {
        ridge_m: f64,
    }

    impl ElevationProvider for RidgeProvider {
        fn get_elevation(&self, _lat: f64, _lon: f64) -> Result<Option<f64>> {
            Ok(Some(self.ridge_m))
        }
        fn get_lowest_elevation(&self, _lat: f64, _lon: f64, _radius_nm: f64) -> Result<Option<f64>> {
            Ok(Some(self.ridge_m))
        }
    }

    #[test]
    fn test_terrain_los_blocked_by_ridge() {
        let provider = RidgeProvider { ridge_m: 2000.0 };
        // Sight line from 1500 m to 300 m under a 2000 m ridge
        let blocked = terrain_los_blocked(&provider, (45.0, -73.0), 1500.0, (45.0, -72.7), 300.0);
        assert_eq!(blocked, Some(true));
    }

    #[test]
    fn test_terrain_los_clear_over_low_ground() {
        let provider = RidgeProvider { ridge_m: 100.0 };
        let blocked = terrain_los_blocked(&provider, (45.0, -73.0), 1500.0, (45.0, -72.7), 300.0);
        assert_eq!(blocked, Some(false));
    }

    #[test]
    fn test_terrain_los_short_path_trivially_clear() {
        let provider = RidgeProvider { ridge_m: 9000.0 };
        let blocked = terrain_los_blocked(&provider, (45.0, -73.0), 1500.0, (45.0, -73.0001), 300.0);
        assert_eq!(blocked, Some(false));
    }
}
