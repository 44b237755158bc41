//! Terrain elevation lookups backed by gzipped SRTM HGT tiles, with
//! concurrent caches for both tiles and point results.

mod hgt;

pub use hgt::HgtTile;

use anyhow::{Context, Result, bail};
use moka::sync::Cache;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::ElevationConfig;
use crate::geo;

/// Terrain elevation, meters above sea level. Lookups may legitimately find
/// nothing (ocean, missing tile); errors are reserved for bad input or I/O.
pub trait ElevationProvider: Send + Sync {
    fn get_elevation(&self, lat: f64, lon: f64) -> Result<Option<f64>>;

    /// Lowest terrain within `radius_nm` of the point; a valley-floor
    /// estimate for descent planning and visibility work.
    fn get_lowest_elevation(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Option<f64>>;
}

/// Round a coordinate to a ~100 m grid so nearby lookups share a cache slot
fn cache_coord(coord: f64) -> i32 {
    (coord * 1000.0).round() as i32
}

/// Bearing/radius sample pattern for the lowest-elevation scan: the center
/// plus three rings of eight points each.
const SCAN_BEARINGS: [f64; 8] = [0.0, 45.0, 90.0, 135.0, 180.0, 225.0, 270.0, 315.0];
const SCAN_RING_FRACTIONS: [f64; 3] = [1.0 / 3.0, 2.0 / 3.0, 1.0];

/// HGT-tile elevation service.
///
/// Tiles live in `data_path` as `N45/N45E009.hgt.gz`. Both the per-point
/// results (on a ~100 m grid) and the decoded tiles are cached; a missing
/// tile caches as `None` so ocean crossings stay cheap.
#[derive(Clone)]
pub struct ElevationService {
    data_path: PathBuf,
    point_cache: Cache<(i32, i32), Option<i64>>,
    tile_cache: Cache<(i32, i32), Arc<HgtTile>>,
}

/// Millimeter fixed-point keeps the cached value hashable
fn to_cached(elevation: Option<f64>) -> Option<i64> {
    elevation.map(|e| (e * 1000.0).round() as i64)
}

fn from_cached(cached: Option<i64>) -> Option<f64> {
    cached.map(|e| e as f64 / 1000.0)
}

impl ElevationService {
    pub fn new(config: &ElevationConfig) -> Result<Self> {
        let data_path = PathBuf::from(&config.data_path);
        if !data_path.exists() {
            bail!("Elevation data directory does not exist: {:?}", data_path);
        }
        Ok(Self {
            data_path,
            point_cache: Cache::builder()
                .max_capacity(config.result_cache_entries)
                .build(),
            tile_cache: Cache::builder().max_capacity(config.tile_cache_entries).build(),
        })
    }

    /// Tile path for a cell: `<data>/N45/N45E009.hgt.gz`
    fn tile_path(&self, lat_floor: i32, lon_floor: i32) -> PathBuf {
        let lat_dir = format!(
            "{}{:02}",
            if lat_floor < 0 { "S" } else { "N" },
            lat_floor.abs()
        );
        let file = format!(
            "{}{}{:03}.hgt.gz",
            lat_dir,
            if lon_floor < 0 { "W" } else { "E" },
            lon_floor.abs()
        );
        self.data_path.join(&lat_dir).join(file)
    }

    fn lookup(&self, lat: f64, lon: f64) -> Result<Option<f64>> {
        if !lat.is_finite() || !lon.is_finite() {
            bail!("non-finite coordinates");
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            bail!("coordinates out of range: lat={}, lon={}", lat, lon);
        }

        let point_key = (cache_coord(lat), cache_coord(lon));
        if let Some(cached) = self.point_cache.get(&point_key) {
            metrics::counter!("elevation.point_cache_hits_total").increment(1);
            return Ok(from_cached(cached));
        }

        let start = Instant::now();
        let tile_key = (lat.floor() as i32, lon.floor() as i32);
        let tile = match self.tile_cache.get(&tile_key) {
            Some(tile) => Some(tile),
            None => {
                let path = self.tile_path(tile_key.0, tile_key.1);
                if path.exists() {
                    let tile = Arc::new(
                        HgtTile::load(&path, (tile_key.0 as f64, tile_key.1 as f64))
                            .with_context(|| format!("loading tile {:?}", path))?,
                    );
                    self.tile_cache.insert(tile_key, Arc::clone(&tile));
                    metrics::histogram!("elevation.tile_load_seconds")
                        .record(start.elapsed().as_secs_f64());
                    Some(tile)
                } else {
                    debug!("No elevation tile for cell {:?} (ocean?)", tile_key);
                    None
                }
            }
        };

        let elevation = match tile {
            Some(tile) => tile.elevation(lat, lon).ok(),
            None => None,
        };
        self.point_cache.insert(point_key, to_cached(elevation));
        metrics::counter!("elevation.lookups_total").increment(1);
        Ok(elevation)
    }
}

impl ElevationProvider for ElevationService {
    fn get_elevation(&self, lat: f64, lon: f64) -> Result<Option<f64>> {
        self.lookup(lat, lon)
    }

    fn get_lowest_elevation(&self, lat: f64, lon: f64, radius_nm: f64) -> Result<Option<f64>> {
        let mut lowest: Option<f64> = None;
        let mut consider = |value: Option<f64>| {
            if let Some(v) = value {
                lowest = Some(match lowest {
                    Some(current) => current.min(v),
                    None => v,
                });
            }
        };

        consider(self.lookup(lat, lon)?);
        for fraction in SCAN_RING_FRACTIONS {
            let distance_m = radius_nm * fraction * geo::METERS_PER_NM;
            for bearing in SCAN_BEARINGS {
                let (slat, slon) = geo::destination_point(lat, lon, bearing, distance_m);
                consider(self.lookup(slat, slon)?);
            }
        }
        Ok(lowest)
    }
}
