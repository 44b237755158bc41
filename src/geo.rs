//! Great-circle math shared by the scorer, the prune pass, and beacon
//! guidance. All angles are degrees, all distances meters unless a suffix
//! says otherwise.

/// Earth's mean radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per nautical mile
pub const METERS_PER_NM: f64 = 1_852.0;

/// Feet per meter
pub const FEET_PER_METER: f64 = 3.280_84;

/// Meters per second per knot
pub const MPS_PER_KNOT: f64 = 0.514_444;

/// Calculate the distance between two points using the Haversine formula
/// Returns distance in meters
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Distance in nautical miles between two points
pub fn distance_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_distance_m(lat1, lon1, lat2, lon2) / METERS_PER_NM
}

/// Initial great-circle bearing from point 1 to point 2, degrees in [0, 360)
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * delta_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Great-circle destination point given start, initial bearing and distance.
/// Returns (lat, lon) with lon normalized to (-180, 180].
pub fn destination_point(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let angular = distance_m / EARTH_RADIUS_M;
    let bearing = bearing_deg.to_radians();
    let lat1 = lat.to_radians();
    let lon1 = lon.to_radians();

    let lat2 =
        (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());

    (lat2.to_degrees(), normalize_lon(lon2.to_degrees()))
}

/// Normalize a longitude to (-180, 180]
pub fn normalize_lon(lon: f64) -> f64 {
    let mut lon = (lon + 180.0) % 360.0;
    if lon <= 0.0 {
        lon += 360.0;
    }
    lon - 180.0
}

/// Relative bearing from a heading to a target bearing, wrapped to [-180, 180].
/// Negative values are to the left, positive to the right.
pub fn relative_bearing_deg(heading_deg: f64, bearing_deg: f64) -> f64 {
    let mut rel = (bearing_deg - heading_deg) % 360.0;
    if rel > 180.0 {
        rel -= 360.0;
    } else if rel < -180.0 {
        rel += 360.0;
    }
    rel
}

/// Absolute angular difference between two bearings, wrapped to [0, 180]
pub fn angular_difference_deg(a: f64, b: f64) -> f64 {
    relative_bearing_deg(a, b).abs()
}
