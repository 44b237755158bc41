use std::collections::HashMap;

use crate::config::SizeClass;

/// Maximum sighting distance per size class as a function of altitude above
/// ground, with linear interpolation between the table rows.
///
/// The AGL=0 row doubles as the fixed on-ground visibility disc.
pub struct VisibilityModel {
    /// Size class -> (agl_ft, max_distance_nm) rows, ascending by AGL
    rows: HashMap<SizeClass, Vec<(f64, f64)>>,
}

impl Default for VisibilityModel {
    fn default() -> Self {
        let mut rows = HashMap::new();
        rows.insert(
            SizeClass::S,
            vec![(0.0, 2.0), (1_000.0, 5.0), (5_000.0, 10.0), (10_000.0, 15.0), (20_000.0, 20.0)],
        );
        rows.insert(
            SizeClass::M,
            vec![(0.0, 3.0), (1_000.0, 8.0), (5_000.0, 15.0), (10_000.0, 25.0), (20_000.0, 30.0)],
        );
        rows.insert(
            SizeClass::L,
            vec![(0.0, 5.0), (1_000.0, 12.0), (5_000.0, 25.0), (10_000.0, 40.0), (20_000.0, 50.0)],
        );
        rows.insert(
            SizeClass::Xl,
            vec![(0.0, 8.0), (1_000.0, 20.0), (5_000.0, 40.0), (10_000.0, 60.0), (20_000.0, 80.0)],
        );
        Self { rows }
    }
}

impl VisibilityModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rows for one size class. Rows are sorted by AGL.
    pub fn with_rows(mut self, size: SizeClass, mut rows: Vec<(f64, f64)>) -> Self {
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.rows.insert(size, rows);
        self
    }

    /// Max sighting distance in NM for a size class at the given AGL.
    /// Clamps to the first/last row outside the table range.
    pub fn max_range_nm(&self, size: SizeClass, agl_ft: f64) -> f64 {
        let Some(rows) = self.rows.get(&size) else {
            return 0.0;
        };
        interpolate(rows, agl_ft)
    }

    /// On-ground visibility disc (the AGL=0 row).
    pub fn ground_range_nm(&self, size: SizeClass) -> f64 {
        self.max_range_nm(size, 0.0)
    }

    /// Largest max range across all size classes at this AGL; the scorer's
    /// search radius.
    pub fn max_radius_nm(&self, agl_ft: f64) -> f64 {
        SizeClass::ALL
            .iter()
            .map(|size| self.max_range_nm(*size, agl_ft))
            .fold(0.0, f64::max)
    }
}

fn interpolate(rows: &[(f64, f64)], agl_ft: f64) -> f64 {
    match rows {
        [] => 0.0,
        [only] => only.1,
        _ => {
            let first = rows[0];
            let last = rows[rows.len() - 1];
            if agl_ft <= first.0 {
                return first.1;
            }
            if agl_ft >= last.0 {
                return last.1;
            }
            for pair in rows.windows(2) {
                let (lo_agl, lo_nm) = pair[0];
                let (hi_agl, hi_nm) = pair[1];
                if agl_ft <= hi_agl {
                    let t = (agl_ft - lo_agl) / (hi_agl - lo_agl);
                    return lo_nm + t * (hi_nm - lo_nm);
                }
            }
            last.1
        }
    }
}
