use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;

/// One SRTM elevation tile covering a 1x1 degree cell.
/// Supports 1 arcsecond (3601x3601) and 3 arcsecond (1201x1201) resolutions.
#[derive(Debug, Clone)]
pub struct HgtTile {
    samples: Vec<u8>,
    /// South-west corner of the cell
    sw_corner: (f64, f64),
    /// Samples per row/column
    grid: usize,
}

impl HgtTile {
    /// Wrap a decompressed buffer. The two legal sizes identify the
    /// resolution: 3601^2 or 1201^2 big-endian i16 samples.
    pub fn new(samples: Vec<u8>, sw_corner: (f64, f64)) -> Result<Self> {
        let grid = match samples.len() {
            25_934_402 => 3601,
            2_884_802 => 1201,
            other => bail!("unrecognized HGT buffer size {} bytes", other),
        };
        Ok(Self { samples, sw_corner, grid })
    }

    /// Load a gzipped tile from disk.
    pub fn load(path: &Path, sw_corner: (f64, f64)) -> Result<Self> {
        let compressed = std::fs::read(path)
            .with_context(|| format!("Failed to read HGT tile: {:?}", path))?;
        let mut buffer = Vec::new();
        GzDecoder::new(&compressed[..])
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to decompress HGT tile: {:?}", path))?;
        Self::new(buffer, sw_corner)
    }

    /// Elevation in meters at (lat, lon), bilinearly interpolated from the
    /// four surrounding grid samples.
    pub fn elevation(&self, lat: f64, lon: f64) -> Result<f64> {
        let cells = (self.grid - 1) as f64;
        let row = (lat - self.sw_corner.0) * cells;
        let col = (lon - self.sw_corner.1) * cells;

        if row < 0.0 || col < 0.0 || row > cells || col > cells {
            bail!(
                "({}, {}) outside tile with SW corner {:?}",
                lat,
                lon,
                self.sw_corner
            );
        }

        let row_lo = row.floor();
        let col_lo = col.floor();
        let row_frac = row - row_lo;
        let col_frac = col - col_lo;

        let v00 = self.sample(row_lo, col_lo)? as f64;
        let v01 = self.sample(row_lo, col_lo + 1.0)? as f64;
        let v10 = self.sample(row_lo + 1.0, col_lo)? as f64;
        let v11 = self.sample(row_lo + 1.0, col_lo + 1.0)? as f64;

        let south = v00 * (1.0 - col_frac) + v01 * col_frac;
        let north = v10 * (1.0 - col_frac) + v11 * col_frac;
        Ok(south * (1.0 - row_frac) + north * row_frac)
    }

    /// Raw sample at grid coordinates. Rows are stored north to south;
    /// values are big-endian i16 meters.
    fn sample(&self, row: f64, col: f64) -> Result<i16> {
        let row = (row as usize).min(self.grid - 1);
        let col = (col as usize).min(self.grid - 1);
        let offset = ((self.grid - row - 1) * self.grid + col) * 2;
        if offset + 1 >= self.samples.len() {
            bail!("sample offset {} beyond buffer", offset);
        }
        Ok(i16::from_be_bytes([
            self.samples[offset],
            self.samples[offset + 1],
        ]))
    }
}
