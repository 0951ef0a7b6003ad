use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs;
use std::path::Path;

use sfxkit_core::{SfxError, SfxResult};

/// The figures of merit printed by the detector-residuals report of a refinement run:
/// reflection counts per panel group, weighted RMSD means and spreads split into overall,
/// radial, and transverse components (microns), and the mean percent correlations of the
/// radial and transverse offsets with ψ.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorResiduals {
    pub refls_count: usize,
    pub rmsd_overall_mean: f64,
    pub rmsd_radial_mean: f64,
    pub rmsd_transverse_mean: f64,
    pub rmsd_overall_stddev: f64,
    pub rmsd_radial_stddev: f64,
    pub rmsd_transverse_stddev: f64,
    pub corr_radial_psi: f64,
    pub corr_transverse_psi: f64,
    /// Resolution labels attached by the caller when reports are batched by shell.
    pub d_max: f64,
    pub d_min: f64,
}

/// A panel-group table row: integer id, three floats, a reflection count, then two
/// percent columns.
fn panel_row_count(line: &str) -> Option<usize> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [id, x, y, z, count, p1, p2] = fields[..] else {
        return None;
    };
    id.parse::<u64>().ok()?;
    for f in [x, y, z] {
        f.parse::<f64>().ok()?;
    }
    for f in [p1, p2] {
        f.strip_suffix('%')?.parse::<f64>().ok()?;
    }
    count.parse::<usize>().ok()
}

fn three_floats_after(line: &str, prefix: &str) -> Option<(f64, f64, f64)> {
    let rest = line.strip_prefix(prefix)?;
    let fields: Vec<f64> = rest
        .split_whitespace()
        .map(|f| f.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match fields[..] {
        [a, b, c] => Some((a, b, c)),
        _ => None,
    }
}

fn percent_pair_after(line: &str, prefix: &str) -> Option<(f64, f64)> {
    let rest = line.strip_prefix(prefix)?;
    let fields: Vec<f64> = rest
        .split_whitespace()
        .map(|f| f.strip_suffix('%').unwrap_or(f).parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match fields[..] {
        [a, b] => Some((a, b)),
        _ => None,
    }
}

impl DetectorResiduals {
    /// Parse a residuals report. The reflection count is the sum over the panel-group
    /// table; the RMSD and correlation lines must each appear exactly once.
    pub fn from_log_text(text: &str, source: &str) -> SfxResult<Self> {
        let mut refls_count = 0usize;
        let mut means = None;
        let mut stddevs = None;
        let mut correlations = None;
        for raw in text.lines() {
            let line = raw.trim();
            if let Some(count) = panel_row_count(line) {
                refls_count += count;
            } else if let Some(values) = three_floats_after(line, "Weighted PG mean") {
                means = Some(values);
            } else if let Some(values) = three_floats_after(line, "Weighted PG stddev") {
                stddevs = Some(values);
            } else if let Some(values) = percent_pair_after(line, "Refls Mean") {
                correlations = Some(values);
            }
        }
        let (means, stddevs, correlations) = match (means, stddevs, correlations) {
            (Some(m), Some(s), Some(c)) => (m, s, c),
            _ => {
                return Err(SfxError::ParseError {
                    name: source.to_string(),
                    object: "detector residuals report".to_string(),
                })
            }
        };
        Ok(Self {
            refls_count,
            rmsd_overall_mean: means.0,
            rmsd_radial_mean: means.1,
            rmsd_transverse_mean: means.2,
            rmsd_overall_stddev: stddevs.0,
            rmsd_radial_stddev: stddevs.1,
            rmsd_transverse_stddev: stddevs.2,
            corr_radial_psi: correlations.0,
            corr_transverse_psi: correlations.1,
            d_max: f64::INFINITY,
            d_min: 0.0,
        })
    }

    pub fn from_log_path(path: &Path) -> SfxResult<Self> {
        Self::from_log_text(&fs::read_to_string(path)?, &path.to_string_lossy())
    }

    pub fn with_d_range(mut self, d_max: Option<f64>, d_min: Option<f64>) -> Self {
        self.d_max = d_max.filter(|d| *d >= 0.0).unwrap_or(f64::INFINITY);
        self.d_min = d_min.filter(|d| *d >= 0.0).unwrap_or(0.0);
        self
    }
}

/// The collated offset summary across processing batches or resolution shells.
#[derive(Clone, Debug, Default)]
pub struct ResidualsTable(pub Vec<DetectorResiduals>);

impl Display for ResidualsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:>8} {:>8} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>9} {:>9}",
            "d_max",
            "d_min",
            "#refls",
            "rmsd",
            "rmsd_sd",
            "radial",
            "radial_sd",
            "transv",
            "transv_sd",
            "corr_r%",
            "corr_t%"
        )?;
        for row in &self.0 {
            writeln!(
                f,
                "{:>8.4} {:>8.4} {:>8} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>9.1} {:>9.1}",
                row.d_max,
                row.d_min,
                row.refls_count,
                row.rmsd_overall_mean,
                row.rmsd_overall_stddev,
                row.rmsd_radial_mean,
                row.rmsd_radial_stddev,
                row.rmsd_transverse_mean,
                row.rmsd_transverse_stddev,
                row.corr_radial_psi,
                row.corr_transverse_psi
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const REPORT: &str = "\
Detector residuals for panel groups
  0    12.1    9.3    1.2     1543    -12%    4%
  1    11.8    8.9    1.4     1287     -9%    6%
Weighted PG mean     10.95    7.21    6.44
Weighted PG stddev    3.10    2.05    1.98
Refls Mean  -11%   5%
";

    #[test]
    fn test_report_fields_are_collected() {
        let residuals = DetectorResiduals::from_log_text(REPORT, "test").unwrap();
        assert_eq!(residuals.refls_count, 1543 + 1287);
        assert_relative_eq!(residuals.rmsd_overall_mean, 10.95);
        assert_relative_eq!(residuals.rmsd_radial_mean, 7.21);
        assert_relative_eq!(residuals.rmsd_transverse_stddev, 1.98);
        assert_relative_eq!(residuals.corr_radial_psi, -11.0);
        assert_relative_eq!(residuals.corr_transverse_psi, 5.0);
        assert!(residuals.d_max.is_infinite());
    }

    #[test]
    fn test_d_range_labels_and_table_rendering() {
        let residuals = DetectorResiduals::from_log_text(REPORT, "test")
            .unwrap()
            .with_d_range(Some(4.0), Some(2.1));
        assert_relative_eq!(residuals.d_max, 4.0);
        let table = ResidualsTable(vec![residuals]);
        let rendered = table.to_string();
        assert!(rendered.contains("2830"));
        assert!(rendered.contains("4.0000"));
    }

    #[test]
    fn test_incomplete_report_is_an_error() {
        assert!(DetectorResiduals::from_log_text("no tables here", "test").is_err());
    }
}
