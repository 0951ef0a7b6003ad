use serde::{Deserialize, Serialize};

use crate::cell::UnitCell;
use crate::data::{MillerIndex, ReflectionSet};
use crate::{SfxError, SfxResult};

/// Relative slack applied at the shell boundaries so reflections sitting exactly on a
/// resolution limit are not dropped by floating-point noise.
const EDGE_REL_TOL: f64 = 1e-9;

/// Divides the resolution range `[d_min, d_max]` into shells of equal width in
/// `d*² = 1/d²`, the binning convention of the merging statistics this toolkit reproduces.
///
/// Shell 0 is the lowest-resolution shell (largest `d`). Interior boundaries are half-open
/// toward higher resolution; both outer boundaries are closed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolutionBinner {
    d_min: f64,
    d_max: f64,
    edges: Vec<f64>,
}

impl ResolutionBinner {
    pub fn new(d_min: f64, d_max: f64, n_bins: usize) -> SfxResult<Self> {
        if !(d_min > 0.0 && d_min < d_max) {
            return Err(SfxError::Custom(format!(
                "resolution range requires 0 < d_min < d_max (got {d_min}, {d_max})"
            )));
        }
        if n_bins == 0 {
            return Err(SfxError::Custom(
                "at least one resolution bin is required".to_string(),
            ));
        }
        let lo = 1.0 / (d_max * d_max);
        let hi = 1.0 / (d_min * d_min);
        let width = (hi - lo) / n_bins as f64;
        let edges = (0..=n_bins).map(|i| lo + i as f64 * width).collect();
        Ok(Self { d_min, d_max, edges })
    }

    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn d_min(&self) -> f64 {
        self.d_min
    }

    pub fn d_max(&self) -> f64 {
        self.d_max
    }

    /// The shell a `d`-spacing falls into, or `None` outside the binner's range.
    pub fn bin_of(&self, d: f64) -> Option<usize> {
        if d <= 0.0 {
            return None;
        }
        let d_star_sq = 1.0 / (d * d);
        let lo = self.edges[0];
        let hi = self.edges[self.edges.len() - 1];
        if d_star_sq < lo * (1.0 - EDGE_REL_TOL) || d_star_sq > hi * (1.0 + EDGE_REL_TOL) {
            return None;
        }
        let width = (hi - lo) / self.n_bins() as f64;
        let index = ((d_star_sq - lo) / width).floor() as isize;
        Some(index.clamp(0, self.n_bins() as isize - 1) as usize)
    }

    /// The `(d_max, d_min)` resolution range of shell `i`.
    pub fn bin_d_range(&self, i: usize) -> (f64, f64) {
        (1.0 / self.edges[i].sqrt(), 1.0 / self.edges[i + 1].sqrt())
    }

    /// The `(d_max, d_min)` range covered by all shells together.
    pub fn overall_d_range(&self) -> (f64, f64) {
        (self.d_max, self.d_min)
    }

    /// Shell assignment for every reflection in a set.
    pub fn assign(&self, set: &ReflectionSet) -> Vec<Option<usize>> {
        set.iter().map(|r| self.bin_of(set.d_of(r))).collect()
    }

    /// The number of lattice points per shell for the given cell, from an exhaustive index
    /// sweep bounded by the cell edges over `d_min`. With `anomalous` false, Friedel pairs
    /// are counted once. Symmetry reduction beyond Friedel pairing is left to the upstream
    /// toolkit, so these are P1 counts.
    pub fn theoretical_counts(&self, cell: &UnitCell, anomalous: bool) -> Vec<usize> {
        let h_max = (cell.a / self.d_min).floor() as i32 + 1;
        let counts_for_h = |h: i32| {
            let b = cell.b_matrix();
            let k_max = (cell.b / self.d_min).floor() as i32 + 1;
            let l_max = (cell.c / self.d_min).floor() as i32 + 1;
            let mut counts = vec![0usize; self.n_bins()];
            for k in -k_max..=k_max {
                for l in -l_max..=l_max {
                    let hkl = MillerIndex::new(h, k, l);
                    if hkl.is_zero() || (!anomalous && !hkl.is_friedel_canonical()) {
                        continue;
                    }
                    let s = b * nalgebra::Vector3::new(h as f64, k as f64, l as f64);
                    let d = 1.0 / s.norm();
                    if let Some(bin) = self.bin_of(d) {
                        counts[bin] += 1;
                    }
                }
            }
            counts
        };
        let merge = |mut a: Vec<usize>, b: Vec<usize>| {
            for (slot, count) in a.iter_mut().zip(b) {
                *slot += count;
            }
            a
        };
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            (-h_max..=h_max)
                .into_par_iter()
                .map(counts_for_h)
                .reduce(|| vec![0usize; self.n_bins()], merge)
        }
        #[cfg(not(feature = "rayon"))]
        {
            (-h_max..=h_max)
                .map(counts_for_h)
                .fold(vec![0usize; self.n_bins()], merge)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_binner_rejects_degenerate_ranges() {
        assert!(ResolutionBinner::new(2.0, 1.0, 10).is_err());
        assert!(ResolutionBinner::new(0.0, 10.0, 10).is_err());
        assert!(ResolutionBinner::new(1.0, 10.0, 0).is_err());
    }

    #[test]
    fn test_shells_are_equal_width_in_d_star_sq() {
        let binner = ResolutionBinner::new(2.0, 10.0, 4).unwrap();
        let widths: Vec<f64> = (0..4)
            .map(|i| {
                let (d_hi, d_lo) = binner.bin_d_range(i);
                1.0 / (d_lo * d_lo) - 1.0 / (d_hi * d_hi)
            })
            .collect();
        for w in &widths[1..] {
            assert_relative_eq!(*w, widths[0], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_bin_of_boundaries() {
        let binner = ResolutionBinner::new(2.0, 10.0, 4).unwrap();
        // Both outer limits are included, shell 0 is the lowest-resolution shell.
        assert_eq!(binner.bin_of(10.0), Some(0));
        assert_eq!(binner.bin_of(2.0), Some(3));
        assert_eq!(binner.bin_of(11.0), None);
        assert_eq!(binner.bin_of(1.9), None);
        assert_eq!(binner.bin_of(-1.0), None);
    }

    #[test]
    fn test_theoretical_counts_for_a_cubic_cell() {
        let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0).unwrap();
        let binner = ResolutionBinner::new(5.0, 10.0, 2).unwrap();
        // d = 10/sqrt(n) for |hkl|^2 = n; shells split at d*^2 = 0.025, i.e. n = 2.5.
        let counts = binner.theoretical_counts(&cell, true);
        assert_eq!(counts, vec![18, 14]);
        let friedel = binner.theoretical_counts(&cell, false);
        assert_eq!(friedel, vec![9, 7]);
    }
}
