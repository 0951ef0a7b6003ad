use auto_ops::impl_op_ex;
use serde::{Deserialize, Serialize};

use sfxkit_core::{ReflectionSet, ResolutionBinner};

use crate::binned::{shell_pairs, BinRow, BinnedStatistic};
use crate::StatKind;

/// Counts and sums used to calculate a correlation coefficient incrementally.
///
/// Accumulators add together, so per-shell (or per-rank) sums combine into cumulative ones
/// without revisiting the data.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSums {
    pub count: usize,
    pub sum_x: f64,
    pub sum_y: f64,
    pub sum_xx: f64,
    pub sum_yy: f64,
    pub sum_xy: f64,
}

impl_op_ex!(+ |a: &CorrelationSums, b: &CorrelationSums| -> CorrelationSums {
    CorrelationSums {
        count: a.count + b.count,
        sum_x: a.sum_x + b.sum_x,
        sum_y: a.sum_y + b.sum_y,
        sum_xx: a.sum_xx + b.sum_xx,
        sum_yy: a.sum_yy + b.sum_yy,
        sum_xy: a.sum_xy + b.sum_xy,
    }
});

impl CorrelationSums {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a (f64, f64)>) -> Self {
        let mut sums = Self::default();
        for &(x, y) in pairs {
            sums.push(x, y);
        }
        sums
    }

    pub fn push(&mut self, x: f64, y: f64) {
        self.count += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
        self.sum_xy += x * y;
    }

    /// The correlation coefficient, or `0.0` when the denominator degenerates (a shell with
    /// no spread, or fewer than two pairs).
    pub fn coefficient(&self) -> f64 {
        let n = self.count as f64;
        let numerator = n * self.sum_xy - self.sum_x * self.sum_y;
        let denominator = (n * self.sum_xx - self.sum_x * self.sum_x).sqrt()
            * (n * self.sum_yy - self.sum_y * self.sum_y).sqrt();
        if denominator > 0.0 {
            numerator / denominator
        } else {
            0.0
        }
    }
}

/// Pearson's r over paired values, `NaN` when fewer than two pairs or no spread (the
/// convergence tracker plots `NaN` shells as gaps rather than zeros).
pub fn pearson_r<'a>(pairs: impl IntoIterator<Item = &'a (f64, f64)>) -> f64 {
    let sums = CorrelationSums::from_pairs(pairs);
    if sums.count < 2 {
        return f64::NAN;
    }
    let n = sums.count as f64;
    let denominator = (n * sums.sum_xx - sums.sum_x * sums.sum_x).sqrt()
        * (n * sums.sum_yy - sums.sum_y * sums.sum_y).sqrt();
    if denominator > 0.0 {
        (n * sums.sum_xy - sums.sum_x * sums.sum_y) / denominator
    } else {
        f64::NAN
    }
}

/// Cross-correlation between two reflection sets over resolution shells (CC1/2 when the
/// inputs are the two half-dataset merges).
///
/// Theoretical shell counts come from the full anomalous lattice, since half-dataset
/// merges keep Bijvoet mates separate.
pub fn cross_correlation(
    set1: &ReflectionSet,
    set2: &ReflectionSet,
    binner: &ResolutionBinner,
) -> BinnedStatistic {
    let theoretical = binner.theoretical_counts(set1.cell(), true);
    let shells = shell_pairs(set1, set2, binner);
    let mut rows = Vec::with_capacity(binner.n_bins());
    let mut cumulative_sums = CorrelationSums::default();
    let mut cumulative_theoretical = 0;
    for (i, pairs) in shells.iter().enumerate() {
        let sums = CorrelationSums::from_pairs(pairs);
        rows.push(BinRow {
            d_range: binner.bin_d_range(i),
            matched: sums.count,
            theoretical: Some(theoretical[i]),
            value: sums.coefficient(),
        });
        cumulative_sums = cumulative_sums + sums;
        cumulative_theoretical += theoretical[i];
    }
    BinnedStatistic {
        kind: StatKind::CrossCorrelation,
        rows,
        cumulative: BinRow {
            d_range: binner.overall_d_range(),
            matched: cumulative_sums.count,
            theoretical: Some(cumulative_theoretical),
            value: cumulative_sums.coefficient(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sfxkit_core::data::{test_reflection_set, Reflection};

    #[test]
    fn test_correlation_sums_add_like_the_pair_union() {
        let first = [(1.0, 2.0), (2.0, 4.1)];
        let second = [(3.0, 5.9), (4.0, 8.0)];
        let combined: Vec<(f64, f64)> = first.iter().chain(&second).copied().collect();
        let summed = CorrelationSums::from_pairs(&first) + CorrelationSums::from_pairs(&second);
        let direct = CorrelationSums::from_pairs(&combined);
        assert_eq!(summed, direct);
        assert!(summed.coefficient() > 0.99);
    }

    #[test]
    fn test_perfectly_correlated_pairs() {
        let pairs: Vec<(f64, f64)> = (1..=10).map(|i| (i as f64, 3.0 * i as f64)).collect();
        assert_relative_eq!(
            CorrelationSums::from_pairs(&pairs).coefficient(),
            1.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(pearson_r(&pairs), 1.0, epsilon = 1e-12);
        let anti: Vec<(f64, f64)> = pairs.iter().map(|&(x, y)| (x, -y)).collect();
        assert_relative_eq!(pearson_r(&anti), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_input_conventions() {
        // The incremental coefficient reports 0, Pearson's r reports NaN.
        let flat = [(1.0, 5.0), (2.0, 5.0)];
        assert_relative_eq!(CorrelationSums::from_pairs(&flat).coefficient(), 0.0);
        assert!(pearson_r(&flat).is_nan());
        assert!(pearson_r(&[(1.0, 1.0)]).is_nan());
        assert_relative_eq!(CorrelationSums::default().coefficient(), 0.0);
    }

    #[test]
    fn test_cross_correlation_of_a_set_with_itself() {
        let set = test_reflection_set();
        let noisy = ReflectionSet::new(
            *set.cell(),
            set.iter()
                .map(|r| Reflection::new(r.hkl, r.value * 1.5, r.sigma))
                .collect(),
        );
        let binner = ResolutionBinner::new(3.5, 10.0, 2).unwrap();
        let table = cross_correlation(&set, &noisy, &binner);
        assert_eq!(table.rows.len(), 2);
        assert_relative_eq!(table.cumulative.value, 1.0, epsilon = 1e-12);
        assert_eq!(
            table.cumulative.matched,
            table.rows.iter().map(|r| r.matched).sum::<usize>()
        );
        assert!(table.cumulative.theoretical.unwrap() > table.cumulative.matched);
    }
}
