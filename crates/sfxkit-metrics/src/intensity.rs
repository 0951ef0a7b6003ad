use sfxkit_core::{ReflectionSet, ResolutionBinner};

use crate::binned::{BinRow, BinnedStatistic};
use crate::StatKind;

/// Mean value-over-sigma per resolution shell.
///
/// Reflections with a non-positive sigma cannot contribute and are skipped; the skip count
/// is reported at debug level so a half-empty sigma column is visible without failing the
/// evaluation.
pub fn i_over_sigma(set: &ReflectionSet, binner: &ResolutionBinner) -> BinnedStatistic {
    let mut sums = vec![0.0f64; binner.n_bins()];
    let mut counts = vec![0usize; binner.n_bins()];
    let mut skipped = 0usize;
    for reflection in set.iter() {
        let Some(bin) = binner.bin_of(set.d_of(reflection)) else {
            continue;
        };
        if reflection.sigma > 0.0 {
            sums[bin] += reflection.value / reflection.sigma;
            counts[bin] += 1;
        } else {
            skipped += 1;
        }
    }
    if skipped > 0 {
        log::debug!("i_over_sigma: skipped {skipped} reflections with non-positive sigma");
    }
    let mut rows = Vec::with_capacity(binner.n_bins());
    for (i, (&sum, &count)) in sums.iter().zip(&counts).enumerate() {
        rows.push(BinRow {
            d_range: binner.bin_d_range(i),
            matched: count,
            theoretical: None,
            value: if count > 0 { sum / count as f64 } else { f64::NAN },
        });
    }
    let total: f64 = sums.iter().sum();
    let total_count: usize = counts.iter().sum();
    BinnedStatistic {
        kind: StatKind::IOverSigma,
        rows,
        cumulative: BinRow {
            d_range: binner.overall_d_range(),
            matched: total_count,
            theoretical: None,
            value: if total_count > 0 {
                total / total_count as f64
            } else {
                f64::NAN
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sfxkit_core::data::{MillerIndex, Reflection};
    use sfxkit_core::UnitCell;

    #[test]
    fn test_shell_means_skip_zero_sigma() {
        let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0).unwrap();
        let set = ReflectionSet::new(
            cell,
            vec![
                Reflection::new(MillerIndex::new(1, 0, 0), 100.0, 10.0),
                Reflection::new(MillerIndex::new(0, 1, 0), 50.0, 10.0),
                Reflection::new(MillerIndex::new(0, 0, 1), 42.0, 0.0),
                Reflection::new(MillerIndex::new(2, 2, 0), 30.0, 3.0),
            ],
        );
        let binner = ResolutionBinner::new(3.0, 10.0, 2).unwrap();
        let table = i_over_sigma(&set, &binner);
        // Shell 0 holds the d = 10 axis reflections; the zero-sigma one is skipped.
        assert_eq!(table.rows[0].matched, 2);
        assert_relative_eq!(table.rows[0].value, 7.5);
        assert_eq!(table.rows[1].matched, 1);
        assert_relative_eq!(table.rows[1].value, 10.0);
        assert_eq!(table.cumulative.matched, 3);
        assert_relative_eq!(table.cumulative.value, 25.0 / 3.0);
    }

    #[test]
    fn test_empty_shell_is_nan() {
        let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0).unwrap();
        let set = ReflectionSet::new(
            cell,
            vec![Reflection::new(MillerIndex::new(1, 0, 0), 10.0, 1.0)],
        );
        let binner = ResolutionBinner::new(3.0, 10.0, 2).unwrap();
        let table = i_over_sigma(&set, &binner);
        assert!(table.rows[1].value.is_nan());
    }
}
