use sfxkit_core::{ReflectionSet, ResolutionBinner};

use crate::binned::{BinRow, BinnedStatistic};
use crate::StatKind;

/// Shell completeness: observed unique reflections over the theoretical lattice count.
///
/// With `anomalous` false the denominator counts Friedel pairs once, so a merged
/// non-anomalous table should be Friedel-reduced upstream for the numerator to be
/// comparable. Counts are P1 counts; space-group reduction and systematic-absence
/// elimination are left to the upstream toolkit.
pub fn completeness(
    set: &ReflectionSet,
    binner: &ResolutionBinner,
    anomalous: bool,
) -> BinnedStatistic {
    let theoretical = binner.theoretical_counts(set.cell(), anomalous);
    let mut observed = vec![0usize; binner.n_bins()];
    for assignment in binner.assign(set).into_iter().flatten() {
        observed[assignment] += 1;
    }
    let mut rows = Vec::with_capacity(binner.n_bins());
    for (i, (&obs, &theor)) in observed.iter().zip(&theoretical).enumerate() {
        rows.push(BinRow {
            d_range: binner.bin_d_range(i),
            matched: obs,
            theoretical: Some(theor),
            value: if theor > 0 {
                obs as f64 / theor as f64
            } else {
                0.0
            },
        });
    }
    let total_observed: usize = observed.iter().sum();
    let total_theoretical: usize = theoretical.iter().sum();
    BinnedStatistic {
        kind: StatKind::Completeness,
        rows,
        cumulative: BinRow {
            d_range: binner.overall_d_range(),
            matched: total_observed,
            theoretical: Some(total_theoretical),
            value: if total_theoretical > 0 {
                total_observed as f64 / total_theoretical as f64
            } else {
                0.0
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
    fn test_full_low_resolution_shell_is_complete() {
        let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0).unwrap();
        // All Friedel-canonical indices with |hkl|^2 <= 2 (d >= 10/sqrt(2)).
        let reflections = vec![
            Reflection::new(MillerIndex::new(1, 0, 0), 1.0, 0.1),
            Reflection::new(MillerIndex::new(0, 1, 0), 1.0, 0.1),
            Reflection::new(MillerIndex::new(0, 0, 1), 1.0, 0.1),
            Reflection::new(MillerIndex::new(1, 1, 0), 1.0, 0.1),
            Reflection::new(MillerIndex::new(1, -1, 0), 1.0, 0.1),
            Reflection::new(MillerIndex::new(1, 0, 1), 1.0, 0.1),
            Reflection::new(MillerIndex::new(1, 0, -1), 1.0, 0.1),
            Reflection::new(MillerIndex::new(0, 1, 1), 1.0, 0.1),
            Reflection::new(MillerIndex::new(0, 1, -1), 1.0, 0.1),
        ];
        let set = ReflectionSet::new(cell, reflections);
        let binner = ResolutionBinner::new(10.0 / 2.0_f64.sqrt(), 10.0, 1).unwrap();
        let table = completeness(&set, &binner, false);
        assert_eq!(table.cumulative.matched, 9);
        assert_eq!(table.cumulative.theoretical, Some(9));
        assert_relative_eq!(table.cumulative.value, 1.0);
    }

    #[test]
    fn test_half_complete_anomalous_shell() {
        let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0).unwrap();
        // Only the canonical half of each Friedel pair is present, counted against the
        // anomalous (both-mates) lattice.
        let reflections = vec![
            Reflection::new(MillerIndex::new(1, 0, 0), 1.0, 0.1),
            Reflection::new(MillerIndex::new(0, 1, 0), 1.0, 0.1),
            Reflection::new(MillerIndex::new(0, 0, 1), 1.0, 0.1),
        ];
        let set = ReflectionSet::new(cell, reflections);
        let binner = ResolutionBinner::new(9.0, 11.0, 1).unwrap();
        let table = completeness(&set, &binner, true);
        assert_eq!(table.cumulative.theoretical, Some(6));
        assert_relative_eq!(table.cumulative.value, 0.5);
    }
}
