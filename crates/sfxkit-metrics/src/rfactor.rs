use accurate::sum::Klein;
use accurate::traits::*;

use sfxkit_core::{ReflectionSet, ResolutionBinner};

use crate::binned::{shell_pairs, BinRow, BinnedStatistic};
use crate::StatKind;

fn scale_factor(pairs: &[(f64, f64)]) -> f64 {
    let numerator: f64 = pairs
        .iter()
        .map(|&(obs, calc)| obs.abs() * calc.abs())
        .sum_with_accumulator::<Klein<_>>();
    let denominator: f64 = pairs
        .iter()
        .map(|&(_, calc)| calc * calc)
        .sum_with_accumulator::<Klein<_>>();
    if denominator > 0.0 {
        numerator / denominator
    } else {
        1.0
    }
}

fn r1_of(pairs: &[(f64, f64)], scale: f64) -> f64 {
    let numerator: f64 = pairs
        .iter()
        .map(|&(obs, calc)| (obs.abs() - scale * calc.abs()).abs())
        .sum_with_accumulator::<Klein<_>>();
    let denominator: f64 = pairs
        .iter()
        .map(|&(obs, _)| obs.abs())
        .sum_with_accumulator::<Klein<_>>();
    if denominator > 0.0 {
        numerator / denominator
    } else {
        f64::NAN
    }
}

/// R1 residual of `observed` against `reference` per resolution shell,
/// `Σ| |F_o| − k·|F_c| | / Σ|F_o|`, with the least-squares scale
/// `k = Σ|F_o|·|F_c| / Σ|F_c|²` fit per shell (and refit globally for the cumulative row).
pub fn r1_factor(
    observed: &ReflectionSet,
    reference: &ReflectionSet,
    binner: &ResolutionBinner,
) -> BinnedStatistic {
    let shells = shell_pairs(observed, reference, binner);
    let mut rows = Vec::with_capacity(binner.n_bins());
    let mut all_pairs = Vec::new();
    for (i, pairs) in shells.iter().enumerate() {
        let scale = scale_factor(pairs);
        rows.push(BinRow {
            d_range: binner.bin_d_range(i),
            matched: pairs.len(),
            theoretical: None,
            value: r1_of(pairs, scale),
        });
        all_pairs.extend_from_slice(pairs);
    }
    let scale = scale_factor(&all_pairs);
    BinnedStatistic {
        kind: StatKind::R1,
        rows,
        cumulative: BinRow {
            d_range: binner.overall_d_range(),
            matched: all_pairs.len(),
            theoretical: None,
            value: r1_of(&all_pairs, scale),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sfxkit_core::data::{test_reflection_set, Reflection};

    #[test]
    fn test_r1_is_zero_under_a_pure_scale() {
        let set = test_reflection_set();
        let scaled = ReflectionSet::new(
            *set.cell(),
            set.iter()
                .map(|r| Reflection::new(r.hkl, r.value * 0.25, r.sigma))
                .collect(),
        );
        let binner = ResolutionBinner::new(3.5, 10.0, 2).unwrap();
        let table = r1_factor(&set, &scaled, &binner);
        assert_relative_eq!(table.cumulative.value, 0.0, epsilon = 1e-12);
        for row in &table.rows {
            assert_relative_eq!(row.value, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_r1_of_a_known_perturbation() {
        let set = test_reflection_set();
        // One reflection off by 10 on a matched total of sum |Fo|.
        let mut perturbed: Vec<Reflection> = set.iter().copied().collect();
        perturbed[0].value += 10.0;
        let perturbed = ReflectionSet::new(*set.cell(), perturbed);
        let binner = ResolutionBinner::new(3.5, 10.0, 1).unwrap();
        let table = r1_factor(&perturbed, &set, &binner);
        assert!(table.cumulative.value > 0.0);
        assert!(table.cumulative.value < 0.1);
        assert_eq!(table.cumulative.matched, set.len());
    }
}
