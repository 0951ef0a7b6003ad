use sfxkit_core::data::Reflection;
use sfxkit_core::ReflectionSet;

/// The anomalous differences `ΔF = F(+) − F(−)` of a reflection set.
///
/// Each Friedel pair contributes one entry keyed by its canonical index (first nonzero
/// component positive); sigma is the quadrature sum of the mates' sigmas. Reflections
/// without a measured mate contribute nothing, so a Friedel-reduced (non-anomalous) table
/// yields an empty set.
pub fn anomalous_differences(set: &ReflectionSet) -> ReflectionSet {
    let mut differences = Vec::new();
    for reflection in set.iter() {
        let hkl = reflection.hkl;
        if !hkl.is_friedel_canonical() || hkl.is_zero() {
            continue;
        }
        if let Some(mate) = set.get(hkl.friedel_mate()) {
            differences.push(Reflection::new(
                hkl,
                reflection.value - mate.value,
                (reflection.sigma * reflection.sigma + mate.sigma * mate.sigma).sqrt(),
            ));
        }
    }
    ReflectionSet::new(*set.cell(), differences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sfxkit_core::data::{test_reflection_set, MillerIndex};
    use sfxkit_core::UnitCell;

    #[test]
    fn test_paired_reflections_produce_one_difference() {
        let set = test_reflection_set();
        // Only (1,0,0)/(-1,0,0) is a complete Friedel pair in the test set.
        let differences = anomalous_differences(&set);
        assert_eq!(differences.len(), 1);
        let diff = differences.get(MillerIndex::new(1, 0, 0)).unwrap();
        assert_relative_eq!(diff.value, 2.0);
        assert_relative_eq!(diff.sigma, (3.0f64 * 3.0 + 3.1 * 3.1).sqrt());
    }

    #[test]
    fn test_unpaired_set_is_empty() {
        let cell = UnitCell::new(10.0, 10.0, 10.0, 90.0, 90.0, 90.0).unwrap();
        let set = ReflectionSet::new(
            cell,
            vec![
                Reflection::new(MillerIndex::new(1, 0, 0), 5.0, 0.5),
                Reflection::new(MillerIndex::new(0, 2, 0), 4.0, 0.4),
            ],
        );
        assert!(anomalous_differences(&set).is_empty());
    }
}
