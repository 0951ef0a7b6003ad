use serde::{Deserialize, Serialize};
use std::fmt::Display;

use sfxkit_core::{ReflectionSet, ResolutionBinner};

use crate::StatKind;

/// One resolution shell of a binned statistic.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct BinRow {
    /// `(d_max, d_min)` of the shell.
    pub d_range: (f64, f64),
    /// Reflections that contributed to the statistic.
    pub matched: usize,
    /// Shell size of the theoretical lattice, where the statistic has one.
    pub theoretical: Option<usize>,
    pub value: f64,
}

/// A per-shell statistic table plus its cumulative row, formatted the way the evaluation
/// tools print it:
///
/// ```text
///     d_max     d_min   #obs /   #thr      cc1/2
/// --------------------------------------------------
/// ( 10.0000,   3.1623)     12 /     33   97.1429%
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinnedStatistic {
    pub kind: StatKind,
    pub rows: Vec<BinRow>,
    pub cumulative: BinRow,
}

impl BinnedStatistic {
    /// Shell values in shell order (lowest resolution first).
    pub fn values(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.value).collect()
    }
}

fn write_row(f: &mut std::fmt::Formatter<'_>, row: &BinRow, percent: bool) -> std::fmt::Result {
    write!(
        f,
        "({:8.4}, {:8.4}) {:>6} / {:>6} ",
        row.d_range.0,
        row.d_range.1,
        row.matched,
        row.theoretical
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string()),
    )?;
    if percent {
        writeln!(f, "{:9.4}%", 100.0 * row.value)
    } else {
        writeln!(f, "{:10.4}", row.value)
    }
}

impl Display for BinnedStatistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let percent = self.kind.as_percentage();
        writeln!(
            f,
            "    d_max     d_min   #obs /   #thr {:>10}",
            self.kind.column_label()
        )?;
        writeln!(f, "{}", "-".repeat(50))?;
        for row in &self.rows {
            write_row(f, row, percent)?;
        }
        writeln!(f, "{}", "-".repeat(50))?;
        write_row(f, &self.cumulative, percent)
    }
}

/// Collect matched `(a, b)` value pairs for each shell of `binner`, in shell order.
///
/// Pairing is by Miller index; reflections falling outside the binner's range are dropped.
pub fn shell_pairs(
    a: &ReflectionSet,
    b: &ReflectionSet,
    binner: &ResolutionBinner,
) -> Vec<Vec<(f64, f64)>> {
    let mut shells = vec![Vec::new(); binner.n_bins()];
    for (ra, rb) in a.matching(b) {
        if let Some(bin) = binner.bin_of(a.d_of(ra)) {
            shells[bin].push((ra.value, rb.value));
        }
    }
    shells
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfxkit_core::data::test_reflection_set;
    use sfxkit_core::data::{MillerIndex, Reflection};

    #[test]
    fn test_shell_pairs_split_by_resolution() {
        let set = test_reflection_set();
        let other = ReflectionSet::new(
            *set.cell(),
            set.iter()
                .map(|r| Reflection::new(r.hkl, r.value * 2.0, r.sigma))
                .collect(),
        );
        let binner = ResolutionBinner::new(5.0, 10.0, 2).unwrap();
        let shells = shell_pairs(&set, &other, &binner);
        assert_eq!(shells.len(), 2);
        // (2,1,0), (2,1,1), and (2,2,0) fall beyond d = 5.0 and are dropped.
        let total: usize = shells.iter().map(Vec::len).sum();
        assert_eq!(total, 5);
        assert!(shells[0]
            .iter()
            .any(|&(x, y)| x == 120.0 && y == 240.0));
    }

    #[test]
    fn test_table_display_layout() {
        let table = BinnedStatistic {
            kind: StatKind::CrossCorrelation,
            rows: vec![BinRow {
                d_range: (10.0, 2.0),
                matched: 12,
                theoretical: Some(33),
                value: 0.971429,
            }],
            cumulative: BinRow {
                d_range: (10.0, 2.0),
                matched: 12,
                theoretical: Some(33),
                value: 0.971429,
            },
        };
        let rendered = table.to_string();
        assert!(rendered.contains("cc1/2"));
        assert!(rendered.contains("12 /     33"));
        assert!(rendered.contains("97.1429%"));
    }

    #[test]
    fn test_missing_theoretical_counts_render_as_dash() {
        let table = BinnedStatistic {
            kind: StatKind::IOverSigma,
            rows: vec![],
            cumulative: BinRow {
                d_range: (10.0, 2.0),
                matched: 3,
                theoretical: None,
                value: 21.5,
            },
        };
        assert!(table.to_string().contains(" 3 /      - "));
    }
}
