use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use sfxkit_core::data::io::read_parquet;
use sfxkit_core::{ReflectionSet, ResolutionBinner, SfxError, SfxResult};
use sfxkit_metrics::{anomalous_differences, pearson_r, shell_pairs, CorrelationSums, StatKind};

/// What to track and over which resolution shells.
#[derive(Copy, Clone, Debug)]
pub struct ConvergenceOptions {
    pub stat: StatKind,
    pub d_min: f64,
    pub d_max: f64,
    pub n_bins: usize,
}

/// The tracked statistic per refinement step and resolution shell. Step `-1` is the
/// conventional-merge baseline the refinement starts from.
#[derive(Clone, Debug)]
pub struct ConvergenceSeries {
    pub stat: StatKind,
    pub steps: Vec<i64>,
    pub shell_ranges: Vec<(f64, f64)>,
    /// `values[step][shell]`.
    pub values: Vec<Vec<f64>>,
}

impl ConvergenceSeries {
    /// The statistic across steps for one shell.
    pub fn shell_series(&self, shell: usize) -> Vec<f64> {
        self.values.iter().map(|row| row[shell]).collect()
    }
}

impl Display for ConvergenceSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>6}", "step")?;
        for (d_max, d_min) in &self.shell_ranges {
            write!(f, " {d_max:>7.4}-{d_min:<7.4}")?;
        }
        writeln!(f)?;
        for (step, row) in self.steps.iter().zip(&self.values) {
            write!(f, "{step:>6}")?;
            for value in row {
                write!(f, " {value:>15.6}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Ground truth vs refined value pairs for one step, split by shell (scatter-figure
/// input).
#[derive(Clone, Debug)]
pub struct StepScatter {
    pub step: i64,
    pub shells: Vec<Vec<(f64, f64)>>,
}

fn apply_stat_transform(set: &ReflectionSet, stat: StatKind) -> ReflectionSet {
    if stat.anomalous_differences() {
        anomalous_differences(set)
    } else {
        set.clone()
    }
}

/// Restrict `refined` to the indices the conventional merge observed, then pair with
/// ground truth per shell.
fn step_shells(
    refined: &ReflectionSet,
    ground_truth: &ReflectionSet,
    merge_reference: &ReflectionSet,
    binner: &ResolutionBinner,
) -> Vec<Vec<(f64, f64)>> {
    let restricted = refined.common_with(merge_reference);
    shell_pairs(&restricted, ground_truth, binner)
}

fn stat_of_shells(shells: &[Vec<(f64, f64)>], stat: StatKind) -> Vec<f64> {
    shells
        .iter()
        .map(|pairs| match stat {
            StatKind::PearsonR | StatKind::PearsonRAnom => pearson_r(pairs),
            _ => CorrelationSums::from_pairs(pairs).coefficient(),
        })
        .collect()
}

/// The per-step statistic of one refined table against ground truth, restricted to the
/// conventional-merge index set, by shell.
pub fn evaluate_step(
    refined: &ReflectionSet,
    ground_truth: &ReflectionSet,
    merge_reference: &ReflectionSet,
    binner: &ResolutionBinner,
    stat: StatKind,
) -> Vec<f64> {
    stat_of_shells(
        &step_shells(refined, ground_truth, merge_reference, binner),
        stat,
    )
}

/// The refinement trajectory: `iter_<n>.parquet` files under `dir`, in step order.
/// Missing steps are reported but tolerated.
pub fn trajectory_steps(dir: &Path) -> SfxResult<Vec<(i64, PathBuf)>> {
    let mut steps = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(n) = name
            .strip_prefix("iter_")
            .and_then(|rest| rest.strip_suffix(".parquet"))
            .and_then(|digits| digits.parse::<i64>().ok())
        {
            steps.push((n, path));
        }
    }
    steps.sort_by_key(|(n, _)| *n);
    for window in steps.windows(2) {
        if window[1].0 != window[0].0 + 1 {
            log::warn!(
                "trajectory skips from step {} to {}",
                window[0].0,
                window[1].0
            );
        }
    }
    Ok(steps)
}

/// Track a correlation statistic across a stage-2 refinement trajectory.
///
/// Reads the ground-truth and conventional-merge reflection tables, then every
/// `iter_<n>.parquet` under `trajectory_dir`; returns the per-step, per-shell series
/// (step `-1` being the conventional merge itself) plus scatter pairs for the requested
/// steps.
pub fn track_convergence(
    trajectory_dir: &str,
    ground_truth_path: &str,
    merge_path: &str,
    options: &ConvergenceOptions,
    scatter_steps: &[i64],
) -> SfxResult<(ConvergenceSeries, Vec<StepScatter>)> {
    if !matches!(
        options.stat,
        StatKind::PearsonR
            | StatKind::PearsonRAnom
            | StatKind::CrossCorrelation
            | StatKind::CrossCorrelationAnom
    ) {
        return Err(SfxError::Custom(format!(
            "convergence tracking expects a correlation statistic, not {}",
            options.stat
        )));
    }
    let binner = ResolutionBinner::new(options.d_min, options.d_max, options.n_bins)?;
    let ground_truth = apply_stat_transform(&*read_parquet(ground_truth_path)?, options.stat);
    let merge = apply_stat_transform(&*read_parquet(merge_path)?, options.stat);
    let trajectory_dir = PathBuf::from(&*shellexpand::full(trajectory_dir)?);

    let mut steps = vec![-1i64];
    let mut values = Vec::new();
    let mut scatters = Vec::new();

    let baseline_shells = step_shells(&merge, &ground_truth, &merge, &binner);
    if scatter_steps.contains(&-1) {
        scatters.push(StepScatter {
            step: -1,
            shells: baseline_shells.clone(),
        });
    }
    values.push(stat_of_shells(&baseline_shells, options.stat));

    for (step, path) in trajectory_steps(&trajectory_dir)? {
        let refined = apply_stat_transform(
            &*read_parquet(&path.to_string_lossy())?,
            options.stat,
        );
        let shells = step_shells(&refined, &ground_truth, &merge, &binner);
        if scatter_steps.contains(&step) {
            scatters.push(StepScatter {
                step,
                shells: shells.clone(),
            });
        }
        values.push(stat_of_shells(&shells, options.stat));
        steps.push(step);
        log::info!("evaluated {}", path.display());
    }

    let shell_ranges = (0..binner.n_bins()).map(|i| binner.bin_d_range(i)).collect();
    Ok((
        ConvergenceSeries {
            stat: options.stat,
            steps,
            shell_ranges,
            values,
        },
        scatters,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sfxkit_core::data::io::write_parquet;
    use sfxkit_core::data::{test_reflection_set, Reflection};

    fn perturbed(set: &ReflectionSet, amount: f64) -> ReflectionSet {
        ReflectionSet::new(
            *set.cell(),
            set.iter()
                .enumerate()
                .map(|(i, r)| {
                    let offset = if i % 2 == 0 { amount } else { -amount };
                    Reflection::new(r.hkl, r.value + offset, r.sigma)
                })
                .collect(),
        )
    }

    #[test]
    fn test_perfect_step_reaches_unit_correlation() {
        let dir =
            std::env::temp_dir().join(format!("sfxkit-convergence-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let gt = test_reflection_set();
        let merge = perturbed(&gt, 8.0);
        write_parquet(&gt, dir.join("gt.parquet").to_str().unwrap()).unwrap();
        write_parquet(&merge, dir.join("merge.parquet").to_str().unwrap()).unwrap();
        write_parquet(
            &perturbed(&gt, 4.0),
            dir.join("iter_0.parquet").to_str().unwrap(),
        )
        .unwrap();
        write_parquet(&gt, dir.join("iter_1.parquet").to_str().unwrap()).unwrap();

        let options = ConvergenceOptions {
            stat: StatKind::PearsonR,
            d_min: 3.5,
            d_max: 10.0,
            n_bins: 1,
        };
        let (series, scatters) = track_convergence(
            dir.to_str().unwrap(),
            dir.join("gt.parquet").to_str().unwrap(),
            dir.join("merge.parquet").to_str().unwrap(),
            &options,
            &[1],
        )
        .unwrap();
        assert_eq!(series.steps, vec![-1, 0, 1]);
        assert_eq!(series.shell_ranges.len(), 1);
        let shell = series.shell_series(0);
        assert_relative_eq!(shell[2], 1.0, epsilon = 1e-12);
        assert!(shell[1] > shell[0]);
        assert_eq!(scatters.len(), 1);
        assert_eq!(scatters[0].step, 1);
        assert_eq!(scatters[0].shells[0].len(), gt.len());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_non_correlation_statistic_is_rejected() {
        let options = ConvergenceOptions {
            stat: StatKind::Completeness,
            d_min: 2.0,
            d_max: 10.0,
            n_bins: 1,
        };
        assert!(track_convergence("/tmp", "/tmp/a", "/tmp/b", &options, &[]).is_err());
    }

    #[test]
    fn test_anomalous_transform_empties_unpaired_data() {
        let set = test_reflection_set();
        let transformed = apply_stat_transform(&set, StatKind::PearsonRAnom);
        assert_eq!(transformed.len(), 1);
    }
}
