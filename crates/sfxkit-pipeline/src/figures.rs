//! Figure rendering for the evaluation tools.
//!
//! Every figure is a PNG drawn with `plotters`; the functions here only lay out data the
//! rest of the crate has already computed.

use plotters::prelude::*;
use std::path::Path;

use sfxkit_core::{SfxError, SfxResult};

use crate::convergence::{ConvergenceSeries, StepScatter};
use crate::logs::events::{EventKind, JobRecord};
use crate::logs::sigma_z::SigmaZSeries;

fn chart_err<E: std::fmt::Display>(error: E) -> SfxError {
    SfxError::Custom(format!("figure rendering failed: {error}"))
}

/// A viridis-like color for shell `i` of `n`, dark purple through green to yellow.
fn shell_color(i: usize, n: usize) -> RGBColor {
    let t = if n > 1 {
        (i as f64 + 0.5) / n as f64
    } else {
        0.5
    };
    let lerp = |a: u8, b: u8, t: f64| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    if t < 0.5 {
        let s = t * 2.0;
        RGBColor(lerp(68, 53, s), lerp(1, 183, s), lerp(84, 121, s))
    } else {
        let s = (t - 0.5) * 2.0;
        RGBColor(lerp(53, 253, s), lerp(183, 231, s), lerp(121, 37, s))
    }
}

const GRAY: RGBColor = RGBColor(128, 128, 128);

/// The stage-2 "weather plot": one horizontal band per job, one row per rank inside the
/// band, event dots colored by milestone, and gray uprights at job start and end.
pub fn weather_plot(jobs: &[JobRecord], out_path: &Path) -> SfxResult<()> {
    if jobs.is_empty() {
        return Err(SfxError::Custom("no jobs to plot".to_string()));
    }
    let x_max = jobs
        .iter()
        .map(|j| j.duration_minutes())
        .fold(1.0f64, f64::max);
    let root = BitMapBackend::new(out_path, (1280, 720)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;
    let job_names: Vec<String> = jobs.iter().map(|j| j.name.clone()).collect();
    let mut chart = ChartBuilder::on(&root)
        .caption("stage 2 weather plot", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(90)
        .build_cartesian_2d(0.0..x_max * 1.05, -0.5..jobs.len() as f64 - 0.5)
        .map_err(chart_err)?;
    chart
        .configure_mesh()
        .x_desc("time since job start [min]")
        .y_desc("job")
        .y_labels(jobs.len())
        .y_label_formatter(&|y: &f64| {
            let idx = y.round();
            if (y - idx).abs() < 1e-6 && idx >= 0.0 && (idx as usize) < job_names.len() {
                job_names[idx as usize].clone()
            } else {
                String::new()
            }
        })
        .draw()
        .map_err(chart_err)?;

    let mut labeled = [false; EventKind::ALL.len()];
    for (job_idx, job) in jobs.iter().enumerate() {
        let ranks = job.ranks();
        let band_lo = job_idx as f64 - 0.4;
        let band_hi = job_idx as f64 + 0.4;
        let row_of = |rank: usize| {
            let slot = ranks.iter().position(|&r| r == rank).unwrap_or(0);
            band_lo + (band_hi - band_lo) * (slot as f64 + 1.0) / (ranks.len() as f64 + 1.0)
        };
        for kind in EventKind::ALL {
            let color = Palette99::pick(kind.index()).to_rgba();
            let points: Vec<(f64, f64)> = job
                .events
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| (job.minutes_since_start(e), row_of(e.rank)))
                .collect();
            if points.is_empty() {
                continue;
            }
            let series = chart
                .draw_series(
                    points
                        .into_iter()
                        .map(|xy| Circle::new(xy, 3, color.filled())),
                )
                .map_err(chart_err)?;
            if !labeled[kind.index()] {
                labeled[kind.index()] = true;
                series
                    .label(kind.label())
                    .legend(move |(x, y)| Circle::new((x, y), 3, color.filled()));
            }
        }
        for x in [0.0, job.duration_minutes()] {
            chart
                .draw_series(LineSeries::new(
                    vec![(x, band_lo), (x, band_hi)],
                    &GRAY,
                ))
                .map_err(chart_err)?;
        }
    }
    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .label_font(("sans-serif", 13))
        .draw()
        .map_err(chart_err)?;
    root.present().map_err(chart_err)?;
    Ok(())
}

fn finite_bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut bounds: Option<(f64, f64)> = None;
    for v in values.filter(|v| v.is_finite()) {
        bounds = Some(match bounds {
            Some((lo, hi)) => (lo.min(v), hi.max(v)),
            None => (v, v),
        });
    }
    bounds
}

/// The tracked statistic vs refinement step, one line per resolution shell.
pub fn convergence_plot(series: &ConvergenceSeries, out_path: &Path) -> SfxResult<()> {
    let (y_lo, y_hi) = finite_bounds(series.values.iter().flatten().copied())
        .ok_or_else(|| SfxError::Custom("no finite values to plot".to_string()))?;
    let pad = ((y_hi - y_lo) * 0.05).max(1e-3);
    let x_lo = *series.steps.first().unwrap_or(&-1) as f64;
    let x_hi = *series.steps.last().unwrap_or(&0) as f64;
    let root = BitMapBackend::new(out_path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(x_lo..x_hi + 0.5, y_lo - pad..y_hi + pad)
        .map_err(chart_err)?;
    chart
        .configure_mesh()
        .x_desc("refinement step")
        .y_desc(series.stat.column_label())
        .draw()
        .map_err(chart_err)?;
    let n_shells = series.shell_ranges.len();
    for shell in 0..n_shells {
        let color = shell_color(shell, n_shells);
        let points: Vec<(f64, f64)> = series
            .steps
            .iter()
            .zip(series.shell_series(shell))
            .filter(|(_, v)| v.is_finite())
            .map(|(&s, v)| (s as f64, v))
            .collect();
        let (d_max, d_min) = series.shell_ranges[shell];
        let series_anno = chart
            .draw_series(LineSeries::new(points, &color))
            .map_err(chart_err)?;
        if n_shells > 1 {
            series_anno
                .label(format!("{d_max:.4}-{d_min:.4}"))
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 18, y)], color)
                });
        }
    }
    if n_shells > 1 {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::LowerRight)
            .border_style(&BLACK)
            .background_style(&WHITE.mix(0.8))
            .draw()
            .map_err(chart_err)?;
    }
    root.present().map_err(chart_err)?;
    Ok(())
}

/// Mean sigmaZ vs iteration, one line per job.
pub fn sigma_z_plot(all_series: &[SigmaZSeries], out_path: &Path) -> SfxResult<()> {
    let (y_lo, y_hi) = finite_bounds(
        all_series
            .iter()
            .flat_map(|s| s.means.iter().copied()),
    )
    .ok_or_else(|| SfxError::Custom("no finite sigmaZ values to plot".to_string()))?;
    let x_hi = all_series.iter().map(SigmaZSeries::len).max().unwrap_or(1) as f64;
    let pad = ((y_hi - y_lo) * 0.05).max(1e-3);
    let root = BitMapBackend::new(out_path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..x_hi, y_lo - pad..y_hi + pad)
        .map_err(chart_err)?;
    chart
        .configure_mesh()
        .x_desc("stage 2 iteration")
        .y_desc("mean sigmaZ")
        .draw()
        .map_err(chart_err)?;
    for (idx, series) in all_series.iter().enumerate() {
        let color = Palette99::pick(idx).to_rgba();
        let points: Vec<(f64, f64)> = series
            .means
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, &v)| (i as f64, v))
            .collect();
        let anno = chart
            .draw_series(LineSeries::new(points, &color))
            .map_err(chart_err)?;
        if all_series.len() > 1 {
            anno.label(series.job.clone()).legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 18, y)], color)
            });
        }
    }
    if all_series.len() > 1 {
        chart
            .configure_series_labels()
            .border_style(&BLACK)
            .background_style(&WHITE.mix(0.8))
            .draw()
            .map_err(chart_err)?;
    }
    root.present().map_err(chart_err)?;
    Ok(())
}

/// Ground truth vs refined amplitudes for one step: a linear panel and a log-log panel,
/// shell-colored, with the identity line in red.
pub fn scatter_plot(scatter: &StepScatter, out_path: &Path) -> SfxResult<()> {
    let all_pairs: Vec<(f64, f64)> = scatter.shells.iter().flatten().copied().collect();
    let (lo, hi) = finite_bounds(
        all_pairs
            .iter()
            .flat_map(|&(x, y)| [x, y].into_iter()),
    )
    .ok_or_else(|| SfxError::Custom("no pairs to scatter".to_string()))?;
    let root = BitMapBackend::new(out_path, (1400, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(chart_err)?;
    let (left, right) = root.split_horizontally(700);
    let n_shells = scatter.shells.len();

    let pad = ((hi - lo) * 0.05).max(1e-3);
    let mut linear = ChartBuilder::on(&left)
        .caption(
            format!("step {} vs ground truth", scatter.step),
            ("sans-serif", 20),
        )
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(lo - pad..hi + pad, lo - pad..hi + pad)
        .map_err(chart_err)?;
    linear
        .configure_mesh()
        .x_desc("refined")
        .y_desc("ground truth")
        .draw()
        .map_err(chart_err)?;
    linear
        .draw_series(LineSeries::new(vec![(lo, lo), (hi, hi)], &RED))
        .map_err(chart_err)?;
    for (shell, pairs) in scatter.shells.iter().enumerate() {
        let color = shell_color(shell, n_shells);
        linear
            .draw_series(
                pairs
                    .iter()
                    .map(|&xy| Circle::new(xy, 2, color.filled())),
            )
            .map_err(chart_err)?;
    }

    // Log axes only admit positive amplitudes.
    let positive: Vec<(f64, f64)> = all_pairs
        .iter()
        .filter(|&&(x, y)| x > 0.0 && y > 0.0)
        .copied()
        .collect();
    if let Some((plo, phi)) = finite_bounds(
        positive
            .iter()
            .flat_map(|&(x, y)| [x, y].into_iter()),
    ) {
        let mut loglog = ChartBuilder::on(&right)
            .caption("(log scale)", ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(45)
            .y_label_area_size(60)
            .build_cartesian_2d(
                (plo * 0.9..phi * 1.1).log_scale(),
                (plo * 0.9..phi * 1.1).log_scale(),
            )
            .map_err(chart_err)?;
        loglog
            .configure_mesh()
            .x_desc("refined")
            .draw()
            .map_err(chart_err)?;
        loglog
            .draw_series(LineSeries::new(vec![(plo, plo), (phi, phi)], &RED))
            .map_err(chart_err)?;
        for (shell, pairs) in scatter.shells.iter().enumerate() {
            let color = shell_color(shell, n_shells);
            loglog
                .draw_series(
                    pairs
                        .iter()
                        .filter(|&&(x, y)| x > 0.0 && y > 0.0)
                        .map(|&xy| Circle::new(xy, 2, color.filled())),
                )
                .map_err(chart_err)?;
        }
    }
    root.present().map_err(chart_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_colors_span_the_map() {
        assert_eq!(shell_color(0, 1), RGBColor(53, 183, 121));
        let first = shell_color(0, 10);
        let last = shell_color(9, 10);
        // Dark purple end vs bright yellow end.
        assert!(first.0 < 100 && first.2 > 80);
        assert!(last.0 > 200 && last.2 < 60);
    }

    #[test]
    fn test_empty_weather_plot_is_an_error() {
        let out = std::env::temp_dir().join("sfxkit-weather-empty.png");
        assert!(weather_plot(&[], &out).is_err());
    }
}
