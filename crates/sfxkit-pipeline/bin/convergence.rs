//! Track the evolution of a correlation statistic between the stage-2 refined structure
//! factors and ground truth as a function of refinement step, with optional scatter
//! snapshots of selected steps. Step -1 denotes the conventional-merge baseline.

use clap::Parser;
use std::path::PathBuf;

use sfxkit_core::utils::expand_integer_ranges;
use sfxkit_core::SfxResult;
use sfxkit_metrics::StatKind;
use sfxkit_pipeline::convergence::{track_convergence, ConvergenceOptions};
use sfxkit_pipeline::figures::{convergence_plot, scatter_plot};

#[derive(Parser)]
#[command(name = "convergence", about = "Stage-2 convergence vs ground truth")]
struct Args {
    /// Directory with the per-step refined tables (iter_<n>.parquet)
    #[arg(long, default_value = "$WORK/exafel_output/$JOB_ID_STAGE2")]
    stage2: String,

    /// Ground-truth amplitude table
    #[arg(long, default_value = "$MODULES/big_data/reference/ground_truth.parquet")]
    ground_truth: String,

    /// Conventionally merged amplitude table
    #[arg(
        long,
        default_value = "$SCRATCH/ferredoxin_sim/$JOB_ID_MERGE/out/merged_all.parquet"
    )]
    merge: String,

    /// Statistic to track (pearson, pearson-anom, cc, cc-anom)
    #[arg(long, default_value = "pearson")]
    stat: String,

    #[arg(long, default_value_t = 1.9)]
    d_min: f64,

    #[arg(long, default_value_t = 9999.0)]
    d_max: f64,

    /// Number of resolution shells tracked separately
    #[arg(long, default_value_t = 1)]
    n_bins: usize,

    /// Steps to snapshot as ground-truth scatters, e.g. "0:8:2,10" (-1 = merge baseline)
    #[arg(long)]
    scatter_ranges: Option<String>,

    /// Output curve figure; defaults to <stat>.png
    #[arg(long)]
    plot: Option<PathBuf>,
}

fn main() -> SfxResult<()> {
    env_logger::init();
    let args = Args::parse();
    let stat: StatKind = args.stat.parse()?;
    let scatter_steps = match &args.scatter_ranges {
        Some(ranges) => expand_integer_ranges(ranges)?,
        None => Vec::new(),
    };
    let options = ConvergenceOptions {
        stat,
        d_min: args.d_min,
        d_max: args.d_max,
        n_bins: args.n_bins,
    };
    let (series, scatters) = track_convergence(
        &args.stage2,
        &args.ground_truth,
        &args.merge,
        &options,
        &scatter_steps,
    )?;
    println!("{series}");
    for scatter in &scatters {
        let label = if scatter.step < 0 {
            "merge".to_string()
        } else {
            scatter.step.to_string()
        };
        let path = PathBuf::from(format!("scatter_{label}.png"));
        scatter_plot(scatter, &path)?;
        println!("wrote {}", path.display());
    }
    let plot = args
        .plot
        .unwrap_or_else(|| PathBuf::from(format!("{stat}.png")));
    convergence_plot(&series, &plot)?;
    println!("wrote {}", plot.display());
    Ok(())
}
