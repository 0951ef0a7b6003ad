//! Extract sigmaZ mean/median progress from stage-2 error file(s) and print or plot it as
//! a function of iteration.

use clap::Parser;
use std::path::PathBuf;

use sfxkit_core::SfxResult;
use sfxkit_pipeline::figures::sigma_z_plot;
use sfxkit_pipeline::logs::sigma_z::scan_err_file;

#[derive(Parser)]
#[command(name = "sigma-z", about = "sigmaZ convergence from stage-2 error files")]
struct Args {
    /// Stage-2 error files containing sigmaZ progress lines
    #[arg(required = true)]
    err: Vec<PathBuf>,

    /// Render the mean-sigmaZ curves to this PNG
    #[arg(long)]
    plot: Option<PathBuf>,
}

fn main() -> SfxResult<()> {
    env_logger::init();
    let args = Args::parse();
    let mut all_series = Vec::new();
    for path in &args.err {
        let series = scan_err_file(path)?;
        if series.is_empty() {
            log::warn!("{}: no sigmaZ lines found", path.display());
        }
        all_series.push(series);
    }
    for series in &all_series {
        println!("{}:", series.job);
        println!("  iter {:>6} {:>10} {:>10}", "", "mean", "median");
        for (i, (mean, median)) in series.means.iter().zip(&series.medians).enumerate() {
            println!("  {i:>10} {mean:>10.4} {median:>10.4}");
        }
    }
    if let Some(plot) = &args.plot {
        sigma_z_plot(&all_series, plot)?;
        println!("wrote {}", plot.display());
    }
    Ok(())
}
