//! Summarize the radial, transverse, and total reflection-position offsets reported by
//! detector-residuals logs, one row per input, ordered the way the inputs are given
//! (typically by resolution bin).

use clap::Parser;
use std::path::PathBuf;

use sfxkit_core::{SfxError, SfxResult};
use sfxkit_pipeline::logs::residuals::{DetectorResiduals, ResidualsTable};

#[derive(Parser)]
#[command(name = "offset-summary", about = "Collate detector-residuals reports")]
struct Args {
    /// Detector-residuals log files
    #[arg(required = true)]
    logs: Vec<PathBuf>,

    /// d_max label per input, aligned with the log order (negative = unbounded)
    #[arg(long = "d-max", num_args = 1..)]
    d_max: Vec<f64>,

    /// d_min label per input, aligned with the log order (negative = unbounded)
    #[arg(long = "d-min", num_args = 1..)]
    d_min: Vec<f64>,
}

fn main() -> SfxResult<()> {
    env_logger::init();
    let args = Args::parse();
    for labels in [&args.d_max, &args.d_min] {
        if !labels.is_empty() && labels.len() != args.logs.len() {
            return Err(SfxError::Custom(
                "d-range labels must match the number of logs".to_string(),
            ));
        }
    }
    let mut rows = Vec::with_capacity(args.logs.len());
    for (i, path) in args.logs.iter().enumerate() {
        let residuals = DetectorResiduals::from_log_path(path)?.with_d_range(
            args.d_max.get(i).copied(),
            args.d_min.get(i).copied(),
        );
        rows.push(residuals);
    }
    print!("{}", ResidualsTable(rows));
    Ok(())
}
