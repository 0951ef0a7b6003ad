//! Cross-correlation between two merged reflection tables, binned by resolution. Feed it
//! the two half-dataset merges to get CC1/2.

use clap::Parser;

use sfxkit_core::data::io::read_parquet;
use sfxkit_core::{ResolutionBinner, SfxError, SfxResult};
use sfxkit_metrics::cross_correlation;

#[derive(Parser)]
#[command(name = "cc12", about = "Cross-correlation between two reflection tables")]
struct Args {
    /// The two reflection tables to correlate (Parquet)
    #[arg(num_args = 2, required = true)]
    tables: Vec<String>,

    /// Lower resolution bound; defaults to the worse of the two tables' limits
    #[arg(long)]
    d_min: Option<f64>,

    /// Number of resolution bins
    #[arg(long, default_value_t = 10)]
    n_bins: usize,
}

fn main() -> SfxResult<()> {
    env_logger::init();
    let args = Args::parse();
    let first = read_parquet(&args.tables[0])?;
    let second = read_parquet(&args.tables[1])?;
    let d_min = args
        .d_min
        .or_else(|| match (first.d_min(), second.d_min()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        })
        .ok_or_else(|| SfxError::Custom("empty reflection table".to_string()))?;
    let d_max = first
        .d_max()
        .into_iter()
        .chain(second.d_max())
        .fold(f64::NAN, f64::max);
    let binner = ResolutionBinner::new(d_min, d_max, args.n_bins)?;
    println!("{}", cross_correlation(&first, &second, &binner));
    Ok(())
}
