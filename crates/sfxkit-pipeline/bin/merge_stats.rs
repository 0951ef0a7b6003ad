//! Compare the quality of two or more merged reflection tables over a set of resolution
//! bins. In the ExaFEL context this validates an improvement of the diffBragg-refined
//! reflection file compared to the standard DIALS processing, against the reference
//! amplitudes derived from the structure used to simulate the data.

use clap::Parser;

use sfxkit_core::data::io::read_parquet;
use sfxkit_core::{ResolutionBinner, SfxError, SfxResult};
use sfxkit_metrics::{completeness, i_over_sigma, r1_factor, StatKind};

#[derive(Parser)]
#[command(name = "merge-stats", about = "Compare merged reflection table quality")]
struct Args {
    /// Reflection tables to evaluate (Parquet)
    #[arg(required = true)]
    tables: Vec<String>,

    /// Reference amplitude table for R1 (Parquet)
    #[arg(long)]
    reference: Option<String>,

    /// Statistics to compute
    #[arg(long = "stat", default_values = ["completeness", "i-over-sigma", "r1"])]
    stats: Vec<String>,

    /// Number of resolution bins
    #[arg(long, default_value_t = 10)]
    n_bins: usize,

    /// High-resolution cutoff; defaults to the best resolution among the inputs
    #[arg(long)]
    d_min: Option<f64>,

    /// Treat Bijvoet mates as independent observations
    #[arg(long)]
    anomalous: bool,
}

fn main() -> SfxResult<()> {
    env_logger::init();
    let args = Args::parse();
    let kinds = args
        .stats
        .iter()
        .map(|s| s.parse::<StatKind>())
        .collect::<SfxResult<Vec<_>>>()?;

    let sets = args
        .tables
        .iter()
        .map(|path| read_parquet(path))
        .collect::<SfxResult<Vec<_>>>()?;
    let reference = args
        .reference
        .as_deref()
        .map(read_parquet)
        .transpose()?;

    let d_min = args.d_min.or_else(|| {
        sets.iter()
            .filter_map(|s| s.d_min())
            .min_by(|a, b| a.total_cmp(b))
    });
    let d_max = sets
        .iter()
        .filter_map(|s| s.d_max())
        .max_by(|a, b| a.total_cmp(b));
    let (Some(d_min), Some(d_max)) = (d_min, d_max) else {
        return Err(SfxError::Custom(
            "no reflections found in the input tables".to_string(),
        ));
    };
    let binner = ResolutionBinner::new(d_min, d_max, args.n_bins)?;

    for (path, set) in args.tables.iter().zip(&sets) {
        println!("== {path} ({} reflections) ==", set.len());
        for kind in &kinds {
            let table = match kind {
                StatKind::Completeness => completeness(set, &binner, args.anomalous),
                StatKind::IOverSigma => i_over_sigma(set, &binner),
                StatKind::R1 => {
                    let Some(reference) = &reference else {
                        return Err(SfxError::Custom(
                            "--reference is required for the r1 statistic".to_string(),
                        ));
                    };
                    r1_factor(set, reference, &binner)
                }
                other => {
                    return Err(SfxError::Custom(format!(
                        "{other} is not a merge statistic; see the cc12 and convergence tools"
                    )))
                }
            };
            println!("{table}");
        }
    }
    Ok(())
}
