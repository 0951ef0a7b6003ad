//! Drive a batch of external diffraction simulations: load the shared per-channel
//! structure-factor tables on the root rank, broadcast them chunk-by-chunk, round-robin
//! the image indices over ranks (device = rank mod devices-per-node), and gather the
//! per-task timing back to the root. The simulator itself is an external program invoked
//! once per image with `{index}` and `{device}` substituted into its arguments.

use clap::Parser;
use indexmap::IndexMap;
use std::fs;
use std::path::PathBuf;

use sfxkit_core::data::io::read_parquet;
use sfxkit_core::{mpi, ReflectionSet, SfxResult};
use sfxkit_pipeline::orchestrate::{run_batch, BatchPlan, CommandSimulator};

#[derive(Parser)]
#[command(name = "sim-batch", about = "Orchestrate an external simulation batch")]
struct Args {
    /// Number of images to simulate
    #[arg(long)]
    n_tasks: usize,

    /// GPU devices available per node
    #[arg(long, default_value_t = 1)]
    devices_per_node: usize,

    /// Directory of per-channel structure-factor tables (Parquet), loaded on the root
    /// rank and broadcast to everyone
    #[arg(long)]
    channels: Option<PathBuf>,

    /// Initialize MPI (launch with mpirun/srun)
    #[arg(long)]
    mpi: bool,

    /// Simulator program followed by its arguments; `{index}` and `{device}` are
    /// substituted per task
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn load_channels(dir: &PathBuf) -> SfxResult<IndexMap<String, ReflectionSet>> {
    let mut channels = IndexMap::new();
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|e| e == "parquet"))
        .collect();
    paths.sort();
    for path in paths {
        let key = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let set = read_parquet(&path.to_string_lossy())?;
        channels.insert(key, (*set).clone());
    }
    Ok(channels)
}

fn main() -> SfxResult<()> {
    env_logger::init();
    let args = Args::parse();
    mpi::use_mpi(args.mpi);

    let channels = match (&args.channels, mpi::is_root()) {
        (Some(dir), true) => load_channels(dir)?,
        _ => IndexMap::new(),
    };
    let simulator = CommandSimulator {
        program: args.command[0].clone(),
        args: args.command[1..].to_vec(),
    };
    let plan = BatchPlan {
        n_tasks: args.n_tasks,
        devices_per_node: args.devices_per_node,
    };
    let summary = run_batch(&plan, &simulator, channels)?;
    if let Some(summary) = summary {
        println!("{summary}");
    }
    mpi::finalize_mpi();
    Ok(())
}
