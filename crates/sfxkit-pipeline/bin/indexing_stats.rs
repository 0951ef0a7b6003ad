//! Analytics for indexing: hit and indexed-image counts, indexing timing, and node/core
//! accounting, from the per-image debug records of one or more processing runs. Runs
//! under MPI (`--mpi` and an `mpirun` launch) to fan the files out over ranks when a run
//! holds many of them.

use clap::Parser;
use std::path::PathBuf;

use sfxkit_core::mpi;
use sfxkit_core::{SfxError, SfxResult};
use sfxkit_pipeline::logs::indexing::{
    analyze_debug_dir, scrape_wall_seconds, TimingBudget,
};

#[derive(Parser)]
#[command(name = "indexing-stats", about = "Indexing and timing analytics")]
struct Args {
    /// Processing-run directories (each holding out/debug/*.txt)
    #[arg(default_value = ".")]
    input_path: Vec<PathBuf>,

    /// Number of nodes used for the processing, for node-hour accounting
    #[arg(long, default_value_t = 32)]
    num_nodes: usize,

    /// Total cores used, when the job did not occupy whole nodes
    #[arg(long)]
    num_cores: Option<usize>,

    /// Cores per node of the machine
    #[arg(long, default_value_t = 68)]
    cores_per_node: usize,

    /// Scheduler logfile to scrape the elapsed time from
    #[arg(long)]
    out_logfile: Option<PathBuf>,

    /// Marker of the elapsed-time lines in the scheduler log
    #[arg(long, default_value = "IOTA_XTC_SingleRank_TimeElapsed")]
    marker: String,

    /// Restrict the scrape to lines whose last field is this run number
    #[arg(long)]
    run_number: Option<i64>,

    /// Wall time in seconds; takes precedence over --out-logfile
    #[arg(long)]
    wall_time: Option<f64>,

    /// Collect failed attempts slower than this many seconds into a skip list
    #[arg(long)]
    indexing_time_cutoff: Option<f64>,

    /// Write per-frame timing verdicts to this file
    #[arg(long)]
    write_timings: Option<PathBuf>,

    /// Write the over-cutoff skip list to this file
    #[arg(long, default_value = "timestamps_to_skip.dat")]
    skip_list: PathBuf,

    /// Initialize MPI and partition the debug files over ranks
    #[arg(long)]
    mpi: bool,
}

fn main() -> SfxResult<()> {
    env_logger::init();
    let args = Args::parse();
    mpi::use_mpi(args.mpi);

    let wall_seconds = match args.wall_time {
        Some(seconds) => Some(seconds),
        None => match &args.out_logfile {
            Some(path) => scrape_wall_seconds(path, &args.marker, args.run_number)?,
            None => None,
        },
    };
    let budget = wall_seconds.map(|wall_seconds| TimingBudget {
        wall_seconds,
        nodes: args.num_nodes,
        cores: args.num_cores,
        cores_per_node: args.cores_per_node,
    });

    for input in &args.input_path {
        let debug_dir = input.join("out").join("debug");
        if !debug_dir.is_dir() {
            mpi::finalize_mpi();
            return Err(SfxError::Custom(format!(
                "{} is not a directory",
                debug_dir.display()
            )));
        }
        let stats = analyze_debug_dir(&debug_dir, args.indexing_time_cutoff)?;
        if !mpi::is_root() {
            continue;
        }
        println!("Getting stats for data in: {}", input.display());
        print!("{}", stats.summary(budget.as_ref()));
        if args.indexing_time_cutoff.is_some() {
            let mut lines = String::new();
            for event in &stats.over_cutoff {
                lines.push_str(&format!("psanagpu999,{event},{event},fail\n"));
            }
            std::fs::write(&args.skip_list, lines)?;
            println!(
                "wrote {} over-cutoff events to {}",
                stats.over_cutoff.len(),
                args.skip_list.display()
            );
        }
        if let Some(path) = &args.write_timings {
            stats.write_frame_timings(path)?;
            println!("wrote per-frame timings to {}", path.display());
        }
    }
    mpi::finalize_mpi();
    Ok(())
}
