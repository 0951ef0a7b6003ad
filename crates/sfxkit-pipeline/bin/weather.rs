//! Build the stage-2 "weather plot" from per-rank event logs: one band per job, one row
//! per rank, one dot per timed milestone. Each positional argument is a job directory
//! holding the rank logs (`*.err`, `*.log`) and, optionally, the scheduler out-file with
//! `jobstart`/`jobend` sentinels. Extracted series are cached so replotting skips the
//! parse.

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use sfxkit_core::{SfxError, SfxResult};
use sfxkit_pipeline::figures::weather_plot;
use sfxkit_pipeline::logs::events::JobRecord;

#[derive(Parser)]
#[command(name = "weather", about = "Stage-2 job timing weather plot")]
struct Args {
    /// Job directories (rank logs plus optional scheduler out-file)
    #[arg(required = true)]
    jobs: Vec<PathBuf>,

    /// Directory for extracted event-series caches
    #[arg(long, default_value = "timings")]
    cache_dir: PathBuf,

    /// Load jobs from existing caches instead of parsing logs
    #[arg(long)]
    use_cache: bool,

    /// Output figure
    #[arg(long, default_value = "weather.png")]
    out: PathBuf,
}

fn job_from_directory(dir: &Path) -> SfxResult<JobRecord> {
    let mut err_paths = Vec::new();
    let mut out_paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("err") | Some("log") => err_paths.push(path),
            Some("out") => out_paths.push(path),
            _ => {}
        }
    }
    err_paths.sort();
    out_paths.sort();
    if err_paths.is_empty() {
        return Err(SfxError::Custom(format!(
            "{}: no .err or .log rank logs found",
            dir.display()
        )));
    }
    let out_path = match out_paths.len() {
        1 => Some(out_paths[0].as_path()),
        0 => None,
        _ => {
            log::warn!(
                "{}: several out-files, using {}",
                dir.display(),
                out_paths[0].display()
            );
            Some(out_paths[0].as_path())
        }
    };
    JobRecord::from_log_files(&err_paths, out_path)
}

fn main() -> SfxResult<()> {
    env_logger::init();
    let args = Args::parse();
    let mut jobs = Vec::new();
    for dir in &args.jobs {
        let job = if args.use_cache {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "job".to_string());
            JobRecord::load_cache(&args.cache_dir.join(format!("{name}.bin")))?
        } else {
            let job = job_from_directory(dir)?;
            let cached = job.save_cache(&args.cache_dir)?;
            log::info!("cached {} events at {}", job.events.len(), cached.display());
            job
        };
        println!(
            "{}: {} events across {} ranks, {:.1} min",
            job.name,
            job.events.len(),
            job.ranks().len(),
            job.duration_minutes()
        );
        jobs.push(job);
    }
    weather_plot(&jobs, &args.out)?;
    println!("wrote {}", args.out.display());
    Ok(())
}
