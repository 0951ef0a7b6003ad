use chrono::NaiveDateTime;
use indexmap::IndexMap;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use sfxkit_core::mpi;
use sfxkit_core::{SfxError, SfxResult};

/// Per-image verdict assembled from a processing debug record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameRecord {
    /// The event timestamp string identifying the image.
    pub timestamp: String,
    pub hit: bool,
    pub indexed: bool,
    /// Seconds spent indexing successfully (0 when not indexed).
    pub index_seconds: f64,
    /// Seconds spent in the indexing attempt, successful or not (0 when never attempted).
    pub attempt_seconds: f64,
}

/// Hit/indexing counts and timing aggregated over any number of debug records.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexingStats {
    pub xray_events: usize,
    pub images_analyzed: usize,
    pub hits: usize,
    pub indexed: usize,
    pub attempt_seconds_total: f64,
    pub success_seconds_total: f64,
    /// Timestamps of failed attempts that exceeded the configured cutoff.
    pub over_cutoff: Vec<String>,
    pub frames: Vec<FrameRecord>,
}

impl IndexingStats {
    /// Fold another partial result (a file's or a rank's worth) into this one.
    pub fn merge(&mut self, other: IndexingStats) {
        self.xray_events += other.xray_events;
        self.images_analyzed += other.images_analyzed;
        self.hits += other.hits;
        self.indexed += other.indexed;
        self.attempt_seconds_total += other.attempt_seconds_total;
        self.success_seconds_total += other.success_seconds_total;
        self.over_cutoff.extend(other.over_cutoff);
        self.frames.extend(other.frames);
    }

    /// Average seconds per indexing attempt, over hits.
    pub fn mean_attempt_seconds(&self) -> f64 {
        if self.hits > 0 {
            self.attempt_seconds_total / self.hits as f64
        } else {
            f64::NAN
        }
    }

    /// Average seconds per successful indexing, over indexed images.
    pub fn mean_success_seconds(&self) -> f64 {
        if self.indexed > 0 {
            self.success_seconds_total / self.indexed as f64
        } else {
            f64::NAN
        }
    }

    /// The printed analytics block.
    pub fn summary(&self, budget: Option<&TimingBudget>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", "-".repeat(80));
        let _ = writeln!(out, "{:^80}", "Analytics Package for Indexing");
        let _ = writeln!(out, "{}", "-".repeat(80));
        let _ = writeln!(
            out,
            "================== Indexing and Timing Statistics =================="
        );
        let _ = writeln!(out, "Total number of X-ray events = {}", self.xray_events);
        let _ = writeln!(
            out,
            "Total number of images analyzed = {}",
            self.images_analyzed
        );
        let _ = writeln!(out, "Number of hits = {}", self.hits);
        let _ = writeln!(
            out,
            "Number of images successfully indexed = {}",
            self.indexed
        );
        let _ = writeln!(
            out,
            "Total time spent in indexing (core-hrs) = {:.4}",
            self.attempt_seconds_total / 3600.0
        );
        let _ = writeln!(
            out,
            "Time spent indexing successfully (core-hrs) = {:.4}",
            self.success_seconds_total / 3600.0
        );
        let _ = writeln!(
            out,
            "Average time spent indexing (core-secs) = {:.3}",
            self.mean_attempt_seconds()
        );
        let _ = writeln!(
            out,
            "Average time spent indexing successfully (core-secs) = {:.3}",
            self.mean_success_seconds()
        );
        if let Some(budget) = budget {
            let _ = writeln!(
                out,
                "Total node-hours with {} nodes = {:.2} (hrs)",
                budget.nodes,
                budget.node_hours()
            );
            let _ = writeln!(
                out,
                "% core utilization i.e. (total indexing time)/(total core-hrs) = {:.2}",
                100.0 * (self.attempt_seconds_total / 3600.0) / budget.core_hours()
            );
        }
        let _ = writeln!(out, "{}", "-".repeat(80));
        out
    }

    /// Dump the per-frame verdicts in the fixed-width layout of the processing pipeline's
    /// skip lists.
    pub fn write_frame_timings(&self, path: &Path) -> SfxResult<()> {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<28} {:>4} {:>8} {:>14} {:>20}",
            "event", "hit", "indexed", "t_indexed", "t_indexed_attempted"
        );
        for frame in &self.frames {
            let _ = writeln!(
                out,
                "{:<28} {:>4} {:>8} {:>14.7} {:>20.7}",
                frame.timestamp,
                u8::from(frame.hit),
                u8::from(frame.indexed),
                frame.index_seconds,
                frame.attempt_seconds
            );
        }
        fs::write(path, out)?;
        Ok(())
    }
}

/// Wall-clock budget of the processing job, for node-hour and core-hour accounting.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct TimingBudget {
    pub wall_seconds: f64,
    pub nodes: usize,
    /// Total cores, when the job did not occupy whole nodes.
    pub cores: Option<usize>,
    pub cores_per_node: usize,
}

impl TimingBudget {
    pub fn node_hours(&self) -> f64 {
        self.wall_seconds * self.nodes as f64 / 3600.0
    }

    pub fn core_hours(&self) -> f64 {
        let cores = self
            .cores
            .unwrap_or(self.nodes * self.cores_per_node);
        self.wall_seconds * cores as f64 / 3600.0
    }
}

/// Scrape the job's elapsed seconds from a scheduler log: the maximum over lines carrying
/// `marker`, reading the second whitespace field as seconds and, when `run_number` is
/// given, keeping only lines whose last field matches it.
pub fn scrape_wall_seconds(
    log_path: &Path,
    marker: &str,
    run_number: Option<i64>,
) -> SfxResult<Option<f64>> {
    let text = fs::read_to_string(log_path)?;
    let mut max_seconds: Option<f64> = None;
    for line in text.lines() {
        if !line.contains(marker) {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if let Some(run) = run_number {
            let matches_run = fields
                .last()
                .and_then(|f| f.parse::<i64>().ok())
                .is_some_and(|r| r == run);
            if !matches_run {
                continue;
            }
        }
        if let Some(seconds) = fields.get(1).and_then(|f| f.parse::<f64>().ok()) {
            max_seconds = Some(max_seconds.map_or(seconds, |m: f64| m.max(seconds)));
        }
    }
    Ok(max_seconds)
}

/// The wall-clock field of a debug record: either raw epoch seconds or an ISO timestamp.
fn parse_epoch_seconds(field: &str) -> SfxResult<f64> {
    let field = field.trim();
    if let Ok(seconds) = field.parse::<f64>() {
        return Ok(seconds);
    }
    NaiveDateTime::parse_from_str(field, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| dt.and_utc().timestamp_millis() as f64 / 1e3)
        .map_err(|_| SfxError::ParseError {
            name: field.to_string(),
            object: "debug record wall clock".to_string(),
        })
}

/// Parse one per-rank debug record (`hostname,timestamp,clock,status,step` lines).
///
/// The step stream drives a small state machine: `start` opens an X-ray event,
/// `spotfind_start` counts an analyzed image, `index_start` marks a hit, and the time to
/// the step after `index_start` is the attempt duration, counted as successful when that
/// step is `refine_start`. Failed attempts longer than `cutoff_seconds` land in the skip
/// list.
pub fn parse_debug_file(path: &Path, cutoff_seconds: Option<f64>) -> SfxResult<IndexingStats> {
    let text = fs::read_to_string(path)?;
    let mut stats = IndexingStats::default();
    let mut events_list: Vec<String> = Vec::new();
    let mut hits: Vec<String> = Vec::new();
    let mut success_seconds: IndexMap<String, f64> = IndexMap::new();
    let mut attempt_seconds: IndexMap<String, f64> = IndexMap::new();
    let mut prev_step = String::new();
    let mut prev_time: Option<f64> = None;
    let mut current_ts = String::new();
    let mut skipped = 0usize;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.trim().split(',').collect();
        let [_host, ts, clock, _status, step] = fields[..] else {
            skipped += 1;
            continue;
        };
        let Ok(now) = parse_epoch_seconds(clock) else {
            skipped += 1;
            continue;
        };
        let step = step.trim();
        if step == "spotfind_start" {
            stats.images_analyzed += 1;
        }
        if step == "start" {
            stats.xray_events += 1;
            events_list.push(ts.to_string());
        }
        if prev_step == "index_start" {
            if let Some(prev) = prev_time {
                attempt_seconds.insert(current_ts.clone(), now - prev);
            }
        }
        if step == "index_start" {
            hits.push(ts.to_string());
        }
        if step == "refine_start" {
            if let Some(prev) = prev_time {
                success_seconds.insert(ts.to_string(), now - prev);
            }
        }
        current_ts = ts.to_string();
        prev_step = step.to_string();
        prev_time = Some(now);
    }
    if skipped > 0 {
        log::debug!("{}: skipped {skipped} malformed lines", path.display());
    }

    stats.hits = hits.len();
    stats.indexed = success_seconds.len();
    stats.success_seconds_total = success_seconds.values().sum();
    stats.attempt_seconds_total = attempt_seconds.values().sum();
    for event in &events_list {
        let hit = hits.contains(event);
        let (indexed, index_seconds, attempt) = if let Some(&t) = success_seconds.get(event) {
            (true, t, attempt_seconds.get(event).copied().unwrap_or(t))
        } else if let Some(&t) = attempt_seconds.get(event) {
            if cutoff_seconds.is_some_and(|cutoff| t > cutoff) {
                stats.over_cutoff.push(event.clone());
            }
            (false, 0.0, t)
        } else {
            (false, 0.0, 0.0)
        };
        stats.frames.push(FrameRecord {
            timestamp: event.clone(),
            hit,
            indexed,
            index_seconds,
            attempt_seconds: attempt,
        });
    }
    Ok(stats)
}

/// Analyze every `.txt` debug record under `debug_dir`, round-robin partitioned over the
/// MPI ranks, with each rank's share parsed in parallel and the partial sums gathered to
/// the root. Non-root ranks return an empty result.
pub fn analyze_debug_dir(
    debug_dir: &Path,
    cutoff_seconds: Option<f64>,
) -> SfxResult<IndexingStats> {
    let mut names: Vec<_> = fs::read_dir(debug_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|e| e == "txt"))
        .collect();
    names.sort();
    let mine: Vec<_> = mpi::stride_indices(names.len())
        .map(|i| names[i].clone())
        .collect();

    #[cfg(feature = "rayon")]
    let parsed: Vec<SfxResult<IndexingStats>> = mine
        .par_iter()
        .map(|path| parse_debug_file(path, cutoff_seconds))
        .collect();
    #[cfg(not(feature = "rayon"))]
    let parsed: Vec<SfxResult<IndexingStats>> = mine
        .iter()
        .map(|path| parse_debug_file(path, cutoff_seconds))
        .collect();

    let mut local = IndexingStats::default();
    for stats in parsed {
        local.merge(stats?);
    }

    let mut per_rank = IndexMap::new();
    per_rank.insert(mpi::rank(), local);
    let gathered = mpi::gather_map_chunked(per_rank, mpi::ROOT_RANK)?;
    let mut merged = IndexingStats::default();
    for (_, stats) in gathered {
        merged.merge(stats);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DEBUG_TEXT: &str = "\
host1,2023-05-01T14:50Z21.976,100.0,good,start
host1,2023-05-01T14:50Z21.976,101.0,good,spotfind_start
host1,2023-05-01T14:50Z21.976,102.0,good,index_start
host1,2023-05-01T14:50Z21.976,110.5,good,refine_start
host1,2023-05-01T14:51Z03.100,120.0,good,start
host1,2023-05-01T14:51Z03.100,121.0,good,spotfind_start
host1,2023-05-01T14:51Z03.100,122.0,good,index_start
host1,2023-05-01T14:51Z03.100,125.0,good,index_failed_not_enough_spots
";

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir =
            std::env::temp_dir().join(format!("sfxkit-indexing-{}-{tag}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_debug_record_state_machine() {
        let dir = scratch_dir("parse");
        let path = dir.join("debug_rank0.txt");
        fs::write(&path, DEBUG_TEXT).unwrap();
        let stats = parse_debug_file(&path, Some(2.0)).unwrap();
        assert_eq!(stats.xray_events, 2);
        assert_eq!(stats.images_analyzed, 2);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.indexed, 1);
        assert_relative_eq!(stats.success_seconds_total, 8.5);
        assert_relative_eq!(stats.attempt_seconds_total, 11.5);
        // The failed 3 s attempt exceeds the 2 s cutoff; the successful one is exempt.
        assert_eq!(stats.over_cutoff, vec!["2023-05-01T14:51Z03.100".to_string()]);
        assert_eq!(stats.frames.len(), 2);
        assert!(stats.frames[0].indexed);
        assert_relative_eq!(stats.frames[0].index_seconds, 8.5);
        assert!(stats.frames[1].hit && !stats.frames[1].indexed);
        assert_relative_eq!(stats.frames[1].attempt_seconds, 3.0);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_directory_analysis_merges_files() {
        let dir = scratch_dir("dir");
        fs::write(dir.join("debug_rank0.txt"), DEBUG_TEXT).unwrap();
        fs::write(dir.join("debug_rank1.txt"), DEBUG_TEXT).unwrap();
        fs::write(dir.join("notes.log"), "ignored").unwrap();
        let stats = analyze_debug_dir(&dir, None).unwrap();
        assert_eq!(stats.xray_events, 4);
        assert_eq!(stats.indexed, 2);
        assert!(stats.over_cutoff.is_empty());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wall_seconds_scrape_takes_the_run_maximum() {
        let dir = scratch_dir("scrape");
        let path = dir.join("slurm-123.out");
        fs::write(
            &path,
            "IOTA_XTC_SingleRank_TimeElapsed 512.3 other fields 17\n\
             IOTA_XTC_SingleRank_TimeElapsed 611.0 other fields 17\n\
             IOTA_XTC_SingleRank_TimeElapsed 999.9 other fields 18\n",
        )
        .unwrap();
        let seconds =
            scrape_wall_seconds(&path, "IOTA_XTC_SingleRank_TimeElapsed", Some(17)).unwrap();
        assert_relative_eq!(seconds.unwrap(), 611.0);
        let all = scrape_wall_seconds(&path, "IOTA_XTC_SingleRank_TimeElapsed", None).unwrap();
        assert_relative_eq!(all.unwrap(), 999.9);
        assert!(
            scrape_wall_seconds(&path, "NoSuchMarker", None)
                .unwrap()
                .is_none()
        );
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_budget_accounting() {
        let budget = TimingBudget {
            wall_seconds: 3600.0,
            nodes: 32,
            cores: None,
            cores_per_node: 68,
        };
        assert_relative_eq!(budget.node_hours(), 32.0);
        assert_relative_eq!(budget.core_hours(), 32.0 * 68.0);
        let partial = TimingBudget {
            cores: Some(100),
            ..budget
        };
        assert_relative_eq!(partial.core_hours(), 100.0);
    }
}
