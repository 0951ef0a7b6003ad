use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use sfxkit_core::{SfxError, SfxResult};

/// The stage-2 refinement milestones worth timing, identified by the exact marker the
/// refiner writes into its per-rank logs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    ReadInputPickle,
    BeginPrepDataframe,
    DonePrepDataframe,
    BeginLoadingInputs,
    BeginLoadingExperiments,
    DoneLoadingExperiments,
    LoadingRoiData,
    DoneLoadingRoi,
    GatherHklInfo,
    DoneGatherHklInfo,
    LaunchRefiner,
    DoneFuncGrad,
    OptimizationDone,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        EventKind::ReadInputPickle,
        EventKind::BeginPrepDataframe,
        EventKind::DonePrepDataframe,
        EventKind::BeginLoadingInputs,
        EventKind::BeginLoadingExperiments,
        EventKind::DoneLoadingExperiments,
        EventKind::LoadingRoiData,
        EventKind::DoneLoadingRoi,
        EventKind::GatherHklInfo,
        EventKind::DoneGatherHklInfo,
        EventKind::LaunchRefiner,
        EventKind::DoneFuncGrad,
        EventKind::OptimizationDone,
    ];

    /// The marker as it appears in the log.
    pub const fn log_string(&self) -> &'static str {
        match self {
            EventKind::ReadInputPickle => "EVENT: read input pickle",
            EventKind::BeginPrepDataframe => "EVENT: BEGIN prep dataframe",
            EventKind::DonePrepDataframe => "EVENT: DONE prep dataframe",
            EventKind::BeginLoadingInputs => "EVENT: begin loading inputs",
            EventKind::BeginLoadingExperiments => "EVENT: BEGIN loading experiment list",
            EventKind::DoneLoadingExperiments => "EVENT: DONE loading experiment list",
            EventKind::LoadingRoiData => "EVENT: LOADING ROI DATA",
            EventKind::DoneLoadingRoi => "EVENT: DONE LOADING ROI",
            EventKind::GatherHklInfo => "EVENT: Gathering global HKL information",
            EventKind::DoneGatherHklInfo => "EVENT: FINISHED gather global HKL information",
            EventKind::LaunchRefiner => "EVENT: launch refiner",
            EventKind::DoneFuncGrad => "DONE WITH FUNC GRAD",
            EventKind::OptimizationDone => "_launcher done running optimization",
        }
    }

    /// The marker with leading underscores stripped, for legends.
    pub fn label(&self) -> &str {
        self.log_string().trim_start_matches('_')
    }

    /// The position of this kind in [`EventKind::ALL`] (stable color/legend index).
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|k| k == self)
            .unwrap_or_default()
    }

    /// Match a log-line detail field against the marker catalog. Refiner messages routed
    /// through the profiler arrive as `... >>  <marker>`.
    pub fn from_message(message: &str) -> Option<Self> {
        let key = match message.split_once(" >>  ") {
            Some((_, rest)) => rest,
            None => message,
        };
        let key = key.trim_end();
        Self::ALL.iter().find(|k| k.log_string() == key).copied()
    }
}

/// One timestamped refinement milestone on one rank.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub time: NaiveDateTime,
    pub rank: usize,
    pub node: usize,
}

impl Event {
    /// Parse a `origin | timestamp | details` log line. The origin is `rank<N>` or
    /// `rank<N>:nd<M>`; a missing rank or node reads as 0.
    pub fn from_log_line(line: &str) -> SfxResult<Self> {
        let mut parts = line.trim().splitn(3, " | ");
        let (origin, time_str, details) = match (parts.next(), parts.next(), parts.next()) {
            (Some(o), Some(t), Some(d)) => (o, t, d),
            _ => {
                return Err(SfxError::ParseError {
                    name: line.trim().to_string(),
                    object: "event log line".to_string(),
                })
            }
        };
        let kind = EventKind::from_message(details).ok_or_else(|| SfxError::ParseError {
            name: details.trim().to_string(),
            object: "stage-2 event marker".to_string(),
        })?;
        let time = parse_event_timestamp(time_str)?;
        let (rank_token, node_token) = match origin.split_once(':') {
            Some((r, n)) => (r, n),
            None => (origin, ""),
        };
        Ok(Self {
            kind,
            time,
            rank: trailing_number(rank_token).unwrap_or(0),
            node: trailing_number(node_token).unwrap_or(0),
        })
    }
}

/// The trailing decimal run of a token like `rank12` or `nd3`.
fn trailing_number(token: &str) -> Option<usize> {
    let digits: String = token
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Event timestamps are `%Y-%m-%d %H:%M:%S,<fraction>` with milli- or microsecond
/// fractions depending on the logger.
pub(crate) fn parse_event_timestamp(s: &str) -> SfxResult<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S,%3f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S,%6f"))
        .map_err(|_| SfxError::ParseError {
            name: s.to_string(),
            object: "event timestamp".to_string(),
        })
}

/// The scheduler wraps each job's out-file with `jobstart <date>` / `jobend <date>`
/// sentinels; the date carries a trailing timezone label which is not part of the parsed
/// value.
fn parse_sentinel_date(rest: &str) -> Option<NaiveDateTime> {
    const FORMAT: &str = "%a %d %b %Y %I:%M:%S %p";
    let rest = rest.trim();
    if let Ok(date) = NaiveDateTime::parse_from_str(rest, FORMAT) {
        return Some(date);
    }
    let without_zone = rest.rsplit_once(char::is_whitespace)?.0;
    NaiveDateTime::parse_from_str(without_zone, FORMAT).ok()
}

/// All timed milestones of one stage-2 job, with its wall-clock start and end.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub events: Vec<Event>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl JobRecord {
    /// Collect [`Event`]s from one per-rank (or combined) log, skipping every line that is
    /// not a milestone.
    pub fn collect_events(err_path: &Path) -> SfxResult<Vec<Event>> {
        let text = fs::read_to_string(err_path)?;
        let mut events = Vec::new();
        let mut skipped = 0usize;
        for line in text.lines() {
            match Event::from_log_line(line) {
                Ok(event) => events.push(event),
                Err(_) => skipped += 1,
            }
        }
        log::debug!(
            "{}: {} events, {skipped} other lines",
            err_path.display(),
            events.len()
        );
        Ok(events)
    }

    /// The `jobstart`/`jobend` sentinels of an out-file, where present.
    pub fn collect_start_end(
        out_path: &Path,
    ) -> SfxResult<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        let text = fs::read_to_string(out_path)?;
        let mut start = None;
        let mut end = None;
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("jobstart") {
                start = parse_sentinel_date(rest);
            } else if let Some(rest) = line.strip_prefix("jobend") {
                end = parse_sentinel_date(rest);
            }
        }
        Ok((start, end))
    }

    /// The job id: the out-file stem, the err-file stem, or the log's directory name,
    /// whichever comes first.
    pub fn job_name(out_path: Option<&Path>, err_path: &Path) -> String {
        if let Some(stem) = out_path.and_then(|p| p.file_stem()) {
            return stem.to_string_lossy().into_owned();
        }
        if err_path.extension().is_some_and(|e| e == "err") {
            if let Some(stem) = err_path.file_stem() {
                return stem.to_string_lossy().into_owned();
            }
        }
        err_path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job".to_string())
    }

    /// Assemble a job from its per-rank logs and (optionally) its scheduler out-file.
    /// Without sentinels the job spans its first to last event.
    pub fn from_log_files(err_paths: &[PathBuf], out_path: Option<&Path>) -> SfxResult<Self> {
        let first_err = err_paths.first().ok_or_else(|| {
            SfxError::Custom("at least one event log is required per job".to_string())
        })?;
        let mut events = Vec::new();
        for err_path in err_paths {
            events.extend(Self::collect_events(err_path)?);
        }
        let (start, end) = match out_path {
            Some(path) => Self::collect_start_end(path)?,
            None => (None, None),
        };
        let event_times = || events.iter().map(|e| e.time);
        let start = start.or_else(|| event_times().min());
        let end = end.or_else(|| event_times().max());
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return Err(SfxError::Custom(format!(
                    "no events or job sentinels found for {}",
                    first_err.display()
                )))
            }
        };
        Ok(Self {
            name: Self::job_name(out_path, first_err),
            events,
            start,
            end,
        })
    }

    /// Ranks that reported at least one event, ascending.
    pub fn ranks(&self) -> Vec<usize> {
        let mut ranks: Vec<usize> = self.events.iter().map(|e| e.rank).collect();
        ranks.sort_unstable();
        ranks.dedup();
        ranks
    }

    pub fn minutes_since_start(&self, event: &Event) -> f64 {
        (event.time - self.start).num_milliseconds() as f64 / 60_000.0
    }

    pub fn duration_minutes(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 60_000.0
    }

    /// Persist the extracted record so later plotting runs skip the log parse.
    pub fn save_cache(&self, cache_dir: &Path) -> SfxResult<PathBuf> {
        fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(format!("{}.bin", self.name));
        fs::write(&path, bincode::serialize(self)?)?;
        Ok(path)
    }

    pub fn load_cache(path: &Path) -> SfxResult<Self> {
        Ok(bincode::deserialize(&fs::read(path)?)?)
    }
}
