use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::process::Command;
use std::time::Instant;

use sfxkit_core::mpi;
use sfxkit_core::{ReflectionSet, SfxError, SfxResult};

/// One simulation work item: the image index plus the rank and GPU device that own it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SimTask {
    pub index: usize,
    pub rank: usize,
    pub device_id: usize,
}

/// The seam to the external diffraction simulator. The toolkit never computes diffraction
/// itself; it decides who simulates what, ships the shared inputs, and keeps the books.
pub trait Simulator {
    /// Produce the pattern for one task. The per-channel structure-factor tables arrive
    /// pre-broadcast; implementations that read their own inputs may ignore them.
    fn simulate(
        &self,
        task: &SimTask,
        channels: &IndexMap<String, ReflectionSet>,
    ) -> SfxResult<()>;
}

/// Launches one external simulator process per task, substituting `{index}` and
/// `{device}` into the configured arguments.
#[derive(Clone, Debug)]
pub struct CommandSimulator {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSimulator {
    pub fn substituted_args(&self, task: &SimTask) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{index}", &task.index.to_string())
                    .replace("{device}", &task.device_id.to_string())
            })
            .collect()
    }
}

impl Simulator for CommandSimulator {
    fn simulate(
        &self,
        task: &SimTask,
        _channels: &IndexMap<String, ReflectionSet>,
    ) -> SfxResult<()> {
        let status = Command::new(&self.program)
            .args(self.substituted_args(task))
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(SfxError::Custom(format!(
                "{} exited with {status} on task {}",
                self.program, task.index
            )))
        }
    }
}

/// How a batch is split over ranks and devices: task `i` goes to rank `i mod size`, and
/// each rank drives device `rank mod devices_per_node`.
#[derive(Copy, Clone, Debug)]
pub struct BatchPlan {
    pub n_tasks: usize,
    pub devices_per_node: usize,
}

impl BatchPlan {
    pub fn device_for_rank(&self, rank: usize) -> usize {
        rank % self.devices_per_node.max(1)
    }

    /// This rank's round-robin share of the batch.
    pub fn tasks_for_rank(&self) -> Vec<SimTask> {
        let rank = mpi::rank();
        let device_id = self.device_for_rank(rank);
        mpi::stride_indices(self.n_tasks)
            .map(|index| SimTask {
                index,
                rank,
                device_id,
            })
            .collect()
    }
}

/// What one rank recorded for one task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskReport {
    pub seconds: f64,
    pub error: Option<String>,
}

/// The batch as seen from the root after gathering every rank's reports.
#[derive(Clone, Debug, Default)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: Vec<usize>,
    pub total_seconds: f64,
    pub mean_seconds: f64,
    pub max_seconds: f64,
}

impl Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "completed tasks = {}", self.completed)?;
        writeln!(f, "failed tasks    = {}", self.failed.len())?;
        if !self.failed.is_empty() {
            writeln!(f, "failed ids      = {:?}", self.failed)?;
        }
        writeln!(f, "total seconds   = {:.3}", self.total_seconds)?;
        writeln!(f, "mean seconds    = {:.3}", self.mean_seconds)?;
        write!(f, "max seconds     = {:.3}", self.max_seconds)
    }
}

/// Run a simulation batch: broadcast the shared per-channel structure-factor tables from
/// the root, wait at the barrier, drive this rank's tasks, and gather the timing reports
/// back to the root.
///
/// A failing task is recorded and logged, never fatal to the batch. The root returns the
/// summary; every other rank returns `None`.
pub fn run_batch<S: Simulator>(
    plan: &BatchPlan,
    simulator: &S,
    channels: IndexMap<String, ReflectionSet>,
) -> SfxResult<Option<BatchSummary>> {
    let channels = mpi::broadcast_map_chunked(channels, mpi::ROOT_RANK)?;
    mpi::barrier();
    log::info!(
        "rank {} of {} holds {} shared channels",
        mpi::rank(),
        mpi::size(),
        channels.len()
    );

    let mut reports: IndexMap<usize, TaskReport> = IndexMap::new();
    for task in plan.tasks_for_rank() {
        let clock = Instant::now();
        let result = simulator.simulate(&task, &channels);
        let seconds = clock.elapsed().as_secs_f64();
        if let Err(error) = &result {
            log::error!("task {} failed after {seconds:.3}s: {error}", task.index);
        }
        reports.insert(
            task.index,
            TaskReport {
                seconds,
                error: result.err().map(|e| e.to_string()),
            },
        );
    }

    let gathered = mpi::gather_map_chunked(reports, mpi::ROOT_RANK)?;
    if !mpi::is_root() {
        return Ok(None);
    }
    let mut summary = BatchSummary::default();
    for (index, report) in &gathered {
        if report.error.is_some() {
            summary.failed.push(*index);
        } else {
            summary.completed += 1;
        }
        summary.total_seconds += report.seconds;
        summary.max_seconds = summary.max_seconds.max(report.seconds);
    }
    summary.failed.sort_unstable();
    if !gathered.is_empty() {
        summary.mean_seconds = summary.total_seconds / gathered.len() as f64;
    }
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockSimulator {
        executed: Mutex<Vec<SimTask>>,
        fail_on: Option<usize>,
    }

    impl Simulator for MockSimulator {
        fn simulate(
            &self,
            task: &SimTask,
            channels: &IndexMap<String, ReflectionSet>,
        ) -> SfxResult<()> {
            assert_eq!(channels.len(), 1, "shared channels should survive broadcast");
            self.executed.lock().unwrap().push(*task);
            if self.fail_on == Some(task.index) {
                Err(SfxError::Custom("synthetic failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn one_channel() -> IndexMap<String, ReflectionSet> {
        let mut channels = IndexMap::new();
        channels.insert(
            "nominal".to_string(),
            (*sfxkit_core::data::test_reflection_set()).clone(),
        );
        channels
    }

    #[test]
    fn test_batch_runs_every_task_and_collects_failures() {
        let plan = BatchPlan {
            n_tasks: 5,
            devices_per_node: 4,
        };
        let simulator = MockSimulator {
            executed: Mutex::new(Vec::new()),
            fail_on: Some(3),
        };
        let summary = run_batch(&plan, &simulator, one_channel())
            .unwrap()
            .expect("single rank is the root");
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failed, vec![3]);
        assert!(summary.total_seconds >= 0.0);
        let executed = simulator.executed.into_inner().unwrap();
        let mut indices: Vec<usize> = executed.iter().map(|t| t.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(executed.iter().all(|t| t.device_id == 0 && t.rank == 0));
    }

    #[test]
    fn test_command_substitution() {
        let simulator = CommandSimulator {
            program: "nanoBragg".to_string(),
            args: vec![
                "--image".to_string(),
                "{index}".to_string(),
                "--device={device}".to_string(),
            ],
        };
        let task = SimTask {
            index: 42,
            rank: 3,
            device_id: 1,
        };
        assert_eq!(
            simulator.substituted_args(&task),
            vec!["--image", "42", "--device=1"]
        );
    }

    #[test]
    fn test_command_simulator_reports_nonzero_exit() {
        let ok = CommandSimulator {
            program: "true".to_string(),
            args: vec![],
        };
        let bad = CommandSimulator {
            program: "false".to_string(),
            args: vec![],
        };
        let task = SimTask {
            index: 0,
            rank: 0,
            device_id: 0,
        };
        assert!(ok.simulate(&task, &IndexMap::new()).is_ok());
        assert!(bad.simulate(&task, &IndexMap::new()).is_err());
    }

    #[test]
    fn test_device_assignment_wraps_over_node_devices() {
        let plan = BatchPlan {
            n_tasks: 0,
            devices_per_node: 4,
        };
        assert_eq!(plan.device_for_rank(0), 0);
        assert_eq!(plan.device_for_rank(5), 1);
        assert_eq!(plan.device_for_rank(11), 3);
    }
}
