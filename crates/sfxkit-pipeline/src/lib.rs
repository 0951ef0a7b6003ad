//! # sfxkit-pipeline
//!
//! The working layer of the toolkit: log analytics for the processing and refinement
//! stages, refinement-convergence tracking, figure rendering, and the simulation-batch
//! orchestration. The command-line tools in `bin/` are thin wrappers over this crate.
#![warn(clippy::perf, clippy::style)]

/// Stage-2 convergence tracking against ground truth.
pub mod convergence;
/// Figure rendering (weather plots, convergence curves, scatters).
pub mod figures;
/// Parsers for the pipeline's log and report files.
pub mod logs;
/// Simulation-batch orchestration over MPI ranks and GPU devices.
pub mod orchestrate;
/// Stage-1 refinement comparison against ground-truth orientations.
pub mod stage1;

pub use convergence::{track_convergence, ConvergenceOptions, ConvergenceSeries};
pub use logs::events::{Event, EventKind, JobRecord};
pub use logs::indexing::{IndexingStats, TimingBudget};
pub use logs::residuals::DetectorResiduals;
pub use logs::sigma_z::SigmaZSeries;
pub use orchestrate::{BatchPlan, BatchSummary, CommandSimulator, SimTask, Simulator};
