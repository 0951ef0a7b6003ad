//! # sfxkit
//!
//! `sfxkit` is the evaluation and orchestration layer of a serial-femtosecond
//! crystallography (SFX) processing pipeline. The heavy crystallography — structure
//! factors, geometry refinement, GPU diffraction simulation — lives in the external
//! toolkit; this workspace owns everything around it: merge-quality statistics
//! (completeness, I/sigI, R1, CC1/2), refinement-convergence tracking against ground
//! truth, log analytics for indexing and stage-2 timing, the figures built from them,
//! and the MPI plumbing (including chunked keyed collectives that dodge the 2³¹-byte
//! per-call ceiling) used to run all of it at scale.
//!
//! The workspace splits into three library crates re-exported here:
//! * [`sfxkit-core`](sfxkit_core) — reflection data model, Parquet I/O, resolution
//!   binning, and the MPI layer;
//! * [`sfxkit-metrics`](sfxkit_metrics) — the binned merge statistics;
//! * [`sfxkit-pipeline`](sfxkit_pipeline) — log parsers, convergence tracking, figure
//!   rendering, simulation-batch orchestration, and the command-line tools.
//!
//! # MPI Support
//!
//! Build with the `mpi` feature (requires an MPI implementation such as OpenMPI or
//! MPICH) and bracket your program with [`mpi::use_mpi`] and [`mpi::finalize_mpi`]:
//! ```ignore
//! fn main() {
//!     sfxkit::mpi::use_mpi(true);
//!     // analysis code here
//!     sfxkit::mpi::finalize_mpi();
//! }
//! ```
#![warn(clippy::perf, clippy::style)]

pub use sfxkit_core::{
    binning::ResolutionBinner,
    cell::{Orientation, UnitCell},
    data::{io::read_parquet, io::write_parquet, MillerIndex, Reflection, ReflectionSet},
    mpi, utils, SfxError, SfxResult,
};

pub use sfxkit_metrics::{
    anomalous_differences, completeness, cross_correlation, i_over_sigma, pearson_r, r1_factor,
    shell_pairs, BinRow, BinnedStatistic, CorrelationSums, StatKind,
};

pub use sfxkit_pipeline::{
    convergence::{track_convergence, ConvergenceOptions, ConvergenceSeries, StepScatter},
    figures,
    logs::events::{Event, EventKind, JobRecord},
    logs::indexing::{IndexingStats, TimingBudget},
    logs::residuals::{DetectorResiduals, ResidualsTable},
    logs::sigma_z::SigmaZSeries,
    orchestrate::{run_batch, BatchPlan, BatchSummary, CommandSimulator, SimTask, Simulator},
    stage1::{compare_stage1, Stage1Comparison},
};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_the_public_api_composes() {
        let set = sfxkit_core::data::test_reflection_set();
        let binner = ResolutionBinner::new(3.5, 10.0, 2).unwrap();
        let table = cross_correlation(&set, &set, &binner);
        assert_relative_eq!(table.cumulative.value, 1.0, epsilon = 1e-12);
        assert_eq!(table.kind, StatKind::CrossCorrelation);
    }
}
