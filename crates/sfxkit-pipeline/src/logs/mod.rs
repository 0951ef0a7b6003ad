//! Parsers for the text files the pipeline stages leave behind: per-rank stage-2 event
//! logs, scheduler out-files, per-image processing debug records, sigmaZ progress lines,
//! and detector-residuals reports.
//!
//! All of them are parsed leniently with plain string handling: lines that do not match
//! the expected shape are skipped and counted, never fatal, because real batch logs
//! interleave these records with arbitrary library chatter.

/// Stage-2 event timestamps and job records.
pub mod events;
/// Per-image indexing analytics from processing debug records.
pub mod indexing;
/// Detector-residuals report tables.
pub mod residuals;
/// sigmaZ mean/median progress series.
pub mod sigma_z;
