//! # sfxkit-metrics
//!
//! Merge-quality statistics over reflection tables: completeness, I/sigI, R1, CC1/2, and
//! Pearson correlation, each evaluated over resolution shells and summarized in the binned
//! tables the evaluation tools print.
#![warn(clippy::perf, clippy::style)]

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use sfxkit_core::SfxError;

/// Anomalous-difference construction from Friedel mates.
pub mod anomalous;
/// Binned statistic tables and shell-wise pair collection.
pub mod binned;
/// Shell completeness against theoretical lattice counts.
pub mod completeness;
/// Correlation accumulators, CC1/2, and Pearson's r.
pub mod correlation;
/// Mean I/sigI per shell.
pub mod intensity;
/// R1 residual against a reference set.
pub mod rfactor;

pub use anomalous::anomalous_differences;
pub use binned::{shell_pairs, BinRow, BinnedStatistic};
pub use completeness::completeness;
pub use correlation::{cross_correlation, pearson_r, CorrelationSums};
pub use intensity::i_over_sigma;
pub use rfactor::r1_factor;

/// The statistics the evaluation tools know how to compute.
///
/// The set is closed, so one enum carries the dispatch, the table labels, and the
/// anomalous-difference flag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatKind {
    /// Observed fraction of the theoretical lattice per shell.
    Completeness,
    /// Mean value-over-sigma per shell.
    IOverSigma,
    /// R1 residual against a reference set.
    R1,
    /// Cross-correlation (CC1/2 when fed half-dataset merges).
    CrossCorrelation,
    /// Pearson's r against a reference set.
    PearsonR,
    /// Cross-correlation of anomalous differences.
    CrossCorrelationAnom,
    /// Pearson's r of anomalous differences.
    PearsonRAnom,
}

impl StatKind {
    /// Whether the statistic is computed on anomalous differences rather than amplitudes.
    pub const fn anomalous_differences(&self) -> bool {
        matches!(self, Self::CrossCorrelationAnom | Self::PearsonRAnom)
    }

    /// The table column label used when printing.
    pub const fn column_label(&self) -> &'static str {
        match self {
            Self::Completeness => "cplt",
            Self::IOverSigma => "I/sigI",
            Self::R1 => "R1",
            Self::CrossCorrelation => "cc1/2",
            Self::PearsonR => "PearsonR",
            Self::CrossCorrelationAnom => "cc_anom",
            Self::PearsonRAnom => "PearsonR_anom",
        }
    }

    /// Fractions are printed as percentages, residuals and means as plain numbers.
    pub const fn as_percentage(&self) -> bool {
        matches!(
            self,
            Self::Completeness | Self::CrossCorrelation | Self::CrossCorrelationAnom
        )
    }
}

impl Display for StatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completeness => write!(f, "completeness"),
            Self::IOverSigma => write!(f, "i-over-sigma"),
            Self::R1 => write!(f, "r1"),
            Self::CrossCorrelation => write!(f, "cc"),
            Self::PearsonR => write!(f, "pearson"),
            Self::CrossCorrelationAnom => write!(f, "cc-anom"),
            Self::PearsonRAnom => write!(f, "pearson-anom"),
        }
    }
}

impl FromStr for StatKind {
    type Err = SfxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cplt" | "completeness" => Ok(Self::Completeness),
            "i/si" | "i-over-sigma" | "i_over_si" | "i/sigi" => Ok(Self::IOverSigma),
            "r" | "r1" | "riso" => Ok(Self::R1),
            "cc" | "cc1/2" | "cc_gt" | "cc-gt" => Ok(Self::CrossCorrelation),
            "pearson" | "pearsonr" | "pearsonr_gt" | "pearson-gt" => Ok(Self::PearsonR),
            "cc_anom" | "cc-anom" => Ok(Self::CrossCorrelationAnom),
            "pearsonr_anom" | "pearson-anom" => Ok(Self::PearsonRAnom),
            _ => Err(SfxError::ParseError {
                name: s.to_string(),
                object: "StatKind".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_kind_round_trips_through_strings() {
        for kind in [
            StatKind::Completeness,
            StatKind::IOverSigma,
            StatKind::R1,
            StatKind::CrossCorrelation,
            StatKind::PearsonR,
            StatKind::CrossCorrelationAnom,
            StatKind::PearsonRAnom,
        ] {
            assert_eq!(kind.to_string().parse::<StatKind>().unwrap(), kind);
        }
        assert_eq!("PearsonR_gt".parse::<StatKind>().unwrap(), StatKind::PearsonR);
        assert!("sigma".parse::<StatKind>().is_err());
    }

    #[test]
    fn test_anomalous_flag_follows_the_variant() {
        assert!(StatKind::CrossCorrelationAnom.anomalous_differences());
        assert!(StatKind::PearsonRAnom.anomalous_differences());
        assert!(!StatKind::PearsonR.anomalous_differences());
    }
}
