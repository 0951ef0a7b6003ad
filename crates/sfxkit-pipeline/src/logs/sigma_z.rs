use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use sfxkit_core::SfxResult;

/// The per-iteration sigmaZ progress of one stage-2 job, in the order the refiner logged
/// it. Unparseable numbers keep their iteration slot as `NaN` so curves stay aligned.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigmaZSeries {
    pub job: String,
    pub means: Vec<f64>,
    pub medians: Vec<f64>,
}

impl SigmaZSeries {
    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }
}

/// Extract the `sigmaZ: mean=<m>, median=<d>` progress lines from a stage-2 error file.
/// The job id is the file stem.
pub fn scan_err_file(path: &Path) -> SfxResult<SigmaZSeries> {
    let text = fs::read_to_string(path)?;
    let job = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());
    let mut means = Vec::new();
    let mut medians = Vec::new();
    for line in text.lines() {
        let Some((_, rest)) = line.split_once("sigmaZ: mean=") else {
            continue;
        };
        let (mean_str, median_str) = match rest.split_once(", median=") {
            Some((m, d)) => (m, d),
            None => (rest, ""),
        };
        means.push(mean_str.trim().parse().unwrap_or(f64::NAN));
        medians.push(median_str.trim().parse().unwrap_or(f64::NAN));
    }
    Ok(SigmaZSeries { job, means, medians })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_progress_lines_are_extracted_in_order() {
        let dir = std::env::temp_dir().join(format!("sfxkit-sigmaz-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("8012345.err");
        fs::write(
            &path,
            "some banner\n\
             iteration 0 sigmaZ: mean=2.31, median=1.95\n\
             unrelated chatter\n\
             iteration 1 sigmaZ: mean=1.70, median=1.44\n\
             iteration 2 sigmaZ: mean=bogus, median=1.20\n",
        )
        .unwrap();
        let series = scan_err_file(&path).unwrap();
        assert_eq!(series.job, "8012345");
        assert_eq!(series.len(), 3);
        assert_relative_eq!(series.means[0], 2.31);
        assert_relative_eq!(series.medians[1], 1.44);
        assert!(series.means[2].is_nan());
        assert_relative_eq!(series.medians[2], 1.20);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_without_progress_lines_is_empty() {
        let dir = std::env::temp_dir().join(format!("sfxkit-sigmaz2-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("quiet.err");
        fs::write(&path, "nothing to see\n").unwrap();
        assert!(scan_err_file(&path).unwrap().is_empty());
        fs::remove_dir_all(&dir).ok();
    }
}
