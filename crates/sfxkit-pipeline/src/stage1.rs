//! Stage-1 refinement quality against ground truth.
//!
//! The per-shot stage-1 results are exported upstream as one Parquet table per job with
//! the refined setting matrix in row-major columns `a0`..`a8`, the ground-truth rotation
//! in `u0`..`u8`, and the nominal unit cell in the file's `cell.*` metadata. Each shot
//! contributes a misorientation angle (refined vs ground-truth orientation) and its
//! refined cell parameters.

use nalgebra::Matrix3;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};

use sfxkit_core::data::io::{cell_from_metadata, float_column};
use sfxkit_core::utils::{histogram, mean_and_std, median};
use sfxkit_core::{Orientation, SfxResult};

const CELL_LABELS: [(&str, &str); 6] = [
    ("a", "Ang"),
    ("b", "Ang"),
    ("c", "Ang"),
    ("al", "deg."),
    ("be", "deg."),
    ("ga", "deg."),
];

/// Per-shot misorientations and refined cells of one stage-1 job.
#[derive(Clone, Debug, Default)]
pub struct Stage1Comparison {
    pub misorientation_deg: Vec<f64>,
    pub cells: Vec<[f64; 6]>,
}

impl Stage1Comparison {
    pub fn len(&self) -> usize {
        self.misorientation_deg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.misorientation_deg.is_empty()
    }

    /// The printed results block: misorientation and per-parameter cell statistics plus a
    /// text histogram of the misorientation distribution.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "RESULTS ({} shots)", self.len());
        if let (Some(med), Some((mean, std))) = (
            median(&self.misorientation_deg),
            mean_and_std(&self.misorientation_deg),
        ) {
            let _ = writeln!(
                out,
                "misorientation: median, mean, stdev = {med:.4}, {mean:.4}, {std:.4} (deg.)"
            );
        }
        let _ = writeln!(out, "unit cell:");
        for (i, (label, unit)) in CELL_LABELS.iter().enumerate() {
            let values: Vec<f64> = self.cells.iter().map(|c| c[i]).collect();
            if let (Some(med), Some((mean, std))) = (median(&values), mean_and_std(&values)) {
                let _ = writeln!(
                    out,
                    "  {label}: median, mean, stdev = {med:.4}, {mean:.4}, {std:.4} ({unit})"
                );
            }
        }
        if let Some(&max) = self
            .misorientation_deg
            .iter()
            .max_by(|a, b| a.total_cmp(b))
        {
            let upper = (max * 1.05).max(1e-3);
            let hist = histogram(&self.misorientation_deg, 10, (0.0, upper));
            let peak = hist.counts.iter().copied().max().unwrap_or(1).max(1);
            let _ = writeln!(out, "misorientation distribution (deg.):");
            for (i, count) in hist.counts.iter().enumerate() {
                let bar = "#".repeat((count * 40).div_ceil(peak).min(40));
                let _ = writeln!(
                    out,
                    "  [{:6.3}, {:6.3}) {:>6} {bar}",
                    hist.bin_edges[i],
                    hist.bin_edges[i + 1],
                    count
                );
            }
        }
        out
    }
}

fn matrix_from_columns(columns: &[Vec<f64>; 9], row: usize) -> Matrix3<f64> {
    Matrix3::new(
        columns[0][row],
        columns[1][row],
        columns[2][row],
        columns[3][row],
        columns[4][row],
        columns[5][row],
        columns[6][row],
        columns[7][row],
        columns[8][row],
    )
}

/// Compare a stage-1 orientation table against its ground truth.
pub fn compare_stage1(table_path: &str) -> SfxResult<Stage1Comparison> {
    let path = PathBuf::from(&*shellexpand::full(table_path)?).canonicalize()?;
    compare_stage1_file(&path)
}

fn compare_stage1_file(path: &Path) -> SfxResult<Stage1Comparison> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let cell = cell_from_metadata(
        builder.metadata().file_metadata().key_value_metadata(),
        path,
    )?;
    let reader = builder.build()?;
    let mut comparison = Stage1Comparison::default();
    for batch in reader {
        let batch = batch?;
        let mut refined = Vec::with_capacity(9);
        let mut truth = Vec::with_capacity(9);
        for i in 0..9 {
            refined.push(float_column(&batch, &format!("a{i}"))?);
            truth.push(float_column(&batch, &format!("u{i}"))?);
        }
        let refined: [Vec<f64>; 9] = refined
            .try_into()
            .unwrap_or_else(|_| unreachable!("nine columns were just collected"));
        let truth: [Vec<f64>; 9] = truth
            .try_into()
            .unwrap_or_else(|_| unreachable!("nine columns were just collected"));
        for row in 0..batch.num_rows() {
            let refined_orientation =
                Orientation::from_setting_matrix(matrix_from_columns(&refined, row));
            let truth_orientation =
                Orientation::new(matrix_from_columns(&truth, row), &cell);
            comparison
                .misorientation_deg
                .push(refined_orientation.misorientation_deg(&truth_orientation)?);
            comparison
                .cells
                .push(refined_orientation.unit_cell()?.parameters());
        }
    }
    Ok(comparison)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use arrow::array::{ArrayRef, Float64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use nalgebra::Vector3;
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;
    use parquet::format::KeyValue;
    use sfxkit_core::UnitCell;
    use std::sync::Arc;

    fn write_table(path: &Path, cell: &UnitCell, setting: &[Matrix3<f64>], truth: &[Matrix3<f64>]) {
        let mut fields = Vec::new();
        let mut columns: Vec<ArrayRef> = Vec::new();
        for (prefix, matrices) in [("a", setting), ("u", truth)] {
            for i in 0..9 {
                fields.push(Field::new(format!("{prefix}{i}"), DataType::Float64, false));
                let values: Vec<f64> = matrices
                    .iter()
                    .map(|m| m[(i / 3, i % 3)])
                    .collect();
                columns.push(Arc::new(Float64Array::from(values)) as ArrayRef);
            }
        }
        let schema = Arc::new(Schema::new(fields));
        let metadata = ["cell.a", "cell.b", "cell.c", "cell.alpha", "cell.beta", "cell.gamma"]
            .iter()
            .zip(cell.parameters())
            .map(|(key, value)| KeyValue::new((*key).to_string(), value.to_string()))
            .collect::<Vec<_>>();
        let props = WriterProperties::builder()
            .set_key_value_metadata(Some(metadata))
            .build();
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, Some(props)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_known_misorientations_and_cells() {
        let dir = std::env::temp_dir().join(format!("sfxkit-stage1-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stage1.parquet");
        let cell = UnitCell::new(79.1, 79.1, 38.4, 90.0, 90.0, 90.0).unwrap();
        let b = cell.b_matrix();
        let rot =
            nalgebra::Rotation3::from_axis_angle(&Vector3::z_axis(), 2.0_f64.to_radians())
                .into_inner();
        write_table(
            &path,
            &cell,
            &[b, rot * b],
            &[Matrix3::identity(), Matrix3::identity()],
        );
        let comparison = compare_stage1(path.to_str().unwrap()).unwrap();
        assert_eq!(comparison.len(), 2);
        assert_relative_eq!(comparison.misorientation_deg[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(comparison.misorientation_deg[1], 2.0, epsilon = 1e-9);
        assert_relative_eq!(comparison.cells[1][0], 79.1, epsilon = 1e-6);
        assert_relative_eq!(comparison.cells[1][5], 90.0, epsilon = 1e-6);
        let summary = comparison.summary();
        assert!(summary.contains("RESULTS (2 shots)"));
        assert!(summary.contains("unit cell:"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
