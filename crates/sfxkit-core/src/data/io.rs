//! Reflection-table I/O.
//!
//! Merged reflection data enters and leaves the toolkit as Parquet tables with integer
//! `h`, `k`, `l` columns, a value column (`F`, `I`, or `value`), an optional sigma column
//! (`SIGF`, `SIGI`, or `sigma`), and the unit-cell parameters carried in the file's
//! key-value metadata (`cell.a` through `cell.gamma`). The upstream pipeline converts the
//! toolkit-owned containers (MTZ, NPZ) into this layout.

use super::*;
use arrow::array::{ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::{SfxError, SfxResult};

const VALUE_COLUMNS: &[&str] = &["F", "I", "value"];
const SIGMA_COLUMNS: &[&str] = &["SIGF", "SIGI", "sigma"];
const CELL_KEYS: &[&str] = &[
    "cell.a",
    "cell.b",
    "cell.c",
    "cell.alpha",
    "cell.beta",
    "cell.gamma",
];

fn canonicalize_input_path(file_path: &str) -> SfxResult<PathBuf> {
    Ok(Path::new(&*shellexpand::full(file_path)?).canonicalize()?)
}

fn expand_output_path(file_path: &str) -> SfxResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// Load a [`ReflectionSet`] from a Parquet reflection table.
pub fn read_parquet(file_path: &str) -> SfxResult<Arc<ReflectionSet>> {
    let path = canonicalize_input_path(file_path)?;
    let file = File::open(&path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let cell = cell_from_metadata(
        builder.metadata().file_metadata().key_value_metadata(),
        &path,
    )?;
    let schema = builder.schema().clone();
    let has_column = |name: &str| schema.fields().iter().any(|f| f.name() == name);
    let value_name = VALUE_COLUMNS
        .iter()
        .copied()
        .find(|name| has_column(name))
        .ok_or_else(|| SfxError::ColumnError {
            name: VALUE_COLUMNS.join("/"),
        })?;
    let sigma_name = SIGMA_COLUMNS.iter().copied().find(|name| has_column(name));

    let reader = builder.build()?;
    let mut reflections = Vec::new();
    for batch in reader {
        let batch = batch?;
        let h = int_column(&batch, "h")?;
        let k = int_column(&batch, "k")?;
        let l = int_column(&batch, "l")?;
        let values = float_column(&batch, value_name)?;
        let sigmas = match sigma_name {
            Some(name) => float_column(&batch, name)?,
            None => vec![0.0; batch.num_rows()],
        };
        let batch_start = reflections.len();
        for (row, (((&h, &k), &l), (&value, &sigma))) in h
            .iter()
            .zip(&k)
            .zip(&l)
            .zip(values.iter().zip(&sigmas))
            .enumerate()
        {
            if !value.is_finite() || !sigma.is_finite() {
                return Err(SfxError::ParseError {
                    name: format!("row {} of {}", batch_start + row, path.display()),
                    object: "finite reflection value".to_string(),
                });
            }
            reflections.push(Reflection::new(MillerIndex::new(h, k, l), value, sigma));
        }
    }
    Ok(Arc::new(ReflectionSet::new(cell, reflections)))
}

/// Write a [`ReflectionSet`] as a Parquet reflection table (columns `h,k,l,F,SIGF` and the
/// unit cell in key-value metadata).
pub fn write_parquet(set: &ReflectionSet, file_path: &str) -> SfxResult<()> {
    let path = expand_output_path(file_path)?;
    let file = File::create(&path)?;
    let schema = Arc::new(Schema::new(vec![
        Field::new("h", DataType::Int32, false),
        Field::new("k", DataType::Int32, false),
        Field::new("l", DataType::Int32, false),
        Field::new("F", DataType::Float64, false),
        Field::new("SIGF", DataType::Float64, false),
    ]));
    let cell = set.cell();
    let metadata = CELL_KEYS
        .iter()
        .zip(cell.parameters())
        .map(|(key, value)| KeyValue::new((*key).to_string(), value.to_string()))
        .collect::<Vec<_>>();
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(metadata))
        .build();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int32Array::from_iter_values(set.iter().map(|r| r.hkl.h))) as ArrayRef,
            Arc::new(Int32Array::from_iter_values(set.iter().map(|r| r.hkl.k))),
            Arc::new(Int32Array::from_iter_values(set.iter().map(|r| r.hkl.l))),
            Arc::new(Float64Array::from_iter_values(set.iter().map(|r| r.value))),
            Arc::new(Float64Array::from_iter_values(set.iter().map(|r| r.sigma))),
        ],
    )?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Recover a [`UnitCell`] from a Parquet file's `cell.*` key-value metadata.
pub fn cell_from_metadata(
    key_value_metadata: Option<&Vec<KeyValue>>,
    path: &Path,
) -> SfxResult<UnitCell> {
    let entries = key_value_metadata.ok_or_else(|| SfxError::Custom(format!(
        "reflection table {} lacks unit-cell metadata",
        path.display()
    )))?;
    let mut parameters = [0.0f64; 6];
    for (slot, key) in parameters.iter_mut().zip(CELL_KEYS) {
        let value = entries
            .iter()
            .find(|kv| kv.key == *key)
            .and_then(|kv| kv.value.as_deref())
            .ok_or_else(|| SfxError::Custom(format!(
                "reflection table {} lacks unit-cell metadata \"{}\"",
                path.display(),
                key
            )))?;
        *slot = value.parse().map_err(|_| SfxError::ParseError {
            name: value.to_string(),
            object: "unit-cell parameter".to_string(),
        })?;
    }
    UnitCell::new(
        parameters[0],
        parameters[1],
        parameters[2],
        parameters[3],
        parameters[4],
        parameters[5],
    )
}

/// Extract an integer column (`Int32` or `Int64`) as `i32` values.
pub fn int_column(batch: &RecordBatch, name: &str) -> SfxResult<Vec<i32>> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| SfxError::ColumnError {
            name: name.to_string(),
        })?;
    match column.data_type() {
        DataType::Int32 => {
            let array = column
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| downcast_error(name))?;
            Ok(array.values().to_vec())
        }
        DataType::Int64 => {
            let array = column
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| downcast_error(name))?;
            array
                .values()
                .iter()
                .map(|&v| {
                    i32::try_from(v).map_err(|_| SfxError::ParseError {
                        name: v.to_string(),
                        object: "32-bit Miller index".to_string(),
                    })
                })
                .collect()
        }
        other => Err(SfxError::ParseError {
            name: format!("{other}"),
            object: format!("integer column \"{name}\""),
        }),
    }
}

/// Extract a float column (`Float32` or `Float64`) as `f64` values.
pub fn float_column(batch: &RecordBatch, name: &str) -> SfxResult<Vec<f64>> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| SfxError::ColumnError {
            name: name.to_string(),
        })?;
    match column.data_type() {
        DataType::Float64 => {
            let array = column
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| downcast_error(name))?;
            Ok(array.values().to_vec())
        }
        DataType::Float32 => {
            let array = column
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| downcast_error(name))?;
            Ok(array.values().iter().map(|&v| v as f64).collect())
        }
        other => Err(SfxError::ParseError {
            name: format!("{other}"),
            object: format!("float column \"{name}\""),
        }),
    }
}

fn downcast_error(name: &str) -> SfxError {
    SfxError::Custom(format!("column \"{name}\" does not match its declared type"))
}
