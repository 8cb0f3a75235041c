use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeListArray, ListArray,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::model::{MetadataValue, SimulationSample, SimulationSet};
use crate::error::FormatError;
use crate::spectrum::WavelengthGrid;

// ---------------------------------------------------------------------------
// Table schema
// ---------------------------------------------------------------------------

/// Column names of a simulation table.
///
/// The five list columns hold one curve per row. `params` names the scalar
/// columns fed to the emulator; when empty, every numeric scalar column is
/// a parameter (in column order, which for JSON is alphabetical). Other
/// scalar columns are kept as metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSchema {
    pub lam_att: String,
    pub att: String,
    pub stellar: String,
    pub lam_em: String,
    pub em: String,
    pub params: Vec<String>,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            lam_att: "lam_att".into(),
            att: "att".into(),
            stellar: "l_star".into(),
            lam_em: "lam_em".into(),
            em: "em".into(),
            params: Vec::new(),
        }
    }
}

impl TableSchema {
    fn is_list_column(&self, name: &str) -> bool {
        [&self.lam_att, &self.att, &self.stellar, &self.lam_em, &self.em]
            .iter()
            .any(|c| c.as_str() == name)
    }
}

/// Arrow schema metadata key holding the JSON list of parameter columns,
/// written by [`write_parquet`](super::writer::write_parquet).
pub(crate) const PARAMS_METADATA_KEY: &str = "starduster.params";

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a simulation table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – list columns for the curves, scalar columns for the rest
/// * `.json`    – `[{ "lam_att": [...], "att": [...], ..., "tau": 0.3 }, ...]`
/// * `.csv`     – list columns hold semicolon-separated floats
pub fn load_file(path: &Path, schema: &TableSchema) -> Result<SimulationSet, FormatError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let (records, stored_params) = match ext.as_str() {
        "parquet" | "pq" => read_parquet(path)?,
        "json" => (read_json(path)?, None),
        "csv" => (read_csv(path, schema)?, None),
        other => return Err(FormatError::UnsupportedExtension(other.to_string())),
    };

    // A parameter list stored in the file beats auto-detection.
    let resolved;
    let schema = match stored_params {
        Some(params) if schema.params.is_empty() => {
            resolved = TableSchema {
                params,
                ..schema.clone()
            };
            &resolved
        }
        _ => schema,
    };
    let set = assemble(records, schema)?;
    log::info!(
        "Loaded {} samples from {} ({} parameters, {}+{} wavelengths)",
        set.len(),
        path.display(),
        set.n_params(),
        set.att_grid.len(),
        set.em_grid.len()
    );
    Ok(set)
}

/// One row before validation: list cells and scalar cells in column order.
#[derive(Debug, Default)]
struct RawRecord {
    lists: BTreeMap<String, Vec<f64>>,
    scalars: Vec<(String, MetadataValue)>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> FormatError + '_ {
    move |source| FormatError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// JSON reader
// ---------------------------------------------------------------------------

/// Records-oriented JSON (`df.to_json(orient='records')`). Array cells are
/// curves, everything else is a scalar.
fn read_json(path: &Path) -> Result<Vec<RawRecord>, FormatError> {
    let text = std::fs::read_to_string(path).map_err(io_error(path))?;
    parse_json(&text)
}

fn parse_json(text: &str) -> Result<Vec<RawRecord>, FormatError> {
    let root: JsonValue = serde_json::from_str(text)?;
    let rows = root.as_array().ok_or(FormatError::NotARecordArray)?;

    rows.iter()
        .enumerate()
        .map(|(row, rec)| -> Result<RawRecord, FormatError> {
            let obj = rec.as_object().ok_or(FormatError::NotARecordArray)?;
            let mut record = RawRecord::default();
            for (key, val) in obj {
                match val {
                    JsonValue::Array(items) => {
                        let values = items
                            .iter()
                            .enumerate()
                            .map(|(index, v)| {
                                v.as_f64().ok_or_else(|| FormatError::NotANumber {
                                    row,
                                    column: key.clone(),
                                    index,
                                    value: v.to_string(),
                                })
                            })
                            .collect::<Result<Vec<f64>, _>>()?;
                        record.lists.insert(key.clone(), values);
                    }
                    other => record.scalars.push((key.clone(), json_to_metadata(other))),
                }
            }
            Ok(record)
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => MetadataValue::Integer(i),
            None => n
                .as_f64()
                .map(MetadataValue::Float)
                .unwrap_or_else(|| MetadataValue::String(n.to_string())),
        },
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV reader
// ---------------------------------------------------------------------------

/// Header row with column names; the schema's list columns contain
/// semicolon-separated floats (`"0.1;0.2;0.5"`).
fn read_csv(path: &Path, schema: &TableSchema) -> Result<Vec<RawRecord>, FormatError> {
    let file = std::fs::File::open(path).map_err(io_error(path))?;
    parse_csv(file, schema)
}

fn parse_csv<R: std::io::Read>(
    input: R,
    schema: &TableSchema,
) -> Result<Vec<RawRecord>, FormatError> {
    let mut reader = csv::Reader::from_reader(input);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let line = result?;
        let mut record = RawRecord::default();
        for (col, cell) in headers.iter().zip(line.iter()) {
            if schema.is_list_column(col) {
                record
                    .lists
                    .insert(col.clone(), parse_semicolon_floats(cell, row, col)?);
            } else {
                record.scalars.push((col.clone(), guess_metadata_type(cell)));
            }
        }
        records.push(record);
    }
    Ok(records)
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>, FormatError> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(index, tok)| {
            tok.trim()
                .parse::<f64>()
                .map_err(|_| FormatError::NotANumber {
                    row,
                    column: col.to_string(),
                    index,
                    value: tok.to_string(),
                })
        })
        .collect()
}

fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    if s == "true" || s == "false" {
        return MetadataValue::Bool(s == "true");
    }
    MetadataValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet reader
// ---------------------------------------------------------------------------

/// List<Float64|Float32> columns (List or LargeList) become curves; other
/// columns are scalars. Works with files from Pandas and Polars alike.
fn read_parquet(path: &Path) -> Result<(Vec<RawRecord>, Option<Vec<String>>), FormatError> {
    let file = std::fs::File::open(path).map_err(io_error(path))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let stored_params = builder
        .schema()
        .metadata()
        .get(PARAMS_METADATA_KEY)
        .map(|text| serde_json::from_str::<Vec<String>>(text))
        .transpose()?;
    let reader = builder.build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let schema = batch.schema();
        for row in 0..batch.num_rows() {
            let mut record = RawRecord::default();
            for (field, col) in schema.fields().iter().zip(batch.columns()) {
                match col.data_type() {
                    DataType::List(_) | DataType::LargeList(_) => {
                        record
                            .lists
                            .insert(field.name().clone(), extract_f64_list(col, row, field.name())?);
                    }
                    _ => record
                        .scalars
                        .push((field.name().clone(), extract_metadata_value(col, row))),
                }
            }
            records.push(record);
        }
    }
    Ok((records, stored_params))
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
/// Null list entries become NaN and are rejected later.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize, name: &str) -> Result<Vec<f64>, FormatError> {
    if col.is_null(row) {
        return Ok(Vec::new());
    }
    let values = if let Some(list) = col.as_any().downcast_ref::<ListArray>() {
        list.value(row)
    } else if let Some(list) = col.as_any().downcast_ref::<LargeListArray>() {
        list.value(row)
    } else {
        return Ok(Vec::new());
    };

    if let Some(arr) = values.as_any().downcast_ref::<Float64Array>() {
        Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(arr) = values.as_any().downcast_ref::<Float32Array>() {
        Ok(arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect())
    } else {
        Err(FormatError::NotANumber {
            row,
            column: name.to_string(),
            index: 0,
            value: format!("{:?}", values.data_type()),
        })
    }
}

/// Extract a single scalar from an Arrow column at a given row.
fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    match col.data_type() {
        DataType::Utf8 => MetadataValue::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => MetadataValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row) as i64)),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row) as f64)),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Bool(a.value(row))),
        other => MetadataValue::String(format!("{other:?}")),
    }
}

// ---------------------------------------------------------------------------
// Validation: raw rows → SimulationSet
// ---------------------------------------------------------------------------

fn assemble(records: Vec<RawRecord>, schema: &TableSchema) -> Result<SimulationSet, FormatError> {
    let first = records.first().ok_or(FormatError::Empty)?;

    let param_names: Vec<String> = if schema.params.is_empty() {
        first
            .scalars
            .iter()
            .filter(|(_, v)| v.as_f64().is_some())
            .map(|(k, _)| k.clone())
            .collect()
    } else {
        schema.params.clone()
    };
    if param_names.is_empty() {
        return Err(FormatError::NoParameters);
    }

    let att_grid = read_grid(first, &schema.lam_att)?;
    let em_grid = read_grid(first, &schema.lam_em)?;

    let mut samples = Vec::with_capacity(records.len());
    for (row, mut rec) in records.into_iter().enumerate() {
        check_grid(&mut rec, row, &schema.lam_att, &att_grid)?;
        check_grid(&mut rec, row, &schema.lam_em, &em_grid)?;

        let attenuation = take_curve(&mut rec, row, &schema.att, att_grid.len(), false)?;
        let stellar = take_curve(&mut rec, row, &schema.stellar, att_grid.len(), true)?;
        let emission = take_curve(&mut rec, row, &schema.em, em_grid.len(), true)?;

        let params = param_names
            .iter()
            .map(|name| {
                let (_, value) = rec
                    .scalars
                    .iter()
                    .find(|(k, _)| k == name)
                    .ok_or_else(|| FormatError::MissingColumn {
                        row,
                        column: name.clone(),
                    })?;
                value
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| FormatError::InvalidParameter {
                        row,
                        column: name.clone(),
                    })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let metadata = rec
            .scalars
            .into_iter()
            .filter(|(k, _)| !param_names.contains(k))
            .collect();

        samples.push(SimulationSample {
            params,
            attenuation,
            stellar,
            emission,
            metadata,
        });
    }

    Ok(SimulationSet::from_samples(
        param_names,
        att_grid,
        em_grid,
        samples,
    ))
}

fn read_grid(rec: &RawRecord, column: &str) -> Result<WavelengthGrid, FormatError> {
    let values = rec.lists.get(column).ok_or_else(|| FormatError::MissingColumn {
        row: 0,
        column: column.to_string(),
    })?;
    WavelengthGrid::new(values.clone()).map_err(|_| FormatError::InvalidGrid {
        column: column.to_string(),
    })
}

fn check_grid(
    rec: &mut RawRecord,
    row: usize,
    column: &str,
    grid: &WavelengthGrid,
) -> Result<(), FormatError> {
    let values = rec
        .lists
        .remove(column)
        .ok_or_else(|| FormatError::MissingColumn {
            row,
            column: column.to_string(),
        })?;
    if values.len() != grid.len() {
        return Err(FormatError::DimensionMismatch {
            row,
            column: column.to_string(),
            expected: grid.len(),
            found: values.len(),
        });
    }
    if values.as_slice() != grid.wavelengths() {
        return Err(FormatError::GridMismatch {
            row,
            column: column.to_string(),
        });
    }
    Ok(())
}

fn take_curve(
    rec: &mut RawRecord,
    row: usize,
    column: &str,
    expected: usize,
    non_negative: bool,
) -> Result<Vec<f64>, FormatError> {
    let values = rec
        .lists
        .remove(column)
        .ok_or_else(|| FormatError::MissingColumn {
            row,
            column: column.to_string(),
        })?;
    if values.len() != expected {
        return Err(FormatError::DimensionMismatch {
            row,
            column: column.to_string(),
            expected,
            found: values.len(),
        });
    }
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(FormatError::NonFinite {
                row,
                column: column.to_string(),
                index,
            });
        }
        if non_negative && value < 0.0 {
            return Err(FormatError::NegativeLuminosity {
                row,
                column: column.to_string(),
                index,
                value,
            });
        }
    }
    Ok(values)
}
