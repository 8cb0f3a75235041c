use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Array, Float64Builder, Int64Builder, ListBuilder,
    StringBuilder,
};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use super::loader::{TableSchema, PARAMS_METADATA_KEY};
use super::model::{MetadataValue, SimulationSet};
use crate::error::FormatError;

/// Write `set` as a Parquet table readable by [`load_file`] with the same
/// `schema`.
///
/// Curves become `List<Float64>` columns, parameters `Float64` columns.
/// A metadata column keeps its type when every value shares one variant and
/// is written as text otherwise. The parameter list is stored in the schema
/// metadata, so numeric metadata is not mistaken for a parameter on load.
///
/// [`load_file`]: super::loader::load_file
pub fn write_parquet(set: &SimulationSet, path: &Path, schema: &TableSchema) -> Result<(), FormatError> {
    let mut names: Vec<&str> = Vec::new();
    let mut columns: Vec<ArrayRef> = Vec::new();

    let n = set.len();
    let curves: [(&str, Vec<&[f64]>); 5] = [
        (schema.lam_att.as_str(), vec![set.att_grid.wavelengths(); n]),
        (schema.att.as_str(), set.samples.iter().map(|s| s.attenuation.as_slice()).collect()),
        (schema.stellar.as_str(), set.samples.iter().map(|s| s.stellar.as_slice()).collect()),
        (schema.lam_em.as_str(), vec![set.em_grid.wavelengths(); n]),
        (schema.em.as_str(), set.samples.iter().map(|s| s.emission.as_slice()).collect()),
    ];
    for (name, rows) in curves {
        let mut builder = ListBuilder::new(Float64Builder::new());
        for row in rows {
            builder.values().append_slice(row);
            builder.append(true);
        }
        names.push(name);
        columns.push(Arc::new(builder.finish()));
    }

    for (k, name) in set.param_names.iter().enumerate() {
        let values: Vec<f64> = set.samples.iter().map(|s| s.params[k]).collect();
        names.push(name.as_str());
        columns.push(Arc::new(Float64Array::from(values)));
    }

    for name in &set.column_names {
        names.push(name.as_str());
        columns.push(metadata_column(set, name));
    }

    let fields: Vec<Field> = names
        .iter()
        .zip(&columns)
        .map(|(name, col)| Field::new(*name, col.data_type().clone(), true))
        .collect();
    let params = serde_json::to_string(&set.param_names)?;
    let arrow_schema = Arc::new(
        Schema::new(fields).with_metadata(HashMap::from([(PARAMS_METADATA_KEY.to_string(), params)])),
    );
    let batch = RecordBatch::try_new(arrow_schema.clone(), columns)?;

    let file = std::fs::File::create(path).map_err(|source| FormatError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = ArrowWriter::try_new(file, arrow_schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    log::info!("Wrote {} samples to {}", set.len(), path.display());
    Ok(())
}

#[derive(PartialEq)]
enum ColumnKind {
    Text,
    Integer,
    Float,
    Bool,
}

fn metadata_column(set: &SimulationSet, name: &str) -> ArrayRef {
    let values: Vec<Option<&MetadataValue>> = set
        .samples
        .iter()
        .map(|s| s.metadata.get(name).filter(|v| **v != MetadataValue::Null))
        .collect();

    let kinds: Vec<ColumnKind> = values
        .iter()
        .flatten()
        .map(|v| match v {
            MetadataValue::Integer(_) => ColumnKind::Integer,
            MetadataValue::Float(_) => ColumnKind::Float,
            MetadataValue::Bool(_) => ColumnKind::Bool,
            _ => ColumnKind::Text,
        })
        .collect();
    let kind = match kinds.first() {
        Some(first) if kinds.iter().all(|k| k == first) => first,
        _ => &ColumnKind::Text,
    };

    match kind {
        ColumnKind::Integer => {
            let mut b = Int64Builder::new();
            for v in &values {
                b.append_option(match v {
                    Some(MetadataValue::Integer(i)) => Some(*i),
                    _ => None,
                });
            }
            Arc::new(b.finish())
        }
        ColumnKind::Float => {
            let mut b = Float64Builder::new();
            for v in &values {
                b.append_option(v.and_then(MetadataValue::as_f64));
            }
            Arc::new(b.finish())
        }
        ColumnKind::Bool => {
            let mut b = BooleanBuilder::new();
            for v in &values {
                b.append_option(match v {
                    Some(MetadataValue::Bool(x)) => Some(*x),
                    _ => None,
                });
            }
            Arc::new(b.finish())
        }
        ColumnKind::Text => {
            let mut b = StringBuilder::new();
            for v in &values {
                match v {
                    Some(MetadataValue::String(s)) => b.append_value(s),
                    Some(other) => b.append_value(other.to_string()),
                    None => b.append_null(),
                }
            }
            Arc::new(b.finish())
        }
    }
}
