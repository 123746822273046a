// src/store.rs

use anyhow::{bail, Context, Result};
use arrow::{
    array::{
        Array, ArrayRef, AsArray, Date32Array, DictionaryArray, Float64Array, Int64Array,
        StringArray,
    },
    compute::{cast, concat_batches},
    datatypes::{DataType, Date32Type, Field, Float64Type, Int32Type, Int64Type, Schema},
    record_batch::{RecordBatch, RecordBatchReader},
};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::properties::WriterProperties,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

use crate::dataset::EntityDataset;
use crate::schema::{arrow::column_type_of, map_to_arrow_type, ColumnType};

/// On-disk encoding of an entity's cache artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFormat {
    /// Parquet with the Arrow schema embedded, so categorical and date
    /// columns come back with their types.
    Columnar,
    /// bincode-serialised columns; for long free-text payloads.
    Object,
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Persist `dataset` at `path`, atomically via a temporary sibling file.
pub fn save(dataset: &EntityDataset, path: &Path, format: CacheFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp = tmp_path(path);
    match format {
        CacheFormat::Columnar => write_parquet(dataset, &tmp)?,
        CacheFormat::Object => write_object(dataset, &tmp)?,
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    info!("saved {} rows to {}", dataset.num_rows(), path.display());
    Ok(())
}

pub fn load(path: &Path, format: CacheFormat) -> Result<EntityDataset> {
    info!("loading {}...", path.display());
    let dataset = match format {
        CacheFormat::Columnar => read_parquet(path)?,
        CacheFormat::Object => read_object(path)?,
    };
    info!("loaded {} rows from {}", dataset.num_rows(), path.display());
    Ok(dataset)
}

// ─── columnar ────────────────────────────────────────────────────────────

fn write_parquet(dataset: &EntityDataset, path: &Path) -> Result<()> {
    let batch = dataset.batch();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(BufWriter::new(file), batch.schema(), Some(props))
        .context("creating Arrow writer for cache")?;
    writer.write(batch).context("writing cache batch")?;
    writer.close().context("closing cache writer")?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<EntityDataset> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata of {}", path.display()))?
        .build()
        .context("building parquet reader")?;
    let schema = reader.schema();
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading {}", path.display()))?;
    let batch = concat_batches(&schema, &batches).context("concatenating cache batches")?;
    Ok(EntityDataset::new(batch))
}

// ─── object ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
enum StoredValues {
    Utf8(Vec<Option<String>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
    Date(Vec<Option<i32>>),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredColumn {
    name: String,
    values: StoredValues,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTable {
    num_rows: usize,
    columns: Vec<StoredColumn>,
}

fn to_stored(arr: &ArrayRef) -> Result<StoredValues> {
    let ty = column_type_of(arr.data_type());
    Ok(match ty {
        ColumnType::Utf8 | ColumnType::Categorical => {
            let strings = cast(arr, &DataType::Utf8)?;
            let values = strings
                .as_string::<i32>()
                .iter()
                .map(|v| v.map(str::to_string))
                .collect();
            if ty == ColumnType::Utf8 {
                StoredValues::Utf8(values)
            } else {
                StoredValues::Categorical(values)
            }
        }
        ColumnType::Int64 => {
            let ints = cast(arr, &DataType::Int64)?;
            StoredValues::Int64(ints.as_primitive::<Int64Type>().iter().collect())
        }
        ColumnType::Float64 => {
            let floats = cast(arr, &DataType::Float64)?;
            StoredValues::Float64(floats.as_primitive::<Float64Type>().iter().collect())
        }
        ColumnType::Date => {
            let dates = cast(arr, &DataType::Date32)?;
            StoredValues::Date(dates.as_primitive::<Date32Type>().iter().collect())
        }
    })
}

fn from_stored(values: StoredValues) -> (ArrayRef, ColumnType) {
    match values {
        StoredValues::Utf8(v) => (Arc::new(StringArray::from(v)), ColumnType::Utf8),
        StoredValues::Int64(v) => (Arc::new(Int64Array::from(v)), ColumnType::Int64),
        StoredValues::Float64(v) => (Arc::new(Float64Array::from(v)), ColumnType::Float64),
        StoredValues::Date(v) => (Arc::new(Date32Array::from(v)), ColumnType::Date),
        StoredValues::Categorical(v) => {
            let dict: DictionaryArray<Int32Type> = v.iter().map(|s| s.as_deref()).collect();
            (Arc::new(dict), ColumnType::Categorical)
        }
    }
}

fn write_object(dataset: &EntityDataset, path: &Path) -> Result<()> {
    let batch = dataset.batch();
    let schema = batch.schema();
    let columns = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, arr)| {
            Ok(StoredColumn {
                name: field.name().clone(),
                values: to_stored(arr)
                    .with_context(|| format!("encoding column `{}`", field.name()))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let table = StoredTable {
        num_rows: batch.num_rows(),
        columns,
    };

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    bincode::serialize_into(BufWriter::new(file), &table)
        .with_context(|| format!("serializing {}", path.display()))?;
    Ok(())
}

fn read_object(path: &Path) -> Result<EntityDataset> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let table: StoredTable = bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("deserializing {}", path.display()))?;

    let mut fields = Vec::with_capacity(table.columns.len());
    let mut arrays = Vec::with_capacity(table.columns.len());
    for col in table.columns {
        let (arr, ty) = from_stored(col.values);
        if arr.len() != table.num_rows {
            bail!(
                "column `{}` of {} has {} values, expected {}",
                col.name,
                path.display(),
                arr.len(),
                table.num_rows
            );
        }
        fields.push(Field::new(col.name, map_to_arrow_type(ty), true));
        arrays.push(arr);
    }

    let batch = if arrays.is_empty() {
        RecordBatch::new_empty(Arc::new(Schema::new(fields)))
    } else {
        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
            .with_context(|| format!("rebuilding {}", path.display()))?
    };
    Ok(EntityDataset::new(batch))
}
