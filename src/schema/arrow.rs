// src/schema/arrow.rs

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::ColumnType;

/// Name of the provenance column every consolidated dataset carries.
pub const SOURCE_FILE_COLUMN: &str = "source_file";

/// Arrow encoding of a categorical column.
pub fn categorical_type() -> DataType {
    DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
}

/// Map a configured column type into an Arrow DataType.
///
/// - utf8        → Utf8
/// - int64       → Int64
/// - float64     → Float64
/// - categorical → Dictionary(Int32, Utf8)
/// - date        → Date32
pub fn map_to_arrow_type(ty: ColumnType) -> DataType {
    match ty {
        ColumnType::Utf8 => DataType::Utf8,
        ColumnType::Int64 => DataType::Int64,
        ColumnType::Float64 => DataType::Float64,
        ColumnType::Categorical => categorical_type(),
        ColumnType::Date => DataType::Date32,
    }
}

/// Inverse of [`map_to_arrow_type`]; anything unrecognised is treated as text.
pub fn column_type_of(dt: &DataType) -> ColumnType {
    match dt {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => ColumnType::Int64,
        DataType::Float32 | DataType::Float64 => ColumnType::Float64,
        DataType::Dictionary(_, _) => ColumnType::Categorical,
        DataType::Date32 | DataType::Date64 => ColumnType::Date,
        _ => ColumnType::Utf8,
    }
}

/// Build the output schema for a set of column names. Columns missing from
/// `types` are text; `source_file` is always categorical. Every field is
/// nullable because the merge is a schema union.
pub fn build_arrow_schema(
    names: &[String],
    types: &BTreeMap<String, ColumnType>,
) -> Arc<ArrowSchema> {
    let fields: Vec<ArrowField> = names
        .iter()
        .map(|name| {
            let dt = if name == SOURCE_FILE_COLUMN {
                categorical_type()
            } else {
                map_to_arrow_type(types.get(name).copied().unwrap_or_default())
            };
            ArrowField::new(name, dt, /* nullable = */ true)
        })
        .collect();

    Arc::new(ArrowSchema::new(fields))
}
