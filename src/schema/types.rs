// src/schema/types.rs

use serde::{Deserialize, Serialize};

/// Logical type of a consolidated column, as configured per entity in
/// `data_types`. Accepts the pandas-style spellings the parameter files use.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    #[serde(alias = "str", alias = "string", alias = "object")]
    Utf8,
    #[serde(alias = "int", alias = "integer", alias = "int32")]
    Int64,
    #[serde(alias = "float", alias = "double", alias = "float32")]
    Float64,
    #[serde(alias = "category")]
    Categorical,
    #[serde(alias = "datetime")]
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Utf8 => "utf8",
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Categorical => "categorical",
            ColumnType::Date => "date",
        }
    }
}
