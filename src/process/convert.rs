// src/process/convert.rs

use arrow::{
    array::{
        ArrayRef, Date32Builder, DictionaryArray, Float64Builder, Int64Builder, StringBuilder,
    },
    datatypes::{Date32Type, Int32Type},
};
use std::sync::Arc;

use super::{date_parser, utils};
use crate::schema::ColumnType;

/// A parsed, typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    /// Days since the Unix epoch.
    Date(i32),
}

impl Value {
    fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Parse one raw cell as `ty`. Empty cells are null; anything unparsable is
/// an `Err` describing the problem.
pub fn parse_value(ty: ColumnType, raw: &str) -> Result<Option<Value>, String> {
    let cleaned = utils::clean_str(raw);
    if cleaned.is_empty() {
        return Ok(None);
    }
    match ty {
        ColumnType::Utf8 | ColumnType::Categorical => Ok(Some(Value::Str(raw.to_string()))),
        ColumnType::Int64 => {
            let digits = cleaned.strip_suffix(".0").unwrap_or(cleaned);
            digits
                .parse::<i64>()
                .map(|v| Some(Value::Int(v)))
                .map_err(|_| format!("`{}` is not a valid {}", raw, ty.as_str()))
        }
        ColumnType::Float64 => cleaned
            .parse::<f64>()
            .map(|v| Some(Value::Float(v)))
            .map_err(|_| format!("`{}` is not a valid {}", raw, ty.as_str())),
        ColumnType::Date => date_parser::parse_date(cleaned)
            .map(|d| Some(Value::Date(Date32Type::from_naive_date(d))))
            .ok_or_else(|| format!("`{}` is not a valid {}", raw, ty.as_str())),
    }
}

/// Build one Arrow column of type `ty` from already-parsed cells.
///
/// Cells were validated against the same type by [`parse_value`], so a
/// mismatching variant cannot occur; it would become a null.
pub fn build_array<'a, I>(ty: ColumnType, cells: I) -> ArrayRef
where
    I: Iterator<Item = Option<&'a Value>>,
{
    match ty {
        ColumnType::Utf8 => {
            let mut b = StringBuilder::new();
            for cell in cells {
                b.append_option(cell.and_then(Value::as_str));
            }
            Arc::new(b.finish()) as ArrayRef
        }
        ColumnType::Categorical => {
            let arr: DictionaryArray<Int32Type> =
                cells.map(|cell| cell.and_then(Value::as_str)).collect();
            Arc::new(arr) as ArrayRef
        }
        ColumnType::Int64 => {
            let mut b = Int64Builder::new();
            for cell in cells {
                b.append_option(match cell {
                    Some(Value::Int(v)) => Some(*v),
                    _ => None,
                });
            }
            Arc::new(b.finish()) as ArrayRef
        }
        ColumnType::Float64 => {
            let mut b = Float64Builder::new();
            for cell in cells {
                b.append_option(match cell {
                    Some(Value::Float(v)) => Some(*v),
                    _ => None,
                });
            }
            Arc::new(b.finish()) as ArrayRef
        }
        ColumnType::Date => {
            let mut b = Date32Builder::new();
            for cell in cells {
                b.append_option(match cell {
                    Some(Value::Date(v)) => Some(*v),
                    _ => None,
                });
            }
            Arc::new(b.finish()) as ArrayRef
        }
    }
}
