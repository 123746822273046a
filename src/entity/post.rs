// src/entity/post.rs

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Date32Array},
    compute::cast,
    datatypes::{DataType, Date32Type},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EntityConfig;
use crate::dataset::EntityDataset;
use crate::fetch::links::LinkedTable;
use crate::process::date_parser::parse_year;
use crate::schema::{categorical_type, ColumnType};

pub const APPLICATION_TYPE_COLUMN: &str = "APPLICATION_TYPE";
pub const LANGUAGE_COLUMN: &str = "LANG";
pub const PUBLICATION_YEAR_COLUMN: &str = "PUB_YEAR";

// ─── catalogue hooks ─────────────────────────────────────────────────────

pub fn keep_catalogue(_: &mut LinkedTable, _: &EntityConfig) {}

/// Affiliations catalogues list every year, linked or not, and their size
/// column describes another file type.
pub fn affiliations_catalogue(linked: &mut LinkedTable, config: &EntityConfig) {
    let dropped = linked.drop_rows_without_csv_link();
    if dropped > 0 {
        warn!(
            entity = %config.name,
            dropped,
            "dropping catalogue rows without a CSV link"
        );
    }
    if let Some(size) = config.size_column.as_deref() {
        linked.clear_column(size);
    }
}

// ─── dataset hooks ───────────────────────────────────────────────────────

pub fn identity(dataset: EntityDataset) -> Result<EntityDataset> {
    Ok(dataset)
}

pub fn projects(dataset: EntityDataset) -> Result<EntityDataset> {
    to_categorical(dataset, APPLICATION_TYPE_COLUMN)
}

pub fn publications(dataset: EntityDataset) -> Result<EntityDataset> {
    let dataset = to_categorical(dataset, LANGUAGE_COLUMN)?;
    year_to_date(dataset, PUBLICATION_YEAR_COLUMN)
}

/// Re-encode `column` as a dictionary of its string values.
pub fn to_categorical(dataset: EntityDataset, column: &str) -> Result<EntityDataset> {
    let Some(arr) = dataset.column(column) else {
        debug!(column, "column absent; nothing to make categorical");
        return Ok(dataset);
    };
    if dataset.column_type(column) == Some(ColumnType::Categorical) {
        return Ok(dataset);
    }
    let strings = cast(arr, &DataType::Utf8)
        .with_context(|| format!("casting `{}` to text", column))?;
    let dict = cast(&strings, &categorical_type())
        .with_context(|| format!("casting `{}` to categorical", column))?;
    dataset.replace_column(column, dict)
}

/// Turn a 4-digit year column into dates on January 1st. Values that are not
/// a year become null.
pub fn year_to_date(dataset: EntityDataset, column: &str) -> Result<EntityDataset> {
    let Some(values) = dataset.strings(column) else {
        debug!(column, "column absent; no years to convert");
        return Ok(dataset);
    };
    if dataset.column_type(column) == Some(ColumnType::Date) {
        return Ok(dataset);
    }

    let mut unparsable = 0usize;
    let mut days = Vec::with_capacity(values.len());
    for value in &values {
        days.push(value.as_deref().and_then(|s| {
            let date = parse_year(s);
            if date.is_none() {
                unparsable += 1;
            }
            date.map(Date32Type::from_naive_date)
        }));
    }
    if unparsable > 0 {
        warn!(column, unparsable, "values that are not a 4-digit year were set to null");
    }
    info!(column, rows = values.len(), "converted years to dates");

    let dates: ArrayRef = Arc::new(Date32Array::from(days));
    dataset.replace_column(column, dates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::consolidate;
    use std::{collections::BTreeMap, fs};
    use tempfile::tempdir;

    fn publications_dataset() -> Result<EntityDataset> {
        let tmp = tempdir()?;
        let path = tmp.path().join("PUB_2019.csv");
        fs::write(&path, "PMID,LANG,PUB_YEAR\n1,eng,2019\n2,fre,2019\n3,eng,n/a\n4,,\n")?;
        let mut types = BTreeMap::new();
        types.insert("PMID".to_string(), ColumnType::Int64);
        types.insert("PUB_YEAR".to_string(), ColumnType::Int64);
        // "n/a" is not an integer, so that row is dropped while reading
        consolidate(&[path], &types)
    }

    #[test]
    fn publications_get_categorical_language_and_year_dates() -> Result<()> {
        let ds = publications(publications_dataset()?)?;
        assert_eq!(ds.num_rows(), 3);
        assert_eq!(ds.column_type("LANG"), Some(ColumnType::Categorical));
        assert_eq!(ds.column_type("PUB_YEAR"), Some(ColumnType::Date));
        assert_eq!(
            ds.strings("PUB_YEAR").unwrap(),
            vec![
                Some("2019-01-01".to_string()),
                Some("2019-01-01".to_string()),
                None
            ]
        );
        assert_eq!(
            ds.strings("LANG").unwrap(),
            vec![Some("eng".to_string()), Some("fre".to_string()), None]
        );
        Ok(())
    }

    #[test]
    fn text_years_that_are_not_years_become_null() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("PUB.csv");
        fs::write(&path, "PUB_YEAR\n1999\nunknown\n")?;
        let ds = consolidate(&[path], &BTreeMap::new())?;
        let ds = year_to_date(ds, "PUB_YEAR")?;
        assert_eq!(
            ds.strings("PUB_YEAR").unwrap(),
            vec![Some("1999-01-01".to_string()), None]
        );
        Ok(())
    }

    #[test]
    fn missing_columns_are_left_alone() -> Result<()> {
        let ds = publications_dataset()?;
        let names = ds.column_names();
        let ds = projects(ds)?;
        assert_eq!(ds.column_names(), names);
        assert_eq!(ds.column_type("PMID"), Some(ColumnType::Int64));
        Ok(())
    }
}
