// src/dataset.rs

use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef},
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
    util::display::array_value_to_string,
};
use std::{collections::HashSet, fs, path::Path, sync::Arc};
use tracing::{info, warn};

use crate::error::Error;
use crate::schema::{arrow::column_type_of, ColumnType};

/// The consolidated table of one entity: typed columns sorted by name plus
/// the categorical `source_file` provenance column.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDataset {
    batch: RecordBatch,
}

impl EntityDataset {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column(name).map(|c| column_type_of(c.data_type()))
    }

    /// Display form of every cell in `name`; categorical cells are decoded.
    pub fn strings(&self, name: &str) -> Option<Vec<Option<String>>> {
        self.column(name).map(|arr| render(arr.as_ref()))
    }

    /// Swap the column `name` for `array`, adopting the array's type.
    pub fn replace_column(self, name: &str, array: ArrayRef) -> Result<Self> {
        let schema = self.batch.schema();
        let idx = schema
            .index_of(name)
            .with_context(|| format!("no column `{}`", name))?;

        let fields: Vec<Field> = schema
            .fields()
            .iter()
            .enumerate()
            .map(|(i, f)| {
                if i == idx {
                    Field::new(f.name(), array.data_type().clone(), true)
                } else {
                    f.as_ref().clone()
                }
            })
            .collect();
        let mut columns = self.batch.columns().to_vec();
        columns[idx] = array;

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .with_context(|| format!("replacing column `{}`", name))?;
        Ok(Self { batch })
    }

    /// Unique key tuples in first-seen order, optionally without any tuple
    /// that contains a null.
    pub fn key_rows(
        &self,
        key_columns: &[String],
        drop_nulls: bool,
    ) -> Result<Vec<Vec<Option<String>>>> {
        let columns = key_columns
            .iter()
            .map(|k| {
                self.strings(k).ok_or_else(|| {
                    Error::config(format!("key column `{}` is not in the dataset", k))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in 0..self.num_rows() {
            let tuple: Vec<Option<String>> = columns.iter().map(|c| c[row].clone()).collect();
            if drop_nulls && tuple.iter().any(Option::is_none) {
                continue;
            }
            if seen.insert(tuple.clone()) {
                out.push(tuple);
            }
        }
        Ok(out)
    }

    /// Write the deduplicated `key_columns` subset to a CSV file with a
    /// header row. With no key columns nothing is written and a warning is
    /// logged. Returns the number of data rows written.
    pub fn export_key_columns(
        &self,
        key_columns: &[String],
        path: &Path,
        drop_nulls: bool,
    ) -> Result<usize> {
        if key_columns.is_empty() {
            warn!(
                "no key columns defined; not writing {}",
                path.display()
            );
            return Ok(0);
        }

        let rows = self.key_rows(key_columns, drop_nulls)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        wtr.write_record(key_columns)?;
        for row in &rows {
            wtr.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        wtr.flush()
            .with_context(|| format!("writing {}", path.display()))?;

        info!("exported {} key rows to {}", rows.len(), path.display());
        Ok(rows.len())
    }
}

fn render(arr: &dyn Array) -> Vec<Option<String>> {
    (0..arr.len())
        .map(|i| {
            if arr.is_null(i) {
                None
            } else {
                array_value_to_string(arr, i).ok()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use tempfile::tempdir;

    fn dataset(keys: Vec<Option<i64>>) -> EntityDataset {
        let names = StringArray::from(
            keys.iter()
                .map(|k| k.map(|_| "x"))
                .collect::<Vec<_>>(),
        );
        let schema = Schema::new(vec![
            Field::new("k", arrow::datatypes::DataType::Int64, true),
            Field::new("name", arrow::datatypes::DataType::Utf8, true),
        ]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(Int64Array::from(keys)), Arc::new(names)],
        )
        .unwrap();
        EntityDataset::new(batch)
    }

    #[test]
    fn export_drops_nulls_and_duplicates() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("keys.csv");
        let ds = dataset(vec![Some(1), Some(1), None, Some(2)]);

        let written = ds.export_key_columns(&["k".to_string()], &path, true)?;
        assert_eq!(written, 2);
        assert_eq!(fs::read_to_string(&path)?, "k\n1\n2\n");
        Ok(())
    }

    #[test]
    fn export_keeps_nulls_when_asked() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("keys.csv");
        let ds = dataset(vec![Some(1), Some(1), None, Some(2)]);

        let written = ds.export_key_columns(&["k".to_string()], &path, false)?;
        assert_eq!(written, 3);
        assert_eq!(fs::read_to_string(&path)?, "k\n1\n\"\"\n2\n");
        Ok(())
    }

    #[test]
    fn export_without_key_columns_writes_nothing() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("keys.csv");
        let ds = dataset(vec![Some(1)]);
        assert_eq!(ds.export_key_columns(&[], &path, true)?, 0);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn unknown_key_column_is_a_configuration_error() {
        let ds = dataset(vec![Some(1)]);
        let err = ds.key_rows(&["missing".to_string()], true).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Config(_))));
    }

    #[test]
    fn replacing_a_column_adopts_its_type() -> Result<()> {
        let ds = dataset(vec![Some(1), Some(2)]);
        let ds = ds.replace_column("k", Arc::new(StringArray::from(vec!["a", "b"])))?;
        assert_eq!(ds.column_type("k"), Some(ColumnType::Utf8));
        assert_eq!(ds.column_names(), vec!["k", "name"]);
        Ok(())
    }
}
