// src/process/mod.rs

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, DictionaryArray},
    datatypes::Int32Type,
    record_batch::RecordBatch,
};
use csv::ReaderBuilder;
use encoding_rs::ISO_8859_15;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fs,
    path::Path,
    sync::Arc,
};
use tracing::{debug, info, instrument, warn};

use crate::dataset::EntityDataset;
use crate::schema::{build_arrow_schema, ColumnType, SOURCE_FILE_COLUMN};

pub mod convert;
pub mod date_parser;
pub mod utils;

use convert::Value;

/// One per-year extract, parsed and typed, before merging.
#[derive(Debug)]
pub struct RawTable {
    /// File name the rows came from; becomes the `source_file` value.
    pub source: String,
    pub headers: Vec<String>,
    /// One entry per header, `None` for empty cells.
    pub rows: Vec<Vec<Option<Value>>>,
    /// Records dropped for having the wrong field count or an unparsable cell.
    pub skipped: usize,
}

impl RawTable {
    fn index_of(&self) -> HashMap<&str, usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), i))
            .collect()
    }
}

/// Rename repeated header names `X`, `X.1`, `X.2`, ... so no column shadows
/// another when rows are merged by name.
fn dedup_headers(headers: Vec<String>, source: &str) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut next: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(headers.len());
    for header in headers {
        if used.insert(header.clone()) {
            out.push(header);
            continue;
        }
        let n = next.entry(header.clone()).or_insert(1);
        let renamed = loop {
            let candidate = format!("{}.{}", header, n);
            *n += 1;
            if !used.contains(&candidate) {
                break candidate;
            }
        };
        warn!(file = %source, column = %header, renamed = %renamed, "duplicate CSV header renamed");
        used.insert(renamed.clone());
        out.push(renamed);
    }
    out
}

/// Read one CSV extract. Files are ISO-8859-15 encoded; each record is
/// checked against the header width and the configured column types, and
/// bad records are skipped with a warning rather than failing the file.
pub fn read_csv_file(path: &Path, types: &BTreeMap<String, ColumnType>) -> Result<RawTable> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let (text, _) = ISO_8859_15.decode_without_bom_handling(&bytes);

    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // width is checked per record below
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();
    let headers = dedup_headers(headers, &source);
    let column_types: Vec<ColumnType> = headers
        .iter()
        .map(|h| types.get(h).copied().unwrap_or_default())
        .collect();

    let mut rows = Vec::new();
    let mut skipped = 0;

    'records: for (idx, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(file = %source, record = idx, error = %e, "skipping unreadable CSV record");
                skipped += 1;
                continue;
            }
        };
        if record.len() != headers.len() {
            warn!(
                file = %source,
                record = idx,
                expected = headers.len(),
                found = record.len(),
                "skipping CSV record with wrong field count"
            );
            skipped += 1;
            continue;
        }

        let mut row = Vec::with_capacity(headers.len());
        for ((field, ty), name) in record.iter().zip(&column_types).zip(&headers) {
            match convert::parse_value(*ty, field) {
                Ok(v) => row.push(v),
                Err(reason) => {
                    warn!(file = %source, record = idx, column = %name, %reason, "skipping CSV record");
                    skipped += 1;
                    continue 'records;
                }
            }
        }
        rows.push(row);
    }

    debug!(file = %source, rows = rows.len(), skipped, "CSV parsed");
    Ok(RawTable {
        source,
        headers,
        rows,
        skipped,
    })
}

/// Merge already-parsed tables by column-name union: a column missing from
/// a table is null for that table's rows. Output columns are sorted by name
/// and include the categorical `source_file` provenance column.
pub fn merge_tables(
    tables: &[RawTable],
    types: &BTreeMap<String, ColumnType>,
) -> Result<EntityDataset> {
    let mut names: BTreeSet<String> = tables
        .iter()
        .flat_map(|t| t.headers.iter().cloned())
        .collect();
    if names.contains(SOURCE_FILE_COLUMN) {
        warn!("input already has a `{}` column; it is replaced", SOURCE_FILE_COLUMN);
    }
    names.insert(SOURCE_FILE_COLUMN.to_string());
    let names: Vec<String> = names.into_iter().collect();

    let schema = build_arrow_schema(&names, types);
    let indices: Vec<HashMap<&str, usize>> = tables.iter().map(RawTable::index_of).collect();

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(names.len());
    for name in &names {
        if name == SOURCE_FILE_COLUMN {
            let provenance: DictionaryArray<Int32Type> = tables
                .iter()
                .flat_map(|t| std::iter::repeat(t.source.as_str()).take(t.rows.len()))
                .collect();
            columns.push(Arc::new(provenance));
            continue;
        }

        let ty = types.get(name).copied().unwrap_or_default();
        let cells = tables.iter().zip(&indices).flat_map(|(t, idx)| {
            let pos = idx.get(name.as_str()).copied();
            t.rows
                .iter()
                .map(move |row| pos.and_then(|p| row[p].as_ref()))
        });
        columns.push(convert::build_array(ty, cells));
    }

    let batch = RecordBatch::try_new(schema, columns).context("assembling consolidated batch")?;
    Ok(EntityDataset::new(batch))
}

/// Consolidate every per-year CSV extract into one typed dataset.
#[instrument(level = "info", skip_all, fields(files = paths.len()))]
pub fn consolidate<P: AsRef<Path>>(
    paths: &[P],
    types: &BTreeMap<String, ColumnType>,
) -> Result<EntityDataset> {
    let mut tables = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        info!("reading {}", path.display());
        tables.push(read_csv_file(path, types)?);
    }

    let skipped: usize = tables.iter().map(|t| t.skipped).sum();
    let dataset = merge_tables(&tables, types)?;
    info!(
        rows = dataset.num_rows(),
        columns = dataset.num_columns(),
        skipped,
        "consolidated"
    );
    Ok(dataset)
}
