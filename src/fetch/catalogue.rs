// src/fetch/catalogue.rs

use anyhow::Result;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};

use super::Fetch;
use crate::config::EntityConfig;
use crate::error::Error;

/// Placeholder recorded for anchors without an `href`, so link positions stay
/// aligned with the table layout.
pub const NO_LINK: &str = "no link";

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("valid selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("valid selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").expect("valid selector"));
static HEADER_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("th").expect("valid selector"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("valid selector"));

/// One HTML table: header row, text of every body cell, and the table's
/// hyperlinks in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HtmlTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub hyperlinks: Vec<String>,
}

impl HtmlTable {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Keep only the rows for which `keep(row_index)` holds.
    pub(crate) fn retain_rows(&mut self, keep: &[bool]) {
        let mut it = keep.iter();
        self.rows.retain(|_| *it.next().unwrap_or(&true));
    }
}

/// Collapse runs of whitespace (including non-breaking spaces) into one space.
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the nearest enclosing `<table>` of `node` is `table` itself,
/// i.e. rows of nested tables are not attributed to their parent.
fn belongs_to(table: ElementRef<'_>, node: ElementRef<'_>) -> bool {
    node.ancestors()
        .find(|n| n.value().as_element().is_some_and(|e| e.name() == "table"))
        .is_some_and(|n| n.id() == table.id())
}

fn parse_table(table: ElementRef<'_>) -> HtmlTable {
    let mut rows: Vec<(bool, Vec<String>)> = table
        .select(&ROW)
        .filter(|tr| belongs_to(table, *tr))
        .map(|tr| {
            let is_header = tr.select(&HEADER_CELL).next().is_some();
            let cells = tr
                .select(&CELL)
                .filter(|td| belongs_to(table, *td))
                .map(cell_text)
                .collect();
            (is_header, cells)
        })
        .collect();

    // first row carrying <th> cells is the header, else the very first row
    let header_pos = rows.iter().position(|(h, _)| *h).unwrap_or(0);
    let headers = if rows.is_empty() {
        Vec::new()
    } else {
        rows.remove(header_pos).1
    };

    let width = headers.len();
    let rows = rows
        .into_iter()
        .map(|(_, mut cells)| {
            cells.resize(width, String::new());
            cells
        })
        .collect();

    let hyperlinks = table
        .select(&ANCHOR)
        .map(|a| a.value().attr("href").unwrap_or(NO_LINK).to_string())
        .collect();

    HtmlTable {
        headers,
        rows,
        hyperlinks,
    }
}

/// Parse every `<table>` of a page, in document order.
pub fn parse_tables(html: &str) -> Vec<HtmlTable> {
    let doc = Html::parse_document(html);
    doc.select(&TABLE).map(parse_table).collect()
}

/// Request the entity's catalogue page and return its table of interest.
#[instrument(level = "info", skip(fetcher, config), fields(entity = %config.name))]
pub fn fetch_catalogue<F: Fetch + ?Sized>(fetcher: &F, config: &EntityConfig) -> Result<HtmlTable> {
    info!("requesting catalogue {}", config.catalogue_url);
    let body = fetcher.fetch(&config.catalogue_url)?;
    let html = String::from_utf8_lossy(&body);

    let mut tables = parse_tables(&html);
    debug!(tables = tables.len(), "catalogue page parsed");
    if config.table_number >= tables.len() {
        return Err(Error::config(format!(
            "`{}`: table number {} requested but {} has only {} tables",
            config.name,
            config.table_number,
            config.catalogue_url,
            tables.len()
        ))
        .into());
    }
    Ok(tables.swap_remove(config.table_number))
}
