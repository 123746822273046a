// src/fetch/links.rs

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::catalogue::HtmlTable;
use crate::config::{Pairing, YearMatching};
use crate::error::Error;
use crate::process::utils::file_name_from_href;

pub const XML_LINK_COLUMN: &str = "XML_link";
pub const CSV_LINK_COLUMN: &str = "CSV_link";

static FOUR_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Csv,
    Xml,
}

impl FileFormat {
    /// `C`, `CSV`, `X`, `XML` in any case.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "C" | "CSV" => Some(FileFormat::Csv),
            "X" | "XML" => Some(FileFormat::Xml),
            _ => None,
        }
    }
}

/// One downloadable archive found in a catalogue table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub file_type: String,
    pub format: FileFormat,
    pub year: i32,
    pub url: String,
}

/// A catalogue table plus the link column(s) resolved for each row.
#[derive(Debug, Clone)]
pub struct LinkedTable {
    pub table: HtmlTable,
    pub file_type: String,
    /// `None` for entities whose catalogue carries no XML links at all.
    pub xml_links: Option<Vec<Option<String>>>,
    pub csv_links: Vec<Option<String>>,
    pub years: Vec<Option<i32>>,
}

impl LinkedTable {
    pub fn num_rows(&self) -> usize {
        self.table.num_rows()
    }

    /// Column lookup that also knows the two link columns.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        match name {
            CSV_LINK_COLUMN => Some(self.csv_links.iter().map(|l| l.as_deref()).collect()),
            XML_LINK_COLUMN => self
                .xml_links
                .as_ref()
                .map(|links| links.iter().map(|l| l.as_deref()).collect()),
            _ => self
                .table
                .column(name)
                .map(|col| col.into_iter().map(Some).collect()),
        }
    }

    /// Drop rows with no CSV link; returns how many were dropped.
    pub fn drop_rows_without_csv_link(&mut self) -> usize {
        let keep: Vec<bool> = self.csv_links.iter().map(Option::is_some).collect();
        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return 0;
        }

        self.table.retain_rows(&keep);
        let mut it = keep.iter();
        self.csv_links.retain(|_| *it.next().unwrap_or(&true));
        if let Some(xml) = self.xml_links.as_mut() {
            let mut it = keep.iter();
            xml.retain(|_| *it.next().unwrap_or(&true));
        }
        let mut it = keep.iter();
        self.years.retain(|_| *it.next().unwrap_or(&true));
        dropped
    }

    /// Blank every cell of a catalogue column (no-op if it is absent).
    pub fn clear_column(&mut self, name: &str) {
        if let Some(idx) = self.table.column_index(name) {
            for row in &mut self.table.rows {
                row[idx].clear();
            }
        }
    }

    /// Flatten into one record per resolved link.
    pub fn records(&self) -> Vec<LinkRecord> {
        let mut out = Vec::new();
        for row in 0..self.num_rows() {
            let year = self.years[row].unwrap_or(0);
            let xml = self.xml_links.as_ref().and_then(|x| x[row].as_ref());
            for (format, url) in [(FileFormat::Xml, xml), (FileFormat::Csv, self.csv_links[row].as_ref())] {
                if let Some(url) = url {
                    out.push(LinkRecord {
                        file_type: self.file_type.clone(),
                        format,
                        year,
                        url: url.clone(),
                    });
                }
            }
        }
        out
    }
}

fn filter_links(links: &[String], ignore: &[Regex]) -> Vec<String> {
    links
        .iter()
        .filter(|l| !ignore.iter().any(|re| re.is_match(l)))
        .cloned()
        .collect()
}

/// Year of a row from its first cell, for catalogues without a year pattern.
fn leading_year(row: &[String]) -> Option<i32> {
    row.first()
        .and_then(|c| FOUR_DIGITS.find(c))
        .and_then(|m| m.as_str().parse().ok())
}

/// Assign the table's hyperlinks to its rows under `pairing`.
///
/// Any structural surprise (odd link count under positional pairing, link
/// and row counts that disagree, repeated years) is a
/// [`Error::Pairing`]: guessing would silently corrupt every later join.
pub fn extract_links(
    table: HtmlTable,
    ignore: &[Regex],
    pairing: &Pairing,
    entity: &str,
) -> Result<LinkedTable> {
    let links = filter_links(&table.hyperlinks, ignore);
    debug!(
        entity,
        total = table.hyperlinks.len(),
        kept = links.len(),
        "filtered catalogue links"
    );

    match pairing {
        Pairing::Positional => positional(table, links, entity),
        Pairing::CsvOnly => csv_only(table, links, entity),
        Pairing::YearMatched(matching) => year_matched(table, links, matching, entity),
    }
}

fn positional(table: HtmlTable, links: Vec<String>, entity: &str) -> Result<LinkedTable> {
    if links.len() % 2 != 0 {
        return Err(Error::pairing(
            entity,
            format!("expected alternating XML/CSV links but found {} links", links.len()),
        )
        .into());
    }
    if links.len() / 2 != table.num_rows() {
        return Err(Error::pairing(
            entity,
            format!(
                "{} link pairs for {} table rows",
                links.len() / 2,
                table.num_rows()
            ),
        )
        .into());
    }

    let mut xml = Vec::with_capacity(links.len() / 2);
    let mut csv = Vec::with_capacity(links.len() / 2);
    for pair in links.chunks_exact(2) {
        xml.push(Some(pair[0].clone()));
        csv.push(Some(pair[1].clone()));
    }
    let years = table.rows.iter().map(|r| leading_year(r)).collect();

    Ok(LinkedTable {
        file_type: entity.to_string(),
        table,
        xml_links: Some(xml),
        csv_links: csv,
        years,
    })
}

fn csv_only(table: HtmlTable, links: Vec<String>, entity: &str) -> Result<LinkedTable> {
    if links.len() != table.num_rows() {
        return Err(Error::pairing(
            entity,
            format!("{} CSV links for {} table rows", links.len(), table.num_rows()),
        )
        .into());
    }
    let years = table.rows.iter().map(|r| leading_year(r)).collect();

    Ok(LinkedTable {
        file_type: entity.to_string(),
        table,
        xml_links: None,
        csv_links: links.into_iter().map(Some).collect(),
        years,
    })
}

fn year_matched(
    table: HtmlTable,
    links: Vec<String>,
    matching: &YearMatching,
    entity: &str,
) -> Result<LinkedTable> {
    let years_col = table.column(&matching.year_column).ok_or_else(|| {
        Error::pairing(
            entity,
            format!("catalogue has no `{}` column", matching.year_column),
        )
    })?;

    let years: Vec<Option<i32>> = years_col
        .iter()
        .map(|cell| {
            matching
                .row_year
                .captures(cell)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
        .collect();

    let mut seen = HashSet::new();
    for year in years.iter().flatten() {
        if !seen.insert(*year) {
            return Err(Error::pairing(
                entity,
                format!("year {} appears in more than one catalogue row", year),
            )
            .into());
        }
    }

    let mut by_year: HashMap<(FileFormat, i32), String> = HashMap::new();
    for link in links {
        let Some(name) = file_name_from_href(&link) else {
            continue;
        };
        let Some(caps) = matching.link.captures(&name) else {
            debug!(entity, link = %link, "link does not match link pattern");
            continue;
        };
        // optional groups may not take part in a match
        let group = |name: &str| caps.name(name).map(|m| m.as_str());
        let (Some(file_type), Some(format), Some(year)) =
            (group("type"), group("format"), group("year"))
        else {
            debug!(entity, link = %link, "link pattern matched without type, format or year");
            continue;
        };
        if file_type != matching.type_of_interest {
            continue;
        }
        let (Some(format), Ok(year)) = (FileFormat::from_code(format), year.parse::<i32>()) else {
            warn!(entity, link = %link, "unrecognised format or year in link");
            continue;
        };
        if let Some(previous) = by_year.insert((format, year), link.clone()) {
            return Err(Error::pairing(
                entity,
                format!("two {:?} links for {}: {} and {}", format, year, previous, link),
            )
            .into());
        }
    }

    let pick = |format: FileFormat| -> Vec<Option<String>> {
        years
            .iter()
            .map(|y| y.and_then(|y| by_year.get(&(format, y)).cloned()))
            .collect()
    };
    let csv_links = pick(FileFormat::Csv);
    let xml_links = pick(FileFormat::Xml);

    Ok(LinkedTable {
        table,
        file_type: matching.type_of_interest.clone(),
        xml_links: Some(xml_links),
        csv_links,
        years,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(years: &[&str], links: &[&str]) -> HtmlTable {
        HtmlTable {
            headers: vec!["Year".into(), "CSV".into()],
            rows: years.iter().map(|y| vec![y.to_string(), "1 MB".into()]).collect(),
            hyperlinks: links.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn javascript() -> Vec<Regex> {
        vec![Regex::new("^(?:javascript.*)").unwrap()]
    }

    fn matching() -> Pairing {
        Pairing::YearMatched(YearMatching {
            year_column: "Year".into(),
            row_year: Regex::new(r"(\d{4})").unwrap(),
            link: Regex::new(r"_(?P<type>[A-Z]+)_(?P<format>[CX])_(?P<year>\d{4})\.zip$").unwrap(),
            type_of_interest: "AFFLNK".into(),
        })
    }

    #[test]
    fn positional_pairs_xml_then_csv_after_filtering() -> Result<()> {
        let t = table(
            &["FY 2019", "FY 2020"],
            &["x19.zip", "javascript:x()", "c19.zip", "x20.zip", "c20.zip"],
        );
        let linked = extract_links(t, &javascript(), &Pairing::Positional, "projects")?;
        assert_eq!(
            linked.column(XML_LINK_COLUMN).unwrap(),
            vec![Some("x19.zip"), Some("x20.zip")]
        );
        assert_eq!(
            linked.column(CSV_LINK_COLUMN).unwrap(),
            vec![Some("c19.zip"), Some("c20.zip")]
        );
        assert_eq!(linked.years, vec![Some(2019), Some(2020)]);
        assert_eq!(linked.records().len(), 4);
        Ok(())
    }

    #[test]
    fn positional_with_odd_link_count_is_a_configuration_error() {
        let t = table(&["2019", "2020"], &["x19.zip", "c19.zip", "x20.zip"]);
        let err = extract_links(t, &[], &Pairing::Positional, "projects").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Pairing { reason, .. }) if reason.contains("3 links")
        ));
    }

    #[test]
    fn positional_pair_count_must_match_rows() {
        let t = table(&["2019"], &["x19.zip", "c19.zip", "x20.zip", "c20.zip"]);
        assert!(extract_links(t, &[], &Pairing::Positional, "projects").is_err());
    }

    #[test]
    fn csv_only_assigns_one_link_per_row() -> Result<()> {
        let t = table(&["Patents"], &["javascript:x()", "Patents.zip"]);
        let linked = extract_links(t, &javascript(), &Pairing::CsvOnly, "patents")?;
        assert!(linked.column(XML_LINK_COLUMN).is_none());
        assert_eq!(linked.csv_links, vec![Some("Patents.zip".to_string())]);
        Ok(())
    }

    #[test]
    fn year_matched_joins_rows_to_links_of_interest() -> Result<()> {
        let t = table(
            &["2018", "2019", "2020"],
            &[
                "files/RePORTER_PUB_C_2019.zip",
                "files/RePORTER_AFFLNK_C_2019.zip",
                "files/RePORTER_AFFLNK_X_2019.zip",
                "files/RePORTER_AFFLNK_C_2020.zip",
                "files/readme.pdf",
            ],
        );
        let linked = extract_links(t, &[], &matching(), "affiliations")?;
        assert_eq!(
            linked.csv_links,
            vec![
                None,
                Some("files/RePORTER_AFFLNK_C_2019.zip".to_string()),
                Some("files/RePORTER_AFFLNK_C_2020.zip".to_string()),
            ]
        );
        assert_eq!(
            linked.xml_links.as_ref().unwrap()[1].as_deref(),
            Some("files/RePORTER_AFFLNK_X_2019.zip")
        );
        let records = linked.records();
        assert!(records
            .iter()
            .all(|r| r.file_type == "AFFLNK" && (r.year == 2019 || r.year == 2020)));
        assert_eq!(records.len(), 3);
        Ok(())
    }

    #[test]
    fn year_matched_rejects_duplicate_row_years() {
        let t = table(&["2019", "FY2019"], &["files/RePORTER_AFFLNK_C_2019.zip"]);
        let err = extract_links(t, &[], &matching(), "affiliations").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Pairing { reason, .. }) if reason.contains("2019")
        ));
    }

    #[test]
    fn optional_groups_that_do_not_match_skip_the_link() -> Result<()> {
        let pairing = Pairing::YearMatched(YearMatching {
            year_column: "Year".into(),
            row_year: Regex::new(r"(\d{4})").unwrap(),
            link: Regex::new(r"_(?P<type>[A-Z]+)?_(?P<format>[CX])_(?P<year>\d{4})\.zip$").unwrap(),
            type_of_interest: "AFFLNK".into(),
        });
        let t = table(&["2019"], &["f/X__C_2019.zip", "f/R_AFFLNK_C_2019.zip"]);
        let linked = extract_links(t, &[], &pairing, "affiliations")?;
        assert_eq!(linked.csv_links, vec![Some("f/R_AFFLNK_C_2019.zip".to_string())]);
        Ok(())
    }

    #[test]
    fn rows_without_csv_link_can_be_dropped() -> Result<()> {
        let t = table(&["2018", "2019"], &["files/RePORTER_AFFLNK_C_2019.zip"]);
        let mut linked = extract_links(t, &[], &matching(), "affiliations")?;
        assert_eq!(linked.drop_rows_without_csv_link(), 1);
        assert_eq!(linked.num_rows(), 1);
        assert_eq!(linked.years, vec![Some(2019)]);
        linked.clear_column("CSV");
        assert_eq!(linked.column("CSV").unwrap(), vec![Some("")]);
        Ok(())
    }
}
