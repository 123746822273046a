// src/config.rs

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;
use url::Url;

use crate::entity::EntityKind;
use crate::error::Error;
use crate::schema::ColumnType;

pub const DEFAULT_PARAMETERS_FILE: &str = "parameters.yaml";

const COMMON_KEY: &str = "common";
const RECONCILIATION_KEY: &str = "reconciliation";

// ─── raw (as written in YAML) ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntity {
    name: String,
    homepage: String,
    relative_path: String,
    table_number: usize,
    #[serde(default)]
    ignore_patterns: Vec<String>,
    #[serde(default)]
    data_types: BTreeMap<String, ColumnType>,
    #[serde(default)]
    key_columns: Vec<String>,
    output: RawOutput,
    cache_file: PathBuf,
    #[serde(default = "default_last_updated_column")]
    last_updated_column: String,
    #[serde(default = "default_date_format")]
    date_format: String,
    #[serde(default = "default_size_column")]
    size_column: Option<String>,
    #[serde(default)]
    pairing: Option<RawPairing>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOutput {
    downloads_directory: PathBuf,
    unzipped_files_directory: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
enum RawPairing {
    Positional,
    CsvOnly,
    YearMatched {
        year_column: String,
        row_year_pattern: String,
        link_pattern: String,
        type_of_interest: String,
    },
}

fn default_last_updated_column() -> String {
    "Last Updated Date".to_string()
}

fn default_date_format() -> String {
    "%m/%d/%Y".to_string()
}

fn default_size_column() -> Option<String> {
    Some("CSV".to_string())
}

// ─── validated ───────────────────────────────────────────────────────────

/// How the hyperlinks of a catalogue table are assigned to its rows.
#[derive(Debug, Clone)]
pub enum Pairing {
    /// XML link then CSV link, alternating, one pair per row.
    Positional,
    /// One CSV link per row, no XML links at all.
    CsvOnly,
    /// Links carry type, format and year in their file name.
    YearMatched(YearMatching),
}

#[derive(Debug, Clone)]
pub struct YearMatching {
    /// Catalogue column holding the row's year.
    pub year_column: String,
    /// First capture group yields the year from `year_column`.
    pub row_year: Regex,
    /// Named groups `type`, `format` and `year`, applied to the link's file name.
    pub link: Regex,
    pub type_of_interest: String,
}

/// Fully validated settings for one entity.
#[derive(Debug, Clone)]
pub struct EntityConfig {
    pub kind: EntityKind,
    pub name: String,
    pub homepage: Url,
    pub catalogue_url: Url,
    pub table_number: usize,
    pub ignore_patterns: Vec<Regex>,
    pub data_types: BTreeMap<String, ColumnType>,
    pub key_columns: Vec<String>,
    pub downloads_directory: PathBuf,
    pub unzipped_files_directory: PathBuf,
    pub cache_file: PathBuf,
    pub last_updated_column: String,
    pub date_format: String,
    pub size_column: Option<String>,
    pub pairing: Pairing,
}

impl EntityConfig {
    /// Per-entity download directory: `<downloads>/<name>`.
    pub fn download_dir(&self) -> PathBuf {
        self.downloads_directory.join(&self.name)
    }

    /// Archives are extracted beneath the entity's download directory.
    pub fn unzip_dir(&self) -> PathBuf {
        self.download_dir().join(&self.unzipped_files_directory)
    }

    /// Default key-column export file, `<name>.csv` in the working directory.
    pub fn key_columns_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.csv", self.name))
    }
}

/// Column names joining the four reconciled datasets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct JoinKeys {
    pub project_number: String,
    pub link_project_number: String,
    pub publication_id: String,
    pub patent_project_number: String,
}

impl Default for JoinKeys {
    fn default() -> Self {
        Self {
            project_number: "CORE_PROJECT_NUM".to_string(),
            link_project_number: "PROJECT_NUMBER".to_string(),
            publication_id: "PMID".to_string(),
            patent_project_number: "PROJECT_ID".to_string(),
        }
    }
}

/// The whole parameters document, validated once at startup and shared
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct Parameters {
    entities: Vec<EntityConfig>,
    pub reconciliation: JoinKeys,
}

impl Parameters {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::config(format!(
                "parameters file {} not found",
                path.display()
            ))
            .into());
        }
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(text)
            .map_err(|e| Error::config(format!("malformed YAML: {}", e)))?;
        let Value::Mapping(top) = doc else {
            return Err(Error::config("top level must be a mapping").into());
        };

        let common = match top.get(COMMON_KEY) {
            Some(Value::Mapping(m)) => m.clone(),
            Some(Value::Null) | None => Mapping::new(),
            Some(_) => return Err(Error::config("`common` must be a mapping").into()),
        };

        let mut reconciliation = JoinKeys::default();
        let mut entities = Vec::new();

        for (key, block) in &top {
            let key = key
                .as_str()
                .ok_or_else(|| Error::config("top-level keys must be strings"))?;
            if key == COMMON_KEY {
                continue;
            }
            if key == RECONCILIATION_KEY {
                reconciliation = serde_yaml::from_value(block.clone())
                    .map_err(|e| Error::config(format!("`reconciliation`: {}", e)))?;
                continue;
            }
            let kind = EntityKind::from_key(key)
                .ok_or_else(|| Error::config(format!("unrecognised top-level key `{}`", key)))?;
            let Value::Mapping(block) = block else {
                return Err(Error::config(format!("`{}` must be a mapping", key)).into());
            };

            let merged = merge_mappings(common.clone(), block.clone());
            let raw: RawEntity = serde_yaml::from_value(Value::Mapping(merged))
                .map_err(|e| Error::config(format!("`{}`: {}", key, e)))?;
            entities.push(validate_entity(kind, raw)?);
        }

        // run order follows the entity declaration order, not the file's
        entities.sort_by_key(|e| e.kind);
        debug!(entities = entities.len(), "parameters loaded");

        Ok(Self {
            entities,
            reconciliation,
        })
    }

    pub fn entities(&self) -> &[EntityConfig] {
        &self.entities
    }

    pub fn entity(&self, kind: EntityKind) -> Option<&EntityConfig> {
        self.entities.iter().find(|e| e.kind == kind)
    }

    /// Like [`entity`](Self::entity) but a missing block is a configuration error.
    pub fn require(&self, kind: EntityKind) -> Result<&EntityConfig> {
        self.entity(kind).ok_or_else(|| {
            Error::config(format!("missing `{}` block in parameters", kind.key())).into()
        })
    }
}

/// Entity keys win over `common`; nested mappings merge recursively.
fn merge_mappings(mut base: Mapping, over: Mapping) -> Mapping {
    for (k, v) in over {
        match (base.get_mut(&k), v) {
            (Some(Value::Mapping(b)), Value::Mapping(o)) => {
                let merged = merge_mappings(std::mem::take(b), o);
                *b = merged;
            }
            (_, v) => {
                base.insert(k, v);
            }
        }
    }
    base
}

fn compile(entity: &str, what: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        Error::config(format!("`{}`: invalid {} `{}`: {}", entity, what, pattern, e)).into()
    })
}

fn validate_entity(kind: EntityKind, raw: RawEntity) -> Result<EntityConfig> {
    let key = kind.key();

    let homepage = Url::parse(&raw.homepage)
        .map_err(|e| Error::config(format!("`{}`: invalid homepage: {}", key, e)))?;
    let catalogue_url = homepage
        .join(&raw.relative_path)
        .map_err(|e| Error::config(format!("`{}`: invalid relative_path: {}", key, e)))?;

    // patterns match from the start of the href, never mid-string
    let ignore_patterns = raw
        .ignore_patterns
        .iter()
        .map(|p| compile(key, "ignore pattern", &format!("^(?:{})", p)))
        .collect::<Result<Vec<_>>>()?;

    let pairing = match raw.pairing {
        Some(RawPairing::Positional) => Pairing::Positional,
        Some(RawPairing::CsvOnly) => Pairing::CsvOnly,
        Some(RawPairing::YearMatched {
            year_column,
            row_year_pattern,
            link_pattern,
            type_of_interest,
        }) => {
            let row_year = compile(key, "row_year_pattern", &row_year_pattern)?;
            if row_year.captures_len() < 2 {
                return Err(Error::config(format!(
                    "`{}`: row_year_pattern needs a capture group",
                    key
                ))
                .into());
            }
            let link = compile(key, "link_pattern", &link_pattern)?;
            let names: Vec<&str> = link.capture_names().flatten().collect();
            for group in ["type", "format", "year"] {
                if !names.contains(&group) {
                    return Err(Error::config(format!(
                        "`{}`: link_pattern lacks named group `{}`",
                        key, group
                    ))
                    .into());
                }
            }
            Pairing::YearMatched(YearMatching {
                year_column,
                row_year,
                link,
                type_of_interest,
            })
        }
        None => kind.default_pairing().ok_or_else(|| {
            Error::config(format!("`{}` requires an explicit `pairing` block", key))
        })?,
    };

    Ok(EntityConfig {
        kind,
        name: raw.name,
        homepage,
        catalogue_url,
        table_number: raw.table_number,
        ignore_patterns,
        data_types: raw.data_types,
        key_columns: raw.key_columns,
        downloads_directory: raw.output.downloads_directory,
        unzipped_files_directory: raw.output.unzipped_files_directory,
        cache_file: raw.cache_file,
        last_updated_column: raw.last_updated_column,
        date_format: raw.date_format,
        size_column: raw.size_column,
        pairing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
common:
  homepage: https://exporter.nih.gov
  table_number: 12
  ignore_patterns: ['javascript.*']
  output:
    downloads_directory: downloads
    unzipped_files_directory: unzipped

projects:
  name: projects
  relative_path: ExPORTER_Catalog.aspx?sid=1&index=0
  ignore_patterns: ['javascript.*', '.*_DUNS_.*\.zip$']
  data_types: {APPLICATION_ID: int, APPLICATION_TYPE: category}
  key_columns: [APPLICATION_ID, CORE_PROJECT_NUM]
  cache_file: projects.parquet

affiliations:
  name: affiliations
  relative_path: ExPORTER_Catalog.aspx?sid=0&index=5
  output:
    unzipped_files_directory: extracted
  cache_file: affiliations.parquet
  pairing:
    strategy: year_matched
    year_column: Fiscal Year
    row_year_pattern: '(\d{4})'
    link_pattern: '_(?P<type>[A-Z]+)_(?P<format>[CX])_(?P<year>\d{4})\.zip$'
    type_of_interest: AFFLNK

reconciliation:
  patent_project_number: PATENT_PROJECT
"#;

    #[test]
    fn common_block_is_merged_under_each_entity() -> Result<()> {
        let params = Parameters::from_yaml_str(SAMPLE)?;
        let projects = params.require(EntityKind::Projects)?;
        assert_eq!(projects.table_number, 12);
        assert_eq!(
            projects.catalogue_url.as_str(),
            "https://exporter.nih.gov/ExPORTER_Catalog.aspx?sid=1&index=0"
        );
        // entity list replaces the common one wholesale
        assert_eq!(projects.ignore_patterns.len(), 2);
        assert_eq!(
            projects.data_types.get("APPLICATION_TYPE"),
            Some(&ColumnType::Categorical)
        );
        assert_eq!(projects.size_column.as_deref(), Some("CSV"));
        assert!(matches!(projects.pairing, Pairing::Positional));

        // nested mappings merge key by key
        let affiliations = params.require(EntityKind::Affiliations)?;
        assert_eq!(affiliations.downloads_directory, PathBuf::from("downloads"));
        assert_eq!(affiliations.unzip_dir(), PathBuf::from("downloads/affiliations/extracted"));
        assert!(matches!(affiliations.pairing, Pairing::YearMatched(_)));

        assert_eq!(params.reconciliation.patent_project_number, "PATENT_PROJECT");
        assert_eq!(params.reconciliation.project_number, "CORE_PROJECT_NUM");
        Ok(())
    }

    #[test]
    fn ignore_patterns_are_anchored_at_the_start() -> Result<()> {
        let params = Parameters::from_yaml_str(SAMPLE)?;
        let projects = params.require(EntityKind::Projects)?;
        let duns = &projects.ignore_patterns[1];
        assert!(duns.is_match("FileDownload/RePORTER_DUNS_C_2019.zip"));
        let js = &projects.ignore_patterns[0];
        assert!(js.is_match("javascript:void(0)"));
        assert!(!js.is_match("/files/javascript.zip"));
        Ok(())
    }

    #[test]
    fn missing_required_key_is_a_configuration_error() {
        let yaml = r#"
patents:
  name: patents
  homepage: https://exporter.nih.gov
  table_number: 0
  output: {downloads_directory: d, unzipped_files_directory: u}
  cache_file: patents.parquet
"#;
        let err = Parameters::from_yaml_str(yaml).unwrap_err();
        let e = err.downcast_ref::<Error>().expect("typed error");
        assert!(matches!(e, Error::Config(msg) if msg.contains("relative_path")));
    }

    #[test]
    fn year_matched_pairing_requires_named_groups() {
        let yaml = r#"
affiliations:
  name: affiliations
  homepage: https://exporter.nih.gov
  relative_path: x
  table_number: 0
  output: {downloads_directory: d, unzipped_files_directory: u}
  cache_file: a.parquet
  pairing:
    strategy: year_matched
    year_column: Year
    row_year_pattern: '(\d{4})'
    link_pattern: '(?P<type>[A-Z]+)_(?P<year>\d{4})'
    type_of_interest: AFFLNK
"#;
        let err = Parameters::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn year_matched_entities_need_explicit_pairing() {
        let yaml = r#"
affiliations:
  name: affiliations
  homepage: https://exporter.nih.gov
  relative_path: x
  table_number: 0
  output: {downloads_directory: d, unzipped_files_directory: u}
  cache_file: a.parquet
"#;
        assert!(Parameters::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = Parameters::from_yaml_str("grants: {}\n").unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Config(_))));
    }

    #[test]
    fn missing_block_is_reported_by_require() -> Result<()> {
        let params = Parameters::from_yaml_str(SAMPLE)?;
        assert!(params.entity(EntityKind::Patents).is_none());
        assert!(params.require(EntityKind::Patents).is_err());
        Ok(())
    }
}
