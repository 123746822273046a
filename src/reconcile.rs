// src/reconcile.rs

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::config::{JoinKeys, Parameters};
use crate::entity::EntityKind;
use crate::error::Error;

/// A key-column export read back from disk. Empty cells are null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTable {
    pub source: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl KeyTable {
    pub fn new(source: PathBuf, headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self {
            source,
            headers,
            rows,
        }
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut rdr =
            csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
        let headers: Vec<String> = rdr
            .headers()
            .with_context(|| format!("reading header of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.with_context(|| format!("reading {}", path.display()))?;
            rows.push(
                record
                    .iter()
                    .map(|v| (!v.is_empty()).then(|| v.to_string()))
                    .collect(),
            );
        }
        debug!(file = %path.display(), rows = rows.len(), "key table read");
        Ok(Self::new(path.to_path_buf(), headers, rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of `name`, one per row. A missing column is a configuration
    /// error: the join keys and the exported key columns disagree.
    pub fn column(&self, name: &str) -> Result<Vec<Option<&str>>> {
        let idx = self.headers.iter().position(|h| h == name).ok_or_else(|| {
            Error::config(format!(
                "{} has no `{}` column (columns: {})",
                self.source.display(),
                name,
                self.headers.join(", ")
            ))
        })?;
        Ok(self
            .rows
            .iter()
            .map(|r| r.get(idx).and_then(|v| v.as_deref()))
            .collect())
    }
}

/// Row counts of a full outer join by membership indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinCounts {
    pub left_only: usize,
    pub right_only: usize,
    pub both: usize,
}

impl JoinCounts {
    /// Rows present on one side only.
    pub fn not_both(&self) -> usize {
        self.left_only + self.right_only
    }
}

fn occurrences<'a>(keys: &[Option<&'a str>]) -> HashMap<Option<&'a str>, usize> {
    let mut counts = HashMap::new();
    for k in keys {
        *counts.entry(*k).or_insert(0) += 1;
    }
    counts
}

/// Outer-join `left` and `right` on equal keys and count the result rows of
/// each kind. Nulls match each other, and a key repeated on both sides yields
/// one `both` row per pair.
pub fn outer_join_counts(left: &[Option<&str>], right: &[Option<&str>]) -> JoinCounts {
    let l = occurrences(left);
    let r = occurrences(right);

    let mut counts = JoinCounts::default();
    for (key, n) in &l {
        match r.get(key) {
            Some(m) => counts.both += n * m,
            None => counts.left_only += n,
        }
    }
    counts.right_only = r
        .iter()
        .filter(|(key, _)| !l.contains_key(*key))
        .map(|(_, n)| n)
        .sum();
    counts
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivityStats {
    pub publications_linked_to_inexistent_projects: usize,
    pub linked_publications: usize,
    pub projects_without_publications: usize,
    pub projects: usize,
    pub publications_without_link: usize,
    pub patents_without_project: usize,
    pub patents: usize,
    pub projects_without_patents: usize,
}

impl fmt::Display for ConnectivityStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "# publications linked to inexistent projects: {} (out of {} *linked* publications)",
            self.publications_linked_to_inexistent_projects, self.linked_publications
        )?;
        writeln!(
            f,
            "# projects with no linked publications: {} (out of {})",
            self.projects_without_publications, self.projects
        )?;
        writeln!(
            f,
            "# publications with no linked data: {}",
            self.publications_without_link
        )?;
        writeln!(
            f,
            "# patents with no linked project: {} (out of {})",
            self.patents_without_project, self.patents
        )?;
        write!(
            f,
            "# projects with no linked patents: {} (out of {})",
            self.projects_without_patents, self.projects
        )
    }
}

/// The four key-column exports reconciliation works on.
#[derive(Debug, Clone)]
pub struct Exports {
    pub projects: KeyTable,
    pub publications: KeyTable,
    pub links: KeyTable,
    pub patents: KeyTable,
}

/// Read the exports written by the pipeline from `dir`. Every file must
/// exist; the first missing one is reported as a missing prerequisite.
pub fn load_exports(params: &Parameters, dir: &Path) -> Result<Exports> {
    let kinds = [
        EntityKind::Projects,
        EntityKind::Publications,
        EntityKind::LinkTables,
        EntityKind::Patents,
    ];
    let mut paths = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let path = dir.join(params.require(kind)?.key_columns_file());
        if !path.exists() {
            return Err(Error::MissingPrerequisite(path).into());
        }
        paths.push(path);
    }

    Ok(Exports {
        projects: KeyTable::read_csv(&paths[0])?,
        publications: KeyTable::read_csv(&paths[1])?,
        links: KeyTable::read_csv(&paths[2])?,
        patents: KeyTable::read_csv(&paths[3])?,
    })
}

/// Count the dangling references between projects, publications, the link
/// table and patents.
pub fn connectivity_stats(exports: &Exports, keys: &JoinKeys) -> Result<ConnectivityStats> {
    let project_numbers = exports.projects.column(&keys.project_number)?;

    let projects_links = outer_join_counts(
        &project_numbers,
        &exports.links.column(&keys.link_project_number)?,
    );
    let publications_links = outer_join_counts(
        &exports.publications.column(&keys.publication_id)?,
        &exports.links.column(&keys.publication_id)?,
    );
    let patents_projects = outer_join_counts(
        &exports.patents.column(&keys.patent_project_number)?,
        &project_numbers,
    );

    let stats = ConnectivityStats {
        publications_linked_to_inexistent_projects: projects_links.right_only,
        linked_publications: exports.publications.len(),
        projects_without_publications: projects_links.left_only,
        projects: exports.projects.len(),
        publications_without_link: publications_links.not_both(),
        patents_without_project: patents_projects.left_only,
        patents: exports.patents.len(),
        projects_without_patents: patents_projects.right_only,
    };
    info!(?stats, "connectivity computed");
    Ok(stats)
}
