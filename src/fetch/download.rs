// src/fetch/download.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};
use url::Url;

use super::links::LinkedTable;
use super::{zips, Fetch};
use crate::config::EntityConfig;
use crate::error::Error;
use crate::process::date_parser::parse_remote_date;
use crate::process::utils::file_name_from_href;

/// One remote archive the catalogue points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    pub relative_path: String,
    pub remote_modified: Option<DateTime<Utc>>,
    pub size_hint: Option<String>,
}

impl DownloadDescriptor {
    /// Zip parallel columns into descriptors; every column must have one
    /// entry per path.
    pub fn from_columns(
        paths: Vec<String>,
        dates: Vec<Option<DateTime<Utc>>>,
        sizes: Option<Vec<Option<String>>>,
    ) -> Result<Vec<Self>> {
        if paths.len() != dates.len() {
            return Err(Error::config(format!(
                "{} files but {} last-update dates",
                paths.len(),
                dates.len()
            ))
            .into());
        }
        let sizes = match sizes {
            Some(s) if s.len() != paths.len() => {
                return Err(Error::config(format!(
                    "{} files but {} size hints",
                    paths.len(),
                    s.len()
                ))
                .into())
            }
            Some(s) => s,
            None => vec![None; paths.len()],
        };

        Ok(paths
            .into_iter()
            .zip(dates)
            .zip(sizes)
            .map(|((relative_path, remote_modified), size_hint)| Self {
                relative_path,
                remote_modified,
                size_hint,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadAction {
    Skipped,
    Fetched,
    Refreshed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub local_path: PathBuf,
    pub action: DownloadAction,
    pub extracted_paths: Vec<PathBuf>,
}

/// Result of one [`sync`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub outcomes: Vec<DownloadOutcome>,
}

impl SyncReport {
    pub fn local_paths(&self) -> Vec<PathBuf> {
        self.outcomes.iter().map(|o| o.local_path.clone()).collect()
    }

    /// Every archive member across all outcomes, fresh or not, in order.
    pub fn extracted_paths(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .flat_map(|o| o.extracted_paths.iter().cloned())
            .collect()
    }

    pub fn count(&self, action: DownloadAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }
}

/// Build descriptors from the CSV link column of a linked catalogue. Rows
/// without a CSV link are skipped with a warning.
pub fn descriptors_from_catalogue(
    linked: &LinkedTable,
    config: &EntityConfig,
) -> Result<Vec<DownloadDescriptor>> {
    let dates_col = linked.column(&config.last_updated_column);
    if dates_col.is_none() {
        warn!(
            entity = %config.name,
            column = %config.last_updated_column,
            "catalogue has no last-update column; existing files will never be refreshed"
        );
    }
    let sizes_col = config.size_column.as_deref().and_then(|c| linked.column(c));

    let mut paths = Vec::new();
    let mut dates = Vec::new();
    let mut sizes = sizes_col.as_ref().map(|_| Vec::new());

    for (row, link) in linked.csv_links.iter().enumerate() {
        let Some(link) = link else {
            warn!(entity = %config.name, row, "catalogue row has no CSV link; skipping");
            continue;
        };
        paths.push(link.clone());
        dates.push(
            dates_col
                .as_ref()
                .and_then(|c| c[row])
                .and_then(|s| parse_remote_date(s, &config.date_format)),
        );
        if let (Some(sizes), Some(col)) = (sizes.as_mut(), sizes_col.as_ref()) {
            sizes.push(col[row].filter(|s| !s.is_empty()).map(str::to_string));
        }
    }

    DownloadDescriptor::from_columns(paths, dates, sizes)
}

fn local_modified(path: &Path) -> Result<DateTime<Utc>> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("reading modification time of {}", path.display()))?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Fetch `url` into `dest`, going through a temporary file so a failed
/// transfer never leaves a file that later runs would take as up to date.
fn download<F: Fetch + ?Sized>(fetcher: &F, url: &Url, dest: &Path) -> Result<()> {
    let bytes = fetcher.fetch(url)?;
    let tmp = dest.with_extension("part");
    fs::write(&tmp, &bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, dest)
        .with_context(|| format!("renaming {} to {}", tmp.display(), dest.display()))?;
    Ok(())
}

/// Bring `dest_dir` in line with the remote files described by `descriptors`.
///
/// - absent locally → fetched
/// - remote strictly newer than the local mtime → refreshed
/// - otherwise skipped, without touching the network
///
/// With `unzip_to`, new bytes are extracted there; skipped archives are only
/// enumerated, so the returned member list always covers every file.
#[instrument(level = "info", skip_all, fields(dest = %dest_dir.display(), files = descriptors.len()))]
pub fn sync<F: Fetch + ?Sized>(
    fetcher: &F,
    descriptors: &[DownloadDescriptor],
    dest_dir: &Path,
    base_url: &Url,
    unzip_to: Option<&Path>,
) -> Result<SyncReport> {
    fs::create_dir_all(dest_dir).with_context(|| format!("creating {}", dest_dir.display()))?;
    if let Some(dir) = unzip_to {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut report = SyncReport::default();

    for d in descriptors {
        let name = file_name_from_href(&d.relative_path).ok_or_else(|| {
            Error::config(format!("cannot derive a file name from `{}`", d.relative_path))
        })?;
        let local_path = dest_dir.join(&name);
        let size = d.size_hint.as_deref().unwrap_or("");
        let url = base_url
            .join(&d.relative_path)
            .with_context(|| format!("resolving {} against {}", d.relative_path, base_url))?;

        let action = if !local_path.exists() {
            info!("downloading \"{}\" {}", local_path.display(), size);
            download(fetcher, &url, &local_path)?;
            DownloadAction::Fetched
        } else {
            let local = local_modified(&local_path)?;
            match d.remote_modified {
                Some(remote) if remote > local => {
                    info!("updating \"{}\" {}", local_path.display(), size);
                    download(fetcher, &url, &local_path)?;
                    DownloadAction::Refreshed
                }
                _ => {
                    info!("found up-to-date \"{}\" {}", local_path.display(), size);
                    DownloadAction::Skipped
                }
            }
        };

        let extracted_paths = match (unzip_to, action) {
            (None, _) => Vec::new(),
            (Some(dir), DownloadAction::Skipped) => zips::list_members(&local_path, dir)?,
            (Some(dir), _) => zips::extract_all(&local_path, dir)?,
        };

        report.outcomes.push(DownloadOutcome {
            local_path,
            action,
            extracted_paths,
        });
    }

    info!(
        fetched = report.count(DownloadAction::Fetched),
        refreshed = report.count(DownloadAction::Refreshed),
        skipped = report.count(DownloadAction::Skipped),
        "sync complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::FakeFetcher;
    use crate::fetch::zips::tests::zip_bytes;
    use crate::process::tests::with_captured_logs;
    use chrono::Duration;
    use tempfile::tempdir;

    const BASE: &str = "https://exporter.example.org/";

    fn descriptor(path: &str, remote: Option<DateTime<Utc>>) -> DownloadDescriptor {
        DownloadDescriptor {
            relative_path: path.to_string(),
            remote_modified: remote,
            size_hint: Some("1 MB".to_string()),
        }
    }

    fn fetcher() -> FakeFetcher {
        FakeFetcher::default()
            .with(
                "https://exporter.example.org/files/PRJ_2019.zip",
                zip_bytes(&[("PRJ_2019.csv", b"ID\n1\n")]),
            )
            .with(
                "https://exporter.example.org/files/PRJ_2020.zip",
                zip_bytes(&[("PRJ_2020.csv", b"ID\n2\n")]),
            )
    }

    #[test]
    fn second_sync_with_unchanged_dates_fetches_nothing() -> Result<()> {
        let tmp = tempdir()?;
        let dest = tmp.path().join("downloads");
        let unzip = dest.join("unzipped");
        let base = Url::parse(BASE)?;
        let fetcher = fetcher();
        let yesterday = Some(Utc::now() - Duration::days(1));
        let descriptors = vec![
            descriptor("files/PRJ_2019.zip", yesterday),
            descriptor("files/PRJ_2020.zip", None),
        ];

        let first = sync(&fetcher, &descriptors, &dest, &base, Some(&unzip))?;
        assert_eq!(fetcher.call_count(), 2);
        assert_eq!(first.count(DownloadAction::Fetched), 2);
        assert_eq!(
            first.extracted_paths(),
            vec![unzip.join("PRJ_2019.csv"), unzip.join("PRJ_2020.csv")]
        );

        let second = sync(&fetcher, &descriptors, &dest, &base, Some(&unzip))?;
        assert_eq!(fetcher.call_count(), 2, "no network on the second pass");
        assert_eq!(second.count(DownloadAction::Skipped), 2);
        assert_eq!(second.extracted_paths(), first.extracted_paths());
        assert_eq!(second.local_paths(), first.local_paths());
        Ok(())
    }

    #[test]
    fn newer_remote_date_refreshes_exactly_once() -> Result<()> {
        let tmp = tempdir()?;
        let dest = tmp.path().to_path_buf();
        let base = Url::parse(BASE)?;
        fs::write(dest.join("PRJ_2019.zip"), b"stale")?;
        let fetcher = fetcher();

        let tomorrow = Some(Utc::now() + Duration::days(1));
        let report = sync(
            &fetcher,
            &[descriptor("files/PRJ_2019.zip", tomorrow)],
            &dest,
            &base,
            None,
        )?;

        assert_eq!(report.outcomes[0].action, DownloadAction::Refreshed);
        assert_eq!(fetcher.call_count(), 1);
        assert!(report.outcomes[0].extracted_paths.is_empty());
        assert_ne!(fs::read(dest.join("PRJ_2019.zip"))?, b"stale");
        Ok(())
    }

    #[test]
    fn failed_fetch_is_an_error_not_a_skip() -> Result<()> {
        let tmp = tempdir()?;
        let base = Url::parse(BASE)?;
        let fetcher = FakeFetcher::default();
        let err = sync(
            &fetcher,
            &[descriptor("files/missing.zip", None)],
            tmp.path(),
            &base,
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Fetch { status: 404, .. })
        ));
        assert!(!tmp.path().join("missing.zip").exists());
        Ok(())
    }

    #[test]
    fn column_lengths_must_agree() {
        let err = DownloadDescriptor::from_columns(
            vec!["a.zip".into(), "b.zip".into()],
            vec![None, None],
            Some(vec![None]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("size hints"));
    }

    #[test]
    fn missing_last_update_column_is_warned_about() -> Result<()> {
        use crate::config::Parameters;
        use crate::entity::EntityKind;
        use crate::fetch::catalogue::HtmlTable;

        let params = Parameters::from_yaml_str(
            r#"
common:
  homepage: https://exporter.example.org/
  relative_path: Catalog.aspx
  table_number: 0
  output: {downloads_directory: downloads, unzipped_files_directory: unzipped}
  last_updated_column: Updated
projects: {name: projects, cache_file: projects.parquet}
"#,
        )?;
        let config = params.require(EntityKind::Projects)?;
        let linked = LinkedTable {
            table: HtmlTable {
                headers: vec!["Year".into()],
                rows: vec![vec!["2019".into()]],
                hyperlinks: Vec::new(),
            },
            file_type: "projects".into(),
            xml_links: None,
            csv_links: vec![Some("files/PRJ_2019.zip".into())],
            years: vec![Some(2019)],
        };

        let (descriptors, logs) =
            with_captured_logs(|| descriptors_from_catalogue(&linked, config));
        let descriptors = descriptors?;
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].remote_modified, None);
        assert!(logs.contains("WARN"));
        assert!(logs.contains("existing files will never be refreshed"));
        Ok(())
    }
}
