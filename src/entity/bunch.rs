// src/entity/bunch.rs

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::config::EntityConfig;
use crate::dataset::EntityDataset;
use crate::fetch::{
    catalogue::fetch_catalogue,
    download::{descriptors_from_catalogue, sync},
    links::extract_links,
    Fetch,
};
use crate::process::{consolidate, utils::is_csv};
use crate::store;

/// Whether a bunch holds its dataset yet. There is no in-between state:
/// the dataset is assigned only once the whole pipeline has succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheState {
    NotLoaded,
    Loaded(EntityDataset),
}

impl CacheState {
    pub fn dataset(&self) -> Option<&EntityDataset> {
        match self {
            CacheState::NotLoaded => None,
            CacheState::Loaded(ds) => Some(ds),
        }
    }
}

/// One entity's dataset, built on first use: from the binary cache when it
/// exists, otherwise by scraping the catalogue, syncing its archives and
/// consolidating their CSV members.
pub struct DataBunch<'a, F: Fetch + ?Sized> {
    config: &'a EntityConfig,
    fetcher: &'a F,
    state: CacheState,
}

impl<'a, F: Fetch + ?Sized> DataBunch<'a, F> {
    pub fn new(config: &'a EntityConfig, fetcher: &'a F) -> Self {
        Self {
            config,
            fetcher,
            state: CacheState::NotLoaded,
        }
    }

    pub fn config(&self) -> &'a EntityConfig {
        self.config
    }

    pub fn state(&self) -> &CacheState {
        &self.state
    }

    /// The entity's dataset. Later calls return the in-memory value without
    /// touching disk or network.
    #[instrument(level = "info", skip(self), fields(entity = %self.config.name))]
    pub fn get(&mut self) -> Result<&EntityDataset> {
        if matches!(self.state, CacheState::NotLoaded) {
            let dataset = self.build()?;
            self.state = CacheState::Loaded(dataset);
        }
        self.state
            .dataset()
            .ok_or_else(|| anyhow!("`{}` dataset was not loaded", self.config.name))
    }

    /// Give up the dataset, loading it first if needed.
    pub fn into_dataset(mut self) -> Result<EntityDataset> {
        self.get()?;
        match self.state {
            CacheState::Loaded(ds) => Ok(ds),
            CacheState::NotLoaded => Err(anyhow!("`{}` dataset was not loaded", self.config.name)),
        }
    }

    /// Write the entity's key columns to `path`, loading the dataset first
    /// if needed.
    pub fn export_key_columns(&mut self, path: &Path, drop_nulls: bool) -> Result<usize> {
        let config = self.config;
        self.get()?
            .export_key_columns(&config.key_columns, path, drop_nulls)
    }

    fn build(&self) -> Result<EntityDataset> {
        let config = self.config;
        let caps = config.kind.capabilities();

        if config.cache_file.exists() {
            return store::load(&config.cache_file, caps.cache_format);
        }
        info!("no cache at {}; building from the catalogue", config.cache_file.display());

        let table = fetch_catalogue(self.fetcher, config)?;
        let mut linked = extract_links(
            table,
            &config.ignore_patterns,
            &config.pairing,
            &config.name,
        )?;
        (caps.prepare_catalogue)(&mut linked, config);
        info!(rows = linked.num_rows(), "catalogue links resolved");

        let descriptors = descriptors_from_catalogue(&linked, config)?;
        let unzip_dir = config.unzip_dir();
        let report = sync(
            self.fetcher,
            &descriptors,
            &config.download_dir(),
            &config.homepage,
            Some(&unzip_dir),
        )?;

        let csv_files: Vec<PathBuf> = report
            .extracted_paths()
            .into_iter()
            .filter(|p| is_csv(p))
            .collect();
        if let Some(missing) = csv_files.iter().find(|p| !p.exists()) {
            return Err(anyhow!(
                "{} is listed in an up-to-date archive but missing on disk; delete the archive to extract it again",
                missing.display()
            ));
        }

        let dataset = consolidate(&csv_files, &config.data_types)?;
        let dataset = (caps.post_process)(dataset)
            .with_context(|| format!("post-processing `{}`", config.name))?;

        store::save(&dataset, &config.cache_file, caps.cache_format)?;
        Ok(dataset)
    }
}
