// src/entity/mod.rs

use anyhow::Result;

use crate::config::{EntityConfig, Pairing};
use crate::dataset::EntityDataset;
use crate::fetch::links::LinkedTable;
use crate::store::CacheFormat;

pub mod bunch;
pub mod post;

pub use bunch::{CacheState, DataBunch};

/// The dataset kinds the exporter publishes. Declaration order is run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Projects,
    Publications,
    Patents,
    LinkTables,
    Affiliations,
    Abstracts,
    ClinicalStudies,
}

/// What sets one entity variant apart from the shared pipeline.
#[derive(Clone, Copy)]
pub struct Capabilities {
    /// Applied to the linked catalogue before any download.
    pub prepare_catalogue: fn(&mut LinkedTable, &EntityConfig),
    /// Applied to the consolidated dataset before it is cached.
    pub post_process: fn(EntityDataset) -> Result<EntityDataset>,
    pub cache_format: CacheFormat,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Projects,
        EntityKind::Publications,
        EntityKind::Patents,
        EntityKind::LinkTables,
        EntityKind::Affiliations,
        EntityKind::Abstracts,
        EntityKind::ClinicalStudies,
    ];

    /// Key of the entity's block in the parameters file.
    pub fn key(self) -> &'static str {
        match self {
            EntityKind::Projects => "projects",
            EntityKind::Publications => "publications",
            EntityKind::Patents => "patents",
            EntityKind::LinkTables => "link_tables",
            EntityKind::Affiliations => "affiliations",
            EntityKind::Abstracts => "abstracts",
            EntityKind::ClinicalStudies => "clinical_studies",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }

    /// Pairing used when the parameters give none. Affiliations has no
    /// default: its link pattern is site-specific and must be configured.
    pub fn default_pairing(self) -> Option<Pairing> {
        match self {
            EntityKind::Projects
            | EntityKind::Publications
            | EntityKind::LinkTables
            | EntityKind::Abstracts => Some(Pairing::Positional),
            EntityKind::Patents | EntityKind::ClinicalStudies => Some(Pairing::CsvOnly),
            EntityKind::Affiliations => None,
        }
    }

    pub fn capabilities(self) -> Capabilities {
        let cache_format = match self {
            EntityKind::Abstracts => CacheFormat::Object,
            _ => CacheFormat::Columnar,
        };
        match self {
            EntityKind::Projects => Capabilities {
                prepare_catalogue: post::keep_catalogue,
                post_process: post::projects,
                cache_format,
            },
            EntityKind::Publications => Capabilities {
                prepare_catalogue: post::keep_catalogue,
                post_process: post::publications,
                cache_format,
            },
            EntityKind::Affiliations => Capabilities {
                prepare_catalogue: post::affiliations_catalogue,
                post_process: post::identity,
                cache_format,
            },
            EntityKind::Patents
            | EntityKind::LinkTables
            | EntityKind::Abstracts
            | EntityKind::ClinicalStudies => Capabilities {
                prepare_catalogue: post::keep_catalogue,
                post_process: post::identity,
                cache_format,
            },
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
