// src/fetch/mod.rs

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use tracing::debug;
use url::Url;

use crate::error::Error;

pub mod catalogue;
pub mod download;
pub mod links;
pub mod zips;

/// The only network capability the pipeline needs: GET a URL, get its bytes.
/// Every call is blocking and failures surface immediately; there is no
/// retry loop.
pub trait Fetch {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>>;
}

impl Fetch for Client {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        debug!("Fetching {}", url);
        let resp = self
            .get(url.clone())
            .send()
            .with_context(|| format!("GET {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let bytes = resp
            .bytes()
            .with_context(|| format!("reading body from {}", url))?;
        Ok(bytes.to_vec())
    }
}

/// Blocking client shared by every entity of a run.
pub fn client() -> Result<Client> {
    Client::builder()
        .cookie_store(true)
        .gzip(true)
        .build()
        .context("building HTTP client")
}
