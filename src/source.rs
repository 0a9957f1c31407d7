//! Resolves dataset locators into raw bytes.

use reqwest::blocking::Client;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Something that can turn a source locator into the bytes it names.
pub trait Fetch: Send + Sync {
    fn fetch(&self, locator: &str) -> PipelineResult<Vec<u8>>;
}

/// Fetches `http(s)://` locators over the network and everything else from
/// the local filesystem (`file://` prefix optional).
pub struct SourceFetcher {
    client: Client,
}

impl SourceFetcher {
    pub fn new() -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::unavailable("http client", e))?;
        Ok(Self { client })
    }

    fn fetch_remote(&self, locator: &str) -> PipelineResult<Vec<u8>> {
        let response = self
            .client
            .get(locator)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::unavailable(locator, e))?;
        let body = response
            .bytes()
            .map_err(|e| PipelineError::unavailable(locator, e))?;
        Ok(body.to_vec())
    }
}

impl Fetch for SourceFetcher {
    fn fetch(&self, locator: &str) -> PipelineResult<Vec<u8>> {
        debug!("Fetching {}", locator);
        if is_remote(locator) {
            self.fetch_remote(locator)
        } else {
            read_local(locator)
        }
    }
}

fn is_remote(locator: &str) -> bool {
    let lower = locator.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn read_local(locator: &str) -> PipelineResult<Vec<u8>> {
    let path = locator.strip_prefix("file://").unwrap_or(locator);
    fs::read(Path::new(path)).map_err(|e| PipelineError::unavailable(locator, e))
}
