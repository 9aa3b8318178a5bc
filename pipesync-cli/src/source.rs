//! Loading pipeline documents from disk or over HTTP.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use pipesync_core::document::Document;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Raw text of the upstream pipeline. Relative file paths resolve against `base`.
pub fn fetch_upstream_text(location: &str, base: &Path) -> Result<String> {
    if is_remote(location) {
        tracing::debug!("fetching {location}");
        let response = match ureq::get(location).timeout(FETCH_TIMEOUT).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => bail!("GET {location} returned HTTP {code}"),
            Err(err) => return Err(err).with_context(|| format!("failed to fetch {location}")),
        };
        return response
            .into_string()
            .with_context(|| format!("failed to read response body from {location}"));
    }

    let path = base.join(location);
    std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read upstream {}", path.display()))
}

pub fn load_upstream(location: &str, base: &Path) -> Result<Document> {
    let text = fetch_upstream_text(location, base)?;
    Document::from_yaml_str(&text).with_context(|| format!("failed to parse upstream {location}"))
}

pub fn load_local(path: &Path) -> Result<Document> {
    if !path.exists() {
        bail!("local pipeline not found: {}", path.display());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Document::from_yaml_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}
