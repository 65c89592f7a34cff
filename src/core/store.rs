// src/core/store.rs

//! Run persistence: the JSON results file and the prior-URL set incremental
//! mode filters against.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::errors::ScanError;
use crate::core::models::ScanOutput;

pub const RESULTS_FILE: &str = "results.json";

pub fn results_path(output_path: &Path) -> PathBuf {
    output_path.join(RESULTS_FILE)
}

/// Writes the run to `<output_path>/results.json`, creating the directory.
pub async fn save_results(output_path: &Path, output: &ScanOutput) -> Result<PathBuf, ScanError> {
    tokio::fs::create_dir_all(output_path).await?;
    let path = results_path(output_path);
    let json = serde_json::to_vec_pretty(output)?;
    tokio::fs::write(&path, json).await?;
    info!(path = %path.display(), results = output.results.len(), "Results saved.");
    Ok(path)
}

/// URLs recorded by a previous run.
///
/// A missing file means a first run. A file that cannot be read or parsed
/// is reported and treated the same way.
pub async fn load_prior_urls(path: &Path) -> HashSet<String> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashSet::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read previous results.");
            return HashSet::new();
        }
    };
    match serde_json::from_slice::<ScanOutput>(&bytes) {
        Ok(previous) => {
            let urls: HashSet<String> = previous.results.into_iter().map(|r| r.url).collect();
            info!(path = %path.display(), count = urls.len(), "Loaded previous results.");
            urls
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring malformed previous results.");
            HashSet::new()
        }
    }
}
