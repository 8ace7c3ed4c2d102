//! Tracker domain list loader
//!
//! The bundled list is a flat JSON array of domain strings.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::Value;

/// Error type for loading the tracker domain list.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid domain list JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Domain list is not a JSON array")]
    NotAnArray,
}

/// Parse the domain list, keeping list order.
///
/// Entries are lowercased and stripped of surrounding dots. Empty entries,
/// non-string entries and repeats are skipped.
pub fn parse_tracker_domains(text: &str) -> Result<Vec<String>, LoadError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(entries) = value else {
        return Err(LoadError::NotAnArray);
    };

    let mut seen = HashSet::with_capacity(entries.len());
    let mut domains = Vec::with_capacity(entries.len());

    for entry in entries {
        let Some(raw) = entry.as_str() else {
            log::warn!("Skipping non-string domain list entry {}", entry);
            continue;
        };
        let Some(domain) = normalize_domain(raw) else {
            log::debug!("Skipping empty domain list entry");
            continue;
        };
        if seen.insert(domain.clone()) {
            domains.push(domain);
        } else {
            log::debug!("Skipping repeated domain {}", domain);
        }
    }

    Ok(domains)
}

/// Read and parse the domain list at `path`.
pub fn load_tracker_domains(path: &Path) -> Result<Vec<String>, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let domains = parse_tracker_domains(&text)?;
    log::debug!("Loaded {} tracker domains from '{}'", domains.len(), path.display());
    Ok(domains)
}

fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}
