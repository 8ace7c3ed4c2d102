//! Per-site tracker safelist
//!
//! The set of sites on which the user has allowed trackers. Entries are
//! normalized to their registrable domain, so the compiled `if-domain` rules and
//! the runtime matcher agree on what an entry covers.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::psl::PublicSuffix;
use crate::store::{KeyValueStore, StoreError};

/// Storage key for the safelist.
pub const SAFELIST_KEY: &str = "unblockedDomains";

/// Persisted set of exempted site domains.
pub struct SafelistStore {
    store: Arc<dyn KeyValueStore>,
    psl: Arc<PublicSuffix>,
    domains: RwLock<BTreeSet<String>>,
}

impl SafelistStore {
    /// Load the safelist from `store`. A missing key is an empty safelist.
    pub fn load(store: Arc<dyn KeyValueStore>, psl: Arc<PublicSuffix>) -> Self {
        let mut domains = BTreeSet::new();
        match store.get(SAFELIST_KEY) {
            Some(Value::Array(values)) => {
                for value in values {
                    match value.as_str().map(|d| psl.registrable_domain(d)) {
                        Some(domain) if !domain.is_empty() => {
                            domains.insert(domain);
                        }
                        _ => log::warn!("Ignoring invalid safelist entry {}", value),
                    }
                }
            }
            Some(other) => log::warn!("Safelist has unexpected value {}, starting empty", other),
            None => {}
        }

        Self {
            store,
            psl,
            domains: RwLock::new(domains),
        }
    }

    fn normalize(&self, domain: &str) -> String {
        self.psl.registrable_domain(domain)
    }

    /// Allow trackers on `domain`. Returns whether the safelist changed.
    pub fn allow(&self, domain: &str) -> Result<bool, StoreError> {
        let domain = self.normalize(domain);
        if domain.is_empty() {
            return Ok(false);
        }

        let mut domains = self.domains.write().map_err(|_| StoreError::Poisoned)?;
        if !domains.insert(domain.clone()) {
            return Ok(false);
        }
        if let Err(e) = self.persist(&domains) {
            domains.remove(&domain);
            return Err(e);
        }

        log::info!("Allowed trackers on {}", domain);
        Ok(true)
    }

    /// Block trackers on `domain` again. Returns whether the safelist changed.
    pub fn disallow(&self, domain: &str) -> Result<bool, StoreError> {
        let domain = self.normalize(domain);

        let mut domains = self.domains.write().map_err(|_| StoreError::Poisoned)?;
        if !domains.remove(&domain) {
            return Ok(false);
        }
        if let Err(e) = self.persist(&domains) {
            domains.insert(domain);
            return Err(e);
        }

        log::info!("Blocking trackers on {} again", domain);
        Ok(true)
    }

    /// Whether trackers are allowed on the site `domain` belongs to.
    pub fn contains(&self, domain: &str) -> bool {
        let domain = self.normalize(domain);
        self.contains_normalized(&domain)
    }

    /// Lookup for a domain that is already a registrable domain.
    pub fn contains_normalized(&self, domain: &str) -> bool {
        self.domains
            .read()
            .map(|domains| domains.contains(domain))
            .unwrap_or(false)
    }

    /// All exempted domains, sorted.
    pub fn all(&self) -> Vec<String> {
        self.domains
            .read()
            .map(|domains| domains.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.domains.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, domains: &BTreeSet<String>) -> Result<(), StoreError> {
        let values = domains.iter().cloned().map(Value::String).collect();
        self.store.set(SAFELIST_KEY, Value::Array(values))
    }
}
