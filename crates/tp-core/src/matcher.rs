//! Runtime tracker matching
//!
//! The compiled rule artifact is enforced by the platform's content filter.
//! This module re-evaluates the same policy so blocked requests can be
//! attributed to the page that made them. It never reads the artifact: it keeps
//! a flat in-memory set built from the same tracker-domain list.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use crate::psl::{HostSuffixIter, PublicSuffix};
use crate::safelist::SafelistStore;
use crate::stats::PageStats;
use crate::types::check_filter_grammar;
use crate::url::{extract_host, is_web_scheme, normalize_host};

// =============================================================================
// Tracker Index
// =============================================================================

/// Read-only set of tracker domains, filled once at startup.
#[derive(Default)]
pub struct TrackerIndex {
    domains: OnceLock<HashSet<String>>,
}

impl TrackerIndex {
    /// Empty, not-yet-loaded index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index that is ready immediately.
    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let index = Self::new();
        index.install(domains);
        index
    }

    /// Fill the index. Only the first call has an effect.
    ///
    /// Domains the rule compiler would skip are left out too, so both paths
    /// block the same hosts.
    pub fn install<I, S>(&self, domains: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: HashSet<String> = domains
            .into_iter()
            .map(|d| normalize_host(d.as_ref()))
            .filter(|d| !d.is_empty())
            .filter(|d| match check_filter_grammar(d) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Skipping tracker domain '{}': {}", d, e);
                    false
                }
            })
            .collect();
        let count = set.len();
        let installed = self.domains.set(set).is_ok();
        if installed {
            log::info!("Tracker index ready with {} domains", count);
        } else {
            log::warn!("Tracker index already loaded, ignoring reload");
        }
        installed
    }

    /// Load the index on a background thread.
    ///
    /// `load` runs off the calling thread; until it finishes every lookup
    /// misses. A failed load leaves the index empty and matching disabled.
    pub fn spawn_load<F, E>(self: &Arc<Self>, load: F) -> JoinHandle<()>
    where
        F: FnOnce() -> Result<Vec<String>, E> + Send + 'static,
        E: std::fmt::Display,
    {
        let index = Arc::clone(self);
        thread::spawn(move || match load() {
            Ok(domains) => {
                index.install(domains);
            }
            Err(e) => log::error!("Failed to load tracker domains, matching disabled: {}", e),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.domains.get().is_some()
    }

    pub fn len(&self) -> usize {
        self.domains.get().map_or(0, |d| d.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact membership test on a normalized domain.
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.get().is_some_and(|d| d.contains(domain))
    }
}

// =============================================================================
// Blocklist Matcher
// =============================================================================

/// Decides whether a request made by a page is a blocked tracker.
#[derive(Clone)]
pub struct BlocklistMatcher {
    index: Arc<TrackerIndex>,
    safelist: Arc<SafelistStore>,
    psl: Arc<PublicSuffix>,
}

impl BlocklistMatcher {
    pub fn new(index: Arc<TrackerIndex>, safelist: Arc<SafelistStore>, psl: Arc<PublicSuffix>) -> Self {
        Self { index, safelist, psl }
    }

    pub fn index(&self) -> &Arc<TrackerIndex> {
        &self.index
    }

    /// Whether `request_url`, loaded by the page at `page_url`, is a blocked tracker.
    ///
    /// Fails open: malformed URLs, first-party requests, safelisted pages and
    /// an index that is still loading all report `false`.
    pub fn is_blocked(&self, request_url: &str, page_url: &str) -> bool {
        self.blocked_host(request_url, page_url).is_some()
    }

    /// Like [`is_blocked`](Self::is_blocked), and on a hit appends the request
    /// host to `stats`.
    pub fn record_if_blocked(&self, request_url: &str, page_url: &str, stats: &mut PageStats) -> bool {
        match self.blocked_host(request_url, page_url) {
            Some(host) => {
                stats.record(host);
                true
            }
            None => false,
        }
    }

    fn blocked_host(&self, request_url: &str, page_url: &str) -> Option<String> {
        if !self.index.is_ready() || !is_web_scheme(request_url) {
            return None;
        }

        let req_host = normalize_host(extract_host(request_url)?);
        if req_host.is_empty() {
            return None;
        }
        let page_host = extract_host(page_url).map(normalize_host)?;

        let req_etld1 = self.psl.registrable_domain(&req_host);
        let page_etld1 = self.psl.registrable_domain(&page_host);

        // First-party requests are never trackers
        if req_etld1 == page_etld1 {
            return None;
        }

        // Site-level exemption
        if self.safelist.contains_normalized(&page_etld1) {
            return None;
        }

        // Walk from the full host down to the eTLD+1, like `(.+\.)?domain`
        let listed = HostSuffixIter::new(&req_host, &req_etld1).any(|suffix| self.index.contains(suffix));
        if listed {
            log::debug!("Blocked tracker {} on {}", req_host, page_etld1);
            Some(req_host)
        } else {
            None
        }
    }
}
