//! Public Suffix List (PSL) utilities for registrable-domain extraction
//!
//! A [`PublicSuffix`] resolves the eTLD+1 of a host. When a list is loaded it is
//! backed by the `publicsuffix` crate; otherwise it falls back to a heuristic
//! that knows the common two-part TLDs. Results are kept in a small
//! second-chance cache.
//!
//! # Examples
//!
//! ```
//! use tp_core::psl::PublicSuffix;
//!
//! let psl = PublicSuffix::fallback();
//! assert_eq!(psl.registrable_domain("sub.example.com"), "example.com");
//! assert_eq!(psl.registrable_domain("sub.example.co.uk"), "example.co.uk");
//! ```

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use publicsuffix::{List, Psl};

use crate::url::normalize_host;

const CACHE_CAPACITY: usize = 4096;

/// Error type for loading a public suffix list.
#[derive(Debug, thiserror::Error)]
pub enum PslError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid public suffix list: {0}")]
    Parse(String),
}

// =============================================================================
// Cache
// =============================================================================

struct CacheEntry {
    value: String,
    referenced: AtomicBool,
}

/// Fixed-size cache for eTLD+1 lookups with second-chance eviction.
///
/// A hit only sets the entry's reference bit, so lookups share a read lock.
/// On eviction, referenced entries are cleared and moved to the back once.
struct ClockCache {
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl ClockCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        entry.referenced.store(true, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    fn insert(&mut self, key: String, value: String) {
        if self.entries.contains_key(&key) {
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            let second_chance = self
                .entries
                .get(&oldest)
                .is_some_and(|e| e.referenced.swap(false, Ordering::Relaxed));
            if second_chance {
                self.order.push_back(oldest);
            } else {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                referenced: AtomicBool::new(false),
            },
        );
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Common two-part TLDs for the fallback heuristic.
const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
];

/// Registrable-domain resolver shared by the compiler, the safelist and the matcher.
pub struct PublicSuffix {
    list: Option<List>,
    cache: RwLock<ClockCache>,
}

impl PublicSuffix {
    /// Resolver that only uses the built-in heuristic.
    pub fn fallback() -> Self {
        Self {
            list: None,
            cache: RwLock::new(ClockCache::new(CACHE_CAPACITY)),
        }
    }

    /// Resolver backed by the text of a public suffix list (`public_suffix_list.dat`).
    pub fn from_list_str(text: &str) -> Result<Self, PslError> {
        let list = text.parse::<List>().map_err(|e| PslError::Parse(e.to_string()))?;
        Ok(Self {
            list: Some(list),
            cache: RwLock::new(ClockCache::new(CACHE_CAPACITY)),
        })
    }

    /// Load a public suffix list from disk.
    pub fn from_file(path: &Path) -> Result<Self, PslError> {
        let text = fs::read_to_string(path).map_err(|source| PslError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_list_str(&text)
    }

    /// Whether a real suffix list is loaded.
    pub fn has_list(&self) -> bool {
        self.list.is_some()
    }

    /// Get the eTLD+1 (registrable domain) for a hostname.
    ///
    /// The host is lowercased first. IP literals and bare suffixes are
    /// returned unchanged.
    pub fn registrable_domain(&self, host: &str) -> String {
        let host = normalize_host(host);

        if let Ok(cache) = self.cache.read() {
            if let Some(cached) = cache.get(&host) {
                return cached;
            }
        }

        let result = self.compute(&host);

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(host, result.clone());
        }

        result
    }

    /// Check if two hosts share the same eTLD+1.
    pub fn is_same_site(&self, host1: &str, host2: &str) -> bool {
        self.registrable_domain(host1) == self.registrable_domain(host2)
    }

    fn compute(&self, host: &str) -> String {
        if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
            return host.to_string();
        }

        if let Some(list) = &self.list {
            return match list.domain(host.as_bytes()) {
                Some(domain) => String::from_utf8_lossy(domain.as_bytes()).into_owned(),
                None => host.to_string(),
            };
        }

        let labels: Vec<&str> = host.split('.').collect();
        fallback_etld1(&labels)
    }
}

impl Default for PublicSuffix {
    fn default() -> Self {
        Self::fallback()
    }
}

/// Fallback eTLD+1 heuristic.
fn fallback_etld1(labels: &[&str]) -> String {
    let n = labels.len();
    if n <= 2 {
        return labels.join(".");
    }

    let last_two = format!("{}.{}", labels[n - 2], labels[n - 1]);
    if COMMON_TWO_PART_TLDS.contains(&last_two.as_str()) {
        return labels[n - 3..].join(".");
    }

    labels[n - 2..].join(".")
}

// =============================================================================
// Suffix Walking
// =============================================================================

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator for suffix-walking a host from full host down to its eTLD+1.
pub struct HostSuffixIter<'a> {
    current: &'a str,
    etld1_len: usize,
}

impl<'a> HostSuffixIter<'a> {
    pub fn new(host: &'a str, etld1: &str) -> Self {
        Self {
            current: host,
            etld1_len: etld1.len(),
        }
    }
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_empty() || self.current.len() < self.etld1_len {
            return None;
        }

        let result = self.current;

        self.current = match get_parent_domain(self.current) {
            Some(parent) if parent.len() >= self.etld1_len => parent,
            _ => "",
        };

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINI_LIST: &str = "// ===BEGIN ICANN DOMAINS===\ncom\nnet\nuk\nco.uk\n// ===END ICANN DOMAINS===\n";

    #[test]
    fn test_fallback_etld1_simple() {
        assert_eq!(fallback_etld1(&["example", "com"]), "example.com");
        assert_eq!(fallback_etld1(&["sub", "example", "com"]), "example.com");
    }

    #[test]
    fn test_fallback_etld1_two_part() {
        assert_eq!(fallback_etld1(&["sub", "example", "co", "uk"]), "example.co.uk");
        assert_eq!(fallback_etld1(&["example", "co", "uk"]), "example.co.uk");
    }

    #[test]
    fn test_registrable_domain_normalizes() {
        let psl = PublicSuffix::fallback();
        assert_eq!(psl.registrable_domain("WWW.Example.COM."), "example.com");
        assert_eq!(psl.registrable_domain("localhost"), "localhost");
        assert_eq!(psl.registrable_domain("192.168.1.10"), "192.168.1.10");
        // Second call is served from the cache
        assert_eq!(psl.registrable_domain("www.example.com"), "example.com");
    }

    #[test]
    fn test_registrable_domain_with_list() {
        let psl = PublicSuffix::from_list_str(MINI_LIST).expect("list should parse");
        assert!(psl.has_list());
        assert_eq!(psl.registrable_domain("a.b.example.co.uk"), "example.co.uk");
        assert_eq!(psl.registrable_domain("tracker.com"), "tracker.com");
        assert_eq!(psl.registrable_domain("ads.tracker.net"), "tracker.net");
    }

    #[test]
    fn test_is_same_site() {
        let psl = PublicSuffix::fallback();
        assert!(psl.is_same_site("cdn.example.com", "www.example.com"));
        assert!(!psl.is_same_site("example.com", "example.net"));
    }

    #[test]
    fn test_cache_eviction() {
        let mut cache = ClockCache::new(2);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        cache.insert("c".into(), "3".into());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn test_cache_hit_needs_no_write_access() {
        let mut cache = ClockCache::new(3);
        for key in ["a", "b", "c"] {
            cache.insert(key.into(), key.to_uppercase());
        }
        let shared = &cache;
        for _ in 0..3 {
            assert_eq!(shared.get("b").as_deref(), Some("B"));
        }

        // Unreferenced "a" goes first, referenced "b" gets a second chance
        cache.insert("d".into(), "D".into());
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").as_deref(), Some("B"));
        assert_eq!(cache.entries.len(), 3);
        assert_eq!(cache.order.len(), 3);
    }

    #[test]
    fn test_concurrent_lookups_share_cache() {
        let psl = std::sync::Arc::new(PublicSuffix::fallback());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let psl = psl.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let host = format!("h{}.site{}.com", i, i % 7);
                        assert_eq!(psl.registrable_domain(&host), format!("site{}.com", i % 7));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_get_parent_domain() {
        assert_eq!(get_parent_domain("sub.example.com"), Some("example.com"));
        assert_eq!(get_parent_domain("example.com"), Some("com"));
        assert_eq!(get_parent_domain("com"), None);
        assert_eq!(get_parent_domain(""), None);
    }

    #[test]
    fn test_host_suffix_iter() {
        let suffixes: Vec<&str> = HostSuffixIter::new("a.b.example.com", "example.com").collect();
        assert_eq!(suffixes, vec!["a.b.example.com", "b.example.com", "example.com"]);

        let suffixes: Vec<&str> = HostSuffixIter::new("example.com", "example.com").collect();
        assert_eq!(suffixes, vec!["example.com"]);
    }
}
