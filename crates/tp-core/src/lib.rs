//! TrackingShield Core Library
//!
//! Shared building blocks for tracking prevention: the content-blocker rule
//! model, persisted settings (feature flags and the per-site safelist), the
//! runtime blocklist matcher, and a coalescing background task processor.
//!
//! # Architecture
//!
//! Tracker blocking happens in two places. The platform's content filter
//! enforces a compiled JSON rule artifact (see `tp-compiler`). Independently,
//! [`BlocklistMatcher`] evaluates the same policy at runtime from an in-memory
//! domain set so blocked requests can be counted per page. Both read the same
//! safelist, so a site exemption takes effect in the matcher immediately and in
//! the content filter after the next compile.
//!
//! # Modules
//!
//! - `types`: Content-blocker rule model (trigger, action, rule)
//! - `store`: Key-value persistence and atomic file writes
//! - `config`: Feature flags backed by the store
//! - `safelist`: Per-site tracker exemptions
//! - `psl`: Public Suffix List for eTLD+1 extraction
//! - `url`: Allocation-free URL host extraction
//! - `matcher`: Runtime tracker matching
//! - `stats`: Per-page blocked-tracker statistics
//! - `task`: Coalescing serial background task processor

pub mod config;
pub mod matcher;
pub mod psl;
pub mod safelist;
pub mod stats;
pub mod store;
pub mod task;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use config::{FeatureConfig, FeatureFlags, Flag};
pub use matcher::{BlocklistMatcher, TrackerIndex};
pub use psl::{PslError, PublicSuffix};
pub use safelist::SafelistStore;
pub use stats::{PageStats, PageStatsCache, TrackingEntity, TrackingSummary};
pub use store::{write_atomic, JsonFileStore, KeyValueStore, MemoryStore, StoreError};
pub use task::{BackgroundExecution, ClosureTask, GrantId, NoBackgroundExecution, Task, TaskCoalescer};
pub use types::{Action, LoadType, ResourceType, Rule, RuleSet, Trigger};
