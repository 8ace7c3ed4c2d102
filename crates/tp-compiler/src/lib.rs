//! TrackingShield Rule Compiler
//!
//! This crate compiles the bundled tracker-domain list, the user's safelist and
//! the feature flags into the JSON rule list loaded by the platform's content
//! filter, and keeps that artifact on disk up to date.

pub mod builder;
pub mod filter;
pub mod loader;
pub mod persister;

pub use builder::{compile, parse_rules, serialize_rules, CompileError, CompileStats, Compiled, RuleCompiler};
pub use filter::{build_domain_filter, check_filter_grammar, escape_domain, GrammarError};
pub use loader::{load_tracker_domains, parse_tracker_domains, LoadError};
pub use persister::{ArtifactWrite, RuleArtifactPersister, WriteReport};
