//! Rule set builder
//!
//! Turns the tracker-domain list, the safelist and the feature flags into the
//! ordered rule list consumed by the content filter:
//!
//! 1. `make-https` over every URL, when HTTPS upgrade is on
//! 2. one blocking rule per group of [`MAX_DOMAINS_PER_RULE`] tracker domains,
//!    restricted to third-party loads
//! 3. `ignore-previous-rules` for safelisted sites, batched the same way
//!
//! The output only depends on the inputs, so compiling twice gives the same
//! bytes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tp_core::config::{FeatureConfig, FeatureFlags};
use tp_core::psl::PublicSuffix;
use tp_core::safelist::SafelistStore;
use tp_core::types::{
    Action, LoadType, Rule, RuleSet, Trigger, MATCH_ALL_FILTER, MAX_DOMAINS_PER_RULE, MAX_RULES_ALLOWED,
};

use crate::filter::{build_domain_filter, check_domain};
use crate::loader::{load_tracker_domains, LoadError};

/// Error type for rule compilation.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Tracker list unavailable: {0}")]
    Load(#[from] LoadError),
    #[error("Failed to serialize rules: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileStats {
    /// Tracker domains placed in blocking groups
    pub domains: usize,
    /// Domains rejected by the filter grammar
    pub skipped_domains: usize,
    pub blocking_rules: usize,
    pub safelist_rules: usize,
    pub https_rules: usize,
    /// Blocking groups dropped to stay under the rule ceiling
    pub truncated_groups: usize,
    pub total_rules: usize,
}

/// A compiled rule set and how it was put together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compiled {
    pub rules: RuleSet,
    pub stats: CompileStats,
}

impl Compiled {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serialize_rules(&self.rules)
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// Compile a rule set.
///
/// `safelist` entries are reduced to their registrable domain and emitted in
/// sorted order, so the order they are supplied in does not matter.
pub fn compile<I, S>(domains: &[String], safelist: I, config: &FeatureConfig, psl: &PublicSuffix) -> Compiled
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    compile_within(domains, safelist, config, psl, MAX_RULES_ALLOWED)
}

fn compile_within<I, S>(
    domains: &[String],
    safelist: I,
    config: &FeatureConfig,
    psl: &PublicSuffix,
    max_rules: usize,
) -> Compiled
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut stats = CompileStats::default();

    let mut accepted: Vec<&str> = Vec::with_capacity(domains.len());
    for domain in domains {
        match check_domain(domain) {
            Ok(()) => accepted.push(domain),
            Err(e) => {
                log::warn!("Skipping tracker domain '{}': {}", domain, e);
                stats.skipped_domains += 1;
            }
        }
    }
    stats.domains = accepted.len();

    let https_rules = https_rules(config);
    let safelist_rules = safelist_rules(safelist, psl);

    let mut blocking_rules = Vec::new();
    if let Some(action) = config.blocking_action() {
        let groups: Vec<&[&str]> = accepted.chunks(MAX_DOMAINS_PER_RULE).collect();
        let budget = max_rules.saturating_sub(https_rules.len() + safelist_rules.len());

        let kept = if groups.len() > budget {
            stats.truncated_groups = groups.len() - budget;
            log::warn!(
                "Rule ceiling of {} reached, dropping {} of {} blocking groups",
                max_rules,
                stats.truncated_groups,
                groups.len()
            );
            &groups[..budget]
        } else {
            &groups[..]
        };

        blocking_rules = kept.iter().map(|group| blocking_rule(group, action.clone())).collect();
    }

    stats.https_rules = https_rules.len();
    stats.blocking_rules = blocking_rules.len();
    stats.safelist_rules = safelist_rules.len();

    let mut rules = https_rules;
    rules.extend(blocking_rules);
    rules.extend(safelist_rules);
    stats.total_rules = rules.len();

    if rules.len() > max_rules {
        log::warn!("Safelist alone produces {} rules, above the ceiling of {}", rules.len(), max_rules);
    }

    log::info!(
        "Compiled {} rules: {} blocking over {} domains, {} safelist, {} https",
        stats.total_rules,
        stats.blocking_rules,
        stats.domains,
        stats.safelist_rules,
        stats.https_rules
    );

    Compiled { rules, stats }
}

fn https_rules(config: &FeatureConfig) -> Vec<Rule> {
    if config.upgrade_to_https {
        vec![Rule::new(Trigger::new(MATCH_ALL_FILTER), Action::MakeHttps)]
    } else {
        Vec::new()
    }
}

fn blocking_rule(domains: &[&str], action: Action) -> Rule {
    let trigger = Trigger::new(build_domain_filter(domains)).with_load_type(LoadType::ThirdParty);
    Rule::new(trigger, action)
}

fn safelist_rules<I, S>(safelist: I, psl: &PublicSuffix) -> Vec<Rule>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let sites: BTreeSet<String> = safelist
        .into_iter()
        .map(|domain| psl.registrable_domain(domain.as_ref()))
        .filter(|domain| !domain.is_empty())
        .collect();
    let sites: Vec<String> = sites.into_iter().collect();

    sites
        .chunks(MAX_DOMAINS_PER_RULE)
        .map(|batch| {
            // `*` makes the entry cover subdomains of the site as well
            let patterns = batch.iter().map(|site| format!("*{}", site)).collect();
            Rule::new(
                Trigger::new(MATCH_ALL_FILTER).with_if_domain(patterns),
                Action::IgnorePreviousRules,
            )
        })
        .collect()
}

/// Compact JSON encoding of a rule list, as loaded by the content filter.
pub fn serialize_rules(rules: &[Rule]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(rules)
}

/// Read back a serialized rule list.
pub fn parse_rules(bytes: &[u8]) -> Result<RuleSet, serde_json::Error> {
    serde_json::from_slice(bytes)
}

// =============================================================================
// Rule Compiler
// =============================================================================

/// Compiles the bundled domain list against the live safelist and flags.
pub struct RuleCompiler {
    domain_list: PathBuf,
    safelist: Arc<SafelistStore>,
    flags: FeatureFlags,
    psl: Arc<PublicSuffix>,
}

impl RuleCompiler {
    pub fn new(
        domain_list: impl Into<PathBuf>,
        safelist: Arc<SafelistStore>,
        flags: FeatureFlags,
        psl: Arc<PublicSuffix>,
    ) -> Self {
        Self {
            domain_list: domain_list.into(),
            safelist,
            flags,
            psl,
        }
    }

    pub fn domain_list(&self) -> &Path {
        &self.domain_list
    }

    pub fn safelist(&self) -> &Arc<SafelistStore> {
        &self.safelist
    }

    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    /// Compile with the current safelist and flag values.
    pub fn generate(&self) -> Result<Compiled, CompileError> {
        let domains = load_tracker_domains(&self.domain_list)?;
        Ok(compile(&domains, self.safelist.all(), &self.flags.config(), &self.psl))
    }

    /// Like [`generate`](Self::generate), but a missing or malformed domain
    /// list yields an empty rule set.
    pub fn generate_or_empty(&self) -> Compiled {
        match self.generate() {
            Ok(compiled) => compiled,
            Err(e) => {
                log::error!("{}, compiling an empty rule set", e);
                Compiled::default()
            }
        }
    }
}
