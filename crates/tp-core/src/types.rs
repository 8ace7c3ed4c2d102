//! Content-blocker rule types
//!
//! These types serialize byte-for-byte to the JSON vocabulary understood by the
//! platform's native content filter (`url-filter`, `if-domain`, `load-type`,
//! `type`, `selector`, ...). Field order is fixed by declaration order and
//! absent optional fields are omitted, so serialization is deterministic.

use serde::{Deserialize, Serialize};

/// Maximum number of domains combined into a single rule.
pub const MAX_DOMAINS_PER_RULE: usize = 20;

/// Maximum number of rules the content filter accepts in one list.
pub const MAX_RULES_ALLOWED: usize = 50_000;

/// Filter that matches every URL.
pub const MATCH_ALL_FILTER: &str = ".*";

// =============================================================================
// Filter Grammar
// =============================================================================

/// Constructs the content filter cannot compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("alternation '|' at byte {0}")]
    Disjunction(usize),
    #[error("counted repetition '{ch}' at byte {pos}")]
    Quantifier { ch: char, pos: usize },
    #[error("non-ASCII character {ch:?} at byte {pos}")]
    NonAscii { ch: char, pos: usize },
}

/// Reject constructs outside the content filter's regex dialect: no `|`
/// alternation, no `{n,m}` counted repetition, ASCII only.
///
/// Escaping a domain only inserts backslashes, so a bare domain passes exactly
/// when its escaped form does. The compiler and the runtime index both use this
/// to decide which tracker domains they accept.
pub fn check_filter_grammar(filter: &str) -> Result<(), GrammarError> {
    for (pos, ch) in filter.char_indices() {
        match ch {
            '|' => return Err(GrammarError::Disjunction(pos)),
            '{' | '}' => return Err(GrammarError::Quantifier { ch, pos }),
            c if !c.is_ascii() => return Err(GrammarError::NonAscii { ch, pos }),
            _ => {}
        }
    }
    Ok(())
}

// =============================================================================
// Actions
// =============================================================================

/// Action to take for a triggered rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    /// Cancel the request
    Block,
    /// Strip cookies from the request
    BlockCookies,
    /// Rewrite http/ws to https/wss
    MakeHttps,
    /// Ignore every rule listed before this one
    IgnorePreviousRules,
    /// Hide elements matching the selector
    CssDisplayNone { selector: String },
}

impl Action {
    /// Whether this action blocks tracking (requests or cookies).
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Block | Self::BlockCookies)
    }

    /// Engine name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::BlockCookies => "block-cookies",
            Self::MakeHttps => "make-https",
            Self::IgnorePreviousRules => "ignore-previous-rules",
            Self::CssDisplayNone { .. } => "css-display-none",
        }
    }
}

// =============================================================================
// Trigger Options
// =============================================================================

/// Resource types a trigger can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Document,
    Image,
    StyleSheet,
    Script,
    Font,
    Raw,
    SvgDocument,
    Media,
    Popup,
}

/// Load types: whether the request is same-site with the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadType {
    FirstParty,
    ThirdParty,
}

// =============================================================================
// Trigger
// =============================================================================

/// Condition under which a rule's action applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Trigger {
    pub url_filter: String,
    #[serde(default)]
    pub url_filter_is_case_sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_domain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless_domain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<Vec<ResourceType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_type: Option<Vec<LoadType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_top_url: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless_top_url: Option<Vec<String>>,
}

impl Trigger {
    /// Trigger on a URL filter with no further restrictions.
    pub fn new(url_filter: impl Into<String>) -> Self {
        Self {
            url_filter: url_filter.into(),
            url_filter_is_case_sensitive: false,
            if_domain: None,
            unless_domain: None,
            resource_type: None,
            load_type: None,
            if_top_url: None,
            unless_top_url: None,
        }
    }

    /// Restrict to the given load type.
    pub fn with_load_type(mut self, load_type: LoadType) -> Self {
        self.load_type = Some(vec![load_type]);
        self
    }

    /// Restrict to pages on the given domains (`*` prefix = include subdomains).
    pub fn with_if_domain(mut self, domains: Vec<String>) -> Self {
        self.if_domain = Some(domains);
        self
    }
}

// =============================================================================
// Rule / RuleSet
// =============================================================================

/// A single content-blocker rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub trigger: Trigger,
    pub action: Action,
}

impl Rule {
    pub fn new(trigger: Trigger, action: Action) -> Self {
        Self { trigger, action }
    }
}

/// Ordered rule list. Later rules may override earlier ones.
pub type RuleSet = Vec<Rule>;

/// Per-action rule counts of a rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSetSummary {
    pub total: usize,
    pub block: usize,
    pub block_cookies: usize,
    pub make_https: usize,
    pub ignore_previous: usize,
    pub css_display_none: usize,
}

impl RuleSetSummary {
    pub fn of(rules: &[Rule]) -> Self {
        let mut summary = Self {
            total: rules.len(),
            ..Self::default()
        };
        for rule in rules {
            match rule.action {
                Action::Block => summary.block += 1,
                Action::BlockCookies => summary.block_cookies += 1,
                Action::MakeHttps => summary.make_https += 1,
                Action::IgnorePreviousRules => summary.ignore_previous += 1,
                Action::CssDisplayNone { .. } => summary.css_display_none += 1,
            }
        }
        summary
    }
}

/// Check that every override rule follows every blocking rule.
pub fn overrides_follow_blocking(rules: &[Rule]) -> bool {
    let last_blocking = rules.iter().rposition(|r| r.action.is_blocking());
    let first_override = rules
        .iter()
        .position(|r| r.action == Action::IgnorePreviousRules);
    match (last_blocking, first_override) {
        (Some(block), Some(ignore)) => ignore > block,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_blocking_rule() {
        let rule = Rule::new(
            Trigger::new("^https?://a\\.com/").with_load_type(LoadType::ThirdParty),
            Action::Block,
        );
        let json = serde_json::to_string(&rule).unwrap();
        assert_eq!(
            json,
            r#"{"trigger":{"url-filter":"^https?://a\\.com/","url-filter-is-case-sensitive":false,"load-type":["third-party"]},"action":{"type":"block"}}"#
        );
    }

    #[test]
    fn serializes_action_vocabulary() {
        let actions = [
            (Action::Block, r#"{"type":"block"}"#),
            (Action::BlockCookies, r#"{"type":"block-cookies"}"#),
            (Action::MakeHttps, r#"{"type":"make-https"}"#),
            (Action::IgnorePreviousRules, r#"{"type":"ignore-previous-rules"}"#),
            (
                Action::CssDisplayNone { selector: ".ad".into() },
                r#"{"type":"css-display-none","selector":".ad"}"#,
            ),
        ];
        for (action, expected) in actions {
            assert_eq!(serde_json::to_string(&action).unwrap(), expected);
            assert!(expected.contains(action.type_name()));
        }
    }

    #[test]
    fn serializes_trigger_options() {
        let mut trigger = Trigger::new(".*").with_if_domain(vec!["*example.com".into()]);
        trigger.resource_type = Some(vec![ResourceType::StyleSheet, ResourceType::SvgDocument]);
        trigger.unless_top_url = Some(vec!["https://safe.example/".into()]);
        let json = serde_json::to_string(&trigger).unwrap();
        assert_eq!(
            json,
            r#"{"url-filter":".*","url-filter-is-case-sensitive":false,"if-domain":["*example.com"],"resource-type":["style-sheet","svg-document"],"unless-top-url":["https://safe.example/"]}"#
        );
    }

    #[test]
    fn parses_engine_json() {
        let json = r#"[{"trigger":{"url-filter":".*","if-domain":["*a.com"]},"action":{"type":"ignore-previous-rules"}}]"#;
        let rules: RuleSet = serde_json::from_str(json).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, Action::IgnorePreviousRules);
        assert!(!rules[0].trigger.url_filter_is_case_sensitive);
        assert_eq!(rules[0].trigger.if_domain.as_deref(), Some(&["*a.com".to_string()][..]));
    }

    #[test]
    fn summary_and_ordering() {
        let rules = vec![
            Rule::new(Trigger::new(".*"), Action::MakeHttps),
            Rule::new(Trigger::new("a"), Action::Block),
            Rule::new(Trigger::new(".*"), Action::IgnorePreviousRules),
        ];
        let summary = RuleSetSummary::of(&rules);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.block, 1);
        assert_eq!(summary.make_https, 1);
        assert_eq!(summary.ignore_previous, 1);
        assert!(overrides_follow_blocking(&rules));

        let reversed: Vec<Rule> = rules.into_iter().rev().collect();
        assert!(!overrides_follow_blocking(&reversed));
    }
}
