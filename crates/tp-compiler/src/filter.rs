//! URL filter synthesis
//!
//! The content filter accepts a restricted regex dialect: no `|` alternation,
//! no `{n,m}` counted repetition, ASCII only. A group of domains is therefore
//! written as a run of optional groups instead of an alternation:
//!
//! ```text
//! ^(https?)?(wss?)?:[/][/](.+\.)?((a\.com)?(b\.com)?)[/].*
//! ```

use std::fmt::Write;

pub use tp_core::types::{check_filter_grammar, GrammarError};

const FILTER_PREFIX: &str = "^(https?)?(wss?)?:[/][/](.+\\.)?(";
const FILTER_SUFFIX: &str = ")[/].*";

/// Escape regex metacharacters in a domain.
pub fn escape_domain(domain: &str) -> String {
    let mut escaped = String::with_capacity(domain.len() + 8);
    for ch in domain.chars() {
        if matches!(
            ch,
            '\\' | '^' | '$' | '.' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Filter matching http(s)/ws(s) URLs whose host is, or is a subdomain of,
/// any of `domains`.
pub fn build_domain_filter<S: AsRef<str>>(domains: &[S]) -> String {
    let mut filter = String::from(FILTER_PREFIX);
    for domain in domains {
        let _ = write!(filter, "({})?", escape_domain(domain.as_ref()));
    }
    filter.push_str(FILTER_SUFFIX);
    filter
}

/// Whether `domain` can be placed in a filter.
pub fn check_domain(domain: &str) -> Result<(), GrammarError> {
    check_filter_grammar(&escape_domain(domain))
}
