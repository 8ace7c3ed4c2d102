//! Tracking-prevention feature flags
//!
//! Flags are read from the [`KeyValueStore`] on every call so the compiler
//! never sees a stale value. A flag that was never written reports its default.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{KeyValueStore, StoreError};
use crate::types::Action;

/// A persisted boolean feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    BlockThirdPartyRequests,
    BlockThirdPartyCookies,
    UpgradeToHttps,
}

impl Flag {
    pub const ALL: [Flag; 3] = [
        Flag::BlockThirdPartyRequests,
        Flag::BlockThirdPartyCookies,
        Flag::UpgradeToHttps,
    ];

    /// Storage key.
    pub fn key(self) -> &'static str {
        match self {
            Self::BlockThirdPartyRequests => "blockThirdPartyTrackingRequests",
            Self::BlockThirdPartyCookies => "blockThirdPartyTrackingCookies",
            Self::UpgradeToHttps => "upgradeAllToHttps",
        }
    }

    pub fn default_value(self) -> bool {
        match self {
            Self::BlockThirdPartyRequests | Self::BlockThirdPartyCookies => true,
            Self::UpgradeToHttps => false,
        }
    }

    /// Parse a CLI-friendly flag name (kebab-case) or its storage key.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "block-requests" | "blockThirdPartyTrackingRequests" => Some(Self::BlockThirdPartyRequests),
            "block-cookies" | "blockThirdPartyTrackingCookies" => Some(Self::BlockThirdPartyCookies),
            "upgrade-https" | "upgradeAllToHttps" => Some(Self::UpgradeToHttps),
            _ => None,
        }
    }
}

/// Snapshot of the flags consumed by one compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub block_third_party_requests: bool,
    pub block_third_party_cookies: bool,
    pub upgrade_to_https: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            block_third_party_requests: Flag::BlockThirdPartyRequests.default_value(),
            block_third_party_cookies: Flag::BlockThirdPartyCookies.default_value(),
            upgrade_to_https: Flag::UpgradeToHttps.default_value(),
        }
    }
}

impl FeatureConfig {
    /// The single active blocking action. Request blocking wins over cookie blocking.
    pub fn blocking_action(&self) -> Option<Action> {
        if self.block_third_party_requests {
            Some(Action::Block)
        } else if self.block_third_party_cookies {
            Some(Action::BlockCookies)
        } else {
            None
        }
    }
}

/// Flag accessor over the shared configuration store.
#[derive(Clone)]
pub struct FeatureFlags {
    store: Arc<dyn KeyValueStore>,
}

impl FeatureFlags {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Whether the flag has been explicitly stored.
    pub fn is_set(&self, flag: Flag) -> bool {
        self.store.contains_key(flag.key())
    }

    pub fn is_enabled(&self, flag: Flag) -> bool {
        match self.store.get(flag.key()) {
            Some(Value::Bool(value)) => value,
            Some(other) => {
                log::warn!("Flag '{}' has non-boolean value {}, using default", flag.key(), other);
                flag.default_value()
            }
            None => flag.default_value(),
        }
    }

    pub fn set(&self, flag: Flag, enabled: bool) -> Result<(), StoreError> {
        self.store.set(flag.key(), Value::Bool(enabled))
    }

    /// Flip a flag and return its new value.
    pub fn toggle(&self, flag: Flag) -> Result<bool, StoreError> {
        let enabled = !self.is_enabled(flag);
        self.set(flag, enabled)?;
        Ok(enabled)
    }

    /// Forget the stored value so the default applies again.
    pub fn reset(&self, flag: Flag) -> Result<(), StoreError> {
        self.store.remove(flag.key())
    }

    /// Current values of all flags.
    pub fn config(&self) -> FeatureConfig {
        let config = FeatureConfig {
            block_third_party_requests: self.is_enabled(Flag::BlockThirdPartyRequests),
            block_third_party_cookies: self.is_enabled(Flag::BlockThirdPartyCookies),
            upgrade_to_https: self.is_enabled(Flag::UpgradeToHttps),
        };
        if config.block_third_party_requests && config.block_third_party_cookies {
            log::debug!("Request and cookie blocking both enabled, request blocking takes precedence");
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn flags() -> (Arc<MemoryStore>, FeatureFlags) {
        let store = Arc::new(MemoryStore::new());
        let flags = FeatureFlags::new(store.clone());
        (store, flags)
    }

    #[test]
    fn defaults_apply_when_unset() {
        let (_, flags) = flags();
        assert_eq!(flags.config(), FeatureConfig::default());
        assert!(flags.is_enabled(Flag::BlockThirdPartyRequests));
        assert!(!flags.is_enabled(Flag::UpgradeToHttps));
        assert!(!flags.is_set(Flag::UpgradeToHttps));
    }

    #[test]
    fn set_toggle_reset() {
        let (store, flags) = flags();
        flags.set(Flag::UpgradeToHttps, true).unwrap();
        assert_eq!(store.get("upgradeAllToHttps"), Some(json!(true)));
        assert!(flags.config().upgrade_to_https);

        assert!(!flags.toggle(Flag::UpgradeToHttps).unwrap());
        assert!(!flags.is_enabled(Flag::UpgradeToHttps));

        flags.set(Flag::BlockThirdPartyRequests, false).unwrap();
        flags.reset(Flag::BlockThirdPartyRequests).unwrap();
        assert!(flags.is_enabled(Flag::BlockThirdPartyRequests));
    }

    #[test]
    fn non_boolean_value_falls_back_to_default() {
        let (store, flags) = flags();
        store.set("blockThirdPartyTrackingCookies", json!("yes")).unwrap();
        assert!(flags.is_enabled(Flag::BlockThirdPartyCookies));
    }

    #[test]
    fn blocking_action_precedence() {
        let both = FeatureConfig::default();
        assert_eq!(both.blocking_action(), Some(Action::Block));

        let cookies_only = FeatureConfig {
            block_third_party_requests: false,
            ..FeatureConfig::default()
        };
        assert_eq!(cookies_only.blocking_action(), Some(Action::BlockCookies));

        let none = FeatureConfig {
            block_third_party_requests: false,
            block_third_party_cookies: false,
            upgrade_to_https: true,
        };
        assert_eq!(none.blocking_action(), None);
    }

    #[test]
    fn flag_names() {
        for flag in Flag::ALL {
            assert_eq!(Flag::from_name(flag.key()), Some(flag));
        }
        assert_eq!(Flag::from_name("upgrade-https"), Some(Flag::UpgradeToHttps));
        assert_eq!(Flag::from_name("nope"), None);
    }
}
