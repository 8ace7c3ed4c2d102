//! Per-page tracker statistics
//!
//! [`PageStats`] collects the hosts blocked while one page loads. The UI reads
//! it through [`PageStats::summary`], which groups the hosts by the tracking
//! organisation that owns them.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::psl::PublicSuffix;

/// Blocked hosts of the page currently loaded in a tab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageStats {
    blocked_hosts: Vec<String>,
}

impl PageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a blocked host.
    pub fn record(&mut self, host: impl Into<String>) {
        self.blocked_hosts.push(host.into());
    }

    /// Forget everything, for a new page load.
    pub fn reset(&mut self) {
        self.blocked_hosts.clear();
    }

    pub fn blocked_hosts(&self) -> &[String] {
        &self.blocked_hosts
    }

    pub fn len(&self) -> usize {
        self.blocked_hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked_hosts.is_empty()
    }

    /// Counts and owning organisations of the blocked trackers.
    pub fn summary(&self, psl: &PublicSuffix) -> TrackingSummary {
        let distinct: BTreeSet<&str> = self.blocked_hosts.iter().map(String::as_str).collect();
        let entities = self
            .blocked_hosts
            .iter()
            .filter_map(|host| TrackingEntity::for_domain(&psl.registrable_domain(host)))
            .collect();

        TrackingSummary {
            num_trackers: self.blocked_hosts.len(),
            num_domains: distinct.len(),
            entities,
        }
    }
}

/// What the tracking-protection menu shows for a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingSummary {
    /// Blocked requests, counting repeats
    pub num_trackers: usize,
    /// Distinct blocked hosts
    pub num_domains: usize,
    /// Owning organisation of each attributed request, in request order
    pub entities: Vec<TrackingEntity>,
}

impl TrackingSummary {
    /// Per-organisation request counts, most frequent first.
    pub fn entity_counts(&self) -> Vec<(TrackingEntity, usize)> {
        let mut counts: HashMap<TrackingEntity, usize> = HashMap::new();
        for entity in &self.entities {
            *counts.entry(*entity).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts
    }
}

// =============================================================================
// Page Stats Cache
// =============================================================================

/// Stats of previously visited pages, keyed by page URL.
///
/// Back/forward navigations served from the page cache do not reload their
/// subresources, so their stats are restored from here.
#[derive(Debug, Default)]
pub struct PageStatsCache {
    pages: HashMap<String, PageStats>,
}

impl PageStatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the stats of the page being navigated away from.
    pub fn save(&mut self, page_url: &str, stats: &PageStats) {
        self.pages.insert(page_url.to_string(), stats.clone());
    }

    /// Drop cached stats when a fresh main-frame response arrives.
    pub fn invalidate(&mut self, page_url: &str) {
        self.pages.remove(page_url);
    }

    /// Stats to start a committed page with: cached if any, otherwise empty.
    pub fn restore(&self, page_url: &str) -> PageStats {
        self.pages.get(page_url).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

// =============================================================================
// Tracking Entities
// =============================================================================

/// Organisations that operate well-known trackers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TrackingEntity {
    Google,
    Facebook,
    Twitter,
    Amazon,
    Outbrain,
    Criteo,
    Adobe,
    Oracle,
    WarnerMedia,
    #[serde(rename = "IAS")]
    Ias,
    Pinterest,
    VerizonMedia,
}

impl TrackingEntity {
    pub const ALL: [TrackingEntity; 12] = [
        Self::Google,
        Self::Facebook,
        Self::Twitter,
        Self::Amazon,
        Self::Outbrain,
        Self::Criteo,
        Self::Adobe,
        Self::Oracle,
        Self::WarnerMedia,
        Self::Ias,
        Self::Pinterest,
        Self::VerizonMedia,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Facebook => "Facebook",
            Self::Twitter => "Twitter",
            Self::Amazon => "Amazon",
            Self::Outbrain => "Outbrain",
            Self::Criteo => "Criteo",
            Self::Adobe => "Adobe",
            Self::Oracle => "Oracle",
            Self::WarnerMedia => "WarnerMedia",
            Self::Ias => "IAS",
            Self::Pinterest => "Pinterest",
            Self::VerizonMedia => "VerizonMedia",
        }
    }

    /// Registrable domains owned by this organisation.
    pub fn domains(self) -> &'static [&'static str] {
        match self {
            Self::Google => &[
                "1emn.com", "2mdn.net", "admeld.com", "admob.com", "app-measurement.com",
                "apture.com", "asp-cc.com", "blogger.com", "cc-dt.com", "crashlytics.com",
                "dartsearch.net", "dmtry.com", "doubleclick.com", "doubleclick.net",
                "firebaseio.com", "gmodules.com", "google-analytics.com", "googleadservices.com",
                "googleadsserving.cn", "googlegroups.com", "googlesyndication.com",
                "googletagmanager.com", "googletagservices.com", "googleusercontent.com",
                "gstatic.com", "invitemedia.com", "page.link", "urchin.com", "waze.com",
                "youtube.com",
            ],
            Self::Facebook => &[
                "accountkit.com", "atdmt.com", "atlassbx.com", "atlassolutions.com",
                "facebook.com", "fbsbx.com", "liverail.com", "whatsapp.net",
            ],
            Self::Twitter => &["ads-twitter.com", "mopub.com", "twitter.com", "twttr.com"],
            Self::Amazon => &[
                "alexa.com", "alexametrics.com", "amazon-adsystem.com", "assoc-amazon.com",
                "assoc-amazon.jp", "graphiq.com", "media-imdb.com", "peer39.com", "peer39.net",
                "serving-sys.com", "sizmek.com", "twitch.tv", "wfm.com",
            ],
            Self::Outbrain => &["ligatus.com", "outbrain.com", "veeseo.com", "zemanta.com"],
            Self::Criteo => &["criteo.com", "criteo.net", "emailretargeting.com", "hlserve.com", "manage.com"],
            Self::Adobe => &[
                "2o7.net", "adobe.com", "adobetag.com", "auditude.com", "bizible.com",
                "businesscatalyst.com", "demdex.net", "everestads.net", "everestjs.net",
                "everesttech.net", "fyre.co", "hitbox.com", "livefyre.com", "marketo.com",
                "marketo.net", "mktoresp.com", "nedstat.net", "omniture.com", "omtrdc.net",
                "sitestat.com", "tubemogul.com",
            ],
            Self::Oracle => &[
                "sekindo.com", "addthis.com", "addthiscdn.com", "addthisedge.com", "atgsvcs.com",
                "bkrtx.com", "bluekai.com", "bm23.com", "compendium.com", "en25.com",
                "grapeshot.co.uk", "maxymiser.net", "moat.com", "moatads.com", "moatpixel.com",
                "nexac.com", "responsys.net",
            ],
            Self::WarnerMedia => &[
                "247realmedia.com", "adnxs.com", "adultswim.com", "cartoonnetwork.com", "cnn.com",
                "ncaa.com", "realmedia.com", "tbs.com", "tmz.com", "trutv.com", "turner.com",
                "ugdturner.com", "warnerbros.com", "yieldoptimizer.com",
            ],
            Self::Ias => &["adsafeprotected.com", "iasds01.com"],
            Self::Pinterest => &["pinterest.com"],
            Self::VerizonMedia => &[
                "adap.tv", "adsonar.com", "adtech.de", "adtechjp.com", "adtechus.com",
                "advertising.com", "aol.co.uk", "aol.com", "aol.fr", "aolp.jp", "atwola.com",
                "bluelithium.com", "brightroll.com", "btrll.com", "convertro.com", "engadget.com",
                "flurry.com", "hostingprod.com", "lexity.com", "mybloglog.com", "nexage.com",
                "overture.com", "pictela.net", "pulsemgr.com", "rmxads.com", "vidible.tv",
                "wretch.cc", "yahoo.com", "yahoo.net", "yahoodns.net", "yieldmanager.com",
                "yieldmanager.net", "yimg.com",
            ],
        }
    }

    /// Organisation owning a registrable domain, if known.
    pub fn for_domain(domain: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|entity| entity.domains().contains(&domain))
    }
}
