//! Competitor brand extraction: a static registry of known retail brands
//! plus a bare-domain harvest over the response text.

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::identifiers::BrandProfile;
use super::{sentiment, Sentiment};

/// One competitor surfaced from a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorMention {
    pub name: String,
    pub domain: Option<String>,
    pub sentiment: Sentiment,
}

struct RegistryEntry {
    name: &'static str,
    domains: &'static [&'static str],
}

/// Known competitor brands checked by name and URL variants.
static REGISTRY: &[RegistryEntry] = &[
    RegistryEntry { name: "Amazon", domains: &["amazon.com", "amazon.co.uk", "amzn.to"] },
    RegistryEntry { name: "Walmart", domains: &["walmart.com"] },
    RegistryEntry { name: "Target", domains: &["target.com"] },
    RegistryEntry { name: "Best Buy", domains: &["bestbuy.com"] },
    RegistryEntry { name: "eBay", domains: &["ebay.com"] },
    RegistryEntry { name: "Costco", domains: &["costco.com"] },
    RegistryEntry { name: "Newegg", domains: &["newegg.com"] },
    RegistryEntry { name: "Home Depot", domains: &["homedepot.com"] },
    RegistryEntry { name: "Lowe's", domains: &["lowes.com"] },
    RegistryEntry { name: "Wayfair", domains: &["wayfair.com"] },
    RegistryEntry { name: "Etsy", domains: &["etsy.com"] },
    RegistryEntry { name: "AliExpress", domains: &["aliexpress.com"] },
    RegistryEntry { name: "Overstock", domains: &["overstock.com"] },
    RegistryEntry { name: "B&H Photo", domains: &["bhphotovideo.com"] },
    RegistryEntry { name: "Nordstrom", domains: &["nordstrom.com"] },
    RegistryEntry { name: "Macy's", domains: &["macys.com"] },
];

/// Generic platforms, review sites and social networks whose domains say
/// nothing about competing retailers.
static SKIP_DOMAINS: &[&str] = &[
    "google.com",
    "bing.com",
    "duckduckgo.com",
    "yahoo.com",
    "youtube.com",
    "reddit.com",
    "quora.com",
    "wikipedia.org",
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "linkedin.com",
    "pinterest.com",
    "medium.com",
    "trustpilot.com",
    "yelp.com",
    "bbb.org",
    "consumerreports.org",
];

// Pattern index -> registry entry index, names first then domains.
static REGISTRY_AUTOMATON: Lazy<(AhoCorasick, Vec<usize>)> = Lazy::new(|| {
    let mut patterns = Vec::new();
    let mut entry_of = Vec::new();
    for (idx, entry) in REGISTRY.iter().enumerate() {
        patterns.push(entry.name.to_string());
        entry_of.push(idx);
        for domain in entry.domains {
            patterns.push((*domain).to_string());
            entry_of.push(idx);
        }
    }
    let automaton = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&patterns)
        .expect("competitor registry automaton");
    (automaton, entry_of)
});

static DOMAIN_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z0-9][a-z0-9-]{1,40}\.(?:com|net|org|co|io|shop|store|app))\b")
        .expect("bare domain pattern")
});

fn normalized(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn belongs_to_brand(profile: &BrandProfile, name: &str, domain: Option<&str>) -> bool {
    let brand_host = profile.hostname();
    if let Some(domain) = domain {
        if !brand_host.is_empty()
            && (domain == brand_host || domain.ends_with(&format!(".{brand_host}")))
        {
            return true;
        }
    }
    let key = normalized(name);
    if key == normalized(profile.domain_label()) {
        return true;
    }
    matches!(profile.brand_name(), Some(brand) if key == normalized(brand))
}

/// Extract up to `cap` competitor mentions from `text`, skipping the brand
/// itself, deduplicating by normalized name and attaching the same keyword
/// sentiment used for the brand.
pub(crate) fn extract(
    text: &str,
    profile: &BrandProfile,
    cap: usize,
    sentiment_window: usize,
) -> Vec<CompetitorMention> {
    let mut mentions: Vec<CompetitorMention> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    let mut push = |name: &str, domain: Option<String>, span: (usize, usize)| {
        let key = normalized(name);
        if key.is_empty() || seen.contains(&key) {
            return;
        }
        seen.push(key);
        mentions.push(CompetitorMention {
            name: name.to_string(),
            domain,
            sentiment: sentiment::classify_around(text, &[span], sentiment_window),
        });
    };

    let (automaton, entry_of) = &*REGISTRY_AUTOMATON;
    for m in automaton.find_iter(text) {
        let entry = &REGISTRY[entry_of[m.pattern().as_usize()]];
        if belongs_to_brand(profile, entry.name, entry.domains.first().copied()) {
            continue;
        }
        push(
            entry.name,
            entry.domains.first().map(|d| (*d).to_string()),
            (m.start(), m.end()),
        );
    }

    for captures in DOMAIN_TOKEN.captures_iter(text) {
        let Some(token) = captures.get(1) else { continue };
        let domain = token.as_str().to_ascii_lowercase();
        if SKIP_DOMAINS.contains(&domain.as_str()) {
            continue;
        }
        let label = domain.split('.').next().unwrap_or_default();
        if belongs_to_brand(profile, label, Some(&domain)) {
            continue;
        }
        push(label, Some(domain.clone()), (token.start(), token.end()));
    }

    mentions.truncate(cap);
    mentions
}
