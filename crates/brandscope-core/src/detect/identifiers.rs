//! Brand identifier generation and text matching.

use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};

use super::grounded::{host_of, raw_host_of};

/// Domain prefixes/suffixes common to e-commerce brands. A domain label that
/// starts or ends with one of these also yields the split variant, so
/// `bestbuy` matches "best buy" and `shopdisney` matches "shop disney".
const COMMERCE_AFFIXES: &[&str] = &[
    "buy", "shop", "store", "mart", "online", "depot", "direct", "outlet",
];

/// A single identifier hit inside a response text.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdentifierMatch {
    /// Index into [`BrandProfile::identifiers`].
    pub identifier: usize,
    pub start: usize,
    pub end: usize,
}

/// Precomputed matching state for one brand: its hostname plus the full
/// identifier set used for text-match detection.
pub struct BrandProfile {
    brand_url: String,
    brand_name: Option<String>,
    hostname: String,
    domain_label: String,
    identifiers: Vec<String>,
    automaton: AhoCorasick,
}

impl BrandProfile {
    /// Build the identifier set for a brand URL and optional display name.
    ///
    /// A malformed URL degrades to whatever hostname can be salvaged; only an
    /// input yielding no identifiers at all is rejected.
    pub fn new(brand_url: &str, brand_name: Option<&str>) -> Result<Self> {
        let hostname = host_of(brand_url);
        let raw_label = raw_host_of(brand_url)
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();
        let domain_label = raw_label.to_ascii_lowercase();

        let identifiers = build_identifiers(brand_url, brand_name, &hostname, &raw_label);
        if identifiers.is_empty() {
            anyhow::bail!("no brand identifiers could be derived from `{brand_url}`");
        }
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&identifiers)
            .context("failed to build brand identifier automaton")?;

        Ok(Self {
            brand_url: brand_url.trim().to_string(),
            brand_name: brand_name.map(str::to_string),
            hostname,
            domain_label,
            identifiers,
            automaton,
        })
    }

    pub fn brand_url(&self) -> &str {
        &self.brand_url
    }

    pub fn brand_name(&self) -> Option<&str> {
        self.brand_name.as_deref()
    }

    /// Lowercased hostname with `www.` stripped; empty when none could be
    /// derived.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// First label of the hostname (`bestbuy` for `bestbuy.com`).
    pub fn domain_label(&self) -> &str {
        &self.domain_label
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Every identifier occurrence in `text`, in match order.
    pub(crate) fn find_matches(&self, text: &str) -> Vec<IdentifierMatch> {
        self.automaton
            .find_iter(text)
            .map(|m| IdentifierMatch {
                identifier: m.pattern().as_usize(),
                start: m.start(),
                end: m.end(),
            })
            .collect()
    }

    /// Whether any identifier occurs in `text` (case-insensitive substring).
    pub(crate) fn mentions_in(&self, text: &str) -> bool {
        self.automaton.is_match(text)
    }
}

fn build_identifiers(
    brand_url: &str,
    brand_name: Option<&str>,
    hostname: &str,
    raw_label: &str,
) -> Vec<String> {
    let label = raw_label.to_ascii_lowercase();
    let mut identifiers: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        let candidate = candidate.trim().to_string();
        if candidate.len() >= 2 && !identifiers.contains(&candidate) {
            identifiers.push(candidate);
        }
    };

    push(label.clone());
    if let Some(name) = brand_name {
        push(name.to_ascii_lowercase());
    }
    push(brand_url.trim().to_ascii_lowercase());
    push(hostname.to_string());

    if let Some(spaced) = camel_to_spaced(raw_label) {
        push(spaced);
    }
    if label.contains('-') {
        push(label.replace('-', " "));
        push(label.replace('-', ""));
    }
    for affix in COMMERCE_AFFIXES {
        if let Some(rest) = label.strip_prefix(affix) {
            if rest.len() >= 2 {
                push(format!("{affix} {rest}"));
            }
        }
        if let Some(head) = label.strip_suffix(affix) {
            if head.len() >= 2 {
                push(format!("{head} {affix}"));
            }
        }
    }

    identifiers
}

/// `TechStore` → `tech store`; returns None when the label has no interior
/// case boundary.
fn camel_to_spaced(raw_label: &str) -> Option<String> {
    let mut spaced = String::with_capacity(raw_label.len() + 4);
    let mut boundary_seen = false;
    let mut prev_lower = false;
    for ch in raw_label.chars() {
        if ch.is_ascii_uppercase() && prev_lower {
            spaced.push(' ');
            boundary_seen = true;
        }
        prev_lower = ch.is_ascii_lowercase();
        spaced.extend(ch.to_lowercase());
    }
    boundary_seen.then_some(spaced)
}
