//! Rank extraction from numbered-list answer formats.

use once_cell::sync::Lazy;
use regex::Regex;

use super::identifiers::BrandProfile;

// Matches `3. Item`, `3) Item` and the bold variant `**3. Item**`.
static NUMBERED_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:\*\*\s*)?(\d{1,2})[.)]\s+(.+)$").expect("numbered list pattern")
});

// Matches prose of the form `Number 3: Item`.
static NUMBER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bnumber\s+(\d{1,2})\s*:\s*([^\r\n]+)").expect("number prefix pattern")
});

/// Scan `text` for numbered-list items and return the number of the first
/// item whose text mentions a brand identifier.
pub(crate) fn rank_from_list(text: &str, profile: &BrandProfile) -> Option<usize> {
    for pattern in [&NUMBERED_ITEM, &NUMBER_PREFIX] {
        for captures in pattern.captures_iter(text) {
            let number = match captures.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
                Some(number) if number > 0 => number,
                _ => continue,
            };
            let item = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
            if profile.mentions_in(item) {
                return Some(number);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> BrandProfile {
        BrandProfile::new("https://bestbuy.com", Some("Best Buy")).unwrap()
    }

    #[test]
    fn plain_numbered_list_yields_rank() {
        let text = "Top retailers:\n1. Amazon\n2. Walmart\n3. Best Buy\n4. Target";
        assert_eq!(rank_from_list(text, &profile()), Some(3));
    }

    #[test]
    fn bold_markdown_items_are_recognized() {
        let text = "**1. Amazon**\n**2. Best Buy**";
        assert_eq!(rank_from_list(text, &profile()), Some(2));
    }

    #[test]
    fn number_prefix_phrasing_is_recognized() {
        let text = "My picks: Number 1: Amazon has range. Number 4: Best Buy has service.";
        assert_eq!(rank_from_list(text, &profile()), Some(4));
    }

    #[test]
    fn unrelated_lists_yield_no_rank() {
        let text = "1. Amazon\n2. Walmart";
        assert_eq!(rank_from_list(text, &profile()), None);
    }

    #[test]
    fn parenthesis_style_works() {
        let text = "1) Amazon\n2) BestBuy.com";
        assert_eq!(rank_from_list(text, &profile()), Some(2));
    }
}
