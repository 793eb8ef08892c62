//! Citation-URL matching for search-capable platforms.

use crate::model::SourceCitation;

use super::identifiers::BrandProfile;

/// Extract the hostname of a URL, lowercased, with any `www.` prefix and
/// port stripped. Malformed input degrades to a best-effort host rather than
/// an error.
pub(crate) fn host_of(url: &str) -> String {
    let mut host = raw_host_of(url).to_ascii_lowercase();
    if let Some(stripped) = host.strip_prefix("www.") {
        host = stripped.to_string();
    }
    host
}

/// Hostname with original casing preserved (used to detect camelCase brand
/// labels); `www.` and port are still stripped.
pub(crate) fn raw_host_of(url: &str) -> String {
    let trimmed = url.trim();
    let after_scheme = match trimmed.find("://") {
        Some(idx) => &trimmed[idx + 3..],
        None => trimmed,
    };
    let mut host = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    // Strip a trailing :port, but leave bare names alone.
    if let Some((head, tail)) = host.rsplit_once(':') {
        if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
            host = head;
        }
    }
    host.strip_prefix("www.")
        .or_else(|| host.strip_prefix("WWW."))
        .unwrap_or(host)
        .to_string()
}

/// Resolve known search-engine redirect wrappers to their target: when the
/// query string carries a `url` or `q` parameter holding a URL, that target
/// replaces the wrapper.
pub(crate) fn unwrap_redirect(url: &str) -> String {
    let Some((_, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let query = query.split('#').next().unwrap_or(query);

    let mut fallback = None;
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let decoded = percent_decode(value);
        if !looks_like_url(&decoded) {
            continue;
        }
        match key {
            "url" => return decoded,
            "q" if fallback.is_none() => fallback = Some(decoded),
            _ => {}
        }
    }
    fallback.unwrap_or_else(|| url.to_string())
}

fn looks_like_url(candidate: &str) -> bool {
    candidate.starts_with("http://")
        || candidate.starts_with("https://")
        || (candidate.contains('.') && !candidate.contains(' '))
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Return the 1-based position of the first source whose (redirect-resolved)
/// hostname matches the brand's hostname exactly or as a dot-boundary suffix.
pub(crate) fn match_sources(profile: &BrandProfile, sources: &[SourceCitation]) -> Option<usize> {
    let brand_host = profile.hostname();
    if brand_host.is_empty() {
        return None;
    }
    for (position, source) in sources.iter().enumerate() {
        let host = host_of(&unwrap_redirect(&source.uri));
        if host == brand_host || host.ends_with(&format!(".{brand_host}")) {
            return Some(position + 1);
        }
    }
    None
}
