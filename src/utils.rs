use regex::Regex;
use url::Url;

/// Canonicalizes a scraped label for comparison: characters outside the
/// printable ASCII range become spaces, whitespace runs collapse to a single
/// space, edges are trimmed. Idempotent, so it is safe to apply again to
/// already-normalized input.
pub fn normalize_label(raw: &str) -> String {
    let ascii_only: String = raw
        .chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { ' ' })
        .collect();

    let re = Regex::new(r"\s+").unwrap();
    re.replace_all(ascii_only.trim(), " ").trim().to_string()
}

/// Case-insensitive prefix exclusion over normalized names. Prefixes are
/// normalized with the same function as the name so both sides compare under
/// identical canonicalization.
pub fn is_excluded(name: &str, exclude_prefixes: &[String]) -> bool {
    let name = normalize_label(name).to_lowercase();
    exclude_prefixes.iter().any(|prefix| {
        let prefix = normalize_label(prefix).to_lowercase();
        !prefix.is_empty() && name.starts_with(&prefix)
    })
}

/// Substring keyword match under shared normalization.
pub fn matches_keyword(label: &str, keyword: &str) -> bool {
    let label = normalize_label(label);
    let keyword = normalize_label(keyword);
    !keyword.is_empty() && (label == keyword || label.contains(&keyword))
}

/// Reduces a discovered checkout link to a stable, cacheable form:
/// scheme + host + path only. Relative links are resolved against `base`.
pub fn canonical_checkout_url(href: &str, base: &str) -> Option<String> {
    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base).ok()?.join(href).ok()?,
        Err(_) => return None,
    };

    if resolved.host_str().is_none() {
        return None;
    }

    let mut canonical = resolved;
    canonical.set_query(None);
    canonical.set_fragment(None);
    Some(canonical.to_string())
}
