//! Utility functions and helpers.

use url::Url;

/// Maximum length of page excerpts carried in events and run details.
pub const EXCERPT_CHARS: usize = 500;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Resolve a URL string against a base URL string.
pub fn resolve(base_url: &str, href: &str) -> Option<String> {
    Url::parse(base_url)
        .ok()
        .map(|base| resolve_url(&base, href))
}

/// Whether an `href` can be followed by a plain GET.
pub fn is_workable_href(href: &str) -> bool {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return false;
    }
    let lowered = href.to_ascii_lowercase();
    !(lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:"))
}

/// Account number carried in the `number` query parameter.
pub fn extract_account_number(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "number")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// First `max_chars` characters of `text`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Filesystem-safe form of an artifact label.
pub fn slugify(label: &str) -> String {
    let slug: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "page".to_string()
    } else {
        slug.chars().take(60).collect()
    }
}
