//! Offline extraction of an embedded destination from a click-through URL.
//!
//! Ad networks commonly carry the real landing page as a URL-encoded query
//! value (`?adurl=https%3A%2F%2Fshop.example%2F`) or, less often, appended to
//! the path (`/click/https://shop.example/`).

use std::borrow::Cow;

use url::Url;

use super::host::{canonical_host, RedirectorDenylist};

/// Query keys that usually carry the destination, checked before all others.
const DESTINATION_KEYS: &[&str] = &[
    "u",
    "url",
    "adurl",
    "dest",
    "destination",
    "redirect",
    "redirect_url",
    "r",
    "to",
    "target",
    "link",
    "landing",
    "lp",
    "click",
];

/// How many wrapped redirector URLs are unpacked before giving up.
const MAX_NESTING: usize = 3;

/// Percent-decoding passes applied to a single value.
const MAX_DECODE_PASSES: usize = 3;

/// Find the first embedded destination host that is not a redirector.
pub fn embedded_host(url: &Url, denylist: &RedirectorDenylist) -> Option<String> {
    search(url, denylist, 0)
}

fn search(url: &Url, denylist: &RedirectorDenylist, depth: usize) -> Option<String> {
    for candidate in candidates(url) {
        let Some(host) = canonical_host(&candidate) else {
            continue;
        };
        if !denylist.contains(&host) {
            return Some(host);
        }
        if depth + 1 < MAX_NESTING {
            if let Some(host) = search(&candidate, denylist, depth + 1) {
                return Some(host);
            }
        }
    }
    None
}

/// Embedded URLs in priority order: well-known query keys, remaining query
/// values, then anything after an `http` marker in the path.
fn candidates(url: &Url) -> Vec<Url> {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    pairs.sort_by_key(|(key, _)| {
        let key = key.to_ascii_lowercase();
        DESTINATION_KEYS
            .iter()
            .position(|k| *k == key)
            .unwrap_or(DESTINATION_KEYS.len())
    });

    let mut found: Vec<Url> = pairs
        .iter()
        .filter_map(|(_, value)| decode_embedded(value))
        .collect();

    let path = url.path();
    if let Some(idx) = path[1.min(path.len())..].find("http").map(|i| i + 1) {
        if let Some(embedded) = decode_embedded(&path[idx..]) {
            found.push(embedded);
        }
    }

    found
}

/// Interpret a value as an absolute http(s) URL, peeling up to
/// `MAX_DECODE_PASSES` layers of percent-encoding.
fn decode_embedded(value: &str) -> Option<Url> {
    let mut current = value.trim().to_string();
    for _ in 0..=MAX_DECODE_PASSES {
        if let Some(url) = as_absolute(&current) {
            return Some(url);
        }
        let decoded = percent_decode(&current)?;
        if decoded == current {
            return None;
        }
        current = decoded;
    }
    None
}

fn as_absolute(value: &str) -> Option<Url> {
    let lower = value.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        value.to_string()
    } else if lower.starts_with("//") {
        format!("https:{value}")
    } else if lower.starts_with("www.") {
        format!("https://{value}")
    } else {
        return None;
    };

    let url = Url::parse(&candidate).ok()?;
    url.host_str()?.contains('.').then_some(url)
}

/// Decode one layer of `%XX` escapes. Malformed escapes are kept literally;
/// `None` for invalid UTF-8.
fn percent_decode(value: &str) -> Option<String> {
    urlencoding::decode(value).ok().map(Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denylist() -> RedirectorDenylist {
        RedirectorDenylist::new(["ads.example", "doubleclick.net"])
    }

    fn host_of(raw: &str) -> Option<String> {
        embedded_host(&Url::parse(raw).unwrap(), &denylist())
    }

    #[test]
    fn test_single_encoded_destination() {
        assert_eq!(
            host_of("https://ads.example/click?u=https%3A%2F%2Fshop.real.com%2Fpromo").as_deref(),
            Some("shop.real.com")
        );
    }

    #[test]
    fn test_double_encoded_destination() {
        assert_eq!(
            host_of("https://ads.example/c?id=1&adurl=https%253A%252F%252Fwww.brand.mn%252F")
                .as_deref(),
            Some("brand.mn")
        );
    }

    #[test]
    fn test_preferred_key_wins_over_other_urls() {
        assert_eq!(
            host_of("https://ads.example/c?ref=https%3A%2F%2Fnews.mn%2F&dest=https%3A%2F%2Fshop.mn%2F")
                .as_deref(),
            Some("shop.mn")
        );
    }

    #[test]
    fn test_nested_redirector_is_unwrapped() {
        let inner = "https://ad.doubleclick.net/x?adurl=https%3A%2F%2Fbrand.example%2F";
        let outer = format!(
            "https://ads.example/c?u={}",
            url::form_urlencoded::byte_serialize(inner.as_bytes()).collect::<String>()
        );
        assert_eq!(host_of(&outer).as_deref(), Some("brand.example"));
    }

    #[test]
    fn test_destination_in_path() {
        assert_eq!(
            host_of("https://ads.example/click/https://shop.example/promo").as_deref(),
            Some("shop.example")
        );
    }

    #[test]
    fn test_no_embedded_destination() {
        assert_eq!(host_of("https://ads.example/click?id=42&slot=top"), None);
        assert_eq!(host_of("https://ads.example/click?u=not-a-url"), None);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b").as_deref(), Some("a b"));
        assert_eq!(percent_decode("100%").as_deref(), Some("100%"));
        assert_eq!(percent_decode("%zz").as_deref(), Some("%zz"));
        assert_eq!(percent_decode("%2").as_deref(), Some("%2"));
        assert_eq!(
            percent_decode("https%253A%252F%252Fshop.mn").as_deref(),
            Some("https%3A%2F%2Fshop.mn")
        );
        assert_eq!(percent_decode("%FF%FE"), None);
    }
}
