//! Host canonicalisation and the redirector denylist.

use std::collections::BTreeSet;

use url::{ParseError, Url};

/// Ad-network, tracker and shortener hosts whose URLs wrap the real
/// destination. Subdomains match too.
pub const DEFAULT_REDIRECTORS: &[&str] = &[
    "doubleclick.net",
    "googleadservices.com",
    "googlesyndication.com",
    "adservice.google.com",
    "dartsearch.net",
    "adnxs.com",
    "adform.net",
    "criteo.com",
    "taboola.com",
    "outbrain.com",
    "smartadserver.com",
    "rubiconproject.com",
    "pubmatic.com",
    "openx.net",
    "amazon-adsystem.com",
    "adsrvr.org",
    "l.facebook.com",
    "lm.facebook.com",
    "t.co",
    "bit.ly",
    "goo.gl",
    "ow.ly",
    "tinyurl.com",
    "lnkd.in",
];

/// Parse a raw click-through URL. Scheme-less inputs (`//host/path`,
/// `host/path`) are read as https. Only http(s) URLs are accepted.
pub fn parse_click_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => {
            let without_slashes = trimmed.trim_start_matches('/');
            Url::parse(&format!("https://{without_slashes}")).ok()?
        }
        Err(_) => return None,
    };

    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Canonical advertiser host of a URL: lowercase, no trailing dot, no
/// leading `www.`.
pub fn canonical_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let host = normalize_host(host);
    (!host.is_empty()).then_some(host)
}

fn normalize_host(host: &str) -> String {
    let lower = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => lower,
    }
}

/// Set of known redirector hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectorDenylist {
    hosts: BTreeSet<String>,
}

impl RedirectorDenylist {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        list.extend(hosts);
        list
    }

    pub fn extend<I, S>(&mut self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.hosts.extend(
            hosts
                .into_iter()
                .map(|h| normalize_host(h.as_ref()))
                .filter(|h| !h.is_empty()),
        );
    }

    /// Parse a denylist file: one host per line, `#` starts a comment.
    pub fn parse_lines(contents: &str) -> Vec<String> {
        contents
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// `true` if `host` or any parent domain of it is listed.
    pub fn contains(&self, host: &str) -> bool {
        let host = normalize_host(host);
        let mut candidate = host.as_str();
        loop {
            if self.hosts.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => return false,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}
