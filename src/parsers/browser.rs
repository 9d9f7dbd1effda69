use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Edge,
    Opera,
    Firefox,
    Safari,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Edge => "edge",
            Browser::Opera => "opera",
            Browser::Firefox => "firefox",
            Browser::Safari => "safari",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    History,
    Cookies,
}

/// A browser database found on a mounted partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserArtifact {
    pub path: PathBuf,
    pub browser: Browser,
    pub kind: ArtifactKind,
    pub partition: String,
}

/// Attribute a file to a browser by its name and profile path. Chromium
/// forks share file names, so the path decides between them.
pub fn classify_artifact(path: &Path) -> Option<(Browser, ArtifactKind)> {
    let name = path.file_name()?.to_str()?;
    let chromium = || {
        let lower = path.to_string_lossy().to_ascii_lowercase();
        if lower.contains("microsoft/edge") || lower.contains("microsoft\\edge") || lower.contains("microsoft-edge") {
            Browser::Edge
        } else if lower.contains("opera") {
            Browser::Opera
        } else {
            Browser::Chrome
        }
    };
    match name {
        "History" => Some((chromium(), ArtifactKind::History)),
        "Cookies" => Some((chromium(), ArtifactKind::Cookies)),
        "places.sqlite" => Some((Browser::Firefox, ArtifactKind::History)),
        "cookies.sqlite" => Some((Browser::Firefox, ArtifactKind::Cookies)),
        "History.db" => Some((Browser::Safari, ArtifactKind::History)),
        "Cookies.binarycookies" => Some((Browser::Safari, ArtifactKind::Cookies)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "artifact", rename_all = "lowercase")]
pub enum SocialDetail {
    History {
        url: String,
        title: Option<String>,
        visit_count: Option<i64>,
        last_visit_time: Option<chrono::NaiveDateTime>,
    },
    Cookie {
        name: String,
        value: String,
    },
}

/// A history entry or cookie whose host belongs to a social-media domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocialRecord {
    pub browser: Browser,
    pub partition: String,
    pub source_file: PathBuf,
    pub host: String,
    #[serde(flatten)]
    pub detail: SocialDetail,
}

/// Host part of a URL, lowercase, without userinfo or port.
pub fn url_host(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = if host.starts_with('[') {
        host.split_inclusive(']').next()?
    } else {
        host.split(':').next()?
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Normalize a cookie host key (`.facebook.com`) to a bare host.
pub fn cookie_host(host_key: &str) -> String {
    host_key.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// True when `host` is `domain` or one of its subdomains.
pub fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches('.');
    if domain.is_empty() {
        return false;
    }
    let (host, domain) = (host.as_bytes(), domain.as_bytes());
    host.eq_ignore_ascii_case(domain)
        || (host.len() > domain.len()
            && host[host.len() - domain.len()..].eq_ignore_ascii_case(domain)
            && host[host.len() - domain.len() - 1] == b'.')
}

pub fn matches_any(host: &str, domains: &[String]) -> bool {
    domains.iter().any(|d| host_matches(host, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_profiles_to_browsers() {
        let cases = [
            ("home/u/.config/google-chrome/Default/History", Browser::Chrome, ArtifactKind::History),
            (
                "Users/u/AppData/Local/Microsoft/Edge/User Data/Default/Network/Cookies",
                Browser::Edge,
                ArtifactKind::Cookies,
            ),
            ("home/u/.config/opera/History", Browser::Opera, ArtifactKind::History),
            ("home/u/.mozilla/firefox/x.default/places.sqlite", Browser::Firefox, ArtifactKind::History),
            ("Users/u/Library/Safari/History.db", Browser::Safari, ArtifactKind::History),
        ];
        for (path, browser, kind) in cases {
            assert_eq!(classify_artifact(Path::new(path)), Some((browser, kind)), "{path}");
        }
        assert_eq!(classify_artifact(Path::new("home/u/notes.txt")), None);
    }

    #[test]
    fn host_parsing() {
        assert_eq!(url_host("https://www.Facebook.com/profile?id=1").as_deref(), Some("www.facebook.com"));
        assert_eq!(url_host("http://user@reddit.com:8080/r/x").as_deref(), Some("reddit.com"));
        assert_eq!(url_host("about:blank"), None);
        assert_eq!(cookie_host(".twitter.com"), "twitter.com");
    }

    #[test]
    fn domain_matching_respects_labels() {
        assert!(host_matches("m.facebook.com", "facebook.com"));
        assert!(host_matches("facebook.com", "facebook.com"));
        assert!(!host_matches("notfacebook.com", "facebook.com"));
        assert!(!host_matches("facebook.com.evil.org", "facebook.com"));
    }
}
