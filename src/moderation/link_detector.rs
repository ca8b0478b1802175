//! Heuristic link detection
//!
//! Detection is advisory, not a security boundary. To keep false positives
//! low a token only counts as a link when it parses as a URL with a
//! well-formed host:
//! - explicit `http://` / `https://` scheme (domain or IP host)
//! - `www.` prefix
//! - bare `t.me/` or `telegram.me/` invite references
//!
//! Plain dotted words such as `file.txt` or `hello.world` are ignored.

use url::{Host, Url};

const TRIM_LEADING: &[char] = &['(', '[', '<', '"', '\'', '{'];
const TRIM_TRAILING: &[char] = &['.', ',', ')', ']', '>', '!', '?', ';', ':', '"', '\'', '}'];

/// Hosts exempt from enforcement. An entry matches itself and its sub-domains.
#[derive(Debug, Clone, Default)]
pub struct LinkAllowList {
    hosts: Vec<String>,
}

impl LinkAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|h| {
                h.as_ref()
                    .trim()
                    .trim_start_matches("*.")
                    .trim_start_matches('.')
                    .trim_end_matches('.')
                    .to_ascii_lowercase()
            })
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn permits(&self, host: &str) -> bool {
        self.hosts.iter().any(|allowed| {
            host == allowed
                || (host.len() > allowed.len()
                    && host.ends_with(allowed.as_str())
                    && host.as_bytes()[host.len() - allowed.len() - 1] == b'.')
        })
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// A link found in message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedLink {
    /// Token as written in the message
    pub raw: String,
    /// Absolute URL, with a scheme added for bare `www.` / `t.me/` forms
    pub url: String,
    pub host: String,
}

#[derive(Debug, Clone, Default)]
pub struct LinkDetector {
    allowlist: LinkAllowList,
}

impl LinkDetector {
    pub fn new(allowlist: LinkAllowList) -> Self {
        Self { allowlist }
    }

    /// Every URL-shaped token in `text`, allowed or not
    pub fn extract_links(text: &str) -> Vec<DetectedLink> {
        text.split_whitespace().filter_map(parse_link).collect()
    }

    /// First link in `text` or `hidden_targets` whose host is not allow-listed
    pub fn find_disallowed(&self, text: &str, hidden_targets: &[String]) -> Option<DetectedLink> {
        Self::extract_links(text)
            .into_iter()
            .chain(hidden_targets.iter().filter_map(|t| parse_link(t)))
            .find(|link| !self.allowlist.permits(&link.host))
    }

    pub fn allowlist(&self) -> &LinkAllowList {
        &self.allowlist
    }
}

fn parse_link(token: &str) -> Option<DetectedLink> {
    let token = token
        .trim_start_matches(TRIM_LEADING)
        .trim_end_matches(TRIM_TRAILING);
    if token.is_empty() {
        return None;
    }

    let lower = token.to_ascii_lowercase();
    let (candidate, explicit_scheme) = if let Some(idx) = find_scheme(&lower) {
        (token[idx..].to_string(), true)
    } else if lower.starts_with("www.")
        || lower.starts_with("t.me/")
        || lower.starts_with("telegram.me/")
    {
        (format!("http://{}", token), false)
    } else {
        return None;
    };

    let url = Url::parse(&candidate).ok()?;
    let host = match url.host()? {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if !is_well_formed_domain(&domain) {
                return None;
            }
            domain
        }
        Host::Ipv4(ip) if explicit_scheme => ip.to_string(),
        Host::Ipv6(ip) if explicit_scheme => ip.to_string(),
        _ => return None,
    };

    Some(DetectedLink {
        raw: token.to_string(),
        url: url.to_string(),
        host,
    })
}

/// Byte offset of an `http://` or `https://` scheme inside a lowercased token
fn find_scheme(lower: &str) -> Option<usize> {
    ["https://", "http://"]
        .iter()
        .filter_map(|scheme| lower.find(scheme))
        .min()
}

fn is_well_formed_domain(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    });
    let tld = labels[labels.len() - 1];
    labels_ok && tld.chars().count() >= 2 && tld.chars().all(|c| c.is_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(allow: &[&str]) -> LinkDetector {
        LinkDetector::new(LinkAllowList::new(allow.iter().copied()))
    }

    #[test]
    fn test_detects_schemed_links() {
        let d = detector(&[]);
        let link = d.find_disallowed("look http://evil.example/x now", &[]).unwrap();
        assert_eq!(link.host, "evil.example");
        assert_eq!(link.raw, "http://evil.example/x");

        assert!(d.find_disallowed("HTTPS://EVIL.COM/PATH", &[]).is_some());
        assert!(d.find_disallowed("http://192.168.1.10/admin", &[]).is_some());
    }

    #[test]
    fn test_detects_schemeless_prefixes() {
        let d = detector(&[]);
        assert_eq!(d.find_disallowed("www.shop.co.id", &[]).unwrap().host, "www.shop.co.id");
        assert_eq!(d.find_disallowed("join t.me/joinchat/abc", &[]).unwrap().host, "t.me");
        assert!(d.find_disallowed("telegram.me/somechannel", &[]).is_some());
    }

    #[test]
    fn test_ignores_dotted_words() {
        let d = detector(&[]);
        for text in [
            "hello.world",
            "see file.txt please",
            "version 1.2.3",
            "mail me at a@b",
            "http://localhost:8080",
            "www.",
            "",
        ] {
            assert!(d.find_disallowed(text, &[]).is_none(), "false positive: {}", text);
        }
    }

    #[test]
    fn test_strips_surrounding_punctuation() {
        let links = LinkDetector::extract_links("(https://evil.com/a), and <www.bad.net>.");
        let hosts: Vec<_> = links.iter().map(|l| l.host.as_str()).collect();
        assert_eq!(hosts, vec!["evil.com", "www.bad.net"]);
    }

    #[test]
    fn test_scheme_glued_to_word() {
        let d = detector(&[]);
        assert_eq!(
            d.find_disallowed("link:https://evil.com", &[]).unwrap().host,
            "evil.com"
        );
    }

    #[test]
    fn test_allowlist_matches_host_and_subdomains_only() {
        let d = detector(&["Allowed.org", "*.docs.rs"]);
        assert!(d.find_disallowed("https://allowed.org/page", &[]).is_none());
        assert!(d.find_disallowed("https://sub.allowed.org", &[]).is_none());
        assert!(d.find_disallowed("https://docs.rs/tokio", &[]).is_none());
        assert!(d.find_disallowed("https://notallowed.org", &[]).is_some());
        assert!(d.find_disallowed("https://allowed.org.evil.com", &[]).is_some());
    }

    #[test]
    fn test_hidden_targets_are_checked() {
        let d = detector(&["allowed.org"]);
        let hidden = vec!["https://evil.example/promo".to_string()];
        let link = d.find_disallowed("click here", &hidden).unwrap();
        assert_eq!(link.host, "evil.example");

        let allowed = vec!["https://allowed.org".to_string()];
        assert!(d.find_disallowed("click here", &allowed).is_none());
    }

    #[test]
    fn test_first_disallowed_link_wins() {
        let d = detector(&["allowed.org"]);
        let link = d
            .find_disallowed("https://allowed.org then https://evil.com", &[])
            .unwrap();
        assert_eq!(link.host, "evil.com");
    }
}
