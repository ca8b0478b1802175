//! Anonymous post relay and per-user quotas

pub mod menfess;
pub mod quota;

pub use menfess::{broadcast_text, Relay, RelayConfig, RelayError, RelayReceipt};
pub use quota::{QuotaExceeded, QuotaKind, QuotaLimits, QuotaTracker, QuotaUsage};

use crate::types::Category;

/// First recognized `#tag` in free text, as the bare tag (`"male"`), and the
/// text with that tag removed. Unrecognized text yields an empty tag, which
/// `Relay::submit` rejects as a missing category.
pub fn split_category_tag(text: &str) -> (String, String) {
    let lower = text.to_ascii_lowercase();
    for category in Category::ALL {
        let tag = category.hashtag();
        if let Some(pos) = find_tag(&lower, &tag) {
            let mut body = String::with_capacity(text.len());
            body.push_str(&text[..pos]);
            body.push_str(&text[pos + tag.len()..]);
            return (category.as_str().to_string(), body.trim().to_string());
        }
    }
    (String::new(), text.trim().to_string())
}

/// Position of `tag` as a whole hashtag (not a prefix of a longer word)
fn find_tag(haystack: &str, tag: &str) -> Option<usize> {
    let mut start = 0;
    while let Some(offset) = haystack[start..].find(tag) {
        let pos = start + offset;
        let end = pos + tag.len();
        let boundary = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric() && c != '_');
        if boundary {
            return Some(pos);
        }
        start = end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_category_tag() {
        assert_eq!(
            split_category_tag("#male hello there"),
            ("male".to_string(), "hello there".to_string())
        );
        assert_eq!(
            split_category_tag("hi all #FEMALE"),
            ("female".to_string(), "hi all".to_string())
        );
        assert_eq!(
            split_category_tag("no tag here"),
            (String::new(), "no tag here".to_string())
        );
    }

    #[test]
    fn test_tag_must_be_whole_word() {
        // a longer hashtag is not a category tag
        assert_eq!(split_category_tag("#males rule").0, "");
        assert_eq!(split_category_tag("#male, ok").0, "male");
    }
}
