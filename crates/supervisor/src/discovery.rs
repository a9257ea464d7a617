//! Best-effort capability discovery.
//!
//! The backend renders its voices and languages as two `<select>` blocks
//! (`speaker_id`, `language_id`) on its index page. Missing or empty
//! blocks fall back to the sentinel sets in [`Capabilities::default`].

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::schema::Capabilities;

fn value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"value\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap())
}

fn select_block<'a>(html: &'a str, id: &str) -> Option<&'a str> {
    let pattern = format!(
        r#"(?is)<select[^>]*\bid\s*=\s*["']{}["'][^>]*>(.*?)</select>"#,
        regex::escape(id)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Values of the `<option>`s inside the `<select id="{id}">` block, if any.
pub fn select_values(html: &str, id: &str) -> Option<BTreeSet<String>> {
    let block = select_block(html, id)?;
    let values: BTreeSet<String> = value_re()
        .captures_iter(block)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Parses both selector blocks. `None` means neither block yielded values.
pub fn parse_capabilities(html: &str) -> Option<Capabilities> {
    let speakers = select_values(html, "speaker_id");
    let languages = select_values(html, "language_id");
    if speakers.is_none() && languages.is_none() {
        return None;
    }
    let fallback = Capabilities::default();
    Some(Capabilities {
        speakers: speakers.unwrap_or(fallback.speakers),
        languages: languages.unwrap_or(fallback.languages),
    })
}
