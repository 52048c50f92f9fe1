//! Inline tag and page-reference extraction for Logseq markdown.
//!
//! `#tag` and `#[[multi word tag]]` are always tags. `[[Page]]` references are
//! cross-references; they only count as tags when the policy says so.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// How page references and tag markup are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagPolicy {
    /// Merge `[[Page]]` targets into the tag set.
    pub wiki_links_as_tags: bool,
    /// Remove `#` / `[[ ]]` markup from the returned text.
    pub strip_markup: bool,
}

/// Tags and links found in a piece of text, plus the text after markup handling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub tags: BTreeSet<String>,
    pub links: BTreeSet<String>,
    pub text: String,
}

/// `#[[tag]]` (group 1 = "#") or `[[page]]` (group 1 empty); group 2 = name.
fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(#?)\[\[([^\[\]\n]+)\]\]").expect("regex"))
}

/// `#tag` at start of text or after whitespace / opening punctuation.
fn hashtag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^|[\s(,])#([\p{L}\p{N}_/-]+)").expect("regex"))
}

/// Collect tags and links from `text` according to `policy`.
pub fn extract(text: &str, policy: TagPolicy) -> Extracted {
    let mut tags = BTreeSet::new();
    let mut links = BTreeSet::new();

    for cap in bracket_re().captures_iter(text) {
        let name = cap[2].trim();
        if name.is_empty() {
            continue;
        }
        if &cap[1] == "#" {
            tags.insert(name.to_string());
        } else {
            links.insert(name.to_string());
        }
    }
    for cap in hashtag_re().captures_iter(text) {
        tags.insert(cap[2].to_string());
    }
    if policy.wiki_links_as_tags {
        tags.extend(links.iter().cloned());
    }

    let text = if policy.strip_markup {
        strip_markup(text)
    } else {
        text.to_string()
    };

    Extracted { tags, links, text }
}

/// Split a `tags:: a, b` property value or front matter string into tags.
pub fn split_tag_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(|t| t.trim().trim_start_matches('#').trim_start_matches("[[").trim_end_matches("]]"))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn strip_markup(text: &str) -> String {
    let without_brackets = bracket_re().replace_all(text, "$2");
    hashtag_re()
        .replace_all(&without_brackets, "${1}${2}")
        .into_owned()
}
