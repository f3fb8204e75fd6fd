//! Text normalization shared by the matcher, the search index and the marker.
//!
//! Rendered text and template text differ in entities, whitespace and line
//! break markers. Both sides go through [`normalize_text`] before comparison.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BR_MARKER_RE: Regex = Regex::new(r"(?i)<br\s*/?>").unwrap();
    static ref WBR_MARKER_RE: Regex = Regex::new(r"(?i)<wbr\s*/?>").unwrap();
    static ref ENTITY_RE: Regex =
        Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});").unwrap();
}

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", " "),
    ("ensp", " "),
    ("emsp", " "),
    ("thinsp", " "),
    ("ndash", "\u{2013}"),
    ("mdash", "\u{2014}"),
    ("hellip", "\u{2026}"),
    ("lsquo", "\u{2018}"),
    ("rsquo", "\u{2019}"),
    ("ldquo", "\u{201C}"),
    ("rdquo", "\u{201D}"),
    ("laquo", "\u{00AB}"),
    ("raquo", "\u{00BB}"),
    ("bull", "\u{2022}"),
    ("middot", "\u{00B7}"),
    ("times", "\u{00D7}"),
    ("copy", "\u{00A9}"),
    ("reg", "\u{00AE}"),
    ("trade", "\u{2122}"),
    ("deg", "\u{00B0}"),
    ("euro", "\u{20AC}"),
    ("pound", "\u{00A3}"),
    ("yen", "\u{00A5}"),
    ("cent", "\u{00A2}"),
    ("shy", ""),
    ("zwj", ""),
    ("zwnj", ""),
];

/// Characters that render as nothing (zero-width break opportunities).
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
    )
}

/// Decode named and numeric character references. Unknown entities are kept
/// as written.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body
                .strip_prefix("#x")
                .or_else(|| body.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32).map(String::from)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32).map(String::from)
            } else {
                NAMED_ENTITIES
                    .iter()
                    .find(|(name, _)| *name == body)
                    .map(|(_, value)| value.to_string())
            };
            decoded.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn normalize_once(text: &str) -> String {
    let text = BR_MARKER_RE.replace_all(text, " ");
    let text = WBR_MARKER_RE.replace_all(&text, "");
    let decoded = decode_entities(&text);

    let mut out = String::with_capacity(decoded.len());
    let mut pending_space = false;
    for c in decoded.chars() {
        if is_invisible(c) {
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    out
}

/// Canonical form used for every text comparison: line-break markers become a
/// single space, zero-width markers vanish, entities are decoded, whitespace
/// runs collapse and the ends are trimmed.
///
/// Idempotent: decoding can surface new entities or markers (`&amp;lt;br&gt;`),
/// so the steps repeat until the text stops changing. Every change shortens
/// the text or only canonicalizes whitespace, so this terminates.
pub fn normalize_text(text: &str) -> String {
    let mut current = normalize_once(text);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// First `n` characters of `text` (not bytes).
pub fn char_prefix(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize_text("  Hello\n\t  World  "), "Hello World");
    }

    #[test]
    fn test_decodes_entities() {
        assert_eq!(normalize_text("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(normalize_text("&#169; 2024 &#x41;"), "\u{a9} 2024 A");
        assert_eq!(normalize_text("a&nbsp;b"), "a b");
        assert_eq!(normalize_text("&unknown; stays"), "&unknown; stays");
    }

    #[test]
    fn test_break_markers() {
        assert_eq!(normalize_text("first<br>second"), "first second");
        assert_eq!(normalize_text("first<BR />second"), "first second");
        assert_eq!(normalize_text("super<wbr>long"), "superlong");
        assert_eq!(normalize_text("zero\u{200B}width"), "zerowidth");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "  Tom &amp;amp; Jerry ",
            "&amp;lt;br&amp;gt;x",
            "a <br/>  b",
            "\u{00a0}lead&nbsp;&nbsp;trail\u{00a0}",
            "plain",
            "",
        ];
        for input in inputs {
            let once = normalize_text(input);
            assert_eq!(normalize_text(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_char_prefix() {
        assert_eq!(char_prefix("héllo", 2), "hé");
        assert_eq!(char_prefix("ab", 10), "ab");
    }
}
