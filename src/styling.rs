//! Utility-class classification for rendered elements.
//!
//! A `span` whose classes only change how text looks (weight, style,
//! decoration, transform, color, size, tracking, leading) is decorative and
//! gets flagged so the editor can treat it as inline formatting. A single
//! class that affects layout (alignment, wrapping, background positioning,
//! repeat, clip, origin) disqualifies it.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref TEXT_COLOR_RE: Regex = Regex::new(
        r"^text-(?:inherit|current|transparent|black|white|[a-z]+-(?:50|[1-9]00|950)|\[(?:#[0-9a-fA-F]{3,8}|(?:rgb|rgba|hsl|hsla|oklch)\([^\]]*\))\])(?:/\d+)?$"
    )
    .unwrap();
    static ref BG_COLOR_RE: Regex = Regex::new(
        r"^bg-(?:inherit|current|transparent|black|white|[a-z]+-(?:50|[1-9]00|950)|\[(?:#[0-9a-fA-F]{3,8}|(?:rgb|rgba|hsl|hsla|oklch)\([^\]]*\))\])(?:/\d+)?$"
    )
    .unwrap();

    static ref APPEARANCE_PATTERNS: Vec<Regex> = [
        // weight
        r"^font-(?:thin|extralight|light|normal|medium|semibold|bold|extrabold|black)$",
        // style
        r"^(?:italic|not-italic)$",
        // decoration
        r"^(?:underline|overline|line-through|no-underline)$",
        r"^decoration-[\w\[\]#.-]+$",
        r"^underline-offset-[\w\[\].-]+$",
        // transform
        r"^(?:uppercase|lowercase|capitalize|normal-case)$",
        // size
        r"^text-(?:xs|sm|base|lg|xl|[2-9]xl)$",
        // tracking & leading
        r"^tracking-[\w\[\].-]+$",
        r"^leading-[\w\[\].-]+$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();

    static ref LAYOUT_PATTERNS: Vec<Regex> = [
        // alignment
        r"^text-(?:left|center|right|justify|start|end)$",
        // wrapping
        r"^(?:whitespace-[\w-]+|text-(?:wrap|nowrap|balance|pretty)|break-[\w-]+|truncate|text-ellipsis|text-clip)$",
        // background positioning, repeat, clip, origin
        r"^bg-(?:top|bottom|left|right|center|left-top|left-bottom|right-top|right-bottom)$",
        r"^bg-(?:repeat|no-repeat|repeat-x|repeat-y|repeat-round|repeat-space)$",
        r"^bg-clip-[\w-]+$",
        r"^bg-origin-[\w-]+$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();

    static ref BACKGROUND_URL_RE: Regex = Regex::new(
        r#"(?i)background(?:-image)?\s*:[^;]*url\(\s*['"]?([^'")]+?)['"]?\s*\)"#
    )
    .unwrap();
}

/// Strip responsive/state variants: `md:hover:font-bold` → `font-bold`.
fn base_class(class: &str) -> &str {
    class.rsplit(':').next().unwrap_or(class)
}

pub fn is_appearance_class(class: &str) -> bool {
    let class = base_class(class);
    TEXT_COLOR_RE.is_match(class) || APPEARANCE_PATTERNS.iter().any(|re| re.is_match(class))
}

pub fn is_layout_class(class: &str) -> bool {
    let class = base_class(class);
    LAYOUT_PATTERNS.iter().any(|re| re.is_match(class))
}

/// True when every class is a text-appearance class and none affects layout.
pub fn is_decorative_class_list(classes: &str) -> bool {
    let mut any = false;
    for class in classes.split_whitespace() {
        any = true;
        if is_layout_class(class) || !is_appearance_class(class) {
            return false;
        }
    }
    any
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorClasses {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl ColorClasses {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.background.is_none()
    }
}

/// Text and background color utility classes, last one of each kind wins.
pub fn extract_colors(classes: &str) -> Option<ColorClasses> {
    let mut colors = ColorClasses::default();
    for class in classes.split_whitespace() {
        if class.contains(':') {
            continue;
        }
        if TEXT_COLOR_RE.is_match(class) {
            colors.text = Some(class.to_string());
        } else if BG_COLOR_RE.is_match(class) {
            colors.background = Some(class.to_string());
        }
    }
    (!colors.is_empty()).then_some(colors)
}

/// URL of an inline `background-image: url(...)` declaration.
pub fn background_image_url(style: &str) -> Option<String> {
    BACKGROUND_URL_RE
        .captures(style)
        .map(|caps| caps[1].trim().to_string())
        .filter(|url| !url.is_empty())
}
